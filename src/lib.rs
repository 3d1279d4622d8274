// Main library entry point for arborist.

pub mod application;
pub mod domain;
pub mod formats;
pub mod infrastructure;
pub mod ports;

pub use application::Engine;
pub use domain::analysis::{AnalysisSpec, Binding, Inputs, OutputRequest, OutputRequests, Outputs, PortSpec};
pub use domain::conversion::{ConverterRegistry, SharedRegistry};
pub use domain::data::Data;
pub use domain::error::{EngineError, EngineResult};
pub use domain::mode::ExecutionMode;
