//! Analysis Orchestrator
//!
//! Ties the conversion registry and the sandbox together: converts caller
//! inputs into the formats a script declares, runs it, and converts the
//! produced values into the formats the caller asked for.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use rayon::prelude::*;
use tracing::{debug, info, warn};

use crate::domain::analysis::{AnalysisSpec, Binding, Inputs, OutputRequest, OutputRequests, Outputs};
use crate::domain::conversion::{ConverterRegistry, SharedRegistry};
use crate::domain::data::Data;
use crate::domain::error::{EngineError, EngineResult};
use crate::domain::store::DocumentStore;
use crate::domain::analysis::PortSpec;
use crate::formats::{nested, treestore, NESTED, TREE, TREESTORE};
use crate::infrastructure::concurrency::build_pool;
use crate::infrastructure::config::EngineConfig;
use crate::infrastructure::sandbox::Sandbox;
use crate::ports::AnalysisCatalog;

/// One invocation in a batch.
#[derive(Debug, Clone)]
pub struct Job {
    pub analysis: AnalysisSpec,
    pub inputs: Inputs,
    pub outputs: OutputRequests,
}

pub struct Engine {
    registry: SharedRegistry,
    sandbox: Sandbox,
    config: EngineConfig,
}

impl Default for Engine {
    fn default() -> Self {
        Self::new(EngineConfig::default())
    }
}

impl Engine {
    /// An engine with every built-in format registered.
    pub fn new(config: EngineConfig) -> Self {
        Self::with_registry(ConverterRegistry::with_defaults(), config)
    }

    pub fn with_registry(registry: ConverterRegistry, config: EngineConfig) -> Self {
        Self {
            registry: SharedRegistry::new(registry),
            sandbox: Sandbox::new(config.runtime.clone()),
            config,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// The registry as seen by requests started now.
    pub fn registry(&self) -> Arc<ConverterRegistry> {
        self.registry.snapshot()
    }

    /// Add a converter. Requests already in flight keep their snapshot.
    pub fn register_converter<F>(&self, data_type: &str, from: &str, to: &str, func: F)
    where
        F: Fn(&Data) -> anyhow::Result<Data> + Send + Sync + 'static,
    {
        info!("Registering converter {}: {} -> {}", data_type, from, to);
        self.registry.register(data_type, from, to, func);
    }

    /// Run an analysis with the configured timeout.
    pub fn run(&self, analysis: &AnalysisSpec, inputs: &Inputs, outputs: &OutputRequests) -> EngineResult<Outputs> {
        self.run_with_timeout(analysis, inputs, outputs, None)
    }

    pub fn run_with_timeout(
        &self,
        analysis: &AnalysisSpec,
        inputs: &Inputs,
        outputs: &OutputRequests,
        timeout: Option<Duration>,
    ) -> EngineResult<Outputs> {
        let registry = self.registry.snapshot();
        let mode = analysis.mode()?;
        info!("Running analysis '{}' in {} runtime", analysis.name(), mode);

        let mut bound = BTreeMap::new();
        for port in analysis.inputs() {
            let binding = inputs
                .get(&port.name)
                .ok_or_else(|| EngineError::MissingInput(port.name.clone()))?;
            debug!("Input '{}': {} -> {}", port.name, binding.format, port.format);
            check_canonical(port, &binding.format, &binding.data)?;
            let value = registry.convert(&port.data_type, &binding.format, &port.format, &binding.data)?;
            bound.insert(port.name.clone(), value);
        }
        for name in inputs.keys() {
            if !analysis.inputs().iter().any(|p| &p.name == name) {
                warn!("Ignoring input '{}': analysis '{}' has no such port", name, analysis.name());
            }
        }

        let output_names: Vec<String> = analysis.outputs().iter().map(|p| p.name.clone()).collect();
        let mut produced = self
            .sandbox
            .execute(mode, analysis.script(), bound, &output_names, timeout)?;

        let mut result = Outputs::new();
        for port in analysis.outputs() {
            let value = produced
                .remove(&port.name)
                .ok_or_else(|| EngineError::MissingOutput(port.name.clone()))?;
            let format = outputs
                .get(&port.name)
                .map(|r| r.format.as_str())
                .unwrap_or(port.format.as_str());
            debug!("Output '{}': {} -> {}", port.name, port.format, format);
            check_canonical(port, &port.format, &value)?;
            let data = registry.convert(&port.data_type, &port.format, format, &value)?;
            result.insert(port.name.clone(), Binding::new(format, data));
        }
        Ok(result)
    }

    /// Script-free conversion of one value.
    pub fn convert(&self, data_type: &str, input: &Binding, request: &OutputRequest) -> EngineResult<Binding> {
        let registry = self.registry.snapshot();
        let data = registry.convert(data_type, &input.format, &request.format, &input.data)?;
        Ok(Binding::new(&request.format, data))
    }

    /// Look an analysis up by name, then run it.
    pub fn run_named(
        &self,
        catalog: &dyn AnalysisCatalog,
        name: &str,
        inputs: &Inputs,
        outputs: &OutputRequests,
    ) -> EngineResult<Outputs> {
        let analysis = catalog
            .lookup(name)
            .ok_or_else(|| EngineError::AnalysisNotFound(name.to_string()))?;
        self.run(&analysis, inputs, outputs)
    }

    /// Run independent invocations in parallel. Results come back in job
    /// order; one failing job does not affect the others.
    pub fn run_batch(&self, jobs: &[Job]) -> EngineResult<Vec<EngineResult<Outputs>>> {
        let pool = build_pool(self.config.pool.workers())?;
        info!("Running batch of {} analyses", jobs.len());
        Ok(pool.install(|| {
            jobs.par_iter()
                .map(|job| self.run(&job.analysis, &job.inputs, &job.outputs))
                .collect()
        }))
    }

    /// Persist a tree as row-store documents under `collection`.
    pub fn store_tree(&self, store: &dyn DocumentStore, collection: &str, tree: &Binding) -> EngineResult<()> {
        let stored = self.convert(TREE, tree, &OutputRequest::new(TREESTORE))?;
        let bytes = stored.data.as_bytes().unwrap_or_default();
        let docs = treestore::decode_documents(bytes)
            .map_err(|e| EngineError::conversion(TREE, TREESTORE, TREESTORE, format!("{:#}", e)))?;
        store.insert_documents(collection, &docs)
    }

    /// Load a stored tree and deliver it in the requested format.
    pub fn load_tree(&self, store: &dyn DocumentStore, collection: &str, request: &OutputRequest) -> EngineResult<Binding> {
        let docs = store.load_documents(collection)?;
        if docs.is_empty() {
            return Err(EngineError::Store(format!("collection '{}' is empty", collection)));
        }
        let bytes = treestore::encode_documents(&docs)
            .map_err(|e| EngineError::conversion(TREE, TREESTORE, TREESTORE, format!("{:#}", e)))?;
        self.convert(TREE, &Binding::new(TREESTORE, Data::Bytes(bytes)), request)
    }
}

/// Reject a malformed canonical tree at the boundary, even when no
/// conversion would otherwise look at it.
fn check_canonical(port: &PortSpec, format: &str, data: &Data) -> EngineResult<()> {
    if port.data_type == TREE && format == NESTED {
        nested::validate(data)
            .map_err(|e| EngineError::conversion(TREE, NESTED, &port.format, format!("{:#}", e)))?;
    }
    Ok(())
}
