// Traits at the seams of the engine.

use std::collections::HashMap;
use std::sync::RwLock;

use crate::domain::analysis::AnalysisSpec;
use crate::domain::data::Data;
use crate::domain::error::EngineResult;

pub use crate::domain::store::DocumentStore;

/// One script runtime session. A session is used by exactly one execution
/// and dropped afterwards; dropping it must release everything it holds.
pub trait ScriptRuntime {
    /// Make `value` visible to the script under `name`.
    fn bind(&mut self, name: &str, value: Data) -> EngineResult<()>;
    /// Run the script body in the bound scope.
    fn evaluate(&mut self, script: &str) -> EngineResult<()>;
    /// Read a variable back after evaluation.
    fn read(&mut self, name: &str) -> EngineResult<Data>;
}

/// Lookup of analysis definitions by name.
pub trait AnalysisCatalog: Send + Sync {
    fn lookup(&self, name: &str) -> Option<AnalysisSpec>;
}

/// Catalog held in process memory.
#[derive(Default)]
pub struct MemoryCatalog {
    analyses: RwLock<HashMap<String, AnalysisSpec>>,
}

impl MemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace an analysis under its own name.
    pub fn insert(&self, spec: AnalysisSpec) {
        self.analyses
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(spec.name().to_string(), spec);
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .analyses
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .keys()
            .cloned()
            .collect();
        names.sort();
        names
    }
}

impl AnalysisCatalog for MemoryCatalog {
    fn lookup(&self, name: &str) -> Option<AnalysisSpec> {
        self.analyses
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(name)
            .cloned()
    }
}
