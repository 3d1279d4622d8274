//! Engine configuration, read from TOML.
//!
//! ```toml
//! [runtime]
//! timeout_secs = 30
//! rscript = "/usr/local/bin/Rscript"
//!
//! [pool]
//! workers = 4
//! ```

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::domain::error::{EngineError, EngineResult};

/// Overrides `runtime.rscript`.
pub const RSCRIPT_ENV: &str = "ARBORIST_RSCRIPT";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EngineConfig {
    pub runtime: RuntimeConfig,
    pub pool: PoolConfig,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RuntimeConfig {
    /// Wall-clock bound on one script execution. Unset means unbounded.
    pub timeout_secs: Option<f64>,
    /// Path or name of the R front end.
    pub rscript: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PoolConfig {
    pub workers: Option<usize>,
}

impl EngineConfig {
    pub fn from_toml_str(text: &str) -> EngineResult<Self> {
        let config: EngineConfig =
            toml::from_str(text).map_err(|e| EngineError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> EngineResult<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }

    fn validate(&self) -> EngineResult<()> {
        if let Some(secs) = self.runtime.timeout_secs {
            if secs <= 0.0 || Duration::try_from_secs_f64(secs).is_err() {
                return Err(EngineError::Config(format!(
                    "runtime.timeout_secs must be a positive number, got {}",
                    secs
                )));
            }
        }
        if self.pool.workers == Some(0) {
            return Err(EngineError::Config("pool.workers must be at least 1".to_string()));
        }
        Ok(())
    }
}

impl RuntimeConfig {
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_secs
            .and_then(|secs| Duration::try_from_secs_f64(secs).ok())
    }

    /// The R interpreter to spawn: environment first, then configuration.
    pub fn rscript(&self) -> String {
        std::env::var(RSCRIPT_ENV)
            .ok()
            .filter(|v| !v.trim().is_empty())
            .or_else(|| self.rscript.clone())
            .unwrap_or_else(|| "Rscript".to_string())
    }
}

impl PoolConfig {
    pub fn workers(&self) -> usize {
        self.workers
            .unwrap_or_else(super::concurrency::default_workers)
    }
}
