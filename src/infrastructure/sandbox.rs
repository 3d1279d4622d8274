/// Script Execution Sandbox
///
/// Opens one runtime session per execution, binds the inputs, evaluates the
/// script and harvests the requested outputs. The session is dropped before
/// `execute` returns on every path, which tears down its interpreter or
/// process.

use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use tracing::{debug, info};

use super::config::RuntimeConfig;
use super::lua_runtime::LuaRuntime;
use super::r_runtime::RRuntime;
use crate::domain::data::Data;
use crate::domain::error::EngineResult;
use crate::domain::mode::ExecutionMode;
use crate::ports::ScriptRuntime;

#[derive(Debug, Clone, Default)]
pub struct Sandbox {
    config: RuntimeConfig,
}

impl Sandbox {
    pub fn new(config: RuntimeConfig) -> Self {
        Self { config }
    }

    /// Start a fresh session for `mode`.
    pub fn open(&self, mode: ExecutionMode, timeout: Option<Duration>) -> EngineResult<Box<dyn ScriptRuntime>> {
        Ok(match mode {
            ExecutionMode::Native => Box::new(LuaRuntime::new(timeout)?),
            ExecutionMode::R => Box::new(RRuntime::new(&self.config.rscript(), timeout)?),
        })
    }

    /// Run `script` with `inputs` bound and return the named outputs.
    /// `timeout` falls back to the configured one.
    pub fn execute(
        &self,
        mode: ExecutionMode,
        script: &str,
        inputs: BTreeMap<String, Data>,
        output_names: &[String],
        timeout: Option<Duration>,
    ) -> EngineResult<BTreeMap<String, Data>> {
        let timeout = timeout.or_else(|| self.config.timeout());
        let started = Instant::now();
        let mut session = self.open(mode, timeout)?;

        for (name, value) in inputs {
            session.bind(&name, value)?;
        }
        session.evaluate(script)?;

        let mut outputs = BTreeMap::new();
        for name in output_names {
            outputs.insert(name.clone(), session.read(name)?);
        }
        drop(session);

        info!("{} script finished in {:?}", mode, started.elapsed());
        debug!("Harvested outputs: {:?}", output_names);
        Ok(outputs)
    }
}
