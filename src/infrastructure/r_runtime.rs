//! R runtime: each session is one `Rscript` process.
//!
//! Bindings are collected until `evaluate`, which writes a driver script
//! into a private temporary directory (input assignments, the analysis body
//! verbatim, then a dump of the session's globals) and runs it. The
//! directory and any still-running process are released when the session
//! or the evaluation ends, whichever path it takes.

use std::collections::HashMap;
use std::fs;
use std::io;
use std::time::Duration;

use tempfile::TempDir;
use tracing::{debug, info};

use super::process::{build_rscript_spec, run_supervised, Completion};
use super::r_marshal::{dump_statements, parse_dump, to_r_literal, RValue};
use crate::domain::data::Data;
use crate::domain::error::{EngineError, EngineResult};
use crate::domain::mode::ExecutionMode;
use crate::ports::ScriptRuntime;

const DRIVER_FILE: &str = "driver.R";
const DUMP_FILE: &str = "globals.dump";

pub struct RRuntime {
    rscript: String,
    timeout: Option<Duration>,
    workdir: TempDir,
    assignments: Vec<String>,
    globals: HashMap<String, RValue>,
}

impl RRuntime {
    pub fn new(rscript: &str, timeout: Option<Duration>) -> EngineResult<Self> {
        let workdir = tempfile::Builder::new().prefix("arborist-r-").tempdir()?;
        Ok(Self {
            rscript: rscript.to_string(),
            timeout,
            workdir,
            assignments: Vec::new(),
            globals: HashMap::new(),
        })
    }

    /// The complete driver for `script` with the current bindings.
    pub fn driver_source(&self, script: &str) -> String {
        let dump_path = self.workdir.path().join(DUMP_FILE);
        let mut source = String::new();
        for assignment in &self.assignments {
            source.push_str(assignment);
            source.push('\n');
        }
        source.push_str(script);
        source.push('\n');
        source.push_str(&dump_statements(&dump_path.to_string_lossy()));
        source
    }

    fn unavailable(&self, e: &io::Error) -> EngineError {
        EngineError::RuntimeUnavailable {
            mode: ExecutionMode::R,
            reason: if e.kind() == io::ErrorKind::NotFound {
                format!("{} not found. {}", self.rscript, ExecutionMode::R.install_instructions())
            } else {
                format!("cannot start {}: {}", self.rscript, e)
            },
        }
    }
}

/// Assignment target for a port name; non-syntactic names are backquoted.
fn r_name(name: &str) -> String {
    let syntactic = name
        .chars()
        .next()
        .map(|c| c.is_ascii_alphabetic() || c == '.')
        .unwrap_or(false)
        && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '.' || c == '_');
    if syntactic {
        name.to_string()
    } else {
        format!("`{}`", name.replace('`', "\\`"))
    }
}

impl ScriptRuntime for RRuntime {
    fn bind(&mut self, name: &str, value: Data) -> EngineResult<()> {
        let literal = to_r_literal(&value).map_err(|e| EngineError::Marshal {
            mode: ExecutionMode::R,
            name: name.to_string(),
            reason: format!("{:#}", e),
        })?;
        self.assignments.push(format!("{} <- {}", r_name(name), literal));
        Ok(())
    }

    fn evaluate(&mut self, script: &str) -> EngineResult<()> {
        let driver = self.workdir.path().join(DRIVER_FILE);
        fs::write(&driver, self.driver_source(script))?;

        let spec = build_rscript_spec(&self.rscript, &driver);
        info!("Running R analysis via {}", spec.program);
        let completion = run_supervised(&spec, self.workdir.path(), self.timeout).map_err(|e| self.unavailable(&e))?;

        let output = match completion {
            Completion::TimedOut => {
                return Err(EngineError::ScriptTimeout {
                    mode: ExecutionMode::R,
                    timeout: self.timeout.unwrap_or_default(),
                })
            }
            Completion::Finished(output) => output,
        };
        if !output.status.success() {
            let diagnostic = output.stderr.trim();
            return Err(EngineError::ScriptExecution {
                mode: ExecutionMode::R,
                diagnostic: if diagnostic.is_empty() {
                    format!("Rscript exited with {}", output.status)
                } else {
                    diagnostic.to_string()
                },
            });
        }

        let dump = fs::read_to_string(self.workdir.path().join(DUMP_FILE))?;
        self.globals = parse_dump(&dump).map_err(|e| EngineError::ScriptExecution {
            mode: ExecutionMode::R,
            diagnostic: format!("unreadable session dump: {:#}", e),
        })?;
        debug!("R session exported {} globals", self.globals.len());
        Ok(())
    }

    fn read(&mut self, name: &str) -> EngineResult<Data> {
        let value = self
            .globals
            .remove(name)
            .ok_or_else(|| EngineError::MissingOutput(name.to_string()))?;
        value.into_data().map_err(|e| EngineError::Marshal {
            mode: ExecutionMode::R,
            name: name.to_string(),
            reason: format!("{:#}", e),
        })
    }
}
