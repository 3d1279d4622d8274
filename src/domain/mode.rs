/// Execution Mode Domain Module
///
/// Defines the script runtimes an analysis can ask for.

use crate::domain::error::EngineError;

/// Runtimes able to execute an analysis script.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ExecutionMode {
    /// Embedded Lua interpreter; used when an analysis names no mode.
    #[default]
    Native,
    /// GNU R, driven as an `Rscript` subprocess.
    R,
}

impl ExecutionMode {
    /// Parse a mode tag as written in an analysis definition.
    pub fn from_str(s: &str) -> Option<ExecutionMode> {
        match s.trim().to_lowercase().as_str() {
            "" | "native" | "lua" => Some(ExecutionMode::Native),
            "r" => Some(ExecutionMode::R),
            _ => None,
        }
    }

    /// Resolve the optional `mode` field of an analysis.
    pub fn resolve(tag: Option<&str>) -> Result<ExecutionMode, EngineError> {
        match tag {
            None => Ok(ExecutionMode::Native),
            Some(s) => Self::from_str(s).ok_or_else(|| EngineError::UnknownMode(s.to_string())),
        }
    }

    /// Get the display name of the runtime.
    pub fn name(&self) -> &'static str {
        match self {
            ExecutionMode::Native => "Lua",
            ExecutionMode::R => "R",
        }
    }

    /// The canonical tag used in analysis definitions.
    pub fn tag(&self) -> &'static str {
        match self {
            ExecutionMode::Native => "lua",
            ExecutionMode::R => "r",
        }
    }

    pub fn all() -> [ExecutionMode; 2] {
        [ExecutionMode::Native, ExecutionMode::R]
    }

    /// Get installation instructions for the runtime.
    pub fn install_instructions(&self) -> &'static str {
        match self {
            ExecutionMode::Native => "Lua is embedded; no installation needed",
            ExecutionMode::R => "Install R (https://cran.r-project.org) and make sure Rscript is on PATH",
        }
    }
}

impl std::fmt::Display for ExecutionMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}
