//! Error taxonomy shared by the converters, the sandbox and the engine.

use std::time::Duration;
use thiserror::Error;

use crate::domain::mode::ExecutionMode;

#[derive(Error, Debug)]
pub enum EngineError {
    /// Data was malformed for the format it claimed to be in.
    #[error("cannot convert {data_type} from {from} to {to}: {reason}")]
    Conversion {
        data_type: String,
        from: String,
        to: String,
        reason: String,
    },

    /// The registry holds no chain of converters between the two formats.
    #[error("no conversion path for {data_type} from {from} to {to}")]
    UnsupportedConversion {
        data_type: String,
        from: String,
        to: String,
    },

    /// The script raised inside its runtime; `diagnostic` is the runtime's own text.
    #[error("script failed in {mode} runtime: {diagnostic}")]
    ScriptExecution {
        mode: ExecutionMode,
        diagnostic: String,
    },

    #[error("script exceeded {timeout:?} in {mode} runtime")]
    ScriptTimeout {
        mode: ExecutionMode,
        timeout: Duration,
    },

    #[error("{mode} runtime unavailable: {reason}")]
    RuntimeUnavailable { mode: ExecutionMode, reason: String },

    #[error("unknown execution mode: {0}")]
    UnknownMode(String),

    #[error("cannot marshal '{name}' for the {mode} runtime: {reason}")]
    Marshal {
        mode: ExecutionMode,
        name: String,
        reason: String,
    },

    #[error("no binding supplied for input '{0}'")]
    MissingInput(String),

    #[error("script did not produce output '{0}'")]
    MissingOutput(String),

    #[error("invalid analysis '{name}': {reason}")]
    InvalidAnalysis { name: String, reason: String },

    #[error("analysis not found: {0}")]
    AnalysisNotFound(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("document store error: {0}")]
    Store(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl EngineError {
    pub fn conversion(data_type: &str, from: &str, to: &str, reason: impl Into<String>) -> Self {
        EngineError::Conversion {
            data_type: data_type.to_string(),
            from: from.to_string(),
            to: to.to_string(),
            reason: reason.into(),
        }
    }

    pub fn unsupported(data_type: &str, from: &str, to: &str) -> Self {
        EngineError::UnsupportedConversion {
            data_type: data_type.to_string(),
            from: from.to_string(),
            to: to.to_string(),
        }
    }
}

impl From<sled::Error> for EngineError {
    fn from(err: sled::Error) -> Self {
        EngineError::Store(err.to_string())
    }
}

impl From<bincode::Error> for EngineError {
    fn from(err: bincode::Error) -> Self {
        EngineError::Store(err.to_string())
    }
}

pub type EngineResult<T> = Result<T, EngineError>;
