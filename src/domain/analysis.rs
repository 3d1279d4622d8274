//! Analysis definitions and port bindings.

use std::collections::{BTreeMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::domain::data::Data;
use crate::domain::error::{EngineError, EngineResult};
use crate::domain::mode::ExecutionMode;

/// A named, typed, formatted slot on an analysis.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortSpec {
    pub name: String,
    #[serde(rename = "type")]
    pub data_type: String,
    /// Format the script itself consumes or produces.
    pub format: String,
}

impl PortSpec {
    pub fn new(name: &str, data_type: &str, format: &str) -> Self {
        Self {
            name: name.to_string(),
            data_type: data_type.to_string(),
            format: format.to_string(),
        }
    }
}

/// A caller-supplied value for an input port, or an engine-produced value
/// for an output port.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Binding {
    pub format: String,
    pub data: Data,
}

impl Binding {
    pub fn new(format: &str, data: impl Into<Data>) -> Self {
        Self {
            format: format.to_string(),
            data: data.into(),
        }
    }
}

/// The format a caller wants an output delivered in.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputRequest {
    pub format: String,
}

impl OutputRequest {
    pub fn new(format: &str) -> Self {
        Self {
            format: format.to_string(),
        }
    }
}

pub type Inputs = BTreeMap<String, Binding>;
pub type OutputRequests = BTreeMap<String, OutputRequest>;
pub type Outputs = BTreeMap<String, Binding>;

#[derive(Debug, Deserialize)]
struct RawAnalysis {
    name: String,
    #[serde(default)]
    inputs: Vec<PortSpec>,
    #[serde(default)]
    outputs: Vec<PortSpec>,
    #[serde(default)]
    script: String,
    #[serde(default)]
    mode: Option<String>,
}

impl TryFrom<RawAnalysis> for AnalysisSpec {
    type Error = EngineError;

    fn try_from(raw: RawAnalysis) -> EngineResult<Self> {
        AnalysisSpec::new(&raw.name, raw.inputs, raw.outputs, &raw.script, raw.mode.as_deref())
    }
}

/// A validated analysis. Fields are read-only once constructed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawAnalysis")]
pub struct AnalysisSpec {
    name: String,
    inputs: Vec<PortSpec>,
    outputs: Vec<PortSpec>,
    script: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    mode: Option<String>,
}

impl AnalysisSpec {
    pub fn new(
        name: &str,
        inputs: Vec<PortSpec>,
        outputs: Vec<PortSpec>,
        script: &str,
        mode: Option<&str>,
    ) -> EngineResult<Self> {
        let invalid = |reason: String| EngineError::InvalidAnalysis {
            name: name.to_string(),
            reason,
        };

        if name.trim().is_empty() {
            return Err(invalid("analysis name is empty".to_string()));
        }
        for (direction, ports) in [("input", &inputs), ("output", &outputs)] {
            let mut seen = HashSet::new();
            for port in ports {
                if port.name.is_empty() || port.data_type.is_empty() || port.format.is_empty() {
                    return Err(invalid(format!(
                        "{} port '{}' needs a name, type and format",
                        direction, port.name
                    )));
                }
                if !seen.insert(port.name.as_str()) {
                    return Err(invalid(format!("duplicate {} port '{}'", direction, port.name)));
                }
            }
        }
        if let Some(tag) = mode {
            if ExecutionMode::from_str(tag).is_none() {
                return Err(EngineError::UnknownMode(tag.to_string()));
            }
        }

        Ok(Self {
            name: name.to_string(),
            inputs,
            outputs,
            script: script.to_string(),
            mode: mode.map(str::to_string),
        })
    }

    pub fn from_json(text: &str) -> EngineResult<Self> {
        serde_json::from_str(text).map_err(|e| EngineError::InvalidAnalysis {
            name: "<json>".to_string(),
            reason: e.to_string(),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn inputs(&self) -> &[PortSpec] {
        &self.inputs
    }

    pub fn outputs(&self) -> &[PortSpec] {
        &self.outputs
    }

    pub fn script(&self) -> &str {
        &self.script
    }

    pub fn mode_tag(&self) -> Option<&str> {
        self.mode.as_deref()
    }

    pub fn mode(&self) -> EngineResult<ExecutionMode> {
        ExecutionMode::resolve(self.mode.as_deref())
    }
}
