//! Values that flow through converters, ports and runtimes.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::domain::ape_tree::ApeTree;
use crate::domain::graph_tree::GraphTree;

/// A value in some format. Text formats carry `Text`, object formats carry
/// `Json`, storage formats carry `Bytes`, and the foreign tree objects carry
/// their own structures.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Data {
    Text(String),
    Json(Value),
    Bytes(Vec<u8>),
    GraphTree(GraphTree),
    ApeTree(ApeTree),
}

impl Data {
    /// Variant name, used in mismatch diagnostics.
    pub fn kind(&self) -> &'static str {
        match self {
            Data::Text(_) => "text",
            Data::Json(_) => "json",
            Data::Bytes(_) => "bytes",
            Data::GraphTree(_) => "graph tree",
            Data::ApeTree(_) => "phylo object",
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Data::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_json(&self) -> Option<&Value> {
        match self {
            Data::Json(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Data::Bytes(b) => Some(b),
            _ => None,
        }
    }

    /// Interpret a caller-supplied JSON value: strings stay text, anything
    /// else is an object value.
    pub fn from_json(value: Value) -> Self {
        match value {
            Value::String(s) => Data::Text(s),
            other => Data::Json(other),
        }
    }
}

impl From<&str> for Data {
    fn from(s: &str) -> Self {
        Data::Text(s.to_string())
    }
}

impl From<String> for Data {
    fn from(s: String) -> Self {
        Data::Text(s)
    }
}

impl From<Value> for Data {
    fn from(v: Value) -> Self {
        Data::Json(v)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_from_json_keeps_strings_as_text() {
        assert_eq!(Data::from_json(json!("(a,b);")), Data::Text("(a,b);".to_string()));
        assert_eq!(Data::from_json(json!({"k": 1})).kind(), "json");
    }

    #[test]
    fn test_untagged_serialization() {
        assert_eq!(serde_json::to_value(Data::from("x")).unwrap(), json!("x"));
        assert_eq!(serde_json::to_value(Data::Json(json!([1, 2]))).unwrap(), json!([1, 2]));
    }
}
