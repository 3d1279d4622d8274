//! The canonical "nested" format and the helpers every pivot converter
//! uses to enter and leave it.

use anyhow::{anyhow, Result};

use crate::domain::data::Data;
use crate::domain::tree::NestedTree;

/// Read and validate a nested tree value.
pub fn nested_tree(data: &Data) -> Result<NestedTree> {
    let value = data
        .as_json()
        .ok_or_else(|| anyhow!("expected a nested tree object, got {}", data.kind()))?;
    NestedTree::from_value(value)
}

pub fn nested_data(tree: &NestedTree) -> Data {
    Data::Json(tree.to_value())
}

/// Check shape and field-name consistency without converting.
pub fn validate(data: &Data) -> Result<()> {
    nested_tree(data).map(|_| ())
}
