//! Canonical Tree Model
//!
//! The pivot representation every tree format converts through. Serialized
//! with serde it is exactly the "nested" format.

use anyhow::{anyhow, bail, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

pub const NODE_NAME: &str = "node name";
pub const NODE_WEIGHT: &str = "node weight";
pub const EDGE_WEIGHT: &str = "weight";

const WEIGHT_TOLERANCE: f64 = 1e-9;

/// Deepest tree any reader accepts. Every tree walk here recurses, so
/// readers reject deeper input before building one.
pub const MAX_DEPTH: usize = 512;

/// Error unless `depth` is within [`MAX_DEPTH`].
pub fn check_depth(depth: usize) -> Result<()> {
    if depth > MAX_DEPTH {
        bail!("tree nesting exceeds {} levels", MAX_DEPTH);
    }
    Ok(())
}

/// Nesting depth of a JSON value, measured without recursion and giving up
/// once `limit` is passed.
fn json_depth_exceeds(value: &Value, limit: usize) -> bool {
    let mut stack = vec![(value, 1usize)];
    while let Some((value, depth)) = stack.pop() {
        if depth > limit {
            return true;
        }
        match value {
            Value::Array(items) => stack.extend(items.iter().map(|v| (v, depth + 1))),
            Value::Object(map) => stack.extend(map.values().map(|v| (v, depth + 1))),
            _ => {}
        }
    }
    false
}

pub type Attributes = Map<String, Value>;

/// Bare topology with branch lengths, shared by the format parsers and
/// serializers. `length` is the edge into this clade.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Clade {
    pub name: String,
    pub length: Option<f64>,
    pub children: Vec<Clade>,
}

impl Clade {
    pub fn leaf(name: &str, length: f64) -> Self {
        Self {
            name: name.to_string(),
            length: Some(length),
            children: Vec::new(),
        }
    }

    pub fn internal(length: Option<f64>, children: Vec<Clade>) -> Self {
        Self {
            name: String::new(),
            length,
            children,
        }
    }

    pub fn is_leaf(&self) -> bool {
        self.children.is_empty()
    }

    /// Leaf names in left-to-right order.
    pub fn leaf_names(&self) -> Vec<&str> {
        let mut out = Vec::new();
        self.collect_leaf_names(&mut out);
        out
    }

    fn collect_leaf_names<'a>(&'a self, out: &mut Vec<&'a str>) {
        if self.is_leaf() {
            out.push(&self.name);
        }
        for child in &self.children {
            child.collect_leaf_names(out);
        }
    }
}

/// A node of the canonical tree. `edge_data` describes the edge to the
/// parent and is absent at the root.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TreeNode {
    pub node_data: Attributes,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub edge_data: Option<Attributes>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<TreeNode>,
}

impl TreeNode {
    pub fn name(&self) -> &str {
        self.node_data
            .get(NODE_NAME)
            .and_then(Value::as_str)
            .unwrap_or("")
    }

    pub fn node_weight(&self) -> f64 {
        self.node_data
            .get(NODE_WEIGHT)
            .and_then(Value::as_f64)
            .unwrap_or(0.0)
    }

    pub fn edge_weight(&self) -> f64 {
        self.edge_data
            .as_ref()
            .and_then(|e| e.get(EDGE_WEIGHT))
            .and_then(Value::as_f64)
            .unwrap_or(0.0)
    }

    pub fn is_leaf(&self) -> bool {
        self.children.is_empty()
    }

    fn count(&self) -> usize {
        1 + self.children.iter().map(TreeNode::count).sum::<usize>()
    }

    fn from_clade(clade: &Clade, parent_weight: f64, is_root: bool) -> Self {
        let (node_weight, edge_data) = if is_root {
            (0.0, None)
        } else {
            let length = clade.length.unwrap_or(0.0);
            let mut edge = Attributes::new();
            edge.insert(EDGE_WEIGHT.to_string(), Value::from(length));
            (parent_weight + length, Some(edge))
        };

        let mut node_data = Attributes::new();
        node_data.insert(NODE_NAME.to_string(), Value::from(clade.name.clone()));
        node_data.insert(NODE_WEIGHT.to_string(), Value::from(node_weight));

        let children = clade
            .children
            .iter()
            .map(|c| TreeNode::from_clade(c, node_weight, false))
            .collect();

        TreeNode {
            node_data,
            edge_data,
            children,
        }
    }

    fn to_clade(&self, is_root: bool) -> Clade {
        Clade {
            name: self.name().to_string(),
            length: if is_root { None } else { Some(self.edge_weight()) },
            children: self.children.iter().map(|c| c.to_clade(false)).collect(),
        }
    }

    fn structurally_equal(&self, other: &TreeNode) -> bool {
        self.node_data == other.node_data
            && self.edge_data == other.edge_data
            && self.children.len() == other.children.len()
            && self
                .children
                .iter()
                .zip(&other.children)
                .all(|(a, b)| a.structurally_equal(b))
    }

    fn validate(
        &self,
        node_fields: &[String],
        edge_fields: &[String],
        parent_weight: Option<f64>,
        path: &str,
    ) -> Result<()> {
        for key in self.node_data.keys() {
            if !node_fields.iter().any(|f| f == key) {
                bail!("node field '{}' at {} is not declared in node_fields", key, path);
            }
        }
        if let Some(name) = self.node_data.get(NODE_NAME) {
            if !name.is_string() {
                bail!("'{}' at {} must be a string", NODE_NAME, path);
            }
        }
        if let Some(weight) = self.node_data.get(NODE_WEIGHT) {
            if !weight.is_number() {
                bail!("'{}' at {} must be numeric", NODE_WEIGHT, path);
            }
        }

        match (parent_weight, &self.edge_data) {
            (None, Some(_)) => bail!("the root node must not carry edge_data"),
            (Some(_), None) => bail!("node at {} is missing edge_data", path),
            (Some(parent), Some(edge)) => {
                for key in edge.keys() {
                    if !edge_fields.iter().any(|f| f == key) {
                        bail!("edge field '{}' at {} is not declared in edge_fields", key, path);
                    }
                }
                let weight = match edge.get(EDGE_WEIGHT) {
                    None => 0.0,
                    Some(v) => v
                        .as_f64()
                        .ok_or_else(|| anyhow!("edge '{}' at {} must be numeric", EDGE_WEIGHT, path))?,
                };
                if weight < 0.0 {
                    bail!("negative branch length {} at {}", weight, path);
                }
                let expected = parent + weight;
                let actual = self.node_weight();
                if (expected - actual).abs() > WEIGHT_TOLERANCE * expected.abs().max(1.0) {
                    bail!(
                        "'{}' at {} is {} but parent weight plus edge weight is {}",
                        NODE_WEIGHT,
                        path,
                        actual,
                        expected
                    );
                }
            }
            (None, None) => {}
        }

        let weight = self.node_weight();
        for (i, child) in self.children.iter().enumerate() {
            child.validate(node_fields, edge_fields, Some(weight), &format!("{}/{}", path, i))?;
        }
        Ok(())
    }
}

/// The canonical tree. Field-name lists live at the root only; the root's
/// own node data is flattened next to them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NestedTree {
    pub node_fields: Vec<String>,
    pub edge_fields: Vec<String>,
    /// Only recorded when a source format says the tree is unrooted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rooted: Option<bool>,
    #[serde(flatten)]
    pub root: TreeNode,
}

impl NestedTree {
    /// Build the canonical tree from a parsed topology, accumulating node
    /// weights down every path.
    pub fn from_clade(clade: &Clade) -> Self {
        NestedTree {
            node_fields: vec![NODE_NAME.to_string(), NODE_WEIGHT.to_string()],
            edge_fields: vec![EDGE_WEIGHT.to_string()],
            rooted: None,
            root: TreeNode::from_clade(clade, 0.0, true),
        }
    }

    pub fn to_clade(&self) -> Clade {
        self.root.to_clade(true)
    }

    /// Parse and validate a "nested" value.
    pub fn from_value(value: &Value) -> Result<Self> {
        // Each tree level is an object plus its children array.
        if json_depth_exceeds(value, 2 * MAX_DEPTH + 2) {
            bail!("tree nesting exceeds {} levels", MAX_DEPTH);
        }
        let tree: NestedTree = serde_json::from_value(value.clone())
            .map_err(|e| anyhow!("not a nested tree: {}", e))?;
        tree.validate()?;
        Ok(tree)
    }

    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }

    /// Check shape, declared field names and the node-weight invariant.
    pub fn validate(&self) -> Result<()> {
        self.root
            .validate(&self.node_fields, &self.edge_fields, None, "root")
    }

    pub fn is_rooted(&self) -> bool {
        self.rooted.unwrap_or(true)
    }

    pub fn node_count(&self) -> usize {
        self.root.count()
    }

    /// Equality that ignores the order of the field-name lists but not the
    /// order of children.
    pub fn structurally_equal(&self, other: &NestedTree) -> bool {
        let mut a_nodes = self.node_fields.clone();
        let mut b_nodes = other.node_fields.clone();
        a_nodes.sort();
        b_nodes.sort();
        let mut a_edges = self.edge_fields.clone();
        let mut b_edges = other.edge_fields.clone();
        a_edges.sort();
        b_edges.sort();

        a_nodes == b_nodes
            && a_edges == b_edges
            && self.is_rooted() == other.is_rooted()
            && self.root.structurally_equal(&other.root)
    }
}
