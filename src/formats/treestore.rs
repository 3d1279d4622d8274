//! Row-store ("treestore")
//!
//! One document per node plus a wrapper document carrying `rooted` and the
//! id of the top clade. The byte form is the documents' bincode encodings
//! laid end to end, wrapper first.

use std::collections::{HashMap, HashSet};
use std::io::Cursor;

use anyhow::{anyhow, bail, Context, Result};
use bincode::Options;

use crate::domain::data::Data;
use crate::domain::store::TreeDocument;
use crate::domain::tree::{check_depth, Clade, NestedTree, TreeNode};
use crate::formats::{nested_data, nested_tree};

/// Flatten a canonical tree into documents. Ids start at 1 and are only
/// unique within the returned set; the wrapper has id 0.
pub fn to_documents(tree: &NestedTree) -> Vec<TreeDocument> {
    let mut docs = vec![TreeDocument {
        id: 0,
        rooted: Some(tree.is_rooted()),
        name: None,
        branch_length: None,
        clades: vec![1],
    }];
    let mut next_id = 1;
    mint(&tree.root, true, &mut next_id, &mut docs);
    docs
}

fn mint(node: &TreeNode, is_root: bool, next_id: &mut u64, docs: &mut Vec<TreeDocument>) -> u64 {
    let id = *next_id;
    *next_id += 1;
    let slot = docs.len();
    docs.push(TreeDocument {
        id,
        rooted: None,
        name: if node.is_leaf() || !node.name().is_empty() {
            Some(node.name().to_string())
        } else {
            None
        },
        branch_length: if is_root { None } else { Some(node.edge_weight()) },
        clades: Vec::new(),
    });
    let clades = node
        .children
        .iter()
        .map(|child| mint(child, false, next_id, docs))
        .collect();
    docs[slot].clades = clades;
    id
}

/// Rebuild the canonical tree from a document set.
pub fn from_documents(docs: &[TreeDocument]) -> Result<NestedTree> {
    let mut by_id: HashMap<u64, &TreeDocument> = HashMap::new();
    for doc in docs {
        if by_id.insert(doc.id, doc).is_some() {
            bail!("duplicate document id {}", doc.id);
        }
    }

    let wrappers: Vec<&TreeDocument> = docs.iter().filter(|d| d.rooted.is_some()).collect();
    let wrapper = match wrappers.as_slice() {
        [only] => *only,
        [] => bail!("no root document"),
        _ => bail!("{} root documents", wrappers.len()),
    };
    let top = match wrapper.clades.as_slice() {
        [top] => *top,
        other => bail!("root document must reference exactly one clade, found {}", other.len()),
    };

    let mut visited = HashSet::new();
    visited.insert(wrapper.id);
    let clade = resolve(top, None, 0, &by_id, &mut visited)?;
    if visited.len() != docs.len() {
        bail!("{} documents are not reachable from the root", docs.len() - visited.len());
    }

    let mut tree = NestedTree::from_clade(&clade);
    if wrapper.rooted == Some(false) {
        tree.rooted = Some(false);
    }
    Ok(tree)
}

fn resolve(
    id: u64,
    length: Option<f64>,
    depth: usize,
    by_id: &HashMap<u64, &TreeDocument>,
    visited: &mut HashSet<u64>,
) -> Result<Clade> {
    check_depth(depth)?;
    let doc = by_id
        .get(&id)
        .ok_or_else(|| anyhow!("dangling clade id {}", id))?;
    if !visited.insert(id) {
        bail!("document {} is referenced more than once", id);
    }
    if doc.rooted.is_some() {
        bail!("root document {} used as a clade", id);
    }
    let mut children = Vec::with_capacity(doc.clades.len());
    for child in &doc.clades {
        let child_length = by_id.get(child).and_then(|d| d.branch_length).unwrap_or(0.0);
        children.push(resolve(*child, Some(child_length), depth + 1, by_id, visited)?);
    }
    Ok(Clade {
        name: doc.name.clone().unwrap_or_default(),
        length,
        children,
    })
}

/// Fixed-width little-endian bincode, capped at `limit` bytes per document.
fn codec(limit: u64) -> impl Options {
    bincode::DefaultOptions::new()
        .with_fixint_encoding()
        .allow_trailing_bytes()
        .with_limit(limit)
}

pub fn encode_documents(docs: &[TreeDocument]) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    for doc in docs {
        codec(u64::MAX)
            .serialize_into(&mut out, doc)
            .context("failed to encode document")?;
    }
    Ok(out)
}

/// Decode every document in a treestore byte stream. Length prefixes are
/// never trusted beyond the bytes that remain.
pub fn decode_documents(bytes: &[u8]) -> Result<Vec<TreeDocument>> {
    let mut cursor = Cursor::new(bytes);
    let mut docs = Vec::new();
    while (cursor.position() as usize) < bytes.len() {
        let start = cursor.position();
        let remaining = bytes.len() as u64 - start;
        let doc: TreeDocument = codec(remaining)
            .deserialize_from(&mut cursor)
            .with_context(|| format!("corrupt document at byte {}", start))?;
        docs.push(doc);
    }
    Ok(docs)
}

/// treestore -> nested
pub fn to_nested(data: &Data) -> Result<Data> {
    let bytes = data
        .as_bytes()
        .ok_or_else(|| anyhow!("expected treestore bytes, got {}", data.kind()))?;
    let docs = decode_documents(bytes)?;
    Ok(nested_data(&from_documents(&docs)?))
}

/// nested -> treestore
pub fn from_nested(data: &Data) -> Result<Data> {
    let tree = nested_tree(data)?;
    Ok(Data::Bytes(encode_documents(&to_documents(&tree))?))
}
