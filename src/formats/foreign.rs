//! Foreign tree objects: the "vtktree" graph and the R "phylo" object.

use anyhow::{anyhow, Result};

use crate::domain::ape_tree::ApeTree;
use crate::domain::data::Data;
use crate::domain::graph_tree::GraphTree;
use crate::domain::tree::NestedTree;
use crate::formats::{nested_data, nested_tree};

/// vtktree -> nested
pub fn graph_to_nested(data: &Data) -> Result<Data> {
    let Data::GraphTree(graph) = data else {
        return Err(anyhow!("expected a graph tree, got {}", data.kind()));
    };
    Ok(nested_data(&NestedTree::from_clade(&graph.to_clade()?)))
}

/// nested -> vtktree
pub fn nested_to_graph(data: &Data) -> Result<Data> {
    let tree = nested_tree(data)?;
    Ok(Data::GraphTree(GraphTree::from_clade(&tree.to_clade())))
}

/// r.apetree -> nested
pub fn ape_to_nested(data: &Data) -> Result<Data> {
    let Data::ApeTree(phylo) = data else {
        return Err(anyhow!("expected a phylo object, got {}", data.kind()));
    };
    Ok(nested_data(&NestedTree::from_clade(&phylo.to_clade()?)))
}

/// nested -> r.apetree
pub fn nested_to_ape(data: &Data) -> Result<Data> {
    let tree = nested_tree(data)?;
    Ok(Data::ApeTree(ApeTree::from_clade(&tree.to_clade())?))
}
