//! Built-in tree formats and their registration.
//!
//! Every format converts to and from the canonical `nested` form, so any
//! pair of formats is at most two hops apart.

pub mod foreign;
pub mod nested;
pub mod newick;
pub mod nexus;
pub mod treestore;

pub(crate) use nested::{nested_data, nested_tree};

use crate::domain::conversion::ConverterRegistry;

pub const TREE: &str = "tree";

pub const NESTED: &str = "nested";
pub const NEWICK: &str = "newick";
pub const NEXUS: &str = "nexus";
pub const TREESTORE: &str = "treestore";
pub const VTKTREE: &str = "vtktree";
pub const APETREE: &str = "r.apetree";

/// Install the tree converters. Registration order matters for tie-breaking
/// between equally short paths.
pub fn register_tree_formats(registry: &mut ConverterRegistry) {
    registry.set_canonical(TREE, NESTED);

    registry.register(TREE, NEWICK, NESTED, newick::to_nested);
    registry.register(TREE, NESTED, NEWICK, newick::from_nested);
    registry.register(TREE, NEXUS, NESTED, nexus::to_nested);
    registry.register(TREE, NESTED, NEXUS, nexus::from_nested);
    registry.register(TREE, TREESTORE, NESTED, treestore::to_nested);
    registry.register(TREE, NESTED, TREESTORE, treestore::from_nested);
    registry.register(TREE, VTKTREE, NESTED, foreign::graph_to_nested);
    registry.register(TREE, NESTED, VTKTREE, foreign::nested_to_graph);
    registry.register(TREE, APETREE, NESTED, foreign::ape_to_nested);
    registry.register(TREE, NESTED, APETREE, foreign::nested_to_ape);
}
