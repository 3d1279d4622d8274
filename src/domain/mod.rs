// Domain model for arborist.

pub mod analysis;
pub mod ape_tree;
pub mod conversion;
pub mod data;
pub mod error;
pub mod graph_tree;
pub mod mode;
pub mod store;
pub mod tree;
