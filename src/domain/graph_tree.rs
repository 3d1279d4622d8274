//! Graph Tree
//!
//! The "vtktree" format: an arena-backed directed graph with per-vertex and
//! per-edge data arrays. Vertex 0 is the root; child order follows edge
//! insertion order.

use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};

use crate::domain::tree::{check_depth, Clade};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphEdge {
    pub source: usize,
    pub target: usize,
    pub weight: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphTree {
    vertex_names: Vec<String>,
    vertex_weights: Vec<f64>,
    edges: Vec<GraphEdge>,
}

impl Default for GraphTree {
    fn default() -> Self {
        Self::new()
    }
}

impl GraphTree {
    /// A graph holding only the root vertex.
    pub fn new() -> Self {
        Self {
            vertex_names: vec![String::new()],
            vertex_weights: vec![0.0],
            edges: Vec::new(),
        }
    }

    pub fn root(&self) -> usize {
        0
    }

    pub fn vertex_count(&self) -> usize {
        self.vertex_names.len()
    }

    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }

    pub fn edges(&self) -> &[GraphEdge] {
        &self.edges
    }

    pub fn vertex_name(&self, vertex: usize) -> Option<&str> {
        self.vertex_names.get(vertex).map(String::as_str)
    }

    pub fn vertex_weight(&self, vertex: usize) -> Option<f64> {
        self.vertex_weights.get(vertex).copied()
    }

    pub fn set_vertex_name(&mut self, vertex: usize, name: &str) {
        if let Some(slot) = self.vertex_names.get_mut(vertex) {
            *slot = name.to_string();
        }
    }

    /// Append a vertex below `parent`. Its weight is the parent's weight plus
    /// the edge weight.
    pub fn add_child(&mut self, parent: usize, name: &str, weight: f64) -> usize {
        let id = self.vertex_names.len();
        let parent_weight = self.vertex_weights.get(parent).copied().unwrap_or(0.0);
        self.vertex_names.push(name.to_string());
        self.vertex_weights.push(parent_weight + weight);
        self.edges.push(GraphEdge {
            source: parent,
            target: id,
            weight,
        });
        id
    }

    /// Outgoing edges of `vertex` in insertion order.
    pub fn out_edges(&self, vertex: usize) -> impl Iterator<Item = &GraphEdge> {
        self.edges.iter().filter(move |e| e.source == vertex)
    }

    pub fn is_leaf(&self, vertex: usize) -> bool {
        self.out_edges(vertex).next().is_none()
    }

    pub fn leaf_names(&self) -> Vec<&str> {
        (0..self.vertex_count())
            .filter(|v| self.is_leaf(*v))
            .filter_map(|v| self.vertex_name(v))
            .collect()
    }

    pub fn from_clade(clade: &Clade) -> Self {
        let mut graph = GraphTree::new();
        graph.set_vertex_name(0, &clade.name);
        graph.append_children(0, clade);
        graph
    }

    fn append_children(&mut self, parent: usize, clade: &Clade) {
        for child in &clade.children {
            let id = self.add_child(parent, &child.name, child.length.unwrap_or(0.0));
            self.append_children(id, child);
        }
    }

    /// Rebuild the topology rooted at vertex 0, rejecting anything that is
    /// not a tree.
    pub fn to_clade(&self) -> Result<Clade> {
        let n = self.vertex_count();
        if n == 0 || self.vertex_weights.len() != n {
            bail!("graph tree has inconsistent vertex arrays");
        }

        let mut children: Vec<Vec<(usize, f64)>> = vec![Vec::new(); n];
        let mut has_parent = vec![false; n];
        for edge in &self.edges {
            if edge.source >= n || edge.target >= n {
                bail!("edge {}->{} refers to a missing vertex", edge.source, edge.target);
            }
            if edge.target == self.root() {
                bail!("the root vertex cannot have a parent");
            }
            if has_parent[edge.target] {
                bail!("vertex {} has more than one parent", edge.target);
            }
            has_parent[edge.target] = true;
            children[edge.source].push((edge.target, edge.weight));
        }
        if self.edges.len() != n - 1 {
            bail!("{} vertices need {} edges, found {}", n, n - 1, self.edges.len());
        }

        let mut visited = vec![false; n];
        let clade = Self::build_clade(self, self.root(), None, 0, &children, &mut visited)?;
        if visited.iter().any(|v| !v) {
            bail!("graph tree has vertices unreachable from the root");
        }
        Ok(clade)
    }

    fn build_clade(
        &self,
        vertex: usize,
        length: Option<f64>,
        depth: usize,
        children: &[Vec<(usize, f64)>],
        visited: &mut [bool],
    ) -> Result<Clade> {
        check_depth(depth)?;
        if visited[vertex] {
            bail!("cycle through vertex {}", vertex);
        }
        visited[vertex] = true;
        let mut kids = Vec::with_capacity(children[vertex].len());
        for (child, weight) in &children[vertex] {
            kids.push(self.build_clade(*child, Some(*weight), depth + 1, children, visited)?);
        }
        Ok(Clade {
            name: self.vertex_names[vertex].clone(),
            length,
            children: kids,
        })
    }
}
