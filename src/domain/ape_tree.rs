//! R "phylo" objects
//!
//! The "r.apetree" format mirrors the list R's ape package uses: an edge
//! matrix over 1-based node numbers where tips are `1..=n`, the root is
//! `n + 1` and the remaining internal nodes follow in pre-order.

use std::fmt;

use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};

use crate::domain::tree::{check_depth, Clade};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApeTree {
    /// `(parent, child)` rows of the edge matrix.
    pub edge: Vec<(usize, usize)>,
    pub edge_length: Option<Vec<f64>>,
    pub tip_label: Vec<String>,
    pub n_node: usize,
    pub node_label: Option<Vec<String>>,
}

impl ApeTree {
    pub fn tip_count(&self) -> usize {
        self.tip_label.len()
    }

    pub fn root_node(&self) -> usize {
        self.tip_count() + 1
    }

    /// ape's notion of rootedness: the root splits in at most two.
    pub fn is_rooted(&self) -> bool {
        let root = self.root_node();
        self.edge.iter().filter(|(p, _)| *p == root).count() <= 2
    }

    pub fn from_clade(clade: &Clade) -> Result<Self> {
        if clade.is_leaf() {
            bail!("a phylo object needs at least one edge");
        }

        let tips = clade.leaf_names();
        let n_tips = tips.len();
        let mut numbering = Numbering {
            next_tip: 1,
            next_node: n_tips + 1,
        };
        let mut tree = ApeTree {
            edge: Vec::new(),
            edge_length: Some(Vec::new()),
            tip_label: tips.iter().map(|s| s.to_string()).collect(),
            n_node: 0,
            node_label: None,
        };
        let mut node_labels = Vec::new();

        let root = numbering.next_node;
        numbering.next_node += 1;
        tree.n_node += 1;
        node_labels.push(clade.name.clone());
        tree.append(root, clade, &mut numbering, &mut node_labels);

        if node_labels.iter().any(|l| !l.is_empty()) {
            tree.node_label = Some(node_labels);
        }
        Ok(tree)
    }

    fn append(
        &mut self,
        parent: usize,
        clade: &Clade,
        numbering: &mut Numbering,
        node_labels: &mut Vec<String>,
    ) {
        for child in &clade.children {
            let id = if child.is_leaf() {
                let id = numbering.next_tip;
                numbering.next_tip += 1;
                id
            } else {
                let id = numbering.next_node;
                numbering.next_node += 1;
                self.n_node += 1;
                node_labels.push(child.name.clone());
                id
            };
            self.edge.push((parent, id));
            if let Some(lengths) = self.edge_length.as_mut() {
                lengths.push(child.length.unwrap_or(0.0));
            }
            if !child.is_leaf() {
                self.append(id, child, numbering, node_labels);
            }
        }
    }

    pub fn to_clade(&self) -> Result<Clade> {
        let n_tips = self.tip_count();
        let total = n_tips + self.n_node;
        if n_tips == 0 || self.n_node == 0 {
            bail!("phylo object has {} tips and {} internal nodes", n_tips, self.n_node);
        }
        if self.edge.len() != total - 1 {
            bail!("phylo object with {} nodes needs {} edges, found {}", total, total - 1, self.edge.len());
        }
        if let Some(lengths) = &self.edge_length {
            if lengths.len() != self.edge.len() {
                bail!("edge.length has {} entries for {} edges", lengths.len(), self.edge.len());
            }
        }
        if let Some(labels) = &self.node_label {
            if labels.len() != self.n_node {
                bail!("node.label has {} entries for {} internal nodes", labels.len(), self.n_node);
            }
        }

        let mut children: Vec<Vec<(usize, Option<f64>)>> = vec![Vec::new(); total + 1];
        let mut has_parent = vec![false; total + 1];
        for (i, (parent, child)) in self.edge.iter().enumerate() {
            if *parent == 0 || *parent > total || *child == 0 || *child > total {
                bail!("edge {} -> {} refers to a node outside 1..={}", parent, child, total);
            }
            if *parent <= n_tips {
                bail!("tip {} cannot have descendants", parent);
            }
            if has_parent[*child] {
                bail!("node {} has more than one parent", child);
            }
            has_parent[*child] = true;
            let length = self.edge_length.as_ref().map(|l| l[i]);
            children[*parent].push((*child, length));
        }

        let root = self.root_node();
        if has_parent[root] {
            bail!("root node {} has a parent", root);
        }
        let mut visited = vec![false; total + 1];
        let clade = self.build_clade(root, None, 0, &children, &mut visited)?;
        if visited[1..].iter().any(|v| !v) {
            bail!("phylo object has nodes unreachable from the root");
        }
        Ok(clade)
    }

    fn build_clade(
        &self,
        node: usize,
        length: Option<f64>,
        depth: usize,
        children: &[Vec<(usize, Option<f64>)>],
        visited: &mut [bool],
    ) -> Result<Clade> {
        check_depth(depth)?;
        if visited[node] {
            bail!("cycle through node {}", node);
        }
        visited[node] = true;

        let n_tips = self.tip_count();
        let name = if node <= n_tips {
            self.tip_label[node - 1].clone()
        } else {
            self.node_label
                .as_ref()
                .map(|labels| labels[node - n_tips - 1].clone())
                .unwrap_or_default()
        };

        let mut kids = Vec::with_capacity(children[node].len());
        for (child, child_length) in &children[node] {
            kids.push(self.build_clade(*child, *child_length, depth + 1, children, visited)?);
        }
        if node > n_tips && kids.is_empty() {
            bail!("internal node {} has no descendants", node);
        }
        Ok(Clade {
            name,
            length,
            children: kids,
        })
    }
}

struct Numbering {
    next_tip: usize,
    next_node: usize,
}

/// Matches the summary R prints for a phylo object.
impl fmt::Display for ApeTree {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f)?;
        writeln!(
            f,
            "Phylogenetic tree with {} tips and {} internal nodes.",
            self.tip_count(),
            self.n_node
        )?;
        writeln!(f)?;
        writeln!(f, "Tip labels:")?;
        writeln!(f, "  {}", self.tip_label.join(", "))?;
        if let Some(labels) = &self.node_label {
            writeln!(f, "Node labels:")?;
            writeln!(f, "  {}", labels.join(", "))?;
        }
        writeln!(f)?;
        let rooting = if self.is_rooted() { "Rooted" } else { "Unrooted" };
        if self.edge_length.is_some() {
            writeln!(f, "{}; includes branch length(s).", rooting)
        } else {
            writeln!(f, "{}; no branch length.", rooting)
        }
    }
}
