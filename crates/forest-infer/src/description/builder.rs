//! Incremental construction of [`TreeDescription`]s.

use super::{LeafOutput, NodeDescription, SplitCondition, TreeDescription};

/// Builder for a tree description with nodes addressed by index.
///
/// Nodes are allocated up front with [`init_root_with_n_nodes`] (or one at a
/// time with [`push_node`]) and then turned into splits or leaves. Nodes that
/// are never assigned stay zero-valued scalar leaves.
///
/// [`init_root_with_n_nodes`]: TreeBuilder::init_root_with_n_nodes
/// [`push_node`]: TreeBuilder::push_node
#[derive(Debug, Clone, Default)]
pub struct TreeBuilder {
    nodes: Vec<NodeDescription>,
}

impl TreeBuilder {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            nodes: Vec::with_capacity(capacity),
        }
    }

    /// Reset the builder to `n_nodes` placeholder leaves. Node 0 is the root.
    pub fn init_root_with_n_nodes(&mut self, n_nodes: usize) {
        self.nodes.clear();
        self.nodes
            .resize(n_nodes, NodeDescription::Leaf(LeafOutput::Scalar(0.0)));
    }

    /// Append a placeholder leaf and return its index.
    pub fn push_node(&mut self) -> u32 {
        self.nodes.push(NodeDescription::Leaf(LeafOutput::Scalar(0.0)));
        (self.nodes.len() - 1) as u32
    }

    pub fn n_nodes(&self) -> usize {
        self.nodes.len()
    }

    pub fn set_numeric_split(
        &mut self,
        node: u32,
        feature: u32,
        threshold: f64,
        default_left: bool,
        left: u32,
        right: u32,
    ) {
        self.nodes[node as usize] = NodeDescription::Split {
            feature,
            condition: SplitCondition::Numeric { threshold },
            default_left,
            left,
            right,
        };
    }

    /// Categorical split: categories in `categories` go right.
    pub fn set_categorical_split(
        &mut self,
        node: u32,
        feature: u32,
        mut categories: Vec<u32>,
        default_left: bool,
        left: u32,
        right: u32,
    ) {
        categories.sort_unstable();
        categories.dedup();
        self.nodes[node as usize] = NodeDescription::Split {
            feature,
            condition: SplitCondition::Categorical { categories },
            default_left,
            left,
            right,
        };
    }

    pub fn make_leaf(&mut self, node: u32, output: LeafOutput) {
        self.nodes[node as usize] = NodeDescription::Leaf(output);
    }

    /// Finish the tree.
    pub fn freeze(self) -> TreeDescription {
        TreeDescription::new(self.nodes)
    }
}
