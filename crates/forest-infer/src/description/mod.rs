//! Representation-agnostic forest description.
//!
//! This is the hand-off format between a model parser and the engine: every
//! tree is a flat list of nodes (root at index 0, children referenced by
//! index) with thresholds and outputs kept at `f64` precision. The engine
//! validates it, derives [`ForestStats`] from it and narrows it into one of
//! the catalog representations.

mod builder;
mod stats;

use serde::{Deserialize, Serialize};

use crate::forest::categories::category_of;

pub use builder::TreeBuilder;
pub use stats::ForestStats;

// =============================================================================
// Model-level rules
// =============================================================================

/// How per-tree outputs are combined into the forest output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Aggregation {
    /// Add leaf values (gradient boosting).
    #[default]
    Sum,
    /// Average leaf values over the trees contributing to each output
    /// (random forest regression / probability averaging).
    Average,
    /// Count one vote per tree for the leaf's class, normalized by the
    /// number of trees (random forest classification).
    Vote,
}

/// Transform applied to each aggregated output row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Postprocessing {
    #[default]
    Identity,
    /// Logistic function on every output.
    Sigmoid,
    /// Exponential on every output.
    Exp,
    /// Softmax over the outputs of a row.
    Softmax,
    /// Replace the row with the index of its largest output.
    MaxIndex,
}

// =============================================================================
// Nodes
// =============================================================================

/// Decision rule of a split node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum SplitCondition {
    /// Go left if `value < threshold`.
    Numeric { threshold: f64 },
    /// Go right if the value's category is in the set, left otherwise.
    Categorical { categories: Vec<u32> },
}

/// Output stored in a leaf.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum LeafOutput {
    /// Single value added to the tree's output group.
    Scalar(f64),
    /// One value per forest output.
    Vector(Vec<f64>),
    /// Class receiving this tree's vote.
    Class(u32),
}

impl LeafOutput {
    pub fn kind(&self) -> LeafKind {
        match self {
            LeafOutput::Scalar(_) => LeafKind::Scalar,
            LeafOutput::Vector(_) => LeafKind::Vector,
            LeafOutput::Class(_) => LeafKind::Class,
        }
    }
}

/// Kind of output stored in the leaves of a forest. All leaves share one kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LeafKind {
    Scalar,
    Vector,
    Class,
}

/// One node of a tree description.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum NodeDescription {
    Split {
        feature: u32,
        condition: SplitCondition,
        /// Direction taken when the feature value is missing (NaN).
        default_left: bool,
        left: u32,
        right: u32,
    },
    Leaf(LeafOutput),
}

impl NodeDescription {
    #[inline]
    pub fn is_leaf(&self) -> bool {
        matches!(self, NodeDescription::Leaf(_))
    }
}

// =============================================================================
// Trees
// =============================================================================

/// A single tree. The root is node 0.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct TreeDescription {
    pub nodes: Vec<NodeDescription>,
}

impl TreeDescription {
    pub fn new(nodes: Vec<NodeDescription>) -> Self {
        Self { nodes }
    }

    /// A tree made of a single leaf.
    pub fn leaf(output: LeafOutput) -> Self {
        Self::new(vec![NodeDescription::Leaf(output)])
    }

    #[inline]
    pub fn n_nodes(&self) -> usize {
        self.nodes.len()
    }

    /// Length of the longest root-to-leaf path, in edges.
    ///
    /// Exact for a validated tree. On a malformed tree the walk visits at most
    /// `n_nodes` nodes and skips children out of bounds, so cycles terminate.
    pub fn depth(&self) -> u32 {
        let mut max_depth = 0;
        let mut budget = self.nodes.len();
        let mut stack = vec![(0u32, 0u32)];
        while let Some((node, depth)) = stack.pop() {
            let Some(node) = self.nodes.get(node as usize) else {
                continue;
            };
            if budget == 0 {
                break;
            }
            budget -= 1;
            max_depth = max_depth.max(depth);
            if let NodeDescription::Split { left, right, .. } = node {
                stack.push((*right, depth + 1));
                stack.push((*left, depth + 1));
            }
        }
        max_depth
    }

    /// Walk the tree for one row and return the reached leaf's node id.
    ///
    /// Features past the end of `row` are treated as missing. This is the
    /// reference semantics every typed representation must reproduce.
    pub fn leaf_for(&self, row: &[f64]) -> usize {
        let mut node = 0usize;
        loop {
            match &self.nodes[node] {
                NodeDescription::Leaf(_) => return node,
                NodeDescription::Split {
                    feature,
                    condition,
                    default_left,
                    left,
                    right,
                } => {
                    let value = row.get(*feature as usize).copied().unwrap_or(f64::NAN);
                    let go_left = if value.is_nan() {
                        *default_left
                    } else {
                        match condition {
                            SplitCondition::Numeric { threshold } => value < *threshold,
                            SplitCondition::Categorical { categories } => !category_of(value)
                                .is_some_and(|category| categories.contains(&category)),
                        }
                    };
                    node = (if go_left { *left } else { *right }) as usize;
                }
            }
        }
    }

    fn validate(&self, tree: usize, n_features: u32) -> Result<(), DescriptionError> {
        let n_nodes = self.nodes.len();
        if n_nodes == 0 {
            return Err(DescriptionError::EmptyTree { tree });
        }

        let mut visited = vec![false; n_nodes];
        let mut stack = vec![0u32];
        while let Some(node) = stack.pop() {
            let idx = node as usize;
            if visited[idx] {
                return Err(DescriptionError::DuplicateVisit { tree, node });
            }
            visited[idx] = true;

            if let NodeDescription::Split {
                feature, left, right, ..
            } = &self.nodes[idx]
            {
                if *feature >= n_features {
                    return Err(DescriptionError::FeatureOutOfRange {
                        tree,
                        node,
                        feature: *feature,
                        n_features,
                    });
                }
                for (side, child) in [("left", *left), ("right", *right)] {
                    if child as usize >= n_nodes {
                        return Err(DescriptionError::ChildOutOfBounds {
                            tree,
                            node,
                            side,
                            child,
                            n_nodes,
                        });
                    }
                    if child == node {
                        return Err(DescriptionError::SelfLoop { tree, node });
                    }
                }
                stack.push(*right);
                stack.push(*left);
            }
        }

        if let Some(node) = visited.iter().position(|&v| !v) {
            return Err(DescriptionError::UnreachableNode {
                tree,
                node: node as u32,
            });
        }
        Ok(())
    }

    fn leaves(&self) -> impl Iterator<Item = (usize, &LeafOutput)> {
        self.nodes.iter().enumerate().filter_map(|(i, node)| match node {
            NodeDescription::Leaf(output) => Some((i, output)),
            NodeDescription::Split { .. } => None,
        })
    }
}

// =============================================================================
// Forest
// =============================================================================

/// Structural problems found in a [`ForestDescription`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DescriptionError {
    #[error("forest has no trees")]
    EmptyForest,
    #[error("forest has no outputs")]
    NoOutputs,
    #[error("tree {tree} has no nodes")]
    EmptyTree { tree: usize },
    #[error("tree {tree}: node {node} references {side} child {child}, tree has {n_nodes} nodes")]
    ChildOutOfBounds {
        tree: usize,
        node: u32,
        side: &'static str,
        child: u32,
        n_nodes: usize,
    },
    #[error("tree {tree}: node {node} references itself")]
    SelfLoop { tree: usize, node: u32 },
    #[error("tree {tree}: node {node} is reachable by more than one path")]
    DuplicateVisit { tree: usize, node: u32 },
    #[error("tree {tree}: node {node} is unreachable from the root")]
    UnreachableNode { tree: usize, node: u32 },
    #[error("tree {tree}: node {node} splits on feature {feature}, forest has {n_features}")]
    FeatureOutOfRange {
        tree: usize,
        node: u32,
        feature: u32,
        n_features: u32,
    },
    #[error("base score has {len} values for {n_outputs} outputs")]
    BaseScoreLenMismatch { n_outputs: u32, len: usize },
    #[error("{len} tree groups for {n_trees} trees")]
    TreeGroupsLenMismatch { n_trees: usize, len: usize },
    #[error("tree {tree} assigned to group {group} but forest has {n_outputs} outputs")]
    TreeGroupOutOfRange { tree: usize, group: u32, n_outputs: u32 },
    #[error("tree {tree}: leaf {node} has {len} values, expected {expected}")]
    LeafVectorLenMismatch {
        tree: usize,
        node: u32,
        expected: u32,
        len: usize,
    },
    #[error("tree {tree}: leaf {node} votes for class {class} but forest has {n_outputs} outputs")]
    ClassOutOfRange {
        tree: usize,
        node: u32,
        class: u32,
        n_outputs: u32,
    },
    #[error("tree {tree}: leaf {node} is {found:?}, expected {expected:?} leaves")]
    LeafKindMismatch {
        tree: usize,
        node: u32,
        expected: LeafKind,
        found: LeafKind,
    },
}

/// A parsed forest, ready to be loaded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForestDescription {
    /// Number of input features.
    pub n_features: u32,
    /// Number of outputs (output groups or classes).
    pub n_outputs: u32,
    pub trees: Vec<TreeDescription>,
    /// Output group of each tree (used by scalar leaves).
    pub tree_groups: Vec<u32>,
    /// Value added to each output after aggregation.
    pub base_score: Vec<f64>,
    #[serde(default)]
    pub aggregation: Aggregation,
    #[serde(default)]
    pub postprocessing: Postprocessing,
}

impl ForestDescription {
    /// Create an empty forest with the given number of features and outputs.
    pub fn new(n_features: u32, n_outputs: u32) -> Self {
        Self {
            n_features,
            n_outputs,
            trees: Vec::new(),
            tree_groups: Vec::new(),
            base_score: vec![0.0; n_outputs as usize],
            aggregation: Aggregation::Sum,
            postprocessing: Postprocessing::Identity,
        }
    }

    pub fn with_aggregation(mut self, aggregation: Aggregation) -> Self {
        self.aggregation = aggregation;
        self
    }

    pub fn with_postprocessing(mut self, postprocessing: Postprocessing) -> Self {
        self.postprocessing = postprocessing;
        self
    }

    pub fn with_base_score(mut self, base_score: Vec<f64>) -> Self {
        debug_assert_eq!(base_score.len(), self.n_outputs as usize);
        self.base_score = base_score;
        self
    }

    /// Add a tree contributing to output `group`.
    pub fn push_tree(&mut self, tree: TreeDescription, group: u32) {
        debug_assert!(group < self.n_outputs, "group out of range");
        self.trees.push(tree);
        self.tree_groups.push(group);
    }

    #[inline]
    pub fn n_trees(&self) -> usize {
        self.trees.len()
    }

    /// Total number of nodes over all trees.
    pub fn node_count(&self) -> u64 {
        self.trees.iter().map(|t| t.n_nodes() as u64).sum()
    }

    /// Leaf kind shared by every leaf of the forest.
    ///
    /// Vote forests hold class leaves; otherwise the first leaf decides.
    pub fn leaf_kind(&self) -> LeafKind {
        if self.aggregation == Aggregation::Vote {
            return LeafKind::Class;
        }
        self.trees
            .iter()
            .flat_map(|t| t.leaves())
            .map(|(_, output)| output.kind())
            .find(|&kind| kind != LeafKind::Class)
            .unwrap_or(LeafKind::Scalar)
    }

    /// Validate structural invariants: trees are proper binary trees rooted
    /// at node 0, features, groups and classes are in range, and all leaves
    /// share one kind compatible with the aggregation rule.
    pub fn validate(&self) -> Result<(), DescriptionError> {
        if self.trees.is_empty() {
            return Err(DescriptionError::EmptyForest);
        }
        if self.n_outputs == 0 {
            return Err(DescriptionError::NoOutputs);
        }
        if self.base_score.len() != self.n_outputs as usize {
            return Err(DescriptionError::BaseScoreLenMismatch {
                n_outputs: self.n_outputs,
                len: self.base_score.len(),
            });
        }
        if self.tree_groups.len() != self.trees.len() {
            return Err(DescriptionError::TreeGroupsLenMismatch {
                n_trees: self.trees.len(),
                len: self.tree_groups.len(),
            });
        }
        for (tree, &group) in self.tree_groups.iter().enumerate() {
            if group >= self.n_outputs {
                return Err(DescriptionError::TreeGroupOutOfRange {
                    tree,
                    group,
                    n_outputs: self.n_outputs,
                });
            }
        }

        let expected = self.leaf_kind();
        for (tree_idx, tree) in self.trees.iter().enumerate() {
            tree.validate(tree_idx, self.n_features)?;
            for (node, output) in tree.leaves() {
                let node = node as u32;
                if output.kind() != expected {
                    return Err(DescriptionError::LeafKindMismatch {
                        tree: tree_idx,
                        node,
                        expected,
                        found: output.kind(),
                    });
                }
                match output {
                    LeafOutput::Vector(values) if values.len() != self.n_outputs as usize => {
                        return Err(DescriptionError::LeafVectorLenMismatch {
                            tree: tree_idx,
                            node,
                            expected: self.n_outputs,
                            len: values.len(),
                        });
                    }
                    LeafOutput::Class(class) if *class >= self.n_outputs => {
                        return Err(DescriptionError::ClassOutOfRange {
                            tree: tree_idx,
                            node,
                            class: *class,
                            n_outputs: self.n_outputs,
                        });
                    }
                    _ => {}
                }
            }
        }
        Ok(())
    }
}
