//! Shape statistics driving catalog selection.

use serde::{Deserialize, Serialize};

use super::{ForestDescription, LeafKind, LeafOutput, NodeDescription, SplitCondition};

/// Statistical shape of a forest.
///
/// Computed once per model, either by the parser or with
/// [`ForestStats::from_description`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ForestStats {
    /// Longest root-to-leaf path over all trees, in edges.
    pub max_depth: u32,
    /// Total number of nodes over all trees.
    pub node_count: u64,
    /// Number of nodes in the largest tree.
    pub max_tree_nodes: u64,
    pub feature_count: u32,
    /// Number of outputs (classes for classifiers).
    pub class_count: u32,
    /// Thresholds must be kept at double precision.
    pub double_precision: bool,
    pub has_categorical: bool,
    /// Largest finite magnitude of any threshold or leaf value.
    pub max_abs_value: f64,
    /// Smallest nonzero finite magnitude of any threshold or leaf value, 0
    /// when every value is zero.
    pub min_abs_value: f64,
    /// Width of vector leaves, 0 when leaves are scalar or class ids.
    pub leaf_vector_len: u32,
}

impl ForestStats {
    /// Stats for a forest of the given shape with single-precision values.
    ///
    /// `max_tree_nodes` defaults to `node_count`; tighten it with
    /// [`with_max_tree_nodes`](Self::with_max_tree_nodes) when known.
    pub fn new(max_depth: u32, node_count: u64, feature_count: u32, class_count: u32) -> Self {
        Self {
            max_depth,
            node_count,
            max_tree_nodes: node_count,
            feature_count,
            class_count,
            double_precision: false,
            has_categorical: false,
            max_abs_value: 0.0,
            min_abs_value: 0.0,
            leaf_vector_len: 0,
        }
    }

    pub fn with_max_tree_nodes(mut self, max_tree_nodes: u64) -> Self {
        self.max_tree_nodes = max_tree_nodes;
        self
    }

    pub fn with_double_precision(mut self, double_precision: bool) -> Self {
        self.double_precision = double_precision;
        self
    }

    pub fn with_max_abs_value(mut self, max_abs_value: f64) -> Self {
        self.max_abs_value = max_abs_value;
        self
    }

    pub fn with_min_abs_value(mut self, min_abs_value: f64) -> Self {
        self.min_abs_value = min_abs_value;
        self
    }

    pub fn with_categorical(mut self, has_categorical: bool) -> Self {
        self.has_categorical = has_categorical;
        self
    }

    /// Derive stats from a description.
    ///
    /// Exact for a validated description. Malformed trees still terminate,
    /// with depth bounded by their node count.
    pub fn from_description(forest: &ForestDescription) -> Self {
        let mut magnitudes = Magnitudes::default();
        let mut has_categorical = false;

        for tree in &forest.trees {
            for node in &tree.nodes {
                match node {
                    NodeDescription::Split { condition, .. } => match condition {
                        SplitCondition::Numeric { threshold } => magnitudes.observe(*threshold),
                        SplitCondition::Categorical { .. } => has_categorical = true,
                    },
                    NodeDescription::Leaf(LeafOutput::Scalar(value)) => magnitudes.observe(*value),
                    NodeDescription::Leaf(LeafOutput::Vector(values)) => {
                        values.iter().for_each(|&v| magnitudes.observe(v));
                    }
                    NodeDescription::Leaf(LeafOutput::Class(_)) => {}
                }
            }
        }

        let leaf_vector_len = if forest.leaf_kind() == LeafKind::Vector {
            forest.n_outputs
        } else {
            0
        };

        Self {
            max_depth: forest.trees.iter().map(|t| t.depth()).max().unwrap_or(0),
            node_count: forest.node_count(),
            max_tree_nodes: forest
                .trees
                .iter()
                .map(|t| t.n_nodes() as u64)
                .max()
                .unwrap_or(0),
            feature_count: forest.n_features,
            class_count: forest.n_outputs,
            double_precision: false,
            has_categorical,
            max_abs_value: magnitudes.max,
            min_abs_value: magnitudes.min_nonzero,
            leaf_vector_len,
        }
    }

    /// Whether every threshold and leaf value survives narrowing to `f32`
    /// without overflowing or falling into the subnormal range.
    pub fn fits_single_precision(&self) -> bool {
        let overflows = self.max_abs_value > f32::MAX as f64;
        let underflows = self.min_abs_value > 0.0 && self.min_abs_value < f32::MIN_POSITIVE as f64;
        !overflows && !underflows
    }

    /// Largest distance between a node and one of its children, in node
    /// positions, over any storage layout.
    ///
    /// Children always live in the same tree, so the distance is below the
    /// size of the largest tree, which is itself bounded by the size of a
    /// complete tree of `max_depth`.
    pub fn max_intra_tree_offset(&self) -> u64 {
        let complete_tree = if self.max_depth >= 63 {
            u64::MAX
        } else {
            (1u64 << (self.max_depth + 1)) - 1
        };
        self.max_tree_nodes
            .min(complete_tree)
            .min(self.node_count)
            .saturating_sub(1)
    }
}

#[derive(Default)]
struct Magnitudes {
    max: f64,
    min_nonzero: f64,
}

impl Magnitudes {
    #[inline]
    fn observe(&mut self, value: f64) {
        let abs = value.abs();
        if !value.is_finite() || abs == 0.0 {
            return;
        }
        self.max = self.max.max(abs);
        if self.min_nonzero == 0.0 || abs < self.min_nonzero {
            self.min_nonzero = abs;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::description::{Aggregation, TreeBuilder, TreeDescription};

    #[test]
    fn stats_from_description() {
        let mut builder = TreeBuilder::with_capacity(5);
        builder.init_root_with_n_nodes(5);
        builder.set_numeric_split(0, 2, -3.5, true, 1, 2);
        builder.set_categorical_split(1, 0, vec![3], false, 3, 4);
        builder.make_leaf(2, LeafOutput::Scalar(1.0));
        builder.make_leaf(3, LeafOutput::Scalar(7.0));
        builder.make_leaf(4, LeafOutput::Scalar(f64::INFINITY));

        let mut forest = ForestDescription::new(4, 1).with_base_score(vec![-0.5]);
        forest.push_tree(builder.freeze(), 0);
        forest.push_tree(TreeDescription::leaf(LeafOutput::Scalar(2.0)), 0);

        let stats = ForestStats::from_description(&forest);
        assert_eq!(stats.max_depth, 2);
        assert_eq!(stats.node_count, 6);
        assert_eq!(stats.max_tree_nodes, 5);
        assert_eq!(stats.feature_count, 4);
        assert_eq!(stats.class_count, 1);
        assert!(stats.has_categorical);
        assert!(!stats.double_precision);
        assert_eq!(stats.max_abs_value, 7.0);
        assert_eq!(stats.min_abs_value, 1.0);
        assert_eq!(stats.leaf_vector_len, 0);
    }

    #[test]
    fn vote_forest_has_no_vector_leaves() {
        let mut forest = ForestDescription::new(1, 3).with_aggregation(Aggregation::Vote);
        forest.push_tree(TreeDescription::leaf(LeafOutput::Class(2)), 0);
        let stats = ForestStats::from_description(&forest);
        assert_eq!(stats.leaf_vector_len, 0);
        assert_eq!(stats.class_count, 3);
    }

    #[test]
    fn tiny_values_do_not_fit_single_precision() {
        let mut forest = ForestDescription::new(1, 1);
        forest.push_tree(TreeDescription::leaf(LeafOutput::Scalar(0.0)), 0);
        forest.push_tree(TreeDescription::leaf(LeafOutput::Scalar(-1e-50)), 0);
        let stats = ForestStats::from_description(&forest);
        assert_eq!(stats.min_abs_value, 1e-50);
        assert!(!stats.fits_single_precision());

        let stats = ForestStats::new(1, 3, 1, 1).with_min_abs_value(f32::MIN_POSITIVE as f64);
        assert!(stats.fits_single_precision());
        assert!(!stats.with_max_abs_value(1e39).fits_single_precision());
    }

    #[test]
    fn offset_bound_uses_smallest_constraint() {
        // depth 4 caps a tree at 31 nodes
        let stats = ForestStats::new(4, 155, 10, 3).with_max_tree_nodes(1_000);
        assert_eq!(stats.max_intra_tree_offset(), 30);

        let stats = ForestStats::new(20, 400_000, 10, 1).with_max_tree_nodes(2_000);
        assert_eq!(stats.max_intra_tree_offset(), 1_999);

        let stats = ForestStats::new(200, 0, 1, 1);
        assert_eq!(stats.max_intra_tree_offset(), 0);
    }
}
