//! Width-specialized forest storage.

use std::fmt;
use std::marker::PhantomData;
use std::ops::Range;

use crate::catalog::{index_sentinel, narrow_index, CatalogIndex, ForestSpec, Precision, Width};
use crate::description::{
    Aggregation, ForestDescription, LeafKind, LeafOutput, NodeDescription, Postprocessing,
    SplitCondition, TreeDescription,
};
use crate::error::{ForestError, NodeField};

use super::categories::{CategoriesBuilder, CategoriesStorage};
use super::layout::{storage_order, TreeLayout};
use super::metadata::{NodeFlags, NodeMetadata};

/// Widened view of one stored node.
///
/// Child references are positions relative to the tree root.
pub type NodeView = NodeDescription;

/// A forest stored with the axis types of catalog entry `S`.
///
/// Nodes of all trees live in flat structure-of-arrays buffers, each tree
/// occupying a contiguous range starting at its root position:
///
/// - `values`: split threshold, or the leaf value for scalar leaves
/// - `metadata`: leaf / default-left / categorical flags plus the split
///   feature or the voted class
/// - `offsets`: distance from a split to its distant child (see
///   [`TreeLayout`])
/// - `refs`: vector-leaf row, categorical segment, or the index sentinel
///
/// Immutable once built.
pub struct ForestRepr<S: ForestSpec> {
    values: Box<[S::Threshold]>,
    metadata: Box<[NodeMetadata<S::Metadata>]>,
    offsets: Box<[S::Offset]>,
    refs: Box<[S::Index]>,

    tree_roots: Box<[S::Index]>,
    tree_groups: Box<[u32]>,
    base_score: Box<[f64]>,
    /// Row-major `[n_vector_leaves, n_outputs]`.
    leaf_vectors: Box<[S::Threshold]>,
    categories: CategoriesStorage,
    /// Per-output multiplier applied after accumulation.
    output_scale: Box<[f64]>,

    n_features: u32,
    n_outputs: u32,
    leaf_kind: LeafKind,
    aggregation: Aggregation,
    postprocessing: Postprocessing,
    layout: TreeLayout,

    _spec: PhantomData<fn() -> S>,
}

impl<S: ForestSpec> ForestRepr<S> {
    /// Narrow a description into this representation.
    ///
    /// The description is validated first. Every node value is converted to
    /// the entry's axis types; the first value that does not fit is logged
    /// and reported as [`ForestError::ConstructionOverflow`].
    pub fn from_description(
        forest: &ForestDescription,
        layout: TreeLayout,
    ) -> Result<Self, ForestError> {
        forest.validate()?;

        let leaf_kind = forest.leaf_kind();
        let n_nodes = forest.node_count() as usize;
        let n_outputs = forest.n_outputs as usize;

        let mut values = Vec::with_capacity(n_nodes);
        let mut metadata = Vec::with_capacity(n_nodes);
        let mut offsets = Vec::with_capacity(n_nodes);
        let mut refs = Vec::with_capacity(n_nodes);
        let mut tree_roots = Vec::with_capacity(forest.n_trees());
        let mut leaf_vectors = Vec::new();
        let mut categories = CategoriesBuilder::default();

        for (tree_idx, tree) in forest.trees.iter().enumerate() {
            let root = values.len();
            let last = root + tree.n_nodes() - 1;
            if narrow_index::<S::Index>(last as u64).is_none() {
                return Err(overflow::<S::Index>(
                    tree_idx,
                    tree.n_nodes() - 1,
                    NodeField::NodePosition,
                    last as f64,
                ));
            }
            tree_roots.push(narrow_index::<S::Index>(root as u64).ok_or_else(|| {
                overflow::<S::Index>(tree_idx, 0, NodeField::NodePosition, root as f64)
            })?);

            let order = storage_order(tree, layout);
            for (local, &node_id) in order.order.iter().enumerate() {
                let node = node_id as usize;
                let fail = |field: NodeField, value: f64, target: &'static str| {
                    overflow_named(tree_idx, node, field, value, target)
                };

                match &tree.nodes[node] {
                    NodeDescription::Split {
                        feature,
                        condition,
                        default_left,
                        left,
                        right,
                    } => {
                        let left = order.position[*left as usize] as usize;
                        let right = order.position[*right as usize] as usize;
                        let offset = layout.offset(local, left, right);
                        let offset = S::Offset::from_u64(offset as u64).ok_or_else(|| {
                            fail(NodeField::ChildOffset, offset as f64, S::Offset::NAME)
                        })?;

                        let (value, reference, categorical) = match condition {
                            SplitCondition::Numeric { threshold } => {
                                let value = S::Threshold::from_f64(*threshold).ok_or_else(|| {
                                    fail(NodeField::Threshold, *threshold, S::Threshold::NAME)
                                })?;
                                (value, index_sentinel::<S::Index>(), false)
                            }
                            SplitCondition::Categorical { categories: set } => {
                                let segment = categories.push(set).ok_or_else(|| {
                                    fail(
                                        NodeField::CategorySegment,
                                        categories.n_segments() as f64,
                                        "u32",
                                    )
                                })?;
                                let reference =
                                    narrow_index::<S::Index>(segment as u64).ok_or_else(|| {
                                        fail(
                                            NodeField::CategorySegment,
                                            segment as f64,
                                            S::Index::NAME,
                                        )
                                    })?;
                                (S::Threshold::default(), reference, true)
                            }
                        };

                        let flags = NodeFlags {
                            leaf: false,
                            default_left: *default_left,
                            categorical,
                        };
                        let meta = NodeMetadata::pack(flags, *feature as u64).ok_or_else(|| {
                            fail(NodeField::FeatureIndex, *feature as f64, S::Metadata::NAME)
                        })?;

                        values.push(value);
                        metadata.push(meta);
                        offsets.push(offset);
                        refs.push(reference);
                    }
                    NodeDescription::Leaf(output) => {
                        let (value, reference, payload) = match output {
                            LeafOutput::Scalar(v) => {
                                let value = S::Threshold::from_f64(*v).ok_or_else(|| {
                                    fail(NodeField::LeafValue, *v, S::Threshold::NAME)
                                })?;
                                (value, index_sentinel::<S::Index>(), 0)
                            }
                            LeafOutput::Vector(vector) => {
                                let row = leaf_vectors.len() / n_outputs;
                                for &v in vector {
                                    leaf_vectors.push(S::Threshold::from_f64(v).ok_or_else(
                                        || fail(NodeField::LeafValue, v, S::Threshold::NAME),
                                    )?);
                                }
                                let reference =
                                    narrow_index::<S::Index>(row as u64).ok_or_else(|| {
                                        fail(NodeField::LeafVectorRow, row as f64, S::Index::NAME)
                                    })?;
                                (S::Threshold::default(), reference, 0)
                            }
                            LeafOutput::Class(class) => (
                                S::Threshold::default(),
                                index_sentinel::<S::Index>(),
                                *class as u64,
                            ),
                        };

                        let flags = NodeFlags {
                            leaf: true,
                            ..NodeFlags::default()
                        };
                        let meta = NodeMetadata::pack(flags, payload).ok_or_else(|| {
                            fail(NodeField::ClassId, payload as f64, S::Metadata::NAME)
                        })?;

                        values.push(value);
                        metadata.push(meta);
                        offsets.push(S::Offset::default());
                        refs.push(reference);
                    }
                }
            }
        }

        let output_scale = output_scale(forest, leaf_kind);

        tracing::debug!(
            index = %S::INDEX,
            entry = %S::ENTRY,
            n_trees = forest.n_trees(),
            n_nodes,
            ?layout,
            "constructed forest representation"
        );

        Ok(Self {
            values: values.into_boxed_slice(),
            metadata: metadata.into_boxed_slice(),
            offsets: offsets.into_boxed_slice(),
            refs: refs.into_boxed_slice(),
            tree_roots: tree_roots.into_boxed_slice(),
            tree_groups: forest.tree_groups.clone().into_boxed_slice(),
            base_score: forest.base_score.clone().into_boxed_slice(),
            leaf_vectors: leaf_vectors.into_boxed_slice(),
            categories: categories.finish(),
            output_scale,
            n_features: forest.n_features,
            n_outputs: forest.n_outputs,
            leaf_kind,
            aggregation: forest.aggregation,
            postprocessing: forest.postprocessing,
            layout,
            _spec: PhantomData,
        })
    }

    // =========================================================================
    // Shape
    // =========================================================================

    /// Catalog entry this representation was built for.
    #[inline]
    pub fn catalog_index(&self) -> CatalogIndex {
        S::INDEX
    }

    #[inline]
    pub fn n_trees(&self) -> usize {
        self.tree_roots.len()
    }

    /// Total number of stored nodes.
    #[inline]
    pub fn n_nodes(&self) -> usize {
        self.values.len()
    }

    #[inline]
    pub fn n_features(&self) -> u32 {
        self.n_features
    }

    #[inline]
    pub fn n_outputs(&self) -> u32 {
        self.n_outputs
    }

    #[inline]
    pub fn leaf_kind(&self) -> LeafKind {
        self.leaf_kind
    }

    #[inline]
    pub fn aggregation(&self) -> Aggregation {
        self.aggregation
    }

    #[inline]
    pub fn postprocessing(&self) -> Postprocessing {
        self.postprocessing
    }

    #[inline]
    pub fn layout(&self) -> TreeLayout {
        self.layout
    }

    #[inline]
    pub fn base_score(&self) -> &[f64] {
        &self.base_score
    }

    #[inline]
    pub fn tree_groups(&self) -> &[u32] {
        &self.tree_groups
    }

    #[inline]
    pub fn categories(&self) -> &CategoriesStorage {
        &self.categories
    }

    /// Storage positions occupied by `tree`.
    pub fn tree_range(&self, tree: usize) -> Range<usize> {
        let start = self.tree_root(tree);
        let end = self
            .tree_roots
            .get(tree + 1)
            .map_or(self.n_nodes(), |root| root.to_usize());
        start..end
    }

    // =========================================================================
    // Raw access for traversal
    // =========================================================================

    #[inline(always)]
    pub(crate) fn tree_root(&self, tree: usize) -> usize {
        self.tree_roots[tree].to_usize()
    }

    #[inline(always)]
    pub(crate) fn values(&self) -> &[S::Threshold] {
        &self.values
    }

    #[inline(always)]
    pub(crate) fn metadata(&self) -> &[NodeMetadata<S::Metadata>] {
        &self.metadata
    }

    #[inline(always)]
    pub(crate) fn offsets(&self) -> &[S::Offset] {
        &self.offsets
    }

    #[inline(always)]
    pub(crate) fn refs(&self) -> &[S::Index] {
        &self.refs
    }

    #[inline(always)]
    pub(crate) fn output_scale(&self) -> &[f64] {
        &self.output_scale
    }

    /// Values of vector-leaf row `row`.
    #[inline(always)]
    pub(crate) fn leaf_vector(&self, row: usize) -> &[S::Threshold] {
        let n_outputs = self.n_outputs as usize;
        &self.leaf_vectors[row * n_outputs..][..n_outputs]
    }

    // =========================================================================
    // Read-back
    // =========================================================================

    /// Widened view of the node at position `local` of `tree`.
    ///
    /// # Panics
    ///
    /// Panics if `tree` or `local` is out of range.
    pub fn node(&self, tree: usize, local: usize) -> NodeView {
        let range = self.tree_range(tree);
        assert!(local < range.len(), "node {local} out of range for tree {tree}");
        let pos = range.start + local;
        let meta = self.metadata[pos];

        if meta.is_leaf() {
            let output = match self.leaf_kind {
                LeafKind::Scalar => LeafOutput::Scalar(self.values[pos].to_f64()),
                LeafKind::Vector => LeafOutput::Vector(
                    self.leaf_vector(self.refs[pos].to_usize())
                        .iter()
                        .map(|v| v.to_f64())
                        .collect(),
                ),
                LeafKind::Class => LeafOutput::Class(meta.payload() as u32),
            };
            return NodeDescription::Leaf(output);
        }

        let offset = self.offsets[pos].to_usize();
        let condition = if meta.is_categorical() {
            SplitCondition::Categorical {
                categories: self.categories.categories(self.refs[pos].to_usize()),
            }
        } else {
            SplitCondition::Numeric {
                threshold: self.values[pos].to_f64(),
            }
        };
        NodeDescription::Split {
            feature: meta.payload() as u32,
            condition,
            default_left: meta.default_left(),
            left: self.layout.child(local, offset, true) as u32,
            right: self.layout.child(local, offset, false) as u32,
        }
    }

    /// Rebuild a description with nodes numbered in storage order.
    ///
    /// For a depth-first layout and a description whose nodes are already
    /// numbered in preorder, values representable in this entry read back
    /// unchanged.
    pub fn to_description(&self) -> ForestDescription {
        let trees = (0..self.n_trees())
            .map(|tree| {
                let n_nodes = self.tree_range(tree).len();
                TreeDescription::new((0..n_nodes).map(|local| self.node(tree, local)).collect())
            })
            .collect();

        ForestDescription {
            n_features: self.n_features,
            n_outputs: self.n_outputs,
            trees,
            tree_groups: self.tree_groups.to_vec(),
            base_score: self.base_score.to_vec(),
            aggregation: self.aggregation,
            postprocessing: self.postprocessing,
        }
    }
}

impl<S: ForestSpec> fmt::Debug for ForestRepr<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ForestRepr")
            .field("entry", &S::ENTRY)
            .field("n_trees", &self.n_trees())
            .field("n_nodes", &self.n_nodes())
            .field("n_features", &self.n_features)
            .field("n_outputs", &self.n_outputs)
            .field("leaf_kind", &self.leaf_kind)
            .field("aggregation", &self.aggregation)
            .field("layout", &self.layout)
            .finish_non_exhaustive()
    }
}

/// Per-output multiplier turning accumulated leaf values into the
/// aggregated output.
fn output_scale(forest: &ForestDescription, leaf_kind: LeafKind) -> Box<[f64]> {
    let n_outputs = forest.n_outputs as usize;
    let n_trees = forest.n_trees() as f64;
    match forest.aggregation {
        Aggregation::Sum => vec![1.0; n_outputs].into_boxed_slice(),
        Aggregation::Vote => vec![1.0 / n_trees; n_outputs].into_boxed_slice(),
        Aggregation::Average if leaf_kind == LeafKind::Vector => {
            vec![1.0 / n_trees; n_outputs].into_boxed_slice()
        }
        Aggregation::Average => {
            let mut counts = vec![0usize; n_outputs];
            for &group in &forest.tree_groups {
                counts[group as usize] += 1;
            }
            counts
                .into_iter()
                .map(|count| if count == 0 { 1.0 } else { 1.0 / count as f64 })
                .collect()
        }
    }
}

fn overflow<W: Width>(tree: usize, node: usize, field: NodeField, value: f64) -> ForestError {
    overflow_named(tree, node, field, value, W::NAME)
}

fn overflow_named(
    tree: usize,
    node: usize,
    field: NodeField,
    value: f64,
    target: &'static str,
) -> ForestError {
    tracing::error!(
        tree,
        node,
        %field,
        value,
        target,
        "value does not fit the selected forest representation"
    );
    ForestError::ConstructionOverflow {
        tree,
        node,
        field,
        value,
        target,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{NarrowestSpec, Specialization, WidestSpec};
    use crate::description::TreeBuilder;

    /// Preorder-numbered tree with a numeric root and a categorical left child.
    fn mixed_tree() -> TreeDescription {
        let mut builder = TreeBuilder::with_capacity(5);
        builder.init_root_with_n_nodes(5);
        builder.set_numeric_split(0, 1, 0.75, false, 1, 4);
        builder.set_categorical_split(1, 0, vec![2, 35], true, 2, 3);
        builder.make_leaf(2, LeafOutput::Scalar(-1.5));
        builder.make_leaf(3, LeafOutput::Scalar(0.25));
        builder.make_leaf(4, LeafOutput::Scalar(3.0));
        builder.freeze()
    }

    fn mixed_forest() -> ForestDescription {
        let mut forest = ForestDescription::new(2, 2)
            .with_base_score(vec![0.5, -0.5])
            .with_aggregation(Aggregation::Average);
        forest.push_tree(mixed_tree(), 0);
        forest.push_tree(TreeDescription::leaf(LeafOutput::Scalar(2.0)), 1);
        forest.push_tree(mixed_tree(), 1);
        forest
    }

    #[test]
    fn depth_first_reads_back_exactly() {
        let forest = mixed_forest();
        let repr = ForestRepr::<NarrowestSpec>::from_description(&forest, TreeLayout::DepthFirst)
            .unwrap();
        assert_eq!(repr.n_trees(), 3);
        assert_eq!(repr.n_nodes(), 11);
        assert_eq!(repr.tree_range(1), 5..6);
        assert_eq!(repr.to_description(), forest);
    }

    #[test]
    fn breadth_first_preserves_structure() {
        let forest = mixed_forest();
        let repr = ForestRepr::<WidestSpec>::from_description(&forest, TreeLayout::BreadthFirst)
            .unwrap();
        // level order of mixed_tree: 0, 1, 4, 2, 3
        assert_eq!(
            repr.node(0, 0),
            NodeDescription::Split {
                feature: 1,
                condition: SplitCondition::Numeric { threshold: 0.75 },
                default_left: false,
                left: 1,
                right: 2,
            }
        );
        assert_eq!(repr.node(0, 2), NodeDescription::Leaf(LeafOutput::Scalar(3.0)));
        assert_eq!(
            repr.node(0, 1),
            NodeDescription::Split {
                feature: 0,
                condition: SplitCondition::Categorical {
                    categories: vec![2, 35]
                },
                default_left: true,
                left: 3,
                right: 4,
            }
        );
        let rebuilt = repr.to_description();
        assert_eq!(rebuilt.validate(), Ok(()));
        assert_eq!(rebuilt.node_count(), forest.node_count());
    }

    #[test]
    fn average_scale_counts_trees_per_group() {
        let repr =
            ForestRepr::<NarrowestSpec>::from_description(&mixed_forest(), TreeLayout::DepthFirst)
                .unwrap();
        assert_eq!(repr.output_scale(), &[1.0, 0.5]);
    }

    #[test]
    fn vector_and_class_leaves_round_trip() {
        let mut forest = ForestDescription::new(1, 2);
        let mut builder = TreeBuilder::with_capacity(3);
        builder.init_root_with_n_nodes(3);
        builder.set_numeric_split(0, 0, 1.0, true, 1, 2);
        builder.make_leaf(1, LeafOutput::Vector(vec![0.5, -0.5]));
        builder.make_leaf(2, LeafOutput::Vector(vec![1.0, 2.0]));
        forest.push_tree(builder.freeze(), 0);
        let repr = ForestRepr::<NarrowestSpec>::from_description(&forest, TreeLayout::DepthFirst)
            .unwrap();
        assert_eq!(repr.leaf_kind(), LeafKind::Vector);
        assert_eq!(repr.to_description(), forest);

        let mut votes = ForestDescription::new(1, 3).with_aggregation(Aggregation::Vote);
        votes.push_tree(TreeDescription::leaf(LeafOutput::Class(2)), 0);
        votes.push_tree(TreeDescription::leaf(LeafOutput::Class(0)), 0);
        let repr = ForestRepr::<NarrowestSpec>::from_description(&votes, TreeLayout::DepthFirst)
            .unwrap();
        assert_eq!(repr.output_scale(), &[0.5, 0.5, 0.5]);
        assert_eq!(repr.to_description(), votes);
    }

    #[test]
    fn threshold_overflow_reported() {
        let mut builder = TreeBuilder::with_capacity(3);
        builder.init_root_with_n_nodes(3);
        builder.set_numeric_split(0, 0, 1e39, true, 1, 2);
        let mut forest = ForestDescription::new(1, 1);
        forest.push_tree(TreeDescription::leaf(LeafOutput::Scalar(0.0)), 0);
        forest.push_tree(builder.freeze(), 0);

        let err = ForestRepr::<NarrowestSpec>::from_description(&forest, TreeLayout::DepthFirst)
            .unwrap_err();
        assert!(matches!(
            err,
            ForestError::ConstructionOverflow {
                tree: 1,
                node: 0,
                field: NodeField::Threshold,
                target: "f32",
                ..
            }
        ));
        assert!(
            ForestRepr::<Specialization<f64, u16, u16, u16>>::from_description(
                &forest,
                TreeLayout::DepthFirst
            )
            .is_ok()
        );
    }

    #[test]
    fn feature_overflow_reported() {
        let mut builder = TreeBuilder::with_capacity(3);
        builder.init_root_with_n_nodes(3);
        builder.set_numeric_split(0, 9_000, 0.0, true, 1, 2);
        let mut forest = ForestDescription::new(9_001, 1);
        forest.push_tree(builder.freeze(), 0);

        let err = ForestRepr::<NarrowestSpec>::from_description(&forest, TreeLayout::DepthFirst)
            .unwrap_err();
        assert!(matches!(
            err,
            ForestError::ConstructionOverflow {
                field: NodeField::FeatureIndex,
                target: "u16",
                ..
            }
        ));
        assert!(
            ForestRepr::<Specialization<f32, u16, u32, u16>>::from_description(
                &forest,
                TreeLayout::DepthFirst
            )
            .is_ok()
        );
    }

    #[test]
    fn offset_overflow_reported() {
        // Left-leaning chain: the root's right leaf is stored after the whole
        // left subtree.
        let n_splits = 33_000u32;
        let mut builder = TreeBuilder::with_capacity(2 * n_splits as usize + 1);
        builder.init_root_with_n_nodes(2 * n_splits as usize + 1);
        for i in 0..n_splits {
            builder.set_numeric_split(2 * i, 0, i as f64, true, 2 * i + 2, 2 * i + 1);
        }
        let mut forest = ForestDescription::new(1, 1);
        forest.push_tree(builder.freeze(), 0);

        let err = ForestRepr::<Specialization<f32, u32, u16, u16>>::from_description(
            &forest,
            TreeLayout::DepthFirst,
        )
        .unwrap_err();
        assert!(matches!(
            err,
            ForestError::ConstructionOverflow {
                tree: 0,
                node: 0,
                field: NodeField::ChildOffset,
                ..
            }
        ));

        let err = ForestRepr::<NarrowestSpec>::from_description(&forest, TreeLayout::DepthFirst)
            .unwrap_err();
        assert!(matches!(
            err,
            ForestError::ConstructionOverflow {
                field: NodeField::NodePosition,
                ..
            }
        ));
    }

    #[test]
    fn invalid_description_rejected() {
        let forest = ForestDescription::new(1, 1);
        assert!(matches!(
            ForestRepr::<NarrowestSpec>::from_description(&forest, TreeLayout::DepthFirst),
            Err(ForestError::InvalidDescription(_))
        ));
    }
}
