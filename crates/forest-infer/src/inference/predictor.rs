//! Block-based batch prediction.

use ndarray::{ArrayView1, ArrayView2, ArrayViewMut1, ArrayViewMut2, Axis};

use crate::catalog::{ForestSpec, Precision, Width};
use crate::description::LeafKind;
use crate::error::ForestError;
use crate::forest::ForestRepr;

use super::output::apply_postprocessing;
use super::traversal::traverse_tree;
use super::{ForestShape, InferKind, InferOptions};

/// Per-thread scratch reused across blocks.
struct BlockScratch<T> {
    /// Block features converted to the threshold type, row-major.
    features: Vec<T>,
    /// Aggregation buffer, one slot per output.
    acc: Vec<f64>,
}

/// Run inference for every row of `features` into `output`.
///
/// `features` is `[n_rows, n_columns]`; columns beyond the matrix width read
/// as missing. `output` must be `[n_rows, forest_columns]` where the column
/// count depends on `options.kind` (see the [module docs](super)).
pub fn predict_into<S: ForestSpec>(
    forest: &ForestRepr<S>,
    features: ArrayView2<'_, f64>,
    options: &InferOptions,
    mut output: ArrayViewMut2<'_, f64>,
) -> Result<(), ForestError> {
    let shape = ForestShape {
        n_features: forest.n_features(),
        n_outputs: forest.n_outputs(),
        n_trees: forest.n_trees(),
        leaf_kind: forest.leaf_kind(),
        postprocessing: forest.postprocessing(),
    };
    let n_rows = features.nrows();
    let n_columns = shape.output_columns(options.kind);

    if output.nrows() != n_rows {
        return Err(ForestError::ShapeMismatch {
            what: "output rows",
            expected: n_rows,
            actual: output.nrows(),
        });
    }
    if output.ncols() != n_columns {
        return Err(ForestError::ShapeMismatch {
            what: "output columns",
            expected: n_columns,
            actual: output.ncols(),
        });
    }
    if n_rows == 0 {
        return Ok(());
    }

    let block_size = options.block_size.max(1);
    let n_outputs = forest.n_outputs() as usize;
    let kind = options.kind;

    let feature_chunks = features.axis_chunks_iter(Axis(0), block_size);
    let output_chunks = output.axis_chunks_iter_mut(Axis(0), block_size);

    options.parallelism.maybe_par_bridge_for_each_init(
        feature_chunks.zip(output_chunks),
        || BlockScratch {
            features: Vec::with_capacity(block_size * features.ncols()),
            acc: vec![0.0; n_outputs],
        },
        |scratch, (feat_chunk, out_chunk)| {
            predict_block(forest, kind, feat_chunk, scratch, out_chunk);
        },
    );

    Ok(())
}

fn predict_block<S: ForestSpec>(
    forest: &ForestRepr<S>,
    kind: InferKind,
    features: ArrayView2<'_, f64>,
    scratch: &mut BlockScratch<S::Threshold>,
    mut output: ArrayViewMut2<'_, f64>,
) {
    let n_columns = features.ncols();
    scratch.features.clear();
    scratch
        .features
        .extend(features.iter().map(|&v| S::Threshold::from_f64_lossy(v)));

    for (row_idx, out_row) in output.axis_iter_mut(Axis(0)).enumerate() {
        let row = &scratch.features[row_idx * n_columns..][..n_columns];
        let raw = features.row(row_idx);
        match kind {
            InferKind::Default => predict_row(forest, row, raw, &mut scratch.acc, out_row),
            InferKind::PerTree => per_tree_row(forest, row, raw, out_row),
            InferKind::LeafId => leaf_id_row(forest, row, raw, out_row),
        }
    }
}

/// Aggregate all trees for one row, then add the base score and apply the
/// postprocessing.
#[inline]
fn predict_row<S: ForestSpec>(
    forest: &ForestRepr<S>,
    row: &[S::Threshold],
    raw: ArrayView1<'_, f64>,
    acc: &mut [f64],
    mut out: ArrayViewMut1<'_, f64>,
) {
    acc.fill(0.0);
    let groups = forest.tree_groups();

    for tree in 0..forest.n_trees() {
        let leaf = traverse_tree(forest, tree, row, raw);
        match forest.leaf_kind() {
            LeafKind::Scalar => acc[groups[tree] as usize] += forest.values()[leaf].to_f64(),
            LeafKind::Vector => {
                let vector = forest.leaf_vector(forest.refs()[leaf].to_usize());
                for (slot, value) in acc.iter_mut().zip(vector) {
                    *slot += value.to_f64();
                }
            }
            LeafKind::Class => acc[forest.metadata()[leaf].payload() as usize] += 1.0,
        }
    }

    for ((slot, &scale), &base) in acc
        .iter_mut()
        .zip(forest.output_scale())
        .zip(forest.base_score())
    {
        *slot = *slot * scale + base;
    }

    match apply_postprocessing(forest.postprocessing(), acc) {
        Some(class) => out[0] = class as f64,
        None => {
            for (dst, &src) in out.iter_mut().zip(acc.iter()) {
                *dst = src;
            }
        }
    }
}

/// Raw leaf output of every tree: the scalar value, the voted class, or the
/// whole leaf vector (tree-major).
#[inline]
fn per_tree_row<S: ForestSpec>(
    forest: &ForestRepr<S>,
    row: &[S::Threshold],
    raw: ArrayView1<'_, f64>,
    mut out: ArrayViewMut1<'_, f64>,
) {
    let n_outputs = forest.n_outputs() as usize;
    for tree in 0..forest.n_trees() {
        let leaf = traverse_tree(forest, tree, row, raw);
        match forest.leaf_kind() {
            LeafKind::Scalar => out[tree] = forest.values()[leaf].to_f64(),
            LeafKind::Class => out[tree] = forest.metadata()[leaf].payload() as f64,
            LeafKind::Vector => {
                let vector = forest.leaf_vector(forest.refs()[leaf].to_usize());
                for (k, value) in vector.iter().enumerate() {
                    out[tree * n_outputs + k] = value.to_f64();
                }
            }
        }
    }
}

#[inline]
fn leaf_id_row<S: ForestSpec>(
    forest: &ForestRepr<S>,
    row: &[S::Threshold],
    raw: ArrayView1<'_, f64>,
    mut out: ArrayViewMut1<'_, f64>,
) {
    for tree in 0..forest.n_trees() {
        let leaf = traverse_tree(forest, tree, row, raw);
        out[tree] = (leaf - forest.tree_root(tree)) as f64;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::NarrowestSpec;
    use crate::description::{
        Aggregation, ForestDescription, LeafOutput, Postprocessing, TreeBuilder, TreeDescription,
    };
    use crate::forest::TreeLayout;
    use crate::utils::Parallelism;
    use approx::assert_abs_diff_eq;
    use ndarray::{array, Array2};

    fn stump(feature: u32, threshold: f64, left: LeafOutput, right: LeafOutput) -> TreeDescription {
        let mut builder = TreeBuilder::with_capacity(3);
        builder.init_root_with_n_nodes(3);
        builder.set_numeric_split(0, feature, threshold, true, 1, 2);
        builder.make_leaf(1, left);
        builder.make_leaf(2, right);
        builder.freeze()
    }

    fn scalar_stump(threshold: f64, left: f64, right: f64) -> TreeDescription {
        stump(0, threshold, LeafOutput::Scalar(left), LeafOutput::Scalar(right))
    }

    fn run(
        desc: &ForestDescription,
        features: ArrayView2<'_, f64>,
        options: InferOptions,
    ) -> Array2<f64> {
        let forest = ForestRepr::<NarrowestSpec>::from_description(desc, TreeLayout::DepthFirst)
            .unwrap();
        let shape = ForestShape {
            n_features: forest.n_features(),
            n_outputs: forest.n_outputs(),
            n_trees: forest.n_trees(),
            leaf_kind: forest.leaf_kind(),
            postprocessing: forest.postprocessing(),
        };
        let mut output = Array2::zeros((features.nrows(), shape.output_columns(options.kind)));
        predict_into(&forest, features, &options, output.view_mut()).unwrap();
        output
    }

    #[test]
    fn sum_adds_base_score() {
        let mut desc = ForestDescription::new(1, 1).with_base_score(vec![0.5]);
        desc.push_tree(scalar_stump(0.0, -1.0, 1.0), 0);
        desc.push_tree(scalar_stump(1.0, 0.25, 2.0), 0);

        let features = array![[-1.0], [0.5], [3.0], [f64::NAN]];
        let output = run(&desc, features.view(), InferOptions::default());
        assert_eq!(output.column(0).to_vec(), vec![-0.25, 1.75, 3.5, -0.25]);
    }

    #[test]
    fn average_divides_per_group() {
        let mut desc = ForestDescription::new(1, 2).with_aggregation(Aggregation::Average);
        desc.push_tree(scalar_stump(0.0, 1.0, 3.0), 0);
        desc.push_tree(scalar_stump(0.0, 2.0, 4.0), 1);
        desc.push_tree(scalar_stump(0.0, 4.0, 8.0), 1);

        let output = run(&desc, array![[1.0]].view(), InferOptions::default());
        assert_eq!(output.row(0).to_vec(), vec![3.0, 6.0]);
    }

    #[test]
    fn vote_counts_classes() {
        let mut desc = ForestDescription::new(1, 3).with_aggregation(Aggregation::Vote);
        desc.push_tree(stump(0, 0.0, LeafOutput::Class(0), LeafOutput::Class(2)), 0);
        desc.push_tree(stump(0, 0.5, LeafOutput::Class(2), LeafOutput::Class(1)), 0);

        let output = run(&desc, array![[0.25]].view(), InferOptions::default());
        assert_eq!(output.row(0).to_vec(), vec![0.0, 0.0, 1.0]);

        let desc = desc.with_postprocessing(Postprocessing::MaxIndex);
        let output = run(&desc, array![[-1.0], [0.25], [1.0]].view(), InferOptions::default());
        assert_eq!(output.column(0).to_vec(), vec![0.0, 2.0, 1.0]);
    }

    #[test]
    fn per_tree_and_leaf_id() {
        let mut desc = ForestDescription::new(1, 1);
        desc.push_tree(scalar_stump(0.0, -1.0, 1.0), 0);
        desc.push_tree(TreeDescription::leaf(LeafOutput::Scalar(7.0)), 0);
        let features = array![[-1.0], [1.0]];

        let options = InferOptions::default();
        let per_tree = run(&desc, features.view(), options.with_kind(InferKind::PerTree));
        assert_eq!(per_tree, array![[-1.0, 7.0], [1.0, 7.0]]);

        let leaf_id = run(&desc, features.view(), options.with_kind(InferKind::LeafId));
        assert_eq!(leaf_id, array![[1.0, 0.0], [2.0, 0.0]]);
    }

    #[test]
    fn vector_leaves_fill_every_output() {
        let mut desc = ForestDescription::new(1, 2).with_postprocessing(Postprocessing::Softmax);
        desc.push_tree(
            stump(0, 0.0, LeafOutput::Vector(vec![0.0, 0.0]), LeafOutput::Vector(vec![1.0, -1.0])),
            0,
        );
        let output = run(&desc, array![[-1.0], [1.0]].view(), InferOptions::default());
        assert_abs_diff_eq!(output[[0, 0]], 0.5);
        assert_abs_diff_eq!(output[[1, 0]], 1.0 / (1.0 + (-2.0f64).exp()), epsilon = 1e-12);

        let options = InferOptions::default().with_kind(InferKind::PerTree);
        let per_tree = run(&desc, array![[1.0]].view(), options);
        assert_eq!(per_tree, array![[1.0, -1.0]]);
    }

    #[test]
    fn parallel_blocks_match_sequential() {
        let mut desc = ForestDescription::new(2, 1).with_postprocessing(Postprocessing::Sigmoid);
        desc.push_tree(scalar_stump(0.0, -1.0, 1.0), 0);
        desc.push_tree(stump(1, 0.5, LeafOutput::Scalar(0.5), LeafOutput::Scalar(-0.5)), 0);
        let features =
            Array2::from_shape_fn((300, 2), |(r, c)| ((r * 7 + c * 3) % 11) as f64 / 4.0 - 1.0);

        let sequential = run(&desc, features.view(), InferOptions::default().with_block_size(7));
        let parallel = run(
            &desc,
            features.view(),
            InferOptions::default()
                .with_parallelism(Parallelism::Parallel)
                .with_block_size(16),
        );
        assert_eq!(sequential, parallel);
    }

    #[test]
    fn wrong_output_shape_rejected() {
        let mut desc = ForestDescription::new(1, 2);
        desc.push_tree(scalar_stump(0.0, -1.0, 1.0), 0);
        let forest =
            ForestRepr::<NarrowestSpec>::from_description(&desc, TreeLayout::DepthFirst).unwrap();
        let features = array![[0.0], [1.0]];

        let mut output = Array2::zeros((2, 1));
        let options = InferOptions::default();
        let err = predict_into(&forest, features.view(), &options, output.view_mut()).unwrap_err();
        assert!(matches!(
            err,
            ForestError::ShapeMismatch {
                what: "output columns",
                expected: 2,
                actual: 1
            }
        ));

        let mut output = Array2::zeros((3, 2));
        let err = predict_into(&forest, features.view(), &options, output.view_mut()).unwrap_err();
        assert!(matches!(err, ForestError::ShapeMismatch { what: "output rows", .. }));
    }

    #[test]
    fn empty_batch_is_noop() {
        let mut desc = ForestDescription::new(1, 1);
        desc.push_tree(scalar_stump(0.0, -1.0, 1.0), 0);
        let output = run(&desc, Array2::<f64>::zeros((0, 1)).view(), InferOptions::default());
        assert_eq!(output.dim(), (0, 1));
    }
}
