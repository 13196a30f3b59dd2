//! Testing utilities for forest-infer.
//!
//! Assertion helpers, seeded random forest and feature generators, and a
//! straightforward `f64` reference predictor that works directly on a
//! [`ForestDescription`]. Every catalog entry a forest fits into must agree
//! with [`reference_predict`].
//!
//! Generated thresholds and feature values are exactly representable as
//! `f32`, so narrow and wide entries take the same paths.
//!
//! ```
//! use forest_infer::testing::{random_features, random_forest, reference_predict, RandomForest};
//! use forest_infer::forest::TreeLayout;
//! use forest_infer::inference::InferKind;
//!
//! let forest = random_forest(&RandomForest::default());
//! let features = random_features(7, 16, forest.n_features as usize, 0.1);
//! let expected =
//!     reference_predict(&forest, features.view(), InferKind::Default, TreeLayout::DepthFirst);
//! assert_eq!(expected.nrows(), 16);
//! ```

use approx::AbsDiffEq;
use ndarray::{Array2, ArrayView2};
use rand::prelude::*;

use crate::description::{
    Aggregation, ForestDescription, LeafKind, LeafOutput, NodeDescription, Postprocessing,
    TreeBuilder, TreeDescription,
};
use crate::forest::{storage_order, TreeLayout};
use crate::inference::{apply_postprocessing, ForestShape, InferKind};

// =============================================================================
// Constants
// =============================================================================

/// Default tolerance for floating point comparisons of predictions.
pub const DEFAULT_TOLERANCE: f64 = 1e-9;

// =============================================================================
// Floating Point Assertions
// =============================================================================

/// Assert that two f64 values are approximately equal.
///
/// # Examples
///
/// ```
/// # use forest_infer::assert_approx_eq;
/// assert_approx_eq!(1.0f64, 1.0001f64, 0.001);
/// ```
///
/// # Panics
///
/// Panics if the absolute difference exceeds tolerance.
#[macro_export]
macro_rules! assert_approx_eq {
    ($left:expr, $right:expr, $tolerance:expr) => {{
        let left_val: f64 = $left;
        let right_val: f64 = $right;
        let tol: f64 = $tolerance;
        let diff = (left_val - right_val).abs();
        if diff > tol {
            panic!(
                "assertion failed: `(left ≈ right)`\n  left: `{:?}`\n right: `{:?}`\n  \
                 diff: `{:?}` > tolerance `{:?}`",
                left_val, right_val, diff, tol
            );
        }
    }};
    ($left:expr, $right:expr, $tolerance:expr, $($arg:tt)+) => {{
        let left_val: f64 = $left;
        let right_val: f64 = $right;
        let tol: f64 = $tolerance;
        let diff = (left_val - right_val).abs();
        if diff > tol {
            panic!(
                "assertion failed: `(left ≈ right)` - {}\n  left: `{:?}`\n right: `{:?}`\n  \
                 diff: `{:?}` > tolerance `{:?}`",
                format_args!($($arg)+), left_val, right_val, diff, tol
            );
        }
    }};
}

/// Assert that two prediction matrices have the same shape and agree
/// element-wise within `tolerance`.
///
/// # Panics
///
/// Panics on a shape mismatch or on the first element out of tolerance,
/// naming its row and column.
pub fn assert_predictions_close(
    actual: ArrayView2<'_, f64>,
    expected: ArrayView2<'_, f64>,
    tolerance: f64,
    context: &str,
) {
    assert_eq!(
        actual.dim(),
        expected.dim(),
        "{context}: shape mismatch - got {:?}, expected {:?}",
        actual.dim(),
        expected.dim()
    );

    for ((idx, a), e) in actual.indexed_iter().zip(expected.iter()) {
        assert!(
            a.abs_diff_eq(e, tolerance),
            "{context}[{}, {}]: {a} ≠ {e} (tolerance={tolerance})",
            idx.0,
            idx.1
        );
    }
}

// =============================================================================
// Forest Generators
// =============================================================================

/// Leaf outputs of a generated forest.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LeafStyle {
    /// Scalar leaves, trees spread round-robin over `groups` outputs.
    Scalar { groups: u32 },
    /// One vector of this length per leaf.
    Vector(u32),
    /// Class votes over this many classes. Forces vote aggregation.
    Class(u32),
}

/// Parameters of [`random_forest`].
#[derive(Debug, Clone)]
pub struct RandomForest {
    pub seed: u64,
    pub n_trees: usize,
    pub n_features: u32,
    /// Maximum tree depth in edges.
    pub max_depth: u32,
    /// Probability that a node above the maximum depth becomes a leaf.
    pub leaf_rate: f64,
    /// Probability that a split is categorical.
    pub categorical_rate: f64,
    pub leaves: LeafStyle,
    pub aggregation: Aggregation,
    pub postprocessing: Postprocessing,
    /// Random base score per output.
    pub with_base_score: bool,
}

impl Default for RandomForest {
    fn default() -> Self {
        Self {
            seed: 42,
            n_trees: 8,
            n_features: 6,
            max_depth: 5,
            leaf_rate: 0.2,
            categorical_rate: 0.0,
            leaves: LeafStyle::Scalar { groups: 1 },
            aggregation: Aggregation::Sum,
            postprocessing: Postprocessing::Identity,
            with_base_score: false,
        }
    }
}

/// Number of distinct categories used by generated categorical splits.
const N_CATEGORIES: u32 = 8;

/// A single split on feature 0 with two scalar leaves.
pub fn stump(threshold: f64, left: f64, right: f64) -> TreeDescription {
    let mut builder = TreeBuilder::with_capacity(3);
    builder.init_root_with_n_nodes(3);
    builder.set_numeric_split(0, 0, threshold, true, 1, 2);
    builder.make_leaf(1, LeafOutput::Scalar(left));
    builder.make_leaf(2, LeafOutput::Scalar(right));
    builder.freeze()
}

/// Generate a forest from `params`. Nodes are numbered in preorder.
pub fn random_forest(params: &RandomForest) -> ForestDescription {
    let mut rng = StdRng::seed_from_u64(params.seed);

    let (n_outputs, aggregation) = match params.leaves {
        LeafStyle::Scalar { groups } => (groups.max(1), params.aggregation),
        LeafStyle::Vector(n) => (n.max(1), params.aggregation),
        LeafStyle::Class(n) => (n.max(1), Aggregation::Vote),
    };

    let mut forest = ForestDescription::new(params.n_features.max(1), n_outputs)
        .with_aggregation(aggregation)
        .with_postprocessing(params.postprocessing);
    if params.with_base_score {
        let base = (0..n_outputs).map(|_| quantized(&mut rng, 16, 16.0)).collect();
        forest = forest.with_base_score(base);
    }

    for tree in 0..params.n_trees {
        let group = match params.leaves {
            LeafStyle::Scalar { .. } => tree as u32 % n_outputs,
            _ => 0,
        };
        forest.push_tree(random_tree(&mut rng, params, n_outputs), group);
    }
    forest
}

fn random_tree(rng: &mut StdRng, params: &RandomForest, n_outputs: u32) -> TreeDescription {
    let mut builder = TreeBuilder::default();
    grow(&mut builder, rng, params, n_outputs, 0);
    builder.freeze()
}

fn grow(
    builder: &mut TreeBuilder,
    rng: &mut StdRng,
    params: &RandomForest,
    n_outputs: u32,
    depth: u32,
) -> u32 {
    let node = builder.push_node();
    // The root always splits so that trees have some structure.
    if depth >= params.max_depth || (depth > 0 && rng.gen_bool(params.leaf_rate)) {
        builder.make_leaf(node, random_leaf(rng, params.leaves, n_outputs));
        return node;
    }

    let feature = rng.gen_range(0..params.n_features.max(1));
    let default_left = rng.gen_bool(0.5);
    let categorical = rng.gen_bool(params.categorical_rate);
    let left = grow(builder, rng, params, n_outputs, depth + 1);
    let right = grow(builder, rng, params, n_outputs, depth + 1);

    if categorical {
        let categories = (0..N_CATEGORIES).filter(|_| rng.gen_bool(0.4)).collect();
        builder.set_categorical_split(node, feature, categories, default_left, left, right);
    } else {
        let threshold = quantized(rng, 16, 4.0);
        builder.set_numeric_split(node, feature, threshold, default_left, left, right);
    }
    node
}

fn random_leaf(rng: &mut StdRng, style: LeafStyle, n_outputs: u32) -> LeafOutput {
    match style {
        LeafStyle::Scalar { .. } => LeafOutput::Scalar(quantized(rng, 32, 16.0)),
        LeafStyle::Vector(_) => {
            LeafOutput::Vector((0..n_outputs).map(|_| quantized(rng, 32, 16.0)).collect())
        }
        LeafStyle::Class(_) => LeafOutput::Class(rng.gen_range(0..n_outputs)),
    }
}

/// `k / denom` for a random `k` in `-range..=range`.
fn quantized(rng: &mut StdRng, range: i32, denom: f64) -> f64 {
    rng.gen_range(-range..=range) as f64 / denom
}

/// Generate a `[rows, n_features]` feature matrix.
///
/// Values are multiples of 0.125 in `[-5, 5]`, so whole numbers in
/// `0..8` (valid categories) appear regularly. A `missing_rate` share of
/// the values is NaN.
pub fn random_features(
    seed: u64,
    rows: usize,
    n_features: usize,
    missing_rate: f64,
) -> Array2<f64> {
    let mut rng = StdRng::seed_from_u64(seed);
    Array2::from_shape_fn((rows, n_features), |_| {
        if rng.gen_bool(missing_rate) {
            f64::NAN
        } else {
            rng.gen_range(-40..=40) as f64 * 0.125
        }
    })
}

// =============================================================================
// Reference Predictor
// =============================================================================

/// Predict directly from a description, in `f64`.
///
/// Leaf ids are reported as storage positions for `layout`, matching what a
/// representation built with that layout returns.
pub fn reference_predict(
    forest: &ForestDescription,
    features: ArrayView2<'_, f64>,
    kind: InferKind,
    layout: TreeLayout,
) -> Array2<f64> {
    let leaf_kind = forest.leaf_kind();
    let shape = ForestShape {
        n_features: forest.n_features,
        n_outputs: forest.n_outputs,
        n_trees: forest.n_trees(),
        leaf_kind,
        postprocessing: forest.postprocessing,
    };
    let n_outputs = forest.n_outputs as usize;
    let scale = reference_scale(forest, leaf_kind);
    let positions: Vec<Vec<u32>> = forest
        .trees
        .iter()
        .map(|tree| storage_order(tree, layout).position)
        .collect();

    let mut output = Array2::zeros((features.nrows(), shape.output_columns(kind)));
    for (row_idx, row) in features.rows().into_iter().enumerate() {
        let row = row.to_vec();
        let leaves = forest.trees.iter().map(|tree| (tree, tree.leaf_for(&row)));

        match kind {
            InferKind::Default => {
                let mut acc = vec![0.0; n_outputs];
                for ((tree, leaf), &group) in leaves.zip(&forest.tree_groups) {
                    match leaf_output(tree, leaf) {
                        LeafOutput::Scalar(value) => acc[group as usize] += value,
                        LeafOutput::Vector(values) => {
                            acc.iter_mut().zip(values).for_each(|(a, v)| *a += v)
                        }
                        LeafOutput::Class(class) => acc[*class as usize] += 1.0,
                    }
                }
                for (k, a) in acc.iter_mut().enumerate() {
                    *a = *a * scale[k] + forest.base_score[k];
                }
                match apply_postprocessing(forest.postprocessing, &mut acc) {
                    Some(class) => output[[row_idx, 0]] = class as f64,
                    None => {
                        for (k, a) in acc.into_iter().enumerate() {
                            output[[row_idx, k]] = a;
                        }
                    }
                }
            }
            InferKind::PerTree => {
                for (t, (tree, leaf)) in leaves.enumerate() {
                    match leaf_output(tree, leaf) {
                        LeafOutput::Scalar(value) => output[[row_idx, t]] = *value,
                        LeafOutput::Class(class) => output[[row_idx, t]] = *class as f64,
                        LeafOutput::Vector(values) => {
                            for (k, v) in values.iter().enumerate() {
                                output[[row_idx, t * n_outputs + k]] = *v;
                            }
                        }
                    }
                }
            }
            InferKind::LeafId => {
                for (t, (_, leaf)) in leaves.enumerate() {
                    output[[row_idx, t]] = positions[t][leaf] as f64;
                }
            }
        }
    }
    output
}

fn leaf_output(tree: &TreeDescription, node: usize) -> &LeafOutput {
    match &tree.nodes[node] {
        NodeDescription::Leaf(output) => output,
        NodeDescription::Split { .. } => unreachable!("leaf_for returns leaves"),
    }
}

fn reference_scale(forest: &ForestDescription, leaf_kind: LeafKind) -> Vec<f64> {
    let n_outputs = forest.n_outputs as usize;
    let per_tree = 1.0 / forest.n_trees() as f64;
    match (forest.aggregation, leaf_kind) {
        (Aggregation::Sum, _) => vec![1.0; n_outputs],
        (Aggregation::Vote, _) | (Aggregation::Average, LeafKind::Vector) => {
            vec![per_tree; n_outputs]
        }
        (Aggregation::Average, _) => (0..n_outputs as u32)
            .map(|k| {
                let count = forest.tree_groups.iter().filter(|&&g| g == k).count();
                if count == 0 { 1.0 } else { 1.0 / count as f64 }
            })
            .collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn approx_eq_macro_passes() {
        assert_approx_eq!(1.0, 1.0 + 1e-12, DEFAULT_TOLERANCE);
        assert_approx_eq!(0.5, 0.5, 0.0, "exact");
    }

    #[test]
    #[should_panic(expected = "assertion failed")]
    fn approx_eq_macro_fails() {
        assert_approx_eq!(1.0, 1.1, 1e-3);
    }

    #[test]
    #[should_panic(expected = "rows[1, 0]")]
    fn predictions_close_names_element() {
        let actual = array![[1.0], [2.0]];
        let expected = array![[1.0], [2.5]];
        assert_predictions_close(actual.view(), expected.view(), 1e-6, "rows");
    }

    #[test]
    fn generated_forests_validate() {
        for (seed, leaves) in [
            (1, LeafStyle::Scalar { groups: 3 }),
            (2, LeafStyle::Vector(4)),
            (3, LeafStyle::Class(5)),
        ] {
            let forest = random_forest(&RandomForest {
                seed,
                leaves,
                categorical_rate: 0.3,
                with_base_score: true,
                ..Default::default()
            });
            forest.validate().unwrap();
            assert_eq!(forest.n_trees(), 8);
        }
    }

    #[test]
    fn generated_values_fit_f32() {
        let forest = random_forest(&RandomForest::default());
        for tree in &forest.trees {
            for node in &tree.nodes {
                if let NodeDescription::Leaf(LeafOutput::Scalar(v)) = node {
                    assert_eq!(*v as f32 as f64, *v);
                }
            }
        }
        let features = random_features(3, 32, 4, 0.0);
        assert!(features.iter().all(|v| *v as f32 as f64 == *v && v.abs() <= 5.0));
    }

    #[test]
    fn reference_on_stump() {
        let mut forest = ForestDescription::new(1, 1).with_base_score(vec![0.5]);
        forest.push_tree(stump(0.0, -1.0, 1.0), 0);
        forest.push_tree(stump(2.0, 10.0, 20.0), 0);

        let features = array![[-1.0], [1.0], [3.0], [f64::NAN]];
        let out =
            reference_predict(&forest, features.view(), InferKind::Default, TreeLayout::DepthFirst);
        assert_eq!(out.column(0).to_vec(), vec![9.5, 11.5, 21.5, 9.5]);

        let ids =
            reference_predict(&forest, features.view(), InferKind::LeafId, TreeLayout::DepthFirst);
        assert_eq!(ids.row(2).to_vec(), vec![2.0, 2.0]);
    }
}
