//! Property-based tests for forest representations.
//!
//! Random preorder-numbered forests are narrowed into several catalog
//! entries and read back.

use proptest::prelude::*;

use forest_infer::catalog::{ForestSpec, NarrowestSpec, Specialization, WidestSpec};
use forest_infer::description::{Aggregation, ForestDescription, ForestStats, Postprocessing};
use forest_infer::forest::{ForestRepr, TreeLayout};
use forest_infer::inference::InferKind;
use forest_infer::select;
use forest_infer::testing::{
    random_features, random_forest, reference_predict, LeafStyle, RandomForest,
};

// =============================================================================
// Generators
// =============================================================================

fn arb_leaf_style() -> impl Strategy<Value = LeafStyle> {
    prop_oneof![
        (1u32..4).prop_map(|groups| LeafStyle::Scalar { groups }),
        (1u32..5).prop_map(LeafStyle::Vector),
        (2u32..6).prop_map(LeafStyle::Class),
    ]
}

fn arb_forest() -> impl Strategy<Value = ForestDescription> {
    (
        any::<u64>(),
        1usize..10,
        1u32..12,
        0u32..7,
        0.0f64..0.5,
        arb_leaf_style(),
        prop_oneof![Just(Aggregation::Sum), Just(Aggregation::Average)],
        any::<bool>(),
    )
        .prop_map(|(seed, n_trees, n_features, depth, cat_rate, leaves, aggregation, base)| {
            random_forest(&RandomForest {
                seed,
                n_trees,
                n_features,
                max_depth: depth,
                leaf_rate: 0.25,
                categorical_rate: cat_rate,
                leaves,
                aggregation,
                postprocessing: Postprocessing::Identity,
                with_base_score: base,
            })
        })
}

fn depth_first_round_trip<S: ForestSpec>(forest: &ForestDescription) -> Result<(), TestCaseError> {
    let repr = ForestRepr::<S>::from_description(forest, TreeLayout::DepthFirst)
        .map_err(|err| TestCaseError::fail(err.to_string()))?;
    prop_assert_eq!(repr.n_nodes() as u64, forest.node_count());
    prop_assert_eq!(&repr.to_description(), forest);
    Ok(())
}

// =============================================================================
// Properties
// =============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn depth_first_reads_back_exactly(forest in arb_forest()) {
        depth_first_round_trip::<NarrowestSpec>(&forest)?;
        depth_first_round_trip::<Specialization<f32, u32, u16, u32>>(&forest)?;
        depth_first_round_trip::<Specialization<f64, u16, u32, u16>>(&forest)?;
        depth_first_round_trip::<WidestSpec>(&forest)?;
    }

    #[test]
    fn breadth_first_read_back_predicts_the_same(forest in arb_forest(), seed in any::<u64>()) {
        let repr = ForestRepr::<NarrowestSpec>::from_description(&forest, TreeLayout::BreadthFirst)
            .map_err(|err| TestCaseError::fail(err.to_string()))?;
        let rebuilt = repr.to_description();
        prop_assert!(rebuilt.validate().is_ok());
        prop_assert_eq!(rebuilt.node_count(), forest.node_count());

        let features = random_features(seed, 20, forest.n_features as usize, 0.1);
        let (kind, layout) = (InferKind::Default, TreeLayout::DepthFirst);
        let expected = reference_predict(&forest, features.view(), kind, layout);
        let actual = reference_predict(&rebuilt, features.view(), kind, layout);
        prop_assert_eq!(actual, expected);
    }

    #[test]
    fn selected_entry_constructs(forest in arb_forest()) {
        let stats = ForestStats::from_description(&forest);
        let index = select(&stats).map_err(|err| TestCaseError::fail(err.to_string()))?;
        let handle = forest_infer::dispatch::construct(index, &forest, TreeLayout::DepthFirst);
        prop_assert!(handle.is_ok());
        prop_assert_eq!(handle.map(|h| h.index()).ok(), Some(index));
    }
}
