//! Every catalog entry must predict exactly what the description predicts.

use std::num::NonZeroUsize;

use ndarray::Array2;
use rstest::rstest;

use forest_infer::catalog::CatalogEntry;
use forest_infer::description::{
    Aggregation, ForestDescription, LeafOutput, Postprocessing, TreeBuilder,
};
use forest_infer::dispatch;
use forest_infer::forest::TreeLayout;
use forest_infer::inference::{InferKind, InferOptions};
use forest_infer::testing::{
    assert_predictions_close, random_features, random_forest, reference_predict, stump, LeafStyle,
    RandomForest, DEFAULT_TOLERANCE,
};
use forest_infer::{Engine, EngineConfig, ForestError, Parallelism};

fn check_all_entries(forest: &ForestDescription, features: &Array2<f64>, options: &InferOptions) {
    for layout in [TreeLayout::DepthFirst, TreeLayout::BreadthFirst] {
        let expected = reference_predict(forest, features.view(), options.kind, layout);
        for entry in CatalogEntry::all() {
            let handle = dispatch::construct(entry.index(), forest, layout).unwrap();
            let mut output = Array2::zeros((features.nrows(), handle.output_columns(options.kind)));
            dispatch::run_inference(&handle, features.view(), options, output.view_mut()).unwrap();
            assert_predictions_close(
                output.view(),
                expected.view(),
                DEFAULT_TOLERANCE,
                &format!("{} {entry} {layout:?}", options.kind.name()),
            );
            dispatch::destroy(handle).unwrap();
        }
    }
}

#[rstest]
#[case::boosted(LeafStyle::Scalar { groups: 1 }, Aggregation::Sum, Postprocessing::Sigmoid)]
#[case::multiclass_boosted(
    LeafStyle::Scalar { groups: 3 },
    Aggregation::Sum,
    Postprocessing::Softmax
)]
#[case::regression_average(
    LeafStyle::Scalar { groups: 2 },
    Aggregation::Average,
    Postprocessing::Identity
)]
#[case::probability_average(LeafStyle::Vector(4), Aggregation::Average, Postprocessing::Identity)]
#[case::vector_sum(LeafStyle::Vector(3), Aggregation::Sum, Postprocessing::Exp)]
#[case::vote(LeafStyle::Class(5), Aggregation::Vote, Postprocessing::Identity)]
#[case::vote_argmax(LeafStyle::Class(4), Aggregation::Vote, Postprocessing::MaxIndex)]
fn matches_reference(
    #[case] leaves: LeafStyle,
    #[case] aggregation: Aggregation,
    #[case] postprocessing: Postprocessing,
    #[values(InferKind::Default, InferKind::PerTree, InferKind::LeafId)] kind: InferKind,
) {
    let forest = random_forest(&RandomForest {
        seed: 1234,
        n_trees: 12,
        n_features: 5,
        max_depth: 6,
        categorical_rate: 0.25,
        leaves,
        aggregation,
        postprocessing,
        with_base_score: true,
        ..Default::default()
    });
    let features = random_features(99, 70, 5, 0.15);
    check_all_entries(&forest, &features, &InferOptions::default().with_kind(kind));
}

#[test]
fn parallel_blocks_match_sequential() {
    let forest = random_forest(&RandomForest {
        seed: 8,
        n_trees: 20,
        leaves: LeafStyle::Scalar { groups: 2 },
        ..Default::default()
    });
    let features = random_features(4, 333, forest.n_features as usize, 0.05);
    let options = InferOptions::default()
        .with_parallelism(Parallelism::Parallel)
        .with_block_size(7);
    check_all_entries(&forest, &features, &options);
}

#[test]
fn narrow_feature_matrix_reads_missing() {
    // Features past the end of each row are missing and take the default
    // direction.
    let forest = random_forest(&RandomForest {
        seed: 21,
        n_features: 6,
        ..Default::default()
    });
    let features = random_features(2, 25, 3, 0.0);
    check_all_entries(&forest, &features, &InferOptions::default());
}

#[test]
fn empty_batch_is_a_no_op() {
    let forest = random_forest(&RandomForest::default());
    let engine = Engine::new(EngineConfig::default());
    let loaded = engine.load(&forest).unwrap();
    let out = engine
        .predict(&loaded, Array2::zeros((0, 6)).view(), InferKind::Default)
        .unwrap();
    assert_eq!(out.dim(), (0, 1));
}

#[test]
fn engine_matches_reference_with_dedicated_pool() {
    let forest = random_forest(&RandomForest {
        seed: 77,
        leaves: LeafStyle::Vector(3),
        aggregation: Aggregation::Average,
        postprocessing: Postprocessing::Softmax,
        categorical_rate: 0.1,
        ..Default::default()
    });
    let features = random_features(13, 150, forest.n_features as usize, 0.1);

    for layout in [TreeLayout::DepthFirst, TreeLayout::BreadthFirst] {
        let config = EngineConfig::builder()
            .layout(layout)
            .block_size(16)
            .n_threads(NonZeroUsize::new(3).unwrap())
            .build()
            .unwrap();
        let engine = Engine::new(config);
        let loaded = engine.load(&forest).unwrap();
        assert_eq!(loaded.index(), CatalogEntry::NARROWEST.index());

        for kind in InferKind::ALL {
            let actual = engine.predict(&loaded, features.view(), kind).unwrap();
            let expected = reference_predict(&forest, features.view(), kind, layout);
            let (actual, expected) = (actual.view(), expected.view());
            assert_predictions_close(actual, expected, DEFAULT_TOLERANCE, kind.name());
        }
        engine.unload(loaded).unwrap();
    }
}

#[test]
fn double_precision_thresholds_are_kept() {
    // 0.1 + 1e-12 and 0.1 collapse in f32; only the f64 entry separates them.
    let mut forest = ForestDescription::new(1, 1);
    forest.push_tree(stump(0.1 + 1e-12, -1.0, 1.0), 0);
    let features = Array2::from_shape_vec((1, 1), vec![0.1]).unwrap();

    let engine = Engine::new(EngineConfig::builder().force_double_precision(true).build().unwrap());
    let loaded = engine.load(&forest).unwrap();
    let out = engine.predict(&loaded, features.view(), InferKind::Default).unwrap();
    assert_eq!(out[[0, 0]], -1.0);
}

#[test]
fn max_index_reports_first_best_class() {
    let mut forest = ForestDescription::new(1, 2)
        .with_aggregation(Aggregation::Vote)
        .with_postprocessing(Postprocessing::MaxIndex);
    for class in [0, 1] {
        forest.push_tree(
            forest_infer::TreeDescription::leaf(LeafOutput::Class(class)),
            0,
        );
    }
    let engine = Engine::new(EngineConfig::default());
    let loaded = engine.load(&forest).unwrap();
    let out = engine
        .predict(&loaded, Array2::zeros((2, 1)).view(), InferKind::Default)
        .unwrap();
    assert_eq!(out.column(0).to_vec(), vec![0.0, 0.0]);
}

#[test]
fn subnormal_thresholds_select_double_precision() {
    // 1e-50 flushes to zero in f32, which would send 1e-60 right.
    let mut forest = ForestDescription::new(1, 1);
    forest.push_tree(stump(1e-50, -1.0, 1.0), 0);
    let features = Array2::from_shape_vec((3, 1), vec![1e-60, 1e-40, -1e-60]).unwrap();

    let engine = Engine::new(EngineConfig::default());
    let loaded = engine.load(&forest).unwrap();
    assert!(loaded.entry().double_precision);
    let out = engine.predict(&loaded, features.view(), InferKind::Default).unwrap();
    assert_eq!(out.column(0).to_vec(), vec![-1.0, 1.0, -1.0]);

    let narrowest = CatalogEntry::NARROWEST.index();
    let narrow = dispatch::construct(narrowest, &forest, TreeLayout::DepthFirst);
    assert!(matches!(narrow, Err(ForestError::ConstructionOverflow { .. })));
}

#[test]
fn category_ids_beyond_f32_precision_match_description() {
    let mut builder = TreeBuilder::with_capacity(3);
    builder.init_root_with_n_nodes(3);
    builder.set_categorical_split(0, 0, vec![16_777_217], true, 1, 2);
    builder.make_leaf(1, LeafOutput::Scalar(-1.0));
    builder.make_leaf(2, LeafOutput::Scalar(1.0));
    let mut forest = ForestDescription::new(1, 1);
    forest.push_tree(builder.freeze(), 0);

    let features =
        Array2::from_shape_vec((4, 1), vec![16_777_217.0, 16_777_216.0, 16_777_218.0, f64::NAN])
            .unwrap();
    check_all_entries(&forest, &features, &InferOptions::default());

    let engine = Engine::new(EngineConfig::default());
    let loaded = engine.load(&forest).unwrap();
    let out = engine.predict(&loaded, features.view(), InferKind::Default).unwrap();
    assert_eq!(out.column(0).to_vec(), vec![1.0, -1.0, -1.0, -1.0]);
}
