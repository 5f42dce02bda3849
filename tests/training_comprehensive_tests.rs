// # Training Test Suite
//
// Determinism, purity, and failure properties of ensemble training.
// Test IDs: TRN-001 through TRN-008.

use std::collections::HashMap;

use rand::Rng;
use rand::SeedableRng;
use rand_chacha::ChaCha12Rng;

use balsa::{
    train_ensemble, ClassifierOptions, FeatureImportance, Label, ModelReader,
    RandomForestClassifier, SeedSource, Table, TrainOptions, TreeClassifier,
};

fn model_path(dir: &tempfile::TempDir, name: &str) -> std::path::PathBuf {
    dir.path().join(name)
}

fn blobs(point_count: usize, seed: u64) -> (Table<f64>, Table<Label>) {
    let mut rng = ChaCha12Rng::seed_from_u64(seed);
    let mut points = Table::with_columns(2);
    let mut labels = Table::with_columns(1);
    for index in 0..point_count {
        let label = (index % 2) as Label;
        let center = if label == 0 { -2.0 } else { 2.0 };
        let x: f64 = rng.random_range(-1.5..1.5) + center;
        let y: f64 = rng.random_range(-1.5..1.5);
        points.append_rows([x, y]).unwrap();
        labels.append_rows([label]).unwrap();
    }
    (points, labels)
}

/// Recomputes the per-node label histograms of a tree by routing every
/// training point from the root down, with the same strict `<` rule the
/// classifier uses.
fn node_label_counts(
    tree: &TreeClassifier<f64>,
    points: &Table<f64>,
    labels: &Table<Label>,
    class_count: usize,
) -> HashMap<u32, Vec<u64>> {
    let mut counts: HashMap<u32, Vec<u64>> = HashMap::new();
    for point in 0..points.row_count() {
        let label = labels.cell(point, 0) as usize;
        let mut node = 0u32;
        loop {
            counts
                .entry(node)
                .or_insert_with(|| vec![0; class_count])[label] += 1;
            let left = tree.left_child_table().cell(node as usize, 0);
            if left == 0 {
                break;
            }
            let feature = tree.split_feature_table().cell(node as usize, 0) as usize;
            let split_value = tree.split_value_table().cell(node as usize, 0);
            node = if points.cell(point, feature) < split_value {
                left
            } else {
                tree.right_child_table().cell(node as usize, 0)
            };
        }
    }
    counts
}

fn gini(counts: &[u64]) -> f64 {
    let total: u64 = counts.iter().sum();
    let squared: u64 = counts.iter().map(|&c| c * c).sum();
    1.0 - squared as f64 / (total * total) as f64
}

fn parse_trees(path: &std::path::Path) -> Vec<TreeClassifier<f64>> {
    let mut reader = ModelReader::open(path).unwrap();
    reader.enter_ensemble().unwrap();
    let mut trees = Vec::new();
    while reader.at_tree().unwrap() {
        trees.push(reader.parse_tree::<f64>().unwrap());
    }
    reader.leave_ensemble().unwrap();
    assert!(reader.at_eof().unwrap());
    trees
}

// ============================================================================
// TRN-001: Identical inputs and seed produce identical model bytes
// ============================================================================

#[test]
fn trn_001_single_threaded_training_is_deterministic() {
    let (points, labels) = blobs(400, 50);

    let dir = tempfile::tempdir().unwrap();
    let first_path = model_path(&dir, "first.balsa");
    let second_path = model_path(&dir, "second.balsa");
    let options = TrainOptions::default()
        .with_tree_count(7)
        .with_features_to_consider(1)
        .with_thread_count(1)
        .with_seed(123_456);

    train_ensemble(&points, &labels, &first_path, &options).unwrap();
    train_ensemble(&points, &labels, &second_path, &options).unwrap();

    let first_bytes = std::fs::read(&first_path).unwrap();
    let second_bytes = std::fs::read(&second_path).unwrap();
    assert_eq!(first_bytes, second_bytes);
}

// ============================================================================
// TRN-002: Multi-threaded training yields a complete, usable ensemble
// ============================================================================

#[test]
fn trn_002_multi_threaded_training_completes() {
    let (points, labels) = blobs(600, 51);

    let dir = tempfile::tempdir().unwrap();
    let path = model_path(&dir, "parallel.balsa");
    let options = TrainOptions::default()
        .with_tree_count(16)
        .with_features_to_consider(1)
        .with_thread_count(4)
        .with_seed(9);
    train_ensemble(&points, &labels, &path, &options).unwrap();

    let trees = parse_trees(&path);
    assert_eq!(trees.len(), 16);

    // The parallel run is a fully functional model: the blobs are separable,
    // so the forest reproduces the training labels.
    let mut forest = RandomForestClassifier::open(&path, ClassifierOptions::default()).unwrap();
    let mut predicted = vec![0 as Label; points.row_count()];
    forest
        .classify(points.cells(), 2, &mut predicted)
        .unwrap();
    assert_eq!(predicted, labels.cells());
}

// ============================================================================
// TRN-003: Splits never increase the weighted Gini impurity
// ============================================================================

#[test]
fn trn_003_weighted_impurity_is_monotone() {
    let (points, labels) = blobs(500, 52);

    let dir = tempfile::tempdir().unwrap();
    let path = model_path(&dir, "impurity.balsa");
    let options = TrainOptions::default()
        .with_tree_count(3)
        .with_features_to_consider(1)
        .with_seed(4);
    train_ensemble(&points, &labels, &path, &options).unwrap();

    for tree in parse_trees(&path) {
        let counts = node_label_counts(&tree, &points, &labels, 2);
        for node in 0..tree.node_count() {
            let left = tree.left_child_table().cell(node, 0);
            if left == 0 {
                continue;
            }
            let right = tree.right_child_table().cell(node, 0);
            let parent_counts = &counts[&(node as u32)];
            let left_counts = &counts[&left];
            let right_counts = &counts[&right];

            let left_total: u64 = left_counts.iter().sum();
            let right_total: u64 = right_counts.iter().sum();
            let total = (left_total + right_total) as f64;
            let weighted = (gini(left_counts) * left_total as f64
                + gini(right_counts) * right_total as f64)
                / total;
            assert!(
                weighted <= gini(parent_counts) + 1e-12,
                "node {} weighted child impurity {} exceeds parent {}",
                node,
                weighted,
                gini(parent_counts)
            );
        }
    }
}

// ============================================================================
// TRN-004: Fully grown trees have pure leaves on conflict-free data
// ============================================================================

#[test]
fn trn_004_leaves_are_pure_under_default_settings() {
    let (points, labels) = blobs(500, 53);

    let dir = tempfile::tempdir().unwrap();
    let path = model_path(&dir, "pure.balsa");
    let options = TrainOptions::default()
        .with_tree_count(2)
        .with_features_to_consider(1)
        .with_seed(6);
    train_ensemble(&points, &labels, &path, &options).unwrap();

    for tree in parse_trees(&path) {
        let counts = node_label_counts(&tree, &points, &labels, 2);
        for node in 0..tree.node_count() {
            if tree.left_child_table().cell(node, 0) != 0 {
                continue;
            }
            let leaf_counts = &counts[&(node as u32)];
            assert_eq!(gini(leaf_counts), 0.0, "leaf {} is impure", node);
        }
    }
}

// ============================================================================
// TRN-005: Invalid training inputs are rejected up front
// ============================================================================

#[test]
fn trn_005_input_validation() {
    let (points, labels) = blobs(50, 54);
    let dir = tempfile::tempdir().unwrap();
    let path = model_path(&dir, "rejected.balsa");

    // Mismatched label count.
    let short_labels = Table::from_cells(1, vec![0u8; 10]).unwrap();
    assert!(train_ensemble(&points, &short_labels, &path, &TrainOptions::default()).is_err());

    // More features to consider than features.
    let options = TrainOptions::default().with_features_to_consider(3);
    assert!(train_ensemble(&points, &labels, &path, &options).is_err());

    // Impurity threshold outside [0, 0.5].
    let options = TrainOptions::default().with_impurity_threshold(0.6);
    assert!(train_ensemble(&points, &labels, &path, &options).is_err());

    // Zero training threads.
    let options = TrainOptions::default().with_thread_count(0);
    assert!(train_ensemble(&points, &labels, &path, &options).is_err());

    // Non-finite feature values.
    let bad = Table::from_cells(2, vec![0.0, f64::INFINITY, 1.0, 2.0]).unwrap();
    let two = Table::from_cells(1, vec![0u8, 1]).unwrap();
    assert!(train_ensemble(&bad, &two, &path, &TrainOptions::default()).is_err());
}

// ============================================================================
// TRN-006: A truncated model file is rejected by readers
// ============================================================================

#[test]
fn trn_006_truncated_output_is_rejected() {
    let (points, labels) = blobs(100, 55);

    let dir = tempfile::tempdir().unwrap();
    let path = model_path(&dir, "truncated.balsa");
    let options = TrainOptions::default().with_tree_count(3).with_seed(2);
    train_ensemble(&points, &labels, &path, &options).unwrap();

    // Chop off the ensemble end marker, as a failed run would.
    let bytes = std::fs::read(&path).unwrap();
    std::fs::write(&path, &bytes[..bytes.len() - 4]).unwrap();

    let mut forest = RandomForestClassifier::open(&path, ClassifierOptions::default()).unwrap();
    let mut predicted = vec![0 as Label; points.row_count()];
    assert!(forest
        .classify(points.cells(), 2, &mut predicted)
        .is_err());
}

// ============================================================================
// TRN-007: An impurity threshold stops growth early
// ============================================================================

#[test]
fn trn_007_impurity_threshold_limits_growth() {
    let (points, labels) = blobs(400, 56);

    let dir = tempfile::tempdir().unwrap();
    let strict_path = model_path(&dir, "strict.balsa");
    let lax_path = model_path(&dir, "lax.balsa");

    let strict = TrainOptions::default()
        .with_tree_count(1)
        .with_features_to_consider(2)
        .with_seed(8);
    train_ensemble(&points, &labels, &strict_path, &strict).unwrap();

    let lax = strict.clone().with_impurity_threshold(0.5);
    train_ensemble(&points, &labels, &lax_path, &lax).unwrap();

    // At threshold 0.5 no node is ever impure enough to split.
    let lax_trees = parse_trees(&lax_path);
    assert_eq!(lax_trees[0].node_count(), 1);

    let strict_trees = parse_trees(&strict_path);
    assert!(strict_trees[0].node_count() > 1);
}

// ============================================================================
// TRN-008: Permutation importance favors the informative feature
// ============================================================================

#[test]
fn trn_008_feature_importance_on_a_trained_forest() {
    // Feature 0 carries the class; feature 1 is noise.
    let (points, labels) = blobs(800, 57);

    let dir = tempfile::tempdir().unwrap();
    let path = model_path(&dir, "importance.balsa");
    let options = TrainOptions::default()
        .with_tree_count(20)
        .with_features_to_consider(1)
        .with_seed(15);
    train_ensemble(&points, &labels, &path, &options).unwrap();

    let mut forest = RandomForestClassifier::open(&path, ClassifierOptions::default()).unwrap();
    let seeds = SeedSource::new(30);

    let importance =
        FeatureImportance::measure(&mut forest, points.cells(), labels.cells(), 5, &seeds)
            .unwrap();

    assert_eq!(importance.feature_count(), 2);
    assert!(importance.importance(0) > importance.importance(1) + 0.1);
    assert!(importance.importance(0) > 0.2);
}
