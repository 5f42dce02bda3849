// # Classification Test Suite
//
// End-to-end scenarios and classifier equivalence properties.
// Test IDs: CLS-001 through CLS-010.

use rand::Rng;
use rand::SeedableRng;
use rand_chacha::ChaCha12Rng;

use balsa::{
    train_ensemble, ClassifierOptions, EnsembleClassifier, FeatureIndex, FeatureType,
    IndexedTreeTrainer, Label, ModelWriter, RandomForestClassifier, SeedSource, Table,
    TrainOptions, TreeClassifier, TreeParameters, TreeVecStream, VoteTable, WeightedCoin,
};

fn model_path(dir: &tempfile::TempDir, name: &str) -> std::path::PathBuf {
    dir.path().join(name)
}

/// Uniform points on a `width x height` checkerboard, labelled by cell color.
fn checkerboard(point_count: usize, width: u32, height: u32, seed: u64) -> (Table<f64>, Table<Label>) {
    let mut rng = ChaCha12Rng::seed_from_u64(seed);
    let mut points = Table::with_columns(2);
    let mut labels = Table::with_columns(1);
    for _ in 0..point_count {
        let x: f64 = rng.random_range(0.0..width as f64);
        let y: f64 = rng.random_range(0.0..height as f64);
        points.append_rows([x, y]).unwrap();
        labels
            .append_rows([((x.floor() + y.floor()) as u64 % 2) as Label])
            .unwrap();
    }
    (points, labels)
}

/// Points in three concentric annuli with radii [0,2], [2.25,3.25], [3.5,7].
fn rings(point_count: usize, seed: u64) -> (Table<f64>, Table<Label>) {
    const ANNULI: [(f64, f64); 3] = [(0.0, 2.0), (2.25, 3.25), (3.5, 7.0)];
    let mut rng = ChaCha12Rng::seed_from_u64(seed);
    let mut points = Table::with_columns(2);
    let mut labels = Table::with_columns(1);
    for index in 0..point_count {
        let label = (index % 3) as Label;
        let (inner, outer) = ANNULI[label as usize];
        let radius: f64 = rng.random_range(inner..=outer);
        let angle: f64 = rng.random_range(0.0..std::f64::consts::TAU);
        points
            .append_rows([radius * angle.cos(), radius * angle.sin()])
            .unwrap();
        labels.append_rows([label]).unwrap();
    }
    (points, labels)
}

fn classify_file(
    path: &std::path::Path,
    options: ClassifierOptions,
    points: &Table<f64>,
) -> Vec<Label> {
    let mut forest = RandomForestClassifier::open(path, options).unwrap();
    let mut labels = vec![0 as Label; points.row_count()];
    forest
        .classify(points.cells(), points.column_count(), &mut labels)
        .unwrap();
    labels
}

// ============================================================================
// CLS-001: The 2x2 cross is fit exactly by a single tree
// ============================================================================

#[test]
fn cls_001_cross_exact_fit() {
    let points =
        Table::from_cells(2, vec![-1.0, 1.0, 1.0, 1.0, -1.0, -1.0, 1.0, -1.0]).unwrap();
    let labels = Table::from_cells(1, vec![0u8, 1, 1, 0]).unwrap();

    let dir = tempfile::tempdir().unwrap();
    let path = model_path(&dir, "cross.balsa");
    let options = TrainOptions::default()
        .with_tree_count(1)
        .with_features_to_consider(2)
        .with_seed(1);
    train_ensemble(&points, &labels, &path, &options).unwrap();

    let predicted = classify_file(&path, ClassifierOptions::default(), &points);
    assert_eq!(predicted, vec![0, 1, 1, 0]);
}

// ============================================================================
// CLS-002: One tree memorizes a 16x32 checkerboard exactly
// ============================================================================

#[test]
fn cls_002_checkerboard_memorized() {
    let (points, labels) = checkerboard(10_000, 16, 32, 1234);

    let dir = tempfile::tempdir().unwrap();
    let path = model_path(&dir, "checkerboard.balsa");
    let options = TrainOptions::default()
        .with_tree_count(1)
        .with_features_to_consider(2)
        .with_seed(5678);
    train_ensemble(&points, &labels, &path, &options).unwrap();

    let predicted = classify_file(&path, ClassifierOptions::default(), &points);
    assert_eq!(predicted, labels.cells());
}

// ============================================================================
// CLS-003: One tree memorizes three concentric rings exactly
// ============================================================================

#[test]
fn cls_003_rings_memorized() {
    let (points, labels) = rings(10_000, 4321);

    let dir = tempfile::tempdir().unwrap();
    let path = model_path(&dir, "rings.balsa");
    let options = TrainOptions::default()
        .with_tree_count(1)
        .with_features_to_consider(2)
        .with_seed(8765);
    train_ensemble(&points, &labels, &path, &options).unwrap();

    let predicted = classify_file(&path, ClassifierOptions::default(), &points);
    assert_eq!(predicted, labels.cells());
}

// ============================================================================
// CLS-004: A written ensemble round trips and matches the in-memory trees
// ============================================================================

#[test]
fn cls_004_ensemble_round_trip() {
    let (points, labels) = rings(600, 99);
    let seed = 2024;
    let tree_count = 3;

    // Train the trees in memory.
    let index = FeatureIndex::build(&points, &labels).unwrap();
    let seeds = SeedSource::new(seed);
    let parameters = TreeParameters {
        features_to_consider: 1,
        max_depth: u32::MAX,
        impurity_threshold: 0.0,
    };
    let trees: Vec<TreeClassifier<f64>> = (0..tree_count)
        .map(|_| {
            IndexedTreeTrainer::new(&points, &index, 3, parameters, WeightedCoin::new(&seeds))
                .train()
                .unwrap()
        })
        .collect();

    // Train the same forest through the file path with the same seed.
    let dir = tempfile::tempdir().unwrap();
    let path = model_path(&dir, "roundtrip.balsa");
    let options = TrainOptions::default()
        .with_tree_count(tree_count as u32)
        .with_features_to_consider(1)
        .with_seed(seed);
    train_ensemble(&points, &labels, &path, &options).unwrap();

    let mut reopened = RandomForestClassifier::open(&path, ClassifierOptions::default()).unwrap();
    assert_eq!(reopened.class_count(), 3);
    assert_eq!(reopened.feature_count(), 2);

    let (eval, _) = rings(200, 123);
    let mut from_file = vec![0 as Label; eval.row_count()];
    reopened
        .classify(eval.cells(), 2, &mut from_file)
        .unwrap();

    let mut in_memory =
        EnsembleClassifier::new(TreeVecStream::new(trees).unwrap(), 0);
    let mut from_memory = vec![0 as Label; eval.row_count()];
    in_memory
        .classify_points(eval.cells(), &mut from_memory)
        .unwrap();

    assert_eq!(from_file, from_memory);
}

// ============================================================================
// CLS-005: Class weights skew voting; a zero weight silences a class
// ============================================================================

#[test]
fn cls_005_class_weight_skew() {
    // A handcrafted balanced ensemble: every point receives one vote for each
    // class, so weighting decides every label.
    let dir = tempfile::tempdir().unwrap();
    let path = model_path(&dir, "weighted.balsa");
    let mut writer = ModelWriter::create(&path).unwrap();
    writer.enter_ensemble(2, 1, FeatureType::F64).unwrap();
    for label in [0u8, 1] {
        let leaf = TreeClassifier::from_tables(
            2,
            1,
            Table::from_cells(1, vec![0u32]).unwrap(),
            Table::from_cells(1, vec![0u32]).unwrap(),
            Table::from_cells(1, vec![0u8]).unwrap(),
            Table::from_cells(1, vec![0.0f64]).unwrap(),
            Table::from_cells(1, vec![label]).unwrap(),
        )
        .unwrap();
        writer.write_tree(&leaf).unwrap();
    }
    writer.leave_ensemble().unwrap();
    writer.finish().unwrap();

    let eval = Table::from_cells(1, vec![0.0, 1.0, 2.0]).unwrap();
    let mut forest = RandomForestClassifier::open(&path, ClassifierOptions::default()).unwrap();

    let mut uniform = vec![0 as Label; 3];
    forest.set_class_weights(&[1.0, 1.0]).unwrap();
    forest.classify(eval.cells(), 1, &mut uniform).unwrap();
    // Tied votes resolve to the lowest class.
    assert_eq!(uniform, vec![0, 0, 0]);

    let mut skewed = vec![0 as Label; 3];
    forest.set_class_weights(&[0.0, 1.0]).unwrap();
    forest.classify(eval.cells(), 1, &mut skewed).unwrap();
    assert_eq!(skewed, vec![1, 1, 1]);
}

// ============================================================================
// CLS-005b: On a trained forest, raising a weight is monotone
// ============================================================================

#[test]
fn cls_005b_weight_monotonicity_on_trained_model() {
    let (points, labels) = checkerboard(2_000, 4, 4, 7);

    let dir = tempfile::tempdir().unwrap();
    let path = model_path(&dir, "monotone.balsa");
    let options = TrainOptions::default()
        .with_tree_count(30)
        .with_features_to_consider(1)
        .with_seed(77);
    train_ensemble(&points, &labels, &path, &options).unwrap();

    let (eval, _) = checkerboard(500, 4, 4, 8);
    let mut forest = RandomForestClassifier::open(&path, ClassifierOptions::default()).unwrap();

    let mut votes = VoteTable::new(eval.row_count(), 2, 0);
    forest.classify_and_vote(eval.cells(), 2, &mut votes).unwrap();

    let mut uniform = vec![0 as Label; eval.row_count()];
    forest.set_class_weights(&[1.0, 1.0]).unwrap();
    forest.classify(eval.cells(), 2, &mut uniform).unwrap();

    let mut skewed = vec![0 as Label; eval.row_count()];
    forest.set_class_weights(&[0.0, 1.0]).unwrap();
    forest.classify(eval.cells(), 2, &mut skewed).unwrap();

    let ones_before = uniform.iter().filter(|&&l| l == 1).count();
    let ones_after = skewed.iter().filter(|&&l| l == 1).count();
    assert!(ones_after >= ones_before);

    // With class 0 silenced, any point with at least one vote for class 1
    // must be labelled 1.
    for point in 0..eval.row_count() {
        if votes.cell(point, 1) > 0 {
            assert_eq!(skewed[point], 1);
        }
    }
}

// ============================================================================
// CLS-006: Thread count does not change classification results
// ============================================================================

#[test]
fn cls_006_thread_count_equivalence() {
    let (points, labels) = rings(2_000, 31);

    let dir = tempfile::tempdir().unwrap();
    let path = model_path(&dir, "threads.balsa");
    let options = TrainOptions::default()
        .with_tree_count(12)
        .with_features_to_consider(1)
        .with_seed(13);
    train_ensemble(&points, &labels, &path, &options).unwrap();

    let (eval, _) = rings(500, 44);
    let reference = classify_file(
        &path,
        ClassifierOptions::default().with_max_threads(0),
        &eval,
    );
    for threads in [1, 2, 4, 8] {
        for preload in [0, 3] {
            let labels = classify_file(
                &path,
                ClassifierOptions::default()
                    .with_max_threads(threads)
                    .with_max_preload(preload),
                &eval,
            );
            assert_eq!(labels, reference, "threads={} preload={}", threads, preload);
        }
    }
}

// ============================================================================
// CLS-007: classify equals vote-then-argmax under uniform weights
// ============================================================================

#[test]
fn cls_007_classify_equals_vote_argmax() {
    let (points, labels) = checkerboard(1_500, 8, 8, 3);

    let dir = tempfile::tempdir().unwrap();
    let path = model_path(&dir, "argmax.balsa");
    let options = TrainOptions::default()
        .with_tree_count(9)
        .with_features_to_consider(1)
        .with_seed(17);
    train_ensemble(&points, &labels, &path, &options).unwrap();

    let (eval, _) = checkerboard(400, 8, 8, 4);
    let mut forest = RandomForestClassifier::open(&path, ClassifierOptions::default()).unwrap();

    let mut votes = VoteTable::new(eval.row_count(), forest.class_count(), 0);
    let voters = forest
        .classify_and_vote(eval.cells(), 2, &mut votes)
        .unwrap();
    assert_eq!(voters, 9);

    let mut labels = vec![0 as Label; eval.row_count()];
    forest.classify(eval.cells(), 2, &mut labels).unwrap();

    for point in 0..eval.row_count() {
        assert_eq!(labels[point] as usize, votes.row_max_column(point));
        // Every tree votes exactly once per point.
        let row_total: u32 = votes.row(point).iter().sum();
        assert_eq!(row_total, voters as u32);
    }
}

// ============================================================================
// CLS-008: Input validation at the classifier surface
// ============================================================================

#[test]
fn cls_008_input_validation() {
    let (points, labels) = checkerboard(200, 2, 2, 5);

    let dir = tempfile::tempdir().unwrap();
    let path = model_path(&dir, "validation.balsa");
    let options = TrainOptions::default()
        .with_tree_count(2)
        .with_seed(3);
    train_ensemble(&points, &labels, &path, &options).unwrap();

    let mut forest = RandomForestClassifier::open(&path, ClassifierOptions::default()).unwrap();
    let mut out = vec![0 as Label; 1];

    // Wrong feature count.
    assert!(forest.classify(&[1.0f64, 2.0, 3.0], 3, &mut out).is_err());
    // Ragged point buffer.
    assert!(forest.classify(&[1.0f64, 2.0, 3.0], 2, &mut out).is_err());
    // Wrong label buffer length.
    assert!(forest.classify(&[1.0f64, 2.0], 2, &mut []).is_err());
    // Wrong vote table shape.
    let mut votes = VoteTable::new(1, 5, 0);
    assert!(forest
        .classify_and_vote(&[1.0f64, 2.0], 2, &mut votes)
        .is_err());
    // Wrong class weight count.
    assert!(forest.set_class_weights(&[1.0]).is_err());
}

// ============================================================================
// CLS-009: An f64 model accepts f32 point buffers
// ============================================================================

#[test]
fn cls_009_feature_width_conversion() {
    let (points, labels) = checkerboard(800, 4, 4, 6);

    let dir = tempfile::tempdir().unwrap();
    let path = model_path(&dir, "widths.balsa");
    let options = TrainOptions::default()
        .with_tree_count(5)
        .with_seed(21);
    train_ensemble(&points, &labels, &path, &options).unwrap();

    let (eval, _) = checkerboard(100, 4, 4, 9);
    let narrow: Vec<f32> = eval.cells().iter().map(|&v| v as f32).collect();

    let mut forest = RandomForestClassifier::open(&path, ClassifierOptions::default()).unwrap();

    // The f32 buffer must be widened to the model's f64 features; classifying
    // the pre-widened copy pins down the expected labels exactly.
    let widened: Vec<f64> = narrow.iter().map(|&v| v as f64).collect();
    let mut from_widened = vec![0 as Label; eval.row_count()];
    forest.classify(&widened, 2, &mut from_widened).unwrap();

    let mut from_f32 = vec![0 as Label; eval.row_count()];
    forest.classify(&narrow, 2, &mut from_f32).unwrap();
    assert_eq!(from_f32, from_widened);
}

// ============================================================================
// CLS-010: An empty ensemble classifies everything as class zero
// ============================================================================

#[test]
fn cls_010_empty_ensemble() {
    let (points, labels) = checkerboard(100, 2, 2, 11);

    let dir = tempfile::tempdir().unwrap();
    let path = model_path(&dir, "empty.balsa");
    let options = TrainOptions::default()
        .with_tree_count(0)
        .with_seed(1);
    train_ensemble(&points, &labels, &path, &options).unwrap();

    let mut forest = RandomForestClassifier::open(&path, ClassifierOptions::default()).unwrap();
    let mut votes = VoteTable::new(2, forest.class_count(), 0);
    let voters = forest
        .classify_and_vote(&[0.5f64, 0.5, 1.5, 1.5], 2, &mut votes)
        .unwrap();
    assert_eq!(voters, 0);
    assert!(votes.cells().iter().all(|&v| v == 0));

    let mut out = vec![9 as Label; 2];
    forest.classify(&[0.5f64, 0.5, 1.5, 1.5], 2, &mut out).unwrap();
    assert_eq!(out, vec![0, 0]);
}
