// Balsa - random-forest classifier library
// Core library module

//! Balsa trains ensembles of randomized binary decision trees on labelled
//! tabular data and bulk-classifies unseen points with them. Models live in a
//! self-describing binary container format with endianness and type checks,
//! so training and classification can run in separate processes, streaming
//! trees through a bounded cache instead of holding whole ensembles in
//! memory.
//!
//! Training:
//!
//! ```no_run
//! use balsa::{train_ensemble, Table, TrainOptions};
//!
//! # fn main() -> balsa::Result<()> {
//! let points = Table::from_cells(2, vec![-1.0f64, 1.0, 1.0, 1.0, -1.0, -1.0, 1.0, -1.0])?;
//! let labels = Table::from_cells(1, vec![0u8, 1, 1, 0])?;
//! let options = TrainOptions::default().with_tree_count(20).with_seed(42);
//! train_ensemble(&points, &labels, "model.balsa", &options)?;
//! # Ok(())
//! # }
//! ```
//!
//! Classification:
//!
//! ```no_run
//! use balsa::{ClassifierOptions, RandomForestClassifier};
//!
//! # fn main() -> balsa::Result<()> {
//! let mut forest = RandomForestClassifier::open("model.balsa", ClassifierOptions::default())?;
//! let points = vec![0.5f64, -0.5];
//! let mut labels = vec![0u8; 1];
//! forest.classify(&points, 2, &mut labels)?;
//! # Ok(())
//! # }
//! ```

pub mod classifier;
pub mod error;
pub mod evaluation;
pub mod random;
pub mod storage;
pub mod table;
pub mod training;

pub use classifier::{
    Classifier, ClassifierOptions, EnsembleClassifier, RandomForestClassifier, TreeClassifier,
    TreeInputStream, TreeStream, TreeVecStream,
};
pub use error::{BalsaError, Result};
pub use evaluation::{accuracy, FeatureImportance};
pub use random::{SeedSource, WeightedCoin};
pub use storage::{
    read_table, read_table_as, FeatureType, FeatureValue, ModelReader, ModelWriter, Scalar,
};
pub use table::{DataPointId, FeatureId, Label, NodeId, Table, VoteTable};
pub use training::{
    train_ensemble, CreatorMetadata, EnsembleTrainer, FeatureIndex, IndexedTreeTrainer,
    LabelFrequencyTable, TrainOptions, TreeParameters,
};
