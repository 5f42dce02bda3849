//! The indexed-tree training engine.

pub mod ensemble_trainer;
pub mod frequency;
pub mod index;
pub mod tree_trainer;

pub use ensemble_trainer::{train_ensemble, CreatorMetadata, EnsembleTrainer, TrainOptions};
pub use frequency::{LabelFrequencyTable, Split, SplitCandidate};
pub use index::{FeatureIndex, IndexEntry};
pub use tree_trainer::{IndexedTreeTrainer, TreeParameters};
