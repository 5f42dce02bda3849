//! Classifiers and the voting machinery.

pub mod ensemble;
pub mod forest;
pub mod stream;
pub mod tree;

pub use ensemble::EnsembleClassifier;
pub use forest::{ClassifierOptions, RandomForestClassifier};
pub use stream::{TreeInputStream, TreeStream, TreeVecStream};
pub use tree::TreeClassifier;

use crate::error::Result;
use crate::storage::FeatureValue;
use crate::table::{Label, VoteTable};

/// The capability set shared by a single tree and a whole ensemble.
///
/// Methods take `&mut self` because ensemble classification rewinds and
/// refills its underlying tree stream.
pub trait Classifier<F: FeatureValue> {
    /// The number of classes this classifier distinguishes.
    fn class_count(&self) -> usize;

    /// The number of features each data point must have.
    fn feature_count(&self) -> usize;

    /// Bulk-classifies `points` (row-major, `feature_count` values per
    /// point), writing one label per point.
    fn classify(&mut self, points: &[F], labels: &mut [Label]) -> Result<()>;

    /// Lets every internal voter cast votes for `points` into `votes`, and
    /// returns the number of voters.
    fn classify_and_vote(&mut self, points: &[F], votes: &mut VoteTable) -> Result<usize>;
}

/// Checks the shape contract shared by all classify entry points: a
/// non-ragged point buffer and correctly sized outputs.
pub(crate) fn check_point_buffer<F: FeatureValue>(
    points: &[F],
    feature_count: usize,
) -> Result<usize> {
    use crate::error::BalsaError;
    if feature_count == 0 {
        return Err(BalsaError::input("feature count must be positive"));
    }
    if points.len() % feature_count != 0 {
        return Err(BalsaError::input(format!(
            "point buffer of {} values is not a whole number of points of {} features",
            points.len(),
            feature_count
        )));
    }
    Ok(points.len() / feature_count)
}

pub(crate) fn check_vote_table(
    votes: &VoteTable,
    point_count: usize,
    class_count: usize,
) -> Result<()> {
    use crate::error::BalsaError;
    if votes.row_count() != point_count || votes.column_count() != class_count {
        return Err(BalsaError::input(format!(
            "vote table is {}x{}, expected {}x{}",
            votes.row_count(),
            votes.column_count(),
            point_count,
            class_count
        )));
    }
    Ok(())
}
