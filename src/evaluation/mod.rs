//! Model evaluation helpers.
//!
//! Only what feature-importance analysis needs: plain accuracy, and the
//! permutation importance of each feature.

use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_chacha::ChaCha12Rng;

use crate::classifier::Classifier;
use crate::error::{BalsaError, Result};
use crate::random::SeedSource;
use crate::storage::FeatureValue;
use crate::table::Label;

/// The fraction of predictions that match the ground truth.
pub fn accuracy(truth: &[Label], predicted: &[Label]) -> Result<f64> {
    if truth.len() != predicted.len() {
        return Err(BalsaError::input(format!(
            "{} ground-truth labels compared against {} predictions",
            truth.len(),
            predicted.len()
        )));
    }
    if truth.is_empty() {
        return Err(BalsaError::input("cannot score an empty label set"));
    }
    let matches = truth
        .iter()
        .zip(predicted.iter())
        .filter(|(t, p)| t == p)
        .count();
    Ok(matches as f64 / truth.len() as f64)
}

/// Permutation-based feature importances of a trained classifier.
///
/// The importance of a feature is the drop in accuracy when that feature's
/// column is shuffled across points while all other columns stay fixed,
/// averaged over several shuffles.
pub struct FeatureImportance {
    importances: Vec<f64>,
}

impl FeatureImportance {
    /// Measures importances on a labelled evaluation set.
    ///
    /// Every shuffle uses a fresh permutation drawn from `seeds`, so two runs
    /// from the same seed source state produce identical importances.
    pub fn measure<F, C>(
        classifier: &mut C,
        points: &[F],
        truth: &[Label],
        repetitions: usize,
        seeds: &SeedSource,
    ) -> Result<Self>
    where
        F: FeatureValue,
        C: Classifier<F>,
    {
        if repetitions == 0 {
            return Err(BalsaError::input("at least one repetition is needed"));
        }
        let feature_count = classifier.feature_count();
        if feature_count == 0 || points.len() % feature_count != 0 {
            return Err(BalsaError::input(
                "point buffer is not a whole number of points",
            ));
        }
        let point_count = points.len() / feature_count;
        if truth.len() != point_count {
            return Err(BalsaError::input(format!(
                "{} labels supplied for {} evaluation points",
                truth.len(),
                point_count
            )));
        }

        // Reference accuracy on the unshuffled points.
        let mut predicted = vec![0 as Label; point_count];
        classifier.classify(points, &mut predicted)?;
        let reference = accuracy(truth, &predicted)?;

        let mut importances = Vec::with_capacity(feature_count);
        let mut permutation: Vec<usize> = (0..point_count).collect();
        let mut shuffled = points.to_vec();

        for feature in 0..feature_count {
            let mut accuracy_sum = 0.0;
            for _ in 0..repetitions {
                let mut noise = ChaCha12Rng::seed_from_u64(seeds.next_seed());
                permutation.shuffle(&mut noise);

                // Replace this feature's column with its shuffled self; all
                // other columns keep the original values.
                for point in 0..point_count {
                    shuffled[point * feature_count + feature] =
                        points[permutation[point] * feature_count + feature];
                }

                classifier.classify(&shuffled, &mut predicted)?;
                accuracy_sum += accuracy(truth, &predicted)?;
            }

            // Restore the shuffled column before moving on.
            for point in 0..point_count {
                shuffled[point * feature_count + feature] = points[point * feature_count + feature];
            }

            importances.push(reference - accuracy_sum / repetitions as f64);
        }

        Ok(Self { importances })
    }

    pub fn feature_count(&self) -> usize {
        self.importances.len()
    }

    /// The accuracy drop attributed to one feature.
    pub fn importance(&self, feature: usize) -> f64 {
        self.importances[feature]
    }

    pub fn importances(&self) -> &[f64] {
        &self.importances
    }
}
