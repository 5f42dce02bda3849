//! The top-level random-forest classifier.
//!
//! `RandomForestClassifier` opens a model file, dispatches on the feature
//! type recorded in it, and accepts both `f32` and `f64` point buffers,
//! converting widths when the caller's buffer does not match the stored
//! type.

use std::any::TypeId;
use std::borrow::Cow;
use std::path::Path;

use crate::classifier::ensemble::EnsembleClassifier;
use crate::classifier::stream::TreeInputStream;
use crate::error::{BalsaError, Result};
use crate::storage::{FeatureValue, ModelReader};
use crate::table::{Label, VoteTable};

/// Options for opening a model file.
#[derive(Debug, Clone, Copy)]
pub struct ClassifierOptions {
    /// Worker threads per classification call; 0 classifies on the calling
    /// thread.
    pub max_threads: usize,
    /// Trees to preload per cache refill; 0 loads the whole ensemble into
    /// memory on first use.
    pub max_preload: usize,
}

impl Default for ClassifierOptions {
    fn default() -> Self {
        Self {
            max_threads: 0,
            max_preload: 0,
        }
    }
}

impl ClassifierOptions {
    pub fn with_max_threads(mut self, max_threads: usize) -> Self {
        self.max_threads = max_threads;
        self
    }

    pub fn with_max_preload(mut self, max_preload: usize) -> Self {
        self.max_preload = max_preload;
        self
    }
}

enum Model {
    F32(EnsembleClassifier<f32, TreeInputStream<f32>>),
    F64(EnsembleClassifier<f64, TreeInputStream<f64>>),
}

/// A random-forest classifier backed by a model file.
pub struct RandomForestClassifier {
    model: Model,
}

impl RandomForestClassifier {
    /// Opens a model file, validating its container header and ensemble
    /// header.
    pub fn open(path: impl AsRef<Path>, options: ClassifierOptions) -> Result<Self> {
        let path = path.as_ref();

        // Probe the ensemble header for the stored feature type, then hand
        // the file to a stream of the matching width.
        let mut probe = ModelReader::open(path)?;
        let header = probe.enter_ensemble()?;
        drop(probe);

        use crate::storage::FeatureType;
        let model = match header.feature_type {
            FeatureType::F32 => Model::F32(EnsembleClassifier::new(
                TreeInputStream::open(path, options.max_preload)?,
                options.max_threads,
            )),
            FeatureType::F64 => Model::F64(EnsembleClassifier::new(
                TreeInputStream::open(path, options.max_preload)?,
                options.max_threads,
            )),
        };
        Ok(Self { model })
    }

    pub fn class_count(&self) -> usize {
        match &self.model {
            Model::F32(classifier) => classifier.class_count(),
            Model::F64(classifier) => classifier.class_count(),
        }
    }

    pub fn feature_count(&self) -> usize {
        match &self.model {
            Model::F32(classifier) => classifier.feature_count(),
            Model::F64(classifier) => classifier.feature_count(),
        }
    }

    /// Replaces the per-class weights applied by [`classify`](Self::classify).
    pub fn set_class_weights(&mut self, weights: &[f32]) -> Result<()> {
        match &mut self.model {
            Model::F32(classifier) => classifier.set_class_weights(weights),
            Model::F64(classifier) => classifier.set_class_weights(weights),
        }
    }

    /// Bulk-classifies `points` (row-major, `feature_count` values per
    /// point), writing one label per point.
    pub fn classify<F: FeatureValue>(
        &mut self,
        points: &[F],
        feature_count: usize,
        labels: &mut [Label],
    ) -> Result<()> {
        self.check_feature_count(feature_count)?;
        match &mut self.model {
            Model::F32(classifier) => classifier.classify_points(&convert_points(points), labels),
            Model::F64(classifier) => classifier.classify_points(&convert_points(points), labels),
        }
    }

    /// Lets every tree vote on `points`, accumulating into `votes`. Returns
    /// the number of trees that voted.
    pub fn classify_and_vote<F: FeatureValue>(
        &mut self,
        points: &[F],
        feature_count: usize,
        votes: &mut VoteTable,
    ) -> Result<usize> {
        self.check_feature_count(feature_count)?;
        match &mut self.model {
            Model::F32(classifier) => classifier.vote_all(&convert_points(points), votes),
            Model::F64(classifier) => classifier.vote_all(&convert_points(points), votes),
        }
    }

    fn check_feature_count(&self, feature_count: usize) -> Result<()> {
        if feature_count != self.feature_count() {
            return Err(BalsaError::input(format!(
                "points have {} features, the model expects {}",
                feature_count,
                self.feature_count()
            )));
        }
        Ok(())
    }
}

impl<F: FeatureValue> crate::classifier::Classifier<F> for RandomForestClassifier {
    fn class_count(&self) -> usize {
        RandomForestClassifier::class_count(self)
    }

    fn feature_count(&self) -> usize {
        RandomForestClassifier::feature_count(self)
    }

    fn classify(&mut self, points: &[F], labels: &mut [Label]) -> Result<()> {
        let feature_count = self.feature_count();
        RandomForestClassifier::classify(self, points, feature_count, labels)
    }

    fn classify_and_vote(&mut self, points: &[F], votes: &mut VoteTable) -> Result<usize> {
        let feature_count = self.feature_count();
        RandomForestClassifier::classify_and_vote(self, points, feature_count, votes)
    }
}

/// Converts a point buffer between feature-value widths. When source and
/// destination types coincide the buffer is borrowed as-is.
fn convert_points<S: FeatureValue, D: FeatureValue>(points: &[S]) -> Cow<'_, [D]> {
    if TypeId::of::<S>() == TypeId::of::<D>() {
        // Identical types, so the slice can be reinterpreted in place.
        let same: &[D] =
            unsafe { std::slice::from_raw_parts(points.as_ptr().cast::<D>(), points.len()) };
        Cow::Borrowed(same)
    } else {
        Cow::Owned(points.iter().map(|p| D::from_f64(p.to_f64())).collect())
    }
}
