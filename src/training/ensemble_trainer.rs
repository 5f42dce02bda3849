//! Training a whole ensemble.
//!
//! The per-feature indices are built once and shared read-only; every tree
//! job copies them. With worker threads enabled, jobs travel over a bounded
//! channel, finished trees come back over another, and the coordinator
//! serializes them in completion order. The first worker error is latched;
//! the remaining workers observe the failure flag, skip their jobs, and exit
//! through their stop sentinels, after which the error is surfaced and the
//! output file is left without its ensemble end marker so readers reject it.

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;

use crossbeam::channel::bounded;
use log::{debug, info};

use crate::classifier::tree::TreeClassifier;
use crate::error::{BalsaError, Result};
use crate::random::{SeedSource, WeightedCoin};
use crate::storage::{FeatureValue, ModelWriter};
use crate::table::{Label, Table};
use crate::training::index::FeatureIndex;
use crate::training::tree_trainer::{IndexedTreeTrainer, TreeParameters};

/// Creator metadata recorded in the model file header.
#[derive(Debug, Clone, Default)]
pub struct CreatorMetadata {
    pub name: String,
    pub major: u8,
    pub minor: u8,
    pub patch: u8,
}

/// Options for [`train_ensemble`].
#[derive(Debug, Clone)]
pub struct TrainOptions {
    /// Number of trees in the ensemble.
    pub tree_count: u32,
    /// Maximum node depth; the root has depth 0.
    pub max_depth: u32,
    /// Features examined per split attempt; 0 resolves to
    /// `ceil(sqrt(feature_count))`.
    pub features_to_consider: u32,
    /// Leaves at or below this Gini impurity are not split. In `[0, 0.5]`.
    pub impurity_threshold: f64,
    /// Worker threads; 1 trains on the calling thread.
    pub thread_count: u32,
    /// Master seed; `None` draws one from operating system entropy.
    pub seed: Option<u64>,
    /// Optional creator metadata for the file header.
    pub creator: Option<CreatorMetadata>,
}

impl Default for TrainOptions {
    fn default() -> Self {
        Self {
            tree_count: 150,
            max_depth: u32::MAX,
            features_to_consider: 0,
            impurity_threshold: 0.0,
            thread_count: 1,
            seed: None,
            creator: None,
        }
    }
}

impl TrainOptions {
    pub fn with_tree_count(mut self, tree_count: u32) -> Self {
        self.tree_count = tree_count;
        self
    }

    pub fn with_max_depth(mut self, max_depth: u32) -> Self {
        self.max_depth = max_depth;
        self
    }

    pub fn with_features_to_consider(mut self, features_to_consider: u32) -> Self {
        self.features_to_consider = features_to_consider;
        self
    }

    pub fn with_impurity_threshold(mut self, impurity_threshold: f64) -> Self {
        self.impurity_threshold = impurity_threshold;
        self
    }

    pub fn with_thread_count(mut self, thread_count: u32) -> Self {
        self.thread_count = thread_count;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    pub fn with_creator(mut self, creator: CreatorMetadata) -> Self {
        self.creator = Some(creator);
        self
    }
}

/// Trains a random forest on a labelled table and writes it to `path`.
pub fn train_ensemble<F: FeatureValue>(
    data: &Table<F>,
    labels: &Table<Label>,
    path: impl AsRef<Path>,
    options: &TrainOptions,
) -> Result<()> {
    let trainer = EnsembleTrainer::new(data, labels, options)?;
    trainer.train(path)
}

/// Coordinates tree trainers over a shared training table.
pub struct EnsembleTrainer<'a, F> {
    data: &'a Table<F>,
    labels: &'a Table<Label>,
    class_count: usize,
    parameters: TreeParameters,
    tree_count: u32,
    thread_count: u32,
    seeds: SeedSource,
    creator: Option<CreatorMetadata>,
}

impl<'a, F: FeatureValue> EnsembleTrainer<'a, F> {
    /// Validates the training inputs and options.
    pub fn new(
        data: &'a Table<F>,
        labels: &'a Table<Label>,
        options: &TrainOptions,
    ) -> Result<Self> {
        if data.row_count() == 0 {
            return Err(BalsaError::input("the training set is empty"));
        }
        if data.column_count() > u8::MAX as usize {
            return Err(BalsaError::input(format!(
                "{} features exceed the supported maximum of 255",
                data.column_count()
            )));
        }
        if labels.row_count() != data.row_count() || labels.column_count() != 1 {
            return Err(BalsaError::input(
                "labels must form a single column with one entry per training point",
            ));
        }

        let highest_label = labels.cells().iter().copied().max().unwrap_or(0);
        let class_count = highest_label as usize + 1;
        if class_count > u8::MAX as usize {
            return Err(BalsaError::input(format!(
                "{} classes exceed the supported maximum of 255",
                class_count
            )));
        }

        let feature_count = data.column_count();
        let features_to_consider = match options.features_to_consider {
            0 => (feature_count as f64).sqrt().ceil() as usize,
            n => n as usize,
        };
        if features_to_consider == 0 || features_to_consider > feature_count {
            return Err(BalsaError::input(format!(
                "cannot consider {} of {} features per split",
                features_to_consider, feature_count
            )));
        }
        if !(0.0..=0.5).contains(&options.impurity_threshold) {
            return Err(BalsaError::input(
                "the impurity threshold must lie in [0, 0.5]",
            ));
        }
        if options.thread_count == 0 {
            return Err(BalsaError::input("at least one training thread is needed"));
        }

        Ok(Self {
            data,
            labels,
            class_count,
            parameters: TreeParameters {
                features_to_consider,
                max_depth: options.max_depth,
                impurity_threshold: options.impurity_threshold,
            },
            tree_count: options.tree_count,
            thread_count: options.thread_count,
            seeds: match options.seed {
                Some(seed) => SeedSource::new(seed),
                None => SeedSource::from_entropy(),
            },
            creator: options.creator.clone(),
        })
    }

    /// Runs the training and streams the finished trees into `path`.
    pub fn train(&self, path: impl AsRef<Path>) -> Result<()> {
        let mut writer = ModelWriter::create(path)?;
        if let Some(creator) = &self.creator {
            writer.set_creator_name(&creator.name);
            writer.set_creator_version(creator.major, creator.minor, creator.patch);
        }

        info!(
            "training {} trees on {} points with {} threads",
            self.tree_count,
            self.data.row_count(),
            self.thread_count
        );
        let index = FeatureIndex::build(self.data, self.labels)?;
        debug!("built {} feature indices", index.feature_count());

        writer.enter_ensemble(
            self.class_count as u8,
            self.data.column_count() as u8,
            F::FEATURE_TYPE,
        )?;

        // On failure the writer is dropped here without `leave_ensemble`, so
        // the unterminated output is rejected by any reader.
        if self.thread_count == 1 {
            self.train_single_threaded(&index, &mut writer)?;
        } else {
            self.train_multi_threaded(&index, &mut writer)?;
        }

        writer.leave_ensemble()?;
        writer.finish()
    }

    fn train_one_tree(&self, index: &FeatureIndex<F>) -> Result<TreeClassifier<F>> {
        let coin = WeightedCoin::new(&self.seeds);
        IndexedTreeTrainer::new(self.data, index, self.class_count, self.parameters, coin).train()
    }

    fn train_single_threaded(
        &self,
        index: &FeatureIndex<F>,
        writer: &mut ModelWriter<std::fs::File>,
    ) -> Result<()> {
        for tree_number in 0..self.tree_count {
            let tree = self.train_one_tree(index)?;
            writer.write_tree(&tree)?;
            debug!("tree {} of {} completed", tree_number + 1, self.tree_count);
        }
        Ok(())
    }

    fn train_multi_threaded(
        &self,
        index: &FeatureIndex<F>,
        writer: &mut ModelWriter<std::fs::File>,
    ) -> Result<()> {
        let worker_count = self.thread_count as usize;
        let tree_count = self.tree_count as usize;
        let failed = AtomicBool::new(false);
        let mut first_error: Option<BalsaError> = None;
        let mut written = 0usize;

        thread::scope(|scope| {
            enum Job {
                Train,
                Stop,
            }

            let (job_sender, job_receiver) = bounded::<Job>(tree_count + worker_count);
            let (tree_sender, tree_receiver) = bounded::<Result<TreeClassifier<F>>>(worker_count);

            // The whole job queue is known up front: one job per tree, then
            // one stop sentinel per worker.
            for _ in 0..tree_count {
                let _ = job_sender.send(Job::Train);
            }
            for _ in 0..worker_count {
                let _ = job_sender.send(Job::Stop);
            }
            drop(job_sender);

            let workers: Vec<_> = (0..worker_count)
                .map(|_| {
                    let jobs = job_receiver.clone();
                    let trees = tree_sender.clone();
                    let failed = &failed;
                    scope.spawn(move || loop {
                        match jobs.recv() {
                            Ok(Job::Train) => {
                                // After a failure elsewhere the remaining
                                // jobs are drained without training.
                                if failed.load(Ordering::Acquire) {
                                    continue;
                                }
                                let result = self.train_one_tree(index);
                                if result.is_err() {
                                    failed.store(true, Ordering::Release);
                                }
                                if trees.send(result).is_err() {
                                    break;
                                }
                            }
                            Ok(Job::Stop) | Err(_) => break,
                        }
                    })
                })
                .collect();
            drop(tree_sender);
            drop(job_receiver);

            // Serialize completed trees in completion order.
            while let Ok(result) = tree_receiver.recv() {
                match result {
                    Ok(tree) => {
                        if first_error.is_some() {
                            continue;
                        }
                        match writer.write_tree(&tree) {
                            Ok(()) => {
                                written += 1;
                                debug!("tree {} of {} completed", written, self.tree_count);
                            }
                            Err(error) => {
                                failed.store(true, Ordering::Release);
                                first_error = Some(error);
                            }
                        }
                    }
                    Err(error) => {
                        first_error.get_or_insert(error);
                    }
                }
            }

            for worker in workers {
                if worker.join().is_err() {
                    failed.store(true, Ordering::Release);
                    first_error.get_or_insert(BalsaError::resource("training worker panicked"));
                }
            }
        });

        match first_error {
            Some(error) => Err(error),
            None if written != tree_count => Err(BalsaError::internal(
                "training finished with missing trees",
            )),
            None => Ok(()),
        }
    }
}
