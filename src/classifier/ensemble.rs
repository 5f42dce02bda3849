//! Voted classification over a stream of trees.
//!
//! The classifier pulls trees from its stream and lets each vote on the full
//! point block. With worker threads enabled, the coordinator dispatches trees
//! over a bounded job channel; every worker votes into a private table, and
//! the private tables are summed after the workers join. Vote addition is
//! commutative, so the result does not depend on thread count or dispatch
//! order.

use std::sync::Arc;
use std::thread;

use crossbeam::channel::bounded;
use log::debug;

use crate::classifier::stream::TreeStream;
use crate::classifier::tree::TreeClassifier;
use crate::classifier::{check_point_buffer, check_vote_table, Classifier};
use crate::error::{BalsaError, Result};
use crate::storage::FeatureValue;
use crate::table::{Label, VoteTable};

enum Job<F> {
    Vote(Arc<TreeClassifier<F>>),
    Stop,
}

/// An ensemble classifier with optional per-class vote weighting.
pub struct EnsembleClassifier<F, S> {
    stream: S,
    worker_count: usize,
    class_weights: Vec<f32>,
    _feature: std::marker::PhantomData<F>,
}

impl<F, S> EnsembleClassifier<F, S>
where
    F: FeatureValue,
    S: TreeStream<F>,
{
    /// Wraps a tree stream. `worker_count == 0` keeps all voting on the
    /// calling thread; a positive count spawns that many worker threads per
    /// classification call.
    pub fn new(stream: S, worker_count: usize) -> Self {
        let class_count = stream.class_count();
        Self {
            stream,
            worker_count,
            class_weights: vec![1.0; class_count],
            _feature: std::marker::PhantomData,
        }
    }

    pub fn class_count(&self) -> usize {
        self.stream.class_count()
    }

    pub fn feature_count(&self) -> usize {
        self.stream.feature_count()
    }

    pub fn class_weights(&self) -> &[f32] {
        &self.class_weights
    }

    /// Replaces the per-class vote weights used by `classify`.
    ///
    /// One weight per class; every weight must be finite and non-negative.
    pub fn set_class_weights(&mut self, weights: &[f32]) -> Result<()> {
        if weights.len() != self.class_count() {
            return Err(BalsaError::input(format!(
                "{} class weights supplied for {} classes",
                weights.len(),
                self.class_count()
            )));
        }
        if weights.iter().any(|w| !w.is_finite() || *w < 0.0) {
            return Err(BalsaError::input(
                "class weights must be finite and non-negative",
            ));
        }
        self.class_weights = weights.to_vec();
        Ok(())
    }

    /// Lets every tree in the stream vote on `points`, accumulating into
    /// `votes`. Returns the number of trees that voted.
    pub fn vote_all(&mut self, points: &[F], votes: &mut VoteTable) -> Result<usize> {
        let point_count = check_point_buffer(points, self.feature_count())?;
        check_vote_table(votes, point_count, self.class_count())?;

        self.stream.rewind()?;
        if self.worker_count == 0 {
            self.vote_single_threaded(points, votes)
        } else {
            self.vote_multi_threaded(points, votes)
        }
    }

    /// Bulk-classifies `points`: votes, weights each class column, and takes
    /// the per-point argmax. Ties resolve to the lowest class.
    pub fn classify_points(&mut self, points: &[F], labels: &mut [Label]) -> Result<()> {
        let point_count = check_point_buffer(points, self.feature_count())?;
        if labels.len() != point_count {
            return Err(BalsaError::input(format!(
                "label buffer holds {} entries for {} points",
                labels.len(),
                point_count
            )));
        }

        let mut votes = VoteTable::new(point_count, self.class_count(), 0);
        let voters = self.vote_all(points, &mut votes)?;
        debug!("{} trees voted on {} points", voters, point_count);

        let class_count = self.class_count();
        for (point, label) in labels.iter_mut().enumerate() {
            let mut best = 0usize;
            let mut best_score = self.weighted_score(&votes, point, 0);
            for class in 1..class_count {
                let score = self.weighted_score(&votes, point, class);
                if score > best_score {
                    best = class;
                    best_score = score;
                }
            }
            *label = best as Label;
        }
        Ok(())
    }

    fn weighted_score(&self, votes: &VoteTable, point: usize, class: usize) -> f64 {
        f64::from(self.class_weights[class]) * f64::from(votes.cell(point, class))
    }

    fn vote_single_threaded(&mut self, points: &[F], votes: &mut VoteTable) -> Result<usize> {
        let mut voters = 0;
        while let Some(tree) = self.stream.next_tree()? {
            tree.vote(points, votes)?;
            voters += 1;
        }
        Ok(voters)
    }

    fn vote_multi_threaded(&mut self, points: &[F], votes: &mut VoteTable) -> Result<usize> {
        let worker_count = self.worker_count;
        let point_count = votes.row_count();
        let class_count = votes.column_count();
        let stream = &mut self.stream;

        let mut dispatched = 0usize;
        let mut first_error: Option<BalsaError> = None;

        thread::scope(|scope| {
            let (job_sender, job_receiver) = bounded::<Job<F>>(worker_count * 2);

            let workers: Vec<_> = (0..worker_count)
                .map(|_| {
                    let jobs = job_receiver.clone();
                    scope.spawn(move || {
                        // Vote into a worker-private table; the coordinator
                        // sums the private tables after joining.
                        let mut local = VoteTable::new(point_count, class_count, 0);
                        loop {
                            match jobs.recv() {
                                Ok(Job::Vote(tree)) => {
                                    tree.vote(points, &mut local)?;
                                }
                                Ok(Job::Stop) | Err(_) => break,
                            }
                        }
                        Ok::<VoteTable, BalsaError>(local)
                    })
                })
                .collect();

            // The workers hold clones; dropping the original receiver makes
            // `send` fail instead of block if every worker exits early.
            drop(job_receiver);

            // Dispatch every tree, then one stop sentinel per worker so each
            // worker exits exactly once.
            let mut send_failed = false;
            loop {
                match stream.next_tree() {
                    Ok(Some(tree)) => {
                        if job_sender.send(Job::Vote(tree)).is_err() {
                            send_failed = true;
                            break;
                        }
                        dispatched += 1;
                    }
                    Ok(None) => break,
                    Err(error) => {
                        first_error = Some(error);
                        break;
                    }
                }
            }
            for _ in 0..worker_count {
                let _ = job_sender.send(Job::Stop);
            }

            for worker in workers {
                match worker.join() {
                    Ok(Ok(local)) => {
                        if let Err(error) = votes.add_assign(&local) {
                            first_error.get_or_insert(error);
                        }
                    }
                    Ok(Err(error)) => {
                        first_error.get_or_insert(error);
                    }
                    Err(_) => {
                        first_error
                            .get_or_insert(BalsaError::resource("classification worker panicked"));
                    }
                }
            }

            if send_failed {
                first_error
                    .get_or_insert(BalsaError::internal("classification workers hung up early"));
            }
        });

        match first_error {
            Some(error) => Err(error),
            None => Ok(dispatched),
        }
    }
}

impl<F, S> Classifier<F> for EnsembleClassifier<F, S>
where
    F: FeatureValue,
    S: TreeStream<F>,
{
    fn class_count(&self) -> usize {
        EnsembleClassifier::class_count(self)
    }

    fn feature_count(&self) -> usize {
        EnsembleClassifier::feature_count(self)
    }

    fn classify(&mut self, points: &[F], labels: &mut [Label]) -> Result<()> {
        self.classify_points(points, labels)
    }

    fn classify_and_vote(&mut self, points: &[F], votes: &mut VoteTable) -> Result<usize> {
        self.vote_all(points, votes)
    }
}
