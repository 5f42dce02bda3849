//! Growing one randomized decision tree.
//!
//! The trainer owns a working copy of the per-feature sorted indices. Every
//! tree node corresponds to one sub-range `[index_offset, index_offset +
//! point_count)` of EACH feature's index: the sub-range holds exactly the
//! node's points, sorted by that feature's value. Splitting a node stably
//! partitions every feature's sub-range, which keeps the invariant alive for
//! the children without re-sorting anything.
//!
//! Nodes live in an arena addressed by `NodeId`; leaves that may still be
//! split wait in a FIFO.

use std::collections::VecDeque;

use log::warn;

use crate::classifier::tree::TreeClassifier;
use crate::error::{BalsaError, Result};
use crate::random::WeightedCoin;
use crate::storage::FeatureValue;
use crate::table::{FeatureId, Label, NodeId, Table};
use crate::training::frequency::{LabelFrequencyTable, Split, SplitCandidate};
use crate::training::index::FeatureIndex;

/// Per-tree training parameters, validated by the ensemble trainer.
#[derive(Debug, Clone, Copy)]
pub struct TreeParameters {
    /// Features examined per split attempt, in `1..=feature_count`.
    pub features_to_consider: usize,
    /// Maximum node depth; the root has depth 0.
    pub max_depth: u32,
    /// Leaves at or below this Gini impurity are not split. In `[0, 0.5]`.
    pub impurity_threshold: f64,
}

struct TrainingNode<F> {
    left: NodeId,
    right: NodeId,
    index_offset: usize,
    depth: u32,
    counts: LabelFrequencyTable,
    label: Label,
    split: Split<F>,
}

impl<F: FeatureValue> TrainingNode<F> {
    fn new(counts: LabelFrequencyTable, index_offset: usize, depth: u32) -> Self {
        let label = counts.most_frequent_label();
        Self {
            left: 0,
            right: 0,
            index_offset,
            depth,
            counts,
            label,
            split: Split {
                feature: 0,
                value: F::default(),
            },
        }
    }

    fn point_count(&self) -> usize {
        self.counts.total() as usize
    }
}

/// Grows one randomized decision tree over a shared training table.
pub struct IndexedTreeTrainer<'a, F> {
    data: &'a Table<F>,
    index: FeatureIndex<F>,
    nodes: Vec<TrainingNode<F>>,
    growable: VecDeque<NodeId>,
    coin: WeightedCoin,
    class_count: usize,
    parameters: TreeParameters,
}

impl<'a, F: FeatureValue> IndexedTreeTrainer<'a, F> {
    /// Prepares a trainer from the shared master index.
    ///
    /// The master index is copied, not rebuilt; building it once per training
    /// run and copying per tree is what makes multi-tree training affordable.
    pub fn new(
        data: &'a Table<F>,
        master_index: &FeatureIndex<F>,
        class_count: usize,
        parameters: TreeParameters,
        coin: WeightedCoin,
    ) -> Self {
        debug_assert!(parameters.features_to_consider >= 1);
        debug_assert!(parameters.features_to_consider <= data.column_count());
        let index = master_index.clone();
        let point_count = index.point_count();

        let root_counts = LabelFrequencyTable::from_labels(
            index.range(0, 0, point_count).iter().map(|e| e.label),
            class_count,
        );
        let root = TrainingNode::new(root_counts, 0, 0);

        let mut trainer = Self {
            data,
            index,
            nodes: vec![root],
            growable: VecDeque::new(),
            coin,
            class_count,
            parameters,
        };
        if trainer.is_growable(0) {
            trainer.growable.push_back(0);
        }
        trainer
    }

    /// Grows the tree until no growable leaves remain and returns the
    /// finished classifier.
    pub fn train(mut self) -> Result<TreeClassifier<F>> {
        while let Some(leaf) = self.growable.pop_front() {
            self.grow_leaf(leaf)?;
        }
        self.into_classifier()
    }

    fn grow_leaf(&mut self, node: NodeId) -> Result<()> {
        let candidate = self.find_best_split(node);
        if candidate.is_valid() {
            self.split_node(node, candidate)?;
        }
        Ok(())
    }

    /// Reservoir-samples `features_to_consider` of the features and scans
    /// them for the best split. If none of the sampled features yields a
    /// valid split, the initially skipped features are scanned in order
    /// until one does.
    fn find_best_split(&mut self, node: NodeId) -> SplitCandidate<F> {
        let feature_count = self.data.column_count();
        let mut best = SplitCandidate::invalid();
        let mut credits = self.parameters.features_to_consider;
        let mut skipped = Vec::new();

        for feature in 0..feature_count {
            let features_left = (feature_count - feature) as u32;
            if !self.coin.flip(credits as u32, features_left) {
                skipped.push(feature);
                continue;
            }
            debug_assert!(credits > 0);
            credits -= 1;
            best = self.best_split_for_feature(node, feature, best);
        }
        debug_assert_eq!(
            skipped.len(),
            feature_count - self.parameters.features_to_consider
        );

        if best.is_valid() {
            return best;
        }

        for feature in skipped {
            best = self.best_split_for_feature(node, feature, best);
            if best.is_valid() {
                return best;
            }
        }

        // No feature separates the node's points at all: a cluster of
        // identical points with disagreeing labels. The node stays a leaf
        // labelled with its most frequent label.
        let sample = self.index.range(0, self.nodes[node as usize].index_offset, 1)[0].point;
        warn!(
            "training data contains a cluster of identical points with different labels \
             (feature values {:?}, label frequencies {})",
            self.data.row(sample as usize),
            self.nodes[node as usize].counts
        );
        best
    }

    /// Scans one feature's sorted sub-range for a split that beats
    /// `current_best`.
    ///
    /// Candidates exist only at value-block boundaries; a candidate's split
    /// value is the smallest value of its right side, so the strict `<` used
    /// at classification time reproduces the partition exactly.
    fn best_split_for_feature(
        &mut self,
        node: NodeId,
        feature: usize,
        current_best: SplitCandidate<F>,
    ) -> SplitCandidate<F> {
        let node = &self.nodes[node as usize];
        let entries = self
            .index
            .range(feature, node.index_offset, node.point_count());
        debug_assert!(!entries.is_empty());

        let mut best = current_best;
        let mut current_block = entries[0].value;
        let mut left = LabelFrequencyTable::with_classes(self.class_count);
        let mut right = node.counts.clone();

        for entry in entries {
            if entry.value > current_block && left.total() > 0 {
                let candidate = SplitCandidate::new(
                    Split {
                        feature: feature as FeatureId,
                        value: entry.value,
                    },
                    left.clone(),
                    right.clone(),
                );
                if candidate.impurity() < best.impurity() {
                    best = candidate;
                }
            }
            current_block = entry.value;
            left.increment(entry.label);
            right.decrement(entry.label);
        }

        best
    }

    /// Applies a split: partitions every other feature's sub-range, creates
    /// the two children, and queues them if they are growable.
    fn split_node(&mut self, node: NodeId, candidate: SplitCandidate<F>) -> Result<()> {
        let node_index = node as usize;
        let offset = self.nodes[node_index].index_offset;
        let count = self.nodes[node_index].point_count();
        let depth = self.nodes[node_index].depth;
        let left_total = candidate.left_counts.total() as usize;

        let split_feature = candidate.split.feature as usize;
        let split_value = candidate.split.value;
        let data = self.data;

        for feature in 0..self.index.feature_count() {
            // The split feature's sub-range is already partitioned by value.
            if feature == split_feature {
                continue;
            }
            let left_size = self.index.partition_range(feature, offset, count, |entry| {
                data.cell(entry.point as usize, split_feature) < split_value
            });
            if left_size != left_total {
                return Err(BalsaError::internal(
                    "partition size disagrees with the chosen split",
                ));
            }
        }

        let left_id = self.nodes.len() as NodeId;
        let right_id = left_id + 1;
        let left_child = TrainingNode::new(candidate.left_counts, offset, depth + 1);
        let right_child = TrainingNode::new(candidate.right_counts, offset + left_total, depth + 1);

        let parent = &mut self.nodes[node_index];
        parent.split = candidate.split;
        parent.left = left_id;
        parent.right = right_id;

        self.nodes.push(left_child);
        self.nodes.push(right_child);

        if self.is_growable(left_id) {
            self.growable.push_back(left_id);
        }
        if self.is_growable(right_id) {
            self.growable.push_back(right_id);
        }
        Ok(())
    }

    /// A leaf may still be split while it is above the depth limit and
    /// impurer than the threshold.
    fn is_growable(&self, node: NodeId) -> bool {
        let node = &self.nodes[node as usize];
        debug_assert!(node.left == 0);
        node.depth < self.parameters.max_depth
            && node.counts.gini_impurity() > self.parameters.impurity_threshold
    }

    /// Flattens the node arena into the classifier's parallel tables.
    fn into_classifier(self) -> Result<TreeClassifier<F>> {
        let node_count = self.nodes.len();
        let mut left_child = Vec::with_capacity(node_count);
        let mut right_child = Vec::with_capacity(node_count);
        let mut split_feature = Vec::with_capacity(node_count);
        let mut split_value = Vec::with_capacity(node_count);
        let mut label = Vec::with_capacity(node_count);

        for node in &self.nodes {
            left_child.push(node.left);
            right_child.push(node.right);
            split_feature.push(node.split.feature);
            split_value.push(node.split.value);
            label.push(node.label);
        }

        TreeClassifier::from_tables(
            self.class_count,
            self.data.column_count(),
            Table::from_cells(1, left_child)?,
            Table::from_cells(1, right_child)?,
            Table::from_cells(1, split_feature)?,
            Table::from_cells(1, split_value)?,
            Table::from_cells(1, label)?,
        )
    }
}
