//! Pre-sorted per-feature indices.
//!
//! For every feature, the index holds all training points sorted by that
//! feature's value. This is the single most expensive setup step of a
//! training run; all trees share one immutable master index and start from a
//! cheap copy of it instead of re-sorting.
//!
//! The working copies are partitioned in place as nodes split. Partitioning
//! must be stable: each node's sub-range stays sorted by feature value only
//! because splitting preserves the relative order of the entries on each
//! side.

use rayon::prelude::*;

use crate::error::{BalsaError, Result};
use crate::storage::FeatureValue;
use crate::table::{DataPointId, Label, Table};

/// One point in one feature's sorted index.
#[derive(Debug, Clone, Copy)]
pub struct IndexEntry<F> {
    pub value: F,
    pub point: DataPointId,
    pub label: Label,
}

/// Sorted point indices for every feature of a training table.
#[derive(Debug, Clone)]
pub struct FeatureIndex<F> {
    features: Vec<Vec<IndexEntry<F>>>,
}

impl<F: FeatureValue> FeatureIndex<F> {
    /// Builds the index from a training table and its label column.
    ///
    /// Features are sorted independently in parallel. Sorting is stable, so
    /// points with equal feature values keep their point-id order.
    pub fn build(data: &Table<F>, labels: &Table<Label>) -> Result<Self> {
        if labels.row_count() != data.row_count() {
            return Err(BalsaError::input(format!(
                "{} labels supplied for {} training points",
                labels.row_count(),
                data.row_count()
            )));
        }
        if labels.column_count() != 1 {
            return Err(BalsaError::input("labels must form a single-column table"));
        }
        if data.row_count() == 0 {
            return Err(BalsaError::input("the training set is empty"));
        }
        if data.row_count() > DataPointId::MAX as usize {
            return Err(BalsaError::input("too many training points"));
        }
        for &value in data.cells() {
            if !value.is_finite_value() {
                return Err(BalsaError::input(
                    "training data contains a non-finite feature value",
                ));
            }
        }

        let point_count = data.row_count();
        let features = (0..data.column_count())
            .into_par_iter()
            .map(|feature| {
                let mut entries: Vec<IndexEntry<F>> = (0..point_count)
                    .map(|point| IndexEntry {
                        value: data.cell(point, feature),
                        point: point as DataPointId,
                        label: labels.cell(point, 0),
                    })
                    .collect();
                // Finiteness was checked above, so the comparison is total.
                entries.sort_by(|a, b| {
                    a.value
                        .partial_cmp(&b.value)
                        .unwrap_or(std::cmp::Ordering::Equal)
                });
                entries
            })
            .collect();

        Ok(Self { features })
    }

    pub fn feature_count(&self) -> usize {
        self.features.len()
    }

    pub fn point_count(&self) -> usize {
        self.features.first().map_or(0, Vec::len)
    }

    /// The sub-range of one feature's index.
    pub fn range(&self, feature: usize, offset: usize, count: usize) -> &[IndexEntry<F>] {
        &self.features[feature][offset..offset + count]
    }

    /// Stably partitions the sub-range of one feature's index with the given
    /// predicate, and returns the size of the matching (left) side.
    pub fn partition_range(
        &mut self,
        feature: usize,
        offset: usize,
        count: usize,
        predicate: impl Fn(&IndexEntry<F>) -> bool,
    ) -> usize {
        stable_partition(&mut self.features[feature][offset..offset + count], predicate)
    }
}

/// Stable in-place partition: entries satisfying the predicate move to the
/// front, relative order is preserved on both sides. Returns the size of the
/// front side.
fn stable_partition<T: Copy>(slice: &mut [T], predicate: impl Fn(&T) -> bool) -> usize {
    let mut right = Vec::with_capacity(slice.len());
    let mut write = 0;
    for read in 0..slice.len() {
        let entry = slice[read];
        if predicate(&entry) {
            slice[write] = entry;
            write += 1;
        } else {
            right.push(entry);
        }
    }
    slice[write..].copy_from_slice(&right);
    write
}
