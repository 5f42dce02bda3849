//! Label histograms and split bookkeeping.

use crate::table::{FeatureId, Label};

/// Occurrence counts per label with a cached total and O(1) Gini impurity.
///
/// Invariant: `total == counts.iter().sum()`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LabelFrequencyTable {
    counts: Vec<u64>,
    total: u64,
}

impl LabelFrequencyTable {
    /// Creates an empty table able to count labels in `[0, class_count)`.
    pub fn with_classes(class_count: usize) -> Self {
        Self {
            counts: vec![0; class_count],
            total: 0,
        }
    }

    /// Counts all labels of an iterator.
    pub fn from_labels(labels: impl IntoIterator<Item = Label>, class_count: usize) -> Self {
        let mut table = Self::with_classes(class_count);
        for label in labels {
            table.increment(label);
        }
        table
    }

    pub fn increment(&mut self, label: Label) {
        self.counts[label as usize] += 1;
        self.total += 1;
    }

    pub fn decrement(&mut self, label: Label) {
        debug_assert!(self.counts[label as usize] > 0);
        self.counts[label as usize] -= 1;
        self.total -= 1;
    }

    pub fn count(&self, label: Label) -> u64 {
        self.counts[label as usize]
    }

    pub fn total(&self) -> u64 {
        self.total
    }

    pub fn class_count(&self) -> usize {
        self.counts.len()
    }

    /// The Gini impurity of the counted set: the probability that two
    /// independently drawn points have different labels. Squared counts are
    /// summed in a 64-bit accumulator before the floating-point division.
    pub fn gini_impurity(&self) -> f64 {
        debug_assert!(self.total > 0);
        let squared_counts: u64 = self.counts.iter().map(|&c| c * c).sum();
        1.0 - squared_counts as f64 / (self.total * self.total) as f64
    }

    /// The lowest label with the highest count.
    pub fn most_frequent_label(&self) -> Label {
        let mut best = 0;
        let mut best_count = 0;
        for (label, &count) in self.counts.iter().enumerate() {
            if count > best_count {
                best = label;
                best_count = count;
            }
        }
        best as Label
    }
}

impl std::fmt::Display for LabelFrequencyTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.counts.is_empty() {
            return f.write_str("(no entries)");
        }
        for (label, count) in self.counts.iter().enumerate() {
            if label > 0 {
                f.write_str(" ")?;
            }
            write!(f, "{}", count)?;
        }
        Ok(())
    }
}

/// An axis-aligned division of points along one feature. The split value is
/// an exclusive upper bound for the left side, matching the strict `<` used
/// at classification time.
#[derive(Debug, Clone, Copy)]
pub struct Split<F> {
    pub feature: FeatureId,
    pub value: F,
}

/// A candidate split plus the label histograms of the two halves it would
/// produce, scored by post-split impurity.
#[derive(Debug, Clone)]
pub struct SplitCandidate<F> {
    pub split: Split<F>,
    pub left_counts: LabelFrequencyTable,
    pub right_counts: LabelFrequencyTable,
    impurity: f64,
}

impl<F: Copy + Default> SplitCandidate<F> {
    /// A sentinel that loses to every real split: real splits have impurity
    /// at most 1.
    pub fn invalid() -> Self {
        Self {
            split: Split {
                feature: 0,
                value: F::default(),
            },
            left_counts: LabelFrequencyTable::with_classes(0),
            right_counts: LabelFrequencyTable::with_classes(0),
            impurity: f64::MAX,
        }
    }

    /// Scores a split by the point-weighted mean impurity of its halves.
    pub fn new(
        split: Split<F>,
        left_counts: LabelFrequencyTable,
        right_counts: LabelFrequencyTable,
    ) -> Self {
        let left_total = left_counts.total();
        let right_total = right_counts.total();
        let total = left_total + right_total;
        let impurity = (left_counts.gini_impurity() * left_total as f64
            + right_counts.gini_impurity() * right_total as f64)
            / total as f64;
        Self {
            split,
            left_counts,
            right_counts,
            impurity,
        }
    }

    pub fn is_valid(&self) -> bool {
        self.impurity <= 1.0
    }

    pub fn impurity(&self) -> f64 {
        self.impurity
    }
}
