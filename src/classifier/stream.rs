//! On-demand tree loading.
//!
//! `TreeInputStream` walks the trees of a model file with a bounded preload
//! cache, which trades disk reads against memory: `max_preload == 0` keeps
//! the whole ensemble in memory after the first pass, while a positive value
//! caps how many parsed trees exist at once.

use std::fs::File;
use std::path::Path;
use std::sync::Arc;

use log::debug;

use crate::error::{BalsaError, Result};
use crate::storage::{FeatureValue, ModelReader};

use super::tree::TreeClassifier;

/// A rewindable source of the trees of one ensemble.
///
/// All trees of a stream share a class count and a feature count. Streams are
/// not thread-safe; the ensemble classifier drives them from its coordinator
/// only.
pub trait TreeStream<F: FeatureValue> {
    fn class_count(&self) -> usize;

    fn feature_count(&self) -> usize;

    /// Repositions the stream at its first tree.
    fn rewind(&mut self) -> Result<()>;

    /// Returns the next tree, or `None` at the end of the ensemble.
    fn next_tree(&mut self) -> Result<Option<Arc<TreeClassifier<F>>>>;
}

/// A rewindable stream of the trees inside an ensemble file.
///
/// Not thread-safe; the ensemble classifier drives it from its coordinator
/// only.
pub struct TreeInputStream<F> {
    reader: ModelReader<File>,
    max_preload: usize,
    class_count: usize,
    feature_count: usize,
    cache: Vec<Arc<TreeClassifier<F>>>,
    cache_index: usize,
}

impl<F: FeatureValue> TreeInputStream<F> {
    /// Opens an ensemble file and positions the stream at its first tree.
    ///
    /// Fails with a format error when the file stores trees of the other
    /// feature-value width.
    pub fn open(path: impl AsRef<Path>, max_preload: usize) -> Result<Self> {
        let mut reader = ModelReader::open(path)?;
        let header = reader.enter_ensemble()?;
        if header.feature_type != F::FEATURE_TYPE {
            return Err(BalsaError::format(format!(
                "Ensemble stores {} features, not {}",
                header.feature_type,
                F::FEATURE_TYPE
            )));
        }
        Ok(Self {
            reader,
            max_preload,
            class_count: header.class_count as usize,
            feature_count: header.feature_count as usize,
            cache: Vec::new(),
            cache_index: 0,
        })
    }

    /// Reads trees into the cache, up to `max_preload` of them (all of them
    /// when `max_preload` is zero).
    fn refill(&mut self) -> Result<()> {
        self.cache.clear();
        self.cache_index = 0;

        while self.max_preload == 0 || self.cache.len() < self.max_preload {
            if self.reader.at_end_of_ensemble()? {
                break;
            }
            if !self.reader.at_tree()? {
                return Err(BalsaError::format("Unexpected block inside an ensemble"));
            }
            let tree = self.reader.parse_tree::<F>()?;
            self.check_tree(&tree)?;
            self.cache.push(Arc::new(tree));
        }
        if !self.cache.is_empty() {
            debug!("preloaded {} trees", self.cache.len());
        }
        Ok(())
    }

    /// Every tree must agree with the ensemble header.
    fn check_tree(&self, tree: &TreeClassifier<F>) -> Result<()> {
        if tree.class_count() != self.class_count || tree.feature_count() != self.feature_count {
            return Err(BalsaError::format(
                "Tree header disagrees with ensemble header",
            ));
        }
        Ok(())
    }
}

impl<F: FeatureValue> TreeStream<F> for TreeInputStream<F> {
    fn class_count(&self) -> usize {
        self.class_count
    }

    fn feature_count(&self) -> usize {
        self.feature_count
    }

    /// Rewinds the stream to the first tree. When everything is preloaded
    /// the cache is kept; otherwise it is flushed and the file is re-read.
    fn rewind(&mut self) -> Result<()> {
        if self.max_preload != 0 {
            self.cache.clear();
        }
        self.cache_index = 0;
        self.reader.reenter_ensemble()
    }

    fn next_tree(&mut self) -> Result<Option<Arc<TreeClassifier<F>>>> {
        if self.cache_index == self.cache.len() {
            // An exhausted full-preload cache means the ensemble itself is
            // exhausted; only refill in bounded mode or on the first fill.
            if self.max_preload != 0 || self.cache.is_empty() {
                self.refill()?;
            }
        }
        if self.cache_index == self.cache.len() {
            return Ok(None);
        }
        let tree = Arc::clone(&self.cache[self.cache_index]);
        self.cache_index += 1;
        Ok(Some(tree))
    }
}

/// An in-memory tree stream used when an ensemble is built and applied
/// without touching disk.
pub struct TreeVecStream<F> {
    trees: Vec<Arc<TreeClassifier<F>>>,
    next: usize,
    class_count: usize,
    feature_count: usize,
}

impl<F: FeatureValue> TreeVecStream<F> {
    pub fn new(trees: Vec<TreeClassifier<F>>) -> Result<Self> {
        let first = trees
            .first()
            .ok_or_else(|| BalsaError::input("an in-memory ensemble needs at least one tree"))?;
        let class_count = first.class_count();
        let feature_count = first.feature_count();
        if trees
            .iter()
            .any(|t| t.class_count() != class_count || t.feature_count() != feature_count)
        {
            return Err(BalsaError::input(
                "all trees of an ensemble must share class and feature counts",
            ));
        }
        Ok(Self {
            trees: trees.into_iter().map(Arc::new).collect(),
            next: 0,
            class_count,
            feature_count,
        })
    }
}

impl<F: FeatureValue> TreeStream<F> for TreeVecStream<F> {
    fn class_count(&self) -> usize {
        self.class_count
    }

    fn feature_count(&self) -> usize {
        self.feature_count
    }

    fn rewind(&mut self) -> Result<()> {
        self.next = 0;
        Ok(())
    }

    fn next_tree(&mut self) -> Result<Option<Arc<TreeClassifier<F>>>> {
        let tree = match self.trees.get(self.next) {
            Some(tree) => Arc::clone(tree),
            None => return Ok(None),
        };
        self.next += 1;
        Ok(Some(tree))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{FeatureType, ModelWriter};
    use crate::table::Table;

    fn single_leaf_tree(label: u8) -> TreeClassifier<f32> {
        TreeClassifier::from_tables(
            2,
            1,
            Table::from_cells(1, vec![0u32]).unwrap(),
            Table::from_cells(1, vec![0u32]).unwrap(),
            Table::from_cells(1, vec![0u8]).unwrap(),
            Table::from_cells(1, vec![0.0f32]).unwrap(),
            Table::from_cells(1, vec![label]).unwrap(),
        )
        .unwrap()
    }

    fn write_ensemble(path: &std::path::Path, labels: &[u8]) {
        let mut writer = ModelWriter::create(path).unwrap();
        writer.enter_ensemble(2, 1, FeatureType::F32).unwrap();
        for &label in labels {
            writer.write_tree(&single_leaf_tree(label)).unwrap();
        }
        writer.leave_ensemble().unwrap();
        writer.finish().unwrap();
    }

    fn drain(stream: &mut TreeInputStream<f32>) -> Vec<u8> {
        let mut labels = Vec::new();
        while let Some(tree) = stream.next_tree().unwrap() {
            labels.push(tree.label_table().cell(0, 0));
        }
        labels
    }

    #[test]
    fn streams_all_trees_in_file_order() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ensemble.balsa");
        write_ensemble(&path, &[0, 1, 1, 0, 1]);

        for max_preload in [0, 1, 2, 16] {
            let mut stream = TreeInputStream::<f32>::open(&path, max_preload).unwrap();
            assert_eq!(stream.class_count(), 2);
            assert_eq!(drain(&mut stream), vec![0, 1, 1, 0, 1]);
            assert!(stream.next_tree().unwrap().is_none());
        }
    }

    #[test]
    fn rewind_restarts_the_stream() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ensemble.balsa");
        write_ensemble(&path, &[1, 0, 1]);

        for max_preload in [0, 2] {
            let mut stream = TreeInputStream::<f32>::open(&path, max_preload).unwrap();
            assert_eq!(drain(&mut stream), vec![1, 0, 1]);
            stream.rewind().unwrap();
            assert_eq!(drain(&mut stream), vec![1, 0, 1]);
        }
    }

    #[test]
    fn feature_width_mismatch_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ensemble.balsa");
        write_ensemble(&path, &[0]);
        assert!(TreeInputStream::<f64>::open(&path, 0).is_err());
    }
}
