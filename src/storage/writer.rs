//! Writer side of the container codec.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use crate::classifier::tree::TreeClassifier;
use crate::error::{BalsaError, Result};
use crate::storage::dictionary::Dictionary;
use crate::storage::scalar::{FeatureType, FeatureValue, Scalar};
use crate::storage::{
    platform_endianness_marker, ENSEMBLE_END_MARKER, ENSEMBLE_START_MARKER,
    FILE_FORMAT_MAJOR_VERSION, FILE_FORMAT_MINOR_VERSION, FILE_SIGNATURE, TABLE_END_MARKER,
    TABLE_START_MARKER, TREE_END_MARKER, TREE_START_MARKER,
};
use crate::table::Table;

/// Writes Balsa containers.
///
/// The file header (signature, endianness marker, header dictionary) is
/// emitted lazily before the first block, so creator metadata can be set any
/// time before that. Dropping the writer without [`leave_ensemble`]
/// (Self::leave_ensemble) leaves an unterminated ensemble that readers
/// reject, which is exactly what a failed training run wants.
pub struct ModelWriter<W: Write> {
    stream: BufWriter<W>,
    header_written: bool,
    inside_ensemble: bool,
    creator_name: Option<String>,
    creator_major_version: Option<u8>,
    creator_minor_version: Option<u8>,
    creator_patch_version: Option<u8>,
}

impl ModelWriter<File> {
    /// Creates (or truncates) the file at `path`.
    pub fn create(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let file = File::create(path).map_err(|e| {
            BalsaError::resource(format!("cannot create {}: {}", path.display(), e))
        })?;
        Ok(Self::new(file))
    }
}

impl<W: Write> ModelWriter<W> {
    pub fn new(sink: W) -> Self {
        Self {
            stream: BufWriter::new(sink),
            header_written: false,
            inside_ensemble: false,
            creator_name: None,
            creator_major_version: None,
            creator_minor_version: None,
            creator_patch_version: None,
        }
    }

    pub fn set_creator_name(&mut self, name: &str) {
        self.creator_name = Some(name.to_owned());
    }

    pub fn set_creator_version(&mut self, major: u8, minor: u8, patch: u8) {
        self.creator_major_version = Some(major);
        self.creator_minor_version = Some(minor);
        self.creator_patch_version = Some(patch);
    }

    /// Opens an ensemble block.
    pub fn enter_ensemble(
        &mut self,
        class_count: u8,
        feature_count: u8,
        feature_type: FeatureType,
    ) -> Result<()> {
        if self.inside_ensemble {
            return Err(BalsaError::input("an ensemble is already open"));
        }
        self.write_file_header_once()?;
        self.stream.write_all(ENSEMBLE_START_MARKER)?;
        self.write_model_header(class_count, feature_count, feature_type)?;
        self.inside_ensemble = true;
        Ok(())
    }

    /// Closes the open ensemble block.
    pub fn leave_ensemble(&mut self) -> Result<()> {
        if !self.inside_ensemble {
            return Err(BalsaError::input("no ensemble is open"));
        }
        self.stream.write_all(ENSEMBLE_END_MARKER)?;
        self.inside_ensemble = false;
        Ok(())
    }

    /// Writes one tree block.
    pub fn write_tree<F: FeatureValue>(&mut self, tree: &TreeClassifier<F>) -> Result<()> {
        self.write_file_header_once()?;
        self.stream.write_all(TREE_START_MARKER)?;
        self.write_model_header(
            tree.class_count() as u8,
            tree.feature_count() as u8,
            F::FEATURE_TYPE,
        )?;
        self.write_table(tree.left_child_table())?;
        self.write_table(tree.right_child_table())?;
        self.write_table(tree.split_feature_table())?;
        self.write_table(tree.split_value_table())?;
        self.write_table(tree.label_table())?;
        self.stream.write_all(TREE_END_MARKER)?;
        Ok(())
    }

    /// Writes one table block.
    pub fn write_table<T: Scalar>(&mut self, table: &Table<T>) -> Result<()> {
        self.write_file_header_once()?;
        self.stream.write_all(TABLE_START_MARKER)?;

        let mut header = Dictionary::new();
        header.set_u32("row_count", table.row_count() as u32);
        header.set_u32("column_count", table.column_count() as u32);
        header.set_str("scalar_type_id", tag_str(T::TYPE_TAG)?);
        header.serialize(&mut self.stream)?;

        for cell in table.cells() {
            cell.write_cell(&mut self.stream)?;
        }
        self.stream.write_all(TABLE_END_MARKER)?;
        Ok(())
    }

    /// Flushes all buffered output. An open ensemble must be closed first.
    pub fn finish(mut self) -> Result<()> {
        if self.inside_ensemble {
            return Err(BalsaError::input("cannot finish with an open ensemble"));
        }
        self.write_file_header_once()?;
        self.stream.flush()?;
        Ok(())
    }

    /// Flushes buffered output without consuming the writer. Used by failure
    /// paths that intentionally leave an ensemble unterminated.
    pub fn flush(&mut self) -> Result<()> {
        self.stream.flush()?;
        Ok(())
    }

    fn write_model_header(
        &mut self,
        class_count: u8,
        feature_count: u8,
        feature_type: FeatureType,
    ) -> Result<()> {
        let mut header = Dictionary::new();
        header.set_u8("class_count", class_count);
        header.set_u8("feature_count", feature_count);
        header.set_str("feature_type_id", tag_str(feature_type.type_tag())?);
        header.serialize(&mut self.stream)
    }

    fn write_file_header_once(&mut self) -> Result<()> {
        if self.header_written {
            return Ok(());
        }
        self.stream.write_all(FILE_SIGNATURE)?;
        self.stream.write_all(platform_endianness_marker())?;

        let mut header = Dictionary::new();
        header.set_u8("file_major_version", FILE_FORMAT_MAJOR_VERSION);
        header.set_u8("file_minor_version", FILE_FORMAT_MINOR_VERSION);
        if let Some(name) = &self.creator_name {
            header.set_str("creator_name", name);
        }
        if let Some(major) = self.creator_major_version {
            header.set_u8("creator_major_version", major);
        }
        if let Some(minor) = self.creator_minor_version {
            header.set_u8("creator_minor_version", minor);
        }
        if let Some(patch) = self.creator_patch_version {
            header.set_u8("creator_patch_version", patch);
        }
        header.serialize(&mut self.stream)?;

        self.header_written = true;
        Ok(())
    }
}

fn tag_str(tag: &'static [u8; 4]) -> Result<&'static str> {
    std::str::from_utf8(tag).map_err(|_| BalsaError::internal("non-ASCII type tag"))
}
