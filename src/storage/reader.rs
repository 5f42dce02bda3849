//! Parser side of the container codec.

use std::fs::File;
use std::io::{BufReader, Read, Seek, SeekFrom};
use std::path::Path;

use log::debug;

use crate::classifier::tree::TreeClassifier;
use crate::error::{BalsaError, Result};
use crate::storage::dictionary::Dictionary;
use crate::storage::scalar::{FeatureType, FeatureValue, Scalar};
use crate::storage::{
    platform_endianness_marker, read_exact_bytes, ConvertFrom, BIG_ENDIAN_MARKER,
    ENSEMBLE_END_MARKER, ENSEMBLE_START_MARKER, FILE_FORMAT_MAJOR_VERSION,
    FILE_FORMAT_MINOR_VERSION, FILE_SIGNATURE, LITTLE_ENDIAN_MARKER, TABLE_END_MARKER,
    TABLE_START_MARKER, TREE_END_MARKER, TREE_START_MARKER,
};
use crate::table::Table;

/// Header of an ensemble block.
#[derive(Debug, Clone, Copy)]
pub struct EnsembleHeader {
    pub class_count: u8,
    pub feature_count: u8,
    pub feature_type: FeatureType,
}

/// Header of a tree block. Trees and ensembles share the same header keys.
#[derive(Debug, Clone, Copy)]
pub struct TreeHeader {
    pub class_count: u8,
    pub feature_count: u8,
    pub feature_type: FeatureType,
}

/// Header of a table block.
#[derive(Debug, Clone)]
pub struct TableHeader {
    pub row_count: u32,
    pub column_count: u32,
    pub scalar_type_tag: [u8; 4],
}

/// A validating reader over a Balsa container.
///
/// Construction parses and checks the file signature, the endianness marker,
/// and the file header dictionary; all further parsing is on demand.
pub struct ModelReader<R: Read + Seek> {
    stream: BufReader<R>,
    tree_offset: Option<u64>,
    file_major_version: u8,
    file_minor_version: u8,
    creator_name: Option<String>,
    creator_major_version: Option<u8>,
    creator_minor_version: Option<u8>,
    creator_patch_version: Option<u8>,
}

impl ModelReader<File> {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path)
            .map_err(|e| BalsaError::resource(format!("cannot open {}: {}", path.display(), e)))?;
        let reader = Self::new(file)?;
        debug!(
            "opened {} (format {}.{})",
            path.display(),
            reader.file_major_version,
            reader.file_minor_version
        );
        Ok(reader)
    }
}

impl<R: Read + Seek> ModelReader<R> {
    pub fn new(source: R) -> Result<Self> {
        let mut stream = BufReader::new(source);

        let signature = read_exact_bytes::<4, _>(&mut stream)?;
        if &signature != FILE_SIGNATURE {
            return Err(BalsaError::format("Invalid file signature"));
        }

        let endianness = read_exact_bytes::<4, _>(&mut stream)?;
        if &endianness != LITTLE_ENDIAN_MARKER && &endianness != BIG_ENDIAN_MARKER {
            return Err(BalsaError::format("Invalid endianness marker"));
        }
        if &endianness != platform_endianness_marker() {
            return Err(BalsaError::format("Endianness mismatch"));
        }

        let header = Dictionary::deserialize(&mut stream)?;
        let file_major_version = header.require_u8("file_major_version")?;
        let file_minor_version = header.require_u8("file_minor_version")?;
        if file_major_version != FILE_FORMAT_MAJOR_VERSION {
            return Err(BalsaError::format("File format major version mismatch"));
        }
        if file_minor_version < FILE_FORMAT_MINOR_VERSION {
            return Err(BalsaError::format("File format minor version mismatch"));
        }

        Ok(Self {
            creator_name: header.find_str("creator_name").map(str::to_owned),
            creator_major_version: header.find_u8("creator_major_version"),
            creator_minor_version: header.find_u8("creator_minor_version"),
            creator_patch_version: header.find_u8("creator_patch_version"),
            stream,
            tree_offset: None,
            file_major_version,
            file_minor_version,
        })
    }

    pub fn file_major_version(&self) -> u8 {
        self.file_major_version
    }

    pub fn file_minor_version(&self) -> u8 {
        self.file_minor_version
    }

    pub fn creator_name(&self) -> Option<&str> {
        self.creator_name.as_deref()
    }

    pub fn creator_version(&self) -> (Option<u8>, Option<u8>, Option<u8>) {
        (
            self.creator_major_version,
            self.creator_minor_version,
            self.creator_patch_version,
        )
    }

    /// True when the stream is positioned at the end of the file.
    pub fn at_eof(&mut self) -> Result<bool> {
        use std::io::BufRead;
        Ok(self.stream.fill_buf()?.is_empty())
    }

    pub fn at_table(&mut self) -> Result<bool> {
        Ok(self.peek_marker()? == *TABLE_START_MARKER)
    }

    pub fn at_tree(&mut self) -> Result<bool> {
        Ok(self.peek_marker()? == *TREE_START_MARKER)
    }

    pub fn at_ensemble(&mut self) -> Result<bool> {
        Ok(self.peek_marker()? == *ENSEMBLE_START_MARKER)
    }

    pub fn at_end_of_ensemble(&mut self) -> Result<bool> {
        Ok(self.peek_marker()? == *ENSEMBLE_END_MARKER)
    }

    /// True when the next block is a table whose cells have scalar type `T`.
    /// The stream position is unchanged.
    pub fn at_table_of<T: Scalar>(&mut self) -> Result<bool> {
        let position = self.stream.stream_position()?;
        let result = self.probe_table_type::<T>();
        self.stream.seek(SeekFrom::Start(position))?;
        result
    }

    /// True when the next block is a tree with feature type `F`. The stream
    /// position is unchanged.
    pub fn at_tree_of<F: FeatureValue>(&mut self) -> Result<bool> {
        let position = self.stream.stream_position()?;
        let result = self.probe_tree_type::<F>();
        self.stream.seek(SeekFrom::Start(position))?;
        result
    }

    fn probe_table_type<T: Scalar>(&mut self) -> Result<bool> {
        if self.peek_marker()? != *TABLE_START_MARKER {
            return Ok(false);
        }
        self.expect(TABLE_START_MARKER, "Invalid table start marker")?;
        let header = self.parse_table_header()?;
        Ok(header.scalar_type_tag == *T::TYPE_TAG)
    }

    fn probe_tree_type<F: FeatureValue>(&mut self) -> Result<bool> {
        if self.peek_marker()? != *TREE_START_MARKER {
            return Ok(false);
        }
        self.expect(TREE_START_MARKER, "Missing tree start marker")?;
        let header = self.parse_tree_header()?;
        Ok(header.feature_type == F::FEATURE_TYPE)
    }

    /// Consumes an ensemble start marker and header, and records the offset
    /// of the first tree for [`reenter_ensemble`](Self::reenter_ensemble).
    pub fn enter_ensemble(&mut self) -> Result<EnsembleHeader> {
        self.expect(ENSEMBLE_START_MARKER, "Missing ensemble start marker")?;
        let header = self.parse_ensemble_header()?;
        self.tree_offset = Some(self.stream.stream_position()?);
        Ok(header)
    }

    /// Consumes the ensemble end marker.
    pub fn leave_ensemble(&mut self) -> Result<()> {
        self.expect(ENSEMBLE_END_MARKER, "Missing ensemble end marker")
    }

    /// Seeks back to the first tree of the ensemble entered earlier.
    pub fn reenter_ensemble(&mut self) -> Result<()> {
        let offset = self
            .tree_offset
            .ok_or_else(|| BalsaError::input("no ensemble was entered"))?;
        self.stream.seek(SeekFrom::Start(offset))?;
        Ok(())
    }

    /// Parses one complete table block of cell type `T`.
    pub fn parse_table<T: Scalar>(&mut self) -> Result<Table<T>> {
        self.expect(TABLE_START_MARKER, "Invalid table start marker")?;
        let header = self.parse_table_header()?;
        if header.scalar_type_tag != *T::TYPE_TAG {
            return Err(BalsaError::format("Table has an incompatible scalar type"));
        }
        let table = self.read_cells_raw::<T>(&header)?;
        self.expect(TABLE_END_MARKER, "Invalid table end marker")?;
        Ok(table)
    }

    /// Parses one complete table block, converting cells to `T` when the
    /// stored scalar type differs. Supported source types are `fl32`, `in32`,
    /// and `ui08`.
    pub fn parse_table_as<T>(&mut self) -> Result<Table<T>>
    where
        T: Scalar + ConvertFrom<f32> + ConvertFrom<i32> + ConvertFrom<u8>,
    {
        self.expect(TABLE_START_MARKER, "Invalid table start marker")?;
        let header = self.parse_table_header()?;
        let table = match &header.scalar_type_tag {
            tag if tag == T::TYPE_TAG => self.read_cells_raw::<T>(&header)?,
            tag if tag == f32::TYPE_TAG => self.read_cells_converted::<T, f32>(&header)?,
            tag if tag == i32::TYPE_TAG => self.read_cells_converted::<T, i32>(&header)?,
            tag if tag == u8::TYPE_TAG => self.read_cells_converted::<T, u8>(&header)?,
            tag => {
                return Err(BalsaError::format(format!(
                    "Unsupported conversion from scalar type '{}'",
                    String::from_utf8_lossy(tag)
                )))
            }
        };
        self.expect(TABLE_END_MARKER, "Invalid table end marker")?;
        Ok(table)
    }

    /// Parses one complete tree block into a classifier, validating the node
    /// tables against the structural invariants of the format.
    pub fn parse_tree<F: FeatureValue>(&mut self) -> Result<TreeClassifier<F>> {
        self.expect(TREE_START_MARKER, "Missing tree start marker")?;
        let header = self.parse_tree_header()?;
        if header.feature_type != F::FEATURE_TYPE {
            return Err(BalsaError::format("Tree has an incompatible feature type"));
        }

        let left_child = self.parse_table::<u32>()?;
        let right_child = self.parse_table::<u32>()?;
        let split_feature = self.parse_table::<u8>()?;
        let split_value = self.parse_table::<F>()?;
        let label = self.parse_table::<u8>()?;
        self.expect(TREE_END_MARKER, "Missing tree end marker")?;

        TreeClassifier::from_tables(
            header.class_count as usize,
            header.feature_count as usize,
            left_child,
            right_child,
            split_feature,
            split_value,
            label,
        )
    }

    fn parse_ensemble_header(&mut self) -> Result<EnsembleHeader> {
        let dictionary = Dictionary::deserialize(&mut self.stream)?;
        Ok(EnsembleHeader {
            class_count: dictionary.require_u8("class_count")?,
            feature_count: dictionary.require_u8("feature_count")?,
            feature_type: FeatureType::from_type_tag(
                dictionary.require_str("feature_type_id")?.as_bytes(),
            )?,
        })
    }

    fn parse_tree_header(&mut self) -> Result<TreeHeader> {
        let header = self.parse_ensemble_header()?;
        Ok(TreeHeader {
            class_count: header.class_count,
            feature_count: header.feature_count,
            feature_type: header.feature_type,
        })
    }

    fn parse_table_header(&mut self) -> Result<TableHeader> {
        let dictionary = Dictionary::deserialize(&mut self.stream)?;
        let type_name = dictionary.require_str("scalar_type_id")?;
        let tag: [u8; 4] = type_name
            .as_bytes()
            .try_into()
            .map_err(|_| BalsaError::format(format!("Unknown scalar type: '{}'", type_name)))?;
        Ok(TableHeader {
            row_count: dictionary.require_u32("row_count")?,
            column_count: dictionary.require_u32("column_count")?,
            scalar_type_tag: tag,
        })
    }

    fn read_cells_raw<T: Scalar>(&mut self, header: &TableHeader) -> Result<Table<T>> {
        if header.column_count == 0 {
            return Err(BalsaError::format("Table has zero columns"));
        }
        let cell_count = header.row_count as usize * header.column_count as usize;
        let mut cells = Vec::with_capacity(cell_count);
        for _ in 0..cell_count {
            cells.push(
                T::read_cell(&mut self.stream)
                    .map_err(|_| BalsaError::format("Truncated table cell data"))?,
            );
        }
        Table::from_cells(header.column_count as usize, cells)
    }

    fn read_cells_converted<T, S>(&mut self, header: &TableHeader) -> Result<Table<T>>
    where
        T: Scalar + ConvertFrom<S>,
        S: Scalar,
    {
        if header.column_count == 0 {
            return Err(BalsaError::format("Table has zero columns"));
        }
        let cell_count = header.row_count as usize * header.column_count as usize;
        let mut cells = Vec::with_capacity(cell_count);
        for _ in 0..cell_count {
            cells.push(T::convert_from(S::read_cell(&mut self.stream).map_err(
                |_| BalsaError::format("Truncated table cell data"),
            )?));
        }
        Table::from_cells(header.column_count as usize, cells)
    }

    fn peek_marker(&mut self) -> Result<[u8; 4]> {
        let position = self.stream.stream_position()?;
        let mut marker = [0u8; 4];
        let mut filled = 0;
        while filled < 4 {
            let read = self.stream.read(&mut marker[filled..])?;
            if read == 0 {
                break;
            }
            filled += read;
        }
        self.stream.seek(SeekFrom::Start(position))?;
        Ok(marker)
    }

    fn expect(&mut self, marker: &[u8; 4], message: &str) -> Result<()> {
        let found = read_exact_bytes::<4, _>(&mut self.stream)
            .map_err(|_| BalsaError::format(message.to_owned()))?;
        if &found != marker {
            return Err(BalsaError::format(message.to_owned()));
        }
        Ok(())
    }
}
