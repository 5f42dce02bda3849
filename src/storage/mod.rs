//! # The Balsa container format
//!
//! A self-describing binary container for ensembles, trees, and tables. Every
//! block is bracketed by verbatim four-byte ASCII markers and carries its
//! header as a [`Dictionary`], so readers can skip, peek, and validate without
//! out-of-band knowledge. Multi-byte values use the native byte order of the
//! writing machine; an endianness marker directly after the signature lets
//! readers reject files written on the other byte order.
//!
//! File layout:
//!
//! ```text
//! "blsa"                      file signature
//! "lend" | "bend"             endianness marker
//! dictionary                  file header (format version, creator metadata)
//! { ensemble | table }*       zero or more top-level blocks
//! ```
//!
//! An ensemble block is `"frst"` header-dictionary tree* `"tsrf"`; a tree
//! block is `"tree"` header-dictionary five-node-tables `"eert"`; a table
//! block is `"tabl"` header-dictionary raw-cells `"lbat"`.

pub mod dictionary;
pub mod reader;
pub mod scalar;
pub mod writer;

pub use dictionary::{DictValue, Dictionary};
pub use reader::{EnsembleHeader, ModelReader, TableHeader, TreeHeader};
pub use scalar::{FeatureType, FeatureValue, Scalar};
pub use writer::ModelWriter;

use std::io::Read;
use std::path::Path;

use crate::error::Result;
use crate::table::Table;

/// Major version of the container format produced by this crate. Readers
/// reject any other major version.
pub const FILE_FORMAT_MAJOR_VERSION: u8 = 1;

/// Minor version of the container format produced by this crate. Readers
/// accept files with an equal or newer minor version.
pub const FILE_FORMAT_MINOR_VERSION: u8 = 0;

pub(crate) const FILE_SIGNATURE: &[u8; 4] = b"blsa";
pub(crate) const BIG_ENDIAN_MARKER: &[u8; 4] = b"bend";
pub(crate) const LITTLE_ENDIAN_MARKER: &[u8; 4] = b"lend";
pub(crate) const ENSEMBLE_START_MARKER: &[u8; 4] = b"frst";
pub(crate) const ENSEMBLE_END_MARKER: &[u8; 4] = b"tsrf";
pub(crate) const TREE_START_MARKER: &[u8; 4] = b"tree";
pub(crate) const TREE_END_MARKER: &[u8; 4] = b"eert";
pub(crate) const TABLE_START_MARKER: &[u8; 4] = b"tabl";
pub(crate) const TABLE_END_MARKER: &[u8; 4] = b"lbat";
pub(crate) const DICTIONARY_START_MARKER: &[u8; 4] = b"dict";
pub(crate) const DICTIONARY_END_MARKER: &[u8; 4] = b"tcid";

/// The endianness marker matching the machine this crate was compiled for.
pub(crate) fn platform_endianness_marker() -> &'static [u8; 4] {
    if cfg!(target_endian = "little") {
        LITTLE_ENDIAN_MARKER
    } else {
        BIG_ENDIAN_MARKER
    }
}

pub(crate) fn read_exact_bytes<const N: usize, R: Read>(input: &mut R) -> std::io::Result<[u8; N]> {
    let mut bytes = [0u8; N];
    input.read_exact(&mut bytes)?;
    Ok(bytes)
}

/// Reads a single table from a table-only container file.
pub fn read_table<T: Scalar>(path: impl AsRef<Path>) -> Result<Table<T>> {
    let mut reader = ModelReader::open(path)?;
    reader.parse_table()
}

/// Reads a single table from a table-only container file, converting cells
/// from the stored scalar type when necessary.
pub fn read_table_as<T>(path: impl AsRef<Path>) -> Result<Table<T>>
where
    T: Scalar + ConvertFrom<f32> + ConvertFrom<i32> + ConvertFrom<u8>,
{
    let mut reader = ModelReader::open(path)?;
    reader.parse_table_as()
}

/// Lossy numeric cell conversion used by the converting table reads.
pub trait ConvertFrom<S>: Sized {
    fn convert_from(source: S) -> Self;
}

macro_rules! impl_convert_from {
    ($source:ty => $($dest:ty),+) => {
        $(
            impl ConvertFrom<$source> for $dest {
                fn convert_from(source: $source) -> Self {
                    source as $dest
                }
            }
        )+
    };
}

impl_convert_from!(f32 => u8, u16, u32, i8, i16, i32, f32, f64);
impl_convert_from!(i32 => u8, u16, u32, i8, i16, i32, f32, f64);
impl_convert_from!(u8 => u8, u16, u32, i8, i16, i32, f32, f64);
