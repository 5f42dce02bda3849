//! Scalar cell types of the container format.
//!
//! Every cell type that can appear in a serialized table carries a four-byte
//! ASCII type tag. Cells are written in the native byte order of the writing
//! machine; the endianness marker in the file header lets readers reject
//! files from the other byte order.

use std::io::{Read, Write};

use crate::error::{BalsaError, Result};

/// A cell type that can be stored in a table block.
pub trait Scalar: Copy + Default + std::fmt::Debug + Send + Sync + 'static {
    /// The four-byte type tag recorded in table headers.
    const TYPE_TAG: &'static [u8; 4];

    fn write_cell<W: Write>(self, out: &mut W) -> std::io::Result<()>;

    fn read_cell<R: Read>(input: &mut R) -> std::io::Result<Self>;
}

macro_rules! impl_scalar {
    ($type:ty, $tag:literal) => {
        impl Scalar for $type {
            const TYPE_TAG: &'static [u8; 4] = $tag;

            fn write_cell<W: Write>(self, out: &mut W) -> std::io::Result<()> {
                out.write_all(&self.to_ne_bytes())
            }

            fn read_cell<R: Read>(input: &mut R) -> std::io::Result<Self> {
                let mut bytes = [0u8; std::mem::size_of::<$type>()];
                input.read_exact(&mut bytes)?;
                Ok(<$type>::from_ne_bytes(bytes))
            }
        }
    };
}

impl_scalar!(u8, b"ui08");
impl_scalar!(u16, b"ui16");
impl_scalar!(u32, b"ui32");
impl_scalar!(i8, b"in08");
impl_scalar!(i16, b"in16");
impl_scalar!(i32, b"in32");
impl_scalar!(f32, b"fl32");
impl_scalar!(f64, b"fl64");

/// The feature value variant used by the trees of a model file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeatureType {
    F32,
    F64,
}

impl FeatureType {
    pub fn type_tag(self) -> &'static [u8; 4] {
        match self {
            FeatureType::F32 => f32::TYPE_TAG,
            FeatureType::F64 => f64::TYPE_TAG,
        }
    }

    pub fn from_type_tag(tag: &[u8]) -> Result<Self> {
        if tag == f32::TYPE_TAG {
            Ok(FeatureType::F32)
        } else if tag == f64::TYPE_TAG {
            Ok(FeatureType::F64)
        } else {
            Err(BalsaError::format(format!(
                "Unknown feature type: '{}'",
                String::from_utf8_lossy(tag)
            )))
        }
    }
}

impl std::fmt::Display for FeatureType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(std::str::from_utf8(self.type_tag()).unwrap_or("????"))
    }
}

/// A scalar type usable as a feature value: one of the two IEEE-754 variants
/// the format supports.
pub trait FeatureValue: Scalar + PartialOrd + PartialEq {
    const FEATURE_TYPE: FeatureType;

    fn to_f64(self) -> f64;

    fn from_f64(value: f64) -> Self;

    fn is_finite_value(self) -> bool;
}

impl FeatureValue for f32 {
    const FEATURE_TYPE: FeatureType = FeatureType::F32;

    fn to_f64(self) -> f64 {
        self as f64
    }

    fn from_f64(value: f64) -> Self {
        value as f32
    }

    fn is_finite_value(self) -> bool {
        self.is_finite()
    }
}

impl FeatureValue for f64 {
    const FEATURE_TYPE: FeatureType = FeatureType::F64;

    fn to_f64(self) -> f64 {
        self
    }

    fn from_f64(value: f64) -> Self {
        value
    }

    fn is_finite_value(self) -> bool {
        self.is_finite()
    }
}
