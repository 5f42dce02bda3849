//! The self-describing dictionary block.
//!
//! Dictionaries carry the headers of every other block type. Each entry is a
//! short string key with a tagged value of one of the supported elementary
//! types. Entries serialize in ascending key order, which makes dictionary
//! output reproducible byte for byte.

use std::collections::BTreeMap;
use std::io::{Read, Write};

use crate::error::{BalsaError, Result};
use crate::storage::scalar::Scalar;
use crate::storage::{read_exact_bytes, DICTIONARY_END_MARKER, DICTIONARY_START_MARKER};

const STRING_TYPE_TAG: &[u8; 4] = b"strn";
const BOOL_TYPE_TAG: &[u8; 4] = b"bool";

/// A value of one of the elementary types the format supports.
#[derive(Debug, Clone, PartialEq)]
pub enum DictValue {
    U8(u8),
    U16(u16),
    U32(u32),
    I8(i8),
    I16(i16),
    I32(i32),
    F32(f32),
    F64(f64),
    Bool(bool),
    Str(String),
}

/// A string-keyed dictionary of tagged elementary values.
#[derive(Debug, Default, Clone)]
pub struct Dictionary {
    entries: BTreeMap<String, DictValue>,
}

impl Dictionary {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Inserts or replaces an entry. Keys must be shorter than 256 bytes and
    /// a dictionary holds at most 255 entries.
    pub fn set(&mut self, key: &str, value: DictValue) {
        debug_assert!(key.len() < 256);
        self.entries.insert(key.to_owned(), value);
        debug_assert!(self.entries.len() < 256);
    }

    pub fn set_u8(&mut self, key: &str, value: u8) {
        self.set(key, DictValue::U8(value));
    }

    pub fn set_u32(&mut self, key: &str, value: u32) {
        self.set(key, DictValue::U32(value));
    }

    pub fn set_str(&mut self, key: &str, value: &str) {
        self.set(key, DictValue::Str(value.to_owned()));
    }

    /// Returns a required u8 entry, or a format error naming the key.
    pub fn require_u8(&self, key: &str) -> Result<u8> {
        match self.entries.get(key) {
            Some(DictValue::U8(value)) => Ok(*value),
            Some(_) => Err(wrong_type(key)),
            None => Err(missing_key(key)),
        }
    }

    pub fn require_u32(&self, key: &str) -> Result<u32> {
        match self.entries.get(key) {
            Some(DictValue::U32(value)) => Ok(*value),
            Some(_) => Err(wrong_type(key)),
            None => Err(missing_key(key)),
        }
    }

    pub fn require_str(&self, key: &str) -> Result<&str> {
        match self.entries.get(key) {
            Some(DictValue::Str(value)) => Ok(value),
            Some(_) => Err(wrong_type(key)),
            None => Err(missing_key(key)),
        }
    }

    /// Returns an optional u8 entry.
    pub fn find_u8(&self, key: &str) -> Option<u8> {
        match self.entries.get(key) {
            Some(DictValue::U8(value)) => Some(*value),
            _ => None,
        }
    }

    pub fn find_str(&self, key: &str) -> Option<&str> {
        match self.entries.get(key) {
            Some(DictValue::Str(value)) => Some(value),
            _ => None,
        }
    }

    /// Serializes the dictionary between its start and end markers.
    pub fn serialize<W: Write>(&self, out: &mut W) -> Result<()> {
        out.write_all(DICTIONARY_START_MARKER)?;
        out.write_all(&[self.entries.len() as u8])?;
        for (key, value) in &self.entries {
            write_short_string(out, key)?;
            match value {
                DictValue::U8(v) => write_tagged(out, u8::TYPE_TAG, |o| v.write_cell(o))?,
                DictValue::U16(v) => write_tagged(out, u16::TYPE_TAG, |o| v.write_cell(o))?,
                DictValue::U32(v) => write_tagged(out, u32::TYPE_TAG, |o| v.write_cell(o))?,
                DictValue::I8(v) => write_tagged(out, i8::TYPE_TAG, |o| v.write_cell(o))?,
                DictValue::I16(v) => write_tagged(out, i16::TYPE_TAG, |o| v.write_cell(o))?,
                DictValue::I32(v) => write_tagged(out, i32::TYPE_TAG, |o| v.write_cell(o))?,
                DictValue::F32(v) => write_tagged(out, f32::TYPE_TAG, |o| v.write_cell(o))?,
                DictValue::F64(v) => write_tagged(out, f64::TYPE_TAG, |o| v.write_cell(o))?,
                DictValue::Bool(v) => {
                    out.write_all(BOOL_TYPE_TAG)?;
                    out.write_all(&[u8::from(*v)])?;
                }
                DictValue::Str(v) => {
                    out.write_all(STRING_TYPE_TAG)?;
                    write_short_string(out, v)?;
                }
            }
        }
        out.write_all(DICTIONARY_END_MARKER)?;
        Ok(())
    }

    /// Deserializes a dictionary, including its start and end markers.
    pub fn deserialize<R: Read>(input: &mut R) -> Result<Self> {
        let start = read_exact_bytes::<4, R>(input)?;
        if &start != DICTIONARY_START_MARKER {
            return Err(BalsaError::format("Missing dictionary start marker"));
        }

        let entry_count = u8::read_cell(input)?;
        let mut entries = BTreeMap::new();
        for _ in 0..entry_count {
            let key = read_short_string(input)?;
            let tag = read_exact_bytes::<4, R>(input)?;
            let value = match &tag {
                t if t == u8::TYPE_TAG => DictValue::U8(u8::read_cell(input)?),
                t if t == u16::TYPE_TAG => DictValue::U16(u16::read_cell(input)?),
                t if t == u32::TYPE_TAG => DictValue::U32(u32::read_cell(input)?),
                t if t == i8::TYPE_TAG => DictValue::I8(i8::read_cell(input)?),
                t if t == i16::TYPE_TAG => DictValue::I16(i16::read_cell(input)?),
                t if t == i32::TYPE_TAG => DictValue::I32(i32::read_cell(input)?),
                t if t == f32::TYPE_TAG => DictValue::F32(f32::read_cell(input)?),
                t if t == f64::TYPE_TAG => DictValue::F64(f64::read_cell(input)?),
                t if t == BOOL_TYPE_TAG => DictValue::Bool(u8::read_cell(input)? != 0),
                t if t == STRING_TYPE_TAG => DictValue::Str(read_short_string(input)?),
                t => {
                    return Err(BalsaError::format(format!(
                        "Invalid type name '{}'",
                        String::from_utf8_lossy(t)
                    )))
                }
            };
            entries.insert(key, value);
        }

        let end = read_exact_bytes::<4, R>(input)?;
        if &end != DICTIONARY_END_MARKER {
            return Err(BalsaError::format("Missing dictionary end marker"));
        }

        Ok(Self { entries })
    }
}

fn missing_key(key: &str) -> BalsaError {
    BalsaError::format(format!("Missing dictionary key '{}'", key))
}

fn wrong_type(key: &str) -> BalsaError {
    BalsaError::format(format!("Dictionary key '{}' has an unexpected type", key))
}

fn write_tagged<W: Write>(
    out: &mut W,
    tag: &[u8; 4],
    write_value: impl FnOnce(&mut W) -> std::io::Result<()>,
) -> Result<()> {
    out.write_all(tag)?;
    write_value(out)?;
    Ok(())
}

fn write_short_string<W: Write>(out: &mut W, value: &str) -> Result<()> {
    if value.len() > 255 {
        return Err(BalsaError::input(format!(
            "string of {} bytes does not fit a dictionary entry",
            value.len()
        )));
    }
    out.write_all(&[value.len() as u8])?;
    out.write_all(value.as_bytes())?;
    Ok(())
}

fn read_short_string<R: Read>(input: &mut R) -> Result<String> {
    let length = u8::read_cell(input)? as usize;
    let mut bytes = vec![0u8; length];
    input.read_exact(&mut bytes)?;
    String::from_utf8(bytes).map_err(|_| BalsaError::format("Dictionary string is not valid UTF-8"))
}
