//! PackStream serialization format.
//!
//! PackStream is the binary value encoding carried inside every Bolt message.
//! Each value begins with a marker byte. Strings, lists, maps and structures
//! with fewer than 16 entries fold their size into the marker's low nibble;
//! larger ones are followed by an 8, 16 or 32-bit big-endian size.
//!
//! The driver treats this module as its value codec: it only ever hands
//! [`PackStreamValue`]s to the framing layer and back.

mod decoder;
mod encoder;

pub use decoder::{decode, Unpacker};
pub use encoder::{encode, Packer};

use std::collections::HashMap;
use std::fmt;

/// Marker bytes.
pub mod marker {
    /// Null
    pub const NULL: u8 = 0xC0;
    /// 64-bit IEEE 754 float
    pub const FLOAT_64: u8 = 0xC1;
    /// Boolean false
    pub const FALSE: u8 = 0xC2;
    /// Boolean true
    pub const TRUE: u8 = 0xC3;

    /// Sized integers
    pub const INT_8: u8 = 0xC8;
    /// 16-bit integer
    pub const INT_16: u8 = 0xC9;
    /// 32-bit integer
    pub const INT_32: u8 = 0xCA;
    /// 64-bit integer
    pub const INT_64: u8 = 0xCB;

    /// Byte arrays (no tiny form)
    pub const BYTES: [u8; 3] = [0xCC, 0xCD, 0xCE];
    /// Strings
    pub const STRING: [u8; 3] = [0xD0, 0xD1, 0xD2];
    /// Lists
    pub const LIST: [u8; 3] = [0xD4, 0xD5, 0xD6];
    /// Maps
    pub const MAP: [u8; 3] = [0xD8, 0xD9, 0xDA];
    /// Structures (legacy 8/16-bit field counts, decode only)
    pub const STRUCT_8: u8 = 0xDC;
    /// Structure with 16-bit field count
    pub const STRUCT_16: u8 = 0xDD;

    /// Tiny string high nibble
    pub const TINY_STRING: u8 = 0x80;
    /// Tiny list high nibble
    pub const TINY_LIST: u8 = 0x90;
    /// Tiny map high nibble
    pub const TINY_MAP: u8 = 0xA0;
    /// Tiny structure high nibble
    pub const TINY_STRUCT: u8 = 0xB0;
}

/// A PackStream value.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum PackStreamValue {
    /// Null value
    #[default]
    Null,
    /// Boolean value
    Boolean(bool),
    /// 64-bit signed integer
    Integer(i64),
    /// 64-bit floating point
    Float(f64),
    /// Byte array
    Bytes(Vec<u8>),
    /// UTF-8 string
    String(String),
    /// List of values
    List(Vec<PackStreamValue>),
    /// Map of string keys to values
    Map(HashMap<String, PackStreamValue>),
    /// Tagged structure (messages, nodes, relationships, ...)
    Structure(PackStreamStructure),
}

/// A PackStream structure: a one-byte tag plus up to 15 fields.
#[derive(Debug, Clone, PartialEq)]
pub struct PackStreamStructure {
    /// Structure tag
    pub tag: u8,
    /// Structure fields
    pub fields: Vec<PackStreamValue>,
}

impl PackStreamStructure {
    /// Create a new structure.
    pub fn new(tag: u8, fields: Vec<PackStreamValue>) -> Self {
        Self { tag, fields }
    }

    /// Field at `index`, or `InvalidStructure` naming `what`.
    pub fn field(&self, index: usize, what: &str) -> Result<&PackStreamValue, PackStreamError> {
        self.fields.get(index).ok_or_else(|| {
            PackStreamError::InvalidStructure(format!(
                "structure 0x{:02X} is missing field {} ({})",
                self.tag, index, what
            ))
        })
    }
}

impl PackStreamValue {
    /// Check if this value is null.
    pub fn is_null(&self) -> bool {
        matches!(self, PackStreamValue::Null)
    }

    /// Boolean view.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            PackStreamValue::Boolean(b) => Some(*b),
            _ => None,
        }
    }

    /// Integer view.
    pub fn as_int(&self) -> Option<i64> {
        match self {
            PackStreamValue::Integer(i) => Some(*i),
            _ => None,
        }
    }

    /// Float view; integers widen.
    pub fn as_float(&self) -> Option<f64> {
        match self {
            PackStreamValue::Float(f) => Some(*f),
            PackStreamValue::Integer(i) => Some(*i as f64),
            _ => None,
        }
    }

    /// String view.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            PackStreamValue::String(s) => Some(s),
            _ => None,
        }
    }

    /// List view.
    pub fn as_list(&self) -> Option<&[PackStreamValue]> {
        match self {
            PackStreamValue::List(l) => Some(l),
            _ => None,
        }
    }

    /// Map view.
    pub fn as_map(&self) -> Option<&HashMap<String, PackStreamValue>> {
        match self {
            PackStreamValue::Map(m) => Some(m),
            _ => None,
        }
    }

    /// Structure view.
    pub fn as_structure(&self) -> Option<&PackStreamStructure> {
        match self {
            PackStreamValue::Structure(s) => Some(s),
            _ => None,
        }
    }

    /// Collect a list of strings, skipping non-string items.
    pub fn string_list(&self) -> Option<Vec<String>> {
        self.as_list()
            .map(|items| items.iter().filter_map(|v| v.as_str().map(String::from)).collect())
    }

    /// Type name for diagnostics.
    pub fn type_name(&self) -> &'static str {
        match self {
            PackStreamValue::Null => "Null",
            PackStreamValue::Boolean(_) => "Boolean",
            PackStreamValue::Integer(_) => "Integer",
            PackStreamValue::Float(_) => "Float",
            PackStreamValue::Bytes(_) => "Bytes",
            PackStreamValue::String(_) => "String",
            PackStreamValue::List(_) => "List",
            PackStreamValue::Map(_) => "Map",
            PackStreamValue::Structure(_) => "Structure",
        }
    }
}

impl From<bool> for PackStreamValue {
    fn from(v: bool) -> Self {
        PackStreamValue::Boolean(v)
    }
}

impl From<i64> for PackStreamValue {
    fn from(v: i64) -> Self {
        PackStreamValue::Integer(v)
    }
}

impl From<f64> for PackStreamValue {
    fn from(v: f64) -> Self {
        PackStreamValue::Float(v)
    }
}

impl From<&str> for PackStreamValue {
    fn from(v: &str) -> Self {
        PackStreamValue::String(v.to_string())
    }
}

impl From<String> for PackStreamValue {
    fn from(v: String) -> Self {
        PackStreamValue::String(v)
    }
}

impl From<Vec<String>> for PackStreamValue {
    fn from(v: Vec<String>) -> Self {
        PackStreamValue::List(v.into_iter().map(PackStreamValue::String).collect())
    }
}

impl From<HashMap<String, PackStreamValue>> for PackStreamValue {
    fn from(v: HashMap<String, PackStreamValue>) -> Self {
        PackStreamValue::Map(v)
    }
}

/// PackStream errors.
#[derive(Debug, Clone, PartialEq)]
pub enum PackStreamError {
    /// Input ended in the middle of a value
    UnexpectedEof,
    /// Unknown marker byte
    UnknownMarker(u8),
    /// Invalid UTF-8 in string
    InvalidUtf8(String),
    /// Map key was not a string
    InvalidMapKey,
    /// Value too large to encode
    ValueTooLarge(&'static str, usize),
    /// Structure shape did not match its tag
    InvalidStructure(String),
}

impl fmt::Display for PackStreamError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PackStreamError::UnexpectedEof => write!(f, "Unexpected end of PackStream data"),
            PackStreamError::UnknownMarker(m) => write!(f, "Unknown PackStream marker: 0x{:02X}", m),
            PackStreamError::InvalidUtf8(e) => write!(f, "Invalid UTF-8 in string: {}", e),
            PackStreamError::InvalidMapKey => write!(f, "Map keys must be strings"),
            PackStreamError::ValueTooLarge(t, s) => write!(f, "{} too large: {}", t, s),
            PackStreamError::InvalidStructure(msg) => write!(f, "Invalid structure: {}", msg),
        }
    }
}

impl std::error::Error for PackStreamError {}
