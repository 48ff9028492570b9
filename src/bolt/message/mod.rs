//! Bolt protocol message types.
//!
//! Every Bolt message is a PackStream structure whose tag identifies the
//! message. Requests flow client → server, responses server → client.

pub mod request;
pub mod response;

pub use request::*;
pub use response::*;

use std::collections::HashMap;

use super::packstream::{PackStreamError, PackStreamStructure, PackStreamValue};

/// Bolt message tags.
pub mod tag {
    /// HELLO
    pub const HELLO: u8 = 0x01;
    /// GOODBYE
    pub const GOODBYE: u8 = 0x02;
    /// RESET
    pub const RESET: u8 = 0x0F;
    /// RUN
    pub const RUN: u8 = 0x10;
    /// BEGIN
    pub const BEGIN: u8 = 0x11;
    /// COMMIT
    pub const COMMIT: u8 = 0x12;
    /// ROLLBACK
    pub const ROLLBACK: u8 = 0x13;
    /// DISCARD (DISCARD_ALL before 4.0)
    pub const DISCARD: u8 = 0x2F;
    /// PULL (PULL_ALL before 4.0)
    pub const PULL: u8 = 0x3F;
    /// ROUTE, Bolt 4.3+
    pub const ROUTE: u8 = 0x66;

    /// SUCCESS
    pub const SUCCESS: u8 = 0x70;
    /// RECORD
    pub const RECORD: u8 = 0x71;
    /// IGNORED
    pub const IGNORED: u8 = 0x7E;
    /// FAILURE
    pub const FAILURE: u8 = 0x7F;
}

/// Metadata map carried by most messages.
pub type Metadata = HashMap<String, PackStreamValue>;

/// Map at `index`, empty when the field is absent.
pub(crate) fn map_field(s: &PackStreamStructure, index: usize) -> Result<Metadata, PackStreamError> {
    match s.fields.get(index) {
        None | Some(PackStreamValue::Null) => Ok(HashMap::new()),
        Some(PackStreamValue::Map(m)) => Ok(m.clone()),
        Some(other) => Err(PackStreamError::InvalidStructure(format!(
            "expected map in field {} of 0x{:02X}, got {}",
            index,
            s.tag,
            other.type_name()
        ))),
    }
}

/// Checks that a structure carries the expected tag.
pub(crate) fn expect_tag(s: &PackStreamStructure, expected: u8, name: &str) -> Result<(), PackStreamError> {
    if s.tag == expected {
        Ok(())
    } else {
        Err(PackStreamError::InvalidStructure(format!(
            "expected {} (0x{:02X}), got 0x{:02X}",
            name, expected, s.tag
        )))
    }
}
