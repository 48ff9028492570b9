//! Bolt protocol version definitions.

use std::fmt;

/// Bolt protocol versions understood by the driver, oldest first.
///
/// The derived ordering follows declaration order, so `V4_3 < V5_0`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum BoltVersion {
    /// Bolt 3.0 - explicit transactions, no multi-database
    V3_0,
    /// Bolt 4.0 - multi-database, PULL n / qid
    V4_0,
    /// Bolt 4.1 - routing context in HELLO
    V4_1,
    /// Bolt 4.2
    V4_2,
    /// Bolt 4.3 - ROUTE message
    V4_3,
    /// Bolt 4.4 - ROUTE extra map
    V4_4,
    /// Bolt 5.0 - element ids
    V5_0,
}

impl BoltVersion {
    /// All versions, newest first.
    pub const ALL: [BoltVersion; 7] = [
        BoltVersion::V5_0,
        BoltVersion::V4_4,
        BoltVersion::V4_3,
        BoltVersion::V4_2,
        BoltVersion::V4_1,
        BoltVersion::V4_0,
        BoltVersion::V3_0,
    ];

    /// Look up a version by number.
    pub fn from_parts(major: u8, minor: u8) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|v| v.major() == major && v.minor() == minor)
    }

    /// Major version number.
    pub fn major(self) -> u8 {
        match self {
            BoltVersion::V3_0 => 3,
            BoltVersion::V4_0
            | BoltVersion::V4_1
            | BoltVersion::V4_2
            | BoltVersion::V4_3
            | BoltVersion::V4_4 => 4,
            BoltVersion::V5_0 => 5,
        }
    }

    /// Minor version number.
    pub fn minor(self) -> u8 {
        match self {
            BoltVersion::V3_0 | BoltVersion::V4_0 | BoltVersion::V5_0 => 0,
            BoltVersion::V4_1 => 1,
            BoltVersion::V4_2 => 2,
            BoltVersion::V4_3 => 3,
            BoltVersion::V4_4 => 4,
        }
    }

    /// Agreed-version reply bytes: `[0, 0, minor, major]`.
    pub fn to_bytes(self) -> [u8; 4] {
        [0, 0, self.minor(), self.major()]
    }

    /// Parse the server's reply; `None` for zeros or unknown versions.
    pub fn from_bytes(bytes: [u8; 4]) -> Option<Self> {
        Self::from_parts(bytes[3], bytes[2])
    }

    /// Sessions can target a named database.
    pub fn supports_multi_database(self) -> bool {
        self >= BoltVersion::V4_0
    }

    /// PULL/DISCARD accept `n` and `qid`.
    pub fn supports_qid_and_pull_n(self) -> bool {
        self >= BoltVersion::V4_0
    }

    /// Routing tables come from the ROUTE message rather than a procedure.
    pub fn supports_route_message(self) -> bool {
        self >= BoltVersion::V4_3
    }

    /// ROUTE carries the database inside an extra map.
    pub fn route_uses_extra_map(self) -> bool {
        self >= BoltVersion::V4_4
    }
}

impl fmt::Display for BoltVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.major(), self.minor())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reply_bytes() {
        assert_eq!(BoltVersion::V4_3.to_bytes(), [0, 0, 3, 4]);
        assert_eq!(BoltVersion::from_bytes([0, 0, 4, 4]), Some(BoltVersion::V4_4));
        assert_eq!(BoltVersion::from_bytes([0, 0, 0, 0]), None);
        assert_eq!(BoltVersion::from_bytes([0, 0, 9, 4]), None);
    }

    #[test]
    fn test_capabilities() {
        assert!(!BoltVersion::V3_0.supports_multi_database());
        assert!(BoltVersion::V4_0.supports_multi_database());
        assert!(!BoltVersion::V4_2.supports_route_message());
        assert!(BoltVersion::V4_3.supports_route_message());
        assert!(!BoltVersion::V4_3.route_uses_extra_map());
        assert!(BoltVersion::V5_0.route_uses_extra_map());
    }

    #[test]
    fn test_display_and_order() {
        assert_eq!(BoltVersion::V4_4.to_string(), "4.4");
        assert!(BoltVersion::V3_0 < BoltVersion::V4_0);
        assert!(BoltVersion::V5_0 > BoltVersion::V4_4);
    }
}
