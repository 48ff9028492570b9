//! Bolt protocol handshake implementation.
//!
//! The Bolt handshake consists of:
//! 1. Client sends the 4-byte magic number (0x6060B017)
//! 2. Client sends 4 x 4-byte version proposals (highest first)
//! 3. Server responds with the 4-byte agreed version, or zeros if none
//!
//! A proposal is laid out as `[0, range, minor, major]`: it covers
//! `major.minor` down to `major.(minor - range)`.

mod negotiation;
mod version;

pub use negotiation::negotiate;
pub use version::BoltVersion;

pub use super::error::HandshakeError;

/// Bolt protocol magic number: 0x6060B017
pub const BOLT_MAGIC: [u8; 4] = [0x60, 0x60, 0xB0, 0x17];

/// Size of the complete handshake message from client (magic + 4 versions)
pub const HANDSHAKE_SIZE: usize = 20;

/// Size of server response (negotiated version)
pub const HANDSHAKE_RESPONSE_SIZE: usize = 4;

/// One version proposal: the newest version plus how many older minors of
/// the same major are also acceptable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VersionProposal {
    /// Newest version in the range
    pub version: BoltVersion,
    /// Number of preceding minor versions also accepted
    pub range: u8,
}

impl VersionProposal {
    /// Proposal for exactly one version.
    pub const fn exact(version: BoltVersion) -> Self {
        Self { version, range: 0 }
    }

    /// Proposal for `version` and the `range` minors below it.
    pub const fn with_range(version: BoltVersion, range: u8) -> Self {
        Self { version, range }
    }

    /// Wire form.
    pub fn to_bytes(self) -> [u8; 4] {
        [0, self.range, self.version.minor(), self.version.major()]
    }

    /// Whether this proposal covers `major.minor`.
    pub fn covers(bytes: [u8; 4], version: BoltVersion) -> bool {
        let [_, range, minor, major] = bytes;
        major == version.major()
            && version.minor() <= minor
            && version.minor() >= minor.saturating_sub(range)
    }
}

/// Build the 20-byte client preamble. Missing proposals are zero-filled.
pub fn client_preamble(proposals: &[VersionProposal]) -> [u8; HANDSHAKE_SIZE] {
    let mut buf = [0u8; HANDSHAKE_SIZE];
    buf[..4].copy_from_slice(&BOLT_MAGIC);
    for (i, proposal) in proposals.iter().take(4).enumerate() {
        let offset = 4 + i * 4;
        buf[offset..offset + 4].copy_from_slice(&proposal.to_bytes());
    }
    buf
}
