//! Server-side version negotiation.
//!
//! The driver never answers handshakes itself; the negotiator backs the
//! in-process Bolt server used by the driver's tests.

use super::{BoltVersion, HandshakeError, VersionProposal, BOLT_MAGIC, HANDSHAKE_SIZE};

/// Pick the first client proposal that covers a version the server speaks,
/// preferring the newest such version.
pub fn negotiate(preamble: &[u8], server_versions: &[BoltVersion]) -> Result<BoltVersion, HandshakeError> {
    if preamble.len() < HANDSHAKE_SIZE {
        return Err(HandshakeError::Incomplete(preamble.len()));
    }
    if preamble[..4] != BOLT_MAGIC {
        return Err(HandshakeError::InvalidMagic([
            preamble[0],
            preamble[1],
            preamble[2],
            preamble[3],
        ]));
    }

    for chunk in preamble[4..HANDSHAKE_SIZE].chunks_exact(4) {
        let bytes = [chunk[0], chunk[1], chunk[2], chunk[3]];
        if bytes == [0; 4] {
            continue;
        }
        let best = server_versions
            .iter()
            .copied()
            .filter(|v| VersionProposal::covers(bytes, *v))
            .max();
        if let Some(version) = best {
            return Ok(version);
        }
    }

    Err(HandshakeError::NoCommonVersion)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bolt::handshake::client_preamble;

    const CLIENT: [VersionProposal; 3] = [
        VersionProposal::exact(BoltVersion::V5_0),
        VersionProposal::with_range(BoltVersion::V4_4, 1),
        VersionProposal::exact(BoltVersion::V3_0),
    ];

    #[test]
    fn test_picks_first_matching_proposal() {
        let preamble = client_preamble(&CLIENT);
        assert_eq!(negotiate(&preamble, &BoltVersion::ALL), Ok(BoltVersion::V5_0));
        assert_eq!(
            negotiate(&preamble, &[BoltVersion::V4_3, BoltVersion::V4_0]),
            Ok(BoltVersion::V4_3)
        );
        assert_eq!(negotiate(&preamble, &[BoltVersion::V3_0]), Ok(BoltVersion::V3_0));
    }

    #[test]
    fn test_no_common_version() {
        let preamble = client_preamble(&CLIENT);
        assert_eq!(
            negotiate(&preamble, &[BoltVersion::V4_1]),
            Err(HandshakeError::NoCommonVersion)
        );
    }

    #[test]
    fn test_bad_preamble() {
        let mut preamble = client_preamble(&CLIENT);
        preamble[0] = 0;
        assert!(matches!(negotiate(&preamble, &BoltVersion::ALL), Err(HandshakeError::InvalidMagic(_))));
        assert_eq!(negotiate(&preamble[..8], &BoltVersion::ALL), Err(HandshakeError::Incomplete(8)));
    }
}
