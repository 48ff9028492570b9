//! Bolt protocol client implementation for the driver.
//!
//! ```text
//! BoltClient (connection state machine, stream bookkeeping)
//!   └── BoltConnection (transport + framing + handshake)
//!         └── BoltResponseCodec
//! ```
//!
//! `BoltClient` implements [`Connection`](crate::driver::connection::Connection);
//! everything above it (pool, router, executor) only talks to that trait or
//! to `BoltClient` directly.

pub mod client;
pub mod connection;

use std::collections::HashMap;

pub use client::{BoltClient, ClientOptions};
pub use connection::BoltConnection;

use crate::bolt::{BoltVersion, Metadata, PackStreamValue, VersionProposal};

use super::driver::AuthToken;

/// Client user agent string
pub const CLIENT_USER_AGENT: &str = concat!("zeta4g-driver-core/", env!("CARGO_PKG_VERSION"));

/// Handshake proposals, newest first.
///
/// Covers 5.0, 4.4 down to 4.3, 4.2 down to 4.0, and 3.0.
pub const SUPPORTED_VERSIONS: [VersionProposal; 4] = [
    VersionProposal::exact(BoltVersion::V5_0),
    VersionProposal::with_range(BoltVersion::V4_4, 1),
    VersionProposal::with_range(BoltVersion::V4_2, 2),
    VersionProposal::exact(BoltVersion::V3_0),
];

/// Convert an auth token into the entries HELLO carries.
pub fn auth_entries(auth: &AuthToken) -> Metadata {
    let mut entries = HashMap::new();
    entries.insert("scheme".to_string(), PackStreamValue::from(auth.scheme()));
    match auth {
        AuthToken::None => {}
        AuthToken::Basic {
            username,
            password,
            realm,
        } => {
            entries.insert("principal".into(), username.as_str().into());
            entries.insert("credentials".into(), password.as_str().into());
            if let Some(realm) = realm {
                entries.insert("realm".into(), realm.as_str().into());
            }
        }
        AuthToken::Bearer { token } => {
            entries.insert("credentials".into(), token.as_str().into());
        }
        AuthToken::Custom {
            principal,
            credentials,
            realm,
            parameters,
            ..
        } => {
            entries.insert("principal".into(), principal.as_str().into());
            entries.insert("credentials".into(), credentials.as_str().into());
            if !realm.is_empty() {
                entries.insert("realm".into(), realm.as_str().into());
            }
            if let Some(parameters) = parameters {
                let parameters = parameters
                    .iter()
                    .map(|(k, v)| (k.clone(), PackStreamValue::from(v.as_str())))
                    .collect();
                entries.insert("parameters".into(), PackStreamValue::Map(parameters));
            }
        }
    }
    entries
}

/// Routing context as a PackStream map.
pub fn routing_entries(context: &HashMap<String, String>) -> Metadata {
    context
        .iter()
        .map(|(k, v)| (k.clone(), PackStreamValue::from(v.as_str())))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_basic_auth_entries() {
        let entries = auth_entries(&AuthToken::basic("neo4j", "secret"));
        assert_eq!(entries.get("scheme").and_then(|v| v.as_str()), Some("basic"));
        assert_eq!(entries.get("principal").and_then(|v| v.as_str()), Some("neo4j"));
        assert_eq!(entries.get("credentials").and_then(|v| v.as_str()), Some("secret"));
        assert!(!entries.contains_key("realm"));
    }

    #[test]
    fn test_none_auth_entries() {
        let entries = auth_entries(&AuthToken::None);
        assert_eq!(entries.len(), 1);
        assert_eq!(entries.get("scheme").and_then(|v| v.as_str()), Some("none"));
    }

    #[test]
    fn test_bearer_auth_entries() {
        let entries = auth_entries(&AuthToken::bearer("tkn"));
        assert_eq!(entries.get("scheme").and_then(|v| v.as_str()), Some("bearer"));
        assert_eq!(entries.get("credentials").and_then(|v| v.as_str()), Some("tkn"));
    }

    #[test]
    fn test_supported_versions_newest_first() {
        assert_eq!(SUPPORTED_VERSIONS[0].version, BoltVersion::V5_0);
        assert_eq!(SUPPORTED_VERSIONS[3].version, BoltVersion::V3_0);
    }
}
