//! # Bolt Protocol Implementation
//!
//! Wire-level pieces the driver speaks to Bolt-compatible graph databases.
//!
//! - **PackStream** - Binary serialization format for all data types
//! - **Message Types** - Request/response message handling
//! - **Handshake** - Protocol version negotiation
//! - **Codec** - Async message framing for Tokio
//!
//! ## Protocol Versions
//!
//! Bolt 3.0, 4.0 through 4.4, and 5.0. Capabilities that differ between
//! versions (named databases, `PULL n`, the ROUTE message) are queried on
//! [`BoltVersion`].
//!
//! ## Note
//!
//! Most users should use the high-level [`crate::driver`] module instead of
//! interacting with the Bolt protocol directly.

pub mod codec;
pub mod error;
pub mod handshake;
pub mod message;
pub mod packstream;

pub use codec::{BoltCodec, BoltRequestCodec, BoltResponseCodec};
pub use error::{BoltError, BoltErrorCode, BoltResult, HandshakeError};
pub use handshake::{BoltVersion, VersionProposal, BOLT_MAGIC, HANDSHAKE_RESPONSE_SIZE, HANDSHAKE_SIZE};
pub use message::{
    AccessMode, BeginMessage, BoltRequest, BoltResponse, DiscardMessage, FailureMessage,
    HelloMessage, Metadata, PullMessage, RecordMessage, RouteMessage, RunMessage, SuccessMessage,
};
pub use packstream::{PackStreamError, PackStreamStructure, PackStreamValue};
