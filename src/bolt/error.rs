//! Bolt protocol error types.

use std::fmt;
use std::io;

use super::packstream::PackStreamError;

/// Result type for Bolt operations.
pub type BoltResult<T> = Result<T, BoltError>;

/// Bolt protocol errors.
///
/// Everything here is a transport-level failure: the connection that
/// produced it can no longer be trusted.
#[derive(Debug)]
pub enum BoltError {
    /// I/O error
    Io(io::Error),

    /// Handshake error
    Handshake(HandshakeError),

    /// PackStream serialization error
    PackStream(PackStreamError),

    /// Protocol error (unexpected message, malformed frame, etc.)
    Protocol(String),

    /// Message too large
    MessageTooLarge {
        /// Encoded size in bytes
        size: usize,
        /// Largest size the codec accepts
        max: usize,
    },

    /// Peer closed the connection
    ConnectionClosed,
}

impl fmt::Display for BoltError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BoltError::Io(e) => write!(f, "I/O error: {}", e),
            BoltError::Handshake(e) => write!(f, "Handshake error: {}", e),
            BoltError::PackStream(e) => write!(f, "PackStream error: {}", e),
            BoltError::Protocol(msg) => write!(f, "Protocol error: {}", msg),
            BoltError::MessageTooLarge { size, max } => {
                write!(f, "Message too large: {} bytes (max: {})", size, max)
            }
            BoltError::ConnectionClosed => write!(f, "Connection closed"),
        }
    }
}

impl BoltError {
    /// Shorthand for a protocol error.
    pub fn protocol(msg: impl Into<String>) -> Self {
        BoltError::Protocol(msg.into())
    }
}

impl std::error::Error for BoltError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            BoltError::Io(e) => Some(e),
            BoltError::Handshake(e) => Some(e),
            BoltError::PackStream(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for BoltError {
    fn from(err: io::Error) -> Self {
        if err.kind() == io::ErrorKind::UnexpectedEof {
            BoltError::ConnectionClosed
        } else {
            BoltError::Io(err)
        }
    }
}

impl From<HandshakeError> for BoltError {
    fn from(err: HandshakeError) -> Self {
        BoltError::Handshake(err)
    }
}

impl From<PackStreamError> for BoltError {
    fn from(err: PackStreamError) -> Self {
        BoltError::PackStream(err)
    }
}

/// Handshake-specific errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandshakeError {
    /// Invalid magic number received
    InvalidMagic([u8; 4]),

    /// Fewer than 20 preamble bytes
    Incomplete(usize),

    /// Server answered with zeros or no proposal matched
    NoCommonVersion,

    /// Server picked a version the driver never proposed
    UnknownVersion([u8; 4]),
}

impl fmt::Display for HandshakeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HandshakeError::InvalidMagic(received) => {
                write!(f, "Invalid magic number: received {:02X?}", received)
            }
            HandshakeError::Incomplete(n) => {
                write!(f, "Incomplete handshake: {} bytes", n)
            }
            HandshakeError::NoCommonVersion => {
                write!(f, "No compatible protocol version found")
            }
            HandshakeError::UnknownVersion(bytes) => {
                write!(f, "Server selected unknown version {:02X?}", bytes)
            }
        }
    }
}

impl std::error::Error for HandshakeError {}

/// Server status codes the driver inspects.
///
/// Codes follow `Neo.<Classification>.<Category>.<Title>`.
pub struct BoltErrorCode;

impl BoltErrorCode {
    /// Credentials were rejected.
    pub const AUTHENTICATION_FAILED: &'static str = "Neo.ClientError.Security.AuthenticationFailed";
    /// The client is not authorized.
    pub const UNAUTHORIZED: &'static str = "Neo.ClientError.Security.Unauthorized";
    /// The query does not parse.
    pub const SYNTAX_ERROR: &'static str = "Neo.ClientError.Statement.SyntaxError";
    /// Arithmetic failure while evaluating the query.
    pub const ARITHMETIC_ERROR: &'static str = "Neo.ClientError.Statement.ArithmeticError";
    /// A schema constraint was violated.
    pub const CONSTRAINT_VIOLATION: &'static str = "Neo.ClientError.Schema.ConstraintValidationFailed";
    /// A write reached a cluster member that is not the leader.
    pub const NOT_A_LEADER: &'static str = "Neo.ClientError.Cluster.NotALeader";
    /// A write reached a read-only database.
    pub const FORBIDDEN_ON_READ_ONLY: &'static str =
        "Neo.ClientError.General.ForbiddenOnReadOnlyDatabase";
    /// The named database does not exist.
    pub const DATABASE_NOT_FOUND: &'static str = "Neo.ClientError.Database.DatabaseNotFound";
    /// The request is not valid in the session's current state.
    pub const REQUEST_INVALID: &'static str = "Neo.ClientError.Request.Invalid";

    /// Unclassified database failure.
    pub const GENERAL_ERROR: &'static str = "Neo.DatabaseError.General.UnknownError";

    /// The transaction deadlocked; retrying may succeed.
    pub const DEADLOCK_DETECTED: &'static str = "Neo.TransientError.Transaction.DeadlockDetected";
    /// The database is temporarily unavailable.
    pub const DATABASE_UNAVAILABLE: &'static str = "Neo.TransientError.General.DatabaseUnavailable";
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_handshake_error_display() {
        let err = HandshakeError::InvalidMagic([0x00, 0x00, 0x00, 0x00]);
        assert!(err.to_string().contains("Invalid magic"));
        assert!(HandshakeError::NoCommonVersion.to_string().contains("No compatible"));
    }

    #[test]
    fn test_eof_maps_to_closed() {
        let eof = io::Error::new(io::ErrorKind::UnexpectedEof, "eof");
        assert!(matches!(BoltError::from(eof), BoltError::ConnectionClosed));

        let refused = io::Error::new(io::ErrorKind::ConnectionRefused, "refused");
        assert!(matches!(BoltError::from(refused), BoltError::Io(_)));
    }

    #[test]
    fn test_bolt_error_codes() {
        assert!(BoltErrorCode::SYNTAX_ERROR.starts_with("Neo.ClientError"));
        assert!(BoltErrorCode::DEADLOCK_DETECTED.starts_with("Neo.TransientError"));
        assert!(BoltErrorCode::GENERAL_ERROR.starts_with("Neo.DatabaseError"));
    }
}
