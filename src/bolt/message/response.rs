//! Bolt protocol response messages.

use super::{expect_tag, map_field, tag, Metadata};
use crate::bolt::packstream::{PackStreamError, PackStreamStructure, PackStreamValue};

/// All Bolt response messages.
#[derive(Debug, Clone, PartialEq)]
pub enum BoltResponse {
    /// SUCCESS - request completed
    Success(SuccessMessage),
    /// RECORD - one result row
    Record(RecordMessage),
    /// FAILURE - request failed; the server ignores everything until RESET
    Failure(FailureMessage),
    /// IGNORED - request skipped because of an earlier failure
    Ignored,
}

impl BoltResponse {
    /// Message name for logging.
    pub fn name(&self) -> &'static str {
        match self {
            BoltResponse::Success(_) => "SUCCESS",
            BoltResponse::Record(_) => "RECORD",
            BoltResponse::Failure(_) => "FAILURE",
            BoltResponse::Ignored => "IGNORED",
        }
    }

    /// Convert to a PackStream structure.
    pub fn to_structure(&self) -> PackStreamStructure {
        match self {
            BoltResponse::Success(msg) => {
                PackStreamStructure::new(tag::SUCCESS, vec![PackStreamValue::Map(msg.metadata.clone())])
            }
            BoltResponse::Record(msg) => {
                PackStreamStructure::new(tag::RECORD, vec![PackStreamValue::List(msg.fields.clone())])
            }
            BoltResponse::Failure(msg) => {
                let mut metadata = Metadata::new();
                metadata.insert("code".into(), msg.code.clone().into());
                metadata.insert("message".into(), msg.message.clone().into());
                PackStreamStructure::new(tag::FAILURE, vec![PackStreamValue::Map(metadata)])
            }
            BoltResponse::Ignored => PackStreamStructure::new(tag::IGNORED, vec![]),
        }
    }

    /// Parse from a PackStream structure.
    pub fn from_structure(s: &PackStreamStructure) -> Result<Self, PackStreamError> {
        let response = match s.tag {
            tag::SUCCESS => BoltResponse::Success(SuccessMessage {
                metadata: map_field(s, 0)?,
            }),
            tag::RECORD => BoltResponse::Record(RecordMessage::from_structure(s)?),
            tag::FAILURE => BoltResponse::Failure(FailureMessage::from_metadata(&map_field(s, 0)?)?),
            tag::IGNORED => BoltResponse::Ignored,
            other => {
                return Err(PackStreamError::InvalidStructure(format!(
                    "unknown response message tag: 0x{:02X}",
                    other
                )))
            }
        };
        Ok(response)
    }
}

/// SUCCESS message.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SuccessMessage {
    /// Response metadata
    pub metadata: Metadata,
}

impl SuccessMessage {
    /// Create an empty SUCCESS.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a metadata entry (builder style).
    pub fn with(mut self, key: &str, value: impl Into<PackStreamValue>) -> Self {
        self.metadata.insert(key.to_string(), value.into());
        self
    }

    /// Raw metadata entry.
    pub fn get(&self, key: &str) -> Option<&PackStreamValue> {
        self.metadata.get(key)
    }

    /// Server agent (HELLO).
    pub fn server(&self) -> Option<&str> {
        self.get("server").and_then(|v| v.as_str())
    }

    /// Connection id (HELLO).
    pub fn connection_id(&self) -> Option<&str> {
        self.get("connection_id").and_then(|v| v.as_str())
    }

    /// Result keys (RUN).
    pub fn fields(&self) -> Option<Vec<String>> {
        self.get("fields").and_then(|v| v.string_list())
    }

    /// Query id inside an explicit transaction (RUN, 4.0+).
    pub fn qid(&self) -> Option<i64> {
        self.get("qid").and_then(|v| v.as_int())
    }

    /// Milliseconds until the first record was available (RUN).
    pub fn t_first(&self) -> Option<i64> {
        self.get("t_first").and_then(|v| v.as_int())
    }

    /// Milliseconds until the last record was consumed (PULL/DISCARD).
    pub fn t_last(&self) -> Option<i64> {
        self.get("t_last").and_then(|v| v.as_int())
    }

    /// More records remain on the server (PULL/DISCARD).
    pub fn has_more(&self) -> bool {
        self.get("has_more").and_then(|v| v.as_bool()).unwrap_or(false)
    }

    /// Bookmark (final PULL of auto-commit, COMMIT).
    pub fn bookmark(&self) -> Option<&str> {
        self.get("bookmark").and_then(|v| v.as_str())
    }

    /// Database the query ran against.
    pub fn db(&self) -> Option<&str> {
        self.get("db").and_then(|v| v.as_str())
    }

    /// Query type: `r`, `w`, `rw` or `s`.
    pub fn query_type(&self) -> Option<&str> {
        self.get("type").and_then(|v| v.as_str())
    }

    /// Update statistics.
    pub fn stats(&self) -> Option<&Metadata> {
        self.get("stats").and_then(|v| v.as_map())
    }

    /// Routing table (ROUTE).
    pub fn routing_table(&self) -> Option<&Metadata> {
        self.get("rt").and_then(|v| v.as_map())
    }
}

/// RECORD message.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct RecordMessage {
    /// Field values
    pub fields: Vec<PackStreamValue>,
}

impl RecordMessage {
    /// Create a new RECORD.
    pub fn new(fields: Vec<PackStreamValue>) -> Self {
        Self { fields }
    }

    fn from_structure(s: &PackStreamStructure) -> Result<Self, PackStreamError> {
        expect_tag(s, tag::RECORD, "RECORD")?;
        match s.fields.first() {
            None => Ok(Self::default()),
            Some(PackStreamValue::List(list)) => Ok(Self::new(list.clone())),
            Some(_) => Err(PackStreamError::InvalidStructure("RECORD fields must be a list".into())),
        }
    }
}

/// FAILURE message.
#[derive(Debug, Clone, PartialEq)]
pub struct FailureMessage {
    /// Status code, `Neo.<Classification>.<Category>.<Title>`
    pub code: String,
    /// Human readable message
    pub message: String,
}

impl FailureMessage {
    /// Create a new FAILURE.
    pub fn new(code: &str, message: &str) -> Self {
        Self {
            code: code.to_string(),
            message: message.to_string(),
        }
    }

    fn from_metadata(metadata: &Metadata) -> Result<Self, PackStreamError> {
        let code = metadata
            .get("code")
            .or_else(|| metadata.get("neo4j_code"))
            .and_then(|v| v.as_str())
            .ok_or_else(|| PackStreamError::InvalidStructure("FAILURE requires a code".into()))?;
        let message = metadata.get("message").and_then(|v| v.as_str()).unwrap_or_default();
        Ok(Self::new(code, message))
    }
}

impl std::fmt::Display for FailureMessage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}
