//! Bolt protocol request messages.

use std::collections::HashMap;

use super::{expect_tag, map_field, tag, Metadata};
use crate::bolt::packstream::{PackStreamError, PackStreamStructure, PackStreamValue};

/// Access mode for transactions and routing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum AccessMode {
    /// Read-write access (default)
    #[default]
    Write,
    /// Read-only access
    Read,
}

impl AccessMode {
    /// Wire form used in the `mode` metadata entry.
    pub fn as_str(&self) -> &'static str {
        match self {
            AccessMode::Read => "r",
            AccessMode::Write => "w",
        }
    }

    /// Parse the wire form; anything other than `r` is a write.
    pub fn from_wire(s: &str) -> Self {
        if s.eq_ignore_ascii_case("r") {
            AccessMode::Read
        } else {
            AccessMode::Write
        }
    }
}

/// All Bolt request messages.
#[derive(Debug, Clone, PartialEq)]
pub enum BoltRequest {
    /// HELLO - initialize and authenticate
    Hello(HelloMessage),
    /// GOODBYE - close gracefully
    Goodbye,
    /// RESET - return the connection to a clean state
    Reset,
    /// RUN - start a query
    Run(RunMessage),
    /// PULL - fetch records
    Pull(PullMessage),
    /// DISCARD - drop records
    Discard(DiscardMessage),
    /// BEGIN - open an explicit transaction
    Begin(BeginMessage),
    /// COMMIT
    Commit,
    /// ROLLBACK
    Rollback,
    /// ROUTE - fetch a routing table (4.3+)
    Route(RouteMessage),
}

impl BoltRequest {
    /// Message name for logging.
    pub fn name(&self) -> &'static str {
        match self {
            BoltRequest::Hello(_) => "HELLO",
            BoltRequest::Goodbye => "GOODBYE",
            BoltRequest::Reset => "RESET",
            BoltRequest::Run(_) => "RUN",
            BoltRequest::Pull(_) => "PULL",
            BoltRequest::Discard(_) => "DISCARD",
            BoltRequest::Begin(_) => "BEGIN",
            BoltRequest::Commit => "COMMIT",
            BoltRequest::Rollback => "ROLLBACK",
            BoltRequest::Route(_) => "ROUTE",
        }
    }

    /// Convert to a PackStream structure.
    pub fn to_structure(&self) -> PackStreamStructure {
        match self {
            BoltRequest::Hello(msg) => {
                PackStreamStructure::new(tag::HELLO, vec![PackStreamValue::Map(msg.to_extra())])
            }
            BoltRequest::Goodbye => PackStreamStructure::new(tag::GOODBYE, vec![]),
            BoltRequest::Reset => PackStreamStructure::new(tag::RESET, vec![]),
            BoltRequest::Run(msg) => PackStreamStructure::new(
                tag::RUN,
                vec![
                    PackStreamValue::String(msg.query.clone()),
                    PackStreamValue::Map(msg.parameters.clone()),
                    PackStreamValue::Map(msg.extra.clone()),
                ],
            ),
            BoltRequest::Pull(msg) => PackStreamStructure::new(tag::PULL, msg.0.to_fields()),
            BoltRequest::Discard(msg) => PackStreamStructure::new(tag::DISCARD, msg.0.to_fields()),
            BoltRequest::Begin(msg) => {
                PackStreamStructure::new(tag::BEGIN, vec![PackStreamValue::Map(msg.to_extra())])
            }
            BoltRequest::Commit => PackStreamStructure::new(tag::COMMIT, vec![]),
            BoltRequest::Rollback => PackStreamStructure::new(tag::ROLLBACK, vec![]),
            BoltRequest::Route(msg) => msg.to_structure(),
        }
    }

    /// Parse from a PackStream structure (server side).
    pub fn from_structure(s: &PackStreamStructure) -> Result<Self, PackStreamError> {
        let request = match s.tag {
            tag::HELLO => BoltRequest::Hello(HelloMessage::from_extra(map_field(s, 0)?)),
            tag::GOODBYE => BoltRequest::Goodbye,
            tag::RESET => BoltRequest::Reset,
            tag::RUN => BoltRequest::Run(RunMessage::from_structure(s)?),
            tag::PULL => BoltRequest::Pull(PullMessage(StreamControl::from_structure(s)?)),
            tag::DISCARD => BoltRequest::Discard(DiscardMessage(StreamControl::from_structure(s)?)),
            tag::BEGIN => BoltRequest::Begin(BeginMessage::from_extra(&map_field(s, 0)?)),
            tag::COMMIT => BoltRequest::Commit,
            tag::ROLLBACK => BoltRequest::Rollback,
            tag::ROUTE => BoltRequest::Route(RouteMessage::from_structure(s)?),
            other => {
                return Err(PackStreamError::InvalidStructure(format!(
                    "unknown request message tag: 0x{:02X}",
                    other
                )))
            }
        };
        Ok(request)
    }
}

// ============================================================================
// HELLO
// ============================================================================

/// HELLO message.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct HelloMessage {
    /// User agent string
    pub user_agent: String,
    /// Authentication entries (`scheme`, `principal`, `credentials`, ...)
    pub auth: Metadata,
    /// Routing context; present only when the driver routes
    pub routing: Option<Metadata>,
}

impl HelloMessage {
    /// Create a new HELLO message.
    pub fn new(user_agent: &str) -> Self {
        Self {
            user_agent: user_agent.to_string(),
            ..Default::default()
        }
    }

    /// Set authentication entries.
    pub fn with_auth(mut self, auth: Metadata) -> Self {
        self.auth = auth;
        self
    }

    /// Set routing context.
    pub fn with_routing(mut self, routing: Metadata) -> Self {
        self.routing = Some(routing);
        self
    }

    fn to_extra(&self) -> Metadata {
        let mut extra = self.auth.clone();
        extra.insert("user_agent".into(), self.user_agent.clone().into());
        if let Some(routing) = &self.routing {
            extra.insert("routing".into(), PackStreamValue::Map(routing.clone()));
        }
        extra
    }

    fn from_extra(mut extra: Metadata) -> Self {
        let user_agent = extra
            .remove("user_agent")
            .and_then(|v| v.as_str().map(String::from))
            .unwrap_or_default();
        let routing = match extra.remove("routing") {
            Some(PackStreamValue::Map(m)) => Some(m),
            _ => None,
        };
        Self {
            user_agent,
            auth: extra,
            routing,
        }
    }
}

// ============================================================================
// RUN
// ============================================================================

/// RUN message.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct RunMessage {
    /// Query text
    pub query: String,
    /// Query parameters
    pub parameters: Metadata,
    /// Extra metadata (bookmarks, tx_timeout, tx_metadata, mode, db)
    pub extra: Metadata,
}

impl RunMessage {
    /// Create a new RUN message.
    pub fn new(query: &str) -> Self {
        Self {
            query: query.to_string(),
            ..Default::default()
        }
    }

    /// Set query parameters.
    pub fn with_parameters(mut self, parameters: Metadata) -> Self {
        self.parameters = parameters;
        self
    }

    /// Set extra metadata.
    pub fn with_extra(mut self, extra: Metadata) -> Self {
        self.extra = extra;
        self
    }

    fn from_structure(s: &PackStreamStructure) -> Result<Self, PackStreamError> {
        expect_tag(s, tag::RUN, "RUN")?;
        let query = s
            .field(0, "query")?
            .as_str()
            .ok_or_else(|| PackStreamError::InvalidStructure("RUN query must be a string".into()))?
            .to_string();
        Ok(Self {
            query,
            parameters: map_field(s, 1)?,
            extra: map_field(s, 2)?,
        })
    }
}

// ============================================================================
// PULL / DISCARD
// ============================================================================

/// Shared body of PULL and DISCARD.
///
/// `n == None` encodes the field-less PULL_ALL/DISCARD_ALL of Bolt 3.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct StreamControl {
    /// Number of records, -1 for all
    pub n: Option<i64>,
    /// Query id inside an explicit transaction, -1 for the last one
    pub qid: Option<i64>,
}

impl StreamControl {
    fn to_fields(self) -> Vec<PackStreamValue> {
        match self.n {
            None => vec![],
            Some(n) => {
                let mut extra = HashMap::new();
                extra.insert("n".to_string(), PackStreamValue::Integer(n));
                if let Some(qid) = self.qid {
                    extra.insert("qid".to_string(), PackStreamValue::Integer(qid));
                }
                vec![PackStreamValue::Map(extra)]
            }
        }
    }

    fn from_structure(s: &PackStreamStructure) -> Result<Self, PackStreamError> {
        if s.fields.is_empty() {
            return Ok(Self::default());
        }
        let extra = map_field(s, 0)?;
        Ok(Self {
            n: Some(extra.get("n").and_then(|v| v.as_int()).unwrap_or(-1)),
            qid: extra.get("qid").and_then(|v| v.as_int()),
        })
    }
}

/// PULL message.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct PullMessage(
    /// Record count and target query.
    pub StreamControl,
);

impl PullMessage {
    /// PULL `n` records (-1 for all).
    pub fn with_n(n: i64) -> Self {
        Self(StreamControl { n: Some(n), qid: None })
    }

    /// Bolt 3 PULL_ALL.
    pub fn legacy_all() -> Self {
        Self(StreamControl::default())
    }

    /// Target a specific query inside a transaction.
    pub fn with_qid(mut self, qid: i64) -> Self {
        self.0.qid = Some(qid);
        self
    }
}

/// DISCARD message.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct DiscardMessage(
    /// Record count and target query.
    pub StreamControl,
);

impl DiscardMessage {
    /// DISCARD `n` records (-1 for all).
    pub fn with_n(n: i64) -> Self {
        Self(StreamControl { n: Some(n), qid: None })
    }

    /// Bolt 3 DISCARD_ALL.
    pub fn legacy_all() -> Self {
        Self(StreamControl::default())
    }

    /// Target a specific query inside a transaction.
    pub fn with_qid(mut self, qid: i64) -> Self {
        self.0.qid = Some(qid);
        self
    }
}

// ============================================================================
// BEGIN
// ============================================================================

/// BEGIN message. The same entries also form the extra map of an
/// auto-commit RUN.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct BeginMessage {
    /// Bookmarks to wait for
    pub bookmarks: Vec<String>,
    /// Transaction timeout in milliseconds
    pub tx_timeout: Option<i64>,
    /// Access mode
    pub mode: AccessMode,
    /// Target database
    pub database: Option<String>,
    /// Transaction metadata
    pub tx_metadata: Metadata,
}

impl BeginMessage {
    /// Encode as an extra map.
    pub fn to_extra(&self) -> Metadata {
        let mut extra = HashMap::new();
        if !self.bookmarks.is_empty() {
            extra.insert("bookmarks".into(), self.bookmarks.clone().into());
        }
        if let Some(ms) = self.tx_timeout {
            extra.insert("tx_timeout".into(), PackStreamValue::Integer(ms));
        }
        if self.mode == AccessMode::Read {
            extra.insert("mode".into(), "r".into());
        }
        if let Some(db) = &self.database {
            extra.insert("db".into(), db.clone().into());
        }
        if !self.tx_metadata.is_empty() {
            extra.insert("tx_metadata".into(), PackStreamValue::Map(self.tx_metadata.clone()));
        }
        extra
    }

    /// Decode from an extra map.
    pub fn from_extra(extra: &Metadata) -> Self {
        Self {
            bookmarks: extra.get("bookmarks").and_then(|v| v.string_list()).unwrap_or_default(),
            tx_timeout: extra.get("tx_timeout").and_then(|v| v.as_int()),
            mode: extra
                .get("mode")
                .and_then(|v| v.as_str())
                .map(AccessMode::from_wire)
                .unwrap_or_default(),
            database: extra.get("db").and_then(|v| v.as_str()).map(String::from),
            tx_metadata: extra.get("tx_metadata").and_then(|v| v.as_map()).cloned().unwrap_or_default(),
        }
    }
}

// ============================================================================
// ROUTE
// ============================================================================

/// ROUTE message (4.3+).
#[derive(Debug, Clone, PartialEq, Default)]
pub struct RouteMessage {
    /// Routing context
    pub routing: Metadata,
    /// Bookmarks
    pub bookmarks: Vec<String>,
    /// Database name; `None` asks for the home database
    pub database: Option<String>,
    /// 4.4+ sends the database inside an extra map instead of a bare string
    pub extra_form: bool,
}

impl RouteMessage {
    fn to_structure(&self) -> PackStreamStructure {
        let db = self
            .database
            .clone()
            .map(PackStreamValue::String)
            .unwrap_or(PackStreamValue::Null);
        let third = if self.extra_form {
            let mut extra = HashMap::new();
            if !db.is_null() {
                extra.insert("db".to_string(), db);
            }
            PackStreamValue::Map(extra)
        } else {
            db
        };
        PackStreamStructure::new(
            tag::ROUTE,
            vec![
                PackStreamValue::Map(self.routing.clone()),
                self.bookmarks.clone().into(),
                third,
            ],
        )
    }

    fn from_structure(s: &PackStreamStructure) -> Result<Self, PackStreamError> {
        expect_tag(s, tag::ROUTE, "ROUTE")?;
        let (database, extra_form) = match s.fields.get(2) {
            Some(PackStreamValue::String(db)) => (Some(db.clone()), false),
            Some(PackStreamValue::Map(m)) => (m.get("db").and_then(|v| v.as_str()).map(String::from), true),
            _ => (None, false),
        };
        Ok(Self {
            routing: map_field(s, 0)?,
            bookmarks: s.fields.get(1).and_then(|v| v.string_list()).unwrap_or_default(),
            database,
            extra_form,
        })
    }
}
