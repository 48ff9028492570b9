//! Bolt connection state machine.
//!
//! `BoltClient` owns one [`BoltConnection`] and implements the
//! [`Connection`] contract on top of it: auto-commit and explicit
//! transactions, batched pulls, per-stream buffering and reset.
//!
//! Only one batch is ever on the wire. Records of that batch are read one
//! at a time by `next`; when another request needs the wire first, the rest
//! of the batch is moved into its stream's buffer ("parked"). Every stream
//! keeps its own buffer and phase, so several results of one transaction
//! can be read in any order.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use tracing::debug;

use crate::bolt::{
    BeginMessage, BoltError, BoltRequest, BoltResponse, BoltVersion, DiscardMessage, HelloMessage, Metadata,
    PackStreamValue, PullMessage, RouteMessage, RunMessage, SuccessMessage,
};

use super::super::connection::{Connection, ConnectionState, DatabaseSelector};
use super::super::driver::{AuthToken, ServerAddress};
use super::super::error::{DriverError, DriverResult, ServerError, UsageError};
use super::super::record::Record;
use super::super::routing::RoutingTable;
use super::super::transport::Connector;
use super::super::types::{to_metadata, Command, StreamHandle, StreamItem, Summary, TxConfig, TxHandle, Value};
use super::connection::BoltConnection;
use super::{auth_entries, CLIENT_USER_AGENT};

const ROUTING_PROCEDURE: &str = "CALL dbms.routing.getRoutingTable($context, $database)";
const LEGACY_ROUTING_PROCEDURE: &str = "CALL dbms.cluster.routing.getRoutingTable($context)";

/// Options used when opening a client.
#[derive(Debug, Clone)]
pub struct ClientOptions {
    /// User agent sent in HELLO
    pub user_agent: String,
    /// Credentials
    pub auth: AuthToken,
    /// Routing context sent in HELLO (4.1+); `None` for direct connections
    pub routing: Option<Metadata>,
    /// Limit for connect + handshake
    pub connection_timeout: Duration,
    /// Per-operation I/O timeout
    pub io_timeout: Option<Duration>,
    /// Records per PULL (-1 for all)
    pub fetch_size: i64,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            user_agent: CLIENT_USER_AGENT.to_string(),
            auth: AuthToken::None,
            routing: None,
            connection_timeout: Duration::from_secs(30),
            io_timeout: None,
            fetch_size: 1000,
        }
    }
}

/// Where a stream stands relative to the server.
#[derive(Debug)]
enum Phase {
    /// Server holds more records; a PULL is needed
    Pending,
    /// A batch is on the wire for this stream
    InFlight,
    /// Final summary received
    Done(Summary),
    /// Server reported a failure
    Failed(ServerError),
}

#[derive(Debug)]
struct StreamState {
    keys: Arc<[String]>,
    t_first: Option<i64>,
    qid: Option<i64>,
    in_tx: bool,
    fetch_size: i64,
    buffer: VecDeque<Record>,
    phase: Phase,
    /// Summary or error already handed to the caller
    delivered: bool,
}

impl StreamState {
    fn is_finished(&self) -> bool {
        matches!(self.phase, Phase::Done(_) | Phase::Failed(_))
    }
}

/// Bolt session over one physical connection.
pub struct BoltClient {
    conn: BoltConnection,
    state: ConnectionState,
    server_name: String,
    server_agent: String,
    connection_id: Option<String>,
    bookmark: String,
    database: Option<String>,
    fetch_size: i64,
    streams: HashMap<StreamHandle, StreamState>,
    in_flight: Option<StreamHandle>,
    auto_stream: Option<StreamHandle>,
    tx: Option<TxHandle>,
    next_id: u64,
}

impl BoltClient {
    /// Open a transport, negotiate the version and authenticate.
    pub async fn connect(
        connector: &dyn Connector,
        address: &ServerAddress,
        options: &ClientOptions,
    ) -> DriverResult<Self> {
        let limit = options.connection_timeout;
        let transport = tokio::time::timeout(limit, connector.connect(address))
            .await
            .map_err(|_| DriverError::timeout(format!("connecting to {} took longer than {:?}", address, limit)))?
            .map_err(|e| DriverError::connection(format!("failed to connect to {}: {}", address, e)))?;

        let conn = tokio::time::timeout(
            limit,
            BoltConnection::handshake(transport, address.clone(), options.io_timeout),
        )
        .await
        .map_err(|_| DriverError::timeout(format!("handshake with {} took longer than {:?}", address, limit)))??;

        let mut client = Self::new(conn, options.fetch_size);
        client.hello(options).await?;
        Ok(client)
    }

    fn new(conn: BoltConnection, fetch_size: i64) -> Self {
        Self {
            server_name: conn.address().to_string(),
            conn,
            state: ConnectionState::Ready,
            server_agent: String::new(),
            connection_id: None,
            bookmark: String::new(),
            database: None,
            fetch_size,
            streams: HashMap::new(),
            in_flight: None,
            auto_stream: None,
            tx: None,
            next_id: 0,
        }
    }

    async fn hello(&mut self, options: &ClientOptions) -> DriverResult<()> {
        let mut hello = HelloMessage::new(&options.user_agent).with_auth(auth_entries(&options.auth));
        if let Some(routing) = &options.routing {
            if self.conn.version() >= BoltVersion::V4_1 {
                hello = hello.with_routing(routing.clone());
            }
        }

        match self.exchange(&BoltRequest::Hello(hello)).await? {
            BoltResponse::Success(success) => {
                self.server_agent = success.server().unwrap_or_default().to_string();
                self.connection_id = success.connection_id().map(String::from);
                debug!(
                    address = %self.server_name,
                    agent = %self.server_agent,
                    version = %self.conn.version(),
                    "connection authenticated"
                );
                Ok(())
            }
            BoltResponse::Failure(failure) => {
                self.close().await;
                let error = ServerError::from(failure);
                if error.is_security_error() {
                    Err(DriverError::authentication(error.to_string()))
                } else {
                    Err(error.into())
                }
            }
            other => Err(self.violation(format!("unexpected {} in response to HELLO", other.name()))),
        }
    }

    /// Negotiated protocol version.
    pub fn version(&self) -> BoltVersion {
        self.conn.version()
    }

    /// Server-assigned connection id.
    pub fn connection_id(&self) -> Option<&str> {
        self.connection_id.as_deref()
    }

    /// Default records per PULL.
    pub fn set_fetch_size(&mut self, fetch_size: i64) {
        self.fetch_size = fetch_size;
    }

    /// Send GOODBYE and mark the connection dead.
    pub async fn close(&mut self) {
        self.conn.close().await;
        self.state = ConnectionState::Dead;
        self.streams.clear();
        self.in_flight = None;
        self.auto_stream = None;
        self.tx = None;
    }

    /// Fetch a routing table for `database`.
    ///
    /// Uses ROUTE on 4.3+, the routing procedure on the `system` database
    /// on 4.0-4.2 and the cluster procedure on 3.0.
    pub async fn route(
        &mut self,
        database: Option<&str>,
        bookmarks: &[String],
        context: &Metadata,
    ) -> DriverResult<RoutingTable> {
        self.ensure_usable()?;
        if self.tx.is_some() {
            return Err(UsageError::AutoCommitInTransaction.into());
        }
        let version = self.conn.version();

        if version.supports_route_message() {
            self.finish_auto_stream().await?;
            let route = RouteMessage {
                routing: context.clone(),
                bookmarks: bookmarks.to_vec(),
                database: database.map(String::from),
                extra_form: version.route_uses_extra_map(),
            };
            return match self.exchange(&BoltRequest::Route(route)).await? {
                BoltResponse::Success(success) => {
                    let rt = success
                        .routing_table()
                        .ok_or_else(|| DriverError::protocol("ROUTE response without routing table"))?;
                    RoutingTable::parse(rt)
                }
                other => Err(self.unexpected(other, "ROUTE")),
            };
        }

        let context = Value::from(PackStreamValue::Map(context.clone()));
        let config = TxConfig::read().with_bookmarks(bookmarks.iter().cloned());
        let (command, config) = if version.supports_multi_database() {
            let command = Command::new(ROUTING_PROCEDURE)
                .with_param("context", context)
                .with_param("database", database.map(String::from));
            (command, config.with_database("system"))
        } else {
            if database.is_some() {
                return Err(DriverError::configuration(format!(
                    "Bolt {} has no multi-database routing",
                    version
                )));
            }
            (Command::new(LEGACY_ROUTING_PROCEDURE).with_param("context", context), config)
        };

        let handle = self.run(command, config).await?;
        let mut row = None;
        loop {
            match self.next(handle).await? {
                StreamItem::Record(record) => {
                    row.get_or_insert(record);
                }
                StreamItem::Summary(_) => break,
            }
        }
        let record = row.ok_or_else(|| DriverError::routing("routing procedure returned no rows"))?;
        let rt: Metadata = record
            .to_map()
            .into_iter()
            .map(|(k, v)| (k, PackStreamValue::from(v)))
            .collect();
        RoutingTable::parse(&rt)
    }

    // ========================================================================
    // Wire helpers
    // ========================================================================

    fn next_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    fn ensure_usable(&self) -> DriverResult<()> {
        match self.state {
            ConnectionState::Dead => Err(UsageError::ConnectionDead.into()),
            ConnectionState::Failed => Err(UsageError::ResetRequired.into()),
            _ => Ok(()),
        }
    }

    /// The server error that failed a stream of the open transaction.
    fn tx_failure(&self) -> Option<ServerError> {
        self.streams.values().find_map(|s| match &s.phase {
            Phase::Failed(error) if s.in_tx => Some(error.clone()),
            _ => None,
        })
    }

    /// Like [`Self::ensure_usable`], but a failed transaction reports the
    /// server error that failed it.
    fn ensure_tx_usable(&self) -> DriverResult<()> {
        if self.state == ConnectionState::Failed {
            if let Some(error) = self.tx_failure() {
                return Err(DriverError::Server(error));
            }
        }
        self.ensure_usable()
    }

    fn check_tx(&self, tx: TxHandle) -> DriverResult<()> {
        match self.tx {
            None => Err(UsageError::NoOpenTransaction.into()),
            Some(open) if open != tx => Err(UsageError::InvalidTransaction.into()),
            Some(_) => Ok(()),
        }
    }

    /// Transport failure: the connection is unusable from now on.
    fn lost(&mut self, error: BoltError) -> DriverError {
        if self.state != ConnectionState::Dead {
            debug!(address = %self.server_name, error = %error, "connection lost");
        }
        self.state = ConnectionState::Dead;
        error.into()
    }

    /// Server broke the protocol: the connection is unusable from now on.
    fn violation(&mut self, message: impl Into<String>) -> DriverError {
        self.state = ConnectionState::Dead;
        DriverError::protocol(message)
    }

    /// Map a non-SUCCESS summary to an error and move to FAILED or DEAD.
    fn unexpected(&mut self, response: BoltResponse, request: &str) -> DriverError {
        match response {
            BoltResponse::Failure(failure) => {
                let error = ServerError::from(failure);
                debug!(address = %self.server_name, request, error = %error, "request failed");
                self.state = ConnectionState::Failed;
                error.into()
            }
            BoltResponse::Ignored => {
                self.state = ConnectionState::Failed;
                UsageError::ResetRequired.into()
            }
            other => self.violation(format!("unexpected {} in response to {}", other.name(), request)),
        }
    }

    async fn send(&mut self, requests: &[&BoltRequest]) -> DriverResult<()> {
        for request in requests {
            if let Err(e) = self.conn.queue(request) {
                return Err(self.lost(e));
            }
        }
        match self.conn.flush().await {
            Ok(()) => Ok(()),
            Err(e) => Err(self.lost(e)),
        }
    }

    async fn recv(&mut self) -> DriverResult<BoltResponse> {
        match self.conn.recv().await {
            Ok(response) => Ok(response),
            Err(e) => Err(self.lost(e)),
        }
    }

    async fn exchange(&mut self, request: &BoltRequest) -> DriverResult<BoltResponse> {
        self.send(&[request]).await?;
        self.recv().await
    }

    fn pull_request(&self, n: i64, qid: Option<i64>) -> BoltRequest {
        if !self.conn.version().supports_qid_and_pull_n() {
            return BoltRequest::Pull(PullMessage::legacy_all());
        }
        let pull = PullMessage::with_n(n);
        BoltRequest::Pull(match qid {
            Some(qid) => pull.with_qid(qid),
            None => pull,
        })
    }

    fn discard_request(&self, qid: Option<i64>) -> BoltRequest {
        if !self.conn.version().supports_qid_and_pull_n() {
            return BoltRequest::Discard(DiscardMessage::legacy_all());
        }
        let discard = DiscardMessage::with_n(-1);
        BoltRequest::Discard(match qid {
            Some(qid) => discard.with_qid(qid),
            None => discard,
        })
    }

    fn begin_message(&self, config: &TxConfig) -> DriverResult<BeginMessage> {
        let database = config.database.clone().or_else(|| self.database.clone());
        let version = self.conn.version();
        if database.is_some() && !version.supports_multi_database() {
            return Err(DriverError::configuration(format!(
                "Bolt {} does not support database selection",
                version
            )));
        }
        Ok(BeginMessage {
            bookmarks: config.bookmarks.clone(),
            tx_timeout: config.timeout.map(|t| i64::try_from(t.as_millis()).unwrap_or(i64::MAX)),
            mode: config.mode,
            database,
            tx_metadata: to_metadata(config.metadata.clone()),
        })
    }

    // ========================================================================
    // Stream bookkeeping
    // ========================================================================

    /// Read the summary of a RUN that was pipelined with a PULL.
    async fn run_response(&mut self) -> DriverResult<SuccessMessage> {
        match self.recv().await? {
            BoltResponse::Success(success) => Ok(success),
            BoltResponse::Record(_) => Err(self.violation("RECORD before the RUN summary")),
            other => {
                // the pipelined PULL is answered with IGNORED
                self.recv().await?;
                Err(self.unexpected(other, "RUN"))
            }
        }
    }

    fn open_stream(&mut self, success: &SuccessMessage, fetch_size: i64, in_tx: bool) -> StreamHandle {
        let handle = StreamHandle(self.next_id());
        let keys: Arc<[String]> = success.fields().unwrap_or_default().into();
        self.streams.insert(
            handle,
            StreamState {
                keys,
                t_first: success.t_first(),
                qid: success.qid(),
                in_tx,
                fetch_size,
                buffer: VecDeque::new(),
                phase: Phase::InFlight,
                delivered: false,
            },
        );
        self.in_flight = Some(handle);
        handle
    }

    /// Recompute the state from the open transaction and streams.
    fn settle(&mut self) {
        if matches!(self.state, ConnectionState::Failed | ConnectionState::Dead) {
            return;
        }
        self.state = if self.tx.is_some() {
            if self.streams.values().any(|s| s.in_tx && !s.is_finished()) {
                ConnectionState::TxStreaming
            } else {
                ConnectionState::InTx
            }
        } else if self.auto_stream.is_some() {
            ConnectionState::AutoStreaming
        } else {
            ConnectionState::Ready
        };
    }

    fn finish_batch(&mut self, handle: StreamHandle) {
        self.in_flight = None;
        let finished = self.streams.get(&handle).map_or(true, StreamState::is_finished);
        if finished && self.auto_stream == Some(handle) {
            self.auto_stream = None;
        }
        self.settle();
    }

    /// Read one message of the batch in flight for `handle`.
    ///
    /// Returns the record, or `None` once the batch has ended.
    async fn pump(&mut self, handle: StreamHandle) -> DriverResult<Option<Record>> {
        let response = self.recv().await?;
        let stream = match self.streams.get_mut(&handle) {
            Some(stream) => stream,
            None => return Err(UsageError::InvalidStream.into()),
        };

        match response {
            BoltResponse::Record(record) => {
                let values = record.fields.into_iter().map(Value::from).collect();
                Ok(Some(Record::new(stream.keys.clone(), values)))
            }
            BoltResponse::Success(success) => {
                if success.has_more() {
                    stream.phase = Phase::Pending;
                } else {
                    let summary = Summary::build(
                        &stream.keys,
                        stream.t_first,
                        &success,
                        &self.server_name,
                        &self.server_agent,
                    );
                    if !stream.in_tx {
                        if let Some(bookmark) = success.bookmark() {
                            self.bookmark = bookmark.to_string();
                        }
                    }
                    stream.phase = Phase::Done(summary);
                }
                self.finish_batch(handle);
                Ok(None)
            }
            BoltResponse::Failure(failure) => {
                let error = ServerError::from(failure);
                debug!(address = %self.server_name, error = %error, "stream failed");
                stream.phase = Phase::Failed(error);
                self.finish_batch(handle);
                self.state = ConnectionState::Failed;
                Ok(None)
            }
            BoltResponse::Ignored => {
                stream.phase = Phase::Pending;
                self.in_flight = None;
                self.state = ConnectionState::Failed;
                Err(UsageError::ResetRequired.into())
            }
        }
    }

    /// Move the rest of the batch in flight into its stream's buffer.
    async fn park_in_flight(&mut self) -> DriverResult<()> {
        while let Some(handle) = self.in_flight {
            if let Some(record) = self.pump(handle).await? {
                if let Some(stream) = self.streams.get_mut(&handle) {
                    stream.buffer.push_back(record);
                }
            }
        }
        Ok(())
    }

    /// Buffer whatever the open auto-commit stream still holds on the server.
    async fn finish_auto_stream(&mut self) -> DriverResult<()> {
        while let Some(handle) = self.auto_stream {
            self.park_in_flight().await?;
            let pending = self
                .streams
                .get(&handle)
                .map_or(false, |s| matches!(s.phase, Phase::Pending));
            if !pending {
                self.auto_stream = None;
                break;
            }
            let pull = self.pull_request(-1, None);
            self.send(&[&pull]).await?;
            if let Some(stream) = self.streams.get_mut(&handle) {
                stream.phase = Phase::InFlight;
            }
            self.in_flight = Some(handle);
        }
        self.settle();
        self.ensure_usable()
    }

    /// Ask the server for the next batch of `handle`.
    async fn pull_more(&mut self, handle: StreamHandle) -> DriverResult<()> {
        self.park_in_flight().await?;
        self.ensure_tx_usable()?;

        let (n, qid) = match self.streams.get(&handle) {
            Some(s) => (s.fetch_size, s.in_tx.then(|| s.qid.unwrap_or(-1))),
            None => return Err(UsageError::InvalidStream.into()),
        };
        let pull = self.pull_request(n, qid);
        self.send(&[&pull]).await?;

        if let Some(stream) = self.streams.get_mut(&handle) {
            stream.phase = Phase::InFlight;
        }
        self.in_flight = Some(handle);
        self.settle();
        Ok(())
    }

    /// Forget finished streams whose summary the caller has already seen.
    fn discard_delivered(&mut self) {
        self.streams
            .retain(|_, s| !(s.delivered && s.is_finished() && s.buffer.is_empty()));
    }

    /// Drain and close every stream of the open transaction.
    async fn close_tx_streams(&mut self) -> DriverResult<()> {
        self.park_in_flight().await?;
        self.ensure_tx_usable()?;

        let pending: Vec<Option<i64>> = self
            .streams
            .values()
            .filter(|s| s.in_tx && matches!(s.phase, Phase::Pending))
            .map(|s| s.qid)
            .collect();
        if !pending.is_empty() {
            let discards: Vec<BoltRequest> = pending.into_iter().map(|qid| self.discard_request(qid)).collect();
            let requests: Vec<&BoltRequest> = discards.iter().collect();
            self.send(&requests).await?;
            for _ in 0..discards.len() {
                match self.recv().await? {
                    BoltResponse::Success(_) => {}
                    other => return Err(self.unexpected(other, "DISCARD")),
                }
            }
        }

        self.streams.retain(|_, s| !s.in_tx);
        Ok(())
    }

    async fn end_tx(&mut self, tx: TxHandle, commit: bool) -> DriverResult<()> {
        self.ensure_tx_usable()?;
        self.check_tx(tx)?;
        self.close_tx_streams().await?;

        let request = if commit { BoltRequest::Commit } else { BoltRequest::Rollback };
        match self.exchange(&request).await? {
            BoltResponse::Success(success) => {
                if commit {
                    if let Some(bookmark) = success.bookmark() {
                        self.bookmark = bookmark.to_string();
                    }
                }
                self.tx = None;
                self.settle();
                Ok(())
            }
            other => Err(self.unexpected(other, request.name())),
        }
    }
}

impl Connection for BoltClient {
    fn address(&self) -> &ServerAddress {
        self.conn.address()
    }

    fn state(&self) -> ConnectionState {
        self.state
    }

    async fn run(&mut self, command: Command, config: TxConfig) -> DriverResult<StreamHandle> {
        self.ensure_usable()?;
        if self.tx.is_some() {
            return Err(UsageError::AutoCommitInTransaction.into());
        }
        self.finish_auto_stream().await?;
        self.discard_delivered();

        let mut begin = self.begin_message(&config)?;
        begin.tx_metadata.extend(to_metadata(command.meta));
        let fetch_size = command.fetch_size.unwrap_or(self.fetch_size);

        let run = BoltRequest::Run(
            RunMessage::new(&command.cypher)
                .with_parameters(to_metadata(command.params))
                .with_extra(begin.to_extra()),
        );
        let pull = self.pull_request(fetch_size, None);
        self.send(&[&run, &pull]).await?;

        let success = self.run_response().await?;
        let handle = self.open_stream(&success, fetch_size, false);
        self.auto_stream = Some(handle);
        self.state = ConnectionState::AutoStreaming;
        Ok(handle)
    }

    async fn run_in_tx(&mut self, tx: TxHandle, command: Command) -> DriverResult<StreamHandle> {
        self.ensure_tx_usable()?;
        self.check_tx(tx)?;
        self.park_in_flight().await?;
        self.ensure_tx_usable()?;

        let fetch_size = command.fetch_size.unwrap_or(self.fetch_size);
        let run = BoltRequest::Run(RunMessage::new(&command.cypher).with_parameters(to_metadata(command.params)));
        let pull = self.pull_request(fetch_size, Some(-1));
        self.send(&[&run, &pull]).await?;

        let success = self.run_response().await?;
        let handle = self.open_stream(&success, fetch_size, true);
        self.state = ConnectionState::TxStreaming;
        Ok(handle)
    }

    async fn next(&mut self, handle: StreamHandle) -> DriverResult<StreamItem> {
        loop {
            let stream = self.streams.get_mut(&handle).ok_or(UsageError::InvalidStream)?;
            if let Some(record) = stream.buffer.pop_front() {
                return Ok(StreamItem::Record(record));
            }
            let needs_pull = match &stream.phase {
                Phase::Done(summary) => {
                    stream.delivered = true;
                    return Ok(StreamItem::Summary(summary.clone()));
                }
                Phase::Failed(error) => {
                    stream.delivered = true;
                    return Err(DriverError::Server(error.clone()));
                }
                Phase::InFlight => false,
                Phase::Pending => true,
            };

            self.ensure_tx_usable()?;
            if needs_pull {
                self.pull_more(handle).await?;
            } else if let Some(record) = self.pump(handle).await? {
                return Ok(StreamItem::Record(record));
            }
        }
    }

    async fn begin_tx(&mut self, config: TxConfig) -> DriverResult<TxHandle> {
        self.ensure_usable()?;
        if self.tx.is_some() {
            return Err(UsageError::TransactionAlreadyOpen.into());
        }
        self.finish_auto_stream().await?;
        self.discard_delivered();

        let begin = self.begin_message(&config)?;
        match self.exchange(&BoltRequest::Begin(begin)).await? {
            BoltResponse::Success(_) => {
                let tx = TxHandle(self.next_id());
                self.tx = Some(tx);
                self.state = ConnectionState::InTx;
                Ok(tx)
            }
            other => Err(self.unexpected(other, "BEGIN")),
        }
    }

    async fn commit_tx(&mut self, tx: TxHandle) -> DriverResult<()> {
        self.end_tx(tx, true).await
    }

    async fn rollback_tx(&mut self, tx: TxHandle) -> DriverResult<()> {
        self.end_tx(tx, false).await
    }

    async fn reset(&mut self) -> DriverResult<()> {
        if self.state == ConnectionState::Dead {
            return Err(UsageError::ConnectionDead.into());
        }
        self.send(&[&BoltRequest::Reset]).await?;

        // everything before RESET's own summary is skipped
        loop {
            let response = self.recv().await?;
            if self.conn.outstanding() > 0 {
                continue;
            }
            match response {
                BoltResponse::Success(_) => break,
                other => {
                    self.close().await;
                    return Err(DriverError::protocol(format!("RESET answered with {}", other.name())));
                }
            }
        }

        self.streams.clear();
        self.in_flight = None;
        self.auto_stream = None;
        self.tx = None;
        self.state = ConnectionState::Ready;
        debug!(address = %self.server_name, "connection reset");
        Ok(())
    }

    fn is_alive(&self) -> bool {
        self.state != ConnectionState::Dead && !self.conn.is_broken()
    }

    fn bookmark(&self) -> &str {
        &self.bookmark
    }

    fn server_name(&self) -> &str {
        &self.server_name
    }

    fn server_version(&self) -> &str {
        &self.server_agent
    }

    fn database_selector(&mut self) -> Option<&mut dyn DatabaseSelector> {
        if self.conn.version().supports_multi_database() {
            Some(self)
        } else {
            None
        }
    }

    fn set_io_timeout(&mut self, timeout: Option<Duration>) {
        self.conn.set_io_timeout(timeout);
    }
}

impl DatabaseSelector for BoltClient {
    fn select_database(&mut self, database: Option<&str>) {
        self.database = database.map(String::from);
    }

    fn selected_database(&self) -> Option<&str> {
        self.database.as_deref()
    }
}

impl std::fmt::Debug for BoltClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BoltClient")
            .field("address", &self.server_name)
            .field("version", &self.conn.version())
            .field("state", &self.state)
            .field("streams", &self.streams.len())
            .field("bookmark", &self.bookmark)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bolt::BoltErrorCode;
    use crate::driver::record::RecordStream;
    use crate::driver::testkit::FakeServer;

    fn unwind(from: i64, to: i64) -> Command {
        Command::new(format!("UNWIND RANGE({}, {}) AS x RETURN x", from, to))
    }

    fn create(id: i64) -> Command {
        Command::new("CREATE (n:Item {id: $id})").with_param("id", id)
    }

    async fn count_items(client: &mut BoltClient) -> i64 {
        let handle = client
            .run(Command::new("MATCH (n:Item) RETURN count(n)"), TxConfig::read())
            .await
            .unwrap();
        let record = RecordStream::new(client, handle).single().await.unwrap();
        record.get_int("count(n)").unwrap()
    }

    async fn drain(client: &mut BoltClient, handle: StreamHandle) -> (Vec<i64>, Summary) {
        let mut values = Vec::new();
        loop {
            match client.next(handle).await.unwrap() {
                StreamItem::Record(r) => values.push(r.get_int("x").unwrap()),
                StreamItem::Summary(s) => return (values, s),
            }
        }
    }

    fn usage(err: DriverError) -> UsageError {
        match err {
            DriverError::Usage(usage) => usage,
            other => panic!("expected usage error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_hello_records_server_identity() {
        let server = FakeServer::new();
        let client = server.client().await;

        assert_eq!(client.state(), ConnectionState::Ready);
        assert_eq!(client.server_name(), "localhost:7687");
        assert_eq!(client.server_version(), "Neo4j/5.0.0");
        assert_eq!(client.version(), BoltVersion::V5_0);
        assert!(client.connection_id().is_some());
        assert!(client.bookmark().is_empty());
        assert!(client.is_alive());
    }

    #[tokio::test]
    async fn test_hello_rejected_credentials() {
        let server = FakeServer::new();
        let options = ClientOptions {
            auth: AuthToken::basic("wrong", "password"),
            ..ClientOptions::default()
        };
        let err = BoltClient::connect(server.connector().as_ref(), &ServerAddress::default(), &options)
            .await
            .unwrap_err();
        assert!(matches!(err, DriverError::Authentication(_)));
    }

    #[tokio::test]
    async fn test_no_common_version() {
        let server = FakeServer::with_versions(&[]);
        let err = BoltClient::connect(server.connector().as_ref(), &ServerAddress::default(), &ClientOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, DriverError::Handshake(_)));
    }

    #[tokio::test]
    async fn test_autocommit_results_in_sequence() {
        let server = FakeServer::new();
        let mut client = server.client().await;

        let first = client.run(create(1), TxConfig::write()).await.unwrap();
        assert_eq!(client.state(), ConnectionState::AutoStreaming);
        let (_, summary) = drain(&mut client, first).await;
        assert_eq!(summary.counters.nodes_created, 1);
        let after_first = client.bookmark().to_string();
        assert!(!after_first.is_empty());
        assert_eq!(client.state(), ConnectionState::Ready);

        let second = client.run(create(2), TxConfig::write()).await.unwrap();
        drain(&mut client, second).await;
        let after_second = client.bookmark().to_string();
        assert_ne!(after_first, after_second);
        assert_eq!(client.state(), ConnectionState::Ready);
        assert_eq!(server.commits(), 2);
    }

    #[tokio::test]
    async fn test_next_after_summary_is_idempotent() {
        let server = FakeServer::new();
        let mut client = server.client().await;

        let handle = client.run(unwind(1, 3), TxConfig::default()).await.unwrap();
        let (values, summary) = drain(&mut client, handle).await;
        assert_eq!(values, vec![1, 2, 3]);

        for _ in 0..3 {
            match client.next(handle).await.unwrap() {
                StreamItem::Summary(again) => assert_eq!(again, summary),
                other => panic!("unexpected {:?}", other),
            }
        }
    }

    #[tokio::test]
    async fn test_summarized_stream_discarded_by_next_run() {
        let server = FakeServer::new();
        let mut client = server.client().await;

        let handle = client.run(unwind(1, 1), TxConfig::default()).await.unwrap();
        drain(&mut client, handle).await;
        let other = client.run(unwind(1, 1), TxConfig::default()).await.unwrap();

        assert_eq!(usage(client.next(handle).await.unwrap_err()), UsageError::InvalidStream);
        drain(&mut client, other).await;
    }

    #[tokio::test]
    async fn test_batched_pulls() {
        let server = FakeServer::new();
        let mut client = server.client().await;

        let handle = client
            .run(unwind(1, 25).with_fetch_size(10), TxConfig::default())
            .await
            .unwrap();
        let (values, _) = drain(&mut client, handle).await;
        assert_eq!(values, (1..=25).collect::<Vec<_>>());
        assert_eq!(server.stats("localhost:7687").pulls, 3);
    }

    #[tokio::test]
    async fn test_new_run_buffers_unfinished_stream() {
        let server = FakeServer::new();
        let mut client = server.client().await;

        let first = client
            .run(unwind(1, 2500).with_fetch_size(1000), TxConfig::default())
            .await
            .unwrap();
        match client.next(first).await.unwrap() {
            StreamItem::Record(r) => assert_eq!(r.get_int("x").unwrap(), 1),
            other => panic!("unexpected {:?}", other),
        }

        let second = client.run(unwind(1, 2), TxConfig::default()).await.unwrap();
        let (values, _) = drain(&mut client, second).await;
        assert_eq!(values, vec![1, 2]);

        let (rest, summary) = drain(&mut client, first).await;
        assert_eq!(rest.len(), 2499);
        assert_eq!(rest[0], 2);
        assert_eq!(summary.keys, vec!["x".to_string()]);
        assert_eq!(client.state(), ConnectionState::Ready);
    }

    #[tokio::test]
    async fn test_commit_with_unconsumed_result() {
        let server = FakeServer::new();
        let mut client = server.client().await;
        let before = client.bookmark().to_string();

        let tx = client.begin_tx(TxConfig::write()).await.unwrap();
        assert_eq!(client.state(), ConnectionState::InTx);
        client.run_in_tx(tx, create(7)).await.unwrap();
        client.run_in_tx(tx, unwind(1, 50).with_fetch_size(5)).await.unwrap();
        assert_eq!(client.state(), ConnectionState::TxStreaming);

        client.commit_tx(tx).await.unwrap();
        assert_eq!(client.state(), ConnectionState::Ready);
        assert!(!client.bookmark().is_empty());
        assert_ne!(client.bookmark(), before);
        assert_eq!(count_items(&mut client).await, 1);
    }

    #[tokio::test]
    async fn test_rollback_discards_writes() {
        let server = FakeServer::new();
        let mut client = server.client().await;

        let warmup = client.run(create(1), TxConfig::write()).await.unwrap();
        drain(&mut client, warmup).await;
        let before = client.bookmark().to_string();

        let tx = client.begin_tx(TxConfig::write()).await.unwrap();
        client.run_in_tx(tx, create(2)).await.unwrap();
        client.rollback_tx(tx).await.unwrap();

        assert_eq!(client.bookmark(), before);
        assert_eq!(client.state(), ConnectionState::Ready);

        let handle = client
            .run(
                Command::new("MATCH (n:Item {id: $id}) RETURN n.id").with_param("id", 2),
                TxConfig::read(),
            )
            .await
            .unwrap();
        let rows = RecordStream::new(&mut client, handle).collect().await.unwrap();
        assert!(rows.is_empty());
    }

    #[tokio::test]
    async fn test_interleaved_streams_in_transaction() {
        let server = FakeServer::new();
        let mut client = server.client().await;

        let tx = client.begin_tx(TxConfig::read()).await.unwrap();
        let a = client.run_in_tx(tx, unwind(1, 7).with_fetch_size(2)).await.unwrap();
        let b = client.run_in_tx(tx, unwind(100, 104).with_fetch_size(2)).await.unwrap();

        // 교차해서 읽기
        let mut from_a = Vec::new();
        let mut from_b = Vec::new();
        for _ in 0..3 {
            if let StreamItem::Record(r) = client.next(a).await.unwrap() {
                from_a.push(r.get_int("x").unwrap());
            }
            if let StreamItem::Record(r) = client.next(b).await.unwrap() {
                from_b.push(r.get_int("x").unwrap());
            }
        }
        let (rest_b, _) = drain(&mut client, b).await;
        let (rest_a, _) = drain(&mut client, a).await;
        from_a.extend(rest_a);
        from_b.extend(rest_b);

        assert_eq!(from_a, (1..=7).collect::<Vec<_>>());
        assert_eq!(from_b, (100..=104).collect::<Vec<_>>());
        assert_eq!(client.state(), ConnectionState::InTx);

        client.commit_tx(tx).await.unwrap();
        assert_eq!(usage(client.next(a).await.unwrap_err()), UsageError::InvalidStream);
    }

    #[tokio::test]
    async fn test_transaction_usage_errors() {
        let server = FakeServer::new();
        let mut client = server.client().await;

        let err = client.commit_tx(TxHandle(42)).await.unwrap_err();
        assert_eq!(usage(err), UsageError::NoOpenTransaction);

        let tx = client.begin_tx(TxConfig::write()).await.unwrap();
        let err = client.begin_tx(TxConfig::write()).await.unwrap_err();
        assert_eq!(usage(err), UsageError::TransactionAlreadyOpen);

        let err = client.run(unwind(1, 1), TxConfig::default()).await.unwrap_err();
        assert_eq!(usage(err), UsageError::AutoCommitInTransaction);

        let err = client.run_in_tx(TxHandle(tx.0 + 100), unwind(1, 1)).await.unwrap_err();
        assert_eq!(usage(err), UsageError::InvalidTransaction);

        // 트랜잭션은 그대로 사용 가능
        assert_eq!(client.state(), ConnectionState::InTx);
        let handle = client.run_in_tx(tx, unwind(1, 2)).await.unwrap();
        assert_eq!(drain(&mut client, handle).await.0, vec![1, 2]);
        client.commit_tx(tx).await.unwrap();
    }

    #[tokio::test]
    async fn test_run_failure_requires_reset() {
        let server = FakeServer::new();
        let mut client = server.client().await;

        let err = client.run(Command::new("RETRUN 1"), TxConfig::default()).await.unwrap_err();
        assert_eq!(err.as_server_error().map(|e| e.code.as_str()), Some(BoltErrorCode::SYNTAX_ERROR));
        assert_eq!(client.state(), ConnectionState::Failed);
        assert!(client.is_alive());

        let err = client.run(unwind(1, 1), TxConfig::default()).await.unwrap_err();
        assert_eq!(usage(err), UsageError::ResetRequired);

        client.reset().await.unwrap();
        assert_eq!(client.state(), ConnectionState::Ready);
        let handle = client.run(unwind(1, 1), TxConfig::default()).await.unwrap();
        assert_eq!(drain(&mut client, handle).await.0, vec![1]);
    }

    #[tokio::test]
    async fn test_streaming_failure_is_cached() {
        let server = FakeServer::new();
        let mut client = server.client().await;

        let handle = client.run(Command::new("RETURN 1/0"), TxConfig::default()).await.unwrap();
        let first = client.next(handle).await.unwrap_err();
        let code = first.as_server_error().map(|e| e.code.clone());
        assert_eq!(code.as_deref(), Some(BoltErrorCode::ARITHMETIC_ERROR));
        assert_eq!(client.state(), ConnectionState::Failed);

        let second = client.next(handle).await.unwrap_err();
        assert_eq!(second.as_server_error().map(|e| e.code.clone()), code);
    }

    #[tokio::test]
    async fn test_reset_discards_streams_and_transaction() {
        let server = FakeServer::new();
        let mut client = server.client().await;

        let tx = client.begin_tx(TxConfig::write()).await.unwrap();
        client.run_in_tx(tx, create(5)).await.unwrap();
        let stream = client.run_in_tx(tx, unwind(1, 100).with_fetch_size(10)).await.unwrap();
        client.next(stream).await.unwrap();

        client.reset().await.unwrap();
        assert_eq!(client.state(), ConnectionState::Ready);
        assert_eq!(usage(client.next(stream).await.unwrap_err()), UsageError::InvalidStream);
        assert_eq!(usage(client.commit_tx(tx).await.unwrap_err()), UsageError::NoOpenTransaction);
        assert_eq!(count_items(&mut client).await, 0);
    }

    #[tokio::test]
    async fn test_failure_inside_transaction_surfaces_on_commit() {
        let server = FakeServer::new();
        let mut client = server.client().await;

        let tx = client.begin_tx(TxConfig::write()).await.unwrap();
        client.run_in_tx(tx, Command::new("RETURN 1/0")).await.unwrap();
        let err = client.commit_tx(tx).await.unwrap_err();
        assert_eq!(
            err.as_server_error().map(|e| e.code.as_str()),
            Some(BoltErrorCode::ARITHMETIC_ERROR)
        );
        assert_eq!(client.state(), ConnectionState::Failed);

        client.reset().await.unwrap();
        assert_eq!(client.state(), ConnectionState::Ready);
    }

    #[tokio::test]
    async fn test_failed_transaction_reports_server_error() {
        let server = FakeServer::new();
        let mut client = server.client().await;

        let tx = client.begin_tx(TxConfig::write()).await.unwrap();
        let failing = client.run_in_tx(tx, Command::new("RETURN 1/0")).await.unwrap();

        let err = client.run_in_tx(tx, create(1)).await.unwrap_err();
        assert_eq!(
            err.as_server_error().map(|e| e.code.as_str()),
            Some(BoltErrorCode::ARITHMETIC_ERROR)
        );
        assert_eq!(client.state(), ConnectionState::Failed);

        // the error stays with the transaction until reset
        let err = client.run_in_tx(tx, create(2)).await.unwrap_err();
        assert!(err.as_server_error().is_some());
        let err = client.next(failing).await.unwrap_err();
        assert!(err.as_server_error().is_some());
        let err = client.rollback_tx(tx).await.unwrap_err();
        assert!(err.as_server_error().is_some());

        client.reset().await.unwrap();
        assert_eq!(count_items(&mut client).await, 0);
    }

    #[tokio::test]
    async fn test_million_record_stream() {
        let server = FakeServer::new();
        let mut client = server.client().await;

        let handle = client.run(unwind(1, 1_000_001), TxConfig::default()).await.unwrap();
        let mut count = 0u64;
        let mut last = 0;
        loop {
            match client.next(handle).await.unwrap() {
                StreamItem::Record(r) => {
                    count += 1;
                    last = r.get_int("x").unwrap();
                }
                StreamItem::Summary(_) => break,
            }
        }
        assert_eq!(count, 1_000_001);
        assert_eq!(last, 1_000_001);
        // records were pulled in fetch_size batches
        assert_eq!(server.stats("localhost:7687").pulls, 1001);
    }

    #[tokio::test]
    async fn test_transaction_timeout_saturates() {
        let server = FakeServer::new();
        let client = server.client().await;

        let begin = client
            .begin_message(&TxConfig::default().with_timeout(Duration::from_millis(1500)))
            .unwrap();
        assert_eq!(begin.tx_timeout, Some(1500));

        let begin = client.begin_message(&TxConfig::default().with_timeout(Duration::MAX)).unwrap();
        assert_eq!(begin.tx_timeout, Some(i64::MAX));
    }

    #[tokio::test]
    async fn test_database_selection() {
        let server = FakeServer::new();
        let mut client = server.client().await;

        let selector = client.database_selector().unwrap();
        selector.select_database(Some("movies"));
        assert_eq!(selector.selected_database(), Some("movies"));

        let handle = client.run(create(1), TxConfig::write()).await.unwrap();
        let (_, summary) = drain(&mut client, handle).await;
        assert_eq!(summary.database.as_deref(), Some("movies"));

        let handle = client
            .run(create(2), TxConfig::write().with_database("other"))
            .await
            .unwrap();
        let (_, summary) = drain(&mut client, handle).await;
        assert_eq!(summary.database.as_deref(), Some("other"));
    }

    #[tokio::test]
    async fn test_bolt3_degrades() {
        let server = FakeServer::with_versions(&[BoltVersion::V3_0]);
        let mut client = server.client().await;
        assert_eq!(client.version(), BoltVersion::V3_0);
        assert!(client.database_selector().is_none());

        let err = client
            .run(unwind(1, 1), TxConfig::default().with_database("movies"))
            .await
            .unwrap_err();
        assert!(matches!(err, DriverError::Configuration(_)));
        assert_eq!(client.state(), ConnectionState::Ready);

        // PULL_ALL
        let handle = client.run(unwind(1, 30).with_fetch_size(5), TxConfig::default()).await.unwrap();
        assert_eq!(drain(&mut client, handle).await.0.len(), 30);
        assert_eq!(server.stats("localhost:7687").pulls, 1);

        let tx = client.begin_tx(TxConfig::write()).await.unwrap();
        let a = client.run_in_tx(tx, unwind(1, 3)).await.unwrap();
        let b = client.run_in_tx(tx, create(3)).await.unwrap();
        drain(&mut client, b).await;
        assert_eq!(drain(&mut client, a).await.0, vec![1, 2, 3]);
        client.commit_tx(tx).await.unwrap();
        assert!(!client.bookmark().is_empty());
    }

    #[tokio::test]
    async fn test_route_message() {
        let server = FakeServer::new();
        server.set_route("localhost:7687", &["r1:7687"], &["w1:7687"], &["r1:7687", "r2:7687"], 300);
        let mut client = server.client().await;

        let table = client.route(None, &[], &Metadata::new()).await.unwrap();
        assert_eq!(table.writers, vec![ServerAddress::new("w1", 7687)]);
        assert_eq!(table.readers.len(), 2);
        assert_eq!(table.ttl, Duration::from_secs(300));
        assert_eq!(client.state(), ConnectionState::Ready);
    }

    #[tokio::test]
    async fn test_route_procedures() {
        for version in [BoltVersion::V4_0, BoltVersion::V3_0] {
            let server = FakeServer::with_versions(&[version]);
            server.set_route("localhost:7687", &["a:7687"], &["a:7687"], &["b:7687"], 60);
            let mut client = server.client().await;

            let table = client.route(None, &[], &Metadata::new()).await.unwrap();
            assert_eq!(table.routers, vec![ServerAddress::new("a", 7687)]);
            assert_eq!(table.readers, vec![ServerAddress::new("b", 7687)]);
            assert_eq!(client.state(), ConnectionState::Ready);
        }
    }

    #[tokio::test]
    async fn test_route_unknown_database() {
        let server = FakeServer::new();
        server.set_route("localhost:7687", &["a:7687"], &["a:7687"], &["a:7687"], 60);
        server.drop_database("missing");
        let mut client = server.client().await;

        let err = client.route(Some("missing"), &[], &Metadata::new()).await.unwrap_err();
        assert_eq!(
            err.as_server_error().map(|e| e.code.as_str()),
            Some(BoltErrorCode::DATABASE_NOT_FOUND)
        );
    }

    #[tokio::test]
    async fn test_transport_loss_marks_dead() {
        let server = FakeServer::new();
        let mut client = server.client().await;

        server.sever("localhost:7687");
        let err = client.run(unwind(1, 1), TxConfig::default()).await.unwrap_err();
        assert!(err.is_transport());
        assert_eq!(client.state(), ConnectionState::Dead);
        assert!(!client.is_alive());

        assert_eq!(usage(client.reset().await.unwrap_err()), UsageError::ConnectionDead);
        let err = client.run(unwind(1, 1), TxConfig::default()).await.unwrap_err();
        assert_eq!(usage(err), UsageError::ConnectionDead);
    }

    #[tokio::test(start_paused = true)]
    async fn test_io_timeout_marks_dead() {
        let server = FakeServer::new();
        let mut client = server.client().await;
        client.set_io_timeout(Some(Duration::from_millis(100)));

        let err = client.run(Command::new("CALL test.hang()"), TxConfig::default()).await.unwrap_err();
        assert!(matches!(err, DriverError::Timeout(_)));
        assert_eq!(client.state(), ConnectionState::Dead);
    }

    #[tokio::test]
    async fn test_close_sends_goodbye() {
        let server = FakeServer::new();
        let mut client = server.client().await;
        client.close().await;
        assert!(!client.is_alive());
        assert_eq!(client.state(), ConnectionState::Dead);
    }
}
