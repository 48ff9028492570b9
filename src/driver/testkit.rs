//! Test kit
//!
//! `tokio::io::duplex` 위에서 동작하는 가짜 Bolt 서버. 서버 측 코덱과
//! 버전 협상기를 그대로 사용합니다.
//!
//! 이해하는 쿼리:
//! - `CREATE (n:Item {id: $id})`
//! - `MATCH (n:Item {id: $id}) RETURN n.id`
//! - `MATCH (n:Item) RETURN count(n)`
//! - `UNWIND RANGE(a, b) AS x RETURN x` (PULL마다 필요한 만큼만 생성)
//! - `RETURN $value`
//! - `RETURN 1/0` (PULL에서 ArithmeticError)
//! - `CALL test.hang()` (응답하지 않음)
//! - 라우팅 프로시저 두 가지
//!
//! 그 외 쿼리는 SyntaxError로 거부합니다.

use std::collections::{HashMap, HashSet, VecDeque};
use std::io;
use std::sync::Arc;

use futures::future::BoxFuture;
use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};
use tokio_util::codec::Framed;

use crate::bolt::handshake::{negotiate, HANDSHAKE_SIZE};
use crate::bolt::message::StreamControl;
use crate::bolt::{
    BeginMessage, BoltErrorCode, BoltRequest, BoltRequestCodec, BoltResponse, BoltVersion, FailureMessage, HelloMessage,
    Metadata, PackStreamValue, RecordMessage, RouteMessage, RunMessage, SuccessMessage,
};

use super::bolt::{BoltClient, ClientOptions};
use super::driver::ServerAddress;
use super::transport::{BoxTransport, Connector};

const DEFAULT_DATABASE: &str = "neo4j";

/// 주소별 요청 카운터
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct AddressStats {
    pub connections: usize,
    pub runs: usize,
    pub pulls: usize,
    pub discards: usize,
    pub begins: usize,
    pub commits: usize,
    pub rollbacks: usize,
    pub resets: usize,
    pub routes: usize,
}

#[derive(Debug, Clone)]
struct FakeRoute {
    ttl: i64,
    routers: Vec<String>,
    writers: Vec<String>,
    readers: Vec<String>,
}

#[derive(Debug)]
struct ScriptedFailure {
    address: Option<String>,
    code: String,
}

#[derive(Debug, Default)]
struct ServerState {
    versions: Vec<BoltVersion>,
    agent: String,
    items: Vec<i64>,
    bookmarks_issued: usize,
    routes: HashMap<String, FakeRoute>,
    unreachable: HashSet<String>,
    dropped_databases: HashSet<String>,
    failures: VecDeque<ScriptedFailure>,
    pull_failures: VecDeque<String>,
    hanging: HashSet<String>,
    stats: HashMap<String, AddressStats>,
    generations: HashMap<String, u64>,
    next_connection: u64,
}

impl ServerState {
    fn stats_mut(&mut self, address: &str) -> &mut AddressStats {
        self.stats.entry(address.to_string()).or_default()
    }

    fn issue_bookmark(&mut self) -> String {
        self.bookmarks_issued += 1;
        format!("FB:fake:{}", self.bookmarks_issued)
    }
}

/// 가짜 서버 (클러스터 전체를 흉내낼 수도 있음)
#[derive(Debug, Clone)]
pub(crate) struct FakeServer {
    state: Arc<Mutex<ServerState>>,
}

impl FakeServer {
    /// 모든 버전을 지원하는 서버
    pub fn new() -> Self {
        Self::with_versions(&BoltVersion::ALL)
    }

    /// 지정한 버전만 지원하는 서버
    pub fn with_versions(versions: &[BoltVersion]) -> Self {
        let state = ServerState {
            versions: versions.to_vec(),
            agent: "Neo4j/5.0.0".to_string(),
            ..Default::default()
        };
        Self {
            state: Arc::new(Mutex::new(state)),
        }
    }

    pub fn connector(&self) -> Arc<FakeConnector> {
        Arc::new(FakeConnector { server: self.clone() })
    }

    /// 기본 주소(`localhost:7687`)로 연결된 클라이언트
    pub async fn client(&self) -> BoltClient {
        self.client_at("localhost:7687").await
    }

    pub async fn client_at(&self, address: &str) -> BoltClient {
        let address = ServerAddress::parse(address).expect("valid address");
        BoltClient::connect(self.connector().as_ref(), &address, &ClientOptions::default())
            .await
            .expect("fake server accepts connections")
    }

    /// `at` 주소에 묻는 라우팅 요청의 응답 설정
    pub fn set_route(&self, at: &str, routers: &[&str], writers: &[&str], readers: &[&str], ttl: i64) {
        let owned = |list: &[&str]| list.iter().map(|s| s.to_string()).collect();
        self.state.lock().routes.insert(
            at.to_string(),
            FakeRoute {
                ttl,
                routers: owned(routers),
                writers: owned(writers),
                readers: owned(readers),
            },
        );
    }

    pub fn set_unreachable(&self, address: &str, unreachable: bool) {
        let mut state = self.state.lock();
        if unreachable {
            state.unreachable.insert(address.to_string());
        } else {
            state.unreachable.remove(address);
        }
    }

    pub fn drop_database(&self, name: &str) {
        self.state.lock().dropped_databases.insert(name.to_string());
    }

    /// 다음 `times`번의 RUN을 `code`로 실패시킴 (주소 무관)
    pub fn fail_next_runs(&self, code: &str, times: usize) {
        let mut state = self.state.lock();
        for _ in 0..times {
            state.failures.push_back(ScriptedFailure {
                address: None,
                code: code.to_string(),
            });
        }
    }

    /// 다음 `times`번의 PULL을 `code`로 실패시킴 (RUN은 성공)
    pub fn fail_next_pulls(&self, code: &str, times: usize) {
        let mut state = self.state.lock();
        state.pull_failures.extend(std::iter::repeat(code.to_string()).take(times));
    }

    /// `address`가 멈춤: 새 연결은 끝나지 않고 열린 연결은 응답하지 않음
    pub fn set_hanging(&self, address: &str, hanging: bool) {
        let mut state = self.state.lock();
        if hanging {
            state.hanging.insert(address.to_string());
        } else {
            state.hanging.remove(address);
        }
    }

    /// `address`에 오는 다음 RUN 하나를 `code`로 실패시킴
    pub fn fail_next_run_at(&self, address: &str, code: &str) {
        self.state.lock().failures.push_back(ScriptedFailure {
            address: Some(address.to_string()),
            code: code.to_string(),
        });
    }

    /// 지금 열린 `address` 연결을 다음 요청에서 끊음
    pub fn sever(&self, address: &str) {
        *self.state.lock().generations.entry(address.to_string()).or_default() += 1;
    }

    pub fn stats(&self, address: &str) -> AddressStats {
        self.state.lock().stats.get(address).copied().unwrap_or_default()
    }

    /// 발급된 북마크 수 (커밋된 작업 단위 수)
    pub fn commits(&self) -> usize {
        self.state.lock().bookmarks_issued
    }

    /// 커밋된 Item id
    pub fn items(&self) -> Vec<i64> {
        self.state.lock().items.clone()
    }
}

/// 가짜 서버로 연결하는 커넥터
#[derive(Debug)]
pub(crate) struct FakeConnector {
    server: FakeServer,
}

impl Connector for FakeConnector {
    fn connect<'a>(&'a self, address: &'a ServerAddress) -> BoxFuture<'a, io::Result<BoxTransport>> {
        Box::pin(async move {
            let name = address.to_string();
            if self.server.state.lock().hanging.contains(&name) {
                std::future::pending::<()>().await;
            }
            let (id, generation) = {
                let mut state = self.server.state.lock();
                if state.unreachable.contains(&name) {
                    return Err(io::Error::new(io::ErrorKind::ConnectionRefused, format!("{} is unreachable", name)));
                }
                state.stats_mut(&name).connections += 1;
                state.next_connection += 1;
                (state.next_connection, state.generations.get(&name).copied().unwrap_or(0))
            };

            let (client, server) = tokio::io::duplex(64 * 1024);
            let session = Session {
                server: self.server.clone(),
                address: name,
                id,
                generation,
                version: BoltVersion::V3_0,
                failed: false,
                hung: false,
                auto: None,
                tx: None,
            };
            tokio::spawn(session.serve(server));
            Ok(Box::new(client) as BoxTransport)
        })
    }
}

// ============================================================================
// Session - 연결 하나의 서버 측 상태
// ============================================================================

#[derive(Debug)]
enum Rows {
    Fixed(VecDeque<Vec<PackStreamValue>>),
    Range { next: i64, end: i64 },
    DivideByZero,
}

impl Rows {
    fn next_row(&mut self) -> Option<Vec<PackStreamValue>> {
        match self {
            Rows::Fixed(rows) => rows.pop_front(),
            Rows::Range { next, end } => {
                if *next > *end {
                    return None;
                }
                let value = *next;
                *next += 1;
                Some(vec![PackStreamValue::Integer(value)])
            }
            Rows::DivideByZero => None,
        }
    }

    fn is_exhausted(&self) -> bool {
        match self {
            Rows::Fixed(rows) => rows.is_empty(),
            Rows::Range { next, end } => next > end,
            Rows::DivideByZero => false,
        }
    }
}

#[derive(Debug)]
struct Cursor {
    keys: Vec<String>,
    rows: Rows,
    query_type: &'static str,
    nodes_created: i64,
    /// 자동 커밋에서 스트림 종료 시 반영할 쓰기
    created: Vec<i64>,
    database: String,
}

#[derive(Debug, Default)]
struct TxState {
    created: Vec<i64>,
    results: Vec<Option<Cursor>>,
    database: String,
}

struct Session {
    server: FakeServer,
    address: String,
    id: u64,
    generation: u64,
    version: BoltVersion,
    failed: bool,
    /// `CALL test.hang()` 이후 더는 응답하지 않음
    hung: bool,
    auto: Option<Cursor>,
    tx: Option<TxState>,
}

fn success() -> BoltResponse {
    BoltResponse::Success(SuccessMessage::new())
}

fn servers_value(route: &FakeRoute) -> PackStreamValue {
    let entry = |role: &str, addresses: &[String]| {
        let mut map = HashMap::new();
        map.insert("role".to_string(), PackStreamValue::from(role));
        map.insert("addresses".to_string(), PackStreamValue::from(addresses.to_vec()));
        PackStreamValue::Map(map)
    };
    PackStreamValue::List(vec![
        entry("ROUTE", &route.routers),
        entry("WRITE", &route.writers),
        entry("READ", &route.readers),
    ])
}

fn parse_range(query: &str) -> Option<(i64, i64)> {
    let rest = query.strip_prefix("UNWIND RANGE(")?;
    let (args, tail) = rest.split_once(')')?;
    if tail.trim() != "AS x RETURN x" {
        return None;
    }
    let (from, to) = args.split_once(',')?;
    Some((from.trim().parse().ok()?, to.trim().parse().ok()?))
}

impl Session {
    async fn serve(mut self, mut io: DuplexStream) {
        let mut preamble = [0u8; HANDSHAKE_SIZE];
        if io.read_exact(&mut preamble).await.is_err() {
            return;
        }
        let versions = self.server.state.lock().versions.clone();
        let reply = match negotiate(&preamble, &versions) {
            Ok(version) => {
                self.version = version;
                version.to_bytes()
            }
            Err(_) => [0; 4],
        };
        if io.write_all(&reply).await.is_err() || reply == [0; 4] {
            return;
        }

        let mut framed = Framed::new(io, BoltRequestCodec::new());
        while let Some(Ok(request)) = framed.next().await {
            if self.is_severed() || matches!(request, BoltRequest::Goodbye) {
                return;
            }
            for response in self.handle(request) {
                if framed.feed(response).await.is_err() {
                    return;
                }
            }
            if framed.flush().await.is_err() {
                return;
            }
        }
    }

    fn is_severed(&self) -> bool {
        let state = self.server.state.lock();
        state.generations.get(&self.address).copied().unwrap_or(0) != self.generation
    }

    fn count(&self, f: impl FnOnce(&mut AddressStats)) {
        f(self.server.state.lock().stats_mut(&self.address));
    }

    fn fail(&mut self, code: &str, message: &str) -> BoltResponse {
        self.failed = true;
        BoltResponse::Failure(FailureMessage::new(code, message))
    }

    fn handle(&mut self, request: BoltRequest) -> Vec<BoltResponse> {
        if self.hung || self.server.state.lock().hanging.contains(&self.address) {
            return vec![];
        }
        if self.failed && !matches!(request, BoltRequest::Reset) {
            return vec![BoltResponse::Ignored];
        }
        match request {
            BoltRequest::Hello(hello) => vec![self.hello(hello)],
            BoltRequest::Reset => {
                self.count(|s| s.resets += 1);
                self.failed = false;
                self.auto = None;
                self.tx = None;
                vec![success()]
            }
            BoltRequest::Run(run) => self.run(run),
            BoltRequest::Pull(pull) => {
                self.count(|s| s.pulls += 1);
                self.stream(pull.0, true)
            }
            BoltRequest::Discard(discard) => {
                self.count(|s| s.discards += 1);
                self.stream(discard.0, false)
            }
            BoltRequest::Begin(begin) => vec![self.begin(begin)],
            BoltRequest::Commit => vec![self.commit()],
            BoltRequest::Rollback => {
                self.count(|s| s.rollbacks += 1);
                match self.tx.take() {
                    Some(_) => vec![success()],
                    None => vec![self.fail(BoltErrorCode::REQUEST_INVALID, "no open transaction")],
                }
            }
            BoltRequest::Route(route) => vec![self.route(route)],
            BoltRequest::Goodbye => vec![],
        }
    }

    fn hello(&mut self, hello: HelloMessage) -> BoltResponse {
        let principal = hello.auth.get("principal").and_then(|v| v.as_str());
        if principal == Some("wrong") {
            return self.fail(BoltErrorCode::UNAUTHORIZED, "The client is unauthorized due to authentication failure.");
        }
        let agent = self.server.state.lock().agent.clone();
        BoltResponse::Success(
            SuccessMessage::new()
                .with("server", agent)
                .with("connection_id", format!("bolt-{}", self.id)),
        )
    }

    fn database_of(&self, name: Option<&str>) -> Result<String, String> {
        let name = name.unwrap_or(DEFAULT_DATABASE);
        if self.server.state.lock().dropped_databases.contains(name) {
            return Err(format!("Database does not exist. Database name: '{}'.", name));
        }
        Ok(name.to_string())
    }

    fn scripted_failure(&self) -> Option<String> {
        let mut state = self.server.state.lock();
        let index = state
            .failures
            .iter()
            .position(|f| f.address.as_deref().map_or(true, |a| a == self.address))?;
        state.failures.remove(index).map(|f| f.code)
    }

    fn run(&mut self, run: RunMessage) -> Vec<BoltResponse> {
        self.count(|s| s.runs += 1);

        if let Some(code) = self.scripted_failure() {
            return vec![self.fail(&code, "scripted failure")];
        }
        if self.tx.is_none() && self.auto.is_some() {
            return vec![self.fail(BoltErrorCode::REQUEST_INVALID, "RUN while a result is still open")];
        }

        let database = match &self.tx {
            Some(tx) => Ok(tx.database.clone()),
            None => {
                let extra = BeginMessage::from_extra(&run.extra);
                self.database_of(extra.database.as_deref())
            }
        };
        let database = match database {
            Ok(database) => database,
            Err(message) => return vec![self.fail(BoltErrorCode::DATABASE_NOT_FOUND, &message)],
        };

        if run.query == "CALL test.hang()" {
            self.hung = true;
            return vec![];
        }

        let cursor = match self.plan(&run, database) {
            Ok(cursor) => cursor,
            Err(message) => return vec![self.fail(BoltErrorCode::SYNTAX_ERROR, &message)],
        };

        let mut summary = SuccessMessage::new()
            .with("fields", cursor.keys.clone())
            .with("t_first", 0i64);
        match &mut self.tx {
            Some(tx) => {
                tx.created.extend(cursor.created.iter().copied());
                if self.version.supports_qid_and_pull_n() {
                    summary = summary.with("qid", tx.results.len() as i64);
                }
                tx.results.push(Some(cursor));
            }
            None => self.auto = Some(cursor),
        }
        vec![BoltResponse::Success(summary)]
    }

    fn visible_items(&self) -> Vec<i64> {
        let mut items = self.server.state.lock().items.clone();
        if let Some(tx) = &self.tx {
            items.extend(tx.created.iter().copied());
        }
        items
    }

    fn plan(&self, run: &RunMessage, database: String) -> Result<Cursor, String> {
        let query = run.query.trim();
        let param = |name: &str| run.parameters.get(name).cloned().unwrap_or(PackStreamValue::Null);
        let mut cursor = Cursor {
            keys: Vec::new(),
            rows: Rows::Fixed(VecDeque::new()),
            query_type: "r",
            nodes_created: 0,
            created: Vec::new(),
            database,
        };

        if query == "CREATE (n:Item {id: $id})" {
            let id = param("id").as_int().ok_or("id must be an integer")?;
            cursor.query_type = "w";
            cursor.nodes_created = 1;
            cursor.created.push(id);
        } else if query == "MATCH (n:Item {id: $id}) RETURN n.id" {
            let id = param("id").as_int().ok_or("id must be an integer")?;
            cursor.keys = vec!["n.id".into()];
            let rows = self
                .visible_items()
                .into_iter()
                .filter(|item| *item == id)
                .map(|item| vec![PackStreamValue::Integer(item)])
                .collect();
            cursor.rows = Rows::Fixed(rows);
        } else if query == "MATCH (n:Item) RETURN count(n)" {
            cursor.keys = vec!["count(n)".into()];
            let count = self.visible_items().len() as i64;
            cursor.rows = Rows::Fixed(VecDeque::from(vec![vec![PackStreamValue::Integer(count)]]));
        } else if let Some((from, to)) = parse_range(query) {
            cursor.keys = vec!["x".into()];
            cursor.rows = Rows::Range { next: from, end: to };
        } else if query == "RETURN $value" {
            cursor.keys = vec!["value".into()];
            cursor.rows = Rows::Fixed(VecDeque::from(vec![vec![param("value")]]));
        } else if query == "RETURN 1/0" {
            cursor.keys = vec!["1/0".into()];
            cursor.rows = Rows::DivideByZero;
        } else if query.starts_with("CALL dbms.routing.getRoutingTable")
            || query.starts_with("CALL dbms.cluster.routing.getRoutingTable")
        {
            let route = self
                .server
                .state
                .lock()
                .routes
                .get(&self.address)
                .cloned()
                .ok_or("routing is not configured")?;
            cursor.keys = vec!["ttl".into(), "servers".into()];
            cursor.rows = Rows::Fixed(VecDeque::from(vec![vec![
                PackStreamValue::Integer(route.ttl),
                servers_value(&route),
            ]]));
        } else {
            return Err(format!("Invalid input '{}'", query));
        }
        Ok(cursor)
    }

    /// PULL (`emit`) 또는 DISCARD
    fn stream(&mut self, control: StreamControl, emit: bool) -> Vec<BoltResponse> {
        let in_tx = self.tx.is_some();
        let taken = match &mut self.tx {
            Some(tx) => {
                let qid = control.qid.unwrap_or(-1);
                let index = if qid < 0 {
                    tx.results.len().checked_sub(1)
                } else {
                    Some(qid as usize)
                };
                index.and_then(|i| tx.results.get_mut(i).and_then(Option::take).map(|c| (i, c)))
            }
            None => self.auto.take().map(|c| (0, c)),
        };
        let Some((index, mut cursor)) = taken else {
            return vec![self.fail(BoltErrorCode::REQUEST_INVALID, "no open result to stream")];
        };

        if matches!(cursor.rows, Rows::DivideByZero) {
            return vec![self.fail(BoltErrorCode::ARITHMETIC_ERROR, "/ by zero")];
        }
        if emit {
            let scripted = self.server.state.lock().pull_failures.pop_front();
            if let Some(code) = scripted {
                return vec![self.fail(&code, "scripted failure")];
            }
        }

        let limit = control.n.filter(|n| *n >= 0).map(|n| n as usize);
        let mut responses = Vec::new();
        let mut taken_rows = 0usize;
        while limit.map_or(true, |limit| taken_rows < limit) {
            let Some(row) = cursor.rows.next_row() else { break };
            taken_rows += 1;
            if emit {
                responses.push(BoltResponse::Record(RecordMessage::new(row)));
            }
        }

        if !cursor.rows.is_exhausted() {
            responses.push(BoltResponse::Success(SuccessMessage::new().with("has_more", true)));
            match &mut self.tx {
                Some(tx) => tx.results[index] = Some(cursor),
                None => self.auto = Some(cursor),
            }
            return responses;
        }

        let mut summary = SuccessMessage::new()
            .with("type", cursor.query_type)
            .with("t_last", 0i64)
            .with("db", cursor.database.clone());
        if cursor.nodes_created > 0 {
            let mut stats = HashMap::new();
            stats.insert("nodes-created".to_string(), PackStreamValue::Integer(cursor.nodes_created));
            summary = summary.with("stats", stats);
        }
        if !in_tx {
            let mut state = self.server.state.lock();
            state.items.extend(cursor.created.iter().copied());
            let bookmark = state.issue_bookmark();
            summary = summary.with("bookmark", bookmark);
        }
        responses.push(BoltResponse::Success(summary));
        responses
    }

    fn begin(&mut self, begin: BeginMessage) -> BoltResponse {
        self.count(|s| s.begins += 1);
        if self.tx.is_some() || self.auto.is_some() {
            return self.fail(BoltErrorCode::REQUEST_INVALID, "BEGIN while busy");
        }
        match self.database_of(begin.database.as_deref()) {
            Ok(database) => {
                self.tx = Some(TxState {
                    database,
                    ..Default::default()
                });
                success()
            }
            Err(message) => self.fail(BoltErrorCode::DATABASE_NOT_FOUND, &message),
        }
    }

    fn commit(&mut self) -> BoltResponse {
        self.count(|s| s.commits += 1);
        let Some(tx) = self.tx.take() else {
            return self.fail(BoltErrorCode::REQUEST_INVALID, "no open transaction");
        };
        if tx.results.iter().any(Option::is_some) {
            self.tx = Some(tx);
            return self.fail(BoltErrorCode::REQUEST_INVALID, "COMMIT with open results");
        }
        let mut state = self.server.state.lock();
        state.items.extend(tx.created);
        let bookmark = state.issue_bookmark();
        BoltResponse::Success(SuccessMessage::new().with("bookmark", bookmark))
    }

    fn route(&mut self, route: RouteMessage) -> BoltResponse {
        self.count(|s| s.routes += 1);
        let database = match self.database_of(route.database.as_deref()) {
            Ok(database) => database,
            Err(message) => return self.fail(BoltErrorCode::DATABASE_NOT_FOUND, &message),
        };
        let configured = self.server.state.lock().routes.get(&self.address).cloned();
        let Some(table) = configured else {
            return self.fail(BoltErrorCode::GENERAL_ERROR, "routing is not configured");
        };

        let mut rt: Metadata = HashMap::new();
        rt.insert("ttl".into(), PackStreamValue::Integer(table.ttl));
        rt.insert("db".into(), PackStreamValue::from(database));
        rt.insert("servers".into(), servers_value(&table));
        BoltResponse::Success(SuccessMessage::new().with("rt", rt))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_range() {
        assert_eq!(parse_range("UNWIND RANGE(1, 10) AS x RETURN x"), Some((1, 10)));
        assert_eq!(parse_range("UNWIND RANGE(-3,3) AS x RETURN x"), Some((-3, 3)));
        assert_eq!(parse_range("UNWIND RANGE(1, 10) AS y RETURN y"), None);
    }

    #[test]
    fn test_range_rows_are_lazy() {
        let mut rows = Rows::Range { next: 1, end: 1_000_000 };
        assert_eq!(rows.next_row(), Some(vec![PackStreamValue::Integer(1)]));
        assert!(!rows.is_exhausted());
    }

    #[tokio::test]
    async fn test_unreachable_address() {
        let server = FakeServer::new();
        server.set_unreachable("a:7687", true);
        let connector = server.connector();
        let result = connector.connect(&ServerAddress::new("a", 7687)).await;
        assert!(result.is_err());
        assert_eq!(server.stats("a:7687").connections, 0);
    }
}
