//! Driver
//!
//! 드라이버 인스턴스 및 설정

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use tracing::{debug, info};

use super::bolt::{routing_entries, ClientOptions, CLIENT_USER_AGENT};
use super::connection::{Connection, DatabaseSelector};
use super::error::{DriverError, DriverResult};
use super::pool::{ConnectionPool, PoolConfig, PoolMetrics, PooledConnection};
use super::retry::{Committed, RetryConfig, Transaction, TransactionExecutor};
use super::routing::{Router, RoutingPolicy, ServerSelector};
use super::transport::{Connector, TcpConnector};
use super::types::{AccessMode, TxConfig};

/// 기본 Bolt 포트
pub const DEFAULT_PORT: u16 = 7687;

// ============================================================================
// AuthToken - 인증 토큰
// ============================================================================

/// 인증 토큰
#[derive(Debug, Clone, Default)]
pub enum AuthToken {
    /// 인증 없음
    #[default]
    None,
    /// Basic 인증 (사용자명/비밀번호)
    Basic {
        /// 사용자명
        username: String,
        /// 비밀번호
        password: String,
        /// 인증 영역
        realm: Option<String>,
    },
    /// Bearer 토큰
    Bearer {
        /// 토큰 문자열
        token: String,
    },
    /// 커스텀 인증
    Custom {
        /// 주체
        principal: String,
        /// 자격 증명
        credentials: String,
        /// 인증 영역
        realm: String,
        /// 인증 방식 이름
        scheme: String,
        /// 추가 파라미터
        parameters: Option<HashMap<String, String>>,
    },
}

impl AuthToken {
    /// Basic 인증 토큰 생성
    pub fn basic(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self::Basic {
            username: username.into(),
            password: password.into(),
            realm: None,
        }
    }

    /// Basic 인증 토큰 생성 (realm 포함)
    pub fn basic_with_realm(
        username: impl Into<String>,
        password: impl Into<String>,
        realm: impl Into<String>,
    ) -> Self {
        Self::Basic {
            username: username.into(),
            password: password.into(),
            realm: Some(realm.into()),
        }
    }

    /// Bearer 토큰 생성
    pub fn bearer(token: impl Into<String>) -> Self {
        Self::Bearer { token: token.into() }
    }

    /// 커스텀 스킴 토큰 생성
    pub fn custom(
        principal: impl Into<String>,
        credentials: impl Into<String>,
        realm: impl Into<String>,
        scheme: impl Into<String>,
    ) -> Self {
        Self::Custom {
            principal: principal.into(),
            credentials: credentials.into(),
            realm: realm.into(),
            scheme: scheme.into(),
            parameters: None,
        }
    }

    /// 인증 없음
    pub fn none() -> Self {
        Self::None
    }

    /// 인증 스킴
    pub fn scheme(&self) -> &str {
        match self {
            Self::None => "none",
            Self::Basic { .. } => "basic",
            Self::Bearer { .. } => "bearer",
            Self::Custom { scheme, .. } => scheme,
        }
    }
}

// ============================================================================
// ServerAddress - 서버 주소
// ============================================================================

/// 서버 주소
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ServerAddress {
    /// 호스트
    pub host: String,
    /// 포트
    pub port: u16,
}

impl ServerAddress {
    /// 새 서버 주소 생성
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// `host`, `host:port`, `[v6]`, `[v6]:port` 형식 파싱 (기본 포트 7687)
    pub fn parse(s: &str) -> DriverResult<Self> {
        let s = s.trim();
        let (host, port) = if let Some(rest) = s.strip_prefix('[') {
            let (host, after) = rest
                .split_once(']')
                .ok_or_else(|| DriverError::configuration(format!("Invalid server address: {}", s)))?;
            let port = match after {
                "" => None,
                _ => Some(after.strip_prefix(':').ok_or_else(|| {
                    DriverError::configuration(format!("Invalid server address: {}", s))
                })?),
            };
            (host, port)
        } else {
            match s.split_once(':') {
                Some((_, port)) if port.contains(':') => {
                    return Err(DriverError::configuration(format!(
                        "IPv6 addresses must be bracketed: {}",
                        s
                    )))
                }
                Some((host, port)) => (host, Some(port)),
                None => (s, None),
            }
        };

        if host.is_empty() {
            return Err(DriverError::configuration(format!("Missing host in address: {}", s)));
        }
        let port = match port {
            Some(port) => port
                .parse()
                .map_err(|_| DriverError::configuration(format!("Invalid port in address: {}", s)))?,
            None => DEFAULT_PORT,
        };
        Ok(Self::new(host, port))
    }
}

impl fmt::Display for ServerAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}

impl Default for ServerAddress {
    fn default() -> Self {
        Self::new("localhost", DEFAULT_PORT)
    }
}

// ============================================================================
// Topology - URI가 가리키는 배치
// ============================================================================

/// 접속 대상 배치
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Topology {
    /// `bolt://` 단일 서버
    Direct(ServerAddress),
    /// `neo4j://`, `zeta4g://` 클러스터 (시드 주소)
    Cluster(Vec<ServerAddress>),
}

/// 파싱된 URI
#[derive(Debug)]
struct ParsedUri {
    topology: Topology,
    encrypted: bool,
    context: HashMap<String, String>,
}

fn parse_uri(uri: &str) -> DriverResult<ParsedUri> {
    let (scheme, rest) = uri
        .split_once("://")
        .ok_or_else(|| DriverError::configuration(format!("Missing URI scheme: {}", uri)))?;

    let (routing, encrypted) = match scheme.to_ascii_lowercase().as_str() {
        "bolt" => (false, false),
        "bolt+s" | "bolt+ssc" => (false, true),
        "neo4j" | "zeta4g" => (true, false),
        "neo4j+s" | "neo4j+ssc" | "zeta4g+s" | "zeta4g+ssc" => (true, true),
        other => return Err(DriverError::configuration(format!("Unsupported URI scheme: {}", other))),
    };

    let (hosts, query) = match rest.split_once('?') {
        Some((hosts, query)) => (hosts, Some(query)),
        None => (rest, None),
    };
    let seeds = hosts
        .trim_end_matches('/')
        .split(',')
        .map(ServerAddress::parse)
        .collect::<DriverResult<Vec<_>>>()?;

    let mut context = HashMap::new();
    if let Some(query) = query.filter(|q| !q.is_empty()) {
        if !routing {
            return Err(DriverError::configuration(format!(
                "Routing context is not supported for scheme {}",
                scheme
            )));
        }
        for pair in query.split('&') {
            let (key, value) = pair
                .split_once('=')
                .filter(|(k, v)| !k.is_empty() && !v.is_empty())
                .ok_or_else(|| DriverError::configuration(format!("Invalid routing context entry: {}", pair)))?;
            if key == "address" {
                return Err(DriverError::configuration("Routing context key 'address' is reserved"));
            }
            context.insert(key.to_string(), value.to_string());
        }
    }

    let topology = if routing {
        context.insert("address".to_string(), seeds[0].to_string());
        Topology::Cluster(seeds)
    } else {
        match <[ServerAddress; 1]>::try_from(seeds) {
            Ok([address]) => Topology::Direct(address),
            Err(_) => {
                return Err(DriverError::configuration(format!(
                    "Scheme {} accepts a single address",
                    scheme
                )))
            }
        }
    };

    Ok(ParsedUri {
        topology,
        encrypted,
        context,
    })
}

// ============================================================================
// DriverConfig - 드라이버 설정
// ============================================================================

/// 드라이버 설정
#[derive(Debug, Clone)]
pub struct DriverConfig {
    /// 접속 대상
    pub topology: Topology,
    /// 라우팅 컨텍스트 (클러스터 전용)
    pub routing_context: HashMap<String, String>,
    /// 암호화 스킴 여부 (`+s`, `+ssc`)
    pub encrypted: bool,
    /// 인증 토큰
    pub auth: AuthToken,
    /// User Agent
    pub user_agent: String,
    /// PULL당 레코드 수 (-1 = 전체)
    pub fetch_size: i64,
    /// 연결 타임아웃
    pub connection_timeout: Duration,
    /// 연결 획득 타임아웃
    pub connection_acquisition_timeout: Duration,
    /// 네트워크 작업별 타임아웃
    pub io_timeout: Option<Duration>,
    /// 주소별 연결 풀 최대 크기
    pub max_connection_pool_size: usize,
    /// 연결 최대 수명
    pub max_connection_lifetime: Duration,
    /// 유휴 연결 폐기 시간
    pub idle_timeout: Duration,
    /// 이 시간 이상 유휴였던 연결은 재사용 전에 검사
    pub liveness_check_timeout: Option<Duration>,
    /// 트랜잭션 재시도
    pub retry: RetryConfig,
    /// 서버 선택 정책
    pub routing_policy: RoutingPolicy,
}

impl DriverConfig {
    /// URI를 파싱해 기본값으로 설정 생성
    pub fn new(uri: &str, auth: AuthToken) -> DriverResult<Self> {
        let parsed = parse_uri(uri)?;
        Ok(Self {
            topology: parsed.topology,
            routing_context: parsed.context,
            encrypted: parsed.encrypted,
            auth,
            ..Self::default()
        })
    }

    /// 빌더 시작
    pub fn builder(uri: &str, auth: AuthToken) -> DriverResult<DriverConfigBuilder> {
        let config = Self::new(uri, auth)?;
        Ok(DriverConfigBuilder { config })
    }

    /// 클러스터 라우팅 여부
    pub fn is_routing(&self) -> bool {
        matches!(self.topology, Topology::Cluster(_))
    }

    /// 연결 풀 설정
    pub fn pool_config(&self) -> PoolConfig {
        let mut builder = PoolConfig::builder()
            .max_size(self.max_connection_pool_size)
            .max_lifetime(self.max_connection_lifetime)
            .idle_timeout(self.idle_timeout)
            .connection_timeout(self.connection_timeout);
        if let Some(timeout) = self.liveness_check_timeout {
            builder = builder.liveness_check_timeout(timeout);
        }
        builder.build()
    }

    /// 연결을 열 때 쓰는 옵션
    pub fn client_options(&self) -> ClientOptions {
        ClientOptions {
            user_agent: self.user_agent.clone(),
            auth: self.auth.clone(),
            routing: self.is_routing().then(|| routing_entries(&self.routing_context)),
            connection_timeout: self.connection_timeout,
            io_timeout: self.io_timeout,
            fetch_size: self.fetch_size,
        }
    }

    fn validate(&self) -> DriverResult<()> {
        if self.max_connection_pool_size == 0 {
            return Err(DriverError::configuration("max_connection_pool_size must be positive"));
        }
        if self.fetch_size == 0 || self.fetch_size < -1 {
            return Err(DriverError::configuration("fetch_size must be positive or -1"));
        }
        if self.retry.multiplier.is_nan() || self.retry.multiplier < 1.0 {
            return Err(DriverError::configuration("retry multiplier must be at least 1.0"));
        }
        Ok(())
    }
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            topology: Topology::Direct(ServerAddress::default()),
            routing_context: HashMap::new(),
            encrypted: false,
            auth: AuthToken::default(),
            user_agent: CLIENT_USER_AGENT.to_string(),
            fetch_size: 1000,
            connection_timeout: Duration::from_secs(30),
            connection_acquisition_timeout: Duration::from_secs(60),
            io_timeout: None,
            max_connection_pool_size: 100,
            max_connection_lifetime: Duration::from_secs(3600),
            idle_timeout: Duration::from_secs(300),
            liveness_check_timeout: None,
            retry: RetryConfig::default(),
            routing_policy: RoutingPolicy::default(),
        }
    }
}

// ============================================================================
// DriverConfigBuilder - 설정 빌더
// ============================================================================

/// 드라이버 설정 빌더
#[derive(Debug)]
pub struct DriverConfigBuilder {
    config: DriverConfig,
}

impl DriverConfigBuilder {
    /// User Agent 설정
    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.config.user_agent = user_agent.into();
        self
    }

    /// Fetch Size 설정 (-1 = 전체)
    pub fn with_fetch_size(mut self, size: i64) -> Self {
        self.config.fetch_size = size;
        self
    }

    /// 연결 타임아웃 설정
    pub fn with_connection_timeout(mut self, timeout: Duration) -> Self {
        self.config.connection_timeout = timeout;
        self
    }

    /// 연결 획득 타임아웃 설정
    pub fn with_connection_acquisition_timeout(mut self, timeout: Duration) -> Self {
        self.config.connection_acquisition_timeout = timeout;
        self
    }

    /// 네트워크 작업 타임아웃 설정
    pub fn with_io_timeout(mut self, timeout: Duration) -> Self {
        self.config.io_timeout = Some(timeout);
        self
    }

    /// 연결 풀 크기 설정
    pub fn with_max_connection_pool_size(mut self, size: usize) -> Self {
        self.config.max_connection_pool_size = size;
        self
    }

    /// 연결 최대 수명 설정
    pub fn with_max_connection_lifetime(mut self, lifetime: Duration) -> Self {
        self.config.max_connection_lifetime = lifetime;
        self
    }

    /// 유휴 타임아웃 설정
    pub fn with_idle_timeout(mut self, timeout: Duration) -> Self {
        self.config.idle_timeout = timeout;
        self
    }

    /// 유휴 연결 검사 기준 설정
    pub fn with_liveness_check_timeout(mut self, timeout: Duration) -> Self {
        self.config.liveness_check_timeout = Some(timeout);
        self
    }

    /// 재시도 설정
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.config.retry = retry;
        self
    }

    /// 최대 트랜잭션 재시도 시간 설정
    pub fn with_max_transaction_retry_time(mut self, time: Duration) -> Self {
        self.config.retry.max_retry_time = time;
        self
    }

    /// 서버 선택 정책 설정
    pub fn with_routing_policy(mut self, policy: RoutingPolicy) -> Self {
        self.config.routing_policy = policy;
        self
    }

    /// 라우팅 컨텍스트 항목 추가
    pub fn with_routing_context(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.config.routing_context.insert(key.into(), value.into());
        self
    }

    /// 빌드
    pub fn build(self) -> DriverConfig {
        self.config
    }
}

// ============================================================================
// Driver - 드라이버
// ============================================================================

/// 그래프 데이터베이스 드라이버
///
/// 연결 풀, 라우터, 재시도 실행기를 소유합니다. 복제하지 말고 `Arc`로 공유하세요.
pub struct Driver {
    /// 설정
    config: DriverConfig,
    /// 연결 풀
    pool: Arc<ConnectionPool>,
    /// 라우터
    router: Arc<Router>,
    /// 재시도 실행기
    executor: TransactionExecutor,
    /// 열린 상태
    open: AtomicBool,
}

impl Driver {
    /// 새 드라이버 생성
    pub fn new(uri: &str, auth: AuthToken) -> DriverResult<Self> {
        let config = DriverConfig::new(uri, auth)?;
        Self::with_config(config)
    }

    /// 설정으로 드라이버 생성 (평문 TCP)
    ///
    /// 암호화 스킴에는 TLS를 제공하는 커넥터가 필요하므로
    /// [`Driver::with_connector`]를 사용해야 합니다.
    pub fn with_config(config: DriverConfig) -> DriverResult<Self> {
        if config.encrypted {
            return Err(DriverError::configuration(
                "Encrypted schemes need a TLS connector; use Driver::with_connector",
            ));
        }
        Self::with_connector(config, Arc::new(TcpConnector))
    }

    /// 설정과 커넥터로 드라이버 생성
    pub fn with_connector(config: DriverConfig, connector: Arc<dyn Connector>) -> DriverResult<Self> {
        config.validate()?;

        let pool = Arc::new(ConnectionPool::new(config.pool_config(), config.client_options(), connector));
        let router = Arc::new(match &config.topology {
            Topology::Direct(address) => Router::direct(address.clone()),
            Topology::Cluster(seeds) => Router::cluster(
                seeds.clone(),
                routing_entries(&config.routing_context),
                pool.clone(),
                config.connection_acquisition_timeout,
            ),
        });
        let executor = TransactionExecutor::new(
            router.clone(),
            pool.clone(),
            ServerSelector::new(config.routing_policy),
            config.retry.clone(),
            config.connection_acquisition_timeout,
        );

        debug!(topology = ?config.topology, "driver created");
        Ok(Self {
            config,
            pool,
            router,
            executor,
            open: AtomicBool::new(true),
        })
    }

    /// 드라이버 설정
    pub fn config(&self) -> &DriverConfig {
        &self.config
    }

    /// 라우터
    pub fn router(&self) -> &Router {
        &self.router
    }

    /// 열린 상태 확인
    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire)
    }

    fn ensure_open(&self) -> DriverResult<()> {
        if self.is_open() {
            Ok(())
        } else {
            Err(DriverError::PoolClosed)
        }
    }

    /// 재시도하며 작업 단위 실행
    ///
    /// 작업 함수는 재시도 때 처음부터 다시 호출되므로, 커밋 전까지
    /// 트랜잭션 밖에 부작용을 남기지 않아야 합니다.
    pub async fn execute<T, F>(&self, config: TxConfig, work: F) -> DriverResult<Committed<T>>
    where
        F: for<'t> FnMut(&'t mut Transaction) -> BoxFuture<'t, DriverResult<T>>,
    {
        self.ensure_open()?;
        self.executor.execute(config, work).await
    }

    /// 읽기 트랜잭션으로 실행
    pub async fn execute_read<T, F>(&self, config: TxConfig, work: F) -> DriverResult<Committed<T>>
    where
        F: for<'t> FnMut(&'t mut Transaction) -> BoxFuture<'t, DriverResult<T>>,
    {
        self.execute(TxConfig { mode: AccessMode::Read, ..config }, work).await
    }

    /// 쓰기 트랜잭션으로 실행
    pub async fn execute_write<T, F>(&self, config: TxConfig, work: F) -> DriverResult<Committed<T>>
    where
        F: for<'t> FnMut(&'t mut Transaction) -> BoxFuture<'t, DriverResult<T>>,
    {
        self.execute(TxConfig { mode: AccessMode::Write, ..config }, work).await
    }

    /// 직접 사용할 연결 획득
    ///
    /// 연결에는 `database`가 선택되어 있습니다 (서버가 지원하는 경우).
    /// 다 쓴 연결은 [`Driver::release`]로 돌려줘야 합니다.
    pub async fn acquire(&self, database: Option<&str>, mode: AccessMode) -> DriverResult<PooledConnection> {
        self.ensure_open()?;
        let mut conn = self.executor.acquire(database, mode).await?;
        if let Some(selector) = conn.database_selector() {
            selector.select_database(database);
        }
        Ok(conn)
    }

    /// 연결 반환
    pub async fn release(&self, conn: PooledConnection) {
        self.pool.release(conn).await;
    }

    /// 연결 테스트 (클러스터는 라우팅 테이블 조회 포함)
    pub async fn verify_connectivity(&self) -> DriverResult<()> {
        let conn = self.acquire(None, AccessMode::Read).await?;
        debug!(server = conn.server_name(), agent = conn.server_version(), "connectivity verified");
        self.release(conn).await;
        Ok(())
    }

    /// 주소별 풀 메트릭
    pub fn metrics(&self, address: &ServerAddress) -> PoolMetrics {
        self.pool.metrics(address)
    }

    /// 드라이버 종료
    ///
    /// 라우팅 캐시를 비우고 모든 연결을 닫습니다. 두 번째 호출은 아무것도 하지 않습니다.
    pub async fn close(&self) {
        if !self.open.swap(false, Ordering::AcqRel) {
            return;
        }
        self.router.cleanup();
        self.pool.close().await;
        info!("driver closed");
    }
}

impl fmt::Debug for Driver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Driver")
            .field("topology", &self.config.topology)
            .field("open", &self.is_open())
            .finish()
    }
}

// ============================================================================
// Tests
// ============================================================================
