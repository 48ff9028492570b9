//! Connection Pool
//!
//! 서버 주소별 연결 풀링

use std::collections::{HashMap, VecDeque};
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::{Notify, OwnedSemaphorePermit, Semaphore};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::bolt::{BoltClient, ClientOptions};
use super::connection::{Connection, ConnectionState};
use super::driver::ServerAddress;
use super::error::{DriverError, DriverResult};
use super::transport::Connector;

/// 획득 기한으로 표현할 수 없는 대기 시간의 상한
const FAR_FUTURE: Duration = Duration::from_secs(100 * 365 * 24 * 3600);

// ============================================================================
// PoolConfig - 풀 설정
// ============================================================================

/// 연결 풀 설정
///
/// # 필드
///
/// | 필드 | 기본값 | 설명 |
/// |------|--------|------|
/// | `max_size` | 100 | 주소별 최대 연결 수 |
/// | `max_lifetime` | 1시간 | 연결 최대 수명 |
/// | `idle_timeout` | 5분 | 유휴 타임아웃 |
/// | `connection_timeout` | 30초 | 새 연결 타임아웃 |
/// | `liveness_check_timeout` | 없음 | 이보다 오래 쉰 연결은 RESET으로 확인 |
/// | `validation_timeout` | 5초 | 확인용 RESET 타임아웃 |
///
/// # 예시
///
/// ```rust,ignore
/// use zeta4g_driver_core::driver::PoolConfig;
/// use std::time::Duration;
///
/// let config = PoolConfig::builder()
///     .max_size(50)
///     .liveness_check_timeout(Duration::from_secs(30))
///     .build();
/// ```
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// 주소별 최대 연결 수
    pub max_size: usize,
    /// 연결 최대 수명
    pub max_lifetime: Duration,
    /// 유휴 타임아웃
    pub idle_timeout: Duration,
    /// 연결 타임아웃
    pub connection_timeout: Duration,
    /// 유휴 시간이 이 값을 넘으면 대여 전에 RESET 왕복으로 확인
    pub liveness_check_timeout: Option<Duration>,
    /// 확인 타임아웃
    pub validation_timeout: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_size: 100,
            max_lifetime: Duration::from_secs(3600),
            idle_timeout: Duration::from_secs(300),
            connection_timeout: Duration::from_secs(30),
            liveness_check_timeout: None,
            validation_timeout: Duration::from_secs(5),
        }
    }
}

impl PoolConfig {
    /// 빌더 패턴으로 풀 설정 생성
    pub fn builder() -> PoolConfigBuilder {
        PoolConfigBuilder::default()
    }
}

/// 풀 설정 빌더
#[derive(Debug, Clone, Default)]
pub struct PoolConfigBuilder {
    config: PoolConfig,
}

impl PoolConfigBuilder {
    /// 최대 연결 수 설정
    pub fn max_size(mut self, size: usize) -> Self {
        self.config.max_size = size;
        self
    }

    /// 연결 최대 수명 설정
    pub fn max_lifetime(mut self, duration: Duration) -> Self {
        self.config.max_lifetime = duration;
        self
    }

    /// 유휴 타임아웃 설정
    pub fn idle_timeout(mut self, duration: Duration) -> Self {
        self.config.idle_timeout = duration;
        self
    }

    /// 연결 타임아웃 설정
    pub fn connection_timeout(mut self, duration: Duration) -> Self {
        self.config.connection_timeout = duration;
        self
    }

    /// 생존 확인 기준 설정
    pub fn liveness_check_timeout(mut self, duration: Duration) -> Self {
        self.config.liveness_check_timeout = Some(duration);
        self
    }

    /// 검증 타임아웃 설정
    pub fn validation_timeout(mut self, duration: Duration) -> Self {
        self.config.validation_timeout = duration;
        self
    }

    /// 설정 빌드
    pub fn build(self) -> PoolConfig {
        self.config
    }
}

// ============================================================================
// PooledConnection - 풀링된 연결
// ============================================================================

/// 풀에서 대여한 연결
///
/// [`BoltClient`]로 deref 됩니다. 사용 후 [`ConnectionPool::release`]로
/// 돌려줘야 하며, 그냥 drop 하면 연결은 닫히고 용량만 반환됩니다.
pub struct PooledConnection {
    id: u64,
    client: BoltClient,
    created_at: Instant,
    last_used: Instant,
    /// 열린 연결마다 하나씩 보유 (유휴 포함)
    _permit: OwnedSemaphorePermit,
}

impl PooledConnection {
    /// 연결 ID (풀 안에서 유일)
    pub fn id(&self) -> u64 {
        self.id
    }

    /// 생성 시간
    pub fn created_at(&self) -> Instant {
        self.created_at
    }

    /// 마지막으로 풀에 반환된 시간
    pub fn last_used(&self) -> Instant {
        self.last_used
    }

    /// 수명/유휴 시간 기준으로 재사용 가능한지
    fn is_fresh(&self, config: &PoolConfig) -> bool {
        self.client.is_alive()
            && self.client.state() == ConnectionState::Ready
            && self.created_at.elapsed() < config.max_lifetime
            && self.last_used.elapsed() < config.idle_timeout
    }

    fn needs_liveness_check(&self, config: &PoolConfig) -> bool {
        config
            .liveness_check_timeout
            .map_or(false, |limit| self.last_used.elapsed() >= limit)
    }
}

impl Deref for PooledConnection {
    type Target = BoltClient;

    fn deref(&self) -> &BoltClient {
        &self.client
    }
}

impl DerefMut for PooledConnection {
    fn deref_mut(&mut self) -> &mut BoltClient {
        &mut self.client
    }
}

impl std::fmt::Debug for PooledConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PooledConnection")
            .field("id", &self.id)
            .field("address", self.client.address())
            .field("state", &self.client.state())
            .field("age", &self.created_at.elapsed())
            .finish()
    }
}

// ============================================================================
// PoolMetrics - 풀 메트릭
// ============================================================================

/// 주소별 풀 메트릭
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PoolMetrics {
    /// 열린 연결 수 (유휴 + 사용 중)
    pub size: usize,
    /// 유휴 연결 수
    pub idle: usize,
    /// 사용 중인 연결 수
    pub in_use: usize,
    /// 총 획득 횟수
    pub total_acquisitions: u64,
    /// 총 생성 횟수
    pub total_created: u64,
    /// 풀이 닫은 연결 수
    pub total_closed: u64,
    /// 총 타임아웃 횟수
    pub total_timeouts: u64,
}

// ============================================================================
// ServerPool - 주소 하나의 연결 집합
// ============================================================================

struct ServerPool {
    address: ServerAddress,
    max_size: usize,
    idle: Mutex<VecDeque<PooledConnection>>,
    permits: Arc<Semaphore>,
    returned: Notify,
    total_acquisitions: AtomicU64,
    total_created: AtomicU64,
    total_closed: AtomicU64,
    total_timeouts: AtomicU64,
}

impl ServerPool {
    fn new(address: ServerAddress, max_size: usize) -> Self {
        Self {
            address,
            max_size,
            idle: Mutex::new(VecDeque::new()),
            permits: Arc::new(Semaphore::new(max_size)),
            returned: Notify::new(),
            total_acquisitions: AtomicU64::new(0),
            total_created: AtomicU64::new(0),
            total_closed: AtomicU64::new(0),
            total_timeouts: AtomicU64::new(0),
        }
    }

    /// 가장 최근에 반환된 유휴 연결
    fn pop_idle(&self) -> Option<PooledConnection> {
        self.idle.lock().pop_back()
    }

    fn push_idle(&self, conn: PooledConnection) {
        self.idle.lock().push_back(conn);
        self.returned.notify_one();
    }

    fn drain_idle(&self) -> Vec<PooledConnection> {
        self.idle.lock().drain(..).collect()
    }

    async fn discard(&self, mut conn: PooledConnection) {
        conn.client.close().await;
        self.total_closed.fetch_add(1, Ordering::Relaxed);
    }

    fn metrics(&self) -> PoolMetrics {
        let idle = self.idle.lock().len();
        let size = self.max_size.saturating_sub(self.permits.available_permits());
        PoolMetrics {
            size,
            idle,
            in_use: size.saturating_sub(idle),
            total_acquisitions: self.total_acquisitions.load(Ordering::Relaxed),
            total_created: self.total_created.load(Ordering::Relaxed),
            total_closed: self.total_closed.load(Ordering::Relaxed),
            total_timeouts: self.total_timeouts.load(Ordering::Relaxed),
        }
    }
}

// ============================================================================
// ConnectionPool - 연결 풀
// ============================================================================

/// 연결 풀
///
/// 주소마다 용량이 제한된 연결 집합을 유지합니다. 주소별 유휴 목록은
/// 각자의 락으로 보호되므로 서로 다른 주소의 작업은 직렬화되지 않습니다.
pub struct ConnectionPool {
    config: PoolConfig,
    options: ClientOptions,
    connector: Arc<dyn Connector>,
    servers: Mutex<HashMap<ServerAddress, Arc<ServerPool>>>,
    next_id: AtomicU64,
    open: AtomicBool,
}

impl ConnectionPool {
    /// 새 연결 풀 생성
    pub fn new(config: PoolConfig, options: ClientOptions, connector: Arc<dyn Connector>) -> Self {
        let options = ClientOptions {
            connection_timeout: config.connection_timeout,
            ..options
        };
        Self {
            config,
            options,
            connector,
            servers: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            open: AtomicBool::new(true),
        }
    }

    /// 풀 설정
    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire)
    }

    fn server(&self, address: &ServerAddress) -> Arc<ServerPool> {
        self.servers
            .lock()
            .entry(address.clone())
            .or_insert_with(|| Arc::new(ServerPool::new(address.clone(), self.config.max_size)))
            .clone()
    }

    fn existing_server(&self, address: &ServerAddress) -> Option<Arc<ServerPool>> {
        self.servers.lock().get(address).cloned()
    }

    /// 연결 획득
    ///
    /// 유휴 연결을 먼저 검증해서 재사용하고, 용량이 남아 있으면 새로 연결합니다.
    /// 둘 다 안 되면 연결이 반환되거나 용량이 생길 때까지 `timeout`만큼
    /// 기다린 뒤 `PoolExhausted`로 실패합니다. 새 연결 수립도 같은 기한 안에
    /// 끝나야 하며, 넘기면 `Timeout`입니다.
    pub async fn acquire(&self, address: &ServerAddress, timeout: Duration) -> DriverResult<PooledConnection> {
        let server = self.server(address);
        let now = Instant::now();
        let deadline = now.checked_add(timeout).unwrap_or(now + FAR_FUTURE);

        loop {
            if !self.is_open() {
                return Err(DriverError::PoolClosed);
            }

            while let Some(conn) = server.pop_idle() {
                if let Some(conn) = self.validate(&server, conn).await {
                    server.total_acquisitions.fetch_add(1, Ordering::Relaxed);
                    return Ok(conn);
                }
            }

            if let Ok(permit) = server.permits.clone().try_acquire_owned() {
                return self.open_connection(&server, permit, deadline, timeout).await;
            }

            tokio::select! {
                permit = server.permits.clone().acquire_owned() => {
                    let permit = permit.map_err(|_| DriverError::PoolClosed)?;
                    return self.open_connection(&server, permit, deadline, timeout).await;
                }
                _ = server.returned.notified() => continue,
                _ = tokio::time::sleep_until(deadline) => {
                    server.total_timeouts.fetch_add(1, Ordering::Relaxed);
                    warn!(address = %address, waited = ?timeout, "connection pool exhausted");
                    return Err(DriverError::PoolExhausted {
                        address: address.to_string(),
                        waited: timeout,
                    });
                }
            }
        }
    }

    /// 유휴 연결 검증, 쓸 수 없으면 닫고 `None`
    async fn validate(&self, server: &ServerPool, mut conn: PooledConnection) -> Option<PooledConnection> {
        if !conn.is_fresh(&self.config) {
            debug!(address = %server.address, id = conn.id, "discarding stale connection");
            server.discard(conn).await;
            return None;
        }

        if conn.needs_liveness_check(&self.config) {
            let check = tokio::time::timeout(self.config.validation_timeout, conn.client.reset()).await;
            if !matches!(check, Ok(Ok(()))) {
                warn!(address = %server.address, id = conn.id, "connection failed liveness check");
                server.discard(conn).await;
                return None;
            }
        }
        Some(conn)
    }

    async fn open_connection(
        &self,
        server: &ServerPool,
        permit: OwnedSemaphorePermit,
        deadline: Instant,
        timeout: Duration,
    ) -> DriverResult<PooledConnection> {
        let connect = BoltClient::connect(self.connector.as_ref(), &server.address, &self.options);
        let client = match tokio::time::timeout_at(deadline, connect).await {
            Ok(client) => client?,
            Err(_) => {
                server.total_timeouts.fetch_add(1, Ordering::Relaxed);
                warn!(address = %server.address, waited = ?timeout, "connect timed out");
                return Err(DriverError::timeout(format!(
                    "could not connect to {} within {:?}",
                    server.address, timeout
                )));
            }
        };
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        debug!(address = %server.address, id, "opened pooled connection");

        server.total_created.fetch_add(1, Ordering::Relaxed);
        server.total_acquisitions.fetch_add(1, Ordering::Relaxed);

        let now = Instant::now();
        Ok(PooledConnection {
            id,
            client,
            created_at: now,
            last_used: now,
            _permit: permit,
        })
    }

    /// 연결 반환
    ///
    /// DEAD 연결은 버리고, READY가 아닌 연결은 RESET 후 유휴 목록에 넣습니다.
    pub async fn release(&self, mut conn: PooledConnection) {
        let Some(server) = self.existing_server(conn.client.address()) else {
            conn.client.close().await;
            return;
        };

        if !self.is_open() {
            server.discard(conn).await;
            return;
        }

        if !conn.client.is_alive() {
            warn!(address = %server.address, id = conn.id, "discarding dead connection");
            server.discard(conn).await;
            return;
        }

        if conn.client.state() != ConnectionState::Ready {
            match tokio::time::timeout(self.config.validation_timeout, conn.client.reset()).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    warn!(address = %server.address, id = conn.id, error = %e, "reset on release failed");
                    server.discard(conn).await;
                    return;
                }
                Err(_) => {
                    warn!(address = %server.address, id = conn.id, "reset on release timed out");
                    server.discard(conn).await;
                    return;
                }
            }
        }

        conn.last_used = Instant::now();
        server.push_idle(conn);
    }

    /// 한 주소의 유휴 연결을 모두 닫음
    pub async fn cleanup(&self, address: &ServerAddress) {
        let Some(server) = self.existing_server(address) else {
            return;
        };
        let idle = server.drain_idle();
        if !idle.is_empty() {
            debug!(address = %address, count = idle.len(), "closing idle connections");
        }
        for conn in idle {
            server.discard(conn).await;
        }
    }

    /// 풀 닫기
    ///
    /// 이후 `acquire`는 `PoolClosed`로 실패하고, 대여 중인 연결은 반환될 때 닫힙니다.
    pub async fn close(&self) {
        if !self.open.swap(false, Ordering::AcqRel) {
            return;
        }
        let servers: Vec<Arc<ServerPool>> = self.servers.lock().values().cloned().collect();
        for server in servers {
            server.permits.close();
            for conn in server.drain_idle() {
                server.discard(conn).await;
            }
        }
        info!("connection pool closed");
    }

    /// 주소별 메트릭
    pub fn metrics(&self, address: &ServerAddress) -> PoolMetrics {
        self.existing_server(address)
            .map(|server| server.metrics())
            .unwrap_or_default()
    }

    /// 풀이 알고 있는 서버 주소
    pub fn addresses(&self) -> Vec<ServerAddress> {
        self.servers.lock().keys().cloned().collect()
    }
}

impl std::fmt::Debug for ConnectionPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionPool")
            .field("config", &self.config)
            .field("addresses", &self.addresses())
            .field("open", &self.is_open())
            .finish()
    }
}

// ============================================================================
// Tests
// ============================================================================
