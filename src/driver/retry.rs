//! 트랜잭션 재시도
//!
//! 작업 단위를 트랜잭션 안에서 실행하고, 일시적 실패면 처음부터 다시 실행합니다.
//!
//! 작업 함수는 커밋 전까지 부작용이 없어야 합니다. 실패한 시도는 롤백되지만,
//! 함수가 트랜잭션 밖에서 한 일은 되돌릴 수 없습니다.

use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use rand::Rng;
use tokio::time::Instant;
use tracing::{debug, warn};

use super::bolt::BoltClient;
use super::connection::Connection;
use super::driver::ServerAddress;
use super::error::{DriverError, DriverResult};
use super::pool::{ConnectionPool, PooledConnection};
use super::record::RecordStream;
use super::routing::{Router, ServerSelector};
use super::types::{AccessMode, Command, TxConfig, TxHandle};

// ============================================================================
// RetryConfig - 재시도 설정
// ============================================================================

/// 재시도 설정
///
/// n번째 재시도 전 대기 시간은 `min(initial_delay * multiplier^n, max_delay)`에
/// `±jitter` 비율의 무작위 편차를 더한 값입니다.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryConfig {
    /// 전체 재시도 시간 예산
    pub max_retry_time: Duration,
    /// 첫 대기 시간
    pub initial_delay: Duration,
    /// 대기 시간 배수
    pub multiplier: f64,
    /// 편차 비율 (0.0 ~ 1.0)
    pub jitter: f64,
    /// 최대 대기 시간
    pub max_delay: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retry_time: Duration::from_secs(30),
            initial_delay: Duration::from_secs(1),
            multiplier: 2.0,
            jitter: 0.2,
            max_delay: Duration::from_secs(30),
        }
    }
}

impl RetryConfig {
    /// 재시도 시간 예산 설정
    pub fn with_max_retry_time(mut self, time: Duration) -> Self {
        self.max_retry_time = time;
        self
    }

    /// 첫 대기 시간 설정
    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    /// 배수 설정
    pub fn with_multiplier(mut self, multiplier: f64) -> Self {
        self.multiplier = multiplier;
        self
    }

    /// 편차 비율 설정
    pub fn with_jitter(mut self, jitter: f64) -> Self {
        self.jitter = jitter.clamp(0.0, 1.0);
        self
    }

    /// 최대 대기 시간 설정
    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// 편차 없는 n번째 대기 시간 (n은 0부터)
    pub fn base_delay(&self, retry: u32) -> Duration {
        let exponent = i32::try_from(retry).unwrap_or(i32::MAX);
        let secs = self.initial_delay.as_secs_f64() * self.multiplier.powi(exponent);
        if !secs.is_finite() || secs >= self.max_delay.as_secs_f64() {
            return self.max_delay;
        }
        Duration::from_secs_f64(secs.max(0.0))
    }

    /// 편차를 적용한 n번째 대기 시간
    pub fn delay(&self, retry: u32) -> Duration {
        let base = self.base_delay(retry);
        if self.jitter <= 0.0 {
            return base;
        }
        let factor = rand::thread_rng().gen_range((1.0 - self.jitter)..=(1.0 + self.jitter));
        Duration::from_secs_f64(base.as_secs_f64() * factor)
    }
}

// ============================================================================
// Transaction - 작업 함수에 넘겨지는 트랜잭션
// ============================================================================

/// 재시도 실행기가 연 트랜잭션
pub struct Transaction {
    conn: PooledConnection,
    handle: TxHandle,
}

impl Transaction {
    /// 쿼리 실행
    pub async fn run(&mut self, command: impl Into<Command>) -> DriverResult<RecordStream<'_, BoltClient>> {
        let stream = self.conn.run_in_tx(self.handle, command.into()).await?;
        Ok(RecordStream::new(&mut *self.conn, stream))
    }

    /// 트랜잭션이 실행 중인 서버
    pub fn address(&self) -> &ServerAddress {
        self.conn.address()
    }
}

impl std::fmt::Debug for Transaction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transaction")
            .field("handle", &self.handle)
            .field("connection", &self.conn)
            .finish()
    }
}

/// 커밋된 작업 결과
#[derive(Debug, Clone, PartialEq)]
pub struct Committed<T> {
    /// 작업 함수의 반환값
    pub value: T,
    /// 커밋이 만든 북마크
    pub bookmark: String,
}

// ============================================================================
// TransactionExecutor - 재시도 실행기
// ============================================================================

/// 실패한 시도와 그 시도가 사용한 서버
struct Failed {
    error: DriverError,
    address: Option<ServerAddress>,
}

impl Failed {
    fn new(error: DriverError, address: Option<ServerAddress>) -> Self {
        Self { error, address }
    }
}

/// 트랜잭션 재시도 실행기
pub struct TransactionExecutor {
    router: Arc<Router>,
    pool: Arc<ConnectionPool>,
    selector: ServerSelector,
    retry: RetryConfig,
    acquisition_timeout: Duration,
}

impl TransactionExecutor {
    /// 새 실행기 생성
    pub fn new(
        router: Arc<Router>,
        pool: Arc<ConnectionPool>,
        selector: ServerSelector,
        retry: RetryConfig,
        acquisition_timeout: Duration,
    ) -> Self {
        Self {
            router,
            pool,
            selector,
            retry,
            acquisition_timeout,
        }
    }

    /// 재시도 설정
    pub fn retry_config(&self) -> &RetryConfig {
        &self.retry
    }

    /// 작업 단위를 트랜잭션 안에서 실행하고 커밋
    ///
    /// 재시도 가능한 실패면 시간 예산 안에서 작업 전체를 다시 실행하고,
    /// 예산을 넘기면 마지막 에러를 `RetryExhausted`로 감싸 반환합니다.
    /// 재시도할 수 없는 실패는 바로 반환합니다.
    ///
    /// ```rust,ignore
    /// let committed = executor
    ///     .execute(TxConfig::write(), |tx| {
    ///         Box::pin(async move {
    ///             tx.run(Command::new("CREATE (n:Item {id: $id})").with_param("id", 1))
    ///                 .await?
    ///                 .consume()
    ///                 .await
    ///         })
    ///     })
    ///     .await?;
    /// ```
    pub async fn execute<T, F>(&self, config: TxConfig, mut work: F) -> DriverResult<Committed<T>>
    where
        F: for<'t> FnMut(&'t mut Transaction) -> BoxFuture<'t, DriverResult<T>>,
    {
        let start = Instant::now();
        let mut attempts: u32 = 0;
        let mut avoid: Option<ServerAddress> = None;

        loop {
            attempts += 1;
            let failed = match self.attempt(&config, &mut work, avoid.as_ref()).await {
                Ok(committed) => return Ok(committed),
                Err(failed) => failed,
            };

            if !failed.error.is_retryable() {
                return Err(failed.error);
            }
            self.on_retryable_failure(&config, &failed).await;

            let elapsed = start.elapsed();
            if elapsed >= self.retry.max_retry_time {
                warn!(attempts, elapsed = ?elapsed, error = %failed.error, "transaction retries exhausted");
                return Err(DriverError::RetryExhausted {
                    attempts,
                    elapsed,
                    source: Box::new(failed.error),
                });
            }

            let delay = self.retry.delay(attempts - 1);
            warn!(attempt = attempts, delay = ?delay, error = %failed.error, "transaction failed, retrying");
            tokio::time::sleep(delay).await;

            avoid = failed.address.filter(|_| failed.error.is_transport());
        }
    }

    /// 접근 모드에 맞는 서버를 골라 연결 획득
    pub async fn acquire(&self, database: Option<&str>, mode: AccessMode) -> DriverResult<PooledConnection> {
        self.connect(database, mode, None).await.map_err(|failed| failed.error)
    }

    async fn connect(
        &self,
        database: Option<&str>,
        mode: AccessMode,
        avoid: Option<&ServerAddress>,
    ) -> Result<PooledConnection, Failed> {
        let servers = self
            .router
            .servers(database, mode)
            .await
            .map_err(|e| Failed::new(e, None))?;

        let picked = avoid
            .and_then(|avoid| self.selector.select_except(mode, &servers, avoid))
            .or_else(|| self.selector.select(mode, &servers))
            .cloned();
        let Some(address) = picked else {
            let error = DriverError::routing(format!(
                "No {:?} servers available for {}",
                mode,
                database.unwrap_or("the default database")
            ));
            return Err(Failed::new(error, None));
        };

        self.pool
            .acquire(&address, self.acquisition_timeout)
            .await
            .map_err(|e| Failed::new(e, Some(address)))
    }

    async fn attempt<T, F>(
        &self,
        config: &TxConfig,
        work: &mut F,
        avoid: Option<&ServerAddress>,
    ) -> Result<Committed<T>, Failed>
    where
        F: for<'t> FnMut(&'t mut Transaction) -> BoxFuture<'t, DriverResult<T>>,
    {
        let mut conn = self.connect(config.database.as_deref(), config.mode, avoid).await?;
        let address = conn.address().clone();

        let handle = match conn.begin_tx(config.clone()).await {
            Ok(handle) => handle,
            Err(e) => {
                self.pool.release(conn).await;
                return Err(Failed::new(e, Some(address)));
            }
        };

        let mut tx = Transaction { conn, handle };
        let outcome = match work(&mut tx).await {
            Ok(value) => match tx.conn.commit_tx(handle).await {
                Ok(()) => Ok(Committed {
                    value,
                    bookmark: tx.conn.bookmark().to_string(),
                }),
                Err(e) => Err(e),
            },
            Err(e) => {
                if tx.conn.is_alive() {
                    if let Err(rollback) = tx.conn.rollback_tx(handle).await {
                        debug!(address = %address, error = %rollback, "rollback after failed work");
                    }
                }
                Err(e)
            }
        };

        self.pool.release(tx.conn).await;
        outcome.map_err(|e| Failed::new(e, Some(address)))
    }

    /// 라우팅 정보와 풀 정리
    async fn on_retryable_failure(&self, config: &TxConfig, failed: &Failed) {
        let database = config.database.as_deref();
        let leader_error = failed
            .error
            .as_server_error()
            .map_or(false, |e| e.is_leader_error());

        match &failed.address {
            Some(address) if leader_error => self.router.invalidate_writer(database, address),
            _ if failed.error.is_topology_error() => self.router.invalidate(database),
            _ => {}
        }

        if failed.error.is_transport() {
            if let Some(address) = &failed.address {
                self.pool.cleanup(address).await;
            }
        }
    }
}

impl std::fmt::Debug for TransactionExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransactionExecutor")
            .field("router", &self.router)
            .field("retry", &self.retry)
            .finish()
    }
}

// ============================================================================
// Tests
// ============================================================================
