//! 라우터
//!
//! 작업을 보낼 서버 주소를 결정합니다. 고정 주소 하나를 쓰는 `Direct`와,
//! 데이터베이스별 라우팅 테이블을 캐시하는 `Cluster` 두 가지가 있습니다.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::bolt::Metadata;

use super::super::driver::ServerAddress;
use super::super::error::{Classification, DriverError, DriverResult};
use super::super::pool::ConnectionPool;
use super::super::types::AccessMode;
use super::table::RoutingTable;

// ============================================================================
// Router
// ============================================================================

/// 라우터
#[derive(Debug)]
pub enum Router {
    /// 단일 고정 주소
    Direct(DirectRouter),
    /// 클러스터 디스커버리
    Cluster(ClusterRouter),
}

impl Router {
    /// 고정 주소 라우터
    pub fn direct(address: ServerAddress) -> Self {
        Self::Direct(DirectRouter { address })
    }

    /// 클러스터 라우터
    pub fn cluster(
        seeds: Vec<ServerAddress>,
        context: Metadata,
        pool: Arc<ConnectionPool>,
        acquisition_timeout: Duration,
    ) -> Self {
        Self::Cluster(ClusterRouter::new(seeds, context, pool, acquisition_timeout))
    }

    /// 읽기 가능한 서버
    pub async fn readers(&self, database: Option<&str>) -> DriverResult<Vec<ServerAddress>> {
        match self {
            Self::Direct(direct) => Ok(vec![direct.address.clone()]),
            Self::Cluster(cluster) => cluster.table(database).await.map(|t| t.readers),
        }
    }

    /// 쓰기 가능한 서버
    pub async fn writers(&self, database: Option<&str>) -> DriverResult<Vec<ServerAddress>> {
        match self {
            Self::Direct(direct) => Ok(vec![direct.address.clone()]),
            Self::Cluster(cluster) => cluster.table(database).await.map(|t| t.writers),
        }
    }

    /// 접근 모드에 맞는 서버
    pub async fn servers(&self, database: Option<&str>, mode: AccessMode) -> DriverResult<Vec<ServerAddress>> {
        match mode {
            AccessMode::Read => self.readers(database).await,
            AccessMode::Write => self.writers(database).await,
        }
    }

    /// 데이터베이스의 캐시된 테이블을 버림
    pub fn invalidate(&self, database: Option<&str>) {
        if let Self::Cluster(cluster) = self {
            cluster.invalidate(database);
        }
    }

    /// 캐시된 테이블에서 라이터 하나 제거
    pub fn invalidate_writer(&self, database: Option<&str>, address: &ServerAddress) {
        if let Self::Cluster(cluster) = self {
            cluster.update(database, |table| table.forget_writer(address));
        }
    }

    /// 캐시된 테이블에서 리더 하나 제거
    pub fn invalidate_reader(&self, database: Option<&str>, address: &ServerAddress) {
        if let Self::Cluster(cluster) = self {
            cluster.update(database, |table| table.forget_reader(address));
        }
    }

    /// 모든 캐시 제거
    pub fn cleanup(&self) {
        if let Self::Cluster(cluster) = self {
            cluster.tables.lock().clear();
        }
    }

    /// 캐시된 테이블 사본 (없으면 `None`)
    pub fn cached_table(&self, database: Option<&str>) -> Option<RoutingTable> {
        match self {
            Self::Direct(_) => None,
            Self::Cluster(cluster) => {
                let entry = cluster.entry_if_exists(database)?;
                let table = entry.table.lock().clone();
                table
            }
        }
    }
}

// ============================================================================
// DirectRouter
// ============================================================================

/// 고정 주소 라우터 (캐시가 없으므로 무효화할 것도 없음)
#[derive(Debug, Clone)]
pub struct DirectRouter {
    address: ServerAddress,
}

impl DirectRouter {
    /// 대상 주소
    pub fn address(&self) -> &ServerAddress {
        &self.address
    }
}

// ============================================================================
// ClusterRouter
// ============================================================================

type TableKey = Option<String>;

#[derive(Debug, Default)]
struct TableEntry {
    table: Mutex<Option<RoutingTable>>,
    /// 같은 데이터베이스의 갱신은 한 번에 하나만
    refresh: tokio::sync::Mutex<()>,
}

impl TableEntry {
    fn fresh_table(&self) -> Option<RoutingTable> {
        self.table.lock().as_ref().filter(|t| t.is_fresh()).cloned()
    }

    fn known_routers(&self) -> Vec<ServerAddress> {
        self.table.lock().as_ref().map(|t| t.routers.clone()).unwrap_or_default()
    }
}

/// 클러스터 라우터
///
/// 테이블 캐시는 데이터베이스별 항목으로 나뉘어 있어서 한 데이터베이스를
/// 갱신하는 동안에도 다른 데이터베이스 조회는 막히지 않습니다.
pub struct ClusterRouter {
    seeds: Vec<ServerAddress>,
    context: Metadata,
    pool: Arc<ConnectionPool>,
    acquisition_timeout: Duration,
    tables: Mutex<HashMap<TableKey, Arc<TableEntry>>>,
}

impl ClusterRouter {
    fn new(seeds: Vec<ServerAddress>, context: Metadata, pool: Arc<ConnectionPool>, acquisition_timeout: Duration) -> Self {
        Self {
            seeds,
            context,
            pool,
            acquisition_timeout,
            tables: Mutex::new(HashMap::new()),
        }
    }

    /// 시드 주소
    pub fn seeds(&self) -> &[ServerAddress] {
        &self.seeds
    }

    fn entry(&self, database: Option<&str>) -> Arc<TableEntry> {
        self.tables
            .lock()
            .entry(database.map(String::from))
            .or_default()
            .clone()
    }

    fn entry_if_exists(&self, database: Option<&str>) -> Option<Arc<TableEntry>> {
        self.tables.lock().get(&database.map(String::from)).cloned()
    }

    fn invalidate(&self, database: Option<&str>) {
        if self.update(database, RoutingTable::expire) {
            debug!(database = ?database, "routing table invalidated");
        }
    }

    fn update(&self, database: Option<&str>, f: impl FnOnce(&mut RoutingTable)) -> bool {
        let Some(entry) = self.entry_if_exists(database) else {
            return false;
        };
        let mut table = entry.table.lock();
        match table.as_mut() {
            Some(table) => {
                f(table);
                true
            }
            None => false,
        }
    }

    /// 신선한 테이블, 필요하면 갱신
    async fn table(&self, database: Option<&str>) -> DriverResult<RoutingTable> {
        let entry = self.entry(database);
        if let Some(table) = entry.fresh_table() {
            return Ok(table);
        }

        let _refreshing = entry.refresh.lock().await;
        // 기다리는 동안 다른 작업이 갱신했을 수 있음
        if let Some(table) = entry.fresh_table() {
            return Ok(table);
        }

        let table = self.fetch(database, entry.known_routers()).await?;
        *entry.table.lock() = Some(table.clone());
        Ok(table)
    }

    /// 이전 테이블의 라우터, 그다음 시드 순서로 시도
    async fn fetch(&self, database: Option<&str>, known: Vec<ServerAddress>) -> DriverResult<RoutingTable> {
        let mut candidates = known;
        for seed in &self.seeds {
            if !candidates.contains(seed) {
                candidates.push(seed.clone());
            }
        }

        let mut last_error = None;
        for router in &candidates {
            match self.fetch_from(router, database).await {
                Ok(table) if table.is_complete() => {
                    debug!(
                        router = %router,
                        database = ?database,
                        readers = table.readers.len(),
                        writers = table.writers.len(),
                        ttl = ?table.ttl,
                        "routing table refreshed"
                    );
                    return Ok(table);
                }
                Ok(_) => {
                    warn!(router = %router, database = ?database, "router returned an incomplete table");
                    last_error = Some(DriverError::routing(format!("{} returned an incomplete routing table", router)));
                }
                Err(e) if is_fatal(&e) => return Err(e),
                Err(e) => {
                    warn!(router = %router, database = ?database, error = %e, "routing table fetch failed");
                    last_error = Some(e);
                }
            }
        }

        Err(DriverError::routing(format!(
            "Unable to retrieve routing table for {} from {} router(s){}",
            database.unwrap_or("the default database"),
            candidates.len(),
            last_error.map(|e| format!(": {}", e)).unwrap_or_default()
        )))
    }

    async fn fetch_from(&self, router: &ServerAddress, database: Option<&str>) -> DriverResult<RoutingTable> {
        let mut conn = self.pool.acquire(router, self.acquisition_timeout).await?;
        let result = conn.route(database, &[], &self.context).await;
        self.pool.release(conn).await;
        result
    }
}

/// 다른 라우터에 물어도 결과가 같을 에러
fn is_fatal(err: &DriverError) -> bool {
    match err {
        DriverError::Authentication(_) | DriverError::Configuration(_) | DriverError::PoolClosed => true,
        DriverError::Server(e) => e.classification() == Classification::Client && !e.is_retryable(),
        _ => false,
    }
}

impl std::fmt::Debug for ClusterRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClusterRouter")
            .field("seeds", &self.seeds)
            .field("databases", &self.tables.lock().len())
            .finish()
    }
}

// ============================================================================
// Tests
// ============================================================================
