//! Driver Module
//!
//! Bolt 드라이버 코어: 연결 상태 기계, 연결 풀, 라우팅, 트랜잭션 재시도
//!
//! # 구성
//!
//! - [`connection`]: 프로토콜 세션 계약 (`Connection`, `ConnectionState`)
//! - [`bolt`]: Bolt 위의 `Connection` 구현 (`BoltClient`)
//! - [`ConnectionPool`]: 주소별 용량 제한 연결 풀
//! - [`routing`]: 단일 서버/클러스터 라우터와 서버 선택 정책
//! - [`TransactionExecutor`]: 일시적 실패를 재시도하는 작업 단위 실행기
//! - [`RecordStream`]: 스트림 핸들 위의 순차 커서
//!
//! # Example
//!
//! ```ignore
//! use zeta4g_driver_core::driver::{AuthToken, Driver, TxConfig};
//! use zeta4g_driver_core::params;
//!
//! // 클러스터 드라이버 (neo4j:// 또는 zeta4g://)
//! let driver = Driver::new("neo4j://core1:7687,core2:7687?region=eu", AuthToken::basic("zeta4g", "password"))?;
//!
//! let committed = driver
//!     .execute_write(TxConfig::default(), |tx| {
//!         Box::pin(async move {
//!             tx.run(Command::new("CREATE (n:Person {name: $name})").with_params(params! {"name" => "Alice"}))
//!                 .await?
//!                 .consume()
//!                 .await
//!         })
//!     })
//!     .await?;
//!
//! // 커밋 북마크로 이어지는 읽기
//! let count = driver
//!     .execute_read(TxConfig::default().with_bookmarks([committed.bookmark]), |tx| {
//!         Box::pin(async move {
//!             tx.run("MATCH (n:Person) RETURN count(n)").await?.single().await?.get_int("count(n)")
//!         })
//!     })
//!     .await?;
//!
//! driver.close().await;
//! ```

pub mod bolt;
pub mod connection;
pub mod routing;
mod driver;
mod error;
mod pool;
mod record;
mod retry;
mod transport;
mod types;

#[cfg(test)]
pub(crate) mod testkit;

// Re-exports
pub use connection::{Connection, ConnectionState, DatabaseSelector};
pub use driver::{AuthToken, Driver, DriverConfig, DriverConfigBuilder, ServerAddress, Topology, DEFAULT_PORT};
pub use error::{Classification, DriverError, DriverResult, ErrorKind, ServerError, UsageError};
pub use pool::{ConnectionPool, PoolConfig, PoolConfigBuilder, PoolMetrics, PooledConnection};
pub use record::{Record, RecordStream};
pub use retry::{Committed, RetryConfig, Transaction, TransactionExecutor};
pub use routing::{Router, RoutingPolicy, RoutingTable, ServerSelector};
pub use transport::{BoxTransport, Connector, TcpConnector, Transport};
pub use types::{
    AccessMode, Command, Counters, Node, QueryType, Relationship, StreamHandle, StreamItem, Summary, TxConfig,
    TxHandle, Value,
};

/// 파라미터 맵 생성 매크로
///
/// ```ignore
/// let command = Command::new("RETURN $x + $y").with_params(params! {"x" => 1, "y" => 2});
/// ```
#[macro_export]
macro_rules! params {
    () => {
        std::collections::HashMap::<String, $crate::driver::Value>::new()
    };
    ($($key:expr => $value:expr),+ $(,)?) => {{
        let mut map = std::collections::HashMap::<String, $crate::driver::Value>::new();
        $(
            map.insert($key.into(), $crate::driver::Value::from($value));
        )+
        map
    }};
}
