//! # Zeta4G Driver Core
//!
//! The connection, pooling, routing and retry core of a Bolt graph database
//! driver, as used by the Zeta4G driver.
//!
//! ## Features
//!
//! - **Connection state machine** - One Bolt session per connection with
//!   pipelined RUN/PULL, batched pulls and several open streams per transaction
//! - **Connection Pooling** - Per-address capacity limits, validation on reuse,
//!   cooperative waiting with deadlines
//! - **Routing** - Direct (`bolt://`) and cluster (`neo4j://`, `zeta4g://`)
//!   routing with per-database table caching
//! - **Retries** - Transaction functions re-run on transient failures with
//!   jittered exponential backoff
//!
//! ## Basic Usage
//!
//! ```rust,no_run
//! use zeta4g_driver_core::{AuthToken, Command, Driver, TxConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let driver = Driver::new("bolt://localhost:7687", AuthToken::basic("zeta4g", "password"))?;
//!
//!     let committed = driver
//!         .execute_write(TxConfig::default(), |tx| {
//!             Box::pin(async move {
//!                 let command = Command::new("CREATE (n:Person {name: $name})").with_param("name", "Alice");
//!                 tx.run(command).await?.consume().await
//!             })
//!         })
//!         .await?;
//!     println!("created {} node(s)", committed.value.counters.nodes_created);
//!
//!     driver.close().await;
//!     Ok(())
//! }
//! ```
//!
//! ## Raw Connections
//!
//! Connections can be borrowed from the pool and driven directly. They go
//! back with [`Driver::release`]; a connection left mid-stream is reset first.
//!
//! ```rust,no_run
//! # use zeta4g_driver_core::{AccessMode, AuthToken, Connection, Driver, RecordStream, TxConfig};
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! # let driver = Driver::new("bolt://localhost:7687", AuthToken::none())?;
//! let mut conn = driver.acquire(None, AccessMode::Read).await?;
//!
//! let handle = conn.run("UNWIND range(1, 10) AS x RETURN x".into(), TxConfig::read()).await?;
//! let mut stream = RecordStream::new(&mut *conn, handle);
//! while let Some(record) = stream.next().await? {
//!     println!("{}", record.get_int("x")?);
//! }
//!
//! driver.release(conn).await;
//! # Ok(())
//! # }
//! ```
//!
//! ## Configuration
//!
//! ```rust
//! use std::time::Duration;
//! use zeta4g_driver_core::{AuthToken, DriverConfig, RetryConfig};
//!
//! let config = DriverConfig::builder("neo4j://core1:7687,core2:7687?region=eu", AuthToken::basic("u", "p"))
//!     .unwrap()
//!     .with_max_connection_pool_size(50)
//!     .with_fetch_size(500)
//!     .with_retry(RetryConfig::default().with_max_retry_time(Duration::from_secs(10)))
//!     .build();
//! assert!(config.is_routing());
//! ```
//!
//! ## Modules
//!
//! - [`driver`] - Connections, pool, routing, retries and the driver facade
//! - [`bolt`] - Low-level Bolt protocol implementation
//!

#![cfg_attr(docsrs, feature(doc_cfg))]
#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]

pub mod bolt;
pub mod driver;

// Re-exports for convenience
pub use driver::{
    AccessMode, AuthToken, Command, Committed, Connection, ConnectionPool, ConnectionState, Driver,
    DriverConfig, DriverConfigBuilder, DriverError, DriverResult, PoolConfig, Record, RecordStream,
    RetryConfig, Router, ServerAddress, Summary, Transaction, TransactionExecutor, TxConfig, UsageError,
    Value,
};

pub use bolt::{BoltError, BoltVersion, PackStreamValue};

/// Config alias for convenience
pub type Config = DriverConfig;
