//! 라우팅 모듈
//!
//! 작업을 보낼 서버를 결정합니다.
//!
//! # 개요
//!
//! - `bolt://host:port`는 [`Router::Direct`]: 항상 같은 주소
//! - `neo4j://` / `zeta4g://`는 [`Router::Cluster`]: 데이터베이스별 라우팅
//!   테이블을 캐시하고, TTL이 지나거나 무효화되면 라우터에 다시 묻습니다.
//!
//! 읽기는 리더 목록에서, 쓰기는 라이터 목록에서 [`ServerSelector`]가
//! 하나를 고릅니다.
//!
//! # 예시
//!
//! ```ignore
//! use zeta4g_driver_core::driver::routing::{Router, ServerSelector};
//! use zeta4g_driver_core::driver::AccessMode;
//!
//! let readers = router.readers(Some("movies")).await?;
//! let target = ServerSelector::round_robin().select(AccessMode::Read, &readers);
//! ```

mod policy;
mod router;
mod table;

pub use policy::{RoutingPolicy, ServerSelector};
pub use router::{ClusterRouter, DirectRouter, Router};
pub use table::{RoutingTable, ServerRole};
