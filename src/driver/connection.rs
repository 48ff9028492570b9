//! Connection
//!
//! 물리 연결 하나의 프로토콜 세션 계약

use std::fmt;
use std::future::Future;
use std::time::Duration;

use super::driver::ServerAddress;
use super::error::DriverResult;
use super::types::{Command, StreamHandle, StreamItem, TxConfig, TxHandle};

// ============================================================================
// ConnectionState - 연결 상태
// ============================================================================

/// 연결 상태
///
/// ```text
/// READY ──run──> AUTO_STREAMING ──(소진)──> READY
/// READY ──beginTx──> IN_TX ──runInTx──> TX_STREAMING ──(소진)──> IN_TX
/// IN_TX / TX_STREAMING ──commit/rollback──> READY
/// * ──(서버 에러)──> FAILED ──reset──> READY
/// * ──(전송 에러)──> DEAD
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// 대기 중
    Ready,
    /// 자동 커밋 결과 스트리밍 중
    AutoStreaming,
    /// 트랜잭션 열림
    InTx,
    /// 트랜잭션 안에서 결과 스트리밍 중
    TxStreaming,
    /// 서버 에러, RESET 필요
    Failed,
    /// 전송 계층 끊김 (재사용 불가)
    Dead,
}

impl ConnectionState {
    /// 트랜잭션이 열린 상태인지
    pub fn in_transaction(self) -> bool {
        matches!(self, Self::InTx | Self::TxStreaming)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Ready => "READY",
            Self::AutoStreaming => "AUTO_STREAMING",
            Self::InTx => "IN_TX",
            Self::TxStreaming => "TX_STREAMING",
            Self::Failed => "FAILED",
            Self::Dead => "DEAD",
        };
        f.write_str(name)
    }
}

// ============================================================================
// Connection - 프로토콜 세션
// ============================================================================

/// 물리 연결 하나의 프로토콜 세션
///
/// 동시 사용은 지원하지 않으며, 한 번에 하나의 호출자만 소유합니다
/// (풀이 보장).
pub trait Connection: Send {
    /// 연결된 서버 주소
    fn address(&self) -> &ServerAddress;

    /// 현재 상태
    fn state(&self) -> ConnectionState;

    /// 자동 커밋 쿼리 실행 (READY에서만)
    fn run(
        &mut self,
        command: Command,
        config: TxConfig,
    ) -> impl Future<Output = DriverResult<StreamHandle>> + Send;

    /// 열린 트랜잭션 안에서 쿼리 실행
    fn run_in_tx(
        &mut self,
        tx: TxHandle,
        command: Command,
    ) -> impl Future<Output = DriverResult<StreamHandle>> + Send;

    /// 스트림에서 레코드 하나 또는 요약을 가져옴
    ///
    /// 요약 이후 반복 호출은 같은 요약을 반환합니다.
    fn next(&mut self, stream: StreamHandle) -> impl Future<Output = DriverResult<StreamItem>> + Send;

    /// 트랜잭션 시작 (READY에서만)
    fn begin_tx(&mut self, config: TxConfig) -> impl Future<Output = DriverResult<TxHandle>> + Send;

    /// 커밋, 소비되지 않은 결과는 먼저 정리
    fn commit_tx(&mut self, tx: TxHandle) -> impl Future<Output = DriverResult<()>> + Send;

    /// 롤백, 북마크는 바뀌지 않음
    fn rollback_tx(&mut self, tx: TxHandle) -> impl Future<Output = DriverResult<()>> + Send;

    /// DEAD가 아니면 READY로 되돌림
    fn reset(&mut self) -> impl Future<Output = DriverResult<()>> + Send;

    /// 전송 계층이 살아 있는지
    fn is_alive(&self) -> bool;

    /// 마지막으로 관찰한 북마크 (커밋 전에는 빈 문자열)
    fn bookmark(&self) -> &str;

    /// 서버 주소 문자열
    fn server_name(&self) -> &str;

    /// 서버 에이전트 (예: `Neo4j/4.4.0`)
    fn server_version(&self) -> &str;

    /// 다중 데이터베이스 선택 기능 (지원하지 않는 서버는 `None`)
    fn database_selector(&mut self) -> Option<&mut dyn DatabaseSelector>;

    /// 네트워크 작업별 타임아웃
    fn set_io_timeout(&mut self, timeout: Option<Duration>);
}

/// 연결에서 사용할 논리 데이터베이스 선택
pub trait DatabaseSelector {
    /// 이후 작업의 대상 데이터베이스 (`None` = 서버 기본값)
    fn select_database(&mut self, database: Option<&str>);

    /// 현재 선택된 데이터베이스
    fn selected_database(&self) -> Option<&str>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_display() {
        assert_eq!(ConnectionState::AutoStreaming.to_string(), "AUTO_STREAMING");
        assert_eq!(ConnectionState::Dead.to_string(), "DEAD");
    }

    #[test]
    fn test_in_transaction() {
        assert!(ConnectionState::InTx.in_transaction());
        assert!(ConnectionState::TxStreaming.in_transaction());
        assert!(!ConnectionState::Ready.in_transaction());
        assert!(!ConnectionState::Failed.in_transaction());
    }
}
