//! Driver Error Types
//!
//! 드라이버 에러 정의

use std::io;
use std::time::Duration;

use thiserror::Error;

use crate::bolt::{BoltError, FailureMessage};

// ============================================================================
// DriverError - 드라이버 에러
// ============================================================================

/// 드라이버 에러
#[derive(Error, Debug)]
pub enum DriverError {
    /// 서버가 요청을 거부함
    #[error("Server error: {0}")]
    Server(ServerError),

    /// 연결 에러
    #[error("Connection error: {0}")]
    Connection(String),

    /// I/O 에러
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// 타임아웃 에러
    #[error("Timeout: {0}")]
    Timeout(String),

    /// 핸드셰이크 실패
    #[error("Handshake error: {0}")]
    Handshake(String),

    /// 프로토콜 에러
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// 상태 머신 계약 위반
    #[error("Usage error: {0}")]
    Usage(#[from] UsageError),

    /// 라우팅 테이블을 얻지 못함
    #[error("Routing error: {0}")]
    Routing(String),

    /// 풀 대기 시간 초과
    #[error("Connection pool for {address} exhausted after waiting {waited:?}")]
    PoolExhausted {
        /// 서버 주소
        address: String,
        /// 기다린 시간
        waited: Duration,
    },

    /// 풀이 닫힘
    #[error("Connection pool is closed")]
    PoolClosed,

    /// 재시도 예산 소진
    #[error("Retries exhausted after {attempts} attempt(s) in {elapsed:?}: {source}")]
    RetryExhausted {
        /// 시도 횟수
        attempts: u32,
        /// 첫 시도부터 걸린 시간
        elapsed: Duration,
        /// 마지막 실패
        source: Box<DriverError>,
    },

    /// 인증 에러
    #[error("Authentication error: {0}")]
    Authentication(String),

    /// 설정 에러
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// 타입 변환 에러
    #[error("Type conversion error: {0}")]
    TypeConversion(String),
}

/// 에러 분류 (대략적 매칭용)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// 서버 FAILURE
    Server,
    /// 연결, I/O, 타임아웃, 프로토콜
    Transport,
    /// 상태 머신 계약 위반
    Usage,
    /// 라우팅
    Routing,
    /// 풀 대기 시간 초과
    PoolExhausted,
    /// 풀이 닫힘
    PoolClosed,
    /// 재시도 예산 소진
    RetryExhausted,
    /// 인증
    Authentication,
    /// 설정
    Configuration,
    /// 타입 변환
    TypeConversion,
}

impl DriverError {
    /// 연결 에러 생성
    pub fn connection(msg: impl Into<String>) -> Self {
        Self::Connection(msg.into())
    }

    /// 타임아웃 에러 생성
    pub fn timeout(msg: impl Into<String>) -> Self {
        Self::Timeout(msg.into())
    }

    /// 프로토콜 에러 생성
    pub fn protocol(msg: impl Into<String>) -> Self {
        Self::Protocol(msg.into())
    }

    /// 라우팅 에러 생성
    pub fn routing(msg: impl Into<String>) -> Self {
        Self::Routing(msg.into())
    }

    /// 인증 에러 생성
    pub fn authentication(msg: impl Into<String>) -> Self {
        Self::Authentication(msg.into())
    }

    /// 설정 에러 생성
    pub fn configuration(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    /// 타입 변환 에러 생성
    pub fn type_conversion(msg: impl Into<String>) -> Self {
        Self::TypeConversion(msg.into())
    }

    /// 서버 에러 생성
    pub fn server(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Server(ServerError::new(code, message))
    }

    /// 에러 분류
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Server(_) => ErrorKind::Server,
            Self::Connection(_)
            | Self::Io(_)
            | Self::Timeout(_)
            | Self::Handshake(_)
            | Self::Protocol(_) => ErrorKind::Transport,
            Self::Usage(_) => ErrorKind::Usage,
            Self::Routing(_) => ErrorKind::Routing,
            Self::PoolExhausted { .. } => ErrorKind::PoolExhausted,
            Self::PoolClosed => ErrorKind::PoolClosed,
            Self::RetryExhausted { .. } => ErrorKind::RetryExhausted,
            Self::Authentication(_) => ErrorKind::Authentication,
            Self::Configuration(_) => ErrorKind::Configuration,
            Self::TypeConversion(_) => ErrorKind::TypeConversion,
        }
    }

    /// 전송 계층 에러 여부 (연결이 더 이상 쓸 수 없음)
    pub fn is_transport(&self) -> bool {
        self.kind() == ErrorKind::Transport
    }

    /// 재시도 가능 여부
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Server(e) => e.is_retryable(),
            Self::Routing(_) => true,
            _ => self.is_transport(),
        }
    }

    /// 라우팅 정보를 무효화해야 하는지 여부
    pub fn is_topology_error(&self) -> bool {
        match self {
            Self::Server(e) => e.is_topology_error(),
            _ => self.is_transport(),
        }
    }

    /// 서버 에러 참조
    pub fn as_server_error(&self) -> Option<&ServerError> {
        match self {
            Self::Server(e) => Some(e),
            _ => None,
        }
    }
}

impl From<BoltError> for DriverError {
    fn from(err: BoltError) -> Self {
        match err {
            BoltError::Io(e) if e.kind() == io::ErrorKind::TimedOut => Self::Timeout(e.to_string()),
            BoltError::Io(e) => Self::Io(e),
            BoltError::Handshake(e) => Self::Handshake(e.to_string()),
            BoltError::ConnectionClosed => Self::Connection("connection closed by server".into()),
            other => Self::Protocol(other.to_string()),
        }
    }
}

impl From<ServerError> for DriverError {
    fn from(err: ServerError) -> Self {
        Self::Server(err)
    }
}

// ============================================================================
// Result Type
// ============================================================================

/// 드라이버 결과 타입
pub type DriverResult<T> = Result<T, DriverError>;

// ============================================================================
// UsageError - 호출 순서 위반
// ============================================================================

/// 연결 상태 머신 계약 위반
///
/// 서버 에러 코드와 섞이지 않도록 별도 타입으로 둡니다.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum UsageError {
    /// 트랜잭션이 열린 상태에서 자동 커밋 실행
    #[error("cannot run an auto-commit query while a transaction is open")]
    AutoCommitInTransaction,

    /// 이미 트랜잭션이 열려 있음
    #[error("a transaction is already open on this connection")]
    TransactionAlreadyOpen,

    /// 열린 트랜잭션 없음
    #[error("no transaction is open on this connection")]
    NoOpenTransaction,

    /// 다른 트랜잭션의 핸들
    #[error("transaction handle does not belong to the open transaction")]
    InvalidTransaction,

    /// 무효 스트림 핸들
    #[error("stream handle is unknown or no longer valid")]
    InvalidStream,

    /// FAILED 상태, RESET 필요
    #[error("connection has failed and must be reset before reuse")]
    ResetRequired,

    /// DEAD 상태
    #[error("connection is dead")]
    ConnectionDead,
}

// ============================================================================
// ServerError - 서버 에러 코드
// ============================================================================

/// 서버 에러 분류
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
    /// 클라이언트 잘못 (재시도 무의미)
    Client,
    /// 일시적 클러스터 상태
    Transient,
    /// 서버 내부 에러
    Database,
    /// 알 수 없는 코드
    Unknown,
}

/// 서버 에러
///
/// 에러 코드는 "Neo.{Classification}.{Category}.{Title}" 형식을 따릅니다.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{code}: {message}")]
pub struct ServerError {
    /// 에러 코드
    pub code: String,
    /// 에러 메시지
    pub message: String,
}

impl ServerError {
    /// 새 에러 생성
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
        }
    }

    /// 코드의 분류 부분
    pub fn classification(&self) -> Classification {
        match self.code.split('.').nth(1) {
            Some("ClientError") => Classification::Client,
            Some("TransientError") => Classification::Transient,
            Some("DatabaseError") => Classification::Database,
            _ => Classification::Unknown,
        }
    }

    /// 코드의 카테고리 부분
    pub fn category(&self) -> Option<&str> {
        self.code.split('.').nth(2)
    }

    /// 보안(인증/권한) 에러 여부
    pub fn is_security_error(&self) -> bool {
        self.classification() == Classification::Client && self.category() == Some("Security")
    }

    /// 재시도 가능 여부
    pub fn is_retryable(&self) -> bool {
        match self.classification() {
            Classification::Transient => !matches!(
                self.code.as_str(),
                "Neo.TransientError.Transaction.Terminated"
                    | "Neo.TransientError.Transaction.LockClientStopped"
            ),
            _ => self.is_leader_error(),
        }
    }

    /// 라우팅 정보 무효화가 필요한지 여부
    pub fn is_topology_error(&self) -> bool {
        self.is_leader_error() || self.code == "Neo.TransientError.General.DatabaseUnavailable"
    }

    /// 쓰기 대상이 더 이상 리더가 아님
    pub fn is_leader_error(&self) -> bool {
        matches!(
            self.code.as_str(),
            "Neo.ClientError.Cluster.NotALeader" | "Neo.ClientError.General.ForbiddenOnReadOnlyDatabase"
        )
    }
}

impl From<FailureMessage> for ServerError {
    fn from(msg: FailureMessage) -> Self {
        Self {
            code: msg.code,
            message: msg.message,
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
