//! 라우팅 테이블
//!
//! 데이터베이스 하나에 대해 역할별 서버 목록과 TTL을 보관합니다.

use std::time::Duration;

use tokio::time::Instant;

use crate::bolt::{Metadata, PackStreamValue};

use super::super::driver::ServerAddress;
use super::super::error::{DriverError, DriverResult};

/// 서버 역할
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ServerRole {
    /// 라우팅 테이블 제공자
    Route,
    /// 쓰기 트랜잭션 처리 (리더)
    Write,
    /// 읽기 트랜잭션 처리 (팔로워)
    Read,
}

impl ServerRole {
    /// 문자열에서 역할 파싱
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_uppercase().as_str() {
            "ROUTE" => Some(Self::Route),
            "WRITE" => Some(Self::Write),
            "READ" => Some(Self::Read),
            _ => None,
        }
    }

    /// 역할을 문자열로 변환
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Route => "ROUTE",
            Self::Write => "WRITE",
            Self::Read => "READ",
        }
    }
}

/// 라우팅 테이블
#[derive(Debug, Clone)]
pub struct RoutingTable {
    /// 서버가 알려준 데이터베이스 이름 (없으면 기본 데이터베이스)
    pub database: Option<String>,
    /// 라우터 목록 (라우팅 테이블 조회용)
    pub routers: Vec<ServerAddress>,
    /// 라이터 목록 (쓰기 트랜잭션용)
    pub writers: Vec<ServerAddress>,
    /// 리더 목록 (읽기 트랜잭션용)
    pub readers: Vec<ServerAddress>,
    /// 유효 기간
    pub ttl: Duration,
    /// 갱신 시각
    pub updated_at: Instant,
}

impl RoutingTable {
    /// 빈 테이블 생성
    pub fn new(database: Option<String>, ttl: Duration) -> Self {
        Self {
            database,
            routers: Vec::new(),
            writers: Vec::new(),
            readers: Vec::new(),
            ttl,
            updated_at: Instant::now(),
        }
    }

    /// 서버 응답(`ttl`, `servers`, `db`)에서 테이블 생성
    ///
    /// ROUTE 응답의 `rt` 맵과 라우팅 프로시저 결과 행 모두 이 형태입니다.
    pub fn parse(rt: &Metadata) -> DriverResult<Self> {
        let ttl = rt
            .get("ttl")
            .and_then(|v| v.as_int())
            .ok_or_else(|| DriverError::protocol("routing table without ttl"))?;
        let servers = rt
            .get("servers")
            .and_then(|v| v.as_list())
            .ok_or_else(|| DriverError::protocol("routing table without servers"))?;

        let database = rt.get("db").and_then(|v| v.as_str()).map(String::from);
        let mut table = Self::new(database, Duration::from_secs(ttl.max(0) as u64));

        for entry in servers {
            let PackStreamValue::Map(entry) = entry else {
                return Err(DriverError::protocol("routing table server entry is not a map"));
            };
            let role = entry.get("role").and_then(|v| v.as_str()).and_then(ServerRole::parse);
            let addresses = entry.get("addresses").and_then(|v| v.string_list()).unwrap_or_default();
            // 모르는 역할은 무시
            let Some(role) = role else { continue };
            for address in addresses {
                table.add_server(role, ServerAddress::parse(&address)?);
            }
        }
        Ok(table)
    }

    /// 역할별 서버 추가
    pub fn add_server(&mut self, role: ServerRole, address: ServerAddress) {
        let list = match role {
            ServerRole::Route => &mut self.routers,
            ServerRole::Write => &mut self.writers,
            ServerRole::Read => &mut self.readers,
        };
        if !list.contains(&address) {
            list.push(address);
        }
    }

    /// 라우터, 리더, 라이터가 모두 있는지
    pub fn is_complete(&self) -> bool {
        !self.routers.is_empty() && !self.readers.is_empty() && !self.writers.is_empty()
    }

    /// TTL 안이고 리더와 라이터가 모두 있는지
    pub fn is_fresh(&self) -> bool {
        // 표현할 수 없을 만큼 긴 TTL은 만료되지 않음
        let live = self
            .updated_at
            .checked_add(self.ttl)
            .map_or(true, |expires_at| Instant::now() < expires_at);
        live && !self.readers.is_empty() && !self.writers.is_empty()
    }

    /// 즉시 만료 (라우터 목록은 다음 갱신에 쓰도록 남김)
    pub fn expire(&mut self) {
        self.ttl = Duration::ZERO;
    }

    /// 라이터 하나 제거
    pub fn forget_writer(&mut self, address: &ServerAddress) {
        self.writers.retain(|a| a != address);
    }

    /// 리더 하나 제거
    pub fn forget_reader(&mut self, address: &ServerAddress) {
        self.readers.retain(|a| a != address);
    }

    /// 모든 역할에서 서버 제거
    pub fn remove_server(&mut self, address: &ServerAddress) {
        self.routers.retain(|a| a != address);
        self.writers.retain(|a| a != address);
        self.readers.retain(|a| a != address);
    }
}
