//! 서버 선택 정책
//!
//! 라우터가 돌려준 주소 목록에서 실제로 연결할 서버를 고릅니다.

use std::sync::atomic::{AtomicUsize, Ordering};

use rand::Rng;

use super::super::driver::ServerAddress;
use super::super::types::AccessMode;

/// 선택 정책
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum RoutingPolicy {
    /// 라운드 로빈 (기본값)
    #[default]
    RoundRobin,
    /// 랜덤
    Random,
}

/// 서버 선택기
///
/// 라운드 로빈 인덱스는 접근 모드별로 따로 유지하므로, 쓰기 선택이 리더
/// 순환을 건너뛰게 만들지 않습니다.
#[derive(Debug, Default)]
pub struct ServerSelector {
    policy: RoutingPolicy,
    readers: AtomicUsize,
    writers: AtomicUsize,
}

impl ServerSelector {
    /// 새 선택기 생성
    pub fn new(policy: RoutingPolicy) -> Self {
        Self {
            policy,
            readers: AtomicUsize::new(0),
            writers: AtomicUsize::new(0),
        }
    }

    /// 라운드 로빈 선택기
    pub fn round_robin() -> Self {
        Self::new(RoutingPolicy::RoundRobin)
    }

    /// 랜덤 선택기
    pub fn random() -> Self {
        Self::new(RoutingPolicy::Random)
    }

    /// 현재 정책
    pub fn policy(&self) -> RoutingPolicy {
        self.policy
    }

    fn next_index(&self, mode: AccessMode, len: usize) -> usize {
        match self.policy {
            RoutingPolicy::RoundRobin => {
                let counter = match mode {
                    AccessMode::Read => &self.readers,
                    AccessMode::Write => &self.writers,
                };
                counter.fetch_add(1, Ordering::Relaxed) % len
            }
            RoutingPolicy::Random => rand::thread_rng().gen_range(0..len),
        }
    }

    /// 서버 목록에서 하나 선택
    pub fn select<'a>(&self, mode: AccessMode, servers: &'a [ServerAddress]) -> Option<&'a ServerAddress> {
        if servers.is_empty() {
            return None;
        }
        Some(&servers[self.next_index(mode, servers.len())])
    }

    /// `except`를 빼고 선택, 후보가 `except`뿐이면 `None`
    pub fn select_except<'a>(
        &self,
        mode: AccessMode,
        servers: &'a [ServerAddress],
        except: &ServerAddress,
    ) -> Option<&'a ServerAddress> {
        let candidates: Vec<&ServerAddress> = servers.iter().filter(|s| *s != except).collect();
        if candidates.is_empty() {
            return None;
        }
        Some(candidates[self.next_index(mode, candidates.len())])
    }

    /// 인덱스 리셋
    pub fn reset(&self) {
        self.readers.store(0, Ordering::Relaxed);
        self.writers.store(0, Ordering::Relaxed);
    }
}
