//! Record - 쿼리 결과 레코드
//!
//! 단일 레코드와, 연결의 `next`를 감싸는 순방향 커서

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use futures::stream::{self, Stream};

use super::connection::Connection;
use super::error::{DriverError, DriverResult};
use super::types::{Node, StreamHandle, StreamItem, Summary, Value};

// ============================================================================
// Record - 단일 레코드
// ============================================================================

/// 쿼리 결과 레코드
///
/// 같은 스트림의 레코드들은 키 목록을 공유합니다.
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    /// 컬럼 키
    keys: Arc<[String]>,
    /// 값들
    values: Vec<Value>,
}

impl Record {
    /// 새 레코드 생성
    pub fn new(keys: impl Into<Arc<[String]>>, values: Vec<Value>) -> Self {
        Self {
            keys: keys.into(),
            values,
        }
    }

    /// 키 목록
    pub fn keys(&self) -> &[String] {
        &self.keys
    }

    /// 값 목록
    pub fn values(&self) -> &[Value] {
        &self.values
    }

    /// 값 소유권 가져오기
    pub fn into_values(self) -> Vec<Value> {
        self.values
    }

    /// 레코드 길이
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// 빈 레코드 여부
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// 키로 값 가져오기
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.keys
            .iter()
            .position(|k| k == key)
            .and_then(|i| self.values.get(i))
    }

    /// 인덱스로 값 가져오기
    pub fn get_by_index(&self, index: usize) -> Option<&Value> {
        self.values.get(index)
    }

    /// 키로 타입 변환된 값 가져오기
    pub fn get_as<T>(&self, key: &str) -> DriverResult<T>
    where
        T: TryFrom<Value, Error = DriverError>,
    {
        self.get(key)
            .cloned()
            .ok_or_else(|| DriverError::type_conversion(format!("Key '{}' not found", key)))
            .and_then(T::try_from)
    }

    /// Integer 값 가져오기
    pub fn get_int(&self, key: &str) -> DriverResult<i64> {
        self.get_as::<i64>(key)
    }

    /// String 값 가져오기
    pub fn get_string(&self, key: &str) -> DriverResult<String> {
        self.get_as::<String>(key)
    }

    /// Node 값 가져오기
    pub fn get_node(&self, key: &str) -> DriverResult<Node> {
        self.get_as::<Node>(key)
    }

    /// Optional 값 가져오기 (None은 Null)
    pub fn get_optional<T>(&self, key: &str) -> DriverResult<Option<T>>
    where
        T: TryFrom<Value, Error = DriverError>,
    {
        match self.get(key) {
            Some(Value::Null) | None => Ok(None),
            Some(v) => T::try_from(v.clone()).map(Some),
        }
    }

    /// Map으로 변환
    pub fn to_map(&self) -> HashMap<String, Value> {
        self.keys
            .iter()
            .cloned()
            .zip(self.values.iter().cloned())
            .collect()
    }
}

impl fmt::Display for Record {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let pairs: Vec<String> = self
            .keys
            .iter()
            .zip(self.values.iter())
            .map(|(k, v)| format!("{}: {}", k, v))
            .collect();
        write!(f, "{{{}}}", pairs.join(", "))
    }
}

impl<'a> IntoIterator for &'a Record {
    type Item = (&'a String, &'a Value);
    type IntoIter = std::iter::Zip<std::slice::Iter<'a, String>, std::slice::Iter<'a, Value>>;

    fn into_iter(self) -> Self::IntoIter {
        self.keys.iter().zip(self.values.iter())
    }
}

// ============================================================================
// RecordStream - 레코드 스트림
// ============================================================================

/// 레코드 스트림 (순방향 커서)
///
/// 레코드는 `next` 호출마다 연결에서 하나씩 가져옵니다. 소진 후에는
/// 캐시된 요약만 남고 레코드를 다시 재생하지 않습니다.
pub struct RecordStream<'c, C: Connection> {
    conn: &'c mut C,
    handle: StreamHandle,
    summary: Option<Summary>,
}

impl<'c, C: Connection> RecordStream<'c, C> {
    /// 연결과 스트림 핸들로 생성
    pub fn new(conn: &'c mut C, handle: StreamHandle) -> Self {
        Self {
            conn,
            handle,
            summary: None,
        }
    }

    /// 스트림 핸들
    pub fn handle(&self) -> StreamHandle {
        self.handle
    }

    /// 다음 레코드 (소진되면 `None`)
    pub async fn next(&mut self) -> DriverResult<Option<Record>> {
        if self.summary.is_some() {
            return Ok(None);
        }
        match self.conn.next(self.handle).await? {
            StreamItem::Record(record) => Ok(Some(record)),
            StreamItem::Summary(summary) => {
                self.summary = Some(summary);
                Ok(None)
            }
        }
    }

    /// 남은 레코드를 모두 가져오기
    pub async fn collect(&mut self) -> DriverResult<Vec<Record>> {
        let mut records = Vec::new();
        while let Some(record) = self.next().await? {
            records.push(record);
        }
        Ok(records)
    }

    /// 레코드가 정확히 하나인 결과
    pub async fn single(&mut self) -> DriverResult<Record> {
        let first = self.next().await?;
        let rest = self.collect().await?;
        match first {
            Some(record) if rest.is_empty() => Ok(record),
            Some(_) => Err(DriverError::type_conversion(format!(
                "Expected single record, got {}",
                rest.len() + 1
            ))),
            None => Err(DriverError::type_conversion("Expected single record, got 0")),
        }
    }

    /// 남은 레코드를 버리고 요약 반환
    pub async fn consume(&mut self) -> DriverResult<Summary> {
        while self.next().await?.is_some() {}
        self.summary
            .clone()
            .ok_or_else(|| DriverError::protocol("stream ended without summary"))
    }

    /// 소진된 경우의 요약
    pub fn summary(&self) -> Option<&Summary> {
        self.summary.as_ref()
    }

    /// `futures::Stream`으로 변환
    ///
    /// 첫 에러 이후 스트림은 끝납니다.
    pub fn into_stream(self) -> impl Stream<Item = DriverResult<Record>> + 'c {
        stream::unfold(Some(self), |state| async move {
            let mut cursor = state?;
            match cursor.next().await {
                Ok(Some(record)) => Some((Ok(record), Some(cursor))),
                Ok(None) => None,
                Err(e) => Some((Err(e), None)),
            }
        })
    }
}

impl<C: Connection> fmt::Debug for RecordStream<'_, C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RecordStream")
            .field("handle", &self.handle)
            .field("exhausted", &self.summary.is_some())
            .finish()
    }
}

// ============================================================================
// Tests
// ============================================================================
