//! Driver Types
//!
//! 드라이버에서 사용하는 타입 정의

use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::error::DriverError;
use crate::bolt::message::Metadata;
use crate::bolt::packstream::{PackStreamStructure, PackStreamValue};

pub use crate::bolt::message::AccessMode;

/// 노드 구조체 태그
const NODE_TAG: u8 = 0x4E;
/// 관계 구조체 태그
const RELATIONSHIP_TAG: u8 = 0x52;

// ============================================================================
// Value - 그래프 값
// ============================================================================

/// 그래프 값 타입
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    /// Null
    Null,
    /// Boolean
    Boolean(bool),
    /// Integer (i64)
    Integer(i64),
    /// Float (f64)
    Float(f64),
    /// String
    String(String),
    /// Bytes
    Bytes(Vec<u8>),
    /// List
    List(Vec<Value>),
    /// Map
    Map(HashMap<String, Value>),
    /// Node
    Node(Node),
    /// Relationship
    Relationship(Relationship),
}

impl Value {
    /// Null 여부
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Boolean으로 변환
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Boolean(b) => Some(*b),
            _ => None,
        }
    }

    /// Integer로 변환
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Integer(i) => Some(*i),
            _ => None,
        }
    }

    /// Float로 변환
    pub fn as_float(&self) -> Option<f64> {
        match self {
            Value::Float(f) => Some(*f),
            Value::Integer(i) => Some(*i as f64),
            _ => None,
        }
    }

    /// String으로 변환
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    /// List로 변환
    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Value::List(l) => Some(l),
            _ => None,
        }
    }

    /// Map으로 변환
    pub fn as_map(&self) -> Option<&HashMap<String, Value>> {
        match self {
            Value::Map(m) => Some(m),
            _ => None,
        }
    }

    /// Node로 변환
    pub fn as_node(&self) -> Option<&Node> {
        match self {
            Value::Node(n) => Some(n),
            _ => None,
        }
    }

    /// 타입 이름
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "Null",
            Value::Boolean(_) => "Boolean",
            Value::Integer(_) => "Integer",
            Value::Float(_) => "Float",
            Value::String(_) => "String",
            Value::Bytes(_) => "Bytes",
            Value::List(_) => "List",
            Value::Map(_) => "Map",
            Value::Node(_) => "Node",
            Value::Relationship(_) => "Relationship",
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "null"),
            Value::Boolean(b) => write!(f, "{}", b),
            Value::Integer(i) => write!(f, "{}", i),
            Value::Float(fl) => write!(f, "{}", fl),
            Value::String(s) => write!(f, "\"{}\"", s),
            Value::Bytes(b) => write!(f, "<{} bytes>", b.len()),
            Value::List(l) => write!(f, "[{} items]", l.len()),
            Value::Map(m) => write!(f, "{{{} entries}}", m.len()),
            Value::Node(n) => write!(f, "{}", n),
            Value::Relationship(r) => write!(f, "{}", r),
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Boolean(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Integer(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Integer(v as i64)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::String(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::String(v.to_string())
    }
}

impl<T: Into<Value>> From<Vec<T>> for Value {
    fn from(v: Vec<T>) -> Self {
        Value::List(v.into_iter().map(Into::into).collect())
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(Value::Null)
    }
}

impl From<HashMap<String, Value>> for Value {
    fn from(v: HashMap<String, Value>) -> Self {
        Value::Map(v)
    }
}

// ============================================================================
// Node / Relationship
// ============================================================================

/// 그래프 노드
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    /// 노드 ID
    pub id: i64,
    /// 레이블
    pub labels: Vec<String>,
    /// 속성
    pub properties: HashMap<String, Value>,
    /// 엘리먼트 ID (Bolt 5)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub element_id: Option<String>,
}

impl Node {
    /// 레이블 포함 여부
    pub fn has_label(&self, label: &str) -> bool {
        self.labels.iter().any(|l| l == label)
    }

    /// 속성 가져오기
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.properties.get(key)
    }
}

impl fmt::Display for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let labels = if self.labels.is_empty() {
            String::new()
        } else {
            format!(":{}", self.labels.join(":"))
        };
        write!(f, "({}{})", self.id, labels)
    }
}

/// 그래프 관계
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Relationship {
    /// 관계 ID
    pub id: i64,
    /// 시작 노드 ID
    pub start_node_id: i64,
    /// 끝 노드 ID
    pub end_node_id: i64,
    /// 타입
    #[serde(rename = "type")]
    pub rel_type: String,
    /// 속성
    pub properties: HashMap<String, Value>,
    /// 엘리먼트 ID (Bolt 5)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub element_id: Option<String>,
}

impl fmt::Display for Relationship {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "({})-[:{}]->({})",
            self.start_node_id, self.rel_type, self.end_node_id
        )
    }
}

// ============================================================================
// PackStream 변환
// ============================================================================

fn convert_map(map: Metadata) -> HashMap<String, Value> {
    map.into_iter().map(|(k, v)| (k, v.into())).collect()
}

fn node_from_structure(s: &PackStreamStructure) -> Option<Node> {
    if s.tag != NODE_TAG || s.fields.len() < 3 {
        return None;
    }
    Some(Node {
        id: s.fields[0].as_int()?,
        labels: s.fields[1].string_list()?,
        properties: convert_map(s.fields[2].as_map()?.clone()),
        element_id: s.fields.get(3).and_then(|v| v.as_str()).map(String::from),
    })
}

fn relationship_from_structure(s: &PackStreamStructure) -> Option<Relationship> {
    if s.tag != RELATIONSHIP_TAG || s.fields.len() < 5 {
        return None;
    }
    Some(Relationship {
        id: s.fields[0].as_int()?,
        start_node_id: s.fields[1].as_int()?,
        end_node_id: s.fields[2].as_int()?,
        rel_type: s.fields[3].as_str()?.to_string(),
        properties: convert_map(s.fields[4].as_map()?.clone()),
        element_id: s.fields.get(5).and_then(|v| v.as_str()).map(String::from),
    })
}

impl From<PackStreamValue> for Value {
    fn from(value: PackStreamValue) -> Self {
        match value {
            PackStreamValue::Null => Value::Null,
            PackStreamValue::Boolean(b) => Value::Boolean(b),
            PackStreamValue::Integer(i) => Value::Integer(i),
            PackStreamValue::Float(f) => Value::Float(f),
            PackStreamValue::String(s) => Value::String(s),
            PackStreamValue::Bytes(b) => Value::Bytes(b),
            PackStreamValue::List(l) => Value::List(l.into_iter().map(Into::into).collect()),
            PackStreamValue::Map(m) => Value::Map(convert_map(m)),
            PackStreamValue::Structure(s) => {
                if let Some(node) = node_from_structure(&s) {
                    Value::Node(node)
                } else if let Some(rel) = relationship_from_structure(&s) {
                    Value::Relationship(rel)
                } else {
                    // 알 수 없는 구조체는 맵으로 보존
                    let mut map = HashMap::new();
                    map.insert("_tag".to_string(), Value::Integer(s.tag as i64));
                    for (i, field) in s.fields.into_iter().enumerate() {
                        map.insert(format!("_{}", i), field.into());
                    }
                    Value::Map(map)
                }
            }
        }
    }
}

impl From<Value> for PackStreamValue {
    fn from(value: Value) -> Self {
        match value {
            Value::Null => PackStreamValue::Null,
            Value::Boolean(b) => PackStreamValue::Boolean(b),
            Value::Integer(i) => PackStreamValue::Integer(i),
            Value::Float(f) => PackStreamValue::Float(f),
            Value::String(s) => PackStreamValue::String(s),
            Value::Bytes(b) => PackStreamValue::Bytes(b),
            Value::List(l) => PackStreamValue::List(l.into_iter().map(Into::into).collect()),
            Value::Map(m) => PackStreamValue::Map(to_metadata(m)),
            Value::Node(n) => PackStreamValue::Structure(PackStreamStructure::new(
                NODE_TAG,
                vec![
                    PackStreamValue::Integer(n.id),
                    n.labels.into(),
                    PackStreamValue::Map(to_metadata(n.properties)),
                ],
            )),
            Value::Relationship(r) => PackStreamValue::Structure(PackStreamStructure::new(
                RELATIONSHIP_TAG,
                vec![
                    PackStreamValue::Integer(r.id),
                    PackStreamValue::Integer(r.start_node_id),
                    PackStreamValue::Integer(r.end_node_id),
                    PackStreamValue::String(r.rel_type),
                    PackStreamValue::Map(to_metadata(r.properties)),
                ],
            )),
        }
    }
}

/// 파라미터 맵을 와이어 맵으로 변환
pub(crate) fn to_metadata(map: HashMap<String, Value>) -> Metadata {
    map.into_iter().map(|(k, v)| (k, v.into())).collect()
}

// ============================================================================
// TryFrom implementations
// ============================================================================

impl TryFrom<Value> for bool {
    type Error = DriverError;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        value
            .as_bool()
            .ok_or_else(|| DriverError::type_conversion(format!("Cannot convert {} to bool", value.type_name())))
    }
}

impl TryFrom<Value> for i64 {
    type Error = DriverError;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        value
            .as_int()
            .ok_or_else(|| DriverError::type_conversion(format!("Cannot convert {} to i64", value.type_name())))
    }
}

impl TryFrom<Value> for f64 {
    type Error = DriverError;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        value
            .as_float()
            .ok_or_else(|| DriverError::type_conversion(format!("Cannot convert {} to f64", value.type_name())))
    }
}

impl TryFrom<Value> for String {
    type Error = DriverError;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        match value {
            Value::String(s) => Ok(s),
            other => Err(DriverError::type_conversion(format!(
                "Cannot convert {} to String",
                other.type_name()
            ))),
        }
    }
}

impl TryFrom<Value> for Node {
    type Error = DriverError;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        match value {
            Value::Node(n) => Ok(n),
            other => Err(DriverError::type_conversion(format!(
                "Cannot convert {} to Node",
                other.type_name()
            ))),
        }
    }
}

// ============================================================================
// Command - 실행할 문장
// ============================================================================

/// 쿼리 문장, 파라미터, 메타데이터
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Command {
    /// 쿼리 텍스트
    pub cypher: String,
    /// 파라미터
    pub params: HashMap<String, Value>,
    /// 문장 메타데이터 (자동 커밋 시 tx_metadata로 전송)
    pub meta: HashMap<String, Value>,
    /// PULL 배치 크기 재정의 (-1 = 전부)
    pub fetch_size: Option<i64>,
}

impl Command {
    /// 새 명령 생성
    pub fn new(cypher: impl Into<String>) -> Self {
        Self {
            cypher: cypher.into(),
            ..Default::default()
        }
    }

    /// 파라미터 추가
    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }

    /// 파라미터 맵 설정
    pub fn with_params(mut self, params: HashMap<String, Value>) -> Self {
        self.params = params;
        self
    }

    /// 메타데이터 추가
    pub fn with_meta(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.meta.insert(key.into(), value.into());
        self
    }

    /// 배치 크기 재정의
    pub fn with_fetch_size(mut self, fetch_size: i64) -> Self {
        self.fetch_size = Some(fetch_size);
        self
    }
}

impl From<&str> for Command {
    fn from(cypher: &str) -> Self {
        Command::new(cypher)
    }
}

// ============================================================================
// TxConfig - 트랜잭션 설정
// ============================================================================

/// 트랜잭션 설정
#[derive(Debug, Clone, PartialEq, Default)]
pub struct TxConfig {
    /// 접근 모드
    pub mode: AccessMode,
    /// 서버 측 트랜잭션 타임아웃
    pub timeout: Option<Duration>,
    /// 트랜잭션 메타데이터
    pub metadata: HashMap<String, Value>,
    /// 먼저 반영되어야 하는 북마크
    pub bookmarks: Vec<String>,
    /// 대상 데이터베이스 (없으면 연결의 선택값 또는 기본 DB)
    pub database: Option<String>,
}

impl TxConfig {
    /// 읽기 트랜잭션
    pub fn read() -> Self {
        Self {
            mode: AccessMode::Read,
            ..Default::default()
        }
    }

    /// 쓰기 트랜잭션
    pub fn write() -> Self {
        Self::default()
    }

    /// 타임아웃 설정
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// 메타데이터 추가
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// 북마크 설정
    pub fn with_bookmarks<I, S>(mut self, bookmarks: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.bookmarks = bookmarks
            .into_iter()
            .map(Into::into)
            .filter(|b: &String| !b.is_empty())
            .collect();
        self
    }

    /// 데이터베이스 설정
    pub fn with_database(mut self, database: impl Into<String>) -> Self {
        self.database = Some(database.into());
        self
    }
}

// ============================================================================
// Handles
// ============================================================================

/// 연결 하나에서만 유효한 결과 스트림 핸들
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StreamHandle(pub(crate) u64);

/// 연결 하나에서만 유효한 트랜잭션 핸들
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TxHandle(pub(crate) u64);

// ============================================================================
// Summary - 결과 요약
// ============================================================================

/// 쿼리 타입
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum QueryType {
    /// 읽기 전용 (`r`)
    ReadOnly,
    /// 읽기/쓰기 (`rw`)
    ReadWrite,
    /// 쓰기 전용 (`w`)
    WriteOnly,
    /// 스키마 쓰기 (`s`)
    SchemaWrite,
}

impl QueryType {
    /// 서버 값에서 파싱
    pub fn from_code(code: &str) -> Option<Self> {
        match code {
            "r" => Some(Self::ReadOnly),
            "rw" => Some(Self::ReadWrite),
            "w" => Some(Self::WriteOnly),
            "s" => Some(Self::SchemaWrite),
            _ => None,
        }
    }
}

/// 업데이트 통계
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Counters {
    /// 생성된 노드 수
    pub nodes_created: i64,
    /// 삭제된 노드 수
    pub nodes_deleted: i64,
    /// 생성된 관계 수
    pub relationships_created: i64,
    /// 삭제된 관계 수
    pub relationships_deleted: i64,
    /// 설정된 속성 수
    pub properties_set: i64,
    /// 추가된 레이블 수
    pub labels_added: i64,
    /// 제거된 레이블 수
    pub labels_removed: i64,
    /// 추가된 인덱스 수
    pub indexes_added: i64,
    /// 제거된 인덱스 수
    pub indexes_removed: i64,
    /// 추가된 제약 조건 수
    pub constraints_added: i64,
    /// 제거된 제약 조건 수
    pub constraints_removed: i64,
    /// 시스템 업데이트 수
    pub system_updates: i64,
}

impl Counters {
    /// SUCCESS의 `stats` 맵에서 생성
    pub fn from_stats(stats: &Metadata) -> Self {
        let get = |key: &str| stats.get(key).and_then(|v| v.as_int()).unwrap_or(0);
        Self {
            nodes_created: get("nodes-created"),
            nodes_deleted: get("nodes-deleted"),
            relationships_created: get("relationships-created"),
            relationships_deleted: get("relationships-deleted"),
            properties_set: get("properties-set"),
            labels_added: get("labels-added"),
            labels_removed: get("labels-removed"),
            indexes_added: get("indexes-added"),
            indexes_removed: get("indexes-removed"),
            constraints_added: get("constraints-added"),
            constraints_removed: get("constraints-removed"),
            system_updates: get("system-updates"),
        }
    }

    /// 데이터 변경 여부
    pub fn contains_updates(&self) -> bool {
        self.nodes_created
            + self.nodes_deleted
            + self.relationships_created
            + self.relationships_deleted
            + self.properties_set
            + self.labels_added
            + self.labels_removed
            + self.indexes_added
            + self.indexes_removed
            + self.constraints_added
            + self.constraints_removed
            > 0
    }
}

/// 스트림 종료 시 반환되는 요약
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Summary {
    /// 결과 키
    pub keys: Vec<String>,
    /// 쿼리 타입
    pub query_type: Option<QueryType>,
    /// 업데이트 통계
    pub counters: Counters,
    /// 자동 커밋이 만든 북마크
    pub bookmark: Option<String>,
    /// 실행된 데이터베이스
    pub database: Option<String>,
    /// 서버 주소
    pub server_address: String,
    /// 서버 에이전트
    pub server_agent: String,
    /// 첫 레코드까지 걸린 시간
    pub result_available_after: Option<Duration>,
    /// 마지막 레코드까지 걸린 시간
    pub result_consumed_after: Option<Duration>,
}

fn millis(v: Option<i64>) -> Option<Duration> {
    v.filter(|ms| *ms >= 0).map(|ms| Duration::from_millis(ms as u64))
}

impl Summary {
    /// RUN 응답의 `t_first`와 마지막 SUCCESS 메타데이터로 요약 생성
    pub(crate) fn build(
        keys: &[String],
        t_first: Option<i64>,
        done: &crate::bolt::SuccessMessage,
        server_address: &str,
        server_agent: &str,
    ) -> Self {
        Self {
            keys: keys.to_vec(),
            query_type: done.query_type().and_then(QueryType::from_code),
            counters: done.stats().map(Counters::from_stats).unwrap_or_default(),
            bookmark: done.bookmark().map(String::from),
            database: done.db().map(String::from),
            server_address: server_address.to_string(),
            server_agent: server_agent.to_string(),
            result_available_after: millis(t_first),
            result_consumed_after: millis(done.t_last()),
        }
    }
}

/// `next` 한 번의 결과
#[derive(Debug, Clone, PartialEq)]
pub enum StreamItem {
    /// 레코드 하나
    Record(super::record::Record),
    /// 스트림 종료
    Summary(Summary),
}
