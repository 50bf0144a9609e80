//! Relational side: SQL translation and the SQLite store
//!
//! The store is consumed through the `RelationalStore` capability trait so the
//! executor never depends on a concrete backend.

pub mod dialect;
pub mod schema;
pub mod sqlite;
pub mod translator;

pub use dialect::SqlDialect;
pub use sqlite::SqliteStore;
pub use translator::{RelationalPlan, RelationalTranslator};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::engine::error::StoreResult;
use crate::engine::import::ImportSink;
use crate::engine::model::StoreStats;
use crate::engine::query::ScalarValue;
use crate::engine::reachability::FolloweeSource;

/// One result row keyed by column label
pub type Row = serde_json::Map<String, Value>;

/// SQL value for parameterized queries
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SqlValue {
    Null,
    Integer(i64),
    Real(f64),
    Text(String),
    /// Bound as a JSON array on SQLite, as an array on PostgreSQL
    List(Vec<SqlValue>),
}

impl From<&ScalarValue> for SqlValue {
    fn from(value: &ScalarValue) -> Self {
        match value {
            ScalarValue::Uuid(id) => SqlValue::Text(id.hyphenated().to_string()),
            ScalarValue::Text(s) => SqlValue::Text(s.clone()),
            ScalarValue::Decimal(d) => SqlValue::Real(*d),
            ScalarValue::Integer(i) => SqlValue::Integer(*i),
        }
    }
}

impl SqlValue {
    pub fn to_json(&self) -> Value {
        match self {
            SqlValue::Null => Value::Null,
            SqlValue::Integer(i) => Value::from(*i),
            SqlValue::Real(f) => Value::from(*f),
            SqlValue::Text(s) => Value::String(s.clone()),
            SqlValue::List(items) => Value::Array(items.iter().map(SqlValue::to_json).collect()),
        }
    }
}

/// A rendered statement and its positional parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SqlStatement {
    pub sql: String,
    pub params: Vec<SqlValue>,
}

/// Relational store capability
#[async_trait]
pub trait RelationalStore: ImportSink + FolloweeSource {
    /// Which SQL dialect statements must be rendered in
    fn dialect(&self) -> SqlDialect;

    /// Run a predicate/sort/pagination query
    async fn query(&self, statement: &SqlStatement, cancel: &CancellationToken) -> StoreResult<Vec<Row>>;

    /// Run a single-value count query
    async fn count(&self, statement: &SqlStatement, cancel: &CancellationToken) -> StoreResult<i64>;

    async fn stats(&self, cancel: &CancellationToken) -> StoreResult<StoreStats>;
}
