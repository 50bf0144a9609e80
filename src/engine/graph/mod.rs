//! Graph side: pattern AST, translation and the embedded property graph

pub mod memory;
pub mod pattern;
pub mod translator;

pub use memory::MemoryGraph;
pub use pattern::GraphQuery;
pub use translator::GraphTranslator;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::{Map, Value};
use tokio_util::sync::CancellationToken;

use crate::engine::error::StoreResult;
use crate::engine::import::ImportSink;
use crate::engine::model::StoreStats;

/// A value returned by a pattern query: a whole node or a scalar
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum GraphValue {
    Node(Map<String, Value>),
    Scalar(Value),
}

/// One tabular result row with the projection's declared column names
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GraphRow {
    pub columns: Vec<String>,
    pub values: Vec<GraphValue>,
}

/// Graph store capability
#[async_trait]
pub trait GraphStore: ImportSink {
    /// Run a pattern query, returning projected rows
    async fn run(&self, query: &GraphQuery, cancel: &CancellationToken) -> StoreResult<Vec<GraphRow>>;

    /// Run the count-shaped variant of the same pattern
    async fn count(&self, query: &GraphQuery, cancel: &CancellationToken) -> StoreResult<i64>;

    async fn stats(&self, cancel: &CancellationToken) -> StoreResult<StoreStats>;

    /// Persist pending writes, if the store has anywhere to put them
    async fn flush(&self) -> StoreResult<()> {
        Ok(())
    }
}
