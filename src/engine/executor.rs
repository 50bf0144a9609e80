//! Dual-Backend Executor
//!
//! request -> validate -> per-engine plan -> execute -> normalize -> page.
//! Engines run concurrently with no shared mutable state; one engine failing
//! never hides the other's result.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::engine::error::{QueryError, QueryResult, StoreError};
use crate::engine::graph::{GraphStore, GraphTranslator};
use crate::engine::normalize::{self, Record};
use crate::engine::query::{
    Engine, EntityKind, NormalizedQuery, PaginatedResult, QueryLimits, QueryRequest, Target,
};
use crate::engine::relational::{
    RelationalStore, RelationalTranslator, SqlDialect, SqlStatement,
};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub kind: String,
    pub message: String,
}

impl From<&QueryError> for ErrorBody {
    fn from(err: &QueryError) -> Self {
        Self {
            kind: err.kind().to_string(),
            message: err.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum EngineStatus {
    Ok { result: PaginatedResult<Record> },
    Error { error: ErrorBody },
}

/// One engine's answer: a page, or an explicit failure distinct from zero matches
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineOutcome {
    pub engine: Engine,
    #[serde(flatten)]
    pub status: EngineStatus,
}

impl EngineOutcome {
    pub fn result(&self) -> Option<&PaginatedResult<Record>> {
        match &self.status {
            EngineStatus::Ok { result } => Some(result),
            EngineStatus::Error { .. } => None,
        }
    }

    pub fn error(&self) -> Option<&ErrorBody> {
        match &self.status {
            EngineStatus::Ok { .. } => None,
            EngineStatus::Error { error } => Some(error),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExplainedSql {
    pub dialect: SqlDialect,
    pub data: SqlStatement,
    pub count: SqlStatement,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExplainedCypher {
    pub data: String,
    pub count: String,
    pub params: BTreeMap<String, Value>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Explain {
    pub entity: EntityKind,
    pub relational: ExplainedSql,
    pub graph: ExplainedCypher,
}

pub struct DualExecutor {
    relational: Arc<dyn RelationalStore>,
    graph: Arc<dyn GraphStore>,
    limits: QueryLimits,
    timeout: Duration,
}

impl DualExecutor {
    pub fn new(
        relational: Arc<dyn RelationalStore>,
        graph: Arc<dyn GraphStore>,
        limits: QueryLimits,
        timeout: Duration,
    ) -> Self {
        Self {
            relational,
            graph,
            limits,
            timeout,
        }
    }

    pub fn limits(&self) -> &QueryLimits {
        &self.limits
    }

    /// Validation errors fail the whole request before any store call;
    /// store errors are reported per engine.
    pub async fn execute(
        &self,
        request: &QueryRequest,
        targets: Target,
        cancel: &CancellationToken,
    ) -> QueryResult<Vec<EngineOutcome>> {
        let query = request.normalize(&self.limits)?;

        let relational = async {
            if targets.includes_relational() {
                let token = cancel.child_token();
                let outcome = self
                    .guarded(Engine::Relational, &token, self.run_relational(&query, &token))
                    .await;
                Some(outcome)
            } else {
                None
            }
        };
        let graph = async {
            if targets.includes_graph() {
                let token = cancel.child_token();
                let outcome = self
                    .guarded(Engine::Graph, &token, self.run_graph(&query, &token))
                    .await;
                Some(outcome)
            } else {
                None
            }
        };
        let (relational, graph) = futures_util::future::join(relational, graph).await;
        Ok([relational, graph].into_iter().flatten().collect())
    }

    /// Bound one engine by the timeout and the caller's cancellation
    async fn guarded<F>(&self, engine: Engine, token: &CancellationToken, work: F) -> EngineOutcome
    where
        F: Future<Output = QueryResult<PaginatedResult<Record>>>,
    {
        let result = tokio::select! {
            finished = tokio::time::timeout(self.timeout, work) => match finished {
                Ok(result) => result,
                Err(_) => {
                    token.cancel();
                    Err(StoreError::Timeout(format!(
                        "{} engine exceeded {} ms",
                        engine,
                        self.timeout.as_millis()
                    ))
                    .into())
                }
            },
            _ = token.cancelled() => Err(StoreError::Cancelled.into()),
        };

        let status = match result {
            Ok(result) => {
                info!(
                    %engine,
                    total = result.total_count,
                    items = result.items.len(),
                    elapsed_ms = result.request_time_in_milliseconds,
                    "Engine query finished"
                );
                EngineStatus::Ok { result }
            }
            Err(err) => {
                warn!(%engine, kind = err.kind(), error = %err, "Engine query failed");
                EngineStatus::Error {
                    error: ErrorBody::from(&err),
                }
            }
        };
        EngineOutcome { engine, status }
    }

    async fn run_relational(
        &self,
        query: &NormalizedQuery,
        cancel: &CancellationToken,
    ) -> QueryResult<PaginatedResult<Record>> {
        let start = Instant::now();
        let store = self.relational.as_ref();
        let plan = RelationalTranslator::plan(query, store, cancel).await?;
        let dialect = store.dialect();

        let total = store.count(&plan.render_count(dialect), cancel).await?;
        let rows = store.query(&plan.render(dialect), cancel).await?;
        let items = rows
            .iter()
            .map(|row| normalize::from_relational(query.entity, row))
            .collect::<QueryResult<Vec<_>>>()?;

        Ok(PaginatedResult::new(
            items,
            total,
            query.page,
            query.page_size,
            start.elapsed(),
        ))
    }

    async fn run_graph(
        &self,
        query: &NormalizedQuery,
        cancel: &CancellationToken,
    ) -> QueryResult<PaginatedResult<Record>> {
        let start = Instant::now();
        let pattern = GraphTranslator::translate(query);

        let total = self.graph.count(&pattern, cancel).await?;
        let rows = self.graph.run(&pattern, cancel).await?;
        let items = rows
            .iter()
            .map(|row| normalize::from_graph(query.entity, row))
            .collect::<QueryResult<Vec<_>>>()?;

        Ok(PaginatedResult::new(
            items,
            total,
            query.page,
            query.page_size,
            start.elapsed(),
        ))
    }

    /// Render both engines' statements without running them. A scoped
    /// request still resolves its reachability set against the relational store.
    pub async fn explain(
        &self,
        request: &QueryRequest,
        dialect: SqlDialect,
        cancel: &CancellationToken,
    ) -> QueryResult<Explain> {
        let query = request.normalize(&self.limits)?;
        let plan = RelationalTranslator::plan(&query, self.relational.as_ref(), cancel).await?;
        let pattern = GraphTranslator::translate(&query);

        Ok(Explain {
            entity: query.entity,
            relational: ExplainedSql {
                dialect,
                data: plan.render(dialect),
                count: plan.render_count(dialect),
            },
            graph: ExplainedCypher {
                data: pattern.to_cypher(),
                count: pattern.to_count_cypher(),
                params: pattern.params,
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::graph::MemoryGraph;
    use crate::engine::import::{ChunkReport, ImportSink};
    use crate::engine::model::{
        ArticleRecord, FollowRecord, OrderRecord, StoreStats, UserRecord,
    };
    use crate::engine::query::FilterOperator;
    use crate::engine::reachability::FolloweeSource;
    use crate::engine::relational::{Row, SqliteStore};
    use crate::engine::error::StoreResult;
    use async_trait::async_trait;
    use uuid::Uuid;

    /// Relational store that is always down
    struct Offline;

    #[async_trait]
    impl ImportSink for Offline {
        async fn upsert_articles(&self, _: &[ArticleRecord], _: &CancellationToken) -> StoreResult<ChunkReport> {
            Err(StoreError::Unavailable("offline".into()))
        }
        async fn upsert_users(&self, _: &[UserRecord], _: &CancellationToken) -> StoreResult<ChunkReport> {
            Err(StoreError::Unavailable("offline".into()))
        }
        async fn upsert_follows(&self, _: &[FollowRecord], _: &CancellationToken) -> StoreResult<ChunkReport> {
            Err(StoreError::Unavailable("offline".into()))
        }
        async fn upsert_orders(&self, _: &[OrderRecord], _: &CancellationToken) -> StoreResult<ChunkReport> {
            Err(StoreError::Unavailable("offline".into()))
        }
    }

    #[async_trait]
    impl FolloweeSource for Offline {
        async fn followees(&self, _: &[Uuid], _: &CancellationToken) -> StoreResult<Vec<Uuid>> {
            Err(StoreError::Unavailable("offline".into()))
        }
    }

    #[async_trait]
    impl RelationalStore for Offline {
        fn dialect(&self) -> SqlDialect {
            SqlDialect::Sqlite
        }
        async fn query(&self, _: &SqlStatement, _: &CancellationToken) -> StoreResult<Vec<Row>> {
            Err(StoreError::Unavailable("offline".into()))
        }
        async fn count(&self, _: &SqlStatement, _: &CancellationToken) -> StoreResult<i64> {
            Err(StoreError::Unavailable("offline".into()))
        }
        async fn stats(&self, _: &CancellationToken) -> StoreResult<StoreStats> {
            Err(StoreError::Unavailable("offline".into()))
        }
    }

    fn executor(relational: Arc<dyn RelationalStore>) -> DualExecutor {
        DualExecutor::new(
            relational,
            Arc::new(MemoryGraph::new()),
            QueryLimits::default(),
            Duration::from_secs(5),
        )
    }

    #[tokio::test]
    async fn test_one_engine_failure_keeps_the_other() {
        let exec = executor(Arc::new(Offline));
        let outcomes = exec
            .execute(&QueryRequest::new(EntityKind::Users), Target::Both, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(outcomes.len(), 2);
        assert_eq!(outcomes[0].engine, Engine::Relational);
        assert_eq!(outcomes[0].error().unwrap().kind, "StoreUnavailable");
        let graph = outcomes[1].result().unwrap();
        assert_eq!(graph.total_count, 0);
        assert!(graph.items.is_empty());
    }

    #[tokio::test]
    async fn test_validation_rejects_before_store_call() {
        let exec = executor(Arc::new(Offline));
        let err = exec
            .execute(
                &QueryRequest::new(EntityKind::Users).filter("Shoe", FilterOperator::Equals, "x"),
                Target::Both,
                &CancellationToken::new(),
            )
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "UnknownField");
    }

    #[tokio::test]
    async fn test_single_target() {
        let exec = executor(Arc::new(SqliteStore::in_memory().unwrap()));
        let outcomes = exec
            .execute(&QueryRequest::new(EntityKind::Orders), Target::Graph, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(outcomes.len(), 1);
        assert_eq!(outcomes[0].engine, Engine::Graph);
    }

    #[tokio::test]
    async fn test_cancelled_request_reports_cancelled() {
        let exec = executor(Arc::new(SqliteStore::in_memory().unwrap()));
        let cancel = CancellationToken::new();
        cancel.cancel();
        let outcomes = exec
            .execute(&QueryRequest::new(EntityKind::Articles), Target::Both, &cancel)
            .await
            .unwrap();
        assert!(outcomes
            .iter()
            .all(|o| o.error().map(|e| e.kind.as_str()) == Some("Cancelled")));
    }

    #[tokio::test]
    async fn test_outcome_wire_shape() {
        let exec = executor(Arc::new(Offline));
        let outcomes = exec
            .execute(&QueryRequest::new(EntityKind::Articles), Target::Both, &CancellationToken::new())
            .await
            .unwrap();
        let wire = serde_json::to_value(&outcomes).unwrap();
        assert_eq!(wire[0]["engine"], "relational");
        assert_eq!(wire[0]["status"], "error");
        assert_eq!(wire[1]["status"], "ok");
        assert_eq!(wire[1]["result"]["totalPages"], 0);
    }

    #[tokio::test]
    async fn test_explain_renders_both_engines() {
        let exec = executor(Arc::new(SqliteStore::in_memory().unwrap()));
        let explained = exec
            .explain(
                &QueryRequest::new(EntityKind::Articles).filter("Price", FilterOperator::GreaterThan, 5),
                SqlDialect::Postgres,
                &CancellationToken::new(),
            )
            .await
            .unwrap();
        assert!(explained.relational.data.sql.contains("a.price > $1"));
        assert!(explained.graph.data.contains("a.price > $p0"));
        assert_eq!(explained.graph.params["p0"], serde_json::json!(5.0));
    }
}
