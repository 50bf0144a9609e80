//! Bulk Import Pipeline
//!
//! Chunked, idempotent upserts into one or both stores. Chunks run
//! sequentially per store; the two stores are written concurrently and
//! independently (no cross-store transaction).

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::engine::config::ImportConfig;
use crate::engine::error::{RowFailureKind, StoreError, StoreResult};
use crate::engine::graph::GraphStore;
use crate::engine::model::{id_str, ArticleRecord, FollowRecord, OrderRecord, SetupBatch, UserRecord};
use crate::engine::query::{Engine, Target};
use crate::engine::relational::RelationalStore;

/// A row a store refused to write
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RowFailure {
    /// Index of the row in the submitted list
    pub row: usize,
    pub id: String,
    pub kind: RowFailureKind,
    pub message: String,
}

/// Outcome of one chunk write; `row` indices are chunk-relative
#[derive(Debug, Clone, Default)]
pub struct ChunkReport {
    pub written: usize,
    pub rejected: Vec<RowFailure>,
}

/// Idempotent upsert capability shared by both stores
#[async_trait]
pub trait ImportSink: Send + Sync {
    async fn upsert_articles(&self, rows: &[ArticleRecord], cancel: &CancellationToken)
        -> StoreResult<ChunkReport>;

    async fn upsert_users(&self, rows: &[UserRecord], cancel: &CancellationToken) -> StoreResult<ChunkReport>;

    /// Edges whose endpoints are missing are rejected as `ReferentialViolation`
    async fn upsert_follows(&self, rows: &[FollowRecord], cancel: &CancellationToken)
        -> StoreResult<ChunkReport>;

    /// Orders whose user or article is missing are rejected as `ReferentialViolation`
    async fn upsert_orders(&self, rows: &[OrderRecord], cancel: &CancellationToken) -> StoreResult<ChunkReport>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ImportKind {
    Articles,
    Users,
    SocialGraph,
    Orders,
}

/// A chunk the store failed as a whole
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChunkFailure {
    pub chunk: usize,
    pub rows: usize,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntityImport {
    pub entity: ImportKind,
    pub submitted: usize,
    pub imported: usize,
    pub duplicates_skipped: usize,
    pub failures: Vec<RowFailure>,
    pub chunk_failures: Vec<ChunkFailure>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TargetImportReport {
    pub engine: Engine,
    pub started_at: DateTime<Utc>,
    pub elapsed_ms: u64,
    pub entities: Vec<EntityImport>,
}

impl TargetImportReport {
    pub fn entity(&self, kind: ImportKind) -> Option<&EntityImport> {
        self.entities.iter().find(|e| e.entity == kind)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportReport {
    pub targets: Vec<TargetImportReport>,
}

impl ImportReport {
    pub fn target(&self, engine: Engine) -> Option<&TargetImportReport> {
        self.targets.iter().find(|t| t.engine == engine)
    }
}

/// Rows that passed validation, tagged with their submitted index
struct Prepared<T> {
    submitted: usize,
    rows: Vec<(usize, T)>,
    invalid: Vec<RowFailure>,
    duplicates: usize,
}

fn invalid(row: usize, id: String, message: String) -> RowFailure {
    RowFailure {
        row,
        id,
        kind: RowFailureKind::InvalidRow,
        message,
    }
}

fn prepare_articles(rows: &[ArticleRecord]) -> Prepared<ArticleRecord> {
    let mut prepared = Prepared {
        submitted: rows.len(),
        rows: Vec::with_capacity(rows.len()),
        invalid: Vec::new(),
        duplicates: 0,
    };
    for (i, a) in rows.iter().enumerate() {
        if !a.price.is_finite() || a.price < 0.0 {
            prepared
                .invalid
                .push(invalid(i, id_str(&a.id), format!("price {} must be >= 0", a.price)));
        } else {
            prepared.rows.push((i, a.clone()));
        }
    }
    prepared
}

fn prepare_users(rows: &[UserRecord]) -> Prepared<UserRecord> {
    Prepared {
        submitted: rows.len(),
        rows: rows.iter().cloned().enumerate().collect(),
        invalid: Vec::new(),
        duplicates: 0,
    }
}

/// The follow relation is a set: repeated (follower, following) pairs are skipped
fn prepare_follows(rows: &[FollowRecord]) -> Prepared<FollowRecord> {
    let mut seen = HashSet::with_capacity(rows.len());
    let mut prepared = Prepared {
        submitted: rows.len(),
        rows: Vec::with_capacity(rows.len()),
        invalid: Vec::new(),
        duplicates: 0,
    };
    for (i, f) in rows.iter().enumerate() {
        if seen.insert(*f) {
            prepared.rows.push((i, *f));
        } else {
            prepared.duplicates += 1;
        }
    }
    prepared
}

fn prepare_orders(rows: &[OrderRecord]) -> Prepared<OrderRecord> {
    let mut prepared = Prepared {
        submitted: rows.len(),
        rows: Vec::with_capacity(rows.len()),
        invalid: Vec::new(),
        duplicates: 0,
    };
    for (i, o) in rows.iter().enumerate() {
        if o.quantity < 1 {
            prepared
                .invalid
                .push(invalid(i, id_str(&o.id), format!("quantity {} must be >= 1", o.quantity)));
        } else {
            prepared.rows.push((i, o.clone()));
        }
    }
    prepared
}

struct PreparedBatch {
    articles: Prepared<ArticleRecord>,
    users: Prepared<UserRecord>,
    follows: Prepared<FollowRecord>,
    orders: Prepared<OrderRecord>,
}

async fn import_entity<T, F, Fut>(
    engine: Engine,
    kind: ImportKind,
    prepared: &Prepared<T>,
    chunk_size: usize,
    write: F,
) -> EntityImport
where
    T: Clone,
    F: Fn(Vec<T>) -> Fut,
    Fut: Future<Output = StoreResult<ChunkReport>>,
{
    let mut report = EntityImport {
        entity: kind,
        submitted: prepared.submitted,
        imported: 0,
        duplicates_skipped: prepared.duplicates,
        failures: prepared.invalid.clone(),
        chunk_failures: Vec::new(),
    };

    for (n, chunk) in prepared.rows.chunks(chunk_size.max(1)).enumerate() {
        let rows: Vec<T> = chunk.iter().map(|(_, row)| row.clone()).collect();
        match write(rows).await {
            Ok(written) => {
                report.imported += written.written;
                report.failures.extend(written.rejected.into_iter().map(|mut f| {
                    f.row = chunk.get(f.row).map_or(f.row, |(i, _)| *i);
                    f
                }));
            }
            Err(e) => {
                warn!(%engine, entity = ?kind, chunk = n, rows = chunk.len(), error = %e, "Import chunk failed");
                report.chunk_failures.push(ChunkFailure {
                    chunk: n,
                    rows: chunk.len(),
                    message: e.to_string(),
                });
                if e == StoreError::Cancelled {
                    break;
                }
            }
        }
    }
    report.failures.sort_by_key(|f| f.row);
    report
}

/// Batch sizes per entity kind
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchSizes {
    pub articles: usize,
    pub users: usize,
    pub follows: usize,
    pub orders: usize,
}

impl From<&ImportConfig> for BatchSizes {
    fn from(config: &ImportConfig) -> Self {
        Self {
            articles: config.article_batch,
            users: config.user_batch,
            follows: config.follow_batch,
            orders: config.order_batch,
        }
    }
}

impl Default for BatchSizes {
    fn default() -> Self {
        BatchSizes::from(&ImportConfig::default())
    }
}

pub struct ImportPipeline {
    relational: Arc<dyn RelationalStore>,
    graph: Arc<dyn GraphStore>,
    sizes: BatchSizes,
}

impl ImportPipeline {
    pub fn new(relational: Arc<dyn RelationalStore>, graph: Arc<dyn GraphStore>, sizes: BatchSizes) -> Self {
        Self {
            relational,
            graph,
            sizes,
        }
    }

    /// Import everything in `batch` in dependency order, per selected target
    pub async fn import(&self, batch: &SetupBatch, targets: Target, cancel: &CancellationToken) -> ImportReport {
        let prepared = PreparedBatch {
            articles: prepare_articles(&batch.articles),
            users: prepare_users(&batch.users),
            follows: prepare_follows(&batch.follows),
            orders: prepare_orders(&batch.orders),
        };

        let relational = async {
            if targets.includes_relational() {
                Some(self.run_target(Engine::Relational, self.relational.as_ref(), &prepared, cancel).await)
            } else {
                None
            }
        };
        let graph = async {
            if targets.includes_graph() {
                let report = self.run_target(Engine::Graph, self.graph.as_ref(), &prepared, cancel).await;
                if let Err(e) = self.graph.flush().await {
                    warn!(error = %e, "Graph snapshot not written");
                }
                Some(report)
            } else {
                None
            }
        };
        let (relational, graph) = futures_util::future::join(relational, graph).await;

        ImportReport {
            targets: [relational, graph].into_iter().flatten().collect(),
        }
    }

    async fn run_target<S: ImportSink + ?Sized>(
        &self,
        engine: Engine,
        sink: &S,
        batch: &PreparedBatch,
        cancel: &CancellationToken,
    ) -> TargetImportReport {
        let started_at = Utc::now();
        let start = Instant::now();
        let mut entities = Vec::new();

        if batch.articles.submitted > 0 {
            entities.push(
                import_entity(engine, ImportKind::Articles, &batch.articles, self.sizes.articles, |rows| async move {
                    sink.upsert_articles(&rows, cancel).await
                })
                .await,
            );
        }
        if batch.users.submitted > 0 {
            entities.push(
                import_entity(engine, ImportKind::Users, &batch.users, self.sizes.users, |rows| async move {
                    sink.upsert_users(&rows, cancel).await
                })
                .await,
            );
        }
        if batch.follows.submitted > 0 {
            entities.push(
                import_entity(engine, ImportKind::SocialGraph, &batch.follows, self.sizes.follows, |rows| async move {
                    sink.upsert_follows(&rows, cancel).await
                })
                .await,
            );
        }
        if batch.orders.submitted > 0 {
            entities.push(
                import_entity(engine, ImportKind::Orders, &batch.orders, self.sizes.orders, |rows| async move {
                    sink.upsert_orders(&rows, cancel).await
                })
                .await,
            );
        }

        let report = TargetImportReport {
            engine,
            started_at,
            elapsed_ms: start.elapsed().as_millis() as u64,
            entities,
        };
        info!(
            %engine,
            imported = report.entities.iter().map(|e| e.imported).sum::<usize>(),
            failed = report.entities.iter().map(|e| e.failures.len()).sum::<usize>(),
            elapsed_ms = report.elapsed_ms,
            "Import finished"
        );
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use uuid::Uuid;

    /// Records chunk sizes and fails the configured chunk numbers
    #[derive(Default)]
    struct RecordingSink {
        chunks: Mutex<Vec<usize>>,
        fail_chunks: Vec<usize>,
    }

    impl RecordingSink {
        fn record(&self, n: usize) -> StoreResult<ChunkReport> {
            let mut chunks = self.chunks.lock().unwrap();
            let index = chunks.len();
            chunks.push(n);
            if self.fail_chunks.contains(&index) {
                return Err(StoreError::Timeout("slow disk".into()));
            }
            Ok(ChunkReport {
                written: n,
                rejected: vec![],
            })
        }
    }

    #[async_trait]
    impl ImportSink for RecordingSink {
        async fn upsert_articles(&self, rows: &[ArticleRecord], _: &CancellationToken) -> StoreResult<ChunkReport> {
            self.record(rows.len())
        }
        async fn upsert_users(&self, rows: &[UserRecord], _: &CancellationToken) -> StoreResult<ChunkReport> {
            self.record(rows.len())
        }
        async fn upsert_follows(&self, rows: &[FollowRecord], _: &CancellationToken) -> StoreResult<ChunkReport> {
            self.record(rows.len())
        }
        async fn upsert_orders(&self, rows: &[OrderRecord], _: &CancellationToken) -> StoreResult<ChunkReport> {
            self.record(rows.len())
        }
    }

    fn articles(n: usize) -> Vec<ArticleRecord> {
        (0..n)
            .map(|i| ArticleRecord {
                id: Uuid::new_v4(),
                name: format!("Article {}", i),
                price: i as f64,
            })
            .collect()
    }

    #[tokio::test]
    async fn test_chunks_are_bounded_and_failures_continue() {
        let sink = RecordingSink {
            fail_chunks: vec![1],
            ..Default::default()
        };
        let prepared = prepare_articles(&articles(25));
        let report = import_entity(Engine::Relational, ImportKind::Articles, &prepared, 10, |rows| {
            let sink = &sink;
            async move { sink.upsert_articles(&rows, &CancellationToken::new()).await }
        })
        .await;

        assert_eq!(*sink.chunks.lock().unwrap(), vec![10, 10, 5]);
        assert_eq!(report.imported, 15);
        assert_eq!(report.chunk_failures.len(), 1);
        assert_eq!(report.chunk_failures[0].chunk, 1);
        assert_eq!(report.chunk_failures[0].rows, 10);
    }

    #[test]
    fn test_invalid_rows_are_reported_not_written() {
        let mut rows = articles(3);
        rows[1].price = -1.0;
        rows[2].price = f64::NAN;
        let prepared = prepare_articles(&rows);
        assert_eq!(prepared.rows.len(), 1);
        assert_eq!(prepared.invalid.len(), 2);
        assert_eq!(prepared.invalid[0].row, 1);
        assert_eq!(prepared.invalid[0].kind, RowFailureKind::InvalidRow);

        let order = OrderRecord {
            id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            article_id: Uuid::new_v4(),
            quantity: 0,
        };
        assert_eq!(prepare_orders(&[order]).invalid.len(), 1);
    }

    #[test]
    fn test_follow_duplicates_skipped() {
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        let edge = FollowRecord {
            follower_id: a,
            following_id: b,
        };
        let back = FollowRecord {
            follower_id: b,
            following_id: a,
        };
        let prepared = prepare_follows(&[edge, edge, back, edge]);
        assert_eq!(prepared.rows.len(), 2);
        assert_eq!(prepared.duplicates, 2);
        assert_eq!(prepared.rows[1].0, 2);
    }

    #[tokio::test]
    async fn test_rejected_rows_map_back_to_submitted_index() {
        let mut rows = articles(4);
        rows[0].price = -3.0;
        let prepared = prepare_articles(&rows);
        let report = import_entity(Engine::Graph, ImportKind::Articles, &prepared, 2, |chunk: Vec<ArticleRecord>| async move {
            let rejected: Vec<RowFailure> = chunk
                .iter()
                .enumerate()
                .skip(1)
                .map(|(i, a)| RowFailure {
                    row: i,
                    id: id_str(&a.id),
                    kind: RowFailureKind::Store,
                    message: "nope".into(),
                })
                .collect();
            Ok(ChunkReport {
                written: chunk.len() - rejected.len(),
                rejected,
            })
        })
        .await;
        // valid rows are submitted 1,2 | 3; chunk-relative row 1 of chunk 0 is submitted row 2
        let rows: Vec<usize> = report.failures.iter().map(|f| f.row).collect();
        assert_eq!(rows, vec![0, 2]);
        assert_eq!(report.imported, 2);
    }
}
