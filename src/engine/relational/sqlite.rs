//! SQLite Store
//!
//! Implements the relational capabilities on rusqlite + r2d2 pooling. Every
//! call runs on the blocking pool and can be interrupted from the async side.

use async_trait::async_trait;
use parking_lot::Mutex;
use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::functions::FunctionFlags;
use rusqlite::types::{ToSql, ToSqlOutput, Value as SqlLiteral, ValueRef};
use rusqlite::{params, Connection, ErrorCode, InterruptHandle, OptionalExtension};
use serde_json::{json, Value};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use uuid::Uuid;

use crate::engine::error::{RowFailureKind, StoreError, StoreResult};
use crate::engine::import::{ChunkReport, ImportSink, RowFailure};
use crate::engine::model::{id_str, ArticleRecord, FollowRecord, OrderRecord, StoreStats, UserRecord};
use crate::engine::reachability::FolloweeSource;

use super::dialect::SqlDialect;
use super::schema::init_schema;
use super::{RelationalStore, Row, SqlStatement, SqlValue};

type DbPool = Pool<SqliteConnectionManager>;

/// Per-connection setup: pragmas, plus a `lower` that folds full Unicode
/// (the built-in only folds ASCII) so `LIKE` matches the graph store.
fn init_connection(conn: &mut Connection, pragmas: &str) -> rusqlite::Result<()> {
    conn.execute_batch(pragmas)?;
    conn.create_scalar_function(
        "lower",
        1,
        FunctionFlags::SQLITE_UTF8 | FunctionFlags::SQLITE_DETERMINISTIC,
        |ctx| Ok(ctx.get::<Option<String>>(0)?.map(|s| s.to_lowercase())),
    )
}

impl ToSql for SqlValue {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(match self {
            SqlValue::Null => ToSqlOutput::Owned(SqlLiteral::Null),
            SqlValue::Integer(i) => ToSqlOutput::Owned(SqlLiteral::Integer(*i)),
            SqlValue::Real(f) => ToSqlOutput::Owned(SqlLiteral::Real(*f)),
            SqlValue::Text(s) => ToSqlOutput::Borrowed(ValueRef::Text(s.as_bytes())),
            SqlValue::List(_) => {
                let encoded = serde_json::to_string(&self.to_json())
                    .map_err(|e| rusqlite::Error::ToSqlConversionFailure(Box::new(e)))?;
                ToSqlOutput::Owned(SqlLiteral::Text(encoded))
            }
        })
    }
}

pub struct SqliteStore {
    pool: DbPool,
    db_path: PathBuf,
}

impl SqliteStore {
    pub fn open(db_path: &Path, pool_size: u32) -> StoreResult<Self> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| StoreError::Unavailable(e.to_string()))?;
        }

        let manager = SqliteConnectionManager::file(db_path)
            .with_init(|c| init_connection(c, "PRAGMA foreign_keys=ON; PRAGMA busy_timeout=5000;"));
        let pool = Pool::builder().max_size(pool_size.max(1)).build(manager)?;

        let store = Self {
            pool,
            db_path: db_path.to_path_buf(),
        };
        {
            let conn = store.pool.get()?;
            let _: String = conn.query_row("PRAGMA journal_mode=WAL", [], |row| row.get(0))?;
            init_schema(&conn)?;
        }
        info!(path = %db_path.display(), "Relational store opened");
        Ok(store)
    }

    /// Single connection that is never recycled, so the database lives as long as the store
    pub fn in_memory() -> StoreResult<Self> {
        let manager =
            SqliteConnectionManager::memory().with_init(|c| init_connection(c, "PRAGMA foreign_keys=ON;"));
        let pool = Pool::builder()
            .max_size(1)
            .max_lifetime(None)
            .idle_timeout(None)
            .build(manager)?;

        let store = Self {
            pool,
            db_path: PathBuf::from(":memory:"),
        };
        init_schema(&*store.pool.get()?)?;
        Ok(store)
    }

    pub fn path(&self) -> &Path {
        &self.db_path
    }

    /// Run `f` on a pooled connection under `spawn_blocking`.
    ///
    /// Cancelling `cancel` or dropping the returned future interrupts the
    /// running statement; if `f` has not started yet it never starts.
    async fn with_conn<T, F>(&self, cancel: &CancellationToken, f: F) -> StoreResult<T>
    where
        F: FnOnce(&mut Connection) -> StoreResult<T> + Send + 'static,
        T: Send + 'static,
    {
        if cancel.is_cancelled() {
            return Err(StoreError::Cancelled);
        }

        let pool = self.pool.clone();
        let slot: Arc<Mutex<Option<InterruptHandle>>> = Arc::new(Mutex::new(None));
        let stop = cancel.child_token();

        let worker_slot = slot.clone();
        let worker_stop = stop.clone();
        let task = tokio::task::spawn_blocking(move || {
            let mut conn = pool.get()?;
            {
                let mut guard = worker_slot.lock();
                if worker_stop.is_cancelled() {
                    return Err(StoreError::Cancelled);
                }
                *guard = Some(conn.get_interrupt_handle());
            }
            let result = f(&mut conn);
            *worker_slot.lock() = None;
            result
        });

        let mut guard = InterruptGuard {
            slot,
            stop,
            done: false,
        };
        let result = tokio::select! {
            joined = task => match joined {
                Ok(result) => result,
                Err(e) => Err(StoreError::Query(format!("worker failed: {}", e))),
            },
            _ = cancel.cancelled() => Err(StoreError::Cancelled),
        };
        guard.done = !matches!(result, Err(StoreError::Cancelled));
        result
    }

    fn value_ref_to_json(val: ValueRef<'_>) -> Value {
        match val {
            ValueRef::Null => Value::Null,
            ValueRef::Integer(i) => json!(i),
            ValueRef::Real(f) => json!(f),
            ValueRef::Text(t) => json!(String::from_utf8_lossy(t).to_string()),
            ValueRef::Blob(b) => json!(format!("BLOB({} bytes)", b.len())),
        }
    }
}

/// Interrupts the in-flight statement unless the call completed
struct InterruptGuard {
    slot: Arc<Mutex<Option<InterruptHandle>>>,
    stop: CancellationToken,
    done: bool,
}

impl Drop for InterruptGuard {
    fn drop(&mut self) {
        if self.done {
            return;
        }
        let guard = self.slot.lock();
        self.stop.cancel();
        if let Some(handle) = guard.as_ref() {
            debug!("Interrupting in-flight SQLite statement");
            handle.interrupt();
        }
    }
}

fn exists(conn: &Connection, table: &'static str, id: &str) -> rusqlite::Result<bool> {
    let sql = format!("SELECT 1 FROM {} WHERE id = ?1", table);
    Ok(conn
        .prepare_cached(&sql)?
        .query_row([id], |_| Ok(()))
        .optional()?
        .is_some())
}

/// Constraint failures reject the row; anything else fails the chunk
fn record_row(
    result: rusqlite::Result<usize>,
    row: usize,
    id: String,
    report: &mut ChunkReport,
) -> StoreResult<()> {
    match result {
        Ok(_) => {
            report.written += 1;
            Ok(())
        }
        Err(rusqlite::Error::SqliteFailure(e, msg)) if e.code == ErrorCode::ConstraintViolation => {
            let kind = if e.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_FOREIGNKEY {
                RowFailureKind::ReferentialViolation
            } else {
                RowFailureKind::Store
            };
            report.rejected.push(RowFailure {
                row,
                id,
                kind,
                message: msg.unwrap_or_else(|| e.to_string()),
            });
            Ok(())
        }
        Err(e) => Err(e.into()),
    }
}

fn missing(row: usize, id: String, what: &str) -> RowFailure {
    RowFailure {
        row,
        id,
        kind: RowFailureKind::ReferentialViolation,
        message: format!("{} does not exist", what),
    }
}

#[async_trait]
impl FolloweeSource for SqliteStore {
    async fn followees(&self, ids: &[Uuid], cancel: &CancellationToken) -> StoreResult<Vec<Uuid>> {
        let list = SqlValue::List(ids.iter().map(|id| SqlValue::Text(id_str(id))).collect());
        self.with_conn(cancel, move |conn| {
            let mut stmt = conn.prepare_cached(
                "SELECT DISTINCT following_id FROM user_follows
                 WHERE follower_id IN (SELECT value FROM json_each(?1))",
            )?;
            let raw = stmt
                .query_map([&list], |row| row.get::<_, String>(0))?
                .collect::<Result<Vec<_>, _>>()?;
            raw.iter()
                .map(|s| Uuid::parse_str(s).map_err(|e| StoreError::Decode(e.to_string())))
                .collect()
        })
        .await
    }
}

#[async_trait]
impl RelationalStore for SqliteStore {
    fn dialect(&self) -> SqlDialect {
        SqlDialect::Sqlite
    }

    async fn query(&self, statement: &SqlStatement, cancel: &CancellationToken) -> StoreResult<Vec<Row>> {
        let statement = statement.clone();
        self.with_conn(cancel, move |conn| {
            let start = Instant::now();
            let mut stmt = conn.prepare(&statement.sql)?;
            let column_names: Vec<String> =
                stmt.column_names().iter().map(|s| s.to_string()).collect();
            let rows = stmt
                .query_map(rusqlite::params_from_iter(statement.params.iter()), |row| {
                    let mut map = Row::new();
                    for (i, name) in column_names.iter().enumerate() {
                        map.insert(name.clone(), Self::value_ref_to_json(row.get_ref(i)?));
                    }
                    Ok(map)
                })?
                .collect::<Result<Vec<_>, _>>()?;
            debug!(
                rows = rows.len(),
                elapsed_ms = start.elapsed().as_millis() as u64,
                "SQLite query finished"
            );
            Ok(rows)
        })
        .await
    }

    async fn count(&self, statement: &SqlStatement, cancel: &CancellationToken) -> StoreResult<i64> {
        let statement = statement.clone();
        self.with_conn(cancel, move |conn| {
            let total = conn.query_row(
                &statement.sql,
                rusqlite::params_from_iter(statement.params.iter()),
                |row| row.get(0),
            )?;
            Ok(total)
        })
        .await
    }

    async fn stats(&self, cancel: &CancellationToken) -> StoreResult<StoreStats> {
        self.with_conn(cancel, |conn| {
            let count = |table: &str| -> StoreResult<u64> {
                let n: i64 =
                    conn.query_row(&format!("SELECT COUNT(*) FROM {}", table), [], |row| row.get(0))?;
                Ok(n as u64)
            };
            Ok(StoreStats {
                articles: count("articles")?,
                users: count("users")?,
                follows: count("user_follows")?,
                orders: count("orders")?,
            })
        })
        .await
    }
}

#[async_trait]
impl ImportSink for SqliteStore {
    async fn upsert_articles(
        &self,
        rows: &[ArticleRecord],
        cancel: &CancellationToken,
    ) -> StoreResult<ChunkReport> {
        let rows = rows.to_vec();
        self.with_conn(cancel, move |conn| {
            let tx = conn.transaction()?;
            let mut report = ChunkReport::default();
            {
                let mut stmt = tx.prepare_cached(
                    "INSERT INTO articles (id, name, price) VALUES (?1, ?2, ?3)
                     ON CONFLICT(id) DO UPDATE SET name = excluded.name, price = excluded.price",
                )?;
                for (i, a) in rows.iter().enumerate() {
                    let id = id_str(&a.id);
                    let result = stmt.execute(params![id, a.name, a.price]);
                    record_row(result, i, id, &mut report)?;
                }
            }
            tx.commit()?;
            Ok(report)
        })
        .await
    }

    async fn upsert_users(&self, rows: &[UserRecord], cancel: &CancellationToken) -> StoreResult<ChunkReport> {
        let rows = rows.to_vec();
        self.with_conn(cancel, move |conn| {
            let tx = conn.transaction()?;
            let mut report = ChunkReport::default();
            {
                let mut stmt = tx.prepare_cached(
                    "INSERT INTO users (id, name, email) VALUES (?1, ?2, ?3)
                     ON CONFLICT(id) DO UPDATE SET name = excluded.name, email = excluded.email",
                )?;
                for (i, u) in rows.iter().enumerate() {
                    let id = id_str(&u.id);
                    let result = stmt.execute(params![id, u.user_name, u.email]);
                    record_row(result, i, id, &mut report)?;
                }
            }
            tx.commit()?;
            Ok(report)
        })
        .await
    }

    async fn upsert_follows(
        &self,
        rows: &[FollowRecord],
        cancel: &CancellationToken,
    ) -> StoreResult<ChunkReport> {
        let rows = rows.to_vec();
        self.with_conn(cancel, move |conn| {
            let tx = conn.transaction()?;
            let mut report = ChunkReport::default();
            {
                let mut stmt = tx.prepare_cached(
                    "INSERT INTO user_follows (follower_id, following_id) VALUES (?1, ?2)
                     ON CONFLICT(follower_id, following_id) DO NOTHING",
                )?;
                for (i, f) in rows.iter().enumerate() {
                    let follower = id_str(&f.follower_id);
                    let following = id_str(&f.following_id);
                    let key = format!("{}->{}", follower, following);
                    if !exists(&tx, "users", &follower)? {
                        report.rejected.push(missing(i, key, "follower"));
                        continue;
                    }
                    if !exists(&tx, "users", &following)? {
                        report.rejected.push(missing(i, key, "followed user"));
                        continue;
                    }
                    let result = stmt.execute(params![follower, following]);
                    record_row(result, i, key, &mut report)?;
                }
            }
            tx.commit()?;
            Ok(report)
        })
        .await
    }

    async fn upsert_orders(&self, rows: &[OrderRecord], cancel: &CancellationToken) -> StoreResult<ChunkReport> {
        let rows = rows.to_vec();
        self.with_conn(cancel, move |conn| {
            let tx = conn.transaction()?;
            let mut report = ChunkReport::default();
            {
                let mut stmt = tx.prepare_cached(
                    "INSERT INTO orders (id, user_id, article_id, quantity) VALUES (?1, ?2, ?3, ?4)
                     ON CONFLICT(id) DO UPDATE SET user_id = excluded.user_id,
                         article_id = excluded.article_id, quantity = excluded.quantity",
                )?;
                for (i, o) in rows.iter().enumerate() {
                    let id = id_str(&o.id);
                    let user = id_str(&o.user_id);
                    let article = id_str(&o.article_id);
                    if !exists(&tx, "users", &user)? {
                        report.rejected.push(missing(i, id, "user"));
                        continue;
                    }
                    if !exists(&tx, "articles", &article)? {
                        report.rejected.push(missing(i, id, "article"));
                        continue;
                    }
                    let result = stmt.execute(params![id, user, article, o.quantity]);
                    record_row(result, i, id, &mut report)?;
                }
            }
            tx.commit()?;
            Ok(report)
        })
        .await
    }
}
