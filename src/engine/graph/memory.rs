//! Embedded property graph
//!
//! `User` and `Article` nodes, a `FOLLOWS` edge set and `BOUGHT` edges keyed
//! by order id. Executes `GraphQuery` ASTs directly: match with bounded
//! expansion, `WITH DISTINCT`, predicates, ordering, skip/limit, projection.

use async_trait::async_trait;
use parking_lot::RwLock;
use serde_json::{json, Map, Value};
use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use uuid::Uuid;

use crate::engine::error::{RowFailureKind, StoreError, StoreResult};
use crate::engine::import::{ChunkReport, ImportSink, RowFailure};
use crate::engine::model::{
    id_str, ArticleRecord, FollowRecord, OrderRecord, SetupBatch, StoreStats, UserRecord,
};
use crate::engine::query::catalog::Direction;
use crate::engine::query::{FilterOperator, SortDirection};

use super::pattern::{GraphExpr, GraphQuery, HopRange, Label, Projection, RelType};
use super::{GraphRow, GraphStore, GraphValue};

#[derive(Debug, Clone)]
struct UserNode {
    name: String,
    email: String,
}

#[derive(Debug, Clone)]
struct ArticleNode {
    name: String,
    price: f64,
}

#[derive(Debug, Clone)]
struct BoughtEdge {
    user: Uuid,
    article: Uuid,
    quantity: i64,
}

#[derive(Debug, Default)]
struct GraphData {
    users: BTreeMap<Uuid, UserNode>,
    articles: BTreeMap<Uuid, ArticleNode>,
    follows_out: BTreeMap<Uuid, BTreeSet<Uuid>>,
    follows_in: BTreeMap<Uuid, BTreeSet<Uuid>>,
    bought: BTreeMap<Uuid, BoughtEdge>,
    bought_out: BTreeMap<Uuid, BTreeSet<Uuid>>,
}

/// What a pattern alias is bound to
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum Bound {
    User(Uuid),
    Article(Uuid),
    Bought(Uuid),
}

type Binding = BTreeMap<&'static str, Bound>;

fn as_f64(value: &Value) -> Option<f64> {
    value.as_f64()
}

fn compare(left: &Value, right: &Value) -> Option<Ordering> {
    match (left, right) {
        (Value::Number(_), Value::Number(_)) => as_f64(left)?.partial_cmp(&as_f64(right)?),
        (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
        _ => None,
    }
}

fn equal(left: &Value, right: &Value) -> bool {
    match compare(left, right) {
        Some(ord) => ord == Ordering::Equal,
        None => left == right,
    }
}

fn matches(value: &Value, operator: FilterOperator, param: &Value) -> bool {
    match operator {
        FilterOperator::Equals => equal(value, param),
        FilterOperator::GreaterThan => compare(value, param) == Some(Ordering::Greater),
        FilterOperator::LessThan => compare(value, param) == Some(Ordering::Less),
        FilterOperator::GreaterThanOrEqual => {
            matches!(compare(value, param), Some(Ordering::Greater | Ordering::Equal))
        }
        FilterOperator::LessThanOrEqual => {
            matches!(compare(value, param), Some(Ordering::Less | Ordering::Equal))
        }
        FilterOperator::Like => match (value.as_str(), param.as_str()) {
            (Some(v), Some(p)) => v.to_lowercase().contains(&p.to_lowercase()),
            _ => false,
        },
        FilterOperator::In => match param {
            Value::Array(items) => items.iter().any(|item| equal(value, item)),
            single => equal(value, single),
        },
    }
}

impl GraphData {
    fn node_props(&self, bound: Bound) -> Map<String, Value> {
        let value = match bound {
            Bound::User(id) => self
                .users
                .get(&id)
                .map(|u| json!({ "id": id_str(&id), "name": u.name, "email": u.email })),
            Bound::Article(id) => self
                .articles
                .get(&id)
                .map(|a| json!({ "id": id_str(&id), "name": a.name, "price": a.price })),
            Bound::Bought(id) => self
                .bought
                .get(&id)
                .map(|b| json!({ "id": id_str(&id), "quantity": b.quantity })),
        };
        match value {
            Some(Value::Object(map)) => map,
            _ => Map::new(),
        }
    }

    fn degree(&self, bound: Bound, rel: RelType, direction: Direction) -> usize {
        match (bound, rel, direction) {
            (Bound::User(id), RelType::Follows, Direction::Incoming) => {
                self.follows_in.get(&id).map_or(0, BTreeSet::len)
            }
            (Bound::User(id), RelType::Follows, Direction::Outgoing) => {
                self.follows_out.get(&id).map_or(0, BTreeSet::len)
            }
            (Bound::User(id), RelType::Bought, Direction::Outgoing) => {
                self.bought_out.get(&id).map_or(0, BTreeSet::len)
            }
            (Bound::Article(id), RelType::Bought, Direction::Incoming) => {
                self.bought.values().filter(|b| b.article == id).count()
            }
            _ => 0,
        }
    }

    fn eval(&self, expr: &GraphExpr, binding: &Binding) -> Value {
        match expr {
            GraphExpr::Property { alias, key } => binding
                .get(alias)
                .and_then(|b| self.node_props(*b).remove(*key))
                .unwrap_or(Value::Null),
            GraphExpr::Degree {
                alias,
                rel,
                direction,
            } => binding
                .get(alias)
                .map(|b| Value::from(self.degree(*b, *rel, *direction) as i64))
                .unwrap_or(Value::Null),
            GraphExpr::Product(left, right) => {
                match (as_f64(&self.eval(left, binding)), as_f64(&self.eval(right, binding))) {
                    (Some(l), Some(r)) => json!(l * r),
                    _ => Value::Null,
                }
            }
        }
    }

    /// Users reachable by walks whose length lies within `range`
    fn expand_follows(&self, from: Uuid, range: HopRange) -> BTreeSet<Uuid> {
        let mut out = BTreeSet::new();
        if range.min == 0 {
            out.insert(from);
        }
        let mut level = BTreeSet::from([from]);
        for depth in 1..=range.max {
            level = level
                .iter()
                .filter_map(|id| self.follows_out.get(id))
                .flatten()
                .copied()
                .collect();
            if level.is_empty() {
                break;
            }
            if depth >= range.min {
                out.extend(level.iter().copied());
            }
        }
        out
    }

    fn param_uuid(query: &GraphQuery, name: &str) -> StoreResult<Uuid> {
        let raw = query
            .params
            .get(name)
            .and_then(Value::as_str)
            .ok_or_else(|| StoreError::Query(format!("missing parameter ${}", name)))?;
        Uuid::parse_str(raw).map_err(|e| StoreError::Query(e.to_string()))
    }

    fn label_nodes(&self, label: Label, pinned: Option<Uuid>) -> Vec<Bound> {
        match (label, pinned) {
            (Label::User, Some(id)) => self
                .users
                .contains_key(&id)
                .then_some(Bound::User(id))
                .into_iter()
                .collect(),
            (Label::User, None) => self.users.keys().copied().map(Bound::User).collect(),
            (Label::Article, Some(id)) => self
                .articles
                .contains_key(&id)
                .then_some(Bound::Article(id))
                .into_iter()
                .collect(),
            (Label::Article, None) => self.articles.keys().copied().map(Bound::Article).collect(),
        }
    }

    /// MATCH plus WITH DISTINCT plus WHERE
    fn bindings(&self, query: &GraphQuery, cancel: &CancellationToken) -> StoreResult<Vec<Binding>> {
        let start = &query.pattern.start;
        let pinned = start
            .id_param
            .map(|p| Self::param_uuid(query, p))
            .transpose()?;
        let mut rows: Vec<Binding> = self
            .label_nodes(start.label, pinned)
            .into_iter()
            .map(|b| Binding::from([(start.alias, b)]))
            .collect();
        let mut current = start.alias;

        for (rel, node) in &query.pattern.steps {
            if cancel.is_cancelled() {
                return Err(StoreError::Cancelled);
            }
            let pinned = node
                .id_param
                .map(|p| Self::param_uuid(query, p))
                .transpose()?;
            let mut next = Vec::new();
            for binding in rows {
                let Some(Bound::User(from)) = binding.get(current).copied() else {
                    continue;
                };
                let targets: Vec<(Option<Bound>, Bound)> = match (rel.rel_type, rel.hops) {
                    (RelType::Follows, Some(range)) => self
                        .expand_follows(from, range)
                        .into_iter()
                        .map(|id| (None, Bound::User(id)))
                        .collect(),
                    (RelType::Follows, None) => self
                        .follows_out
                        .get(&from)
                        .into_iter()
                        .flatten()
                        .map(|id| (None, Bound::User(*id)))
                        .collect(),
                    (RelType::Bought, _) => self
                        .bought_out
                        .get(&from)
                        .into_iter()
                        .flatten()
                        .filter_map(|oid| {
                            self.bought
                                .get(oid)
                                .map(|b| (Some(Bound::Bought(*oid)), Bound::Article(b.article)))
                        })
                        .collect(),
                };
                for (edge, target) in targets {
                    let label_ok = matches!(
                        (node.label, target),
                        (Label::User, Bound::User(_)) | (Label::Article, Bound::Article(_))
                    );
                    let pin_ok = match (pinned, target) {
                        (Some(p), Bound::User(id) | Bound::Article(id)) => p == id,
                        _ => true,
                    };
                    if !label_ok || !pin_ok {
                        continue;
                    }
                    let mut extended = binding.clone();
                    if let (Some(alias), Some(edge)) = (rel.alias, edge) {
                        extended.insert(alias, edge);
                    }
                    extended.insert(node.alias, target);
                    next.push(extended);
                }
            }
            rows = next;
            current = node.alias;
        }

        if !query.distinct.is_empty() {
            let mut seen = BTreeSet::new();
            rows = rows
                .into_iter()
                .map(|b| {
                    b.into_iter()
                        .filter(|(alias, _)| query.distinct.contains(alias))
                        .collect::<Binding>()
                })
                .filter(|b| seen.insert(b.clone()))
                .collect();
        }

        if cancel.is_cancelled() {
            return Err(StoreError::Cancelled);
        }

        let mut filtered = Vec::with_capacity(rows.len());
        for binding in rows {
            let mut keep = true;
            for condition in &query.conditions {
                let param = query.params.get(&condition.param).ok_or_else(|| {
                    StoreError::Query(format!("missing parameter ${}", condition.param))
                })?;
                if !matches(&self.eval(&condition.expr, &binding), condition.operator, param) {
                    keep = false;
                    break;
                }
            }
            if keep {
                filtered.push(binding);
            }
        }
        Ok(filtered)
    }

    fn run(&self, query: &GraphQuery, cancel: &CancellationToken) -> StoreResult<Vec<GraphRow>> {
        let bindings = self.bindings(query, cancel)?;

        let mut keyed: Vec<(Vec<Value>, Binding)> = bindings
            .into_iter()
            .map(|b| {
                let keys = query.order_by.iter().map(|k| self.eval(&k.expr, &b)).collect();
                (keys, b)
            })
            .collect();
        keyed.sort_by(|(a, _), (b, _)| {
            for (i, key) in query.order_by.iter().enumerate() {
                let ord = compare(&a[i], &b[i]).unwrap_or(Ordering::Equal);
                let ord = match key.direction {
                    SortDirection::Ascending => ord,
                    SortDirection::Descending => ord.reverse(),
                };
                if ord != Ordering::Equal {
                    return ord;
                }
            }
            Ordering::Equal
        });

        let columns = query.column_names();
        let rows = keyed
            .into_iter()
            .skip(query.skip.max(0) as usize)
            .take(query.limit.max(0) as usize)
            .map(|(_, binding)| {
                let values = match &query.projection {
                    Projection::Node(alias) => vec![binding
                        .get(alias)
                        .map(|b| GraphValue::Node(self.node_props(*b)))
                        .unwrap_or(GraphValue::Scalar(Value::Null))],
                    Projection::Columns(cols) => cols
                        .iter()
                        .map(|(expr, _)| GraphValue::Scalar(self.eval(expr, &binding)))
                        .collect(),
                };
                GraphRow {
                    columns: columns.clone(),
                    values,
                }
            })
            .collect();
        Ok(rows)
    }

    fn count(&self, query: &GraphQuery, cancel: &CancellationToken) -> StoreResult<i64> {
        let distinct: BTreeSet<Bound> = self
            .bindings(query, cancel)?
            .iter()
            .filter_map(|b| b.get(query.count_alias).copied())
            .collect();
        Ok(distinct.len() as i64)
    }

    fn merge_article(&mut self, a: &ArticleRecord) {
        self.articles.insert(
            a.id,
            ArticleNode {
                name: a.name.clone(),
                price: a.price,
            },
        );
    }

    fn merge_user(&mut self, u: &UserRecord) {
        self.users.insert(
            u.id,
            UserNode {
                name: u.user_name.clone(),
                email: u.email.clone(),
            },
        );
    }

    fn merge_follow(&mut self, f: &FollowRecord) -> Result<(), &'static str> {
        if !self.users.contains_key(&f.follower_id) {
            return Err("follower does not exist");
        }
        if !self.users.contains_key(&f.following_id) {
            return Err("followed user does not exist");
        }
        self.follows_out
            .entry(f.follower_id)
            .or_default()
            .insert(f.following_id);
        self.follows_in
            .entry(f.following_id)
            .or_default()
            .insert(f.follower_id);
        Ok(())
    }

    fn merge_order(&mut self, o: &OrderRecord) -> Result<(), &'static str> {
        if !self.users.contains_key(&o.user_id) {
            return Err("user does not exist");
        }
        if !self.articles.contains_key(&o.article_id) {
            return Err("article does not exist");
        }
        if let Some(previous) = self.bought.get(&o.id) {
            if let Some(set) = self.bought_out.get_mut(&previous.user) {
                set.remove(&o.id);
            }
        }
        self.bought.insert(
            o.id,
            BoughtEdge {
                user: o.user_id,
                article: o.article_id,
                quantity: o.quantity,
            },
        );
        self.bought_out.entry(o.user_id).or_default().insert(o.id);
        Ok(())
    }

    fn snapshot(&self) -> SetupBatch {
        SetupBatch {
            articles: self
                .articles
                .iter()
                .map(|(id, a)| ArticleRecord {
                    id: *id,
                    name: a.name.clone(),
                    price: a.price,
                })
                .collect(),
            users: self
                .users
                .iter()
                .map(|(id, u)| UserRecord {
                    id: *id,
                    user_name: u.name.clone(),
                    email: u.email.clone(),
                })
                .collect(),
            follows: self
                .follows_out
                .iter()
                .flat_map(|(from, tos)| {
                    tos.iter().map(move |to| FollowRecord {
                        follower_id: *from,
                        following_id: *to,
                    })
                })
                .collect(),
            orders: self
                .bought
                .iter()
                .map(|(id, b)| OrderRecord {
                    id: *id,
                    user_id: b.user,
                    article_id: b.article,
                    quantity: b.quantity,
                })
                .collect(),
        }
    }

    fn stats(&self) -> StoreStats {
        StoreStats {
            articles: self.articles.len() as u64,
            users: self.users.len() as u64,
            follows: self.follows_out.values().map(|s| s.len() as u64).sum(),
            orders: self.bought.len() as u64,
        }
    }
}

pub struct MemoryGraph {
    data: Arc<RwLock<GraphData>>,
    snapshot_path: Option<PathBuf>,
}

impl Default for MemoryGraph {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryGraph {
    pub fn new() -> Self {
        Self {
            data: Arc::new(RwLock::new(GraphData::default())),
            snapshot_path: None,
        }
    }

    /// Open with JSON snapshot persistence; a missing file starts empty
    pub fn with_snapshot(path: &Path) -> StoreResult<Self> {
        let mut data = GraphData::default();
        if path.exists() {
            let raw = std::fs::read_to_string(path).map_err(|e| StoreError::Unavailable(e.to_string()))?;
            let batch: SetupBatch =
                serde_json::from_str(&raw).map_err(|e| StoreError::Decode(e.to_string()))?;
            batch.articles.iter().for_each(|a| data.merge_article(a));
            batch.users.iter().for_each(|u| data.merge_user(u));
            for f in &batch.follows {
                data.merge_follow(f).map_err(|e| StoreError::Decode(e.to_string()))?;
            }
            for o in &batch.orders {
                data.merge_order(o).map_err(|e| StoreError::Decode(e.to_string()))?;
            }
            info!(path = %path.display(), "Graph snapshot loaded");
        }
        Ok(Self {
            data: Arc::new(RwLock::new(data)),
            snapshot_path: Some(path.to_path_buf()),
        })
    }

    /// Run `f` against the graph under `spawn_blocking`.
    ///
    /// Cancelling `cancel` or dropping the returned future stops pattern
    /// evaluation at its next checkpoint; if `f` has not started it never starts.
    async fn with_data<T, F>(&self, cancel: &CancellationToken, f: F) -> StoreResult<T>
    where
        F: FnOnce(&RwLock<GraphData>, &CancellationToken) -> StoreResult<T> + Send + 'static,
        T: Send + 'static,
    {
        if cancel.is_cancelled() {
            return Err(StoreError::Cancelled);
        }

        let data = Arc::clone(&self.data);
        let stop = cancel.child_token();
        let _guard = stop.clone().drop_guard();
        let task = tokio::task::spawn_blocking(move || {
            if stop.is_cancelled() {
                return Err(StoreError::Cancelled);
            }
            f(&data, &stop)
        });

        tokio::select! {
            joined = task => match joined {
                Ok(result) => result,
                Err(e) => Err(StoreError::Query(format!("worker failed: {}", e))),
            },
            _ = cancel.cancelled() => Err(StoreError::Cancelled),
        }
    }

    async fn merge_all<T, F>(
        &self,
        rows: &[T],
        cancel: &CancellationToken,
        id: fn(&T) -> String,
        merge: F,
    ) -> StoreResult<ChunkReport>
    where
        T: Clone + Send + Sync + 'static,
        F: Fn(&mut GraphData, &T) -> Result<(), &'static str> + Send + 'static,
    {
        let rows = rows.to_vec();
        self.with_data(cancel, move |data, _| {
            let mut data = data.write();
            let mut report = ChunkReport::default();
            for (i, row) in rows.iter().enumerate() {
                match merge(&mut data, row) {
                    Ok(()) => report.written += 1,
                    Err(message) => report.rejected.push(RowFailure {
                        row: i,
                        id: id(row),
                        kind: RowFailureKind::ReferentialViolation,
                        message: message.to_string(),
                    }),
                }
            }
            Ok(report)
        })
        .await
    }
}

#[async_trait]
impl ImportSink for MemoryGraph {
    async fn upsert_articles(
        &self,
        rows: &[ArticleRecord],
        cancel: &CancellationToken,
    ) -> StoreResult<ChunkReport> {
        self.merge_all(rows, cancel, |a| id_str(&a.id), |data, a| {
            data.merge_article(a);
            Ok(())
        })
        .await
    }

    async fn upsert_users(&self, rows: &[UserRecord], cancel: &CancellationToken) -> StoreResult<ChunkReport> {
        self.merge_all(rows, cancel, |u| id_str(&u.id), |data, u| {
            data.merge_user(u);
            Ok(())
        })
        .await
    }

    async fn upsert_follows(
        &self,
        rows: &[FollowRecord],
        cancel: &CancellationToken,
    ) -> StoreResult<ChunkReport> {
        self.merge_all(
            rows,
            cancel,
            |f| format!("{}->{}", id_str(&f.follower_id), id_str(&f.following_id)),
            GraphData::merge_follow,
        )
        .await
    }

    async fn upsert_orders(&self, rows: &[OrderRecord], cancel: &CancellationToken) -> StoreResult<ChunkReport> {
        self.merge_all(rows, cancel, |o| id_str(&o.id), GraphData::merge_order)
            .await
    }
}

#[async_trait]
impl GraphStore for MemoryGraph {
    async fn run(&self, query: &GraphQuery, cancel: &CancellationToken) -> StoreResult<Vec<GraphRow>> {
        let query = query.clone();
        let rows = self
            .with_data(cancel, move |data, stop| data.read().run(&query, stop))
            .await?;
        debug!(rows = rows.len(), "Graph pattern executed");
        Ok(rows)
    }

    async fn count(&self, query: &GraphQuery, cancel: &CancellationToken) -> StoreResult<i64> {
        let query = query.clone();
        self.with_data(cancel, move |data, stop| data.read().count(&query, stop))
            .await
    }

    async fn stats(&self, cancel: &CancellationToken) -> StoreResult<StoreStats> {
        self.with_data(cancel, |data, _| Ok(data.read().stats())).await
    }

    async fn flush(&self) -> StoreResult<()> {
        let Some(path) = self.snapshot_path.clone() else {
            return Ok(());
        };
        self.with_data(&CancellationToken::new(), move |data, _| {
            let snapshot = data.read().snapshot();
            let encoded =
                serde_json::to_vec_pretty(&snapshot).map_err(|e| StoreError::Decode(e.to_string()))?;
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent).map_err(|e| StoreError::Unavailable(e.to_string()))?;
            }
            let tmp = path.with_extension("json.tmp");
            std::fs::write(&tmp, encoded).map_err(|e| StoreError::Unavailable(e.to_string()))?;
            std::fs::rename(&tmp, &path).map_err(|e| StoreError::Unavailable(e.to_string()))?;
            debug!(path = %path.display(), "Graph snapshot written");
            Ok(())
        })
        .await
    }
}
