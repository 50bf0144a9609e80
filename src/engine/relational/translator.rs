//! Relational Translator
//!
//! Normalized query -> predicate list, optional reachability membership,
//! sort key and offset/limit, rendered as parameterized SQL.

use std::collections::BTreeSet;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use uuid::Uuid;

use crate::engine::error::StoreResult;
use crate::engine::query::catalog::{self, FieldDescriptor};
use crate::engine::query::{
    EntityKind, FilterOperator, FilterValue, NormalizedQuery, ScalarValue, SortDirection, SortSpec,
};
use crate::engine::reachability::{FolloweeSource, ReachabilityComputer};

use super::dialect::{substring_pattern, SqlDialect};
use super::{SqlStatement, SqlValue};

#[derive(Debug, Clone, PartialEq)]
pub enum Predicate {
    Compare {
        field: &'static FieldDescriptor,
        operator: FilterOperator,
        value: SqlValue,
    },
    Contains {
        field: &'static FieldDescriptor,
        pattern: String,
    },
    InSet {
        field: &'static FieldDescriptor,
        values: Vec<SqlValue>,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct RelationalPlan {
    pub entity: EntityKind,
    pub predicates: Vec<Predicate>,
    /// Ids of users the owning-user column must belong to
    pub membership: Option<Vec<Uuid>>,
    pub sort: SortSpec,
    pub offset: i64,
    pub limit: i64,
}

fn source(entity: EntityKind) -> &'static str {
    match entity {
        EntityKind::Articles => "articles a",
        EntityKind::Users => "users u",
        EntityKind::Orders => "orders o JOIN articles oa ON oa.id = o.article_id",
    }
}

struct Binder {
    dialect: SqlDialect,
    params: Vec<SqlValue>,
}

impl Binder {
    fn bind(&mut self, value: SqlValue) -> usize {
        self.params.push(value);
        self.params.len()
    }
}

impl RelationalPlan {
    /// Build a plan; `reachable` is the materialized scope set, if any
    pub fn build(query: &NormalizedQuery, reachable: Option<&BTreeSet<Uuid>>) -> Self {
        let predicates = query
            .filters
            .iter()
            .map(|f| match (&f.operator, &f.value) {
                (FilterOperator::In, FilterValue::Many(vs)) => Predicate::InSet {
                    field: f.field,
                    values: vs.iter().map(SqlValue::from).collect(),
                },
                (FilterOperator::In, FilterValue::One(v)) => Predicate::InSet {
                    field: f.field,
                    values: vec![SqlValue::from(v)],
                },
                (FilterOperator::Like, value) => Predicate::Contains {
                    field: f.field,
                    pattern: substring_pattern(&like_text(value)),
                },
                (op, FilterValue::One(v)) => Predicate::Compare {
                    field: f.field,
                    operator: *op,
                    value: SqlValue::from(v),
                },
                (op, FilterValue::Many(vs)) => Predicate::Compare {
                    field: f.field,
                    operator: *op,
                    value: vs.first().map(SqlValue::from).unwrap_or(SqlValue::Null),
                },
            })
            .collect();

        Self {
            entity: query.entity,
            predicates,
            membership: reachable.map(|set| set.iter().copied().collect()),
            sort: query.sort,
            offset: query.skip(),
            limit: query.take(),
        }
    }

    fn where_clause(&self, binder: &mut Binder) -> String {
        let mut parts = Vec::new();
        for predicate in &self.predicates {
            let part = match predicate {
                Predicate::Compare { field, operator, value } => {
                    let n = binder.bind(value.clone());
                    format!(
                        "{} {} {}",
                        field.column,
                        operator.symbol(),
                        binder.dialect.placeholder(n)
                    )
                }
                Predicate::Contains { field, pattern } => {
                    let n = binder.bind(SqlValue::Text(pattern.clone()));
                    binder.dialect.contains_ci(field.column, n)
                }
                Predicate::InSet { field, values } => {
                    let n = binder.bind(SqlValue::List(values.clone()));
                    binder.dialect.in_set(field.column, n)
                }
            };
            parts.push(part);
        }

        if let Some(ids) = &self.membership {
            let list = ids
                .iter()
                .map(|id| SqlValue::Text(id.hyphenated().to_string()))
                .collect();
            let n = binder.bind(SqlValue::List(list));
            let part = match self.entity {
                EntityKind::Users => binder.dialect.in_set("u.id", n),
                EntityKind::Orders => binder.dialect.in_set("o.user_id", n),
                EntityKind::Articles => format!(
                    "EXISTS (SELECT 1 FROM orders so WHERE so.article_id = a.id AND {})",
                    binder.dialect.in_set("so.user_id", n)
                ),
            };
            parts.push(part);
        }

        if parts.is_empty() {
            String::new()
        } else {
            format!(" WHERE {}", parts.join(" AND "))
        }
    }

    fn order_clause(&self) -> String {
        let id = catalog::id_field(self.entity);
        let primary = format!("{} {}", self.sort.field.column, self.sort.direction.keyword());
        if std::ptr::eq(self.sort.field, id) {
            format!(" ORDER BY {}", primary)
        } else {
            format!(
                " ORDER BY {}, {} {}",
                primary,
                id.column,
                SortDirection::Ascending.keyword()
            )
        }
    }

    /// Data statement: projection, filters, order, then pagination
    pub fn render(&self, dialect: SqlDialect) -> SqlStatement {
        let mut binder = Binder {
            dialect,
            params: Vec::new(),
        };
        let projection = catalog::fields(self.entity)
            .iter()
            .map(|f| format!("{} AS {}", f.column, f.sql_name))
            .collect::<Vec<_>>()
            .join(", ");
        let where_clause = self.where_clause(&mut binder);
        let order_clause = self.order_clause();
        let limit = binder.bind(SqlValue::Integer(self.limit));
        let offset = binder.bind(SqlValue::Integer(self.offset));

        SqlStatement {
            sql: format!(
                "SELECT {} FROM {}{}{} LIMIT {} OFFSET {}",
                projection,
                source(self.entity),
                where_clause,
                order_clause,
                dialect.placeholder(limit),
                dialect.placeholder(offset)
            ),
            params: binder.params,
        }
    }

    /// Count statement over the filtered but unpaginated plan
    pub fn render_count(&self, dialect: SqlDialect) -> SqlStatement {
        let mut binder = Binder {
            dialect,
            params: Vec::new(),
        };
        let where_clause = self.where_clause(&mut binder);
        SqlStatement {
            sql: format!("SELECT COUNT(*) FROM {}{}", source(self.entity), where_clause),
            params: binder.params,
        }
    }
}

fn like_text(value: &FilterValue) -> String {
    match value {
        FilterValue::One(ScalarValue::Text(s)) => s.clone(),
        FilterValue::One(other) => other.to_json().to_string(),
        FilterValue::Many(vs) => vs
            .first()
            .map(|v| match v {
                ScalarValue::Text(s) => s.clone(),
                other => other.to_json().to_string(),
            })
            .unwrap_or_default(),
    }
}

/// Builds relational plans, resolving scope through the reachability computer
pub struct RelationalTranslator;

impl RelationalTranslator {
    pub async fn plan<S: FolloweeSource + ?Sized>(
        query: &NormalizedQuery,
        followees: &S,
        cancel: &CancellationToken,
    ) -> StoreResult<RelationalPlan> {
        let reachable = match query.scope {
            Some(scope) => Some(
                ReachabilityComputer::new(followees)
                    .reachable(scope.anchor, scope.hops, cancel)
                    .await?,
            ),
            None => None,
        };
        let plan = RelationalPlan::build(query, reachable.as_ref());
        debug!(
            entity = %plan.entity,
            predicates = plan.predicates.len(),
            scoped = plan.membership.is_some(),
            "Relational plan built"
        );
        Ok(plan)
    }
}
