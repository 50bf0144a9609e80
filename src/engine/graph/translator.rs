//! Graph Translator
//!
//! Normalized query -> `GraphQuery`. Scope is expressed natively as a
//! bounded variable-length FOLLOWS expansion from the anchor instead of a
//! materialized reachability set.

use serde_json::Value;
use std::collections::BTreeMap;
use tracing::debug;

use crate::engine::query::catalog::{self, FieldDescriptor, GraphField};
use crate::engine::query::{EntityKind, NormalizedQuery, SortDirection};

use super::pattern::{
    Condition, GraphExpr, GraphQuery, HopRange, Label, MatchPattern, NodePattern, OrderKey,
    Projection, RelPattern, RelType,
};

pub const ANCHOR_PARAM: &str = "anchorId";

fn node(alias: &'static str, label: Label) -> NodePattern {
    NodePattern {
        alias,
        label,
        id_param: None,
    }
}

fn bought() -> RelPattern {
    RelPattern {
        alias: Some("r"),
        rel_type: RelType::Bought,
        hops: None,
    }
}

pub fn field_expr(field: &FieldDescriptor) -> GraphExpr {
    match field.graph {
        GraphField::Property { alias, key } => GraphExpr::Property { alias, key },
        GraphField::Degree { alias, direction } => GraphExpr::Degree {
            alias,
            rel: RelType::Follows,
            direction,
        },
        GraphField::Product { left, right } => GraphExpr::Product(
            Box::new(GraphExpr::Property {
                alias: left.0,
                key: left.1,
            }),
            Box::new(GraphExpr::Property {
                alias: right.0,
                key: right.1,
            }),
        ),
    }
}

pub struct GraphTranslator;

impl GraphTranslator {
    pub fn translate(query: &NormalizedQuery) -> GraphQuery {
        let mut params = BTreeMap::new();

        let pattern = match query.scope {
            Some(scope) => {
                params.insert(
                    ANCHOR_PARAM.to_string(),
                    Value::String(scope.anchor.hyphenated().to_string()),
                );
                let mut steps = vec![(
                    RelPattern {
                        alias: None,
                        rel_type: RelType::Follows,
                        // lower bound 0 keeps the anchor itself in scope
                        hops: Some(HopRange {
                            min: 0,
                            max: scope.hops,
                        }),
                    },
                    node("u", Label::User),
                )];
                if query.entity != EntityKind::Users {
                    steps.push((bought(), node("a", Label::Article)));
                }
                MatchPattern {
                    start: NodePattern {
                        alias: "anchor",
                        label: Label::User,
                        id_param: Some(ANCHOR_PARAM),
                    },
                    steps,
                }
            }
            None => match query.entity {
                EntityKind::Users => MatchPattern {
                    start: node("u", Label::User),
                    steps: vec![],
                },
                EntityKind::Articles => MatchPattern {
                    start: node("a", Label::Article),
                    steps: vec![],
                },
                EntityKind::Orders => MatchPattern {
                    start: node("u", Label::User),
                    steps: vec![(bought(), node("a", Label::Article))],
                },
            },
        };

        let distinct = if query.scope.is_some() {
            match query.entity {
                EntityKind::Users => vec!["u"],
                EntityKind::Articles => vec!["a"],
                EntityKind::Orders => vec!["u", "r", "a"],
            }
        } else {
            vec![]
        };

        let conditions = query
            .filters
            .iter()
            .enumerate()
            .map(|(i, f)| {
                let param = format!("p{}", i);
                params.insert(param.clone(), f.value.to_json());
                Condition {
                    expr: field_expr(f.field),
                    operator: f.operator,
                    param,
                }
            })
            .collect();

        let projection = match query.entity {
            EntityKind::Articles => Projection::Node("a"),
            entity => Projection::Columns(
                catalog::fields(entity)
                    .iter()
                    .map(|f| (field_expr(f), f.output))
                    .collect(),
            ),
        };

        let id = catalog::id_field(query.entity);
        let mut order_by = vec![OrderKey {
            expr: field_expr(query.sort.field),
            direction: query.sort.direction,
        }];
        if !std::ptr::eq(query.sort.field, id) {
            order_by.push(OrderKey {
                expr: field_expr(id),
                direction: SortDirection::Ascending,
            });
        }

        params.insert("skip".to_string(), Value::from(query.skip()));
        params.insert("limit".to_string(), Value::from(query.take()));

        let count_alias = match query.entity {
            EntityKind::Users => "u",
            EntityKind::Articles => "a",
            EntityKind::Orders => "r",
        };

        let graph_query = GraphQuery {
            pattern,
            distinct,
            conditions,
            projection,
            order_by,
            skip: query.skip(),
            limit: query.take(),
            count_alias,
            params,
        };
        debug!(cypher = %graph_query.to_cypher(), "Graph query built");
        graph_query
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::query::{FilterOperator, QueryLimits, QueryRequest};
    use serde_json::json;
    use uuid::Uuid;

    fn translate(req: QueryRequest) -> GraphQuery {
        GraphTranslator::translate(&req.normalize(&QueryLimits::default()).unwrap())
    }

    #[test]
    fn test_unscoped_users() {
        let q = translate(QueryRequest::new(EntityKind::Users));
        assert_eq!(
            q.to_cypher(),
            "MATCH (u:User) RETURN u.id AS id, u.name AS userName, u.email AS email, \
             COUNT { (u)<-[:FOLLOWS]-(:User) } AS followersCount, \
             COUNT { (u)-[:FOLLOWS]->(:User) } AS followingCount \
             ORDER BY u.id DESC SKIP $skip LIMIT $limit"
        );
        assert_eq!(q.to_count_cypher(), "MATCH (u:User) RETURN count(DISTINCT u) AS total");
        assert_eq!(q.params["limit"], json!(20));
    }

    #[test]
    fn test_scoped_orders_with_filters() {
        let anchor = Uuid::new_v4();
        let q = translate(
            QueryRequest::new(EntityKind::Orders)
                .scoped(anchor, 2)
                .filter("Quantity", FilterOperator::GreaterThan, 1)
                .filter("TotalPrice", FilterOperator::LessThanOrEqual, 50)
                .order_by("TotalPrice", SortDirection::Ascending),
        );
        assert_eq!(
            q.to_count_cypher(),
            "MATCH (anchor:User {id: $anchorId})-[:FOLLOWS*0..2]->(u:User)-[r:BOUGHT]->(a:Article) \
             WITH DISTINCT u, r, a WHERE r.quantity > $p0 AND (r.quantity * a.price) <= $p1 \
             RETURN count(DISTINCT r) AS total"
        );
        assert!(q
            .to_cypher()
            .ends_with("ORDER BY (r.quantity * a.price) ASC, r.id ASC SKIP $skip LIMIT $limit"));
        assert_eq!(q.params[ANCHOR_PARAM], json!(anchor.hyphenated().to_string()));
        assert_eq!(q.params["p0"], json!(1));
        assert_eq!(q.params["p1"], json!(50.0));
    }

    #[test]
    fn test_articles_project_whole_node() {
        let q = translate(QueryRequest::new(EntityKind::Articles).filter(
            "Name",
            FilterOperator::Like,
            "x' OR 1=1",
        ));
        assert_eq!(q.projection, Projection::Node("a"));
        assert_eq!(q.count_alias, "a");
        assert!(!q.to_cypher().contains("OR 1=1"));
        assert_eq!(q.params["p0"], json!("x' OR 1=1"));
    }

    #[test]
    fn test_scoped_articles_distinct_on_article() {
        let q = translate(QueryRequest::new(EntityKind::Articles).scoped(Uuid::new_v4(), 1));
        assert_eq!(q.distinct, vec!["a"]);
        assert_eq!(q.pattern.steps.len(), 2);
    }
}
