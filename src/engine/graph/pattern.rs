//! Graph query AST
//!
//! Match pattern, predicate clause and projection are kept apart so the
//! count variant reuses the same match and predicates. Renders to Cypher with
//! every filter value bound as a named parameter.

use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;

use crate::engine::query::catalog::Direction;
use crate::engine::query::{FilterOperator, SortDirection};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Label {
    User,
    Article,
}

impl Label {
    pub fn as_str(&self) -> &'static str {
        match self {
            Label::User => "User",
            Label::Article => "Article",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum RelType {
    Follows,
    Bought,
}

impl RelType {
    pub fn as_str(&self) -> &'static str {
        match self {
            RelType::Follows => "FOLLOWS",
            RelType::Bought => "BOUGHT",
        }
    }
}

/// `*min..max` on a relationship
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct HopRange {
    pub min: u32,
    pub max: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NodePattern {
    pub alias: &'static str,
    pub label: Label,
    /// Parameter holding the node id, when the node is pinned
    pub id_param: Option<&'static str>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RelPattern {
    pub alias: Option<&'static str>,
    pub rel_type: RelType,
    pub hops: Option<HopRange>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MatchPattern {
    pub start: NodePattern,
    pub steps: Vec<(RelPattern, NodePattern)>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum GraphExpr {
    Property { alias: &'static str, key: &'static str },
    /// Number of `rel` edges on the node in `direction`
    Degree {
        alias: &'static str,
        rel: RelType,
        direction: Direction,
    },
    Product(Box<GraphExpr>, Box<GraphExpr>),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Condition {
    pub expr: GraphExpr,
    pub operator: FilterOperator,
    pub param: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum Projection {
    /// Whole node; the normalizer unwraps its property map
    Node(&'static str),
    /// Named scalar columns
    Columns(Vec<(GraphExpr, &'static str)>),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OrderKey {
    pub expr: GraphExpr,
    pub direction: SortDirection,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GraphQuery {
    pub pattern: MatchPattern,
    /// Aliases carried through `WITH DISTINCT`; empty when the match has no expansion
    pub distinct: Vec<&'static str>,
    pub conditions: Vec<Condition>,
    pub projection: Projection,
    pub order_by: Vec<OrderKey>,
    pub skip: i64,
    pub limit: i64,
    /// Primary alias counted by the count variant
    pub count_alias: &'static str,
    pub params: BTreeMap<String, Value>,
}

impl GraphExpr {
    pub fn to_cypher(&self) -> String {
        match self {
            GraphExpr::Property { alias, key } => format!("{}.{}", alias, key),
            GraphExpr::Degree {
                alias,
                rel,
                direction: Direction::Incoming,
            } => format!("COUNT {{ ({})<-[:{}]-(:User) }}", alias, rel.as_str()),
            GraphExpr::Degree {
                alias,
                rel,
                direction: Direction::Outgoing,
            } => format!("COUNT {{ ({})-[:{}]->(:User) }}", alias, rel.as_str()),
            GraphExpr::Product(left, right) => {
                format!("({} * {})", left.to_cypher(), right.to_cypher())
            }
        }
    }
}

impl Condition {
    pub fn to_cypher(&self) -> String {
        let expr = self.expr.to_cypher();
        match self.operator {
            FilterOperator::Like => format!("toLower({}) CONTAINS toLower(${})", expr, self.param),
            FilterOperator::In => format!("{} IN ${}", expr, self.param),
            op => format!("{} {} ${}", expr, op.symbol(), self.param),
        }
    }
}

impl NodePattern {
    fn to_cypher(&self) -> String {
        match self.id_param {
            Some(param) => format!("({}:{} {{id: ${}}})", self.alias, self.label.as_str(), param),
            None => format!("({}:{})", self.alias, self.label.as_str()),
        }
    }
}

impl RelPattern {
    fn to_cypher(&self) -> String {
        let hops = self
            .hops
            .map(|h| format!("*{}..{}", h.min, h.max))
            .unwrap_or_default();
        format!("-[{}:{}{}]->", self.alias.unwrap_or(""), self.rel_type.as_str(), hops)
    }
}

impl MatchPattern {
    pub fn to_cypher(&self) -> String {
        let mut out = format!("MATCH {}", self.start.to_cypher());
        for (rel, node) in &self.steps {
            out.push_str(&rel.to_cypher());
            out.push_str(&node.to_cypher());
        }
        out
    }
}

impl GraphQuery {
    /// MATCH, optional WITH DISTINCT and WHERE; shared by data and count
    fn head(&self) -> String {
        let mut out = self.pattern.to_cypher();
        if !self.distinct.is_empty() {
            out.push_str(&format!(" WITH DISTINCT {}", self.distinct.join(", ")));
        }
        if !self.conditions.is_empty() {
            let preds: Vec<String> = self.conditions.iter().map(Condition::to_cypher).collect();
            out.push_str(&format!(" WHERE {}", preds.join(" AND ")));
        }
        out
    }

    pub fn to_cypher(&self) -> String {
        let projection = match &self.projection {
            Projection::Node(alias) => alias.to_string(),
            Projection::Columns(cols) => cols
                .iter()
                .map(|(expr, name)| format!("{} AS {}", expr.to_cypher(), name))
                .collect::<Vec<_>>()
                .join(", "),
        };
        let order = if self.order_by.is_empty() {
            String::new()
        } else {
            format!(
                " ORDER BY {}",
                self.order_by
                    .iter()
                    .map(|k| format!("{} {}", k.expr.to_cypher(), k.direction.keyword()))
                    .collect::<Vec<_>>()
                    .join(", ")
            )
        };
        format!(
            "{} RETURN {}{} SKIP $skip LIMIT $limit",
            self.head(),
            projection,
            order
        )
    }

    pub fn to_count_cypher(&self) -> String {
        format!("{} RETURN count(DISTINCT {}) AS total", self.head(), self.count_alias)
    }

    /// Column names the projection declares
    pub fn column_names(&self) -> Vec<String> {
        match &self.projection {
            Projection::Node(alias) => vec![alias.to_string()],
            Projection::Columns(cols) => cols.iter().map(|(_, name)| name.to_string()).collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn prop(alias: &'static str, key: &'static str) -> GraphExpr {
        GraphExpr::Property { alias, key }
    }

    #[test]
    fn test_expression_rendering() {
        let incoming = GraphExpr::Degree {
            alias: "u",
            rel: RelType::Follows,
            direction: Direction::Incoming,
        };
        assert_eq!(incoming.to_cypher(), "COUNT { (u)<-[:FOLLOWS]-(:User) }");

        let total = GraphExpr::Product(Box::new(prop("r", "quantity")), Box::new(prop("a", "price")));
        assert_eq!(total.to_cypher(), "(r.quantity * a.price)");
    }

    #[test]
    fn test_condition_rendering() {
        let like = Condition {
            expr: prop("u", "name"),
            operator: FilterOperator::Like,
            param: "p0".into(),
        };
        assert_eq!(like.to_cypher(), "toLower(u.name) CONTAINS toLower($p0)");

        let within = Condition {
            expr: prop("a", "id"),
            operator: FilterOperator::In,
            param: "p1".into(),
        };
        assert_eq!(within.to_cypher(), "a.id IN $p1");
    }

    #[test]
    fn test_pattern_rendering() {
        let pattern = MatchPattern {
            start: NodePattern {
                alias: "anchor",
                label: Label::User,
                id_param: Some("anchorId"),
            },
            steps: vec![
                (
                    RelPattern {
                        alias: None,
                        rel_type: RelType::Follows,
                        hops: Some(HopRange { min: 0, max: 2 }),
                    },
                    NodePattern {
                        alias: "u",
                        label: Label::User,
                        id_param: None,
                    },
                ),
                (
                    RelPattern {
                        alias: Some("r"),
                        rel_type: RelType::Bought,
                        hops: None,
                    },
                    NodePattern {
                        alias: "a",
                        label: Label::Article,
                        id_param: None,
                    },
                ),
            ],
        };
        assert_eq!(
            pattern.to_cypher(),
            "MATCH (anchor:User {id: $anchorId})-[:FOLLOWS*0..2]->(u:User)-[r:BOUGHT]->(a:Article)"
        );
    }
}
