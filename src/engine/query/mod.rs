//! Engine-agnostic query model
//!
//! One request shape (entity, filters, sort, scope, page) shared by the
//! relational and the graph translator.

pub mod catalog;
pub mod page;
pub mod request;

use serde::{Deserialize, Serialize};
use std::fmt;

pub use catalog::{FieldDescriptor, GraphField, ValueType};
pub use page::PaginatedResult;
pub use request::{
    FieldKey, FilterSpec, FilterValue, NormalizedQuery, QueryLimits, QueryRequest,
    ResolvedFilter, ScalarValue, Scope, SortSpec,
};

/// The three first-class entity kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EntityKind {
    #[serde(alias = "Article", alias = "articles", alias = "article")]
    Articles,
    #[serde(alias = "User", alias = "users", alias = "user")]
    Users,
    #[serde(alias = "Order", alias = "orders", alias = "order")]
    Orders,
}

impl EntityKind {
    pub const ALL: [EntityKind; 3] = [EntityKind::Articles, EntityKind::Users, EntityKind::Orders];

    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::Articles => "Articles",
            EntityKind::Users => "Users",
            EntityKind::Orders => "Orders",
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Filter operator. Accepts the name or the ordinal on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "request::EnumRepr")]
pub enum FilterOperator {
    Equals,
    GreaterThan,
    LessThan,
    GreaterThanOrEqual,
    LessThanOrEqual,
    Like,
    In,
}

impl FilterOperator {
    pub const ALL: [FilterOperator; 7] = [
        FilterOperator::Equals,
        FilterOperator::GreaterThan,
        FilterOperator::LessThan,
        FilterOperator::GreaterThanOrEqual,
        FilterOperator::LessThanOrEqual,
        FilterOperator::Like,
        FilterOperator::In,
    ];

    pub fn is_comparison(&self) -> bool {
        matches!(
            self,
            FilterOperator::GreaterThan
                | FilterOperator::LessThan
                | FilterOperator::GreaterThanOrEqual
                | FilterOperator::LessThanOrEqual
        )
    }

    /// Symbol shared by SQL and Cypher for the scalar comparisons
    pub fn symbol(&self) -> &'static str {
        match self {
            FilterOperator::Equals => "=",
            FilterOperator::GreaterThan => ">",
            FilterOperator::LessThan => "<",
            FilterOperator::GreaterThanOrEqual => ">=",
            FilterOperator::LessThanOrEqual => "<=",
            FilterOperator::Like => "LIKE",
            FilterOperator::In => "IN",
        }
    }
}

impl TryFrom<request::EnumRepr> for FilterOperator {
    type Error = String;

    fn try_from(repr: request::EnumRepr) -> Result<Self, Self::Error> {
        match repr {
            request::EnumRepr::Index(i) => FilterOperator::ALL
                .get(i as usize)
                .copied()
                .ok_or_else(|| format!("unknown operator ordinal {}", i)),
            request::EnumRepr::Name(name) => FilterOperator::ALL
                .iter()
                .find(|op| format!("{:?}", op).eq_ignore_ascii_case(&name))
                .copied()
                .ok_or_else(|| format!("unknown operator '{}'", name)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(from = "request::EnumRepr")]
pub enum SortDirection {
    Ascending,
    #[default]
    Descending,
}

impl SortDirection {
    pub fn keyword(&self) -> &'static str {
        match self {
            SortDirection::Ascending => "ASC",
            SortDirection::Descending => "DESC",
        }
    }
}

impl From<request::EnumRepr> for SortDirection {
    fn from(repr: request::EnumRepr) -> Self {
        match repr {
            request::EnumRepr::Index(0) => SortDirection::Ascending,
            request::EnumRepr::Name(name)
                if name.eq_ignore_ascii_case("ascending") || name.eq_ignore_ascii_case("asc") =>
            {
                SortDirection::Ascending
            }
            _ => SortDirection::Descending,
        }
    }
}

/// Which store(s) a query or import runs against
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Target {
    #[serde(alias = "RelationalOnly", alias = "Postgres", alias = "relational")]
    Relational,
    #[serde(alias = "GraphOnly", alias = "Neo4j", alias = "graph")]
    Graph,
    #[default]
    #[serde(alias = "both")]
    Both,
}

impl Target {
    pub fn includes_relational(&self) -> bool {
        matches!(self, Target::Relational | Target::Both)
    }

    pub fn includes_graph(&self) -> bool {
        matches!(self, Target::Graph | Target::Both)
    }
}

impl std::str::FromStr for Target {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "relational" | "relationalonly" | "postgres" | "sqlite" => Ok(Target::Relational),
            "graph" | "graphonly" | "neo4j" => Ok(Target::Graph),
            "both" => Ok(Target::Both),
            other => Err(format!("unknown target '{}'", other)),
        }
    }
}

/// The concrete engine that produced an outcome
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Engine {
    Relational,
    Graph,
}

impl fmt::Display for Engine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Engine::Relational => f.write_str("relational"),
            Engine::Graph => f.write_str("graph"),
        }
    }
}
