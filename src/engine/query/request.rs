//! Caller-facing query request and its normalized form

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use tracing::warn;
use uuid::Uuid;

use crate::engine::error::{QueryError, QueryResult};

use super::catalog::{self, FieldDescriptor, ValueType};
use super::{EntityKind, FilterOperator, SortDirection};

/// Wire form of an enum value: its ordinal or its name
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum EnumRepr {
    Index(u32),
    Name(String),
}

/// A field reference, by enum ordinal or by name
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldKey {
    Index(u32),
    Name(String),
}

impl fmt::Display for FieldKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldKey::Index(i) => write!(f, "#{}", i),
            FieldKey::Name(n) => f.write_str(n),
        }
    }
}

impl From<&str> for FieldKey {
    fn from(name: &str) -> Self {
        FieldKey::Name(name.to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FilterSpec {
    #[serde(alias = "field")]
    pub field_id: FieldKey,
    pub operator: FilterOperator,
    #[serde(default)]
    pub value: Value,
}

impl FilterSpec {
    pub fn new(field: impl Into<FieldKey>, operator: FilterOperator, value: impl Into<Value>) -> Self {
        Self {
            field_id: field.into(),
            operator,
            value: value.into(),
        }
    }
}

fn default_page() -> i64 {
    1
}

fn default_page_size() -> i64 {
    20
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryRequest {
    pub entity: EntityKind,
    #[serde(default)]
    pub filters: Vec<FilterSpec>,
    #[serde(default)]
    pub order_by_field: Option<FieldKey>,
    #[serde(default)]
    pub order_direction: SortDirection,
    /// Scope anchor
    #[serde(default, alias = "anchorUserId")]
    pub user_id: Option<Uuid>,
    /// Scope hop bound
    #[serde(default, alias = "hopBound")]
    pub following_level: Option<i64>,
    #[serde(default = "default_page")]
    pub page: i64,
    #[serde(default = "default_page_size")]
    pub page_size: i64,
}

impl QueryRequest {
    pub fn new(entity: EntityKind) -> Self {
        Self {
            entity,
            filters: Vec::new(),
            order_by_field: None,
            order_direction: SortDirection::Descending,
            user_id: None,
            following_level: None,
            page: default_page(),
            page_size: default_page_size(),
        }
    }

    pub fn filter(mut self, field: impl Into<FieldKey>, op: FilterOperator, value: impl Into<Value>) -> Self {
        self.filters.push(FilterSpec::new(field, op, value));
        self
    }

    pub fn scoped(mut self, anchor: Uuid, hops: i64) -> Self {
        self.user_id = Some(anchor);
        self.following_level = Some(hops);
        self
    }

    pub fn order_by(mut self, field: impl Into<FieldKey>, direction: SortDirection) -> Self {
        self.order_by_field = Some(field.into());
        self.order_direction = direction;
        self
    }

    pub fn paged(mut self, page: i64, page_size: i64) -> Self {
        self.page = page;
        self.page_size = page_size;
        self
    }

    /// Validate and resolve against the field catalog. No store is touched.
    pub fn normalize(&self, limits: &QueryLimits) -> QueryResult<NormalizedQuery> {
        let mut filters = Vec::with_capacity(self.filters.len());
        for spec in &self.filters {
            let field = catalog::resolve(self.entity, &spec.field_id)?;
            if !field.supports(spec.operator) {
                if limits.strict_operators {
                    return Err(QueryError::UnsupportedOperator {
                        entity: self.entity,
                        field: field.name,
                        operator: spec.operator,
                    });
                }
                warn!(
                    entity = %self.entity,
                    field = field.name,
                    operator = ?spec.operator,
                    "Ignoring unsupported filter"
                );
                continue;
            }
            let value = coerce_filter_value(field, spec.operator, &spec.value)?;
            filters.push(ResolvedFilter {
                field,
                operator: spec.operator,
                value,
            });
        }

        let sort = self
            .order_by_field
            .as_ref()
            .and_then(|key| catalog::resolve_sort(self.entity, key))
            .map(|field| SortSpec {
                field,
                direction: self.order_direction,
            })
            .unwrap_or_else(|| SortSpec::default_for(self.entity));

        let scope = match (self.user_id, self.following_level) {
            (Some(anchor), Some(hops)) if hops > 0 => {
                let max = i64::from(limits.max_hop_bound);
                if hops > max {
                    warn!(requested = hops, max, "Clamping hop bound");
                }
                Some(Scope {
                    anchor,
                    hops: hops.min(max) as u32,
                })
            }
            _ => None,
        };

        let page = self.page.max(1);
        let page_size = if self.page_size < 1 {
            limits.default_page_size
        } else {
            self.page_size.min(limits.max_page_size)
        };

        Ok(NormalizedQuery {
            entity: self.entity,
            filters,
            sort,
            scope,
            page,
            page_size,
        })
    }
}

/// Bounds applied while normalizing a request
#[derive(Debug, Clone, PartialEq)]
pub struct QueryLimits {
    pub max_hop_bound: u32,
    pub default_page_size: i64,
    pub max_page_size: i64,
    pub strict_operators: bool,
}

impl Default for QueryLimits {
    fn default() -> Self {
        Self {
            max_hop_bound: 6,
            default_page_size: 20,
            max_page_size: 500,
            strict_operators: true,
        }
    }
}

/// A typed filter operand
#[derive(Debug, Clone, PartialEq)]
pub enum ScalarValue {
    Uuid(Uuid),
    Text(String),
    Decimal(f64),
    Integer(i64),
}

impl ScalarValue {
    pub fn to_json(&self) -> Value {
        match self {
            ScalarValue::Uuid(id) => Value::String(id.hyphenated().to_string()),
            ScalarValue::Text(s) => Value::String(s.clone()),
            ScalarValue::Decimal(d) => serde_json::Number::from_f64(*d)
                .map(Value::Number)
                .unwrap_or(Value::Null),
            ScalarValue::Integer(i) => Value::from(*i),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum FilterValue {
    One(ScalarValue),
    Many(Vec<ScalarValue>),
}

impl FilterValue {
    pub fn to_json(&self) -> Value {
        match self {
            FilterValue::One(v) => v.to_json(),
            FilterValue::Many(vs) => Value::Array(vs.iter().map(ScalarValue::to_json).collect()),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedFilter {
    pub field: &'static FieldDescriptor,
    pub operator: FilterOperator,
    pub value: FilterValue,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SortSpec {
    pub field: &'static FieldDescriptor,
    pub direction: SortDirection,
}

impl SortSpec {
    pub fn default_for(entity: EntityKind) -> Self {
        Self {
            field: catalog::id_field(entity),
            direction: SortDirection::Descending,
        }
    }
}

/// Restriction to users reachable from `anchor` within `hops` follow edges
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Scope {
    pub anchor: Uuid,
    pub hops: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedQuery {
    pub entity: EntityKind,
    pub filters: Vec<ResolvedFilter>,
    pub sort: SortSpec,
    pub scope: Option<Scope>,
    pub page: i64,
    pub page_size: i64,
}

impl NormalizedQuery {
    /// Saturates for pages far past the end; such a page is simply empty
    pub fn skip(&self) -> i64 {
        (self.page - 1).saturating_mul(self.page_size)
    }

    pub fn take(&self) -> i64 {
        self.page_size
    }
}

fn coerce_filter_value(
    field: &'static FieldDescriptor,
    op: FilterOperator,
    raw: &Value,
) -> QueryResult<FilterValue> {
    if op == FilterOperator::In {
        let items = match raw {
            Value::Array(items) => items
                .iter()
                .map(|v| coerce_scalar(field, v))
                .collect::<QueryResult<Vec<_>>>()?,
            Value::String(s) if s.contains(',') => s
                .split(',')
                .map(|part| coerce_scalar(field, &Value::String(part.trim().to_string())))
                .collect::<QueryResult<Vec<_>>>()?,
            other => vec![coerce_scalar(field, other)?],
        };
        return Ok(FilterValue::Many(items));
    }
    coerce_scalar(field, raw).map(FilterValue::One)
}

fn coerce_scalar(field: &'static FieldDescriptor, raw: &Value) -> QueryResult<ScalarValue> {
    let invalid = |reason: String| QueryError::InvalidFilterValue {
        field: field.name,
        reason,
    };
    match field.value_type {
        ValueType::Uuid => match raw {
            Value::String(s) => Uuid::parse_str(s.trim())
                .map(ScalarValue::Uuid)
                .map_err(|e| invalid(e.to_string())),
            other => Err(invalid(format!("expected a uuid string, got {}", other))),
        },
        ValueType::Text => match raw {
            Value::String(s) => Ok(ScalarValue::Text(s.clone())),
            Value::Number(n) => Ok(ScalarValue::Text(n.to_string())),
            Value::Bool(b) => Ok(ScalarValue::Text(b.to_string())),
            other => Err(invalid(format!("expected text, got {}", other))),
        },
        ValueType::Decimal => {
            let parsed = match raw {
                Value::Number(n) => n.as_f64(),
                Value::String(s) => s.trim().parse::<f64>().ok(),
                _ => None,
            };
            match parsed {
                Some(d) if d.is_finite() => Ok(ScalarValue::Decimal(d)),
                _ => Err(invalid(format!("expected a number, got {}", raw))),
            }
        }
        ValueType::Integer => {
            let parsed = match raw {
                Value::Number(n) => n
                    .as_i64()
                    .or_else(|| n.as_f64().filter(|f| f.fract() == 0.0).map(|f| f as i64)),
                Value::String(s) => s.trim().parse::<i64>().ok(),
                _ => None,
            };
            parsed
                .map(ScalarValue::Integer)
                .ok_or_else(|| invalid(format!("expected an integer, got {}", raw)))
        }
    }
}
