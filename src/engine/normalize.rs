//! Result Normalizer
//!
//! Maps relational rows and graph rows onto one canonical record per entity,
//! with identical field names whichever engine answered.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::engine::error::{QueryError, QueryResult};
use crate::engine::graph::{GraphRow, GraphValue};
use crate::engine::query::catalog::{self, GraphField};
use crate::engine::query::EntityKind;
use crate::engine::relational::Row;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArticleView {
    pub id: Uuid,
    pub name: String,
    pub price: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserView {
    pub id: Uuid,
    pub user_name: String,
    pub email: String,
    pub followers_count: i64,
    pub following_count: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderView {
    pub id: Uuid,
    pub user_id: Uuid,
    pub article_id: Uuid,
    pub quantity: i64,
    /// quantity x current article price
    pub total_price: f64,
}

/// Normalized record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Record {
    Article(ArticleView),
    User(UserView),
    Order(OrderView),
}

impl Record {
    pub fn id(&self) -> Uuid {
        match self {
            Record::Article(a) => a.id,
            Record::User(u) => u.id,
            Record::Order(o) => o.id,
        }
    }
}

fn build(entity: EntityKind, fields: Map<String, Value>) -> QueryResult<Record> {
    let value = Value::Object(fields);
    let record = match entity {
        EntityKind::Articles => serde_json::from_value(value).map(Record::Article),
        EntityKind::Users => serde_json::from_value(value).map(Record::User),
        EntityKind::Orders => serde_json::from_value(value).map(Record::Order),
    };
    record.map_err(|e| QueryError::Normalize(format!("{}: {}", entity, e)))
}

/// Relational rows carry one column per catalog field, labelled with its SQL name
pub fn from_relational(entity: EntityKind, row: &Row) -> QueryResult<Record> {
    let mut fields = Map::new();
    for field in catalog::fields(entity) {
        let value = row
            .get(field.sql_name)
            .cloned()
            .ok_or_else(|| QueryError::Normalize(format!("missing column {}", field.sql_name)))?;
        fields.insert(field.output.to_string(), value);
    }
    build(entity, fields)
}

/// A single matched node is unwrapped to its properties; several projected
/// values are zipped with the projection's column names.
pub fn from_graph(entity: EntityKind, row: &GraphRow) -> QueryResult<Record> {
    let mut fields = Map::new();
    match row.values.as_slice() {
        [GraphValue::Node(props)] => {
            for field in catalog::fields(entity) {
                let GraphField::Property { key, .. } = field.graph else {
                    return Err(QueryError::Normalize(format!(
                        "{} cannot be read from a node",
                        field.name
                    )));
                };
                let value = props
                    .get(key)
                    .cloned()
                    .ok_or_else(|| QueryError::Normalize(format!("node has no property {}", key)))?;
                fields.insert(field.output.to_string(), value);
            }
        }
        values => {
            if values.len() != row.columns.len() {
                return Err(QueryError::Normalize(format!(
                    "{} values for {} columns",
                    values.len(),
                    row.columns.len()
                )));
            }
            for (name, value) in row.columns.iter().zip(values) {
                let value = match value {
                    GraphValue::Scalar(v) => v.clone(),
                    GraphValue::Node(props) => Value::Object(props.clone()),
                };
                fields.insert(name.clone(), value);
            }
        }
    }
    build(entity, fields)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_relational_user_row() {
        let id = Uuid::new_v4();
        let row: Row = serde_json::from_value(json!({
            "id": id.to_string(),
            "user_name": "Ann",
            "email": "ann@example.com",
            "followers_count": 4,
            "following_count": 0
        }))
        .unwrap();
        let record = from_relational(EntityKind::Users, &row).unwrap();
        assert_eq!(
            record,
            Record::User(UserView {
                id,
                user_name: "Ann".into(),
                email: "ann@example.com".into(),
                followers_count: 4,
                following_count: 0,
            })
        );
        let out = serde_json::to_value(&record).unwrap();
        assert_eq!(out["followersCount"], 4);
        assert!(out.get("followers_count").is_none());
    }

    #[test]
    fn test_graph_node_unwrapped() {
        let id = Uuid::new_v4();
        let row = GraphRow {
            columns: vec!["a".into()],
            values: vec![GraphValue::Node(
                json!({ "id": id.to_string(), "name": "Lamp", "price": 10.0 })
                    .as_object()
                    .cloned()
                    .unwrap(),
            )],
        };
        let record = from_graph(EntityKind::Articles, &row).unwrap();
        assert_eq!(record.id(), id);
        assert!(matches!(record, Record::Article(ArticleView { price, .. }) if price == 10.0));
    }

    #[test]
    fn test_graph_columns_zipped() {
        let (id, user, article) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());
        let row = GraphRow {
            columns: ["id", "userId", "articleId", "quantity", "totalPrice"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            values: vec![
                GraphValue::Scalar(json!(id.to_string())),
                GraphValue::Scalar(json!(user.to_string())),
                GraphValue::Scalar(json!(article.to_string())),
                GraphValue::Scalar(json!(3)),
                GraphValue::Scalar(json!(30.0)),
            ],
        };
        let Record::Order(order) = from_graph(EntityKind::Orders, &row).unwrap() else {
            panic!("expected an order");
        };
        assert_eq!(order.total_price, 30.0);
        assert_eq!(order.user_id, user);
    }

    #[test]
    fn test_missing_column_is_normalize_error() {
        let row = Row::new();
        let err = from_relational(EntityKind::Articles, &row).unwrap_err();
        assert_eq!(err.kind(), "Normalize");
    }
}
