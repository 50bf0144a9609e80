//! Article search over the relational store
//!
//! Free-form filters that sit outside the field catalog: name search, id
//! lists, buyer and followed-buyer restrictions, price range, and sorting by
//! sales volume or buyer popularity.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use uuid::Uuid;

use crate::engine::error::{QueryError, QueryResult};
use crate::engine::normalize::ArticleView;
use crate::engine::query::PaginatedResult;
use crate::engine::relational::dialect::substring_pattern;
use crate::engine::relational::{RelationalStore, Row, SqlDialect, SqlStatement, SqlValue};

const DEFAULT_PAGE_SIZE: i64 = 20;
const MAX_PAGE_SIZE: i64 = 500;

/// Ids given as a JSON array or a comma separated query string value
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum IdList {
    Many(Vec<Uuid>),
    Joined(String),
}

impl IdList {
    fn ids(&self) -> QueryResult<Vec<Uuid>> {
        match self {
            IdList::Many(ids) => Ok(ids.clone()),
            IdList::Joined(s) => s
                .split(',')
                .map(str::trim)
                .filter(|part| !part.is_empty())
                .map(|part| {
                    Uuid::parse_str(part).map_err(|e| QueryError::InvalidFilterValue {
                        field: "articleIds",
                        reason: e.to_string(),
                    })
                })
                .collect(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ArticleOrder {
    Name,
    Price,
    MostSold,
    SellerPopularity,
}

impl ArticleOrder {
    /// Unknown names fall back to the default id ordering
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "name" | "0" => Some(ArticleOrder::Name),
            "price" | "1" => Some(ArticleOrder::Price),
            "mostsold" | "most_sold" | "2" => Some(ArticleOrder::MostSold),
            "sellerpopularity" | "seller_popularity" | "3" => Some(ArticleOrder::SellerPopularity),
            _ => None,
        }
    }

    fn expr(&self) -> &'static str {
        match self {
            ArticleOrder::Name => "a.name",
            ArticleOrder::Price => "a.price",
            ArticleOrder::MostSold => "(SELECT COUNT(*) FROM orders so WHERE so.article_id = a.id)",
            ArticleOrder::SellerPopularity => {
                "COALESCE((SELECT MAX((SELECT COUNT(*) FROM user_follows sf \
                 WHERE sf.following_id = so.user_id)) \
                 FROM orders so WHERE so.article_id = a.id), 0)"
            }
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchArticlesRequest {
    #[serde(default)]
    pub page: Option<i64>,
    #[serde(default)]
    pub page_size: Option<i64>,
    #[serde(default)]
    pub search_term: Option<String>,
    #[serde(default)]
    pub article_ids: Option<IdList>,
    #[serde(default)]
    pub user_id: Option<Uuid>,
    #[serde(default)]
    pub only_from_following: bool,
    #[serde(default)]
    pub min_price: Option<f64>,
    #[serde(default)]
    pub max_price: Option<f64>,
    #[serde(default)]
    pub include_seller_details: bool,
    #[serde(default)]
    pub order_by: Option<String>,
    #[serde(default)]
    pub is_descending: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SellerView {
    pub id: Uuid,
    #[serde(alias = "user_name")]
    pub user_name: String,
    pub email: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArticleHit {
    pub id: Uuid,
    pub name: String,
    pub price: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sellers: Option<Vec<SellerView>>,
}

/// Rendered search statements
#[derive(Debug, Clone, PartialEq)]
pub struct ArticleSearch {
    pub data: SqlStatement,
    pub count: SqlStatement,
    pub page: i64,
    pub page_size: i64,
}

impl ArticleSearch {
    pub fn render(request: &SearchArticlesRequest, dialect: SqlDialect) -> QueryResult<Self> {
        let page = request.page.filter(|p| *p >= 1).unwrap_or(1);
        let page_size = request
            .page_size
            .filter(|s| *s >= 1)
            .map_or(DEFAULT_PAGE_SIZE, |s| s.min(MAX_PAGE_SIZE));

        let mut params = Vec::new();
        let mut conditions = Vec::new();

        if let Some(term) = request.search_term.as_deref().map(str::trim) {
            if !term.is_empty() {
                let n = bind(&mut params, SqlValue::Text(substring_pattern(term)));
                conditions.push(dialect.contains_ci("a.name", n));
            }
        }
        if let Some(list) = &request.article_ids {
            let ids = list.ids()?;
            if !ids.is_empty() {
                let values = ids
                    .iter()
                    .map(|id| SqlValue::Text(id.hyphenated().to_string()))
                    .collect();
                let n = bind(&mut params, SqlValue::List(values));
                conditions.push(dialect.in_set("a.id", n));
            }
        }
        if let Some(user) = request.user_id {
            let n = bind(&mut params, SqlValue::Text(user.hyphenated().to_string()));
            let condition = if request.only_from_following {
                format!(
                    "EXISTS (SELECT 1 FROM orders so JOIN user_follows sf ON sf.following_id = so.user_id \
                     WHERE so.article_id = a.id AND sf.follower_id = {})",
                    dialect.placeholder(n)
                )
            } else {
                format!(
                    "EXISTS (SELECT 1 FROM orders so WHERE so.article_id = a.id AND so.user_id = {})",
                    dialect.placeholder(n)
                )
            };
            conditions.push(condition);
        }
        if let Some(min) = request.min_price {
            let n = bind(&mut params, SqlValue::Real(min));
            conditions.push(format!("a.price >= {}", dialect.placeholder(n)));
        }
        if let Some(max) = request.max_price {
            let n = bind(&mut params, SqlValue::Real(max));
            conditions.push(format!("a.price <= {}", dialect.placeholder(n)));
        }

        let where_clause = if conditions.is_empty() {
            String::new()
        } else {
            format!(" WHERE {}", conditions.join(" AND "))
        };
        let order_clause = match request.order_by.as_deref().and_then(ArticleOrder::parse) {
            Some(order) => format!(
                " ORDER BY {} {}, a.id ASC",
                order.expr(),
                if request.is_descending { "DESC" } else { "ASC" }
            ),
            None => " ORDER BY a.id DESC".to_string(),
        };

        let count = SqlStatement {
            sql: format!("SELECT COUNT(*) FROM articles a{}", where_clause),
            params: params.clone(),
        };
        let limit = bind(&mut params, SqlValue::Integer(page_size));
        let offset = bind(&mut params, SqlValue::Integer((page - 1).saturating_mul(page_size)));
        let data = SqlStatement {
            sql: format!(
                "SELECT a.id AS id, a.name AS name, a.price AS price FROM articles a{}{} LIMIT {} OFFSET {}",
                where_clause,
                order_clause,
                dialect.placeholder(limit),
                dialect.placeholder(offset)
            ),
            params,
        };

        Ok(Self {
            data,
            count,
            page,
            page_size,
        })
    }
}

fn bind(params: &mut Vec<SqlValue>, value: SqlValue) -> usize {
    params.push(value);
    params.len()
}

fn decode<T: serde::de::DeserializeOwned>(row: Row) -> QueryResult<T> {
    serde_json::from_value(Value::Object(row)).map_err(|e| QueryError::Normalize(e.to_string()))
}

fn sellers_statement(ids: &[Uuid], dialect: SqlDialect) -> SqlStatement {
    let values = ids
        .iter()
        .map(|id| SqlValue::Text(id.hyphenated().to_string()))
        .collect();
    SqlStatement {
        sql: format!(
            "SELECT DISTINCT so.article_id AS article_id, u.id AS id, u.name AS user_name, u.email AS email \
             FROM orders so JOIN users u ON u.id = so.user_id WHERE {} ORDER BY u.name ASC, u.id ASC",
            dialect.in_set("so.article_id", 1)
        ),
        params: vec![SqlValue::List(values)],
    }
}

pub async fn search_articles<S: RelationalStore + ?Sized>(
    store: &S,
    request: &SearchArticlesRequest,
    cancel: &CancellationToken,
) -> QueryResult<PaginatedResult<ArticleHit>> {
    let start = Instant::now();
    let search = ArticleSearch::render(request, store.dialect())?;
    debug!(sql = %search.data.sql, "Article search");

    let total = store.count(&search.count, cancel).await?;
    let rows = store.query(&search.data, cancel).await?;
    let mut hits = rows
        .into_iter()
        .map(|row| {
            decode::<ArticleView>(row).map(|a| ArticleHit {
                id: a.id,
                name: a.name,
                price: a.price,
                sellers: None,
            })
        })
        .collect::<QueryResult<Vec<_>>>()?;

    if request.include_seller_details && !hits.is_empty() {
        let ids: Vec<Uuid> = hits.iter().map(|h| h.id).collect();
        let rows = store
            .query(&sellers_statement(&ids, store.dialect()), cancel)
            .await?;
        let mut by_article: HashMap<Uuid, Vec<SellerView>> = HashMap::new();
        for mut row in rows {
            let article: Uuid = row
                .remove("article_id")
                .map(serde_json::from_value)
                .transpose()
                .map_err(|e| QueryError::Normalize(e.to_string()))?
                .ok_or_else(|| QueryError::Normalize("missing column article_id".into()))?;
            by_article.entry(article).or_default().push(decode(row)?);
        }
        for hit in &mut hits {
            hit.sellers = Some(by_article.remove(&hit.id).unwrap_or_default());
        }
    }

    Ok(PaginatedResult::new(
        hits,
        total,
        search.page,
        search.page_size,
        start.elapsed(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::import::ImportSink;
    use crate::engine::model::{ArticleRecord, FollowRecord, OrderRecord, UserRecord};
    use crate::engine::relational::SqliteStore;

    struct Shop {
        store: SqliteStore,
        lamp: Uuid,
        desk: Uuid,
        chair: Uuid,
        ann: Uuid,
    }

    async fn shop() -> Shop {
        let store = SqliteStore::in_memory().unwrap();
        let cancel = CancellationToken::new();
        let (lamp, desk, chair) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());
        let (ann, bob, cid) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());
        let article = |id, name: &str, price| ArticleRecord {
            id,
            name: name.into(),
            price,
        };
        let user = |id, name: &str| UserRecord {
            id,
            user_name: name.into(),
            email: format!("{}@example.com", name.to_lowercase()),
        };
        let order = |user_id, article_id, quantity| OrderRecord {
            id: Uuid::new_v4(),
            user_id,
            article_id,
            quantity,
        };
        store
            .upsert_articles(
                &[
                    article(lamp, "Desk Lamp", 10.0),
                    article(desk, "Desk", 120.0),
                    article(chair, "Chair", 45.0),
                ],
                &cancel,
            )
            .await
            .unwrap();
        store
            .upsert_users(&[user(ann, "Ann"), user(bob, "Bob"), user(cid, "Cid")], &cancel)
            .await
            .unwrap();
        store
            .upsert_follows(
                &[
                    FollowRecord { follower_id: ann, following_id: bob },
                    FollowRecord { follower_id: cid, following_id: bob },
                ],
                &cancel,
            )
            .await
            .unwrap();
        store
            .upsert_orders(
                &[
                    order(bob, lamp, 1),
                    order(bob, chair, 2),
                    order(ann, chair, 1),
                    order(ann, desk, 1),
                ],
                &cancel,
            )
            .await
            .unwrap();
        Shop {
            store,
            lamp,
            desk,
            chair,
            ann,
        }
    }

    #[tokio::test]
    async fn test_search_term_is_case_insensitive() {
        let shop = shop().await;
        let request = SearchArticlesRequest {
            search_term: Some("desk".into()),
            order_by: Some("Price".into()),
            ..Default::default()
        };
        let page = search_articles(&shop.store, &request, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(page.total_count, 2);
        assert_eq!(
            page.items.iter().map(|h| h.id).collect::<Vec<_>>(),
            vec![shop.lamp, shop.desk]
        );
    }

    #[tokio::test]
    async fn test_only_from_following() {
        let shop = shop().await;
        let request = SearchArticlesRequest {
            user_id: Some(shop.ann),
            only_from_following: true,
            ..Default::default()
        };
        let page = search_articles(&shop.store, &request, &CancellationToken::new())
            .await
            .unwrap();
        let mut ids: Vec<_> = page.items.iter().map(|h| h.id).collect();
        ids.sort();
        let mut expected = vec![shop.lamp, shop.chair];
        expected.sort();
        assert_eq!(ids, expected);
    }

    #[tokio::test]
    async fn test_most_sold_with_sellers() {
        let shop = shop().await;
        let request = SearchArticlesRequest {
            order_by: Some("MostSold".into()),
            is_descending: true,
            include_seller_details: true,
            page_size: Some(1),
            ..Default::default()
        };
        let page = search_articles(&shop.store, &request, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(page.total_pages, 3);
        let top = &page.items[0];
        assert_eq!(top.id, shop.chair);
        let sellers = top.sellers.as_ref().unwrap();
        assert_eq!(
            sellers.iter().map(|s| s.user_name.as_str()).collect::<Vec<_>>(),
            vec!["Ann", "Bob"]
        );
    }

    #[tokio::test]
    async fn test_seller_popularity_and_price_range() {
        let shop = shop().await;
        let request = SearchArticlesRequest {
            order_by: Some("sellerPopularity".into()),
            is_descending: true,
            min_price: Some(40.0),
            ..Default::default()
        };
        let page = search_articles(&shop.store, &request, &CancellationToken::new())
            .await
            .unwrap();
        // chair has a buyer with two followers, desk's only buyer has none
        assert_eq!(
            page.items.iter().map(|h| h.id).collect::<Vec<_>>(),
            vec![shop.chair, shop.desk]
        );
        assert!(page.items[0].sellers.is_none());
    }

    #[test]
    fn test_render_guards_paging_and_ids() {
        let a = Uuid::new_v4();
        let request: SearchArticlesRequest = serde_json::from_value(serde_json::json!({
            "page": 0,
            "pageSize": -3,
            "articleIds": format!("{}, ", a),
            "orderBy": "nonsense"
        }))
        .unwrap();
        let search = ArticleSearch::render(&request, SqlDialect::Postgres).unwrap();
        assert_eq!((search.page, search.page_size), (1, 20));
        assert!(search.data.sql.contains("a.id = ANY($1)"));
        assert!(search.data.sql.ends_with("ORDER BY a.id DESC LIMIT $2 OFFSET $3"));
        assert_eq!(search.count.params.len(), 1);
    }

    #[tokio::test]
    async fn test_page_far_past_the_end_is_empty() {
        let shop = shop().await;
        let request = SearchArticlesRequest {
            page: Some(i64::MAX),
            page_size: Some(10_000),
            ..Default::default()
        };
        let search = ArticleSearch::render(&request, SqlDialect::Sqlite).unwrap();
        assert_eq!(search.page_size, 500);

        let page = search_articles(&shop.store, &request, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(page.total_count, 3);
        assert!(page.items.is_empty());
        assert!(!page.has_next_page);
    }

    #[test]
    fn test_bad_id_list_rejected() {
        let request = SearchArticlesRequest {
            article_ids: Some(IdList::Joined("nope".into())),
            ..Default::default()
        };
        let err = ArticleSearch::render(&request, SqlDialect::Sqlite).unwrap_err();
        assert_eq!(err.kind(), "InvalidFilterValue");
    }
}
