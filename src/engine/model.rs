//! Domain records shared by both stores and the import path

use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArticleRecord {
    pub id: Uuid,
    pub name: String,
    pub price: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserRecord {
    pub id: Uuid,
    #[serde(alias = "name")]
    pub user_name: String,
    pub email: String,
}

/// A purchase. Total price is derived from the article at read time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderRecord {
    pub id: Uuid,
    pub user_id: Uuid,
    pub article_id: Uuid,
    pub quantity: i64,
}

/// Directed follow edge (follower -> following)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FollowRecord {
    pub follower_id: Uuid,
    pub following_id: Uuid,
}

/// Everything one full-setup import carries
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SetupBatch {
    pub articles: Vec<ArticleRecord>,
    pub users: Vec<UserRecord>,
    #[serde(alias = "socialGraph")]
    pub follows: Vec<FollowRecord>,
    pub orders: Vec<OrderRecord>,
}

impl SetupBatch {
    pub fn is_empty(&self) -> bool {
        self.articles.is_empty()
            && self.users.is_empty()
            && self.follows.is_empty()
            && self.orders.is_empty()
    }
}

/// Canonical id rendering used in both stores
pub fn id_str(id: &Uuid) -> String {
    id.hyphenated().to_string()
}

/// Row and node counts reported by `status`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreStats {
    pub articles: u64,
    pub users: u64,
    pub follows: u64,
    pub orders: u64,
}
