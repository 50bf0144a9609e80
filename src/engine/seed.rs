//! Deterministic demo dataset
//!
//! Ids are UUIDv5 over fixed names, so seeding twice produces the same rows
//! and the import pipeline treats the second run as pure upserts.

use uuid::Uuid;

use crate::engine::model::{ArticleRecord, FollowRecord, OrderRecord, SetupBatch, UserRecord};

pub const USER_COUNT: usize = 30;

const ARTICLE_NAMES: [&str; 8] = [
    "Viral Product",
    "Popular Product",
    "Classic Product",
    "Misc 4",
    "Misc 5",
    "Misc 6",
    "Misc 7",
    "Misc 8",
];

pub fn deterministic_id(name: &str) -> Uuid {
    Uuid::new_v5(&Uuid::NAMESPACE_DNS, name.as_bytes())
}

pub fn users() -> Vec<UserRecord> {
    (1..=USER_COUNT)
        .map(|i| UserRecord {
            id: deterministic_id(&format!("user_{}", i)),
            user_name: format!("User_{}", i),
            email: format!("user{}@example.com", i),
        })
        .collect()
}

pub fn articles() -> Vec<ArticleRecord> {
    ARTICLE_NAMES
        .iter()
        .enumerate()
        .map(|(i, name)| {
            let n = i + 1;
            ArticleRecord {
                id: deterministic_id(&format!("product_{}", n)),
                name: name.to_string(),
                price: 15.5 * n as f64,
            }
        })
        .collect()
}

/// Four layers: U2..U5 follow U1, and every user of a layer follows every
/// user of the layer above it.
pub fn follows(users: &[UserRecord]) -> Vec<FollowRecord> {
    let layers = [0..1, 1..5, 5..10, 10..20, 20..30];
    let mut edges = Vec::new();
    for pair in layers.windows(2) {
        let (above, below) = (&pair[0], &pair[1]);
        for follower in below.clone() {
            for following in above.clone() {
                edges.push(FollowRecord {
                    follower_id: users[follower].id,
                    following_id: users[following].id,
                });
            }
        }
    }
    edges
}

pub fn orders(users: &[UserRecord], articles: &[ArticleRecord]) -> Vec<OrderRecord> {
    let order = |key: String, user: &UserRecord, article: &ArticleRecord| OrderRecord {
        id: deterministic_id(&key),
        user_id: user.id,
        article_id: article.id,
        quantity: 1,
    };
    let (p1, p2, p3) = (&articles[0], &articles[1], &articles[2]);
    let mut out = Vec::new();

    // U1 and its followers bought P1
    for (i, user) in users.iter().enumerate().take(5) {
        out.push(order(format!("order_c1_p1_{}", i), user, p1));
    }
    // U6..U10 bought P1 and P2
    for (i, user) in users.iter().enumerate().take(10).skip(5) {
        out.push(order(format!("order_u6_10_p1_{}", i), user, p1));
        out.push(order(format!("order_u6_10_p2_{}", i), user, p2));
    }
    // U11..U15 bought only P3
    for (i, user) in users.iter().enumerate().take(15).skip(10) {
        out.push(order(format!("order_u11_15_p3_{}", i), user, p3));
    }
    out
}

pub fn dataset() -> SetupBatch {
    let users = users();
    let articles = articles();
    SetupBatch {
        follows: follows(&users),
        orders: orders(&users, &articles),
        articles,
        users,
    }
}
