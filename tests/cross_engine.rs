use duodb_lib::engine::database::DuoDb;
use duodb_lib::engine::executor::EngineOutcome;
use duodb_lib::engine::model::{ArticleRecord, FollowRecord, OrderRecord, SetupBatch, UserRecord};
use duodb_lib::engine::normalize::Record;
use duodb_lib::engine::query::{
    Engine, EntityKind, FilterOperator, PaginatedResult, QueryRequest, SortDirection, Target,
};
use duodb_lib::engine::seed;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

async fn seeded() -> DuoDb {
    let db = DuoDb::ephemeral().unwrap();
    let report = db
        .importer()
        .import(&seed::dataset(), Target::Both, &CancellationToken::new())
        .await;
    for target in &report.targets {
        for entity in &target.entities {
            assert!(entity.failures.is_empty(), "{:?}", entity);
            assert!(entity.chunk_failures.is_empty(), "{:?}", entity);
        }
    }
    db
}

async fn both(db: &DuoDb, request: &QueryRequest) -> (PaginatedResult<Record>, PaginatedResult<Record>) {
    let outcomes = db
        .executor()
        .execute(request, Target::Both, &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(outcomes.len(), 2);
    let take = |o: &EngineOutcome, engine: Engine| {
        assert_eq!(o.engine, engine);
        o.result()
            .unwrap_or_else(|| panic!("{} failed: {:?}", engine, o.error()))
            .clone()
    };
    (
        take(&outcomes[0], Engine::Relational),
        take(&outcomes[1], Engine::Graph),
    )
}

fn ids(page: &PaginatedResult<Record>) -> Vec<Uuid> {
    page.items.iter().map(Record::id).collect()
}

fn user(i: usize) -> Uuid {
    seed::deterministic_id(&format!("user_{}", i))
}

#[tokio::test]
async fn test_engines_agree_on_seeded_data() {
    let db = seeded().await;
    let requests = vec![
        QueryRequest::new(EntityKind::Users).paged(1, 50),
        QueryRequest::new(EntityKind::Users).filter("FollowersCount", FilterOperator::Equals, 10),
        QueryRequest::new(EntityKind::Users)
            .filter("UserName", FilterOperator::Equals, "User_7")
            .filter("Email", FilterOperator::Equals, "user7@example.com"),
        QueryRequest::new(EntityKind::Articles).order_by("Price", SortDirection::Ascending),
        QueryRequest::new(EntityKind::Articles).filter("Name", FilterOperator::Like, "PRODUCT"),
        QueryRequest::new(EntityKind::Articles).filter("Price", FilterOperator::GreaterThan, 40),
        QueryRequest::new(EntityKind::Orders).paged(2, 7),
        QueryRequest::new(EntityKind::Orders)
            .filter("UserId", FilterOperator::Equals, user(7).to_string())
            .order_by("TotalPrice", SortDirection::Descending),
        QueryRequest::new(EntityKind::Orders).filter("TotalPrice", FilterOperator::LessThanOrEqual, 15.5),
        QueryRequest::new(EntityKind::Users).scoped(user(30), 2),
        QueryRequest::new(EntityKind::Orders).scoped(user(30), 2),
        QueryRequest::new(EntityKind::Articles).scoped(user(30), 2),
    ];

    for request in &requests {
        let (relational, graph) = both(&db, request).await;
        assert_eq!(relational.total_count, graph.total_count, "{:?}", request);
        assert_eq!(relational.items, graph.items, "{:?}", request);
    }
}

#[tokio::test]
async fn test_seeded_counts() {
    let db = seeded().await;

    let (u1, _) = both(
        &db,
        &QueryRequest::new(EntityKind::Users).filter("Id", FilterOperator::Equals, user(1).to_string()),
    )
    .await;
    match &u1.items[0] {
        Record::User(u) => {
            assert_eq!(u.followers_count, 4);
            assert_eq!(u.following_count, 0);
        }
        other => panic!("expected a user, got {:?}", other),
    }

    // U30 -> U11..U20 -> U6..U10
    let (users, _) = both(&db, &QueryRequest::new(EntityKind::Users).scoped(user(30), 2)).await;
    assert_eq!(users.total_count, 16);
    let (orders, _) = both(&db, &QueryRequest::new(EntityKind::Orders).scoped(user(30), 2)).await;
    assert_eq!(orders.total_count, 15);
    let (articles, _) = both(&db, &QueryRequest::new(EntityKind::Articles).scoped(user(30), 1)).await;
    assert_eq!(articles.total_count, 1);
}

#[tokio::test]
async fn test_hop_bound_scenario() {
    let db = DuoDb::ephemeral().unwrap();
    let (a, b, c) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());
    let person = |id, name: &str| UserRecord {
        id,
        user_name: name.into(),
        email: format!("{}@example.com", name),
    };
    let batch = SetupBatch {
        users: vec![person(a, "a"), person(b, "b"), person(c, "c")],
        follows: vec![
            FollowRecord { follower_id: a, following_id: b },
            FollowRecord { follower_id: b, following_id: c },
        ],
        ..Default::default()
    };
    db.importer()
        .import(&batch, Target::Both, &CancellationToken::new())
        .await;

    let sorted = |page: &PaginatedResult<Record>| {
        let mut v = ids(page);
        v.sort();
        v
    };
    let mut ab = vec![a, b];
    ab.sort();
    let mut abc = vec![a, b, c];
    abc.sort();

    for (hops, expected) in [(1, ab.clone()), (2, abc.clone()), (0, abc.clone())] {
        let (relational, graph) = both(&db, &QueryRequest::new(EntityKind::Users).scoped(a, hops)).await;
        assert_eq!(sorted(&relational), expected, "hops {}", hops);
        assert_eq!(sorted(&graph), expected, "hops {}", hops);
    }
}

#[tokio::test]
async fn test_total_price_follows_current_article_price() {
    let db = DuoDb::ephemeral().unwrap();
    let cancel = CancellationToken::new();
    let (article, buyer, order) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());
    let batch = |price| SetupBatch {
        articles: vec![ArticleRecord {
            id: article,
            name: "Lamp".into(),
            price,
        }],
        users: vec![UserRecord {
            id: buyer,
            user_name: "Ann".into(),
            email: "ann@example.com".into(),
        }],
        orders: vec![OrderRecord {
            id: order,
            user_id: buyer,
            article_id: article,
            quantity: 3,
        }],
        ..Default::default()
    };
    let total = |page: &PaginatedResult<Record>| match &page.items[0] {
        Record::Order(o) => o.total_price,
        other => panic!("expected an order, got {:?}", other),
    };

    db.importer().import(&batch(10.0), Target::Both, &cancel).await;
    let (relational, graph) = both(&db, &QueryRequest::new(EntityKind::Orders)).await;
    assert_eq!(total(&relational), 30.0);
    assert_eq!(total(&graph), 30.0);

    // only the article changes; the order row is untouched
    let repriced = SetupBatch {
        articles: batch(20.0).articles,
        ..Default::default()
    };
    db.importer().import(&repriced, Target::Both, &cancel).await;
    let (relational, graph) = both(&db, &QueryRequest::new(EntityKind::Orders)).await;
    assert_eq!(total(&relational), 60.0);
    assert_eq!(total(&graph), 60.0);
}

#[tokio::test]
async fn test_pagination_of_45_rows() {
    let db = DuoDb::ephemeral().unwrap();
    let articles = (0..45)
        .map(|i| ArticleRecord {
            id: Uuid::new_v4(),
            name: format!("Item {:02}", i),
            price: i as f64,
        })
        .collect();
    db.importer()
        .import(
            &SetupBatch {
                articles,
                ..Default::default()
            },
            Target::Both,
            &CancellationToken::new(),
        )
        .await;

    let (relational, graph) = both(&db, &QueryRequest::new(EntityKind::Articles).paged(3, 20)).await;
    for page in [&relational, &graph] {
        assert_eq!(page.total_count, 45);
        assert_eq!(page.total_pages, 3);
        assert_eq!(page.items.len(), 5);
        assert!(!page.has_next_page);
        assert!(page.has_previous_page);
    }
    assert_eq!(relational.items, graph.items);
}

#[tokio::test]
async fn test_single_engine_targets() {
    let db = seeded().await;
    for (target, engine) in [(Target::Relational, Engine::Relational), (Target::Graph, Engine::Graph)] {
        let outcomes = db
            .executor()
            .execute(&QueryRequest::new(EntityKind::Articles), target, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(outcomes.len(), 1);
        assert_eq!(outcomes[0].engine, engine);
        assert_eq!(outcomes[0].result().unwrap().total_count, 8);
    }
}

#[tokio::test]
async fn test_page_far_past_the_end_is_empty_on_both_engines() {
    let db = seeded().await;
    let (relational, graph) = both(&db, &QueryRequest::new(EntityKind::Articles).paged(i64::MAX, 20)).await;
    for page in [&relational, &graph] {
        assert_eq!(page.total_count, 8);
        assert_eq!(page.page, i64::MAX);
        assert!(page.items.is_empty());
        assert!(!page.has_next_page);
        assert!(page.has_previous_page);
    }
}

#[tokio::test]
async fn test_like_is_case_insensitive_beyond_ascii() {
    let db = DuoDb::ephemeral().unwrap();
    let article = |name: &str| ArticleRecord {
        id: Uuid::new_v4(),
        name: name.into(),
        price: 10.0,
    };
    db.importer()
        .import(
            &SetupBatch {
                articles: vec![article("Élan Chair"), article("ÉLAN LAMP"), article("Elan Stool")],
                ..Default::default()
            },
            Target::Both,
            &CancellationToken::new(),
        )
        .await;

    let request = QueryRequest::new(EntityKind::Articles).filter("Name", FilterOperator::Like, "élan");
    let (relational, graph) = both(&db, &request).await;
    assert_eq!(relational.total_count, 2);
    assert_eq!(graph.total_count, 2);
    assert_eq!(relational.items, graph.items);
}
