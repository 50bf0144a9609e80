//! DuoDB API Module
//! REST surface over the dual-backend executor, import pipeline and article search

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::str::FromStr;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;
use utoipa::OpenApi;

use crate::engine::database::DuoDb;
use crate::engine::error::{QueryError, StoreError};
use crate::engine::executor::{EngineOutcome, ErrorBody};
use crate::engine::import::ImportReport;
use crate::engine::model::SetupBatch;
use crate::engine::query::{PaginatedResult, QueryRequest, Target};
use crate::engine::search::{search_articles, ArticleHit, SearchArticlesRequest};

#[derive(Clone)]
pub struct ApiState {
    pub db: DuoDb,
}

#[derive(OpenApi)]
#[openapi(
    paths(
        execute_query,
        import_batch,
        search_articles_handler,
        health_check,
    ),
    tags(
        (name = "query", description = "Dual-backend query execution"),
        (name = "import", description = "Bulk import into one or both stores"),
        (name = "social-network", description = "Relational article search"),
    )
)]
pub struct ApiDoc;

pub fn create_router(state: ApiState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/api/query/execute", post(execute_query))
        .route("/api/import/{kind}", post(import_batch))
        .route("/api/social-network/search/articles", get(search_articles_handler))
        .route("/api/health", get(health_check))
        .route("/api/openapi.json", get(openapi_json))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// `{ kind, message }` with a status derived from the error kind
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    body: ErrorBody,
}

impl ApiError {
    fn bad_request(kind: &str, message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            body: ErrorBody {
                kind: kind.to_string(),
                message: message.into(),
            },
        }
    }
}

impl From<QueryError> for ApiError {
    fn from(err: QueryError) -> Self {
        let status = match &err {
            e if e.is_validation() => StatusCode::BAD_REQUEST,
            QueryError::Store(StoreError::Unavailable(_)) => StatusCode::SERVICE_UNAVAILABLE,
            QueryError::Store(StoreError::Timeout(_)) => StatusCode::GATEWAY_TIMEOUT,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self {
            status,
            body: ErrorBody::from(&err),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(self.body)).into_response()
    }
}

#[derive(Debug, Deserialize)]
pub struct TargetParams {
    #[serde(default)]
    targets: Option<String>,
}

impl TargetParams {
    fn target(&self) -> Result<Target, ApiError> {
        match self.targets.as_deref() {
            None | Some("") => Ok(Target::Both),
            Some(raw) => Target::from_str(raw)
                .map_err(|_| ApiError::bad_request("InvalidTarget", format!("Unknown target: {}", raw))),
        }
    }
}

fn parse_body<T: serde::de::DeserializeOwned>(body: Value) -> Result<T, ApiError> {
    serde_json::from_value(body).map_err(|e| ApiError::bad_request("InvalidRequest", e.to_string()))
}

/// Token cancelled when the handler future is dropped, e.g. on client disconnect
fn request_token() -> (CancellationToken, tokio_util::sync::DropGuard) {
    let token = CancellationToken::new();
    let guard = token.clone().drop_guard();
    (token, guard)
}

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

#[utoipa::path(
    get,
    path = "/api/health",
    responses(
        (status = 200, description = "Server is up", body = Value)
    )
)]
async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

async fn openapi_json() -> Json<utoipa::openapi::OpenApi> {
    Json(ApiDoc::openapi())
}

#[utoipa::path(
    post,
    path = "/api/query/execute",
    params(
        ("targets" = Option<String>, Query, description = "Both, Relational or Graph"),
    ),
    request_body = Value,
    responses(
        (status = 200, description = "One outcome per selected engine", body = Value),
        (status = 400, description = "Invalid request", body = Value)
    ),
    tag = "query"
)]
async fn execute_query(
    State(state): State<ApiState>,
    Query(params): Query<TargetParams>,
    Json(body): Json<Value>,
) -> Result<Json<Vec<EngineOutcome>>, ApiError> {
    let targets = params.target()?;
    let request: QueryRequest = parse_body(body)?;
    let (cancel, _guard) = request_token();

    let outcomes = state.db.executor().execute(&request, targets, &cancel).await?;
    Ok(Json(outcomes))
}

#[utoipa::path(
    post,
    path = "/api/import/{kind}",
    params(
        ("kind" = String, Path, description = "articles, users, orders, social-graph or full-setup"),
        ("targets" = Option<String>, Query, description = "Both, Relational or Graph"),
    ),
    request_body = Value,
    responses(
        (status = 200, description = "Per-target import report", body = Value),
        (status = 400, description = "Invalid batch", body = Value)
    ),
    tag = "import"
)]
async fn import_batch(
    State(state): State<ApiState>,
    Path(kind): Path<String>,
    Query(params): Query<TargetParams>,
    Json(body): Json<Value>,
) -> Result<Json<ImportReport>, ApiError> {
    let targets = params.target()?;
    let batch = match kind.as_str() {
        "articles" => SetupBatch {
            articles: parse_body(body)?,
            ..Default::default()
        },
        "users" => SetupBatch {
            users: parse_body(body)?,
            ..Default::default()
        },
        "orders" => SetupBatch {
            orders: parse_body(body)?,
            ..Default::default()
        },
        "social-graph" => SetupBatch {
            follows: parse_body(body)?,
            ..Default::default()
        },
        "full-setup" => parse_body(body)?,
        other => {
            return Err(ApiError::bad_request(
                "UnknownImportKind",
                format!("Unknown import kind: {}", other),
            ))
        }
    };
    let (cancel, _guard) = request_token();

    info!(%kind, ?targets, "Import requested");
    let report = state.db.importer().import(&batch, targets, &cancel).await;
    Ok(Json(report))
}

#[utoipa::path(
    get,
    path = "/api/social-network/search/articles",
    responses(
        (status = 200, description = "Paginated article hits", body = Value),
        (status = 400, description = "Invalid search", body = Value)
    ),
    tag = "social-network"
)]
async fn search_articles_handler(
    State(state): State<ApiState>,
    Query(request): Query<SearchArticlesRequest>,
) -> Result<Json<PaginatedResult<ArticleHit>>, ApiError> {
    let (cancel, _guard) = request_token();
    let page = search_articles(state.db.sqlite(), &request, &cancel).await?;
    Ok(Json(page))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    fn router() -> Router {
        create_router(ApiState {
            db: DuoDb::ephemeral().unwrap(),
        })
    }

    async fn call(app: Router, method: &str, uri: &str, body: Value) -> (StatusCode, Value) {
        let request = Request::builder()
            .method(method)
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap();
        let response = app.oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, value)
    }

    #[tokio::test]
    async fn test_unknown_field_is_bad_request() {
        let (status, body) = call(
            router(),
            "POST",
            "/api/query/execute?targets=Both",
            serde_json::json!({
                "entity": "Users",
                "filters": [{ "fieldId": "Shoe", "operator": "Equals", "value": "x" }]
            }),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["kind"], "UnknownField");
    }

    #[tokio::test]
    async fn test_unknown_target_is_bad_request() {
        let (status, body) = call(
            router(),
            "POST",
            "/api/query/execute?targets=Mongo",
            serde_json::json!({ "entity": "Users" }),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["kind"], "InvalidTarget");
    }

    #[tokio::test]
    async fn test_import_then_query_both() {
        let app = router();
        let id = uuid::Uuid::new_v4();
        let (status, report) = call(
            app.clone(),
            "POST",
            "/api/import/articles?targets=Both",
            serde_json::json!([{ "id": id, "name": "Lamp", "price": 10.0 }]),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(report["targets"].as_array().unwrap().len(), 2);

        let (status, outcomes) = call(
            app,
            "POST",
            "/api/query/execute",
            serde_json::json!({ "entity": "Articles" }),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        for outcome in outcomes.as_array().unwrap() {
            assert_eq!(outcome["status"], "ok");
            assert_eq!(outcome["result"]["totalCount"], 1);
            assert_eq!(outcome["result"]["items"][0]["id"], id.to_string());
        }
    }

    #[tokio::test]
    async fn test_unknown_import_kind() {
        let (status, body) = call(router(), "POST", "/api/import/widgets", serde_json::json!([])).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["kind"], "UnknownImportKind");
    }

    #[tokio::test]
    async fn test_search_and_health() {
        let (status, page) = call(
            router(),
            "GET",
            "/api/social-network/search/articles?page=0&searchTerm=lamp",
            Value::Null,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(page["page"], 1);
        assert_eq!(page["totalCount"], 0);

        let (status, health) = call(router(), "GET", "/api/health", Value::Null).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(health["status"], "ok");
    }
}
