//! HTTP surface: single scrape, batch scrape, health.

use axum::extract::{Query as Params, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{get, post};
use axum::Router;
use pricewatch::{validate_batch, BatchError, BatchOrchestrator, BatchReport, Query, QueryError, RunOptions, ScrapeReport};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tracing::{error, info};

pub const API_VERSION: &str = env!("CARGO_PKG_VERSION");

pub struct AppState {
    pub orchestrator: BatchOrchestrator,
}

/// Error rendered as `{"error": "..."}` with a status code.
#[derive(Debug)]
pub struct AppError {
    pub status: StatusCode,
    pub message: String,
}

impl AppError {
    /// 400 with the given message.
    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: msg.into(),
        }
    }

    /// 503 with the given message.
    pub fn unavailable(msg: impl Into<String>) -> Self {
        Self {
            status: StatusCode::SERVICE_UNAVAILABLE,
            message: msg.into(),
        }
    }

    /// 500 with the given message.
    pub fn internal(msg: impl Into<String>) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: msg.into(),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        (self.status, Json(json!({ "error": self.message }))).into_response()
    }
}

impl From<QueryError> for AppError {
    fn from(e: QueryError) -> Self {
        AppError::bad_request(e.to_string())
    }
}

impl From<BatchError> for AppError {
    fn from(e: BatchError) -> Self {
        AppError::bad_request(e.to_string())
    }
}

/// All routes, with permissive CORS.
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", get(banner))
        .route("/health", get(health))
        .route("/scrape", get(scrape))
        .route("/scrape_batch", post(scrape_batch))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// GET /
async fn banner() -> Json<Value> {
    Json(json!({
        "message": "pricewatch sold-price scraper",
        "version": API_VERSION,
        "endpoints": ["/health", "/scrape", "/scrape_batch"],
    }))
}

/// GET /health
async fn health(State(state): State<Arc<AppState>>) -> Json<Value> {
    Json(json!({
        "status": "healthy",
        "api_version": API_VERSION,
        "renderer": state.orchestrator.renderer().name(),
        "features": {
            "batch_scrape": true,
            "database_storage": state.orchestrator.can_store(),
            "debug_trace": true,
            "tiered_extraction": true,
            "scheduled_catalog": true,
        },
    }))
}

#[derive(Debug, Deserialize)]
pub struct ScrapeParams {
    pub query: String,
    #[serde(default)]
    pub store_to_db: bool,
    #[serde(default)]
    pub debug: bool,
}

/// GET /scrape?query=...&store_to_db=true&debug=true
async fn scrape(
    State(state): State<Arc<AppState>>,
    Params(params): Params<ScrapeParams>,
) -> Result<Json<ScrapeReport>, AppError> {
    let query = Query::new(&params.query)?;
    if params.store_to_db && !state.orchestrator.can_store() {
        return Err(AppError::unavailable("database storage is not configured"));
    }

    let options = RunOptions {
        store: params.store_to_db,
        debug: params.debug,
    };
    let report = state.orchestrator.run_query(&query, options).await.map_err(|e| {
        error!(%query, "scrape failed: {e:#}");
        AppError::internal(format!("Scraping failed: {e:#}"))
    })?;
    Ok(Json(report))
}

#[derive(Debug, Deserialize)]
pub struct BatchRequest {
    pub queries: Vec<String>,
    #[serde(default)]
    pub store_to_db: bool,
    #[serde(default)]
    pub max_concurrent: Option<usize>,
    #[serde(default)]
    pub debug: bool,
}

/// POST /scrape_batch
async fn scrape_batch(
    State(state): State<Arc<AppState>>,
    Json(request): Json<BatchRequest>,
) -> Result<Json<BatchReport>, AppError> {
    let max_concurrent = validate_batch(request.queries.len(), request.max_concurrent)?;
    let queries = request
        .queries
        .iter()
        .map(Query::new)
        .collect::<Result<Vec<_>, _>>()?;
    if request.store_to_db && !state.orchestrator.can_store() {
        return Err(AppError::unavailable("database storage is not configured"));
    }

    info!(queries = queries.len(), max_concurrent, "batch request");
    let options = RunOptions {
        store: request.store_to_db,
        debug: request.debug,
    };
    Ok(Json(
        state
            .orchestrator
            .run_batch(queries, max_concurrent, options)
            .await,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use axum::body::Body;
    use axum::http::Request;
    use pricewatch::renderer::StaticContext;
    use pricewatch::{ExtractorConfig, MemoryStore, PageExtractor, RecordSynchronizer, RenderContext, Renderer};
    use tower::ServiceExt;

    const SALES: &str = r#"<html><body><ul>
        <li class="s-item"><span class="s-item__price">$150.00</span></li>
        <li class="s-item"><span class="s-item__price">$162.50</span></li>
        <li class="s-item"><span class="s-item__price">$175.00</span></li>
    </ul></body></html>"#;

    struct FixtureRenderer;

    #[async_trait]
    impl Renderer for FixtureRenderer {
        async fn new_context(&self) -> anyhow::Result<Box<dyn RenderContext>> {
            Ok(Box::new(StaticContext::from_html(SALES)))
        }

        fn name(&self) -> &'static str {
            "fixture"
        }
    }

    fn app(with_store: bool) -> Router {
        let extractor = PageExtractor::new(ExtractorConfig {
            market_url: "https://market.test/sch/i.html".to_string(),
            wait_timeout_ms: 10,
            ..ExtractorConfig::default()
        });
        let mut orchestrator = BatchOrchestrator::new(Arc::new(FixtureRenderer), extractor);
        if with_store {
            orchestrator = orchestrator.with_synchronizer(RecordSynchronizer::new(Arc::new(MemoryStore::new())));
        }
        router(Arc::new(AppState { orchestrator }))
    }

    async fn body_json(resp: Response) -> Value {
        let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn get(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    fn post_json(uri: &str, body: Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn test_health_reports_storage_feature() {
        let resp = app(false).oneshot(get("/health")).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let body = body_json(resp).await;
        assert_eq!(body["status"], "healthy");
        assert_eq!(body["features"]["database_storage"], false);
        assert_eq!(body["features"]["batch_scrape"], true);

        let body = body_json(app(true).oneshot(get("/health")).await.unwrap()).await;
        assert_eq!(body["features"]["database_storage"], true);
    }

    #[tokio::test]
    async fn test_scrape_returns_statistics() {
        let resp = app(false)
            .oneshot(get("/scrape?query=Charizard%20PSA%2010"))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let body = body_json(resp).await;
        assert_eq!(body["query"], "Charizard PSA 10");
        assert_eq!(body["price_count"], 3);
        assert_eq!(body["average"], 162.5);
        assert_eq!(body["sync_status"], "not_requested");
        assert!(body.get("debug").is_none());
    }

    #[tokio::test]
    async fn test_scrape_with_store_and_debug() {
        let resp = app(true)
            .oneshot(get("/scrape?query=Pikachu&store_to_db=true&debug=true"))
            .await
            .unwrap();
        let body = body_json(resp).await;
        assert_eq!(body["sync_status"], "success");
        assert_eq!(body["storage_result"]["entries_inserted"], 3);
        assert_eq!(body["storage_result"]["card_created"], true);
        assert!(body["debug"]["attempts"].is_array());
    }

    #[tokio::test]
    async fn test_scrape_rejects_blank_query() {
        let resp = app(false).oneshot(get("/scrape?query=%20%20")).await.unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_store_without_credentials_is_unavailable() {
        let resp = app(false)
            .oneshot(get("/scrape?query=Pikachu&store_to_db=true"))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn test_batch_returns_summary() {
        let resp = app(false)
            .oneshot(post_json(
                "/scrape_batch",
                json!({"queries": ["Charizard PSA 10", "Pikachu PSA 9"], "max_concurrent": 2}),
            ))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let body = body_json(resp).await;
        assert_eq!(body["batch_summary"]["total_queries"], 2);
        assert_eq!(body["batch_summary"]["successful"], 2);
        assert_eq!(body["batch_summary"]["total_prices_found"], 6);
        assert_eq!(body["batch_summary"]["max_concurrent"], 2);
        assert_eq!(body["results"][1]["query"], "Pikachu PSA 9");
        assert_eq!(body["results"][1]["status"], "success");
    }

    #[tokio::test]
    async fn test_batch_validation() {
        let too_many: Vec<String> = (0..21).map(|i| format!("Card {i}")).collect();
        let resp = app(false)
            .oneshot(post_json("/scrape_batch", json!({ "queries": too_many })))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

        let resp = app(false)
            .oneshot(post_json(
                "/scrape_batch",
                json!({"queries": ["A"], "max_concurrent": 6}),
            ))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        let body = body_json(resp).await;
        assert!(body["error"].as_str().unwrap().contains("max_concurrent"));
    }
}
