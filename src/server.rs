//! REST layer over the hybrid classifier

use axum::{
    extract::{rejection::JsonRejection, State},
    http::{HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use serde::Deserialize;
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tracing::{info, warn};

use crate::config::ServerConfig;
use crate::error::Result;
use crate::hybrid::HybridClassifier;
use crate::models::{ClassificationResult, EmailRecord, ServiceStatus};
use crate::stats::get_classification_stats;

#[derive(Clone)]
pub struct AppState {
    pub classifier: Arc<HybridClassifier>,
}

/// Body of `POST /api/classification/batch`
#[derive(Debug, Deserialize)]
pub struct BatchRequest {
    pub emails: Vec<EmailRecord>,
    #[serde(default)]
    pub batch_size: Option<usize>,
}

/// JSON error body: `{"error": "..."}`
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self::new(rejection.status(), rejection.body_text())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(json!({ "error": self.message }))).into_response()
    }
}

type ApiResult<T> = std::result::Result<Json<T>, ApiError>;

pub fn router(state: AppState, cors_origins: &[String]) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/api/health", get(health))
        .route("/api/ping", get(ping))
        .route("/api/classification/status", get(status))
        .route("/api/classification/classify", post(classify))
        .route("/api/classification/batch", post(classify_batch))
        .route("/api/classification/stats", post(stats))
        .fallback(not_found)
        .layer(cors_layer(cors_origins))
        .with_state(state)
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    let allow_origin = if origins.iter().any(|o| o == "*") {
        AllowOrigin::from(Any)
    } else {
        let values: Vec<HeaderValue> = origins
            .iter()
            .filter_map(|origin| match HeaderValue::from_str(origin) {
                Ok(value) => Some(value),
                Err(_) => {
                    warn!(origin = %origin, "Ignoring invalid CORS origin");
                    None
                }
            })
            .collect();
        AllowOrigin::list(values)
    };

    CorsLayer::new()
        .allow_origin(allow_origin)
        .allow_methods(Any)
        .allow_headers(Any)
}

/// Bind and serve until Ctrl-C
pub async fn serve(classifier: Arc<HybridClassifier>, config: &ServerConfig) -> Result<()> {
    let app = router(AppState { classifier }, &config.cors_origins);

    let listener = tokio::net::TcpListener::bind((config.host.as_str(), config.port)).await?;
    let addr: SocketAddr = listener.local_addr()?;
    info!("Listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("Shutting down");
            }
        })
        .await?;
    Ok(())
}

async fn index() -> Json<Value> {
    Json(json!({
        "message": "Email triage classification API",
        "version": env!("CARGO_PKG_VERSION"),
        "endpoints": {
            "health": "/api/health",
            "ping": "/api/ping",
            "status": "/api/classification/status",
            "classify": "/api/classification/classify",
            "batch": "/api/classification/batch",
            "stats": "/api/classification/stats"
        }
    }))
}

async fn health() -> Json<Value> {
    Json(json!({
        "status": "healthy",
        "message": "Email triage API is running",
        "version": env!("CARGO_PKG_VERSION"),
        "timestamp": Utc::now().to_rfc3339(),
    }))
}

async fn ping() -> Json<Value> {
    Json(json!({
        "status": "pong",
        "message": "Server is awake",
        "timestamp": Utc::now().to_rfc3339(),
    }))
}

async fn status(State(state): State<AppState>) -> Json<ServiceStatus> {
    Json(state.classifier.get_status().await)
}

async fn classify(
    State(state): State<AppState>,
    payload: std::result::Result<Json<EmailRecord>, JsonRejection>,
) -> ApiResult<ClassificationResult> {
    let Json(record) = payload?;
    Ok(Json(state.classifier.classify_email(&record).await))
}

async fn classify_batch(
    State(state): State<AppState>,
    payload: std::result::Result<Json<BatchRequest>, JsonRejection>,
) -> ApiResult<Value> {
    let Json(request) = payload?;
    let batch_size = request
        .batch_size
        .unwrap_or_else(|| state.classifier.default_batch_size());
    if batch_size == 0 {
        return Err(ApiError::new(
            StatusCode::BAD_REQUEST,
            "batch_size must be at least 1",
        ));
    }

    info!(emails = request.emails.len(), batch_size, "Batch classification requested");
    let results = state.classifier.classify_batch(&request.emails, batch_size).await;
    let stats = get_classification_stats(&results);

    Ok(Json(json!({ "results": results, "stats": stats })))
}

async fn stats(
    payload: std::result::Result<Json<Vec<ClassificationResult>>, JsonRejection>,
) -> ApiResult<Value> {
    let Json(results) = payload?;
    Ok(Json(serde_json::to_value(get_classification_stats(&results)).map_err(
        |e| ApiError::new(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
    )?))
}

async fn not_found() -> ApiError {
    ApiError::new(StatusCode::NOT_FOUND, "Resource not found")
}
