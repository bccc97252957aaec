//! HTTP query service.
//!
//! The index, embedder, and optional recommender are loaded once at start
//! and shared read-only across requests; replacing the index means
//! rebuilding and restarting.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `POST` | `/search` | `{query, top_k?}` → `{query, results, total}` |
//! | `POST` | `/recommend` | `{query, top_k?}` → `{query, recommendation, candidates, backend}` |
//! | `GET`  | `/health` | `{status, version, documents}` |
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "bad_request", "message": "query must not be empty" } }
//! ```
//!
//! Error codes: `bad_request` (400), `unavailable` (503), `internal` (500).
//!
//! # CORS
//!
//! All origins, methods, and headers are permitted.

use axum::{
    extract::{rejection::JsonRejection, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};

use crate::config::{Config, RetrievalConfig};
use crate::embedding::Embedder;
use crate::error::Error;
use crate::generation::{create_generator, Recommender};
use crate::index::{IndexPaths, VectorIndex};
use crate::models::{Candidate, SearchHit};

/// Shared state handed to every handler.
#[derive(Clone)]
pub struct AppState {
    index: Arc<VectorIndex>,
    embedder: Embedder,
    recommender: Option<Recommender>,
    retrieval: Arc<RetrievalConfig>,
}

impl AppState {
    pub fn new(
        index: Arc<VectorIndex>,
        embedder: Embedder,
        recommender: Option<Recommender>,
        retrieval: RetrievalConfig,
    ) -> Self {
        Self {
            index,
            embedder,
            recommender,
            retrieval: Arc::new(retrieval),
        }
    }

    /// Load the persisted index and construct every provider named in config.
    pub fn from_config(config: &Config) -> anyhow::Result<Self> {
        let index = Arc::new(VectorIndex::load(&IndexPaths::from_config(&config.paths))?);
        if !config.embedding.is_enabled() {
            return Err(Error::EmbeddingDisabled.into());
        }
        let embedder = Embedder::from_config(&config.embedding)?;
        index.ensure_compatible(&embedder)?;

        let recommender = match create_generator(&config.generation)? {
            Some(generator) => Some(
                Recommender::new(index.clone(), embedder.clone(), generator)
                    .prefer_resolved(config.retrieval.prefer_resolved),
            ),
            None => {
                tracing::warn!("text generation disabled; /recommend will return 503");
                None
            }
        };

        Ok(Self::new(
            index,
            embedder,
            recommender,
            config.retrieval.clone(),
        ))
    }
}

pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/search", post(handle_search))
        .route("/recommend", post(handle_recommend))
        .route("/health", get(handle_health))
        .layer(cors)
        .with_state(state)
}

/// Bind to `[server].bind` and serve until the process is terminated.
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    let state = AppState::from_config(config)?;
    let documents = state.index.len();
    let app = router(state);

    let listener = tokio::net::TcpListener::bind(&config.server.bind).await?;
    tracing::info!(bind = %config.server.bind, documents, "query service listening");
    println!("tix server listening on http://{}", config.server.bind);

    axum::serve(listener, app).await?;
    Ok(())
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: String,
    message: String,
}

#[derive(Debug)]
struct AppError {
    status: StatusCode,
    code: &'static str,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code.to_string(),
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

fn bad_request(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::BAD_REQUEST,
        code: "bad_request",
        message: message.into(),
    }
}

fn unavailable(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::SERVICE_UNAVAILABLE,
        code: "unavailable",
        message: message.into(),
    }
}

fn internal(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::INTERNAL_SERVER_ERROR,
        code: "internal",
        message: message.into(),
    }
}

impl From<Error> for AppError {
    fn from(err: Error) -> Self {
        tracing::error!(error = %err, "request failed");
        internal(err.to_string())
    }
}

impl From<JsonRejection> for AppError {
    fn from(rejection: JsonRejection) -> Self {
        bad_request(rejection.body_text())
    }
}

// ============ Request validation ============

#[derive(Debug, Deserialize)]
struct QueryRequest {
    query: String,
    #[serde(default)]
    top_k: Option<usize>,
}

impl QueryRequest {
    fn validate(&self, retrieval: &RetrievalConfig) -> Result<(String, usize), AppError> {
        let query = self.query.trim();
        if query.is_empty() {
            return Err(bad_request("query must not be empty"));
        }
        let k = self.top_k.unwrap_or(retrieval.default_top_k);
        if k < 1 || k > retrieval.max_top_k {
            return Err(bad_request(format!(
                "top_k must be between 1 and {}",
                retrieval.max_top_k
            )));
        }
        Ok((query.to_string(), k))
    }
}

// ============ POST /search ============

#[derive(Serialize)]
struct SearchResponse {
    query: String,
    results: Vec<SearchHit>,
    total: usize,
}

async fn handle_search(
    State(state): State<AppState>,
    body: Result<Json<QueryRequest>, JsonRejection>,
) -> Result<Json<SearchResponse>, AppError> {
    let Json(req) = body?;
    let (query, k) = req.validate(&state.retrieval)?;

    let results = state.index.query(&query, &state.embedder, k).await?;
    Ok(Json(SearchResponse {
        total: results.len(),
        query,
        results,
    }))
}

// ============ POST /recommend ============

#[derive(Serialize)]
struct RecommendResponse {
    query: String,
    recommendation: String,
    candidates: Vec<Candidate>,
    backend: String,
}

async fn handle_recommend(
    State(state): State<AppState>,
    body: Result<Json<QueryRequest>, JsonRejection>,
) -> Result<Json<RecommendResponse>, AppError> {
    let Json(req) = body?;
    let recommender = state.recommender.as_ref().ok_or_else(|| {
        unavailable("text generation is disabled; set [generation] provider in config")
    })?;
    let (query, k) = req.validate(&state.retrieval)?;

    let out = recommender.recommend(&query, k).await?;
    Ok(Json(RecommendResponse {
        query,
        recommendation: out.recommendation,
        candidates: out.candidates,
        backend: out.backend,
    }))
}

// ============ GET /health ============

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
    documents: usize,
}

async fn handle_health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        documents: state.index.len(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::HashingProvider;
    use crate::generation::TextGenerator;
    use crate::models::{Document, DocumentMetadata};
    use async_trait::async_trait;
    use axum::body::Body;
    use axum::http::Request;
    use tempfile::TempDir;
    use tower::ServiceExt;

    struct Echo;

    #[async_trait]
    impl TextGenerator for Echo {
        fn backend(&self) -> String {
            "echo:test".to_string()
        }
        async fn generate(&self, _system: &str, user: &str) -> anyhow::Result<String> {
            Ok(format!("saw {} chars", user.len()))
        }
    }

    async fn state(with_generator: bool) -> AppState {
        let embedder = Embedder::new(Arc::new(HashingProvider::new(384)), 8);
        let docs = vec![
            Document {
                id: "TCKT-1".to_string(),
                text: "Issue: VPN drops - Description: disconnects".to_string(),
                metadata: DocumentMetadata {
                    ticket_id: "TCKT-1".to_string(),
                    resolved: "True".to_string(),
                    ..DocumentMetadata::default()
                },
            },
            Document {
                id: "TCKT-2".to_string(),
                text: "Issue: Printer offline - Description: no network".to_string(),
                metadata: DocumentMetadata::default(),
            },
        ];
        let index = Arc::new(VectorIndex::build(&docs, &embedder).await.unwrap());
        let recommender = with_generator
            .then(|| Recommender::new(index.clone(), embedder.clone(), Arc::new(Echo)));
        AppState::new(index, embedder, recommender, RetrievalConfig::default())
    }

    async fn call(app: Router, method: &str, uri: &str, body: &str) -> (StatusCode, serde_json::Value) {
        let response = app
            .oneshot(
                Request::builder()
                    .method(method)
                    .uri(uri)
                    .header("content-type", "application/json")
                    .body(Body::from(body.to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn search_returns_ranked_hits() {
        let app = router(state(false).await);
        let (status, json) = call(
            app,
            "POST",
            "/search",
            r#"{"query":"VPN keeps disconnecting","top_k":1}"#,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["total"], 1);
        assert_eq!(json["results"][0]["id"], "TCKT-1");
        assert_eq!(json["query"], "VPN keeps disconnecting");
    }

    #[tokio::test]
    async fn blank_query_and_bad_top_k_are_rejected() {
        let (status, json) = call(router(state(false).await), "POST", "/search", r#"{"query":"  "}"#).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(json["error"]["code"], "bad_request");

        let (status, _) = call(
            router(state(false).await),
            "POST",
            "/search",
            r#"{"query":"vpn","top_k":21}"#,
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, json) = call(router(state(false).await), "POST", "/search", "not json").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(json["error"]["code"], "bad_request");
    }

    #[tokio::test]
    async fn recommend_without_generator_is_unavailable() {
        let (status, json) = call(
            router(state(false).await),
            "POST",
            "/recommend",
            r#"{"query":"vpn"}"#,
        )
        .await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(json["error"]["code"], "unavailable");
    }

    #[tokio::test]
    async fn recommend_returns_candidates_and_backend() {
        let (status, json) = call(
            router(state(true).await),
            "POST",
            "/recommend",
            r#"{"query":"VPN keeps disconnecting","top_k":2}"#,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["backend"], "echo:test");
        assert_eq!(json["candidates"][0]["ticket_id"], "TCKT-1");
        assert_eq!(json["candidates"][0]["resolved"], true);
        assert!(json["candidates"][1]["resolved"].is_null());
        assert!(json["recommendation"].as_str().unwrap().starts_with("saw "));
    }

    #[tokio::test]
    async fn health_reports_document_count() {
        let (status, json) = call(router(state(false).await), "GET", "/health", "").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["status"], "ok");
        assert_eq!(json["documents"], 2);
    }

    #[tokio::test]
    async fn startup_rejects_embedder_of_another_width() {
        let dir = TempDir::new().unwrap();
        let mut config = Config::default();
        config.paths.output_dir = dir.path().to_path_buf();
        config.embedding.provider = "hashing".to_string();
        config.embedding.dims = Some(384);

        let built = state(false).await;
        built.index.save(&IndexPaths::from_config(&config.paths)).unwrap();
        AppState::from_config(&config).unwrap();

        config.embedding.dims = Some(128);
        let err = AppState::from_config(&config).err().unwrap();
        assert!(matches!(
            err.downcast_ref::<Error>(),
            Some(Error::DimensionMismatch {
                expected: 384,
                got: 128
            })
        ));

        config.embedding.provider = "disabled".to_string();
        let err = AppState::from_config(&config).err().unwrap();
        assert!(matches!(
            err.downcast_ref::<Error>(),
            Some(Error::EmbeddingDisabled)
        ));
    }
}
