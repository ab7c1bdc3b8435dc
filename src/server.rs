//! HTTP server for research and heatseek turns.
//!
//! Each request is one user turn; all session state lives in the collection
//! store, so requests for different collections are independent.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `POST` | `/research` | Run a research command (text or structured) |
//! | `POST` | `/heatseek` | Start or continue a heatseek session |
//! | `GET`  | `/collections` | List collections and their kind |
//! | `GET`  | `/health` | Health check (returns version) |
//!
//! # Requests
//!
//! ```json
//! { "collection": "rr-best-hiking-trails", "message": "/research more 2" }
//! { "collection": "rr-best-hiking-trails", "command": { "command": "view", "target": "base" } }
//! { "query": "who designed the first transistor radio" }
//! ```
//!
//! A `message` may also be a `/research heatseek ...` command. Malformed
//! commands and "nothing to do" conditions are normal replies with guidance
//! text.
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "upstream_error", "message": "Apologies, ..." } }
//! ```
//!
//! Error codes: `bad_request` (400), `upstream_error` (502), `format_error`
//! (502), `store_error` (500), `internal` (500).

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};

use research_harness_core::command::{parse_command, Command, ResearchCommand};
use research_harness_core::error::ResearchError;
use research_harness_core::store::{CollectionStore, CollectionSummary};

use crate::config::Config;
use crate::heatseek::HeatseekController;
use crate::research::ResearchController;
use crate::services::{Reply, Services};

/// Shared application state passed to all route handlers.
#[derive(Clone)]
struct AppState {
    research: Arc<ResearchController>,
    heatseek: Arc<HeatseekController>,
    store: Arc<dyn CollectionStore>,
}

/// Starts the HTTP server on `[server].bind` and runs until the process ends.
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    let services = Services::from_config(config).await?;
    let app = router(services, config);

    let bind_addr = config.server.bind.clone();
    tracing::info!(bind = %bind_addr, "research server listening");
    println!("Research server listening on http://{}", bind_addr);

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

/// Build the router over the given collaborators.
pub fn router(services: Services, config: &Config) -> Router {
    let state = AppState {
        store: services.store.clone(),
        research: Arc::new(ResearchController::new(services.clone(), config)),
        heatseek: Arc::new(HeatseekController::new(services, config)),
    };

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/research", post(handle_research))
        .route("/heatseek", post(handle_heatseek))
        .route("/collections", get(handle_collections))
        .route("/health", get(handle_health))
        .layer(cors)
        .with_state(state)
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

/// Internal error type that converts into an Axum HTTP response.
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

/// Map a turn failure to a status and code. The message is the user-facing
/// text; the full error goes to the log.
fn classify_research_error(err: ResearchError) -> AppError {
    let (status, code) = match &err {
        ResearchError::Upstream { .. } => (StatusCode::BAD_GATEWAY, "upstream_error"),
        ResearchError::Format { .. } => (StatusCode::BAD_GATEWAY, "format_error"),
        ResearchError::Store(_) => (StatusCode::INTERNAL_SERVER_ERROR, "store_error"),
        ResearchError::Invariant(_) | ResearchError::Serde(_) => {
            (StatusCode::INTERNAL_SERVER_ERROR, "internal")
        }
    };
    if err.is_fatal() {
        tracing::error!(error = ?err, "turn failed");
    } else {
        tracing::warn!(error = ?err, "turn failed");
    }
    AppError {
        status,
        code,
        message: err.user_message(),
    }
}

// ============ GET /health ============

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}

async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

// ============ GET /collections ============

#[derive(Serialize)]
struct CollectionsResponse {
    collections: Vec<CollectionSummary>,
}

async fn handle_collections(
    State(state): State<AppState>,
) -> Result<Json<CollectionsResponse>, AppError> {
    let collections = state
        .store
        .list()
        .await
        .map_err(|e| classify_research_error(ResearchError::store(e)))?;
    Ok(Json(CollectionsResponse { collections }))
}

// ============ POST /research ============

#[derive(Debug, Deserialize)]
struct ResearchRequest {
    #[serde(default)]
    collection: Option<String>,
    /// Chat-style command text, e.g. `/research iterate 2`.
    #[serde(default)]
    message: Option<String>,
    /// Structured command; used when `message` is absent.
    #[serde(default)]
    command: Option<ResearchCommand>,
}

async fn handle_research(
    State(state): State<AppState>,
    Json(req): Json<ResearchRequest>,
) -> Result<Json<Reply>, AppError> {
    let collection = req.collection.as_deref();
    let command = match (req.message, req.command) {
        (Some(text), _) => match parse_command(&text) {
            Ok(command) => command,
            Err(guidance) => return Ok(Json(Reply::message(guidance))),
        },
        (None, Some(command)) => Command::Research(command),
        (None, None) => return Err(bad_request("request needs a message or a command")),
    };

    let result = match command {
        Command::Research(command) => state.research.handle(collection, command).await,
        Command::Heatseek { query } => state.heatseek.handle(collection, query).await,
    };
    result.map(Json).map_err(classify_research_error)
}

// ============ POST /heatseek ============

#[derive(Debug, Deserialize)]
struct HeatseekRequest {
    #[serde(default)]
    collection: Option<String>,
    /// New question; omit to continue the session in `collection`.
    #[serde(default)]
    query: Option<String>,
}

async fn handle_heatseek(
    State(state): State<AppState>,
    Json(req): Json<HeatseekRequest>,
) -> Result<Json<Reply>, AppError> {
    if req.collection.is_none() && req.query.is_none() {
        return Err(bad_request("request needs a query or a collection"));
    }
    state
        .heatseek
        .handle(req.collection.as_deref(), req.query)
        .await
        .map(Json)
        .map_err(classify_research_error)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_classification() {
        let err = classify_research_error(ResearchError::upstream(
            "web search",
            anyhow::anyhow!("HTTP 503"),
        ));
        assert_eq!(err.status, StatusCode::BAD_GATEWAY);
        assert_eq!(err.code, "upstream_error");
        assert!(err.message.contains("web search"));

        let err = classify_research_error(ResearchError::Invariant("bad counts".into()));
        assert_eq!(err.status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(err.code, "internal");
        assert!(!err.message.contains("bad counts"));
    }

    #[test]
    fn test_research_request_shapes() {
        let req: ResearchRequest =
            serde_json::from_str(r#"{"collection":"rr-x","message":"/research more"}"#).unwrap();
        assert_eq!(req.message.as_deref(), Some("/research more"));
        let req: ResearchRequest =
            serde_json::from_str(r#"{"command":{"command":"auto","num_iterations":3}}"#).unwrap();
        assert_eq!(
            req.command,
            Some(ResearchCommand::Auto { num_iterations: 3 })
        );
    }
}
