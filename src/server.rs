//! HTTP boundary.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `POST` | `/ask` | Answer a question, streamed as `text/plain` |
//! | `GET`  | `/health` | Health check (returns version) |
//! | `GET`  | `/` | Welcome message |
//!
//! # Error Contract
//!
//! Failures detected before the first byte of the answer are reported as
//! JSON:
//!
//! ```json
//! { "error": { "code": "validation", "message": "invalid input: query must not be empty" } }
//! ```
//!
//! | Class | Status | Code |
//! |-------|--------|------|
//! | validation | 400 | `validation` |
//! | upstream unavailable | 503 | `upstream_unavailable` |
//! | internal | 500 | `internal` |
//!
//! Internal error details are logged, never returned. A failure after
//! streaming has begun aborts the chunked body, so the client sees a
//! truncated response.
//!
//! # Cancellation
//!
//! When a client disconnects, hyper drops the response body, which drops
//! the [`FragmentStream`](crate::stream::FragmentStream) and stops the
//! provider read.
//!
//! # CORS
//!
//! All origins, methods, and headers are permitted.

use std::sync::Arc;

use axum::{
    body::Body,
    extract::{rejection::JsonRejection, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use futures_util::StreamExt;
use serde::{Deserialize, Serialize};
use tower_http::cors::{Any, CorsLayer};
use tracing::{error, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::config::Config;
use crate::error::{ErrorClass, RagError};
use crate::orchestrator::AnswerOrchestrator;

#[derive(Clone)]
struct AppState {
    orchestrator: Arc<AnswerOrchestrator>,
}

/// Build the router. Exposed separately from [`serve`] so tests can mount
/// it on their own listener.
pub fn router(orchestrator: Arc<AnswerOrchestrator>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/", get(handle_root))
        .route("/ask", post(handle_ask))
        .route("/health", get(handle_health))
        .layer(cors)
        .with_state(AppState { orchestrator })
}

/// Serve on an already-bound listener until the process is stopped.
pub async fn serve(
    listener: tokio::net::TcpListener,
    orchestrator: Arc<AnswerOrchestrator>,
) -> anyhow::Result<()> {
    axum::serve(listener, router(orchestrator)).await?;
    Ok(())
}

/// Starts the HTTP server.
///
/// Builds the production pipeline from `config`, binds to
/// `[server].bind` and runs until Ctrl-C.
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    let orchestrator = Arc::new(AnswerOrchestrator::from_config(config).await?);

    let listener = tokio::net::TcpListener::bind(&config.server.bind).await?;
    info!(
        addr = %listener.local_addr()?,
        backend = %config.store.backend,
        model = %config.provider.chat_model,
        "server listening"
    );

    axum::serve(listener, router(orchestrator))
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("shutdown signal received");
        })
        .await?;

    Ok(())
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: &'static str,
    message: String,
}

struct AppError {
    status: StatusCode,
    code: &'static str,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code,
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

impl From<RagError> for AppError {
    fn from(err: RagError) -> Self {
        match err.class() {
            ErrorClass::Validation => AppError {
                status: StatusCode::BAD_REQUEST,
                code: "validation",
                message: err.to_string(),
            },
            ErrorClass::UpstreamUnavailable => {
                warn!(error = %err, "upstream unavailable");
                AppError {
                    status: StatusCode::SERVICE_UNAVAILABLE,
                    code: "upstream_unavailable",
                    message: err.to_string(),
                }
            }
            ErrorClass::Internal => {
                error!(error = %err, "internal error");
                AppError {
                    status: StatusCode::INTERNAL_SERVER_ERROR,
                    code: "internal",
                    message: "internal server error".to_string(),
                }
            }
        }
    }
}

impl From<JsonRejection> for AppError {
    fn from(rejection: JsonRejection) -> Self {
        AppError {
            status: StatusCode::BAD_REQUEST,
            code: "validation",
            message: rejection.body_text(),
        }
    }
}

// ============ Handlers ============

#[derive(Deserialize)]
struct AskRequest {
    query: String,
}

async fn handle_ask(
    State(state): State<AppState>,
    payload: Result<Json<AskRequest>, JsonRejection>,
) -> Result<Response, AppError> {
    let request_id = Uuid::new_v4();
    let span = info_span!("ask", %request_id);

    async move {
        let Json(request) = payload?;
        let fragments = state.orchestrator.answer_query(&request.query).await?;
        info!("streaming answer");

        let body = Body::from_stream(fragments.inspect(move |item| {
            if let Err(err) = item {
                warn!(%request_id, error = %err, "answer stream aborted");
            }
        }));

        Ok::<_, AppError>(
            (
                [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
                body,
            )
                .into_response(),
        )
    }
    .instrument(span)
    .await
}

async fn handle_health() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

async fn handle_root() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "message": "Welcome to Mimir, the Mesh documentation assistant. POST /ask with {\"query\": \"...\"}.",
    }))
}
