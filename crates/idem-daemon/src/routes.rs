//! Axum router and all HTTP handlers for idem-daemon.
//!
//! `build_router` is the single entry point; `main.rs` calls it and attaches
//! the HTTP trace layer. Request-ID propagation is part of the router itself
//! so tests see the same headers a client does.

use std::sync::Arc;

use axum::{
    extract::{
        rejection::{JsonRejection, PathRejection},
        Path, State,
    },
    http::{HeaderMap, StatusCode},
    middleware,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use idem_core::{OrderError, OrderRequest, PostCommitFault};
use tracing::{error, warn};
use uuid::Uuid;

use crate::{
    api_types::{ErrorResponse, HealthResponse, OrderResponse},
    request_id,
    state::AppState,
};

pub const IDEMPOTENCY_KEY_HEADER: &str = "idempotency-key";
pub const FAIL_AFTER_COMMIT_HEADER: &str = "x-debug-fail-after-commit";

// ---------------------------------------------------------------------------
// Router
// ---------------------------------------------------------------------------

/// Build the complete application router wired to the given shared state.
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/v1/health", get(health))
        .route("/v1/orders", post(create_order))
        .route("/v1/orders/:order_id", get(read_order))
        .layer(middleware::from_fn(request_id::propagate_request_id))
        .with_state(state)
}

// ---------------------------------------------------------------------------
// GET /v1/health
// ---------------------------------------------------------------------------

pub(crate) async fn health(State(st): State<Arc<AppState>>) -> impl IntoResponse {
    (
        StatusCode::OK,
        Json(HealthResponse {
            ok: true,
            service: st.build.service.to_string(),
            version: st.build.version.to_string(),
        }),
    )
}

// ---------------------------------------------------------------------------
// POST /v1/orders
// ---------------------------------------------------------------------------

/// Create an order exactly once per idempotency key.
///
/// - 201 with the order on first success, and the identical body on replay.
/// - 400 when the `Idempotency-Key` header is missing or blank.
/// - 409 when the key was already used with a different payload.
/// - 422 when the payload is invalid.
/// - 500 when the commit unit aborted (nothing persisted), or with an empty
///   body when the post-commit fault fired (everything persisted).
pub(crate) async fn create_order(
    State(st): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Result<Json<OrderRequest>, JsonRejection>,
) -> Response {
    let Some(key) = idempotency_key(&headers) else {
        return (
            StatusCode::BAD_REQUEST,
            Json(ErrorResponse::new("missing Idempotency-Key header")),
        )
            .into_response();
    };

    let Json(request) = match body {
        Ok(body) => body,
        Err(rejection) => {
            return (rejection.status(), Json(ErrorResponse::new(rejection.body_text())))
                .into_response();
        }
    };

    let fault = fault_directive(&st, &headers);

    match idem_core::create_order(st.store.as_ref(), &key, &request, fault).await {
        Ok(created) => {
            let status = StatusCode::from_u16(created.response_status).unwrap_or(StatusCode::CREATED);
            (status, Json(OrderResponse::from(&created.order))).into_response()
        }
        Err(err) => order_error_response(err),
    }
}

// ---------------------------------------------------------------------------
// GET /v1/orders/:order_id
// ---------------------------------------------------------------------------

pub(crate) async fn read_order(
    State(st): State<Arc<AppState>>,
    order_id: Result<Path<Uuid>, PathRejection>,
) -> Response {
    let Path(order_id) = match order_id {
        Ok(p) => p,
        Err(rejection) => {
            return (
                StatusCode::BAD_REQUEST,
                Json(ErrorResponse::new(rejection.body_text())),
            )
                .into_response();
        }
    };

    match idem_core::get_order(st.store.as_ref(), order_id).await {
        Ok(order) => (StatusCode::OK, Json(OrderResponse::from(&order))).into_response(),
        Err(err) => order_error_response(err),
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn idempotency_key(headers: &HeaderMap) -> Option<String> {
    headers
        .get(IDEMPOTENCY_KEY_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|k| !k.is_empty())
        .map(str::to_string)
}

/// The fault header only counts when the daemon was started with fault
/// injection enabled.
fn fault_directive(st: &AppState, headers: &HeaderMap) -> PostCommitFault {
    let requested = headers
        .get(FAIL_AFTER_COMMIT_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.trim().eq_ignore_ascii_case("true"))
        .unwrap_or(false);

    if requested && !st.fault_injection {
        warn!("post-commit fault requested but fault injection is disabled; ignoring");
        return PostCommitFault::None;
    }
    PostCommitFault::from_flag(requested)
}

fn order_error_response(err: OrderError) -> Response {
    match err {
        OrderError::InvalidPayload(msg) => (
            StatusCode::UNPROCESSABLE_ENTITY,
            Json(ErrorResponse::new(msg)),
        )
            .into_response(),
        OrderError::KeyConflict { key } => (
            StatusCode::CONFLICT,
            Json(ErrorResponse {
                error: "idempotency key reused with a different payload".to_string(),
                idempotency_key: Some(key),
            }),
        )
            .into_response(),
        OrderError::NotFound { .. } => (
            StatusCode::NOT_FOUND,
            Json(ErrorResponse::new("order not found")),
        )
            .into_response(),
        // Rows stand; the client is expected to retry with the same key.
        OrderError::SimulatedPostCommitFault { .. } => {
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
        OrderError::TransactionAbort(_) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(ErrorResponse::new("order transaction aborted; nothing was persisted")),
        )
            .into_response(),
        OrderError::Storage(e) => {
            let detail = format!("{e:#}");
            error!(error = %detail, "storage read failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ErrorResponse::new("internal server error")),
            )
                .into_response()
        }
    }
}
