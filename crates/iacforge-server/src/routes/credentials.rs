//! Credential routes: `/credentials/*`
//!
//! Register cloud credentials for cost analysis, test them without storing,
//! and revoke handles. Responses never echo secret material.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{delete, post};
use axum::{Json, Router};
use serde::Serialize;
use tracing::info;

use iacforge_core::cost::provider::Identity;
use iacforge_core::credential::{ConnectRequest, Connected};

use crate::error::AppError;
use crate::state::AppState;

/// Build the `/credentials` router.
pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/", post(connect))
        .route("/test", post(test_connection))
        .route("/{handle}", delete(revoke))
}

// ── Request / Response types ─────────────────────────────────────────

#[derive(Debug, Serialize)]
pub struct TestResponse {
    pub identity: Identity,
}

// ── Handlers ─────────────────────────────────────────────────────────

/// Validate a credential and issue a handle for it.
async fn connect(
    State(state): State<Arc<AppState>>,
    Json(body): Json<ConnectRequest>,
) -> Result<(StatusCode, Json<Connected>), AppError> {
    let connected = state.credentials.connect(body).await?;
    info!(
        account = %connected.identity.account,
        persisted = connected.persisted,
        "credential connected via API"
    );
    Ok((StatusCode::CREATED, Json(connected)))
}

/// Validate a credential without keeping it.
async fn test_connection(
    State(state): State<Arc<AppState>>,
    Json(body): Json<ConnectRequest>,
) -> Result<Json<TestResponse>, AppError> {
    let identity = state.credentials.test_connection(&body).await?;
    Ok(Json(TestResponse { identity }))
}

async fn revoke(
    State(state): State<Arc<AppState>>,
    Path(handle): Path<String>,
) -> Result<StatusCode, AppError> {
    state.credentials.revoke(&handle).await?;
    Ok(StatusCode::NO_CONTENT)
}
