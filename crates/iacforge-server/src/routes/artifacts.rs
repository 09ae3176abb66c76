//! Artifact routes: `/artifacts/*`
//!
//! Upload diagrams or code as raw bodies and fetch job results.

use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Serialize;

use iacforge_core::artifact::ArtifactKind;

use crate::error::AppError;
use crate::state::AppState;

const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";

/// Build the `/artifacts` router.
pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/", post(upload_artifact))
        .route("/{id}", get(get_artifact))
}

// ── Request / Response types ─────────────────────────────────────────

#[derive(Debug, Serialize)]
pub struct UploadResponse {
    pub artifact_id: String,
    pub kind: ArtifactKind,
    pub size: u64,
}

// ── Handlers ─────────────────────────────────────────────────────────

/// Store the raw request body. The kind is inferred from `Content-Type`.
async fn upload_artifact(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<(StatusCode, Json<UploadResponse>), AppError> {
    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or(DEFAULT_CONTENT_TYPE);
    let kind = ArtifactKind::infer(content_type);

    let meta = state.artifacts.put(kind, content_type, &body).await?;

    Ok((
        StatusCode::CREATED,
        Json(UploadResponse {
            artifact_id: meta.id,
            kind: meta.kind,
            size: meta.size,
        }),
    ))
}

/// Return the artifact bytes with their stored content type.
async fn get_artifact(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Response, AppError> {
    let (meta, content) = state.artifacts.get(&id).await?;
    let content_type = HeaderValue::from_str(&meta.content_type)
        .unwrap_or_else(|_| HeaderValue::from_static(DEFAULT_CONTENT_TYPE));

    Ok((
        [
            (header::CONTENT_TYPE, content_type),
            (
                header::HeaderName::from_static("x-artifact-kind"),
                HeaderValue::from_static(meta.kind.as_str()),
            ),
        ],
        content,
    )
        .into_response())
}
