//! Compliance standard listing: `/standards`

use std::sync::Arc;

use axum::routing::get;
use axum::{Json, Router};
use serde::Serialize;

use iacforge_core::compliance::{STANDARDS, StandardSummary};

use crate::state::AppState;

/// Build the `/standards` router.
pub fn router() -> Router<Arc<AppState>> {
    Router::new().route("/", get(list_standards))
}

#[derive(Debug, Serialize)]
pub struct StandardListResponse {
    pub standards: Vec<StandardSummary>,
}

async fn list_standards() -> Json<StandardListResponse> {
    Json(StandardListResponse {
        standards: STANDARDS.iter().map(|s| s.summary()).collect(),
    })
}
