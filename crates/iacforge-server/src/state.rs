//! Shared application state for the iacforge server.
//!
//! A single [`AppState`] is constructed at startup and shared across all
//! Axum handlers via `Arc`.

use std::sync::Arc;

use iacforge_core::artifact::ArtifactStore;
use iacforge_core::credential::CredentialManager;
use iacforge_core::executor::Executor;

/// Shared application state passed to all HTTP handlers.
pub struct AppState {
    /// Job queue and worker pool.
    pub executor: Arc<Executor>,
    /// Content-addressed artifact storage.
    pub artifacts: Arc<ArtifactStore>,
    /// Credential handles and their secrets.
    pub credentials: Arc<CredentialManager>,
    /// Largest accepted request body in bytes.
    pub max_upload_bytes: usize,
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState")
            .field("max_upload_bytes", &self.max_upload_bytes)
            .finish_non_exhaustive()
    }
}
