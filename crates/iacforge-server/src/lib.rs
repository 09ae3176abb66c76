//! iacforge HTTP server.
//!
//! Wires the core engines, the storage backend and the HTTP routes into a
//! running Axum server. `main.rs` handles process concerns (hardening,
//! logging, signals); this library builds the state and the router so the
//! integration tests can drive them without a socket.

pub mod config;
pub mod error;
pub mod hardening;
pub mod routes;
pub mod state;

use std::sync::Arc;

use anyhow::Context;
use axum::Router;
use axum::extract::DefaultBodyLimit;
use axum::http::{HeaderValue, Method, header};
use tokio::task::JoinHandle;
use tower_http::cors::{Any, CorsLayer};
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::set_header::SetResponseHeaderLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use iacforge_core::artifact::ArtifactStore;
use iacforge_core::barrier::Barrier;
use iacforge_core::cost::CostAnalyzer;
use iacforge_core::cost::fixture::FixtureFactory;
use iacforge_core::cost::provider::ProviderFactory;
use iacforge_core::credential::CredentialManager;
use iacforge_core::crypto::{EncryptionKey, derive_key};
use iacforge_core::engines::Engines;
use iacforge_core::executor::Executor;
use iacforge_core::generate::Generator;
use iacforge_core::generate::diagram::HttpDiagramReader;
use iacforge_core::job_table::JobTable;
use iacforge_storage::StorageBackend;

use crate::config::{CloudProviderType, ServerConfig};
use crate::state::AppState;

/// HKDF info for the credential encryption key.
const CREDENTIAL_KEY_INFO: &[u8] = b"iacforge-credentials-v1";

/// Shared state plus the executor's dispatcher task.
pub struct Assembled {
    pub state: Arc<AppState>,
    pub dispatcher: JoinHandle<()>,
}

/// Build the provider factory named by the configuration.
fn build_factory(config: &ServerConfig) -> anyhow::Result<Arc<dyn ProviderFactory>> {
    match &config.cloud_provider {
        CloudProviderType::Fixture { path: None } => {
            info!("using built-in cloud fixture");
            Ok(Arc::new(FixtureFactory::builtin()?))
        }
        CloudProviderType::Fixture { path: Some(path) } => {
            info!(path = %path, "using cloud fixture file");
            let factory = FixtureFactory::load(std::path::Path::new(path))
                .with_context(|| format!("failed to load cloud fixture {path}"))?;
            Ok(Arc::new(factory))
        }
        #[cfg(feature = "aws")]
        CloudProviderType::Aws => {
            info!("using AWS cloud provider");
            Ok(Arc::new(iacforge_core::cost::aws::AwsFactory))
        }
        #[cfg(not(feature = "aws"))]
        CloudProviderType::Aws => {
            anyhow::bail!("AWS provider requested but the 'aws' feature is not enabled");
        }
    }
}

/// Derive the credential key from the configured master key, if any.
fn credential_key(config: &ServerConfig) -> anyhow::Result<Option<EncryptionKey>> {
    let Some(encoded) = config.credential_key.as_deref() else {
        warn!("IACFORGE_CREDENTIAL_KEY not set, credential persistence disabled");
        return Ok(None);
    };
    let master = EncryptionKey::from_base64(encoded.trim())
        .context("IACFORGE_CREDENTIAL_KEY must be 32 bytes of base64")?;
    let key = derive_key(&master, None, CREDENTIAL_KEY_INFO)?;
    Ok(Some(key))
}

/// Build the application state and start the executor.
///
/// Jobs left in flight by a previous process are failed before the
/// dispatcher starts.
///
/// # Errors
///
/// Returns an error if the fixture or key cannot be loaded, or if startup
/// recovery cannot read the job table.
pub async fn build_app_state(
    config: &ServerConfig,
    storage: Arc<dyn StorageBackend>,
) -> anyhow::Result<Assembled> {
    let retry = config.retry();

    let barrier = Arc::new(Barrier::new(Arc::clone(&storage), credential_key(config)?));
    let credentials = Arc::new(CredentialManager::new(
        build_factory(config)?,
        barrier,
        config.credential_ttl,
        retry,
    ));

    let generator = match config.diagram_service_url.as_deref() {
        Some(url) => {
            info!(url = %url, "diagram service configured");
            Generator::new(Arc::new(HttpDiagramReader::new(url, retry)))
        }
        None => Generator::default(),
    };

    let artifacts = Arc::new(ArtifactStore::new(Arc::clone(&storage)));
    let engines = Engines::new(
        generator,
        Arc::clone(&artifacts),
        Arc::clone(&credentials),
        CostAnalyzer::new(Arc::clone(&credentials), retry),
    );

    let table = Arc::new(JobTable::new(storage));
    table
        .recover()
        .await
        .context("failed to recover job table")?;

    let (executor, dispatcher) = Executor::start(
        table,
        Arc::clone(&artifacts),
        Arc::new(engines),
        config.executor(),
    );

    let state = Arc::new(AppState {
        executor,
        artifacts,
        credentials,
        max_upload_bytes: config.max_upload_bytes,
    });
    Ok(Assembled { state, dispatcher })
}

/// Build the HTTP router with all routes and middleware.
pub fn build_router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::DELETE, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE, header::ACCEPT]);

    let body_limit = state.max_upload_bytes;

    Router::new()
        .nest("/jobs", routes::jobs::router())
        .nest("/artifacts", routes::artifacts::router())
        .nest("/credentials", routes::credentials::router())
        .nest("/standards", routes::standards::router())
        .nest("/sys", routes::sys::router())
        .layer(DefaultBodyLimit::disable())
        .layer(RequestBodyLimitLayer::new(body_limit))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .layer(SetResponseHeaderLayer::overriding(
            header::X_CONTENT_TYPE_OPTIONS,
            HeaderValue::from_static("nosniff"),
        ))
        .layer(SetResponseHeaderLayer::overriding(
            header::X_FRAME_OPTIONS,
            HeaderValue::from_static("DENY"),
        ))
        .layer(SetResponseHeaderLayer::overriding(
            header::CACHE_CONTROL,
            HeaderValue::from_static("no-store"),
        ))
        .with_state(state)
}
