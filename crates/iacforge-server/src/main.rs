//! iacforge server entry point.
//!
//! Bootstraps the storage backend and the core engines, then starts the Axum
//! HTTP server with graceful shutdown. A background worker sweeps expired
//! credentials alongside the server and is cancelled on shutdown; the job
//! dispatcher drains in-flight jobs before the process exits.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{info, warn};

use iacforge_core::credential::CredentialManager;
use iacforge_storage::{MemoryBackend, StorageBackend};

use iacforge_server::config::{ServerConfig, StorageBackendType};
use iacforge_server::{Assembled, build_app_state, build_router, hardening};

/// Retries inside one sweep before giving up until the next tick.
const SWEEP_MAX_RETRIES: u32 = 2;

/// How long shutdown waits for background tasks.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = ServerConfig::from_env();

    // Runs before logging is initialized, so warnings go to stderr.
    apply_hardening(&config);

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.log_level)),
        )
        .json()
        .init();

    info!(
        bind_addr = %config.bind_addr,
        storage = ?config.storage_backend,
        cloud_provider = ?config.cloud_provider,
        queue_capacity = config.queue_capacity,
        max_concurrent_jobs = config.max_concurrent_jobs,
        job_timeout_secs = config.job_timeout.as_secs(),
        "starting iacforge server"
    );

    let storage = open_storage(&config)?;
    let Assembled { state, dispatcher } = build_app_state(&config, storage).await?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let sweeper_handle = {
        let credentials = Arc::clone(&state.credentials);
        let mut rx = shutdown_rx.clone();
        let interval_secs = config.credential_sweep_interval_secs;
        tokio::spawn(async move {
            credential_sweep_worker(credentials, &mut rx, interval_secs).await;
        })
    };

    let executor = Arc::clone(&state.executor);
    let app = build_router(state);

    let listener = TcpListener::bind(config.bind_addr)
        .await
        .with_context(|| format!("failed to bind to {}", config.bind_addr))?;

    info!(addr = %config.bind_addr, "iacforge server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(shutdown_tx))
        .await
        .context("server error")?;

    info!("waiting for in-flight jobs and background workers to stop");
    executor.shutdown();
    if tokio::time::timeout(SHUTDOWN_GRACE, dispatcher).await.is_err() {
        warn!(
            grace_secs = SHUTDOWN_GRACE.as_secs(),
            "job dispatcher did not drain in time"
        );
    }
    let _ = tokio::time::timeout(SHUTDOWN_GRACE, sweeper_handle).await;

    info!("iacforge server stopped");
    Ok(())
}

/// Open the configured storage backend.
fn open_storage(config: &ServerConfig) -> anyhow::Result<Arc<dyn StorageBackend>> {
    let storage: Arc<dyn StorageBackend> = match &config.storage_backend {
        StorageBackendType::Memory => {
            info!("using in-memory storage (data will not persist)");
            Arc::new(MemoryBackend::new())
        }
        #[cfg(feature = "rocksdb-backend")]
        StorageBackendType::RocksDb { path } => {
            info!(path = %path, "using RocksDB storage");
            Arc::new(
                iacforge_storage::RocksDbBackend::open(path)
                    .context("failed to open RocksDB storage")?,
            )
        }
        #[cfg(not(feature = "rocksdb-backend"))]
        StorageBackendType::RocksDb { .. } => {
            anyhow::bail!("RocksDB backend requested but feature 'rocksdb-backend' is not enabled");
        }
    };
    Ok(storage)
}

/// Periodically drop expired credential handles until shutdown.
async fn credential_sweep_worker(
    credentials: Arc<CredentialManager>,
    shutdown: &mut watch::Receiver<bool>,
    interval_secs: u64,
) {
    let mut interval = tokio::time::interval(Duration::from_secs(interval_secs));
    let mut consecutive_failures: u32 = 0;
    info!(interval_secs, "credential sweep worker started");

    loop {
        tokio::select! {
            _ = interval.tick() => {
                match retry_sweep(&credentials, shutdown).await {
                    Ok(None) => {
                        info!("credential sweep worker shutting down");
                        return;
                    }
                    Ok(Some(purged)) => {
                        consecutive_failures = 0;
                        if purged > 0 {
                            info!(purged, "expired credentials purged");
                        }
                    }
                    Err(last_err) => {
                        consecutive_failures = consecutive_failures.saturating_add(1);
                        if consecutive_failures >= 5 {
                            tracing::error!(
                                error = %last_err,
                                consecutive_failures,
                                "credential sweep persistently failing, storage may be down"
                            );
                        } else {
                            warn!(
                                error = %last_err,
                                consecutive_failures,
                                retries = SWEEP_MAX_RETRIES,
                                "credential sweep failed after retries, will retry next tick"
                            );
                        }
                    }
                }
            }
            _ = shutdown.changed() => {
                info!("credential sweep worker shutting down");
                return;
            }
        }
    }
}

/// Run `purge_expired()` with exponential backoff. Returns:
/// - `Ok(Some(count))` on success
/// - `Ok(None)` if shutdown was signalled during retry
/// - `Err(last_error)` if all retries failed
async fn retry_sweep(
    credentials: &CredentialManager,
    shutdown: &mut watch::Receiver<bool>,
) -> Result<Option<usize>, String> {
    let mut last_err = String::new();

    for attempt in 0..=SWEEP_MAX_RETRIES {
        match credentials.purge_expired().await {
            Ok(purged) => return Ok(Some(purged)),
            Err(e) => {
                last_err = e.to_string();
                if attempt == SWEEP_MAX_RETRIES {
                    break;
                }

                // 1s, 2s, ...
                let backoff = Duration::from_secs(1u64 << attempt);
                tracing::debug!(
                    attempt = attempt.saturating_add(1),
                    max = SWEEP_MAX_RETRIES.saturating_add(1),
                    backoff_ms = u64::try_from(backoff.as_millis()).unwrap_or(u64::MAX),
                    error = %e,
                    "credential sweep failed, retrying"
                );

                tokio::select! {
                    () = tokio::time::sleep(backoff) => {}
                    _ = shutdown.changed() => {
                        return Ok(None);
                    }
                }
            }
        }
    }

    Err(last_err)
}

/// Wait for SIGINT or SIGTERM, then broadcast shutdown.
async fn shutdown_signal(shutdown_tx: watch::Sender<bool>) {
    let ctrl_c = async {
        tokio::signal::ctrl_c().await.ok();
    };

    #[cfg(unix)]
    let terminate = async {
        if let Ok(mut sig) =
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
        {
            sig.recv().await;
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }

    info!("shutdown signal received, stopping server");
    let _ = shutdown_tx.send(true);
}

/// Apply process hardening before logging is initialized.
#[allow(clippy::print_stderr)]
fn apply_hardening(config: &ServerConfig) {
    if config.disable_mlock {
        eprintln!(
            "WARNING: mlock disabled via IACFORGE_DISABLE_MLOCK, credentials may be swapped to disk"
        );
    }
    for failure in hardening::harden(!config.disable_mlock) {
        eprintln!("WARNING: {failure}");
    }
}
