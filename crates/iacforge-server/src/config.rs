//! Server configuration for iacforge.
//!
//! Loads configuration from environment variables with sensible defaults.
//! All settings can be overridden via `IACFORGE_*` environment variables.

use std::net::SocketAddr;
use std::time::Duration;

use iacforge_core::executor::ExecutorConfig;
use iacforge_core::retry::RetryPolicy;

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind the HTTP listener to.
    pub bind_addr: SocketAddr,
    /// Storage backend type.
    pub storage_backend: StorageBackendType,
    /// Log level filter (e.g., `info`, `debug`, `warn`).
    pub log_level: String,
    /// Jobs that may wait for a worker.
    pub queue_capacity: usize,
    /// Jobs that may run at once.
    pub max_concurrent_jobs: usize,
    /// Time budget for one job.
    pub job_timeout: Duration,
    /// Timeout for a single upstream call.
    pub upstream_timeout: Duration,
    /// Retries after the first upstream attempt.
    pub upstream_max_retries: u32,
    /// Base64 master key for credential persistence. Never logged.
    pub credential_key: Option<String>,
    /// Lifetime cap for credential handles.
    pub credential_ttl: Duration,
    /// Seconds between expired-credential sweeps.
    pub credential_sweep_interval_secs: u64,
    /// Which cloud provider backs cost analysis.
    pub cloud_provider: CloudProviderType,
    /// Optional vision service for diagrams without an embedded graph.
    pub diagram_service_url: Option<String>,
    /// Largest accepted request body.
    pub max_upload_bytes: usize,
    /// Whether to skip `mlock` (for development without root/`CAP_IPC_LOCK`).
    pub disable_mlock: bool,
}

/// Supported storage backend types.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StorageBackendType {
    /// In-memory (development only, data lost on restart).
    Memory,
    /// `RocksDB` persistent storage.
    RocksDb { path: String },
}

/// Supported cloud providers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloudProviderType {
    /// Offline JSON fixture; the built-in demo data when `path` is `None`.
    Fixture { path: Option<String> },
    /// Real AWS accounts (needs the `aws` feature).
    Aws,
}

fn env_parse<T: std::str::FromStr>(name: &str, default: T) -> T {
    std::env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

impl ServerConfig {
    /// Load configuration from environment variables.
    ///
    /// Environment variables:
    /// - `PORT`: port to bind on (binds to `0.0.0.0`)
    /// - `IACFORGE_BIND_ADDR`: full bind address (overrides `PORT`, default: `127.0.0.1:8300`)
    /// - `IACFORGE_STORAGE`: `memory` or `rocksdb` (default: `memory`)
    /// - `IACFORGE_STORAGE_PATH`: path for persistent backends (default: `./data`)
    /// - `IACFORGE_LOG_LEVEL`: log filter (default: `info`)
    /// - `IACFORGE_QUEUE_CAPACITY`: queued jobs (default: `64`)
    /// - `IACFORGE_MAX_CONCURRENT_JOBS`: running jobs (default: `8`)
    /// - `IACFORGE_JOB_TIMEOUT_SECS`: per-job budget (default: `120`)
    /// - `IACFORGE_UPSTREAM_TIMEOUT_SECS`: per-call budget (default: `20`)
    /// - `IACFORGE_UPSTREAM_MAX_RETRIES`: retries per call (default: `3`)
    /// - `IACFORGE_CREDENTIAL_KEY`: base64 32-byte master key (optional)
    /// - `IACFORGE_CREDENTIAL_TTL_SECS`: handle lifetime cap (default: `3600`)
    /// - `IACFORGE_CREDENTIAL_SWEEP_INTERVAL`: seconds between sweeps (default: `60`)
    /// - `IACFORGE_CLOUD_PROVIDER`: `fixture` or `aws` (default: `fixture`)
    /// - `IACFORGE_CLOUD_FIXTURE`: fixture file (default: built-in demo data)
    /// - `IACFORGE_DIAGRAM_SERVICE_URL`: vision endpoint (optional)
    /// - `IACFORGE_MAX_UPLOAD_BYTES`: body limit (default: 10 MiB)
    /// - `IACFORGE_DISABLE_MLOCK`: skip `mlockall` for dev environments (default: `false`)
    #[must_use]
    pub fn from_env() -> Self {
        // Priority: IACFORGE_BIND_ADDR > PORT > default 127.0.0.1:8300
        let bind_addr = if let Ok(addr) = std::env::var("IACFORGE_BIND_ADDR") {
            addr.parse()
                .unwrap_or_else(|_| SocketAddr::from(([127, 0, 0, 1], 8300)))
        } else if let Ok(port_str) = std::env::var("PORT") {
            let port: u16 = port_str.parse().unwrap_or(8300);
            SocketAddr::from(([0, 0, 0, 0], port))
        } else {
            SocketAddr::from(([127, 0, 0, 1], 8300))
        };

        let storage_path =
            std::env::var("IACFORGE_STORAGE_PATH").unwrap_or_else(|_| "./data".to_owned());

        let storage_backend = match std::env::var("IACFORGE_STORAGE")
            .unwrap_or_else(|_| "memory".to_owned())
            .to_lowercase()
            .as_str()
        {
            "rocksdb" => StorageBackendType::RocksDb { path: storage_path },
            _ => StorageBackendType::Memory,
        };

        let cloud_provider = match std::env::var("IACFORGE_CLOUD_PROVIDER")
            .unwrap_or_else(|_| "fixture".to_owned())
            .to_lowercase()
            .as_str()
        {
            "aws" => CloudProviderType::Aws,
            _ => CloudProviderType::Fixture {
                path: std::env::var("IACFORGE_CLOUD_FIXTURE").ok(),
            },
        };

        Self {
            bind_addr,
            storage_backend,
            log_level: std::env::var("IACFORGE_LOG_LEVEL").unwrap_or_else(|_| "info".to_owned()),
            queue_capacity: env_parse("IACFORGE_QUEUE_CAPACITY", 64),
            max_concurrent_jobs: env_parse("IACFORGE_MAX_CONCURRENT_JOBS", 8),
            job_timeout: Duration::from_secs(env_parse("IACFORGE_JOB_TIMEOUT_SECS", 120)),
            upstream_timeout: Duration::from_secs(env_parse("IACFORGE_UPSTREAM_TIMEOUT_SECS", 20)),
            upstream_max_retries: env_parse("IACFORGE_UPSTREAM_MAX_RETRIES", 3),
            credential_key: std::env::var("IACFORGE_CREDENTIAL_KEY")
                .ok()
                .filter(|k| !k.trim().is_empty()),
            credential_ttl: Duration::from_secs(env_parse("IACFORGE_CREDENTIAL_TTL_SECS", 3600)),
            credential_sweep_interval_secs: env_parse("IACFORGE_CREDENTIAL_SWEEP_INTERVAL", 60)
                .max(1),
            cloud_provider,
            diagram_service_url: std::env::var("IACFORGE_DIAGRAM_SERVICE_URL")
                .ok()
                .filter(|u| !u.trim().is_empty()),
            max_upload_bytes: env_parse("IACFORGE_MAX_UPLOAD_BYTES", 10 * 1024 * 1024),
            disable_mlock: std::env::var("IACFORGE_DISABLE_MLOCK")
                .map(|v| v == "true" || v == "1")
                .unwrap_or(false),
        }
    }

    /// Executor limits.
    #[must_use]
    pub fn executor(&self) -> ExecutorConfig {
        ExecutorConfig {
            queue_capacity: self.queue_capacity.max(1),
            max_concurrent_jobs: self.max_concurrent_jobs.max(1),
            job_timeout: self.job_timeout,
        }
    }

    /// Retry policy for upstream calls.
    #[must_use]
    pub fn retry(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.upstream_max_retries,
            call_timeout: self.upstream_timeout,
            ..RetryPolicy::default()
        }
    }
}

impl Default for ServerConfig {
    /// Defaults for tests and embedding: memory storage, built-in fixture.
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([127, 0, 0, 1], 8300)),
            storage_backend: StorageBackendType::Memory,
            log_level: "info".to_owned(),
            queue_capacity: 64,
            max_concurrent_jobs: 8,
            job_timeout: Duration::from_secs(120),
            upstream_timeout: Duration::from_secs(20),
            upstream_max_retries: 3,
            credential_key: None,
            credential_ttl: Duration::from_secs(3600),
            credential_sweep_interval_secs: 60,
            cloud_provider: CloudProviderType::Fixture { path: None },
            diagram_service_url: None,
            max_upload_bytes: 10 * 1024 * 1024,
            disable_mlock: false,
        }
    }
}
