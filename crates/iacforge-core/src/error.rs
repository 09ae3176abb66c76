//! Error types for `iacforge-core`.
//!
//! Each subsystem has its own enum with enough context to diagnose the
//! problem without a debugger. Credential errors never include secret
//! material, only the field name or the provider's reason.
//!
//! Engine-facing failures funnel into [`EngineError`], whose
//! [`category`](EngineError::category) is what a failed job reports.

use serde::{Deserialize, Serialize};

use iacforge_storage::StorageError;

/// Coarse error taxonomy surfaced on failed jobs and HTTP responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    /// Malformed description, unreadable image, unparseable code.
    Input,
    /// Cloud provider or diagram service unreachable or rate limited.
    Upstream,
    /// Invalid, expired or insufficiently privileged credential.
    Credential,
    /// Queue full.
    Capacity,
    /// The job exceeded its time budget.
    Timeout,
    /// The job was cancelled by the caller.
    Cancelled,
    /// Storage or serialization failure inside the service.
    Internal,
}

/// Errors from cryptographic operations.
#[derive(Debug, thiserror::Error)]
pub enum CryptoError {
    /// AES-256-GCM encryption failed.
    #[error("encryption failed: {reason}")]
    Encryption { reason: String },

    /// AES-256-GCM decryption failed (wrong key, corrupted ciphertext, or tampered tag).
    #[error("decryption failed: {reason}")]
    Decryption { reason: String },

    /// HKDF key derivation failed.
    #[error("key derivation failed for context '{context}': {reason}")]
    KeyDerivation { context: String, reason: String },

    /// Ciphertext is too short to contain a valid nonce + tag.
    #[error("ciphertext too short: expected at least {expected} bytes, got {actual}")]
    CiphertextTooShort { expected: usize, actual: usize },

    /// Key material had the wrong encoding or length.
    #[error("invalid key material: {reason}")]
    InvalidKey { reason: String },
}

/// Errors from the encryption barrier.
#[derive(Debug, thiserror::Error)]
pub enum BarrierError {
    /// No encryption key is configured, so nothing can be persisted.
    #[error("encrypted persistence is not configured")]
    Unavailable,

    /// A cryptographic operation within the barrier failed.
    #[error("barrier crypto error: {0}")]
    Crypto(#[from] CryptoError),

    /// The underlying storage backend returned an error.
    #[error("barrier storage error: {0}")]
    Storage(#[from] StorageError),
}

/// Errors from the artifact store.
#[derive(Debug, thiserror::Error)]
pub enum ArtifactError {
    /// No artifact with this id exists.
    #[error("artifact not found: {id}")]
    NotFound { id: String },

    /// The id is not a 64-character lowercase hex SHA-256 digest.
    #[error("invalid artifact id '{id}'")]
    InvalidId { id: String },

    /// Empty uploads are rejected.
    #[error("artifact content must not be empty")]
    Empty,

    /// Artifact metadata could not be (de)serialized.
    #[error("artifact metadata serialization failed: {reason}")]
    Serialization { reason: String },

    /// The underlying storage backend returned an error.
    #[error("artifact storage error: {0}")]
    Storage(#[from] StorageError),
}

/// Errors from the job table and executor.
#[derive(Debug, thiserror::Error)]
pub enum JobError {
    /// No job with this id exists.
    #[error("job not found: {job_id}")]
    NotFound { job_id: String },

    /// The job already reached a terminal status.
    #[error("job {job_id} is already {status}")]
    AlreadyTerminal { job_id: String, status: String },

    /// The queue has no free slot.
    #[error("job queue is full (capacity {capacity})")]
    Capacity { capacity: usize },

    /// The request failed synchronous validation.
    #[error("job rejected: {0}")]
    Rejected(#[from] EngineError),

    /// A status change that would move a job backwards or out of a terminal state.
    #[error("invalid job transition from {from} to {to}")]
    InvalidTransition { from: String, to: String },

    /// The executor is shutting down and accepts no more work.
    #[error("job executor is shutting down")]
    ShuttingDown,

    /// Job record (de)serialization failed.
    #[error("job serialization failed: {reason}")]
    Serialization { reason: String },

    /// Writing the job's output artifact failed.
    #[error("job artifact error: {0}")]
    Artifact(#[from] ArtifactError),

    /// The underlying storage backend returned an error.
    #[error("job storage error: {0}")]
    Storage(#[from] StorageError),
}

/// Errors from the HCL parser.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("syntax error at line {line}, column {column}: {message}")]
pub struct HclError {
    /// 1-based line of the offending token.
    pub line: usize,
    /// 1-based column of the offending token.
    pub column: usize,
    /// What the parser expected or found.
    pub message: String,
}

/// Errors from turning descriptions and graphs into code.
#[derive(Debug, thiserror::Error)]
pub enum GenerateError {
    /// The description is empty or whitespace.
    #[error("description must not be empty")]
    EmptyDescription,

    /// No known infrastructure term appears in the description.
    #[error("description does not name any recognizable infrastructure: {hint}")]
    NothingRecognized { hint: String },

    /// The description asks for mutually exclusive things.
    #[error("description is contradictory: {detail}")]
    Contradiction { detail: String },

    /// The resource graph is structurally invalid.
    #[error("invalid resource graph: {reason}")]
    InvalidGraph { reason: String },

    /// Rendering produced output that does not parse in the target syntax.
    #[error("generated {target} did not validate: {reason}")]
    InvalidOutput { target: String, reason: String },
}

/// Errors from diagram readers.
#[derive(Debug, thiserror::Error)]
pub enum DiagramError {
    /// The bytes are not an image or export this reader understands.
    #[error("unreadable diagram: {reason}")]
    Unreadable { reason: String },

    /// The diagram was read but its graph payload is malformed.
    #[error("malformed diagram graph: {reason}")]
    Malformed { reason: String },

    /// The external diagram service failed.
    #[error("diagram service error: {reason}")]
    Upstream { reason: String, retryable: bool },

    /// The external diagram service did not answer in time.
    #[error("diagram service timed out after {secs}s")]
    Timeout { secs: u64 },
}

/// Errors from the compliance engine.
#[derive(Debug, thiserror::Error)]
pub enum ComplianceError {
    /// The requested standard is not registered.
    #[error("unknown compliance standard '{name}'")]
    UnknownStandard { name: String },

    /// The code could not be parsed.
    #[error("code could not be parsed: {0}")]
    Parse(#[from] HclError),

    /// None of the standard's rules applies to any resource in the code.
    #[error("no {standard} rule applies to the submitted code")]
    NoApplicableRules { standard: String },
}

/// Errors from cloud provider calls.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ProviderError {
    /// The provider endpoint could not be reached.
    #[error("provider unreachable during {operation}: {reason}")]
    Unreachable { operation: String, reason: String },

    /// The provider throttled the request.
    #[error("provider rate limited {operation}")]
    RateLimited { operation: String },

    /// The call exceeded the upstream timeout.
    #[error("provider call {operation} timed out after {secs}s")]
    Timeout { operation: String, secs: u64 },

    /// The provider rejected the credential itself.
    #[error("provider rejected the credential: {reason}")]
    InvalidCredential { reason: String },

    /// The credential is valid but lacks a permission.
    #[error("access denied for {operation}: {reason}")]
    AccessDenied { operation: String, reason: String },

    /// The provider has no data for this request.
    #[error("no data for {operation}: {reason}")]
    NoData { operation: String, reason: String },

    /// Any other provider failure.
    #[error("provider error during {operation}: {reason}")]
    Other { operation: String, reason: String },
}

impl ProviderError {
    /// Whether retrying the same call may succeed.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Unreachable { .. } | Self::RateLimited { .. } | Self::Timeout { .. }
        )
    }
}

/// Errors from the credential manager.
#[derive(Debug, thiserror::Error)]
pub enum CredentialError {
    /// A field is missing or syntactically wrong; nothing was sent to the provider.
    #[error("bad credential format in '{field}': {reason}")]
    BadFormat { field: String, reason: String },

    /// The provider's identity lookup rejected a well-formed credential.
    #[error("credential rejected by provider: {reason}")]
    Rejected { reason: String },

    /// The credential or its handle has passed its expiry.
    #[error("credential expired")]
    Expired,

    /// The credential works but cannot perform a required read.
    #[error("credential lacks permission: {reason}")]
    InsufficientPermission { reason: String },

    /// No credential is registered under this handle.
    #[error("credential handle not found")]
    NotFound,

    /// The provider name is not supported.
    #[error("unsupported cloud provider '{provider}'")]
    UnsupportedProvider { provider: String },

    /// Encrypted persistence was requested without a configured key.
    #[error("credential persistence requested but no encryption key is configured")]
    PersistenceUnavailable,

    /// The provider could not be reached to validate the credential.
    #[error("credential validation could not reach the provider: {reason}")]
    Upstream { reason: String },

    /// Persisted credential storage failed.
    #[error("credential barrier error: {0}")]
    Barrier(#[from] BarrierError),
}

/// Errors from the cost analyzer.
#[derive(Debug, thiserror::Error)]
pub enum CostError {
    /// Analysis options are out of range.
    #[error("invalid analysis request: {reason}")]
    InvalidRequest { reason: String },

    /// Resolving or using the credential failed.
    #[error(transparent)]
    Credential(#[from] CredentialError),

    /// A required provider call failed after retries.
    #[error(transparent)]
    Provider(#[from] ProviderError),
}

/// A classified engine failure, recorded on failed jobs.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// The request itself is wrong.
    #[error("{reason}")]
    Input { reason: String },

    /// An external dependency failed after bounded retries.
    #[error("{reason}")]
    Upstream { reason: String },

    /// The credential is unusable.
    #[error("{0}")]
    Credential(CredentialError),

    /// The work exceeded its time budget.
    #[error("{operation} timed out after {secs}s")]
    Timeout { operation: String, secs: u64 },

    /// Work stopped because the job was cancelled.
    #[error("cancelled")]
    Cancelled,

    /// Failure inside the service.
    #[error("{reason}")]
    Internal { reason: String },
}

impl EngineError {
    /// The taxonomy bucket for this failure.
    #[must_use]
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::Input { .. } => ErrorCategory::Input,
            Self::Upstream { .. } => ErrorCategory::Upstream,
            Self::Credential(_) => ErrorCategory::Credential,
            Self::Timeout { .. } => ErrorCategory::Timeout,
            Self::Cancelled => ErrorCategory::Cancelled,
            Self::Internal { .. } => ErrorCategory::Internal,
        }
    }

    pub(crate) fn input(reason: impl Into<String>) -> Self {
        Self::Input {
            reason: reason.into(),
        }
    }
}

impl From<GenerateError> for EngineError {
    fn from(err: GenerateError) -> Self {
        match err {
            GenerateError::InvalidOutput { .. } => Self::Internal {
                reason: err.to_string(),
            },
            _ => Self::input(err.to_string()),
        }
    }
}

impl From<DiagramError> for EngineError {
    fn from(err: DiagramError) -> Self {
        match err {
            DiagramError::Unreadable { .. } | DiagramError::Malformed { .. } => {
                Self::input(err.to_string())
            }
            DiagramError::Upstream { .. } => Self::Upstream {
                reason: err.to_string(),
            },
            DiagramError::Timeout { secs } => Self::Timeout {
                operation: "diagram extraction".to_owned(),
                secs,
            },
        }
    }
}

impl From<ComplianceError> for EngineError {
    fn from(err: ComplianceError) -> Self {
        Self::input(err.to_string())
    }
}

impl From<CredentialError> for EngineError {
    fn from(err: CredentialError) -> Self {
        match err {
            CredentialError::Upstream { .. } => Self::Upstream {
                reason: err.to_string(),
            },
            CredentialError::Barrier(_) => Self::Internal {
                reason: err.to_string(),
            },
            other => Self::Credential(other),
        }
    }
}

impl From<ProviderError> for EngineError {
    fn from(err: ProviderError) -> Self {
        match err {
            ProviderError::InvalidCredential { reason } => {
                Self::Credential(CredentialError::Rejected { reason })
            }
            ProviderError::AccessDenied { operation, reason } => {
                Self::Credential(CredentialError::InsufficientPermission {
                    reason: format!("{operation}: {reason}"),
                })
            }
            ProviderError::Timeout { operation, secs } => Self::Timeout { operation, secs },
            other => Self::Upstream {
                reason: other.to_string(),
            },
        }
    }
}

impl From<CostError> for EngineError {
    fn from(err: CostError) -> Self {
        match err {
            CostError::InvalidRequest { .. } => Self::input(err.to_string()),
            CostError::Credential(inner) => inner.into(),
            CostError::Provider(inner) => inner.into(),
        }
    }
}

impl From<ArtifactError> for EngineError {
    fn from(err: ArtifactError) -> Self {
        match err {
            ArtifactError::NotFound { .. } | ArtifactError::InvalidId { .. } | ArtifactError::Empty => {
                Self::input(err.to_string())
            }
            ArtifactError::Serialization { .. } | ArtifactError::Storage(_) => Self::Internal {
                reason: err.to_string(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provider_retryability() {
        assert!(
            ProviderError::RateLimited {
                operation: "ec2:DescribeInstances".to_owned()
            }
            .is_retryable()
        );
        assert!(
            !ProviderError::AccessDenied {
                operation: "ce:GetCostAndUsage".to_owned(),
                reason: "not authorized".to_owned(),
            }
            .is_retryable()
        );
    }

    #[test]
    fn access_denied_becomes_credential_failure() {
        let err: EngineError = ProviderError::AccessDenied {
            operation: "cloudwatch:GetMetricStatistics".to_owned(),
            reason: "denied".to_owned(),
        }
        .into();
        assert_eq!(err.category(), ErrorCategory::Credential);
    }

    #[test]
    fn unreadable_diagram_is_input_error() {
        let err: EngineError = DiagramError::Unreadable {
            reason: "not a PNG".to_owned(),
        }
        .into();
        assert_eq!(err.category(), ErrorCategory::Input);
    }

    #[test]
    fn credential_upstream_is_upstream_category() {
        let err: EngineError = CredentialError::Upstream {
            reason: "sts unreachable".to_owned(),
        }
        .into();
        assert_eq!(err.category(), ErrorCategory::Upstream);
    }
}
