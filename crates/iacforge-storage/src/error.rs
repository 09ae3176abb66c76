//! Storage error types.

use std::fmt;

/// A [`StorageBackend`](crate::StorageBackend) call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageOp {
    Get,
    Put,
    PutIfAbsent,
    Delete,
    List,
}

impl StorageOp {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Get => "get",
            Self::Put => "put",
            Self::PutIfAbsent => "put_if_absent",
            Self::Delete => "delete",
            Self::List => "list",
        }
    }
}

impl fmt::Display for StorageOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors from a storage backend.
///
/// `key` is the full key (or the prefix for [`StorageOp::List`]) so a failed
/// job can say which job record, artifact or credential was unreachable.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// The backend could not be opened.
    #[error("cannot open storage at '{path}': {reason}")]
    Open { path: String, reason: String },

    /// A backend call failed.
    #[error("storage {op} failed for '{key}': {reason}")]
    Backend {
        op: StorageOp,
        key: String,
        reason: String,
    },

    /// A listed key was not valid UTF-8.
    #[error("non-UTF-8 key found under '{prefix}'")]
    NonUtf8Key { prefix: String },
}

impl StorageError {
    /// A failed `op` on `key`.
    pub fn backend(op: StorageOp, key: &str, reason: impl fmt::Display) -> Self {
        Self::Backend {
            op,
            key: key.to_owned(),
            reason: reason.to_string(),
        }
    }

    /// The operation that failed, if the error came from a backend call.
    #[must_use]
    pub fn op(&self) -> Option<StorageOp> {
        match self {
            Self::Backend { op, .. } => Some(*op),
            Self::Open { .. } => None,
            Self::NonUtf8Key { .. } => Some(StorageOp::List),
        }
    }
}
