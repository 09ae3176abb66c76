//! Content-addressed artifact store.
//!
//! An artifact's id is the lowercase hex SHA-256 of its bytes. Writing the
//! same bytes twice returns the same id and keeps one stored copy; the first
//! writer's metadata wins, `kind` and `content_type` included. A kind is a
//! hint about how the bytes were first used, not a record of every producer:
//! an uploaded JSON diagram that a job later reproduces byte for byte stays a
//! `diagram`. Artifacts are immutable and carry no reference to the job that
//! produced them.
//!
//! Layout in the storage backend:
//!
//! ```text
//! artifacts/<id>/meta     JSON ArtifactMeta
//! artifacts/<id>/content  raw bytes
//! ```

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use iacforge_storage::StorageBackend;

use crate::crypto::sha256_hex;
use crate::error::ArtifactError;
use crate::locks::KeyedMutex;

/// What an artifact holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ArtifactKind {
    /// Terraform configuration, HCL or JSON syntax.
    TerraformText,
    /// A compliance report.
    FindingReport,
    /// A cloud cost report.
    CostReport,
    /// An uploaded architecture diagram.
    Diagram,
}

impl ArtifactKind {
    /// Pick a kind for an upload from its content type.
    ///
    /// Images and JSON graph exports are diagrams; everything else is treated
    /// as configuration text.
    #[must_use]
    pub fn infer(content_type: &str) -> Self {
        let essence = content_type
            .split(';')
            .next()
            .unwrap_or_default()
            .trim()
            .to_ascii_lowercase();
        if essence.starts_with("image/") || essence == "application/json" {
            Self::Diagram
        } else {
            Self::TerraformText
        }
    }

    /// The kebab-case name used on the wire.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::TerraformText => "terraform-text",
            Self::FindingReport => "finding-report",
            Self::CostReport => "cost-report",
            Self::Diagram => "diagram",
        }
    }
}

impl fmt::Display for ArtifactKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Stored metadata for an artifact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactMeta {
    pub id: String,
    pub kind: ArtifactKind,
    pub content_type: String,
    pub size: u64,
    pub created_at: DateTime<Utc>,
}

/// Whether `id` is a well-formed artifact id.
#[must_use]
pub fn is_valid_id(id: &str) -> bool {
    id.len() == 64 && id.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'))
}

/// Content-addressed artifact storage over a [`StorageBackend`].
pub struct ArtifactStore {
    storage: Arc<dyn StorageBackend>,
    locks: KeyedMutex,
}

impl ArtifactStore {
    #[must_use]
    pub fn new(storage: Arc<dyn StorageBackend>) -> Self {
        Self {
            storage,
            locks: KeyedMutex::new(),
        }
    }

    /// Store `content` and return its metadata. Idempotent by content.
    ///
    /// When the bytes are already stored the existing metadata is returned
    /// unchanged, even if `kind` or `content_type` differ.
    ///
    /// # Errors
    ///
    /// - [`ArtifactError::Empty`] for zero-length content.
    /// - [`ArtifactError::Storage`] / [`ArtifactError::Serialization`] on failure.
    pub async fn put(
        &self,
        kind: ArtifactKind,
        content_type: &str,
        content: &[u8],
    ) -> Result<ArtifactMeta, ArtifactError> {
        if content.is_empty() {
            return Err(ArtifactError::Empty);
        }

        let id = sha256_hex(content);
        let _guard = self.locks.lock(&id).await;

        if let Some(existing) = self.read_meta(&id).await? {
            debug!(artifact_id = %id, "artifact already stored");
            return Ok(existing);
        }

        self.storage
            .put_if_absent(&content_key(&id), content)
            .await?;

        let meta = ArtifactMeta {
            id: id.clone(),
            kind,
            content_type: content_type.to_owned(),
            size: content.len() as u64,
            created_at: Utc::now(),
        };
        let encoded = serde_json::to_vec(&meta).map_err(|e| ArtifactError::Serialization {
            reason: e.to_string(),
        })?;
        self.storage.put(&meta_key(&id), &encoded).await?;

        debug!(artifact_id = %id, kind = %kind, size = meta.size, "artifact stored");
        Ok(meta)
    }

    /// Fetch metadata and content.
    ///
    /// # Errors
    ///
    /// - [`ArtifactError::InvalidId`] for a malformed id.
    /// - [`ArtifactError::NotFound`] if nothing is stored under `id`.
    pub async fn get(&self, id: &str) -> Result<(ArtifactMeta, Vec<u8>), ArtifactError> {
        let meta = self.meta(id).await?;
        let content = self
            .storage
            .get(&content_key(id))
            .await?
            .ok_or_else(|| ArtifactError::NotFound { id: id.to_owned() })?;
        Ok((meta, content))
    }

    /// Fetch metadata only.
    ///
    /// # Errors
    ///
    /// Same as [`get`](Self::get).
    pub async fn meta(&self, id: &str) -> Result<ArtifactMeta, ArtifactError> {
        if !is_valid_id(id) {
            return Err(ArtifactError::InvalidId { id: id.to_owned() });
        }
        self.read_meta(id)
            .await?
            .ok_or_else(|| ArtifactError::NotFound { id: id.to_owned() })
    }

    /// Whether an artifact exists.
    ///
    /// # Errors
    ///
    /// Returns [`ArtifactError::Storage`] if the backend fails.
    pub async fn exists(&self, id: &str) -> Result<bool, ArtifactError> {
        if !is_valid_id(id) {
            return Ok(false);
        }
        Ok(self.storage.exists(&meta_key(id)).await?)
    }

    async fn read_meta(&self, id: &str) -> Result<Option<ArtifactMeta>, ArtifactError> {
        match self.storage.get(&meta_key(id)).await? {
            None => Ok(None),
            Some(raw) => serde_json::from_slice(&raw)
                .map(Some)
                .map_err(|e| ArtifactError::Serialization {
                    reason: e.to_string(),
                }),
        }
    }
}

impl fmt::Debug for ArtifactStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ArtifactStore").finish_non_exhaustive()
    }
}

fn meta_key(id: &str) -> String {
    format!("artifacts/{id}/meta")
}

fn content_key(id: &str) -> String {
    format!("artifacts/{id}/content")
}
