//! Encryption barrier for persisted secrets.
//!
//! Everything written through a [`Barrier`] is sealed with AES-256-GCM before
//! it reaches the storage backend; the storage layer only ever sees
//! ciphertext. The key is handed in at construction (derived from the
//! operator-supplied master key) and is never written to storage, so a copy
//! of the data directory alone cannot reveal a credential.
//!
//! A barrier built without a key is *unavailable*: every operation returns
//! [`BarrierError::Unavailable`] and callers fall back to memory-only state.
//!
//! Storage keys are kept in plaintext so prefix listing works; callers must
//! not put secret material in keys.

use std::fmt;
use std::sync::Arc;

use iacforge_storage::StorageBackend;

use crate::crypto::{self, EncryptionKey};
use crate::error::BarrierError;

/// Encrypting wrapper around a storage backend.
pub struct Barrier {
    storage: Arc<dyn StorageBackend>,
    key: Option<EncryptionKey>,
}

impl Barrier {
    /// Wrap `storage`, sealing values with `key`. `None` makes the barrier unavailable.
    #[must_use]
    pub fn new(storage: Arc<dyn StorageBackend>, key: Option<EncryptionKey>) -> Self {
        Self { storage, key }
    }

    /// Whether a key is configured.
    #[must_use]
    pub fn is_available(&self) -> bool {
        self.key.is_some()
    }

    fn key(&self) -> Result<&EncryptionKey, BarrierError> {
        self.key.as_ref().ok_or(BarrierError::Unavailable)
    }

    /// Read and decrypt a value. `Ok(None)` if the key does not exist.
    ///
    /// # Errors
    ///
    /// - [`BarrierError::Unavailable`] without a key.
    /// - [`BarrierError::Crypto`] if the value fails authentication.
    /// - [`BarrierError::Storage`] if the backend fails.
    pub async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, BarrierError> {
        let enc_key = self.key()?;
        match self.storage.get(key).await? {
            None => Ok(None),
            Some(sealed) => Ok(Some(crypto::decrypt(enc_key, &sealed)?)),
        }
    }

    /// Encrypt and write a value, overwriting any previous one.
    ///
    /// # Errors
    ///
    /// - [`BarrierError::Unavailable`] without a key.
    /// - [`BarrierError::Crypto`] if encryption fails.
    /// - [`BarrierError::Storage`] if the backend fails.
    pub async fn put(&self, key: &str, value: &[u8]) -> Result<(), BarrierError> {
        let sealed = crypto::encrypt(self.key()?, value)?;
        self.storage.put(key, &sealed).await?;
        Ok(())
    }

    /// Delete a value. Idempotent.
    ///
    /// # Errors
    ///
    /// - [`BarrierError::Unavailable`] without a key.
    /// - [`BarrierError::Storage`] if the backend fails.
    pub async fn delete(&self, key: &str) -> Result<(), BarrierError> {
        self.key()?;
        self.storage.delete(key).await?;
        Ok(())
    }

    /// List keys under `prefix`.
    ///
    /// # Errors
    ///
    /// - [`BarrierError::Unavailable`] without a key.
    /// - [`BarrierError::Storage`] if the backend fails.
    pub async fn list(&self, prefix: &str) -> Result<Vec<String>, BarrierError> {
        self.key()?;
        Ok(self.storage.list(prefix).await?)
    }
}

impl fmt::Debug for Barrier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Barrier")
            .field("available", &self.is_available())
            .finish_non_exhaustive()
    }
}
