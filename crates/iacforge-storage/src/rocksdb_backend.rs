//! `RocksDB` storage backend.
//!
//! Every call is moved onto the Tokio blocking pool because `RocksDB` is a
//! synchronous C++ library. Conditional writes (`put_if_absent`) take a
//! process-local mutex so the read-then-write pair is atomic with respect to
//! other conditional writers in this process.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use rocksdb::{DBWithThreadMode, Direction, IteratorMode, MultiThreaded, Options};

use crate::{StorageBackend, StorageError, StorageOp};

type Db = DBWithThreadMode<MultiThreaded>;

/// A storage backend backed by `RocksDB`.
///
/// # Examples
///
/// ```no_run
/// # use iacforge_storage::RocksDbBackend;
/// let backend = RocksDbBackend::open("/var/lib/iacforge/data").unwrap();
/// ```
#[derive(Clone)]
pub struct RocksDbBackend {
    db: Arc<Db>,
    path: PathBuf,
    conditional: Arc<Mutex<()>>,
}

impl std::fmt::Debug for RocksDbBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RocksDbBackend")
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

impl RocksDbBackend {
    /// Open (or create) a `RocksDB` database at the given path.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Open`] if `RocksDB` cannot open the directory.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StorageError> {
        let path = path.as_ref();
        let mut opts = Options::default();
        opts.create_if_missing(true);

        let db = Db::open(&opts, path).map_err(|e| StorageError::Open {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;

        tracing::debug!(path = %path.display(), "rocksdb opened");

        Ok(Self {
            db: Arc::new(db),
            path: path.to_path_buf(),
            conditional: Arc::new(Mutex::new(())),
        })
    }

    /// Return the filesystem path of this database.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Run `f` on the blocking pool. A panicked task becomes a backend error
    /// for `op` on `key`.
    async fn blocking<T, F>(&self, op: StorageOp, key: &str, f: F) -> Result<T, StorageError>
    where
        T: Send + 'static,
        F: FnOnce(&Db) -> Result<T, StorageError> + Send + 'static,
    {
        let db = Arc::clone(&self.db);
        tokio::task::spawn_blocking(move || f(db.as_ref()))
            .await
            .map_err(|e| StorageError::backend(op, key, format!("blocking task panicked: {e}")))?
    }
}

#[async_trait::async_trait]
impl StorageBackend for RocksDbBackend {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError> {
        let owned = key.to_owned();
        self.blocking(StorageOp::Get, key, move |db| {
            db.get(owned.as_bytes())
                .map_err(|e| StorageError::backend(StorageOp::Get, &owned, e))
        })
        .await
    }

    async fn put(&self, key: &str, value: &[u8]) -> Result<(), StorageError> {
        let owned = key.to_owned();
        let value = value.to_vec();
        self.blocking(StorageOp::Put, key, move |db| {
            db.put(owned.as_bytes(), &value)
                .map_err(|e| StorageError::backend(StorageOp::Put, &owned, e))
        })
        .await
    }

    async fn put_if_absent(&self, key: &str, value: &[u8]) -> Result<bool, StorageError> {
        const OP: StorageOp = StorageOp::PutIfAbsent;
        let owned = key.to_owned();
        let value = value.to_vec();
        let conditional = Arc::clone(&self.conditional);
        self.blocking(OP, key, move |db| {
            let _guard = conditional
                .lock()
                .map_err(|_| StorageError::backend(OP, &owned, "conditional write lock poisoned"))?;
            let existing = db
                .get(owned.as_bytes())
                .map_err(|e| StorageError::backend(OP, &owned, e))?;
            if existing.is_some() {
                return Ok(false);
            }
            db.put(owned.as_bytes(), &value)
                .map_err(|e| StorageError::backend(OP, &owned, e))?;
            Ok(true)
        })
        .await
    }

    async fn delete(&self, key: &str) -> Result<(), StorageError> {
        let owned = key.to_owned();
        self.blocking(StorageOp::Delete, key, move |db| {
            db.delete(owned.as_bytes())
                .map_err(|e| StorageError::backend(StorageOp::Delete, &owned, e))
        })
        .await
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>, StorageError> {
        let owned = prefix.to_owned();
        self.blocking(StorageOp::List, prefix, move |db| {
            let mut keys = Vec::new();
            for item in db.iterator(IteratorMode::From(owned.as_bytes(), Direction::Forward)) {
                let (k, _) = item.map_err(|e| StorageError::backend(StorageOp::List, &owned, e))?;
                let key = String::from_utf8(k.to_vec()).map_err(|_| StorageError::NonUtf8Key {
                    prefix: owned.clone(),
                })?;
                if !key.starts_with(&owned) {
                    break;
                }
                keys.push(key);
            }
            Ok(keys)
        })
        .await
    }
}
