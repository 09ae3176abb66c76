//! Persistent job table.
//!
//! Jobs live at `jobs/<id>` as JSON. Mutations go through the per-job lock
//! from [`lock_job`](JobTable::lock_job); the executor holds it across
//! read-modify-write so a cancel and a completing worker cannot interleave.
//!
//! The dedup index (dedup key to job id) is in memory only. A key is bound
//! while its job is queued or running and released when the job reaches a
//! terminal state.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::{info, warn};

use iacforge_storage::StorageBackend;

use crate::error::{ErrorCategory, JobError};
use crate::job::{ErrorDetail, Job, JobStatus};
use crate::locks::{KeyGuard, KeyedMutex};

const JOB_PREFIX: &str = "jobs/";

/// Job persistence plus the dedup index.
pub struct JobTable {
    storage: Arc<dyn StorageBackend>,
    job_locks: KeyedMutex,
    dedup_locks: KeyedMutex,
    dedup_index: RwLock<HashMap<String, String>>,
}

impl JobTable {
    #[must_use]
    pub fn new(storage: Arc<dyn StorageBackend>) -> Self {
        Self {
            storage,
            job_locks: KeyedMutex::new(),
            dedup_locks: KeyedMutex::new(),
            dedup_index: RwLock::new(HashMap::new()),
        }
    }

    /// Fail every job left queued or running by a previous process.
    ///
    /// Returns the ids that were failed.
    ///
    /// # Errors
    ///
    /// Returns [`JobError::Storage`] or [`JobError::Serialization`] if the
    /// table cannot be read or written.
    pub async fn recover(&self) -> Result<Vec<String>, JobError> {
        let mut failed = Vec::new();
        for key in self.storage.list(JOB_PREFIX).await? {
            let id = key.trim_start_matches(JOB_PREFIX);
            let _guard = self.lock_job(id).await;
            let Some(mut job) = self.read(id).await? else {
                continue;
            };
            if job.status.is_terminal() {
                continue;
            }
            job.fail(ErrorDetail::new(
                ErrorCategory::Internal,
                "interrupted by restart",
            ))?;
            self.save(&job).await?;
            warn!(job_id = %job.id, kind = %job.kind, "job interrupted by restart marked failed");
            failed.push(job.id);
        }
        if !failed.is_empty() {
            info!(count = failed.len(), "startup recovery complete");
        }
        Ok(failed)
    }

    /// Acquire the write lock for job `id`.
    pub async fn lock_job(&self, id: &str) -> KeyGuard {
        self.job_locks.lock(id).await
    }

    /// Acquire the submission lock for a dedup key.
    pub async fn lock_dedup(&self, key: &str) -> KeyGuard {
        self.dedup_locks.lock(key).await
    }

    /// The non-terminal job currently owning `dedup_key`, if any.
    ///
    /// Call with the dedup lock held.
    ///
    /// # Errors
    ///
    /// Propagates storage failures.
    pub async fn active_for_dedup(&self, dedup_key: &str) -> Result<Option<String>, JobError> {
        let bound = self.dedup_index.read().await.get(dedup_key).cloned();
        let Some(job_id) = bound else {
            return Ok(None);
        };
        match self.read(&job_id).await? {
            Some(job) if !job.status.is_terminal() => Ok(Some(job_id)),
            _ => {
                self.dedup_index.write().await.remove(dedup_key);
                Ok(None)
            }
        }
    }

    /// Bind `dedup_key` to `job_id`. Call with the dedup lock held.
    pub async fn bind_dedup(&self, dedup_key: &str, job_id: &str) {
        self.dedup_index
            .write()
            .await
            .insert(dedup_key.to_owned(), job_id.to_owned());
    }

    /// Drop the dedup binding held by a finished job.
    ///
    /// A key that has since been rebound to another job is left alone.
    pub async fn release_dedup(&self, job: &Job) {
        let Some(key) = job.dedup_key.as_deref() else {
            return;
        };
        let mut index = self.dedup_index.write().await;
        if index.get(key).is_some_and(|bound| *bound == job.id) {
            index.remove(key);
        }
    }

    /// Number of dedup keys currently bound.
    pub async fn dedup_bindings(&self) -> usize {
        self.dedup_index.read().await.len()
    }

    /// Fetch a job.
    ///
    /// # Errors
    ///
    /// Returns [`JobError::NotFound`] if no such job exists.
    pub async fn get(&self, id: &str) -> Result<Job, JobError> {
        self.read(id).await?.ok_or_else(|| JobError::NotFound {
            job_id: id.to_owned(),
        })
    }

    /// Write a job record. Call with the job's lock held.
    ///
    /// # Errors
    ///
    /// Propagates serialization and storage failures.
    pub async fn save(&self, job: &Job) -> Result<(), JobError> {
        let encoded = serde_json::to_vec(job).map_err(|e| JobError::Serialization {
            reason: e.to_string(),
        })?;
        self.storage.put(&job_key(&job.id), &encoded).await?;
        Ok(())
    }

    /// All jobs, newest first.
    ///
    /// # Errors
    ///
    /// Propagates serialization and storage failures.
    pub async fn list(&self) -> Result<Vec<Job>, JobError> {
        let mut jobs = Vec::new();
        for key in self.storage.list(JOB_PREFIX).await? {
            if let Some(job) = self.read(key.trim_start_matches(JOB_PREFIX)).await? {
                jobs.push(job);
            }
        }
        jobs.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| a.id.cmp(&b.id)));
        Ok(jobs)
    }

    /// Number of jobs per status.
    ///
    /// # Errors
    ///
    /// Propagates serialization and storage failures.
    pub async fn counts(&self) -> Result<BTreeMap<String, usize>, JobError> {
        let mut counts = BTreeMap::new();
        for status in [
            JobStatus::Queued,
            JobStatus::Running,
            JobStatus::Succeeded,
            JobStatus::Failed,
            JobStatus::Cancelled,
        ] {
            counts.insert(status.to_string(), 0);
        }
        for job in self.list().await? {
            *counts.entry(job.status.to_string()).or_insert(0) += 1;
        }
        Ok(counts)
    }

    async fn read(&self, id: &str) -> Result<Option<Job>, JobError> {
        match self.storage.get(&job_key(id)).await? {
            None => Ok(None),
            Some(raw) => serde_json::from_slice(&raw)
                .map(Some)
                .map_err(|e| JobError::Serialization {
                    reason: e.to_string(),
                }),
        }
    }
}

impl fmt::Debug for JobTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JobTable").finish_non_exhaustive()
    }
}

fn job_key(id: &str) -> String {
    format!("{JOB_PREFIX}{id}")
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::job::{JobRequest, Target};
    use iacforge_storage::MemoryBackend;

    fn request() -> JobRequest {
        JobRequest::Generate {
            description: "one vpc".to_owned(),
            target: Target::Hcl,
        }
    }

    #[tokio::test]
    async fn save_and_get() {
        let table = JobTable::new(Arc::new(MemoryBackend::new()));
        let job = Job::new(request(), None);
        table.save(&job).await.unwrap();
        assert_eq!(table.get(&job.id).await.unwrap(), job);
        assert!(matches!(
            table.get("job_missing").await,
            Err(JobError::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn recovery_fails_unfinished_jobs_only() {
        let storage: Arc<dyn StorageBackend> = Arc::new(MemoryBackend::new());
        let table = JobTable::new(Arc::clone(&storage));

        let queued = Job::new(request(), None);
        let mut running = Job::new(request(), None);
        running.start().unwrap();
        let mut done = Job::new(request(), None);
        done.start().unwrap();
        done.succeed("a".repeat(64)).unwrap();
        for j in [&queued, &running, &done] {
            table.save(j).await.unwrap();
        }

        let restarted = JobTable::new(storage);
        let mut failed = restarted.recover().await.unwrap();
        failed.sort();
        let mut expected = vec![queued.id.clone(), running.id.clone()];
        expected.sort();
        assert_eq!(failed, expected);

        let job = restarted.get(&running.id).await.unwrap();
        assert_eq!(job.status, JobStatus::Failed);
        let err = job.error.unwrap();
        assert_eq!(err.category, ErrorCategory::Internal);
        assert_eq!(err.message, "interrupted by restart");
        assert_eq!(
            restarted.get(&done.id).await.unwrap().status,
            JobStatus::Succeeded
        );
    }

    #[tokio::test]
    async fn dedup_binding_releases_when_terminal() {
        let table = JobTable::new(Arc::new(MemoryBackend::new()));
        let mut job = Job::new(request(), Some("k1".to_owned()));
        table.save(&job).await.unwrap();
        table.bind_dedup("k1", &job.id).await;

        assert_eq!(
            table.active_for_dedup("k1").await.unwrap(),
            Some(job.id.clone())
        );

        job.cancel().unwrap();
        table.save(&job).await.unwrap();
        assert_eq!(table.active_for_dedup("k1").await.unwrap(), None);
    }

    #[tokio::test]
    async fn release_only_drops_own_binding() {
        let table = JobTable::new(Arc::new(MemoryBackend::new()));
        let old = Job::new(request(), Some("k".to_owned()));
        let new = Job::new(request(), Some("k".to_owned()));
        table.bind_dedup("k", &new.id).await;

        table.release_dedup(&old).await;
        assert_eq!(table.dedup_bindings().await, 1);

        table.release_dedup(&new).await;
        assert_eq!(table.dedup_bindings().await, 0);
    }

    #[test]
    fn debug_output_hides_storage() {
        let table = JobTable::new(Arc::new(MemoryBackend::new()));
        assert_eq!(format!("{table:?}"), "JobTable { .. }");
    }

    #[tokio::test]
    async fn counts_cover_every_status() {
        let table = JobTable::new(Arc::new(MemoryBackend::new()));
        table.save(&Job::new(request(), None)).await.unwrap();
        let counts = table.counts().await.unwrap();
        assert_eq!(counts["queued"], 1);
        assert_eq!(counts["succeeded"], 0);
        assert_eq!(counts.len(), 5);
    }
}
