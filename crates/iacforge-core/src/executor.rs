//! Job queue and executor.
//!
//! `submit` validates the request, persists a queued [`Job`] and pushes its
//! id onto a bounded channel. A single dispatcher task takes a concurrency
//! permit, then an id, and spawns one worker task per job, so each id is
//! dispatched exactly once and at most `max_concurrent_jobs` run at a time.
//! Ids waiting in the channel are the queue; when it is full `submit` fails
//! with [`JobError::Capacity`] instead of waiting.
//!
//! Workers run the engine under `job_timeout` and race it against the job's
//! cancel signal. The final transition (artifact write plus `succeeded`) is
//! made under the job's lock, the same lock `cancel` takes, so a cancelled
//! job never gains an output afterwards.
//!
//! On shutdown the dispatcher stops taking ids, fails whatever is still
//! queued with "server shutting down", then waits for running workers.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{Semaphore, mpsc, watch};
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, error, info, warn};

use crate::artifact::{ArtifactKind, ArtifactStore};
use crate::error::{EngineError, ErrorCategory, JobError};
use crate::job::{ErrorDetail, Job, JobRequest, JobStatus};
use crate::job_table::JobTable;

/// Executor limits.
#[derive(Debug, Clone, Copy)]
pub struct ExecutorConfig {
    /// Jobs that may wait for a worker.
    pub queue_capacity: usize,
    /// Jobs that may run at once.
    pub max_concurrent_jobs: usize,
    /// Time budget for a single job.
    pub job_timeout: Duration,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 64,
            max_concurrent_jobs: 8,
            job_timeout: Duration::from_secs(120),
        }
    }
}

/// What a successful job produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobOutput {
    pub kind: ArtifactKind,
    pub content_type: String,
    pub content: Vec<u8>,
}

/// Cooperative cancellation signal handed to a running job.
#[derive(Debug, Clone)]
pub struct CancelToken(watch::Receiver<bool>);

impl CancelToken {
    /// A token that is never cancelled.
    #[must_use]
    pub fn never() -> Self {
        let (_tx, rx) = watch::channel(false);
        Self(rx)
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        *self.0.borrow()
    }

    /// Resolve once cancellation is requested.
    pub async fn cancelled(&mut self) {
        let closed = self.0.wait_for(|c| *c).await.map(|_| ()).is_err();
        // Sender gone without a signal: the job finished, never resolve.
        if closed {
            std::future::pending::<()>().await;
        }
    }

    /// Return [`EngineError::Cancelled`] if cancellation was requested.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Cancelled`] when cancelled.
    pub fn check(&self) -> Result<(), EngineError> {
        if self.is_cancelled() {
            Err(EngineError::Cancelled)
        } else {
            Ok(())
        }
    }
}

/// The engines behind the executor.
#[async_trait]
pub trait JobRunner: Send + Sync {
    /// Cheap synchronous checks made before a job is created.
    async fn validate(&self, request: &JobRequest) -> Result<(), EngineError>;

    /// Run the job to completion.
    async fn run(&self, job: &Job, cancel: CancelToken) -> Result<JobOutput, EngineError>;
}

/// Result of a submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Submitted {
    pub job_id: String,
    /// `true` if an active job with the same dedup key was returned.
    pub deduplicated: bool,
}

/// The job queue and worker pool.
pub struct Executor {
    table: Arc<JobTable>,
    artifacts: Arc<ArtifactStore>,
    runner: Arc<dyn JobRunner>,
    config: ExecutorConfig,
    queue: mpsc::Sender<String>,
    cancels: Mutex<HashMap<String, watch::Sender<bool>>>,
    shutdown: watch::Sender<bool>,
}

impl Executor {
    /// Create the executor and spawn its dispatcher.
    ///
    /// The returned handle finishes after [`shutdown`](Self::shutdown) once
    /// in-flight jobs have completed.
    #[must_use]
    pub fn start(
        table: Arc<JobTable>,
        artifacts: Arc<ArtifactStore>,
        runner: Arc<dyn JobRunner>,
        config: ExecutorConfig,
    ) -> (Arc<Self>, JoinHandle<()>) {
        let (queue, rx) = mpsc::channel(config.queue_capacity.max(1));
        let (shutdown, shutdown_rx) = watch::channel(false);
        let executor = Arc::new(Self {
            table,
            artifacts,
            runner,
            config,
            queue,
            cancels: Mutex::new(HashMap::new()),
            shutdown,
        });
        let handle = tokio::spawn(dispatch(Arc::clone(&executor), rx, shutdown_rx));
        (executor, handle)
    }

    #[must_use]
    pub fn config(&self) -> ExecutorConfig {
        self.config
    }

    #[must_use]
    pub fn table(&self) -> &Arc<JobTable> {
        &self.table
    }

    /// Queue a job.
    ///
    /// With a `dedup_key`, an active job already owning the key is returned
    /// instead of creating a new one.
    ///
    /// # Errors
    ///
    /// - [`JobError::Rejected`] if validation fails (no job is created).
    /// - [`JobError::Capacity`] if the queue is full.
    /// - [`JobError::ShuttingDown`] after [`shutdown`](Self::shutdown).
    pub async fn submit(
        &self,
        request: JobRequest,
        dedup_key: Option<String>,
    ) -> Result<Submitted, JobError> {
        if *self.shutdown.borrow() {
            return Err(JobError::ShuttingDown);
        }

        let _dedup_guard = match dedup_key.as_deref() {
            Some(key) => Some(self.table.lock_dedup(key).await),
            None => None,
        };
        if let Some(key) = dedup_key.as_deref() {
            if let Some(job_id) = self.table.active_for_dedup(key).await? {
                debug!(job_id = %job_id, dedup_key = key, "submission deduplicated");
                return Ok(Submitted {
                    job_id,
                    deduplicated: true,
                });
            }
        }

        self.runner.validate(&request).await?;

        let slot = self.queue.try_reserve().map_err(|e| match e {
            mpsc::error::TrySendError::Full(()) => JobError::Capacity {
                capacity: self.config.queue_capacity,
            },
            mpsc::error::TrySendError::Closed(()) => JobError::ShuttingDown,
        })?;

        let job = Job::new(request, dedup_key);
        self.table.save(&job).await?;
        if let Some(key) = job.dedup_key.as_deref() {
            self.table.bind_dedup(key, &job.id).await;
        }
        let (cancel_tx, _) = watch::channel(false);
        self.cancel_senders().insert(job.id.clone(), cancel_tx);
        slot.send(job.id.clone());

        info!(job_id = %job.id, kind = %job.kind, "job submitted");
        Ok(Submitted {
            job_id: job.id,
            deduplicated: false,
        })
    }

    /// Fetch a job.
    ///
    /// # Errors
    ///
    /// Returns [`JobError::NotFound`] for an unknown id.
    pub async fn status(&self, job_id: &str) -> Result<Job, JobError> {
        self.table.get(job_id).await
    }

    /// All jobs, newest first.
    ///
    /// # Errors
    ///
    /// Propagates job table failures.
    pub async fn list(&self) -> Result<Vec<Job>, JobError> {
        self.table.list().await
    }

    /// Cancel a queued or running job.
    ///
    /// # Errors
    ///
    /// - [`JobError::NotFound`] for an unknown id.
    /// - [`JobError::AlreadyTerminal`] if the job already finished; its status
    ///   is left unchanged.
    pub async fn cancel(&self, job_id: &str) -> Result<Job, JobError> {
        let _guard = self.table.lock_job(job_id).await;
        let mut job = self.table.get(job_id).await?;
        job.cancel()?;
        self.table.save(&job).await?;
        self.table.release_dedup(&job).await;

        if let Some(signal) = self.cancel_senders().remove(job_id) {
            signal.send_replace(true);
        }
        info!(job_id = %job_id, "job cancelled");
        Ok(job)
    }

    /// Stop accepting work and let the dispatcher drain in-flight jobs.
    pub fn shutdown(&self) {
        self.shutdown.send_replace(true);
    }

    fn cancel_senders(&self) -> std::sync::MutexGuard<'_, HashMap<String, watch::Sender<bool>>> {
        self.cancels
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    async fn execute(self: Arc<Self>, job_id: String) {
        let token = {
            let senders = self.cancel_senders();
            senders.get(&job_id).map(|tx| CancelToken(tx.subscribe()))
        };
        let Some(mut token) = token else {
            debug!(job_id = %job_id, "job cancelled before dispatch");
            return;
        };

        let job = {
            let _guard = self.table.lock_job(&job_id).await;
            let mut job = match self.table.get(&job_id).await {
                Ok(job) => job,
                Err(e) => {
                    error!(job_id = %job_id, error = %e, "failed to load dispatched job");
                    return;
                }
            };
            if job.status != JobStatus::Queued {
                return;
            }
            if let Err(e) = job.start() {
                error!(job_id = %job_id, error = %e, "failed to start job");
                return;
            }
            if let Err(e) = self.table.save(&job).await {
                error!(job_id = %job_id, error = %e, "failed to persist running job");
                return;
            }
            job
        };
        info!(job_id = %job.id, kind = %job.kind, "job started");

        let budget = self.config.job_timeout;
        let run_token = token.clone();
        let outcome = tokio::select! {
            res = tokio::time::timeout(budget, self.runner.run(&job, run_token)) => match res {
                Ok(inner) => inner,
                Err(_) => Err(EngineError::Timeout {
                    operation: format!("{} job", job.kind),
                    secs: budget.as_secs(),
                }),
            },
            () = token.cancelled() => Err(EngineError::Cancelled),
        };

        self.finish(&job_id, outcome).await;
    }

    async fn finish(&self, job_id: &str, outcome: Result<JobOutput, EngineError>) {
        let _guard = self.table.lock_job(job_id).await;
        self.cancel_senders().remove(job_id);

        let mut job = match self.table.get(job_id).await {
            Ok(job) => job,
            Err(e) => {
                error!(job_id = %job_id, error = %e, "failed to reload job");
                return;
            }
        };
        if job.status.is_terminal() {
            debug!(job_id = %job_id, status = %job.status, "job already terminal, dropping result");
            return;
        }

        let transition = match outcome {
            Ok(output) => match self
                .artifacts
                .put(output.kind, &output.content_type, &output.content)
                .await
            {
                Ok(meta) => {
                    info!(job_id = %job_id, artifact_id = %meta.id, "job succeeded");
                    job.succeed(meta.id)
                }
                Err(e) => {
                    error!(job_id = %job_id, error = %e, "failed to store job output");
                    job.fail(ErrorDetail::new(ErrorCategory::Internal, e.to_string()))
                }
            },
            Err(EngineError::Cancelled) => job.cancel(),
            Err(e) => {
                warn!(
                    job_id = %job_id,
                    category = ?e.category(),
                    error = %e,
                    "job failed"
                );
                job.fail(ErrorDetail::from(&e))
            }
        };

        if let Err(e) = transition {
            error!(job_id = %job_id, error = %e, "invalid final transition");
            return;
        }
        if let Err(e) = self.table.save(&job).await {
            error!(job_id = %job_id, error = %e, "failed to persist finished job");
        }
        self.table.release_dedup(&job).await;
    }

    /// Fail a job that was still waiting in the queue at shutdown.
    async fn abandon(&self, job_id: &str) {
        let _guard = self.table.lock_job(job_id).await;
        self.cancel_senders().remove(job_id);

        let mut job = match self.table.get(job_id).await {
            Ok(job) => job,
            Err(e) => {
                error!(job_id = %job_id, error = %e, "failed to load queued job at shutdown");
                return;
            }
        };
        if job.status.is_terminal() {
            return;
        }
        if let Err(e) = job.fail(ErrorDetail::new(
            ErrorCategory::Internal,
            "server shutting down",
        )) {
            error!(job_id = %job_id, error = %e, "invalid shutdown transition");
            return;
        }
        if let Err(e) = self.table.save(&job).await {
            error!(job_id = %job_id, error = %e, "failed to persist abandoned job");
        }
        self.table.release_dedup(&job).await;
        warn!(job_id = %job_id, kind = %job.kind, "queued job failed at shutdown");
    }
}

impl fmt::Debug for Executor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Executor")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

async fn dispatch(
    executor: Arc<Executor>,
    mut rx: mpsc::Receiver<String>,
    mut shutdown: watch::Receiver<bool>,
) {
    let permits = Arc::new(Semaphore::new(executor.config.max_concurrent_jobs.max(1)));
    let mut workers = JoinSet::new();

    info!(
        queue_capacity = executor.config.queue_capacity,
        max_concurrent_jobs = executor.config.max_concurrent_jobs,
        "job dispatcher started"
    );

    loop {
        let permit = tokio::select! {
            p = Arc::clone(&permits).acquire_owned() => match p {
                Ok(p) => p,
                Err(_) => break,
            },
            _ = shutdown.changed() => break,
        };

        let job_id = tokio::select! {
            id = rx.recv() => match id {
                Some(id) => id,
                None => break,
            },
            _ = shutdown.changed() => break,
        };

        let worker = Arc::clone(&executor);
        workers.spawn(async move {
            worker.execute(job_id).await;
            drop(permit);
        });

        while workers.try_join_next().is_some() {}
    }

    rx.close();
    while let Some(job_id) = rx.recv().await {
        executor.abandon(&job_id).await;
    }
    info!(in_flight = workers.len(), "job dispatcher stopping");
    while let Some(res) = workers.join_next().await {
        if let Err(e) = res {
            error!(error = %e, "job worker panicked");
        }
    }
    info!("job dispatcher stopped");
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;
    use crate::job::Target;
    use iacforge_storage::MemoryBackend;
    use iacforge_storage::StorageBackend;

    /// Runner whose behaviour is picked by the description text.
    struct ScriptedRunner;

    #[async_trait]
    impl JobRunner for ScriptedRunner {
        async fn validate(&self, request: &JobRequest) -> Result<(), EngineError> {
            match request {
                JobRequest::Generate { description, .. } if description.is_empty() => {
                    Err(EngineError::input("description must not be empty"))
                }
                _ => Ok(()),
            }
        }

        async fn run(&self, job: &Job, _cancel: CancelToken) -> Result<JobOutput, EngineError> {
            let JobRequest::Generate { description, .. } = &job.request else {
                return Err(EngineError::input("unsupported"));
            };
            match description.as_str() {
                "slow" => {
                    tokio::time::sleep(Duration::from_secs(30)).await;
                    Err(EngineError::Internal {
                        reason: "unreachable".to_owned(),
                    })
                }
                "upstream" => Err(EngineError::Upstream {
                    reason: "diagram service unreachable".to_owned(),
                }),
                other => Ok(JobOutput {
                    kind: ArtifactKind::TerraformText,
                    content_type: Target::Hcl.content_type().to_owned(),
                    content: format!("# {other}\n").into_bytes(),
                }),
            }
        }
    }

    fn generate_request(description: &str) -> JobRequest {
        JobRequest::Generate {
            description: description.to_owned(),
            target: Target::Hcl,
        }
    }

    fn start(config: ExecutorConfig) -> (Arc<Executor>, JoinHandle<()>) {
        let storage: Arc<dyn StorageBackend> = Arc::new(MemoryBackend::new());
        Executor::start(
            Arc::new(JobTable::new(Arc::clone(&storage))),
            Arc::new(ArtifactStore::new(storage)),
            Arc::new(ScriptedRunner),
            config,
        )
    }

    async fn wait_terminal(executor: &Executor, id: &str) -> Job {
        for _ in 0..200 {
            let job = executor.status(id).await.unwrap();
            if job.status.is_terminal() {
                return job;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("job {id} did not finish");
    }

    #[tokio::test]
    async fn successful_job_gets_artifact() {
        let (executor, _) = start(ExecutorConfig::default());
        let submitted = executor.submit(generate_request("vpc"), None).await.unwrap();
        let job = wait_terminal(&executor, &submitted.job_id).await;
        assert_eq!(job.status, JobStatus::Succeeded);
        assert!(job.result_artifact_id.is_some());
        assert!(job.started_at.is_some());
    }

    #[tokio::test]
    async fn invalid_request_creates_no_job() {
        let (executor, _) = start(ExecutorConfig::default());
        let err = executor.submit(generate_request(""), None).await.unwrap_err();
        assert!(matches!(err, JobError::Rejected(EngineError::Input { .. })));
        assert!(executor.list().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn engine_failure_is_recorded() {
        let (executor, _) = start(ExecutorConfig::default());
        let id = executor.submit(generate_request("upstream"), None).await.unwrap().job_id;
        let job = wait_terminal(&executor, &id).await;
        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.error.unwrap().category, ErrorCategory::Upstream);
    }

    #[tokio::test]
    async fn timeout_fails_job() {
        let (executor, _) = start(ExecutorConfig {
            job_timeout: Duration::from_millis(50),
            ..ExecutorConfig::default()
        });
        let id = executor.submit(generate_request("slow"), None).await.unwrap().job_id;
        let job = wait_terminal(&executor, &id).await;
        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.error.unwrap().category, ErrorCategory::Timeout);
    }

    #[tokio::test]
    async fn dedup_returns_active_job() {
        let (executor, _) = start(ExecutorConfig::default());
        let first = executor
            .submit(generate_request("slow"), Some("k".to_owned()))
            .await
            .unwrap();
        let second = executor
            .submit(generate_request("slow"), Some("k".to_owned()))
            .await
            .unwrap();
        assert_eq!(first.job_id, second.job_id);
        assert!(second.deduplicated);

        executor.cancel(&first.job_id).await.unwrap();
        let third = executor
            .submit(generate_request("slow"), Some("k".to_owned()))
            .await
            .unwrap();
        assert_ne!(third.job_id, first.job_id);
    }

    #[tokio::test]
    async fn dedup_binding_released_when_job_finishes() {
        let (executor, _) = start(ExecutorConfig::default());
        let done = executor
            .submit(generate_request("vpc"), Some("finished".to_owned()))
            .await
            .unwrap();
        wait_terminal(&executor, &done.job_id).await;
        for _ in 0..100 {
            if executor.table().dedup_bindings().await == 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(executor.table().dedup_bindings().await, 0);

        let slow = executor
            .submit(generate_request("slow"), Some("cancelled".to_owned()))
            .await
            .unwrap();
        assert_eq!(executor.table().dedup_bindings().await, 1);
        executor.cancel(&slow.job_id).await.unwrap();
        assert_eq!(executor.table().dedup_bindings().await, 0);
    }

    #[tokio::test]
    async fn concurrent_dedup_submissions_create_one_job() {
        let (executor, _) = start(ExecutorConfig::default());
        let mut handles = Vec::new();
        for _ in 0..10 {
            let executor = Arc::clone(&executor);
            handles.push(tokio::spawn(async move {
                executor
                    .submit(generate_request("slow"), Some("same".to_owned()))
                    .await
                    .unwrap()
                    .job_id
            }));
        }
        let mut ids = Vec::new();
        for h in handles {
            ids.push(h.await.unwrap());
        }
        ids.dedup();
        assert_eq!(ids.len(), 1);
    }

    #[tokio::test]
    async fn cancel_running_job_and_terminal_cancel() {
        let (executor, _) = start(ExecutorConfig::default());
        let id = executor.submit(generate_request("slow"), None).await.unwrap().job_id;
        for _ in 0..100 {
            if executor.status(&id).await.unwrap().status == JobStatus::Running {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        let job = executor.cancel(&id).await.unwrap();
        assert_eq!(job.status, JobStatus::Cancelled);

        let again = executor.cancel(&id).await.unwrap_err();
        assert!(matches!(again, JobError::AlreadyTerminal { .. }));

        tokio::time::sleep(Duration::from_millis(50)).await;
        let job = executor.status(&id).await.unwrap();
        assert_eq!(job.status, JobStatus::Cancelled);
        assert!(job.result_artifact_id.is_none());
    }

    #[tokio::test]
    async fn cancelling_finished_job_leaves_it_unchanged() {
        let (executor, _) = start(ExecutorConfig::default());
        let id = executor.submit(generate_request("vpc"), None).await.unwrap().job_id;
        let done = wait_terminal(&executor, &id).await;

        assert!(matches!(
            executor.cancel(&id).await,
            Err(JobError::AlreadyTerminal { .. })
        ));
        assert_eq!(executor.status(&id).await.unwrap(), done);
    }

    #[tokio::test]
    async fn full_queue_fails_fast() {
        let (executor, _) = start(ExecutorConfig {
            queue_capacity: 1,
            max_concurrent_jobs: 1,
            job_timeout: Duration::from_secs(60),
        });

        let mut saw_capacity = false;
        for _ in 0..5 {
            match executor.submit(generate_request("slow"), None).await {
                Ok(_) => {}
                Err(JobError::Capacity { capacity }) => {
                    assert_eq!(capacity, 1);
                    saw_capacity = true;
                    break;
                }
                Err(other) => panic!("unexpected error: {other}"),
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(saw_capacity);
    }

    #[tokio::test]
    async fn unknown_job() {
        let (executor, _) = start(ExecutorConfig::default());
        assert!(matches!(
            executor.status("job_nope").await,
            Err(JobError::NotFound { .. })
        ));
        assert!(matches!(
            executor.cancel("job_nope").await,
            Err(JobError::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn shutdown_rejects_new_work_and_drains() {
        let (executor, handle) = start(ExecutorConfig::default());
        let id = executor.submit(generate_request("vpc"), None).await.unwrap().job_id;
        wait_terminal(&executor, &id).await;

        executor.shutdown();
        tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(
            executor.submit(generate_request("vpc"), None).await,
            Err(JobError::ShuttingDown)
        ));
    }

    #[tokio::test]
    async fn shutdown_fails_jobs_still_queued() {
        let (executor, handle) = start(ExecutorConfig {
            queue_capacity: 4,
            max_concurrent_jobs: 1,
            job_timeout: Duration::from_secs(60),
        });
        let running = executor
            .submit(generate_request("slow"), None)
            .await
            .unwrap()
            .job_id;
        for _ in 0..100 {
            if executor.status(&running).await.unwrap().status == JobStatus::Running {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        let waiting = executor
            .submit(generate_request("vpc"), Some("w".to_owned()))
            .await
            .unwrap()
            .job_id;

        executor.shutdown();
        let job = wait_terminal(&executor, &waiting).await;
        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.error.unwrap().message, "server shutting down");
        assert_eq!(executor.table().dedup_bindings().await, 0);

        executor.cancel(&running).await.unwrap();
        tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .unwrap()
            .unwrap();
    }
}
