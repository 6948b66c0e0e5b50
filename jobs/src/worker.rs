use std::sync::Arc;
use std::time::Duration;

use llc_core::error::LlcError;
use llc_core::model::{Job, JobKind};
use tracing::{error, info, warn};

use crate::queue::JobQueue;

/// Executes one job kind's payload. Implemented outside this crate (e.g. by
/// `ingestion::IngestionPipeline`) so the worker loop stays generic across
/// `{Ingest, Refresh, Export}` (§4.6).
#[async_trait::async_trait]
pub trait JobHandler: Send + Sync {
    async fn handle(&self, job: &Job) -> Result<(), Box<dyn LlcError + Send + Sync>>;
}

#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub worker_id: String,
    pub kind_filter: Option<JobKind>,
    pub visibility_timeout_s: i64,
    pub max_retries: u32,
    pub heartbeat_interval: Duration,
    pub poll_interval: Duration,
}

impl WorkerConfig {
    pub fn new(worker_id: impl Into<String>) -> Self {
        Self {
            worker_id: worker_id.into(),
            kind_filter: None,
            visibility_timeout_s: 900,
            max_retries: 3,
            heartbeat_interval: Duration::from_secs(30),
            poll_interval: Duration::from_millis(200),
        }
    }
}

/// Claim → heartbeat ticker → execute → done/retry-with-backoff/fail loop.
/// A job whose failure carries a non-retryable [`ErrorCode`] is failed
/// immediately regardless of remaining retries (§4.6).
pub struct Worker<Q: JobQueue> {
    queue: Arc<Q>,
    handler: Arc<dyn JobHandler>,
    config: WorkerConfig,
}

impl<Q: JobQueue + 'static> Worker<Q> {
    pub fn new(queue: Arc<Q>, handler: Arc<dyn JobHandler>, config: WorkerConfig) -> Self {
        Self { queue, handler, config }
    }

    /// Runs until `should_stop` returns true, polling for work between runs.
    pub async fn run_until(&self, mut should_stop: impl FnMut() -> bool) {
        info!(worker_id = %self.config.worker_id, "worker started");
        while !should_stop() {
            match self.tick(now_unix()).await {
                Ok(true) => {}
                Ok(false) => tokio::time::sleep(self.config.poll_interval).await,
                Err(err) => {
                    error!(worker_id = %self.config.worker_id, error = %err, "job queue error");
                    tokio::time::sleep(self.config.poll_interval).await;
                }
            }
        }
        info!(worker_id = %self.config.worker_id, "worker stopped");
    }

    /// Claims and executes at most one job. Returns `Ok(true)` if a job was
    /// claimed (whether it succeeded or failed), `Ok(false)` if the queue
    /// was empty.
    pub async fn tick(&self, now: i64) -> Result<bool, storage::StoreError> {
        let Some(job) = self
            .queue
            .claim(&self.config.worker_id, now, self.config.visibility_timeout_s, self.config.kind_filter)
            .await?
        else {
            return Ok(false);
        };

        let heartbeat_handle = self.spawn_heartbeat(job.id.clone());
        let outcome = self.handler.handle(&job).await;
        heartbeat_handle.abort();

        match outcome {
            Ok(()) => {
                self.queue.complete(&job.id, now_unix()).await?;
                info!(job_id = %job.id, kind = ?job.kind, "job completed");
            }
            Err(err) => {
                let code = err.error_code();
                let max_retries = if code.is_retryable() { self.config.max_retries } else { 0 };
                warn!(job_id = %job.id, kind = ?job.kind, error_code = %code, "job failed");
                self.queue.fail(&job.id, err.to_string(), now_unix(), max_retries).await?;
            }
        }
        Ok(true)
    }

    fn spawn_heartbeat(&self, job_id: String) -> tokio::task::JoinHandle<()> {
        let queue = self.queue.clone();
        let interval = self.config.heartbeat_interval;
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(interval).await;
                if queue.heartbeat(&job_id, now_unix()).await.is_err() {
                    return;
                }
            }
        })
    }
}

impl<Q: JobQueue + 'static> Clone for Worker<Q> {
    fn clone(&self) -> Self {
        Self {
            queue: self.queue.clone(),
            handler: self.handler.clone(),
            config: self.config.clone(),
        }
    }
}

fn now_unix() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

/// Periodic sweep that reclaims jobs whose worker crashed mid-heartbeat; in
/// this single-process queue, reclaim already happens inside `claim`, so the
/// reaper's only job is to surface terminally-stuck jobs for observability.
pub struct Reaper<Q: JobQueue> {
    queue: Arc<Q>,
}

impl<Q: JobQueue> Reaper<Q> {
    pub fn new(queue: Arc<Q>) -> Self {
        Self { queue }
    }

    pub async fn sweep_once(&self, worker_id: &str, visibility_timeout_s: i64) -> Result<usize, storage::StoreError> {
        let mut reclaimed = 0;
        while self
            .queue
            .claim(worker_id, now_unix(), visibility_timeout_s, None)
            .await?
            .is_some()
        {
            reclaimed += 1;
        }
        Ok(reclaimed)
    }
}
