use std::sync::Arc;

use llc_core::model::{Job, JobKind, JobStatus};
use storage::{RelationalStore, StoreError};

#[async_trait::async_trait]
pub trait JobQueue: Send + Sync {
    async fn enqueue(&self, job: Job) -> Result<(), StoreError>;
    async fn claim(&self, worker_id: &str, now: i64, visibility_timeout_s: i64, kind: Option<JobKind>) -> Result<Option<Job>, StoreError>;
    async fn heartbeat(&self, job_id: &str, now: i64) -> Result<(), StoreError>;
    async fn complete(&self, job_id: &str, now: i64) -> Result<(), StoreError>;
    async fn fail(&self, job_id: &str, error: String, now: i64, max_retries: u32) -> Result<(), StoreError>;
}

/// Cooperative job queue backed by [`RelationalStore`]'s WAL-durable job
/// table, simulating `FOR UPDATE SKIP LOCKED` with an in-process lock plus
/// heartbeat-expiry reclaim (§4.6).
pub struct RelationalJobQueue {
    store: Arc<RelationalStore>,
}

impl RelationalJobQueue {
    pub fn new(store: Arc<RelationalStore>) -> Self {
        Self { store }
    }
}

#[async_trait::async_trait]
impl JobQueue for RelationalJobQueue {
    async fn enqueue(&self, job: Job) -> Result<(), StoreError> {
        self.store.enqueue_job(job).await
    }

    async fn claim(&self, worker_id: &str, now: i64, visibility_timeout_s: i64, kind: Option<JobKind>) -> Result<Option<Job>, StoreError> {
        self.store.claim_job(worker_id, now, visibility_timeout_s, kind).await
    }

    async fn heartbeat(&self, job_id: &str, now: i64) -> Result<(), StoreError> {
        self.store.heartbeat_job(job_id, now).await
    }

    async fn complete(&self, job_id: &str, now: i64) -> Result<(), StoreError> {
        self.store.complete_job(job_id, now).await
    }

    async fn fail(&self, job_id: &str, error: String, now: i64, max_retries: u32) -> Result<(), StoreError> {
        self.store.fail_job(job_id, error, now, max_retries).await
    }
}

/// Still-queued status check used by callers polling for job completion
/// (e.g. the SDK's synchronous ingest convenience wrapper).
pub fn is_terminal(status: JobStatus) -> bool {
    matches!(status, JobStatus::Done | JobStatus::Failed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use llc_core::model::JobKind;
    use tempfile::tempdir;

    fn sample_job(id: &str) -> Job {
        Job {
            id: id.to_string(),
            kind: JobKind::Ingest,
            status: JobStatus::Queued,
            container_id: "c1".to_string(),
            payload: "{}".to_string(),
            retries: 0,
            worker_id: None,
            last_heartbeat: 0,
            error: None,
            created_at: 1,
            updated_at: 1,
        }
    }

    #[tokio::test]
    async fn enqueue_then_claim_round_trips() {
        let dir = tempdir().unwrap();
        let store = Arc::new(RelationalStore::open(dir.path().join("queue.wal")).await.unwrap());
        let queue = RelationalJobQueue::new(store);

        queue.enqueue(sample_job("job-1")).await.unwrap();
        let claimed = queue.claim("worker-a", 10, 900, None).await.unwrap().unwrap();
        assert_eq!(claimed.id, "job-1");
        assert_eq!(claimed.status, JobStatus::Running);
    }

    #[test]
    fn is_terminal_matches_done_and_failed_only() {
        assert!(is_terminal(JobStatus::Done));
        assert!(is_terminal(JobStatus::Failed));
        assert!(!is_terminal(JobStatus::Queued));
        assert!(!is_terminal(JobStatus::Running));
    }
}
