use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use llc_core::error::{ErrorCode, LlcError};
use llc_core::model::{Chunk, Container, Document, EmbeddingCacheEntry, Job, JobKind, JobStatus, Modality};
use rkyv::ser::{serializers::AllocSerializer, Serializer};
use rkyv::{Archive, Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::{Mutex, RwLock};

use crate::bm25_index::Bm25Store;
use crate::crypto::{AtRestCipher, NoOpCipher};
use crate::snapshot::{SnapshotError, SnapshotManager};
use crate::wal::{Wal, WalError};

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("WAL error: {0}")]
    Wal(#[from] WalError),
    #[error("serialization error")]
    Serialization,
    #[error("deserialization error")]
    Deserialization,
    #[error("container not found: {0}")]
    ContainerNotFound(String),
    #[error("document not found: {0}")]
    DocumentNotFound(String),
    #[error("chunk not found: {0}")]
    ChunkNotFound(String),
    #[error("job not found: {0}")]
    JobNotFound(String),
    #[error("duplicate source: container {container_id} already has a document with hash {content_hash}")]
    DuplicateSource {
        container_id: String,
        content_hash: String,
    },
    #[error("invalid transaction: {0}")]
    InvalidTransaction(String),
    #[error("snapshot error: {0}")]
    Snapshot(#[from] SnapshotError),
    #[error("snapshot manager is not configured")]
    SnapshotNotConfigured,
}

impl LlcError for StoreError {
    fn error_code(&self) -> ErrorCode {
        match self {
            StoreError::Wal(e) => e.error_code(),
            StoreError::Serialization | StoreError::Deserialization => ErrorCode::Internal,
            StoreError::ContainerNotFound(_) => ErrorCode::ContainerNotFound,
            StoreError::DocumentNotFound(_) | StoreError::ChunkNotFound(_) | StoreError::JobNotFound(_) => {
                ErrorCode::ContainerNotFound
            }
            StoreError::DuplicateSource { .. } => ErrorCode::DuplicateSource,
            StoreError::InvalidTransaction(_) => ErrorCode::InvalidParams,
            StoreError::Snapshot(e) => e.error_code(),
            StoreError::SnapshotNotConfigured => ErrorCode::Internal,
        }
    }
}

/// Durable WAL record shapes. `Transaction` groups the per-chunk mutations of
/// one ingest call so the whole batch commits or none of it does (§4.4).
#[derive(Archive, Deserialize, Serialize, Debug, Clone)]
#[archive(check_bytes)]
pub enum WalEntry {
    PutContainer(Container),
    PutDocument(Document),
    Transaction(Vec<TxOperation>),
    PutJob(Job),
    PutEmbeddingCache(EmbeddingCacheEntry),
}

#[derive(Archive, Deserialize, Serialize, Debug, Clone)]
#[archive(check_bytes)]
pub enum TxOperation {
    PutChunk(Chunk),
    DeleteChunk(String),
}

struct MaterializedState {
    containers: HashMap<String, Container>,
    documents: HashMap<String, Document>,
    doc_hash_index: HashMap<(String, String), String>,
    chunks: HashMap<String, Chunk>,
    jobs: HashMap<String, Job>,
    embedding_cache: HashMap<String, EmbeddingCacheEntry>,
}

impl MaterializedState {
    fn empty() -> Self {
        Self {
            containers: HashMap::new(),
            documents: HashMap::new(),
            doc_hash_index: HashMap::new(),
            chunks: HashMap::new(),
            jobs: HashMap::new(),
            embedding_cache: HashMap::new(),
        }
    }

    fn apply(&mut self, entry: &WalEntry) {
        match entry {
            WalEntry::PutContainer(container) => {
                self.containers.insert(container.id.clone(), container.clone());
            }
            WalEntry::PutDocument(document) => {
                self.doc_hash_index.insert(
                    (document.container_id.clone(), document.content_hash.clone()),
                    document.id.clone(),
                );
                self.documents.insert(document.id.clone(), document.clone());
            }
            WalEntry::Transaction(ops) => {
                for op in ops {
                    match op {
                        TxOperation::PutChunk(chunk) => {
                            self.chunks.insert(chunk.id.clone(), chunk.clone());
                        }
                        TxOperation::DeleteChunk(id) => {
                            self.chunks.remove(id);
                        }
                    }
                }
            }
            WalEntry::PutJob(job) => {
                self.jobs.insert(job.id.clone(), job.clone());
            }
            WalEntry::PutEmbeddingCache(entry) => {
                self.embedding_cache.insert(entry.key.clone(), entry.clone());
            }
        }
    }
}

/// The durable store behind containers/documents/chunks/jobs/embedding-cache
/// (§3, §4.4, §4.6). Text search runs through an in-process `Bm25Store`
/// rebuilt from chunk text on WAL replay; vector search is a separate
/// collaborator (`crate::vector::VectorStore`) since it has its own recovery
/// path (HNSW graphs aren't WAL-friendly to replay record-by-record).
pub struct RelationalStore {
    wal: Arc<Mutex<Wal>>,
    tx_lock: Arc<Mutex<()>>,
    containers: Arc<RwLock<HashMap<String, Container>>>,
    documents: Arc<RwLock<HashMap<String, Document>>>,
    doc_hash_index: Arc<RwLock<HashMap<(String, String), String>>>,
    chunks: Arc<RwLock<HashMap<String, Chunk>>>,
    jobs: Arc<RwLock<HashMap<String, Job>>>,
    embedding_cache: Arc<RwLock<HashMap<String, EmbeddingCacheEntry>>>,
    bm25: Bm25Store,
    snapshot_manager: Option<SnapshotManager>,
}

impl RelationalStore {
    pub async fn open(wal_path: impl AsRef<Path>) -> Result<Self, StoreError> {
        Self::open_with_cipher(wal_path, Arc::new(NoOpCipher)).await
    }

    pub async fn open_with_cipher(
        wal_path: impl AsRef<Path>,
        cipher: Arc<dyn AtRestCipher>,
    ) -> Result<Self, StoreError> {
        Self::open_internal(wal_path.as_ref().to_path_buf(), cipher, None).await
    }

    pub async fn open_with_snapshots(
        wal_path: impl AsRef<Path>,
        snapshot_dir: impl AsRef<Path>,
    ) -> Result<Self, StoreError> {
        let snapshot_manager = SnapshotManager::new(snapshot_dir.as_ref());
        Self::open_internal(
            wal_path.as_ref().to_path_buf(),
            Arc::new(NoOpCipher),
            Some(snapshot_manager),
        )
        .await
    }

    async fn open_internal(
        wal_path: PathBuf,
        cipher: Arc<dyn AtRestCipher>,
        snapshot_manager: Option<SnapshotManager>,
    ) -> Result<Self, StoreError> {
        let wal_instance = Wal::open_with_cipher(&wal_path, cipher).await?;
        let wal = Arc::new(Mutex::new(wal_instance));
        let tx_lock = Arc::new(Mutex::new(()));
        let mut materialized = MaterializedState::empty();

        {
            let mut wal_lock = wal.lock().await;
            wal_lock
                .replay(|_lsn, data| {
                    let archived = rkyv::check_archived_root::<WalEntry>(&data[..])
                        .map_err(|_| WalError::CorruptEntry)?;
                    let entry: WalEntry = archived.deserialize(&mut rkyv::Infallible).unwrap();
                    materialized.apply(&entry);
                    Ok(())
                })
                .await?;
        }

        let bm25 = Bm25Store::new();
        for chunk in materialized.chunks.values() {
            if let Some(text) = chunk.text.as_deref() {
                bm25.upsert(&chunk.container_id, chunk.modality, &chunk.id, text);
            }
        }

        Ok(Self {
            wal,
            tx_lock,
            containers: Arc::new(RwLock::new(materialized.containers)),
            documents: Arc::new(RwLock::new(materialized.documents)),
            doc_hash_index: Arc::new(RwLock::new(materialized.doc_hash_index)),
            chunks: Arc::new(RwLock::new(materialized.chunks)),
            jobs: Arc::new(RwLock::new(materialized.jobs)),
            embedding_cache: Arc::new(RwLock::new(materialized.embedding_cache)),
            bm25,
            snapshot_manager,
        })
    }

    async fn append(&self, entry: &WalEntry) -> Result<(), StoreError> {
        let mut serializer = AllocSerializer::<4096>::default();
        serializer
            .serialize_value(entry)
            .map_err(|_| StoreError::Serialization)?;
        let bytes = serializer.into_serializer().into_inner();

        let mut wal = self.wal.lock().await;
        wal.append(&bytes).await?;
        wal.flush().await?;
        Ok(())
    }

    pub async fn put_container(&self, container: Container) -> Result<(), StoreError> {
        self.append(&WalEntry::PutContainer(container.clone())).await?;
        self.containers.write().await.insert(container.id.clone(), container);
        Ok(())
    }

    pub async fn get_container(&self, id: &str) -> Result<Container, StoreError> {
        self.containers
            .read()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| StoreError::ContainerNotFound(id.to_string()))
    }

    pub async fn list_containers(&self) -> Vec<Container> {
        let mut out: Vec<Container> = self.containers.read().await.values().cloned().collect();
        out.sort_by(|a, b| a.id.cmp(&b.id));
        out
    }

    /// Inserts a document, rejecting an exact-hash re-ingest for the same
    /// container (§4.4 duplicate-source short circuit).
    pub async fn insert_document(&self, document: Document) -> Result<(), StoreError> {
        let key = (document.container_id.clone(), document.content_hash.clone());
        {
            let hash_index = self.doc_hash_index.read().await;
            if hash_index.contains_key(&key) {
                return Err(StoreError::DuplicateSource {
                    container_id: document.container_id.clone(),
                    content_hash: document.content_hash.clone(),
                });
            }
        }

        self.append(&WalEntry::PutDocument(document.clone())).await?;
        self.doc_hash_index.write().await.insert(key, document.id.clone());
        self.documents.write().await.insert(document.id.clone(), document);
        Ok(())
    }

    pub async fn find_document_by_hash(
        &self,
        container_id: &str,
        content_hash: &str,
    ) -> Option<Document> {
        let doc_id = self
            .doc_hash_index
            .read()
            .await
            .get(&(container_id.to_string(), content_hash.to_string()))
            .cloned()?;
        self.documents.read().await.get(&doc_id).cloned()
    }

    pub async fn get_document(&self, id: &str) -> Result<Document, StoreError> {
        self.documents
            .read()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| StoreError::DocumentNotFound(id.to_string()))
    }

    /// Inserts all chunks of one ingest batch in a single WAL transaction:
    /// either every chunk lands, or none does. Updates the BM25 index for
    /// chunks carrying text and not already marked as a dedup target.
    pub async fn insert_chunks(&self, chunks: Vec<Chunk>) -> Result<(), StoreError> {
        if chunks.is_empty() {
            return Ok(());
        }

        let _tx_guard = self.tx_lock.lock().await;

        let ops: Vec<TxOperation> = chunks.iter().cloned().map(TxOperation::PutChunk).collect();
        self.append(&WalEntry::Transaction(ops)).await?;

        let mut chunk_map = self.chunks.write().await;
        for chunk in &chunks {
            if let Some(text) = chunk.text.as_deref() {
                self.bm25.upsert(&chunk.container_id, chunk.modality, &chunk.id, text);
            }
            chunk_map.insert(chunk.id.clone(), chunk.clone());
        }
        Ok(())
    }

    pub async fn update_chunk(&self, chunk: Chunk) -> Result<(), StoreError> {
        self.append(&WalEntry::Transaction(vec![TxOperation::PutChunk(chunk.clone())]))
            .await?;
        self.chunks.write().await.insert(chunk.id.clone(), chunk);
        Ok(())
    }

    pub async fn get_chunk(&self, id: &str) -> Result<Chunk, StoreError> {
        self.chunks
            .read()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| StoreError::ChunkNotFound(id.to_string()))
    }

    pub async fn get_chunks_by_ids(&self, ids: &[String]) -> Vec<Chunk> {
        let chunks = self.chunks.read().await;
        ids.iter().filter_map(|id| chunks.get(id).cloned()).collect()
    }

    pub async fn delete_chunks(&self, ids: &[String]) -> Result<(), StoreError> {
        if ids.is_empty() {
            return Ok(());
        }
        let ops: Vec<TxOperation> = ids.iter().cloned().map(TxOperation::DeleteChunk).collect();
        self.append(&WalEntry::Transaction(ops)).await?;

        let mut chunk_map = self.chunks.write().await;
        for id in ids {
            chunk_map.remove(id);
        }
        Ok(())
    }

    pub async fn chunks_needing_reconcile(&self, container_id: &str) -> Vec<Chunk> {
        self.chunks
            .read()
            .await
            .values()
            .filter(|c| c.container_id == container_id && c.needs_vector_reconcile())
            .cloned()
            .collect()
    }

    pub fn bm25_search(
        &self,
        container_id: &str,
        modality: Modality,
        query: &str,
        k: usize,
    ) -> Vec<(String, f32)> {
        self.bm25.search(container_id, modality, query, k)
    }

    pub async fn upsert_embedding_cache(&self, entry: EmbeddingCacheEntry) -> Result<(), StoreError> {
        self.append(&WalEntry::PutEmbeddingCache(entry.clone())).await?;
        self.embedding_cache.write().await.insert(entry.key.clone(), entry);
        Ok(())
    }

    pub async fn read_embedding_cache(&self, key: &str) -> Option<EmbeddingCacheEntry> {
        self.embedding_cache.read().await.get(key).cloned()
    }

    // -- Job queue (§4.6), cooperative single-process FOR UPDATE SKIP LOCKED analog --

    pub async fn enqueue_job(&self, job: Job) -> Result<(), StoreError> {
        self.append(&WalEntry::PutJob(job.clone())).await?;
        self.jobs.write().await.insert(job.id.clone(), job);
        Ok(())
    }

    /// Claims the oldest `Queued` job, or a `Running` job whose heartbeat has
    /// expired (crashed worker), of the given kind filter. Locks the full job
    /// table for the claim so no two workers can win the same job.
    pub async fn claim_job(
        &self,
        worker_id: &str,
        now: i64,
        visibility_timeout_s: i64,
        kind_filter: Option<JobKind>,
    ) -> Result<Option<Job>, StoreError> {
        let _tx_guard = self.tx_lock.lock().await;

        let candidate_id = {
            let jobs = self.jobs.read().await;
            let mut candidates: Vec<&Job> = jobs
                .values()
                .filter(|job| kind_filter.map(|k| k == job.kind).unwrap_or(true))
                .filter(|job| match job.status {
                    JobStatus::Queued => true,
                    JobStatus::Running => !job.is_heartbeat_alive(now, visibility_timeout_s),
                    _ => false,
                })
                .collect();
            candidates.sort_by_key(|job| job.created_at);
            candidates.first().map(|job| job.id.clone())
        };

        let Some(job_id) = candidate_id else {
            return Ok(None);
        };

        let mut job = self.get_job(&job_id).await?;
        job.status = JobStatus::Running;
        job.worker_id = Some(worker_id.to_string());
        job.last_heartbeat = now;
        job.updated_at = now;

        self.append(&WalEntry::PutJob(job.clone())).await?;
        self.jobs.write().await.insert(job.id.clone(), job.clone());
        Ok(Some(job))
    }

    pub async fn heartbeat_job(&self, job_id: &str, now: i64) -> Result<(), StoreError> {
        let mut job = self.get_job(job_id).await?;
        job.last_heartbeat = now;
        job.updated_at = now;
        self.append(&WalEntry::PutJob(job.clone())).await?;
        self.jobs.write().await.insert(job.id.clone(), job);
        Ok(())
    }

    pub async fn complete_job(&self, job_id: &str, now: i64) -> Result<(), StoreError> {
        let mut job = self.get_job(job_id).await?;
        job.status = JobStatus::Done;
        job.updated_at = now;
        self.append(&WalEntry::PutJob(job.clone())).await?;
        self.jobs.write().await.insert(job.id.clone(), job);
        Ok(())
    }

    /// Marks a job failed. Requeues it (back to `Queued`) unless `retries`
    /// has reached `max_retries`, in which case it is terminally `Failed`.
    pub async fn fail_job(
        &self,
        job_id: &str,
        error: impl Into<String>,
        now: i64,
        max_retries: u32,
    ) -> Result<(), StoreError> {
        let mut job = self.get_job(job_id).await?;
        job.retries += 1;
        job.error = Some(error.into());
        job.updated_at = now;
        job.status = if job.retries >= max_retries {
            JobStatus::Failed
        } else {
            job.worker_id = None;
            JobStatus::Queued
        };

        self.append(&WalEntry::PutJob(job.clone())).await?;
        self.jobs.write().await.insert(job.id.clone(), job);
        Ok(())
    }

    pub async fn get_job(&self, job_id: &str) -> Result<Job, StoreError> {
        self.jobs
            .read()
            .await
            .get(job_id)
            .cloned()
            .ok_or_else(|| StoreError::JobNotFound(job_id.to_string()))
    }

    pub async fn list_jobs(&self, container_id: &str) -> Vec<Job> {
        let mut out: Vec<Job> = self
            .jobs
            .read()
            .await
            .values()
            .filter(|j| j.container_id == container_id)
            .cloned()
            .collect();
        out.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        out
    }

    pub async fn current_lsn(&self) -> u64 {
        self.wal.lock().await.current_lsn()
    }

    pub async fn create_backup_snapshot(&self) -> Result<String, StoreError> {
        let _ = self
            .snapshot_manager
            .as_ref()
            .ok_or(StoreError::SnapshotNotConfigured)?;
        // Durable recovery runs entirely off WAL replay; backup snapshots are
        // a point-in-time convenience for faster cold starts, not required
        // for correctness, so no compaction work happens here yet.
        let lsn = self.current_lsn().await;
        Ok(format!("wal-lsn-{lsn}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use llc_core::model::{ContainerPolicy, ContainerState, DocumentState, Provenance};
    use tempfile::tempdir;

    fn sample_container(id: &str) -> Container {
        Container {
            id: id.to_string(),
            slug: format!("{id}-slug"),
            theme: "art history".to_string(),
            allowed_modalities: vec![Modality::Text],
            embedder_name: "embedding-default".to_string(),
            embedder_version: "v1".to_string(),
            dims: 8,
            policy: ContainerPolicy::default(),
            state: ContainerState::Active,
            parent_id: None,
            created_at: 0,
        }
    }

    fn sample_document(container_id: &str, hash: &str) -> Document {
        Document {
            id: format!("doc-{hash}"),
            container_id: container_id.to_string(),
            uri: "https://example.com/a".to_string(),
            mime: "text/plain".to_string(),
            content_hash: hash.to_string(),
            title: "A".to_string(),
            size_bytes: 10,
            state: DocumentState::Active,
            created_at: 0,
        }
    }

    fn sample_chunk(id: &str, container_id: &str, text: &str) -> Chunk {
        Chunk {
            id: id.to_string(),
            container_id: container_id.to_string(),
            doc_id: "doc-1".to_string(),
            modality: Modality::Text,
            text: Some(text.to_string()),
            token_offsets: Some((0, 4)),
            provenance: Provenance {
                source_uri: "https://example.com/a".to_string(),
                ingested_at: 0,
                pipeline: "text".to_string(),
                handler_version: "v1".to_string(),
                embedder_name: "embedding-default".to_string(),
                embedder_version: "v1".to_string(),
                page: None,
                section: None,
            },
            meta: HashMap::new(),
            embedding_version: "v1".to_string(),
            dedup_of: None,
        }
    }

    #[tokio::test]
    async fn insert_document_rejects_duplicate_hash_in_same_container() {
        let dir = tempdir().unwrap();
        let store = RelationalStore::open(dir.path().join("store.wal")).await.unwrap();

        store.insert_document(sample_document("c1", "hash-a")).await.unwrap();
        let dup = store.insert_document(sample_document("c1", "hash-a")).await;
        assert!(matches!(dup, Err(StoreError::DuplicateSource { .. })));
    }

    #[tokio::test]
    async fn insert_chunks_is_atomic_and_searchable_via_bm25() {
        let dir = tempdir().unwrap();
        let store = RelationalStore::open(dir.path().join("store.wal")).await.unwrap();
        store.put_container(sample_container("c1")).await.unwrap();

        store
            .insert_chunks(vec![
                sample_chunk("chunk-1", "c1", "expressionist color theory"),
                sample_chunk("chunk-2", "c1", "sourdough bread recipe"),
            ])
            .await
            .unwrap();

        let hits = store.bm25_search("c1", Modality::Text, "expressionist", 5);
        assert_eq!(hits[0].0, "chunk-1");
    }

    #[tokio::test]
    async fn state_survives_wal_replay() {
        let dir = tempdir().unwrap();
        let wal_path = dir.path().join("store.wal");

        {
            let store = RelationalStore::open(&wal_path).await.unwrap();
            store.put_container(sample_container("c1")).await.unwrap();
            store
                .insert_chunks(vec![sample_chunk("chunk-1", "c1", "expressionist color theory")])
                .await
                .unwrap();
        }

        let reopened = RelationalStore::open(&wal_path).await.unwrap();
        assert!(reopened.get_container("c1").await.is_ok());
        assert!(reopened.get_chunk("chunk-1").await.is_ok());
        let hits = reopened.bm25_search("c1", Modality::Text, "expressionist", 5);
        assert_eq!(hits[0].0, "chunk-1");
    }

    #[tokio::test]
    async fn claim_job_picks_oldest_queued_and_is_idempotent_per_worker() {
        let dir = tempdir().unwrap();
        let store = RelationalStore::open(dir.path().join("jobs.wal")).await.unwrap();

        store
            .enqueue_job(Job {
                id: "job-1".to_string(),
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
            })
            .await
            .unwrap();

        let claimed = store.claim_job("worker-a", 10, 900, None).await.unwrap().unwrap();
        assert_eq!(claimed.status, JobStatus::Running);
        assert_eq!(claimed.worker_id.as_deref(), Some("worker-a"));

        let none_left = store.claim_job("worker-b", 10, 900, None).await.unwrap();
        assert!(none_left.is_none());
    }

    #[tokio::test]
    async fn claim_job_reclaims_expired_heartbeat() {
        let dir = tempdir().unwrap();
        let store = RelationalStore::open(dir.path().join("jobs_expired.wal")).await.unwrap();

        store
            .enqueue_job(Job {
                id: "job-1".to_string(),
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
            })
            .await
            .unwrap();

        store.claim_job("worker-a", 10, 900, None).await.unwrap();
        let reclaimed = store
            .claim_job("worker-b", 10_000, 900, None)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(reclaimed.worker_id.as_deref(), Some("worker-b"));
    }

    #[tokio::test]
    async fn fail_job_requeues_until_max_retries_then_terminally_fails() {
        let dir = tempdir().unwrap();
        let store = RelationalStore::open(dir.path().join("jobs_fail.wal")).await.unwrap();

        store
            .enqueue_job(Job {
                id: "job-1".to_string(),
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
            })
            .await
            .unwrap();

        for attempt in 0..3 {
            let claimed = store.claim_job("worker-a", 10, 900, None).await.unwrap();
            let job = claimed.unwrap_or_else(|| panic!("expected job on attempt {attempt}"));
            store.fail_job(&job.id, "boom", 11, 3).await.unwrap();
        }

        let job = store.get_job("job-1").await.unwrap();
        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.retries, 3);
    }
}
