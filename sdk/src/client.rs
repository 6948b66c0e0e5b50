use std::sync::Arc;

use ingestion::api::{JsonIngestionPayload, UriIngestionPayload};
use ingestion::chunker::SemanticChunker;
use ingestion::embedding::Embedder;
use ingestion::policy::NoOpPolicy;
use ingestion::{IngestionError, IngestionPipeline};
use jobs::{JobQueue, RelationalJobQueue};
use llc_core::error::{ErrorCode, LlcError};
use llc_core::model::{Container, Job, JobKind, JobStatus};
use query::{RetrievalEngine, RetrievalEngineConfig, SearchError, SearchRequest, SearchResponse};
use serde::{Deserialize, Serialize};
use slm::RerankAdapter;
use storage::{BlobStore, RelationalStore, StoreError, VectorStore};
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum SdkError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Ingestion(#[from] IngestionError),
    #[error(transparent)]
    Search(#[from] SearchError),
    #[error("container not found: {0}")]
    ContainerNotFound(String),
    #[error("job not found: {0}")]
    JobNotFound(String),
}

impl LlcError for SdkError {
    fn error_code(&self) -> ErrorCode {
        match self {
            SdkError::Store(e) => e.error_code(),
            SdkError::Ingestion(e) => e.error_code(),
            SdkError::Search(e) => e.error_code(),
            SdkError::ContainerNotFound(_) => ErrorCode::ContainerNotFound,
            SdkError::JobNotFound(_) => ErrorCode::ContainerNotFound,
        }
    }
}

/// One ingest source as carried on the wire (§6 `sources: [{uri|file_ref, ...}]`).
/// Tagged so the same shape round-trips through a job's `payload` column
/// when `mode: async` defers the work to the worker pool (§4.6).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SourceSpec {
    Inline(JsonIngestionPayload),
    Uri(UriIngestionPayload),
}

impl SourceSpec {
    pub(crate) fn into_source(self) -> llc_core::ingest::Source {
        match self {
            SourceSpec::Inline(payload) => payload.into_source(),
            SourceSpec::Uri(payload) => payload.into_source(),
        }
    }

    pub(crate) fn display_uri(&self) -> String {
        match self {
            SourceSpec::Inline(_) => "inline".to_string(),
            SourceSpec::Uri(p) => p.uri.clone(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IngestMode {
    Async,
    Blocking,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestRequest {
    pub container_id: String,
    pub sources: Vec<SourceSpec>,
    pub mode: IngestMode,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobStub {
    pub job_id: String,
    pub source_uri: String,
    pub status: String,
    pub submitted_at: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestedDocument {
    pub source_uri: String,
    pub document_id: String,
    pub chunk_ids: Vec<String>,
    pub pending_reconcile: Vec<String>,
    pub issues: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum IngestResponse {
    Queued(Vec<JobStub>),
    Completed(Vec<IngestedDocument>),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobStatusResponse {
    pub status: JobStatus,
    pub retries: u32,
    pub last_heartbeat: i64,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContainerSummary {
    pub id: String,
    pub slug: String,
    pub theme: String,
    pub state: llc_core::model::ContainerState,
    pub embedder_name: String,
    pub dims: u32,
}

/// Job payload persisted for `JobKind::Ingest` (see [`crate::handler::IngestJobHandler`]).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestJobPayload {
    pub container_id: String,
    pub source: SourceSpec,
}

#[derive(Debug, Clone)]
pub struct LlcClientConfig {
    pub embedding_rate_per_min: u32,
    pub rerank_model_id: String,
    pub retrieval: RetrievalEngineConfig,
}

impl Default for LlcClientConfig {
    fn default() -> Self {
        Self {
            embedding_rate_per_min: 120,
            rerank_model_id: "rerank-default-v1".to_string(),
            retrieval: RetrievalEngineConfig::default(),
        }
    }
}

/// The in-process composition root: one `LlcClient` wires together the
/// relational store, vector store, blob store, embedding/rerank adapters,
/// job queue, ingestion pipeline and retrieval engine behind the four §6
/// operations.
pub struct LlcClient {
    pub store: Arc<RelationalStore>,
    pub vectors: Arc<VectorStore>,
    pub blobs: Arc<BlobStore>,
    pub queue: Arc<RelationalJobQueue>,
    pipeline: IngestionPipeline,
    engine: RetrievalEngine,
}

impl LlcClient {
    pub async fn open(
        wal_path: impl AsRef<std::path::Path>,
        blob_root: impl AsRef<std::path::Path>,
        hnsw: llc_core::config::HnswConfig,
        config: LlcClientConfig,
    ) -> Result<Self, SdkError> {
        let store = Arc::new(RelationalStore::open(wal_path).await?);
        let vectors = Arc::new(VectorStore::new(hnsw));
        let blobs = Arc::new(BlobStore::new(blob_root));
        let queue = Arc::new(RelationalJobQueue::new(store.clone()));

        let embedder = Arc::new(slm::EmbeddingAdapter::new(
            store.clone(),
            "embed-default-v1",
            768,
            config.embedding_rate_per_min,
        ));
        let dyn_embedder: Arc<dyn Embedder> = embedder.clone();
        let reranker = Arc::new(RerankAdapter::new(config.rerank_model_id.clone()));

        let pipeline = IngestionPipeline::new(
            store.clone(),
            vectors.clone(),
            blobs.clone(),
            Box::new(SemanticChunker::default()),
            dyn_embedder,
            Box::new(NoOpPolicy),
        )
        .with_job_queue(queue.clone() as Arc<dyn JobQueue>);

        let engine = RetrievalEngine::new(store.clone(), vectors.clone(), embedder, reranker, config.retrieval);

        Ok(Self { store, vectors, blobs, queue, pipeline, engine })
    }

    pub async fn search(&self, request: SearchRequest) -> Result<SearchResponse, SearchError> {
        self.engine.search(request).await
    }

    pub async fn ingest(&self, request: IngestRequest) -> Result<IngestResponse, SdkError> {
        let container = self
            .store
            .get_container(&request.container_id)
            .await
            .map_err(|_| SdkError::ContainerNotFound(request.container_id.clone()))?;

        match request.mode {
            IngestMode::Blocking => self.ingest_blocking(&container, request.sources).await,
            IngestMode::Async => self.ingest_async(&container, request.sources).await,
        }
    }

    async fn ingest_blocking(&self, container: &Container, sources: Vec<SourceSpec>) -> Result<IngestResponse, SdkError> {
        let mut completed = Vec::with_capacity(sources.len());
        for spec in sources {
            let source_uri = spec.display_uri();
            let outcome = self.pipeline.ingest(container, spec.into_source()).await?;
            completed.push(IngestedDocument {
                source_uri,
                document_id: outcome.document_id,
                chunk_ids: outcome.chunk_ids,
                pending_reconcile: outcome.pending_reconcile,
                issues: outcome.issues,
            });
        }
        Ok(IngestResponse::Completed(completed))
    }

    async fn ingest_async(&self, container: &Container, sources: Vec<SourceSpec>) -> Result<IngestResponse, SdkError> {
        let now = now_unix();
        let mut stubs = Vec::with_capacity(sources.len());
        for spec in sources {
            let source_uri = spec.display_uri();
            let payload = IngestJobPayload { container_id: container.id.clone(), source: spec };
            let job_id = format!("job-{}", Uuid::new_v4());
            let job = Job {
                id: job_id.clone(),
                kind: JobKind::Ingest,
                status: JobStatus::Queued,
                container_id: container.id.clone(),
                payload: serde_json::to_string(&payload).map_err(|_| SdkError::ContainerNotFound(container.id.clone()))?,
                retries: 0,
                worker_id: None,
                last_heartbeat: now,
                error: None,
                created_at: now,
                updated_at: now,
            };
            self.store.enqueue_job(job).await?;
            stubs.push(JobStub {
                job_id,
                source_uri,
                status: "queued".to_string(),
                submitted_at: now,
            });
        }
        Ok(IngestResponse::Queued(stubs))
    }

    pub async fn describe_containers(&self) -> Vec<ContainerSummary> {
        self.store
            .list_containers()
            .await
            .into_iter()
            .map(|c| ContainerSummary {
                id: c.id,
                slug: c.slug,
                theme: c.theme,
                state: c.state,
                embedder_name: c.embedder_name,
                dims: c.dims,
            })
            .collect()
    }

    pub async fn job_status(&self, job_id: &str) -> Result<JobStatusResponse, SdkError> {
        let job = self.store.get_job(job_id).await.map_err(|_| SdkError::JobNotFound(job_id.to_string()))?;
        Ok(JobStatusResponse {
            status: job.status,
            retries: job.retries,
            last_heartbeat: job.last_heartbeat,
            error: job.error,
        })
    }

    pub fn pipeline(&self) -> &IngestionPipeline {
        &self.pipeline
    }
}

fn now_unix() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}
