use std::sync::Arc;

use dashmap::DashMap;
use jobs::JobQueue;
use llc_core::error::{ErrorCode, LlcError};
use llc_core::ingest::{sha256_hex, ContentHash, Source};
use llc_core::model::{
    Chunk, Container, Document, DocumentState, Job, JobKind, JobStatus, Modality, Provenance,
};
use thiserror::Error;
use tokio::sync::Mutex as AsyncMutex;
use tracing::warn;

use crate::chunker::{ChunkDraft, Chunker};
use crate::embedding::Embedder;
use crate::extract::{extract_pdf_pages, extract_utf8, extract_web_main_content, resolve_modality};
use crate::policy::{check_modality_allowed, ContentPolicy, PolicyError};

const MAX_RECONCILE_ATTEMPTS: u32 = 3;

#[derive(Debug, Error)]
pub enum IngestionError {
    #[error("content could not be extracted: {0}")]
    ExtractionFailed(String),
    #[error("source content is not valid UTF-8")]
    InvalidUtf8,
    #[error("source has no bytes attached; uri-only sources must be pre-fetched by the caller")]
    MissingBytes,
    #[error("modality could not be determined for this source")]
    UnknownModality,
    #[error(transparent)]
    Store(#[from] storage::StoreError),
    #[error(transparent)]
    Blob(#[from] storage::BlobError),
    #[error(transparent)]
    Policy(#[from] PolicyError),
}

impl LlcError for IngestionError {
    fn error_code(&self) -> ErrorCode {
        match self {
            IngestionError::ExtractionFailed(_) | IngestionError::InvalidUtf8 | IngestionError::MissingBytes | IngestionError::UnknownModality => {
                ErrorCode::IngestFail
            }
            IngestionError::Store(e) => e.error_code(),
            IngestionError::Blob(e) => e.error_code(),
            IngestionError::Policy(PolicyError::ForbiddenContent(_)) => ErrorCode::IngestFail,
            IngestionError::Policy(PolicyError::BlockedModality(_)) => ErrorCode::BlockedModality,
        }
    }
}

#[derive(Debug, Clone)]
pub struct IngestOutcome {
    pub document_id: String,
    pub chunk_ids: Vec<String>,
    /// Chunk ids whose vector upsert failed and were flagged for reconcile
    /// (§4.4: the chunk row still lands, only the vector is deferred).
    pub pending_reconcile: Vec<String>,
    /// Non-fatal issues surfaced alongside a successful outcome, e.g.
    /// `DUPLICATE_SOURCE` when the source content hash already has a
    /// document in this container.
    pub issues: Vec<String>,
}

enum ExtractedContent {
    Text(String),
    PdfPages(Vec<String>),
    Image,
}

/// Drives the per-source ingest sequence: content hash, per-key idempotency
/// lock, modality resolution and policy check, extraction, chunking,
/// embedding with semantic dedup, atomic document+chunk insert, and a
/// best-effort vector upsert pass that falls back to reconcile-job flagging
/// on failure (§4.4).
pub struct IngestionPipeline {
    store: Arc<storage::RelationalStore>,
    vectors: Arc<storage::VectorStore>,
    blobs: Arc<storage::BlobStore>,
    chunker: Box<dyn Chunker>,
    embedder: Arc<dyn Embedder>,
    policy: Box<dyn ContentPolicy>,
    queue: Option<Arc<dyn JobQueue>>,
    locks: DashMap<String, Arc<AsyncMutex<()>>>,
}

impl IngestionPipeline {
    pub fn new(
        store: Arc<storage::RelationalStore>,
        vectors: Arc<storage::VectorStore>,
        blobs: Arc<storage::BlobStore>,
        chunker: Box<dyn Chunker>,
        embedder: Arc<dyn Embedder>,
        policy: Box<dyn ContentPolicy>,
    ) -> Self {
        Self {
            store,
            vectors,
            blobs,
            chunker,
            embedder,
            policy,
            queue: None,
            locks: DashMap::new(),
        }
    }

    pub fn with_job_queue(mut self, queue: Arc<dyn JobQueue>) -> Self {
        self.queue = Some(queue);
        self
    }

    pub async fn ingest(&self, container: &Container, source: Source) -> Result<IngestOutcome, IngestionError> {
        let content_hash = source.content_hash();
        let lock = self.lock_for(&container.id, &content_hash);
        let _guard = lock.lock().await;

        if let Some(existing) = self.store.find_document_by_hash(&container.id, &content_hash).await {
            return Ok(IngestOutcome {
                document_id: existing.id,
                chunk_ids: Vec::new(),
                pending_reconcile: Vec::new(),
                issues: vec!["DUPLICATE_SOURCE".to_string()],
            });
        }

        let modality = resolve_modality(
            source.modality,
            source.mime.as_deref().unwrap_or(""),
            source.filename.as_deref(),
        )
        .ok_or(IngestionError::UnknownModality)?;
        check_modality_allowed(modality, &container.allowed_modalities)?;

        let extracted = self.extract_content(&source, modality)?;
        let now = now_unix();
        let doc_id = format!("doc-{}", &content_hash[..16.min(content_hash.len())]);
        let filename = source.filename.clone().unwrap_or_else(|| "source".to_string());
        let original_bytes = source.file_ref.clone().unwrap_or_default();

        self.blobs
            .put(&container.id, &doc_id, storage::BlobKind::Original, &filename, &original_bytes)
            .await?;

        let drafts = self.drafts_for(&extracted, &source, container).await?;
        let (chunks, vector_batch, mut reconcile_ids) = self.materialize_chunks(container, &doc_id, drafts, &source, now).await?;

        let document = Document {
            id: doc_id.clone(),
            container_id: container.id.clone(),
            uri: source.uri.clone().unwrap_or_else(|| filename.clone()),
            mime: source.mime.clone().unwrap_or_default(),
            content_hash: content_hash.clone(),
            title: source.title.clone().unwrap_or_else(|| filename.clone()),
            size_bytes: original_bytes.len() as u64,
            state: DocumentState::Active,
            created_at: now,
        };

        self.store.insert_document(document).await?;
        let chunk_ids: Vec<String> = chunks.iter().map(|c| c.id.clone()).collect();
        self.store.insert_chunks(chunks).await?;

        for (chunk_id, vec_modality, vector) in vector_batch {
            if self.vectors.upsert(&container.id, vec_modality, &chunk_id, &vector).is_err() {
                reconcile_ids.push(chunk_id);
            }
        }

        for chunk_id in &reconcile_ids {
            self.flag_for_reconcile(container, chunk_id, now).await;
        }

        Ok(IngestOutcome {
            document_id: doc_id,
            chunk_ids,
            pending_reconcile: reconcile_ids,
            issues: Vec::new(),
        })
    }

    /// Re-embeds and re-uploads vectors for chunks still flagged
    /// `needs_vector_reconcile`. A chunk that fails three times is soft
    /// deleted rather than left to retry forever (§4.4, §4.6).
    pub async fn reconcile_container(&self, container: &Container) -> usize {
        let mut recovered = 0;
        for mut chunk in self.store.chunks_needing_reconcile(&container.id).await {
            let Some(text) = chunk.text.clone() else {
                let _ = self.store.delete_chunks(&[chunk.id.clone()]).await;
                continue;
            };
            let chunk_hash = sha256_hex(text.as_bytes());
            match self.embedder.embed(&text, &chunk_hash, chunk.modality).await {
                Ok(outcome) => {
                    let vector = outcome.into_vector();
                    if self.vectors.upsert(&container.id, chunk.modality, &chunk.id, &vector).is_ok() {
                        chunk.set_needs_vector_reconcile(false);
                        chunk.embedding_version = container.embedder_version.clone();
                        let _ = self.store.update_chunk(chunk).await;
                        recovered += 1;
                        continue;
                    }
                }
                Err(err) => warn!(chunk_id = %chunk.id, error = %err, "reconcile embed failed"),
            }

            if chunk.bump_reconcile_attempts() >= MAX_RECONCILE_ATTEMPTS {
                warn!(chunk_id = %chunk.id, "reconcile attempts exhausted, soft deleting chunk");
                let _ = self.store.delete_chunks(&[chunk.id.clone()]).await;
            } else {
                let _ = self.store.update_chunk(chunk).await;
            }
        }
        recovered
    }

    fn lock_for(&self, container_id: &str, content_hash: &str) -> Arc<AsyncMutex<()>> {
        let key = format!("{container_id}:{content_hash}");
        self.locks.entry(key).or_insert_with(|| Arc::new(AsyncMutex::new(()))).clone()
    }

    fn extract_content(&self, source: &Source, modality: Modality) -> Result<ExtractedContent, IngestionError> {
        match modality {
            Modality::Text => {
                let text = extract_utf8(source_bytes(source)?).map_err(|_| IngestionError::InvalidUtf8)?;
                Ok(ExtractedContent::Text(text))
            }
            Modality::Web => {
                let html = extract_utf8(source_bytes(source)?).map_err(|_| IngestionError::InvalidUtf8)?;
                Ok(ExtractedContent::Text(extract_web_main_content(&html)))
            }
            Modality::Pdf => {
                let pages = extract_pdf_pages(source_bytes(source)?).ok_or_else(|| IngestionError::ExtractionFailed("pdf".to_string()))?;
                Ok(ExtractedContent::PdfPages(pages))
            }
            Modality::Image => Ok(ExtractedContent::Image),
        }
    }

    /// Runs extracted text through the semantic chunker to get ~600-token
    /// pieces with overlap, tagging each with its originating page (if any).
    /// Non-text modalities get a single chunk draft with no text.
    async fn drafts_for(
        &self,
        extracted: &ExtractedContent,
        source: &Source,
        container: &Container,
    ) -> Result<Vec<(ChunkDraft, Option<u32>)>, IngestionError> {
        match extracted {
            ExtractedContent::Text(text) => {
                let text = self.policy.apply(text)?;
                let pieces = self.chunker.chunk_text(&text, source.meta.clone()).await;
                Ok(pieces.into_iter().map(|draft| (draft, None)).collect())
            }
            ExtractedContent::PdfPages(pages) => {
                let mut out = Vec::new();
                for (i, page_text) in pages.iter().enumerate() {
                    let page_num = i as u32 + 1;
                    let page_text = self.policy.apply(page_text)?;
                    let mut meta = source.meta.clone();
                    meta.insert("page".to_string(), page_num.to_string());
                    for draft in self.chunker.chunk_text(&page_text, meta.clone()).await {
                        out.push((draft, Some(page_num)));
                    }
                    if container.allows(Modality::Image) {
                        let mut image_meta = meta;
                        image_meta.insert("pdf_page_dpi".to_string(), "150".to_string());
                        out.push((
                            ChunkDraft {
                                text: None,
                                modality: Modality::Image,
                                meta: image_meta,
                            },
                            Some(page_num),
                        ));
                    }
                }
                Ok(out)
            }
            ExtractedContent::Image => Ok(vec![(
                ChunkDraft {
                    text: None,
                    modality: Modality::Image,
                    meta: source.meta.clone(),
                },
                None,
            )]),
        }
    }

    #[allow(clippy::type_complexity)]
    async fn materialize_chunks(
        &self,
        container: &Container,
        doc_id: &str,
        drafts: Vec<(ChunkDraft, Option<u32>)>,
        source: &Source,
        now: i64,
    ) -> Result<(Vec<Chunk>, Vec<(String, Modality, Vec<f32>)>, Vec<String>), IngestionError> {
        let mut chunks = Vec::with_capacity(drafts.len());
        let mut vector_batch = Vec::new();
        let mut reconcile_ids = Vec::new();

        for (i, (draft, page)) in drafts.into_iter().enumerate() {
            let chunk_id = format!("{doc_id}-chunk-{i}");
            let mut dedup_of = None;
            let mut embedding_version = String::new();

            if let Some(text) = draft.text.as_deref() {
                let chunk_hash = sha256_hex(text.as_bytes());
                match self.embedder.embed(text, &chunk_hash, draft.modality).await {
                    Ok(outcome) => {
                        let vector = outcome.into_vector();
                        self.vectors.ensure_collection(&container.id, draft.modality, vector.len());
                        if let Some((neighbor_id, score)) = self.vectors.search(&container.id, draft.modality, &vector, 1).into_iter().next() {
                            if score >= container.policy.ingest_dedup_threshold {
                                dedup_of = Some(neighbor_id);
                            }
                        }
                        embedding_version = container.embedder_version.clone();
                        if dedup_of.is_none() {
                            vector_batch.push((chunk_id.clone(), draft.modality, vector));
                        }
                    }
                    Err(err) => {
                        warn!(chunk_id = %chunk_id, error = %err, "embedding failed during ingest, deferring vector");
                        reconcile_ids.push(chunk_id.clone());
                    }
                }
            }

            let provenance = Provenance {
                source_uri: source.uri.clone().unwrap_or_default(),
                ingested_at: now,
                pipeline: "ingestion".to_string(),
                handler_version: "v1".to_string(),
                embedder_name: container.embedder_name.clone(),
                embedder_version: embedding_version.clone(),
                page,
                section: draft.meta.get("heading").cloned(),
            };

            let mut chunk = Chunk {
                id: chunk_id.clone(),
                container_id: container.id.clone(),
                doc_id: doc_id.to_string(),
                modality: draft.modality,
                text: draft.text,
                token_offsets: None,
                provenance,
                meta: draft.meta,
                embedding_version,
                dedup_of,
            };
            if reconcile_ids.contains(&chunk_id) {
                chunk.set_needs_vector_reconcile(true);
            }
            chunks.push(chunk);
        }

        Ok((chunks, vector_batch, reconcile_ids))
    }

    async fn flag_for_reconcile(&self, container: &Container, chunk_id: &str, now: i64) {
        if let Ok(mut chunk) = self.store.get_chunk(chunk_id).await {
            if !chunk.needs_vector_reconcile() {
                chunk.set_needs_vector_reconcile(true);
                let _ = self.store.update_chunk(chunk).await;
            }
        }
        if let Some(queue) = &self.queue {
            let job = Job {
                id: format!("reconcile-{chunk_id}"),
                kind: JobKind::Refresh,
                status: JobStatus::Queued,
                container_id: container.id.clone(),
                payload: chunk_id.to_string(),
                retries: 0,
                worker_id: None,
                last_heartbeat: 0,
                error: None,
                created_at: now,
                updated_at: now,
            };
            let _ = queue.enqueue(job).await;
        }
    }
}

fn source_bytes(source: &Source) -> Result<&[u8], IngestionError> {
    source.file_ref.as_deref().ok_or(IngestionError::MissingBytes)
}

fn now_unix() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use llc_core::model::{ContainerPolicy, ContainerState};
    use llc_core::ingest::SourceModality;
    use tempfile::tempdir;

    async fn pipeline(dir: &std::path::Path) -> IngestionPipeline {
        let store = Arc::new(storage::RelationalStore::open(dir.join("store.wal")).await.unwrap());
        let vectors = Arc::new(storage::VectorStore::new(llc_core::config::HnswConfig { m: 16, ef_construct: 64, ef_search: 32 }));
        let blobs = Arc::new(storage::BlobStore::new(dir.join("blobs")));
        let embedder: Arc<dyn Embedder> = Arc::new(slm::EmbeddingAdapter::new(store.clone(), "embed-test", 16, 6000));
        IngestionPipeline::new(
            store,
            vectors,
            blobs,
            Box::new(crate::chunker::SemanticChunker::default()),
            embedder,
            Box::new(crate::policy::NoOpPolicy),
        )
    }

    fn container() -> Container {
        Container {
            id: "c1".to_string(),
            slug: "c1".to_string(),
            theme: "test".to_string(),
            allowed_modalities: vec![Modality::Text, Modality::Pdf, Modality::Image],
            embedder_name: "embed-test".to_string(),
            embedder_version: "v1".to_string(),
            dims: 16,
            policy: ContainerPolicy::default(),
            state: ContainerState::Active,
            parent_id: None,
            created_at: 0,
        }
    }

    #[tokio::test]
    async fn ingest_text_source_produces_chunks_and_vectors() {
        let dir = tempdir().unwrap();
        let pipeline = pipeline(dir.path()).await;
        let container = container();

        let source = Source::from_bytes("notes.txt", b"hello world, this is a test document".to_vec(), "text/plain", SourceModality::Text);
        let outcome = pipeline.ingest(&container, source).await.unwrap();
        assert!(!outcome.chunk_ids.is_empty());
        assert!(outcome.pending_reconcile.is_empty());
    }

    #[tokio::test]
    async fn duplicate_source_short_circuits() {
        let dir = tempdir().unwrap();
        let pipeline = pipeline(dir.path()).await;
        let container = container();

        let bytes = b"identical content".to_vec();
        let first = Source::from_bytes("a.txt", bytes.clone(), "text/plain", SourceModality::Text);
        let first_outcome = pipeline.ingest(&container, first).await.unwrap();
        assert!(first_outcome.issues.is_empty());

        let second = Source::from_bytes("a.txt", bytes, "text/plain", SourceModality::Text);
        let second_outcome = pipeline.ingest(&container, second).await.unwrap();
        assert_eq!(second_outcome.document_id, first_outcome.document_id);
        assert!(second_outcome.chunk_ids.is_empty());
        assert_eq!(second_outcome.issues, vec!["DUPLICATE_SOURCE".to_string()]);
    }

    #[tokio::test]
    async fn blocked_modality_is_rejected_before_extraction() {
        let dir = tempdir().unwrap();
        let pipeline = pipeline(dir.path()).await;
        let mut container = container();
        container.allowed_modalities = vec![Modality::Text];

        let source = Source::from_bytes("img.png", b"\x89PNG".to_vec(), "image/png", SourceModality::Image);
        let err = pipeline.ingest(&container, source).await.unwrap_err();
        assert_eq!(err.error_code(), ErrorCode::BlockedModality);
    }
}
