use std::sync::Arc;

use ingestion::chunker::SemanticChunker;
use ingestion::embedding::Embedder;
use ingestion::policy::{BasicPolicy, NoOpPolicy};
use ingestion::IngestionPipeline;
use llc_core::config::HnswConfig;
use llc_core::ingest::{Source, SourceModality};
use llc_core::model::{Container, ContainerPolicy, ContainerState, Modality};
use tempfile::tempdir;

fn sample_container(allowed: Vec<Modality>) -> Container {
    Container {
        id: "c1".to_string(),
        slug: "c1".to_string(),
        theme: "test".to_string(),
        allowed_modalities: allowed,
        embedder_name: "embed-test".to_string(),
        embedder_version: "v1".to_string(),
        dims: 16,
        policy: ContainerPolicy::default(),
        state: ContainerState::Active,
        parent_id: None,
        created_at: 0,
    }
}

async fn build_pipeline(dir: &std::path::Path) -> (IngestionPipeline, Arc<storage::RelationalStore>) {
    let store = Arc::new(storage::RelationalStore::open(dir.join("store.wal")).await.unwrap());
    let vectors = Arc::new(storage::VectorStore::new(HnswConfig { m: 16, ef_construct: 64, ef_search: 32 }));
    let blobs = Arc::new(storage::BlobStore::new(dir.join("blobs")));
    let embedder: Arc<dyn Embedder> = Arc::new(slm::EmbeddingAdapter::new(store.clone(), "embed-test", 16, 6000));
    let pipeline = IngestionPipeline::new(
        store.clone(),
        vectors,
        blobs,
        Box::new(SemanticChunker::default()),
        embedder,
        Box::new(NoOpPolicy),
    );
    (pipeline, store)
}

#[tokio::test]
async fn ingest_stores_chunks_searchable_by_bm25() {
    let dir = tempdir().unwrap();
    let (pipeline, store) = build_pipeline(dir.path()).await;
    let container = sample_container(vec![Modality::Text]);

    let source = Source::from_bytes(
        "notes.txt",
        b"the quick brown fox jumps over the lazy dog".to_vec(),
        "text/plain",
        SourceModality::Text,
    );
    let outcome = pipeline.ingest(&container, source).await.unwrap();
    assert!(!outcome.chunk_ids.is_empty());

    let hits = store.bm25_search(&container.id, Modality::Text, "fox", 5);
    assert!(!hits.is_empty());
}

#[tokio::test]
async fn policy_rejects_forbidden_content_before_any_chunk_lands() {
    let dir = tempdir().unwrap();
    let store = Arc::new(storage::RelationalStore::open(dir.path().join("store.wal")).await.unwrap());
    let vectors = Arc::new(storage::VectorStore::new(HnswConfig { m: 16, ef_construct: 64, ef_search: 32 }));
    let blobs = Arc::new(storage::BlobStore::new(dir.path().join("blobs")));
    let embedder: Arc<dyn Embedder> = Arc::new(slm::EmbeddingAdapter::new(store.clone(), "embed-test", 16, 6000));
    let policy = BasicPolicy::new(vec!["classified".to_string()], false);
    let pipeline = IngestionPipeline::new(
        store.clone(),
        vectors,
        blobs,
        Box::new(SemanticChunker::default()),
        embedder,
        Box::new(policy),
    );
    let container = sample_container(vec![Modality::Text]);

    let source = Source::from_bytes("a.txt", b"this document is classified material".to_vec(), "text/plain", SourceModality::Text);
    let content_hash_of = source.clone();
    let result = pipeline.ingest(&container, source).await;
    assert!(result.is_err());
    assert!(store
        .find_document_by_hash(&container.id, &llc_core::ingest::ContentHash::content_hash(&content_hash_of))
        .await
        .is_none());
}

#[tokio::test]
async fn dedup_chunk_skips_vector_but_stays_bm25_searchable() {
    let dir = tempdir().unwrap();
    let (pipeline, store) = build_pipeline(dir.path()).await;
    let mut container = sample_container(vec![Modality::Text]);
    container.policy.ingest_dedup_threshold = 0.0;

    let first = Source::from_bytes("a.txt", b"repeated passage about rust programming".to_vec(), "text/plain", SourceModality::Text);
    let outcome_a = pipeline.ingest(&container, first).await.unwrap();

    let second = Source::from_bytes("b.txt", b"repeated passage about rust programming".to_vec(), "text/plain", SourceModality::Text);
    let outcome_b = pipeline.ingest(&container, second).await.unwrap();

    assert_eq!(outcome_a.chunk_ids.len(), outcome_b.chunk_ids.len());
    let dedup_chunk = store.get_chunk(&outcome_b.chunk_ids[0]).await.unwrap();
    assert!(dedup_chunk.dedup_of.is_some());
    assert!(!dedup_chunk.has_vector());

    let hits = store.bm25_search(&container.id, Modality::Text, "rust", 10);
    assert!(hits.iter().any(|(id, _)| id == &dedup_chunk.id));
}
