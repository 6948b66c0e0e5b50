use std::sync::Arc;

use llc_core::config::HnswConfig;
use llc_core::model::{Container, ContainerPolicy, ContainerState, JobStatus, Modality};
use llc_sdk::{IngestMode, IngestRequest, IngestResponse, LlcClient, LlcClientConfig};
use query::dsl::SearchRequest;
use tempfile::tempdir;

fn sample_container() -> Container {
    Container {
        id: "c1".to_string(),
        slug: "c1".to_string(),
        theme: "test".to_string(),
        allowed_modalities: vec![Modality::Text],
        embedder_name: "embed-default-v1".to_string(),
        embedder_version: "v1".to_string(),
        dims: 768,
        policy: ContainerPolicy::default(),
        state: ContainerState::Active,
        parent_id: None,
        created_at: 0,
    }
}

async fn build_client(dir: &std::path::Path) -> LlcClient {
    let client = LlcClient::open(
        dir.join("store.wal"),
        dir.join("blobs"),
        HnswConfig { m: 16, ef_construct: 64, ef_search: 32 },
        LlcClientConfig { embedding_rate_per_min: 6000, ..Default::default() },
    )
    .await
    .unwrap();
    client.store.put_container(sample_container()).await.unwrap();
    client
}

#[tokio::test]
async fn blocking_ingest_then_search_round_trips() {
    let dir = tempdir().unwrap();
    let client = build_client(dir.path()).await;

    let request = IngestRequest {
        container_id: "c1".to_string(),
        sources: vec![llc_sdk::client::SourceSpec::Inline(ingestion::api::JsonIngestionPayload {
            content: "the quick brown fox jumps over the lazy dog".to_string(),
            content_type: "text/plain".to_string(),
            modality: Some(llc_core::ingest::SourceModality::Text),
            title: Some("Fox Doc".to_string()),
            meta: Default::default(),
        })],
        mode: IngestMode::Blocking,
    };

    let response = client.ingest(request).await.unwrap();
    match response {
        IngestResponse::Completed(docs) => assert_eq!(docs.len(), 1),
        _ => panic!("expected completed ingest response"),
    }

    let search = SearchRequest {
        query_text: Some("fox".to_string()),
        container_ids: vec!["c1".to_string()],
        k: 5,
        ..Default::default()
    };
    let search_response = client.search(search).await.unwrap();
    assert!(!search_response.data.results.is_empty());
}

#[tokio::test]
async fn async_ingest_enqueues_job_and_reports_status() {
    let dir = tempdir().unwrap();
    let client = build_client(dir.path()).await;

    let request = IngestRequest {
        container_id: "c1".to_string(),
        sources: vec![llc_sdk::client::SourceSpec::Inline(ingestion::api::JsonIngestionPayload {
            content: "steam engines and the industrial revolution".to_string(),
            content_type: "text/plain".to_string(),
            modality: Some(llc_core::ingest::SourceModality::Text),
            title: None,
            meta: Default::default(),
        })],
        mode: IngestMode::Async,
    };

    let response = client.ingest(request).await.unwrap();
    let job_id = match response {
        IngestResponse::Queued(stubs) => {
            assert_eq!(stubs.len(), 1);
            stubs[0].job_id.clone()
        }
        _ => panic!("expected queued ingest response"),
    };

    let status = client.job_status(&job_id).await.unwrap();
    assert_eq!(status.status, JobStatus::Queued);
}

#[tokio::test]
async fn describe_containers_lists_registered_containers() {
    let dir = tempdir().unwrap();
    let client = build_client(dir.path()).await;
    let summaries = client.describe_containers().await;
    assert_eq!(summaries.len(), 1);
    assert_eq!(summaries[0].id, "c1");
}
