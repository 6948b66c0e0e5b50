use std::sync::Arc;

use llc_core::error::LlcError;
use llc_core::model::Job;

use crate::client::{IngestJobPayload, LlcClient};

/// Drains `JobKind::Ingest` jobs enqueued by [`LlcClient::ingest`] in
/// `IngestMode::Async`: deserialize the payload, resolve the owning
/// container and drive it through the same [`ingestion::IngestionPipeline`]
/// the blocking path uses (§4.6: job handlers are thin wrappers over the
/// synchronous pipeline, not a second code path).
pub struct IngestJobHandler {
    client: Arc<LlcClient>,
}

impl IngestJobHandler {
    pub fn new(client: Arc<LlcClient>) -> Self {
        Self { client }
    }
}

#[async_trait::async_trait]
impl jobs::JobHandler for IngestJobHandler {
    async fn handle(&self, job: &Job) -> Result<(), Box<dyn LlcError + Send + Sync>> {
        let payload: IngestJobPayload = serde_json::from_str(&job.payload)
            .map_err(|e| Box::new(PayloadError(e.to_string())) as Box<dyn LlcError + Send + Sync>)?;

        let container = self
            .client
            .store
            .get_container(&payload.container_id)
            .await
            .map_err(|e| Box::new(e) as Box<dyn LlcError + Send + Sync>)?;

        self.client
            .pipeline()
            .ingest(&container, payload.source.into_source())
            .await
            .map(|_| ())
            .map_err(|e| Box::new(e) as Box<dyn LlcError + Send + Sync>)
    }
}

#[derive(Debug, thiserror::Error)]
#[error("malformed ingest job payload: {0}")]
struct PayloadError(String);

impl LlcError for PayloadError {
    fn error_code(&self) -> llc_core::error::ErrorCode {
        llc_core::error::ErrorCode::InvalidParams
    }
}
