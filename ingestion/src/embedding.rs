use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use llc_core::model::Modality;
use slm::{EmbeddingAdapter, EmbeddingError, EmbeddingOutcome};

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// The pipeline's view of an embedder: rate-limited, cached, retried — the
/// full §4.2 contract lives in `slm::EmbeddingAdapter`; this trait exists so
/// the pipeline can be exercised against a stub in tests.
pub trait Embedder: Send + Sync {
    fn embed<'a>(
        &'a self,
        text: &'a str,
        content_hash: &'a str,
        modality: Modality,
    ) -> BoxFuture<'a, Result<EmbeddingOutcome, EmbeddingError>>;
}

impl Embedder for EmbeddingAdapter {
    fn embed<'a>(
        &'a self,
        text: &'a str,
        content_hash: &'a str,
        modality: Modality,
    ) -> BoxFuture<'a, Result<EmbeddingOutcome, EmbeddingError>> {
        Box::pin(async move { self.embed_text(text, content_hash, modality, false).await })
    }
}

pub fn deterministic_adapter(store: Arc<storage::RelationalStore>, model_id: impl Into<String>, dims: usize) -> Arc<EmbeddingAdapter> {
    Arc::new(EmbeddingAdapter::new(store, model_id, dims, 600))
}
