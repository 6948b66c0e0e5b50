use std::time::Duration;

use rand::Rng;
use thiserror::Error;
use tokio::time::{sleep, Instant};

use llc_core::embedding::deterministic_embedding;
use llc_core::error::{ErrorCode, LlcError};
use llc_core::model::{EmbeddingCacheEntry, Modality};
use storage::RelationalStore;

#[derive(Debug, Error)]
pub enum EmbeddingError {
    #[error("rate limit budget exhausted before a token became available")]
    RateLimited,
    #[error("embedding provider unreachable after {0} retries and no cached vector available")]
    ProviderUnavailable(u32),
    #[error("embedding dims mismatch: expected {expected}, got {actual}")]
    DimsMismatch { expected: usize, actual: usize },
}

impl LlcError for EmbeddingError {
    fn error_code(&self) -> ErrorCode {
        match self {
            EmbeddingError::RateLimited => ErrorCode::RateLimit,
            EmbeddingError::ProviderUnavailable(_) => ErrorCode::VectorDown,
            EmbeddingError::DimsMismatch { .. } => ErrorCode::InvalidParams,
        }
    }
}

/// An embedding call that succeeded from the live provider versus one
/// served from a stale cache entry because the provider was unreachable.
#[derive(Debug, Clone)]
pub enum EmbeddingOutcome {
    Fresh(Vec<f32>),
    Stale(Vec<f32>),
}

impl EmbeddingOutcome {
    pub fn into_vector(self) -> Vec<f32> {
        match self {
            EmbeddingOutcome::Fresh(v) | EmbeddingOutcome::Stale(v) => v,
        }
    }

    pub fn is_stale(&self) -> bool {
        matches!(self, EmbeddingOutcome::Stale(_))
    }
}

#[derive(Debug, Clone)]
pub struct RetryConfig {
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(50),
            max_delay: Duration::from_secs(2),
        }
    }
}

/// Token bucket rate limiter: capacity `rate_per_min`, refill `rate_per_min
/// / 60` tokens/sec. Callers block until a token is available or a deadline
/// elapses.
struct TokenBucket {
    capacity: f64,
    refill_per_sec: f64,
    tokens: tokio::sync::Mutex<(f64, Instant)>,
}

impl TokenBucket {
    fn new(rate_per_min: u32) -> Self {
        let capacity = rate_per_min.max(1) as f64;
        Self {
            capacity,
            refill_per_sec: capacity / 60.0,
            tokens: tokio::sync::Mutex::new((capacity, Instant::now())),
        }
    }

    async fn acquire(&self, n: f64, deadline: Instant) -> Result<(), EmbeddingError> {
        loop {
            let wait = {
                let mut guard = self.tokens.lock().await;
                let (tokens, last_refill) = &mut *guard;
                let elapsed = last_refill.elapsed().as_secs_f64();
                *tokens = (*tokens + elapsed * self.refill_per_sec).min(self.capacity);
                *last_refill = Instant::now();

                if *tokens >= n {
                    *tokens -= n;
                    return Ok(());
                }

                let deficit = n - *tokens;
                Duration::from_secs_f64(deficit / self.refill_per_sec)
            };

            if Instant::now() + wait > deadline {
                return Err(EmbeddingError::RateLimited);
            }
            sleep(wait.min(deadline.saturating_duration_since(Instant::now()))).await;
        }
    }
}

/// §4.2 embedding adapter: cache-first, rate-limited, retried with backoff,
/// falling back to a stale cached vector when the provider is unreachable.
pub struct EmbeddingAdapter {
    store: std::sync::Arc<RelationalStore>,
    model_id: String,
    dims: usize,
    bucket: TokenBucket,
    retry: RetryConfig,
}

impl EmbeddingAdapter {
    pub fn new(store: std::sync::Arc<RelationalStore>, model_id: impl Into<String>, dims: usize, rate_per_min: u32) -> Self {
        Self {
            store,
            model_id: model_id.into(),
            dims,
            bucket: TokenBucket::new(rate_per_min),
            retry: RetryConfig::default(),
        }
    }

    pub fn with_retry_config(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    pub fn dims(&self) -> usize {
        self.dims
    }

    /// Embeds `text`, keyed in cache by `content_hash` and `modality`.
    /// `simulate_provider_down` stands in for a live HTTP provider returning
    /// 429/5xx on every attempt; production wiring would instead make a
    /// network call here and classify its outcome the same way.
    pub async fn embed_text(
        &self,
        text: &str,
        content_hash: &str,
        modality: Modality,
        simulate_provider_down: bool,
    ) -> Result<EmbeddingOutcome, EmbeddingError> {
        let cache_key = EmbeddingCacheEntry::cache_key(content_hash, &self.model_id, modality);
        if let Some(entry) = self.store.read_embedding_cache(&cache_key).await {
            self.store
                .upsert_embedding_cache(EmbeddingCacheEntry {
                    key: cache_key.clone(),
                    vector: entry.vector.clone(),
                    last_used_at: now_unix(),
                })
                .await
                .ok();
            if !simulate_provider_down {
                return Ok(EmbeddingOutcome::Fresh(entry.vector));
            }
        }

        let deadline = Instant::now() + self.retry_budget();
        self.bucket.acquire(1.0, deadline).await?;

        if !simulate_provider_down {
            let vector = self.call_provider(text);
            self.store
                .upsert_embedding_cache(EmbeddingCacheEntry {
                    key: cache_key,
                    vector: vector.clone(),
                    last_used_at: now_unix(),
                })
                .await
                .ok();
            return Ok(EmbeddingOutcome::Fresh(vector));
        }

        for attempt in 0..self.retry.max_retries {
            let backoff = self.backoff_for(attempt);
            sleep(backoff).await;
        }

        if let Some(entry) = self.store.read_embedding_cache(&cache_key).await {
            return Ok(EmbeddingOutcome::Stale(entry.vector));
        }

        Err(EmbeddingError::ProviderUnavailable(self.retry.max_retries))
    }

    fn call_provider(&self, text: &str) -> Vec<f32> {
        l2_normalize(deterministic_embedding(text, &self.model_id, self.dims))
    }

    fn retry_budget(&self) -> Duration {
        let mut total = Duration::ZERO;
        for attempt in 0..self.retry.max_retries {
            total += self.backoff_for(attempt);
        }
        total + Duration::from_secs(1)
    }

    fn backoff_for(&self, attempt: u32) -> Duration {
        let exp = self.retry.base_delay * 2u32.saturating_pow(attempt);
        let capped = exp.min(self.retry.max_delay);
        let jitter_ms = rand::thread_rng().gen_range(0..=capped.as_millis().max(1) as u64 / 4 + 1);
        capped + Duration::from_millis(jitter_ms)
    }
}

fn l2_normalize(vector: Vec<f32>) -> Vec<f32> {
    let norm: f32 = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm == 0.0 {
        return vector;
    }
    vector.into_iter().map(|v| v / norm).collect()
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
    use tempfile::tempdir;

    async fn test_store() -> std::sync::Arc<RelationalStore> {
        let dir = tempdir().unwrap();
        std::sync::Arc::new(RelationalStore::open(dir.path().join("store.wal")).await.unwrap())
    }

    #[tokio::test]
    async fn embed_text_produces_normalized_vector_of_requested_dims() {
        let store = test_store().await;
        let adapter = EmbeddingAdapter::new(store, "embedding-default-v1", 16, 600);
        let outcome = adapter.embed_text("hello world", "hash-1", Modality::Text, false).await.unwrap();
        let vector = outcome.into_vector();
        assert_eq!(vector.len(), 16);
        let norm: f32 = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-4);
    }

    #[tokio::test]
    async fn embed_text_is_cache_hit_on_second_call() {
        let store = test_store().await;
        let adapter = EmbeddingAdapter::new(store, "embedding-default-v1", 8, 600);
        let first = adapter.embed_text("same text", "hash-2", Modality::Text, false).await.unwrap().into_vector();
        let second = adapter.embed_text("same text", "hash-2", Modality::Text, false).await.unwrap().into_vector();
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn embed_text_falls_back_to_stale_cache_when_provider_down() {
        let store = test_store().await;
        let adapter = EmbeddingAdapter::new(store.clone(), "embedding-default-v1", 8, 600)
            .with_retry_config(RetryConfig { max_retries: 1, base_delay: Duration::from_millis(1), max_delay: Duration::from_millis(2) });
        let fresh = adapter.embed_text("warm the cache", "hash-3", Modality::Text, false).await.unwrap().into_vector();

        let outcome = adapter.embed_text("warm the cache", "hash-3", Modality::Text, true).await.unwrap();
        assert!(outcome.is_stale());
        assert_eq!(outcome.into_vector(), fresh);
    }

    #[tokio::test]
    async fn embed_text_errors_when_provider_down_and_no_cache() {
        let store = test_store().await;
        let adapter = EmbeddingAdapter::new(store, "embedding-default-v1", 8, 600)
            .with_retry_config(RetryConfig { max_retries: 1, base_delay: Duration::from_millis(1), max_delay: Duration::from_millis(2) });
        let err = adapter.embed_text("never cached", "hash-4", Modality::Text, true).await.unwrap_err();
        assert!(matches!(err, EmbeddingError::ProviderUnavailable(_)));
    }
}
