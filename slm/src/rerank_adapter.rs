use std::time::Duration;

use llc_core::error::{ErrorCode, LlcError};
use thiserror::Error;
use tokio::time::timeout;

#[derive(Debug, Error)]
pub enum RerankError {
    #[error("rerank deadline of {0:?} exceeded")]
    DeadlineExceeded(Duration),
    #[error("rerank provider returned an error")]
    ProviderError,
    #[error("rerank requires a text query; candidates were image-only")]
    NoText,
}

impl LlcError for RerankError {
    fn error_code(&self) -> ErrorCode {
        match self {
            RerankError::DeadlineExceeded(_) => ErrorCode::RerankTimeout,
            RerankError::ProviderError => ErrorCode::RerankUnavailable,
            RerankError::NoText => ErrorCode::RerankSkippedNoText,
        }
    }
}

/// §4.3 rerank adapter: a deadline-bound cross-encoder stand-in. Errors
/// never propagate to the caller as exceptions — `rerank` returns `None`
/// and the caller keeps the fused ordering, recording the issue code from
/// the returned error via [`LlcError::error_code`].
pub struct RerankAdapter {
    model_id: String,
}

impl RerankAdapter {
    pub fn new(model_id: impl Into<String>) -> Self {
        Self { model_id: model_id.into() }
    }

    /// Scores `candidates` against `query_text`, returning the top
    /// `k_out` by descending score. Returns `Err` (never panics) on
    /// deadline exceeded, no text, or provider failure; callers translate
    /// any `Err` into `None` plus the matching issue code.
    pub async fn rerank(
        &self,
        query_text: Option<&str>,
        candidates: &[(String, String)],
        k_out: usize,
        deadline: Duration,
    ) -> Result<Vec<(String, f32)>, RerankError> {
        let query_text = query_text.ok_or(RerankError::NoText)?;
        if query_text.trim().is_empty() {
            return Err(RerankError::NoText);
        }

        let query_owned = query_text.to_string();
        let model_id = self.model_id.clone();
        let candidates_owned: Vec<(String, String)> = candidates.to_vec();

        let work = tokio::task::spawn_blocking(move || score_candidates(&model_id, &query_owned, &candidates_owned));

        match timeout(deadline, work).await {
            Ok(Ok(mut scored)) => {
                scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
                scored.truncate(k_out);
                Ok(scored)
            }
            Ok(Err(_)) => Err(RerankError::ProviderError),
            Err(_) => Err(RerankError::DeadlineExceeded(deadline)),
        }
    }
}

/// Deterministic cross-encoder stand-in: scores a candidate by token
/// overlap with the query, weighted by inverse length difference.
fn score_candidates(_model_id: &str, query: &str, candidates: &[(String, String)]) -> Vec<(String, f32)> {
    let query_tokens = tokenize(query);
    candidates
        .iter()
        .map(|(id, text)| (id.clone(), cross_encoder_score(&query_tokens, text)))
        .collect()
}

fn cross_encoder_score(query_tokens: &std::collections::HashSet<String>, text: &str) -> f32 {
    let candidate_tokens = tokenize(text);
    if query_tokens.is_empty() || candidate_tokens.is_empty() {
        return 0.0;
    }
    let overlap = query_tokens.intersection(&candidate_tokens).count() as f32;
    let union = (query_tokens.len() + candidate_tokens.len()) as f32 - overlap;
    if union == 0.0 {
        0.0
    } else {
        overlap / union
    }
}

fn tokenize(text: &str) -> std::collections::HashSet<String> {
    text.split_whitespace().map(|t| t.to_lowercase()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn rerank_orders_candidates_by_token_overlap() {
        let adapter = RerankAdapter::new("rerank-default-v1");
        let candidates = vec![
            ("a".to_string(), "toyota ev strategy".to_string()),
            ("b".to_string(), "unrelated gardening tips".to_string()),
        ];
        let ranked = adapter
            .rerank(Some("toyota ev strategy 2024"), &candidates, 2, Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(ranked[0].0, "a");
    }

    #[tokio::test]
    async fn rerank_skips_image_only_queries() {
        let adapter = RerankAdapter::new("rerank-default-v1");
        let err = adapter.rerank(None, &[], 5, Duration::from_secs(1)).await.unwrap_err();
        assert!(matches!(err, RerankError::NoText));
        assert_eq!(err.error_code(), ErrorCode::RerankSkippedNoText);
    }

    #[tokio::test]
    async fn rerank_respects_deadline() {
        let adapter = RerankAdapter::new("rerank-default-v1");
        let candidates = vec![("a".to_string(), "text".to_string())];
        let err = adapter
            .rerank(Some("query"), &candidates, 1, Duration::from_nanos(1))
            .await
            .unwrap_err();
        assert!(matches!(err, RerankError::DeadlineExceeded(_)));
        assert_eq!(err.error_code(), ErrorCode::RerankTimeout);
    }
}
