use serde::{Deserialize, Serialize};

/// The full issue-code / top-level-error taxonomy surfaced on the response
/// envelope (`issues[]` or `error.code`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    AuthFailed,
    ContainerNotFound,
    InvalidParams,
    BlockedModality,
    DuplicateSource,
    RateLimit,
    Timeout,
    NoHits,
    IngestFail,
    VectorDown,
    Bm25Down,
    VectorSkipped,
    RerankTimeout,
    RerankUnavailable,
    RerankSkippedNoText,
    RerankSkippedBudget,
    LatencyBudgetExceeded,
    StaleEmbedding,
    NotImplemented,
    Internal,
}

impl ErrorCode {
    /// Whether a job-level failure carrying this code should be retried
    /// (§4.6: `StoreUnavailable`, `EmbeddingUnavailable`, `VectorDown` are
    /// retryable; schema/validation errors are not).
    pub fn is_retryable(self) -> bool {
        matches!(self, ErrorCode::VectorDown | ErrorCode::Bm25Down | ErrorCode::RateLimit | ErrorCode::Timeout)
    }

    /// Actionable remediation text required on every non-OK path (§7).
    pub fn remediation(self) -> &'static str {
        match self {
            ErrorCode::AuthFailed => "verify credentials",
            ErrorCode::ContainerNotFound => "verify container id or slug",
            ErrorCode::InvalidParams => "check request parameters",
            ErrorCode::BlockedModality => "verify modality allowed by manifest",
            ErrorCode::DuplicateSource => "source already ingested for this container",
            ErrorCode::RateLimit => "retry after backoff",
            ErrorCode::Timeout => "retry with a larger timeout_ms",
            ErrorCode::NoHits => "broaden query or relax filters",
            ErrorCode::IngestFail => "inspect jobs/<id>",
            ErrorCode::VectorDown => "retry once the vector store recovers",
            ErrorCode::Bm25Down => "retry once the relational store recovers",
            ErrorCode::VectorSkipped => "dense retrieval unavailable for this request",
            ErrorCode::RerankTimeout => "fused ordering returned instead of reranked",
            ErrorCode::RerankUnavailable => "fused ordering returned instead of reranked",
            ErrorCode::RerankSkippedNoText => "rerank requires a text query",
            ErrorCode::RerankSkippedBudget => "insufficient remaining latency budget for rerank",
            ErrorCode::LatencyBudgetExceeded => "results are partial; consider a larger latency_budget_ms",
            ErrorCode::StaleEmbedding => "embedding served from cache; provider was unreachable",
            ErrorCode::NotImplemented => "operation not implemented",
            ErrorCode::Internal => "unrecoverable local data error; inspect server logs",
        }
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ErrorCode::AuthFailed => "AUTH_FAILED",
            ErrorCode::ContainerNotFound => "CONTAINER_NOT_FOUND",
            ErrorCode::InvalidParams => "INVALID_PARAMS",
            ErrorCode::BlockedModality => "BLOCKED_MODALITY",
            ErrorCode::DuplicateSource => "DUPLICATE_SOURCE",
            ErrorCode::RateLimit => "RATE_LIMIT",
            ErrorCode::Timeout => "TIMEOUT",
            ErrorCode::NoHits => "NO_HITS",
            ErrorCode::IngestFail => "INGEST_FAIL",
            ErrorCode::VectorDown => "VECTOR_DOWN",
            ErrorCode::Bm25Down => "BM25_DOWN",
            ErrorCode::VectorSkipped => "VECTOR_SKIPPED",
            ErrorCode::RerankTimeout => "RERANK_TIMEOUT",
            ErrorCode::RerankUnavailable => "RERANK_UNAVAILABLE",
            ErrorCode::RerankSkippedNoText => "RERANK_SKIPPED_NO_TEXT",
            ErrorCode::RerankSkippedBudget => "RERANK_SKIPPED_BUDGET",
            ErrorCode::LatencyBudgetExceeded => "LATENCY_BUDGET_EXCEEDED",
            ErrorCode::StaleEmbedding => "STALE_EMBEDDING",
            ErrorCode::NotImplemented => "NOT_IMPLEMENTED",
            ErrorCode::Internal => "INTERNAL",
        };
        write!(f, "{}", s)
    }
}

/// Shared trait every crate's error enum implements so call sites can map
/// failures onto the issue taxonomy without ad hoc string matching.
pub trait LlcError: std::error::Error {
    fn error_code(&self) -> ErrorCode;

    fn remediation(&self) -> &'static str {
        self.error_code().remediation()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_codes_match_section_4_6() {
        assert!(ErrorCode::VectorDown.is_retryable());
        assert!(!ErrorCode::BlockedModality.is_retryable());
        assert!(!ErrorCode::InvalidParams.is_retryable());
        assert!(!ErrorCode::Internal.is_retryable());
    }

    #[test]
    fn display_matches_screaming_snake_case() {
        assert_eq!(ErrorCode::LatencyBudgetExceeded.to_string(), "LATENCY_BUDGET_EXCEEDED");
    }
}
