use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;

const MIN_K: usize = 1;
const MAX_K: usize = 50;
const DEFAULT_K: usize = 10;
const DEFAULT_TIMEOUT_MS: u64 = 5000;
const DEFAULT_LATENCY_BUDGET_MS: u64 = 900;

/// §4.5 `mode ∈ {semantic, hybrid, bm25, crossmodal, rerank}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SearchMode {
    Semantic,
    #[default]
    Hybrid,
    Bm25,
    Crossmodal,
    Rerank,
}

impl SearchMode {
    pub fn allows_dense(self) -> bool {
        !matches!(self, SearchMode::Bm25)
    }

    pub fn allows_sparse(self) -> bool {
        matches!(self, SearchMode::Hybrid | SearchMode::Bm25)
    }

    /// `mode=rerank` forces a rerank pass independent of `request.rerank`.
    pub fn forces_rerank(self) -> bool {
        matches!(self, SearchMode::Rerank)
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct SearchRequest {
    #[serde(default)]
    pub query_text: Option<String>,
    #[serde(default)]
    pub query_image_base64: Option<String>,
    #[serde(default)]
    pub container_ids: Vec<String>,
    #[serde(default)]
    pub mode: SearchMode,
    #[serde(default = "default_k")]
    pub k: usize,
    #[serde(default)]
    pub filters: HashMap<String, String>,
    #[serde(default)]
    pub diagnostics: Option<bool>,
    #[serde(default)]
    pub rerank: Option<bool>,
    #[serde(default)]
    pub timeout_ms: Option<u64>,
    #[serde(default)]
    pub latency_budget_ms: Option<u64>,
    #[serde(default)]
    pub freshness_enabled: Option<bool>,
    #[serde(default)]
    pub freshness_lambda: Option<f32>,
    #[serde(default)]
    pub dedup_threshold: Option<f32>,
}

const fn default_k() -> usize {
    DEFAULT_K
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SearchValidationError {
    #[error("at least one of query_text or query_image_base64 must be present")]
    MissingQuery,
    #[error("container_ids must not be empty")]
    EmptyContainerIds,
    #[error("k must be between {0} and {1}")]
    InvalidK(usize, usize),
    #[error("query_image_base64 is not valid base64")]
    InvalidImageEncoding,
}

impl SearchRequest {
    pub fn parse_json(raw: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(raw)
    }

    pub fn validate(&self) -> Result<(), SearchValidationError> {
        let has_text = self.query_text.as_deref().is_some_and(|t| !t.trim().is_empty());
        let has_image = self.query_image_base64.as_deref().is_some_and(|b| !b.trim().is_empty());
        if !has_text && !has_image {
            return Err(SearchValidationError::MissingQuery);
        }
        if self.container_ids.is_empty() {
            return Err(SearchValidationError::EmptyContainerIds);
        }
        if self.k < MIN_K || self.k > MAX_K {
            return Err(SearchValidationError::InvalidK(MIN_K, MAX_K));
        }
        if has_image {
            use base64::Engine;
            let raw = self.query_image_base64.as_deref().unwrap();
            if base64::engine::general_purpose::STANDARD.decode(raw).is_err() {
                return Err(SearchValidationError::InvalidImageEncoding);
            }
        }
        Ok(())
    }

    pub fn effective_timeout_ms(&self) -> u64 {
        self.timeout_ms.unwrap_or(DEFAULT_TIMEOUT_MS)
    }

    pub fn effective_latency_budget_ms(&self) -> u64 {
        self.latency_budget_ms.unwrap_or(DEFAULT_LATENCY_BUDGET_MS)
    }

    pub fn wants_diagnostics(&self) -> bool {
        self.diagnostics.unwrap_or(true)
    }

    pub fn wants_rerank(&self) -> bool {
        self.mode.forces_rerank() || self.rerank.unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_request_with_neither_text_nor_image() {
        let request = SearchRequest {
            container_ids: vec!["c1".to_string()],
            ..Default::default()
        };
        assert_eq!(request.validate(), Err(SearchValidationError::MissingQuery));
    }

    #[test]
    fn rejects_k_out_of_range() {
        let request = SearchRequest {
            query_text: Some("toyota ev".to_string()),
            container_ids: vec!["c1".to_string()],
            k: 0,
            ..Default::default()
        };
        assert_eq!(request.validate(), Err(SearchValidationError::InvalidK(1, 50)));
    }

    #[test]
    fn accepts_minimal_valid_request() {
        let request = SearchRequest {
            query_text: Some("toyota ev".to_string()),
            container_ids: vec!["c1".to_string()],
            k: 10,
            ..Default::default()
        };
        assert!(request.validate().is_ok());
    }

    #[test]
    fn rerank_mode_forces_rerank_even_without_flag() {
        let request = SearchRequest {
            mode: SearchMode::Rerank,
            ..Default::default()
        };
        assert!(request.wants_rerank());
    }
}
