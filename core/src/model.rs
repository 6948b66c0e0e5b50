use rkyv::{Archive, Deserialize as RkyvDeserialize, Serialize as RkyvSerialize};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Modality a chunk (or a container's allowed set) belongs to.
#[derive(Archive, RkyvDeserialize, RkyvSerialize, Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[archive(check_bytes)]
#[serde(rename_all = "snake_case")]
pub enum Modality {
    Text,
    Pdf,
    Image,
    Web,
}

impl Modality {
    pub fn as_str(self) -> &'static str {
        match self {
            Modality::Text => "text",
            Modality::Pdf => "pdf",
            Modality::Image => "image",
            Modality::Web => "web",
        }
    }
}

#[derive(Archive, RkyvDeserialize, RkyvSerialize, Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[archive(check_bytes)]
#[serde(rename_all = "snake_case")]
pub enum ContainerState {
    Active,
    Paused,
    Archived,
}

/// Per-container tunables, distinct from the global defaults in `AppConfig`.
/// Search-time and ingest-time dedup thresholds are deliberately separate
/// fields, never unified (see SPEC_FULL.md §9 open question (a)).
#[derive(Archive, RkyvDeserialize, RkyvSerialize, Debug, Clone, PartialEq, Serialize, Deserialize)]
#[archive(check_bytes)]
pub struct ContainerPolicy {
    pub freshness_lambda: f32,
    pub search_dedup_threshold: f32,
    pub ingest_dedup_threshold: f32,
    pub max_chunk_tokens: u32,
    pub max_pdf_pages: u32,
    pub retention_days: Option<u32>,
    pub diagnostics: bool,
    pub snippet_template: Option<String>,
}

impl Default for ContainerPolicy {
    fn default() -> Self {
        Self {
            freshness_lambda: 0.02,
            search_dedup_threshold: 0.92,
            ingest_dedup_threshold: 0.96,
            max_chunk_tokens: 600,
            max_pdf_pages: 500,
            retention_days: None,
            diagnostics: true,
            snippet_template: None,
        }
    }
}

/// Identity of a themed collection of documents (§3).
#[derive(Archive, RkyvDeserialize, RkyvSerialize, Debug, Clone, PartialEq, Serialize, Deserialize)]
#[archive(check_bytes)]
pub struct Container {
    pub id: String,
    pub slug: String,
    pub theme: String,
    pub allowed_modalities: Vec<Modality>,
    pub embedder_name: String,
    pub embedder_version: String,
    pub dims: u32,
    pub policy: ContainerPolicy,
    pub state: ContainerState,
    pub parent_id: Option<String>,
    pub created_at: i64,
}

impl Container {
    pub fn allows(&self, modality: Modality) -> bool {
        self.allowed_modalities.contains(&modality)
    }
}

#[derive(Archive, RkyvDeserialize, RkyvSerialize, Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[archive(check_bytes)]
#[serde(rename_all = "snake_case")]
pub enum DocumentState {
    Active,
    SoftDeleted,
}

/// One row per ingested source within a container (§3).
#[derive(Archive, RkyvDeserialize, RkyvSerialize, Debug, Clone, PartialEq, Serialize, Deserialize)]
#[archive(check_bytes)]
pub struct Document {
    pub id: String,
    pub container_id: String,
    pub uri: String,
    pub mime: String,
    pub content_hash: String,
    pub title: String,
    pub size_bytes: u64,
    pub state: DocumentState,
    pub created_at: i64,
}

/// Immutable metadata describing where and how a chunk came to exist.
#[derive(Archive, RkyvDeserialize, RkyvSerialize, Debug, Clone, PartialEq, Serialize, Deserialize)]
#[archive(check_bytes)]
pub struct Provenance {
    pub source_uri: String,
    pub ingested_at: i64,
    pub pipeline: String,
    pub handler_version: String,
    pub embedder_name: String,
    pub embedder_version: String,
    pub page: Option<u32>,
    pub section: Option<String>,
}

/// The atomic retrievable unit (§3).
#[derive(Archive, RkyvDeserialize, RkyvSerialize, Debug, Clone, PartialEq, Serialize, Deserialize)]
#[archive(check_bytes)]
pub struct Chunk {
    pub id: String,
    pub container_id: String,
    pub doc_id: String,
    pub modality: Modality,
    pub text: Option<String>,
    pub token_offsets: Option<(u32, u32)>,
    pub provenance: Provenance,
    pub meta: HashMap<String, String>,
    pub embedding_version: String,
    pub dedup_of: Option<String>,
}

impl Chunk {
    /// A chunk with `dedup_of` set has no corresponding vector in the
    /// vector store (§3 invariant).
    pub fn has_vector(&self) -> bool {
        self.dedup_of.is_none()
    }

    pub fn needs_vector_reconcile(&self) -> bool {
        self.meta.get("needs_vector_reconcile").map(|v| v == "true").unwrap_or(false)
    }

    pub fn set_needs_vector_reconcile(&mut self, value: bool) {
        if value {
            self.meta.insert("needs_vector_reconcile".to_string(), "true".to_string());
        } else {
            self.meta.remove("needs_vector_reconcile");
        }
    }

    pub fn reconcile_attempts(&self) -> u32 {
        self.meta
            .get("reconcile_attempts")
            .and_then(|v| v.parse().ok())
            .unwrap_or(0)
    }

    pub fn bump_reconcile_attempts(&mut self) -> u32 {
        let next = self.reconcile_attempts() + 1;
        self.meta.insert("reconcile_attempts".to_string(), next.to_string());
        next
    }
}

#[derive(Archive, RkyvDeserialize, RkyvSerialize, Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[archive(check_bytes)]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    Ingest,
    Refresh,
    Export,
}

#[derive(Archive, RkyvDeserialize, RkyvSerialize, Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[archive(check_bytes)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Queued,
    Running,
    Done,
    Failed,
}

/// Queue unit (§3). `payload` is opaque JSON so `Refresh`/`Export` jobs don't
/// need their own WAL record shape.
#[derive(Archive, RkyvDeserialize, RkyvSerialize, Debug, Clone, PartialEq, Serialize, Deserialize)]
#[archive(check_bytes)]
pub struct Job {
    pub id: String,
    pub kind: JobKind,
    pub status: JobStatus,
    pub container_id: String,
    pub payload: String,
    pub retries: u32,
    pub worker_id: Option<String>,
    pub last_heartbeat: i64,
    pub error: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
}

impl Job {
    pub fn is_heartbeat_alive(&self, now: i64, visibility_timeout_s: i64) -> bool {
        now - self.last_heartbeat < visibility_timeout_s
    }
}

/// Keyed by `sha256(content) + ':' + embedder_version + ':' + modality` (§3, §6).
#[derive(Archive, RkyvDeserialize, RkyvSerialize, Debug, Clone, PartialEq, Serialize, Deserialize)]
#[archive(check_bytes)]
pub struct EmbeddingCacheEntry {
    pub key: String,
    pub vector: Vec<f32>,
    pub last_used_at: i64,
}

impl EmbeddingCacheEntry {
    pub fn cache_key(content_hash: &str, embedder_version: &str, modality: Modality) -> String {
        format!("{}:{}:{}", content_hash, embedder_version, modality.as_str())
    }
}

/// In-memory LRU entry only — never persisted (§3).
#[derive(Debug, Clone, PartialEq)]
pub struct RerankCacheEntry {
    pub key: String,
    pub ordering: Vec<(String, f32)>,
    pub computed_at: i64,
    pub elapsed_ms: u64,
}

/// Per-request snapshot of stage timings and outcomes (§3, §4.5 step 10).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DiagnosticsRecord {
    pub request_id: String,
    pub endpoint: String,
    pub mode: String,
    pub total_ms: u64,
    pub embed_ms: u64,
    pub bm25_ms: u64,
    pub vector_ms: u64,
    pub fusion_ms: u64,
    pub rerank_ms: u64,
    pub dedup_ms: u64,
    pub bm25_hits: u64,
    pub vector_hits: u64,
    pub dedup_drops: u64,
    pub latency_budget_ms: u64,
    pub latency_over_budget_ms: u64,
    pub applied_filters: HashMap<String, String>,
    pub container_status: HashMap<String, String>,
    pub issues: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chunk_with_dedup_of_has_no_vector() {
        let mut chunk = sample_chunk();
        assert!(chunk.has_vector());
        chunk.dedup_of = Some("other-chunk".to_string());
        assert!(!chunk.has_vector());
    }

    #[test]
    fn reconcile_attempts_round_trip_through_meta() {
        let mut chunk = sample_chunk();
        assert_eq!(chunk.reconcile_attempts(), 0);
        assert_eq!(chunk.bump_reconcile_attempts(), 1);
        assert_eq!(chunk.bump_reconcile_attempts(), 2);
        assert_eq!(chunk.reconcile_attempts(), 2);
    }

    #[test]
    fn embedding_cache_key_format_matches_spec() {
        let key = EmbeddingCacheEntry::cache_key("abc123", "embed-v1", Modality::Text);
        assert_eq!(key, "abc123:embed-v1:text");
    }

    fn sample_chunk() -> Chunk {
        Chunk {
            id: "chunk-1".to_string(),
            container_id: "c1".to_string(),
            doc_id: "d1".to_string(),
            modality: Modality::Text,
            text: Some("expressionist use of color".to_string()),
            token_offsets: Some((0, 4)),
            provenance: Provenance {
                source_uri: "https://example.com/a".to_string(),
                ingested_at: 0,
                pipeline: "text".to_string(),
                handler_version: "v1".to_string(),
                embedder_name: "embedding-default".to_string(),
                embedder_version: "v1".to_string(),
                page: None,
                section: None,
            },
            meta: HashMap::new(),
            embedding_version: "v1".to_string(),
            dedup_of: None,
        }
    }
}
