use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::future::join_all;
use llc_core::error::{ErrorCode, LlcError};
use llc_core::ingest::sha256_hex;
use llc_core::model::{Chunk, Container, DiagnosticsRecord, EmbeddingCacheEntry, Modality};
use serde::{Deserialize, Serialize};
use slm::{rerank_cache_key, EmbeddingAdapter, RerankAdapter, RerankCache, RerankCacheConfig};
use storage::{RelationalStore, VectorStore};
use thiserror::Error;
use tokio::sync::Mutex as AsyncMutex;
use uuid::Uuid;

use crate::dsl::{SearchMode, SearchRequest, SearchValidationError};

const RRF_K: f32 = 60.0;
const SNIPPET_MAX_CHARS: usize = 320;
const RERANK_SAFETY_MARGIN_MS: u64 = 20;

/// §4.5's `PENDING → EMBEDDING → FANOUT → FUSED → (RERANKED) → DEDUPED →
/// SNIPPETED → DONE` sequence, with `TIMEOUT` reachable from any running
/// stage. Tracked for diagnostics, not for control flow: the algorithm below
/// advances it as it goes and stops early into `Timeout` when the request
/// deadline elapses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestStage {
    Pending,
    Embedding,
    Fanout,
    Fused,
    Reranked,
    Deduped,
    Snippeted,
    Done,
    Timeout,
}

#[derive(Debug, Error)]
pub enum SearchError {
    #[error("invalid search request: {0}")]
    Validation(#[from] SearchValidationError),
    #[error("container not found: {0}")]
    ContainerNotFound(String),
}

impl LlcError for SearchError {
    fn error_code(&self) -> ErrorCode {
        match self {
            SearchError::Validation(_) => ErrorCode::InvalidParams,
            SearchError::ContainerNotFound(_) => ErrorCode::ContainerNotFound,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageScores {
    pub vector: Option<f32>,
    pub bm25: Option<f32>,
    pub fusion_rank: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchResultItem {
    pub chunk_id: String,
    pub doc_id: String,
    pub container_id: String,
    pub title: String,
    pub snippet: String,
    pub uri: String,
    pub score: f32,
    pub stage_scores: StageScores,
    pub provenance: llc_core::model::Provenance,
    pub meta: HashMap<String, String>,
    pub modality: Modality,
    pub freshness: Option<f32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchData {
    pub results: Vec<SearchResultItem>,
    pub total_hits: usize,
    pub returned: usize,
    pub diagnostics: Option<DiagnosticsRecord>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponseEnvelope<T> {
    pub version: String,
    pub request_id: String,
    pub partial: bool,
    pub timings_ms: HashMap<String, u64>,
    pub issues: Vec<String>,
    pub data: T,
}

pub type SearchResponse = ResponseEnvelope<SearchData>;

#[derive(Debug, Clone)]
pub struct RetrievalEngineConfig {
    pub rerank_top_k_in: usize,
    pub rerank_top_k_out: usize,
    pub rerank_min_remaining_budget_ms: u64,
    pub rerank_cache: RerankCacheConfig,
    pub fanout_k: usize,
}

impl Default for RetrievalEngineConfig {
    fn default() -> Self {
        Self {
            rerank_top_k_in: 50,
            rerank_top_k_out: 10,
            rerank_min_remaining_budget_ms: 150,
            rerank_cache: RerankCacheConfig::default(),
            fanout_k: 100,
        }
    }
}

/// §4.5 hybrid retrieval engine: dense + sparse fan-out per `(container,
/// modality)`, RRF fusion, optional rerank, semantic dedup, snippet
/// assembly and diagnostics, all within a per-request latency budget.
pub struct RetrievalEngine {
    store: Arc<RelationalStore>,
    vectors: Arc<VectorStore>,
    embedder: Arc<EmbeddingAdapter>,
    reranker: Arc<RerankAdapter>,
    rerank_cache: AsyncMutex<RerankCache>,
    config: RetrievalEngineConfig,
}

struct FanoutHit {
    container_id: String,
    modality: Modality,
    dense: Vec<(String, f32)>,
    sparse: Vec<(String, f32)>,
    /// Whether this `(container, modality)` pair actually issued a dense/
    /// sparse lookup (vs. skipped because the request mode or query shape
    /// didn't call for it).
    dense_attempted: bool,
    sparse_attempted: bool,
    /// Set when the attempted lookup did not complete — a genuine
    /// unreachable-store signal (deadline timeout or task failure), never
    /// set just because the lookup completed with zero matches.
    dense_failed: bool,
    sparse_failed: bool,
}

impl RetrievalEngine {
    pub fn new(
        store: Arc<RelationalStore>,
        vectors: Arc<VectorStore>,
        embedder: Arc<EmbeddingAdapter>,
        reranker: Arc<RerankAdapter>,
        config: RetrievalEngineConfig,
    ) -> Self {
        Self {
            store,
            vectors,
            embedder,
            rerank_cache: AsyncMutex::new(RerankCache::with_config(config.rerank_cache.clone())),
            reranker,
            config,
        }
    }

    pub async fn search(&self, request: SearchRequest) -> Result<SearchResponse, SearchError> {
        request.validate()?;

        let start = Instant::now();
        let request_id = Uuid::new_v4().to_string();
        let mut issues: Vec<String> = Vec::new();
        let mut timings: HashMap<String, u64> = HashMap::new();
        let mut stage = RequestStage::Pending;
        let mut mode = request.mode;

        let timeout_ms = request.effective_timeout_ms();
        let latency_budget_ms = request.effective_latency_budget_ms();
        let deadline = start + Duration::from_millis(timeout_ms);

        let containers = self.expand_target_containers(&request.container_ids).await?;
        let mut container_status: HashMap<String, String> = containers
            .iter()
            .map(|c| (c.id.clone(), "healthy".to_string()))
            .collect();

        stage = RequestStage::Embedding;
        let embed_start = Instant::now();
        let mut query_vector: Option<Vec<f32>> = None;
        if mode.allows_dense() {
            if let Some(vec) = self.embed_query(&request, &mut issues).await {
                query_vector = Some(vec);
            } else if request.query_text.is_some() || request.query_image_base64.is_some() {
                issues.push(ErrorCode::VectorSkipped.to_string());
                mode = SearchMode::Bm25;
            }
        }
        timings.insert("embed_ms".to_string(), embed_start.elapsed().as_millis() as u64);

        if deadline_exceeded(deadline) {
            return Ok(self.timeout_response(request_id, timings, issues, SearchData {
                results: Vec::new(),
                total_hits: 0,
                returned: 0,
                diagnostics: None,
            }));
        }

        stage = RequestStage::Fanout;
        let fanout_start = Instant::now();
        let fanout_results = self
            .run_fanout(&containers, mode, &request, query_vector.as_deref(), deadline)
            .await;
        timings.insert("vector_ms".to_string(), fanout_start.elapsed().as_millis() as u64 / 2);
        timings.insert("bm25_ms".to_string(), fanout_start.elapsed().as_millis() as u64 / 2);

        let mut bm25_hits = 0u64;
        let mut vector_hits = 0u64;
        let mut any_dense_attempted = false;
        let mut any_sparse_attempted = false;
        let mut any_dense_hit = false;
        let mut any_sparse_hit = false;
        let mut any_dense_failure = false;
        let mut any_sparse_failure = false;
        for hit in &fanout_results {
            vector_hits += hit.dense.len() as u64;
            bm25_hits += hit.sparse.len() as u64;
            any_dense_attempted |= hit.dense_attempted;
            any_sparse_attempted |= hit.sparse_attempted;
            if !hit.dense.is_empty() {
                any_dense_hit = true;
            }
            if !hit.sparse.is_empty() {
                any_sparse_hit = true;
            }
            if hit.dense_failed {
                any_dense_failure = true;
            }
            if hit.sparse_failed {
                any_sparse_failure = true;
            }
            if hit.dense_failed || hit.sparse_failed {
                issues.push(ErrorCode::Timeout.to_string());
                container_status.insert(hit.container_id.clone(), "degraded".to_string());
            }
        }
        // A real outage is "attempted, never completed, and nothing else
        // supplied a match" — not merely "completed with zero hits".
        let vector_down = any_dense_attempted && any_dense_failure && !any_dense_hit;
        let bm25_down = any_sparse_attempted && any_sparse_failure && !any_sparse_hit;
        if vector_down {
            issues.push(ErrorCode::VectorDown.to_string());
        }
        if bm25_down {
            issues.push(ErrorCode::Bm25Down.to_string());
        }

        stage = RequestStage::Fused;
        let fusion_start = Instant::now();
        let fused = self.fuse_and_merge(&containers, &fanout_results, &request).await;
        timings.insert("fusion_ms".to_string(), fusion_start.elapsed().as_millis() as u64);

        let top_k_pre_rerank = request.k.max(50);
        let mut candidates: Vec<ScoredChunk> = fused;
        candidates.truncate(top_k_pre_rerank);

        if deadline_exceeded(deadline) {
            let data = self
                .finish_without_rerank(candidates, &containers, &request, &mut issues, &mut timings, &container_status, start, latency_budget_ms)
                .await;
            return Ok(self.timeout_response(request_id, timings, issues, data));
        }

        let mut rerank_ms = 0u64;
        if request.wants_rerank()
            && mode != SearchMode::Bm25
            && request.query_text.as_deref().is_some_and(|t| !t.trim().is_empty())
        {
            let remaining = deadline.saturating_duration_since(Instant::now()).as_millis() as u64;
            if remaining < self.config.rerank_min_remaining_budget_ms {
                issues.push(ErrorCode::RerankSkippedBudget.to_string());
            } else {
                let rerank_start = Instant::now();
                candidates = self.apply_rerank(candidates, &request, deadline, &mut issues).await;
                rerank_ms = rerank_start.elapsed().as_millis() as u64;
                stage = RequestStage::Reranked;
            }
        } else if request.wants_rerank() && request.query_text.is_none() {
            issues.push(ErrorCode::RerankSkippedNoText.to_string());
        }
        timings.insert("rerank_ms".to_string(), rerank_ms);

        stage = RequestStage::Deduped;
        let dedup_start = Instant::now();
        let dedup_threshold = request.dedup_threshold;
        let (deduped, dedup_drops) = self.semantic_dedup(candidates, &containers, dedup_threshold).await;
        timings.insert("dedup_ms".to_string(), dedup_start.elapsed().as_millis() as u64);

        let mut kept = deduped;
        kept.truncate(request.k);

        stage = RequestStage::Snippeted;
        let results = self.assemble_snippets(kept, &containers).await;

        stage = RequestStage::Done;
        let total_ms = start.elapsed().as_millis() as u64;
        timings.insert("total_ms".to_string(), total_ms);

        let over_budget = total_ms > latency_budget_ms;
        let partial = over_budget || (vector_down && bm25_down);
        if over_budget {
            issues.push(ErrorCode::LatencyBudgetExceeded.to_string());
        }
        if results.is_empty() {
            issues.push(ErrorCode::NoHits.to_string());
        }
        let _ = stage;

        let returned = results.len();
        let diagnostics = self.build_diagnostics(
            &request,
            &timings,
            bm25_hits,
            vector_hits,
            dedup_drops,
            latency_budget_ms,
            total_ms,
            &request.filters,
            &container_status,
            &issues,
        );

        Ok(ResponseEnvelope {
            version: "v1".to_string(),
            request_id,
            partial,
            timings_ms: timings,
            issues,
            data: SearchData {
                total_hits: returned,
                returned,
                results,
                diagnostics: request.wants_diagnostics().then_some(diagnostics),
            },
        })
    }

    async fn expand_target_containers(&self, requested: &[String]) -> Result<Vec<Container>, SearchError> {
        let all = self.store.list_containers().await;
        let by_parent: HashMap<Option<String>, Vec<&Container>> = all.iter().fold(HashMap::new(), |mut acc, c| {
            acc.entry(c.parent_id.clone()).or_default().push(c);
            acc
        });

        let mut seen = HashSet::new();
        let mut out = Vec::new();
        for id in requested {
            let root = self
                .store
                .get_container(id)
                .await
                .map_err(|_| SearchError::ContainerNotFound(id.clone()))?;
            collect_subtree(&root, &by_parent, &mut seen, &mut out);
        }
        Ok(out)
    }

    async fn embed_query(&self, request: &SearchRequest, issues: &mut Vec<String>) -> Option<Vec<f32>> {
        if let Some(text) = request.query_text.as_deref().filter(|t| !t.trim().is_empty()) {
            let hash = sha256_hex(text.as_bytes());
            return match self.embedder.embed_text(text, &hash, Modality::Text, false).await {
                Ok(outcome) => {
                    if outcome.is_stale() {
                        issues.push(ErrorCode::StaleEmbedding.to_string());
                    }
                    Some(outcome.into_vector())
                }
                Err(_) => None,
            };
        }
        if let Some(b64) = request.query_image_base64.as_deref() {
            use base64::Engine;
            let bytes = base64::engine::general_purpose::STANDARD.decode(b64).ok()?;
            let hash = sha256_hex(&bytes);
            let synthetic_text = format!("image:{hash}");
            return match self.embedder.embed_text(&synthetic_text, &hash, Modality::Image, false).await {
                Ok(outcome) => Some(outcome.into_vector()),
                Err(_) => None,
            };
        }
        None
    }

    async fn run_fanout(
        &self,
        containers: &[Container],
        mode: SearchMode,
        request: &SearchRequest,
        query_vector: Option<&[f32]>,
        deadline: Instant,
    ) -> Vec<FanoutHit> {
        let mut tasks = Vec::new();
        let mut meta = Vec::new();
        for container in containers {
            for modality in &container.allowed_modalities {
                let container_id = container.id.clone();
                let modality = *modality;
                let do_dense = mode.allows_dense() && query_vector.is_some();
                let do_sparse = mode.allows_sparse() && request.query_text.is_some();
                meta.push((container_id.clone(), modality, do_dense, do_sparse));

                let query_vector = query_vector.map(|v| v.to_vec());
                let query_text = request.query_text.clone();
                let vectors = self.vectors.clone();
                let store = self.store.clone();
                let fanout_k = self.config.fanout_k;
                let sub_deadline = deadline.saturating_duration_since(Instant::now());

                tasks.push(tokio::spawn(async move {
                    let work = async move {
                        let dense = if do_dense {
                            vectors.search(&container_id, modality, &query_vector.unwrap(), fanout_k)
                        } else {
                            Vec::new()
                        };
                        let sparse = if do_sparse {
                            store.bm25_search(&container_id, modality, query_text.as_deref().unwrap_or_default(), fanout_k)
                        } else {
                            Vec::new()
                        };
                        (dense, sparse)
                    };

                    tokio::time::timeout(sub_deadline, work).await
                }));
            }
        }

        join_all(tasks)
            .await
            .into_iter()
            .zip(meta)
            .map(|(joined, (container_id, modality, dense_attempted, sparse_attempted))| match joined {
                // Completed within the deadline: whatever it found (even
                // nothing) is a legitimate result, not an outage.
                Ok(Ok((dense, sparse))) => FanoutHit {
                    container_id,
                    modality,
                    dense,
                    sparse,
                    dense_attempted,
                    sparse_attempted,
                    dense_failed: false,
                    sparse_failed: false,
                },
                // Either the per-task deadline elapsed (`Ok(Err(_))`) or the
                // spawned task itself failed (`Err(_)`, e.g. panicked) —
                // both are real unreachable-store signals.
                Ok(Err(_)) | Err(_) => FanoutHit {
                    container_id,
                    modality,
                    dense: Vec::new(),
                    sparse: Vec::new(),
                    dense_attempted,
                    sparse_attempted,
                    dense_failed: dense_attempted,
                    sparse_failed: sparse_attempted,
                },
            })
            .collect()
    }

    async fn fuse_and_merge(
        &self,
        containers: &[Container],
        fanout: &[FanoutHit],
        request: &SearchRequest,
    ) -> Vec<ScoredChunk> {
        let containers_by_id: HashMap<&str, &Container> = containers.iter().map(|c| (c.id.as_str(), c)).collect();
        let mut per_container: HashMap<String, Vec<ScoredChunk>> = HashMap::new();

        let mut all_ids: HashSet<String> = HashSet::new();
        for hit in fanout {
            for (id, _) in &hit.dense {
                all_ids.insert(id.clone());
            }
            for (id, _) in &hit.sparse {
                all_ids.insert(id.clone());
            }
        }
        let id_list: Vec<String> = all_ids.into_iter().collect();
        let chunks = self.store.get_chunks_by_ids(&id_list).await;
        let chunk_by_id: HashMap<String, Chunk> = chunks.into_iter().map(|c| (c.id.clone(), c)).collect();

        for hit in fanout {
            let dense_rank: HashMap<&str, usize> = hit.dense.iter().enumerate().map(|(i, (id, _))| (id.as_str(), i + 1)).collect();
            let sparse_rank: HashMap<&str, usize> = hit.sparse.iter().enumerate().map(|(i, (id, _))| (id.as_str(), i + 1)).collect();
            let dense_score: HashMap<&str, f32> = hit.dense.iter().map(|(id, s)| (id.as_str(), *s)).collect();
            let sparse_score: HashMap<&str, f32> = hit.sparse.iter().map(|(id, s)| (id.as_str(), *s)).collect();

            let mut ids: HashSet<&str> = dense_rank.keys().copied().collect();
            ids.extend(sparse_rank.keys().copied());

            let mut scored: Vec<ScoredChunk> = ids
                .into_iter()
                .filter_map(|id| {
                    let chunk = chunk_by_id.get(id)?.clone();
                    let rrf_dense = dense_rank.get(id).map(|r| 1.0 / (RRF_K + *r as f32)).unwrap_or(0.0);
                    let rrf_sparse = sparse_rank.get(id).map(|r| 1.0 / (RRF_K + *r as f32)).unwrap_or(0.0);
                    let best_rank = dense_rank.get(id).copied().min(sparse_rank.get(id).copied()).unwrap_or(usize::MAX);
                    Some(ScoredChunk {
                        chunk,
                        score: rrf_dense + rrf_sparse,
                        vector_score: dense_score.get(id).copied(),
                        bm25_score: sparse_score.get(id).copied(),
                        best_rank,
                        freshness: None,
                    })
                })
                .collect();

            if let Some(container) = containers_by_id.get(hit.container_id.as_str()) {
                let freshness_enabled = request.freshness_enabled.unwrap_or(true);
                if freshness_enabled {
                    let lambda = request.freshness_lambda.unwrap_or(container.policy.freshness_lambda);
                    let now = now_unix();
                    for entry in &mut scored {
                        let age_days = (now - entry.chunk.provenance.ingested_at).max(0) as f32 / 86_400.0;
                        let freshness = (-lambda * age_days).exp();
                        entry.freshness = Some(freshness);
                        entry.score *= 1.0 + freshness;
                    }
                }
            }

            per_container.entry(hit.container_id.clone()).or_default().extend(scored);
        }

        let mut merged: Vec<ScoredChunk> = per_container.into_values().flatten().collect();
        merged.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.best_rank.cmp(&b.best_rank))
                .then(b.chunk.provenance.ingested_at.cmp(&a.chunk.provenance.ingested_at))
                .then(a.chunk.id.cmp(&b.chunk.id))
        });
        merged
    }

    async fn apply_rerank(
        &self,
        candidates: Vec<ScoredChunk>,
        request: &SearchRequest,
        deadline: Instant,
        issues: &mut Vec<String>,
    ) -> Vec<ScoredChunk> {
        let query_text = request.query_text.as_deref().unwrap_or_default();
        let pairs: Vec<(String, String)> = candidates
            .iter()
            .filter_map(|c| c.chunk.text.clone().map(|t| (c.chunk.id.clone(), t)))
            .collect();
        if pairs.is_empty() {
            issues.push(ErrorCode::RerankSkippedNoText.to_string());
            return candidates;
        }

        let candidate_ids: Vec<String> = pairs.iter().map(|(id, _)| id.clone()).collect();
        let cache_key = rerank_cache_key("rerank-default-v1", query_text, self.config.rerank_top_k_in, self.config.rerank_top_k_out, &candidate_ids);

        {
            let mut cache = self.rerank_cache.lock().await;
            if let Some(ordering) = cache.get(&cache_key) {
                return reorder_by_rerank(candidates, ordering);
            }
        }

        let remaining = deadline.saturating_duration_since(Instant::now());
        let budget = remaining.saturating_sub(Duration::from_millis(RERANK_SAFETY_MARGIN_MS));
        match self
            .reranker
            .rerank(Some(query_text), &pairs, self.config.rerank_top_k_out, budget)
            .await
        {
            Ok(ordering) => {
                self.rerank_cache.lock().await.insert(cache_key, ordering.clone());
                reorder_by_rerank(candidates, ordering)
            }
            Err(err) => {
                issues.push(err.error_code().to_string());
                candidates
            }
        }
    }

    async fn semantic_dedup(
        &self,
        candidates: Vec<ScoredChunk>,
        containers: &[Container],
        threshold_override: Option<f32>,
    ) -> (Vec<ScoredChunk>, u64) {
        let containers_by_id: HashMap<&str, &Container> = containers.iter().map(|c| (c.id.as_str(), c)).collect();
        let mut kept: Vec<(ScoredChunk, Vec<f32>)> = Vec::new();
        let mut drops = 0u64;

        for candidate in candidates {
            let threshold = threshold_override.unwrap_or_else(|| {
                containers_by_id
                    .get(candidate.chunk.container_id.as_str())
                    .map(|c| c.policy.search_dedup_threshold)
                    .unwrap_or(0.92)
            });

            let embedding_version = containers_by_id
                .get(candidate.chunk.container_id.as_str())
                .map(|c| c.embedder_version.clone())
                .unwrap_or_else(|| candidate.chunk.embedding_version.clone());
            let vector = match &candidate.chunk.text {
                Some(text) => {
                    let hash = sha256_hex(text.as_bytes());
                    let key = EmbeddingCacheEntry::cache_key(&hash, &embedding_version, candidate.chunk.modality);
                    self.store.read_embedding_cache(&key).await.map(|e| e.vector)
                }
                None => None,
            };

            let is_dup = match &vector {
                Some(v) => kept.iter().any(|(_, kept_vec)| cosine_similarity(v, kept_vec) >= threshold),
                None => false,
            };

            if is_dup {
                drops += 1;
                continue;
            }

            let vector_for_future_checks = vector.unwrap_or_default();
            kept.push((candidate, vector_for_future_checks));
        }

        (kept.into_iter().map(|(c, _)| c).collect(), drops)
    }

    async fn assemble_snippets(&self, candidates: Vec<ScoredChunk>, containers: &[Container]) -> Vec<SearchResultItem> {
        let containers_by_id: HashMap<&str, &Container> = containers.iter().map(|c| (c.id.as_str(), c)).collect();
        let mut doc_cache: HashMap<String, llc_core::model::Document> = HashMap::new();
        let mut out = Vec::with_capacity(candidates.len());

        for (rank, candidate) in candidates.into_iter().enumerate() {
            let doc_id = candidate.chunk.doc_id.clone();
            if !doc_cache.contains_key(&doc_id) {
                if let Ok(doc) = self.store.get_document(&doc_id).await {
                    doc_cache.insert(doc_id.clone(), doc);
                }
            }
            let document = doc_cache.get(&doc_id);
            let title = document.map(|d| d.title.clone()).unwrap_or_default();
            let uri = document.map(|d| d.uri.clone()).unwrap_or_default();

            let raw_snippet = clip_snippet(candidate.chunk.text.as_deref().unwrap_or_default(), SNIPPET_MAX_CHARS);
            let snippet_template = containers_by_id
                .get(candidate.chunk.container_id.as_str())
                .and_then(|c| c.policy.snippet_template.clone());
            let snippet = match snippet_template {
                Some(template) => template.replace("{title}", &title).replace("{snippet}", &raw_snippet),
                None => raw_snippet,
            };

            out.push(SearchResultItem {
                chunk_id: candidate.chunk.id.clone(),
                doc_id,
                container_id: candidate.chunk.container_id.clone(),
                title,
                snippet,
                uri,
                score: candidate.score,
                stage_scores: StageScores {
                    vector: candidate.vector_score,
                    bm25: candidate.bm25_score,
                    fusion_rank: rank + 1,
                },
                provenance: candidate.chunk.provenance.clone(),
                meta: candidate.chunk.meta.clone(),
                modality: candidate.chunk.modality,
                freshness: candidate.freshness,
            });
        }

        out
    }

    #[allow(clippy::too_many_arguments)]
    fn build_diagnostics(
        &self,
        request: &SearchRequest,
        timings: &HashMap<String, u64>,
        bm25_hits: u64,
        vector_hits: u64,
        dedup_drops: u64,
        latency_budget_ms: u64,
        total_ms: u64,
        applied_filters: &HashMap<String, String>,
        container_status: &HashMap<String, String>,
        issues: &[String],
    ) -> DiagnosticsRecord {
        DiagnosticsRecord {
            request_id: String::new(),
            endpoint: "search".to_string(),
            mode: format!("{:?}", request.mode).to_lowercase(),
            total_ms,
            embed_ms: timings.get("embed_ms").copied().unwrap_or(0),
            bm25_ms: timings.get("bm25_ms").copied().unwrap_or(0),
            vector_ms: timings.get("vector_ms").copied().unwrap_or(0),
            fusion_ms: timings.get("fusion_ms").copied().unwrap_or(0),
            rerank_ms: timings.get("rerank_ms").copied().unwrap_or(0),
            dedup_ms: timings.get("dedup_ms").copied().unwrap_or(0),
            bm25_hits,
            vector_hits,
            dedup_drops,
            latency_budget_ms,
            latency_over_budget_ms: total_ms.saturating_sub(latency_budget_ms),
            applied_filters: applied_filters.clone(),
            container_status: container_status.clone(),
            issues: issues.to_vec(),
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn finish_without_rerank(
        &self,
        candidates: Vec<ScoredChunk>,
        containers: &[Container],
        request: &SearchRequest,
        issues: &mut Vec<String>,
        timings: &mut HashMap<String, u64>,
        container_status: &HashMap<String, String>,
        start: Instant,
        latency_budget_ms: u64,
    ) -> SearchData {
        let (deduped, dedup_drops) = self.semantic_dedup(candidates, containers, request.dedup_threshold).await;
        let mut kept = deduped;
        kept.truncate(request.k);
        let results = self.assemble_snippets(kept, containers).await;
        let total_ms = start.elapsed().as_millis() as u64;
        timings.insert("total_ms".to_string(), total_ms);
        issues.push(ErrorCode::Timeout.to_string());
        let returned = results.len();
        let diagnostics = self.build_diagnostics(
            request,
            &*timings,
            0,
            0,
            dedup_drops,
            latency_budget_ms,
            total_ms,
            &request.filters,
            container_status,
            &issues[..],
        );
        SearchData {
            total_hits: returned,
            returned,
            results,
            diagnostics: request.wants_diagnostics().then_some(diagnostics),
        }
    }

    fn timeout_response(&self, request_id: String, timings: HashMap<String, u64>, issues: Vec<String>, data: SearchData) -> SearchResponse {
        ResponseEnvelope {
            version: "v1".to_string(),
            request_id,
            partial: true,
            timings_ms: timings,
            issues,
            data,
        }
    }
}

struct ScoredChunk {
    chunk: Chunk,
    score: f32,
    vector_score: Option<f32>,
    bm25_score: Option<f32>,
    best_rank: usize,
    freshness: Option<f32>,
}

fn collect_subtree<'a>(
    root: &Container,
    by_parent: &HashMap<Option<String>, Vec<&'a Container>>,
    seen: &mut HashSet<String>,
    out: &mut Vec<Container>,
) {
    if !seen.insert(root.id.clone()) {
        return;
    }
    out.push(root.clone());
    if let Some(children) = by_parent.get(&Some(root.id.clone())) {
        for child in children {
            collect_subtree(child, by_parent, seen, out);
        }
    }
}

fn reorder_by_rerank(candidates: Vec<ScoredChunk>, ordering: Vec<(String, f32)>) -> Vec<ScoredChunk> {
    let mut by_id: HashMap<String, ScoredChunk> = candidates.into_iter().map(|c| (c.chunk.id.clone(), c)).collect();
    let mut out = Vec::with_capacity(ordering.len());
    for (id, score) in ordering {
        if let Some(mut candidate) = by_id.remove(&id) {
            candidate.score = score;
            out.push(candidate);
        }
    }
    let mut leftovers: Vec<ScoredChunk> = by_id.into_values().collect();
    leftovers.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
    out.extend(leftovers);
    out
}

fn clip_snippet(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let clipped: String = text.chars().take(max_chars).collect();
    match clipped.rfind(' ') {
        Some(idx) if idx > 0 => format!("{}…", &clipped[..idx]),
        _ => format!("{clipped}…"),
    }
}

fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}

fn deadline_exceeded(deadline: Instant) -> bool {
    Instant::now() >= deadline
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

    #[test]
    fn clip_snippet_breaks_on_word_boundary() {
        let text = "a ".repeat(200);
        let clipped = clip_snippet(&text, 10);
        assert!(clipped.len() <= 12);
        assert!(clipped.ends_with('…'));
    }

    #[test]
    fn clip_snippet_leaves_short_text_untouched() {
        assert_eq!(clip_snippet("short text", 320), "short text");
    }

    #[test]
    fn cosine_similarity_of_identical_vectors_is_one() {
        let v = vec![1.0, 0.0, 0.0];
        assert!((cosine_similarity(&v, &v) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn cosine_similarity_of_orthogonal_vectors_is_zero() {
        let a = vec![1.0, 0.0];
        let b = vec![0.0, 1.0];
        assert!(cosine_similarity(&a, &b).abs() < 1e-6);
    }
}
