use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

#[derive(Debug, Clone, Default)]
pub struct QueryMetrics {
    pub total_queries: u64,
    pub cache_hits: u64,
    pub latencies: VecDeque<u64>, // microseconds
}

/// Per-stage latency history for the §4.5 pipeline (embed/bm25/vector/fusion/
/// rerank/dedup), used to compute the diagnostics percentiles surfaced in
/// `DiagnosticsRecord`.
#[derive(Debug, Clone, Default)]
pub struct StageMetrics {
    pub embed_latencies: VecDeque<u64>,
    pub bm25_latencies: VecDeque<u64>,
    pub vector_latencies: VecDeque<u64>,
    pub rerank_latencies: VecDeque<u64>,
    pub budget_breaches: u64,
}

pub struct MetricsCollector {
    state: Arc<Mutex<MetricsState>>,
}

struct MetricsState {
    query_metrics: QueryMetrics,
    stage_metrics: StageMetrics,
    max_history: usize,
}

impl MetricsCollector {
    pub fn new(max_history: usize) -> Self {
        Self {
            state: Arc::new(Mutex::new(MetricsState {
                query_metrics: QueryMetrics::default(),
                stage_metrics: StageMetrics::default(),
                max_history,
            })),
        }
    }

    pub fn record_query(&self, latency_us: u64, is_cache_hit: bool) {
        let mut state = self.state.lock().unwrap();
        state.query_metrics.total_queries += 1;
        if is_cache_hit {
            state.query_metrics.cache_hits += 1;
        }
        let max_history = state.max_history;
        push_bounded(&mut state.query_metrics.latencies, latency_us, max_history);
    }

    pub fn record_stage(&self, stage: Stage, latency_us: u64) {
        let mut state = self.state.lock().unwrap();
        let max_history = state.max_history;
        let queue = match stage {
            Stage::Embed => &mut state.stage_metrics.embed_latencies,
            Stage::Bm25 => &mut state.stage_metrics.bm25_latencies,
            Stage::Vector => &mut state.stage_metrics.vector_latencies,
            Stage::Rerank => &mut state.stage_metrics.rerank_latencies,
        };
        push_bounded(queue, latency_us, max_history);
    }

    pub fn record_budget_breach(&self) {
        let mut state = self.state.lock().unwrap();
        state.stage_metrics.budget_breaches += 1;
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let state = self.state.lock().unwrap();
        let q = &state.query_metrics;
        let s = &state.stage_metrics;

        let mut sorted_latencies: Vec<u64> = q.latencies.iter().copied().collect();
        sorted_latencies.sort_unstable();

        let p50 = percentile(&sorted_latencies, 50.0);
        let p95 = percentile(&sorted_latencies, 95.0);
        let p99 = percentile(&sorted_latencies, 99.0);

        let hit_rate = if q.total_queries > 0 {
            q.cache_hits as f32 / q.total_queries as f32
        } else {
            0.0
        };

        MetricsSnapshot {
            total_queries: q.total_queries,
            hit_rate,
            p50,
            p95,
            p99,
            history_count: q.latencies.len(),
            budget_breaches: s.budget_breaches,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Embed,
    Bm25,
    Vector,
    Rerank,
}

fn push_bounded(queue: &mut VecDeque<u64>, value: u64, max_history: usize) {
    queue.push_back(value);
    if queue.len() > max_history {
        queue.pop_front();
    }
}

fn percentile(sorted: &[u64], p: f32) -> u64 {
    if sorted.is_empty() {
        return 0;
    }
    let idx = ((p / 100.0) * (sorted.len() as f32)).ceil() as usize;
    sorted[idx.saturating_sub(1).min(sorted.len() - 1)]
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct MetricsSnapshot {
    pub total_queries: u64,
    pub hit_rate: f32,
    pub p50: u64,
    pub p95: u64,
    pub p99: u64,
    pub history_count: usize,
    pub budget_breaches: u64,
}
