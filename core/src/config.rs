use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::env;

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Deserialize, Clone)]
pub struct StorageConfig {
    pub data_dir: String,
    pub wal_flush_interval_ms: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct RerankConfig {
    pub enabled: bool,
    pub top_k_in: usize,
    pub top_k_out: usize,
    pub min_remaining_budget_ms: u64,
    pub cache_ttl_s: u64,
    pub cache_size: usize,
}

impl Default for RerankConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            top_k_in: 50,
            top_k_out: 10,
            min_remaining_budget_ms: 150,
            cache_ttl_s: 300,
            cache_size: 256,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct DedupConfig {
    pub threshold: f32,
}

impl Default for DedupConfig {
    fn default() -> Self {
        Self { threshold: 0.92 }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct FreshnessConfig {
    pub enabled: bool,
    pub lambda: f32,
}

impl Default for FreshnessConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            lambda: 0.02,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    pub rate_per_min: u32,
    pub cache_ttl_s: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            rate_per_min: 120,
            cache_ttl_s: 604_800,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct HnswConfig {
    pub m: usize,
    pub ef_construct: usize,
    pub ef_search: usize,
}

impl Default for HnswConfig {
    fn default() -> Self {
        Self {
            m: 32,
            ef_construct: 256,
            ef_search: 64,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct VectorConfig {
    pub hnsw: HnswConfig,
}

impl Default for VectorConfig {
    fn default() -> Self {
        Self {
            hnsw: HnswConfig::default(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct WorkerConfig {
    pub poll_interval_s: u64,
    pub heartbeat_interval_s: u64,
    pub visibility_timeout_s: u64,
    pub max_retries: u32,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            poll_interval_s: 5,
            heartbeat_interval_s: 30,
            visibility_timeout_s: 900,
            max_retries: 3,
        }
    }
}

/// Every key enumerated in §6's "Configuration (enumerated)" block.
#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub storage: StorageConfig,
    #[serde(default = "default_latency_budget_ms")]
    pub latency_budget_ms: u64,
    #[serde(default)]
    pub rerank: RerankConfig,
    #[serde(default)]
    pub dedup: DedupConfig,
    #[serde(default)]
    pub freshness: FreshnessConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub vector: VectorConfig,
    #[serde(default)]
    pub worker: WorkerConfig,
}

fn default_latency_budget_ms() -> u64 {
    900
}

impl AppConfig {
    pub fn load() -> Result<Self, ConfigError> {
        let run_mode = env::var("RUN_MODE").unwrap_or_else(|_| "development".into());

        let builder = Config::builder()
            .add_source(File::with_name("config/default"))
            .add_source(File::with_name(&format!("config/{}", run_mode)).required(false))
            .add_source(Environment::with_prefix("LLC").separator("__"));

        builder.build()?.try_deserialize()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_section_6() {
        let rerank = RerankConfig::default();
        assert_eq!(rerank.top_k_in, 50);
        assert_eq!(rerank.top_k_out, 10);
        assert_eq!(rerank.min_remaining_budget_ms, 150);

        let hnsw = HnswConfig::default();
        assert_eq!(hnsw.m, 32);
        assert_eq!(hnsw.ef_construct, 256);
        assert_eq!(hnsw.ef_search, 64);

        let worker = WorkerConfig::default();
        assert_eq!(worker.max_retries, 3);
        assert_eq!(worker.visibility_timeout_s, 900);
    }
}
