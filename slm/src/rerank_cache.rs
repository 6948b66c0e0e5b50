use std::collections::VecDeque;
use std::time::{Duration, Instant};

use sha2::{Digest, Sha256};

/// Exact cache key: a hit requires the *same* candidate id set, in any
/// order, against the same provider/query/k_in/k_out (§4.3: "LRU cache
/// returns a hit only when the exact candidate id set matches the stored
/// key").
pub fn rerank_cache_key(provider: &str, query: &str, k_in: usize, k_out: usize, candidate_ids: &[String]) -> String {
    let mut sorted_ids = candidate_ids.to_vec();
    sorted_ids.sort();

    let mut hasher = Sha256::new();
    hasher.update(provider.as_bytes());
    hasher.update(b"\0");
    hasher.update(query.as_bytes());
    hasher.update(b"\0");
    hasher.update(k_in.to_le_bytes());
    hasher.update(k_out.to_le_bytes());
    for id in &sorted_ids {
        hasher.update(b"\0");
        hasher.update(id.as_bytes());
    }
    format!("{:x}", hasher.finalize())
}

#[derive(Debug, Clone)]
struct Entry {
    key: String,
    ordering: Vec<(String, f32)>,
    created_at: Instant,
    last_accessed: Instant,
}

#[derive(Debug, Clone)]
pub struct RerankCacheConfig {
    pub max_entries: usize,
    pub ttl: Option<Duration>,
}

impl Default for RerankCacheConfig {
    fn default() -> Self {
        Self {
            max_entries: 512,
            ttl: Some(Duration::from_secs(300)),
        }
    }
}

/// In-memory LRU keyed by the exact candidate-id set (§3: `RerankCacheEntry`
/// is process-local, never persisted).
pub struct RerankCache {
    config: RerankCacheConfig,
    entries: VecDeque<Entry>,
}

impl RerankCache {
    pub fn with_config(config: RerankCacheConfig) -> Self {
        Self {
            config,
            entries: VecDeque::new(),
        }
    }

    pub fn get(&mut self, key: &str) -> Option<Vec<(String, f32)>> {
        let idx = self.entries.iter().position(|e| e.key == key)?;

        if let Some(ttl) = self.config.ttl {
            if self.entries[idx].created_at.elapsed() > ttl {
                self.entries.remove(idx);
                return None;
            }
        }

        let mut entry = self.entries.remove(idx)?;
        entry.last_accessed = Instant::now();
        let ordering = entry.ordering.clone();
        self.entries.push_back(entry);
        Some(ordering)
    }

    pub fn insert(&mut self, key: String, ordering: Vec<(String, f32)>) {
        if self.config.max_entries == 0 {
            return;
        }
        if let Some(idx) = self.entries.iter().position(|e| e.key == key) {
            self.entries.remove(idx);
        }
        while self.entries.len() >= self.config.max_entries {
            self.entries.pop_front();
        }
        let now = Instant::now();
        self.entries.push_back(Entry {
            key,
            ordering,
            created_at: now,
            last_accessed: now,
        });
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
