use std::collections::HashMap;
use std::sync::RwLock;

use llc_core::config::HnswConfig;
use llc_core::model::Modality;
use thiserror::Error;

use crate::index::LinearAnnIndex;

#[derive(Debug, Error)]
pub enum VectorError {
    #[error("vector dimension mismatch: collection expects {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },
    #[cfg(feature = "hnsw")]
    #[error("usearch index error: {0}")]
    Usearch(String),
}

/// One searchable collection per `(container_id, modality)` (§3: vector
/// search never crosses container or modality boundaries).
trait Collection: Send + Sync {
    fn dims(&self) -> usize;
    fn upsert(&mut self, chunk_id: &str, vector: &[f32]) -> Result<(), VectorError>;
    fn delete(&mut self, chunk_id: &str) -> bool;
    fn search(&self, query: &[f32], k: usize) -> Vec<(String, f32)>;
    fn len(&self) -> usize;
}

struct LinearCollection {
    dims: usize,
    index: LinearAnnIndex,
}

impl Collection for LinearCollection {
    fn dims(&self) -> usize {
        self.dims
    }

    fn upsert(&mut self, chunk_id: &str, vector: &[f32]) -> Result<(), VectorError> {
        if vector.len() != self.dims {
            return Err(VectorError::DimensionMismatch {
                expected: self.dims,
                actual: vector.len(),
            });
        }
        self.index.insert(chunk_id, vector.to_vec());
        Ok(())
    }

    fn delete(&mut self, chunk_id: &str) -> bool {
        self.index.delete(chunk_id)
    }

    fn search(&self, query: &[f32], k: usize) -> Vec<(String, f32)> {
        self.index.search(query, k)
    }

    fn len(&self) -> usize {
        self.index.len()
    }
}

#[cfg(feature = "hnsw")]
struct HnswCollection {
    dims: usize,
    index: usearch::Index,
    keys: HashMap<String, u64>,
    next_key: u64,
}

#[cfg(feature = "hnsw")]
impl HnswCollection {
    fn new(dims: usize, hnsw: &HnswConfig) -> Self {
        let options = usearch::IndexOptions {
            dimensions: dims,
            metric: usearch::MetricKind::Cos,
            quantization: usearch::ScalarKind::F32,
            connectivity: hnsw.m,
            expansion_add: hnsw.ef_construct,
            expansion_search: hnsw.ef_search,
            multi: false,
        };
        let index = usearch::Index::new(&options).expect("usearch index allocation");
        index.reserve(1024).expect("usearch initial reserve");
        Self {
            dims,
            index,
            keys: HashMap::new(),
            next_key: 0,
        }
    }
}

#[cfg(feature = "hnsw")]
impl Collection for HnswCollection {
    fn dims(&self) -> usize {
        self.dims
    }

    fn upsert(&mut self, chunk_id: &str, vector: &[f32]) -> Result<(), VectorError> {
        if vector.len() != self.dims {
            return Err(VectorError::DimensionMismatch {
                expected: self.dims,
                actual: vector.len(),
            });
        }

        if let Some(&existing) = self.keys.get(chunk_id) {
            let _ = self.index.remove(existing);
        }

        let key = self.next_key;
        self.next_key += 1;

        if self.index.size() + 1 > self.index.capacity() {
            self.index
                .reserve(self.index.capacity() * 2 + 1)
                .map_err(|e| VectorError::Usearch(e.to_string()))?;
        }

        self.index
            .add(key, vector)
            .map_err(|e| VectorError::Usearch(e.to_string()))?;
        self.keys.insert(chunk_id.to_string(), key);
        Ok(())
    }

    fn delete(&mut self, chunk_id: &str) -> bool {
        match self.keys.remove(chunk_id) {
            Some(key) => self.index.remove(key).is_ok(),
            None => false,
        }
    }

    fn search(&self, query: &[f32], k: usize) -> Vec<(String, f32)> {
        let Ok(matches) = self.index.search(query, k) else {
            return Vec::new();
        };
        let inverted: HashMap<u64, &str> = self
            .keys
            .iter()
            .map(|(id, key)| (*key, id.as_str()))
            .collect();
        matches
            .keys
            .iter()
            .zip(matches.distances.iter())
            .filter_map(|(key, distance)| {
                inverted.get(key).map(|id| (id.to_string(), 1.0 - *distance))
            })
            .collect()
    }

    fn len(&self) -> usize {
        self.keys.len()
    }
}

/// All vector collections for the service, keyed by `(container_id, modality)`.
/// `hnsw`-feature builds back every collection with `usearch`; otherwise the
/// linear-scan fallback is used transparently for callers.
pub struct VectorStore {
    hnsw_config: HnswConfig,
    collections: RwLock<HashMap<(String, Modality), Box<dyn Collection>>>,
}

impl VectorStore {
    pub fn new(hnsw_config: HnswConfig) -> Self {
        Self {
            hnsw_config,
            collections: RwLock::new(HashMap::new()),
        }
    }

    pub fn ensure_collection(&self, container_id: &str, modality: Modality, dims: usize) {
        let key = (container_id.to_string(), modality);
        let mut collections = self.collections.write().unwrap();
        collections.entry(key).or_insert_with(|| {
            new_collection(dims, &self.hnsw_config)
        });
    }

    pub fn upsert(
        &self,
        container_id: &str,
        modality: Modality,
        chunk_id: &str,
        vector: &[f32],
    ) -> Result<(), VectorError> {
        let key = (container_id.to_string(), modality);
        let mut collections = self.collections.write().unwrap();
        let collection = collections
            .entry(key)
            .or_insert_with(|| new_collection(vector.len(), &self.hnsw_config));
        collection.upsert(chunk_id, vector)
    }

    pub fn delete(&self, container_id: &str, modality: Modality, chunk_id: &str) -> bool {
        let key = (container_id.to_string(), modality);
        let mut collections = self.collections.write().unwrap();
        match collections.get_mut(&key) {
            Some(collection) => collection.delete(chunk_id),
            None => false,
        }
    }

    /// Cosine-ranked nearest neighbors within one container/modality collection.
    pub fn search(
        &self,
        container_id: &str,
        modality: Modality,
        query: &[f32],
        k: usize,
    ) -> Vec<(String, f32)> {
        let key = (container_id.to_string(), modality);
        let collections = self.collections.read().unwrap();
        match collections.get(&key) {
            Some(collection) => collection.search(query, k),
            None => Vec::new(),
        }
    }

    pub fn collection_len(&self, container_id: &str, modality: Modality) -> usize {
        let key = (container_id.to_string(), modality);
        let collections = self.collections.read().unwrap();
        collections.get(&key).map(|c| c.len()).unwrap_or(0)
    }

    pub fn dims_of(&self, container_id: &str, modality: Modality) -> Option<usize> {
        let key = (container_id.to_string(), modality);
        let collections = self.collections.read().unwrap();
        collections.get(&key).map(|c| c.dims())
    }
}

#[cfg(feature = "hnsw")]
fn new_collection(dims: usize, hnsw: &HnswConfig) -> Box<dyn Collection> {
    Box::new(HnswCollection::new(dims, hnsw))
}

#[cfg(not(feature = "hnsw"))]
fn new_collection(dims: usize, _hnsw: &HnswConfig) -> Box<dyn Collection> {
    Box::new(LinearCollection {
        dims,
        index: LinearAnnIndex::new(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg() -> HnswConfig {
        HnswConfig {
            m: 16,
            ef_construct: 64,
            ef_search: 32,
        }
    }

    #[test]
    fn search_is_scoped_to_container_and_modality() {
        let store = VectorStore::new(cfg());
        store
            .upsert("c1", Modality::Text, "chunk-1", &[1.0, 0.0])
            .unwrap();
        store
            .upsert("c2", Modality::Text, "chunk-2", &[1.0, 0.0])
            .unwrap();

        let hits = store.search("c1", Modality::Text, &[1.0, 0.0], 5);
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].0, "chunk-1");
    }

    #[test]
    fn delete_removes_chunk_from_results() {
        let store = VectorStore::new(cfg());
        store
            .upsert("c1", Modality::Text, "chunk-1", &[1.0, 0.0])
            .unwrap();
        assert!(store.delete("c1", Modality::Text, "chunk-1"));
        assert!(store.search("c1", Modality::Text, &[1.0, 0.0], 5).is_empty());
    }

    #[test]
    fn dimension_mismatch_is_rejected() {
        let store = VectorStore::new(cfg());
        store
            .upsert("c1", Modality::Text, "chunk-1", &[1.0, 0.0])
            .unwrap();
        let err = store.upsert("c1", Modality::Text, "chunk-2", &[1.0, 0.0, 0.0]);
        assert!(matches!(err, Err(VectorError::DimensionMismatch { .. })));
    }
}
