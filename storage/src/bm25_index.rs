use std::collections::HashMap;
use std::sync::RwLock;

use bm25::{DefaultTokenizer, Embedder, EmbedderBuilder, Scorer};
use llc_core::model::Modality;

/// One BM25 scorer per `(container_id, modality)`, mirroring the scoping
/// rule full-text search shares with vector search (§3, §4.5 step 4).
struct Bm25Collection {
    embedder: Embedder<u32, DefaultTokenizer>,
    scorer: Scorer<String, u32>,
    doc_count: usize,
}

impl Bm25Collection {
    fn new() -> Self {
        Self {
            embedder: EmbedderBuilder::<u32, DefaultTokenizer>::with_avgdl(256.0).build(),
            scorer: Scorer::new(),
            doc_count: 0,
        }
    }

    fn upsert(&mut self, chunk_id: &str, text: &str) {
        let embedding = self.embedder.embed(text);
        self.scorer.upsert(&chunk_id.to_string(), embedding);
        self.doc_count += 1;
    }

    fn search(&self, query: &str, k: usize) -> Vec<(String, f32)> {
        let query_embedding = self.embedder.embed(query);
        self.scorer
            .matches(&query_embedding)
            .into_iter()
            .take(k)
            .map(|doc| (doc.id, doc.score))
            .collect()
    }
}

pub struct Bm25Store {
    collections: RwLock<HashMap<(String, Modality), Bm25Collection>>,
}

impl Bm25Store {
    pub fn new() -> Self {
        Self {
            collections: RwLock::new(HashMap::new()),
        }
    }

    pub fn upsert(&self, container_id: &str, modality: Modality, chunk_id: &str, text: &str) {
        let key = (container_id.to_string(), modality);
        let mut collections = self.collections.write().unwrap();
        collections.entry(key).or_insert_with(Bm25Collection::new).upsert(chunk_id, text);
    }

    pub fn search(
        &self,
        container_id: &str,
        modality: Modality,
        query: &str,
        k: usize,
    ) -> Vec<(String, f32)> {
        let key = (container_id.to_string(), modality);
        let collections = self.collections.read().unwrap();
        match collections.get(&key) {
            Some(collection) => collection.search(query, k),
            None => Vec::new(),
        }
    }

    pub fn doc_count(&self, container_id: &str, modality: Modality) -> usize {
        let key = (container_id.to_string(), modality);
        let collections = self.collections.read().unwrap();
        collections.get(&key).map(|c| c.doc_count).unwrap_or(0)
    }
}

impl Default for Bm25Store {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn search_ranks_lexical_overlap_higher() {
        let store = Bm25Store::new();
        store.upsert("c1", Modality::Text, "chunk-1", "the history of expressionist painting");
        store.upsert("c1", Modality::Text, "chunk-2", "a recipe for sourdough bread");

        let hits = store.search("c1", Modality::Text, "expressionist painting", 5);
        assert_eq!(hits[0].0, "chunk-1");
    }

    #[test]
    fn search_is_scoped_per_container() {
        let store = Bm25Store::new();
        store.upsert("c1", Modality::Text, "chunk-1", "expressionist painting");

        let hits = store.search("c2", Modality::Text, "expressionist painting", 5);
        assert!(hits.is_empty());
    }
}
