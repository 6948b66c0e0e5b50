pub mod embedding_adapter;
pub mod registry;
pub mod rerank_adapter;
pub mod rerank_cache;

pub use embedding_adapter::{EmbeddingAdapter, EmbeddingError, EmbeddingOutcome};
pub use registry::{ModelRegistry, RegistryError, ResolvedModel};
pub use rerank_adapter::{RerankAdapter, RerankError};
pub use rerank_cache::{rerank_cache_key, RerankCache, RerankCacheConfig};
