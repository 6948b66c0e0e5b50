use slm::registry::{ModelRegistry, RegistryError};
use slm::EmbeddingAdapter;
use std::sync::Arc;
use storage::RelationalStore;
use tempfile::tempdir;

async fn adapter(dims: usize) -> Arc<EmbeddingAdapter> {
    let dir = tempdir().unwrap();
    let store = Arc::new(RelationalStore::open(dir.path().join("store.wal")).await.unwrap());
    Arc::new(EmbeddingAdapter::new(store, "embedding-default", dims, 600))
}

#[tokio::test]
async fn test_registry_register_activate_and_resolve() {
    let mut registry: ModelRegistry<EmbeddingAdapter> = ModelRegistry::new();
    registry.register("embedding-default", "1.0.0", adapter(8).await).unwrap();
    registry.activate("embedding-default", "1.0.0").unwrap();

    let resolved = registry.resolve("embedding-default").unwrap();
    assert_eq!(resolved.model_id, "embedding-default");
    assert_eq!(resolved.version, "1.0.0");
    assert_eq!(resolved.provider.dims(), 8);
}

#[tokio::test]
async fn test_registry_rollback_restores_previous_active_version() {
    let mut registry: ModelRegistry<EmbeddingAdapter> = ModelRegistry::new();
    registry.register("embedding-default", "1.0.0", adapter(8).await).unwrap();
    registry.register("embedding-default", "1.1.0", adapter(16).await).unwrap();

    registry.activate("embedding-default", "1.0.0").unwrap();
    registry.activate("embedding-default", "1.1.0").unwrap();
    let rolled_back = registry.rollback("embedding-default").unwrap();

    assert_eq!(rolled_back.version, "1.0.0");
    assert_eq!(rolled_back.provider.dims(), 8);
}

#[test]
fn test_registry_resolve_missing_model_returns_error() {
    let registry: ModelRegistry<EmbeddingAdapter> = ModelRegistry::new();
    let result = registry.resolve("missing-model");
    assert!(matches!(result, Err(RegistryError::ModelNotFound(_))));
}
