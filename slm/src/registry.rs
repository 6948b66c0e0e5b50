use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("model not found: {0}")]
    ModelNotFound(String),
    #[error("version not found for model {model_id}: {version}")]
    VersionNotFound { model_id: String, version: String },
    #[error("model version already exists for model {model_id}: {version}")]
    VersionAlreadyExists { model_id: String, version: String },
    #[error("rollback target is not available for model: {0}")]
    NoRollbackTarget(String),
}

/// A provider pinned to a specific version, resolved from a bare model id
/// (active version) or a `model_id@version` reference.
pub struct ResolvedModel<P: ?Sized> {
    pub model_id: String,
    pub version: String,
    pub provider: Arc<P>,
}

impl<P: ?Sized> std::fmt::Debug for ResolvedModel<P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResolvedModel")
            .field("model_id", &self.model_id)
            .field("version", &self.version)
            .finish()
    }
}

impl<P: ?Sized> Clone for ResolvedModel<P> {
    fn clone(&self) -> Self {
        Self {
            model_id: self.model_id.clone(),
            version: self.version.clone(),
            provider: self.provider.clone(),
        }
    }
}

struct ModelFamily<P: ?Sized> {
    versions: BTreeMap<String, Arc<P>>,
    active_version: Option<String>,
    activation_history: Vec<String>,
}

impl<P: ?Sized> Default for ModelFamily<P> {
    fn default() -> Self {
        Self {
            versions: BTreeMap::new(),
            active_version: None,
            activation_history: Vec::new(),
        }
    }
}

/// Pins `embedder_name@version` and `rerank_provider@version` references to
/// concrete provider instances. One registry instance per provider kind
/// (embedding, rerank); each model id tracks its own activation history so
/// a bad activation can be rolled back independently of the others.
pub struct ModelRegistry<P: ?Sized> {
    families: HashMap<String, ModelFamily<P>>,
}

impl<P: ?Sized> Default for ModelRegistry<P> {
    fn default() -> Self {
        Self {
            families: HashMap::new(),
        }
    }
}

impl<P: ?Sized> ModelRegistry<P> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a provider under `model_id@version`. The first version
    /// registered for a model id becomes active automatically.
    pub fn register(
        &mut self,
        model_id: impl Into<String>,
        version: impl Into<String>,
        provider: Arc<P>,
    ) -> Result<(), RegistryError> {
        let model_id = model_id.into();
        let version = version.into();
        let family = self.families.entry(model_id.clone()).or_default();

        if family.versions.contains_key(&version) {
            return Err(RegistryError::VersionAlreadyExists { model_id, version });
        }

        family.versions.insert(version.clone(), provider);

        if family.active_version.is_none() {
            family.active_version = Some(version.clone());
            family.activation_history.push(version);
        }

        Ok(())
    }

    pub fn activate(&mut self, model_id: &str, version: &str) -> Result<ResolvedModel<P>, RegistryError> {
        let family = self
            .families
            .get_mut(model_id)
            .ok_or_else(|| RegistryError::ModelNotFound(model_id.to_string()))?;

        let provider = family.versions.get(version).cloned().ok_or_else(|| RegistryError::VersionNotFound {
            model_id: model_id.to_string(),
            version: version.to_string(),
        })?;

        if family.active_version.as_deref() != Some(version) {
            family.active_version = Some(version.to_string());
            family.activation_history.push(version.to_string());
        }

        Ok(ResolvedModel {
            model_id: model_id.to_string(),
            version: version.to_string(),
            provider,
        })
    }

    /// Resolves a bare `model_id` (active version) or `model_id@version`.
    pub fn resolve(&self, model_ref: &str) -> Result<ResolvedModel<P>, RegistryError> {
        let (model_id, pinned_version) = parse_model_ref(model_ref);
        let family = self
            .families
            .get(model_id)
            .ok_or_else(|| RegistryError::ModelNotFound(model_id.to_string()))?;

        let version = match pinned_version {
            Some(v) => v.to_string(),
            None => family
                .active_version
                .clone()
                .ok_or_else(|| RegistryError::ModelNotFound(model_id.to_string()))?,
        };

        let provider = family.versions.get(&version).cloned().ok_or_else(|| RegistryError::VersionNotFound {
            model_id: model_id.to_string(),
            version: version.clone(),
        })?;

        Ok(ResolvedModel {
            model_id: model_id.to_string(),
            version,
            provider,
        })
    }

    /// Restores the previously active version, popping the current one off
    /// the activation history.
    pub fn rollback(&mut self, model_id: &str) -> Result<ResolvedModel<P>, RegistryError> {
        let family = self
            .families
            .get_mut(model_id)
            .ok_or_else(|| RegistryError::ModelNotFound(model_id.to_string()))?;

        if family.activation_history.len() < 2 {
            return Err(RegistryError::NoRollbackTarget(model_id.to_string()));
        }

        family.activation_history.pop();
        let previous = family
            .activation_history
            .last()
            .cloned()
            .ok_or_else(|| RegistryError::NoRollbackTarget(model_id.to_string()))?;

        family.active_version = Some(previous.clone());

        let provider = family.versions.get(&previous).cloned().ok_or_else(|| RegistryError::VersionNotFound {
            model_id: model_id.to_string(),
            version: previous.clone(),
        })?;

        Ok(ResolvedModel {
            model_id: model_id.to_string(),
            version: previous,
            provider,
        })
    }
}

fn parse_model_ref(model_ref: &str) -> (&str, Option<&str>) {
    match model_ref.split_once('@') {
        Some((model_id, version)) if !model_id.is_empty() && !version.is_empty() => (model_id, Some(version)),
        _ => (model_ref, None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    trait Provider: Send + Sync {
        fn tag(&self) -> &'static str;
    }

    struct Stub(&'static str);
    impl Provider for Stub {
        fn tag(&self) -> &'static str {
            self.0
        }
    }

    #[test]
    fn test_parse_model_ref() {
        let (model_id, version) = parse_model_ref("embedding-default@1.0.0");
        assert_eq!(model_id, "embedding-default");
        assert_eq!(version, Some("1.0.0"));

        let (model_id, version) = parse_model_ref("embedding-default");
        assert_eq!(model_id, "embedding-default");
        assert_eq!(version, None);
    }

    #[test]
    fn test_register_duplicate_fails() {
        let mut registry: ModelRegistry<dyn Provider> = ModelRegistry::new();
        registry.register("embedding-default", "1.0.0", Arc::new(Stub("a"))).unwrap();

        let err = registry
            .register("embedding-default", "1.0.0", Arc::new(Stub("b")))
            .unwrap_err();

        assert_eq!(
            err,
            RegistryError::VersionAlreadyExists {
                model_id: "embedding-default".to_string(),
                version: "1.0.0".to_string(),
            }
        );
    }

    #[test]
    fn test_activate_and_resolve_pinned_version() {
        let mut registry: ModelRegistry<dyn Provider> = ModelRegistry::new();
        registry.register("rerank-default", "v1", Arc::new(Stub("v1"))).unwrap();
        registry.register("rerank-default", "v2", Arc::new(Stub("v2"))).unwrap();
        registry.activate("rerank-default", "v2").unwrap();

        assert_eq!(registry.resolve("rerank-default").unwrap().version, "v2");
        assert_eq!(registry.resolve("rerank-default@v1").unwrap().version, "v1");
    }

    #[test]
    fn test_rollback_restores_previous_active_version() {
        let mut registry: ModelRegistry<dyn Provider> = ModelRegistry::new();
        registry.register("rerank-default", "v1", Arc::new(Stub("v1"))).unwrap();
        registry.register("rerank-default", "v2", Arc::new(Stub("v2"))).unwrap();
        registry.activate("rerank-default", "v2").unwrap();

        let rolled_back = registry.rollback("rerank-default").unwrap();
        assert_eq!(rolled_back.version, "v1");
        assert_eq!(registry.resolve("rerank-default").unwrap().version, "v1");
    }

    #[test]
    fn test_resolve_missing_model_returns_error() {
        let registry: ModelRegistry<dyn Provider> = ModelRegistry::new();
        let err = registry.resolve("does-not-exist").unwrap_err();
        assert_eq!(err, RegistryError::ModelNotFound("does-not-exist".to_string()));
    }

    #[test]
    fn test_rollback_without_prior_activation_errors() {
        let mut registry: ModelRegistry<dyn Provider> = ModelRegistry::new();
        registry.register("rerank-default", "v1", Arc::new(Stub("v1"))).unwrap();
        let err = registry.rollback("rerank-default").unwrap_err();
        assert_eq!(err, RegistryError::NoRollbackTarget("rerank-default".to_string()));
    }
}
