//! Concurrency-safe store of named model instances and provider factories.
//!
//! One read-write lock guards both maps; reads run concurrently, mutations
//! are exclusive. Adapter construction and close both happen outside the
//! critical section since they may perform network calls — only the map
//! mutation itself is locked.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use thiserror::Error;

use crate::config::{ConfigTarget, RegistryConfig};
use crate::providers::{Capability, LanguageModel, ProviderError, ProviderFactory};

pub const DEFAULT_MODEL_NAME: &str = "default";

#[derive(Error, Debug)]
pub enum RegistryError {
    #[error("model '{0}' already exists")]
    AlreadyExists(String),
    #[error("unsupported provider '{0}'")]
    UnsupportedProvider(String),
    #[error("failed to create model '{name}'")]
    FailedToCreateModel {
        name: String,
        #[source]
        source: ProviderError,
    },
    #[error("model '{0}' not found")]
    NotFound(String),
}

/// Aggregate of every close failure during registry teardown. Teardown
/// itself always clears the registry regardless.
#[derive(Debug)]
pub struct CloseError {
    pub failures: Vec<(String, ProviderError)>,
}

impl std::fmt::Display for CloseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} model(s) failed to close:", self.failures.len())?;
        for (name, err) in &self.failures {
            write!(f, " {}: {};", name, err)?;
        }
        Ok(())
    }
}

impl std::error::Error for CloseError {}

#[derive(Default)]
struct Inner {
    models: HashMap<String, Arc<dyn LanguageModel>>,
    factories: HashMap<String, Arc<dyn ProviderFactory>>,
}

/// Registry of named model instances. Owns the lifetime of every model it
/// creates.
pub struct Registry {
    inner: RwLock<Inner>,
    default_name: String,
}

/// Functional-option construction for [`Registry`].
pub struct RegistryBuilder {
    default_name: String,
}

impl RegistryBuilder {
    /// Name that [`Registry::get_default`] resolves.
    pub fn default_model(mut self, name: impl Into<String>) -> Self {
        self.default_name = name.into();
        self
    }

    pub fn build(self) -> Registry {
        Registry {
            inner: RwLock::new(Inner::default()),
            default_name: self.default_name,
        }
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl Registry {
    pub fn builder() -> RegistryBuilder {
        RegistryBuilder {
            default_name: DEFAULT_MODEL_NAME.to_string(),
        }
    }

    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or overwrite) the factory for a provider string.
    pub fn register_factory(&self, factory: Arc<dyn ProviderFactory>) {
        let provider = factory.provider().to_string();
        let mut inner = self.inner.write();
        if inner.factories.insert(provider.clone(), factory).is_some() {
            tracing::debug!(provider = %provider, "provider factory overwritten");
        } else {
            tracing::info!(provider = %provider, "provider factory registered");
        }
    }

    /// Create a model from `target` and insert it under `name`.
    ///
    /// Construction runs outside the lock (it may hit the network); the
    /// name is re-checked at insert time in case of a concurrent add.
    pub async fn add_model(
        &self,
        name: &str,
        target: ConfigTarget,
    ) -> Result<Arc<dyn LanguageModel>, RegistryError> {
        let factory = {
            let inner = self.inner.read();
            if inner.models.contains_key(name) {
                return Err(RegistryError::AlreadyExists(name.to_string()));
            }
            inner
                .factories
                .get(&target.provider)
                .cloned()
                .ok_or_else(|| RegistryError::UnsupportedProvider(target.provider.clone()))?
        };

        let model =
            factory
                .create(&target)
                .await
                .map_err(|source| RegistryError::FailedToCreateModel {
                    name: name.to_string(),
                    source,
                })?;

        // The guard must be fully out of scope before any `.await` so the
        // returned future stays `Send`.
        let lost_race = {
            let mut inner = self.inner.write();
            if inner.models.contains_key(name) {
                true
            } else {
                inner.models.insert(name.to_string(), Arc::clone(&model));
                false
            }
        };
        if lost_race {
            // Lost a race on the name: the registry owns every model it
            // creates, so close the loser before reporting the duplicate.
            if let Err(e) = model.close().await {
                tracing::warn!(name = %name, error = %e, "close failed for model discarded after duplicate add");
            }
            return Err(RegistryError::AlreadyExists(name.to_string()));
        }
        tracing::info!(name = %name, provider = %target.provider, model = %target.model, "model added");
        Ok(model)
    }

    /// The model under the configured default name, if any.
    pub fn get_default(&self) -> Option<Arc<dyn LanguageModel>> {
        self.get_named(&self.default_name)
    }

    /// Miss is a valid, common case; returns `None` rather than erroring.
    pub fn get_named(&self, name: &str) -> Option<Arc<dyn LanguageModel>> {
        self.inner.read().models.get(name).cloned()
    }

    pub fn get_by_provider(&self, provider: &str) -> Vec<Arc<dyn LanguageModel>> {
        self.inner
            .read()
            .models
            .values()
            .filter(|m| m.provider() == provider)
            .cloned()
            .collect()
    }

    pub fn get_by_capability(&self, cap: Capability) -> Vec<Arc<dyn LanguageModel>> {
        self.inner
            .read()
            .models
            .values()
            .filter(|m| m.capabilities().supports(cap))
            .cloned()
            .collect()
    }

    pub fn list_models(&self) -> Vec<String> {
        let mut names: Vec<String> = self.inner.read().models.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn list_registered_providers(&self) -> Vec<String> {
        let mut providers: Vec<String> = self.inner.read().factories.keys().cloned().collect();
        providers.sort();
        providers
    }

    /// Remove a model and close it. A close failure is logged, never
    /// propagated: removal is not blocked by a misbehaving adapter.
    pub async fn remove_model(&self, name: &str) -> Result<(), RegistryError> {
        let model = self
            .inner
            .write()
            .models
            .remove(name)
            .ok_or_else(|| RegistryError::NotFound(name.to_string()))?;
        if let Err(e) = model.close().await {
            tracing::warn!(name = %name, error = %e, "model close failed during removal");
        }
        tracing::info!(name = %name, "model removed");
        Ok(())
    }

    /// Bulk [`Self::add_model`] over a configuration map. Aborts on the
    /// first failure: a model referenced later by name must exist.
    pub async fn load_from_config(&self, config: &RegistryConfig) -> Result<(), RegistryError> {
        for (name, target) in &config.models {
            self.add_model(name, target.clone()).await?;
        }
        Ok(())
    }

    /// Close every model and clear the registry. Individual close failures
    /// are aggregated; the map is reset regardless.
    pub async fn close(&self) -> Result<(), CloseError> {
        let models: Vec<(String, Arc<dyn LanguageModel>)> = {
            let mut inner = self.inner.write();
            inner.models.drain().collect()
        };
        let mut failures = Vec::new();
        for (name, model) in models {
            if let Err(e) = model.close().await {
                tracing::warn!(name = %name, error = %e, "model close failed during registry close");
                failures.push((name, e));
            }
        }
        if failures.is_empty() {
            Ok(())
        } else {
            Err(CloseError { failures })
        }
    }
}
