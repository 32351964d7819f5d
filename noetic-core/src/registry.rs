//! The collection registry, the entry point of the crate.
//!
//! A [`Registry`] is built once from a storage engine and a set of
//! [`CollectionConfig`] declarations. It owns the [`ConnectionManager`], so
//! connections live as long as the registry (or until the engine invalidates
//! them), and hands out [`Collection`] facades by name.
//!
//! # Example
//!
//! ```ignore
//! use noetic::prelude::*;
//! use noetic::memory::InMemoryStore;
//!
//! let registry = Registry::builder(InMemoryStore::new())
//!     .collection(CollectionConfig::new("users").key_path("id"))
//!     .collection(CollectionConfig::new("log").auto_increment(true))
//!     .build()?;
//!
//! let users = registry.collection("users")?;
//! ```

use std::collections::HashSet;

use crate::{
    backend::StoreBackend,
    collection::Collection,
    config::{CollectionConfig, StoreOptions},
    connection::ConnectionManager,
    error::{DocumentStoreError, DocumentStoreResult},
};

/// Registered collections bound to one storage engine.
#[derive(Debug)]
pub struct Registry<B: StoreBackend> {
    configs: Vec<CollectionConfig>,
    connections: ConnectionManager<B>,
}

impl<B: StoreBackend + 'static> Registry<B> {
    /// Registers `configs` against `backend` with default options.
    ///
    /// # Errors
    ///
    /// Returns a [`Configuration`](DocumentStoreError::Configuration) error if a
    /// declaration is invalid or a name is declared twice.
    pub fn register(
        backend: B,
        configs: impl IntoIterator<Item = CollectionConfig>,
    ) -> DocumentStoreResult<Self> {
        Self::builder(backend)
            .collections(configs)
            .build()
    }

    /// Creates a builder for a registry over `backend`.
    pub fn builder(backend: B) -> RegistryBuilder<B> {
        RegistryBuilder::new(backend)
    }

    /// Returns the facade for the collection `name`.
    ///
    /// Fails before touching storage if the name is blank or unknown; the
    /// error for an unknown name lists every registered one.
    pub fn collection(&self, name: &str) -> DocumentStoreResult<Collection<'_, B>> {
        Ok(Collection::new(self.config(name)?, &self.connections))
    }

    /// Returns the declaration of the collection `name`.
    pub fn config(&self, name: &str) -> DocumentStoreResult<&CollectionConfig> {
        if name.trim().is_empty() {
            return Err(DocumentStoreError::Configuration(
                "Collection name must not be empty".to_string(),
            ));
        }

        self.configs
            .iter()
            .find(|config| config.name == name)
            .ok_or_else(|| {
                DocumentStoreError::Configuration(format!(
                    "Collection \"{name}\" is not registered. Valid collections: {}",
                    self.collection_names()
                        .iter()
                        .map(|n| format!("\"{n}\""))
                        .collect::<Vec<_>>()
                        .join(", ")
                ))
            })
    }

    /// Returns the registered collection names in declaration order.
    pub fn collection_names(&self) -> Vec<&str> {
        self.configs
            .iter()
            .map(|config| config.name.as_str())
            .collect()
    }

    /// Returns the connection manager shared by every collection.
    pub fn connections(&self) -> &ConnectionManager<B> {
        &self.connections
    }

    /// Returns the storage engine.
    pub fn backend(&self) -> &B {
        self.connections.backend()
    }

    /// Closes every open connection. Collections reopen lazily on next use.
    pub fn close(&self) {
        self.connections.close_all();
    }
}

/// Builder for [`Registry`].
pub struct RegistryBuilder<B: StoreBackend> {
    backend: B,
    options: StoreOptions,
    configs: Vec<CollectionConfig>,
}

impl<B: StoreBackend + 'static> RegistryBuilder<B> {
    /// Creates a builder with default options and no collections.
    pub fn new(backend: B) -> Self {
        Self {
            backend,
            options: StoreOptions::default(),
            configs: Vec::new(),
        }
    }

    /// Sets the options shared by every collection.
    pub fn options(mut self, options: StoreOptions) -> Self {
        self.options = options;
        self
    }

    /// Declares one collection.
    pub fn collection(mut self, config: CollectionConfig) -> Self {
        self.configs.push(config);
        self
    }

    /// Declares several collections.
    pub fn collections(mut self, configs: impl IntoIterator<Item = CollectionConfig>) -> Self {
        self.configs.extend(configs);
        self
    }

    /// Validates the declarations and builds the registry.
    pub fn build(self) -> DocumentStoreResult<Registry<B>> {
        let mut seen = HashSet::new();

        for config in &self.configs {
            config.validate()?;

            if !seen.insert(config.name.as_str()) {
                return Err(DocumentStoreError::Configuration(format!(
                    "Collection \"{}\" is declared more than once",
                    config.name
                )));
            }
        }

        Ok(Registry {
            configs: self.configs,
            connections: ConnectionManager::new(self.backend, self.options),
        })
    }
}
