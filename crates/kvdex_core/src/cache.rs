//! Per-model cache of engine handles.
//!
//! Engines hold the store they were built over. The cache is never
//! refreshed implicitly: whoever changes connection parameters must call
//! [`EngineCache::invalidate`] or [`EngineCache::clear`], which is what
//! [`crate::Database::replace_store`] does.

use crate::config::Config;
use crate::delete::DeleteEngine;
use crate::reset::ResetEngine;
use crate::save::SaveEngine;
use kvdex_store::KeyValueStore;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

/// The engines one model works with.
#[derive(Debug, Clone)]
pub struct Engines {
    /// Save engine.
    pub save: SaveEngine,
    /// Delete engine.
    pub delete: DeleteEngine,
    /// Reset engine.
    pub reset: ResetEngine,
}

impl Engines {
    /// Builds all engines over one store.
    pub fn new(store: &Arc<dyn KeyValueStore>, config: &Config) -> Self {
        Self {
            save: SaveEngine::new(Arc::clone(store)),
            delete: DeleteEngine::new(Arc::clone(store), config.clone()),
            reset: ResetEngine::new(Arc::clone(store)),
        }
    }
}

/// Engine handles keyed by model namespace.
#[derive(Debug, Default)]
pub struct EngineCache {
    entries: Mutex<HashMap<String, Arc<Engines>>>,
}

impl EngineCache {
    /// Creates an empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the cached engines for `namespace`, building them on first use.
    pub fn get_or_insert_with(
        &self,
        namespace: &str,
        build: impl FnOnce() -> Engines,
    ) -> Arc<Engines> {
        let mut entries = self.entries.lock();
        if let Some(engines) = entries.get(namespace) {
            return Arc::clone(engines);
        }
        let engines = Arc::new(build());
        entries.insert(namespace.to_string(), Arc::clone(&engines));
        tracing::trace!(namespace, "built engines");
        engines
    }

    /// Drops the engines of one model. Returns whether any were cached.
    pub fn invalidate(&self, namespace: &str) -> bool {
        self.entries.lock().remove(namespace).is_some()
    }

    /// Drops every cached engine.
    pub fn clear(&self) {
        self.entries.lock().clear();
    }

    /// Whether engines for `namespace` are cached.
    pub fn contains(&self, namespace: &str) -> bool {
        self.entries.lock().contains_key(namespace)
    }

    /// Number of cached models.
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Whether the cache is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kvdex_store::InMemoryStore;

    fn store() -> Arc<dyn KeyValueStore> {
        Arc::new(InMemoryStore::new())
    }

    #[test]
    fn engines_are_built_once_per_namespace() {
        let cache = EngineCache::new();
        let store = store();
        let mut builds = 0;
        let first = cache.get_or_insert_with("a", || {
            builds += 1;
            Engines::new(&store, &Config::default())
        });
        let second = cache.get_or_insert_with("a", || {
            builds += 1;
            Engines::new(&store, &Config::default())
        });
        assert_eq!(builds, 1);
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn invalidate_and_clear() {
        let cache = EngineCache::new();
        let store = store();
        for ns in ["a", "b"] {
            cache.get_or_insert_with(ns, || Engines::new(&store, &Config::default()));
        }
        assert!(cache.invalidate("a"));
        assert!(!cache.invalidate("a"));
        assert!(!cache.contains("a"));
        assert!(cache.contains("b"));

        cache.clear();
        assert!(cache.is_empty());
    }
}
