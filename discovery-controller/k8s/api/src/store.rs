//! Read seams onto the watcher substrate's keyed caches.
//!
//! The informer layer owns the authoritative caches; the discovery
//! controller only reads them. [`MemStore`] is a reference implementation
//! backing tests and in-process watcher glue.

use crate::{ObjectKey, Resource};
use indexmap::IndexMap;
use parking_lot::RwLock;
use std::sync::Arc;

/// Snapshot reads over a keyed resource cache.
///
/// `list` preserves the store's insertion order; downstream ordering
/// guarantees depend on it.
pub trait Store<T>: Send + Sync {
    fn get(&self, key: &ObjectKey) -> Option<T>;

    fn list(&self) -> Vec<T>;
}

/// A store that additionally indexes resources by label value.
///
/// `list_by_label` returns matches in index order, scoped to a namespace.
pub trait LabelIndex<T>: Store<T> {
    fn list_by_label(&self, namespace: &str, label: &str, value: &str) -> Vec<T>;
}

/// A shared, insertion-ordered store.
#[derive(Debug)]
pub struct MemStore<T>(Arc<RwLock<IndexMap<ObjectKey, T>>>);

// === impl MemStore ===

impl<T> Default for MemStore<T> {
    fn default() -> Self {
        Self(Arc::new(RwLock::new(IndexMap::new())))
    }
}

impl<T> Clone for MemStore<T> {
    fn clone(&self) -> Self {
        Self(self.0.clone())
    }
}

impl<T: Resource + Clone> MemStore<T> {
    /// Inserts or replaces the object under its own key. Replacement keeps
    /// the original insertion position.
    pub fn apply(&self, obj: T) {
        self.0.write().insert(obj.key(), obj);
    }

    pub fn delete(&self, key: &ObjectKey) -> Option<T> {
        // shift_remove keeps the remaining entries in insertion order.
        self.0.write().shift_remove(key)
    }
}

impl<T: Resource + Clone + Send + Sync> Store<T> for MemStore<T> {
    fn get(&self, key: &ObjectKey) -> Option<T> {
        self.0.read().get(key).cloned()
    }

    fn list(&self) -> Vec<T> {
        self.0.read().values().cloned().collect()
    }
}

impl<T: Resource + Clone + Send + Sync> LabelIndex<T> for MemStore<T> {
    fn list_by_label(&self, namespace: &str, label: &str, value: &str) -> Vec<T> {
        self.0
            .read()
            .values()
            .filter(|obj| obj.namespace() == namespace)
            .filter(|obj| obj.metadata().labels.get(label).map(String::as_str) == Some(value))
            .cloned()
            .collect()
    }
}
