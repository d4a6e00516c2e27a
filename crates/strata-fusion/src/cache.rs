//! Single-slot cache for the below-ground layer.
//!
//! Below-layer handlers overwrite the slot; above-layer handlers take a
//! snapshot of it. A snapshot is an `Arc` clone of the whole entry, so an
//! in-flight fusion keeps computing against the values and origin it started
//! with even if a new below update lands meanwhile.

use std::sync::{Arc, RwLock};

/// Most recently received value for one layer, or nothing yet.
#[derive(Debug)]
pub struct LayerCache<T> {
    slot: RwLock<Option<Arc<T>>>,
}

impl<T> LayerCache<T> {
    /// An empty cache (pass-through mode until the first [`store`](Self::store)).
    pub fn new() -> Self {
        Self {
            slot: RwLock::new(None),
        }
    }

    /// Replace whatever was cached with `value`.
    pub fn store(&self, value: T) {
        let mut guard = self.slot.write().unwrap_or_else(|e| e.into_inner());
        *guard = Some(Arc::new(value));
    }

    /// A consistent view of the current entry, if any.
    pub fn snapshot(&self) -> Option<Arc<T>> {
        self.slot.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn is_present(&self) -> bool {
        self.slot.read().unwrap_or_else(|e| e.into_inner()).is_some()
    }
}

impl<T> Default for LayerCache<T> {
    fn default() -> Self {
        Self::new()
    }
}
