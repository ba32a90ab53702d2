use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
};

use hearth_process::ResourceId;

use crate::multiplexer::Multiplexer;

/// Resource id to live multiplexer. At most one entry per resource.
#[derive(Clone, Default)]
pub(crate) struct Registry {
    inner: Arc<Mutex<HashMap<ResourceId, Arc<Multiplexer>>>>,
}

impl Registry {
    fn map(&self) -> std::sync::MutexGuard<'_, HashMap<ResourceId, Arc<Multiplexer>>> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub(crate) fn get(&self, id: ResourceId) -> Option<Arc<Multiplexer>> {
        self.map().get(&id).cloned()
    }

    /// Returns the previous entry, which callers treat as a bug.
    pub(crate) fn insert(&self, mux: Arc<Multiplexer>) -> Option<Arc<Multiplexer>> {
        self.map().insert(mux.id(), mux)
    }

    /// Removes the entry only if it still points at `mux`, so a late teardown
    /// never evicts a newer multiplexer for the same resource.
    pub(crate) fn remove_if_same(&self, id: ResourceId, mux: &Multiplexer) -> bool {
        let mut map = self.map();
        match map.get(&id) {
            Some(current) if std::ptr::eq(Arc::as_ptr(current), mux) => {
                map.remove(&id);
                true
            }
            _ => false,
        }
    }

    pub(crate) fn ids(&self) -> Vec<ResourceId> {
        let mut ids: Vec<_> = self.map().keys().copied().collect();
        ids.sort();
        ids
    }
}
