use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
};

use hearth_process::ResourceId;

/// Per-resource lock serializing start/stop/restart sequences.
pub type ActionLock = Arc<tokio::sync::Mutex<()>>;

/// Hands out one lock per resource. Entries are never removed.
#[derive(Debug, Default)]
pub struct ActionLocks {
    inner: Mutex<HashMap<ResourceId, ActionLock>>,
}

impl ActionLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, id: ResourceId) -> ActionLock {
        let mut map = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        map.entry(id).or_default().clone()
    }
}
