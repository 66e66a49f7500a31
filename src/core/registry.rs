//! # Process registry: category → name → handle.
//!
//! The map lock is held only for lookups and inserts; per-worker state lives
//! behind each handle's own mutex, so long operations on one worker never
//! block lookups of another.
//!
//! ## Rules
//! - Callers get `Arc<ProcessHandle>` clones or sorted snapshots, never the map.
//! - An empty category is removed together with its last handle.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;

use crate::process::ProcessHandle;

type Category = HashMap<String, Arc<ProcessHandle>>;

#[derive(Default)]
pub(crate) struct Registry {
    processes: RwLock<HashMap<String, Category>>,
}

impl Registry {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) async fn get(&self, category: &str, name: &str) -> Option<Arc<ProcessHandle>> {
        self.processes
            .read()
            .await
            .get(category)
            .and_then(|names| names.get(name))
            .cloned()
    }

    /// Inserts `handle` under its spec key; returns the handle it replaced.
    pub(crate) async fn insert(&self, handle: Arc<ProcessHandle>) -> Option<Arc<ProcessHandle>> {
        let category = handle.spec().category().to_string();
        let name = handle.spec().name().to_string();
        self.processes
            .write()
            .await
            .entry(category)
            .or_default()
            .insert(name, handle)
    }

    pub(crate) async fn remove(&self, category: &str, name: &str) -> Option<Arc<ProcessHandle>> {
        let mut map = self.processes.write().await;
        let names = map.get_mut(category)?;
        let removed = names.remove(name);
        if names.is_empty() {
            map.remove(category);
        }
        removed
    }

    /// All handles, sorted by (category, name).
    pub(crate) async fn snapshot(&self) -> Vec<Arc<ProcessHandle>> {
        let map = self.processes.read().await;
        let mut all: Vec<Arc<ProcessHandle>> = map.values().flat_map(|names| names.values().cloned()).collect();
        all.sort_unstable_by(|a, b| {
            (a.spec().category(), a.spec().name()).cmp(&(b.spec().category(), b.spec().name()))
        });
        all
    }

    #[cfg(test)]
    pub(crate) async fn len(&self) -> usize {
        self.processes.read().await.values().map(HashMap::len).sum()
    }
}
