//! Provider Registry
//!
//! Ordered, immutable provider snapshots. Reloading swaps the whole snapshot,
//! so a reader never sees a half-applied update.

use crate::config::ProviderEntry;
use crate::router::key_pool::KeyPool;
use parking_lot::RwLock;
use std::sync::Arc;

/// One immutable view of the configured providers
#[derive(Debug)]
pub struct Registry {
    entries: Vec<ProviderEntry>,
    pools: Vec<KeyPool>,
}

impl Registry {
    pub fn new(entries: Vec<ProviderEntry>) -> Self {
        let pools = entries
            .iter()
            .map(|e| KeyPool::new(e.id.clone(), e.keys.clone()))
            .collect();
        Self { entries, pools }
    }

    pub fn entries(&self) -> &[ProviderEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entry(&self, index: usize) -> Option<&ProviderEntry> {
        self.entries.get(index)
    }

    pub fn pool(&self, index: usize) -> Option<&KeyPool> {
        self.pools.get(index)
    }

    /// Registry index of a provider id
    pub fn position(&self, id: &str) -> Option<usize> {
        self.entries.iter().position(|e| e.id == id)
    }

    /// Indices of enabled providers with keys, in registry order
    pub fn routable(&self) -> impl Iterator<Item = usize> + '_ {
        self.entries
            .iter()
            .enumerate()
            .filter(|(_, e)| e.is_routable())
            .map(|(i, _)| i)
    }
}

/// Shared holder of the current registry snapshot
#[derive(Debug)]
pub struct RegistryStore {
    current: RwLock<Arc<Registry>>,
}

impl RegistryStore {
    pub fn new(entries: Vec<ProviderEntry>) -> Self {
        Self {
            current: RwLock::new(Arc::new(Registry::new(entries))),
        }
    }

    /// The snapshot in effect right now; stays valid for as long as it is held
    pub fn snapshot(&self) -> Arc<Registry> {
        self.current.read().clone()
    }

    /// Replace the whole registry. Calls already routing keep their old snapshot.
    pub fn replace(&self, entries: Vec<ProviderEntry>) {
        let next = Arc::new(Registry::new(entries));
        *self.current.write() = next;
    }
}
