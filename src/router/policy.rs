//! Routing Policy
//!
//! Picks the (provider, key) pair for each attempt of a request.

use crate::config::{ProviderEntry, RoutingMode};
use crate::router::key_pool::KeyPool;
use crate::router::registry::Registry;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};

/// Per-call routing state: what has been ruled out so far
#[derive(Debug, Default)]
pub struct Exclusions {
    providers: HashSet<usize>,

    /// Per provider: rotation start taken on first pick, and keys ruled out
    keys: HashMap<usize, KeyWalk>,

    /// Round-robin provider chosen for this call
    pinned: Option<usize>,
}

#[derive(Debug)]
struct KeyWalk {
    start: usize,
    excluded: HashSet<usize>,
}

impl Exclusions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn exclude_provider(&mut self, index: usize) {
        self.providers.insert(index);
    }

    pub fn is_excluded(&self, index: usize) -> bool {
        self.providers.contains(&index)
    }

    /// Rule out one key; the provider goes too once none of its keys remain.
    /// Returns whether the provider is now excluded.
    pub fn exclude_key(&mut self, index: usize, key_index: usize, pool_len: usize) -> bool {
        if let Some(walk) = self.keys.get_mut(&index) {
            walk.excluded.insert(key_index);
            if walk.excluded.len() >= pool_len {
                self.providers.insert(index);
            }
        } else {
            self.providers.insert(index);
        }
        self.is_excluded(index)
    }

    /// Key for a provider in this call. The shared cursor advances only on the
    /// first pick; later picks walk forward from there.
    fn key_for(&mut self, index: usize, pool: &KeyPool) -> Option<usize> {
        if !self.keys.contains_key(&index) {
            let start = pool.advance()?;
            self.keys.insert(
                index,
                KeyWalk {
                    start,
                    excluded: HashSet::new(),
                },
            );
        }
        let walk = self.keys.get(&index)?;
        pool.next_available(walk.start, &walk.excluded)
    }
}

/// A provider and key chosen for one attempt
#[derive(Debug, Clone, Copy)]
pub struct Candidate<'r> {
    /// Registry index
    pub index: usize,
    pub provider: &'r ProviderEntry,
    pub key_index: usize,
    pub key: &'r str,
}

/// Provider selection under the configured routing mode
#[derive(Debug)]
pub struct RoutingPolicy {
    mode: RoutingMode,

    /// Provider id used by `selected` mode; first entry when unset
    selected: Option<String>,

    /// Round-robin position, shared by all callers
    cursor: Mutex<usize>,
}

impl RoutingPolicy {
    pub fn new(mode: RoutingMode, selected: Option<String>) -> Self {
        Self {
            mode,
            selected,
            cursor: Mutex::new(0),
        }
    }

    pub fn mode(&self) -> RoutingMode {
        self.mode
    }

    /// Next candidate for `attempt` (0 = fresh request), or None when nothing is left
    pub fn next_candidate<'r>(
        &self,
        registry: &'r Registry,
        attempt: usize,
        excluded: &mut Exclusions,
    ) -> Option<Candidate<'r>> {
        let index = match self.mode {
            RoutingMode::Selected => self.pick_selected(registry, excluded)?,
            RoutingMode::RoundRobin => self.pick_round_robin(registry, attempt, excluded)?,
            RoutingMode::Failover => Self::pick_failover(registry, attempt, excluded)?,
        };

        let provider = registry.entry(index)?;
        let pool = registry.pool(index)?;

        match excluded.key_for(index, pool) {
            Some(key_index) => Some(Candidate {
                index,
                provider,
                key_index,
                key: pool.key(key_index)?.value(),
            }),
            None => {
                excluded.exclude_provider(index);
                None
            }
        }
    }

    fn pick_selected(&self, registry: &Registry, excluded: &Exclusions) -> Option<usize> {
        let index = match &self.selected {
            Some(id) => registry.position(id)?,
            None if registry.is_empty() => return None,
            None => 0,
        };

        let routable = registry.entry(index).is_some_and(|e| e.is_routable());
        (routable && !excluded.is_excluded(index)).then_some(index)
    }

    fn pick_round_robin(
        &self,
        registry: &Registry,
        attempt: usize,
        excluded: &mut Exclusions,
    ) -> Option<usize> {
        // Retries stay on the provider this call started with
        if attempt > 0 {
            if let Some(index) = excluded.pinned {
                return (!excluded.is_excluded(index)).then_some(index);
            }
        }

        let eligible: Vec<usize> = registry
            .routable()
            .filter(|i| !excluded.is_excluded(*i))
            .collect();
        if eligible.is_empty() {
            return None;
        }

        let index = {
            let mut cursor = self.cursor.lock();
            let index = eligible[*cursor % eligible.len()];
            *cursor = cursor.wrapping_add(1);
            index
        };
        excluded.pinned = Some(index);
        Some(index)
    }

    fn pick_failover(registry: &Registry, attempt: usize, excluded: &Exclusions) -> Option<usize> {
        let routable: Vec<usize> = registry.routable().collect();
        if attempt >= routable.len() {
            return None;
        }
        routable.into_iter().find(|i| !excluded.is_excluded(*i))
    }
}
