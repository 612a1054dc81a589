//! In-memory response cache
//!
//! A capacity-bounded TTL cache with request coalescing: for any key at most
//! one computation is in flight, and every concurrent caller for that key
//! awaits the same result, failure included. Failures are never stored.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures::future::{BoxFuture, FutureExt, Shared};
use std::future::Future;
use std::hash::Hash;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::debug;

type SharedResult<V, E> = Shared<BoxFuture<'static, Result<V, E>>>;

enum Slot<V, E> {
    Ready { value: V, inserted_at: Instant },
    Pending { id: u64, future: SharedResult<V, E> },
}

enum Lookup<V, E> {
    Hit(V),
    Wait(SharedResult<V, E>),
    Miss,
}

/// Configuration for one logical cache
#[derive(Debug, Clone)]
pub struct MemoryCacheConfig {
    /// Name used in log fields
    pub name: &'static str,
    /// Lifetime of a stored value
    pub ttl: Duration,
    /// Maximum number of stored values
    pub max_entries: usize,
    /// When disabled every `get` runs its computation
    pub enabled: bool,
}

impl MemoryCacheConfig {
    pub fn new(name: &'static str, ttl: Duration) -> Self {
        Self {
            name,
            ttl,
            max_entries: 10_000,
            enabled: true,
        }
    }

    pub fn with_max_entries(mut self, max: usize) -> Self {
        self.max_entries = max.max(1);
        self
    }

    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }
}

/// Single-flight TTL cache.
///
/// Cloning is cheap and clones share storage.
pub struct ResponseCache<K, V, E> {
    entries: Arc<DashMap<K, Slot<V, E>>>,
    config: MemoryCacheConfig,
    next_id: Arc<AtomicU64>,
}

impl<K, V, E> Clone for ResponseCache<K, V, E> {
    fn clone(&self) -> Self {
        Self {
            entries: Arc::clone(&self.entries),
            config: self.config.clone(),
            next_id: Arc::clone(&self.next_id),
        }
    }
}

impl<K, V, E> ResponseCache<K, V, E>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
    E: Clone + Send + Sync + 'static,
{
    pub fn new(config: MemoryCacheConfig) -> Self {
        Self {
            entries: Arc::new(DashMap::new()),
            config,
            next_id: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn config(&self) -> &MemoryCacheConfig {
        &self.config
    }

    /// Return the cached value for `key`, or run `compute` once and share its
    /// outcome with every caller waiting on the same key.
    pub async fn get<F, Fut>(&self, key: K, compute: F) -> Result<V, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, E>> + Send + 'static,
    {
        if !self.config.enabled {
            return compute().await;
        }

        let future = match self.entries.entry(key.clone()) {
            Entry::Occupied(mut occupied) => {
                let lookup = match occupied.get() {
                    Slot::Ready { value, inserted_at } if inserted_at.elapsed() < self.config.ttl => {
                        Lookup::Hit(value.clone())
                    }
                    Slot::Pending { future, .. } => Lookup::Wait(future.clone()),
                    Slot::Ready { .. } => Lookup::Miss,
                };
                match lookup {
                    Lookup::Hit(value) => {
                        debug!(cache = self.config.name, "Cache hit");
                        return Ok(value);
                    }
                    Lookup::Wait(future) => {
                        debug!(cache = self.config.name, "Joining in-flight computation");
                        future
                    }
                    Lookup::Miss => {
                        debug!(cache = self.config.name, "Cache entry expired");
                        let (id, future) = self.start(key, compute);
                        occupied.insert(Slot::Pending {
                            id,
                            future: future.clone(),
                        });
                        future
                    }
                }
            }
            Entry::Vacant(vacant) => {
                debug!(cache = self.config.name, "Cache miss");
                let (id, future) = self.start(key, compute);
                vacant.insert(Slot::Pending {
                    id,
                    future: future.clone(),
                });
                future
            }
        };

        future.await
    }

    fn start<F, Fut>(&self, key: K, compute: F) -> (u64, SharedResult<V, E>)
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, E>> + Send + 'static,
    {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let entries = Arc::clone(&self.entries);
        let max_entries = self.config.max_entries;
        let ttl = self.config.ttl;
        let pending = compute();

        let future = async move {
            let result = pending.await;
            settle(&entries, key, id, &result, max_entries, ttl);
            result
        }
        .boxed()
        .shared();

        (id, future)
    }

    /// Drop the value for one key. An in-flight computation keeps running.
    pub fn invalidate(&self, key: &K) {
        self.entries
            .remove_if(key, |_, slot| matches!(slot, Slot::Ready { .. }));
    }

    /// Drop every stored value.
    pub fn evict_all(&self) {
        self.entries
            .retain(|_, slot| matches!(slot, Slot::Pending { .. }));
        debug!(cache = self.config.name, "Evicted all cache entries");
    }

    /// Number of stored (ready) values, expired ones included.
    pub fn len(&self) -> usize {
        self.entries
            .iter()
            .filter(|slot| matches!(slot.value(), Slot::Ready { .. }))
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Store or discard the outcome of computation `id`, unless the slot has
/// been taken over by a newer one in the meantime.
fn settle<K, V, E>(
    entries: &DashMap<K, Slot<V, E>>,
    key: K,
    id: u64,
    result: &Result<V, E>,
    max_entries: usize,
    ttl: Duration,
) where
    K: Eq + Hash + Clone,
    V: Clone,
{
    let is_ours = |slot: &Slot<V, E>| matches!(slot, Slot::Pending { id: pending, .. } if *pending == id);

    match result {
        Ok(value) => {
            if let Some(mut slot) = entries.get_mut(&key) {
                if is_ours(slot.value()) {
                    *slot.value_mut() = Slot::Ready {
                        value: value.clone(),
                        inserted_at: Instant::now(),
                    };
                }
            }
            evict_over_capacity(entries, max_entries, ttl);
        }
        Err(_) => {
            entries.remove_if(&key, |_, slot| is_ours(slot));
        }
    }
}

fn evict_over_capacity<K, V, E>(entries: &DashMap<K, Slot<V, E>>, max_entries: usize, ttl: Duration)
where
    K: Eq + Hash + Clone,
{
    let ready: Vec<(K, Instant)> = entries
        .iter()
        .filter_map(|slot| match slot.value() {
            Slot::Ready { inserted_at, .. } => Some((slot.key().clone(), *inserted_at)),
            Slot::Pending { .. } => None,
        })
        .collect();

    if ready.len() <= max_entries {
        return;
    }

    let mut candidates = ready;
    // Expired first, then oldest.
    candidates.sort_by_key(|(_, inserted_at)| {
        (inserted_at.elapsed() < ttl, *inserted_at)
    });
    let excess = candidates.len() - max_entries;
    for (key, _) in candidates.into_iter().take(excess) {
        entries.remove_if(&key, |_, slot| matches!(slot, Slot::Ready { .. }));
    }
}
