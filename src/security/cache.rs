//! Bounded TTL cache for per-caller limiter state.
//!
//! Entries expire after `ttl` without access; every access refreshes the
//! expiry. When the cache is full, expired entries are purged first and then
//! the entries closest to expiry are evicted. The bound is approximate under
//! concurrent inserts of distinct new keys.

use std::hash::Hash;
use std::time::Duration;

use dashmap::mapref::entry::Entry as MapEntry;
use dashmap::DashMap;
use tokio::time::Instant;

struct Slot<V> {
    value: V,
    expires_at: Instant,
}

pub struct TtlCache<K, V> {
    entries: DashMap<K, Slot<V>>,
    ttl: Duration,
    max_entries: usize,
}

impl<K, V> TtlCache<K, V>
where
    K: Eq + Hash + Clone,
{
    pub fn new(ttl: Duration, max_entries: usize) -> Self {
        Self {
            entries: DashMap::new(),
            ttl,
            max_entries: max_entries.max(1),
        }
    }

    /// Run `f` on the live value for `key`, creating it with `init` when the
    /// key is absent or its entry expired.
    ///
    /// The entry stays locked while `f` runs, so `f` must not touch the cache.
    pub fn with_entry<R>(
        &self,
        key: &K,
        init: impl FnOnce() -> V,
        f: impl FnOnce(&mut V) -> R,
    ) -> R {
        let now = Instant::now();
        if !self.entries.contains_key(key) && self.entries.len() >= self.max_entries {
            self.make_room(now);
        }

        let mut slot = match self.entries.entry(key.clone()) {
            MapEntry::Occupied(mut occupied) => {
                if occupied.get().expires_at <= now {
                    occupied.get_mut().value = init();
                }
                occupied.into_ref()
            }
            MapEntry::Vacant(vacant) => vacant.insert(Slot {
                value: init(),
                expires_at: now + self.ttl,
            }),
        };
        slot.expires_at = now + self.ttl;
        f(&mut slot.value)
    }

    pub fn get(&self, key: &K) -> Option<V>
    where
        V: Clone,
    {
        let now = Instant::now();
        self.entries
            .get(key)
            .filter(|slot| slot.expires_at > now)
            .map(|slot| slot.value.clone())
    }

    pub fn remove(&self, key: &K) -> Option<V> {
        self.entries.remove(key).map(|(_, slot)| slot.value)
    }

    /// Drop every expired entry, returning how many were removed.
    pub fn purge_expired(&self) -> usize {
        self.purge_at(Instant::now())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn purge_at(&self, now: Instant) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, slot| slot.expires_at > now);
        before.saturating_sub(self.entries.len())
    }

    fn make_room(&self, now: Instant) {
        let purged = self.purge_at(now);
        let excess = (self.entries.len() + 1).saturating_sub(self.max_entries);
        if excess > 0 {
            let mut by_expiry: Vec<(K, Instant)> = self
                .entries
                .iter()
                .map(|e| (e.key().clone(), e.value().expires_at))
                .collect();
            by_expiry.sort_by_key(|(_, at)| *at);
            for (key, _) in by_expiry.into_iter().take(excess) {
                self.entries.remove(&key);
            }
        }
        tracing::debug!(purged, evicted = excess, "Limiter cache full, made room");
    }
}
