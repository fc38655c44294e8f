use crate::{
    core::{bitmap::Bitmap, pending::PendingRequest},
    utils::config::LoaderConfig,
};
use dashmap::{mapref::entry::Entry, DashMap};
use log::debug;
use std::{
    sync::{
        atomic::{AtomicU64, AtomicUsize, Ordering},
        Arc,
    },
    time::{Duration, Instant},
};

/// Bounds applied to committed entries. Pending entries are never evicted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CachePolicy {
    /// Least-recently-used entries beyond this count are dropped.
    pub capacity: Option<usize>,
    /// Entries older than this are treated as absent.
    pub time_to_live: Option<Duration>,
}

impl CachePolicy {
    pub fn unbounded() -> Self {
        Self::default()
    }

    pub fn lru(capacity: usize) -> Self {
        Self {
            capacity: Some(capacity),
            time_to_live: None,
        }
    }

    pub fn from_config(config: &LoaderConfig) -> Self {
        Self {
            capacity: config.capacity,
            time_to_live: config.time_to_live,
        }
    }
}

struct CachedEntry {
    bitmap: Bitmap,
    inserted_at: Instant,
    last_access: AtomicU64,
}

impl CachedEntry {
    fn new(bitmap: Bitmap, stamp: u64) -> Self {
        Self {
            bitmap,
            inserted_at: Instant::now(),
            last_access: AtomicU64::new(stamp),
        }
    }

    fn touch(&self, stamp: u64) {
        self.last_access.store(stamp, Ordering::Relaxed);
    }

    fn last_access(&self) -> u64 {
        self.last_access.load(Ordering::Relaxed)
    }
}

// An identifier is either committed or in flight, never both.
enum Slot {
    Ready(CachedEntry),
    Pending(Arc<PendingRequest>),
}

/// Result of the atomic check-then-register step for one identifier.
pub enum Lookup {
    Hit(Bitmap),
    /// Another caller's fetch is already running.
    Joined(Arc<PendingRequest>),
    /// The caller registered a new fetch and must drive it.
    Started(Arc<PendingRequest>),
}

pub struct ImageCache {
    slots: DashMap<String, Slot>,
    policy: CachePolicy,
    clock: AtomicU64,
    ready: AtomicUsize,
    evictions: AtomicU64,
}

impl Default for ImageCache {
    fn default() -> Self {
        Self::new(CachePolicy::default())
    }
}

impl ImageCache {
    pub fn new(policy: CachePolicy) -> Self {
        Self {
            slots: DashMap::new(),
            policy,
            clock: AtomicU64::new(0),
            ready: AtomicUsize::new(0),
            evictions: AtomicU64::new(0),
        }
    }

    pub fn policy(&self) -> &CachePolicy {
        &self.policy
    }

    fn tick(&self) -> u64 {
        self.clock.fetch_add(1, Ordering::Relaxed) + 1
    }

    fn is_expired(&self, entry: &CachedEntry) -> bool {
        self.policy
            .time_to_live
            .is_some_and(|ttl| entry.inserted_at.elapsed() >= ttl)
    }

    /// Returns a live committed bitmap and marks it as recently used.
    pub fn get(&self, id: &str) -> Option<Bitmap> {
        let slot = self.slots.get(id)?;
        match &*slot {
            Slot::Ready(entry) if !self.is_expired(entry) => {
                entry.touch(self.tick());
                Some(entry.bitmap.clone())
            }
            _ => None,
        }
    }

    pub fn contains(&self, id: &str) -> bool {
        self.slots
            .get(id)
            .is_some_and(|slot| matches!(&*slot, Slot::Ready(entry) if !self.is_expired(entry)))
    }

    /// Serves a hit, joins a running fetch, or registers a new one, all under
    /// the identifier's shard lock.
    pub fn lookup_or_register(&self, id: &str) -> Lookup {
        if let Some(bitmap) = self.get(id) {
            return Lookup::Hit(bitmap);
        }

        match self.slots.entry(id.to_string()) {
            Entry::Occupied(mut occupied) => {
                match occupied.get() {
                    Slot::Ready(entry) if !self.is_expired(entry) => {
                        entry.touch(self.tick());
                        return Lookup::Hit(entry.bitmap.clone());
                    }
                    Slot::Pending(pending) => return Lookup::Joined(Arc::clone(pending)),
                    Slot::Ready(_) => {}
                }

                debug!("Cache entry for {} expired", id);
                self.ready.fetch_sub(1, Ordering::AcqRel);
                let pending = PendingRequest::new(id);
                occupied.insert(Slot::Pending(Arc::clone(&pending)));
                Lookup::Started(pending)
            }
            Entry::Vacant(vacant) => {
                let pending = PendingRequest::new(id);
                vacant.insert(Slot::Pending(Arc::clone(&pending)));
                Lookup::Started(pending)
            }
        }
    }

    /// Moves `request`'s identifier from pending to committed.
    ///
    /// Returns false if the slot no longer belongs to `request`.
    pub fn commit(&self, request: &Arc<PendingRequest>, bitmap: Bitmap) -> bool {
        let committed = match self.slots.get_mut(request.id()) {
            Some(mut slot) => {
                let owned = matches!(&*slot, Slot::Pending(p) if Arc::ptr_eq(p, request));
                if owned {
                    *slot = Slot::Ready(CachedEntry::new(bitmap, self.tick()));
                    // The ready count only changes under the owning shard's lock.
                    self.ready.fetch_add(1, Ordering::AcqRel);
                }
                owned
            }
            None => false,
        };

        if committed {
            self.purge_expired();
            self.evict_overflow();
        }
        committed
    }

    /// Drops `request`'s pending slot so the identifier is uncached again.
    pub fn abandon(&self, request: &Arc<PendingRequest>) -> bool {
        self.slots
            .remove_if(request.id(), |_, slot| {
                matches!(slot, Slot::Pending(p) if Arc::ptr_eq(p, request))
            })
            .is_some()
    }

    pub fn pending(&self, id: &str) -> Option<Arc<PendingRequest>> {
        match &*self.slots.get(id)? {
            Slot::Pending(pending) => Some(Arc::clone(pending)),
            Slot::Ready(_) => None,
        }
    }

    /// Removes a committed entry. In-flight fetches are left alone.
    pub fn invalidate(&self, id: &str) -> bool {
        self.slots
            .remove_if(id, |_, slot| {
                let ready = matches!(slot, Slot::Ready(_));
                if ready {
                    self.ready.fetch_sub(1, Ordering::AcqRel);
                }
                ready
            })
            .is_some()
    }

    /// Removes every committed entry and returns how many were dropped.
    pub fn clear(&self) -> usize {
        self.remove_ready_where(|_| true)
    }

    /// Removes committed entries whose time to live has passed.
    pub fn purge_expired(&self) -> usize {
        if self.policy.time_to_live.is_none() {
            return 0;
        }
        let purged = self.remove_ready_where(|entry| self.is_expired(entry));
        if purged > 0 {
            debug!("Purged {} expired images", purged);
        }
        purged
    }

    fn remove_ready_where(&self, mut predicate: impl FnMut(&CachedEntry) -> bool) -> usize {
        let mut removed = 0;
        self.slots.retain(|_, slot| {
            let matched = match &*slot {
                Slot::Ready(entry) => predicate(entry),
                Slot::Pending(_) => false,
            };
            if matched {
                self.ready.fetch_sub(1, Ordering::AcqRel);
                removed += 1;
            }
            !matched
        });
        removed
    }

    fn evict_overflow(&self) -> usize {
        let Some(capacity) = self.policy.capacity else {
            return 0;
        };

        let mut evicted = 0;
        while self.ready.load(Ordering::Acquire) > capacity {
            let victim = self
                .slots
                .iter()
                .filter_map(|item| match item.value() {
                    Slot::Ready(entry) => Some((item.key().clone(), entry.last_access())),
                    Slot::Pending(_) => None,
                })
                .min_by_key(|(_, stamp)| *stamp);

            let Some((key, stamp)) = victim else {
                break;
            };

            let removed = self.slots.remove_if(&key, |_, slot| {
                let stale = matches!(slot, Slot::Ready(entry) if entry.last_access() == stamp);
                if stale {
                    self.ready.fetch_sub(1, Ordering::AcqRel);
                }
                stale
            });
            if removed.is_some() {
                self.evictions.fetch_add(1, Ordering::Relaxed);
                evicted += 1;
                debug!("Evicted {} from image cache", key);
            }
        }
        evicted
    }

    pub fn cached_count(&self) -> usize {
        self.ready.load(Ordering::Acquire)
    }

    pub fn pending_count(&self) -> usize {
        self.slots
            .iter()
            .filter(|item| matches!(item.value(), Slot::Pending(_)))
            .count()
    }

    pub fn evictions(&self) -> u64 {
        self.evictions.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::RgbaImage;

    fn bitmap() -> Bitmap {
        Bitmap::from_rgba(RgbaImage::new(1, 1))
    }

    fn commit_new(cache: &ImageCache, id: &str) -> Bitmap {
        let Lookup::Started(pending) = cache.lookup_or_register(id) else {
            panic!("expected a new registration for {id}");
        };
        let bitmap = bitmap();
        assert!(cache.commit(&pending, bitmap.clone()));
        bitmap
    }

    #[test]
    fn test_first_lookup_starts_second_joins() {
        let cache = ImageCache::default();

        let first = cache.lookup_or_register("a");
        let second = cache.lookup_or_register("a");

        let (Lookup::Started(started), Lookup::Joined(joined)) = (first, second) else {
            panic!("expected started then joined");
        };
        assert!(Arc::ptr_eq(&started, &joined));
        assert_eq!(cache.pending_count(), 1);
        assert_eq!(cache.cached_count(), 0);
    }

    #[test]
    fn test_commit_moves_pending_to_ready() {
        let cache = ImageCache::default();
        let bitmap = commit_new(&cache, "a");

        assert!(cache.pending("a").is_none());
        assert_eq!(cache.pending_count(), 0);
        assert_eq!(cache.cached_count(), 1);
        match cache.lookup_or_register("a") {
            Lookup::Hit(hit) => assert!(hit.ptr_eq(&bitmap)),
            _ => panic!("expected a hit"),
        }
    }

    #[test]
    fn test_abandon_returns_to_uncached() {
        let cache = ImageCache::default();
        let Lookup::Started(pending) = cache.lookup_or_register("a") else {
            panic!("expected started");
        };

        assert!(cache.abandon(&pending));
        assert!(!cache.contains("a"));
        assert!(matches!(cache.lookup_or_register("a"), Lookup::Started(_)));
    }

    #[test]
    fn test_stale_request_cannot_commit() {
        let cache = ImageCache::default();
        let Lookup::Started(old) = cache.lookup_or_register("a") else {
            panic!("expected started");
        };
        cache.abandon(&old);
        let Lookup::Started(_new) = cache.lookup_or_register("a") else {
            panic!("expected started");
        };

        assert!(!cache.commit(&old, bitmap()));
        assert!(!cache.abandon(&old));
        assert!(cache.pending("a").is_some());
    }

    #[test]
    fn test_lru_evicts_least_recently_used() {
        let cache = ImageCache::new(CachePolicy::lru(2));
        commit_new(&cache, "a");
        commit_new(&cache, "b");

        assert!(cache.get("a").is_some());
        commit_new(&cache, "c");

        assert_eq!(cache.cached_count(), 2);
        assert_eq!(cache.evictions(), 1);
        assert!(cache.contains("a"));
        assert!(!cache.contains("b"));
        assert!(cache.contains("c"));
    }

    #[test]
    fn test_pending_entries_are_not_evicted() {
        let cache = ImageCache::new(CachePolicy::lru(1));
        let Lookup::Started(_pending) = cache.lookup_or_register("in-flight") else {
            panic!("expected started");
        };
        commit_new(&cache, "a");
        commit_new(&cache, "b");

        assert!(cache.pending("in-flight").is_some());
        assert_eq!(cache.cached_count(), 1);
        assert!(cache.contains("b"));
    }

    #[test]
    fn test_expired_entry_is_refetched() {
        let cache = ImageCache::new(CachePolicy {
            capacity: None,
            time_to_live: Some(Duration::from_millis(20)),
        });
        commit_new(&cache, "a");
        assert!(cache.contains("a"));

        std::thread::sleep(Duration::from_millis(40));

        assert!(!cache.contains("a"));
        assert!(matches!(cache.lookup_or_register("a"), Lookup::Started(_)));
        assert_eq!(cache.cached_count(), 0);
    }

    #[test]
    fn test_purge_expired() {
        let cache = ImageCache::new(CachePolicy {
            capacity: None,
            time_to_live: Some(Duration::from_millis(20)),
        });
        commit_new(&cache, "a");
        commit_new(&cache, "b");
        std::thread::sleep(Duration::from_millis(40));

        assert_eq!(cache.purge_expired(), 2);
        assert_eq!(cache.cached_count(), 0);
    }

    #[test]
    fn test_invalidate_and_clear_skip_pending() {
        let cache = ImageCache::default();
        commit_new(&cache, "a");
        commit_new(&cache, "b");
        let Lookup::Started(_pending) = cache.lookup_or_register("c") else {
            panic!("expected started");
        };

        assert!(cache.invalidate("a"));
        assert!(!cache.invalidate("a"));
        assert!(!cache.invalidate("c"));
        assert_eq!(cache.clear(), 1);
        assert_eq!(cache.cached_count(), 0);
        assert!(cache.pending("c").is_some());
    }

    #[test]
    fn test_commit_reclaims_expired_entries_without_capacity() {
        let cache = ImageCache::new(CachePolicy {
            capacity: None,
            time_to_live: Some(Duration::from_millis(10)),
        });
        for i in 0..50 {
            commit_new(&cache, &format!("id{i}"));
        }
        assert_eq!(cache.cached_count(), 50);

        std::thread::sleep(Duration::from_millis(30));
        commit_new(&cache, "fresh");

        assert_eq!(cache.cached_count(), 1);
        assert!(cache.contains("fresh"));
        assert!(!cache.contains("id0"));
    }

    #[test]
    fn test_expired_entries_go_before_live_ones() {
        let cache = ImageCache::new(CachePolicy {
            capacity: Some(2),
            time_to_live: Some(Duration::from_millis(20)),
        });
        commit_new(&cache, "old");
        std::thread::sleep(Duration::from_millis(40));
        commit_new(&cache, "a");
        commit_new(&cache, "b");

        assert_eq!(cache.cached_count(), 2);
        assert_eq!(cache.evictions(), 0);
        assert!(cache.contains("a"));
        assert!(cache.contains("b"));
    }

    #[test]
    fn test_count_survives_racing_commit_and_invalidate() {
        let cache = Arc::new(ImageCache::new(CachePolicy::lru(4)));
        let done = Arc::new(std::sync::atomic::AtomicBool::new(false));

        let invalidators: Vec<_> = (0..4)
            .map(|_| {
                let cache = Arc::clone(&cache);
                let done = Arc::clone(&done);
                std::thread::spawn(move || {
                    let mut max_seen = 0;
                    while !done.load(Ordering::Acquire) {
                        cache.invalidate("a");
                        max_seen = max_seen.max(cache.cached_count());
                    }
                    max_seen
                })
            })
            .collect();

        for _ in 0..20_000 {
            if let Lookup::Started(pending) = cache.lookup_or_register("a") {
                cache.commit(&pending, bitmap());
            }
            assert!(cache.cached_count() <= 1);
        }
        done.store(true, Ordering::Release);

        for handle in invalidators {
            assert!(handle.join().unwrap() <= 1);
        }
        cache.invalidate("a");
        assert_eq!(cache.cached_count(), 0);
        assert_eq!(cache.evictions(), 0);
    }
}
