//! Deduplicated image requests: one fetch per identifier, shared by every caller.

use crate::{
    core::{
        bitmap::Bitmap,
        cache::{CachePolicy, ImageCache, Lookup},
        pending::PendingRequest,
    },
    fetch::{fetcher::DecodingFetcher, fetcher::Fetcher, source::RoutedSource},
    utils::{
        config::LoaderConfig,
        error::{LoadError, LoadResult, LoaderResult},
    },
};
use log::{debug, info, trace, warn};
use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc,
};

/// Snapshot of coordinator activity.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CoordinatorStats {
    /// Valid requests received
    pub requests: u64,
    /// Requests answered straight from the cache
    pub hits: u64,
    /// Requests that joined a fetch already in flight
    pub coalesced: u64,
    /// Fetcher invocations
    pub fetches: u64,
    /// Fetches that ended in an error
    pub failures: u64,
    /// Entries dropped by the eviction policy
    pub evictions: u64,
}

impl CoordinatorStats {
    /// Fraction of requests served without a new fetch (0.0 to 1.0).
    pub fn hit_ratio(&self) -> f64 {
        if self.requests == 0 {
            0.0
        } else {
            (self.hits + self.coalesced) as f64 / self.requests as f64
        }
    }
}

#[derive(Default)]
struct Counters {
    requests: AtomicU64,
    hits: AtomicU64,
    coalesced: AtomicU64,
    fetches: AtomicU64,
    failures: AtomicU64,
}

struct Inner<F> {
    fetcher: F,
    cache: ImageCache,
    counters: Counters,
}

/// Shared handle to one image cache and the fetcher feeding it.
///
/// Cloning is cheap; all clones see the same cache.
pub struct Coordinator<F> {
    inner: Arc<Inner<F>>,
}

impl<F> Clone for Coordinator<F> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

pub type DefaultCoordinator = Coordinator<DecodingFetcher<RoutedSource>>;

impl DefaultCoordinator {
    /// Builds a coordinator that reads `http(s)://`, `file://` and plain paths.
    pub fn from_config(config: &LoaderConfig) -> LoaderResult<Self> {
        let fetcher = DecodingFetcher::from_config(config)?;
        Ok(Coordinator::with_policy(
            fetcher,
            CachePolicy::from_config(config),
        ))
    }
}

impl<F: Fetcher> Coordinator<F> {
    /// Creates a coordinator with an unbounded cache.
    pub fn new(fetcher: F) -> Self {
        Self::with_policy(fetcher, CachePolicy::unbounded())
    }

    pub fn with_policy(fetcher: F, policy: CachePolicy) -> Self {
        Self {
            inner: Arc::new(Inner {
                fetcher,
                cache: ImageCache::new(policy),
                counters: Counters::default(),
            }),
        }
    }

    /// Returns the bitmap for `id`, fetching it if nobody has yet.
    ///
    /// Must be called from within a Tokio runtime; fetches are spawned on it.
    pub async fn request(&self, id: &str) -> LoadResult<Bitmap> {
        if id.trim().is_empty() {
            return Err(LoadError::InvalidIdentifier(id.to_string()));
        }

        let lookup = self.inner.cache.lookup_or_register(id);
        let counters = &self.inner.counters;
        counters.requests.fetch_add(1, Ordering::Relaxed);

        match lookup {
            Lookup::Hit(bitmap) => {
                counters.hits.fetch_add(1, Ordering::Relaxed);
                trace!("Cache hit for {}", id);
                Ok(bitmap)
            }
            Lookup::Joined(pending) => {
                counters.coalesced.fetch_add(1, Ordering::Relaxed);
                let waiter = pending.subscribe();
                debug!(
                    "Joining in-flight fetch for {} ({} waiters)",
                    id,
                    pending.waiter_count()
                );
                waiter.wait().await
            }
            Lookup::Started(pending) => {
                counters.fetches.fetch_add(1, Ordering::Relaxed);
                debug!("Starting fetch for {}", id);
                let waiter = pending.subscribe();
                self.spawn_fetch(pending);
                waiter.wait().await
            }
        }
    }

    fn spawn_fetch(&self, pending: Arc<PendingRequest>) {
        let inner = Arc::clone(&self.inner);
        let request = Arc::clone(&pending);

        let handle = tokio::spawn(async move {
            let id = request.id().to_string();
            let fetch_inner = Arc::clone(&inner);
            let fetch_id = id.clone();

            // Run the fetch on its own task so a panic still resolves the waiters.
            let result =
                match tokio::spawn(async move { fetch_inner.fetcher.fetch(&fetch_id).await }).await
                {
                    Ok(result) => result,
                    Err(e) if e.is_panic() => Err(LoadError::fetch(&id, "fetch task panicked")),
                    Err(_) => Err(LoadError::fetch(&id, "fetch task cancelled")),
                };

            inner.complete(&request, result);
        });

        pending.attach_task(handle);
    }

    /// Returns a committed bitmap without triggering a fetch.
    pub fn get_cached(&self, id: &str) -> Option<Bitmap> {
        self.inner.cache.get(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.inner.cache.contains(id)
    }

    /// Drops the committed bitmap for `id`; the next request fetches again.
    pub fn invalidate(&self, id: &str) -> bool {
        let removed = self.inner.cache.invalidate(id);
        if removed {
            debug!("Invalidated {}", id);
        }
        removed
    }

    /// Drops every committed bitmap. In-flight fetches still complete and
    /// commit their results.
    pub fn clear(&self) -> usize {
        let removed = self.inner.cache.clear();
        info!("Cleared {} cached images", removed);
        removed
    }

    pub fn purge_expired(&self) -> usize {
        self.inner.cache.purge_expired()
    }

    pub fn is_pending(&self, id: &str) -> bool {
        self.inner.cache.pending(id).is_some()
    }

    pub fn in_flight_count(&self) -> usize {
        self.inner.cache.pending_count()
    }

    pub fn cached_count(&self) -> usize {
        self.inner.cache.cached_count()
    }

    pub fn fetcher(&self) -> &F {
        &self.inner.fetcher
    }

    pub fn stats(&self) -> CoordinatorStats {
        let counters = &self.inner.counters;
        CoordinatorStats {
            requests: counters.requests.load(Ordering::Relaxed),
            hits: counters.hits.load(Ordering::Relaxed),
            coalesced: counters.coalesced.load(Ordering::Relaxed),
            fetches: counters.fetches.load(Ordering::Relaxed),
            failures: counters.failures.load(Ordering::Relaxed),
            evictions: self.inner.cache.evictions(),
        }
    }

    pub fn log_stats(&self) {
        let stats = self.stats();
        info!(
            "Image cache: {} requests, {} hits, {} coalesced, {} fetches, {} failures, {} evictions, {:.1}% served without fetching, {} cached, {} in flight",
            stats.requests,
            stats.hits,
            stats.coalesced,
            stats.fetches,
            stats.failures,
            stats.evictions,
            stats.hit_ratio() * 100.0,
            self.cached_count(),
            self.in_flight_count()
        );
    }
}

impl<F> Inner<F> {
    // The cache transition happens before waiters wake, so anyone they hand
    // off to sees the committed entry.
    fn complete(&self, request: &Arc<PendingRequest>, result: LoadResult<Bitmap>) {
        let id = request.id();
        match &result {
            Ok(bitmap) => {
                if self.cache.commit(request, bitmap.clone()) {
                    info!(
                        "Cached {} ({}x{}) for {} waiters",
                        id,
                        bitmap.width(),
                        bitmap.height(),
                        request.waiter_count()
                    );
                } else {
                    warn!("Fetched {} but its cache slot was replaced", id);
                }
            }
            Err(e) => {
                self.counters.failures.fetch_add(1, Ordering::Relaxed);
                self.cache.abandon(request);
                warn!(
                    "Fetch for {} failed, notifying {} waiters: {}",
                    id,
                    request.waiter_count(),
                    e
                );
            }
        }
        request.resolve(result);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::RgbaImage;
    use std::sync::atomic::AtomicUsize;

    #[derive(Default)]
    struct CountingFetcher {
        calls: AtomicUsize,
    }

    impl Fetcher for CountingFetcher {
        async fn fetch(&self, id: &str) -> LoadResult<Bitmap> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match id {
                "missing" => Err(LoadError::not_found(id)),
                "panic" => panic!("fetcher blew up"),
                _ => Ok(Bitmap::from_rgba(RgbaImage::new(2, 2))),
            }
        }
    }

    #[tokio::test]
    async fn test_blank_identifiers_are_rejected() {
        let coordinator = Coordinator::new(CountingFetcher::default());

        for id in ["", "   ", "\t\n"] {
            let err = coordinator.request(id).await.unwrap_err();
            assert_eq!(err, LoadError::InvalidIdentifier(id.to_string()));
        }
        assert_eq!(coordinator.fetcher().calls.load(Ordering::SeqCst), 0);
        assert_eq!(coordinator.stats().requests, 0);
    }

    #[tokio::test]
    async fn test_second_request_is_served_from_cache() {
        let coordinator = Coordinator::new(CountingFetcher::default());

        let first = coordinator.request("a.png").await.unwrap();
        let second = coordinator.request("a.png").await.unwrap();

        assert!(first.ptr_eq(&second));
        assert_eq!(coordinator.fetcher().calls.load(Ordering::SeqCst), 1);
        let stats = coordinator.stats();
        assert_eq!(stats.requests, 2);
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.fetches, 1);
        assert!((stats.hit_ratio() - 0.5).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn test_failure_is_not_cached() {
        let coordinator = Coordinator::new(CountingFetcher::default());

        assert!(coordinator.request("missing").await.is_err());
        assert!(!coordinator.contains("missing"));
        assert!(!coordinator.is_pending("missing"));
        assert!(coordinator.request("missing").await.is_err());

        assert_eq!(coordinator.fetcher().calls.load(Ordering::SeqCst), 2);
        assert_eq!(coordinator.stats().failures, 2);
    }

    #[tokio::test]
    async fn test_panicking_fetcher_fails_waiters() {
        let coordinator = Coordinator::new(CountingFetcher::default());

        let err = coordinator.request("panic").await.unwrap_err();
        assert_eq!(err, LoadError::fetch("panic", "fetch task panicked"));
        assert_eq!(coordinator.in_flight_count(), 0);
    }

    #[tokio::test]
    async fn test_invalidate_forces_refetch() {
        let coordinator = Coordinator::new(CountingFetcher::default());

        coordinator.request("a.png").await.unwrap();
        assert!(coordinator.invalidate("a.png"));
        assert!(coordinator.get_cached("a.png").is_none());
        coordinator.request("a.png").await.unwrap();

        assert_eq!(coordinator.fetcher().calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_clones_share_one_cache() {
        let coordinator = Coordinator::new(CountingFetcher::default());
        let other = coordinator.clone();

        coordinator.request("a.png").await.unwrap();

        assert!(other.get_cached("a.png").is_some());
        assert_eq!(other.cached_count(), 1);
        assert_eq!(other.clear(), 1);
        assert!(!coordinator.contains("a.png"));
    }

    #[tokio::test]
    async fn test_capacity_bounds_cache() {
        let coordinator =
            Coordinator::with_policy(CountingFetcher::default(), CachePolicy::lru(2));

        for id in ["a", "b", "c", "d"] {
            coordinator.request(id).await.unwrap();
        }

        assert_eq!(coordinator.cached_count(), 2);
        assert_eq!(coordinator.stats().evictions, 2);
        assert!(coordinator.contains("c"));
        assert!(coordinator.contains("d"));
    }
}
