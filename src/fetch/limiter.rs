use crate::utils::error::{LoadError, LoadResult, LoaderError, LoaderResult};
use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc,
};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

/// Caps how many fetches run at once across every identifier.
#[derive(Debug, Clone)]
pub struct FetchLimiter {
    semaphore: Arc<Semaphore>,
    max_permits: usize,
    counters: Arc<Counters>,
}

#[derive(Debug, Default)]
struct Counters {
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
}

/// Held for the duration of one fetch; releases its slot on drop.
#[derive(Debug)]
pub struct FetchPermit {
    _permit: OwnedSemaphorePermit,
    counters: Arc<Counters>,
}

impl FetchLimiter {
    pub fn new(max_concurrent: usize) -> LoaderResult<Self> {
        if max_concurrent == 0 {
            return Err(LoaderError::InvalidConfig(
                "max_concurrent must be greater than zero".into(),
            ));
        }

        Ok(Self {
            semaphore: Arc::new(Semaphore::new(max_concurrent)),
            max_permits: max_concurrent,
            counters: Arc::new(Counters::default()),
        })
    }

    pub async fn acquire(&self, id: &str) -> LoadResult<FetchPermit> {
        let permit = Arc::clone(&self.semaphore)
            .acquire_owned()
            .await
            .map_err(|_| LoadError::fetch(id, "fetch limiter closed"))?;

        let current = self.counters.in_flight.fetch_add(1, Ordering::AcqRel) + 1;
        self.counters
            .peak_in_flight
            .fetch_max(current, Ordering::AcqRel);

        Ok(FetchPermit {
            _permit: permit,
            counters: Arc::clone(&self.counters),
        })
    }

    pub fn max_permits(&self) -> usize {
        self.max_permits
    }

    pub fn in_flight(&self) -> usize {
        self.counters.in_flight.load(Ordering::Acquire)
    }

    pub fn peak_in_flight(&self) -> usize {
        self.counters.peak_in_flight.load(Ordering::Acquire)
    }
}

impl Drop for FetchPermit {
    fn drop(&mut self) {
        self.counters.in_flight.fetch_sub(1, Ordering::AcqRel);
    }
}
