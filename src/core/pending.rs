use crate::{
    core::bitmap::Bitmap,
    utils::error::{LoadError, LoadResult},
};
use parking_lot::Mutex;
use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc,
};
use tokio::{sync::watch, task::JoinHandle};

type Outcome = Option<LoadResult<Bitmap>>;

/// One in-flight fetch and everyone waiting on it.
pub struct PendingRequest {
    id: String,
    waiters: Arc<AtomicUsize>,
    outcome: watch::Sender<Outcome>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl PendingRequest {
    pub fn new(id: &str) -> Arc<Self> {
        let (outcome, _) = watch::channel(None);
        Arc::new(Self {
            id: id.to_string(),
            waiters: Arc::new(AtomicUsize::new(0)),
            outcome,
            task: Mutex::new(None),
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Registers a waiter. A waiter attached after resolution still sees the outcome.
    pub fn subscribe(&self) -> Waiter {
        self.waiters.fetch_add(1, Ordering::AcqRel);
        Waiter {
            id: self.id.clone(),
            rx: self.outcome.subscribe(),
            waiters: Arc::clone(&self.waiters),
        }
    }

    /// Publishes the final outcome to every current and future waiter.
    /// Only the first resolution counts.
    pub fn resolve(&self, result: LoadResult<Bitmap>) {
        self.outcome.send_if_modified(|slot| {
            if slot.is_some() {
                return false;
            }
            *slot = Some(result);
            true
        });
    }

    pub fn is_resolved(&self) -> bool {
        self.outcome.borrow().is_some()
    }

    pub fn waiter_count(&self) -> usize {
        self.waiters.load(Ordering::Acquire)
    }

    pub(crate) fn attach_task(&self, handle: JoinHandle<()>) {
        *self.task.lock() = Some(handle);
    }

    /// True once the task driving this fetch has exited.
    pub fn is_finished(&self) -> bool {
        self.task
            .lock()
            .as_ref()
            .is_some_and(|handle| handle.is_finished())
    }
}

/// A caller parked on a [`PendingRequest`].
pub struct Waiter {
    id: String,
    rx: watch::Receiver<Outcome>,
    waiters: Arc<AtomicUsize>,
}

impl Waiter {
    pub async fn wait(mut self) -> LoadResult<Bitmap> {
        match self.rx.wait_for(Option::is_some).await {
            Ok(outcome) => (*outcome)
                .clone()
                .unwrap_or_else(|| Err(LoadError::fetch(&self.id, "fetch produced no outcome"))),
            Err(_) => Err(LoadError::fetch(
                &self.id,
                "fetch abandoned before completion",
            )),
        }
    }
}

impl Drop for Waiter {
    fn drop(&mut self) {
        self.waiters.fetch_sub(1, Ordering::AcqRel);
    }
}
