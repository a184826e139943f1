//! Notification Coalescer
//!
//! Turns any number of cache mutations into at most one observer callback
//! per dispatch window. The first `notify` inside a window arms a deferred
//! dispatch; later ones only find the "scheduled" bit set and return.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Receiver of the coalesced "store changed" signal.
///
/// Implemented for every `Fn() + Send + Sync` closure. Observers are
/// identified by the address of their `Arc`, so registering the same `Arc`
/// twice is detected while two equal closures are distinct observers.
pub trait Observer: Send + Sync {
    fn on_change(&self);
}

impl<F> Observer for F
where
    F: Fn() + Send + Sync,
{
    fn on_change(&self) {
        self()
    }
}

fn same_observer(a: &Arc<dyn Observer>, b: &Arc<dyn Observer>) -> bool {
    std::ptr::eq(
        Arc::as_ptr(a).cast::<()>(),
        Arc::as_ptr(b).cast::<()>(),
    )
}

pub(crate) struct Coalescer {
    runtime: Handle,
    window_ms: AtomicU64,
    scheduled: AtomicBool,
    observers: Mutex<Vec<Arc<dyn Observer>>>,
    pending: Mutex<Option<JoinHandle<()>>>,
}

impl Coalescer {
    pub fn new(runtime: Handle, window: Duration) -> Self {
        Self {
            runtime,
            window_ms: AtomicU64::new(duration_ms(window)),
            scheduled: AtomicBool::new(false),
            observers: Mutex::new(Vec::new()),
            pending: Mutex::new(None),
        }
    }

    /// Register an observer. Returns false (and logs) if it already is.
    pub fn subscribe(&self, observer: Arc<dyn Observer>) -> bool {
        let mut observers = self.observers.lock().unwrap_or_else(PoisonError::into_inner);
        if observers.iter().any(|o| same_observer(o, &observer)) {
            warn!("Observer is already subscribed");
            return false;
        }
        observers.push(observer);
        true
    }

    /// Unregister an observer. Returns false (and logs) if it was not
    /// registered.
    pub fn unsubscribe(&self, observer: &Arc<dyn Observer>) -> bool {
        let mut observers = self.observers.lock().unwrap_or_else(PoisonError::into_inner);
        let before = observers.len();
        observers.retain(|o| !same_observer(o, observer));
        if observers.len() == before {
            warn!("Unsubscribe of an observer that is not subscribed");
            return false;
        }
        true
    }

    pub fn observer_count(&self) -> usize {
        self.observers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn window(&self) -> Duration {
        Duration::from_millis(self.window_ms.load(Ordering::Relaxed))
    }

    pub fn set_window(&self, window: Duration) {
        self.window_ms.store(duration_ms(window), Ordering::Relaxed);
    }

    pub fn is_scheduled(&self) -> bool {
        self.scheduled.load(Ordering::Acquire)
    }

    /// Signal that the store changed.
    pub fn notify(self: &Arc<Self>) {
        if self.scheduled.swap(true, Ordering::AcqRel) {
            return;
        }
        let this = Arc::clone(self);
        let window = self.window();
        let handle = self.runtime.spawn(async move {
            tokio::time::sleep(window).await;
            this.dispatch();
        });
        *self.pending.lock().unwrap_or_else(PoisonError::into_inner) = Some(handle);
    }

    fn dispatch(&self) {
        // Cleared first: mutations made by observers schedule a new round.
        self.scheduled.store(false, Ordering::Release);
        let observers: Vec<Arc<dyn Observer>> = self
            .observers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        debug!(observers = observers.len(), "Dispatching change notification");
        for observer in observers {
            observer.on_change();
        }
    }

    /// Drop any armed dispatch. Observers stay registered.
    pub fn cancel(&self) {
        if let Some(handle) = self.pending.lock().unwrap_or_else(PoisonError::into_inner).take() {
            handle.abort();
        }
        self.scheduled.store(false, Ordering::Release);
    }
}

fn duration_ms(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
