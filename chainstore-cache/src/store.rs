//! The store handle and its shared internals.

use crate::coalescer::{Coalescer, Observer};
use crate::dispatch::{Effects, Followup, Ingest};
use crate::state::{StoreState, SyncState};
use chainstore_core::{DatabaseApi, KindTable, StoreConfig, StoreError, StoreResult};
use chainstore_events::{DomainEvent, EventBus};
use chrono::{DateTime, Utc};
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::{broadcast, watch};
use tracing::{debug, warn};

pub(crate) struct Inner<D> {
    pub api: Arc<D>,
    pub config: StoreConfig,
    pub kinds: KindTable,
    pub state: Mutex<StoreState>,
    pub coalescer: Arc<Coalescer>,
    pub events: EventBus,
    /// Mirrors `StoreState::sync`; written under the state lock.
    pub sync_events: watch::Sender<SyncState>,
    pub runtime: Handle,
}

/// Client-side consistency cache over a remote object database.
///
/// `ChainStore` is a cheap handle; clones share one cache. Independent
/// stores never share state.
///
/// Reads are synchronous and never block on the network: a read that
/// misses the cache returns [`Lookup::Loading`](chainstore_core::Lookup)
/// and starts at most one remote fetch in the background. Once the reply is
/// ingested, subscribed observers are notified and the next read answers
/// from the cache.
pub struct ChainStore<D: DatabaseApi> {
    pub(crate) inner: Arc<Inner<D>>,
}

impl<D: DatabaseApi> Clone for ChainStore<D> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<D: DatabaseApi> std::fmt::Debug for ChainStore<D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChainStore")
            .field("sync_state", &self.sync_state())
            .field("observers", &self.observer_count())
            .field("dispatch_scheduled", &self.inner.coalescer.is_scheduled())
            .finish_non_exhaustive()
    }
}

impl<D: DatabaseApi> ChainStore<D> {
    /// Create an empty, cold store. Must be called inside a tokio runtime;
    /// background fetches are spawned onto it.
    pub fn new(api: Arc<D>, config: StoreConfig) -> StoreResult<Self> {
        config.validate()?;
        let kinds = config.object_types.compile()?;
        let runtime = Handle::try_current().map_err(|_| StoreError::NoRuntime)?;
        let coalescer = Arc::new(Coalescer::new(runtime.clone(), config.dispatch_window()));
        let events = EventBus::new(config.event_channel_capacity);
        let state = Mutex::new(StoreState::new(config.clock_offset_window));
        Ok(Self {
            inner: Arc::new(Inner {
                api,
                config,
                kinds,
                state,
                coalescer,
                events,
                sync_events: watch::Sender::new(SyncState::Cold),
                runtime,
            }),
        })
    }

    pub fn with_defaults(api: Arc<D>) -> StoreResult<Self> {
        Self::new(api, StoreConfig::default())
    }

    pub fn config(&self) -> &StoreConfig {
        &self.inner.config
    }

    pub fn kinds(&self) -> &KindTable {
        &self.inner.kinds
    }

    pub fn api(&self) -> &Arc<D> {
        &self.inner.api
    }

    /// Register a change observer. Returns false if it already is.
    pub fn subscribe(&self, observer: Arc<dyn Observer>) -> bool {
        self.inner.coalescer.subscribe(observer)
    }

    /// Unregister a change observer. Returns false if it was not registered.
    pub fn unsubscribe(&self, observer: &Arc<dyn Observer>) -> bool {
        self.inner.coalescer.unsubscribe(observer)
    }

    pub fn observer_count(&self) -> usize {
        self.inner.coalescer.observer_count()
    }

    pub fn set_dispatch_window(&self, window: Duration) {
        self.inner.coalescer.set_window(window);
    }

    /// Domain events raised during ingestion.
    pub fn subscribe_events(&self) -> broadcast::Receiver<DomainEvent> {
        self.inner.events.subscribe()
    }

    pub fn sync_state(&self) -> SyncState {
        self.lock().sync
    }

    /// Latest head block time seen.
    pub fn head_block_time(&self) -> Option<DateTime<Utc>> {
        self.lock().clock.head_block_time
    }

    /// Median of recent `local - head` offsets, in milliseconds.
    pub fn estimated_chain_time_offset(&self) -> i64 {
        self.lock().clock.offsets.median()
    }

    /// Fraction of the wall time since the configured genesis covered by
    /// the head block, in `0.0..=1.0`. `None` without a genesis time or
    /// before the first head state arrived.
    pub fn sync_progress(&self) -> Option<f64> {
        let genesis = self.inner.config.genesis_time?;
        let head = self.head_block_time()?;
        let total = (Utc::now() - genesis).num_milliseconds();
        if total <= 0 {
            return Some(1.0);
        }
        let covered = (head - genesis).num_milliseconds() as f64 / total as f64;
        Some(covered.clamp(0.0, 1.0))
    }

    /// Number of ids the Object Table holds a state for.
    pub fn cached_object_count(&self) -> usize {
        self.lock().objects.len()
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, StoreState> {
        self.inner
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn set_sync(&self, state: &mut StoreState, sync: SyncState) {
        state.sync = sync;
        self.inner.sync_events.send_replace(sync);
    }

    /// Run one ingestion pass under the lock, then apply its effects.
    pub(crate) fn ingest<R>(&self, f: impl FnOnce(&mut Ingest<'_>) -> R) -> R {
        let mut fx = Effects::default();
        let result = {
            let mut state = self.lock();
            let mut ingest = Ingest::new(&mut state, &self.inner.kinds, &mut fx);
            f(&mut ingest)
        };
        self.apply(fx);
        result
    }

    /// Like [`ingest`](Self::ingest), but only if no reset happened since
    /// `epoch`. Returns `None` for stale completions.
    pub(crate) fn ingest_at<R>(&self, epoch: u64, f: impl FnOnce(&mut Ingest<'_>) -> R) -> Option<R> {
        let mut fx = Effects::default();
        let result = {
            let mut state = self.lock();
            if state.epoch != epoch {
                debug!(epoch, current = state.epoch, "Ignoring completion from before a reset");
                return None;
            }
            let mut ingest = Ingest::new(&mut state, &self.inner.kinds, &mut fx);
            f(&mut ingest)
        };
        self.apply(fx);
        Some(result)
    }

    fn apply(&self, fx: Effects) {
        for event in fx.events {
            self.inner.events.publish(event);
        }
        for followup in fx.followups {
            match followup {
                Followup::FetchObject(id) => {
                    self.get_object_by_id(id, false);
                }
                Followup::SyncHistory(account) => {
                    let store = self.clone();
                    self.spawn(async move {
                        if let Err(e) = store.fetch_recent_history(account).await {
                            warn!(account = %account, error = %e, "History sync failed");
                        }
                    });
                }
            }
        }
        if fx.changed {
            self.notify();
        }
    }

    pub(crate) fn notify(&self) {
        self.inner.coalescer.notify();
    }

    pub(crate) fn spawn<F>(&self, future: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.inner.runtime.spawn(future);
    }
}
