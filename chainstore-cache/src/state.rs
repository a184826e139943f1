//! Mutable store state, guarded by the store's single lock.

use crate::clock::ChainClock;
use crate::index::{KeyedFlights, SecondaryIndices};
use crate::table::ObjectTable;
use chainstore_core::{ObjectId, Snapshot, StoreResult};
use std::collections::{HashMap, HashSet};
use tokio::sync::oneshot;
use tokio::time::Instant;

/// Lifecycle state of a store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncState {
    /// No data, not subscribed.
    Cold,
    /// Fetching the head state and checking its freshness.
    Syncing,
    /// Subscribed to live updates.
    Live,
}

pub(crate) type HistoryWaiter = oneshot::Sender<StoreResult<Option<Snapshot>>>;

/// Outstanding history extension for one account.
#[derive(Debug, Default)]
pub(crate) struct HistoryRequest {
    /// Calls that arrived while this one was in flight.
    pub extra_requests: u32,
    pub waiters: Vec<HistoryWaiter>,
}

/// Bookkeeping of outstanding remote requests.
#[derive(Debug, Default)]
pub(crate) struct RequestBook {
    /// Ids with a `get_objects` call in flight. A forced refetch keeps the
    /// resolved value in the table, so pending markers alone do not cover it.
    pub in_flight: HashSet<ObjectId>,
    /// Index lookups (symbols, addresses, keys, member accounts) in flight.
    pub keyed: KeyedFlights,
    /// Last full-account request per key.
    pub hydration: HashMap<String, Instant>,
    pub history: HashMap<ObjectId, HistoryRequest>,
}

impl RequestBook {
    pub fn clear(&mut self) {
        self.in_flight.clear();
        self.keyed.clear();
        self.hydration.clear();
        // Dropping the senders wakes every waiter with a reset error.
        self.history.clear();
    }
}

#[derive(Debug)]
pub(crate) struct StoreState {
    /// Bumped on every reset; completions carry the epoch they started in.
    pub epoch: u64,
    pub sync: SyncState,
    pub objects: ObjectTable,
    pub indices: SecondaryIndices,
    /// Child object (dynamic data, bitasset data) to owning asset.
    pub owning_asset: HashMap<ObjectId, ObjectId>,
    pub requests: RequestBook,
    pub clock: ChainClock,
}

impl StoreState {
    pub fn new(clock_window: usize) -> Self {
        Self {
            epoch: 0,
            sync: SyncState::Cold,
            objects: ObjectTable::new(),
            indices: SecondaryIndices::default(),
            owning_asset: HashMap::new(),
            requests: RequestBook::default(),
            clock: ChainClock::new(clock_window),
        }
    }

    /// Wipe everything and start a new epoch.
    pub fn reset(&mut self) {
        self.epoch += 1;
        self.sync = SyncState::Cold;
        self.objects.clear();
        self.indices.clear();
        self.owning_asset.clear();
        self.requests.clear();
        self.clock.clear();
    }
}
