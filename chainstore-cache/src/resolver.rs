//! Bulk Resolver
//!
//! Waits until a read over the cache settles. The read is polled once up
//! front; only if something is still loading does the resolver register an
//! observer, re-polling on every coalesced change notification.

use crate::coalescer::Observer;
use crate::store::ChainStore;
use chainstore_core::{DatabaseApi, Lookup, ObjectId, Snapshot, StoreError, StoreResult};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::Instant;
use tracing::debug;

/// Observer registration that is removed when dropped, including when the
/// waiting future is cancelled.
struct Registration<'a, D: DatabaseApi> {
    store: &'a ChainStore<D>,
    observer: Arc<dyn Observer>,
}

impl<'a, D: DatabaseApi> Registration<'a, D> {
    fn new(store: &'a ChainStore<D>, wake: &Arc<Notify>) -> Self {
        let wake = Arc::clone(wake);
        let observer: Arc<dyn Observer> = Arc::new(move || wake.notify_one());
        store.subscribe(Arc::clone(&observer));
        Self { store, observer }
    }
}

impl<D: DatabaseApi> Drop for Registration<'_, D> {
    fn drop(&mut self) {
        self.store.unsubscribe(&self.observer);
    }
}

impl<D: DatabaseApi> ChainStore<D> {
    /// Poll `read` until it yields a value.
    ///
    /// `read` returns `Ok(None)` while anything it depends on is loading.
    /// Errors from `read` are returned as is. With a `timeout`, gives up
    /// with [`StoreError::Timeout`] once it elapses; the fetches started by
    /// `read` keep running.
    pub async fn fetch_chain<T, F>(&self, timeout: Option<Duration>, read: F) -> StoreResult<T>
    where
        F: Fn(&Self) -> StoreResult<Option<T>>,
    {
        if let Some(value) = read(self)? {
            return Ok(value);
        }
        let deadline = timeout.map(|waited| (Instant::now() + waited, waited));
        let wake = Arc::new(Notify::new());
        let _registration = Registration::new(self, &wake);
        loop {
            if let Some(value) = read(self)? {
                return Ok(value);
            }
            match deadline {
                Some((deadline, waited)) => {
                    if tokio::time::timeout_at(deadline, wake.notified()).await.is_err() {
                        debug!(?waited, "Bulk resolve timed out");
                        return Err(StoreError::Timeout { waited });
                    }
                }
                None => wake.notified().await,
            }
        }
    }

    /// Resolve objects by id; `None` for ids the server does not know.
    pub async fn fetch_objects(&self, ids: &[&str]) -> StoreResult<Vec<Option<Snapshot>>> {
        let ids = ids
            .iter()
            .map(|id| id.parse::<ObjectId>())
            .collect::<Result<Vec<_>, _>>()?;
        self.fetch_chain(Some(self.inner.config.fetch_timeout()), |store| {
            Ok(settle_all(ids.iter().map(|id| store.get_object_by_id(*id, false))))
        })
        .await
    }

    /// Resolve accounts by name or id.
    pub async fn fetch_accounts(&self, names_or_ids: &[&str]) -> StoreResult<Vec<Option<Snapshot>>> {
        self.fetch_chain(Some(self.inner.config.fetch_timeout()), |store| {
            let lookups = names_or_ids
                .iter()
                .map(|key| store.get_account(key))
                .collect::<StoreResult<Vec<_>>>()?;
            Ok(settle_all(lookups))
        })
        .await
    }

    /// Resolve assets by symbol or id.
    pub async fn fetch_assets(&self, ids_or_symbols: &[&str]) -> StoreResult<Vec<Option<Snapshot>>> {
        self.fetch_chain(Some(self.inner.config.fetch_timeout()), |store| {
            let lookups = ids_or_symbols
                .iter()
                .map(|key| store.get_asset(key))
                .collect::<StoreResult<Vec<_>>>()?;
            Ok(settle_all(lookups))
        })
        .await
    }
}

/// Every lookup's terminal answer, or `None` while any is loading.
fn settle_all<I>(lookups: I) -> Option<Vec<Option<Snapshot>>>
where
    I: IntoIterator<Item = Lookup<Snapshot>>,
{
    lookups.into_iter().map(Lookup::settled).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snap(id: &str) -> Snapshot {
        Snapshot::from_value(serde_json::json!({ "id": id })).unwrap()
    }

    #[test]
    fn test_settle_all_waits_for_every_lookup() {
        assert_eq!(
            settle_all(vec![Lookup::Found(snap("1.2.1")), Lookup::Loading]),
            None
        );
        assert_eq!(
            settle_all(vec![Lookup::Found(snap("1.2.1")), Lookup::Missing]),
            Some(vec![Some(snap("1.2.1")), None])
        );
        assert_eq!(settle_all(Vec::new()), Some(Vec::new()));
    }
}
