//! Lifecycle Controller: initial head sync, live subscription and reset.

use crate::state::SyncState;
use crate::store::ChainStore;
use chainstore_core::{
    DatabaseApi, StoreResult, SubscriptionHandler, SyncError, UpdateEntry, ValidationError,
};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{debug, info, warn};

impl<D: DatabaseApi> ChainStore<D> {
    /// Synchronize with the chain head and subscribe to live updates.
    ///
    /// The dynamic global property object is fetched until its head block
    /// time is fresh enough, retrying up to the configured budget. A stale
    /// head after the last retry usually means the local clock is off and
    /// fails with [`SyncError::ClockSkew`]; a head state that never comes
    /// back fails with [`SyncError::MissingHeadState`].
    ///
    /// A call made while another synchronization is running waits for it
    /// and fails with [`SyncError::Interrupted`] if it does not go live. A
    /// live store returns at once.
    pub async fn init(&self) -> StoreResult<()> {
        let joined = {
            let mut state = self.lock();
            let current = state.sync;
            match current {
                SyncState::Live => return Ok(()),
                SyncState::Syncing => Err(self.inner.sync_events.subscribe()),
                SyncState::Cold => {
                    self.set_sync(&mut state, SyncState::Syncing);
                    Ok(state.epoch)
                }
            }
        };
        let epoch = match joined {
            Ok(epoch) => epoch,
            Err(mut rx) => {
                debug!("Joining the synchronization in progress");
                return match rx.wait_for(|s| *s != SyncState::Syncing).await {
                    Ok(s) if *s == SyncState::Live => Ok(()),
                    _ => Err(SyncError::Interrupted.into()),
                };
            }
        };
        info!(epoch, "Synchronizing with the chain head");

        if let Err(e) = self.sync_head(epoch).await {
            self.fall_back_to_cold(epoch);
            return Err(e);
        }
        let handler = self.subscription_handler(epoch);
        if let Err(e) = self.inner.api.set_subscribe_callback(handler, true).await {
            warn!(error = %e, "set_subscribe_callback failed");
            self.fall_back_to_cold(epoch);
            return Err(e.into());
        }

        let mut state = self.lock();
        if state.epoch != epoch {
            return Err(SyncError::Reset.into());
        }
        self.set_sync(&mut state, SyncState::Live);
        drop(state);
        info!(epoch, "Store is live");
        Ok(())
    }

    /// Drop every cached object, index and pending request, then
    /// synchronize again. Completions of calls made before the reset are
    /// ignored. Observers stay registered and are told the store changed.
    pub async fn reset(&self) -> StoreResult<()> {
        {
            let mut state = self.lock();
            state.reset();
            self.set_sync(&mut state, SyncState::Cold);
        }
        self.inner.coalescer.cancel();
        info!("Store reset");
        self.notify();
        self.init().await
    }

    async fn sync_head(&self, epoch: u64) -> StoreResult<()> {
        let config = &self.inner.config;
        let dgp = self.inner.kinds.dynamic_global_property_id();
        let max_age = i64::try_from(config.max_head_block_age_secs).unwrap_or(i64::MAX);
        let mut attempt: u32 = 0;
        loop {
            attempt += 1;
            let reply = self.inner.api.get_objects(&[dgp]).await?;
            if self.lock().epoch != epoch {
                return Err(SyncError::Reset.into());
            }
            let age = match reply.into_iter().next().flatten() {
                Some(value) => {
                    let head = self
                        .ingest_at(epoch, |ing| -> StoreResult<DateTime<Utc>> {
                            ing.object(&value)?;
                            ing.state
                                .clock
                                .head_block_time
                                .ok_or_else(|| ValidationError::MissingField { field: "time" }.into())
                        })
                        .unwrap_or(Err(SyncError::Reset.into()))?;
                    let age = (Utc::now() - head).num_seconds();
                    if age < max_age {
                        debug!(attempt, age, "Chain head is fresh");
                        return Ok(());
                    }
                    Some(age)
                }
                None => None,
            };

            if attempt > config.max_sync_retries {
                let err = match age {
                    Some(head_age_secs) => SyncError::ClockSkew {
                        attempts: attempt,
                        head_age_secs,
                    },
                    None => SyncError::MissingHeadState {
                        id: dgp.to_string(),
                        attempts: attempt,
                    },
                };
                return Err(err.into());
            }
            match age {
                Some(age) => warn!(attempt, age, "Chain head is stale, retrying"),
                None => warn!(attempt, id = %dgp, "Head state not returned, retrying"),
            }
            tokio::time::sleep(config.sync_retry_interval()).await;
        }
    }

    /// Live update handler. Holds the store weakly so a dropped store does
    /// not stay alive through the remote's callback registry; batches from
    /// before a reset are discarded.
    fn subscription_handler(&self, epoch: u64) -> SubscriptionHandler {
        let inner = Arc::downgrade(&self.inner);
        Arc::new(move |entries: Vec<UpdateEntry>| {
            let Some(inner) = inner.upgrade() else {
                debug!("Dropping live update for a released store");
                return;
            };
            let store = ChainStore { inner };
            store.ingest_at(epoch, |ing| ing.batch(entries));
        })
    }

    fn fall_back_to_cold(&self, epoch: u64) {
        let mut state = self.lock();
        if state.epoch == epoch {
            self.set_sync(&mut state, SyncState::Cold);
        }
    }
}
