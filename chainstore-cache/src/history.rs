//! Account history extension.
//!
//! History is stored newest first on the account snapshot under `history`.
//! An extension asks the remote database for operations newer than the
//! newest one cached and prepends them.
//!
//! Overlapping requests for one account share a single in-flight call. A
//! request arriving while the call is outstanding is parked as a waiter and
//! marks the call for one re-issue, so an account costs at most two remote
//! calls however many requests pile up.

use crate::state::HistoryRequest;
use crate::store::ChainStore;
use chainstore_core::{DatabaseApi, ObjectId, Snapshot, StoreResult, SyncError};
use serde_json::Value;
use std::collections::HashSet;
use tokio::sync::oneshot;
use tracing::debug;

/// Remote calls one deduplicated extension may issue.
const MAX_HISTORY_CALLS: u32 = 2;

impl<D: DatabaseApi> ChainStore<D> {
    /// Fetch operations newer than the newest cached one for `account` and
    /// prepend them to its `history`. Resolves to the updated account, or
    /// `None` if the account is not resident.
    pub async fn fetch_recent_history(&self, account: ObjectId) -> StoreResult<Option<Snapshot>> {
        let (tx, rx) = oneshot::channel();
        let start = {
            let mut state = self.lock();
            if state.objects.resolved(&account).is_none() {
                return Ok(None);
            }
            let epoch = state.epoch;
            match state.requests.history.get_mut(&account) {
                Some(request) => {
                    debug!(account = %account, "History request joined in-flight call");
                    request.extra_requests += 1;
                    request.waiters.push(tx);
                    None
                }
                None => {
                    state.requests.history.insert(
                        account,
                        HistoryRequest {
                            extra_requests: 0,
                            waiters: vec![tx],
                        },
                    );
                    Some(epoch)
                }
            }
        };

        if let Some(epoch) = start {
            let store = self.clone();
            self.spawn(async move { store.run_history(account, epoch).await });
        }
        // A dropped sender means the store was reset underneath us.
        rx.await.unwrap_or(Err(SyncError::Reset.into()))
    }

    async fn run_history(&self, account: ObjectId, epoch: u64) {
        let limit = self.inner.config.history_page_size;
        let zero = self.inner.kinds.zero_history_id();
        let mut calls = 0;
        loop {
            let newest = {
                let state = self.lock();
                if state.epoch != epoch {
                    return;
                }
                state
                    .objects
                    .resolved(&account)
                    .and_then(|a| a.get("history"))
                    .and_then(Value::as_array)
                    .and_then(|ops| ops.first())
                    .and_then(|op| op.get("id"))
                    .and_then(Value::as_str)
                    .and_then(|id| id.parse::<ObjectId>().ok())
                    .unwrap_or(zero)
            };

            calls += 1;
            let reply = self
                .inner
                .api
                .get_account_history(&account, &newest, limit, &zero)
                .await;

            let finished = self.ingest_at(epoch, |ing| {
                let outcome: StoreResult<Option<Snapshot>> = match reply {
                    Ok(ops) => {
                        if !ops.is_empty() {
                            ing.update_resolved(&account, |a| Some(prepend_history(a, ops)));
                        }
                        Ok(ing.state.objects.resolved(&account).cloned())
                    }
                    Err(e) => Err(e.into()),
                };
                let Some(request) = ing.state.requests.history.get_mut(&account) else {
                    return true;
                };
                if outcome.is_ok() && request.extra_requests > 0 && calls < MAX_HISTORY_CALLS {
                    request.extra_requests = 0;
                    return false;
                }
                if let Some(request) = ing.state.requests.history.remove(&account) {
                    for waiter in request.waiters {
                        // The caller may have stopped waiting.
                        let _ = waiter.send(outcome.clone());
                    }
                }
                true
            });
            match finished {
                Some(false) => debug!(account = %account, "Re-issuing history request"),
                _ => return,
            }
        }
    }
}

/// Put `ops` (newest first) in front of the cached history, dropping any
/// operation already present.
fn prepend_history(account: &Snapshot, ops: Vec<Value>) -> Snapshot {
    let existing: Vec<Value> = account
        .get("history")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();
    let mut seen: HashSet<String> = HashSet::new();
    let history: Vec<Value> = ops
        .into_iter()
        .chain(existing)
        .filter(|op| match op.get("id").and_then(Value::as_str) {
            Some(id) => seen.insert(id.to_string()),
            None => true,
        })
        .collect();
    account.with_field("history", Value::Array(history))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_prepend_keeps_newest_first() {
        let account = Snapshot::from_value(json!({
            "id": "1.2.100",
            "history": [{"id": "1.11.5"}, {"id": "1.11.2"}],
        }))
        .unwrap();
        let updated = prepend_history(&account, vec![json!({"id": "1.11.9"}), json!({"id": "1.11.7"})]);
        let ids: Vec<&str> = updated
            .get("history")
            .and_then(Value::as_array)
            .unwrap()
            .iter()
            .map(|op| op["id"].as_str().unwrap())
            .collect();
        assert_eq!(ids, vec!["1.11.9", "1.11.7", "1.11.5", "1.11.2"]);
    }

    #[test]
    fn test_prepend_drops_duplicates() {
        let account = Snapshot::from_value(json!({
            "id": "1.2.100",
            "history": [{"id": "1.11.5"}],
        }))
        .unwrap();
        let updated = prepend_history(&account, vec![json!({"id": "1.11.6"}), json!({"id": "1.11.5"})]);
        assert_eq!(updated.get("history").and_then(Value::as_array).unwrap().len(), 2);
    }

    #[test]
    fn test_prepend_into_empty_history() {
        let account = Snapshot::from_value(json!({"id": "1.2.100"})).unwrap();
        let updated = prepend_history(&account, vec![json!({"id": "1.11.1"})]);
        assert_eq!(updated.get_in(&["history"]).unwrap(), &json!([{"id": "1.11.1"}]));
    }
}
