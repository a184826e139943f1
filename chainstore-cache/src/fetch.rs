//! Fetch Orchestrator: objects and indexed lookups.
//!
//! Every accessor here follows the same contract. A terminal answer (found
//! or missing) is returned from the cache without I/O, unless a refresh
//! asks for it to be fetched again. A pending entry returns loading without
//! I/O. An unknown entry is marked pending, exactly one remote call is
//! spawned, and loading is returned; the completion ingests the reply, or on
//! error reverts the entry to unknown so a later read retries.

use crate::index::{Index, SecondaryIndices};
use crate::store::ChainStore;
use crate::table::Resolution;
use chainstore_core::{
    DatabaseApi, Lookup, ObjectId, ObjectKind, RpcResult, Snapshot, StoreResult, SyncError,
    ValidationError,
};
use serde_json::Value;
use std::collections::BTreeSet;
use tracing::{debug, warn};

/// Which by-account member index a lookup goes through.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum MemberRole {
    Witness,
    CommitteeMember,
}

impl MemberRole {
    fn index(self, indices: &mut SecondaryIndices) -> &mut Index<ObjectId, ObjectId> {
        match self {
            Self::Witness => &mut indices.witness_by_account,
            Self::CommitteeMember => &mut indices.committee_by_account,
        }
    }

    fn method(self) -> &'static str {
        match self {
            Self::Witness => "get_witness_by_account",
            Self::CommitteeMember => "get_committee_member_by_account",
        }
    }
}

impl<D: DatabaseApi> ChainStore<D> {
    /// Get-or-fetch an object by id.
    pub fn get_object(&self, id: &str) -> StoreResult<Lookup<Snapshot>> {
        let id: ObjectId = id.parse()?;
        Ok(self.get_object_by_id(id, false))
    }

    /// Get-or-fetch an object by id. With `force`, a terminal answer is
    /// refetched; a resolved snapshot stays readable meanwhile.
    pub fn get_object_by_id(&self, id: ObjectId, force: bool) -> Lookup<Snapshot> {
        let epoch = {
            let mut state = self.lock();
            let current = state.objects.get(&id).cloned();
            match &current {
                Some(Resolution::Pending) => return Lookup::Loading,
                Some(resolution) if !force => return resolution.to_lookup(),
                _ => {}
            }
            if state.requests.in_flight.contains(&id) {
                debug!(id = %id, "Fetch already in flight");
                return state.objects.lookup(&id);
            }
            if !matches!(current, Some(Resolution::Resolved(_))) {
                state.objects.put(id, Resolution::Pending);
            }
            state.requests.in_flight.insert(id);
            state.epoch
        };

        let store = self.clone();
        self.spawn(async move {
            let reply = store.inner.api.get_objects(&[id]).await;
            store.complete_objects(epoch, &[id], reply);
        });
        self.lock().objects.lookup(&id)
    }

    /// Ingest a `get_objects` reply for `ids`.
    pub(crate) fn complete_objects(
        &self,
        epoch: u64,
        ids: &[ObjectId],
        reply: RpcResult<Vec<Option<Value>>>,
    ) {
        self.ingest_at(epoch, |ing| match reply {
            Ok(values) => {
                let mut values = values.into_iter();
                for id in ids {
                    ing.state.requests.in_flight.remove(id);
                    match values.next().flatten() {
                        Some(value) => {
                            if let Err(e) = ing.object(&value) {
                                warn!(id = %id, error = %e, "Ignoring malformed object");
                            }
                            // A reply for some other id leaves ours unanswered.
                            if ing.state.objects.revert_pending(id) {
                                debug!(id = %id, "Reply did not resolve the requested id");
                                ing.fx.changed = true;
                            }
                        }
                        None => ing.mark_absent(*id),
                    }
                }
            }
            Err(e) => {
                warn!(error = %e, "get_objects failed");
                for id in ids {
                    ing.state.requests.in_flight.remove(id);
                    if ing.state.objects.revert_pending(id) {
                        ing.fx.changed = true;
                    }
                }
            }
        });
    }

    /// Force `id` back to unknown, so the next read refetches it.
    pub fn clear_object_cache(&self, id: &str) -> StoreResult<()> {
        let id: ObjectId = id.parse()?;
        let mut state = self.lock();
        state.objects.evict(&id);
        state.requests.in_flight.remove(&id);
        Ok(())
    }

    /// Get-or-fetch an asset by id or symbol.
    ///
    /// A market-pegged asset whose embedded bitasset data has no price feed
    /// yet reads as loading.
    pub fn get_asset(&self, id_or_symbol: &str) -> StoreResult<Lookup<Snapshot>> {
        self.asset(id_or_symbol, false)
    }

    /// Like [`get_asset`](Self::get_asset), but a cached answer is fetched
    /// again. The cached asset stays readable meanwhile.
    pub fn refresh_asset(&self, id_or_symbol: &str) -> StoreResult<Lookup<Snapshot>> {
        self.asset(id_or_symbol, true)
    }

    fn asset(&self, id_or_symbol: &str, force: bool) -> StoreResult<Lookup<Snapshot>> {
        let lookup = if ObjectId::is_object_id(id_or_symbol) {
            let id = self.expect_kind(id_or_symbol, ObjectKind::Asset)?;
            self.get_object_by_id(id, force)
        } else {
            self.asset_by_symbol(id_or_symbol, force)
        };
        Ok(lookup.and_then(|asset| {
            let unpriced = asset.get("bitasset").is_some_and(Value::is_object)
                && asset.get_in(&["bitasset", "current_feed"]).is_none();
            if unpriced {
                Lookup::Loading
            } else {
                Lookup::Found(asset)
            }
        }))
    }

    fn asset_by_symbol(&self, symbol: &str, force: bool) -> Lookup<Snapshot> {
        const METHOD: &str = "lookup_asset_symbols";
        if symbol.is_empty() {
            return Lookup::Missing;
        }
        let key = symbol.to_string();
        let epoch = {
            let mut guard = self.lock();
            let state = &mut *guard;
            let claimed =
                state
                    .indices
                    .assets_by_symbol
                    .claim(&key, force, &mut state.requests.keyed, METHOD, &key);
            match claimed {
                Some(Lookup::Found(id)) => {
                    drop(guard);
                    return self.get_object_by_id(id, false);
                }
                Some(Lookup::Missing) => return Lookup::Missing,
                Some(Lookup::Loading) => return Lookup::Loading,
                None => state.epoch,
            }
        };

        let store = self.clone();
        let pending = key.clone();
        self.spawn(async move {
            let reply = store.inner.api.lookup_asset_symbols(std::slice::from_ref(&key)).await;
            store.ingest_at(epoch, |ing| {
                ing.state.requests.keyed.finish(METHOD, &key);
                match reply {
                    Ok(values) => match values.into_iter().next().flatten() {
                        Some(value) => {
                            if let Err(e) = ing.object(&value) {
                                warn!(symbol = %key, error = %e, "Ignoring malformed asset");
                            }
                            // The dispatcher indexes the asset under its own
                            // symbol; anything still pending was not answered.
                            if ing.state.indices.assets_by_symbol.revert_pending(&key) {
                                ing.fx.changed = true;
                            }
                        }
                        None => {
                            ing.state.indices.assets_by_symbol.set_absent(key.clone());
                            ing.fx.changed = true;
                        }
                    },
                    Err(e) => {
                        warn!(symbol = %key, error = %e, "lookup_asset_symbols failed");
                        ing.state.indices.assets_by_symbol.revert_pending(&key);
                    }
                }
            });
        });
        let found = self.lock().indices.assets_by_symbol.found(&pending).copied();
        match found {
            Some(id) => self.get_object_by_id(id, false),
            None => Lookup::Loading,
        }
    }

    /// The witness object of an account.
    pub fn get_witness_by_account(&self, account: &str) -> StoreResult<Lookup<Snapshot>> {
        let account = self.expect_kind(account, ObjectKind::Account)?;
        Ok(self.member_by_account(MemberRole::Witness, account, false))
    }

    /// Refetch the witness of an account, keeping a cached one readable.
    pub fn refresh_witness_by_account(&self, account: &str) -> StoreResult<Lookup<Snapshot>> {
        let account = self.expect_kind(account, ObjectKind::Account)?;
        Ok(self.member_by_account(MemberRole::Witness, account, true))
    }

    /// The committee member object of an account.
    pub fn get_committee_member_by_account(&self, account: &str) -> StoreResult<Lookup<Snapshot>> {
        let account = self.expect_kind(account, ObjectKind::Account)?;
        Ok(self.member_by_account(MemberRole::CommitteeMember, account, false))
    }

    pub fn refresh_committee_member_by_account(&self, account: &str) -> StoreResult<Lookup<Snapshot>> {
        let account = self.expect_kind(account, ObjectKind::Account)?;
        Ok(self.member_by_account(MemberRole::CommitteeMember, account, true))
    }

    /// Single-shot witness fetch. Unlike the cached accessor this surfaces
    /// remote errors to the caller.
    pub async fn fetch_witness_by_account(&self, account: ObjectId) -> StoreResult<Option<Snapshot>> {
        let epoch = self.begin_member_fetch(MemberRole::Witness, account);
        self.run_member_fetch(MemberRole::Witness, account, epoch).await
    }

    /// Single-shot committee member fetch; surfaces remote errors.
    pub async fn fetch_committee_member_by_account(
        &self,
        account: ObjectId,
    ) -> StoreResult<Option<Snapshot>> {
        let epoch = self.begin_member_fetch(MemberRole::CommitteeMember, account);
        self.run_member_fetch(MemberRole::CommitteeMember, account, epoch).await
    }

    fn member_by_account(&self, role: MemberRole, account: ObjectId, force: bool) -> Lookup<Snapshot> {
        let tag = account.to_string();
        let epoch = {
            let mut guard = self.lock();
            let state = &mut *guard;
            let claimed = role.index(&mut state.indices).claim(
                &account,
                force,
                &mut state.requests.keyed,
                role.method(),
                &tag,
            );
            match claimed {
                Some(Lookup::Found(id)) => {
                    drop(guard);
                    return self.get_object_by_id(id, false);
                }
                Some(Lookup::Missing) => return Lookup::Missing,
                Some(Lookup::Loading) => return Lookup::Loading,
                None => state.epoch,
            }
        };
        let store = self.clone();
        self.spawn(async move {
            if let Err(e) = store.run_member_fetch(role, account, epoch).await {
                warn!(account = %account, method = role.method(), error = %e, "Member lookup failed");
            }
        });
        let found = role.index(&mut self.lock().indices).found(&account).copied();
        match found {
            Some(id) => self.get_object_by_id(id, false),
            None => Lookup::Loading,
        }
    }

    fn begin_member_fetch(&self, role: MemberRole, account: ObjectId) -> u64 {
        let mut state = self.lock();
        role.index(&mut state.indices).mark_pending(account);
        state.epoch
    }

    async fn run_member_fetch(
        &self,
        role: MemberRole,
        account: ObjectId,
        epoch: u64,
    ) -> StoreResult<Option<Snapshot>> {
        let reply = match role {
            MemberRole::Witness => self.inner.api.get_witness_by_account(&account).await,
            MemberRole::CommitteeMember => {
                self.inner.api.get_committee_member_by_account(&account).await
            }
        };
        let outcome = self.ingest_at(epoch, |ing| -> StoreResult<Option<Snapshot>> {
            ing.state.requests.keyed.finish(role.method(), &account.to_string());
            match reply {
                Ok(Some(value)) => match ing.object(&value) {
                    Ok(snapshot) => {
                        let index = role.index(&mut ing.state.indices);
                        match snapshot.as_ref().and_then(Snapshot::id) {
                            Some(id) => index.set_found(account, id),
                            None => {
                                warn!(account = %account, method = role.method(), "Reply carried no object id");
                                index.revert_pending(&account);
                            }
                        }
                        ing.fx.changed = true;
                        Ok(snapshot)
                    }
                    Err(e) => {
                        role.index(&mut ing.state.indices).revert_pending(&account);
                        ing.fx.changed = true;
                        Err(e.into())
                    }
                },
                Ok(None) => {
                    role.index(&mut ing.state.indices).set_absent(account);
                    ing.fx.changed = true;
                    Ok(None)
                }
                Err(e) => {
                    role.index(&mut ing.state.indices).revert_pending(&account);
                    Err(e.into())
                }
            }
        });
        outcome.unwrap_or(Err(SyncError::Reset.into()))
    }

    /// Balance objects claimable by an address.
    pub fn get_balance_objects(&self, address: &str) -> Lookup<BTreeSet<ObjectId>> {
        self.balance_objects(address, false)
    }

    /// Refetch the balance objects of an address, keeping a cached answer
    /// readable.
    pub fn refresh_balance_objects(&self, address: &str) -> Lookup<BTreeSet<ObjectId>> {
        self.balance_objects(address, true)
    }

    fn balance_objects(&self, address: &str, force: bool) -> Lookup<BTreeSet<ObjectId>> {
        const METHOD: &str = "get_balance_objects";
        let key = address.to_string();
        let epoch = {
            let mut guard = self.lock();
            let state = &mut *guard;
            let index = &mut state.indices.balance_objects_by_address;
            if let Some(lookup) = index.claim(&key, force, &mut state.requests.keyed, METHOD, &key) {
                return lookup;
            }
            state.epoch
        };

        let store = self.clone();
        let pending = key.clone();
        self.spawn(async move {
            let reply = store.inner.api.get_balance_objects(std::slice::from_ref(&key)).await;
            store.ingest_at(epoch, |ing| {
                ing.state.requests.keyed.finish(METHOD, &key);
                match reply {
                    Ok(values) => {
                        let ids: BTreeSet<ObjectId> =
                            ing.objects(&values).iter().filter_map(Snapshot::id).collect();
                        let index = &mut ing.state.indices.balance_objects_by_address;
                        if ids.is_empty() {
                            index.set_absent(key);
                        } else {
                            index.set_found(key, ids);
                        }
                        ing.fx.changed = true;
                    }
                    Err(e) => {
                        warn!(address = %key, error = %e, "get_balance_objects failed");
                        ing.state.indices.balance_objects_by_address.revert_pending(&key);
                    }
                }
            });
        });
        self.lock().indices.balance_objects_by_address.lookup(&pending)
    }

    /// Accounts whose authorities reference a public key. Referenced
    /// accounts are fetched as well.
    pub fn get_account_refs_of_key(&self, key: &str) -> Lookup<BTreeSet<ObjectId>> {
        self.account_refs_of_key(key, false)
    }

    pub fn refresh_account_refs_of_key(&self, key: &str) -> Lookup<BTreeSet<ObjectId>> {
        self.account_refs_of_key(key, true)
    }

    fn account_refs_of_key(&self, key: &str, force: bool) -> Lookup<BTreeSet<ObjectId>> {
        const METHOD: &str = "get_key_references";
        let key = key.to_string();
        let epoch = {
            let mut guard = self.lock();
            let state = &mut *guard;
            let index = &mut state.indices.account_ids_by_key;
            if let Some(lookup) = index.claim(&key, force, &mut state.requests.keyed, METHOD, &key) {
                return lookup;
            }
            state.epoch
        };

        let store = self.clone();
        let pending = key.clone();
        self.spawn(async move {
            let reply = store.inner.api.get_key_references(std::slice::from_ref(&key)).await;
            let accounts = store.ingest_at(epoch, |ing| {
                ing.state.requests.keyed.finish(METHOD, &key);
                match reply {
                    Ok(lists) => {
                        let ids: BTreeSet<ObjectId> =
                            lists.into_iter().next().unwrap_or_default().into_iter().collect();
                        let index = &mut ing.state.indices.account_ids_by_key;
                        if ids.is_empty() {
                            index.set_absent(key);
                        } else {
                            index.set_found(key, ids.clone());
                        }
                        ing.fx.changed = true;
                        ids
                    }
                    Err(e) => {
                        warn!(key = %key, error = %e, "get_key_references failed");
                        ing.state.indices.account_ids_by_key.revert_pending(&key);
                        BTreeSet::new()
                    }
                }
            });
            for account in accounts.unwrap_or_default() {
                store.get_object_by_id(account, false);
            }
        });
        self.lock().indices.account_ids_by_key.lookup(&pending)
    }

    /// Parse `id` and check it names an object of `kind`.
    pub(crate) fn expect_kind(&self, id: &str, kind: ObjectKind) -> Result<ObjectId, ValidationError> {
        let id: ObjectId = id.parse()?;
        let actual = self.inner.kinds.classify(&id);
        if actual != kind {
            return Err(ValidationError::WrongKind {
                id: id.to_string(),
                expected: kind.name(),
                actual: actual.name(),
            });
        }
        Ok(id)
    }
}
