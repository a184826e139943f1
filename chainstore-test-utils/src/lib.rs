//! chainstore Test Utilities
//!
//! Shared test infrastructure for the chainstore workspace:
//! - `MockDatabase`, a scriptable `DatabaseApi` that records every call
//! - JSON fixtures for the chain objects the tests need
//! - Proptest generators for ids, names and snapshots

pub use chainstore_core::{
    DatabaseApi, FullAccount, ObjectId, RpcError, RpcResult, SubscriptionHandler, UpdateEntry,
    VoteId,
};

use async_trait::async_trait;
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::watch;

// ============================================================================
// MOCK DATABASE
// ============================================================================

/// One recorded remote call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RpcCall {
    GetObjects(Vec<ObjectId>),
    GetFullAccounts(Vec<String>),
    GetAccountHistory {
        account: ObjectId,
        stop: ObjectId,
        limit: u32,
    },
    GetKeyReferences(Vec<String>),
    GetBalanceObjects(Vec<String>),
    GetWitnessByAccount(ObjectId),
    GetCommitteeMemberByAccount(ObjectId),
    LookupAssetSymbols(Vec<String>),
    LookupVoteIds(Vec<VoteId>),
    SetSubscribeCallback,
}

impl RpcCall {
    pub fn method(&self) -> &'static str {
        match self {
            Self::GetObjects(_) => "get_objects",
            Self::GetFullAccounts(_) => "get_full_accounts",
            Self::GetAccountHistory { .. } => "get_account_history",
            Self::GetKeyReferences(_) => "get_key_references",
            Self::GetBalanceObjects(_) => "get_balance_objects",
            Self::GetWitnessByAccount(_) => "get_witness_by_account",
            Self::GetCommitteeMemberByAccount(_) => "get_committee_member_by_account",
            Self::LookupAssetSymbols(_) => "lookup_asset_symbols",
            Self::LookupVoteIds(_) => "lookup_vote_ids",
            Self::SetSubscribeCallback => "set_subscribe_callback",
        }
    }
}

#[derive(Default)]
struct MockData {
    objects: HashMap<ObjectId, Value>,
    full_accounts: HashMap<String, FullAccount>,
    /// Newest first, like the node returns them.
    history: HashMap<ObjectId, Vec<Value>>,
    key_references: HashMap<String, Vec<ObjectId>>,
    balance_objects: HashMap<String, Vec<Value>>,
    witnesses: HashMap<ObjectId, Value>,
    committee_members: HashMap<ObjectId, Value>,
    assets_by_symbol: HashMap<String, Value>,
    objects_by_vote: HashMap<VoteId, Value>,
    failing: HashSet<&'static str>,
    calls: Vec<RpcCall>,
    handler: Option<SubscriptionHandler>,
}

/// In-memory `DatabaseApi` for tests.
///
/// Calls are recorded before they are answered, so a test can assert on a
/// call while its reply is held back with [`hold`](Self::hold).
pub struct MockDatabase {
    data: Mutex<MockData>,
    gate: watch::Sender<bool>,
}

impl Default for MockDatabase {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for MockDatabase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockDatabase")
            .field("calls", &self.data().calls.len())
            .finish_non_exhaustive()
    }
}

impl MockDatabase {
    pub fn new() -> Self {
        Self {
            data: Mutex::new(MockData::default()),
            gate: watch::Sender::new(true),
        }
    }

    fn data(&self) -> MutexGuard<'_, MockData> {
        self.data.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Make an object available to `get_objects`. Objects without a
    /// parseable `id` are ignored.
    pub fn insert_object(&self, object: Value) {
        if let Some(id) = id_of(&object) {
            self.data().objects.insert(id, object);
        }
    }

    /// Serve `object` for requests of `id`, whatever id it carries.
    pub fn insert_object_at(&self, id: ObjectId, object: Value) {
        self.data().objects.insert(id, object);
    }

    pub fn remove_object(&self, id: &ObjectId) {
        self.data().objects.remove(id);
    }

    /// Serve a full account under both its name and its id. The account
    /// object itself also becomes available to `get_objects`.
    pub fn insert_full_account(&self, full: FullAccount) {
        let mut data = self.data();
        if let Some(id) = id_of(&full.account) {
            data.objects.insert(id, full.account.clone());
            data.full_accounts.insert(id.to_string(), full.clone());
        }
        if let Some(name) = full.account.get("name").and_then(Value::as_str) {
            data.full_accounts.insert(name.to_string(), full);
        }
    }

    /// Append operations (newest first) to the front of an account's history.
    pub fn push_history(&self, account: ObjectId, ops: Vec<Value>) {
        let mut data = self.data();
        let history = data.history.entry(account).or_default();
        let older = std::mem::take(history);
        history.extend(ops);
        history.extend(older);
    }

    pub fn insert_key_references(&self, key: &str, accounts: Vec<ObjectId>) {
        self.data().key_references.insert(key.to_string(), accounts);
    }

    pub fn insert_balance_objects(&self, address: &str, balances: Vec<Value>) {
        self.data().balance_objects.insert(address.to_string(), balances);
    }

    pub fn insert_witness(&self, account: ObjectId, witness: Value) {
        self.data().witnesses.insert(account, witness);
    }

    pub fn insert_committee_member(&self, account: ObjectId, member: Value) {
        self.data().committee_members.insert(account, member);
    }

    /// Serve an asset through `lookup_asset_symbols` and `get_objects`.
    pub fn insert_asset(&self, asset: Value) {
        let mut data = self.data();
        if let Some(symbol) = asset.get("symbol").and_then(Value::as_str) {
            data.assets_by_symbol.insert(symbol.to_string(), asset.clone());
        }
        if let Some(id) = id_of(&asset) {
            data.objects.insert(id, asset);
        }
    }

    pub fn insert_vote_object(&self, vote: VoteId, object: Value) {
        self.data().objects_by_vote.insert(vote, object);
    }

    /// Make every call of `method` fail with a transport error.
    pub fn fail(&self, method: &'static str) {
        self.data().failing.insert(method);
    }

    pub fn recover(&self, method: &'static str) {
        self.data().failing.remove(method);
    }

    /// Hold back every reply until [`release`](Self::release).
    pub fn hold(&self) {
        self.gate.send_replace(false);
    }

    pub fn release(&self) {
        self.gate.send_replace(true);
    }

    pub fn calls(&self) -> Vec<RpcCall> {
        self.data().calls.clone()
    }

    /// Number of recorded calls of `method`.
    pub fn calls_to(&self, method: &str) -> usize {
        self.data()
            .calls
            .iter()
            .filter(|call| call.method() == method)
            .count()
    }

    pub fn clear_calls(&self) {
        self.data().calls.clear();
    }

    pub fn has_subscriber(&self) -> bool {
        self.data().handler.is_some()
    }

    /// Deliver a live update batch to the registered handler. Returns false
    /// if nothing is subscribed.
    pub fn push_update(&self, entries: Vec<UpdateEntry>) -> bool {
        let handler = self.data().handler.clone();
        match handler {
            Some(handler) => {
                handler(entries);
                true
            }
            None => false,
        }
    }

    /// Record `call`, wait for the gate, and fail if its method is failing.
    async fn begin(&self, call: RpcCall) -> RpcResult<()> {
        let method = call.method();
        self.data().calls.push(call);
        let mut gate = self.gate.subscribe();
        // The sender lives as long as `self`.
        let _ = gate.wait_for(|open| *open).await;
        if self.data().failing.contains(method) {
            return Err(RpcError::Transport {
                reason: format!("{method} failed (mock)"),
            });
        }
        Ok(())
    }
}

fn id_of(object: &Value) -> Option<ObjectId> {
    object.get("id")?.as_str()?.parse().ok()
}

#[async_trait]
impl DatabaseApi for MockDatabase {
    async fn get_objects(&self, ids: &[ObjectId]) -> RpcResult<Vec<Option<Value>>> {
        self.begin(RpcCall::GetObjects(ids.to_vec())).await?;
        let data = self.data();
        Ok(ids.iter().map(|id| data.objects.get(id).cloned()).collect())
    }

    async fn get_full_accounts(
        &self,
        keys: &[String],
        _subscribe: bool,
    ) -> RpcResult<Vec<(String, FullAccount)>> {
        self.begin(RpcCall::GetFullAccounts(keys.to_vec())).await?;
        let data = self.data();
        Ok(keys
            .iter()
            .filter_map(|key| Some((key.clone(), data.full_accounts.get(key)?.clone())))
            .collect())
    }

    async fn get_account_history(
        &self,
        account: &ObjectId,
        stop: &ObjectId,
        limit: u32,
        _start: &ObjectId,
    ) -> RpcResult<Vec<Value>> {
        self.begin(RpcCall::GetAccountHistory {
            account: *account,
            stop: *stop,
            limit,
        })
        .await?;
        let data = self.data();
        let ops = data.history.get(account).map(Vec::as_slice).unwrap_or_default();
        Ok(ops
            .iter()
            .filter(|op| id_of(op).is_some_and(|id| id.instance() > stop.instance()))
            .take(limit as usize)
            .cloned()
            .collect())
    }

    async fn get_key_references(&self, keys: &[String]) -> RpcResult<Vec<Vec<ObjectId>>> {
        self.begin(RpcCall::GetKeyReferences(keys.to_vec())).await?;
        let data = self.data();
        Ok(keys
            .iter()
            .map(|key| data.key_references.get(key).cloned().unwrap_or_default())
            .collect())
    }

    async fn get_balance_objects(&self, addresses: &[String]) -> RpcResult<Vec<Value>> {
        self.begin(RpcCall::GetBalanceObjects(addresses.to_vec())).await?;
        let data = self.data();
        Ok(addresses
            .iter()
            .flat_map(|address| data.balance_objects.get(address).cloned().unwrap_or_default())
            .collect())
    }

    async fn get_witness_by_account(&self, account: &ObjectId) -> RpcResult<Option<Value>> {
        self.begin(RpcCall::GetWitnessByAccount(*account)).await?;
        Ok(self.data().witnesses.get(account).cloned())
    }

    async fn get_committee_member_by_account(
        &self,
        account: &ObjectId,
    ) -> RpcResult<Option<Value>> {
        self.begin(RpcCall::GetCommitteeMemberByAccount(*account)).await?;
        Ok(self.data().committee_members.get(account).cloned())
    }

    async fn lookup_asset_symbols(&self, symbols: &[String]) -> RpcResult<Vec<Option<Value>>> {
        self.begin(RpcCall::LookupAssetSymbols(symbols.to_vec())).await?;
        let data = self.data();
        Ok(symbols
            .iter()
            .map(|symbol| data.assets_by_symbol.get(symbol).cloned())
            .collect())
    }

    async fn lookup_vote_ids(&self, vote_ids: &[VoteId]) -> RpcResult<Vec<Option<Value>>> {
        self.begin(RpcCall::LookupVoteIds(vote_ids.to_vec())).await?;
        let data = self.data();
        Ok(vote_ids
            .iter()
            .map(|vote| data.objects_by_vote.get(vote).cloned())
            .collect())
    }

    async fn set_subscribe_callback(
        &self,
        handler: SubscriptionHandler,
        _include_extras: bool,
    ) -> RpcResult<()> {
        self.begin(RpcCall::SetSubscribeCallback).await?;
        self.data().handler = Some(handler);
        Ok(())
    }
}

// ============================================================================
// TEST HELPERS
// ============================================================================

/// Install a fmt subscriber honoring `RUST_LOG`. Safe to call from every
/// test; only the first call installs it.
pub fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_test_writer()
        .try_init();
}

/// Let spawned fetches and their completions run. Meant for runtimes with
/// a paused clock, where the sleep only returns once every task is idle.
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(1)).await;
}

// ============================================================================
// TEST FIXTURES
// ============================================================================

pub mod fixtures {
    //! Chain objects as the node serializes them, using DECENT numbering
    //! unless noted otherwise.

    use super::*;
    use chainstore_core::format_chain_time;
    use chrono::{DateTime, Utc};
    use serde_json::json;

    /// Dynamic global property object with the given head block time.
    pub fn dynamic_global_properties(head: DateTime<Utc>) -> Value {
        json!({
            "id": "2.1.0",
            "head_block_number": 1_000_000,
            "time": format_chain_time(head),
            "recent_slots_filled": "340282366920938463463374607431768211455",
        })
    }

    /// Dynamic global property object whose head is current.
    pub fn fresh_head() -> Value {
        dynamic_global_properties(Utc::now())
    }

    /// Dynamic global property object whose head is an hour behind.
    pub fn stale_head() -> Value {
        dynamic_global_properties(Utc::now() - chrono::Duration::hours(1))
    }

    pub fn account(id: &str, name: &str) -> Value {
        json!({
            "id": id,
            "name": name,
            "registrar": "1.2.0",
            "referrer": "1.2.0",
            "lifetime_referrer": "1.2.0",
            "membership_expiration_date": "1970-01-01T00:00:00",
            "owner": {"weight_threshold": 1, "account_auths": [], "key_auths": [["DCT6MRyAjQq8ud7hVNYcfnVPJqcVpscN5So8BhtHuGYqET5GDW5CV", 1]]},
            "active": {"weight_threshold": 1, "account_auths": [], "key_auths": [["DCT6MRyAjQq8ud7hVNYcfnVPJqcVpscN5So8BhtHuGYqET5GDW5CV", 1]]},
            "options": {"memo_key": "DCT6MRyAjQq8ud7hVNYcfnVPJqcVpscN5So8BhtHuGYqET5GDW5CV", "votes": []},
            "whitelisted_accounts": [],
            "blacklisted_accounts": [],
        })
    }

    pub fn account_statistics(id: &str, owner: &str, most_recent_op: &str) -> Value {
        json!({
            "id": id,
            "owner": owner,
            "most_recent_op": most_recent_op,
            "total_ops": 1,
        })
    }

    pub fn balance(id: &str, owner: &str, asset_type: &str, amount: i64) -> Value {
        json!({
            "id": id,
            "owner": owner,
            "asset_type": asset_type,
            "balance": amount,
        })
    }

    pub fn asset(id: &str, symbol: &str, dynamic_data_id: &str) -> Value {
        json!({
            "id": id,
            "symbol": symbol,
            "precision": 8,
            "issuer": "1.2.0",
            "dynamic_asset_data_id": dynamic_data_id,
            "options": {"max_supply": "7319777577456900"},
        })
    }

    pub fn asset_dynamic_data(id: &str, current_supply: i64) -> Value {
        json!({
            "id": id,
            "current_supply": current_supply,
            "accumulated_fees": 0,
        })
    }

    pub fn operation(id: &str) -> Value {
        json!({
            "id": id,
            "op": [0, {}],
            "block_num": 10,
        })
    }

    /// Full account payload carrying the given balance objects.
    pub fn full_account(account: Value, balances: Vec<Value>) -> FullAccount {
        FullAccount {
            account,
            balances,
            ..FullAccount::default()
        }
    }

    pub fn object_id(id: &str) -> ObjectId {
        id.parse().expect("fixture ids are well formed")
    }
}

// ============================================================================
// PROPTEST GENERATORS
// ============================================================================

pub mod generators {
    use super::*;
    use proptest::prelude::*;
    use serde_json::{json, Map};

    pub fn arb_object_id() -> impl Strategy<Value = ObjectId> {
        (1u8..=2, 0u16..32, any::<u64>()).prop_map(|(space, type_id, instance)| {
            ObjectId::new(space, type_id, instance)
        })
    }

    pub fn arb_vote_id() -> impl Strategy<Value = VoteId> {
        (0u8..3, any::<u32>()).prop_map(|(vote_type, instance)| VoteId::new(vote_type, instance))
    }

    /// Names accepted by the account-name rules.
    pub fn arb_account_name() -> impl Strategy<Value = String> {
        "[a-z][a-z0-9]{2,20}(-[a-z0-9]{1,5})?"
    }

    /// Flat snapshot field maps without an `id`.
    pub fn arb_fields() -> impl Strategy<Value = Map<String, Value>> {
        prop::collection::btree_map("[a-z_]{1,8}", any::<i64>(), 0..8).prop_map(|fields| {
            fields
                .into_iter()
                .filter(|(key, _)| key != "id")
                .map(|(key, value)| (key, json!(value)))
                .collect()
        })
    }

    /// Clock offset sample sequences in milliseconds.
    pub fn arb_offsets() -> impl Strategy<Value = Vec<i64>> {
        prop::collection::vec(-120_000i64..120_000, 0..32)
    }
}
