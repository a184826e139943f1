//! Account lookups and full-account hydration.

use crate::dispatch::{Followup, Ingest};
use crate::index::IndexEntry;
use crate::state::StoreState;
use crate::store::ChainStore;
use crate::table::Resolution;
use chainstore_core::{
    id_set, parse_chain_time, validate_account_name, DatabaseApi, FullAccount, Lookup, ObjectId,
    ObjectKind, Snapshot, StoreResult, ValidationError,
};
use chrono::Utc;
use serde_json::{json, Map, Value};
use tokio::time::Instant;
use tracing::{debug, warn};

/// Embedded collections a hydration rebuilds from scratch.
const HYDRATED_FIELDS: &[&str] = &[
    "balances",
    "orders",
    "call_orders",
    "proposals",
    "vesting_balances",
];

/// Membership tier of an account.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemberStatus {
    Basic,
    /// Paid membership that has not expired yet.
    Annual,
    /// The account is its own lifetime referrer.
    Lifetime,
}

/// Membership tier from an account snapshot.
pub fn member_status(account: &Snapshot) -> MemberStatus {
    if account.id().is_some() && account.id_field("lifetime_referrer") == account.id() {
        return MemberStatus::Lifetime;
    }
    let expires = account
        .str_field("membership_expiration_date")
        .and_then(|raw| parse_chain_time(raw).ok());
    match expires {
        Some(expires) if expires > Utc::now() => MemberStatus::Annual,
        _ => MemberStatus::Basic,
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum AccountKey {
    Id(ObjectId),
    Name(String),
}

impl AccountKey {
    fn lookup(&self, state: &StoreState) -> Lookup<Snapshot> {
        match self {
            Self::Id(id) => state.objects.lookup(id),
            Self::Name(name) => match state.indices.accounts_by_name.lookup(name) {
                Lookup::Found(id) => state.objects.lookup(&id),
                Lookup::Missing => Lookup::Missing,
                Lookup::Loading => Lookup::Loading,
            },
        }
    }

    /// Undo the pending marker this key set.
    fn revert(&self, state: &mut StoreState) {
        match self {
            Self::Id(id) => {
                state.objects.revert_pending(id);
            }
            Self::Name(name) => {
                state.indices.accounts_by_name.revert_pending(name);
            }
        }
    }
}

impl<D: DatabaseApi> ChainStore<D> {
    /// Get-or-hydrate an account by id or name.
    ///
    /// An unknown account is hydrated with one `get_full_accounts` call,
    /// which brings its balances, orders and statistics along.
    pub fn get_account(&self, name_or_id: &str) -> StoreResult<Lookup<Snapshot>> {
        if name_or_id.is_empty() {
            return Ok(Lookup::Missing);
        }
        match self.account_key(name_or_id)? {
            AccountKey::Id(id) => {
                {
                    let state = self.lock();
                    match state.objects.get(&id) {
                        Some(Resolution::Absent) => return Ok(Lookup::Missing),
                        Some(Resolution::Pending) => return Ok(Lookup::Loading),
                        Some(Resolution::Resolved(account)) if account.contains("name") => {
                            return Ok(Lookup::Found(account.clone()));
                        }
                        _ => {}
                    }
                }
                self.fetch_full_account(name_or_id)
            }
            AccountKey::Name(name) => {
                let found = {
                    let state = self.lock();
                    match state.indices.accounts_by_name.get(&name) {
                        Some(IndexEntry::Found(id)) => Some(*id),
                        Some(IndexEntry::Absent) => return Ok(Lookup::Missing),
                        Some(IndexEntry::Pending) => return Ok(Lookup::Loading),
                        None => None,
                    }
                };
                match found {
                    Some(id) => Ok(self.get_object_by_id(id, false)),
                    None => self.fetch_full_account(&name),
                }
            }
        }
    }

    /// Hydrate an account with a `get_full_accounts` call, throttled to one
    /// request per key per hydration window.
    pub fn fetch_full_account(&self, name_or_id: &str) -> StoreResult<Lookup<Snapshot>> {
        let key = self.account_key(name_or_id)?;
        let request_key = name_or_id.to_string();
        let epoch = {
            let mut state = self.lock();
            if let AccountKey::Id(id) = &key {
                if state.requests.in_flight.contains(id) {
                    debug!(id = %id, "Object fetch in flight, not hydrating");
                    return Ok(key.lookup(&state));
                }
            }
            let now = Instant::now();
            if let Some(last) = state.requests.hydration.get(&request_key) {
                if now.duration_since(*last) < self.inner.config.hydration_throttle() {
                    debug!(key = %request_key, "Full account request throttled");
                    return Ok(key.lookup(&state));
                }
            }
            state.requests.hydration.insert(request_key.clone(), now);
            match &key {
                AccountKey::Id(id) => {
                    if state.objects.resolved(id).is_none() {
                        state.objects.put(*id, Resolution::Pending);
                    }
                }
                AccountKey::Name(name) => state.indices.accounts_by_name.mark_pending(name.clone()),
            }
            state.epoch
        };

        let store = self.clone();
        let pending_key = key.clone();
        self.spawn(async move {
            let reply = store
                .inner
                .api
                .get_full_accounts(std::slice::from_ref(&request_key), true)
                .await;
            store.ingest_at(epoch, |ing| match reply {
                Ok(entries) => {
                    let entry = entries
                        .into_iter()
                        .find(|(k, _)| *k == request_key)
                        .map(|(_, full)| full);
                    match entry {
                        Some(full) => match ing.full_account(full) {
                            Ok(id) => {
                                if let AccountKey::Name(name) = &pending_key {
                                    if ing.state.indices.accounts_by_name.is_pending(name) {
                                        ing.state.indices.accounts_by_name.set_found(name.clone(), id);
                                    }
                                }
                                ing.fx.follow(Followup::SyncHistory(id));
                            }
                            Err(e) => {
                                warn!(key = %request_key, error = %e, "Ignoring malformed full account");
                                pending_key.revert(ing.state);
                            }
                        },
                        None => {
                            match &pending_key {
                                AccountKey::Id(id) => ing.mark_absent(*id),
                                AccountKey::Name(name) => {
                                    ing.state.indices.accounts_by_name.set_absent(name.clone());
                                }
                            }
                            ing.fx.changed = true;
                        }
                    }
                }
                Err(e) => {
                    warn!(key = %request_key, error = %e, "get_full_accounts failed");
                    ing.state.requests.hydration.remove(&request_key);
                    pending_key.revert(ing.state);
                    ing.fx.changed = true;
                }
            });
        });
        Ok(key.lookup(&self.lock()))
    }

    /// Membership tier of an account snapshot.
    pub fn account_member_status(&self, account: &Snapshot) -> MemberStatus {
        member_status(account)
    }

    /// Balance of `asset_type` held by `account`, 0 when the balance object
    /// is not resident.
    pub fn account_balance(&self, account: &Snapshot, asset_type: &ObjectId) -> i64 {
        let Some(balance_id) = account
            .get_in(&["balances", &asset_type.to_string()])
            .and_then(Value::as_str)
            .and_then(|s| s.parse::<ObjectId>().ok())
        else {
            return 0;
        };
        let state = self.lock();
        state
            .objects
            .resolved(&balance_id)
            .and_then(|balance| balance.get("balance"))
            .and_then(amount)
            .unwrap_or(0)
    }

    fn account_key(&self, name_or_id: &str) -> Result<AccountKey, ValidationError> {
        if ObjectId::is_object_id(name_or_id) {
            return self
                .expect_kind(name_or_id, ObjectKind::Account)
                .map(AccountKey::Id);
        }
        validate_account_name(name_or_id, true)?;
        Ok(AccountKey::Name(name_or_id.to_string()))
    }
}

/// Amounts are int64 on the chain and may arrive as strings.
fn amount(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.parse().ok(),
        _ => None,
    }
}

impl Ingest<'_> {
    /// Ingest a `get_full_accounts` payload: every nested object first, then
    /// the account with its embedded collections rebuilt from the payload.
    pub(crate) fn full_account(&mut self, full: FullAccount) -> Result<ObjectId, ValidationError> {
        let Value::Object(mut fields) = full.account else {
            return Err(ValidationError::MissingField { field: "account" });
        };
        let id = fields
            .get("id")
            .and_then(Value::as_str)
            .ok_or(ValidationError::MissingField { field: "id" })?
            .parse::<ObjectId>()?;

        let vesting = self.objects(&full.vesting_balances);
        self.objects(&full.votes);
        let balances = self.objects(&full.balances);
        let orders = self.objects(&full.limit_orders);
        let call_orders = self.objects(&full.call_orders);
        let proposals = self.objects(&full.proposals);
        if let Some(statistics) = &full.statistics {
            if let Err(e) = self.object(statistics) {
                warn!(account = %id, error = %e, "Ignoring malformed account statistics");
            }
        }

        let balance_map: Map<String, Value> = balances
            .iter()
            .filter_map(|b| Some((b.str_field("asset_type")?.to_string(), json!(b.id()?.to_string()))))
            .collect();
        fields.insert("balances".to_string(), Value::Object(balance_map));
        fields.insert("orders".to_string(), id_set(orders.iter().filter_map(Snapshot::id)));
        fields.insert(
            "call_orders".to_string(),
            id_set(call_orders.iter().filter_map(Snapshot::id)),
        );
        fields.insert(
            "proposals".to_string(),
            id_set(proposals.iter().filter_map(Snapshot::id)),
        );
        fields.insert(
            "vesting_balances".to_string(),
            id_set(vesting.iter().filter_map(Snapshot::id)),
        );
        for (field, name) in [
            ("referrer_name", full.referrer_name),
            ("registrar_name", full.registrar_name),
            ("lifetime_referrer_name", full.lifetime_referrer_name),
        ] {
            if let Some(name) = name {
                fields.insert(field.to_string(), Value::String(name));
            }
        }

        self.upsert(id, &fields, HYDRATED_FIELDS);
        Ok(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_member_status() {
        let lifetime = Snapshot::from_value(json!({"id": "1.2.5", "lifetime_referrer": "1.2.5"})).unwrap();
        assert_eq!(member_status(&lifetime), MemberStatus::Lifetime);

        let future = chainstore_core::format_chain_time(Utc::now() + Duration::days(30));
        let annual = Snapshot::from_value(json!({
            "id": "1.2.6",
            "lifetime_referrer": "1.2.5",
            "membership_expiration_date": future,
        }))
        .unwrap();
        assert_eq!(member_status(&annual), MemberStatus::Annual);

        let basic = Snapshot::from_value(json!({
            "id": "1.2.7",
            "lifetime_referrer": "1.2.5",
            "membership_expiration_date": "1970-01-01T00:00:00",
        }))
        .unwrap();
        assert_eq!(member_status(&basic), MemberStatus::Basic);
    }

    #[test]
    fn test_amount_accepts_strings() {
        assert_eq!(amount(&json!(12)), Some(12));
        assert_eq!(amount(&json!("9000000000")), Some(9_000_000_000));
        assert_eq!(amount(&json!(null)), None);
    }
}
