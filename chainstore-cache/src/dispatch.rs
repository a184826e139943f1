//! Type Dispatcher
//!
//! Every object entering the store, whether from a fetch reply or a live
//! update, goes through [`Ingest`]. The object's kind is classified once
//! from its id, the snapshot is merged into the Object Table, and the
//! kind's handler updates secondary indices and embeds references into
//! parent snapshots before control returns.
//!
//! Work that needs the remote database (fetching a child object, extending
//! an account's history) or outside observers (domain events, the change
//! signal) is recorded in [`Effects`] and carried out once the state lock
//! is released.

use crate::clock::participation_rate;
use crate::state::StoreState;
use crate::table::Resolution;
use chainstore_core::{
    parse_chain_time, KindTable, ObjectId, ObjectKind, Snapshot, UpdateEntry, ValidationError,
    VoteId,
};
use chainstore_events::DomainEvent;
use chrono::{DateTime, Utc};
use serde_json::{json, Map, Value};
use tracing::{debug, warn};

/// Fields a force-settlement order carries. Settlement orders are reported
/// without an id.
const SETTLE_ORDER_FIELDS: [&str; 3] = ["balance", "owner", "settlement_date"];

/// Follow-up work requested by ingestion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Followup {
    /// Extend the account's operation history.
    SyncHistory(ObjectId),
    /// Get-or-fetch an object the store needs resident.
    FetchObject(ObjectId),
}

/// Side effects of one locked mutation, applied after unlocking.
#[derive(Debug, Default)]
pub(crate) struct Effects {
    pub events: Vec<DomainEvent>,
    pub followups: Vec<Followup>,
    pub changed: bool,
}

impl Effects {
    pub fn emit(&mut self, event: DomainEvent) {
        self.events.push(event);
    }

    pub fn follow(&mut self, followup: Followup) {
        if !self.followups.contains(&followup) {
            self.followups.push(followup);
        }
    }
}

/// One locked ingestion pass over the store state.
pub(crate) struct Ingest<'a> {
    pub state: &'a mut StoreState,
    pub kinds: &'a KindTable,
    pub fx: &'a mut Effects,
    now: DateTime<Utc>,
}

impl<'a> Ingest<'a> {
    pub fn new(state: &'a mut StoreState, kinds: &'a KindTable, fx: &'a mut Effects) -> Self {
        Self {
            state,
            kinds,
            fx,
            now: Utc::now(),
        }
    }

    /// Apply one live update batch, strictly in order. A malformed entry or
    /// a removal of an unknown id is skipped without affecting its siblings.
    pub fn batch(&mut self, entries: Vec<UpdateEntry>) {
        for entry in entries {
            match entry {
                UpdateEntry::Removed(id) => self.remove(id),
                UpdateEntry::Updated(value) => {
                    if let Err(e) = self.object(&value) {
                        warn!(error = %e, "Ignoring malformed update entry");
                    }
                }
            }
        }
    }

    /// Ingest one object. Returns its new snapshot, or `None` for objects
    /// that are forwarded as events instead of stored.
    pub fn object(&mut self, value: &Value) -> Result<Option<Snapshot>, ValidationError> {
        let Value::Object(fields) = value else {
            return Err(ValidationError::InvalidValue {
                field: "object",
                reason: "update entry is not an object".to_string(),
            });
        };
        let Some(raw_id) = fields.get("id") else {
            if SETTLE_ORDER_FIELDS.iter().all(|f| fields.contains_key(*f)) {
                self.fx.emit(DomainEvent::SettleOrderUpdate(value.clone()));
                return Ok(None);
            }
            return Err(ValidationError::MissingField { field: "id" });
        };
        let id = raw_id
            .as_str()
            .ok_or_else(|| ValidationError::InvalidObjectId {
                value: raw_id.to_string(),
            })?
            .parse::<ObjectId>()?;
        Ok(Some(self.upsert(id, fields, &[])))
    }

    /// Ingest a slice of objects, logging and skipping malformed ones.
    pub fn objects(&mut self, values: &[Value]) -> Vec<Snapshot> {
        values
            .iter()
            .filter_map(|value| match self.object(value) {
                Ok(snapshot) => snapshot,
                Err(e) => {
                    warn!(error = %e, "Ignoring malformed object");
                    None
                }
            })
            .collect()
    }

    /// Merge `fields` into `id` and run the kind's handler. Fields listed in
    /// `extra_replace` are overwritten on top of the kind's own replace set.
    pub fn upsert(&mut self, id: ObjectId, fields: &Map<String, Value>, extra_replace: &[&str]) -> Snapshot {
        let kind = self.kinds.classify(&id);
        let prior = self.state.objects.resolved(&id).cloned();

        let mut replace: Vec<&str> = kind.replace_fields().to_vec();
        replace.extend_from_slice(extra_replace);
        let merged = match &prior {
            Some(current) => current.merged(fields, &replace),
            None => Snapshot::from_map(fields.clone()),
        };

        let snapshot = self.prepare(kind, id, merged);
        self.state.objects.put(id, Resolution::Resolved(snapshot.clone()));
        self.fx.changed = true;
        self.link(kind, id, &snapshot, prior.as_ref());
        snapshot
    }

    /// The server confirmed `id` does not exist.
    pub fn mark_absent(&mut self, id: ObjectId) {
        self.state.objects.put(id, Resolution::Absent);
        self.fx.changed = true;
    }

    /// Process a removal notice.
    pub fn remove(&mut self, id: ObjectId) {
        let Some(prior) = self.state.objects.resolved(&id).cloned() else {
            debug!(id = %id, "Skipping removal of an object that is not cached");
            return;
        };
        match self.kinds.classify(&id) {
            ObjectKind::LimitOrder => {
                self.fx.emit(DomainEvent::CancelOrder(id));
                if let Some(seller) = prior.id_field("seller") {
                    self.update_resolved(&seller, |account| account.without_set_member("orders", &id));
                }
            }
            ObjectKind::CallOrder => {
                self.fx.emit(DomainEvent::CloseCall(id));
                if let Some(borrower) = prior.id_field("borrower") {
                    self.update_resolved(&borrower, |account| {
                        account.without_set_member("call_orders", &id)
                    });
                }
            }
            ObjectKind::Proposal => {
                for account in proposal_approvers(&prior) {
                    self.update_resolved(&account, |a| a.without_set_member("proposals", &id));
                }
            }
            _ => {}
        }
        self.state.objects.put(id, Resolution::Absent);
        self.fx.changed = true;
    }

    /// Rewrite the resolved snapshot of `id` if `f` produces a new one.
    /// Does nothing for ids that are not resident.
    pub fn update_resolved<F>(&mut self, id: &ObjectId, f: F) -> bool
    where
        F: FnOnce(&Snapshot) -> Option<Snapshot>,
    {
        let Some(next) = self.state.objects.resolved(id).and_then(f) else {
            return false;
        };
        self.state.objects.put(*id, Resolution::Resolved(next));
        self.fx.changed = true;
        true
    }

    /// Kind-specific adjustments to the snapshot before it is stored.
    fn prepare(&mut self, kind: ObjectKind, id: ObjectId, snapshot: Snapshot) -> Snapshot {
        match kind {
            ObjectKind::DynamicGlobalProperty => self.prepare_head_state(id, snapshot),
            ObjectKind::Asset => self.prepare_asset(id, snapshot),
            ObjectKind::AssetDynamicData | ObjectKind::BitassetData => {
                match self.owning_asset_of(&id, &snapshot) {
                    Some(asset) if snapshot.id_field("asset_id").is_none() => {
                        snapshot.with_field("asset_id", json!(asset.to_string()))
                    }
                    _ => snapshot,
                }
            }
            _ => snapshot,
        }
    }

    /// Index updates and parent linkage once the snapshot is stored.
    fn link(&mut self, kind: ObjectKind, id: ObjectId, snapshot: &Snapshot, prior: Option<&Snapshot>) {
        match kind {
            ObjectKind::AccountBalance => {
                let (Some(owner), Some(asset_type)) =
                    (snapshot.id_field("owner"), snapshot.str_field("asset_type"))
                else {
                    return;
                };
                let balance = json!(id.to_string());
                self.update_resolved(&owner, |account| {
                    if account.get_in(&["balances", asset_type]) == Some(&balance) {
                        None
                    } else {
                        Some(account.with_map_entry("balances", asset_type, balance.clone()))
                    }
                });
            }
            ObjectKind::AccountStatistics => {
                let Some(owner) = snapshot.id_field("owner") else {
                    return;
                };
                if let Some(prior) = prior {
                    if prior.get("most_recent_op") != snapshot.get("most_recent_op") {
                        self.fx.follow(Followup::SyncHistory(owner));
                    }
                }
            }
            ObjectKind::Witness => {
                if let Some(account) = snapshot.id_field("witness_account") {
                    self.state.indices.witness_by_account.set_found(account, id);
                }
                self.index_vote(snapshot, "vote_id", id);
            }
            ObjectKind::CommitteeMember => {
                if let Some(account) = snapshot.id_field("committee_member_account") {
                    self.state.indices.committee_by_account.set_found(account, id);
                }
                self.index_vote(snapshot, "vote_id", id);
            }
            ObjectKind::Worker => {
                self.index_vote(snapshot, "vote_for", id);
                self.index_vote(snapshot, "vote_against", id);
            }
            ObjectKind::Account => {
                if let Some(name) = snapshot.str_field("name") {
                    self.state.indices.accounts_by_name.set_found(name.to_string(), id);
                }
            }
            ObjectKind::Asset => {
                if let Some(symbol) = snapshot.str_field("symbol") {
                    self.state.indices.assets_by_symbol.set_found(symbol.to_string(), id);
                }
            }
            ObjectKind::AssetDynamicData => {
                if let Some(asset) = self.owning_asset_of(&id, snapshot) {
                    self.embed_child(asset, "dynamic", snapshot);
                }
            }
            ObjectKind::BitassetData => {
                let Some(asset) = self.owning_asset_of(&id, snapshot) else {
                    return;
                };
                self.embed_child(asset, "bitasset", snapshot);
                // The event carries the asset with its refreshed bitasset.
                if let Some(updated) = self.state.objects.resolved(&asset).cloned() {
                    self.fx.emit(DomainEvent::BitassetUpdate(updated));
                }
            }
            ObjectKind::CallOrder => {
                self.fx.emit(DomainEvent::CallOrderUpdate(snapshot.clone()));
                if let Some(borrower) = snapshot.id_field("borrower") {
                    self.update_resolved(&borrower, |account| {
                        account.with_set_member("call_orders", &id)
                    });
                }
            }
            ObjectKind::LimitOrder => {
                if let Some(seller) = snapshot.id_field("seller") {
                    self.update_resolved(&seller, |account| account.with_set_member("orders", &id));
                }
            }
            ObjectKind::Proposal => {
                for account in proposal_approvers(snapshot) {
                    self.update_resolved(&account, |a| a.with_set_member("proposals", &id));
                }
            }
            ObjectKind::OperationHistory
            | ObjectKind::VestingBalance
            | ObjectKind::DynamicGlobalProperty
            | ObjectKind::Other => {}
        }
    }

    fn prepare_head_state(&mut self, id: ObjectId, snapshot: Snapshot) -> Snapshot {
        match snapshot.str_field("time").map(parse_chain_time) {
            Some(Ok(head)) => self.state.clock.record_head(head, self.now),
            Some(Err(e)) => warn!(id = %id, error = %e, "Head block time is malformed"),
            None => {}
        }
        match snapshot.get("recent_slots_filled").and_then(participation_rate) {
            Some(rate) => snapshot.with_field("participation", json!(rate)),
            None => snapshot,
        }
    }

    /// Embed resident child objects into an asset, and request the ones
    /// that are not resident yet.
    fn prepare_asset(&mut self, id: ObjectId, mut snapshot: Snapshot) -> Snapshot {
        for (link_field, embed_field) in [
            ("dynamic_asset_data_id", "dynamic"),
            ("bitasset_data_id", "bitasset"),
        ] {
            if snapshot.get(embed_field).is_some_and(Value::is_object) {
                continue;
            }
            let Some(child) = snapshot.id_field(link_field) else {
                continue;
            };
            self.state.owning_asset.insert(child, id);
            match self.state.objects.resolved(&child) {
                Some(resolved) => {
                    let embedded = resolved.with_field("asset_id", json!(id.to_string()));
                    snapshot = snapshot.with_field(embed_field, embedded.to_value());
                }
                None => self.fx.follow(Followup::FetchObject(child)),
            }
        }
        snapshot
    }

    fn embed_child(&mut self, asset: ObjectId, field: &str, child: &Snapshot) {
        let value = child.to_value();
        self.update_resolved(&asset, |a| {
            if a.get(field) == Some(&value) {
                None
            } else {
                Some(a.with_field(field, value.clone()))
            }
        });
    }

    fn owning_asset_of(&self, child: &ObjectId, snapshot: &Snapshot) -> Option<ObjectId> {
        snapshot
            .id_field("asset_id")
            .or_else(|| self.state.owning_asset.get(child).copied())
    }

    fn index_vote(&mut self, snapshot: &Snapshot, field: &str, id: ObjectId) {
        let Some(vote) = snapshot.str_field(field) else {
            return;
        };
        match vote.parse::<VoteId>() {
            Ok(vote) => self.state.indices.objects_by_vote_id.set_found(vote, id),
            Err(e) => warn!(id = %id, error = %e, "Ignoring malformed vote id"),
        }
    }
}

/// Accounts whose approval a proposal requires.
fn proposal_approvers(proposal: &Snapshot) -> Vec<ObjectId> {
    let mut accounts = proposal.set_members("required_active_approvals");
    accounts.extend(proposal.set_members("required_owner_approvals"));
    accounts.sort();
    accounts.dedup();
    accounts
}
