//! Remote object database contract.
//!
//! The store never talks to a socket itself. Everything it needs from the
//! node goes through [`DatabaseApi`], implemented by the transport layer (or
//! by a mock in tests).

use crate::error::RpcError;
use crate::id::{ObjectId, VoteId};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;

/// Result type of every remote call.
pub type RpcResult<T> = Result<T, RpcError>;

/// One entry of a live update batch.
///
/// On the wire a removed object is reported by its bare id string and an
/// updated object by its (possibly partial) field set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum UpdateEntry {
    Removed(ObjectId),
    Updated(Value),
}

/// Callback invoked by the transport with each live update batch.
pub type SubscriptionHandler = Arc<dyn Fn(Vec<UpdateEntry>) + Send + Sync>;

/// Payload of one `get_full_accounts` entry.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FullAccount {
    pub account: Value,
    pub statistics: Option<Value>,
    pub registrar_name: Option<String>,
    pub referrer_name: Option<String>,
    pub lifetime_referrer_name: Option<String>,
    pub votes: Vec<Value>,
    pub balances: Vec<Value>,
    pub vesting_balances: Vec<Value>,
    pub limit_orders: Vec<Value>,
    pub call_orders: Vec<Value>,
    pub proposals: Vec<Value>,
}

/// The remote object database.
///
/// Every method is a single round trip. Batch methods answer positionally:
/// entry `i` of the reply corresponds to entry `i` of the request, `None`
/// meaning "does not exist".
#[async_trait]
pub trait DatabaseApi: Send + Sync + 'static {
    async fn get_objects(&self, ids: &[ObjectId]) -> RpcResult<Vec<Option<Value>>>;

    /// Full account hydration by name or id. Each reply entry is paired with
    /// the key it answers; unknown keys are simply left out.
    async fn get_full_accounts(
        &self,
        keys: &[String],
        subscribe: bool,
    ) -> RpcResult<Vec<(String, FullAccount)>>;

    /// Operations of `account` newer than `stop`, newest first, beginning
    /// at `start` (the zero history id meaning "from the chain head").
    async fn get_account_history(
        &self,
        account: &ObjectId,
        stop: &ObjectId,
        limit: u32,
        start: &ObjectId,
    ) -> RpcResult<Vec<Value>>;

    async fn get_key_references(&self, keys: &[String]) -> RpcResult<Vec<Vec<ObjectId>>>;

    async fn get_balance_objects(&self, addresses: &[String]) -> RpcResult<Vec<Value>>;

    async fn get_witness_by_account(&self, account: &ObjectId) -> RpcResult<Option<Value>>;

    async fn get_committee_member_by_account(
        &self,
        account: &ObjectId,
    ) -> RpcResult<Option<Value>>;

    async fn lookup_asset_symbols(&self, symbols: &[String]) -> RpcResult<Vec<Option<Value>>>;

    async fn lookup_vote_ids(&self, vote_ids: &[VoteId]) -> RpcResult<Vec<Option<Value>>>;

    /// Register the live update handler. Replaces any earlier handler.
    async fn set_subscribe_callback(
        &self,
        handler: SubscriptionHandler,
        include_extras: bool,
    ) -> RpcResult<()>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_update_entry_shapes() {
        let batch: Vec<UpdateEntry> =
            serde_json::from_value(json!(["1.7.12", {"id": "1.2.5", "name": "bob"}])).unwrap();
        assert_eq!(batch[0], UpdateEntry::Removed("1.7.12".parse().unwrap()));
        assert!(matches!(&batch[1], UpdateEntry::Updated(v) if v["name"] == "bob"));
    }

    #[test]
    fn test_non_id_string_is_an_update() {
        let entry: UpdateEntry = serde_json::from_value(json!("garbage")).unwrap();
        assert!(matches!(entry, UpdateEntry::Updated(Value::String(_))));
    }

    #[test]
    fn test_full_account_partial_payload() {
        let full: FullAccount = serde_json::from_value(json!({
            "account": {"id": "1.2.100", "name": "alice"},
            "balances": [{"id": "2.4.55", "owner": "1.2.100", "asset_type": "1.3.0"}],
            "registrar_name": "init0"
        }))
        .unwrap();
        assert_eq!(full.balances.len(), 1);
        assert!(full.statistics.is_none());
        assert!(full.limit_orders.is_empty());
        assert_eq!(full.registrar_name.as_deref(), Some("init0"));
    }
}
