//! Object kinds and the type-number table
//!
//! The remote chain declares a type number for each object kind inside its
//! id space. [`TypeTable`] is that declaration (configurable, since chains
//! built on the same object model number their types differently) and
//! [`KindTable`] is its compiled form, used to classify an id exactly once at
//! ingestion time.

use crate::error::ConfigError;
use crate::id::{ObjectId, IMPLEMENTATION_SPACE, PROTOCOL_SPACE};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Object kind discriminator derived from an id's space and type number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ObjectKind {
    // Protocol space
    Account,
    Asset,
    Witness,
    CommitteeMember,
    LimitOrder,
    CallOrder,
    Proposal,
    OperationHistory,
    VestingBalance,
    Worker,
    // Implementation space
    DynamicGlobalProperty,
    AssetDynamicData,
    BitassetData,
    AccountBalance,
    AccountStatistics,
    /// Any type number the table does not declare.
    Other,
}

/// Account fields that are always replaced wholesale on update.
///
/// Permission objects and white/black lists come from the server as complete
/// values; merging them field-by-field would leave stale keys behind.
const ACCOUNT_REPLACE_FIELDS: &[&str] = &[
    "active",
    "owner",
    "options",
    "whitelisting_accounts",
    "blacklisting_accounts",
    "whitelisted_accounts",
    "blacklisted_accounts",
];

impl ObjectKind {
    /// The reserved id space this kind lives in.
    pub fn space(&self) -> u8 {
        match self {
            Self::DynamicGlobalProperty
            | Self::AssetDynamicData
            | Self::BitassetData
            | Self::AccountBalance
            | Self::AccountStatistics => IMPLEMENTATION_SPACE,
            _ => PROTOCOL_SPACE,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Account => "account",
            Self::Asset => "asset",
            Self::Witness => "witness",
            Self::CommitteeMember => "committee_member",
            Self::LimitOrder => "limit_order",
            Self::CallOrder => "call_order",
            Self::Proposal => "proposal",
            Self::OperationHistory => "operation_history",
            Self::VestingBalance => "vesting_balance",
            Self::Worker => "worker",
            Self::DynamicGlobalProperty => "dynamic_global_property",
            Self::AssetDynamicData => "asset_dynamic_data",
            Self::BitassetData => "asset_bitasset_data",
            Self::AccountBalance => "account_balance",
            Self::AccountStatistics => "account_statistics",
            Self::Other => "other",
        }
    }

    /// Fields that bypass deep merge for this kind.
    pub fn replace_fields(&self) -> &'static [&'static str] {
        match self {
            Self::Account => ACCOUNT_REPLACE_FIELDS,
            _ => &[],
        }
    }
}

/// Type numbers of each object kind, per id space.
///
/// A `None` entry means the chain has no such object type; ids can then
/// never classify as that kind.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TypeTable {
    pub account: Option<u16>,
    pub asset: Option<u16>,
    pub witness: Option<u16>,
    pub committee_member: Option<u16>,
    pub limit_order: Option<u16>,
    pub call_order: Option<u16>,
    pub proposal: Option<u16>,
    pub operation_history: Option<u16>,
    pub vesting_balance: Option<u16>,
    pub worker: Option<u16>,
    pub dynamic_global_property: Option<u16>,
    pub asset_dynamic_data: Option<u16>,
    pub asset_bitasset_data: Option<u16>,
    pub account_balance: Option<u16>,
    pub account_statistics: Option<u16>,
}

impl Default for TypeTable {
    fn default() -> Self {
        Self::decent()
    }
}

impl TypeTable {
    /// Numbering used by DECENT nodes.
    pub fn decent() -> Self {
        Self {
            account: Some(2),
            asset: Some(3),
            witness: Some(4),
            committee_member: None,
            limit_order: None,
            call_order: None,
            proposal: Some(6),
            operation_history: Some(7),
            vesting_balance: Some(9),
            worker: None,
            dynamic_global_property: Some(1),
            asset_dynamic_data: Some(3),
            asset_bitasset_data: None,
            account_balance: Some(4),
            account_statistics: Some(5),
        }
    }

    /// Numbering used by Graphene/BitShares nodes.
    pub fn graphene() -> Self {
        Self {
            account: Some(2),
            asset: Some(3),
            witness: Some(6),
            committee_member: Some(5),
            limit_order: Some(7),
            call_order: Some(8),
            proposal: Some(10),
            operation_history: Some(11),
            vesting_balance: Some(13),
            worker: Some(14),
            dynamic_global_property: Some(1),
            asset_dynamic_data: Some(3),
            asset_bitasset_data: Some(4),
            account_balance: Some(5),
            account_statistics: Some(6),
        }
    }

    fn entries(&self) -> [(ObjectKind, Option<u16>); 15] {
        [
            (ObjectKind::Account, self.account),
            (ObjectKind::Asset, self.asset),
            (ObjectKind::Witness, self.witness),
            (ObjectKind::CommitteeMember, self.committee_member),
            (ObjectKind::LimitOrder, self.limit_order),
            (ObjectKind::CallOrder, self.call_order),
            (ObjectKind::Proposal, self.proposal),
            (ObjectKind::OperationHistory, self.operation_history),
            (ObjectKind::VestingBalance, self.vesting_balance),
            (ObjectKind::Worker, self.worker),
            (ObjectKind::DynamicGlobalProperty, self.dynamic_global_property),
            (ObjectKind::AssetDynamicData, self.asset_dynamic_data),
            (ObjectKind::BitassetData, self.asset_bitasset_data),
            (ObjectKind::AccountBalance, self.account_balance),
            (ObjectKind::AccountStatistics, self.account_statistics),
        ]
    }

    /// Type number declared for `kind`, if the chain has it.
    pub fn type_of(&self, kind: ObjectKind) -> Option<u16> {
        self.entries()
            .into_iter()
            .find(|(k, _)| *k == kind)
            .and_then(|(_, type_id)| type_id)
    }

    /// Compile into a lookup table, rejecting collisions and missing
    /// mandatory kinds.
    pub fn compile(&self) -> Result<KindTable, ConfigError> {
        for required in [
            ObjectKind::Account,
            ObjectKind::Asset,
            ObjectKind::OperationHistory,
            ObjectKind::DynamicGlobalProperty,
        ] {
            if self.type_of(required).is_none() {
                return Err(ConfigError::MissingRequired {
                    field: format!("object_types.{}", required.name()),
                });
            }
        }

        let mut by_type: HashMap<(u8, u16), ObjectKind> = HashMap::new();
        for (kind, type_id) in self.entries() {
            let Some(type_id) = type_id else { continue };
            if let Some(existing) = by_type.insert((kind.space(), type_id), kind) {
                return Err(ConfigError::DuplicateTypeNumber {
                    space: kind.space(),
                    type_id,
                    first: existing.name(),
                    second: kind.name(),
                });
            }
        }

        Ok(KindTable {
            by_type,
            table: self.clone(),
        })
    }
}

/// Compiled `(space, type) -> kind` lookup.
#[derive(Debug, Clone)]
pub struct KindTable {
    by_type: HashMap<(u8, u16), ObjectKind>,
    table: TypeTable,
}

impl KindTable {
    pub fn classify(&self, id: &ObjectId) -> ObjectKind {
        self.by_type
            .get(&(id.space(), id.type_id()))
            .copied()
            .unwrap_or(ObjectKind::Other)
    }

    /// Id of the `instance`th object of `kind`, if the chain has the kind.
    pub fn id_of(&self, kind: ObjectKind, instance: u64) -> Option<ObjectId> {
        self.table
            .type_of(kind)
            .map(|type_id| ObjectId::new(kind.space(), type_id, instance))
    }

    /// The well-known dynamic global property singleton (`2.<type>.0`).
    pub fn dynamic_global_property_id(&self) -> ObjectId {
        self.id_of(ObjectKind::DynamicGlobalProperty, 0)
            .unwrap_or(ObjectId::new(IMPLEMENTATION_SPACE, 1, 0))
    }

    /// The zero operation-history id, used as "no history known".
    pub fn zero_history_id(&self) -> ObjectId {
        self.id_of(ObjectKind::OperationHistory, 0)
            .unwrap_or(ObjectId::new(PROTOCOL_SPACE, 7, 0))
    }

    pub fn type_table(&self) -> &TypeTable {
        &self.table
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(s: &str) -> ObjectId {
        s.parse().unwrap()
    }

    #[test]
    fn test_decent_classification() {
        let kinds = TypeTable::decent().compile().unwrap();
        assert_eq!(kinds.classify(&id("1.2.100")), ObjectKind::Account);
        assert_eq!(kinds.classify(&id("1.3.0")), ObjectKind::Asset);
        assert_eq!(kinds.classify(&id("2.4.55")), ObjectKind::AccountBalance);
        assert_eq!(kinds.classify(&id("2.5.1")), ObjectKind::AccountStatistics);
        assert_eq!(kinds.classify(&id("2.1.0")), ObjectKind::DynamicGlobalProperty);
        assert_eq!(kinds.classify(&id("1.14.0")), ObjectKind::Other);
        assert_eq!(kinds.zero_history_id(), id("1.7.0"));
    }

    #[test]
    fn test_graphene_classification() {
        let kinds = TypeTable::graphene().compile().unwrap();
        assert_eq!(kinds.classify(&id("1.7.12")), ObjectKind::LimitOrder);
        assert_eq!(kinds.classify(&id("1.8.3")), ObjectKind::CallOrder);
        assert_eq!(kinds.classify(&id("2.4.0")), ObjectKind::BitassetData);
        assert_eq!(kinds.classify(&id("2.5.9")), ObjectKind::AccountBalance);
        assert_eq!(kinds.zero_history_id(), id("1.11.0"));
    }

    #[test]
    fn test_same_number_in_different_spaces_is_allowed() {
        // asset (1.3) and asset_dynamic_data (2.3) share a number.
        assert!(TypeTable::decent().compile().is_ok());
    }

    #[test]
    fn test_duplicate_type_number_rejected() {
        let table = TypeTable {
            limit_order: Some(2),
            ..TypeTable::decent()
        };
        let err = table.compile().unwrap_err();
        assert!(matches!(
            err,
            ConfigError::DuplicateTypeNumber {
                space: 1,
                type_id: 2,
                ..
            }
        ));
    }

    #[test]
    fn test_missing_required_kind_rejected() {
        let table = TypeTable {
            dynamic_global_property: None,
            ..TypeTable::graphene()
        };
        assert!(matches!(
            table.compile(),
            Err(ConfigError::MissingRequired { .. })
        ));
    }

    #[test]
    fn test_account_replace_fields() {
        assert!(ObjectKind::Account.replace_fields().contains(&"whitelisted_accounts"));
        assert!(ObjectKind::Asset.replace_fields().is_empty());
    }
}
