//! Immutable object snapshots
//!
//! A [`Snapshot`] is the last known field set of a remote object. It is
//! shared behind an `Arc` and never mutated in place: every update builds a
//! new snapshot (copy-on-write), so a reader holding an older snapshot can
//! never observe a half-applied update.
//!
//! Embedded collections maintained by the cache follow two shapes:
//! - sets of ids (`orders`, `call_orders`, `proposals`, `vesting_balances`)
//!   are JSON arrays of unique id strings, kept sorted;
//! - maps (`balances`: asset id to balance id) are JSON objects.

use crate::error::ValidationError;
use crate::id::ObjectId;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};
use std::sync::Arc;

/// Immutable, cheaply clonable object snapshot.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Snapshot {
    fields: Arc<Map<String, Value>>,
}

impl Snapshot {
    pub fn from_map(fields: Map<String, Value>) -> Self {
        Self {
            fields: Arc::new(fields),
        }
    }

    /// Build a snapshot from a JSON object.
    pub fn from_value(value: Value) -> Result<Self, ValidationError> {
        match value {
            Value::Object(fields) => Ok(Self::from_map(fields)),
            other => Err(ValidationError::InvalidValue {
                field: "object",
                reason: format!("expected a JSON object, got {}", json_type(&other)),
            }),
        }
    }

    pub fn fields(&self) -> &Map<String, Value> {
        &self.fields
    }

    pub fn to_value(&self) -> Value {
        Value::Object((*self.fields).clone())
    }

    /// The snapshot's own `id`, if present and well formed.
    pub fn id(&self) -> Option<ObjectId> {
        self.id_field("id")
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.fields.get(field)
    }

    pub fn contains(&self, field: &str) -> bool {
        self.fields.contains_key(field)
    }

    /// Walk nested objects along `path`.
    pub fn get_in(&self, path: &[&str]) -> Option<&Value> {
        let (first, rest) = path.split_first()?;
        let mut current = self.fields.get(*first)?;
        for segment in rest {
            current = current.as_object()?.get(*segment)?;
        }
        Some(current)
    }

    pub fn str_field(&self, field: &str) -> Option<&str> {
        self.fields.get(field).and_then(Value::as_str)
    }

    pub fn id_field(&self, field: &str) -> Option<ObjectId> {
        self.str_field(field).and_then(|s| s.parse().ok())
    }

    /// Members of an embedded id set, or an empty list if the set is absent.
    pub fn set_members(&self, field: &str) -> Vec<ObjectId> {
        self.fields
            .get(field)
            .and_then(Value::as_array)
            .map(|items| {
                items
                    .iter()
                    .filter_map(|v| v.as_str().and_then(|s| s.parse().ok()))
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn has_set_member(&self, field: &str, member: &ObjectId) -> bool {
        self.set_members(field).contains(member)
    }

    /// New snapshot with `update` deep-merged in.
    ///
    /// Fields named in `replace` are overwritten wholesale when the update
    /// carries them. Fields absent from `update` are always kept.
    pub fn merged(&self, update: &Map<String, Value>, replace: &[&str]) -> Snapshot {
        let mut fields = (*self.fields).clone();
        for (key, incoming) in update {
            if replace.contains(&key.as_str()) {
                fields.insert(key.clone(), incoming.clone());
                continue;
            }
            match fields.get_mut(key) {
                Some(existing) => deep_merge(existing, incoming),
                None => {
                    fields.insert(key.clone(), incoming.clone());
                }
            }
        }
        Self::from_map(fields)
    }

    /// New snapshot with `field` set to `value`.
    pub fn with_field(&self, field: &str, value: Value) -> Snapshot {
        let mut next = self.clone();
        Arc::make_mut(&mut next.fields).insert(field.to_string(), value);
        next
    }

    /// New snapshot with `member` added to the id set `field`, creating the
    /// set if needed. Returns `None` if the member was already present.
    pub fn with_set_member(&self, field: &str, member: &ObjectId) -> Option<Snapshot> {
        let mut members = self.set_members(field);
        if members.contains(member) {
            return None;
        }
        members.push(*member);
        Some(self.with_field(field, id_set(members)))
    }

    /// New snapshot with `member` removed from the id set `field`. Returns
    /// `None` if the member was not present.
    pub fn without_set_member(&self, field: &str, member: &ObjectId) -> Option<Snapshot> {
        let mut members = self.set_members(field);
        let before = members.len();
        members.retain(|m| m != member);
        if members.len() == before {
            return None;
        }
        Some(self.with_field(field, id_set(members)))
    }

    /// New snapshot with `map_field[key] = value`, creating the map if needed.
    pub fn with_map_entry(&self, map_field: &str, key: &str, value: Value) -> Snapshot {
        let mut map = self
            .fields
            .get(map_field)
            .and_then(Value::as_object)
            .cloned()
            .unwrap_or_default();
        map.insert(key.to_string(), value);
        self.with_field(map_field, Value::Object(map))
    }
}

impl Serialize for Snapshot {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.fields.serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Snapshot {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Map::deserialize(deserializer).map(Self::from_map)
    }
}

impl From<Snapshot> for Value {
    fn from(snapshot: Snapshot) -> Self {
        snapshot.to_value()
    }
}

/// Sorted JSON array of unique ids.
pub fn id_set<I: IntoIterator<Item = ObjectId>>(ids: I) -> Value {
    let mut ids: Vec<ObjectId> = ids.into_iter().collect();
    ids.sort();
    ids.dedup();
    Value::Array(ids.into_iter().map(|id| Value::String(id.to_string())).collect())
}

/// Recursively merge `update` into `target`.
///
/// Objects merge key by key; any other value (arrays included) is replaced.
pub fn deep_merge(target: &mut Value, update: &Value) {
    match (target, update) {
        (Value::Object(existing), Value::Object(incoming)) => {
            for (key, value) in incoming {
                match existing.get_mut(key) {
                    Some(slot) => deep_merge(slot, value),
                    None => {
                        existing.insert(key.clone(), value.clone());
                    }
                }
            }
        }
        (slot, value) => *slot = value.clone(),
    }
}

fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    fn snap(value: Value) -> Snapshot {
        Snapshot::from_value(value).unwrap()
    }

    fn obj(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_disjoint_merges_accumulate() {
        let s = Snapshot::default()
            .merged(&obj(json!({"a": 1})), &[])
            .merged(&obj(json!({"b": 2})), &[]);
        assert_eq!(s.to_value(), json!({"a": 1, "b": 2}));
    }

    #[test]
    fn test_nested_merge_keeps_untouched_fields() {
        let s = snap(json!({"id": "1.2.1", "options": {"memo_key": "K1", "votes": ["1:0"]}}));
        let merged = s.merged(&obj(json!({"options": {"memo_key": "K2"}})), &[]);
        assert_eq!(merged.get_in(&["options", "memo_key"]), Some(&json!("K2")));
        assert_eq!(merged.get_in(&["options", "votes"]), Some(&json!(["1:0"])));
    }

    #[test]
    fn test_replace_fields_bypass_merge() {
        let s = snap(json!({"active": {"key_auths": [["K1", 1]], "weight_threshold": 1}}));
        let merged = s.merged(
            &obj(json!({"active": {"key_auths": [["K2", 1]]}})),
            &["active"],
        );
        assert_eq!(merged.get("active"), Some(&json!({"key_auths": [["K2", 1]]})));
    }

    #[test]
    fn test_arrays_are_replaced_not_unioned() {
        let s = snap(json!({"whitelisted_accounts": ["1.2.5", "1.2.6"]}));
        let merged = s.merged(&obj(json!({"whitelisted_accounts": ["1.2.7"]})), &[]);
        assert_eq!(merged.get("whitelisted_accounts"), Some(&json!(["1.2.7"])));
    }

    #[test]
    fn test_merge_does_not_touch_original() {
        let original = snap(json!({"name": "alice"}));
        let reader = original.clone();
        let _ = original.merged(&obj(json!({"name": "bob"})), &[]);
        assert_eq!(reader.str_field("name"), Some("alice"));
    }

    #[test]
    fn test_set_membership() {
        let order: ObjectId = "1.7.3".parse().unwrap();
        let s = snap(json!({"id": "1.2.1"}));
        let with = s.with_set_member("orders", &order).unwrap();
        assert!(with.has_set_member("orders", &order));
        assert!(with.with_set_member("orders", &order).is_none());
        let without = with.without_set_member("orders", &order).unwrap();
        assert_eq!(without.get("orders"), Some(&json!([])));
        assert!(without.without_set_member("orders", &order).is_none());
    }

    #[test]
    fn test_map_entry() {
        let s = snap(json!({"id": "1.2.100"}))
            .with_map_entry("balances", "1.3.0", json!("2.4.55"))
            .with_map_entry("balances", "1.3.1", json!("2.4.56"));
        assert_eq!(s.get_in(&["balances", "1.3.0"]), Some(&json!("2.4.55")));
        assert_eq!(s.get_in(&["balances", "1.3.1"]), Some(&json!("2.4.56")));
    }

    #[test]
    fn test_from_value_rejects_non_objects() {
        assert!(Snapshot::from_value(json!("1.2.3")).is_err());
        assert!(Snapshot::from_value(json!([1, 2])).is_err());
    }

    proptest! {
        #[test]
        fn prop_merge_never_drops_fields(
            base in proptest::collection::btree_map("[a-e]", 0i64..100, 0..5),
            update in proptest::collection::btree_map("[c-h]", 0i64..100, 0..5),
        ) {
            let base_map: Map<String, Value> = base.iter().map(|(k, v)| (k.clone(), json!(v))).collect();
            let update_map: Map<String, Value> = update.iter().map(|(k, v)| (k.clone(), json!(v))).collect();
            let merged = Snapshot::from_map(base_map).merged(&update_map, &[]);
            for (key, value) in &base {
                let expected = update.get(key).unwrap_or(value);
                prop_assert_eq!(merged.get(key), Some(&json!(expected)));
            }
            for (key, value) in &update {
                prop_assert_eq!(merged.get(key), Some(&json!(value)));
            }
        }
    }
}
