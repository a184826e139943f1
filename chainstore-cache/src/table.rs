//! Object Table
//!
//! Canonical `id -> resolution` map. An id missing from the table is
//! *unknown*; every other state is stored explicitly.

use chainstore_core::{Lookup, ObjectId, Snapshot};
use serde_json::{Map, Value};
use std::collections::HashMap;

/// Stored state of an id the table knows about.
#[derive(Debug, Clone, PartialEq)]
pub enum Resolution {
    /// A fetch is in flight.
    Pending,
    /// The remote database confirmed the object does not exist.
    Absent,
    Resolved(Snapshot),
}

impl Resolution {
    pub fn to_lookup(&self) -> Lookup<Snapshot> {
        match self {
            Self::Pending => Lookup::Loading,
            Self::Absent => Lookup::Missing,
            Self::Resolved(snapshot) => Lookup::Found(snapshot.clone()),
        }
    }
}

#[derive(Debug, Default)]
pub struct ObjectTable {
    entries: HashMap<ObjectId, Resolution>,
}

impl ObjectTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pure read. `None` means unknown.
    pub fn get(&self, id: &ObjectId) -> Option<&Resolution> {
        self.entries.get(id)
    }

    pub fn resolved(&self, id: &ObjectId) -> Option<&Snapshot> {
        match self.entries.get(id) {
            Some(Resolution::Resolved(snapshot)) => Some(snapshot),
            _ => None,
        }
    }

    /// Caller-visible view: unknown and pending both read as loading.
    pub fn lookup(&self, id: &ObjectId) -> Lookup<Snapshot> {
        self.entries
            .get(id)
            .map_or(Lookup::Loading, Resolution::to_lookup)
    }

    pub fn is_pending(&self, id: &ObjectId) -> bool {
        matches!(self.entries.get(id), Some(Resolution::Pending))
    }

    /// Total replace of the stored state for `id`.
    pub fn put(&mut self, id: ObjectId, value: Resolution) -> Option<Resolution> {
        self.entries.insert(id, value)
    }

    /// Merge `fields` into the resolved snapshot of `id`, or resolve it from
    /// `fields` if it is unknown, pending or absent. Fields named in
    /// `replace` are overwritten instead of merged.
    pub fn merge(&mut self, id: ObjectId, fields: &Map<String, Value>, replace: &[&str]) -> Snapshot {
        let next = match self.entries.get(&id) {
            Some(Resolution::Resolved(current)) => current.merged(fields, replace),
            _ => Snapshot::from_map(fields.clone()),
        };
        self.entries.insert(id, Resolution::Resolved(next.clone()));
        next
    }

    /// Force `id` back to unknown.
    pub fn evict(&mut self, id: &ObjectId) -> Option<Resolution> {
        self.entries.remove(id)
    }

    /// Evict `id` only if it is still pending.
    pub fn revert_pending(&mut self, id: &ObjectId) -> bool {
        if self.is_pending(id) {
            self.entries.remove(id);
            true
        } else {
            false
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn oid(s: &str) -> ObjectId {
        s.parse().unwrap()
    }

    fn fields(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_unknown_and_pending_read_as_loading() {
        let mut table = ObjectTable::new();
        let id = oid("1.2.100");
        assert!(table.get(&id).is_none());
        assert_eq!(table.lookup(&id), Lookup::Loading);
        table.put(id, Resolution::Pending);
        assert_eq!(table.lookup(&id), Lookup::Loading);
        table.put(id, Resolution::Absent);
        assert_eq!(table.lookup(&id), Lookup::Missing);
    }

    #[test]
    fn test_merge_into_unknown_accumulates() {
        let mut table = ObjectTable::new();
        let id = oid("1.3.0");
        table.merge(id, &fields(json!({"a": 1})), &[]);
        let merged = table.merge(id, &fields(json!({"b": 2})), &[]);
        assert_eq!(merged.to_value(), json!({"a": 1, "b": 2}));
        assert_eq!(table.resolved(&id), Some(&merged));
    }

    #[test]
    fn test_merge_over_pending_resolves() {
        let mut table = ObjectTable::new();
        let id = oid("1.3.1");
        table.put(id, Resolution::Pending);
        table.merge(id, &fields(json!({"symbol": "BTS"})), &[]);
        assert!(table.lookup(&id).is_found());
    }

    #[test]
    fn test_revert_pending_leaves_resolved_alone() {
        let mut table = ObjectTable::new();
        let pending = oid("1.2.1");
        let resolved = oid("1.2.2");
        table.put(pending, Resolution::Pending);
        table.merge(resolved, &fields(json!({"name": "bob"})), &[]);
        assert!(table.revert_pending(&pending));
        assert!(!table.revert_pending(&resolved));
        assert!(table.get(&pending).is_none());
        assert!(table.resolved(&resolved).is_some());
    }

    #[test]
    fn test_evict_returns_to_unknown() {
        let mut table = ObjectTable::new();
        let id = oid("1.2.3");
        table.put(id, Resolution::Absent);
        assert_eq!(table.evict(&id), Some(Resolution::Absent));
        assert!(table.is_empty());
    }
}
