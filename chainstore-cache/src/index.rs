//! Secondary indices
//!
//! Derived lookups from alternate keys to object ids. Entries carry their
//! own tri-state, independent of the objects they point at: a symbol can be
//! confirmed missing before any asset is known, or point at an asset whose
//! snapshot was since evicted.

use chainstore_core::{Lookup, ObjectId, VoteId};
use std::collections::{BTreeSet, HashMap, HashSet};
use std::hash::Hash;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IndexEntry<V> {
    Pending,
    Absent,
    Found(V),
}

/// One secondary index. A key missing from the map is unknown.
#[derive(Debug)]
pub struct Index<K, V> {
    entries: HashMap<K, IndexEntry<V>>,
}

impl<K, V> Default for Index<K, V> {
    fn default() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }
}

impl<K: Eq + Hash, V: Clone> Index<K, V> {
    pub fn get(&self, key: &K) -> Option<&IndexEntry<V>> {
        self.entries.get(key)
    }

    pub fn found(&self, key: &K) -> Option<&V> {
        match self.entries.get(key) {
            Some(IndexEntry::Found(value)) => Some(value),
            _ => None,
        }
    }

    pub fn lookup(&self, key: &K) -> Lookup<V> {
        match self.entries.get(key) {
            None | Some(IndexEntry::Pending) => Lookup::Loading,
            Some(IndexEntry::Absent) => Lookup::Missing,
            Some(IndexEntry::Found(value)) => Lookup::Found(value.clone()),
        }
    }

    pub fn is_pending(&self, key: &K) -> bool {
        matches!(self.entries.get(key), Some(IndexEntry::Pending))
    }

    /// Mark `key` pending unless it already has a found value, which stays
    /// readable while a refresh is in flight.
    pub fn mark_pending(&mut self, key: K) {
        let entry = self.entries.entry(key).or_insert(IndexEntry::Pending);
        if !matches!(entry, IndexEntry::Found(_)) {
            *entry = IndexEntry::Pending;
        }
    }

    pub fn set_found(&mut self, key: K, value: V) {
        self.entries.insert(key, IndexEntry::Found(value));
    }

    pub fn set_absent(&mut self, key: K) {
        self.entries.insert(key, IndexEntry::Absent);
    }

    /// Back to unknown, so a later read retries.
    pub fn remove(&mut self, key: &K) -> Option<IndexEntry<V>> {
        self.entries.remove(key)
    }

    /// Back to unknown only if the entry is still pending.
    pub fn revert_pending(&mut self, key: &K) -> bool {
        if self.is_pending(key) {
            self.entries.remove(key);
            true
        } else {
            false
        }
    }

    /// Decide whether a lookup of `key` goes to the remote. Returns the
    /// cached answer when it does not; otherwise marks the key pending,
    /// records the call in `flights` and returns `None`.
    ///
    /// A terminal answer is only refetched when `force` is set, and never
    /// while a call for the same key is in flight.
    pub fn claim(
        &mut self,
        key: &K,
        force: bool,
        flights: &mut KeyedFlights,
        method: &'static str,
        tag: &str,
    ) -> Option<Lookup<V>>
    where
        K: Clone,
    {
        if flights.contains(method, tag) {
            return Some(self.lookup(key));
        }
        match self.entries.get(key) {
            Some(IndexEntry::Pending) => return Some(Lookup::Loading),
            Some(_) if !force => return Some(self.lookup(key)),
            _ => {}
        }
        self.mark_pending(key.clone());
        flights.start(method, tag);
        None
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

/// Keyed remote lookups in flight, by method and key.
#[derive(Debug, Default)]
pub struct KeyedFlights {
    calls: HashSet<(&'static str, String)>,
}

impl KeyedFlights {
    pub fn contains(&self, method: &'static str, key: &str) -> bool {
        self.calls.contains(&(method, key.to_string()))
    }

    pub fn start(&mut self, method: &'static str, key: &str) {
        self.calls.insert((method, key.to_string()));
    }

    pub fn finish(&mut self, method: &'static str, key: &str) {
        self.calls.remove(&(method, key.to_string()));
    }

    pub fn clear(&mut self) {
        self.calls.clear();
    }
}

/// All secondary indices of a store.
#[derive(Debug, Default)]
pub struct SecondaryIndices {
    pub accounts_by_name: Index<String, ObjectId>,
    pub assets_by_symbol: Index<String, ObjectId>,
    pub account_ids_by_key: Index<String, BTreeSet<ObjectId>>,
    pub balance_objects_by_address: Index<String, BTreeSet<ObjectId>>,
    pub witness_by_account: Index<ObjectId, ObjectId>,
    pub committee_by_account: Index<ObjectId, ObjectId>,
    pub objects_by_vote_id: Index<VoteId, ObjectId>,
}

impl SecondaryIndices {
    pub fn clear(&mut self) {
        self.accounts_by_name.clear();
        self.assets_by_symbol.clear();
        self.account_ids_by_key.clear();
        self.balance_objects_by_address.clear();
        self.witness_by_account.clear();
        self.committee_by_account.clear();
        self.objects_by_vote_id.clear();
    }
}
