#![allow(dead_code)]

use chainstore_cache::{ChainStore, Observer, StoreConfig};
use chainstore_core::TypeTable;
use chainstore_test_utils::{fixtures, init_tracing, MockDatabase};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

pub type Store = ChainStore<MockDatabase>;

/// Cold store over an empty mock, DECENT numbering.
pub fn store() -> (Arc<MockDatabase>, Store) {
    store_with(StoreConfig::default())
}

/// Cold store over an empty mock, Graphene numbering.
pub fn graphene_store() -> (Arc<MockDatabase>, Store) {
    store_with(StoreConfig::default().with_object_types(TypeTable::graphene()))
}

pub fn store_with(config: StoreConfig) -> (Arc<MockDatabase>, Store) {
    init_tracing();
    let db = Arc::new(MockDatabase::new());
    let store = ChainStore::new(Arc::clone(&db), config).expect("valid test config");
    (db, store)
}

/// Initialize against a fresh head and drop the init calls from the record.
pub async fn go_live(db: &MockDatabase, store: &Store) {
    db.insert_object(fixtures::fresh_head());
    store.init().await.expect("init against a fresh head");
    db.clear_calls();
}

pub struct Counter {
    pub count: Arc<AtomicUsize>,
    pub observer: Arc<dyn Observer>,
}

impl Counter {
    pub fn new() -> Self {
        let count = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&count);
        let observer: Arc<dyn Observer> = Arc::new(move || {
            seen.fetch_add(1, Ordering::SeqCst);
        });
        Self { count, observer }
    }

    pub fn get(&self) -> usize {
        self.count.load(Ordering::SeqCst)
    }
}
