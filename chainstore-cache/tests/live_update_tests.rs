//! Live update ingestion through the subscription handler

mod support;

use chainstore_cache::{DomainEvent, Lookup};
use chainstore_core::UpdateEntry;
use chainstore_test_utils::fixtures::{self, object_id};
use chainstore_test_utils::settle;
use serde_json::{json, Value};
use std::time::Duration;
use support::{go_live, graphene_store, store, Counter};

fn updated(value: Value) -> UpdateEntry {
    UpdateEntry::Updated(value)
}

fn removed(id: &str) -> UpdateEntry {
    UpdateEntry::Removed(object_id(id))
}

#[tokio::test(start_paused = true)]
async fn test_disjoint_updates_merge() {
    let (db, store) = store();
    go_live(&db, &store).await;

    db.push_update(vec![updated(json!({"id": "1.2.100", "a": 1}))]);
    db.push_update(vec![updated(json!({"id": "1.2.100", "b": 2}))]);

    let snapshot = store.get_object("1.2.100").unwrap().found().unwrap();
    assert_eq!(snapshot.get("a"), Some(&json!(1)));
    assert_eq!(snapshot.get("b"), Some(&json!(2)));
    assert!(db.calls().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_whitelist_is_replaced_wholesale() {
    let (db, store) = store();
    go_live(&db, &store).await;

    db.push_update(vec![updated(json!({
        "id": "1.2.100",
        "name": "alice",
        "whitelisted_accounts": ["1.2.1", "1.2.2"],
    }))]);
    db.push_update(vec![updated(json!({
        "id": "1.2.100",
        "whitelisted_accounts": ["1.2.3"],
    }))]);

    let account = store.get_object("1.2.100").unwrap().found().unwrap();
    assert_eq!(account.get("whitelisted_accounts"), Some(&json!(["1.2.3"])));
    assert_eq!(account.get("name"), Some(&json!("alice")));
}

#[tokio::test(start_paused = true)]
async fn test_balance_links_into_resident_account() {
    let (db, store) = store();
    go_live(&db, &store).await;

    db.push_update(vec![
        updated(fixtures::account("1.2.100", "alice")),
        updated(fixtures::balance("2.4.55", "1.2.100", "1.3.0", 42)),
    ]);
    let account = store.get_object("1.2.100").unwrap().found().unwrap();
    assert_eq!(account.get_in(&["balances", "1.3.0"]), Some(&json!("2.4.55")));
    assert_eq!(store.account_balance(&account, &object_id("1.3.0")), 42);
}

#[tokio::test(start_paused = true)]
async fn test_balance_for_absent_account_is_not_linked() {
    let (db, store) = store();
    go_live(&db, &store).await;
    let before = store.cached_object_count();

    db.push_update(vec![updated(fixtures::balance("2.4.56", "1.2.200", "1.3.0", 7))]);
    assert!(store.get_object("2.4.56").unwrap().is_found());
    assert_eq!(store.cached_object_count(), before + 1);
    assert!(db.calls().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_unknown_removal_does_not_drop_the_batch() {
    let (db, store) = store();
    go_live(&db, &store).await;

    db.push_update(vec![
        removed("1.7.99"),
        updated(json!({"id": "1.2.100", "name": "carol"})),
        updated(json!("not an object")),
        updated(json!({"id": "1.2.101", "name": "dave"})),
    ]);

    assert!(store.get_object("1.2.100").unwrap().is_found());
    assert!(store.get_object("1.2.101").unwrap().is_found());
    let carol = store.get_account("carol").unwrap();
    assert_eq!(carol.found().and_then(|a| a.id()), Some(object_id("1.2.100")));
}

#[tokio::test(start_paused = true)]
async fn test_removed_limit_order_unlinks_and_emits() {
    let (db, store) = graphene_store();
    go_live(&db, &store).await;
    let mut events = store.subscribe_events();

    db.push_update(vec![
        updated(fixtures::account("1.2.100", "alice")),
        updated(json!({"id": "1.7.5", "seller": "1.2.100", "for_sale": 10})),
    ]);
    let account = store.get_object("1.2.100").unwrap().found().unwrap();
    assert_eq!(account.get("orders"), Some(&json!(["1.7.5"])));

    db.push_update(vec![removed("1.7.5")]);
    assert_eq!(store.get_object("1.7.5").unwrap(), Lookup::Missing);
    let account = store.get_object("1.2.100").unwrap().found().unwrap();
    assert_eq!(account.get("orders"), Some(&json!([])));
    assert_eq!(events.try_recv().unwrap(), DomainEvent::CancelOrder(object_id("1.7.5")));
}

#[tokio::test(start_paused = true)]
async fn test_call_orders_emit_events() {
    let (db, store) = graphene_store();
    go_live(&db, &store).await;
    let mut events = store.subscribe_events();

    db.push_update(vec![updated(json!({"id": "1.8.3", "borrower": "1.2.100", "collateral": 5}))]);
    assert!(matches!(events.try_recv().unwrap(), DomainEvent::CallOrderUpdate(_)));

    db.push_update(vec![removed("1.8.3")]);
    assert_eq!(events.try_recv().unwrap(), DomainEvent::CloseCall(object_id("1.8.3")));
}

#[tokio::test(start_paused = true)]
async fn test_settle_orders_are_forwarded() {
    let (db, store) = graphene_store();
    go_live(&db, &store).await;
    let mut events = store.subscribe_events();
    let before = store.cached_object_count();

    let order = json!({"balance": {"amount": 1}, "owner": "1.2.100", "settlement_date": "2026-10-15T00:00:00"});
    db.push_update(vec![updated(order.clone())]);
    assert_eq!(events.try_recv().unwrap(), DomainEvent::SettleOrderUpdate(order));
    assert_eq!(store.cached_object_count(), before);
}

#[tokio::test(start_paused = true)]
async fn test_burst_of_updates_notifies_once() {
    let (db, store) = store();
    go_live(&db, &store).await;
    tokio::time::sleep(Duration::from_millis(50)).await;

    let counter = Counter::new();
    assert!(store.subscribe(counter.observer.clone()));
    for i in 0..100 {
        db.push_update(vec![updated(json!({"id": "1.2.100", "counter": i}))]);
    }
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(counter.get(), 1);

    db.push_update(vec![updated(json!({"id": "1.2.100", "counter": -1}))]);
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(counter.get(), 2);
    assert!(store.unsubscribe(&counter.observer));
}

#[tokio::test(start_paused = true)]
async fn test_statistics_change_extends_history() {
    let (db, store) = store();
    go_live(&db, &store).await;
    let account = object_id("1.2.100");
    db.push_history(account, vec![fixtures::operation("1.7.1")]);

    db.push_update(vec![
        updated(fixtures::account("1.2.100", "alice")),
        updated(fixtures::account_statistics("2.5.100", "1.2.100", "2.9.1")),
    ]);
    settle().await;
    db.push_history(account, vec![fixtures::operation("1.7.2")]);
    db.push_update(vec![updated(fixtures::account_statistics("2.5.100", "1.2.100", "2.9.2"))]);
    settle().await;

    assert_eq!(db.calls_to("get_account_history"), 1);
    let alice = store.get_object("1.2.100").unwrap().found().unwrap();
    assert_eq!(
        alice.get("history"),
        Some(&json!([fixtures::operation("1.7.2"), fixtures::operation("1.7.1")]))
    );
}

#[tokio::test(start_paused = true)]
async fn test_bitasset_update_carries_owning_asset() {
    let (db, store) = graphene_store();
    go_live(&db, &store).await;
    let mut events = store.subscribe_events();

    db.push_update(vec![updated(json!({"id": "2.4.9", "current_feed": {"settlement_price": {}}}))]);
    assert!(events.try_recv().is_err());
    assert!(store.get_object("2.4.9").unwrap().is_found());

    db.push_update(vec![updated(json!({"id": "1.3.5", "symbol": "USD", "bitasset_data_id": "2.4.5"}))]);
    settle().await;
    db.push_update(vec![updated(json!({"id": "2.4.5", "current_feed": {"settlement_price": {}}}))]);
    match events.try_recv().unwrap() {
        DomainEvent::BitassetUpdate(asset) => {
            assert_eq!(asset.id(), Some(object_id("1.3.5")));
            assert!(asset.get_in(&["bitasset", "current_feed"]).is_some());
        }
        other => panic!("unexpected event: {other:?}"),
    }
    assert!(store.get_asset("USD").unwrap().is_found());
}
