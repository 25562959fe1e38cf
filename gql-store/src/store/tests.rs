use crate::{
    store::{CacheRead, Link, Record, RecordSet, Store},
    CacheError, ChangedKeys
};
use parking_lot::Mutex;
use serde_json::json;
use std::{
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        mpsc, Arc
    },
    thread,
    time::Duration
};

fn dog(id: &str, name: &str) -> Record {
    Record::new(format!("Dog:{}", id))
        .with_field("__typename", json!("Dog"))
        .with_field("id", json!(id))
        .with_field("name", json!(name))
}

fn keys(keys: &[&str]) -> ChangedKeys {
    keys.iter().map(|key| key.to_string()).collect()
}

#[test]
fn publish_returns_changed_keys() {
    let store = Store::default();
    let records: RecordSet = vec![dog("1", "Rex"), dog("2", "Fido")].into_iter().collect();

    let changed = store.publish(records.clone());
    assert_eq!(changed, keys(&["Dog:1", "Dog:2"]));

    let changed = store.publish(records);
    assert!(changed.is_empty(), "republishing identical records changed {:?}", changed);
}

#[test]
fn merge_keeps_fields_missing_from_the_update() {
    let store = Store::default();
    store.publish(dog("1", "Rex").with_field("breed", json!("Collie")).into());

    let update = Record::new("Dog:1").with_field("name", json!("Max"));
    let changed = store.publish(update.into());
    assert_eq!(changed, keys(&["Dog:1"]));

    let snapshot = store.snapshot();
    let record = snapshot.read_record("Dog:1").unwrap();
    assert_eq!(record.get("name").and_then(|v| v.as_scalar()), Some(&json!("Max")));
    assert_eq!(record.get("breed").and_then(|v| v.as_scalar()), Some(&json!("Collie")));
    assert_eq!(record.typename(), Some("Dog"));
}

#[test]
fn read_transaction_ignores_later_commits() {
    let store = Store::default();
    store.publish(dog("1", "Rex").into());

    let tx = store.begin_read();
    store.publish(dog("1", "Max").into());
    store.publish(dog("2", "Fido").into());

    assert_eq!(tx.read_value("Dog:1").unwrap()["name"], "Rex");
    assert!(tx.read_record("Dog:2").unwrap_err().is_not_found());
    assert_eq!(store.read_value("Dog:1").unwrap()["name"], "Max");
}

#[test]
fn write_transaction_reads_its_own_writes() {
    let store = Store::default();
    let mut tx = store.begin_write();
    tx.merge(dog("1", "Rex"));

    assert_eq!(tx.read_value("Dog:1").unwrap()["name"], "Rex");
    assert!(store.begin_read().read_record("Dog:1").is_err());

    assert_eq!(tx.changed_keys(), keys(&["Dog:1"]));
    tx.commit();
    assert!(store.begin_read().contains("Dog:1"));
}

#[test]
fn aborted_transaction_leaves_store_untouched() {
    let store = Store::default();
    store.publish(dog("1", "Rex").into());

    let mut tx = store.begin_write();
    tx.merge(dog("1", "Max"));
    tx.merge(dog("2", "Fido"));
    assert!(tx.remove("Dog:1"));
    assert_eq!(tx.changed_keys(), keys(&["Dog:1", "Dog:2"]));
    tx.abort();

    assert_eq!(store.len(), 1);
    assert_eq!(store.read_value("Dog:1").unwrap()["name"], "Rex");
}

#[test]
fn finished_transactions_release_the_write_lock() {
    let store = Store::default();

    let mut tx = store.begin_write();
    tx.merge(dog("1", "Rex"));
    tx.abort();
    assert!(store.inner.write_lock.try_lock().is_some());

    let mut tx = store.begin_write();
    tx.merge(dog("1", "Rex"));
    assert!(store.inner.write_lock.try_lock().is_none());
    tx.commit();
    assert!(store.inner.write_lock.try_lock().is_some());
    assert_eq!(store.snapshot().version(), 1);
}

#[test]
fn dropped_transaction_is_aborted() {
    let store = Store::default();
    {
        let mut tx = store.begin_write();
        tx.merge(dog("1", "Rex"));
    }
    assert!(store.is_empty());
    assert_eq!(store.snapshot().version(), 0);
}

#[test]
fn write_closure_commits_on_ok_and_aborts_on_err() {
    let store = Store::default();

    let result: Result<(), CacheError> = store.write(|tx| {
        tx.merge(dog("1", "Rex"));
        tx.read_record("Cat:999")?;
        Ok(())
    });
    assert!(result.unwrap_err().is_not_found());
    assert!(store.is_empty());

    let changed = store
        .write(|tx| Ok::<_, CacheError>(tx.publish(dog("1", "Rex").into())))
        .unwrap();
    assert_eq!(changed, keys(&["Dog:1"]));
    assert_eq!(store.len(), 1);
}

#[test]
fn version_only_moves_on_change() {
    let store = Store::default();
    store.publish(dog("1", "Rex").into());
    assert_eq!(store.snapshot().version(), 1);

    store.publish(dog("1", "Rex").into());
    assert!(!store.remove("Dog:2"));
    assert_eq!(store.snapshot().version(), 1);

    assert!(store.remove("Dog:1"));
    assert_eq!(store.snapshot().version(), 2);
}

#[test]
fn listeners_receive_changed_keys() {
    let store = Store::default();
    let seen = Arc::new(Mutex::new(Vec::new()));
    let _subscription = {
        let seen = seen.clone();
        store.subscribe(move |changed| seen.lock().push(changed.clone()))
    };

    store.publish(dog("1", "Rex").into());
    store.publish(dog("1", "Rex").into());
    store.publish(Record::new("Dog:1").with_field("name", json!("Max")).into());

    let seen = seen.lock();
    assert_eq!(seen.len(), 2, "unchanged commits must not notify");
    assert_eq!(seen[0], keys(&["Dog:1"]));
    assert_eq!(seen[1], keys(&["Dog:1"]));
}

#[test]
fn listener_sees_the_committed_snapshot() {
    let store = Store::default();
    let observed = Arc::new(Mutex::new(None));
    let _subscription = {
        let store = store.clone();
        let observed = observed.clone();
        store.clone().subscribe(move |_| {
            *observed.lock() = store.read_value("Dog:1").ok();
        })
    };

    store.publish(dog("1", "Rex").into());
    let observed = observed.lock();
    assert_eq!(observed.as_ref().map(|dog| dog["name"].clone()), Some(json!("Rex")));
}

#[test]
fn listener_can_write_to_the_store() {
    let store = Store::default();
    let wrote = Arc::new(AtomicBool::new(false));
    let _subscription = {
        let store = store.clone();
        let wrote = wrote.clone();
        store.clone().subscribe(move |changed| {
            if changed.contains("Dog:1") && !wrote.swap(true, Ordering::SeqCst) {
                store.publish(dog("2", "Fido").into());
            }
        })
    };

    store.publish(dog("1", "Rex").into());

    assert!(wrote.load(Ordering::SeqCst));
    assert_eq!(store.len(), 2);
}

#[test]
fn unsubscribed_listeners_are_not_called() {
    let store = Store::default();
    let calls = Arc::new(AtomicUsize::new(0));
    let subscribe = |store: &Store| {
        let calls = calls.clone();
        store.subscribe(move |_| {
            calls.fetch_add(1, Ordering::SeqCst);
        })
    };

    let first = subscribe(&store);
    let second = subscribe(&store);
    store.publish(dog("1", "Rex").into());
    assert_eq!(calls.load(Ordering::SeqCst), 2);

    first.unsubscribe();
    store.publish(dog("2", "Fido").into());
    assert_eq!(calls.load(Ordering::SeqCst), 3);

    drop(second);
    store.publish(dog("3", "Lassie").into());
    assert_eq!(calls.load(Ordering::SeqCst), 3);
}

#[test]
fn listener_slots_are_reused() {
    let store = Store::default();
    let calls = Arc::new(AtomicUsize::new(0));
    let kept = {
        let calls = calls.clone();
        store.subscribe(move |_| {
            calls.fetch_add(1, Ordering::SeqCst);
        })
    };

    for _ in 0..1000 {
        let calls = calls.clone();
        store
            .subscribe(move |_| {
                calls.fetch_add(1, Ordering::SeqCst);
            })
            .unsubscribe();
    }
    assert_eq!(store.inner.listeners.lock().next_push_index(), 2);

    store.publish(dog("1", "Rex").into());
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    drop(kept);
    assert_eq!(store.inner.listeners.lock().num_elements(), 0);
}

#[test]
fn writers_are_serialized() {
    let store = Store::default();
    let tx = store.begin_write();

    let (sender, receiver) = mpsc::channel();
    let handle = {
        let store = store.clone();
        thread::spawn(move || {
            let mut tx = store.begin_write();
            sender.send(()).unwrap();
            tx.merge(dog("2", "Fido"));
            tx.commit();
        })
    };

    assert!(receiver.recv_timeout(Duration::from_millis(100)).is_err());
    tx.commit();
    receiver.recv_timeout(Duration::from_secs(5)).unwrap();
    handle.join().unwrap();
    assert!(store.begin_read().contains("Dog:2"));
}

#[test]
fn garbage_collection_keeps_reachable_records() {
    let store = Store::default();
    let query = Record::new("Query")
        .with_field("dog", Link::Entity("Dog:1".into()))
        .with_field("missing", Link::Entity("Dog:404".into()));
    let owned = dog("1", "Rex").with_field("owner", Link::Entity("Person:1".into()));
    let owner = Record::new("Person:1").with_field("name", json!("Ann"));
    let records: RecordSet = vec![query, owned, owner, dog("2", "Stray")]
        .into_iter()
        .collect();
    store.publish(records);

    let removed = store.collect_garbage();
    assert_eq!(removed, keys(&["Dog:2"]));
    assert_eq!(store.len(), 3);

    assert!(store.collect_garbage().is_empty());
}

#[test]
fn garbage_collection_with_cyclic_references_terminates() {
    let store = Store::default();
    let a = Record::new("Node:a").with_field("next", Link::Entity("Node:b".into()));
    let b = Record::new("Node:b").with_field("next", Link::Entity("Node:a".into()));
    store.publish(vec![a, b].into_iter().collect());

    let mut tx = store.begin_write();
    assert!(tx.collect_garbage(&["Node:a"]).is_empty());
    assert_eq!(tx.collect_garbage(&[]), keys(&["Node:a", "Node:b"]));
    tx.abort();
    assert_eq!(store.len(), 2);
}

#[test]
fn extract_and_hydrate_restore_contents() {
    let store = Store::default();
    store.publish(
        vec![
            dog("1", "Rex").with_field("owner", Link::Entity("Person:1".into())),
            Record::new("Person:1").with_field("name", json!("Ann"))
        ]
        .into_iter()
        .collect()
    );
    let data = store.extract();
    let json = serde_json::to_string(&data).unwrap();

    let restored = Store::default();
    restored.publish(dog("9", "Gone").into());
    let changed = restored.hydrate(serde_json::from_str(&json).unwrap());

    assert_eq!(changed, keys(&["Dog:1", "Person:1", "Dog:9"]));
    assert_eq!(restored.extract(), data);
    assert!(restored.hydrate(data).is_empty());
}

#[test]
fn replace_drops_missing_fields() {
    let store = Store::default();
    store.publish(dog("1", "Rex").with_field("breed", json!("Collie")).into());

    let mut tx = store.begin_write();
    assert!(tx.replace(dog("1", "Rex")));
    tx.commit();

    let snapshot = store.snapshot();
    assert!(snapshot.read_record("Dog:1").unwrap().get("breed").is_none());
}
