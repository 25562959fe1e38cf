use futures::{executor::block_on, StreamExt};
use gql_store::{CacheRead, ChangedKeys, FieldValue, Record, Store};
use gql_store_test::get_dog::{self, Dog};
use serde_json::{json, Value};
use std::{
    sync::{Arc, Barrier},
    thread
};

fn keys(keys: &[&str]) -> ChangedKeys {
    keys.iter().map(|key| key.to_string()).collect()
}

#[test]
fn readers_keep_their_snapshot_while_a_writer_commits() {
    let store = Store::default();
    store.write_response(&get_dog::REX, "Query").unwrap();

    let started = Arc::new(Barrier::new(2));
    let committed = Arc::new(Barrier::new(2));

    let reader = {
        let store = store.clone();
        let started = started.clone();
        let committed = committed.clone();
        thread::spawn(move || {
            let tx = store.begin_read();
            started.wait();
            committed.wait();
            let dog: Dog = tx.read_object("Dog:1").unwrap();
            let other = tx.read_record("Dog:2").map(|_| ());
            (dog.name, other.is_err())
        })
    };

    started.wait();
    store
        .write(|tx| {
            tx.write_response(&get_dog::dog_json("1", "Max"), "Query")?;
            tx.write_response(&get_dog::dog_json("2", "Fido"), "Query")
        })
        .unwrap();
    committed.wait();

    let (name, missing) = reader.join().unwrap();
    assert_eq!(name, "Rex");
    assert!(missing);
    assert_eq!(store.read_object::<Dog>("Dog:1").unwrap().name, "Max");
}

#[test]
fn concurrent_publishers_never_lose_records() {
    let store = Store::default();
    let writers: Vec<_> = (0..8)
        .map(|writer| {
            let store = store.clone();
            thread::spawn(move || {
                for i in 0..50 {
                    let id = format!("{}-{}", writer, i);
                    store
                        .write_response(&get_dog::dog_json(&id, "Rex"), "Query")
                        .unwrap();
                }
            })
        })
        .collect();
    for writer in writers {
        writer.join().unwrap();
    }

    assert_eq!(store.len(), 400);
    assert_eq!(store.snapshot().version(), 400);
}

#[test]
fn a_write_never_blocks_readers() {
    let store = Store::default();
    store.write_response(&get_dog::REX, "Query").unwrap();

    let mut tx = store.begin_write();
    tx.write_response(&get_dog::dog_json("1", "Max"), "Query")
        .unwrap();

    let reader = {
        let store = store.clone();
        thread::spawn(move || store.read_object::<Dog>("Dog:1").unwrap().name)
    };
    assert_eq!(reader.join().unwrap(), "Rex");

    tx.commit();
    assert_eq!(store.read_object::<Dog>("Dog:1").unwrap().name, "Max");
}

#[test]
fn change_stream_follows_commit_order() {
    let store = Store::default();
    let changes = store.changes();

    let writers: Vec<_> = (0..8)
        .map(|_| {
            let store = store.clone();
            thread::spawn(move || {
                for _ in 0..25 {
                    store.write(|tx| {
                        let count = tx
                            .record("Counter:1")
                            .and_then(|record| record.get("count"))
                            .and_then(FieldValue::as_scalar)
                            .and_then(Value::as_u64)
                            .unwrap_or(0)
                            + 1;
                        tx.merge(Record::new("Counter:1").with_field("count", json!(count)));
                        tx.merge(Record::new(format!("Tick:{}", count)));
                        Ok::<_, ()>(())
                    })
                    .unwrap();
                }
            })
        })
        .collect();
    for writer in writers {
        writer.join().unwrap();
    }
    drop(store);

    let ticks: Vec<u64> = block_on(changes.collect::<Vec<_>>())
        .into_iter()
        .map(|changed| {
            changed
                .iter()
                .find_map(|key| key.strip_prefix("Tick:"))
                .and_then(|count| count.parse().ok())
                .unwrap()
        })
        .collect();
    assert_eq!(ticks, (1..=200).collect::<Vec<_>>());
}

#[tokio::test]
async fn change_stream_yields_committed_keys() {
    let store = Store::default();
    let mut changes = store.changes();

    store.write_response(&get_dog::REX, "Query").unwrap();
    store.write_response(&get_dog::REX, "Query").unwrap();
    store
        .write_response(&get_dog::response("2", "Fido"), "Query")
        .unwrap();

    assert_eq!(changes.next().await, Some(keys(&["Dog:1"])));
    assert_eq!(changes.next().await, Some(keys(&["Query", "Dog:2"])));

    drop(store);
    assert_eq!(changes.next().await, None);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn change_stream_across_tasks() {
    let store = Store::default();
    let changes = store.changes();

    let tasks: Vec<_> = (0..4)
        .map(|i| {
            let store = store.clone();
            tokio::spawn(async move {
                store
                    .write_response(&get_dog::dog_json(&i.to_string(), "Rex"), "Query")
                    .unwrap()
            })
        })
        .collect();
    for task in tasks {
        task.await.unwrap();
    }
    drop(store);

    let mut seen: Vec<_> = changes
        .map(|changed| changed.into_iter().collect::<Vec<_>>())
        .concat()
        .await;
    seen.sort();
    assert_eq!(seen, vec!["Dog:0", "Dog:1", "Dog:2", "Dog:3"]);
}

#[tokio::test]
async fn dropped_receivers_are_pruned() {
    let store = Store::default();
    let first = store.changes();
    let mut second = store.changes();
    drop(first);

    store.write_response(&get_dog::REX, "Query").unwrap();
    assert_eq!(second.next().await, Some(keys(&["Dog:1"])));
}
