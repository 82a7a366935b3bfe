use std::sync::Arc;

use docstore::{DocPath, DocumentStore, MemoryStore, Outcome, SqliteStore, Update};
use serde_json::{json, Value};

fn decrement(current: Option<&Value>) -> Update {
    let Some(doc) = current else {
        return Update::Abort;
    };
    let seats = doc["seats"].as_u64().unwrap_or(0);
    if seats == 0 {
        return Update::Abort;
    }
    Update::Set(json!({ "seats": seats - 1 }))
}

async fn race_for_seats(store: Arc<dyn DocumentStore>) {
    let path: DocPath = "offers/ride".parse().unwrap();
    store.write(&path, json!({"seats": 5})).await.unwrap();

    let mut handles = Vec::new();
    for _ in 0..20 {
        let store = store.clone();
        let path = path.clone();
        handles.push(tokio::spawn(async move {
            store.transact(&path, &mut decrement).await.unwrap()
        }));
    }
    let mut committed = 0;
    for h in handles {
        if h.await.unwrap().is_committed() {
            committed += 1;
        }
    }
    assert_eq!(committed, 5);
    assert_eq!(store.read(&path).await.unwrap(), Some(json!({"seats": 0})));
    assert_eq!(
        store.transact(&path, &mut decrement).await.unwrap(),
        Outcome::Aborted
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn memory_store_never_oversells() {
    race_for_seats(Arc::new(MemoryStore::new())).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn sqlite_store_never_oversells() {
    let dir = tempfile::tempdir().unwrap();
    let store = SqliteStore::open(dir.path().join("race.db")).unwrap();
    race_for_seats(Arc::new(store)).await;
}

#[tokio::test]
async fn subscribers_see_transactions() {
    let store = SqliteStore::in_memory().unwrap();
    let mut sub = store.subscribe("offers");
    let path: DocPath = "offers/ride".parse().unwrap();
    store
        .transact(&path, &mut |_| Update::Set(json!({"seats": 2})))
        .await
        .unwrap();
    let change = sub.changed().await.unwrap();
    assert_eq!(change.path, path);
    assert_eq!(change.value, Some(json!({"seats": 2})));
}
