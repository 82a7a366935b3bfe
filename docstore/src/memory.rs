use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::broadcast;

use crate::{
    field_equals, Change, DocPath, DocumentStore, Outcome, StoreError, Subscription, Update,
    UpdateFn, CHANGE_CAPACITY,
};

/// In-process store. Every mutation is serialized by a single lock, which
/// makes `transact` trivially atomic.
pub struct MemoryStore {
    docs: Mutex<HashMap<String, BTreeMap<String, Value>>>,
    changes: broadcast::Sender<Change>,
}

impl MemoryStore {
    pub fn new() -> Self {
        let (changes, _rx) = broadcast::channel(CHANGE_CAPACITY);
        Self {
            docs: Mutex::new(HashMap::new()),
            changes,
        }
    }

    fn publish(&self, path: &DocPath, value: Option<Value>) {
        // no subscribers is fine
        let _ = self.changes.send(Change {
            path: path.clone(),
            value,
        });
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn read(&self, path: &DocPath) -> Result<Option<Value>, StoreError> {
        let docs = self.docs.lock();
        Ok(docs
            .get(path.collection())
            .and_then(|c| c.get(path.key()))
            .cloned())
    }

    async fn write(&self, path: &DocPath, value: Value) -> Result<(), StoreError> {
        self.docs
            .lock()
            .entry(path.collection().to_string())
            .or_default()
            .insert(path.key().to_string(), value.clone());
        self.publish(path, Some(value));
        Ok(())
    }

    async fn delete(&self, path: &DocPath) -> Result<(), StoreError> {
        let removed = self
            .docs
            .lock()
            .get_mut(path.collection())
            .and_then(|c| c.remove(path.key()));
        if removed.is_some() {
            self.publish(path, None);
        }
        Ok(())
    }

    async fn transact(
        &self,
        path: &DocPath,
        update: &mut UpdateFn<'_>,
    ) -> Result<Outcome, StoreError> {
        let outcome = {
            let mut docs = self.docs.lock();
            let collection = docs.entry(path.collection().to_string()).or_default();
            match update(collection.get(path.key())) {
                Update::Abort => Outcome::Aborted,
                Update::Set(value) => {
                    collection.insert(path.key().to_string(), value.clone());
                    Outcome::Committed(Some(value))
                }
                Update::Remove => {
                    collection.remove(path.key());
                    Outcome::Committed(None)
                }
            }
        };
        if let Outcome::Committed(value) = &outcome {
            self.publish(path, value.clone());
        }
        Ok(outcome)
    }

    async fn list(&self, collection: &str) -> Result<Vec<(String, Value)>, StoreError> {
        let docs = self.docs.lock();
        Ok(docs
            .get(collection)
            .map(|c| c.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
            .unwrap_or_default())
    }

    async fn query_equal(
        &self,
        collection: &str,
        field: &str,
        value: &Value,
    ) -> Result<Vec<(String, Value)>, StoreError> {
        let docs = self.docs.lock();
        Ok(docs
            .get(collection)
            .map(|c| {
                c.iter()
                    .filter(|(_, doc)| field_equals(doc, field, value))
                    .map(|(k, v)| (k.clone(), v.clone()))
                    .collect()
            })
            .unwrap_or_default())
    }

    fn subscribe(&self, collection: &str) -> Subscription {
        Subscription::new(collection, self.changes.subscribe())
    }
}
