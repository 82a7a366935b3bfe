//! Typed access to JSON documents.

use docstore::{DocPath, DocumentStore};
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;

use crate::error::Result;

pub(crate) fn path(collection: &str, key: &str) -> Result<DocPath> {
    Ok(DocPath::new(collection, key)?)
}

pub(crate) fn encode<T: Serialize>(value: &T) -> Result<Value> {
    Ok(serde_json::to_value(value)?)
}

pub(crate) fn decode<T: DeserializeOwned>(value: Value) -> Result<T> {
    Ok(serde_json::from_value(value)?)
}

pub(crate) async fn load<T: DeserializeOwned>(
    store: &dyn DocumentStore,
    path: &DocPath,
) -> Result<Option<T>> {
    store.read(path).await?.map(decode).transpose()
}

/// Documents of `collection` whose string `field` equals `value`.
pub(crate) async fn query<T: DeserializeOwned>(
    store: &dyn DocumentStore,
    collection: &str,
    field: &str,
    value: &str,
) -> Result<Vec<T>> {
    store
        .query_equal(collection, field, &Value::from(value))
        .await?
        .into_iter()
        .map(|(_, doc)| decode(doc))
        .collect()
}

pub(crate) async fn list<T: DeserializeOwned>(
    store: &dyn DocumentStore,
    collection: &str,
) -> Result<Vec<T>> {
    store
        .list(collection)
        .await?
        .into_iter()
        .map(|(_, doc)| decode(doc))
        .collect()
}
