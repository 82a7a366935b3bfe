//! Minimal document store used by the ride service.
//!
//! Documents are JSON values addressed by `collection/key`. Every mutation is
//! published to subscribers of its collection, and [`DocumentStore::transact`]
//! is the compare-and-swap primitive used for contended fields.

pub mod error;
pub mod memory;
pub mod path;
pub mod sqlite;

pub use error::StoreError;
pub use memory::MemoryStore;
pub use path::DocPath;
pub use sqlite::SqliteStore;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::broadcast::{self, error::RecvError};

/// Result of a transactional update function.
#[derive(Debug, Clone, PartialEq)]
pub enum Update {
    /// Replace the document with this value.
    Set(Value),
    /// Remove the document.
    Remove,
    /// Leave the document untouched and report [`Outcome::Aborted`].
    Abort,
}

/// Outcome of [`DocumentStore::transact`].
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    /// The update was applied; carries the new value (`None` when removed).
    Committed(Option<Value>),
    /// The update function aborted.
    Aborted,
}

impl Outcome {
    pub fn is_committed(&self) -> bool {
        matches!(self, Outcome::Committed(_))
    }
}

/// A committed mutation of a single document.
#[derive(Debug, Clone, PartialEq)]
pub struct Change {
    pub path: DocPath,
    /// New value, or `None` when the document was deleted.
    pub value: Option<Value>,
}

/// Function applied by [`DocumentStore::transact`]. It may run more than once.
pub type UpdateFn<'a> = dyn FnMut(Option<&Value>) -> Update + Send + 'a;

/// Narrow interface over a hierarchical document database.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Read a document.
    async fn read(&self, path: &DocPath) -> Result<Option<Value>, StoreError>;

    /// Unconditionally overwrite a document.
    async fn write(&self, path: &DocPath, value: Value) -> Result<(), StoreError>;

    /// Delete a document. Deleting an absent document is not an error.
    async fn delete(&self, path: &DocPath) -> Result<(), StoreError>;

    /// Atomically read-modify-write a single document.
    async fn transact(
        &self,
        path: &DocPath,
        update: &mut UpdateFn<'_>,
    ) -> Result<Outcome, StoreError>;

    /// All documents of a collection in key order.
    async fn list(&self, collection: &str) -> Result<Vec<(String, Value)>, StoreError>;

    /// Documents whose top-level `field` equals `value`.
    async fn query_equal(
        &self,
        collection: &str,
        field: &str,
        value: &Value,
    ) -> Result<Vec<(String, Value)>, StoreError>;

    /// Live change feed for one collection.
    fn subscribe(&self, collection: &str) -> Subscription;

    /// Fresh unique key for a new document.
    fn generate_key(&self) -> String {
        uuid::Uuid::new_v4().simple().to_string()
    }
}

/// Receives the changes committed to one collection.
pub struct Subscription {
    collection: String,
    rx: broadcast::Receiver<Change>,
}

impl Subscription {
    pub(crate) fn new(collection: &str, rx: broadcast::Receiver<Change>) -> Self {
        Self {
            collection: collection.to_string(),
            rx,
        }
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }

    /// Wait for the next change in the subscribed collection.
    ///
    /// Returns `None` once the store has been dropped. A lagging receiver
    /// skips the changes it missed and continues with the oldest retained one.
    pub async fn changed(&mut self) -> Option<Change> {
        loop {
            match self.rx.recv().await {
                Ok(change) if change.path.collection() == self.collection => return Some(change),
                Ok(_) => continue,
                Err(RecvError::Lagged(skipped)) => {
                    tracing::debug!(collection = %self.collection, skipped, "subscription lagged");
                    continue;
                }
                Err(RecvError::Closed) => return None,
            }
        }
    }
}

pub(crate) const CHANGE_CAPACITY: usize = 256;

/// Compare a document field against an expected value.
pub(crate) fn field_equals(doc: &Value, field: &str, value: &Value) -> bool {
    doc.get(field).map(|v| v == value).unwrap_or(false)
}
