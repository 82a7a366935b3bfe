use std::{path::Path, time::Duration};

use async_trait::async_trait;
use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{params, OptionalExtension, TransactionBehavior};
use serde_json::Value;
use tokio::{
    runtime::{Handle, RuntimeFlavor},
    sync::broadcast,
};

use crate::{
    Change, DocPath, DocumentStore, Outcome, StoreError, Subscription, Update, UpdateFn,
    CHANGE_CAPACITY,
};

pub const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS documents (
  collection TEXT NOT NULL,
  key TEXT NOT NULL,
  body TEXT NOT NULL,
  PRIMARY KEY (collection, key)
);
"#;

const POOL_SIZE: u32 = 8;

type SqlitePool = Pool<SqliteConnectionManager>;

/// Durable store backed by a single SQLite table.
pub struct SqliteStore {
    pool: SqlitePool,
    changes: broadcast::Sender<Change>,
}

impl SqliteStore {
    /// Open (or create) a database file and run migrations.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StoreError> {
        let manager = SqliteConnectionManager::file(path).with_init(|conn| {
            conn.busy_timeout(Duration::from_secs(5))?;
            conn.execute_batch("PRAGMA journal_mode = WAL;")
        });
        let pool = Pool::builder().max_size(POOL_SIZE).build(manager)?;
        Self::with_pool(pool)
    }

    /// Private in-memory database. Uses one pooled connection so every caller
    /// sees the same data.
    pub fn in_memory() -> Result<Self, StoreError> {
        let pool = Pool::builder()
            .max_size(1)
            .build(SqliteConnectionManager::memory())?;
        Self::with_pool(pool)
    }

    fn with_pool(pool: SqlitePool) -> Result<Self, StoreError> {
        pool.get()?.execute_batch(SCHEMA)?;
        let (changes, _rx) = broadcast::channel(CHANGE_CAPACITY);
        Ok(Self { pool, changes })
    }

    fn publish(&self, path: &DocPath, value: Option<Value>) {
        let _ = self.changes.send(Change {
            path: path.clone(),
            value,
        });
    }

    /// Run pooled work on tokio's blocking threads.
    async fn run_blocking<T, F>(&self, f: F) -> Result<T, StoreError>
    where
        F: FnOnce(&SqlitePool) -> Result<T, StoreError> + Send + 'static,
        T: Send + 'static,
    {
        // the pool is a shared handle, so the clone moves onto the blocking thread
        let pool = self.pool.clone();
        tokio::task::spawn_blocking(move || f(&pool)).await?
    }
}

/// Run `f` on the current thread, telling a multi-threaded runtime first so
/// it can move other tasks off this worker.
fn blocking_section<R>(f: impl FnOnce() -> R) -> R {
    match Handle::try_current() {
        Ok(handle) if handle.runtime_flavor() == RuntimeFlavor::MultiThread => {
            tokio::task::block_in_place(f)
        }
        _ => f(),
    }
}

fn read_blocking(pool: &SqlitePool, path: &DocPath) -> Result<Option<Value>, StoreError> {
    let conn = pool.get()?;
    let body: Option<String> = conn
        .query_row(
            "SELECT body FROM documents WHERE collection = ?1 AND key = ?2",
            params![path.collection(), path.key()],
            |row| row.get(0),
        )
        .optional()?;
    Ok(body.map(|b| serde_json::from_str(&b)).transpose()?)
}

fn write_blocking(pool: &SqlitePool, path: &DocPath, body: &str) -> Result<(), StoreError> {
    let conn = pool.get()?;
    conn.execute(
        "INSERT INTO documents (collection, key, body) VALUES (?1, ?2, ?3) \
         ON CONFLICT(collection, key) DO UPDATE SET body = excluded.body",
        params![path.collection(), path.key(), body],
    )?;
    Ok(())
}

fn delete_blocking(pool: &SqlitePool, path: &DocPath) -> Result<bool, StoreError> {
    let conn = pool.get()?;
    let removed = conn.execute(
        "DELETE FROM documents WHERE collection = ?1 AND key = ?2",
        params![path.collection(), path.key()],
    )?;
    Ok(removed > 0)
}

fn transact_blocking(
    pool: &SqlitePool,
    path: &DocPath,
    update: &mut UpdateFn<'_>,
) -> Result<Outcome, StoreError> {
    let mut conn = pool.get()?;
    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
    let body: Option<String> = tx
        .query_row(
            "SELECT body FROM documents WHERE collection = ?1 AND key = ?2",
            params![path.collection(), path.key()],
            |row| row.get(0),
        )
        .optional()?;
    let current: Option<Value> = body.map(|b| serde_json::from_str(&b)).transpose()?;
    let outcome = match update(current.as_ref()) {
        Update::Abort => {
            tx.rollback()?;
            return Ok(Outcome::Aborted);
        }
        Update::Set(value) => {
            tx.execute(
                "INSERT INTO documents (collection, key, body) VALUES (?1, ?2, ?3) \
                 ON CONFLICT(collection, key) DO UPDATE SET body = excluded.body",
                params![path.collection(), path.key(), serde_json::to_string(&value)?],
            )?;
            Outcome::Committed(Some(value))
        }
        Update::Remove => {
            tx.execute(
                "DELETE FROM documents WHERE collection = ?1 AND key = ?2",
                params![path.collection(), path.key()],
            )?;
            Outcome::Committed(None)
        }
    };
    tx.commit()?;
    Ok(outcome)
}

fn list_blocking(pool: &SqlitePool, collection: &str) -> Result<Vec<(String, Value)>, StoreError> {
    let conn = pool.get()?;
    let mut stmt =
        conn.prepare("SELECT key, body FROM documents WHERE collection = ?1 ORDER BY key")?;
    let rows = stmt
        .query_map([collection], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?
        .collect::<Result<Vec<_>, _>>()?;
    decode_rows(rows)
}

fn query_equal_blocking(
    pool: &SqlitePool,
    collection: &str,
    field: &str,
    value: &str,
) -> Result<Vec<(String, Value)>, StoreError> {
    if field.is_empty() || !field.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return Err(StoreError::InvalidPath(format!("{collection}.{field}")));
    }
    let conn = pool.get()?;
    let mut stmt = conn.prepare(
        "SELECT key, body FROM documents WHERE collection = ?1 \
         AND json_extract(body, ?2) = json_extract(?3, '$') ORDER BY key",
    )?;
    let rows = stmt
        .query_map(params![collection, format!("$.{field}"), value], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?
        .collect::<Result<Vec<_>, _>>()?;
    decode_rows(rows)
}

fn decode_rows(rows: Vec<(String, String)>) -> Result<Vec<(String, Value)>, StoreError> {
    rows.into_iter()
        .map(|(key, body)| -> Result<(String, Value), StoreError> {
            Ok((key, serde_json::from_str(&body)?))
        })
        .collect()
}

#[async_trait]
impl DocumentStore for SqliteStore {
    async fn read(&self, path: &DocPath) -> Result<Option<Value>, StoreError> {
        let path = path.clone();
        self.run_blocking(move |pool| read_blocking(pool, &path)).await
    }

    async fn write(&self, path: &DocPath, value: Value) -> Result<(), StoreError> {
        let body = serde_json::to_string(&value)?;
        let target = path.clone();
        self.run_blocking(move |pool| write_blocking(pool, &target, &body))
            .await?;
        self.publish(path, Some(value));
        Ok(())
    }

    async fn delete(&self, path: &DocPath) -> Result<(), StoreError> {
        let target = path.clone();
        if self
            .run_blocking(move |pool| delete_blocking(pool, &target))
            .await?
        {
            self.publish(path, None);
        }
        Ok(())
    }

    async fn transact(
        &self,
        path: &DocPath,
        update: &mut UpdateFn<'_>,
    ) -> Result<Outcome, StoreError> {
        // `update` borrows from the caller, so this cannot move to spawn_blocking.
        let outcome = blocking_section(|| transact_blocking(&self.pool, path, update))?;
        if let Outcome::Committed(value) = &outcome {
            self.publish(path, value.clone());
        }
        Ok(outcome)
    }

    async fn list(&self, collection: &str) -> Result<Vec<(String, Value)>, StoreError> {
        let collection = collection.to_string();
        self.run_blocking(move |pool| list_blocking(pool, &collection))
            .await
    }

    async fn query_equal(
        &self,
        collection: &str,
        field: &str,
        value: &Value,
    ) -> Result<Vec<(String, Value)>, StoreError> {
        let collection = collection.to_string();
        let field = field.to_string();
        let value = serde_json::to_string(value)?;
        self.run_blocking(move |pool| query_equal_blocking(pool, &collection, &field, &value))
            .await
    }

    fn subscribe(&self, collection: &str) -> Subscription {
        Subscription::new(collection, self.changes.subscribe())
    }
}
