#![allow(dead_code)]

use std::sync::{
    atomic::{AtomicBool, AtomicUsize, Ordering},
    Arc, OnceLock,
};

use async_trait::async_trait;
use docstore::{
    DocPath, DocumentStore, MemoryStore, Outcome, StoreError, Subscription, UpdateFn,
};
use ridecore::{
    model::{PostingId, PostingKind, Ride},
    ConsistencySweep, FixedClock, PostingDraft, RetryPolicy, RideService, ServiceSettings, StaticSession,
};
use serde_json::Value;
use time::{macros::datetime, OffsetDateTime};

pub const START: OffsetDateTime = datetime!(2024-02-01 12:00 UTC);
pub const RIDE_AT: OffsetDateTime = datetime!(2024-02-02 15:00 UTC);

pub struct Harness {
    pub service: RideService,
    pub clock: Arc<FixedClock>,
}

impl Harness {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        let clock = Arc::new(FixedClock::new(START));
        let service = RideService::new(
            store,
            Arc::new(StaticSession::signed_out()),
            clock.clone(),
            RetryPolicy::immediate(3),
            ServiceSettings::default(),
        );
        Self { service, clock }
    }

    pub fn memory() -> Self {
        Self::new(Arc::new(MemoryStore::new()))
    }

    pub fn as_user(&self, user: &str) -> RideService {
        self.service
            .with_session(Arc::new(StaticSession::signed_in(user)))
    }

    pub async fn offer(&self, owner: &str, seats: u32) -> PostingId {
        self.as_user(owner)
            .postings()
            .create_posting(
                PostingKind::Offer,
                &owner.into(),
                PostingDraft {
                    origin: "North Campus".into(),
                    destination: "Airport".into(),
                    scheduled_at: RIDE_AT,
                    seats,
                    donation: "$10".into(),
                    info: String::new(),
                },
            )
            .await
            .unwrap()
    }

    pub async fn ride(&self, id: &PostingId) -> Ride {
        self.service
            .postings()
            .get_posting(id, PostingKind::Offer)
            .await
            .unwrap()
            .into_ride()
    }
}

/// Which store calls fail and how.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    Transient,
    Permanent,
}

impl Fault {
    fn error(self) -> StoreError {
        match self {
            Fault::Transient => StoreError::Unavailable("injected".into()),
            Fault::Permanent => StoreError::InvalidPath("injected".into()),
        }
    }
}

/// Wraps a store and fails a configured number of calls.
pub struct FlakyStore {
    inner: MemoryStore,
    collection: String,
    fault: Fault,
    failing_writes: AtomicUsize,
    /// Transactions allowed before every further one fails.
    transact_budget: AtomicUsize,
}

impl FlakyStore {
    /// Fail the next `writes` writes into `collection`.
    pub fn failing_writes(collection: &str, writes: usize, fault: Fault) -> Self {
        Self {
            inner: MemoryStore::new(),
            collection: collection.to_string(),
            fault,
            failing_writes: AtomicUsize::new(writes),
            transact_budget: AtomicUsize::new(usize::MAX),
        }
    }

    pub fn fail_next_writes(&self, writes: usize) {
        self.failing_writes.store(writes, Ordering::SeqCst);
    }

    pub fn limit_transacts(&self, budget: usize) {
        self.transact_budget.store(budget, Ordering::SeqCst);
    }

    pub fn heal(&self) {
        self.failing_writes.store(0, Ordering::SeqCst);
        self.transact_budget.store(usize::MAX, Ordering::SeqCst);
    }

    fn take(counter: &AtomicUsize) -> bool {
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

#[async_trait]
impl DocumentStore for FlakyStore {
    async fn read(&self, path: &DocPath) -> Result<Option<Value>, StoreError> {
        self.inner.read(path).await
    }

    async fn write(&self, path: &DocPath, value: Value) -> Result<(), StoreError> {
        if path.collection() == self.collection && Self::take(&self.failing_writes) {
            return Err(self.fault.error());
        }
        self.inner.write(path, value).await
    }

    async fn delete(&self, path: &DocPath) -> Result<(), StoreError> {
        self.inner.delete(path).await
    }

    async fn transact(
        &self,
        path: &DocPath,
        update: &mut UpdateFn<'_>,
    ) -> Result<Outcome, StoreError> {
        if !Self::take(&self.transact_budget) {
            return Err(self.fault.error());
        }
        self.inner.transact(path, update).await
    }

    async fn list(&self, collection: &str) -> Result<Vec<(String, Value)>, StoreError> {
        self.inner.list(collection).await
    }

    async fn query_equal(
        &self,
        collection: &str,
        field: &str,
        value: &Value,
    ) -> Result<Vec<(String, Value)>, StoreError> {
        self.inner.query_equal(collection, field, value).await
    }

    fn subscribe(&self, collection: &str) -> Subscription {
        self.inner.subscribe(collection)
    }
}

/// Runs a consistency sweep once, right after the first booking document
/// is removed by a transaction.
pub struct SweepAfterClaim {
    inner: MemoryStore,
    sweep: OnceLock<ConsistencySweep>,
    fired: AtomicBool,
    pub report: parking_lot::Mutex<Option<ridecore::SweepReport>>,
}

impl SweepAfterClaim {
    pub fn new() -> Self {
        Self {
            inner: MemoryStore::new(),
            sweep: OnceLock::new(),
            fired: AtomicBool::new(false),
            report: parking_lot::Mutex::new(None),
        }
    }

    pub fn arm(&self, sweep: ConsistencySweep) {
        let _ = self.sweep.set(sweep);
    }
}

#[async_trait]
impl DocumentStore for SweepAfterClaim {
    async fn read(&self, path: &DocPath) -> Result<Option<Value>, StoreError> {
        self.inner.read(path).await
    }

    async fn write(&self, path: &DocPath, value: Value) -> Result<(), StoreError> {
        self.inner.write(path, value).await
    }

    async fn delete(&self, path: &DocPath) -> Result<(), StoreError> {
        self.inner.delete(path).await
    }

    async fn transact(
        &self,
        path: &DocPath,
        update: &mut UpdateFn<'_>,
    ) -> Result<Outcome, StoreError> {
        let outcome = self.inner.transact(path, update).await?;
        let claimed = path.collection() == "bookings" && matches!(outcome, Outcome::Committed(None));
        if claimed {
            if let Some(sweep) = self.sweep.get() {
                if !self.fired.swap(true, Ordering::SeqCst) {
                    let report = sweep.run_once().await.expect("sweep");
                    *self.report.lock() = Some(report);
                }
            }
        }
        Ok(outcome)
    }

    async fn list(&self, collection: &str) -> Result<Vec<(String, Value)>, StoreError> {
        self.inner.list(collection).await
    }

    async fn query_equal(
        &self,
        collection: &str,
        field: &str,
        value: &Value,
    ) -> Result<Vec<(String, Value)>, StoreError> {
        self.inner.query_equal(collection, field, value).await
    }

    fn subscribe(&self, collection: &str) -> Subscription {
        self.inner.subscribe(collection)
    }
}
