use std::sync::Arc;

use docstore::DocumentStore;
use time::{Duration, UtcOffset};
use tracing::info;

use crate::{
    activity::{ActivityFeed, FeedSettings},
    bookings::{release_hold, BookingService},
    cancellation::CancellationService,
    clock::Clock,
    context::Context,
    docs,
    error::{RideError, Result},
    identity::{Session, StoreUserDirectory},
    model::{Booking, PostingId, PostingKind, BOOKINGS},
    postings::{PostingSettings, PostingStore, SeatEditPolicy},
    retry::RetryPolicy,
    sweep::ConsistencySweep,
};

/// Tunables shared by the services.
#[derive(Debug, Clone)]
pub struct ServiceSettings {
    pub seat_edit: SeatEditPolicy,
    pub display_offset: UtcOffset,
    pub feed_expiry: Duration,
    pub sweep_grace: Duration,
}

impl Default for ServiceSettings {
    fn default() -> Self {
        Self {
            seat_edit: SeatEditPolicy::default(),
            display_offset: UtcOffset::UTC,
            feed_expiry: Duration::hours(24),
            sweep_grace: Duration::minutes(10),
        }
    }
}

impl ServiceSettings {
    fn postings(&self) -> PostingSettings {
        PostingSettings {
            seat_edit: self.seat_edit,
            display_offset: self.display_offset,
        }
    }

    fn feed(&self) -> FeedSettings {
        FeedSettings {
            expiry: self.feed_expiry,
            display_offset: self.display_offset,
        }
    }
}

/// Entry point wiring every service to one store, session and clock.
#[derive(Clone)]
pub struct RideService {
    ctx: Context,
    settings: ServiceSettings,
    users: StoreUserDirectory,
}

impl RideService {
    pub fn new(
        store: Arc<dyn DocumentStore>,
        session: Arc<dyn Session>,
        clock: Arc<dyn Clock>,
        retry: RetryPolicy,
        settings: ServiceSettings,
    ) -> Self {
        let users = StoreUserDirectory::new(store.clone());
        Self {
            ctx: Context::new(store, session, clock, retry),
            settings,
            users,
        }
    }

    /// The same services acting for another session.
    pub fn with_session(&self, session: Arc<dyn Session>) -> Self {
        Self {
            ctx: self.ctx.with_session(session),
            ..self.clone()
        }
    }

    pub fn postings(&self) -> PostingStore {
        PostingStore::new(self.ctx.clone(), self.settings.postings())
    }

    pub fn bookings(&self) -> BookingService {
        BookingService::new(self.ctx.clone())
    }

    pub fn cancellations(&self) -> CancellationService {
        CancellationService::new(self.ctx.clone())
    }

    pub fn activity(&self) -> ActivityFeed {
        ActivityFeed::new(
            self.ctx.clone(),
            Arc::new(self.users.clone()),
            self.settings.feed(),
        )
    }

    pub fn users(&self) -> &StoreUserDirectory {
        &self.users
    }

    pub fn sweep(&self) -> ConsistencySweep {
        ConsistencySweep::new(
            self.ctx.clone(),
            self.settings.feed(),
            self.settings.sweep_grace,
        )
    }

    /// Cancel every outstanding booking of a posting, then delete it.
    /// Returns the number of bookings cancelled.
    pub async fn delete_posting_cascade(&self, id: &PostingId, kind: PostingKind) -> Result<usize> {
        let caller = self.ctx.caller()?;
        let postings = self.postings();
        let ride = postings.get_posting(id, kind).await?.into_ride();
        if ride.owner_id != caller {
            return Err(RideError::Forbidden);
        }

        let store = self.ctx.store.as_ref();
        let bookings: Vec<Booking> =
            docs::query(store, BOOKINGS, "posting_id", id.as_str()).await?;
        let cancellations = self.cancellations();
        let mut cancelled = 0;
        for booking in bookings.iter().filter(|b| b.posting_kind == kind) {
            match cancellations.cancel_booking(&booking.id, None).await {
                Ok(()) => cancelled += 1,
                Err(RideError::NotFound("booking")) => {}
                Err(err) => return Err(err),
            }
        }

        // Holds whose booking record never landed.
        let path = docs::path(kind.collection(), id.as_str())?;
        for booking_id in ride.holds.keys() {
            release_hold(store, &path, booking_id).await?;
        }

        postings.delete_posting(id, kind).await?;
        info!(posting_id = %id, %kind, cancelled, "posting deleted with its bookings");
        Ok(cancelled)
    }
}
