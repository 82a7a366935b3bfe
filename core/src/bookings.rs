//! Seat reservation against offers and requests.
//!
//! A booking is a two-record saga: an atomic seat deduction on the posting
//! (which also records a hold keyed by the booking id) followed by the
//! booking record itself. The hold lets a retried saga recognise a
//! deduction that already committed, and lets the sweep find deductions
//! whose booking record never landed.

use docstore::{DocPath, DocumentStore, Outcome, Update};
use time::OffsetDateTime;
use tracing::{error, info, warn};

use crate::{
    context::Context,
    docs,
    error::{RideError, Result},
    model::{Booking, BookingId, PostingId, PostingKind, Ride, SeatHold, UserId, BOOKINGS},
    postings::set,
    retry::retry_transient,
};

#[derive(Clone)]
pub struct BookingService {
    ctx: Context,
}

impl BookingService {
    pub fn new(ctx: Context) -> Self {
        Self { ctx }
    }

    /// Deduct `seat_count` seats from a posting and record the booking.
    ///
    /// Fails with [`RideError::InsufficientSeats`] without touching the
    /// posting when fewer seats remain than requested.
    pub async fn book_seats(
        &self,
        posting_id: &PostingId,
        kind: PostingKind,
        rider_id: &UserId,
        seat_count: u32,
    ) -> Result<BookingId> {
        let rider = self.ctx.require_identity(rider_id)?;
        if seat_count == 0 {
            return Err(RideError::Invalid("seat count must be at least 1".into()));
        }
        let booking_id = BookingId::new(self.ctx.store.generate_key());
        let saga = Saga {
            store: self.ctx.store.as_ref(),
            posting_path: docs::path(kind.collection(), posting_id.as_str())?,
            booking_path: docs::path(BOOKINGS, booking_id.as_str())?,
            booking_id: &booking_id,
            posting_id,
            kind,
            rider: &rider,
            seats: seat_count,
            now: self.ctx.clock.now(),
        };
        retry_transient(&self.ctx.retry, || saga.run()).await?;
        info!(
            %booking_id,
            %posting_id,
            %kind,
            rider_id = %rider,
            seats = seat_count,
            "seats booked"
        );
        Ok(booking_id)
    }
}

struct Saga<'a> {
    store: &'a dyn DocumentStore,
    posting_path: DocPath,
    booking_path: DocPath,
    booking_id: &'a BookingId,
    posting_id: &'a PostingId,
    kind: PostingKind,
    rider: &'a UserId,
    seats: u32,
    now: OffsetDateTime,
}

impl Saga<'_> {
    async fn run(&self) -> Result<()> {
        let provider = self.deduct().await?;
        let booking = Booking {
            id: self.booking_id.clone(),
            posting_id: self.posting_id.clone(),
            posting_kind: self.kind,
            rider_id: self.rider.clone(),
            provider_id: provider,
            kind: self.kind.booking_kind(),
            seats: self.seats,
            created_at: self.now,
        };
        let written = match docs::encode(&booking) {
            Ok(doc) => self.store.write(&self.booking_path, doc).await.map_err(RideError::from),
            Err(err) => Err(err),
        };
        match written {
            Ok(()) => Ok(()),
            Err(err) => {
                warn!(
                    booking_id = %self.booking_id,
                    error = %err,
                    "booking write failed, releasing seat hold"
                );
                self.compensate().await?;
                Err(err)
            }
        }
    }

    /// Take the seats, or confirm an earlier attempt already took them.
    /// Returns the posting owner.
    async fn deduct(&self) -> Result<UserId> {
        let requested = self.seats;
        let mut rejection: Option<RideError> = None;
        let mut provider: Option<UserId> = None;

        let outcome = self
            .store
            .transact(&self.posting_path, &mut |current| {
                rejection = None;
                provider = None;
                let Some(doc) = current else {
                    rejection = Some(RideError::NotFound("posting"));
                    return Update::Abort;
                };
                let mut ride: Ride = match docs::decode(doc.clone()) {
                    Ok(ride) => ride,
                    Err(err) => {
                        rejection = Some(err);
                        return Update::Abort;
                    }
                };
                if &ride.owner_id == self.rider {
                    rejection = Some(RideError::Forbidden);
                    return Update::Abort;
                }
                provider = Some(ride.owner_id.clone());
                if ride.holds.contains_key(self.booking_id) {
                    // Committed by an earlier attempt of this saga.
                    return Update::Abort;
                }
                if requested > ride.seats {
                    rejection = Some(RideError::InsufficientSeats {
                        requested,
                        available: ride.seats,
                    });
                    return Update::Abort;
                }
                ride.seats -= requested;
                ride.holds.insert(
                    self.booking_id.clone(),
                    SeatHold {
                        seats: requested,
                        held_at: self.now,
                    },
                );
                set(&ride, &mut rejection)
            })
            .await?;

        match (outcome, rejection, provider) {
            (_, Some(err), _) => {
                warn!(posting_id = %self.posting_id, error = %err, "seat deduction rejected");
                Err(err)
            }
            (Outcome::Committed(_), None, Some(provider)) => Ok(provider),
            (Outcome::Aborted, None, Some(provider)) => {
                info!(booking_id = %self.booking_id, "seat hold already committed");
                Ok(provider)
            }
            (_, None, None) => Err(RideError::NotFound("posting")),
        }
    }

    async fn compensate(&self) -> Result<()> {
        // The write may have landed even though it reported failure.
        let _ = self.store.delete(&self.booking_path).await;
        match release_hold(self.store, &self.posting_path, self.booking_id).await {
            Ok(_) => Ok(()),
            Err(err) => {
                error!(
                    booking_id = %self.booking_id,
                    posting_id = %self.posting_id,
                    error = %err,
                    "could not release seat hold after failed booking write"
                );
                Err(RideError::InconsistentState(format!(
                    "seats held for booking {} without a booking record",
                    self.booking_id
                )))
            }
        }
    }
}

/// Return a hold's seats to its posting and drop the hold, atomically.
///
/// Returns the released seat count, or `None` when the posting or the hold
/// no longer exists.
pub(crate) async fn release_hold(
    store: &dyn DocumentStore,
    posting_path: &DocPath,
    booking_id: &BookingId,
) -> Result<Option<u32>> {
    let mut released = None;
    let mut failure: Option<RideError> = None;
    let outcome = store
        .transact(posting_path, &mut |current| {
            released = None;
            failure = None;
            let Some(doc) = current else {
                return Update::Abort;
            };
            let mut ride: Ride = match docs::decode(doc.clone()) {
                Ok(ride) => ride,
                Err(err) => {
                    failure = Some(err);
                    return Update::Abort;
                }
            };
            let Some(hold) = ride.holds.remove(booking_id) else {
                return Update::Abort;
            };
            ride.seats += hold.seats;
            released = Some(hold.seats);
            set(&ride, &mut failure)
        })
        .await?;
    if let Some(err) = failure {
        return Err(err);
    }
    Ok(if outcome.is_committed() { released } else { None })
}
