use docstore::Update;
use time::OffsetDateTime;
use tracing::{error, info, warn};

use crate::{
    context::Context,
    docs,
    error::{RideError, Result},
    model::{Booking, BookingId, Notice, NoticeId, Ride, UserId, BOOKINGS, NOTICES},
    postings::set,
    retry::retry_transient,
};

#[derive(Clone)]
pub struct CancellationService {
    ctx: Context,
}

impl CancellationService {
    pub fn new(ctx: Context) -> Self {
        Self { ctx }
    }

    /// Cancel a booking, return seats to its posting and notify both
    /// participants.
    ///
    /// `seats_to_restore` defaults to the seats recorded on the booking. An
    /// explicit value is applied as given.
    pub async fn cancel_booking(
        &self,
        booking_id: &BookingId,
        seats_to_restore: Option<u32>,
    ) -> Result<()> {
        let caller = self.ctx.caller()?;
        let store = self.ctx.store.as_ref();
        let booking_path = docs::path(BOOKINGS, booking_id.as_str())?;
        let booking = retry_transient(&self.ctx.retry, || {
            docs::load::<Booking>(store, &booking_path)
        })
        .await?
        .ok_or(RideError::NotFound("booking"))?;
        if !booking.involves(&caller) {
            return Err(RideError::Forbidden);
        }

        let posting_path = docs::path(
            booking.posting_kind.collection(),
            booking.posting_id.as_str(),
        )?;
        let posting: Option<Ride> =
            retry_transient(&self.ctx.retry, || docs::load(store, &posting_path)).await?;
        if posting.is_none() {
            return Err(RideError::NotFound("posting"));
        }

        // Claim the booking first so a concurrent cancel cannot restore twice.
        let claimed = store
            .transact(&booking_path, &mut |current| match current {
                Some(_) => Update::Remove,
                None => Update::Abort,
            })
            .await?;
        if !claimed.is_committed() {
            return Err(RideError::NotFound("booking"));
        }

        let restore = seats_to_restore.unwrap_or(booking.seats);
        if restore != booking.seats {
            warn!(
                %booking_id,
                booked = booking.seats,
                restoring = restore,
                "restoring a different seat count than was booked"
            );
        }

        let ride_at = match self.restore_seats(&booking, restore).await {
            Ok(Some(at)) => at,
            Ok(None) => {
                warn!(
                    %booking_id,
                    posting_id = %booking.posting_id,
                    "posting vanished during cancellation"
                );
                return Err(RideError::NotFound("posting"));
            }
            Err(err) => {
                warn!(%booking_id, error = %err, "seat restore failed, reinstating booking");
                return match self.reinstate(&booking).await {
                    Ok(()) => Err(err),
                    Err(_) => {
                        error!(%booking_id, "booking removed but seats not restored");
                        Err(RideError::InconsistentState(format!(
                            "booking {booking_id} removed without restoring {restore} seats"
                        )))
                    }
                };
            }
        };

        let now = self.ctx.clock.now();
        for (recipient, counterpart) in [
            (&booking.rider_id, &booking.provider_id),
            (&booking.provider_id, &booking.rider_id),
        ] {
            if let Err(err) = self
                .notify(&booking, recipient, counterpart, ride_at, restore, now)
                .await
            {
                error!(
                    %booking_id,
                    recipient_id = %recipient,
                    error = %err,
                    "cancellation notice not written"
                );
                return Err(RideError::InconsistentState(format!(
                    "booking {booking_id} cancelled but {recipient} was not notified"
                )));
            }
        }

        info!(
            %booking_id,
            posting_id = %booking.posting_id,
            seats = restore,
            cancelled_by = %caller,
            "booking cancelled"
        );
        Ok(())
    }

    /// Add the seats back and drop the booking's hold in one update.
    /// Returns the ride time, or `None` if the posting is gone.
    ///
    /// Seats are only added while the hold is still present. A missing hold
    /// means its seats were already returned, e.g. by the consistency sweep.
    async fn restore_seats(
        &self,
        booking: &Booking,
        restore: u32,
    ) -> Result<Option<OffsetDateTime>> {
        let path = docs::path(booking.posting_kind.collection(), booking.posting_id.as_str())?;
        let mut failure: Option<RideError> = None;
        let mut ride_at = None;
        let outcome = self
            .ctx
            .store
            .transact(&path, &mut |current| {
                failure = None;
                ride_at = None;
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
                ride_at = Some(ride.scheduled_at);
                if ride.holds.remove(&booking.id).is_none() {
                    return Update::Abort;
                }
                ride.seats = ride.seats.saturating_add(restore);
                set(&ride, &mut failure)
            })
            .await?;
        if let Some(err) = failure {
            return Err(err);
        }
        if !outcome.is_committed() && ride_at.is_some() {
            info!(booking_id = %booking.id, "seat hold already released");
        }
        Ok(ride_at)
    }

    async fn reinstate(&self, booking: &Booking) -> Result<()> {
        let path = docs::path(BOOKINGS, booking.id.as_str())?;
        let doc = docs::encode(booking)?;
        let store = self.ctx.store.as_ref();
        retry_transient(&self.ctx.retry, || {
            let doc = doc.clone();
            let path = &path;
            async move { Ok(store.write(path, doc).await?) }
        })
        .await
    }

    async fn notify(
        &self,
        booking: &Booking,
        recipient: &UserId,
        counterpart: &UserId,
        ride_at: OffsetDateTime,
        seats: u32,
        now: OffsetDateTime,
    ) -> Result<()> {
        let notice = Notice {
            id: NoticeId::new(self.ctx.store.generate_key()),
            recipient_id: recipient.clone(),
            counterpart_id: counterpart.clone(),
            booking_id: booking.id.clone(),
            posting_id: booking.posting_id.clone(),
            posting_kind: booking.posting_kind,
            ride_at: Some(ride_at),
            seats,
            created_at: now,
        };
        let path = docs::path(NOTICES, notice.id.as_str())?;
        let doc = docs::encode(&notice)?;
        let store = self.ctx.store.as_ref();
        retry_transient(&self.ctx.retry, || {
            let doc = doc.clone();
            let path = &path;
            async move { Ok(store.write(path, doc).await?) }
        })
        .await
    }
}
