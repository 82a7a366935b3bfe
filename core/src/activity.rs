//! Per-user activity feed and the rider's booking list.
//!
//! Both views join bookings against user profiles and postings. Joins are
//! best effort: an entry whose lookup fails is left out and logged rather
//! than failing the whole view.

use std::{cmp::Ordering, sync::Arc};

use docstore::Update;
use futures::future::{join, join_all};
use time::{Duration, OffsetDateTime, UtcOffset};
use tracing::{debug, info, warn};

use crate::{
    context::Context,
    dates::{self, UNKNOWN_DATE},
    docs,
    error::{RideError, Result},
    identity::UserDirectory,
    model::{
        ActivityEntry, ActivityKind, Booking, BookingId, BookingKind, Notice, Ride, RiderBooking,
        RiderBookings, UserId, BOOKINGS, NOTICES,
    },
    postings::set,
    retry::retry_transient,
};

const UNKNOWN_USER: &str = "Unknown User";
const UNKNOWN_NUMBER: &str = "Unknown Number";

#[derive(Debug, Clone)]
pub struct FeedSettings {
    /// Entries whose ride is further in the past than this are hidden.
    pub expiry: Duration,
    pub display_offset: UtcOffset,
}

impl Default for FeedSettings {
    fn default() -> Self {
        Self {
            expiry: Duration::hours(24),
            display_offset: UtcOffset::UTC,
        }
    }
}

impl FeedSettings {
    /// Whether a ride at `ride_at` is still recent enough to show at `now`.
    /// Rides with no known date are always shown.
    pub fn is_current(&self, ride_at: Option<OffsetDateTime>, now: OffsetDateTime) -> bool {
        ride_at.map_or(true, |at| now - at <= self.expiry)
    }

    fn date(&self, ride_at: Option<OffsetDateTime>) -> String {
        ride_at.map_or_else(
            || UNKNOWN_DATE.to_string(),
            |at| dates::long_date(at, self.display_offset),
        )
    }
}

struct Contact {
    name: String,
    phone: String,
}

#[derive(Clone)]
pub struct ActivityFeed {
    ctx: Context,
    users: Arc<dyn UserDirectory>,
    settings: FeedSettings,
}

impl ActivityFeed {
    pub fn new(ctx: Context, users: Arc<dyn UserDirectory>, settings: FeedSettings) -> Self {
        Self {
            ctx,
            users,
            settings,
        }
    }

    /// Bookings of the user's postings plus cancellation notices addressed
    /// to them, newest ride first.
    pub async fn get_activity_feed(&self, user_id: &UserId) -> Result<Vec<ActivityEntry>> {
        let user = self.ctx.require_identity(user_id)?;
        let store = self.ctx.store.as_ref();
        let retry = &self.ctx.retry;
        let (bookings, notices) = join(
            retry_transient(retry, || {
                docs::query::<Booking>(store, BOOKINGS, "provider_id", user.as_str())
            }),
            retry_transient(retry, || {
                docs::query::<Notice>(store, NOTICES, "recipient_id", user.as_str())
            }),
        )
        .await;
        let (bookings, notices) = (bookings?, notices?);

        let (booked, cancelled) = join(
            join_all(bookings.into_iter().map(|b| self.booking_entry(b))),
            join_all(notices.into_iter().map(|n| self.notice_entry(n))),
        )
        .await;

        let now = self.ctx.clock.now();
        let mut entries: Vec<ActivityEntry> = booked
            .into_iter()
            .chain(cancelled)
            .flatten()
            .filter(|e| self.settings.is_current(e.ride_at, now))
            .collect();
        entries.sort_by(|a, b| newest_first(a.ride_at, b.ride_at));
        debug!(user_id = %user, entries = entries.len(), "activity feed built");
        Ok(entries)
    }

    /// Bookings the user made, split into reservations on offers and
    /// requests they fulfilled. Earliest ride first.
    pub async fn get_rider_bookings(&self, user_id: &UserId) -> Result<RiderBookings> {
        let user = self.ctx.require_identity(user_id)?;
        let store = self.ctx.store.as_ref();
        let bookings = retry_transient(&self.ctx.retry, || {
            docs::query::<Booking>(store, BOOKINGS, "rider_id", user.as_str())
        })
        .await?;

        let joined = join_all(bookings.into_iter().map(|b| self.rider_booking(b))).await;
        let mut view = RiderBookings::default();
        for entry in joined.into_iter().flatten() {
            match entry.booking.kind {
                BookingKind::Reservation => view.reservations.push(entry),
                BookingKind::Fulfillment => view.accepted_requests.push(entry),
            }
        }
        for list in [&mut view.reservations, &mut view.accepted_requests] {
            list.sort_by_key(|b| {
                let at = b.ride.as_ref().map(|r| r.scheduled_at);
                (at.is_none(), at)
            });
        }
        Ok(view)
    }

    /// Remove an entry from the caller's feed.
    ///
    /// For a live booking this deletes the booking record and its hold
    /// WITHOUT returning seats to the posting; use
    /// [`crate::CancellationService::cancel_booking`] to give seats back.
    /// For a cancelled booking it deletes the caller's notices.
    pub async fn delete_activity_entry(&self, booking_id: &BookingId) -> Result<()> {
        let caller = self.ctx.caller()?;
        let store = self.ctx.store.as_ref();
        let path = docs::path(BOOKINGS, booking_id.as_str())?;
        let booking =
            retry_transient(&self.ctx.retry, || docs::load::<Booking>(store, &path)).await?;

        let Some(booking) = booking else {
            return self.dismiss_notices(&caller, booking_id).await;
        };
        if !booking.involves(&caller) {
            return Err(RideError::Forbidden);
        }

        let posting_path = docs::path(
            booking.posting_kind.collection(),
            booking.posting_id.as_str(),
        )?;
        let mut failure: Option<RideError> = None;
        store
            .transact(&posting_path, &mut |current| {
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
                if ride.holds.remove(booking_id).is_none() {
                    return Update::Abort;
                }
                set(&ride, &mut failure)
            })
            .await?;
        if let Some(err) = failure {
            return Err(err);
        }
        store.delete(&path).await?;
        warn!(
            %booking_id,
            posting_id = %booking.posting_id,
            seats = booking.seats,
            dismissed_by = %caller,
            "booking dismissed without restoring seats"
        );
        Ok(())
    }

    async fn dismiss_notices(&self, caller: &UserId, booking_id: &BookingId) -> Result<()> {
        let store = self.ctx.store.as_ref();
        let notices = retry_transient(&self.ctx.retry, || {
            docs::query::<Notice>(store, NOTICES, "booking_id", booking_id.as_str())
        })
        .await?;
        let mine: Vec<Notice> = notices
            .into_iter()
            .filter(|n| &n.recipient_id == caller)
            .collect();
        if mine.is_empty() {
            return Err(RideError::NotFound("booking"));
        }
        for notice in &mine {
            store.delete(&docs::path(NOTICES, notice.id.as_str())?).await?;
        }
        info!(
            %booking_id,
            user_id = %caller,
            notices = mine.len(),
            "cancellation notices dismissed"
        );
        Ok(())
    }

    async fn booking_entry(&self, booking: Booking) -> Option<ActivityEntry> {
        let (rider, ride) = join(self.contact(&booking.rider_id), self.ride(&booking)).await;
        let (rider, ride) = (rider?, ride?);
        let (kind, action) = match booking.kind {
            BookingKind::Reservation => (ActivityKind::Booked, "booked a ride from you"),
            BookingKind::Fulfillment => (ActivityKind::Fulfilled, "fulfilled your ride request"),
        };
        let ride_at = ride.map(|r| r.scheduled_at);
        Some(ActivityEntry {
            message: format!("{} ({}) {action}.", rider.name, rider.phone),
            date: self.settings.date(ride_at),
            booking_id: booking.id,
            kind,
            ride_at,
        })
    }

    async fn notice_entry(&self, notice: Notice) -> Option<ActivityEntry> {
        let other = self.contact(&notice.counterpart_id).await?;
        Some(ActivityEntry {
            message: format!("{} ({}) cancelled a booking.", other.name, other.phone),
            date: self.settings.date(notice.ride_at),
            booking_id: notice.booking_id,
            kind: ActivityKind::Cancelled,
            ride_at: notice.ride_at,
        })
    }

    async fn rider_booking(&self, booking: Booking) -> Option<RiderBooking> {
        let (provider, ride) = join(self.contact(&booking.provider_id), self.ride(&booking)).await;
        let (provider, ride) = (provider?, ride?);
        Some(RiderBooking {
            date: self.settings.date(ride.as_ref().map(|r| r.scheduled_at)),
            provider_name: provider.name,
            provider_phone: provider.phone,
            ride,
            booking,
        })
    }

    /// Name and phone of a user. Unknown users render as placeholders;
    /// `None` means the lookup itself failed.
    async fn contact(&self, id: &UserId) -> Option<Contact> {
        let users = self.users.as_ref();
        match retry_transient(&self.ctx.retry, || users.get_user(id)).await {
            Ok(user) => Some(Contact {
                name: user.display_name,
                phone: user.phone.unwrap_or_else(|| UNKNOWN_NUMBER.to_string()),
            }),
            Err(RideError::NotFound(_)) => Some(Contact {
                name: UNKNOWN_USER.to_string(),
                phone: UNKNOWN_NUMBER.to_string(),
            }),
            Err(err) => {
                warn!(user_id = %id, error = %err, "user lookup failed, omitting entry");
                None
            }
        }
    }

    /// The booked posting. `Some(None)` when it no longer exists.
    async fn ride(&self, booking: &Booking) -> Option<Option<Ride>> {
        let store = self.ctx.store.as_ref();
        let path = docs::path(
            booking.posting_kind.collection(),
            booking.posting_id.as_str(),
        )
        .ok()?;
        match retry_transient(&self.ctx.retry, || docs::load::<Ride>(store, &path)).await {
            Ok(ride) => Some(ride),
            Err(err) => {
                warn!(
                    booking_id = %booking.id,
                    error = %err,
                    "posting lookup failed, omitting entry"
                );
                None
            }
        }
    }
}

/// Descending by date, unknown dates last.
fn newest_first(a: Option<OffsetDateTime>, b: Option<OffsetDateTime>) -> Ordering {
    match (a, b) {
        (Some(a), Some(b)) => b.cmp(&a),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}
