//! Periodic reconciliation of seat holds, bookings and notices.

use std::collections::{HashMap, HashSet};

use serde::Serialize;
use time::Duration;
use tokio::{task::JoinHandle, time::interval};
use tracing::{debug, info, warn};

use crate::{
    activity::FeedSettings,
    bookings::release_hold,
    context::Context,
    docs,
    error::Result,
    model::{Booking, BookingId, Notice, PostingKind, Ride, BOOKINGS, NOTICES},
};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    /// Holds without a booking record whose seats were returned.
    pub released_holds: usize,
    /// Bookings deleted because their posting no longer exists.
    pub orphaned_bookings: usize,
    /// Cancellation notices past the feed expiry window.
    pub pruned_notices: usize,
}

impl SweepReport {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

#[derive(Clone)]
pub struct ConsistencySweep {
    ctx: Context,
    feed: FeedSettings,
    /// Minimum age of an unmatched hold before it is released, so that a
    /// booking still being written is not mistaken for a lost one.
    grace: Duration,
}

impl ConsistencySweep {
    pub fn new(ctx: Context, feed: FeedSettings, grace: Duration) -> Self {
        Self { ctx, feed, grace }
    }

    pub async fn run_once(&self) -> Result<SweepReport> {
        let store = self.ctx.store.as_ref();
        let now = self.ctx.clock.now();
        let mut report = SweepReport::default();

        // Bookings are listed before postings: a booking written after this
        // point belongs to a hold that is still inside the grace period.
        let bookings: Vec<Booking> = docs::list(store, BOOKINGS).await?;
        let booked: HashSet<&BookingId> = bookings.iter().map(|b| &b.id).collect();

        let mut live: HashMap<PostingKind, HashSet<String>> = HashMap::new();
        for kind in PostingKind::ALL {
            let rides: Vec<Ride> = docs::list(store, kind.collection()).await?;
            for ride in &rides {
                let path = docs::path(kind.collection(), ride.id.as_str())?;
                for (booking_id, hold) in &ride.holds {
                    if booked.contains(booking_id) || now - hold.held_at < self.grace {
                        continue;
                    }
                    if let Some(seats) = release_hold(store, &path, booking_id).await? {
                        warn!(
                            %booking_id,
                            posting_id = %ride.id,
                            seats,
                            "released seat hold with no booking record"
                        );
                        report.released_holds += 1;
                    }
                }
            }
            live.insert(
                kind,
                rides.into_iter().map(|r| r.id.as_str().to_string()).collect(),
            );
        }

        for booking in &bookings {
            let exists = live
                .get(&booking.posting_kind)
                .is_some_and(|ids| ids.contains(booking.posting_id.as_str()));
            if exists {
                continue;
            }
            store.delete(&docs::path(BOOKINGS, booking.id.as_str())?).await?;
            warn!(
                booking_id = %booking.id,
                posting_id = %booking.posting_id,
                "deleted booking of a missing posting"
            );
            report.orphaned_bookings += 1;
        }

        let notices: Vec<Notice> = docs::list(store, NOTICES).await?;
        for notice in notices {
            if self.feed.is_current(notice.ride_at, now) {
                continue;
            }
            store.delete(&docs::path(NOTICES, notice.id.as_str())?).await?;
            report.pruned_notices += 1;
        }

        if report.is_empty() {
            debug!("consistency sweep found nothing to do");
        } else {
            info!(
                released_holds = report.released_holds,
                orphaned_bookings = report.orphaned_bookings,
                pruned_notices = report.pruned_notices,
                "consistency sweep finished"
            );
        }
        Ok(report)
    }
}

/// Run the sweep every `every` until the task is aborted. Failed runs are
/// logged and retried on the next tick.
pub fn spawn_sweeper(sweep: ConsistencySweep, every: std::time::Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut tick = interval(every);
        loop {
            tick.tick().await;
            if let Err(err) = sweep.run_once().await {
                warn!(error = %err, "consistency sweep failed");
            }
        }
    })
}
