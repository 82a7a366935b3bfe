use std::collections::BTreeMap;

use docstore::{Outcome, Subscription, Update};
use serde::Deserialize;
use serde_json::Value;
use time::{Date, OffsetDateTime, UtcOffset};
use tracing::{info, warn};

use crate::{
    context::Context,
    dates, docs,
    error::{RideError, Result},
    model::{Posting, PostingId, PostingKind, Ride, UserId},
    retry::retry_transient,
};

/// What happens when an owner edits the seat count of a posting that has
/// outstanding bookings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SeatEditPolicy {
    /// Overwrite the counter anyway. Bypasses booking arbitration.
    Overwrite,
    /// Refuse with [`RideError::Conflict`].
    #[default]
    RejectWhileBooked,
}

#[derive(Debug, Clone)]
pub struct PostingSettings {
    pub seat_edit: SeatEditPolicy,
    /// Offset used for time labels and date filtering.
    pub display_offset: UtcOffset,
}

impl Default for PostingSettings {
    fn default() -> Self {
        Self {
            seat_edit: SeatEditPolicy::default(),
            display_offset: UtcOffset::UTC,
        }
    }
}

/// Fields supplied when creating a posting.
#[derive(Debug, Clone)]
pub struct PostingDraft {
    pub origin: String,
    pub destination: String,
    pub scheduled_at: OffsetDateTime,
    pub seats: u32,
    pub donation: String,
    pub info: String,
}

/// Partial edit of a posting; `None` leaves the field unchanged.
#[derive(Debug, Clone, Default)]
pub struct PostingUpdate {
    pub origin: Option<String>,
    pub destination: Option<String>,
    pub scheduled_at: Option<OffsetDateTime>,
    pub seats: Option<u32>,
    pub donation: Option<String>,
    pub info: Option<String>,
}

/// Search criteria for listing postings.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PostingFilter {
    /// Case-insensitive substring of origin or destination.
    pub text: Option<String>,
    /// Calendar day of the ride in the display offset.
    pub date: Option<Date>,
}

impl PostingFilter {
    pub fn matches(&self, ride: &Ride, offset: UtcOffset) -> bool {
        if let Some(text) = self.text.as_deref().map(str::trim).filter(|t| !t.is_empty()) {
            let needle = text.to_lowercase();
            if !ride.origin.to_lowercase().contains(&needle)
                && !ride.destination.to_lowercase().contains(&needle)
            {
                return false;
            }
        }
        match self.date {
            Some(date) => ride.scheduled_at.to_offset(offset).date() == date,
            None => true,
        }
    }
}

/// CRUD over offers and requests.
#[derive(Clone)]
pub struct PostingStore {
    ctx: Context,
    settings: PostingSettings,
}

impl PostingStore {
    pub fn new(ctx: Context, settings: PostingSettings) -> Self {
        Self { ctx, settings }
    }

    pub async fn create_posting(
        &self,
        kind: PostingKind,
        owner_id: &UserId,
        draft: PostingDraft,
    ) -> Result<PostingId> {
        let owner = self.ctx.require_identity(owner_id)?;
        if draft.origin.trim().is_empty() || draft.destination.trim().is_empty() {
            return Err(RideError::Invalid("origin and destination are required".into()));
        }
        let id = PostingId::new(self.ctx.store.generate_key());
        let scheduled_at = draft.scheduled_at.to_offset(UtcOffset::UTC);
        let ride = Ride {
            id: id.clone(),
            owner_id: owner,
            origin: draft.origin,
            destination: draft.destination,
            time_label: dates::time_label(scheduled_at, self.settings.display_offset),
            scheduled_at,
            seats: draft.seats,
            donation: draft.donation,
            info: draft.info,
            holds: BTreeMap::new(),
        };
        let path = docs::path(kind.collection(), id.as_str())?;
        let doc = docs::encode(&ride)?;
        let store = &self.ctx.store;
        retry_transient(&self.ctx.retry, || {
            let doc = doc.clone();
            let path = &path;
            async move { Ok(store.write(path, doc).await?) }
        })
        .await?;
        info!(posting_id = %id, %kind, seats = ride.seats, "posting created");
        Ok(id)
    }

    /// Overwrite the supplied fields of a posting owned by the caller.
    ///
    /// Seat-count edits follow [`SeatEditPolicy`]; with `Overwrite` the new
    /// value replaces the counter without regard to outstanding bookings.
    pub async fn update_posting(
        &self,
        id: &PostingId,
        kind: PostingKind,
        update: PostingUpdate,
    ) -> Result<()> {
        let caller = self.ctx.caller()?;
        let path = docs::path(kind.collection(), id.as_str())?;
        let policy = self.settings.seat_edit;
        let offset = self.settings.display_offset;
        let mut rejection: Option<RideError> = None;
        let mut bypassed_holds = 0usize;

        let outcome = self
            .ctx
            .store
            .transact(&path, &mut |current| {
                rejection = None;
                bypassed_holds = 0;
                let mut ride = match owned_ride(current, &caller) {
                    Ok(ride) => ride,
                    Err(err) => {
                        rejection = Some(err);
                        return Update::Abort;
                    }
                };
                if let Some(seats) = update.seats {
                    if seats != ride.seats && !ride.holds.is_empty() {
                        match policy {
                            SeatEditPolicy::RejectWhileBooked => {
                                rejection = Some(RideError::Conflict(format!(
                                    "seat count is locked while {} bookings are outstanding",
                                    ride.holds.len()
                                )));
                                return Update::Abort;
                            }
                            SeatEditPolicy::Overwrite => bypassed_holds = ride.holds.len(),
                        }
                    }
                    ride.seats = seats;
                }
                if let Some(origin) = &update.origin {
                    ride.origin = origin.clone();
                }
                if let Some(destination) = &update.destination {
                    ride.destination = destination.clone();
                }
                if let Some(at) = update.scheduled_at {
                    ride.scheduled_at = at.to_offset(UtcOffset::UTC);
                    ride.time_label = dates::time_label(ride.scheduled_at, offset);
                }
                if let Some(donation) = &update.donation {
                    ride.donation = donation.clone();
                }
                if let Some(info) = &update.info {
                    ride.info = info.clone();
                }
                set(&ride, &mut rejection)
            })
            .await?;

        match outcome {
            Outcome::Committed(_) => {
                if bypassed_holds > 0 {
                    warn!(
                        posting_id = %id,
                        outstanding = bypassed_holds,
                        "seat count overwritten despite outstanding bookings"
                    );
                }
                info!(posting_id = %id, %kind, "posting updated");
                Ok(())
            }
            Outcome::Aborted => Err(rejection.unwrap_or(RideError::NotFound("posting"))),
        }
    }

    /// Delete a posting owned by the caller. Refused while bookings are
    /// outstanding; see `RideService::delete_posting_cascade`.
    pub async fn delete_posting(&self, id: &PostingId, kind: PostingKind) -> Result<()> {
        let caller = self.ctx.caller()?;
        let path = docs::path(kind.collection(), id.as_str())?;
        let mut rejection: Option<RideError> = None;
        let outcome = self
            .ctx
            .store
            .transact(&path, &mut |current| {
                rejection = None;
                match owned_ride(current, &caller) {
                    Ok(ride) if ride.holds.is_empty() => Update::Remove,
                    Ok(ride) => {
                        rejection = Some(RideError::Conflict(format!(
                            "posting has {} active bookings",
                            ride.holds.len()
                        )));
                        Update::Abort
                    }
                    Err(err) => {
                        rejection = Some(err);
                        Update::Abort
                    }
                }
            })
            .await?;
        match outcome {
            Outcome::Committed(_) => {
                info!(posting_id = %id, %kind, "posting deleted");
                Ok(())
            }
            Outcome::Aborted => Err(rejection.unwrap_or(RideError::NotFound("posting"))),
        }
    }

    pub async fn get_posting(&self, id: &PostingId, kind: PostingKind) -> Result<Posting> {
        let path = docs::path(kind.collection(), id.as_str())?;
        let store = self.ctx.store.as_ref();
        let ride: Option<Ride> =
            retry_transient(&self.ctx.retry, || docs::load(store, &path)).await?;
        ride.map(|r| Posting::new(kind, r))
            .ok_or(RideError::NotFound("posting"))
    }

    /// Postings of one kind matching `filter`, earliest ride first.
    pub async fn list_postings(
        &self,
        kind: PostingKind,
        filter: &PostingFilter,
    ) -> Result<Vec<Posting>> {
        let store = self.ctx.store.as_ref();
        let rides: Vec<Ride> =
            retry_transient(&self.ctx.retry, || docs::list(store, kind.collection())).await?;
        let offset = self.settings.display_offset;
        Ok(sorted(
            kind,
            rides.into_iter().filter(|r| filter.matches(r, offset)),
        ))
    }

    /// Postings of one kind created by `owner`.
    pub async fn list_postings_by_owner(
        &self,
        kind: PostingKind,
        owner: &UserId,
    ) -> Result<Vec<Posting>> {
        let store = self.ctx.store.as_ref();
        let rides: Vec<Ride> = retry_transient(&self.ctx.retry, || {
            docs::query(store, kind.collection(), "owner_id", owner.as_str())
        })
        .await?;
        Ok(sorted(kind, rides))
    }

    /// Live view of [`Self::list_postings`]: re-emits the whole filtered set
    /// whenever anything in the namespace changes.
    pub fn watch_postings(&self, kind: PostingKind, filter: PostingFilter) -> PostingWatch {
        PostingWatch {
            subscription: self.ctx.store.subscribe(kind.collection()),
            postings: self.clone(),
            kind,
            filter,
            primed: false,
        }
    }
}

/// Stream of filtered posting snapshots; see [`PostingStore::watch_postings`].
pub struct PostingWatch {
    subscription: Subscription,
    postings: PostingStore,
    kind: PostingKind,
    filter: PostingFilter,
    primed: bool,
}

impl PostingWatch {
    /// The current set on first call, then the set after each change.
    /// Returns `None` if the change feed closes.
    pub async fn next(&mut self) -> Option<Result<Vec<Posting>>> {
        if self.primed {
            self.subscription.changed().await?;
        }
        self.primed = true;
        Some(self.postings.list_postings(self.kind, &self.filter).await)
    }
}

fn sorted(kind: PostingKind, rides: impl IntoIterator<Item = Ride>) -> Vec<Posting> {
    let mut rides: Vec<Ride> = rides.into_iter().collect();
    rides.sort_by(|a, b| {
        a.scheduled_at
            .cmp(&b.scheduled_at)
            .then_with(|| a.id.cmp(&b.id))
    });
    rides.into_iter().map(|r| Posting::new(kind, r)).collect()
}

/// Decode a posting document and check the caller owns it.
fn owned_ride(current: Option<&Value>, caller: &UserId) -> Result<Ride> {
    let doc = current.ok_or(RideError::NotFound("posting"))?;
    let ride: Ride = docs::decode(doc.clone())?;
    if &ride.owner_id != caller {
        return Err(RideError::Forbidden);
    }
    Ok(ride)
}

/// Encode `ride` as a `Set` update, aborting if it cannot be serialized.
pub(crate) fn set(ride: &Ride, rejection: &mut Option<RideError>) -> Update {
    match docs::encode(ride) {
        Ok(doc) => Update::Set(doc),
        Err(err) => {
            *rejection = Some(err);
            Update::Abort
        }
    }
}
