use std::{collections::BTreeMap, fmt, str::FromStr};

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(id: &str) -> Self {
                Self(id.to_string())
            }
        }

        impl From<String> for $name {
            fn from(id: String) -> Self {
                Self(id)
            }
        }
    };
}

string_id!(
    /// Identity issued by the auth collaborator.
    UserId
);
string_id!(PostingId);
string_id!(BookingId);
string_id!(NoticeId);

pub const BOOKINGS: &str = "bookings";
pub const NOTICES: &str = "notices";
pub const USERS: &str = "users";

/// Offer ("reserve") or request posting; each lives in its own namespace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PostingKind {
    Offer,
    Request,
}

impl PostingKind {
    pub const ALL: [PostingKind; 2] = [PostingKind::Offer, PostingKind::Request];

    pub fn collection(self) -> &'static str {
        match self {
            PostingKind::Offer => "offers",
            PostingKind::Request => "requests",
        }
    }

    /// Kind of booking created against a posting of this kind.
    pub fn booking_kind(self) -> BookingKind {
        match self {
            PostingKind::Offer => BookingKind::Reservation,
            PostingKind::Request => BookingKind::Fulfillment,
        }
    }
}

impl fmt::Display for PostingKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            PostingKind::Offer => "offer",
            PostingKind::Request => "request",
        })
    }
}

impl FromStr for PostingKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "offer" | "offers" | "reserve" => Ok(PostingKind::Offer),
            "request" | "requests" => Ok(PostingKind::Request),
            other => Err(format!("unknown posting kind `{other}`")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BookingKind {
    /// Rider reserved seats on an offer.
    Reservation,
    /// Driver fulfilled a rider's request.
    Fulfillment,
}

/// Seats held against a posting on behalf of one booking.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeatHold {
    pub seats: u32,
    #[serde(with = "time::serde::rfc3339")]
    pub held_at: OffsetDateTime,
}

/// Fields shared by offers and requests.
///
/// `seats` is the remaining capacity. `holds` records every seat deduction
/// that has not been released yet and is only modified in the same atomic
/// update as `seats`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ride {
    pub id: PostingId,
    pub owner_id: UserId,
    pub origin: String,
    pub destination: String,
    /// Always stored in UTC.
    #[serde(with = "time::serde::rfc3339")]
    pub scheduled_at: OffsetDateTime,
    /// Time of day rendered in the display offset, e.g. `3:00 PM`.
    pub time_label: String,
    pub seats: u32,
    pub donation: String,
    pub info: String,
    #[serde(default)]
    pub holds: BTreeMap<BookingId, SeatHold>,
}

impl Ride {
    /// Seats currently held by outstanding bookings.
    pub fn held_seats(&self) -> u32 {
        self.holds.values().map(|h| h.seats).sum()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Posting {
    Offer(Ride),
    Request(Ride),
}

impl Posting {
    pub fn new(kind: PostingKind, ride: Ride) -> Self {
        match kind {
            PostingKind::Offer => Posting::Offer(ride),
            PostingKind::Request => Posting::Request(ride),
        }
    }

    pub fn kind(&self) -> PostingKind {
        match self {
            Posting::Offer(_) => PostingKind::Offer,
            Posting::Request(_) => PostingKind::Request,
        }
    }

    pub fn ride(&self) -> &Ride {
        match self {
            Posting::Offer(ride) | Posting::Request(ride) => ride,
        }
    }

    pub fn into_ride(self) -> Ride {
        match self {
            Posting::Offer(ride) | Posting::Request(ride) => ride,
        }
    }

    pub fn id(&self) -> &PostingId {
        &self.ride().id
    }
}

/// A successful seat transaction between a rider and a posting's owner.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Booking {
    pub id: BookingId,
    pub posting_id: PostingId,
    pub posting_kind: PostingKind,
    pub rider_id: UserId,
    pub provider_id: UserId,
    pub kind: BookingKind,
    /// Seats deducted when the booking was made.
    pub seats: u32,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

impl Booking {
    pub fn involves(&self, user: &UserId) -> bool {
        &self.rider_id == user || &self.provider_id == user
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    pub display_name: String,
    pub username: String,
    #[serde(default)]
    pub phone: Option<String>,
    pub email: String,
}

/// Cancellation notice addressed to one participant of a cancelled booking.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notice {
    pub id: NoticeId,
    pub recipient_id: UserId,
    /// The other participant of the booking.
    pub counterpart_id: UserId,
    pub booking_id: BookingId,
    pub posting_id: PostingId,
    pub posting_kind: PostingKind,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub ride_at: Option<OffsetDateTime>,
    pub seats: u32,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActivityKind {
    Booked,
    Fulfilled,
    Cancelled,
}

/// One rendered line of a user's activity feed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ActivityEntry {
    pub booking_id: BookingId,
    pub kind: ActivityKind,
    pub message: String,
    pub date: String,
    #[serde(with = "time::serde::rfc3339::option")]
    pub ride_at: Option<OffsetDateTime>,
}

/// A booking seen from the rider's side, joined with the posting and its owner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RiderBooking {
    pub booking: Booking,
    pub ride: Option<Ride>,
    pub provider_name: String,
    pub provider_phone: String,
    pub date: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RiderBookings {
    /// Seats booked on other users' offers.
    pub reservations: Vec<RiderBooking>,
    /// Other users' requests this user fulfilled.
    pub accepted_requests: Vec<RiderBooking>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    #[test]
    fn kind_namespaces_and_booking_kinds() {
        assert_eq!(PostingKind::Offer.collection(), "offers");
        assert_eq!(PostingKind::Request.collection(), "requests");
        assert_eq!(PostingKind::Offer.booking_kind(), BookingKind::Reservation);
        assert_eq!(PostingKind::Request.booking_kind(), BookingKind::Fulfillment);
        assert_eq!("Reserve".parse::<PostingKind>(), Ok(PostingKind::Offer));
        assert!("ride".parse::<PostingKind>().is_err());
    }

    #[test]
    fn ride_document_shape() {
        let mut ride = Ride {
            id: "p1".into(),
            owner_id: "u1".into(),
            origin: "Campus".into(),
            destination: "DIA".into(),
            scheduled_at: datetime!(2023-11-25 15:00 UTC),
            time_label: "3:00 PM".into(),
            seats: 3,
            donation: "$5".into(),
            info: String::new(),
            holds: BTreeMap::new(),
        };
        ride.holds.insert(
            "b1".into(),
            SeatHold {
                seats: 2,
                held_at: datetime!(2023-11-20 10:00 UTC),
            },
        );
        let doc = serde_json::to_value(&ride).unwrap();
        assert_eq!(doc["scheduled_at"], "2023-11-25T15:00:00Z");
        assert_eq!(doc["holds"]["b1"]["seats"], 2);
        let back: Ride = serde_json::from_value(doc).unwrap();
        assert_eq!(back.held_seats(), 2);
    }

    #[test]
    fn ride_without_holds_field_decodes() {
        let doc = serde_json::json!({
            "id": "p1", "owner_id": "u1", "origin": "A", "destination": "B",
            "scheduled_at": "2023-11-25T15:00:00Z", "time_label": "3:00 PM",
            "seats": 1, "donation": "", "info": ""
        });
        let ride: Ride = serde_json::from_value(doc).unwrap();
        assert!(ride.holds.is_empty());
    }
}
