//! Seat inventory for a campus ride-share: offers and requests, bookings
//! that deduct seats atomically, cancellations that give them back, and the
//! activity feed built from both.

pub mod activity;
pub mod bookings;
pub mod cancellation;
pub mod cli;
pub mod clock;
pub mod config;
pub mod context;
pub mod dates;
mod docs;
pub mod error;
pub mod identity;
pub mod model;
pub mod postings;
pub mod retry;
pub mod service;
pub mod sweep;

pub use activity::{ActivityFeed, FeedSettings};
pub use bookings::BookingService;
pub use cancellation::CancellationService;
pub use clock::{Clock, FixedClock, SystemClock};
pub use context::Context;
pub use error::{RideError, Result};
pub use identity::{Session, StaticSession, StoreUserDirectory, UserDirectory};
pub use postings::{
    PostingDraft, PostingFilter, PostingSettings, PostingStore, PostingUpdate, PostingWatch,
    SeatEditPolicy,
};
pub use retry::{retry_transient, RetryPolicy};
pub use service::{RideService, ServiceSettings};
pub use sweep::{spawn_sweeper, ConsistencySweep, SweepReport};
