use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

use crate::model::PostingKind;

/// Command line interface for the ride-share core.
#[derive(Parser, Debug)]
#[command(author, version, about)]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalArgs,
    #[command(subcommand)]
    pub command: Command,
}

/// Options accepted by every command.
#[derive(Args, Debug, Default, Clone)]
pub struct GlobalArgs {
    /// Path to configuration file.
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,
    /// Override the SQLite database file.
    #[arg(long, global = true)]
    pub db: Option<PathBuf>,
    /// Log filter, e.g. `info` or `ridecore=debug`.
    #[arg(long, global = true)]
    pub log: Option<String>,
    /// Act as this user id (falls back to `RIDECORE_USER`).
    #[arg(long = "as", global = true, value_name = "USER")]
    pub as_user: Option<String>,
    /// Offset for rendering dates, e.g. `-05:00`.
    #[arg(long, global = true)]
    pub display_offset: Option<String>,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Manage the signed-in user's profile.
    User {
        #[command(subcommand)]
        command: UserCommand,
    },
    /// Offers and requests.
    Post {
        #[command(subcommand)]
        command: PostCommand,
    },
    /// Book seats on an offer, or fulfil a request.
    Book {
        kind: PostingKind,
        posting: String,
        #[arg(long, default_value_t = 1)]
        seats: u32,
    },
    /// Cancel a booking and return its seats.
    Cancel {
        booking: String,
        /// Seats to return; defaults to the booked count.
        #[arg(long)]
        seats: Option<u32>,
    },
    /// Remove an entry from the activity feed without returning seats.
    Dismiss { booking: String },
    /// Show the activity feed.
    Feed,
    /// Show reservations and accepted requests.
    Bookings,
    /// Reconcile holds, orphaned bookings and old notices.
    Sweep {
        /// Keep running at the configured interval.
        #[arg(long)]
        watch: bool,
    },
}

#[derive(Subcommand, Debug)]
pub enum UserCommand {
    /// Create or update the profile of the `--as` user.
    Save {
        #[arg(long)]
        username: String,
        #[arg(long)]
        name: String,
        #[arg(long)]
        email: String,
        #[arg(long)]
        phone: Option<String>,
    },
}

#[derive(Subcommand, Debug)]
pub enum PostCommand {
    Create {
        kind: PostingKind,
        #[arg(long)]
        from: String,
        #[arg(long)]
        to: String,
        /// RFC 3339 timestamp of the ride.
        #[arg(long)]
        at: String,
        #[arg(long)]
        seats: u32,
        #[arg(long, default_value = "")]
        donation: String,
        #[arg(long, default_value = "")]
        info: String,
    },
    Update {
        kind: PostingKind,
        id: String,
        #[arg(long)]
        from: Option<String>,
        #[arg(long)]
        to: Option<String>,
        #[arg(long)]
        at: Option<String>,
        #[arg(long)]
        seats: Option<u32>,
        #[arg(long)]
        donation: Option<String>,
        #[arg(long)]
        info: Option<String>,
    },
    Delete {
        kind: PostingKind,
        id: String,
        /// Cancel outstanding bookings first.
        #[arg(long)]
        cascade: bool,
    },
    List {
        kind: PostingKind,
        /// Match origin or destination.
        #[arg(long)]
        search: Option<String>,
        /// Ride day as YYYY-MM-DD.
        #[arg(long)]
        date: Option<String>,
    },
    /// Postings created by the `--as` user.
    Mine { kind: PostingKind },
    /// Print the filtered list again whenever it changes.
    Watch {
        kind: PostingKind,
        #[arg(long)]
        search: Option<String>,
        #[arg(long)]
        date: Option<String>,
    },
}
