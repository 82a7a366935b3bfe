use std::{fs, sync::Arc};

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use docstore::SqliteStore;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use ridecore::{
    cli::{Cli, Command, PostCommand, UserCommand},
    config::Config,
    dates,
    model::{Posting, RiderBooking, User, UserId},
    spawn_sweeper, PostingDraft, PostingFilter, PostingUpdate, RideError, RideService,
    StaticSession, SystemClock,
};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = Config::load(&cli.global)?;
    let filter = EnvFilter::try_new(&config.log_level).unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    if let Some(parent) = config.db_path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("creating data directory {}", parent.display()))?;
    }
    let store = SqliteStore::open(&config.db_path)
        .with_context(|| format!("opening {}", config.db_path.display()))?;
    info!(db = %config.db_path.display(), "store opened");

    let user = cli
        .global
        .as_user
        .clone()
        .or_else(|| std::env::var("RIDECORE_USER").ok())
        .map(UserId::from);
    let service = RideService::new(
        Arc::new(store),
        Arc::new(StaticSession::new(user.clone())),
        Arc::new(SystemClock),
        config.retry.clone(),
        config.settings.clone(),
    );

    if let Err(err) = run(&service, &config, user, cli.command).await {
        error!(error = %err, "command failed");
        match err.downcast_ref::<RideError>() {
            Some(ride) => eprintln!("{}", ride.user_message()),
            None => eprintln!("{err:#}"),
        }
        std::process::exit(1);
    }
    Ok(())
}

async fn run(
    service: &RideService,
    config: &Config,
    user: Option<UserId>,
    command: Command,
) -> Result<()> {
    let me = || user.clone().ok_or_else(|| anyhow!("pass --as USER or set RIDECORE_USER"));
    let offset = config.settings.display_offset;

    match command {
        Command::User {
            command:
                UserCommand::Save {
                    username,
                    name,
                    email,
                    phone,
                },
        } => {
            let profile = User {
                id: me()?,
                display_name: name,
                username,
                phone,
                email,
            };
            service.users().save_user(&profile).await?;
            println!("saved {}", profile.id);
        }
        Command::Post { command } => match command {
            PostCommand::Create {
                kind,
                from,
                to,
                at,
                seats,
                donation,
                info,
            } => {
                let draft = PostingDraft {
                    origin: from,
                    destination: to,
                    scheduled_at: dates::parse_timestamp(&at)?,
                    seats,
                    donation,
                    info,
                };
                let id = service.postings().create_posting(kind, &me()?, draft).await?;
                println!("{id}");
            }
            PostCommand::Update {
                kind,
                id,
                from,
                to,
                at,
                seats,
                donation,
                info,
            } => {
                let update = PostingUpdate {
                    origin: from,
                    destination: to,
                    scheduled_at: at.as_deref().map(dates::parse_timestamp).transpose()?,
                    seats,
                    donation,
                    info,
                };
                service
                    .postings()
                    .update_posting(&id.into(), kind, update)
                    .await?;
                println!("updated");
            }
            PostCommand::Delete { kind, id, cascade } => {
                let id = id.into();
                if cascade {
                    let cancelled = service.delete_posting_cascade(&id, kind).await?;
                    println!("deleted, {cancelled} bookings cancelled");
                } else {
                    service.postings().delete_posting(&id, kind).await?;
                    println!("deleted");
                }
            }
            PostCommand::List { kind, search, date } => {
                let filter = PostingFilter {
                    text: search,
                    date: date.as_deref().map(dates::parse_date).transpose()?,
                };
                let postings = service.postings().list_postings(kind, &filter).await?;
                print_postings(&postings, offset);
            }
            PostCommand::Mine { kind } => {
                let postings = service
                    .postings()
                    .list_postings_by_owner(kind, &me()?)
                    .await?;
                print_postings(&postings, offset);
            }
            PostCommand::Watch { kind, search, date } => {
                let filter = PostingFilter {
                    text: search,
                    date: date.as_deref().map(dates::parse_date).transpose()?,
                };
                let mut watch = service.postings().watch_postings(kind, filter);
                loop {
                    tokio::select! {
                        _ = tokio::signal::ctrl_c() => break,
                        next = watch.next() => match next {
                            Some(postings) => {
                                print_postings(&postings?, offset);
                                println!("--");
                            }
                            None => break,
                        },
                    }
                }
            }
        },
        Command::Book {
            kind,
            posting,
            seats,
        } => {
            let id = service
                .bookings()
                .book_seats(&posting.into(), kind, &me()?, seats)
                .await?;
            println!("{id}");
        }
        Command::Cancel { booking, seats } => {
            service
                .cancellations()
                .cancel_booking(&booking.into(), seats)
                .await?;
            println!("cancelled");
        }
        Command::Dismiss { booking } => {
            service
                .activity()
                .delete_activity_entry(&booking.into())
                .await?;
            println!("dismissed");
        }
        Command::Feed => {
            for entry in service.activity().get_activity_feed(&me()?).await? {
                println!("{}  {}  [{}]", entry.date, entry.message, entry.booking_id);
            }
        }
        Command::Bookings => {
            let view = service.activity().get_rider_bookings(&me()?).await?;
            println!("Reservations");
            view.reservations.iter().for_each(print_rider_booking);
            println!("Accepted requests");
            view.accepted_requests.iter().for_each(print_rider_booking);
        }
        Command::Sweep { watch } => {
            if watch {
                let task = spawn_sweeper(service.sweep(), config.sweep_interval);
                info!(every = ?config.sweep_interval, "sweeper running - press Ctrl+C to exit");
                tokio::signal::ctrl_c().await?;
                task.abort();
            } else {
                let report = service.sweep().run_once().await?;
                println!("{}", serde_json::to_string_pretty(&report)?);
            }
        }
    }
    Ok(())
}

fn print_postings(postings: &[Posting], offset: time::UtcOffset) {
    for posting in postings {
        let ride = posting.ride();
        println!(
            "{:<32} {} -> {}  {}  {} seats  {}",
            ride.id,
            ride.origin,
            ride.destination,
            dates::long_date(ride.scheduled_at, offset),
            ride.seats,
            ride.donation
        );
    }
}

fn print_rider_booking(entry: &RiderBooking) {
    let route = entry
        .ride
        .as_ref()
        .map(|r| format!("{} -> {}", r.origin, r.destination))
        .unwrap_or_default();
    println!(
        "  {:<32} {}  {}  {} ({})  {} seats",
        entry.booking.id,
        route,
        entry.date,
        entry.provider_name,
        entry.provider_phone,
        entry.booking.seats
    );
}
