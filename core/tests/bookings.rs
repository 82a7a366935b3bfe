mod common;

use std::sync::Arc;

use common::{Harness, RIDE_AT};
use docstore::SqliteStore;
use ridecore::{model::PostingKind, PostingFilter, RideError};

#[tokio::test]
async fn book_cancel_rebook_scenario() {
    let h = Harness::memory();
    let offer = h.offer("dana", 3).await;

    let ana = h.as_user("ana");
    let booking = ana
        .bookings()
        .book_seats(&offer, PostingKind::Offer, &"ana".into(), 2)
        .await
        .unwrap();
    assert_eq!(h.ride(&offer).await.seats, 1);

    let cam = h.as_user("cam");
    let err = cam
        .bookings()
        .book_seats(&offer, PostingKind::Offer, &"cam".into(), 2)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        RideError::InsufficientSeats {
            requested: 2,
            available: 1
        }
    ));
    assert_eq!(h.ride(&offer).await.seats, 1);

    ana.cancellations()
        .cancel_booking(&booking, None)
        .await
        .unwrap();
    assert_eq!(h.ride(&offer).await.seats, 3);

    cam.bookings()
        .book_seats(&offer, PostingKind::Offer, &"cam".into(), 2)
        .await
        .unwrap();
    let ride = h.ride(&offer).await;
    assert_eq!(ride.seats, 1);
    assert_eq!(ride.held_seats(), 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn two_riders_race_for_the_last_two_seats() {
    let h = Harness::memory();
    let offer = h.offer("dana", 2).await;

    let tasks: Vec<_> = ["ana", "cam"]
        .into_iter()
        .map(|rider| {
            let service = h.as_user(rider);
            let offer = offer.clone();
            tokio::spawn(async move {
                service
                    .bookings()
                    .book_seats(&offer, PostingKind::Offer, &rider.into(), 2)
                    .await
            })
        })
        .collect();

    let mut booked = 0;
    let mut refused = 0;
    for task in tasks {
        match task.await.unwrap() {
            Ok(_) => booked += 1,
            Err(RideError::InsufficientSeats { .. }) => refused += 1,
            Err(other) => panic!("unexpected error {other}"),
        }
    }
    assert_eq!((booked, refused), (1, 1));
    let ride = h.ride(&offer).await;
    assert_eq!(ride.seats, 0);
    assert_eq!(ride.holds.len(), 1);
}

async fn crowd_never_oversells(h: Harness) {
    let offer = h.offer("dana", 5).await;

    let mut tasks = Vec::new();
    for i in 0..20 {
        let rider = format!("rider{i}");
        let service = h.as_user(&rider);
        let offer = offer.clone();
        tasks.push(tokio::spawn(async move {
            service
                .bookings()
                .book_seats(&offer, PostingKind::Offer, &rider.into(), 1)
                .await
        }));
    }
    let mut booked = Vec::new();
    for task in tasks {
        match task.await.unwrap() {
            Ok(id) => booked.push(id),
            Err(RideError::InsufficientSeats { .. }) => {}
            Err(other) => panic!("unexpected error {other}"),
        }
    }
    assert_eq!(booked.len(), 5);

    let ride = h.ride(&offer).await;
    assert_eq!(ride.seats, 0);
    assert_eq!(ride.seats + ride.held_seats(), 5);
    for id in &booked {
        assert!(ride.holds.contains_key(id));
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn crowd_on_memory_store() {
    crowd_never_oversells(Harness::memory()).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn crowd_on_sqlite_store() {
    let dir = tempfile::tempdir().unwrap();
    let store = SqliteStore::open(dir.path().join("rides.db")).unwrap();
    crowd_never_oversells(Harness::new(Arc::new(store))).await;
}

#[tokio::test]
async fn seats_are_conserved_through_mixed_operations() {
    let h = Harness::memory();
    let offer = h.offer("dana", 6).await;
    let mut live = Vec::new();
    for (rider, seats) in [("ana", 2), ("bo", 1), ("cam", 3)] {
        let id = h
            .as_user(rider)
            .bookings()
            .book_seats(&offer, PostingKind::Offer, &rider.into(), seats)
            .await
            .unwrap();
        live.push((rider, id));
    }
    let (rider, id) = live.remove(1);
    h.as_user(rider)
        .cancellations()
        .cancel_booking(&id, None)
        .await
        .unwrap();
    // the provider may cancel too
    let (_, id) = live.remove(0);
    h.as_user("dana")
        .cancellations()
        .cancel_booking(&id, None)
        .await
        .unwrap();

    let ride = h.ride(&offer).await;
    assert_eq!(ride.seats, 3);
    assert_eq!(ride.seats + ride.held_seats(), 6);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_cancels_restore_once() {
    let h = Harness::memory();
    let offer = h.offer("dana", 3).await;
    let booking = h
        .as_user("ana")
        .bookings()
        .book_seats(&offer, PostingKind::Offer, &"ana".into(), 2)
        .await
        .unwrap();

    let tasks: Vec<_> = ["ana", "dana", "ana", "dana"]
        .into_iter()
        .map(|user| {
            let service = h.as_user(user);
            let booking = booking.clone();
            tokio::spawn(async move { service.cancellations().cancel_booking(&booking, None).await })
        })
        .collect();
    let mut ok = 0;
    for task in tasks {
        match task.await.unwrap() {
            Ok(()) => ok += 1,
            Err(RideError::NotFound(_)) => {}
            Err(other) => panic!("unexpected error {other}"),
        }
    }
    assert_eq!(ok, 1);
    assert_eq!(h.ride(&offer).await.seats, 3);
}

#[tokio::test]
async fn dismiss_does_not_return_seats() {
    let h = Harness::memory();
    let offer = h.offer("dana", 3).await;
    let booking = h
        .as_user("ana")
        .bookings()
        .book_seats(&offer, PostingKind::Offer, &"ana".into(), 2)
        .await
        .unwrap();

    h.as_user("dana")
        .activity()
        .delete_activity_entry(&booking)
        .await
        .unwrap();
    let ride = h.ride(&offer).await;
    assert_eq!(ride.seats, 1);
    assert!(ride.holds.is_empty());
    assert!(matches!(
        h.as_user("ana")
            .cancellations()
            .cancel_booking(&booking, None)
            .await,
        Err(RideError::NotFound("booking"))
    ));
}

#[tokio::test]
async fn cascade_delete_cancels_then_deletes() {
    let h = Harness::memory();
    let offer = h.offer("dana", 4).await;
    for rider in ["ana", "bo"] {
        h.as_user(rider)
            .bookings()
            .book_seats(&offer, PostingKind::Offer, &rider.into(), 1)
            .await
            .unwrap();
    }
    let dana = h.as_user("dana");
    assert!(matches!(
        dana.postings().delete_posting(&offer, PostingKind::Offer).await,
        Err(RideError::Conflict(_))
    ));
    assert!(matches!(
        h.as_user("ana")
            .delete_posting_cascade(&offer, PostingKind::Offer)
            .await,
        Err(RideError::Forbidden)
    ));

    assert_eq!(
        dana.delete_posting_cascade(&offer, PostingKind::Offer)
            .await
            .unwrap(),
        2
    );
    assert!(dana
        .postings()
        .list_postings(PostingKind::Offer, &PostingFilter::default())
        .await
        .unwrap()
        .is_empty());

    // both riders were told, and the feed still shows it
    let ana_feed = h
        .as_user("ana")
        .activity()
        .get_activity_feed(&"ana".into())
        .await
        .unwrap();
    assert_eq!(ana_feed.len(), 1);
    assert_eq!(ana_feed[0].ride_at, Some(RIDE_AT));
    assert!(ana_feed[0].message.ends_with("cancelled a booking."));
}
