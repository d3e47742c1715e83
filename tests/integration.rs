use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use futures::future::{join_all, BoxFuture};
use nuber_dispatch::dispatch::Dispatch;
use nuber_dispatch::engine::delay::Delay;
use nuber_dispatch::engine::pool::{IdleDriverPool, MAX_IDLE_DRIVERS};
use nuber_dispatch::engine::region::RegionState;
use nuber_dispatch::error::DispatchError;
use nuber_dispatch::models::driver::Driver;
use nuber_dispatch::models::passenger::Passenger;
use tokio::time::{sleep, timeout};

/// Every trip leg takes exactly the given time, whatever the maximum.
struct FixedDelay(Duration);

impl Delay for FixedDelay {
    fn delay(&self, _max: Duration) -> BoxFuture<'static, Duration> {
        let pause = self.0;
        Box::pin(async move {
            sleep(pause).await;
            pause
        })
    }
}

fn fixed_dispatch(regions: &[(&str, usize)], leg: Duration) -> Dispatch {
    Dispatch::with_parts(
        regions.iter().map(|(name, capacity)| (name.to_string(), *capacity)),
        false,
        Arc::new(IdleDriverPool::default()),
        Arc::new(FixedDelay(leg)),
    )
    .unwrap()
}

async fn wait_until(mut condition: impl FnMut() -> bool) {
    timeout(Duration::from_secs(5), async {
        while !condition() {
            sleep(Duration::from_millis(2)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}

#[tokio::test]
async fn single_booking_pairs_barbara_with_alex() {
    let dispatch = Dispatch::new([("Test", 10)], true).unwrap();
    assert!(dispatch.add_driver(Driver::new("Barbara", 100)).await);

    let handle = dispatch
        .book_passenger(Passenger::new("Alex", 100), "Test")
        .unwrap();
    let result = handle.await.unwrap();

    assert_eq!(result.driver_name, "Barbara");
    assert_eq!(result.passenger_name, "Alex");
    assert_eq!(result.region, "Test");
    assert!(result.pickup_duration_ms < 100);
    assert!(result.travel_duration_ms < 100);

    // the driver is back in circulation
    assert_eq!(dispatch.idle_drivers(), 1);
    dispatch.shutdown();
}

#[tokio::test]
async fn booking_waits_for_a_driver_to_arrive() {
    let dispatch = Dispatch::new([("Solo", 1)], false).unwrap();

    let handle = dispatch
        .book_passenger(Passenger::new("Alex", 10), "Solo")
        .unwrap();

    sleep(Duration::from_millis(50)).await;
    assert_eq!(dispatch.bookings_awaiting_driver(), 1);

    assert!(dispatch.add_driver(Driver::new("Barbara", 10)).await);
    let result = timeout(Duration::from_secs(2), handle).await.unwrap().unwrap();

    assert_eq!(result.driver_name, "Barbara");
    assert_eq!(dispatch.bookings_awaiting_driver(), 0);
}

#[tokio::test]
async fn unknown_region_changes_nothing() {
    let dispatch = Dispatch::new([("Test", 2)], false).unwrap();
    let before = dispatch.snapshots();

    let outcome = dispatch.book_passenger(Passenger::new("Alex", 10), "Nowhere");

    assert_eq!(
        outcome.err(),
        Some(DispatchError::UnknownRegion("Nowhere".to_string()))
    );
    assert_eq!(dispatch.bookings_awaiting_driver(), 0);

    let after = dispatch.snapshots();
    assert_eq!(before[0].rejected, after[0].rejected);
    assert_eq!(before[0].queued, after[0].queued);
    assert_eq!(dispatch.metrics().bookings_awaiting_driver.get(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn saturated_region_refuses_and_never_exceeds_capacity() {
    let dispatch = fixed_dispatch(&[("Busy", 2)], Duration::from_millis(150));
    for index in 0..10 {
        assert!(dispatch.add_driver(Driver::new(format!("D-{index}"), 100)).await);
    }
    let region = dispatch.region("Busy").unwrap();

    let mut handles = Vec::new();
    for index in 0..2 {
        handles.push(
            dispatch
                .book_passenger(Passenger::new(format!("P-{index}"), 100), "Busy")
                .unwrap(),
        );
    }
    wait_until(|| region.active_jobs() == 2).await;

    for index in 2..4 {
        handles.push(
            dispatch
                .book_passenger(Passenger::new(format!("P-{index}"), 100), "Busy")
                .unwrap(),
        );
    }
    assert_eq!(region.booking_queue_length(), 2);

    let refused = dispatch.book_passenger(Passenger::new("P-late", 100), "Busy");
    let refused = refused.err().unwrap();
    assert_eq!(refused, DispatchError::RegionSaturated("Busy".to_string()));
    assert!(refused.is_rejection());

    let results = join_all(handles).await;
    assert!(results.iter().all(Result::is_ok));

    let snapshot = region.snapshot();
    assert_eq!(snapshot.peak_active, 2);
    assert_eq!(snapshot.completed, 4);
    assert_eq!(snapshot.rejected, 1);
    assert_eq!(snapshot.queued, 0);
}

#[tokio::test]
async fn back_to_back_bookings_fill_workers_and_backlog_before_refusing() {
    let dispatch = Dispatch::new([("Solo", 1), ("Wide", 20)], false).unwrap();

    for (region, capacity) in [("Solo", 1), ("Wide", 20)] {
        let admitted: Vec<_> = (0..capacity * 2)
            .map(|index| dispatch.book_passenger(Passenger::new(format!("P-{index}"), 10), region))
            .collect();
        assert!(admitted.iter().all(Result::is_ok), "{region} refused within its budget");

        let refused = dispatch
            .book_passenger(Passenger::new("P-extra", 10), region)
            .err();
        assert_eq!(refused, Some(DispatchError::RegionSaturated(region.to_string())));
        assert_eq!(
            dispatch.region(region).unwrap().bookings_awaiting_driver(),
            capacity * 2
        );
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_submissions_admit_exactly_twice_capacity() {
    let dispatch = Arc::new(fixed_dispatch(&[("Rush", 3)], Duration::from_millis(200)));
    for index in 0..10 {
        assert!(dispatch.add_driver(Driver::new(format!("D-{index}"), 100)).await);
    }

    let submissions: Vec<_> = (0..24)
        .map(|index| {
            let dispatch = dispatch.clone();
            tokio::spawn(async move {
                dispatch.book_passenger(Passenger::new(format!("P-{index}"), 100), "Rush")
            })
        })
        .collect();

    let mut handles = Vec::new();
    let mut saturated = 0;
    for submission in join_all(submissions).await {
        match submission.unwrap() {
            Ok(handle) => handles.push(handle),
            Err(DispatchError::RegionSaturated(_)) => saturated += 1,
            Err(other) => panic!("unexpected refusal: {other}"),
        }
    }
    assert_eq!(handles.len(), 6);
    assert_eq!(saturated, 18);

    let results = join_all(handles).await;
    assert!(results.iter().all(Result::is_ok));

    let snapshot = dispatch.region("Rush").unwrap().snapshot();
    assert!(snapshot.peak_active <= 3);
    assert_eq!(snapshot.completed, 6);
    assert_eq!(snapshot.rejected, 18);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn nothing_is_admitted_once_shutdown_returns() {
    let dispatch = Arc::new(Dispatch::new([("Gate", 500)], false).unwrap());

    let submitters: Vec<_> = (0..4)
        .map(|worker| {
            let dispatch = dispatch.clone();
            tokio::spawn(async move {
                let mut handles = Vec::new();
                for index in 0.. {
                    let passenger = Passenger::new(format!("P-{worker}-{index}"), 10);
                    match dispatch.book_passenger(passenger, "Gate") {
                        Ok(handle) => handles.push(handle),
                        Err(DispatchError::RegionShuttingDown(_)) => break,
                        Err(_) => {}
                    }
                    tokio::task::yield_now().await;
                }
                handles.len()
            })
        })
        .collect();

    sleep(Duration::from_millis(5)).await;
    dispatch.shutdown();
    // no drivers exist, so every admitted booking is still awaiting one
    let admitted_before_shutdown = dispatch.bookings_awaiting_driver();

    let admitted: usize = join_all(submitters)
        .await
        .into_iter()
        .map(|count| count.unwrap())
        .sum();
    assert_eq!(admitted, admitted_before_shutdown);
    assert_eq!(dispatch.bookings_awaiting_driver(), admitted_before_shutdown);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn shutdown_refuses_new_work_and_finishes_admitted_work() {
    let dispatch = fixed_dispatch(&[("North", 2), ("South", 2)], Duration::from_millis(40));
    assert!(dispatch.add_driver(Driver::new("Barbara", 100)).await);

    let north = dispatch.region("North").unwrap();

    let mut admitted = Vec::new();
    for index in 0..3 {
        admitted.push(
            dispatch
                .book_passenger(Passenger::new(format!("P-{index}"), 100), "North")
                .unwrap(),
        );
        if index < 2 {
            wait_until(|| north.booking_queue_length() == 0).await;
        }
    }

    dispatch.shutdown();
    dispatch.shutdown();

    assert_ne!(north.state(), RegionState::Accepting);

    for region in ["North", "South"] {
        let refused = dispatch
            .book_passenger(Passenger::new("Late", 100), region)
            .err();
        assert_eq!(refused, Some(DispatchError::RegionShuttingDown(region.to_string())));
    }

    let results = join_all(admitted).await;
    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 3);

    timeout(Duration::from_secs(2), dispatch.drained()).await.unwrap();
    assert_eq!(north.state(), RegionState::Drained);
    assert_eq!(north.snapshot().completed, 3);
    assert_eq!(dispatch.idle_drivers(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn awaiting_count_drops_by_one_per_acquired_driver() {
    let dispatch = fixed_dispatch(&[("Test", 3)], Duration::from_millis(300));

    let handles: Vec<_> = (0..3)
        .map(|index| {
            dispatch
                .book_passenger(Passenger::new(format!("P-{index}"), 100), "Test")
                .unwrap()
        })
        .collect();
    assert_eq!(dispatch.bookings_awaiting_driver(), 3);

    assert!(dispatch.add_driver(Driver::new("Barbara", 100)).await);
    wait_until(|| dispatch.bookings_awaiting_driver() == 2).await;

    assert!(dispatch.add_driver(Driver::new("Chen", 100)).await);
    wait_until(|| dispatch.bookings_awaiting_driver() == 1).await;

    assert!(dispatch.add_driver(Driver::new("Dana", 100)).await);
    wait_until(|| dispatch.bookings_awaiting_driver() == 0).await;

    let results = join_all(handles).await;
    let drivers: HashSet<String> = results
        .into_iter()
        .map(|r| r.unwrap().driver_name)
        .collect();
    assert_eq!(drivers.len(), 3);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_add_and_get_neither_lose_nor_duplicate_drivers() {
    let dispatch = Arc::new(Dispatch::new([("Test", 1)], false).unwrap());

    let producers: Vec<_> = (0..200)
        .map(|index| {
            let dispatch = dispatch.clone();
            tokio::spawn(async move { dispatch.add_driver(Driver::new(format!("D-{index}"), 0)).await })
        })
        .collect();
    let consumers: Vec<_> = (0..200)
        .map(|_| {
            let dispatch = dispatch.clone();
            tokio::spawn(async move { dispatch.get_driver().await.map(|d| d.name().to_string()) })
        })
        .collect();

    for added in join_all(producers).await {
        assert!(added.unwrap());
    }

    let mut seen = HashSet::new();
    for taken in join_all(consumers).await {
        let name = taken.unwrap().expect("pool is open");
        assert!(seen.insert(name), "driver handed out twice");
    }

    assert_eq!(seen.len(), 200);
    assert_eq!(dispatch.idle_drivers(), 0);
}

#[tokio::test]
async fn idle_pool_holds_at_most_999_drivers() {
    let dispatch = Dispatch::new([("Test", 1)], false).unwrap();
    for index in 0..MAX_IDLE_DRIVERS {
        assert!(dispatch.add_driver(Driver::new(format!("D-{index}"), 0)).await);
    }
    assert_eq!(dispatch.idle_drivers(), 999);

    let overflow = timeout(
        Duration::from_millis(50),
        dispatch.add_driver(Driver::new("D-overflow", 0)),
    )
    .await;
    assert!(overflow.is_err());
    assert_eq!(dispatch.idle_drivers(), 999);

    let first = dispatch.get_driver().await.map(|d| d.name().to_string());
    assert_eq!(first.as_deref(), Some("D-0"));
    assert!(dispatch.add_driver(Driver::new("D-overflow", 0)).await);
    assert_eq!(dispatch.idle_drivers(), 999);
}

#[tokio::test]
async fn closing_the_pool_cancels_bookings_still_waiting() {
    let dispatch = Dispatch::new([("Test", 1)], false).unwrap();
    let handle = dispatch
        .book_passenger(Passenger::new("Alex", 10), "Test")
        .unwrap();
    let booking = handle.id();

    sleep(Duration::from_millis(20)).await;
    dispatch.close_driver_pool();

    let outcome = timeout(Duration::from_secs(2), handle).await.unwrap();
    assert_eq!(outcome, Err(DispatchError::DriverAcquisitionCancelled(booking)));
    assert_eq!(dispatch.bookings_awaiting_driver(), 0);

    let snapshot = dispatch.region("Test").unwrap().snapshot();
    assert_eq!(snapshot.failed, 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn driver_is_retired_when_the_pool_closes_mid_trip() {
    let dispatch = fixed_dispatch(&[("Test", 1)], Duration::from_millis(60));
    assert!(dispatch.add_driver(Driver::new("Barbara", 100)).await);

    let handle = dispatch
        .book_passenger(Passenger::new("Alex", 100), "Test")
        .unwrap();
    wait_until(|| dispatch.bookings_awaiting_driver() == 0).await;
    dispatch.close_driver_pool();

    let result = timeout(Duration::from_secs(2), handle).await.unwrap().unwrap();
    assert_eq!(result.driver_name, "Barbara");
    assert_eq!(dispatch.idle_drivers(), 0);
}
