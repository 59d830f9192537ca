use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use channel_virality::jobs::SingleFlight;

async fn counted(flights: &SingleFlight<u32, u32>, calls: Arc<AtomicUsize>, key: u32) -> Option<u32> {
    flights
        .run(key, move || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            tokio::task::yield_now().await;
            key * 10
        })
        .await
}

#[tokio::test]
async fn concurrent_callers_share_one_computation() {
    let flights = SingleFlight::new();
    let calls = Arc::new(AtomicUsize::new(0));

    let (a, b, c, d) = tokio::join!(
        counted(&flights, calls.clone(), 1),
        counted(&flights, calls.clone(), 1),
        counted(&flights, calls.clone(), 1),
        counted(&flights, calls.clone(), 1),
    );

    assert_eq!([a, b, c, d], [Some(10); 4]);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(flights.in_flight(), 0);
}

#[tokio::test]
async fn distinct_keys_run_independently() {
    let flights = SingleFlight::new();
    let calls = Arc::new(AtomicUsize::new(0));

    let (a, b) = tokio::join!(
        counted(&flights, calls.clone(), 1),
        counted(&flights, calls.clone(), 2),
    );

    assert_eq!(a, Some(10));
    assert_eq!(b, Some(20));
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn finished_key_starts_fresh_work() {
    let flights = SingleFlight::new();
    let calls = Arc::new(AtomicUsize::new(0));

    counted(&flights, calls.clone(), 3).await;
    counted(&flights, calls.clone(), 3).await;

    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn panicking_computation_releases_the_key() {
    let flights: SingleFlight<u32, u32> = SingleFlight::new();

    let result = flights
        .run(9, || async {
            if flights_should_panic() {
                panic!("computation blew up");
            }
            0
        })
        .await;

    assert_eq!(result, None);
    assert_eq!(flights.in_flight(), 0);

    let calls = Arc::new(AtomicUsize::new(0));
    assert_eq!(counted(&flights, calls, 9).await, Some(90));
}

fn flights_should_panic() -> bool {
    true
}
