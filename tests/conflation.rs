mod common;

use std::sync::atomic::Ordering;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chronicle_bus::{
    Bus, BusConfig, Capacity, Handler, HandlerOutcome, OverflowPolicy, PublishOpts, SubscriptionOpts,
};

#[tokio::test]
async fn conflating_subscription_collapses_interleaved_publishers_by_key() {
    common::init_logging();
    let bus = Arc::new(Bus::new(BusConfig::default()));
    let last_seen = Arc::new(Mutex::new(None));
    let last_seen_handler = Arc::clone(&last_seen);
    let handler: Handler<i32> = Arc::new(move |m| {
        let last_seen_handler = Arc::clone(&last_seen_handler);
        Box::pin(async move {
            *last_seen_handler.lock().unwrap() = Some(m.body);
            HandlerOutcome::Ok
        })
    });

    let opts = SubscriptionOpts {
        overflow: OverflowPolicy::ConflateAndSkipUpdates,
        buffer_capacity: Capacity::Bounded(64),
        conflation_interval: Duration::from_millis(50),
        ..Default::default()
    };
    let sub = bus.subscribe("stock.prices", handler, opts).unwrap();

    let start = tokio::time::Instant::now();
    let publisher = |bus: Arc<Bus>, base: i32| async move {
        for i in 0..100 {
            bus.publish(
                "stock.prices",
                base + i,
                PublishOpts {
                    key: Some("K".to_string()),
                    ..Default::default()
                },
            )
            .unwrap();
            tokio::task::yield_now().await;
        }
    };
    tokio::join!(publisher(Arc::clone(&bus), 0), publisher(Arc::clone(&bus), 1_000_000));

    // Let the conflation timer flush whatever is still buffered.
    tokio::time::sleep(Duration::from_millis(200)).await;
    let duration = start.elapsed();

    let processed = sub.statistics().counters.processed.load(Ordering::Relaxed);
    let max_allowed = (duration.as_millis() / 50 + 2) as u64;
    assert!(
        processed <= max_allowed,
        "processed {processed} exceeds ceil(duration/interval) bound {max_allowed}"
    );
    assert!(last_seen.lock().unwrap().is_some());
}
