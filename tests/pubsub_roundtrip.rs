mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use chronicle_bus::{Bus, BusConfig, Handler, HandlerOutcome, PublishOpts, SubscriptionOpts};

#[tokio::test]
async fn subscriber_receives_messages_in_order() {
    common::init_logging();
    let bus = Bus::new(BusConfig::default());
    let received = Arc::new(Mutex::new(Vec::new()));
    let received_handler = Arc::clone(&received);

    let handler: Handler<i32> = Arc::new(move |m| {
        let received_handler = Arc::clone(&received_handler);
        Box::pin(async move {
            received_handler.lock().unwrap().push(m.body);
            HandlerOutcome::Ok
        })
    });

    let sub = bus
        .subscribe("num.inc", handler, SubscriptionOpts::default())
        .unwrap();

    for i in 0..100 {
        bus.publish("num.inc", i, PublishOpts::default()).unwrap();
    }

    // Give the subscriber's consumer task time to drain the whole batch.
    tokio::time::sleep(std::time::Duration::from_millis(200)).await;

    let seen = received.lock().unwrap().clone();
    assert_eq!(seen, (0..100).collect::<Vec<_>>());

    let counters = &sub.statistics().counters;
    assert_eq!(counters.enqueued.load(Ordering::Relaxed), 100);
    assert_eq!(counters.dequeued.load(Ordering::Relaxed), 100);
    assert_eq!(counters.processed.load(Ordering::Relaxed), 100);
    assert_eq!(counters.dropped.load(Ordering::Relaxed), 0);
}

#[tokio::test]
async fn overloaded_skip_updates_subscription_accounts_for_every_message() {
    common::init_logging();
    let bus = Bus::new(BusConfig::default());
    let counter = Arc::new(AtomicUsize::new(0));
    let counter_handler = Arc::clone(&counter);
    let handler: Handler<i32> = Arc::new(move |_m| {
        let counter_handler = Arc::clone(&counter_handler);
        Box::pin(async move {
            // Slow handler so the bounded queue backs up and some publishes overflow.
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
            counter_handler.fetch_add(1, Ordering::SeqCst);
            HandlerOutcome::Ok
        })
    });

    let opts = SubscriptionOpts {
        buffer_capacity: chronicle_bus::Capacity::Bounded(4),
        overflow: chronicle_bus::OverflowPolicy::SkipUpdates,
        ..Default::default()
    };
    let sub = bus.subscribe("num.fast", handler, opts).unwrap();

    for i in 0..50 {
        bus.publish("num.fast", i, PublishOpts::default()).unwrap();
    }
    tokio::time::sleep(std::time::Duration::from_millis(500)).await;

    let counters = &sub.statistics().counters;
    let enqueued = counters.enqueued.load(Ordering::Relaxed);
    let dequeued = counters.dequeued.load(Ordering::Relaxed);
    let dropped = counters.dropped.load(Ordering::Relaxed);
    assert_eq!(enqueued, dequeued + dropped);
    assert!(dropped > 0, "expected the slow handler to force some drops");
}
