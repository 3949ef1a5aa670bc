mod common;

use std::sync::{Arc, Mutex};

use chronicle_bus::{Bus, BusConfig, Handler, HandlerOutcome, PublishOpts, SubscriptionOpts};

fn counting_handler(sink: Arc<Mutex<Vec<String>>>) -> Handler<i32> {
    Arc::new(move |m| {
        let sink = Arc::clone(&sink);
        Box::pin(async move {
            sink.lock().unwrap().push(format!("{}={}", m.key.clone().unwrap_or_default(), m.body));
            HandlerOutcome::Ok
        })
    })
}

#[tokio::test]
async fn wildcard_registered_before_channel_still_receives_publishes() {
    common::init_logging();
    let bus = Bus::new(BusConfig::default());
    let seen = Arc::new(Mutex::new(Vec::new()));
    bus.subscribe(
        "stock.trades.*",
        counting_handler(Arc::clone(&seen)),
        SubscriptionOpts::default(),
    )
    .unwrap();

    bus.publish(
        "stock.trades.NYSE",
        1,
        PublishOpts {
            key: Some("NYSE".into()),
            ..Default::default()
        },
    )
    .unwrap();
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;

    assert_eq!(seen.lock().unwrap().as_slice(), ["NYSE=1"]);
}

#[tokio::test]
async fn wildcard_subscribed_after_channels_exist_attaches_to_both() {
    let bus = Bus::new(BusConfig::default());
    bus.publish("stock.prices", 10, PublishOpts::default()).unwrap();
    bus.publish("stock.trades.NYSE", 20, PublishOpts::default()).unwrap();

    let seen = Arc::new(Mutex::new(Vec::new()));
    bus.subscribe("stock.>", counting_handler(Arc::clone(&seen)), SubscriptionOpts::default())
        .unwrap();

    bus.publish("stock.prices", 11, PublishOpts::default()).unwrap();
    bus.publish("stock.trades.NYSE", 21, PublishOpts::default()).unwrap();
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;

    let mut got = seen.lock().unwrap().clone();
    got.sort();
    assert_eq!(got, vec!["=11".to_string(), "=21".to_string()]);
}
