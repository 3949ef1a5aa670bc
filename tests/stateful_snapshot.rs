mod common;

use std::sync::{Arc, Mutex};

use chronicle_bus::{Bus, BusConfig, Handler, HandlerOutcome, PublishOpts, SubscriptionOpts};

#[tokio::test]
async fn late_subscriber_gets_snapshot_then_live_updates() {
    common::init_logging();
    let bus = Bus::new(BusConfig::default());

    let keyed = |key: &str| PublishOpts {
        key: Some(key.to_string()),
        store: true,
        ..Default::default()
    };
    bus.publish("stock.prices", 1, keyed("A")).unwrap();
    bus.publish("stock.prices", 2, keyed("B")).unwrap();
    bus.publish("stock.prices", 3, keyed("A")).unwrap();

    let mut state: Vec<(Option<String>, i32)> = bus
        .get_channel_state::<i32>("stock.prices")
        .unwrap()
        .into_iter()
        .map(|m| (m.key, m.body))
        .collect();
    state.sort();
    assert_eq!(
        state,
        vec![(Some("A".to_string()), 3), (Some("B".to_string()), 2)]
    );

    let received = Arc::new(Mutex::new(Vec::new()));
    let received_handler = Arc::clone(&received);
    let handler: Handler<i32> = Arc::new(move |m| {
        let received_handler = Arc::clone(&received_handler);
        Box::pin(async move {
            received_handler.lock().unwrap().push((m.key.clone(), m.body, m.id));
            HandlerOutcome::Ok
        })
    });

    let opts = SubscriptionOpts {
        fetch_state: true,
        ..Default::default()
    };
    let sub = bus.subscribe("stock.prices", handler, opts).unwrap();

    bus.publish("stock.prices", 4, keyed("A")).unwrap();
    tokio::time::sleep(std::time::Duration::from_millis(100)).await;

    let seen = received.lock().unwrap().clone();
    assert_eq!(seen.len(), 3);

    let (snapshot, live) = seen.split_at(2);
    let mut snapshot_sorted = snapshot.to_vec();
    snapshot_sorted.sort_by(|a, b| a.0.cmp(&b.0));
    assert_eq!(
        snapshot_sorted.iter().map(|(k, b, _)| (k.clone(), *b)).collect::<Vec<_>>(),
        vec![(Some("A".to_string()), 3), (Some("B".to_string()), 2)]
    );
    assert_eq!(live[0].0.as_deref(), Some("A"));
    assert_eq!(live[0].1, 4);

    let ids: Vec<i64> = seen.iter().map(|(_, _, id)| *id).collect();
    assert!(ids.windows(2).all(|w| w[0] < w[1]));
    assert_eq!(sub.last_sent_seq(), ids[2]);
}
