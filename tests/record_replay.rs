mod common;

use std::sync::Arc;

use chronicle_bus::{Bus, BusConfig, PacingMode, Player, PublishOpts, RecordOpts, Recorder};
use common::I32Serializer;

#[tokio::test]
async fn recorded_stream_replays_to_the_same_ordered_messages() {
    common::init_logging();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("num.inc.rec");

    let bus = Bus::new(BusConfig::default());
    let serializer: Arc<dyn chronicle_bus::Serializer<i32>> = Arc::new(I32Serializer);
    let sink = tokio::fs::File::create(&path).await.unwrap();

    let recorder = Recorder::<i32>::start(
        &bus,
        "num.inc",
        sink,
        Arc::clone(&serializer),
        RecordOpts::default(),
        None,
        None,
    )
    .await
    .unwrap();

    for i in 0..1000 {
        bus.publish("num.inc", i, PublishOpts::default()).unwrap();
    }
    // Let the subscription's consumer task drain the full publish batch
    // into the recorder's pipe before tearing it down.
    tokio::time::sleep(std::time::Duration::from_millis(300)).await;
    recorder.dispose().await;

    let source = tokio::fs::File::open(&path).await.unwrap();
    let mut player: Player<_, i32> = Player::new(source, serializer, PacingMode::AsFastAsPossible);

    let mut replayed = Vec::new();
    while let Some(msg) = player.next().await.unwrap() {
        replayed.push(msg.body);
    }
    assert_eq!(replayed, (0..1000).collect::<Vec<_>>());
}
