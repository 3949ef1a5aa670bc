mod common;

use std::sync::Arc;

use chronicle_bus::{
    Bus, BusConfig, IndexReader, PacingMode, Player, PublishOpts, RecordOpts, Recorder,
};
use common::I32Serializer;

#[tokio::test]
async fn indexed_player_seeks_near_the_requested_message() {
    common::init_logging();
    let dir = tempfile::tempdir().unwrap();
    let data_path = dir.path().join("num.inc.rec");
    let index_path = dir.path().join("num.inc.rec.idx");

    let bus = Bus::new(BusConfig::default());
    let serializer: Arc<dyn chronicle_bus::Serializer<i32>> = Arc::new(I32Serializer);
    let sink = tokio::fs::File::create(&data_path).await.unwrap();
    let index_sink = tokio::fs::File::create(&index_path).await.unwrap();

    let opts = RecordOpts {
        index_interval: 100,
        ..Default::default()
    };
    let recorder = Recorder::<i32>::start(
        &bus,
        "num.inc",
        sink,
        Arc::clone(&serializer),
        opts,
        Some((index_sink, index_path.to_string_lossy().into_owned())),
        None,
    )
    .await
    .unwrap();

    for i in 0..10_000 {
        bus.publish("num.inc", i, PublishOpts::default()).unwrap();
    }
    tokio::time::sleep(std::time::Duration::from_millis(1500)).await;
    recorder.dispose().await;

    let mut index_file = tokio::fs::File::open(&index_path).await.unwrap();
    let index = IndexReader::load(&mut index_file).await.unwrap();
    assert_eq!(index.total_messages, 10_000);

    let source = tokio::fs::File::open(&data_path).await.unwrap();
    let player: Player<_, i32> = Player::new(source, serializer, PacingMode::AsFastAsPossible);
    let mut indexed = player.into_indexed(index);

    let seeked = indexed.seek_to_message(5_555).await.unwrap();
    assert!((5_500..=5_555).contains(&seeked));

    let mut reached_target = false;
    while let Some(msg) = indexed.next().await.unwrap() {
        if msg.id >= seeked {
            reached_target = true;
            break;
        }
    }
    assert!(reached_target);
}
