//! Recorder: subscribes to a channel (or pattern) and durably frames its
//! message stream to a byte sink, optionally maintaining a seek index and
//! a metadata sidecar alongside it.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;

use crate::bus::Bus;
use crate::codec;
use crate::error::Result;
use crate::index::IndexWriter;
use crate::metadata::RecordingMetadata;
use crate::msg::Msg;
use crate::queue::Capacity;
use crate::serializer::Serializer;
use crate::subscription::{Handler, HandlerOutcome, Subscription, SubscriptionOpts};

#[derive(Default)]
pub struct RecordingStats {
    pub frames_written: AtomicU64,
    pub bytes_written: AtomicU64,
}

/// Options controlling index and metadata side effects of a recording.
pub struct RecordOpts {
    pub save_initial_state: bool,
    pub conflation_interval: std::time::Duration,
    pub index_interval: i32,
}

impl Default for RecordOpts {
    fn default() -> Self {
        Self {
            save_initial_state: false,
            conflation_interval: std::time::Duration::from_millis(0),
            index_interval: crate::index::DEFAULT_INTERVAL,
        }
    }
}

/// Owns the underlying subscription and the pipe feeding the byte sink.
/// Disposal order: stop the subscription, drain the pipe, finalize the
/// index, release buffers. Dispose never closes the caller's sink.
pub struct Recorder<B> {
    subscription: Arc<Subscription<B>>,
    pipe_tx: mpsc::Sender<Vec<u8>>,
    drain_handle: Mutex<Option<tokio::task::JoinHandle<Result<()>>>>,
    cancel: CancellationToken,
    stats: Arc<RecordingStats>,
}

impl<B: Clone + Send + Sync + 'static> Recorder<B> {
    /// Starts recording `channel` on `bus` into `sink`, using `serializer`
    /// to encode bodies. `index_sink`, if given, receives a sparse seek
    /// index in lock-step. `metadata`, if given, is written as a sidecar
    /// at `metadata_path` when supplied.
    pub async fn start<W>(
        bus: &Bus,
        channel: &str,
        mut sink: W,
        serializer: Arc<dyn Serializer<B>>,
        opts: RecordOpts,
        mut index_sink: Option<(tokio::fs::File, String)>,
        metadata: Option<(RecordingMetadata, std::path::PathBuf)>,
    ) -> Result<Arc<Self>>
    where
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let stats = Arc::new(RecordingStats::default());
        let (pipe_tx, mut pipe_rx) = mpsc::channel::<Vec<u8>>(256);
        let cancel = CancellationToken::new();

        let drain_stats = Arc::clone(&stats);
        let mut index_writer = match &mut index_sink {
            Some((file, _)) => Some(IndexWriter::create(file, opts.index_interval).await?),
            None => None,
        };
        let mut metadata_state = metadata;
        let mut message_number: i64 = 0;
        let mut byte_offset: i64 = 0;

        let drain_cancel = cancel.clone();
        let drain_handle = tokio::spawn(async move {
            loop {
                tokio::select! {
                    biased;
                    _ = drain_cancel.cancelled() => {
                        while let Ok(frame) = pipe_rx.try_recv() {
                            drain_one(&mut sink, &frame, &drain_stats, &mut index_writer, &mut index_sink, &mut message_number, &mut byte_offset).await?;
                        }
                        break;
                    }
                    frame = pipe_rx.recv() => {
                        match frame {
                            Some(frame) => {
                                drain_one(&mut sink, &frame, &drain_stats, &mut index_writer, &mut index_sink, &mut message_number, &mut byte_offset).await?;
                            }
                            None => break,
                        }
                    }
                }
            }
            sink.flush().await?;
            if let (Some(writer), Some((file, _))) = (&index_writer, &mut index_sink) {
                writer.finalize(file).await?;
            }
            if let Some((meta, path)) = metadata_state.take() {
                meta.write_atomic(&path).await?;
            }
            Ok(())
        });

        let pipe_tx_for_handler = pipe_tx.clone();
        let serializer_for_handler = Arc::clone(&serializer);
        let handler: Handler<B> = Arc::new(move |msg: Msg<B>| {
            let pipe_tx = pipe_tx_for_handler.clone();
            let serializer = Arc::clone(&serializer_for_handler);
            Box::pin(async move {
                let mut buf = Vec::new();
                if let Err(e) = codec::encode_frame(&msg, serializer.as_ref(), &mut buf) {
                    return HandlerOutcome::Err(e.to_string());
                }
                match pipe_tx.send(buf).await {
                    Ok(()) => HandlerOutcome::Ok,
                    Err(_) => HandlerOutcome::Err("recorder pipe closed".into()),
                }
            })
        });

        // Unbounded: a recorder's entire purpose is a faithful ordered log,
        // so it buffers in memory under backpressure rather than silently
        // dropping messages the way a SkipUpdates/bounded subscription would.
        let sub_opts = SubscriptionOpts {
            name: Some(format!("recorder:{channel}")),
            fetch_state: opts.save_initial_state,
            buffer_capacity: Capacity::Unbounded,
            conflation_interval: opts.conflation_interval,
            ..Default::default()
        };
        let subscription = bus.subscribe(channel, handler, sub_opts)?;

        Ok(Arc::new(Self {
            subscription,
            pipe_tx,
            drain_handle: Mutex::new(Some(drain_handle)),
            cancel,
            stats,
        }))
    }

    pub fn underlying_subscription(&self) -> &Arc<Subscription<B>> {
        &self.subscription
    }

    pub fn recording_stats(&self) -> &RecordingStats {
        &self.stats
    }

    /// Idempotent: stops the subscription, then lets the pipe drain
    /// completely (including whatever was already buffered) before the
    /// sink and index are finalized.
    pub async fn dispose(&self) {
        self.subscription.dispose();
        drop(self.pipe_tx.clone());
        self.cancel.cancel();
        let mut guard = self.drain_handle.lock().await;
        if let Some(handle) = guard.take() {
            let _ = handle.await;
        }
    }
}

#[allow(clippy::too_many_arguments)]
async fn drain_one<W: AsyncWrite + Unpin>(
    sink: &mut W,
    frame: &[u8],
    stats: &RecordingStats,
    index_writer: &mut Option<IndexWriter>,
    index_sink: &mut Option<(tokio::fs::File, String)>,
    message_number: &mut i64,
    byte_offset: &mut i64,
) -> Result<()> {
    sink.write_all(frame).await?;
    stats.frames_written.fetch_add(1, Ordering::Relaxed);
    stats.bytes_written.fetch_add(frame.len() as u64, Ordering::Relaxed);

    if let (Some(writer), Some((file, _))) = (index_writer, index_sink) {
        // Timestamp lives at header offset 20..28 of every frame.
        let timestamp = i64::from_le_bytes(frame[20..28].try_into().unwrap());
        writer.record(file, *message_number, *byte_offset, timestamp).await?;
    }
    *message_number += 1;
    *byte_offset += frame.len() as i64;
    Ok(())
}
