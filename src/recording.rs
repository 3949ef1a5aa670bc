//! Recording Utilities: frame-to-frame transforms over recorded streams.
//! Every utility is built from `Player` decode + `codec::encode_frame`; no
//! utility needs to know what a body type is beyond decoding it once.

use std::collections::HashMap;

use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};

use crate::codec;
use crate::error::Result;
use crate::msg::Msg;
use crate::player::{PacingMode, Player};
use crate::serializer::Serializer;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DuplicatePolicy {
    KeepFirst,
    KeepLast,
    KeepAll,
}

/// N-way timestamp-ordered merge of already-decoded sources. Keeps one
/// cursor per source and always emits the globally smallest timestamp
/// next, the same discipline a fan-in reader uses over multiple readers.
pub struct MergeOptions {
    pub duplicate_policy: DuplicatePolicy,
}

pub async fn merge<R, B, W>(
    sources: Vec<R>,
    serializer: std::sync::Arc<dyn Serializer<B>>,
    mut sink: W,
    opts: MergeOptions,
) -> Result<i64>
where
    R: AsyncRead + Unpin,
    B: Default,
    W: AsyncWrite + Unpin,
{
    let mut players: Vec<Player<R, B>> = sources
        .into_iter()
        .map(|s| Player::new(s, std::sync::Arc::clone(&serializer), PacingMode::AsFastAsPossible))
        .collect();

    // One pending message per source; `None` once that source is exhausted.
    let mut pending: Vec<Option<Msg<B>>> = Vec::with_capacity(players.len());
    for p in players.iter_mut() {
        pending.push(p.next().await?);
    }

    let mut seen_ids: HashMap<i64, ()> = HashMap::new();
    let mut written = 0i64;
    let mut buf = Vec::new();

    loop {
        let next_idx = pending
            .iter()
            .enumerate()
            .filter_map(|(i, m)| m.as_ref().map(|m| (i, m.timestamp)))
            .min_by_key(|(_, ts)| *ts)
            .map(|(i, _)| i);

        let Some(idx) = next_idx else { break };
        let msg = pending[idx].take().unwrap();

        let keep = match opts.duplicate_policy {
            DuplicatePolicy::KeepAll => true,
            DuplicatePolicy::KeepFirst => seen_ids.insert(msg.id, ()).is_none(),
            DuplicatePolicy::KeepLast => {
                seen_ids.insert(msg.id, ());
                true
            }
        };
        if keep {
            buf.clear();
            codec::encode_frame(&msg, serializer.as_ref(), &mut buf)?;
            sink.write_all(&buf).await?;
            written += 1;
        }

        pending[idx] = players[idx].next().await?;
    }
    sink.flush().await?;
    Ok(written)
}

#[derive(Clone, Copy, Debug)]
pub enum SplitBoundary {
    MessageCount(i64),
    TimeDuration(i64),
    FileSize(i64),
}

/// Splits one source into chunk sinks produced on demand by
/// `next_sink(chunk_index)`, switching chunks whenever `boundary` is
/// crossed. Returns the number of chunks written.
pub async fn split<R, B, W, F, Fut>(
    source: R,
    serializer: std::sync::Arc<dyn Serializer<B>>,
    boundary: SplitBoundary,
    mut next_sink: F,
) -> Result<usize>
where
    R: AsyncRead + Unpin,
    B: Default,
    W: AsyncWrite + Unpin,
    F: FnMut(usize) -> Fut,
    Fut: std::future::Future<Output = Result<W>>,
{
    let mut player: Player<R, B> = Player::new(source, serializer.clone(), PacingMode::AsFastAsPossible);
    let mut chunk_index = 0usize;
    let mut sink = next_sink(chunk_index).await?;
    let mut buf = Vec::new();

    let mut messages_in_chunk = 0i64;
    let mut bytes_in_chunk = 0i64;
    let mut chunk_start_ts: Option<i64> = None;

    while let Some(msg) = player.next().await? {
        let crosses = match boundary {
            SplitBoundary::MessageCount(limit) => messages_in_chunk >= limit,
            SplitBoundary::TimeDuration(limit) => {
                chunk_start_ts.is_some_and(|start| msg.timestamp - start >= limit)
            }
            SplitBoundary::FileSize(limit) => bytes_in_chunk >= limit,
        };
        if crosses {
            sink.flush().await?;
            chunk_index += 1;
            sink = next_sink(chunk_index).await?;
            messages_in_chunk = 0;
            bytes_in_chunk = 0;
            chunk_start_ts = None;
        }

        chunk_start_ts.get_or_insert(msg.timestamp);
        buf.clear();
        codec::encode_frame(&msg, serializer.as_ref(), &mut buf)?;
        sink.write_all(&buf).await?;
        messages_in_chunk += 1;
        bytes_in_chunk += buf.len() as i64;
    }
    sink.flush().await?;
    Ok(chunk_index + 1)
}

/// Re-emits only the frames matching `predicate`.
pub async fn filter<R, B, W>(
    source: R,
    serializer: std::sync::Arc<dyn Serializer<B>>,
    mut sink: W,
    mut predicate: impl FnMut(&Msg<B>) -> bool,
) -> Result<i64>
where
    R: AsyncRead + Unpin,
    B: Default,
    W: AsyncWrite + Unpin,
{
    let mut player: Player<R, B> = Player::new(source, serializer.clone(), PacingMode::AsFastAsPossible);
    let mut buf = Vec::new();
    let mut kept = 0i64;
    while let Some(msg) = player.next().await? {
        if predicate(&msg) {
            buf.clear();
            codec::encode_frame(&msg, serializer.as_ref(), &mut buf)?;
            sink.write_all(&buf).await?;
            kept += 1;
        }
    }
    sink.flush().await?;
    Ok(kept)
}

/// Decodes with `old_serializer`, re-encodes with `new_serializer`.
/// Non-body fields pass through unchanged; the caller is responsible for
/// updating the recording's metadata sidecar with the new serialiser
/// version, since this function only sees bytes.
pub async fn convert<R, B, W>(
    source: R,
    old_serializer: std::sync::Arc<dyn Serializer<B>>,
    new_serializer: std::sync::Arc<dyn Serializer<B>>,
    mut sink: W,
) -> Result<i64>
where
    R: AsyncRead + Unpin,
    B: Default,
    W: AsyncWrite + Unpin,
{
    let mut player: Player<R, B> = Player::new(source, old_serializer, PacingMode::AsFastAsPossible);
    let mut buf = Vec::new();
    let mut written = 0i64;
    while let Some(msg) = player.next().await? {
        buf.clear();
        codec::encode_frame(&msg, new_serializer.as_ref(), &mut buf)?;
        sink.write_all(&buf).await?;
        written += 1;
    }
    sink.flush().await?;
    Ok(written)
}
