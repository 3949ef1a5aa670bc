//! Player / Indexed Player: reads frames back out of a recording as a
//! lazy, optionally-paced message sequence, with seek support when an
//! index has been loaded alongside the source.

use std::time::Duration;

use tokio::io::{AsyncRead, AsyncSeek, AsyncSeekExt};

use crate::codec;
use crate::error::Result;
use crate::index::IndexReader;
use crate::msg::Msg;
use crate::serializer::Serializer;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PacingMode {
    AsFastAsPossible,
    RespectOriginalMessageIntervals,
}

/// Sequential reader over a recording. `next()` is the only suspension
/// point; there is no background task, so dropping the Player simply
/// drops the source.
pub struct Player<R, B> {
    source: R,
    serializer: std::sync::Arc<dyn Serializer<B>>,
    pacing: PacingMode,
    last_timestamp: Option<i64>,
}

impl<R, B> Player<R, B>
where
    R: AsyncRead + Unpin,
    B: Default,
{
    pub fn new(source: R, serializer: std::sync::Arc<dyn Serializer<B>>, pacing: PacingMode) -> Self {
        Self {
            source,
            serializer,
            pacing,
            last_timestamp: None,
        }
    }

    /// Yields the next message, or `None` at a clean EOF. Finite and
    /// non-restartable unless the caller seeks the underlying source.
    pub async fn next(&mut self) -> Result<Option<Msg<B>>> {
        let msg = codec::read_frame(&mut self.source, self.serializer.as_ref()).await?;
        let Some(msg) = msg else {
            return Ok(None);
        };

        if self.pacing == PacingMode::RespectOriginalMessageIntervals {
            if let Some(prev) = self.last_timestamp {
                let delta = (msg.timestamp - prev).max(0);
                if delta > 0 {
                    tokio::time::sleep(Duration::from_millis(delta as u64)).await;
                }
            }
        }
        self.last_timestamp = Some(msg.timestamp);
        Ok(Some(msg))
    }
}

impl<R, B> Player<R, B>
where
    R: AsyncRead + AsyncSeek + Unpin,
    B: Default,
{
    /// Wraps this player with a loaded index to support `seek_to_message`
    /// / `seek_to_timestamp`; reading after a seek resumes with ordinary
    /// Player logic from the seeked frame.
    pub fn into_indexed(self, index: IndexReader) -> IndexedPlayer<R, B> {
        IndexedPlayer {
            player: self,
            index,
        }
    }
}

pub struct IndexedPlayer<R, B> {
    player: Player<R, B>,
    index: IndexReader,
}

impl<R, B> IndexedPlayer<R, B>
where
    R: AsyncRead + AsyncSeek + Unpin,
    B: Default,
{
    pub fn total_messages(&self) -> i64 {
        self.index.total_messages
    }

    pub async fn seek_to_message(&mut self, n: i64) -> Result<i64> {
        let entry = self.index.seek_entry_for_message(n)?;
        self.player
            .source
            .seek(std::io::SeekFrom::Start(entry.file_offset as u64))
            .await?;
        self.player.last_timestamp = None;
        Ok(entry.message_number)
    }

    pub async fn seek_to_timestamp(&mut self, t: i64) -> Result<i64> {
        let entry = self.index.seek_entry_for_timestamp(t)?;
        self.player
            .source
            .seek(std::io::SeekFrom::Start(entry.file_offset as u64))
            .await?;
        self.player.last_timestamp = None;
        Ok(entry.message_number)
    }

    pub async fn next(&mut self) -> Result<Option<Msg<B>>> {
        self.player.next().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::msg::MsgType;
    use crate::serializer::SerializerVersion;
    use std::sync::Arc;

    struct I32Serializer;
    impl Serializer<i32> for I32Serializer {
        fn version(&self) -> SerializerVersion {
            (1, 0)
        }
        fn serialize(&self, value: &i32, buf: &mut Vec<u8>) -> Result<()> {
            buf.extend_from_slice(&value.to_le_bytes());
            Ok(())
        }
        fn deserialize(&self, bytes: &[u8]) -> Result<i32> {
            Ok(i32::from_le_bytes(bytes.try_into().unwrap()))
        }
    }

    fn msg(id: i64, body: i32) -> Msg<i32> {
        Msg {
            id,
            timestamp: id,
            msg_type: MsgType::ChannelUpdate,
            correlation_id: None,
            key: None,
            inception_ticks: 0,
            from: None,
            body,
            tag_a: 0,
        }
    }

    #[tokio::test]
    async fn plays_back_frames_in_order() {
        let serializer: Arc<dyn Serializer<i32>> = Arc::new(I32Serializer);
        let mut buf = Vec::new();
        for i in 0..5 {
            codec::encode_frame(&msg(i, i as i32 * 10), serializer.as_ref(), &mut buf).unwrap();
        }

        let cursor = std::io::Cursor::new(buf);
        let mut player: Player<_, i32> = Player::new(cursor, serializer, PacingMode::AsFastAsPossible);

        let mut seen = Vec::new();
        while let Some(m) = player.next().await.unwrap() {
            seen.push(m.body);
        }
        assert_eq!(seen, vec![0, 10, 20, 30, 40]);
    }
}
