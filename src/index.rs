//! Index Writer/Reader: a sparse `(message#, offset, timestamp)` seek
//! index sidecar, one entry every `interval` messages, enabling O(log N)
//! seeks without scanning the whole recording.

use tokio::io::{AsyncRead, AsyncReadExt, AsyncSeek, AsyncSeekExt, AsyncWrite, AsyncWriteExt};

use crate::error::{Error, Result};

const MAGIC: &[u8; 4] = b"RIDX";
const VERSION: u16 = 1;
const HEADER_LEN: usize = 28;
const ENTRY_LEN: usize = 24;
pub const DEFAULT_INTERVAL: i32 = 1000;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct IndexEntry {
    pub message_number: i64,
    pub file_offset: i64,
    pub timestamp: i64,
}

/// Streams entries to an index sink as the Recorder advances, rewriting
/// the header with final counts on `finalize`.
pub struct IndexWriter {
    interval: i32,
    total_messages: i64,
    entry_count: i64,
}

impl IndexWriter {
    pub async fn create<W: AsyncWrite + Unpin>(sink: &mut W, interval: i32) -> Result<Self> {
        let writer = Self {
            interval,
            total_messages: 0,
            entry_count: 0,
        };
        sink.write_all(&writer.header_bytes()).await?;
        Ok(writer)
    }

    fn header_bytes(&self) -> [u8; HEADER_LEN] {
        let mut buf = [0u8; HEADER_LEN];
        buf[0..4].copy_from_slice(MAGIC);
        buf[4..6].copy_from_slice(&VERSION.to_le_bytes());
        buf[6..8].copy_from_slice(&0u16.to_le_bytes());
        buf[8..12].copy_from_slice(&self.interval.to_le_bytes());
        buf[12..20].copy_from_slice(&self.total_messages.to_le_bytes());
        buf[20..28].copy_from_slice(&self.entry_count.to_le_bytes());
        buf
    }

    /// Called once per message the Recorder frames; writes a new entry
    /// every `interval`-th message (the first message is always indexed).
    pub async fn record<W: AsyncWrite + Unpin>(
        &mut self,
        sink: &mut W,
        message_number: i64,
        file_offset: i64,
        timestamp: i64,
    ) -> Result<()> {
        self.total_messages = message_number + 1;
        if message_number % self.interval.max(1) as i64 == 0 {
            let mut entry = [0u8; ENTRY_LEN];
            entry[0..8].copy_from_slice(&message_number.to_le_bytes());
            entry[8..16].copy_from_slice(&file_offset.to_le_bytes());
            entry[16..24].copy_from_slice(&timestamp.to_le_bytes());
            sink.write_all(&entry).await?;
            self.entry_count += 1;
        }
        Ok(())
    }

    pub async fn finalize<W: AsyncWrite + AsyncSeek + Unpin>(&self, sink: &mut W) -> Result<()> {
        sink.seek(std::io::SeekFrom::Start(0)).await?;
        sink.write_all(&self.header_bytes()).await?;
        sink.seek(std::io::SeekFrom::End(0)).await?;
        sink.flush().await?;
        Ok(())
    }
}

/// A fully loaded index, kept in memory for binary search.
pub struct IndexReader {
    pub interval: i32,
    pub total_messages: i64,
    pub entries: Vec<IndexEntry>,
}

impl IndexReader {
    pub async fn load<R: AsyncRead + Unpin>(source: &mut R) -> Result<Self> {
        let mut header = [0u8; HEADER_LEN];
        source.read_exact(&mut header).await?;
        if &header[0..4] != MAGIC {
            return Err(Error::IndexError("bad magic"));
        }
        let version = u16::from_le_bytes(header[4..6].try_into().unwrap());
        if version != VERSION {
            return Err(Error::IndexError("unsupported index version"));
        }
        let interval = i32::from_le_bytes(header[8..12].try_into().unwrap());
        let total_messages = i64::from_le_bytes(header[12..20].try_into().unwrap());
        let entry_count = i64::from_le_bytes(header[20..28].try_into().unwrap());

        let mut entries = Vec::with_capacity(entry_count as usize);
        let mut raw = vec![0u8; entry_count as usize * ENTRY_LEN];
        source.read_exact(&mut raw).await?;
        for chunk in raw.chunks_exact(ENTRY_LEN) {
            entries.push(IndexEntry {
                message_number: i64::from_le_bytes(chunk[0..8].try_into().unwrap()),
                file_offset: i64::from_le_bytes(chunk[8..16].try_into().unwrap()),
                timestamp: i64::from_le_bytes(chunk[16..24].try_into().unwrap()),
            });
        }

        Ok(Self {
            interval,
            total_messages,
            entries,
        })
    }

    /// Largest entry with `message_number <= n`.
    pub fn seek_entry_for_message(&self, n: i64) -> Result<IndexEntry> {
        if n < 0 || n >= self.total_messages {
            return Err(Error::ArgumentError(format!(
                "message number {n} out of range [0, {})",
                self.total_messages
            )));
        }
        self.entries
            .partition_point(|e| e.message_number <= n)
            .checked_sub(1)
            .and_then(|i| self.entries.get(i).copied())
            .ok_or(Error::IndexError("index has no entry at or before message 0"))
    }

    /// Largest entry with `timestamp <= t`.
    pub fn seek_entry_for_timestamp(&self, t: i64) -> Result<IndexEntry> {
        self.entries
            .partition_point(|e| e.timestamp <= t)
            .checked_sub(1)
            .and_then(|i| self.entries.get(i).copied())
            .ok_or(Error::ArgumentError(format!(
                "no index entry at or before timestamp {t}"
            )))
    }
}
