//! Recording Metadata: a human-readable JSON sidecar written next to a
//! recording, describing what serialised it and, once the recording is
//! complete, derived counts and timestamps.

use std::collections::HashMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;

use crate::error::Result;

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RecordingMetadata {
    pub created: i64,
    pub channel: String,
    pub serializer_type: String,
    pub serializer_version: (u8, u8),
    pub message_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message_count: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub first_message_ticks: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_message_ticks: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub index_file: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub custom: Option<HashMap<String, String>>,
}

impl RecordingMetadata {
    pub fn new(
        created: i64,
        channel: impl Into<String>,
        serializer_type: impl Into<String>,
        serializer_version: (u8, u8),
        message_type: impl Into<String>,
    ) -> Self {
        Self {
            created,
            channel: channel.into(),
            serializer_type: serializer_type.into(),
            serializer_version,
            message_type: message_type.into(),
            message_count: None,
            first_message_ticks: None,
            last_message_ticks: None,
            duration_ms: None,
            index_file: None,
            custom: None,
        }
    }

    pub fn with_index_file(mut self, path: impl Into<String>) -> Self {
        self.index_file = Some(path.into());
        self
    }

    pub fn record_message(&mut self, ticks: i64) {
        self.message_count = Some(self.message_count.unwrap_or(0) + 1);
        self.first_message_ticks.get_or_insert(ticks);
        self.last_message_ticks = Some(ticks);
    }

    /// Sidecar file name for a recording at `path`: `<path>.meta.json`.
    pub fn sidecar_path(path: impl AsRef<Path>) -> std::path::PathBuf {
        let mut name = path.as_ref().as_os_str().to_owned();
        name.push(".meta.json");
        std::path::PathBuf::from(name)
    }

    /// Atomically writes the sidecar: encode to a temp file, then rename
    /// over the final path, so a reader never observes a partial write.
    pub async fn write_atomic(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let mut tmp_name = path.as_os_str().to_owned();
        tmp_name.push(".tmp");
        let tmp_path = std::path::PathBuf::from(tmp_name);
        let bytes = serde_json::to_vec_pretty(self)
            .map_err(|e| crate::error::Error::ArgumentError(format!("failed to serialise metadata: {e}")))?;
        {
            let mut file = tokio::fs::File::create(&tmp_path).await?;
            file.write_all(&bytes).await?;
            file.flush().await?;
        }
        tokio::fs::rename(&tmp_path, path).await?;
        Ok(())
    }

    pub async fn read(path: impl AsRef<Path>) -> Result<Self> {
        let bytes = tokio::fs::read(path).await?;
        serde_json::from_slice(&bytes)
            .map_err(|e| crate::error::Error::ArgumentError(format!("failed to parse metadata: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn writes_and_reads_back_sidecar() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("recording.bin");

        let mut meta = RecordingMetadata::new(1000, "stock.prices", "json", (1, 0), "i32")
            .with_index_file("recording.bin.idx");
        meta.record_message(10);
        meta.record_message(20);
        meta.duration_ms = Some(10);

        let sidecar = RecordingMetadata::sidecar_path(&path);
        meta.write_atomic(&sidecar).await.unwrap();

        let loaded = RecordingMetadata::read(&sidecar).await.unwrap();
        assert_eq!(loaded.channel, "stock.prices");
        assert_eq!(loaded.message_count, Some(2));
        assert_eq!(loaded.first_message_ticks, Some(10));
        assert_eq!(loaded.last_message_ticks, Some(20));
        assert_eq!(loaded.index_file.as_deref(), Some("recording.bin.idx"));
    }
}
