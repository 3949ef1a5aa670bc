//! Binary Frame Codec: the on-disk record format written by the Recorder
//! and read back by the Player.
//!
//! ```text
//! [0..4)   total_len_prefix : i32 LE (whole record, suffix included)
//! [4..6)   body_offset      : u16 LE
//! [6]      msg_type         : u8
//! [7]      msg_version      : u8   (= 1)
//! [8..12)  options          : [0]=0, [1]=0, [2]=serialiser major, [3]=minor
//! [12..20) msg_id           : i64 LE
//! [20..28) msg_timestamp    : i64 LE
//! [28..)   key              : i32 len prefix + UTF-8 bytes (len 0 = NULL)
//!          from             : i32 len prefix + UTF-8 bytes (len 0 = NULL)
//!          body             : opaque bytes (absent for non-Update types)
//! [N-4..N) total_len_suffix : i32 LE (must equal prefix)
//! ```

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::{Error, Result};
use crate::msg::{Msg, MsgType};
use crate::serializer::Serializer;

const HEADER_LEN: usize = 28;
const MSG_VERSION: u8 = 1;

fn write_length_prefixed(buf: &mut Vec<u8>, s: Option<&str>) {
    let bytes = s.map(str::as_bytes).unwrap_or(&[]);
    buf.extend_from_slice(&(bytes.len() as i32).to_le_bytes());
    buf.extend_from_slice(bytes);
}

/// Encodes `msg` as a full frame (prefix through suffix) appended to `buf`.
/// `buf` is caller-owned so steady-state recording can reuse one allocation.
pub fn encode_frame<B>(msg: &Msg<B>, serializer: &dyn Serializer<B>, buf: &mut Vec<u8>) -> Result<()> {
    let start = buf.len();
    buf.extend_from_slice(&0i32.to_le_bytes()); // prefix placeholder
    buf.extend_from_slice(&0u16.to_le_bytes()); // body_offset placeholder
    buf.push(msg.msg_type.to_u8());
    buf.push(MSG_VERSION);
    let version = serializer.version();
    buf.extend_from_slice(&[0, 0, version.0, version.1]);
    buf.extend_from_slice(&msg.id.to_le_bytes());
    buf.extend_from_slice(&msg.timestamp.to_le_bytes());

    write_length_prefixed(buf, msg.key.as_deref());
    write_length_prefixed(buf, msg.from.as_deref());
    let body_offset = buf.len() - start;

    if msg.msg_type == MsgType::ChannelUpdate {
        serializer.serialize(&msg.body, buf)?;
    }

    let total_len = (buf.len() - start + 4) as i32;
    buf[start..start + 4].copy_from_slice(&total_len.to_le_bytes());
    buf[start + 4..start + 6].copy_from_slice(&(body_offset as u16).to_le_bytes());
    buf.extend_from_slice(&total_len.to_le_bytes());
    Ok(())
}

pub async fn write_frame<W, B>(
    writer: &mut W,
    msg: &Msg<B>,
    serializer: &dyn Serializer<B>,
    buf: &mut Vec<u8>,
) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    buf.clear();
    encode_frame(msg, serializer, buf)?;
    writer.write_all(buf).await?;
    Ok(())
}

fn read_u32_le(bytes: &[u8], offset: usize) -> u32 {
    u32::from_le_bytes(bytes[offset..offset + 4].try_into().unwrap())
}

fn read_u16_le(bytes: &[u8], offset: usize) -> u16 {
    u16::from_le_bytes(bytes[offset..offset + 2].try_into().unwrap())
}

fn read_i64_le(bytes: &[u8], offset: usize) -> i64 {
    i64::from_le_bytes(bytes[offset..offset + 8].try_into().unwrap())
}

fn read_length_prefixed(bytes: &[u8], offset: usize) -> Result<(Option<String>, usize)> {
    if offset + 4 > bytes.len() {
        return Err(Error::FrameCorruption("truncated string length prefix"));
    }
    let len = read_u32_le(bytes, offset) as usize;
    let start = offset + 4;
    if start + len > bytes.len() {
        return Err(Error::FrameCorruption("string length exceeds remaining bytes"));
    }
    let value = if len == 0 {
        None
    } else {
        Some(
            std::str::from_utf8(&bytes[start..start + len])
                .map_err(|_| Error::FrameCorruption("string bytes are not valid UTF-8"))?
                .to_string(),
        )
    };
    Ok((value, start + len))
}

/// Decodes a single frame out of `bytes`, which must hold exactly the
/// bytes between the prefix (inclusive) and suffix (inclusive) for one
/// record. `B::default()` stands in for the body of non-`ChannelUpdate`
/// frames, whose wire format carries no body bytes.
pub fn decode_frame<B: Default>(bytes: &[u8], serializer: &dyn Serializer<B>) -> Result<Msg<B>> {
    if bytes.len() < HEADER_LEN + 4 {
        return Err(Error::FrameCorruption("frame shorter than minimum header+suffix"));
    }
    let prefix = read_u32_le(bytes, 0) as i32;
    let suffix = read_u32_le(bytes, bytes.len() - 4) as i32;
    if prefix != suffix {
        return Err(Error::FrameCorruption("length prefix does not match suffix"));
    }
    let body_offset = read_u16_le(bytes, 4) as usize;
    if body_offset > bytes.len() - 4 {
        return Err(Error::FrameCorruption("body_offset out of range"));
    }
    let msg_type = MsgType::from_u8(bytes[6]).ok_or(Error::FrameCorruption("unknown msg_type tag"))?;
    let _msg_version = bytes[7];
    let serializer_major = bytes[10];
    let serializer_minor = bytes[11];
    crate::serializer::check_major_version(serializer.version(), (serializer_major, serializer_minor))?;
    let id = read_i64_le(bytes, 12);
    let timestamp = read_i64_le(bytes, 20);

    let (key, after_key) = read_length_prefixed(bytes, HEADER_LEN)?;
    let (from, _after_from) = read_length_prefixed(bytes, after_key)?;

    let body = if msg_type == MsgType::ChannelUpdate {
        let body_bytes = &bytes[body_offset..bytes.len() - 4];
        serializer.deserialize(body_bytes)?
    } else {
        B::default()
    };

    Ok(Msg {
        id,
        timestamp,
        msg_type,
        correlation_id: None,
        key,
        inception_ticks: 0,
        from,
        body,
        tag_a: 0,
    })
}

/// Reads one frame from `reader`. Returns `Ok(None)` on a clean EOF before
/// any byte of the next prefix has been read.
pub async fn read_frame<R, B: Default>(
    reader: &mut R,
    serializer: &dyn Serializer<B>,
) -> Result<Option<Msg<B>>>
where
    R: AsyncRead + Unpin,
{
    let mut prefix_bytes = [0u8; 4];
    let n = read_fully_or_eof(reader, &mut prefix_bytes).await?;
    if n == 0 {
        return Ok(None);
    }
    if n != 4 {
        return Err(Error::FrameCorruption("truncated length prefix at EOF"));
    }
    let total_len = i32::from_le_bytes(prefix_bytes) as usize;
    if total_len < HEADER_LEN + 4 {
        return Err(Error::FrameCorruption("declared frame length smaller than header"));
    }
    let mut rest = vec![0u8; total_len - 4];
    reader.read_exact(&mut rest).await?;

    let mut full = Vec::with_capacity(total_len);
    full.extend_from_slice(&prefix_bytes);
    full.extend_from_slice(&rest);
    decode_frame(&full, serializer).map(Some)
}

async fn read_fully_or_eof<R: AsyncRead + Unpin>(reader: &mut R, buf: &mut [u8]) -> Result<usize> {
    let mut read = 0;
    while read < buf.len() {
        let n = reader.read(&mut buf[read..]).await?;
        if n == 0 {
            break;
        }
        read += n;
    }
    Ok(read)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::serializer::SerializerVersion;

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
            if bytes.len() != 4 {
                return Err(Error::FrameCorruption("expected 4 body bytes"));
            }
            Ok(i32::from_le_bytes(bytes.try_into().unwrap()))
        }
    }

    fn msg(id: i64, key: Option<&str>, from: Option<&str>, body: i32) -> Msg<i32> {
        Msg {
            id,
            timestamp: id * 10,
            msg_type: MsgType::ChannelUpdate,
            correlation_id: None,
            key: key.map(String::from),
            inception_ticks: 0,
            from: from.map(String::from),
            body,
            tag_a: 0,
        }
    }

    #[test]
    fn round_trips_a_frame() {
        let serializer = I32Serializer;
        let original = msg(7, Some("K"), Some("publisher-1"), 42);
        let mut buf = Vec::new();
        encode_frame(&original, &serializer, &mut buf).unwrap();

        let prefix = i32::from_le_bytes(buf[0..4].try_into().unwrap());
        let suffix = i32::from_le_bytes(buf[buf.len() - 4..].try_into().unwrap());
        assert_eq!(prefix, suffix);
        assert_eq!(prefix as usize, buf.len());

        let decoded: Msg<i32> = decode_frame(&buf, &serializer).unwrap();
        assert_eq!(decoded.id, original.id);
        assert_eq!(decoded.key, original.key);
        assert_eq!(decoded.from, original.from);
        assert_eq!(decoded.body, original.body);
    }

    #[test]
    fn body_offset_matches_invariant() {
        let serializer = I32Serializer;
        let original = msg(1, Some("AB"), None, 1);
        let mut buf = Vec::new();
        encode_frame(&original, &serializer, &mut buf).unwrap();
        let body_offset = read_u16_le(&buf, 4) as usize;
        // key "AB": 4 + 2 bytes; from NULL: 4 + 0 bytes.
        assert_eq!(body_offset, HEADER_LEN + 4 + 2 + 4);
    }

    #[test]
    fn rejects_mismatched_suffix() {
        let serializer = I32Serializer;
        let original = msg(1, None, None, 1);
        let mut buf = Vec::new();
        encode_frame(&original, &serializer, &mut buf).unwrap();
        let last = buf.len() - 1;
        buf[last] ^= 0xFF;
        let result: Result<Msg<i32>> = decode_frame(&buf, &serializer);
        assert!(matches!(result, Err(Error::FrameCorruption(_))));
    }
}
