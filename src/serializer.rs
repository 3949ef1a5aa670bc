//! Body-serialiser contract consumed by the codec, recorder and player.
//!
//! The bus itself never serialises a body: on the hot path a `Msg<B>` is
//! moved in memory between publisher and subscriber. A `Serializer<B>` is
//! only needed where a body crosses into bytes — recording and playback.

use crate::error::{Error, Result};

/// `(major, minor)` version of a serialiser's wire format. A major mismatch
/// between the serialiser used to write a recording and the one used to
/// read it is a hard error; a minor mismatch is accepted (forward
/// compatible within a major version).
pub type SerializerVersion = (u8, u8);

pub trait Serializer<B>: Send + Sync {
    fn version(&self) -> SerializerVersion;

    /// Serialise `value` by appending bytes to `buf`.
    fn serialize(&self, value: &B, buf: &mut Vec<u8>) -> Result<()>;

    fn deserialize(&self, bytes: &[u8]) -> Result<B>;

    /// Type identity used for `TypeMismatch` diagnostics; not part of the
    /// wire format.
    fn type_name(&self) -> &'static str {
        std::any::type_name::<B>()
    }
}

pub(crate) fn check_major_version(expected: SerializerVersion, actual: (u8, u8)) -> Result<()> {
    if expected.0 != actual.0 {
        return Err(Error::FrameCorruption(
            "serialiser major version mismatch between writer and reader",
        ));
    }
    Ok(())
}
