use chronicle_bus::{Error, Result, Serializer, SerializerVersion};

/// Initialises `log` output for a test run, same as the teacher's own
/// `env_logger::init()` entrypoints; `try_init` so running several test
/// binaries in one process doesn't panic on double-init.
pub fn init_logging() {
    let _ = env_logger::try_init();
}

pub struct I32Serializer;

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
