//! Error taxonomy for the bus and the recorder/player subsystem.
//!
//! Categories mirror the failure modes a caller actually needs to branch on:
//! bad arguments, a channel's body type changing underneath a publisher, a
//! disposed bus, cancellation, queue overflow under a strict policy, and the
//! recorder/player's own framing and index corruption.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("argument error: {0}")]
    ArgumentError(String),

    #[error("type mismatch on channel {channel}: expected {expected}, got {actual}")]
    TypeMismatch {
        channel: String,
        expected: &'static str,
        actual: &'static str,
    },

    #[error("bus is closed")]
    Closed,

    #[error("operation cancelled")]
    Cancelled,

    #[error("subscription queue overflowed")]
    QueueOverflow,

    #[error("handler timed out")]
    HandlerTimeout,

    #[error("handler error: {0}")]
    HandlerError(String),

    #[error("frame corruption: {0}")]
    FrameCorruption(&'static str),

    #[error("index error: {0}")]
    IndexError(&'static str),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
