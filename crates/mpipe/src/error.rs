//! Error types for the envelope codec and the control channel.

use std::fmt;
use std::process::ExitStatus;
use std::time::Duration;

use crate::channel::Direction;

/// Envelope encode/decode errors.
#[derive(Debug)]
pub enum CodecError {
    /// The payload could not be serialized.
    Encode(rmpv::encode::Error),
    /// The payload bytes are not a single MessagePack value.
    Decode(rmpv::decode::Error),
    /// The length prefix exceeds [`MAX_ENVELOPE_LEN`](crate::MAX_ENVELOPE_LEN).
    TooLarge { len: usize, max: usize },
    /// The payload parsed but left unread bytes behind.
    TrailingBytes { len: usize, consumed: usize },
}

impl fmt::Display for CodecError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Encode(e) => write!(f, "serialize error: {e}"),
            Self::Decode(e) => write!(f, "deserialize error: {e}"),
            Self::TooLarge { len, max } => {
                write!(f, "envelope too large: {len} bytes (max {max})")
            }
            Self::TrailingBytes { len, consumed } => write!(
                f,
                "envelope has trailing bytes: payload {len} bytes, value used {consumed}"
            ),
        }
    }
}

impl std::error::Error for CodecError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Encode(e) => Some(e),
            Self::Decode(e) => Some(e),
            _ => None,
        }
    }
}

impl From<rmpv::encode::Error> for CodecError {
    fn from(e: rmpv::encode::Error) -> Self {
        Self::Encode(e)
    }
}

impl From<rmpv::decode::Error> for CodecError {
    fn from(e: rmpv::decode::Error) -> Self {
        Self::Decode(e)
    }
}

/// Control channel errors.
#[derive(Debug)]
pub enum ChannelError {
    /// Two sends or two receives in a row.
    ProtocolMisuse { repeated: Direction },
    /// The stream ended before a full envelope arrived.
    ShortRead { expected: usize, got: usize },
    /// The stream ended because the process exited unsuccessfully.
    ProcessExited(ExitStatus),
    /// The process did not exit within its grace period and was killed.
    ShutdownTimeout {
        grace: Duration,
        status: Option<ExitStatus>,
    },
    /// The channel has already been closed.
    Closed,
    Io(std::io::Error),
    Codec(CodecError),
}

impl fmt::Display for ChannelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ProtocolMisuse { repeated } => {
                write!(f, "consecutive {repeated} not allowed on a half-duplex channel")
            }
            Self::ShortRead { expected, got } => {
                write!(f, "short read: expected {expected} bytes, got {got}")
            }
            Self::ProcessExited(status) => write!(f, "the process returned {status}"),
            Self::ShutdownTimeout { grace, status } => {
                write!(f, "process did not exit within {grace:?} and was killed")?;
                if let Some(status) = status {
                    write!(f, " ({status})")?;
                }
                Ok(())
            }
            Self::Closed => write!(f, "channel closed"),
            Self::Io(e) => write!(f, "I/O error: {e}"),
            Self::Codec(e) => write!(f, "codec error: {e}"),
        }
    }
}

impl std::error::Error for ChannelError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            Self::Codec(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for ChannelError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e)
    }
}

impl From<CodecError> for ChannelError {
    fn from(e: CodecError) -> Self {
        Self::Codec(e)
    }
}
