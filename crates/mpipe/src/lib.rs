//! Control channel to a child process over its standard streams.
//!
//! Each message on the channel is an envelope:
//! - Length prefix: `usize` in native byte order (the width of the host's `size_t`)
//! - Payload: one MessagePack value, normally an array `[tag, arg0, arg1, ...]`
//!
//! The driving side ([`Channel`]) is strictly half-duplex: every `send` must be
//! followed by a `receive` before the next `send`. The process side
//! ([`serve()`]) reads one request, writes one reply, and stops when it sees the
//! close tag `0`.
//!
//! ```no_run
//! use funcheck_mpipe::{Channel, Launch, Value};
//!
//! # async fn demo() -> Result<(), funcheck_mpipe::ChannelError> {
//! let mut channel = Channel::spawn("./func_etest", &["2998", "0", "0", "1"], Launch::Direct)?;
//! let reply = channel.call(&Value::Array(vec![Value::from(1)])).await?;
//! assert_eq!(reply, Value::Array(vec![Value::from(42)]));
//! channel.close().await?;
//! # Ok(())
//! # }
//! ```

pub mod channel;
pub mod codec;
pub mod error;
pub mod launch;
pub mod process;
pub mod serve;

pub use channel::{Channel, ChannelState, Direction};
pub use codec::{Envelope, MAX_ENVELOPE_LEN, PREFIX_LEN};
pub use error::{ChannelError, CodecError};
pub use launch::Launch;
pub use process::ProcessGroup;
pub use rmpv::Value;
pub use serve::{Handler, ServeExit, serve, serve_stdio};

/// Tag of the command that asks the process to exit.
pub const CLOSE_TAG: i64 = 0;
