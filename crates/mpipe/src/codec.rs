//! Envelope encoding: `[usize length][MessagePack payload]`.
//!
//! The length prefix has the width and byte order of the host's `size_t`, so
//! both ends of the pipe must run on the same machine. The prefix and the
//! payload go out as two separate writes and are read back as two separate
//! reads; there is no padding, escaping or checksum.

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::{ChannelError, CodecError, Value};

/// Width of the length prefix in bytes.
pub const PREFIX_LEN: usize = std::mem::size_of::<usize>();

/// Largest payload a decoder accepts.
pub const MAX_ENVELOPE_LEN: usize = 16 * 1024 * 1024;

/// One serialized message, ready to be written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    payload: Vec<u8>,
}

impl Envelope {
    /// Serialize a value into an envelope.
    pub fn encode(value: &Value) -> Result<Self, CodecError> {
        let mut payload = Vec::new();
        rmpv::encode::write_value(&mut payload, value)?;
        Ok(Self { payload })
    }

    /// The length prefix for this envelope.
    pub fn prefix(&self) -> [u8; PREFIX_LEN] {
        self.payload.len().to_ne_bytes()
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Prefix and payload as one contiguous buffer.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(PREFIX_LEN + self.payload.len());
        out.extend_from_slice(&self.prefix());
        out.extend_from_slice(&self.payload);
        out
    }

    /// Write the prefix, then the payload, then flush.
    pub async fn write_to<W>(&self, writer: &mut W) -> std::io::Result<()>
    where
        W: AsyncWrite + Unpin,
    {
        writer.write_all(&self.prefix()).await?;
        writer.write_all(&self.payload).await?;
        writer.flush().await
    }

    /// Deserialize the payload back into a value.
    pub fn decode(&self) -> Result<Value, CodecError> {
        decode_payload(&self.payload)
    }
}

/// Serialize `value` into prefix + payload bytes.
pub fn encode(value: &Value) -> Result<Vec<u8>, CodecError> {
    Ok(Envelope::encode(value)?.to_bytes())
}

/// Read one envelope from `reader` and deserialize it.
///
/// A stream that ends before the prefix or the payload is complete yields
/// [`ChannelError::ShortRead`]. The caller decides whether that means the
/// process on the other end died.
pub async fn decode<R>(reader: &mut R) -> Result<Value, ChannelError>
where
    R: AsyncRead + Unpin,
{
    let mut len_buf = [0u8; PREFIX_LEN];
    let got = read_up_to(reader, &mut len_buf).await?;
    if got < PREFIX_LEN {
        return Err(ChannelError::ShortRead {
            expected: PREFIX_LEN,
            got,
        });
    }

    let len = usize::from_ne_bytes(len_buf);
    if len > MAX_ENVELOPE_LEN {
        return Err(CodecError::TooLarge {
            len,
            max: MAX_ENVELOPE_LEN,
        }
        .into());
    }

    let mut payload = vec![0u8; len];
    let got = read_up_to(reader, &mut payload).await?;
    if got < len {
        return Err(ChannelError::ShortRead { expected: len, got });
    }

    Ok(decode_payload(&payload)?)
}

fn decode_payload(payload: &[u8]) -> Result<Value, CodecError> {
    let mut cursor = payload;
    let value = rmpv::decode::read_value(&mut cursor)?;
    if !cursor.is_empty() {
        return Err(CodecError::TrailingBytes {
            len: payload.len(),
            consumed: payload.len() - cursor.len(),
        });
    }
    Ok(value)
}

/// Fill `buf` as far as the stream allows; returns how many bytes arrived.
async fn read_up_to<R>(reader: &mut R, buf: &mut [u8]) -> std::io::Result<usize>
where
    R: AsyncRead + Unpin,
{
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]).await {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}
