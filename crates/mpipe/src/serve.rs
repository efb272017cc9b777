//! Process side of the control channel.
//!
//! A process under test embeds this loop: read one request envelope, hand its
//! fields to a [`Handler`], write the reply, repeat. The close tag `0` ends the
//! loop without a reply.

use tokio::io::{AsyncRead, AsyncWrite};

use crate::codec::{self, Envelope};
use crate::{CLOSE_TAG, ChannelError, Value};

/// Handles one request and produces its reply.
#[allow(async_fn_in_trait)]
pub trait Handler {
    /// `fields[0]` is the command tag; the rest are its arguments.
    async fn handle(&mut self, fields: Vec<Value>) -> Value;
}

/// Why the serve loop stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServeExit {
    /// The driver sent the close command.
    Closed,
    /// The driver closed the pipe between envelopes.
    Eof,
}

/// Run the request/reply loop until close or EOF.
pub async fn serve<R, W, H>(
    reader: &mut R,
    writer: &mut W,
    handler: &mut H,
) -> Result<ServeExit, ChannelError>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
    H: Handler,
{
    loop {
        let request = match codec::decode(reader).await {
            Ok(request) => request,
            Err(ChannelError::ShortRead { got: 0, .. }) => return Ok(ServeExit::Eof),
            Err(e) => return Err(e),
        };

        let fields = match request {
            Value::Array(fields) => fields,
            other => vec![other],
        };
        if fields.first().and_then(Value::as_i64) == Some(CLOSE_TAG) {
            tracing::debug!("close command received");
            return Ok(ServeExit::Closed);
        }

        let reply = handler.handle(fields).await;
        Envelope::encode(&reply)?.write_to(writer).await?;
    }
}

/// Run [`serve`] over this process's stdin and stdout.
pub async fn serve_stdio<H: Handler>(handler: &mut H) -> Result<ServeExit, ChannelError> {
    let mut stdin = tokio::io::stdin();
    let mut stdout = tokio::io::stdout();
    serve(&mut stdin, &mut stdout, handler).await
}
