//! Delivering one message to a target and waiting for its echo.

use std::io::ErrorKind;
use std::net::SocketAddr;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

/// Send `id` as `[u32 big-endian length][id]` and wait for the same bytes back.
///
/// The whole exchange must finish within `timeout`.
pub(crate) async fn deliver(
    addr: SocketAddr,
    id: &[u8],
    timeout: Duration,
) -> std::io::Result<()> {
    match tokio::time::timeout(timeout, exchange(addr, id)).await {
        Ok(result) => result,
        Err(_) => Err(ErrorKind::TimedOut.into()),
    }
}

async fn exchange(addr: SocketAddr, id: &[u8]) -> std::io::Result<()> {
    let len = u32::try_from(id.len()).map_err(|_| std::io::Error::from(ErrorKind::InvalidInput))?;

    let mut stream = TcpStream::connect(addr).await?;
    let mut frame = Vec::with_capacity(4 + id.len());
    frame.extend_from_slice(&len.to_be_bytes());
    frame.extend_from_slice(id);
    stream.write_all(&frame).await?;

    let mut echoed = vec![0u8; frame.len()];
    stream.read_exact(&mut echoed).await?;
    if echoed != frame {
        return Err(std::io::Error::new(
            ErrorKind::InvalidData,
            "echo does not match the delivered message",
        ));
    }
    Ok(())
}
