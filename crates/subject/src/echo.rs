//! The cooperating echo peer.

use tokio::net::{TcpListener, TcpStream};

use crate::listen::loopback_listeners;

/// Echo every connection on `port` until SIGTERM or SIGINT.
pub async fn run(port: u16) -> std::io::Result<()> {
    // Installed before listening: once the port answers, a SIGTERM must
    // already mean a clean exit.
    let shutdown = Shutdown::install()?;

    let listeners = loopback_listeners(port)?;
    tracing::info!(port, listeners = listeners.len(), "echo peer listening");

    let accepts: Vec<_> = listeners
        .into_iter()
        .map(|listener| tokio::spawn(accept_loop(listener)))
        .collect();

    shutdown.wait().await;
    tracing::info!("echo peer shutting down");
    for accept in accepts {
        accept.abort();
    }
    Ok(())
}

async fn accept_loop(listener: TcpListener) {
    loop {
        match listener.accept().await {
            Ok((stream, addr)) => {
                tracing::debug!(%addr, "echo connection");
                tokio::spawn(echo_connection(stream));
            }
            Err(e) => tracing::warn!(error = %e, "accept failed"),
        }
    }
}

async fn echo_connection(mut stream: TcpStream) {
    let (mut reader, mut writer) = stream.split();
    match tokio::io::copy(&mut reader, &mut writer).await {
        Ok(bytes) => tracing::trace!(bytes, "echo connection closed"),
        Err(e) => tracing::debug!(error = %e, "echo connection failed"),
    }
}

#[cfg(unix)]
struct Shutdown {
    terminate: tokio::signal::unix::Signal,
    interrupt: tokio::signal::unix::Signal,
}

#[cfg(unix)]
impl Shutdown {
    fn install() -> std::io::Result<Self> {
        use tokio::signal::unix::{SignalKind, signal};

        Ok(Self {
            terminate: signal(SignalKind::terminate())?,
            interrupt: signal(SignalKind::interrupt())?,
        })
    }

    async fn wait(mut self) {
        tokio::select! {
            _ = self.terminate.recv() => {}
            _ = self.interrupt.recv() => {}
        }
    }
}

#[cfg(not(unix))]
struct Shutdown;

#[cfg(not(unix))]
impl Shutdown {
    fn install() -> std::io::Result<Self> {
        Ok(Self)
    }

    async fn wait(self) {
        let _ = tokio::signal::ctrl_c().await;
    }
}
