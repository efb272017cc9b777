use std::net::{Ipv4Addr, SocketAddr};

use tokio::net::{TcpListener, TcpSocket};

/// A bound, listening socket that is never accepted from.
///
/// The kernel still completes handshakes into the (tiny) backlog, so a client
/// connects fine and then hears nothing. Dropping the listener frees the port.
#[derive(Debug)]
pub struct DeadListener {
    listener: TcpListener,
}

impl DeadListener {
    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub fn port(&self) -> std::io::Result<u16> {
        self.local_addr().map(|addr| addr.port())
    }
}

/// Bind and listen on `127.0.0.1:port` without ever accepting.
///
/// Port `0` picks an ephemeral port.
pub fn listen_dead_socket(port: u16) -> std::io::Result<DeadListener> {
    let socket = TcpSocket::new_v4()?;
    socket.set_reuseaddr(true)?;
    socket.bind(SocketAddr::from((Ipv4Addr::LOCALHOST, port)))?;
    let listener = socket.listen(1)?;
    tracing::debug!(port, "dead listener bound");
    Ok(DeadListener { listener })
}
