//! The reference subject.
//!
//! Command-line contract: `<main_port> <encoding> <shutdown_flag>
//! <synchronous_flag>`, all four required. The subject listens on its main
//! port (and drains whatever arrives there), answers control commands on
//! stdio, and delivers dispatched messages to `127.0.0.1` or `::1`.
//!
//! In synchronous mode with shutdown mode off, a failed delivery to the peer
//! port while the harness said the peer was ready is a violation; the process
//! then exits with status 1.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use funcheck_mpipe::{ChannelError, Handler, ServeExit, Value, serve_stdio};
use tokio::io::AsyncReadExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::delivery::deliver;
use crate::listen::loopback_listeners;

/// Rounds `check` waits for outstanding deliveries, longer than any timeout.
const CHECK_ROUNDS: u32 = 40;
const CHECK_INTERVAL: Duration = Duration::from_millis(100);
const ID_LEN: usize = 16;

/// Startup configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubjectConfig {
    pub main_port: u16,
    /// Where the echo peer is expected; only deliveries there are checked.
    pub peer_port: u16,
    pub encrypted: bool,
    pub shutdown_mode: bool,
    pub synchronous: bool,
    pub delivery_timeout: Duration,
    /// Running under valgrind: connects may fail spuriously, so deliveries
    /// are not checked.
    pub memcheck: bool,
}

impl SubjectConfig {
    pub fn new(main_port: u16, encrypted: bool, shutdown_mode: bool, synchronous: bool) -> Self {
        let memcheck = std::env::var("MPP_MC").is_ok_and(|v| v == "True");
        let peer_port = std::env::var("FUNCHECK_PEER_PORT")
            .ok()
            .and_then(|port| port.parse().ok())
            .unwrap_or_else(|| main_port.saturating_sub(1));
        Self {
            main_port,
            peer_port,
            encrypted,
            shutdown_mode,
            synchronous,
            delivery_timeout: if memcheck {
                Duration::from_secs(1)
            } else {
                Duration::from_millis(500)
            },
            memcheck,
        }
    }

    fn checks_deliveries(&self) -> bool {
        self.synchronous && !self.shutdown_mode && !self.memcheck
    }
}

struct Pending {
    id: Vec<u8>,
    /// Sent to the peer port while the peer was said to be ready.
    to_ready_peer: bool,
    task: JoinHandle<std::io::Result<()>>,
}

/// Control-command handler and the resources behind it.
pub struct Subject {
    config: SubjectConfig,
    nonce: [u8; 8],
    next_id: u64,
    pending: Vec<Pending>,
    accepts: Vec<JoinHandle<()>>,
    drop_connections: watch::Sender<u64>,
    violations: u32,
}

impl Subject {
    /// Start listening on the main port.
    pub fn start(config: SubjectConfig) -> std::io::Result<Self> {
        let listeners = loopback_listeners(config.main_port)?;
        let (drop_connections, rx) = watch::channel(0);
        let accepts = listeners
            .into_iter()
            .map(|listener| tokio::spawn(accept_loop(listener, rx.clone())))
            .collect();

        let seed = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|elapsed| elapsed.as_nanos() as u64)
            .unwrap_or(0)
            ^ u64::from(std::process::id()).rotate_left(32);

        tracing::info!(
            port = config.main_port,
            peer_port = config.peer_port,
            encrypted = config.encrypted,
            shutdown_mode = config.shutdown_mode,
            synchronous = config.synchronous,
            "subject listening"
        );

        Ok(Self {
            config,
            nonce: seed.to_be_bytes(),
            next_id: 0,
            pending: Vec::new(),
            accepts,
            drop_connections,
            violations: 0,
        })
    }

    /// Failed deliveries that should have succeeded.
    pub fn violations(&self) -> u32 {
        self.violations
    }

    fn fresh_id(&mut self) -> Vec<u8> {
        self.next_id += 1;
        let mut id = Vec::with_capacity(ID_LEN);
        id.extend_from_slice(&self.nonce);
        id.extend_from_slice(&self.next_id.to_be_bytes());
        id
    }

    fn dispatch(&mut self, family: i64, port: i64, peer_ready: bool) -> Value {
        let id = self.fresh_id();
        let Ok(port) = u16::try_from(port) else {
            return reply_dispatch(id, 1);
        };
        let ip: IpAddr = if family == i64::from(libc::AF_INET6) {
            Ipv6Addr::LOCALHOST.into()
        } else {
            Ipv4Addr::LOCALHOST.into()
        };
        let addr = SocketAddr::new(ip, port);

        let timeout = self.config.delivery_timeout;
        let message = id.clone();
        let task = tokio::spawn(async move { deliver(addr, &message, timeout).await });
        self.pending.push(Pending {
            id: id.clone(),
            to_ready_peer: peer_ready && port == self.config.peer_port,
            task,
        });
        tracing::debug!(%addr, peer_ready, "dispatched");
        reply_dispatch(id, 0)
    }

    /// Report every message once all of them are done, or nothing if some
    /// are still outstanding after the wait.
    async fn check(&mut self) -> Value {
        for _ in 0..CHECK_ROUNDS {
            if self.pending.iter().all(|p| p.task.is_finished()) {
                break;
            }
            tokio::time::sleep(CHECK_INTERVAL).await;
        }
        if !self.pending.iter().all(|p| p.task.is_finished()) {
            tracing::warn!(pending = self.pending.len(), "deliveries still outstanding");
            return Value::Array(Vec::new());
        }

        let mut closed = Vec::with_capacity(self.pending.len());
        for pending in self.pending.drain(..) {
            let result = match pending.task.await {
                Ok(result) => result,
                Err(e) => Err(std::io::Error::other(e)),
            };
            if let Err(e) = result {
                tracing::debug!(error = %e, "delivery failed");
                if pending.to_ready_peer && self.config.checks_deliveries() {
                    tracing::error!(error = %e, "delivery to a ready peer failed");
                    self.violations += 1;
                }
            }
            closed.push(Value::Binary(pending.id));
        }
        Value::Array(closed)
    }

    fn shutdown_connections(&mut self, only_connections: bool) -> Value {
        if !self.config.shutdown_mode {
            return status(1);
        }
        tracing::debug!(only_connections, "dropping idle connections");
        self.drop_connections.send_modify(|generation| *generation += 1);
        status(0)
    }

    fn cleanup(&mut self) -> Value {
        for accept in self.accepts.drain(..) {
            accept.abort();
        }
        self.drop_connections.send_modify(|generation| *generation += 1);
        status(0)
    }
}

impl Handler for Subject {
    async fn handle(&mut self, fields: Vec<Value>) -> Value {
        let int = |i: usize| fields.get(i).and_then(Value::as_i64);
        match int(0) {
            Some(1) => Value::Array(vec![Value::from(42)]),
            Some(2) => self.cleanup(),
            Some(3) => match (int(1), int(2), int(3)) {
                (Some(family), Some(port), Some(ready)) => self.dispatch(family, port, ready != 0),
                _ => status(-1),
            },
            Some(4) => self.check().await,
            Some(5) => self.shutdown_connections(int(1).unwrap_or(0) != 0),
            other => {
                tracing::warn!(tag = ?other, "unknown command");
                status(-1)
            }
        }
    }
}

fn status(code: i64) -> Value {
    Value::Array(vec![Value::from(code)])
}

fn reply_dispatch(id: Vec<u8>, code: i64) -> Value {
    Value::Array(vec![Value::Binary(id), Value::from(code)])
}

async fn accept_loop(listener: TcpListener, drop_connections: watch::Receiver<u64>) {
    loop {
        match listener.accept().await {
            Ok((stream, addr)) => {
                tracing::debug!(%addr, "connection on main port");
                tokio::spawn(drain(stream, drop_connections.clone()));
            }
            Err(e) => tracing::warn!(error = %e, "accept failed"),
        }
    }
}

/// Read and discard until the peer hangs up or connections are dropped.
async fn drain(mut stream: TcpStream, mut drop_connections: watch::Receiver<u64>) {
    let mut buf = [0u8; 4096];
    loop {
        tokio::select! {
            read = stream.read(&mut buf) => match read {
                Ok(0) => break,
                Ok(n) => tracing::trace!(bytes = n, "discarded"),
                Err(e) => {
                    tracing::debug!(error = %e, "connection failed");
                    break;
                }
            },
            _ = drop_connections.changed() => {
                tracing::debug!("connection dropped");
                break;
            }
        }
    }
}

/// Run the subject until the close command; returns the exit code.
pub async fn run(config: SubjectConfig) -> Result<i32, ChannelError> {
    let mut subject = Subject::start(config)?;
    let exit = serve_stdio(&mut subject).await?;
    if exit == ServeExit::Eof {
        tracing::warn!("control channel closed without the close command");
    }
    subject.cleanup();

    match subject.violations() {
        0 => Ok(0),
        n => {
            tracing::error!(violations = n, "deliveries to a ready peer failed");
            Ok(1)
        }
    }
}
