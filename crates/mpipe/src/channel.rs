//! Driving side of the control channel.

use std::ffi::OsStr;
use std::fmt;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use tokio::process::{ChildStdin, ChildStdout};

use crate::codec::{self, Envelope};
use crate::process::ProcessGroup;
use crate::{CLOSE_TAG, ChannelError, Launch, Value};

/// How long to wait for an exit status after the stream ends mid-envelope.
const EXIT_PROBE: Duration = Duration::from_millis(500);

/// Direction of the last operation on a channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    None,
    Sent,
    Received,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::None => write!(f, "nothing"),
            Self::Sent => write!(f, "send"),
            Self::Received => write!(f, "receive"),
        }
    }
}

/// Lifecycle of a channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    /// Spawned; sends and receives alternate.
    Open,
    /// The close command went out, waiting for the exit.
    Closing,
    /// The process exited on its own.
    Exited,
    /// The process had to be killed.
    ForceKilled,
}

/// Half-duplex envelope channel to a child process.
#[derive(Debug)]
pub struct Channel {
    process: ProcessGroup,
    stdin: Option<ChildStdin>,
    stdout: Option<ChildStdout>,
    last: Direction,
    state: ChannelState,
    grace: Duration,
}

impl Channel {
    /// Launch `program args...` with piped stdin/stdout.
    pub fn spawn<P, I, S>(program: P, args: I, launch: Launch) -> Result<Self, ChannelError>
    where
        P: AsRef<OsStr>,
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        let label = program.as_ref().to_string_lossy().into_owned();
        let mut command = launch.command(program, args);
        command.stdin(Stdio::piped()).stdout(Stdio::piped());

        let mut process = ProcessGroup::spawn(label, command)?;
        let child = process.child_mut();
        let stdin = child.stdin.take();
        let stdout = child.stdout.take();

        Ok(Self {
            process,
            stdin,
            stdout,
            last: Direction::None,
            state: ChannelState::Open,
            grace: launch.grace(),
        })
    }

    pub fn state(&self) -> ChannelState {
        self.state
    }

    pub fn last_direction(&self) -> Direction {
        self.last
    }

    /// Exit status, populated once the process has terminated.
    pub fn exit_status(&self) -> Option<ExitStatus> {
        self.process.status()
    }

    pub fn process(&self) -> &ProcessGroup {
        &self.process
    }

    /// Override the shutdown grace period chosen by the launch mode.
    pub fn set_grace(&mut self, grace: Duration) {
        self.grace = grace;
    }

    /// Write one envelope.
    pub async fn send(&mut self, value: &Value) -> Result<(), ChannelError> {
        self.ensure_open()?;
        if self.last == Direction::Sent {
            return Err(ChannelError::ProtocolMisuse {
                repeated: Direction::Sent,
            });
        }
        self.last = Direction::Sent;

        let envelope = Envelope::encode(value)?;
        tracing::debug!(process = %self.process.label(), %value, "send");
        let stdin = self.stdin.as_mut().ok_or(ChannelError::Closed)?;
        envelope.write_to(stdin).await?;
        Ok(())
    }

    /// Read one envelope.
    ///
    /// If the stream ends mid-envelope and the process exited unsuccessfully,
    /// the error is [`ChannelError::ProcessExited`]; otherwise the short read
    /// is returned as is.
    pub async fn receive(&mut self) -> Result<Value, ChannelError> {
        self.ensure_open()?;
        if self.last == Direction::Received {
            return Err(ChannelError::ProtocolMisuse {
                repeated: Direction::Received,
            });
        }
        self.last = Direction::Received;

        let stdout = self.stdout.as_mut().ok_or(ChannelError::Closed)?;
        match codec::decode(stdout).await {
            Ok(value) => {
                tracing::debug!(process = %self.process.label(), %value, "receive");
                Ok(value)
            }
            Err(short @ ChannelError::ShortRead { .. }) => {
                match self.process.wait_for(EXIT_PROBE).await? {
                    Some(status) if !status.success() => {
                        self.state = ChannelState::Exited;
                        Err(ChannelError::ProcessExited(status))
                    }
                    _ => Err(short),
                }
            }
            Err(e) => Err(e),
        }
    }

    /// Send a request and read its reply.
    pub async fn call(&mut self, value: &Value) -> Result<Value, ChannelError> {
        self.send(value).await?;
        self.receive().await
    }

    /// Send the close command and wait for the process to exit.
    ///
    /// The close command is written whatever the direction marker says. If the
    /// process is still running after the grace period the whole group is
    /// interrupted, then killed, and [`ChannelError::ShutdownTimeout`] is
    /// returned.
    pub async fn close(&mut self) -> Result<ExitStatus, ChannelError> {
        match self.state {
            ChannelState::Open => {}
            ChannelState::Exited => {
                return self.process.status().ok_or(ChannelError::Closed);
            }
            ChannelState::Closing | ChannelState::ForceKilled => {
                return Err(ChannelError::Closed);
            }
        }
        self.state = ChannelState::Closing;

        if let Some(mut stdin) = self.stdin.take() {
            let close = Value::Array(vec![Value::from(CLOSE_TAG)]);
            match Envelope::encode(&close) {
                Ok(envelope) => {
                    // The process may already be gone; the wait below tells.
                    if let Err(e) = envelope.write_to(&mut stdin).await {
                        let process = self.process.label();
                        tracing::debug!(%process, error = %e, "close command not delivered");
                    }
                }
                Err(e) => tracing::warn!(error = %e, "failed to encode close command"),
            }
            // Dropping stdin gives the child EOF as well.
        }
        self.last = Direction::Sent;

        match self.process.wait_for(self.grace).await? {
            Some(status) => {
                self.state = ChannelState::Exited;
                self.stdout = None;
                tracing::debug!(process = %self.process.label(), %status, "process exited");
                Ok(status)
            }
            None => {
                let err = self.process.escalate(self.grace).await;
                self.state = ChannelState::ForceKilled;
                self.stdout = None;
                Err(err)
            }
        }
    }

    fn ensure_open(&self) -> Result<(), ChannelError> {
        match self.state {
            ChannelState::Open => Ok(()),
            _ => Err(ChannelError::Closed),
        }
    }
}
