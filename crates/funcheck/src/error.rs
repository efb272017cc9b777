use std::fmt;
use std::process::ExitStatus;

use funcheck_mpipe::{ChannelError, CodecError, Value};
use funcheck_stimulus::StimulusError;
use serde::Serialize;

use crate::ActionKind;

/// What went wrong, coarsely. Every scenario failure has exactly one kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// The harness broke the half-duplex discipline or drove an illegal action.
    ProtocolMisuse,
    /// The subject or the peer died, or exited with a failure code.
    ProcessExited,
    /// A target never started accepting connections.
    PeerUnreachable,
    /// The subject answered something the contract does not allow.
    UnexpectedReply,
    /// The subject's answers contradict the shadow state.
    InconsistentState,
    /// A process had to be killed to make it exit.
    ShutdownTimeout,
    /// The harness's own environment failed (spawn, local sockets).
    Environment,
}

impl FailureKind {
    pub fn name(self) -> &'static str {
        match self {
            Self::ProtocolMisuse => "protocol misuse",
            Self::ProcessExited => "process exited",
            Self::PeerUnreachable => "peer unreachable",
            Self::UnexpectedReply => "unexpected reply",
            Self::InconsistentState => "inconsistent state",
            Self::ShutdownTimeout => "shutdown timeout",
            Self::Environment => "environment",
        }
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Scenario errors.
#[derive(Debug)]
pub enum ScenarioError {
    /// Control channel failure.
    Channel(ChannelError),
    /// The action is not in the legal set for the current shadow state.
    IllegalAction(ActionKind),
    /// The peer (or another probed target) never accepted a connection.
    PeerUnreachable { port: u16, source: StimulusError },
    /// Fuzz injection could not reach the subject.
    InjectFailed { port: u16, source: StimulusError },
    /// A reply broke its command's contract.
    UnexpectedReply {
        command: &'static str,
        reply: Value,
        expected: &'static str,
    },
    /// The subject's replies contradict the shadow state.
    InconsistentState(String),
    /// A process exited with something other than success.
    ExitFailure {
        process: &'static str,
        status: ExitStatus,
    },
    /// A process that should still be running has already exited.
    ExitedEarly {
        process: &'static str,
        status: ExitStatus,
    },
    /// A process could not be started.
    Spawn {
        program: String,
        source: std::io::Error,
    },
    Io(std::io::Error),
}

impl ScenarioError {
    pub fn kind(&self) -> FailureKind {
        match self {
            Self::Channel(e) => channel_kind(e),
            Self::IllegalAction(_) => FailureKind::ProtocolMisuse,
            Self::PeerUnreachable { .. } => FailureKind::PeerUnreachable,
            // The subject stopped accepting on its own port.
            Self::InjectFailed {
                source: StimulusError::UnreachableTarget { .. },
                ..
            } => FailureKind::PeerUnreachable,
            Self::InjectFailed { .. } => FailureKind::Environment,
            Self::UnexpectedReply { .. } => FailureKind::UnexpectedReply,
            Self::InconsistentState(_) => FailureKind::InconsistentState,
            Self::ExitFailure { .. } | Self::ExitedEarly { .. } => FailureKind::ProcessExited,
            Self::Spawn { .. } | Self::Io(_) => FailureKind::Environment,
        }
    }
}

fn channel_kind(e: &ChannelError) -> FailureKind {
    match e {
        ChannelError::ProtocolMisuse { .. } | ChannelError::Closed => FailureKind::ProtocolMisuse,
        ChannelError::Codec(CodecError::Encode(_)) => FailureKind::ProtocolMisuse,
        ChannelError::Codec(_) => FailureKind::UnexpectedReply,
        // A broken pipe to the subject means it is gone.
        ChannelError::ShortRead { .. } | ChannelError::ProcessExited(_) | ChannelError::Io(_) => {
            FailureKind::ProcessExited
        }
        ChannelError::ShutdownTimeout { .. } => FailureKind::ShutdownTimeout,
    }
}

impl fmt::Display for ScenarioError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Channel(e) => write!(f, "control channel: {e}"),
            Self::IllegalAction(kind) => write!(f, "{kind} is not legal in the current state"),
            Self::PeerUnreachable { port, source } => {
                write!(f, "nothing accepted connections on port {port}: {source}")
            }
            Self::InjectFailed { port, source } => {
                write!(f, "fuzz injection into port {port} failed: {source}")
            }
            Self::UnexpectedReply {
                command,
                reply,
                expected,
            } => write!(f, "{command} replied {reply}, expected {expected}"),
            Self::InconsistentState(detail) => write!(f, "inconsistent state: {detail}"),
            Self::ExitFailure { process, status } => write!(f, "{process} exited with {status}"),
            Self::ExitedEarly { process, status } => {
                write!(f, "{process} exited early with {status}")
            }
            Self::Spawn { program, source } => write!(f, "failed to spawn {program}: {source}"),
            Self::Io(e) => write!(f, "I/O error: {e}"),
        }
    }
}

impl std::error::Error for ScenarioError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Channel(e) => Some(e),
            Self::PeerUnreachable { source, .. } | Self::InjectFailed { source, .. } => {
                Some(source)
            }
            Self::Spawn { source, .. } | Self::Io(source) => Some(source),
            _ => None,
        }
    }
}

impl From<ChannelError> for ScenarioError {
    fn from(e: ChannelError) -> Self {
        Self::Channel(e)
    }
}

impl From<std::io::Error> for ScenarioError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e)
    }
}
