//! The harness's belief about the subject's state.
//!
//! Everything here is pure: no I/O, no processes. The model feeds observed
//! replies into these transitions, and the transitions decide whether the
//! replies are consistent with what came before.

use std::collections::BTreeSet;
use std::fmt;

use serde::Serialize;

use crate::ScenarioError;
use crate::command::MessageId;
use crate::config::Encoding;

/// Kinds of action a scenario step can take.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    InitMain,
    InitPeer,
    Ping42,
    SendMessage,
    SendMessageBadTarget,
    CheckMessages,
    ShutdownConnections,
    FuzzMainPort,
}

impl ActionKind {
    pub const ALL: [Self; 8] = [
        Self::InitMain,
        Self::InitPeer,
        Self::Ping42,
        Self::SendMessage,
        Self::SendMessageBadTarget,
        Self::CheckMessages,
        Self::ShutdownConnections,
        Self::FuzzMainPort,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Self::InitMain => "init_main",
            Self::InitPeer => "init_peer",
            Self::Ping42 => "ping42",
            Self::SendMessage => "send_message",
            Self::SendMessageBadTarget => "send_message_bad_target",
            Self::CheckMessages => "check_messages",
            Self::ShutdownConnections => "shutdown_connections",
            Self::FuzzMainPort => "fuzz_main_port",
        }
    }
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Shadow state of one scenario.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ShadowState {
    main_ready: bool,
    peer_ready: bool,
    timeout_pending: bool,
    open_messages: BTreeSet<MessageId>,
    shutdown_mode: bool,
    encoding: Option<Encoding>,
    /// Teardown ran; nothing may follow.
    torn_down: bool,
}

impl ShadowState {
    /// Fresh state; `shutdown_mode` is the default `InitMain` will pick, and
    /// `InitMain` fixes it for the rest of the scenario.
    pub fn new(shutdown_mode: bool) -> Self {
        Self {
            shutdown_mode,
            ..Self::default()
        }
    }

    pub fn main_ready(&self) -> bool {
        self.main_ready
    }

    pub fn peer_ready(&self) -> bool {
        self.peer_ready
    }

    pub fn timeout_pending(&self) -> bool {
        self.timeout_pending
    }

    pub fn shutdown_mode(&self) -> bool {
        self.shutdown_mode
    }

    /// Encoding picked by `InitMain`, reused for the peer.
    pub fn encoding(&self) -> Option<Encoding> {
        self.encoding
    }

    pub fn open_messages(&self) -> &BTreeSet<MessageId> {
        &self.open_messages
    }

    pub fn torn_down(&self) -> bool {
        self.torn_down
    }

    /// Actions that may run next.
    pub fn legal_actions(&self) -> BTreeSet<ActionKind> {
        use ActionKind::*;

        if self.torn_down {
            return BTreeSet::new();
        }
        if !self.main_ready {
            return BTreeSet::from([InitMain]);
        }

        let mut legal = BTreeSet::from([Ping42, SendMessage, CheckMessages]);
        if !self.peer_ready {
            if self.timeout_pending {
                // A new send would be indistinguishable from the pending one.
                legal = BTreeSet::from([Ping42, CheckMessages, InitPeer, FuzzMainPort]);
            } else {
                legal.extend([InitPeer, FuzzMainPort]);
            }
        }
        if !self.timeout_pending {
            legal.insert(SendMessageBadTarget);
        }
        if self.shutdown_mode {
            legal.insert(ShutdownConnections);
        }
        legal
    }

    pub fn is_legal(&self, kind: ActionKind) -> bool {
        self.legal_actions().contains(&kind)
    }

    /// The subject is up and listening, started with `shutdown_mode`.
    ///
    /// The flag the subject was started with is the one that holds for the
    /// rest of the run.
    pub fn main_started(
        &mut self,
        encoding: Encoding,
        shutdown_mode: bool,
    ) -> Result<(), ScenarioError> {
        if self.main_ready || self.torn_down {
            return Err(ScenarioError::IllegalAction(ActionKind::InitMain));
        }
        self.main_ready = true;
        self.shutdown_mode = shutdown_mode;
        self.encoding = Some(encoding);
        self.open_messages.clear();
        Ok(())
    }

    /// The echo peer is up and reachable.
    pub fn peer_started(&mut self) -> Result<(), ScenarioError> {
        if !self.main_ready || self.peer_ready || self.torn_down {
            return Err(ScenarioError::IllegalAction(ActionKind::InitPeer));
        }
        self.peer_ready = true;
        Ok(())
    }

    /// A dispatch went out; `peer_ready` is the flag sent with it.
    ///
    /// A send the peer cannot answer, or a deliberate bad-target send, leaves
    /// a timeout pending whatever the subject replies.
    pub fn dispatch_issued(&mut self, peer_ready: bool, bad_target: bool) {
        if !peer_ready || bad_target {
            self.timeout_pending = true;
        }
    }

    /// The subject acknowledged a dispatch with `id`.
    pub fn message_sent(&mut self, id: MessageId) -> Result<(), ScenarioError> {
        if self.open_messages.contains(&id) {
            return Err(ScenarioError::InconsistentState(format!(
                "message id {id} returned while still open"
            )));
        }
        self.open_messages.insert(id);
        Ok(())
    }

    /// Teardown released the subject and the peer; the scenario is over.
    pub fn finish(&mut self) {
        self.torn_down = true;
        self.main_ready = false;
        self.peer_ready = false;
        self.timeout_pending = false;
    }

    /// Forget the pending timeout without touching the open set.
    pub fn clear_timeout(&mut self) {
        self.timeout_pending = false;
    }

    /// The subject reported `closed` as finished.
    ///
    /// Always clears the pending timeout. Every open message must have been
    /// reported, and nothing may be reported that was never open.
    pub fn messages_checked(
        &mut self,
        closed: impl IntoIterator<Item = MessageId>,
    ) -> Result<(), ScenarioError> {
        self.clear_timeout();

        let mut unknown = Vec::new();
        for id in closed {
            if !self.open_messages.remove(&id) {
                unknown.push(id);
            }
        }

        if let Some(id) = unknown.first() {
            return Err(ScenarioError::InconsistentState(format!(
                "message {id} reported closed but was never open ({} unknown in total)",
                unknown.len()
            )));
        }
        if let Some(id) = self.open_messages.first() {
            return Err(ScenarioError::InconsistentState(format!(
                "{} message(s) still open after check, first {id}",
                self.open_messages.len()
            )));
        }
        Ok(())
    }
}
