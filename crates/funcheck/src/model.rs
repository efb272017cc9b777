//! The scenario model: shadow state plus the live resources it talks to.

use std::collections::BTreeSet;
use std::process::{ExitStatus, Stdio};

use funcheck_mpipe::{Channel, ChannelError, ProcessGroup, Value};
use funcheck_stimulus::{DeadListener, connect_and_inject, listen_dead_socket, probe};

use crate::command::{self, Request, Tag};
use crate::config::{AddressFamily, Encoding, HarnessConfig};
use crate::{Action, ActionKind, ScenarioError, ShadowState, StateMachine, StepInput};

const LOCALHOST: &str = "127.0.0.1";

/// One scenario against one subject.
///
/// Owns the subject's control channel, the echo peer and the dead listener.
/// None of them outlive [`teardown`](StateMachine::teardown); dropping the
/// scenario without it still kills both process groups.
#[derive(Debug)]
pub struct Scenario {
    config: HarnessConfig,
    state: ShadowState,
    main: Option<Channel>,
    peer: Option<ProcessGroup>,
    dead: Option<DeadListener>,
}

impl Scenario {
    pub fn new(config: HarnessConfig) -> Self {
        let state = ShadowState::new(config.shutdown_mode);
        Self {
            config,
            state,
            main: None,
            peer: None,
            dead: None,
        }
    }

    pub fn state(&self) -> &ShadowState {
        &self.state
    }

    pub fn config(&self) -> &HarnessConfig {
        &self.config
    }

    /// Pid of the running subject, if there is one.
    pub fn subject_pid(&self) -> Option<u32> {
        self.main.as_ref().and_then(|channel| channel.process().id())
    }

    /// Pid of the running echo peer, if there is one.
    pub fn peer_pid(&self) -> Option<u32> {
        self.peer.as_ref().and_then(ProcessGroup::id)
    }

    async fn init_main(
        &mut self,
        encoding: Encoding,
        shutdown_mode: bool,
    ) -> Result<(), ScenarioError> {
        if self.main.is_some() {
            return Err(ScenarioError::IllegalAction(ActionKind::InitMain));
        }
        let ports = self.config.ports;

        self.dead = None;
        self.dead = Some(listen_dead_socket(ports.dead)?);

        let args = [
            ports.main.to_string(),
            encoding.as_arg().to_owned(),
            flag(shutdown_mode).to_owned(),
            flag(self.config.synchronous).to_owned(),
        ];
        let program = &self.config.subject;
        let channel = Channel::spawn(program, &args, self.config.launch).map_err(|e| match e {
            ChannelError::Io(source) => ScenarioError::Spawn {
                program: program.display().to_string(),
                source,
            },
            other => ScenarioError::Channel(other),
        })?;
        self.main = Some(channel);

        probe(LOCALHOST, ports.main, self.config.probe)
            .await
            .map_err(|source| ScenarioError::PeerUnreachable {
                port: ports.main,
                source,
            })?;

        self.state.main_started(encoding, shutdown_mode)
    }

    async fn init_peer(&mut self, encoding: Encoding) -> Result<(), ScenarioError> {
        if self.peer.is_some() {
            return Err(ScenarioError::IllegalAction(ActionKind::InitPeer));
        }
        let port = self.config.ports.peer;

        let program = &self.config.peer;
        let mut command = self
            .config
            .launch
            .command(program, [port.to_string(), encoding.as_arg().to_owned()]);
        command.stdin(Stdio::null()).stdout(Stdio::null());
        let peer = ProcessGroup::spawn("peer", command).map_err(|source| ScenarioError::Spawn {
            program: program.display().to_string(),
            source,
        })?;
        let peer = self.peer.insert(peer);

        probe(LOCALHOST, port, self.config.probe)
            .await
            .map_err(|source| ScenarioError::PeerUnreachable { port, source })?;

        if let Some(status) = peer.try_status()? {
            return Err(ScenarioError::ExitedEarly {
                process: "peer",
                status,
            });
        }

        self.state.peer_started()
    }

    async fn call(&mut self, request: Request) -> Result<Value, ScenarioError> {
        let channel = self.main.as_mut().ok_or(ChannelError::Closed)?;
        Ok(channel.call(&request.to_value()).await?)
    }

    async fn ping(&mut self) -> Result<(), ScenarioError> {
        let reply = self.call(Request::Ping42).await?;
        command::expect_42(&reply)
    }

    async fn send_message(
        &mut self,
        family: AddressFamily,
        port: u16,
        bad_target: bool,
    ) -> Result<(), ScenarioError> {
        let peer_ready = self.state.peer_ready();
        self.state.dispatch_issued(peer_ready, bad_target);

        let reply = self
            .call(Request::Dispatch {
                family,
                port,
                peer_ready,
            })
            .await?;
        let id = command::dispatched_id(&reply)?;
        tracing::debug!(%id, %family, port, "message dispatched");
        self.state.message_sent(id)
    }

    async fn check_messages(&mut self) -> Result<(), ScenarioError> {
        let closed = match self.call(Request::Check).await {
            Ok(reply) => command::closed_ids(&reply),
            Err(e) => Err(e),
        };
        match closed {
            Ok(ids) => {
                tracing::debug!(closed = ids.len(), "messages checked");
                self.state.messages_checked(ids)
            }
            Err(e) => {
                self.state.clear_timeout();
                Err(e)
            }
        }
    }

    async fn shutdown_connections(&mut self, only_connections: bool) -> Result<(), ScenarioError> {
        let reply = self.call(Request::Shutdown { only_connections }).await?;
        command::expect_success(Tag::Shutdown, &reply)
    }

    async fn fuzz_main_port(&mut self, chunks: &[Vec<u8>]) -> Result<(), ScenarioError> {
        let port = self.config.ports.main;
        let fuzz = self.config.fuzz;
        let report =
            connect_and_inject(LOCALHOST, port, chunks, fuzz.inter_chunk_delay, fuzz.connect)
                .await
                .map_err(|source| ScenarioError::InjectFailed { port, source })?;
        tracing::debug!(?report, "fuzzed main port");
        Ok(())
    }

    async fn close_main(&mut self) -> Result<Option<ExitStatus>, ScenarioError> {
        match self.main.take() {
            Some(mut channel) => Ok(Some(channel.close().await?)),
            None => Ok(None),
        }
    }

    async fn close_peer(&mut self) -> Result<(), ScenarioError> {
        let Some(mut peer) = self.peer.take() else {
            return Ok(());
        };
        let status = peer.terminate(self.config.peer_grace()).await?;
        require_success("peer", status)
    }
}

fn flag(enabled: bool) -> &'static str {
    if enabled { "1" } else { "0" }
}

fn require_success(process: &'static str, status: ExitStatus) -> Result<(), ScenarioError> {
    if status.success() {
        Ok(())
    } else {
        Err(ScenarioError::ExitFailure { process, status })
    }
}

/// Keep the first error, log the rest.
fn keep_first(first: &mut Option<ScenarioError>, step: &str, result: Result<(), ScenarioError>) {
    let Err(e) = result else {
        return;
    };
    if first.is_some() {
        tracing::warn!(step, error = %e, "teardown step failed after an earlier error");
    } else {
        tracing::warn!(step, error = %e, "teardown step failed");
        *first = Some(e);
    }
}

impl StateMachine for Scenario {
    type Config = HarnessConfig;
    type Kind = ActionKind;
    type Action = Action;
    type Error = ScenarioError;

    fn initial_state(config: HarnessConfig) -> Self {
        Self::new(config)
    }

    fn legal_actions(&self) -> BTreeSet<ActionKind> {
        self.state.legal_actions()
    }

    fn instantiate(&self, kind: ActionKind, input: &StepInput) -> Action {
        Action::instantiate(kind, input, &self.state, &self.config)
    }

    async fn execute(&mut self, action: &Action) -> Result<(), ScenarioError> {
        let kind = action.kind();
        if !self.state.is_legal(kind) {
            return Err(ScenarioError::IllegalAction(kind));
        }
        tracing::info!(action = %kind, "execute");

        match action {
            Action::InitMain {
                encoding,
                shutdown_mode,
            } => self.init_main(*encoding, *shutdown_mode).await,
            Action::InitPeer { encoding } => self.init_peer(*encoding).await,
            Action::Ping42 => self.ping().await,
            Action::SendMessage { family, port } => self.send_message(*family, *port, false).await,
            Action::SendMessageBadTarget { family, port, .. } => {
                self.send_message(*family, *port, true).await
            }
            Action::CheckMessages => self.check_messages().await,
            Action::ShutdownConnections { only_connections } => {
                self.shutdown_connections(*only_connections).await
            }
            Action::FuzzMainPort { chunks } => self.fuzz_main_port(chunks).await,
        }
    }

    async fn teardown(&mut self) -> Result<(), ScenarioError> {
        if self.state.torn_down() {
            return Ok(());
        }
        let mut first = None;

        if self.state.main_ready() {
            tracing::info!("teardown");
            let drained = self.check_messages().await;
            keep_first(&mut first, "check messages", drained);

            let cleanup = match self.call(Request::Cleanup).await {
                Ok(reply) => command::expect_success(Tag::Cleanup, &reply),
                Err(e) => Err(e),
            };
            keep_first(&mut first, "cleanup", cleanup);
        }

        let main_status = match self.close_main().await {
            Ok(status) => status,
            Err(e) => {
                keep_first(&mut first, "close subject", Err(e));
                None
            }
        };

        let peer = self.close_peer().await;
        keep_first(&mut first, "close peer", peer);

        if let Some(status) = main_status {
            keep_first(&mut first, "subject exit", require_success("subject", status));
        }

        self.dead = None;
        self.state.finish();

        match first {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}
