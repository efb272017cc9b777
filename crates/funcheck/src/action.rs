//! Concrete actions and how an engine's raw input becomes one.

use serde::{Serialize, Serializer};

use crate::config::{AddressFamily, Encoding, HarnessConfig};
use crate::state::{ActionKind, ShadowState};

/// Raw choices an engine makes for one step.
///
/// `pick` selects among the legal kinds, `variant` selects parameters and
/// `chunks` feeds `FuzzMainPort`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StepInput {
    pub pick: u32,
    pub variant: u32,
    pub chunks: Vec<Vec<u8>>,
}

impl StepInput {
    pub fn new(pick: u32, variant: u32) -> Self {
        Self {
            pick,
            variant,
            chunks: Vec::new(),
        }
    }

    pub fn with_chunks(mut self, chunks: Vec<Vec<u8>>) -> Self {
        self.chunks = chunks;
        self
    }
}

/// Which bad port a bad-target send aims at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BadTarget {
    /// The dead listener: connects, never answers.
    DeadListener,
    /// Nothing listens there.
    Unbound,
}

/// One scenario step with all its parameters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum Action {
    InitMain {
        encoding: Encoding,
        shutdown_mode: bool,
    },
    InitPeer {
        encoding: Encoding,
    },
    Ping42,
    SendMessage {
        family: AddressFamily,
        port: u16,
    },
    SendMessageBadTarget {
        family: AddressFamily,
        port: u16,
        target: BadTarget,
    },
    CheckMessages,
    ShutdownConnections {
        only_connections: bool,
    },
    FuzzMainPort {
        #[serde(serialize_with = "hex_chunks")]
        chunks: Vec<Vec<u8>>,
    },
}

impl Action {
    pub fn kind(&self) -> ActionKind {
        match self {
            Self::InitMain { .. } => ActionKind::InitMain,
            Self::InitPeer { .. } => ActionKind::InitPeer,
            Self::Ping42 => ActionKind::Ping42,
            Self::SendMessage { .. } => ActionKind::SendMessage,
            Self::SendMessageBadTarget { .. } => ActionKind::SendMessageBadTarget,
            Self::CheckMessages => ActionKind::CheckMessages,
            Self::ShutdownConnections { .. } => ActionKind::ShutdownConnections,
            Self::FuzzMainPort { .. } => ActionKind::FuzzMainPort,
        }
    }

    /// Fill in the parameters of `kind` from `input`.
    pub fn instantiate(
        kind: ActionKind,
        input: &StepInput,
        state: &ShadowState,
        config: &HarnessConfig,
    ) -> Self {
        let variant = input.variant as usize;
        let family = choose(&config.families, variant).unwrap_or(AddressFamily::V4);

        match kind {
            ActionKind::InitMain => Self::InitMain {
                encoding: choose(&config.encodings, variant).unwrap_or_default(),
                shutdown_mode: state.shutdown_mode(),
            },
            ActionKind::InitPeer => Self::InitPeer {
                encoding: state.encoding().unwrap_or_default(),
            },
            ActionKind::Ping42 => Self::Ping42,
            ActionKind::SendMessage => Self::SendMessage {
                family,
                port: config.ports.peer,
            },
            ActionKind::SendMessageBadTarget => {
                let families = config.families.len().max(1);
                let (target, port) = if (variant / families) % 2 == 0 {
                    (BadTarget::DeadListener, config.ports.dead)
                } else {
                    (BadTarget::Unbound, config.ports.unbound)
                };
                Self::SendMessageBadTarget {
                    family,
                    port,
                    target,
                }
            }
            ActionKind::CheckMessages => Self::CheckMessages,
            ActionKind::ShutdownConnections => Self::ShutdownConnections {
                only_connections: variant % 2 == 1,
            },
            ActionKind::FuzzMainPort => Self::FuzzMainPort {
                chunks: input
                    .chunks
                    .iter()
                    .take(config.fuzz.max_chunks)
                    .map(|chunk| chunk[..chunk.len().min(config.fuzz.max_chunk_len)].to_vec())
                    .collect(),
            },
        }
    }
}

fn choose<T: Copy>(options: &[T], variant: usize) -> Option<T> {
    match options.len() {
        0 => None,
        len => Some(options[variant % len]),
    }
}

fn hex_chunks<S: Serializer>(chunks: &[Vec<u8>], serializer: S) -> Result<S::Ok, S::Error> {
    serializer.collect_seq(chunks.iter().map(|chunk| {
        chunk
            .iter()
            .map(|byte| format!("{byte:02x}"))
            .collect::<String>()
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> HarnessConfig {
        HarnessConfig::default().with_families(vec![AddressFamily::V4, AddressFamily::V6])
    }

    fn started() -> ShadowState {
        let mut state = ShadowState::new(false);
        state.main_started(Encoding::Encrypted, false).unwrap();
        state
    }

    #[test]
    fn test_instantiate_matches_kind() {
        let config = config();
        let state = started();
        for kind in ActionKind::ALL {
            for variant in 0..4 {
                let input = StepInput::new(0, variant);
                let action = Action::instantiate(kind, &input, &state, &config);
                assert_eq!(action.kind(), kind);
            }
        }
    }

    #[test]
    fn test_peer_reuses_main_encoding() {
        let action = Action::instantiate(
            ActionKind::InitPeer,
            &StepInput::new(0, 0),
            &started(),
            &config(),
        );
        assert_eq!(
            action,
            Action::InitPeer {
                encoding: Encoding::Encrypted
            }
        );
    }

    #[test]
    fn test_bad_target_alternates_ports() {
        let config = config();
        let state = started();
        let ports: Vec<u16> = (0..4)
            .map(|variant| {
                match Action::instantiate(
                    ActionKind::SendMessageBadTarget,
                    &StepInput::new(0, variant),
                    &state,
                    &config,
                ) {
                    Action::SendMessageBadTarget { port, .. } => port,
                    other => panic!("unexpected {other:?}"),
                }
            })
            .collect();
        assert_eq!(ports, [2996, 2996, 2995, 2995]);
    }

    #[test]
    fn test_fuzz_chunks_are_bounded() {
        let mut config = config();
        config.fuzz.max_chunks = 2;
        config.fuzz.max_chunk_len = 3;
        let input = StepInput::new(0, 0).with_chunks(vec![vec![1; 10], vec![], vec![2; 2]]);
        let action = Action::instantiate(ActionKind::FuzzMainPort, &input, &started(), &config);
        assert_eq!(
            action,
            Action::FuzzMainPort {
                chunks: vec![vec![1, 1, 1], vec![]]
            }
        );
    }

    #[test]
    fn test_action_json_shape() {
        let action = Action::FuzzMainPort {
            chunks: vec![vec![0xde, 0xad]],
        };
        assert_eq!(
            serde_json::to_string(&action).unwrap(),
            r#"{"action":"fuzz_main_port","chunks":["dead"]}"#
        );
    }
}
