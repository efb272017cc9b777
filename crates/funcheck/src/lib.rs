//! Model-based conformance and fuzz harness.
//!
//! A [`Scenario`] keeps a [`ShadowState`] of what the subject should look like,
//! offers the actions that are legal in that state, runs them against the
//! real subject (control channel, raw sockets, fault injection) and checks
//! every reply against the shadow state.
//!
//! Anything that can walk a [`StateMachine`] can drive a scenario; this crate
//! ships [`run_scenario`] with a seeded [`RandomWalk`].
//!
//! ```no_run
//! use funcheck::{HarnessConfig, RandomWalk, Scenario, StateMachine, run_scenario};
//!
//! # async fn demo() {
//! let config = HarnessConfig::new("./funcheck-subject", "./funcheck-echo");
//! let mut scenario = Scenario::initial_state(config);
//! let trace = run_scenario(&mut scenario, RandomWalk::new(42, 50)).await;
//! assert!(trace.passed());
//! # }
//! ```

pub mod action;
pub mod command;
pub mod config;
pub mod driver;
pub mod error;
pub mod machine;
pub mod model;
pub mod report;
pub mod state;

pub use action::{Action, BadTarget, StepInput};
pub use command::MessageId;
pub use config::{AddressFamily, Encoding, FuzzLimits, HarnessConfig, Ports};
pub use driver::{Failure, RandomWalk, Trace, run_scenario};
pub use error::{FailureKind, ScenarioError};
pub use machine::StateMachine;
pub use model::Scenario;
pub use report::ScenarioReport;
pub use state::{ActionKind, ShadowState};
