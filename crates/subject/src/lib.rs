//! Reference implementations of the two processes a scenario talks to.
//!
//! - [`subject`]: listens on its main port, takes control commands on stdio,
//!   dispatches messages to a target port and reports when they are done.
//! - [`echo`]: the cooperating peer; echoes every byte it receives.
//!
//! Both keep the command-line contract the harness expects, so they stand in
//! for a real implementation when testing the harness itself.

mod delivery;
pub mod echo;
mod listen;
pub mod subject;

pub use subject::{Subject, SubjectConfig};
