//! Network stimuli for provoking specific behaviour in a process under test.
//!
//! - [`listen_dead_socket`]: a port that completes TCP handshakes but never
//!   answers, so anything dialling it runs into its own timeout.
//! - [`connect_and_inject`]: connect to a port and write arbitrary bytes,
//!   tolerating the other side hanging up mid-way.
//! - [`probe`]: wait until something is listening on a port.

mod dead;
mod error;
mod inject;

pub use dead::{DeadListener, listen_dead_socket};
pub use error::StimulusError;
pub use inject::{InjectReport, RetryPolicy, connect_and_inject, probe};
