//! How the child process is started.
//!
//! The launch mode only prefixes the command line; the channel behaves the
//! same either way. Diagnostic wrappers slow the child down, so they also get
//! a longer shutdown grace period.

use std::ffi::OsStr;
use std::time::Duration;

use tokio::process::Command;

/// Launch mode for a spawned process.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Launch {
    /// Run the command as is.
    #[default]
    Direct,
    /// Run under valgrind memcheck; leaks fail the process with exit code 1.
    Memcheck,
    /// Record the run with `rr` for deterministic replay.
    Replay,
}

const MEMCHECK_PREFIX: &[&str] = &[
    "valgrind",
    "--tool=memcheck",
    "--leak-check=full",
    "--show-leak-kinds=all",
    "--errors-for-leak-kinds=all",
    "--error-exitcode=1",
];

const REPLAY_PREFIX: &[&str] = &["rr"];

impl Launch {
    /// Pick the launch mode from `MPP_MC=True` / `MPP_RR=True`.
    pub fn from_env() -> Self {
        let enabled = |key: &str| std::env::var(key).is_ok_and(|v| v == "True");
        if enabled("MPP_MC") {
            Self::Memcheck
        } else if enabled("MPP_RR") {
            Self::Replay
        } else {
            Self::Direct
        }
    }

    /// Arguments placed before the program.
    pub fn prefix(&self) -> &'static [&'static str] {
        match self {
            Self::Direct => &[],
            Self::Memcheck => MEMCHECK_PREFIX,
            Self::Replay => REPLAY_PREFIX,
        }
    }

    /// How long a well-behaved process may take to exit after being asked.
    pub fn grace(&self) -> Duration {
        match self {
            Self::Direct => Duration::from_secs(1),
            Self::Memcheck => Duration::from_secs(10),
            Self::Replay => Duration::from_secs(5),
        }
    }

    /// Build the command for `program args...` under this launch mode.
    pub fn command<P, I, S>(&self, program: P, args: I) -> Command
    where
        P: AsRef<OsStr>,
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        let mut command = match self.prefix().split_first() {
            Some((wrapper, rest)) => {
                let mut command = Command::new(wrapper);
                command.args(rest).arg(program);
                command
            }
            None => Command::new(program),
        };
        command.args(args);
        command
    }
}

impl std::str::FromStr for Launch {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "direct" => Ok(Self::Direct),
            "memcheck" => Ok(Self::Memcheck),
            "replay" => Ok(Self::Replay),
            other => Err(format!(
                "unknown launch mode `{other}` (expected direct, memcheck or replay)"
            )),
        }
    }
}

impl std::fmt::Display for Launch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Direct => write!(f, "direct"),
            Self::Memcheck => write!(f, "memcheck"),
            Self::Replay => write!(f, "replay"),
        }
    }
}
