//! Scenario configuration.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use funcheck_mpipe::Launch;
use funcheck_stimulus::RetryPolicy;
use serde::Serialize;

/// Ports a scenario uses. Only one scenario per port set may run at a time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Ports {
    /// The subject's listening port, also the fuzz target.
    pub main: u16,
    /// Where the echo peer listens.
    pub peer: u16,
    /// Dead listener: accepts handshakes, never answers.
    pub dead: u16,
    /// Nothing listens here.
    pub unbound: u16,
}

impl Ports {
    /// Four consecutive ports counting down from `main`.
    pub fn descending_from(main: u16) -> Self {
        Self {
            main,
            peer: main.saturating_sub(1),
            dead: main.saturating_sub(2),
            unbound: main.saturating_sub(3),
        }
    }
}

impl Default for Ports {
    fn default() -> Self {
        Self::descending_from(2998)
    }
}

/// Wire encoding selector passed to the subject and the peer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Encoding {
    #[default]
    Plain,
    Encrypted,
}

impl Encoding {
    pub const ALL: [Self; 2] = [Self::Plain, Self::Encrypted];

    /// Command-line form: `"0"` or `"1"`.
    pub fn as_arg(self) -> &'static str {
        match self {
            Self::Plain => "0",
            Self::Encrypted => "1",
        }
    }
}

impl fmt::Display for Encoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_arg())
    }
}

impl FromStr for Encoding {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "0" | "plain" => Ok(Self::Plain),
            "1" | "encrypted" => Ok(Self::Encrypted),
            other => Err(format!("unknown encoding `{other}` (expected 0 or 1)")),
        }
    }
}

/// Address family of a dispatch target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub enum AddressFamily {
    #[serde(rename = "inet")]
    V4,
    #[serde(rename = "inet6")]
    V6,
}

impl AddressFamily {
    pub const ALL: [Self; 2] = [Self::V4, Self::V6];

    /// The platform's `AF_*` constant, as the subject expects it.
    pub fn raw(self) -> i64 {
        match self {
            Self::V4 => libc::AF_INET as i64,
            Self::V6 => libc::AF_INET6 as i64,
        }
    }

    pub fn from_raw(raw: i64) -> Option<Self> {
        if raw == libc::AF_INET as i64 {
            Some(Self::V4)
        } else if raw == libc::AF_INET6 as i64 {
            Some(Self::V6)
        } else {
            None
        }
    }

    /// Loopback address in this family.
    pub fn loopback(self) -> &'static str {
        match self {
            Self::V4 => "127.0.0.1",
            Self::V6 => "::1",
        }
    }
}

impl fmt::Display for AddressFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::V4 => f.write_str("inet"),
            Self::V6 => f.write_str("inet6"),
        }
    }
}

impl FromStr for AddressFamily {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "inet" | "v4" | "4" => Ok(Self::V4),
            "inet6" | "v6" | "6" => Ok(Self::V6),
            other => Err(format!("unknown address family `{other}` (expected inet or inet6)")),
        }
    }
}

/// Bounds on generated fuzz input.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FuzzLimits {
    pub max_chunks: usize,
    pub max_chunk_len: usize,
    pub inter_chunk_delay: Duration,
    pub connect: RetryPolicy,
}

impl Default for FuzzLimits {
    fn default() -> Self {
        Self {
            max_chunks: 8,
            max_chunk_len: 256,
            inter_chunk_delay: Duration::from_millis(1),
            connect: RetryPolicy::new(10, Duration::from_millis(50)),
        }
    }
}

/// Everything a scenario needs to know before it starts.
#[derive(Debug, Clone)]
pub struct HarnessConfig {
    /// Subject binary: `<main_port> <encoding> <shutdown_flag> <synchronous_flag>`.
    pub subject: PathBuf,
    /// Echo peer binary: `<peer_port> <encoding>`.
    pub peer: PathBuf,
    pub launch: Launch,
    pub ports: Ports,
    /// Whether the subject must support dropping idle connections.
    pub shutdown_mode: bool,
    /// Whether the subject checks delivery results itself.
    pub synchronous: bool,
    pub families: Vec<AddressFamily>,
    pub encodings: Vec<Encoding>,
    /// Readiness probe for the subject and the peer.
    pub probe: RetryPolicy,
    pub fuzz: FuzzLimits,
    /// How long the peer may take to exit after SIGTERM.
    pub peer_grace: Duration,
}

impl HarnessConfig {
    pub fn new(subject: impl Into<PathBuf>, peer: impl Into<PathBuf>) -> Self {
        Self {
            subject: subject.into(),
            peer: peer.into(),
            launch: Launch::from_env(),
            ports: Ports::default(),
            shutdown_mode: false,
            synchronous: true,
            families: AddressFamily::ALL.to_vec(),
            encodings: Encoding::ALL.to_vec(),
            probe: RetryPolicy::new(40, Duration::from_millis(25))
                .with_max_backoff(Duration::from_millis(500)),
            fuzz: FuzzLimits::default(),
            peer_grace: Duration::from_secs(1),
        }
    }

    pub fn with_ports(mut self, ports: Ports) -> Self {
        self.ports = ports;
        self
    }

    pub fn with_shutdown_mode(mut self, enabled: bool) -> Self {
        self.shutdown_mode = enabled;
        self
    }

    pub fn with_families(mut self, families: Vec<AddressFamily>) -> Self {
        self.families = families;
        self
    }

    /// Peer grace period, never shorter than the launch mode's.
    pub fn peer_grace(&self) -> Duration {
        self.peer_grace.max(self.launch.grace())
    }
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self::new("funcheck-subject", "funcheck-echo")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_ports() {
        let ports = Ports::default();
        assert_eq!(
            (ports.main, ports.peer, ports.dead, ports.unbound),
            (2998, 2997, 2996, 2995)
        );
    }

    #[test]
    fn test_encoding_args() {
        assert_eq!(Encoding::Plain.as_arg(), "0");
        assert_eq!("1".parse::<Encoding>(), Ok(Encoding::Encrypted));
        assert!("2".parse::<Encoding>().is_err());
    }

    #[test]
    fn test_family_raw_round_trip() {
        for family in AddressFamily::ALL {
            assert_eq!(AddressFamily::from_raw(family.raw()), Some(family));
        }
        assert_eq!(AddressFamily::from_raw(-1), None);
    }
}
