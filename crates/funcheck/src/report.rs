//! Human and machine readable scenario results.

use std::fmt::Write as _;

use owo_colors::OwoColorize;
use serde::Serialize;

use crate::driver::Trace;
use crate::{Action, FailureKind, ScenarioError};

/// Outcome of one scenario, ready to print.
#[derive(Debug, Clone, Serialize)]
pub struct ScenarioReport {
    pub seed: u64,
    pub passed: bool,
    pub actions: Vec<Action>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure: Option<FailureReport>,
}

#[derive(Debug, Clone, Serialize)]
pub struct FailureReport {
    pub kind: FailureKind,
    /// Index of the failing action; absent when teardown failed.
    pub step: Option<usize>,
    pub message: String,
}

impl ScenarioReport {
    pub fn from_trace(seed: u64, trace: Trace<Action, ScenarioError>) -> Self {
        let failure = trace.failure.map(|failure| FailureReport {
            kind: failure.error.kind(),
            step: failure.step,
            message: failure.error.to_string(),
        });
        Self {
            seed,
            passed: failure.is_none(),
            actions: trace.actions,
            failure,
        }
    }

    /// One colored block per scenario.
    pub fn render_text(&self) -> String {
        let mut out = String::new();
        let status = if self.passed {
            format!("{}", "PASS".green().bold())
        } else {
            format!("{}", "FAIL".red().bold())
        };
        let _ = writeln!(
            out,
            "{status} seed {} ({} actions)",
            self.seed,
            self.actions.len()
        );

        let failed_step = self.failure.as_ref().and_then(|f| f.step);
        for (i, action) in self.actions.iter().enumerate() {
            let line = format!("{i:>4}  {}", describe(action));
            if Some(i) == failed_step {
                let _ = writeln!(out, "{}", line.red());
            } else {
                let _ = writeln!(out, "{}", line.dimmed());
            }
        }

        if let Some(failure) = &self.failure {
            let place = match failure.step {
                Some(step) => format!("step {step}"),
                None => "teardown".to_string(),
            };
            let _ = writeln!(
                out,
                "      {} {} in {place}: {}",
                "[fail]".red(),
                failure.kind.yellow(),
                failure.message
            );
        }
        out
    }

    pub fn render_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

fn describe(action: &Action) -> String {
    match action {
        Action::InitMain {
            encoding,
            shutdown_mode,
        } => format!("init_main encoding={encoding} shutdown_mode={shutdown_mode}"),
        Action::InitPeer { encoding } => format!("init_peer encoding={encoding}"),
        Action::SendMessage { family, port } => format!("send_message {family} port={port}"),
        Action::SendMessageBadTarget {
            family,
            port,
            target,
        } => format!("send_message_bad_target {family} port={port} ({target:?})"),
        Action::ShutdownConnections { only_connections } => {
            format!("shutdown_connections only_connections={only_connections}")
        }
        Action::FuzzMainPort { chunks } => {
            let bytes: usize = chunks.iter().map(Vec::len).sum();
            format!("fuzz_main_port {} chunk(s), {bytes} byte(s)", chunks.len())
        }
        other => other.kind().to_string(),
    }
}
