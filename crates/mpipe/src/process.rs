//! Spawned process plus the process group it leads.
//!
//! On unix every child is put into a fresh process group so a diagnostic
//! wrapper (valgrind, rr) and whatever it forks can be signalled together.
//! Elsewhere only the tracked child handle is signalled.

use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use tokio::process::{Child, Command};

use crate::ChannelError;

/// Pause between the polite interrupt and the forceful kill.
pub const CLEANUP_PAUSE: Duration = Duration::from_millis(200);

/// A child process and its process group.
#[derive(Debug)]
pub struct ProcessGroup {
    label: String,
    child: Child,
    /// Process group id; equal to the child's pid on unix.
    pgid: Option<i32>,
    status: Option<ExitStatus>,
}

/// Signals the harness sends to a process group.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    Interrupt,
    Terminate,
    Kill,
}

impl Signal {
    #[cfg(unix)]
    fn as_raw(self) -> i32 {
        match self {
            Self::Interrupt => libc::SIGINT,
            Self::Terminate => libc::SIGTERM,
            Self::Kill => libc::SIGKILL,
        }
    }
}

impl ProcessGroup {
    /// Spawn `command` in its own process group.
    ///
    /// stdin/stdout are whatever the caller configured; stderr is inherited so
    /// the child's diagnostics land next to the harness's own.
    pub fn spawn(label: impl Into<String>, mut command: Command) -> std::io::Result<Self> {
        let label = label.into();
        command.stderr(Stdio::inherit()).kill_on_drop(true);
        #[cfg(unix)]
        command.process_group(0);

        let child = command.spawn()?;
        let pgid = child.id().and_then(|pid| i32::try_from(pid).ok());
        tracing::debug!(%label, ?pgid, "spawned process");

        Ok(Self {
            label,
            child,
            pgid,
            status: None,
        })
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn id(&self) -> Option<u32> {
        self.child.id()
    }

    pub(crate) fn child_mut(&mut self) -> &mut Child {
        &mut self.child
    }

    /// Exit status, if the process has been reaped.
    pub fn status(&self) -> Option<ExitStatus> {
        self.status
    }

    /// Reap the process if it has exited, without blocking.
    pub fn try_status(&mut self) -> std::io::Result<Option<ExitStatus>> {
        if self.status.is_none() {
            self.status = self.child.try_wait()?;
        }
        Ok(self.status)
    }

    /// Wait up to `grace` for the process to exit.
    pub async fn wait_for(&mut self, grace: Duration) -> std::io::Result<Option<ExitStatus>> {
        if let Some(status) = self.status {
            return Ok(Some(status));
        }
        match tokio::time::timeout(grace, self.child.wait()).await {
            Ok(status) => {
                let status = status?;
                self.status = Some(status);
                Ok(Some(status))
            }
            Err(_) => Ok(None),
        }
    }

    /// Send `signal` to every process in the group.
    pub fn signal(&mut self, signal: Signal) -> std::io::Result<()> {
        if self.status.is_some() {
            return Ok(());
        }

        #[cfg(unix)]
        {
            if let Some(pgid) = self.pgid {
                // SAFETY: killpg has no memory-safety preconditions.
                let rc = unsafe { libc::killpg(pgid, signal.as_raw()) };
                if rc == 0 {
                    return Ok(());
                }
                let err = std::io::Error::last_os_error();
                // ESRCH: the whole group is already gone.
                if err.raw_os_error() == Some(libc::ESRCH) {
                    return Ok(());
                }
                return Err(err);
            }
        }

        match signal {
            Signal::Kill => self.child.start_kill(),
            // Without process groups there is no portable polite signal.
            Signal::Interrupt | Signal::Terminate => Ok(()),
        }
    }

    /// Interrupt, pause, kill, reap.
    ///
    /// Always ends in [`ChannelError::ShutdownTimeout`]: a process that needs
    /// this has a broken shutdown path.
    pub async fn escalate(&mut self, grace: Duration) -> ChannelError {
        tracing::warn!(label = %self.label, ?grace, "process did not exit, escalating");

        if let Err(e) = self.signal(Signal::Interrupt) {
            tracing::warn!(label = %self.label, error = %e, "failed to interrupt process group");
        }
        tokio::time::sleep(CLEANUP_PAUSE).await;
        if let Err(e) = self.signal(Signal::Kill) {
            tracing::warn!(label = %self.label, error = %e, "failed to kill process group");
        }

        let status = match self.child.wait().await {
            Ok(status) => {
                self.status = Some(status);
                Some(status)
            }
            Err(e) => {
                tracing::warn!(label = %self.label, error = %e, "failed to reap process");
                None
            }
        };

        ChannelError::ShutdownTimeout { grace, status }
    }

    /// Ask the group to terminate and wait for it, escalating on timeout.
    pub async fn terminate(&mut self, grace: Duration) -> Result<ExitStatus, ChannelError> {
        if let Some(status) = self.try_status()? {
            return Ok(status);
        }

        self.signal(Signal::Terminate)?;
        match self.wait_for(grace).await? {
            Some(status) => {
                tracing::debug!(label = %self.label, %status, "process terminated");
                Ok(status)
            }
            None => Err(self.escalate(grace).await),
        }
    }
}

impl Drop for ProcessGroup {
    fn drop(&mut self) {
        if self.status.is_none() && matches!(self.child.try_wait(), Ok(None)) {
            tracing::debug!(label = %self.label, "killing unreaped process group on drop");
            let _ = self.signal(Signal::Kill);
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn sh(script: &str) -> Command {
        let mut command = Command::new("sh");
        command.args(["-c", script]).stdin(Stdio::null()).stdout(Stdio::null());
        command
    }

    #[tokio::test]
    async fn test_terminate_reports_exit_status() {
        let mut group = ProcessGroup::spawn("sleeper", sh("sleep 30")).unwrap();
        let status = group.terminate(Duration::from_secs(5)).await.unwrap();
        assert!(!status.success());
        assert_eq!(group.status(), Some(status));
    }

    #[tokio::test]
    async fn test_trapped_terminate_escalates() {
        let mut group =
            ProcessGroup::spawn("stubborn", sh("trap '' TERM INT; while :; do sleep 1; done"))
                .unwrap();
        // Let the shell install its traps before signalling.
        tokio::time::sleep(Duration::from_millis(200)).await;
        let err = group
            .terminate(Duration::from_millis(300))
            .await
            .unwrap_err();
        assert!(matches!(err, ChannelError::ShutdownTimeout { .. }));
        assert!(group.status().is_some());
    }

    #[tokio::test]
    async fn test_signal_after_exit_is_noop() {
        let mut group = ProcessGroup::spawn("quick", sh("exit 3")).unwrap();
        let status = group.wait_for(Duration::from_secs(5)).await.unwrap().unwrap();
        assert_eq!(status.code(), Some(3));
        group.signal(Signal::Kill).unwrap();
        assert_eq!(group.terminate(Duration::from_secs(1)).await.unwrap(), status);
    }
}
