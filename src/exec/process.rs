// src/exec/process.rs

//! Launching shell commands as child processes and tearing them down again.
//!
//! On Unix every child gets its own process group, so `terminate` reaches the
//! whole pipeline a shell command starts (`stty ... && cat /dev/ttyACM0`), not
//! just the `sh` in front of it.

use std::fmt;
use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use tokio::process::{Child, ChildStderr, ChildStdout, Command};
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::errors::{FlashdeckError, Result};
use crate::exec::LaunchSpec;

/// Terminal status of a child process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessExit {
    /// Exited on its own with this code.
    Code(i32),
    /// Killed by this signal (Unix only).
    Signal(i32),
    /// The platform reported neither a code nor a signal.
    Unknown,
}

impl ProcessExit {
    pub fn success(&self) -> bool {
        matches!(self, ProcessExit::Code(0))
    }

    /// Exit code in shell convention: `128 + signal` for signals, `-1` when
    /// unknown.
    pub fn code(&self) -> i32 {
        match self {
            ProcessExit::Code(code) => *code,
            ProcessExit::Signal(signal) => 128 + signal,
            ProcessExit::Unknown => -1,
        }
    }
}

impl From<ExitStatus> for ProcessExit {
    fn from(status: ExitStatus) -> Self {
        if let Some(code) = status.code() {
            return ProcessExit::Code(code);
        }
        #[cfg(unix)]
        {
            use std::os::unix::process::ExitStatusExt;
            if let Some(signal) = status.signal() {
                return ProcessExit::Signal(signal);
            }
        }
        ProcessExit::Unknown
    }
}

impl fmt::Display for ProcessExit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProcessExit::Code(code) => write!(f, "exit code {code}"),
            ProcessExit::Signal(signal) => write!(f, "signal {signal}"),
            ProcessExit::Unknown => write!(f, "unknown exit status"),
        }
    }
}

/// Result of [`ProcessHandle::terminate`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminateOutcome {
    /// The process had already exited; nothing was sent.
    AlreadyExited(ProcessExit),
    /// The process exited within the grace period after the polite request.
    Terminated(ProcessExit),
    /// The process had to be killed forcefully.
    Killed(ProcessExit),
    /// Even the forceful kill did not produce an exit within the final bound.
    Unresponsive,
}

impl TerminateOutcome {
    pub fn exit(&self) -> Option<ProcessExit> {
        match self {
            TerminateOutcome::AlreadyExited(exit)
            | TerminateOutcome::Terminated(exit)
            | TerminateOutcome::Killed(exit) => Some(*exit),
            TerminateOutcome::Unresponsive => None,
        }
    }
}

/// Launches [`LaunchSpec`]s through the platform shell.
#[derive(Debug, Clone, Default)]
pub struct ProcessRunner {
    current_dir: Option<PathBuf>,
}

impl ProcessRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run every launched command from `dir`.
    pub fn with_current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.current_dir = Some(dir.into());
        self
    }

    /// Spawn the command. Stdout and stderr are piped and must be taken by the
    /// caller (see [`ProcessHandle::take_stdout`]); stdin is closed.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn launch(&self, spec: &LaunchSpec) -> Result<ProcessHandle> {
        info!(name = %spec.name(), cmd = %spec.command(), "launching process");

        let mut cmd = shell_command(spec.command());
        cmd.stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        #[cfg(unix)]
        cmd.process_group(0);

        if let Some(dir) = &self.current_dir {
            cmd.current_dir(dir);
        }

        let child = cmd.spawn().map_err(|source| FlashdeckError::Launch {
            name: spec.name().to_string(),
            source,
        })?;

        let pid = child.id();
        debug!(name = %spec.name(), ?pid, "process launched");

        Ok(ProcessHandle {
            name: spec.name().to_string(),
            pid,
            child,
            exit: None,
            term_sent: false,
        })
    }
}

/// Build a shell command appropriate for the platform.
fn shell_command(command: &str) -> Command {
    if cfg!(windows) {
        let mut c = Command::new("cmd");
        c.arg("/C").arg(command);
        c
    } else {
        let mut c = Command::new("sh");
        c.arg("-c").arg(command);
        c
    }
}

/// One running (or finished) child process.
///
/// Exclusively owned by whoever launched it. Dropping a handle whose process
/// is still running kills it (whole process group on Unix).
#[derive(Debug)]
pub struct ProcessHandle {
    name: String,
    pid: Option<u32>,
    child: Child,
    exit: Option<ProcessExit>,
    term_sent: bool,
}

impl ProcessHandle {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    pub fn take_stdout(&mut self) -> Option<ChildStdout> {
        self.child.stdout.take()
    }

    pub fn take_stderr(&mut self) -> Option<ChildStderr> {
        self.child.stderr.take()
    }

    /// Exit status, if the process is known to have exited.
    pub fn exit(&self) -> Option<ProcessExit> {
        self.exit
    }

    pub fn is_running(&mut self) -> bool {
        self.poll_exit().is_none()
    }

    fn poll_exit(&mut self) -> Option<ProcessExit> {
        if self.exit.is_none() {
            match self.child.try_wait() {
                Ok(Some(status)) => self.exit = Some(status.into()),
                Ok(None) => {}
                Err(e) => debug!(name = %self.name, error = %e, "try_wait failed"),
            }
        }
        self.exit
    }

    /// Wait for the process to exit. Suspends only the calling task.
    ///
    /// Cancel safe; once the exit is known further calls return it directly.
    pub async fn wait(&mut self) -> Result<ProcessExit> {
        if let Some(exit) = self.exit {
            return Ok(exit);
        }

        let status = self.child.wait().await?;
        let exit = ProcessExit::from(status);
        self.exit = Some(exit);

        debug!(name = %self.name, pid = ?self.pid, %exit, "process exited");
        Ok(exit)
    }

    /// Ask the process to stop, escalating to a forceful kill.
    ///
    /// Sends a graceful termination signal and waits up to `grace`; if the
    /// process is still alive it is killed and waited on for up to
    /// `kill_timeout`. Calling this on an exited process is a no-op.
    pub async fn terminate(&mut self, grace: Duration, kill_timeout: Duration) -> TerminateOutcome {
        if let Some(exit) = self.poll_exit() {
            debug!(name = %self.name, %exit, "terminate requested but process already exited");
            return TerminateOutcome::AlreadyExited(exit);
        }

        if !self.term_sent {
            self.term_sent = true;
            if self.request_exit() {
                match timeout(grace, self.wait()).await {
                    Ok(Ok(exit)) => {
                        info!(name = %self.name, %exit, "process terminated gracefully");
                        return TerminateOutcome::Terminated(exit);
                    }
                    Ok(Err(e)) => {
                        warn!(name = %self.name, error = %e, "waiting for terminated process failed");
                    }
                    Err(_) => {
                        info!(
                            name = %self.name,
                            grace_ms = grace.as_millis() as u64,
                            "process ignored termination request; killing"
                        );
                    }
                }
            }
        }

        self.force_kill();

        match timeout(kill_timeout, self.wait()).await {
            Ok(Ok(exit)) => {
                info!(name = %self.name, %exit, "process killed");
                TerminateOutcome::Killed(exit)
            }
            Ok(Err(e)) => {
                warn!(name = %self.name, error = %e, "waiting for killed process failed");
                TerminateOutcome::Unresponsive
            }
            Err(_) => {
                warn!(
                    name = %self.name,
                    pid = ?self.pid,
                    "process still running after forceful kill"
                );
                TerminateOutcome::Unresponsive
            }
        }
    }

    /// Kill whatever is left of the process group, even after the shell
    /// itself was reaped. Background jobs of the command are group members.
    pub fn kill_group(&self) -> bool {
        #[cfg(unix)]
        {
            self.signal_group(nix::sys::signal::Signal::SIGKILL)
        }
        #[cfg(not(unix))]
        {
            false
        }
    }

    #[cfg(unix)]
    fn request_exit(&mut self) -> bool {
        self.signal_group(nix::sys::signal::Signal::SIGTERM)
    }

    #[cfg(not(unix))]
    fn request_exit(&mut self) -> bool {
        // No graceful signal available; the kill stage does the work.
        false
    }

    fn force_kill(&mut self) {
        #[cfg(unix)]
        self.signal_group(nix::sys::signal::Signal::SIGKILL);

        if let Err(e) = self.child.start_kill() {
            debug!(name = %self.name, error = %e, "start_kill failed");
        }
    }

    #[cfg(unix)]
    fn signal_group(&self, signal: nix::sys::signal::Signal) -> bool {
        use nix::sys::signal::kill;
        use nix::unistd::Pid;

        let Some(pid) = self.pid else {
            return false;
        };

        // Negative pid addresses the process group created at launch.
        match kill(Pid::from_raw(-(pid as i32)), signal) {
            Ok(()) => {
                debug!(name = %self.name, pid, ?signal, "signalled process group");
                true
            }
            Err(errno) => {
                debug!(name = %self.name, pid, ?signal, %errno, "failed to signal process group");
                false
            }
        }
    }
}

impl Drop for ProcessHandle {
    fn drop(&mut self) {
        if self.exit.is_none() && matches!(self.child.try_wait(), Ok(None)) {
            debug!(
                name = %self.name,
                pid = ?self.pid,
                "process handle dropped while running; killing"
            );
            self.force_kill();
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;

    fn runner() -> ProcessRunner {
        ProcessRunner::new()
    }

    #[tokio::test]
    async fn exit_codes_are_reported() -> Result<()> {
        let mut ok = runner().launch(&LaunchSpec::new("ok", "true"))?;
        assert_eq!(ok.wait().await?, ProcessExit::Code(0));

        let mut failing = runner().launch(&LaunchSpec::new("fail", "exit 2"))?;
        let exit = failing.wait().await?;
        assert_eq!(exit, ProcessExit::Code(2));
        assert!(!exit.success());
        assert_eq!(failing.exit(), Some(ProcessExit::Code(2)));
        Ok(())
    }

    #[tokio::test]
    async fn compound_shell_syntax_runs_unmodified() -> Result<()> {
        let spec = LaunchSpec::new("compound", "X=5 && echo \"v=$X\" | tr v w");
        let mut handle = runner().launch(&spec)?;
        let mut stdout = handle.take_stdout().expect("stdout piped");
        let mut out = String::new();
        stdout.read_to_string(&mut out).await?;
        handle.wait().await?;
        assert_eq!(out.trim(), "w=5");
        Ok(())
    }

    #[tokio::test]
    async fn missing_command_is_a_nonzero_exit_not_a_launch_error() -> Result<()> {
        let mut handle = runner().launch(&LaunchSpec::new("nope", "definitely-not-a-real-tool-xyz"))?;
        assert_eq!(handle.wait().await?, ProcessExit::Code(127));
        Ok(())
    }

    #[tokio::test]
    async fn terminate_after_exit_is_a_noop() -> Result<()> {
        let mut handle = runner().launch(&LaunchSpec::new("quick", "exit 3"))?;
        handle.wait().await?;
        let outcome = handle
            .terminate(Duration::from_millis(100), Duration::from_millis(100))
            .await;
        assert_eq!(outcome, TerminateOutcome::AlreadyExited(ProcessExit::Code(3)));
        Ok(())
    }

    #[tokio::test]
    async fn terminate_stops_a_cooperative_process() -> Result<()> {
        let mut handle = runner().launch(&LaunchSpec::new("sleeper", "sleep 30"))?;
        let outcome = handle
            .terminate(Duration::from_secs(2), Duration::from_secs(2))
            .await;
        assert!(matches!(outcome, TerminateOutcome::Terminated(_)), "{outcome:?}");
        assert!(!handle.is_running());
        Ok(())
    }

    #[tokio::test]
    async fn terminate_escalates_when_sigterm_is_ignored() -> Result<()> {
        let spec = LaunchSpec::new("stubborn", "trap '' TERM; while true; do sleep 0.05; done");
        let mut handle = runner().launch(&spec)?;
        // Let the shell install its trap.
        tokio::time::sleep(Duration::from_millis(100)).await;

        let outcome = handle
            .terminate(Duration::from_millis(200), Duration::from_secs(2))
            .await;
        assert_eq!(outcome, TerminateOutcome::Killed(ProcessExit::Signal(9)));

        // A second request is a no-op.
        let again = handle
            .terminate(Duration::from_millis(200), Duration::from_secs(2))
            .await;
        assert!(matches!(again, TerminateOutcome::AlreadyExited(_)));
        Ok(())
    }

    #[tokio::test]
    async fn terminate_right_after_launch_is_safe() -> Result<()> {
        let mut handle = runner().launch(&LaunchSpec::new("instant", "sleep 5"))?;
        let outcome = handle
            .terminate(Duration::from_secs(1), Duration::from_secs(1))
            .await;
        assert!(outcome.exit().is_some());
        Ok(())
    }

    #[test]
    fn signal_exits_map_to_shell_codes() {
        assert_eq!(ProcessExit::Signal(15).code(), 143);
        assert_eq!(ProcessExit::Unknown.code(), -1);
        assert_eq!(ProcessExit::Code(2).to_string(), "exit code 2");
    }
}
