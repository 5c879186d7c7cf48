// src/monitor/registry.rs

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::oneshot;
use tokio::task::{AbortHandle, JoinHandle};
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::exec::stream::{self, StreamBuffer};
use crate::exec::{LaunchSpec, ProcessExit, ProcessHandle, ProcessRunner, TerminateOutcome};
use crate::monitor::{MonitorSettings, MonitorState};
use crate::sink::SharedSink;
use crate::toolchain::ToolchainDriver;

/// Internal handle for a monitored port.
///
/// - `generation` tells this entry apart from an earlier or later monitor on
///   the same port, so a finishing supervisor never removes its successor.
/// - `cancel` asks the supervisor to terminate the process; the supervisor
///   answers on the enclosed sender once terminate has finished.
/// - `task` is the supervising Tokio task.
struct MonitorEntry {
    generation: u64,
    state: MonitorState,
    pid: Option<u32>,
    cancel: Option<oneshot::Sender<StopAck>>,
    task: Option<JoinHandle<()>>,
}

type StopAck = oneshot::Sender<()>;

/// How one stop request went.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StopResult {
    /// No running monitor: never started, already gone, or being stopped by
    /// someone else.
    NotRunning,
    Stopped,
    /// The supervisor did not finish within `stop_timeout`.
    Failed,
}

type Entries = Arc<Mutex<HashMap<String, MonitorEntry>>>;

fn lock(entries: &Entries) -> MutexGuard<'_, HashMap<String, MonitorEntry>> {
    entries.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Registry of running monitors keyed by port name.
///
/// **At most one monitor per port** exists at any time. Operations on
/// different ports never wait for each other; the map lock is only held for
/// lookups and updates, never across process operations.
pub struct MonitorRegistry {
    entries: Entries,
    next_generation: AtomicU64,
    toolchain: Arc<dyn ToolchainDriver>,
    runner: ProcessRunner,
    settings: MonitorSettings,
}

impl MonitorRegistry {
    pub fn new(toolchain: Arc<dyn ToolchainDriver>, settings: MonitorSettings) -> Self {
        Self {
            entries: Arc::new(Mutex::new(HashMap::new())),
            next_generation: AtomicU64::new(1),
            toolchain,
            runner: ProcessRunner::new(),
            settings,
        }
    }

    pub fn settings(&self) -> &MonitorSettings {
        &self.settings
    }

    /// Start monitoring `port`, streaming its output and lifecycle messages
    /// into `sink`.
    ///
    /// Returns false without changing anything if the port already has a
    /// monitor, and false if the process could not be launched. Must be
    /// called from within a Tokio runtime.
    pub fn start(&self, port: &str, sink: SharedSink) -> bool {
        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
        {
            let mut entries = lock(&self.entries);
            if let Some(existing) = entries.get(port) {
                debug!(port, state = %existing.state, "monitor already active; ignoring start");
                return false;
            }
            entries.insert(
                port.to_string(),
                MonitorEntry {
                    generation,
                    state: MonitorState::Starting,
                    pid: None,
                    cancel: None,
                    task: None,
                },
            );
        }

        let spec = LaunchSpec::new(
            format!("Monitor on port {port}"),
            self.toolchain.monitor_command(port),
        );

        let handle = match self.runner.launch(&spec) {
            Ok(handle) => handle,
            Err(e) => {
                self.remove_if_current(port, generation);
                warn!(port, error = %e, "monitor could not be launched");
                sink.write(&format!("!!! Monitor on port {port} failed to start: {e} !!!\n"));
                return false;
            }
        };

        let pid = handle.pid();
        let (cancel_tx, cancel_rx) = oneshot::channel();
        let guard = EntryGuard {
            entries: self.entries.clone(),
            port: port.to_string(),
            generation,
            sink: sink.clone(),
            ending: None,
            readers: Vec::new(),
        };
        let task = tokio::spawn(supervise(handle, cancel_rx, guard, self.settings));

        let mut entries = lock(&self.entries);
        match entries.get_mut(port) {
            Some(entry) if entry.generation == generation => {
                entry.state = MonitorState::Running;
                entry.pid = pid;
                entry.cancel = Some(cancel_tx);
                entry.task = Some(task);
                info!(port, ?pid, generation, "monitor running");
            }
            _ => debug!(port, generation, "monitor ended before it was recorded"),
        }
        true
    }

    /// Stop the monitor on `port` and wait for it to be torn down.
    ///
    /// The process gets `terminate_grace` to exit and `kill_timeout` after the
    /// kill; `stop_timeout` then bounds the rest of the teardown. Returns false
    /// if the port has no running monitor (including one that is still
    /// starting or already stopping), or if teardown did not finish in time.
    pub async fn stop(&self, port: &str) -> bool {
        self.stop_port(port).await == StopResult::Stopped
    }

    async fn stop_port(&self, port: &str) -> StopResult {
        let (cancel, task) = {
            let mut entries = lock(&self.entries);
            let Some(entry) = entries.get_mut(port) else {
                debug!(port, "no monitor to stop");
                return StopResult::NotRunning;
            };
            if entry.state != MonitorState::Running {
                debug!(port, state = %entry.state, "monitor not running; ignoring stop");
                return StopResult::NotRunning;
            }
            entry.state = MonitorState::Stopping;
            (entry.cancel.take(), entry.task.take())
        };

        info!(port, "stopping monitor");
        let (ack_tx, ack_rx) = oneshot::channel();
        match cancel.map(|cancel| cancel.send(ack_tx)) {
            Some(Ok(())) => {
                // Terminate takes at most grace plus kill.
                let terminate_bound = self.settings.terminate_grace
                    + self.settings.kill_timeout
                    + self.settings.stop_timeout;
                if timeout(terminate_bound, ack_rx).await.is_err() {
                    warn!(port, "monitor did not acknowledge termination");
                }
            }
            _ => debug!(port, "monitor already finished while stopping"),
        }

        let Some(mut task) = task else {
            return StopResult::Failed;
        };

        match timeout(self.settings.stop_timeout, &mut task).await {
            Ok(Ok(())) => StopResult::Stopped,
            Ok(Err(e)) => {
                warn!(port, error = %e, "monitor supervisor failed");
                StopResult::Failed
            }
            Err(_) => {
                warn!(
                    port,
                    stop_ms = self.settings.stop_timeout.as_millis() as u64,
                    "monitor did not stop in time; aborting its supervisor"
                );
                task.abort();
                let _ = timeout(self.settings.kill_timeout, task).await;
                StopResult::Failed
            }
        }
    }

    /// Stop every monitor, one after the other. Returns how many stopped
    /// cleanly.
    pub async fn stop_all(&self) -> usize {
        let results = self.stop_each().await;
        results.iter().filter(|r| **r == StopResult::Stopped).count()
    }

    /// Stop every monitor. True unless some monitor failed to stop; one that
    /// ended on its own in the meantime does not count as a failure.
    pub async fn shutdown(&self) -> bool {
        let results = self.stop_each().await;
        !results.contains(&StopResult::Failed)
    }

    async fn stop_each(&self) -> Vec<StopResult> {
        let ports = self.active_ports();
        let mut results = Vec::with_capacity(ports.len());
        for port in &ports {
            results.push(self.stop_port(port).await);
        }
        let stopped = results.iter().filter(|r| **r == StopResult::Stopped).count();
        let failed = results.iter().filter(|r| **r == StopResult::Failed).count();
        info!(requested = ports.len(), stopped, failed, "stopped all monitors");
        results
    }

    pub fn is_active(&self, port: &str) -> bool {
        lock(&self.entries).contains_key(port)
    }

    pub fn state(&self, port: &str) -> Option<MonitorState> {
        lock(&self.entries).get(port).map(|e| e.state)
    }

    pub fn pid(&self, port: &str) -> Option<u32> {
        lock(&self.entries).get(port).and_then(|e| e.pid)
    }

    /// Ports with an entry, sorted.
    pub fn active_ports(&self) -> Vec<String> {
        let mut ports: Vec<String> = lock(&self.entries).keys().cloned().collect();
        ports.sort();
        ports
    }

    fn remove_if_current(&self, port: &str, generation: u64) {
        remove_if_current(&self.entries, port, generation);
    }
}

impl Drop for MonitorRegistry {
    fn drop(&mut self) {
        // Supervisors outlive the registry; a dropped cancel sender is a stop
        // request.
        let mut entries = lock(&self.entries);
        for (port, entry) in entries.iter_mut() {
            if entry.cancel.take().is_some() {
                debug!(port = %port, "registry dropped; stopping monitor");
            }
        }
    }
}

fn remove_if_current(entries: &Entries, port: &str, generation: u64) {
    let mut entries = lock(entries);
    if entries.get(port).is_some_and(|e| e.generation == generation) {
        entries.remove(port);
    }
}

/// How a monitor ended, as reported to its sink.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Ending {
    Completed,
    Errored(ProcessExit),
    Stopped,
    Crashed(String),
}

impl Ending {
    fn message(&self, port: &str) -> String {
        match self {
            Ending::Completed => format!("=== Monitor on port {port} completed ===\n"),
            Ending::Errored(exit) => {
                format!("!!! Monitor on port {port} finished with errors ({exit}) !!!\n")
            }
            Ending::Stopped => format!("=== Monitor on port {port} stopped ===\n"),
            Ending::Crashed(reason) => format!("!!! Monitor on port {port} crashed: {reason} !!!\n"),
        }
    }
}

/// Removes the port's entry and writes the terminal message exactly once,
/// when the supervising task ends for whatever reason. Output readers still
/// running at that point are aborted first.
struct EntryGuard {
    entries: Entries,
    port: String,
    generation: u64,
    sink: SharedSink,
    ending: Option<Ending>,
    readers: Vec<AbortHandle>,
}

impl Drop for EntryGuard {
    fn drop(&mut self) {
        for reader in &self.readers {
            reader.abort();
        }

        let ending = self
            .ending
            .take()
            .unwrap_or_else(|| Ending::Crashed("supervisor ended unexpectedly".to_string()));

        remove_if_current(&self.entries, &self.port, self.generation);
        info!(port = %self.port, generation = self.generation, ?ending, "monitor ended");
        self.sink.write(&ending.message(&self.port));
    }
}

async fn supervise(
    mut handle: ProcessHandle,
    cancel_rx: oneshot::Receiver<StopAck>,
    mut guard: EntryGuard,
    settings: MonitorSettings,
) {
    let sink = guard.sink.clone();
    sink.write(&format!("--- Monitor on port {} starts ---\n", guard.port));

    let mut readers = Vec::with_capacity(2);
    if let Some(stdout) = handle.take_stdout() {
        readers.push(StreamBuffer::new(sink.clone(), "", settings.stream).attach(stdout));
    }
    if let Some(stderr) = handle.take_stderr() {
        readers.push(StreamBuffer::new(sink.clone(), "STDERR: ", settings.stream).attach(stderr));
    }
    guard.readers = readers.iter().map(JoinHandle::abort_handle).collect();

    // Either the process exits on its own, or a stop is requested. A dropped
    // sender means the registry is gone, which is treated as a stop request.
    let ending = tokio::select! {
        exit = handle.wait() => match exit {
            Ok(exit) if exit.success() => Ending::Completed,
            Ok(exit) => Ending::Errored(exit),
            Err(e) => Ending::Crashed(e.to_string()),
        },
        request = cancel_rx => {
            let ending = match handle.terminate(settings.terminate_grace, settings.kill_timeout).await {
                TerminateOutcome::AlreadyExited(exit) if exit.success() => Ending::Completed,
                TerminateOutcome::AlreadyExited(exit) => Ending::Errored(exit),
                TerminateOutcome::Terminated(_) | TerminateOutcome::Killed(_) => Ending::Stopped,
                TerminateOutcome::Unresponsive => {
                    Ending::Crashed("process did not exit after kill".to_string())
                }
            };
            if let Ok(ack) = request {
                let _ = ack.send(());
            }
            ending
        }
    };

    // Known from here on, even if the drain below is cut short by an abort.
    guard.ending = Some(ending);

    if !stream::drain(readers, settings.drain_timeout).await {
        warn!(port = %guard.port, "monitor output still open after exit; dropping the rest");
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::path::Path;
    use std::time::Duration;

    use crate::sink::MemorySink;
    use crate::types::BuildMode;

    /// Every port maps to a command given by the test.
    struct ShellMonitor(&'static str);

    impl ToolchainDriver for ShellMonitor {
        fn build_command(&self, _workspace: &Path, _mode: BuildMode) -> String {
            "true".to_string()
        }
        fn flash_command(&self, _workspace: &Path, _port: &str) -> String {
            "true".to_string()
        }
        fn monitor_command(&self, port: &str) -> String {
            self.0.replace("{port}", port)
        }
    }

    fn settings() -> MonitorSettings {
        MonitorSettings {
            terminate_grace: Duration::from_millis(300),
            kill_timeout: Duration::from_secs(2),
            stop_timeout: Duration::from_secs(5),
            drain_timeout: Duration::from_millis(500),
            ..MonitorSettings::default()
        }
    }

    async fn wait_until(mut cond: impl FnMut() -> bool) {
        for _ in 0..200 {
            if cond() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("condition not reached in time");
    }

    #[tokio::test]
    async fn duplicate_start_is_rejected_and_stop_cleans_up() {
        let registry = MonitorRegistry::new(Arc::new(ShellMonitor("echo up; sleep 30")), settings());
        let sink = MemorySink::new();

        assert!(registry.start("Port1", Arc::new(sink.clone())));
        assert!(!registry.start("Port1", Arc::new(sink.clone())));
        assert_eq!(registry.state("Port1"), Some(MonitorState::Running));

        wait_until(|| sink.text().contains("up")).await;
        assert!(registry.stop("Port1").await);

        assert!(!registry.is_active("Port1"));
        assert_eq!(sink.count_containing("--- Monitor on port Port1 starts ---"), 1);
        assert_eq!(sink.count_containing("=== Monitor on port Port1 stopped ==="), 1);
        assert!(sink.text().ends_with("=== Monitor on port Port1 stopped ===\n"));
    }

    #[tokio::test]
    async fn stop_without_monitor_returns_false() {
        let registry = MonitorRegistry::new(Arc::new(ShellMonitor("true")), settings());
        assert!(!registry.stop("ttyACM0").await);
    }

    #[tokio::test]
    async fn natural_exit_removes_entry_and_reports_code() {
        let registry = MonitorRegistry::new(Arc::new(ShellMonitor("echo bye >&2; exit 4")), settings());
        let sink = MemorySink::new();

        assert!(registry.start("Port2", Arc::new(sink.clone())));
        wait_until(|| !registry.is_active("Port2")).await;

        let text = sink.text();
        assert!(text.contains("STDERR: bye\n"));
        assert!(text.ends_with("!!! Monitor on port Port2 finished with errors (exit code 4) !!!\n"));
        assert!(!registry.stop("Port2").await);
    }

    #[tokio::test]
    async fn ports_are_independent() {
        let registry = MonitorRegistry::new(Arc::new(ShellMonitor("sleep 30")), settings());
        let a = MemorySink::new();
        let b = MemorySink::new();

        assert!(registry.start("Port1", Arc::new(a.clone())));
        assert!(registry.start("Port2", Arc::new(b.clone())));
        assert_eq!(registry.active_ports(), vec!["Port1", "Port2"]);

        assert!(registry.stop("Port1").await);
        assert!(registry.is_active("Port2"));
        assert_eq!(b.count_containing("stopped"), 0);

        assert_eq!(registry.stop_all().await, 1);
        assert!(registry.active_ports().is_empty());
    }

    #[tokio::test]
    async fn monitor_can_be_restarted_after_stop() {
        let registry = MonitorRegistry::new(Arc::new(ShellMonitor("sleep 30")), settings());
        let sink = MemorySink::new();

        assert!(registry.start("Port3", Arc::new(sink.clone())));
        assert!(registry.stop("Port3").await);
        assert!(registry.start("Port3", Arc::new(sink.clone())));
        assert!(registry.is_active("Port3"));
        assert!(registry.stop("Port3").await);
        assert_eq!(sink.count_containing("starts"), 2);
        assert_eq!(sink.count_containing("stopped"), 2);
    }
}
