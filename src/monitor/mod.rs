// src/monitor/mod.rs

//! Long-lived device log readers, one per port.
//!
//! [`MonitorRegistry`] owns every running monitor. Each monitor is a process
//! plus two stream buffers, driven by a supervising task that is the only
//! thing allowed to remove the port's entry again.

mod registry;

use std::fmt;
use std::time::Duration;

pub use registry::MonitorRegistry;

use crate::exec::StreamSettings;

/// Lifecycle of a registry entry. A port without an entry is idle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MonitorState {
    /// Reserved; the process is being launched.
    Starting,
    Running,
    /// A stop was requested and the process is being terminated.
    Stopping,
}

impl fmt::Display for MonitorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MonitorState::Starting => write!(f, "starting"),
            MonitorState::Running => write!(f, "running"),
            MonitorState::Stopping => write!(f, "stopping"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MonitorSettings {
    pub stream: StreamSettings,
    /// Time a monitor gets to exit after the polite termination request.
    pub terminate_grace: Duration,
    /// Time to wait for the exit after the forceful kill.
    pub kill_timeout: Duration,
    /// Upper bound on a whole `stop` call.
    pub stop_timeout: Duration,
    /// Time to wait for output readers after the process has exited.
    pub drain_timeout: Duration,
}

impl Default for MonitorSettings {
    fn default() -> Self {
        Self {
            stream: StreamSettings::default(),
            terminate_grace: Duration::from_secs(2),
            kill_timeout: Duration::from_secs(2),
            stop_timeout: Duration::from_secs(10),
            drain_timeout: Duration::from_secs(2),
        }
    }
}
