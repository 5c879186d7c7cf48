// src/toolchain.rs

//! Shell commands for building, flashing and monitoring firmware.
//!
//! The engine only ever sees the command strings; everything that is specific
//! to ESP-IDF lives behind [`ToolchainDriver`].

use std::path::{Path, PathBuf};

use sysinfo::System;
use tracing::debug;

use crate::ports::is_placeholder_port;
use crate::types::BuildMode;

/// Produces the command line for each toolchain operation.
pub trait ToolchainDriver: Send + Sync {
    fn build_command(&self, workspace: &Path, mode: BuildMode) -> String;
    fn flash_command(&self, workspace: &Path, port: &str) -> String;
    /// Command streaming the device log of `port`. Placeholder ports get a
    /// simulated log source.
    fn monitor_command(&self, port: &str) -> String;
}

pub const DEFAULT_BAUD_RATE: u32 = 115_200;
const PORT_PARAMS: &str = "raw -echo -ixon -ixoff -crtscts";

/// Default stand-in for a serial log when no device is attached.
pub const DEFAULT_SIMULATED_MONITOR: &str =
    "i=0; while true; do i=$((i+1)); echo \"[{port}] I ($i) app: simulated log line\"; sleep 1; done";

/// ESP-IDF (`idf.py`) driver.
#[derive(Debug, Clone)]
pub struct IdfToolchain {
    setup_script: PathBuf,
    baud_rate: u32,
    simulated_monitor: String,
    jobs: usize,
}

impl IdfToolchain {
    /// Build jobs are sized from the current machine; see [`optimal_jobs`].
    pub fn new(setup_script: impl Into<PathBuf>) -> Self {
        Self {
            setup_script: setup_script.into(),
            baud_rate: DEFAULT_BAUD_RATE,
            simulated_monitor: DEFAULT_SIMULATED_MONITOR.to_string(),
            jobs: optimal_jobs(),
        }
    }

    pub fn with_baud_rate(mut self, baud_rate: u32) -> Self {
        self.baud_rate = baud_rate;
        self
    }

    /// `{port}` in `template` is replaced with the placeholder port name.
    pub fn with_simulated_monitor(mut self, template: impl Into<String>) -> Self {
        self.simulated_monitor = template.into();
        self
    }

    pub fn with_jobs(mut self, jobs: usize) -> Self {
        self.jobs = jobs.clamp(1, MAX_JOBS);
        self
    }

    pub fn jobs(&self) -> usize {
        self.jobs
    }

    fn setup(&self) -> String {
        quote_path(&self.setup_script)
    }
}

impl ToolchainDriver for IdfToolchain {
    fn build_command(&self, workspace: &Path, mode: BuildMode) -> String {
        let idf = match mode {
            BuildMode::Incremental => "idf.py build",
            BuildMode::FullClean => "idf.py fullclean && idf.py build",
        };
        let script = format!(
            "export MAKEFLAGS=-j{} && source {} && cd {} && {}",
            self.jobs,
            self.setup(),
            quote_path(workspace),
            idf
        );
        format!("bash -c {}", shell_words::quote(&script))
    }

    fn flash_command(&self, workspace: &Path, port: &str) -> String {
        let script = format!(
            "source {} && cd {} && idf.py -p /dev/{} flash",
            self.setup(),
            quote_path(workspace),
            port
        );
        format!("bash -c {}", shell_words::quote(&script))
    }

    fn monitor_command(&self, port: &str) -> String {
        if is_placeholder_port(port) {
            self.simulated_monitor.replace("{port}", port)
        } else {
            format!(
                "stty -F /dev/{port} {} {PORT_PARAMS} && cat /dev/{port}",
                self.baud_rate
            )
        }
    }
}

fn quote_path(path: &Path) -> String {
    shell_words::quote(&path.to_string_lossy()).into_owned()
}

const MAX_JOBS: usize = 16;
const GIB: u64 = 1024 * 1024 * 1024;

/// Parallel build jobs for `cpus` cores and `available_bytes` of free memory.
/// Below 8 GiB one core is held back, below 4 GiB two.
pub fn jobs_for(cpus: usize, available_bytes: u64) -> usize {
    let jobs = if available_bytes < 4 * GIB {
        cpus.saturating_sub(2)
    } else if available_bytes < 8 * GIB {
        cpus.saturating_sub(1)
    } else {
        cpus
    };
    jobs.clamp(1, MAX_JOBS)
}

/// [`jobs_for`] applied to this machine.
pub fn optimal_jobs() -> usize {
    let cpus = num_cpus::get();
    let mut sys = System::new();
    sys.refresh_memory();
    let available = sys.available_memory();
    let jobs = jobs_for(cpus, available);
    debug!(cpus, available_mb = available / (1024 * 1024), jobs, "build parallelism");
    jobs
}
