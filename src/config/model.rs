// src/config/model.rs

use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

use crate::catalog::{CatalogOption, StaticCatalog};
use crate::exec::{ExecSettings, StreamSettings};
use crate::monitor::MonitorSettings;
use crate::toolchain::{DEFAULT_BAUD_RATE, DEFAULT_SIMULATED_MONITOR, IdfToolchain};
use crate::workspace::ProjectLayout;

/// Configuration as read from a TOML file, before validation.
///
/// ```toml
/// [engine]
/// flush_interval = "50ms"
/// stop_timeout = "10s"
///
/// [toolchain]
/// idf_setup = "~/esp/esp-idf/export.sh"
///
/// [project]
/// root = "."
/// sdkconfig = "sdkconfig"
///
/// [[option]]
/// id = "LIB_TWAI"
/// name = "TWAI driver"
/// menu = "library"
/// ```
///
/// All sections are optional and have reasonable defaults.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawConfigFile {
    #[serde(default)]
    pub engine: EngineSection,

    #[serde(default)]
    pub toolchain: ToolchainSection,

    #[serde(default)]
    pub project: ProjectSection,

    /// All `[[option]]` tables, in file order.
    #[serde(default, rename = "option")]
    pub options: Vec<CatalogOption>,
}

/// Validated configuration. Only obtainable through `TryFrom<RawConfigFile>`.
#[derive(Debug, Clone)]
pub struct ConfigFile {
    pub engine: EngineSection,
    pub toolchain: ToolchainSection,
    pub project: ProjectSection,
    pub options: Vec<CatalogOption>,
}

impl ConfigFile {
    pub(crate) fn new_unchecked(raw: RawConfigFile) -> Self {
        Self {
            engine: raw.engine,
            toolchain: raw.toolchain,
            project: raw.project,
            options: raw.options,
        }
    }

    pub fn catalog(&self) -> StaticCatalog {
        StaticCatalog::new(self.options.clone())
    }

    pub fn layout(&self) -> ProjectLayout {
        ProjectLayout {
            root: expand_home(&self.project.root),
            workspaces_dir: PathBuf::from(&self.project.workspaces_dir),
            sdkconfig: PathBuf::from(&self.project.sdkconfig),
        }
    }

    /// Toolchain driver; `idf_setup` overrides the configured setup script.
    pub fn toolchain(&self, idf_setup: Option<&str>) -> IdfToolchain {
        let setup = expand_home(idf_setup.unwrap_or(&self.toolchain.idf_setup));
        let mut tc = IdfToolchain::new(setup).with_baud_rate(self.toolchain.baud_rate);
        if let Some(template) = &self.toolchain.simulated_monitor {
            tc = tc.with_simulated_monitor(template.clone());
        }
        if let Some(jobs) = self.toolchain.jobs {
            tc = tc.with_jobs(jobs);
        }
        tc
    }

    pub fn exec_settings(&self) -> ExecSettings {
        ExecSettings {
            stream: self.engine.stream_settings(),
            drain_timeout: self.engine.drain_timeout,
        }
    }

    pub fn monitor_settings(&self) -> MonitorSettings {
        MonitorSettings {
            stream: self.engine.stream_settings(),
            terminate_grace: self.engine.terminate_grace,
            kill_timeout: self.engine.kill_timeout,
            stop_timeout: self.engine.stop_timeout,
            drain_timeout: self.engine.drain_timeout,
        }
    }
}

/// `[engine]` section: streaming and timeout tuning.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct EngineSection {
    /// Read size and buffer length that forces a flush, in bytes.
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,

    #[serde(default = "default_flush_interval", deserialize_with = "super::duration::deserialize")]
    pub flush_interval: Duration,

    #[serde(default = "default_poll_interval", deserialize_with = "super::duration::deserialize")]
    pub poll_interval: Duration,

    #[serde(default = "default_drain_timeout", deserialize_with = "super::duration::deserialize")]
    pub drain_timeout: Duration,

    #[serde(default = "default_terminate_grace", deserialize_with = "super::duration::deserialize")]
    pub terminate_grace: Duration,

    #[serde(default = "default_kill_timeout", deserialize_with = "super::duration::deserialize")]
    pub kill_timeout: Duration,

    #[serde(default = "default_stop_timeout", deserialize_with = "super::duration::deserialize")]
    pub stop_timeout: Duration,
}

impl EngineSection {
    pub fn stream_settings(&self) -> StreamSettings {
        StreamSettings {
            chunk_size: self.chunk_size,
            flush_interval: self.flush_interval,
            poll_interval: self.poll_interval,
        }
    }
}

fn default_chunk_size() -> usize {
    StreamSettings::default().chunk_size
}

fn default_flush_interval() -> Duration {
    StreamSettings::default().flush_interval
}

fn default_poll_interval() -> Duration {
    StreamSettings::default().poll_interval
}

fn default_drain_timeout() -> Duration {
    MonitorSettings::default().drain_timeout
}

fn default_terminate_grace() -> Duration {
    MonitorSettings::default().terminate_grace
}

fn default_kill_timeout() -> Duration {
    MonitorSettings::default().kill_timeout
}

fn default_stop_timeout() -> Duration {
    MonitorSettings::default().stop_timeout
}

impl Default for EngineSection {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            flush_interval: default_flush_interval(),
            poll_interval: default_poll_interval(),
            drain_timeout: default_drain_timeout(),
            terminate_grace: default_terminate_grace(),
            kill_timeout: default_kill_timeout(),
            stop_timeout: default_stop_timeout(),
        }
    }
}

/// `[toolchain]` section.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ToolchainSection {
    /// Script sourced before every `idf.py` call. `~` is expanded.
    #[serde(default = "default_idf_setup")]
    pub idf_setup: String,

    #[serde(default = "default_baud_rate")]
    pub baud_rate: u32,

    /// Command used instead of a serial read for placeholder ports; `{port}`
    /// is substituted. If `None`, a built-in shell loop is used.
    #[serde(default)]
    pub simulated_monitor: Option<String>,

    /// Fixed build parallelism. If `None`, derived from CPUs and free memory.
    #[serde(default)]
    pub jobs: Option<usize>,
}

fn default_idf_setup() -> String {
    "~/esp/esp-idf/export.sh".to_string()
}

fn default_baud_rate() -> u32 {
    DEFAULT_BAUD_RATE
}

impl Default for ToolchainSection {
    fn default() -> Self {
        Self {
            idf_setup: default_idf_setup(),
            baud_rate: default_baud_rate(),
            simulated_monitor: None,
            jobs: None,
        }
    }
}

impl ToolchainSection {
    /// The monitor command template in effect for placeholder ports.
    pub fn effective_simulated_monitor(&self) -> &str {
        self.simulated_monitor
            .as_deref()
            .unwrap_or(DEFAULT_SIMULATED_MONITOR)
    }
}

/// `[project]` section.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ProjectSection {
    /// ESP-IDF project directory. `~` is expanded.
    #[serde(default = "default_root")]
    pub root: String,

    /// Project configuration file, relative to `root`.
    #[serde(default = "default_sdkconfig")]
    pub sdkconfig: String,

    /// Where per-selection workspaces are created, relative to `root`.
    #[serde(default = "default_workspaces_dir")]
    pub workspaces_dir: String,

    /// Heading of the block that missing option keys are added under.
    #[serde(default = "default_section_name")]
    pub section_name: String,

    /// Number of rotated `sdkconfig.backup.N` files to keep.
    #[serde(default = "default_max_backups")]
    pub max_backups: usize,

    /// Directory scanned for serial devices.
    #[serde(default = "default_dev_dir")]
    pub dev_dir: String,
}

fn default_root() -> String {
    ".".to_string()
}

fn default_sdkconfig() -> String {
    "sdkconfig".to_string()
}

fn default_workspaces_dir() -> String {
    "workspaces".to_string()
}

fn default_section_name() -> String {
    "Flashdeck selection".to_string()
}

fn default_max_backups() -> usize {
    5
}

fn default_dev_dir() -> String {
    "/dev".to_string()
}

impl Default for ProjectSection {
    fn default() -> Self {
        Self {
            root: default_root(),
            sdkconfig: default_sdkconfig(),
            workspaces_dir: default_workspaces_dir(),
            section_name: default_section_name(),
            max_backups: default_max_backups(),
            dev_dir: default_dev_dir(),
        }
    }
}

/// Replace a leading `~` with the home directory, if one is known.
pub fn expand_home(path: &str) -> PathBuf {
    if path == "~" {
        return dirs::home_dir().unwrap_or_else(|| PathBuf::from(path));
    }
    match (path.strip_prefix("~/"), dirs::home_dir()) {
        (Some(rest), Some(home)) => home.join(rest),
        _ => PathBuf::from(path),
    }
}
