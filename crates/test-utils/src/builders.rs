#![allow(dead_code)]

use std::time::Duration;

use flashdeck::catalog::CatalogOption;
use flashdeck::config::{ConfigFile, RawConfigFile};
use flashdeck::exec::{ExecSettings, StreamSettings};
use flashdeck::monitor::MonitorSettings;
use flashdeck::types::OptionMenu;

/// Builder for `ConfigFile` to simplify test setup.
pub struct ConfigFileBuilder {
    config: RawConfigFile,
}

impl ConfigFileBuilder {
    pub fn new() -> Self {
        Self {
            config: RawConfigFile::default(),
        }
    }

    pub fn with_option(mut self, option: CatalogOption) -> Self {
        self.config.options.push(option);
        self
    }

    pub fn with_root(mut self, root: &str) -> Self {
        self.config.project.root = root.to_string();
        self
    }

    pub fn with_max_backups(mut self, n: usize) -> Self {
        self.config.project.max_backups = n;
        self
    }

    pub fn with_flush_interval(mut self, interval: Duration) -> Self {
        self.config.engine.flush_interval = interval;
        self
    }

    pub fn raw(self) -> RawConfigFile {
        self.config
    }

    pub fn build(self) -> ConfigFile {
        ConfigFile::try_from(self.config).expect("Failed to build valid config from builder")
    }
}

impl Default for ConfigFileBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Builder for `CatalogOption`.
pub struct OptionBuilder {
    option: CatalogOption,
}

impl OptionBuilder {
    pub fn library(id: &str) -> Self {
        Self::new(id, OptionMenu::Library)
    }

    pub fn example(id: &str) -> Self {
        Self::new(id, OptionMenu::Example)
    }

    fn new(id: &str, menu: OptionMenu) -> Self {
        Self {
            option: CatalogOption {
                id: id.to_string(),
                name: id.to_lowercase().replace('_', " "),
                menu,
                depends_on: Vec::new(),
            },
        }
    }

    pub fn depends_on(mut self, library: &str) -> Self {
        self.option.depends_on.push(library.to_string());
        self
    }

    pub fn build(self) -> CatalogOption {
        self.option
    }
}

/// Stream settings that flush quickly, for tests observing partial output.
pub fn fast_stream() -> StreamSettings {
    StreamSettings {
        chunk_size: 4096,
        flush_interval: Duration::from_millis(30),
        poll_interval: Duration::from_millis(5),
    }
}

pub fn fast_exec() -> ExecSettings {
    ExecSettings {
        stream: fast_stream(),
        drain_timeout: Duration::from_millis(500),
    }
}

/// Short termination bounds; `stop_timeout` still covers grace + kill + drain.
pub fn fast_monitor() -> MonitorSettings {
    MonitorSettings {
        stream: fast_stream(),
        terminate_grace: Duration::from_millis(300),
        kill_timeout: Duration::from_secs(2),
        stop_timeout: Duration::from_secs(5),
        drain_timeout: Duration::from_millis(500),
    }
}
