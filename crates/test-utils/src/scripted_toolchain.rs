use std::path::Path;
use std::sync::{Arc, Mutex};

use flashdeck::toolchain::ToolchainDriver;
use flashdeck::types::BuildMode;

/// A toolchain whose commands are plain shell snippets chosen by the test.
///
/// - `{workspace}` and `{port}` are substituted.
/// - every requested command is recorded, so tests can assert on what the
///   engine asked for.
#[derive(Clone)]
pub struct ScriptedToolchain {
    build: String,
    flash: String,
    monitor: String,
    requests: Arc<Mutex<Vec<String>>>,
}

impl ScriptedToolchain {
    /// Every operation succeeds immediately with a line of output.
    pub fn new() -> Self {
        Self {
            build: "echo building {workspace}".to_string(),
            flash: "echo flashing {port}".to_string(),
            monitor: "echo monitoring {port}; sleep 30".to_string(),
            requests: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn with_build(mut self, cmd: &str) -> Self {
        self.build = cmd.to_string();
        self
    }

    pub fn with_flash(mut self, cmd: &str) -> Self {
        self.flash = cmd.to_string();
        self
    }

    pub fn with_monitor(mut self, cmd: &str) -> Self {
        self.monitor = cmd.to_string();
        self
    }

    /// Operations requested so far, e.g. `"build Incremental"`, `"monitor Port1"`.
    pub fn requests(&self) -> Vec<String> {
        self.requests.lock().unwrap().clone()
    }

    fn record(&self, what: String) {
        self.requests.lock().unwrap().push(what);
    }
}

impl Default for ScriptedToolchain {
    fn default() -> Self {
        Self::new()
    }
}

impl ToolchainDriver for ScriptedToolchain {
    fn build_command(&self, workspace: &Path, mode: BuildMode) -> String {
        self.record(format!("build {mode:?}"));
        self.build.replace("{workspace}", &workspace.display().to_string())
    }

    fn flash_command(&self, workspace: &Path, port: &str) -> String {
        self.record(format!("flash {port}"));
        self.flash
            .replace("{workspace}", &workspace.display().to_string())
            .replace("{port}", port)
    }

    fn monitor_command(&self, port: &str) -> String {
        self.record(format!("monitor {port}"));
        self.monitor.replace("{port}", port)
    }
}
