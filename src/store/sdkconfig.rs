// src/store/sdkconfig.rs

//! `sdkconfig` file store.
//!
//! Only boolean `CONFIG_*` lines are ever modified. Every other line,
//! including comments and blank lines, is written back exactly as read.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::errors::{FlashdeckError, Result};
use crate::fs::FileSystem;
use crate::store::ConfigStore;

const DEPRECATED_MARKER: &str = "# Deprecated options for backward compatibility";

#[derive(Debug, Clone, PartialEq, Eq)]
enum Value {
    Bool(bool),
    Int(String),
    Other(String),
}

#[derive(Debug, Clone)]
struct Line {
    /// Exactly as read, including the trailing newline if there was one.
    raw: String,
    key: Option<String>,
    value: Option<Value>,
    changed: bool,
}

impl Line {
    fn parse(raw: &str) -> Self {
        let (key, value) = match parse_entry(raw.trim()) {
            Some((key, value)) => (Some(key), Some(value)),
            None => (None, None),
        };
        Self {
            raw: raw.to_string(),
            key,
            value,
            changed: false,
        }
    }

    fn text(text: impl Into<String>) -> Self {
        Self {
            raw: text.into(),
            key: None,
            value: None,
            changed: false,
        }
    }

    fn render(&self) -> String {
        match (&self.key, &self.value, self.changed) {
            (Some(key), Some(Value::Bool(true)), true) => format!("CONFIG_{key}=y\n"),
            (Some(key), Some(Value::Bool(false)), true) => format!("# CONFIG_{key} is not set\n"),
            _ => self.raw.clone(),
        }
    }
}

/// Recognise `CONFIG_X=value` and `# CONFIG_X is not set`.
fn parse_entry(trimmed: &str) -> Option<(String, Value)> {
    if let Some(rest) = trimmed.strip_prefix('#') {
        let key = rest
            .trim()
            .strip_prefix("CONFIG_")?
            .strip_suffix(" is not set")?
            .trim();
        return (!key.is_empty()).then(|| (key.to_string(), Value::Bool(false)));
    }

    let (lhs, rhs) = trimmed.strip_prefix("CONFIG_")?.split_once('=')?;
    let key = lhs.trim();
    if key.is_empty() {
        return None;
    }
    let value = match rhs.trim() {
        "y" => Value::Bool(true),
        "n" => Value::Bool(false),
        v if !v.is_empty() && v.bytes().all(|b| b.is_ascii_digit()) => Value::Int(v.to_string()),
        v => Value::Other(v.to_string()),
    };
    Some((key.to_string(), value))
}

/// An `sdkconfig` file loaded into memory.
pub struct SdkconfigStore {
    fs: Arc<dyn FileSystem>,
    path: PathBuf,
    section_name: String,
    max_backups: usize,
    lines: Vec<Line>,
    dirty: bool,
}

impl SdkconfigStore {
    /// Load `path`. Keys added by [`ConfigStore::ensure_keys_exist`] into a
    /// file without any of them go in a new section called `section_name`.
    pub fn open(
        fs: Arc<dyn FileSystem>,
        path: impl Into<PathBuf>,
        section_name: impl Into<String>,
        max_backups: usize,
    ) -> Result<Self> {
        let path = path.into();
        let contents = fs.read_to_string(&path)?;
        let lines: Vec<Line> = contents.split_inclusive('\n').map(Line::parse).collect();
        debug!(path = ?path, lines = lines.len(), "sdkconfig loaded");

        Ok(Self {
            fs,
            path,
            section_name: section_name.into(),
            max_backups: max_backups.max(1),
            lines,
            dirty: false,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Every `CONFIG_` key in file order.
    pub fn keys(&self) -> Vec<&str> {
        self.lines.iter().filter_map(|l| l.key.as_deref()).collect()
    }

    /// The file as `write` would produce it.
    pub fn render(&self) -> String {
        self.lines.iter().map(Line::render).collect()
    }

    fn position(&self, key: &str) -> Option<usize> {
        self.lines.iter().position(|l| l.key.as_deref() == Some(key))
    }

    fn backup_path(&self, generation: usize) -> PathBuf {
        let mut name = self.path.clone().into_os_string();
        name.push(format!(".backup.{generation}"));
        PathBuf::from(name)
    }

    /// Shift `.backup.N` to `.backup.N+1` (dropping the oldest) and copy the
    /// current file to `.backup.1`.
    fn rotate_backups(&self) -> anyhow::Result<()> {
        if !self.fs.exists(&self.path) {
            anyhow::bail!("{:?} does not exist", self.path);
        }

        let oldest = self.backup_path(self.max_backups);
        if self.fs.exists(&oldest) {
            self.fs.remove_file(&oldest)?;
            debug!(path = ?oldest, "dropped oldest backup");
        }

        for generation in (1..self.max_backups).rev() {
            let from = self.backup_path(generation);
            if self.fs.exists(&from) {
                self.fs.rename(&from, &self.backup_path(generation + 1))?;
            }
        }

        let newest = self.backup_path(1);
        self.fs.copy(&self.path, &newest)?;
        info!(path = ?newest, "sdkconfig backed up");
        Ok(())
    }

    fn insertion_point(&self, keys: &[String]) -> (usize, bool) {
        let last_known = self
            .lines
            .iter()
            .rposition(|l| l.key.as_ref().is_some_and(|k| keys.contains(k)));
        if let Some(idx) = last_known {
            return (idx + 1, false);
        }

        match self.lines.iter().position(|l| l.raw.starts_with(DEPRECATED_MARKER)) {
            Some(idx) => (idx.saturating_sub(1), true),
            None => (self.lines.len(), true),
        }
    }
}

impl ConfigStore for SdkconfigStore {
    fn ensure_keys_exist(&mut self, keys: &[String]) -> Result<usize> {
        let missing: Vec<&String> = keys.iter().filter(|k| self.position(k).is_none()).collect();
        if missing.is_empty() {
            return Ok(0);
        }

        let (at, new_section) = self.insertion_point(keys);

        let mut block = Vec::with_capacity(missing.len() + 4);
        if new_section {
            block.push(Line::text("#\n"));
            block.push(Line::text(format!("# {}\n", self.section_name)));
            block.push(Line::text("#\n"));
        }
        for key in &missing {
            block.push(Line::parse(&format!("# CONFIG_{key} is not set\n")));
        }
        if new_section {
            block.push(Line::text(format!("# end of {}\n", self.section_name)));
        }

        if at == self.lines.len() {
            if let Some(last) = self.lines.last_mut() {
                if !last.raw.ends_with('\n') {
                    last.raw.push('\n');
                }
            }
        }

        info!(count = missing.len(), line = at, new_section, "adding missing config keys");
        let tail = self.lines.split_off(at);
        self.lines.extend(block);
        self.lines.extend(tail);
        self.dirty = true;
        Ok(missing.len())
    }

    fn get(&self, key: &str) -> Option<bool> {
        let idx = self.position(key)?;
        match self.lines[idx].value {
            Some(Value::Bool(v)) => Some(v),
            _ => None,
        }
    }

    fn set(&mut self, key: &str, value: bool) -> Result<bool> {
        let idx = self
            .position(key)
            .ok_or_else(|| FlashdeckError::UnknownKey(format!("CONFIG_{key}")))?;
        let line = &mut self.lines[idx];

        let current = match &line.value {
            Some(Value::Bool(current)) => *current,
            Some(Value::Int(v)) | Some(Value::Other(v)) => {
                return Err(FlashdeckError::ConfigError(format!(
                    "CONFIG_{key} is not a boolean option (value {v})"
                )));
            }
            None => return Err(FlashdeckError::UnknownKey(format!("CONFIG_{key}"))),
        };
        if current == value {
            return Ok(false);
        }

        debug!(key, value, "config flag changed");
        line.value = Some(Value::Bool(value));
        line.changed = true;
        self.dirty = true;
        Ok(true)
    }

    fn write(&mut self) -> Result<()> {
        if let Err(e) = self.rotate_backups() {
            warn!(path = ?self.path, error = %e, "backup failed; sdkconfig left untouched");
            return Err(FlashdeckError::Backup(format!("{e:#}")));
        }

        let rendered = self.render();
        self.fs.write(&self.path, rendered.as_bytes())?;

        for line in &mut self.lines {
            if line.changed {
                line.raw = line.render();
                line.changed = false;
            }
        }
        self.dirty = false;
        info!(path = ?self.path, "sdkconfig written");
        Ok(())
    }

    fn is_dirty(&self) -> bool {
        self.dirty
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::mock::MockFileSystem;

    const SAMPLE: &str = "\
#
# Espressif IoT Development Framework (ESP-IDF) Project Configuration
#
CONFIG_IDF_TARGET=\"esp32s3\"
CONFIG_LOG_DEFAULT_LEVEL=3
#
# Board
#
CONFIG_LIB_TWAI=y
# CONFIG_LIB_MCP2515 is not set
# end of Board

# Deprecated options for backward compatibility
# CONFIG_APP_BUILD_TYPE_ELF_RAM is not set
";

    fn store_with(contents: &str) -> (MockFileSystem, SdkconfigStore) {
        let fs = MockFileSystem::new();
        fs.add_file("/ws/sdkconfig", contents);
        let store = SdkconfigStore::open(Arc::new(fs.clone()), "/ws/sdkconfig", "Flash selection", 3)
            .unwrap();
        (fs, store)
    }

    fn keys(ids: &[&str]) -> Vec<String> {
        ids.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn parses_bool_int_and_other_values() {
        let (_fs, store) = store_with(SAMPLE);
        assert_eq!(store.get("LIB_TWAI"), Some(true));
        assert_eq!(store.get("LIB_MCP2515"), Some(false));
        assert_eq!(store.get("LOG_DEFAULT_LEVEL"), None);
        assert_eq!(store.get("IDF_TARGET"), None);
        assert_eq!(store.render(), SAMPLE);
    }

    #[test]
    fn set_rejects_unknown_and_non_bool_keys() {
        let (_fs, mut store) = store_with(SAMPLE);
        assert!(matches!(store.set("NOPE", true), Err(FlashdeckError::UnknownKey(_))));
        assert!(matches!(
            store.set("LOG_DEFAULT_LEVEL", true),
            Err(FlashdeckError::ConfigError(_))
        ));
        assert!(!store.is_dirty());
    }

    #[test]
    fn set_reports_change_and_renders_canonical_lines() {
        let (_fs, mut store) = store_with(SAMPLE);
        assert!(!store.set("LIB_TWAI", true).unwrap());
        assert!(store.set("LIB_TWAI", false).unwrap());
        assert!(store.set("LIB_MCP2515", true).unwrap());

        let out = store.render();
        assert!(out.contains("# CONFIG_LIB_TWAI is not set\n"));
        assert!(out.contains("CONFIG_LIB_MCP2515=y\n"));
        assert!(out.contains("CONFIG_IDF_TARGET=\"esp32s3\"\n"));
    }

    #[test]
    fn missing_keys_follow_last_known_key_and_are_added_once() {
        let (_fs, mut store) = store_with(SAMPLE);
        let ids = keys(&["LIB_TWAI", "LIB_MCP2515", "EX_BLINK"]);

        assert_eq!(store.ensure_keys_exist(&ids).unwrap(), 1);
        assert_eq!(store.ensure_keys_exist(&ids).unwrap(), 0);

        let out = store.render();
        assert!(out.contains(
            "# CONFIG_LIB_MCP2515 is not set\n# CONFIG_EX_BLINK is not set\n# end of Board\n"
        ));
        assert_eq!(store.get("EX_BLINK"), Some(false));
    }

    #[test]
    fn missing_section_goes_before_deprecated_block() {
        let (_fs, mut store) = store_with(SAMPLE);
        store.ensure_keys_exist(&keys(&["EX_BLINK"])).unwrap();

        let out = store.render();
        let section = out.find("# Flash selection\n").unwrap();
        let deprecated = out.find(DEPRECATED_MARKER).unwrap();
        assert!(section < deprecated);
        assert!(out.contains("#\n# Flash selection\n#\n# CONFIG_EX_BLINK is not set\n# end of Flash selection\n"));
    }

    #[test]
    fn missing_section_is_appended_without_marker() {
        let (_fs, mut store) = store_with("CONFIG_A=1");
        store.ensure_keys_exist(&keys(&["EX_BLINK"])).unwrap();
        assert_eq!(
            store.render(),
            "CONFIG_A=1\n#\n# Flash selection\n#\n# CONFIG_EX_BLINK is not set\n# end of Flash selection\n"
        );
    }

    #[test]
    fn write_rotates_backups_and_keeps_at_most_max() {
        let (fs, mut store) = store_with("CONFIG_X=n\n");

        for round in 0..5 {
            store.set("X", round % 2 == 0).unwrap();
            store.write().unwrap();
        }

        assert!(fs.exists(Path::new("/ws/sdkconfig.backup.1")));
        assert!(fs.exists(Path::new("/ws/sdkconfig.backup.3")));
        assert!(!fs.exists(Path::new("/ws/sdkconfig.backup.4")));
        // Last write set X=y; the previous state (X=n) is the newest backup.
        assert_eq!(fs.contents("/ws/sdkconfig").as_deref(), Some("CONFIG_X=y\n"));
        assert_eq!(
            fs.contents("/ws/sdkconfig.backup.1").as_deref(),
            Some("# CONFIG_X is not set\n")
        );
        assert!(!store.is_dirty());
    }

    #[test]
    fn failed_backup_leaves_file_untouched() {
        let (fs, mut store) = store_with("CONFIG_X=n\n");
        fs.fail_copies(true);
        store.set("X", true).unwrap();

        let err = store.write().unwrap_err();

        assert!(matches!(err, FlashdeckError::Backup(_)));
        assert_eq!(fs.contents("/ws/sdkconfig").as_deref(), Some("CONFIG_X=n\n"));
        assert!(store.is_dirty());
    }
}
