// tests/config_loading.rs
mod common;
use crate::common::init_tracing;

use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use flashdeck::catalog::{OptionCatalog, check_dependencies};
use flashdeck::config::{load_and_validate, load_from_path, load_or_default};
use flashdeck::errors::FlashdeckError;
use flashdeck::types::OptionMenu;

fn demo_config() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("demos/flashdeck.toml")
}

fn write_config(contents: &str) -> (tempfile::TempDir, PathBuf) {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("flashdeck.toml");
    fs::write(&path, contents).unwrap();
    (dir, path)
}

#[test]
fn demo_config_loads_and_validates() {
    init_tracing();
    let cfg = load_and_validate(demo_config()).unwrap();

    assert_eq!(cfg.engine.flush_interval, Duration::from_millis(50));
    assert_eq!(cfg.engine.stop_timeout, Duration::from_secs(10));
    assert_eq!(cfg.toolchain.baud_rate, 115200);
    assert_eq!(cfg.project.section_name, "*** Example to build ***");
    assert_eq!(cfg.project.max_backups, 5);

    let catalog = cfg.catalog();
    assert_eq!(catalog.in_menu(OptionMenu::Library).len(), 2);
    assert_eq!(catalog.in_menu(OptionMenu::Example).len(), 3);

    assert!(check_dependencies(&catalog, "LIB_MCP2515", "EX_CAN_ECHO"));
    assert!(check_dependencies(&catalog, "LIB_MCP2515", "EX_BLINK"));
    assert!(!check_dependencies(&catalog, "LIB_MCP2515", "EX_TWAI_ALERTS"));
    assert!(!check_dependencies(&catalog, "EX_BLINK", "LIB_TWAI"));
}

#[test]
fn demo_config_drives_settings_and_toolchain() {
    let cfg = load_and_validate(demo_config()).unwrap();

    let monitor = cfg.monitor_settings();
    assert_eq!(monitor.terminate_grace, Duration::from_secs(2));
    assert_eq!(monitor.stream.poll_interval, Duration::from_millis(10));
    assert_eq!(cfg.exec_settings().drain_timeout, Duration::from_secs(2));

    let layout = cfg.layout();
    assert_eq!(layout.workspaces_dir, PathBuf::from("workspaces"));
    assert!(
        cfg.toolchain
            .effective_simulated_monitor()
            .contains("heartbeat")
    );
}

#[test]
fn empty_file_uses_defaults() {
    let (_dir, path) = write_config("");
    let cfg = load_and_validate(&path).unwrap();

    assert!(cfg.options.is_empty());
    assert_eq!(cfg.project.workspaces_dir, "workspaces");
    assert_eq!(cfg.engine.chunk_size, 4096);
}

#[test]
fn unknown_dependency_is_a_config_error() {
    let (_dir, path) = write_config(
        r#"
[[option]]
id = "EX_CAN_ECHO"
name = "CAN echo"
menu = "example"
depends_on = ["LIB_GONE"]
"#,
    );

    match load_and_validate(&path) {
        Err(FlashdeckError::ConfigError(msg)) => {
            assert!(msg.contains("unknown dependency 'LIB_GONE'"), "{msg}")
        }
        other => panic!("expected ConfigError, got {other:?}"),
    }
}

#[test]
fn bad_duration_is_rejected_while_parsing() {
    let (_dir, path) = write_config("[engine]\nflush_interval = \"soon\"\n");
    assert!(matches!(
        load_from_path(&path),
        Err(FlashdeckError::TomlError(_))
    ));
}

#[test]
fn malformed_toml_is_a_toml_error() {
    let (_dir, path) = write_config("[project\nroot = ");
    assert!(matches!(
        load_and_validate(&path),
        Err(FlashdeckError::TomlError(_))
    ));
}

#[test]
fn missing_explicit_path_is_an_io_error() {
    let dir = tempfile::tempdir().unwrap();
    let missing = dir.path().join("nope.toml");
    assert!(matches!(
        load_or_default(Some(&missing)),
        Err(FlashdeckError::IoError(_))
    ));
}
