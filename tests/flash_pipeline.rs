// tests/flash_pipeline.rs
#![cfg(unix)]

mod common;
use crate::common::{init_tracing, memory_sink, with_timeout};

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use flashdeck::catalog::{OptionCatalog, StaticCatalog};
use flashdeck::exec::{ProcessRunner, StepExecutor};
use flashdeck::fs::{FileSystem, RealFileSystem};
use flashdeck::pipeline::PipelineRunner;
use flashdeck::pipeline::flash::{FlashContext, FlashPlan, FlashRequest, FlashSinks};
use flashdeck::workspace::ProjectLayout;
use flashdeck_test_utils::builders::{OptionBuilder, fast_exec};
use flashdeck_test_utils::scripted_toolchain::ScriptedToolchain;

const PROJECT_SDKCONFIG: &str = "\
CONFIG_IDF_TARGET=\"esp32\"
# CONFIG_LIB_TWAI is not set
CONFIG_EX_BLINK=y
#
# Deprecated options for backward compatibility
#
";

fn project() -> tempfile::TempDir {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path();
    for sub in ["main", "components", "build", ".git"] {
        fs::create_dir_all(root.join(sub)).unwrap();
    }
    fs::write(root.join("CMakeLists.txt"), "cmake_minimum_required(VERSION 3.16)\n").unwrap();
    fs::write(root.join("sdkconfig"), PROJECT_SDKCONFIG).unwrap();
    dir
}

fn catalog() -> StaticCatalog {
    StaticCatalog::new(vec![
        OptionBuilder::library("LIB_TWAI").build(),
        OptionBuilder::example("EX_BLINK").build(),
        OptionBuilder::example("EX_TWAI_ALERTS").depends_on("LIB_TWAI").build(),
    ])
}

fn context(root: &Path, toolchain: ScriptedToolchain) -> FlashContext {
    FlashContext {
        fs: Arc::new(RealFileSystem),
        layout: ProjectLayout {
            root: root.to_path_buf(),
            workspaces_dir: PathBuf::from("workspaces"),
            sdkconfig: PathBuf::from("sdkconfig"),
        },
        catalog: Arc::new(catalog()),
        toolchain: Arc::new(toolchain),
        section_name: "Flashdeck selection".to_string(),
        max_backups: 3,
    }
}

fn request() -> FlashRequest {
    FlashRequest {
        port: "ttyUSB0".to_string(),
        library: "LIB_TWAI".to_string(),
        example: "EX_TWAI_ALERTS".to_string(),
    }
}

#[tokio::test]
async fn full_flash_prepares_workspace_and_updates_config() {
    init_tracing();
    let project = project();
    let toolchain = ScriptedToolchain::new()
        .with_build("echo compiling; touch {workspace}/built")
        .with_flash("touch {workspace}/flashed; echo done on {port}");

    let plan = FlashPlan::new(context(project.path(), toolchain.clone()), request());
    let ws = plan.workspace_dir().clone();
    let (mem, sink) = memory_sink();
    let runner = PipelineRunner::new(StepExecutor::new(ProcessRunner::new(), fast_exec()), sink);

    let report = with_timeout(runner.run(plan.into_steps(FlashSinks::default()))).await;
    assert!(report.succeeded(), "{report}\n{}", mem.text());
    assert_eq!(report.outcomes.len(), 4);

    let real = RealFileSystem;
    assert!(real.is_symlink(&ws.join("main")));
    assert!(real.is_symlink(&ws.join("components")));
    assert!(real.is_symlink(&ws.join("CMakeLists.txt")));
    assert!(!ws.join("build").exists());
    assert!(!ws.join(".git").exists());
    assert!(!ws.join("workspaces").exists());

    let sdkconfig = fs::read_to_string(ws.join("sdkconfig")).unwrap();
    assert!(sdkconfig.contains("CONFIG_LIB_TWAI=y\n"));
    assert!(sdkconfig.contains("# CONFIG_EX_BLINK is not set\n"));
    assert!(sdkconfig.contains("CONFIG_EX_TWAI_ALERTS=y\n"));
    assert!(sdkconfig.contains("CONFIG_IDF_TARGET=\"esp32\"\n"));
    assert!(ws.join("sdkconfig.backup.1").exists());

    // The project's own configuration is never edited.
    assert_eq!(
        fs::read_to_string(project.path().join("sdkconfig")).unwrap(),
        PROJECT_SDKCONFIG
    );

    assert!(ws.join("built").exists());
    assert!(ws.join("flashed").exists());
    let text = mem.text();
    assert!(text.contains("compiling\n"));
    assert!(text.contains("done on ttyUSB0\n"));
    assert!(text.contains("=== Flash firmware to /dev/ttyUSB0 completed ===\n"));

    assert_eq!(
        toolchain.requests(),
        vec!["build Incremental".to_string(), "flash ttyUSB0".to_string()]
    );
}

#[tokio::test]
async fn failed_build_never_flashes() {
    init_tracing();
    let project = project();
    let toolchain = ScriptedToolchain::new()
        .with_build("echo 'error: undefined reference' >&2; exit 2")
        .with_flash("touch {workspace}/flashed");

    let plan = FlashPlan::new(context(project.path(), toolchain), request());
    let ws = plan.workspace_dir().clone();
    let (build_mem, build_sink) = memory_sink();
    let (mem, sink) = memory_sink();
    let sinks = FlashSinks {
        build: Some(build_sink),
        ..FlashSinks::default()
    };

    let runner = PipelineRunner::new(StepExecutor::new(ProcessRunner::new(), fast_exec()), sink);
    let report = with_timeout(runner.run(plan.into_steps(sinks))).await;

    assert!(!report.succeeded());
    assert_eq!(
        report.failed_step().map(|o| o.name.as_str()),
        Some("Compile ESP32 firmware")
    );
    assert_eq!(report.outcomes.len(), 3);
    assert!(!ws.join("flashed").exists());

    let build_text = build_mem.text();
    assert!(build_text.contains("error: undefined reference\n"));
    assert!(build_text.contains("!!! Compile ESP32 firmware failed (exit code 2) !!!\n"));
    assert!(!mem.text().contains("Compile ESP32 firmware"));
}

#[tokio::test]
async fn second_flash_reuses_workspace_and_keeps_its_config() {
    init_tracing();
    let project = project();
    let run = |toolchain: ScriptedToolchain| {
        let plan = FlashPlan::new(context(project.path(), toolchain), request());
        let (_mem, sink) = memory_sink();
        let runner = PipelineRunner::new(StepExecutor::new(ProcessRunner::new(), fast_exec()), sink);
        async move { runner.run(plan.into_steps(FlashSinks::default())).await }
    };

    assert!(with_timeout(run(ScriptedToolchain::new())).await.succeeded());

    let ws = FlashPlan::new(context(project.path(), ScriptedToolchain::new()), request())
        .workspace_dir()
        .clone();
    fs::write(
        ws.join("sdkconfig"),
        format!("{}CONFIG_LOCAL_TWEAK=y\n", fs::read_to_string(ws.join("sdkconfig")).unwrap()),
    )
    .unwrap();

    assert!(with_timeout(run(ScriptedToolchain::new())).await.succeeded());

    let sdkconfig = fs::read_to_string(ws.join("sdkconfig")).unwrap();
    assert!(sdkconfig.contains("CONFIG_LOCAL_TWEAK=y\n"));
    assert!(sdkconfig.contains("CONFIG_EX_TWAI_ALERTS=y\n"));
}

#[test]
fn catalog_ids_drive_the_selection() {
    assert_eq!(
        catalog().ids(),
        vec!["LIB_TWAI", "EX_BLINK", "EX_TWAI_ALERTS"]
    );
}
