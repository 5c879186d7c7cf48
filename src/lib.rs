// src/lib.rs

pub mod catalog;
pub mod cli;
pub mod config;
pub mod errors;
pub mod exec;
pub mod fs;
pub mod logging;
pub mod monitor;
pub mod pipeline;
pub mod ports;
pub mod sink;
pub mod store;
pub mod toolchain;
pub mod types;
pub mod workspace;

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Result, bail};
use tracing::{debug, info, warn};

use crate::catalog::{OptionCatalog, check_dependencies};
use crate::cli::{CliArgs, Command};
use crate::config::ConfigFile;
use crate::config::loader::load_or_default;
use crate::exec::{ProcessRunner, StepExecutor};
use crate::fs::{FileSystem, RealFileSystem};
use crate::monitor::MonitorRegistry;
use crate::pipeline::PipelineRunner;
use crate::pipeline::flash::{FlashContext, FlashPlan, FlashRequest, FlashSinks};
use crate::sink::{ConsoleSink, SharedSink, TracingSink};
use crate::types::OptionMenu;

/// High-level entry point used by `main.rs`.
///
/// Returns whether the requested operation succeeded; errors are reserved
/// for problems that prevented it from running at all (bad config, unknown
/// options).
pub async fn run(args: CliArgs) -> Result<bool> {
    let cfg = load_or_default(args.config.as_deref())?;

    match args.command {
        Command::Ports => {
            print_ports(&cfg);
            Ok(true)
        }
        Command::Options { menu } => {
            print_options(&cfg, menu);
            Ok(true)
        }
        Command::Flash {
            port,
            library,
            example,
            dry_run,
        } => {
            let request = FlashRequest {
                port,
                library,
                example,
            };
            run_flash(&cfg, args.idf_setup.as_deref(), request, dry_run).await
        }
        Command::Monitor { ports } => run_monitors(&cfg, args.idf_setup.as_deref(), ports).await,
    }
}

fn print_ports(cfg: &ConfigFile) {
    let found = ports::discover_ports(&RealFileSystem, Path::new(&cfg.project.dev_dir));
    if !found.real {
        println!("no serial devices found; placeholder ports:");
    }
    for port in &found.ports {
        println!("  {port}");
    }
}

fn print_options(cfg: &ConfigFile, only: Option<OptionMenu>) {
    let catalog = cfg.catalog();
    let menus = match only {
        Some(menu) => vec![menu],
        None => vec![OptionMenu::Library, OptionMenu::Example],
    };
    for menu in menus {
        let options = catalog.in_menu(menu);
        println!("{menu} ({}):", options.len());
        for opt in options {
            if opt.depends_on.is_empty() {
                println!("  - {:<24} {}", opt.id, opt.name);
            } else {
                println!(
                    "  - {:<24} {} (needs one of: {})",
                    opt.id,
                    opt.name,
                    opt.depends_on.join(", ")
                );
            }
        }
    }
}

async fn run_flash(
    cfg: &ConfigFile,
    idf_setup: Option<&str>,
    request: FlashRequest,
    dry_run: bool,
) -> Result<bool> {
    let catalog = cfg.catalog();
    if !check_dependencies(&catalog, &request.library, &request.example) {
        bail!(
            "example '{}' cannot be built with library '{}' (see `flashdeck options`)",
            request.example,
            request.library
        );
    }

    let fs: Arc<dyn FileSystem> = Arc::new(RealFileSystem);
    let ctx = FlashContext {
        fs,
        layout: cfg.layout(),
        catalog: Arc::new(catalog),
        toolchain: Arc::new(cfg.toolchain(idf_setup)),
        section_name: cfg.project.section_name.clone(),
        max_backups: cfg.project.max_backups,
    };
    let plan = FlashPlan::new(ctx, request);

    if dry_run {
        print_dry_run(cfg, &plan);
        return Ok(true);
    }

    let console = |label: &str| -> SharedSink { Arc::new(ConsoleSink::new(label)) };
    let sinks = FlashSinks {
        config: Some(Arc::new(TracingSink::new("config"))),
        build: Some(console("build")),
        flash: Some(console("flash")),
    };

    let executor = StepExecutor::new(ProcessRunner::new(), cfg.exec_settings());
    let runner = PipelineRunner::new(executor, console("flashdeck"));
    let report = runner.run(plan.into_steps(sinks)).await;

    if report.succeeded() {
        info!(%report, "flash finished");
        println!("flash succeeded");
    } else {
        warn!(%report, "flash failed");
        println!("flash {report}");
    }
    Ok(report.succeeded())
}

/// Simple dry-run output: print settings and the planned steps.
fn print_dry_run(cfg: &ConfigFile, plan: &FlashPlan) {
    println!("flashdeck dry-run");
    println!("  engine.flush_interval = {:?}", cfg.engine.flush_interval);
    println!("  engine.drain_timeout = {:?}", cfg.engine.drain_timeout);
    println!("  build mode = {:?}", plan.build_mode());
    println!("  workspace = {}", plan.workspace_dir().display());
    println!();

    let steps = plan.describe();
    println!("steps ({}):", steps.len());
    for (name, what) in steps {
        println!("  - {name}");
        println!("      {what}");
    }

    debug!("dry-run complete (no execution)");
}

async fn run_monitors(cfg: &ConfigFile, idf_setup: Option<&str>, ports: Vec<String>) -> Result<bool> {
    let ports = if ports.is_empty() {
        ports::discover_ports(&RealFileSystem, Path::new(&cfg.project.dev_dir)).ports
    } else {
        ports
    };

    let registry = MonitorRegistry::new(Arc::new(cfg.toolchain(idf_setup)), cfg.monitor_settings());

    let mut started = 0;
    for port in &ports {
        if registry.start(port, Arc::new(ConsoleSink::new(port.as_str()))) {
            started += 1;
        }
    }
    if started == 0 {
        bail!("no monitor could be started");
    }
    info!(started, "monitoring; press Ctrl-C to stop");

    wait_for_monitors(&registry, tokio::signal::ctrl_c()).await;
    Ok(registry.shutdown().await)
}

/// Wait until `interrupt` resolves or every monitor has exited. Returns true
/// on interrupt. The interrupt future lives across ticks, so a signal that
/// arrives between two checks is not lost.
async fn wait_for_monitors<F>(registry: &MonitorRegistry, interrupt: F) -> bool
where
    F: Future<Output = std::io::Result<()>>,
{
    tokio::pin!(interrupt);
    let mut tick = tokio::time::interval(Duration::from_millis(200));
    loop {
        tokio::select! {
            res = &mut interrupt => {
                if let Err(e) = res {
                    warn!(error = %e, "failed to listen for Ctrl-C");
                }
                return true;
            }
            _ = tick.tick() => {
                if registry.active_ports().is_empty() {
                    info!("every monitor has exited");
                    return false;
                }
            }
        }
    }
}
