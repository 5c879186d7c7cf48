// src/pipeline/flash.rs

//! The canonical build-and-flash pipeline:
//! prepare workspace → update configuration flags → build → flash.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use tracing::{debug, info};

use crate::catalog::OptionCatalog;
use crate::errors::Result;
use crate::exec::{LaunchSpec, Step};
use crate::fs::FileSystem;
use crate::sink::SharedSink;
use crate::store::{ConfigStore, SdkconfigStore};
use crate::toolchain::ToolchainDriver;
use crate::types::BuildMode;
use crate::workspace::{self, ProjectLayout};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlashRequest {
    pub port: String,
    pub library: String,
    pub example: String,
}

/// Everything the flash steps need besides the request.
#[derive(Clone)]
pub struct FlashContext {
    pub fs: Arc<dyn FileSystem>,
    pub layout: ProjectLayout,
    pub catalog: Arc<dyn OptionCatalog>,
    pub toolchain: Arc<dyn ToolchainDriver>,
    /// Heading for option keys added to a configuration file.
    pub section_name: String,
    pub max_backups: usize,
}

/// Optional per-phase sinks; unset phases use the pipeline's default sink.
#[derive(Clone, Default)]
pub struct FlashSinks {
    pub config: Option<SharedSink>,
    pub build: Option<SharedSink>,
    pub flash: Option<SharedSink>,
}

/// Whether the build directory must be wiped first.
///
/// Switching selections happens in separate workspaces, so an incremental
/// build is always enough.
pub fn select_build_mode(_request: &FlashRequest) -> BuildMode {
    BuildMode::Incremental
}

/// Enable exactly `library` and `example` among `ids`, adding missing keys,
/// and persist if anything changed. Returns the number of flags flipped.
pub fn apply_selection(
    store: &mut dyn ConfigStore,
    ids: &[String],
    library: &str,
    example: &str,
) -> Result<usize> {
    let added = store.ensure_keys_exist(ids)?;

    let mut changed = 0;
    for id in ids {
        let enable = id == library || id == example;
        if store.set(id, enable)? {
            info!(key = %id, enable, "config flag updated");
            changed += 1;
        }
    }

    if store.is_dirty() {
        info!(added, changed, "writing configuration");
        store.write()?;
    } else {
        info!("configuration already matches selection");
    }
    Ok(changed)
}

/// A planned flash run. Nothing touches disk or spawns until the steps run.
pub struct FlashPlan {
    request: FlashRequest,
    workspace_dir: PathBuf,
    build_mode: BuildMode,
    build: LaunchSpec,
    flash: LaunchSpec,
    ctx: FlashContext,
}

impl FlashPlan {
    pub fn new(ctx: FlashContext, request: FlashRequest) -> Self {
        let root = ctx
            .fs
            .canonicalize(&ctx.layout.root)
            .unwrap_or_else(|_| ctx.layout.root.clone());
        let workspace_dir = workspace::workspace_dir(
            &root,
            &ctx.layout.workspaces_dir,
            &request.library,
            &request.example,
        );
        let build_mode = select_build_mode(&request);

        let build = LaunchSpec::new(
            "Compile ESP32 firmware",
            ctx.toolchain.build_command(&workspace_dir, build_mode),
        );
        let flash = LaunchSpec::new(
            format!("Flash firmware to /dev/{}", request.port),
            ctx.toolchain.flash_command(&workspace_dir, &request.port),
        );

        debug!(?request, dir = ?workspace_dir, ?build_mode, "flash plan created");
        Self {
            request,
            workspace_dir,
            build_mode,
            build,
            flash,
            ctx,
        }
    }

    pub fn request(&self) -> &FlashRequest {
        &self.request
    }

    pub fn workspace_dir(&self) -> &PathBuf {
        &self.workspace_dir
    }

    pub fn build_mode(&self) -> BuildMode {
        self.build_mode
    }

    /// Step names paired with what they will do, in order.
    pub fn describe(&self) -> Vec<(String, String)> {
        vec![
            (
                "Switch to workspace".to_string(),
                format!("prepare {}", self.workspace_dir.display()),
            ),
            (
                "Update sdkconfig".to_string(),
                format!(
                    "enable {} and {} in {}",
                    self.request.library,
                    self.request.example,
                    self.workspace_dir.join("sdkconfig").display()
                ),
            ),
            (self.build.name().to_string(), self.build.command().to_string()),
            (self.flash.name().to_string(), self.flash.command().to_string()),
        ]
    }

    pub fn into_steps(self, sinks: FlashSinks) -> Vec<Step> {
        let FlashPlan {
            request,
            workspace_dir,
            build,
            flash,
            ctx,
            ..
        } = self;

        let prepare = {
            let fs = ctx.fs.clone();
            let layout = ctx.layout.clone();
            let (library, example) = (request.library.clone(), request.example.clone());
            Step::callable("Switch to workspace", move || {
                workspace::prepare(fs.as_ref(), &layout, &library, &example).map(|_| ())
            })
        };

        let update = {
            let fs = ctx.fs.clone();
            let ids = ctx.catalog.ids();
            let sdkconfig = workspace_dir.join("sdkconfig");
            let section = ctx.section_name.clone();
            let max_backups = ctx.max_backups;
            let (library, example) = (request.library, request.example);
            Step::callable("Update sdkconfig", move || -> anyhow::Result<()> {
                let mut store = SdkconfigStore::open(fs, &sdkconfig, section, max_backups)
                    .with_context(|| format!("opening {:?}", sdkconfig))?;
                apply_selection(&mut store, &ids, &library, &example)?;
                Ok(())
            })
        };

        let steps = [
            (prepare, sinks.config.clone()),
            (update, sinks.config),
            (Step::process(build), sinks.build),
            (Step::process(flash), sinks.flash),
        ];

        steps
            .into_iter()
            .map(|(step, sink)| match sink {
                Some(sink) => step.with_sink(sink),
                None => step,
            })
            .collect()
    }
}
