// src/workspace.rs

//! Per-selection build workspaces.
//!
//! Every (library, example) pair builds in its own directory so switching
//! between them does not throw away the previous build. The directory holds
//! symlinks to the project sources and a private `sdkconfig`.

use std::path::{Component, Path, PathBuf};

use anyhow::{Context, Result};
use tracing::{debug, info};

use crate::fs::FileSystem;

/// Where the project and its workspaces live.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProjectLayout {
    pub root: PathBuf,
    /// Relative to `root` unless absolute.
    pub workspaces_dir: PathBuf,
    /// The project's own configuration file, relative to `root` unless
    /// absolute.
    pub sdkconfig: PathBuf,
}

impl ProjectLayout {
    pub fn workspace_dir(&self, library: &str, example: &str) -> PathBuf {
        workspace_dir(&self.root, &self.workspaces_dir, library, example)
    }

    pub fn project_sdkconfig(&self) -> PathBuf {
        self.root.join(&self.sdkconfig)
    }
}

/// `{root}/{workspaces_dir}/{library}_{example}`.
pub fn workspace_dir(root: &Path, workspaces_dir: &Path, library: &str, example: &str) -> PathBuf {
    root.join(workspaces_dir).join(format!("{library}_{example}"))
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreparedWorkspace {
    pub dir: PathBuf,
    /// The workspace's own configuration file.
    pub sdkconfig: PathBuf,
    /// Symlinks created by this call (existing ones are left alone).
    pub links_created: usize,
    /// Whether the project configuration was copied in by this call.
    pub config_copied: bool,
}

/// Create (or refresh) the workspace for `library` + `example`.
///
/// Links every non-hidden top-level directory of the project except `build`
/// (and the workspaces directory itself), plus `CMakeLists.txt`. The project
/// configuration is copied only if the workspace has none yet, so earlier
/// selections made in that workspace survive.
pub fn prepare(
    fs: &dyn FileSystem,
    layout: &ProjectLayout,
    library: &str,
    example: &str,
) -> Result<PreparedWorkspace> {
    let root = fs
        .canonicalize(&layout.root)
        .with_context(|| format!("resolving project root {:?}", layout.root))?;
    let dir = workspace_dir(&root, &layout.workspaces_dir, library, example);
    info!(library, example, dir = ?dir, "preparing workspace");

    fs.create_dir_all(&dir)
        .with_context(|| format!("creating workspace {:?}", dir))?;

    let skip = first_component(&layout.workspaces_dir);
    let mut sources: Vec<PathBuf> = fs
        .read_dir(&root)
        .with_context(|| format!("listing project root {:?}", root))?
        .into_iter()
        .filter(|entry| {
            let Some(name) = entry.file_name().and_then(|n| n.to_str()) else {
                return false;
            };
            !name.starts_with('.')
                && name != "build"
                && Some(name) != skip.as_deref()
                && fs.is_dir(entry)
        })
        .collect();
    sources.sort();

    let cmake = root.join("CMakeLists.txt");
    if fs.exists(&cmake) {
        sources.push(cmake);
    }

    let mut links_created = 0;
    for source in &sources {
        let Some(name) = source.file_name() else {
            continue;
        };
        let link = dir.join(name);
        if fs.exists(&link) {
            continue;
        }
        fs.symlink(source, &link)
            .with_context(|| format!("linking {:?} -> {:?}", link, source))?;
        debug!(link = ?link, target = ?source, "linked");
        links_created += 1;
    }

    let sdkconfig = dir.join("sdkconfig");
    let config_copied = if fs.exists(&sdkconfig) {
        false
    } else {
        let project_config = root.join(&layout.sdkconfig);
        fs.copy(&project_config, &sdkconfig)
            .with_context(|| format!("copying {:?} into workspace", project_config))?;
        true
    };

    info!(dir = ?dir, links_created, config_copied, "workspace ready");
    Ok(PreparedWorkspace {
        dir,
        sdkconfig,
        links_created,
        config_copied,
    })
}

fn first_component(path: &Path) -> Option<String> {
    match path.components().next()? {
        Component::Normal(name) if path.is_relative() => name.to_str().map(str::to_string),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::mock::MockFileSystem;

    fn layout() -> ProjectLayout {
        ProjectLayout {
            root: PathBuf::from("/proj"),
            workspaces_dir: PathBuf::from("workspaces"),
            sdkconfig: PathBuf::from("sdkconfig"),
        }
    }

    fn project() -> MockFileSystem {
        let fs = MockFileSystem::new();
        fs.add_dir("/proj/main");
        fs.add_dir("/proj/components");
        fs.add_dir("/proj/build");
        fs.add_dir("/proj/.git");
        fs.add_file("/proj/CMakeLists.txt", "project(demo)");
        fs.add_file("/proj/README.md", "readme");
        fs.add_file("/proj/sdkconfig", "CONFIG_X=y\n");
        fs
    }

    #[test]
    fn workspace_dir_joins_selection() {
        assert_eq!(
            layout().workspace_dir("LIB_TWAI", "EX_BLINK"),
            PathBuf::from("/proj/workspaces/LIB_TWAI_EX_BLINK")
        );
    }

    #[test]
    fn links_sources_and_copies_config() -> Result<()> {
        let fs = project();

        let ws = prepare(&fs, &layout(), "LIB_TWAI", "EX_BLINK")?;

        let dir = PathBuf::from("/proj/workspaces/LIB_TWAI_EX_BLINK");
        assert_eq!(ws.dir, dir);
        assert_eq!(ws.links_created, 3);
        assert_eq!(fs.link_target(dir.join("main")), Some(PathBuf::from("/proj/main")));
        assert_eq!(
            fs.link_target(dir.join("CMakeLists.txt")),
            Some(PathBuf::from("/proj/CMakeLists.txt"))
        );
        assert!(!fs.exists(&dir.join("build")));
        assert!(!fs.exists(&dir.join(".git")));
        assert!(!fs.exists(&dir.join("workspaces")));
        assert!(!fs.exists(&dir.join("README.md")));
        assert!(ws.config_copied);
        assert_eq!(fs.contents(dir.join("sdkconfig")).as_deref(), Some("CONFIG_X=y\n"));
        Ok(())
    }

    #[test]
    fn second_prepare_keeps_existing_links_and_config() -> Result<()> {
        let fs = project();
        prepare(&fs, &layout(), "A", "B")?;
        fs.add_file("/proj/workspaces/A_B/sdkconfig", "CONFIG_X=n\n");

        let again = prepare(&fs, &layout(), "A", "B")?;

        assert_eq!(again.links_created, 0);
        assert!(!again.config_copied);
        assert_eq!(
            fs.contents("/proj/workspaces/A_B/sdkconfig").as_deref(),
            Some("CONFIG_X=n\n")
        );
        Ok(())
    }

    #[test]
    fn missing_project_config_is_an_error() {
        let fs = MockFileSystem::new();
        fs.add_dir("/proj/main");
        assert!(prepare(&fs, &layout(), "A", "B").is_err());
    }
}
