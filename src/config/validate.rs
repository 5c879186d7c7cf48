// src/config/validate.rs

use std::collections::HashSet;

use crate::config::model::{ConfigFile, RawConfigFile};
use crate::errors::{FlashdeckError, Result};
use crate::types::OptionMenu;

impl TryFrom<RawConfigFile> for ConfigFile {
    type Error = FlashdeckError;

    fn try_from(raw: RawConfigFile) -> std::result::Result<Self, Self::Error> {
        validate_raw_config(&raw)?;
        Ok(ConfigFile::new_unchecked(raw))
    }
}

/// Run every check without consuming the config.
pub fn validate_raw_config(cfg: &RawConfigFile) -> Result<()> {
    validate_engine(cfg)?;
    validate_toolchain(cfg)?;
    validate_project(cfg)?;
    validate_options(cfg)?;
    Ok(())
}

fn config_error(msg: impl Into<String>) -> FlashdeckError {
    FlashdeckError::ConfigError(msg.into())
}

fn validate_engine(cfg: &RawConfigFile) -> Result<()> {
    let e = &cfg.engine;

    if e.chunk_size == 0 {
        return Err(config_error("[engine].chunk_size must be >= 1 (got 0)"));
    }
    if e.flush_interval.is_zero() {
        return Err(config_error("[engine].flush_interval must be > 0"));
    }
    if e.poll_interval.is_zero() {
        return Err(config_error("[engine].poll_interval must be > 0"));
    }
    if e.poll_interval > e.flush_interval {
        return Err(config_error(format!(
            "[engine].poll_interval ({:?}) must not exceed flush_interval ({:?})",
            e.poll_interval, e.flush_interval
        )));
    }
    if e.stop_timeout.is_zero() {
        return Err(config_error("[engine].stop_timeout must be > 0"));
    }

    Ok(())
}

fn validate_toolchain(cfg: &RawConfigFile) -> Result<()> {
    let t = &cfg.toolchain;

    if t.idf_setup.trim().is_empty() {
        return Err(config_error("[toolchain].idf_setup must not be empty"));
    }
    if t.baud_rate == 0 {
        return Err(config_error("[toolchain].baud_rate must be > 0"));
    }
    if t.jobs == Some(0) {
        return Err(config_error("[toolchain].jobs must be >= 1 (got 0)"));
    }

    Ok(())
}

fn validate_project(cfg: &RawConfigFile) -> Result<()> {
    let p = &cfg.project;

    if p.max_backups == 0 {
        return Err(config_error("[project].max_backups must be >= 1 (got 0)"));
    }
    if p.workspaces_dir.trim().is_empty() {
        return Err(config_error("[project].workspaces_dir must not be empty"));
    }
    if p.sdkconfig.trim().is_empty() {
        return Err(config_error("[project].sdkconfig must not be empty"));
    }

    Ok(())
}

fn validate_options(cfg: &RawConfigFile) -> Result<()> {
    let mut seen = HashSet::new();
    for opt in &cfg.options {
        if opt.id.trim().is_empty() {
            return Err(config_error(format!(
                "option '{}' has an empty id",
                opt.name
            )));
        }
        if !seen.insert(opt.id.as_str()) {
            return Err(config_error(format!("duplicate option id '{}'", opt.id)));
        }
    }

    for opt in &cfg.options {
        for dep in &opt.depends_on {
            if dep == &opt.id {
                return Err(config_error(format!(
                    "option '{}' cannot depend on itself in `depends_on`",
                    opt.id
                )));
            }
            match cfg.options.iter().find(|o| &o.id == dep) {
                None => {
                    return Err(config_error(format!(
                        "option '{}' has unknown dependency '{}' in `depends_on`",
                        opt.id, dep
                    )));
                }
                Some(target) if target.menu != OptionMenu::Library => {
                    return Err(config_error(format!(
                        "option '{}' depends on '{}', which is not a library",
                        opt.id, dep
                    )));
                }
                Some(_) => {}
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(toml_str: &str) -> Result<ConfigFile> {
        let raw: RawConfigFile = toml::from_str(toml_str)?;
        ConfigFile::try_from(raw)
    }

    const OPTIONS: &str = r#"
        [[option]]
        id = "LIB_TWAI"
        name = "TWAI"
        menu = "library"

        [[option]]
        id = "EX_ECHO"
        name = "CAN echo"
        menu = "example"
        depends_on = ["LIB_TWAI"]
    "#;

    #[test]
    fn valid_catalog_passes() {
        let cfg = parse(OPTIONS).unwrap();
        assert_eq!(cfg.options.len(), 2);
    }

    #[test]
    fn zero_chunk_size_is_rejected() {
        let err = parse("[engine]\nchunk_size = 0").unwrap_err();
        assert!(err.to_string().contains("chunk_size"));
    }

    #[test]
    fn poll_interval_longer_than_flush_is_rejected() {
        let err = parse("[engine]\nflush_interval = \"10ms\"\npoll_interval = \"20ms\"").unwrap_err();
        assert!(err.to_string().contains("poll_interval"));
    }

    #[test]
    fn zero_backups_is_rejected() {
        assert!(parse("[project]\nmax_backups = 0").is_err());
    }

    #[test]
    fn unknown_dependency_is_rejected() {
        let err = parse(
            r#"
            [[option]]
            id = "EX_ECHO"
            name = "CAN echo"
            menu = "example"
            depends_on = ["LIB_MISSING"]
            "#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("unknown dependency 'LIB_MISSING'"));
    }

    #[test]
    fn duplicate_ids_and_self_dependencies_are_rejected() {
        let dup = format!("{OPTIONS}\n[[option]]\nid = \"LIB_TWAI\"\nname = \"again\"\nmenu = \"library\"\n");
        assert!(parse(&dup).unwrap_err().to_string().contains("duplicate"));

        let own = "[[option]]\nid = \"LIB_A\"\nname = \"a\"\nmenu = \"library\"\ndepends_on = [\"LIB_A\"]\n";
        assert!(parse(own).unwrap_err().to_string().contains("itself"));
    }

    #[test]
    fn dependency_on_an_example_is_rejected() {
        let cfg = format!(
            "{OPTIONS}\n[[option]]\nid = \"EX_OTHER\"\nname = \"x\"\nmenu = \"example\"\ndepends_on = [\"EX_ECHO\"]\n"
        );
        assert!(parse(&cfg).unwrap_err().to_string().contains("not a library"));
    }
}
