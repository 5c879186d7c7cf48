// src/config/mod.rs

//! Configuration loading and validation for flashdeck.
//!
//! Responsibilities:
//! - Define the TOML-backed data model (`model.rs`).
//! - Parse duration strings such as `"50ms"` (`duration.rs`).
//! - Load a config file from disk (`loader.rs`).
//! - Validate settings and the option catalog (`validate.rs`).

pub mod duration;
pub mod loader;
pub mod model;
pub mod validate;

pub use loader::{load_and_validate, load_from_path, load_or_default};
pub use model::{ConfigFile, EngineSection, ProjectSection, RawConfigFile, ToolchainSection};
pub use validate::validate_raw_config;
