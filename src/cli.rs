// src/cli.rs

//! CLI argument parsing using `clap`.

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

use crate::types::OptionMenu;

/// Command-line arguments for `flashdeck`.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "flashdeck",
    version,
    about = "Build, flash and monitor ESP32 firmware from the terminal.",
    long_about = None
)]
pub struct CliArgs {
    /// Path to the config file (TOML).
    ///
    /// Default: `flashdeck.toml` in the current working directory, or
    /// built-in defaults if that file does not exist.
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// ESP-IDF setup script to source before `idf.py` (overrides the config).
    #[arg(long, global = true, value_name = "PATH")]
    pub idf_setup: Option<String>,

    /// Logging level (error, warn, info, debug, trace).
    ///
    /// If omitted, `FLASHDECK_LOG` or a default level will be used.
    #[arg(long, global = true, value_enum, value_name = "LEVEL")]
    pub log_level: Option<LogLevel>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Clone, Subcommand)]
pub enum Command {
    /// List serial ports (placeholders if no device is attached).
    Ports,

    /// List selectable libraries and examples.
    Options {
        /// Only list one menu (`library` or `example`).
        #[arg(long)]
        menu: Option<OptionMenu>,
    },

    /// Prepare the workspace, update sdkconfig, build and flash.
    Flash {
        /// Serial port name, e.g. `ttyACM0`.
        #[arg(long)]
        port: String,

        /// Library option id.
        #[arg(long)]
        library: String,

        /// Example option id.
        #[arg(long)]
        example: String,

        /// Print the planned steps, but don't execute anything.
        #[arg(long)]
        dry_run: bool,
    },

    /// Stream device logs until Ctrl-C.
    Monitor {
        /// Ports to monitor. Default: every discovered port.
        ports: Vec<String>,
    },
}

/// Log level as exposed on the CLI.
#[derive(Debug, Copy, Clone, ValueEnum)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

/// Convenience wrapper around `CliArgs::parse()`.
pub fn parse() -> CliArgs {
    CliArgs::parse()
}
