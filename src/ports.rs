// src/ports.rs

//! Serial port discovery.

use std::path::Path;
use std::sync::LazyLock;

use regex::Regex;
use tracing::{debug, info};

use crate::fs::FileSystem;

/// Names used when no device is attached, so monitors can still be exercised.
pub const PLACEHOLDER_PORTS: [&str; 4] = ["Port1", "Port2", "Port3", "Port4"];

static DEVICE_PORT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^tty(ACM|USB)\d+$").expect("Invalid regex pattern"));

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveredPorts {
    pub ports: Vec<String>,
    /// False when `ports` are placeholders.
    pub real: bool,
}

/// True for the stand-in names handed out when no device was found.
pub fn is_placeholder_port(port: &str) -> bool {
    port.starts_with("Port")
}

/// List `ttyACM*` then `ttyUSB*` devices in `dev_dir`, each group sorted.
///
/// An unreadable `dev_dir` is treated like an empty one.
pub fn discover_ports(fs: &dyn FileSystem, dev_dir: &Path) -> DiscoveredPorts {
    let mut acm = Vec::new();
    let mut usb = Vec::new();

    match fs.read_dir(dev_dir) {
        Ok(entries) => {
            for entry in entries {
                let Some(name) = entry.file_name().and_then(|n| n.to_str()) else {
                    continue;
                };
                if let Some(caps) = DEVICE_PORT.captures(name) {
                    match &caps[1] {
                        "ACM" => acm.push(name.to_string()),
                        _ => usb.push(name.to_string()),
                    }
                }
            }
        }
        Err(e) => debug!(dir = ?dev_dir, error = %e, "cannot list device directory"),
    }

    acm.sort_by(|a, b| natural_key(a).cmp(&natural_key(b)));
    usb.sort_by(|a, b| natural_key(a).cmp(&natural_key(b)));
    acm.extend(usb);

    if acm.is_empty() {
        info!("no serial devices found; using placeholder ports");
        return DiscoveredPorts {
            ports: PLACEHOLDER_PORTS.iter().map(|p| p.to_string()).collect(),
            real: false,
        };
    }

    info!(ports = ?acm, "serial devices found");
    DiscoveredPorts {
        ports: acm,
        real: true,
    }
}

/// Sort `ttyACM10` after `ttyACM2`.
fn natural_key(name: &str) -> (usize, u64) {
    let digits = name.trim_start_matches(|c: char| !c.is_ascii_digit());
    (name.len() - digits.len(), digits.parse().unwrap_or(0))
}
