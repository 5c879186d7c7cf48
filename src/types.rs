// src/types.rs

use std::fmt;
use std::str::FromStr;

use serde::Deserialize;

/// Which selection menu a catalog option belongs to.
///
/// A flash run always picks exactly one `Library` (the driver backend) and one
/// `Example` (the firmware to build against it).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OptionMenu {
    Library,
    Example,
}

impl fmt::Display for OptionMenu {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OptionMenu::Library => write!(f, "library"),
            OptionMenu::Example => write!(f, "example"),
        }
    }
}

impl FromStr for OptionMenu {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "library" | "lib" => Ok(OptionMenu::Library),
            "example" => Ok(OptionMenu::Example),
            other => Err(format!(
                "invalid option menu: {other} (expected \"library\" or \"example\")"
            )),
        }
    }
}

/// How the build step should treat previous build output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BuildMode {
    /// Reuse the existing build directory.
    #[default]
    Incremental,
    /// Wipe the build directory first (`fullclean`).
    FullClean,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn option_menu_parses_short_and_long_names() {
        assert_eq!("lib".parse::<OptionMenu>(), Ok(OptionMenu::Library));
        assert_eq!(" Example ".parse::<OptionMenu>(), Ok(OptionMenu::Example));
        assert!("board".parse::<OptionMenu>().is_err());
    }
}
