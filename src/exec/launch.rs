// src/exec/launch.rs

use std::fmt;

/// Immutable description of one shell-invokable operation.
///
/// `name` is what shows up in step events and logs; `command` is handed to the
/// platform shell verbatim, so compound syntax (`&&`, pipes, `source`) works.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchSpec {
    name: String,
    command: String,
}

impl LaunchSpec {
    pub fn new(name: impl Into<String>, command: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            command: command.into(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn command(&self) -> &str {
        &self.command
    }
}

impl fmt::Display for LaunchSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name, self.command)
    }
}
