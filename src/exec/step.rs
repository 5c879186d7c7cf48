// src/exec/step.rs

//! Running one pipeline step and reporting how it went.
//!
//! A step either launches a shell command or calls an in-process function.
//! Both kinds write the same bracketing events to the step's sink:
//!
//! ```text
//! --- Build starts ---
//! ... streamed output ...
//! === Build completed ===          (or: !!! Build failed (exit code 2) !!!)
//! ```

use std::fmt;
use std::time::Duration;

use tracing::{debug, error, info, warn};

use crate::exec::stream::{self, StreamBuffer, StreamSettings};
use crate::exec::{LaunchSpec, ProcessRunner};
use crate::sink::SharedSink;

/// What an in-process step function reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallOutcome {
    /// The function decided success or failure itself.
    Flag(bool),
    /// The function returned without an opinion; counts as success.
    Done,
}

impl CallOutcome {
    pub fn succeeded(&self) -> bool {
        match self {
            CallOutcome::Flag(ok) => *ok,
            CallOutcome::Done => true,
        }
    }
}

impl From<bool> for CallOutcome {
    fn from(ok: bool) -> Self {
        CallOutcome::Flag(ok)
    }
}

impl From<()> for CallOutcome {
    fn from(_: ()) -> Self {
        CallOutcome::Done
    }
}

/// Boxed in-process step body. Runs on the blocking pool.
pub type StepFn = Box<dyn FnOnce() -> anyhow::Result<CallOutcome> + Send + 'static>;

pub enum StepTarget {
    Process(LaunchSpec),
    Callable(StepFn),
}

impl fmt::Debug for StepTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StepTarget::Process(spec) => f.debug_tuple("Process").field(spec).finish(),
            StepTarget::Callable(_) => f.write_str("Callable(..)"),
        }
    }
}

/// One named unit of a pipeline.
pub struct Step {
    name: String,
    target: StepTarget,
    sink: Option<SharedSink>,
}

impl Step {
    pub fn process(spec: LaunchSpec) -> Self {
        Self {
            name: spec.name().to_string(),
            target: StepTarget::Process(spec),
            sink: None,
        }
    }

    /// Wrap a function. Returning `bool` decides the outcome; returning `()`
    /// means success; an `Err` means failure.
    pub fn callable<F, T>(name: impl Into<String>, f: F) -> Self
    where
        F: FnOnce() -> anyhow::Result<T> + Send + 'static,
        T: Into<CallOutcome>,
    {
        Self {
            name: name.into(),
            target: StepTarget::Callable(Box::new(move || f().map(Into::into))),
            sink: None,
        }
    }

    /// Send this step's events and output somewhere other than the pipeline's
    /// default sink.
    pub fn with_sink(mut self, sink: SharedSink) -> Self {
        self.sink = Some(sink);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn target(&self) -> &StepTarget {
        &self.target
    }
}

impl fmt::Debug for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Step")
            .field("name", &self.name)
            .field("target", &self.target)
            .field("has_sink", &self.sink.is_some())
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepOutcome {
    pub name: String,
    pub succeeded: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExecSettings {
    pub stream: StreamSettings,
    /// How long to wait for output readers after the process has exited.
    pub drain_timeout: Duration,
}

impl Default for ExecSettings {
    fn default() -> Self {
        Self {
            stream: StreamSettings::default(),
            drain_timeout: Duration::from_secs(2),
        }
    }
}

/// Executes steps and turns every failure mode into a `false` outcome.
#[derive(Debug, Clone, Default)]
pub struct StepExecutor {
    runner: ProcessRunner,
    settings: ExecSettings,
}

impl StepExecutor {
    pub fn new(runner: ProcessRunner, settings: ExecSettings) -> Self {
        Self { runner, settings }
    }

    pub fn settings(&self) -> &ExecSettings {
        &self.settings
    }

    /// Run `step`, writing to its own sink if it has one, else to
    /// `default_sink`.
    pub async fn run(&self, step: Step, default_sink: &SharedSink) -> StepOutcome {
        let Step { name, target, sink } = step;
        let sink = sink.unwrap_or_else(|| default_sink.clone());

        let succeeded = match target {
            StepTarget::Process(spec) => self.run_process(&spec, &sink).await,
            StepTarget::Callable(f) => run_callable(&name, f, &sink).await,
        };

        StepOutcome { name, succeeded }
    }

    /// Launch `spec`, stream its output into `sink` and wait for it to exit.
    ///
    /// Succeeds iff the process exits with code 0.
    pub async fn run_process(&self, spec: &LaunchSpec, sink: &SharedSink) -> bool {
        let name = spec.name();
        sink.write(&format!("--- {name} starts ---\n"));

        let mut handle = match self.runner.launch(spec) {
            Ok(handle) => handle,
            Err(e) => {
                error!(step = %name, error = %e, "step could not be launched");
                sink.write(&format!("!!! {name} failed to launch: {e} !!!\n"));
                return false;
            }
        };

        let mut readers = Vec::with_capacity(2);
        if let Some(stdout) = handle.take_stdout() {
            readers.push(StreamBuffer::new(sink.clone(), "", self.settings.stream).attach(stdout));
        }
        if let Some(stderr) = handle.take_stderr() {
            readers.push(StreamBuffer::new(sink.clone(), "", self.settings.stream).attach(stderr));
        }

        let exit = handle.wait().await;

        if !stream::drain(readers, self.settings.drain_timeout).await {
            warn!(
                step = %name,
                drain_ms = self.settings.drain_timeout.as_millis() as u64,
                "output still open after process exit; dropping the rest"
            );
            if handle.kill_group() {
                debug!(step = %name, "killed leftover background processes");
            }
        }

        match exit {
            Ok(exit) if exit.success() => {
                info!(step = %name, "step completed");
                sink.write(&format!("=== {name} completed ===\n"));
                true
            }
            Ok(exit) => {
                info!(step = %name, exit_code = exit.code(), "step failed");
                sink.write(&format!("!!! {name} failed (exit code {}) !!!\n", exit.code()));
                false
            }
            Err(e) => {
                error!(step = %name, error = %e, "waiting for step process failed");
                sink.write(&format!("!!! {name} failed: {e} !!!\n"));
                false
            }
        }
    }
}

async fn run_callable(name: &str, f: StepFn, sink: &SharedSink) -> bool {
    sink.write(&format!("--- {name} starts ---\n"));

    match tokio::task::spawn_blocking(f).await {
        Ok(Ok(outcome)) if outcome.succeeded() => {
            info!(step = %name, "step completed");
            sink.write(&format!("=== {name} completed ===\n"));
            true
        }
        Ok(Ok(_)) => {
            info!(step = %name, "step reported failure");
            sink.write(&format!("!!! {name} failed !!!\n"));
            false
        }
        Ok(Err(e)) => {
            warn!(step = %name, error = %format!("{e:#}"), "step returned an error");
            sink.write(&format!("!!! {name} failed: {e:#} !!!\n"));
            false
        }
        Err(join_err) => {
            error!(step = %name, error = %join_err, "step panicked");
            sink.write(&format!("!!! {name} failed: step panicked !!!\n"));
            false
        }
    }
}
