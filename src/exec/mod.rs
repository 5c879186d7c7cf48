// src/exec/mod.rs

//! Process execution layer.
//!
//! - [`launch`] describes a shell-invokable operation.
//! - [`process`] launches it and owns the child until it is reaped.
//! - [`stream`] forwards a child's output to a sink with bounded latency.
//! - [`step`] runs one pipeline step (process or in-process function) and
//!   reports its outcome.

pub mod launch;
pub mod process;
pub mod step;
pub mod stream;

pub use launch::LaunchSpec;
pub use process::{ProcessExit, ProcessHandle, ProcessRunner, TerminateOutcome};
pub use step::{CallOutcome, ExecSettings, Step, StepExecutor, StepOutcome, StepTarget};
pub use stream::{StreamBuffer, StreamSettings, StreamSummary};
