// src/pipeline/mod.rs

//! Sequential step execution with abort-on-first-failure.
//!
//! The runner knows nothing about what a step does. [`flash`] assembles the
//! canonical build-and-flash pipeline out of generic steps.

pub mod flash;

use std::fmt;

use tracing::{info, warn};

use crate::exec::{Step, StepExecutor, StepOutcome};
use crate::sink::SharedSink;

/// Outcome of every step that was attempted, in order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PipelineReport {
    pub outcomes: Vec<StepOutcome>,
}

impl PipelineReport {
    /// True iff every attempted step succeeded. An empty pipeline succeeds.
    pub fn succeeded(&self) -> bool {
        self.outcomes.iter().all(|o| o.succeeded)
    }

    /// The step that aborted the pipeline, if any.
    pub fn failed_step(&self) -> Option<&StepOutcome> {
        self.outcomes.iter().find(|o| !o.succeeded)
    }
}

impl fmt::Display for PipelineReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.failed_step() {
            None => write!(f, "{} step(s) succeeded", self.outcomes.len()),
            Some(failed) => write!(
                f,
                "failed at '{}' after {} step(s)",
                failed.name,
                self.outcomes.len()
            ),
        }
    }
}

pub struct PipelineRunner {
    executor: StepExecutor,
    sink: SharedSink,
}

impl PipelineRunner {
    /// `sink` receives events and output of every step without its own sink.
    pub fn new(executor: StepExecutor, sink: SharedSink) -> Self {
        Self { executor, sink }
    }

    /// Run `steps` in order, stopping at the first failure. Steps after the
    /// failure are dropped without being executed.
    pub async fn run(&self, steps: Vec<Step>) -> PipelineReport {
        let total = steps.len();
        let mut report = PipelineReport::default();

        for step in steps {
            let outcome = self.executor.run(step, &self.sink).await;
            let failed = !outcome.succeeded;
            report.outcomes.push(outcome);

            if failed {
                warn!(
                    step = report.outcomes.len(),
                    total,
                    skipped = total - report.outcomes.len(),
                    "pipeline aborted"
                );
                return report;
            }
        }

        info!(total, "pipeline finished");
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};

    use crate::sink::MemorySink;

    #[tokio::test]
    async fn empty_pipeline_succeeds() {
        let runner = PipelineRunner::new(StepExecutor::default(), Arc::new(MemorySink::new()));
        let report = runner.run(Vec::new()).await;
        assert!(report.succeeded());
        assert!(report.failed_step().is_none());
    }

    #[tokio::test]
    async fn steps_after_a_failure_never_run() {
        let ran_last = Arc::new(AtomicBool::new(false));
        let flag = ran_last.clone();
        let runner = PipelineRunner::new(StepExecutor::default(), Arc::new(MemorySink::new()));

        let report = runner
            .run(vec![
                Step::callable("a", || Ok(true)),
                Step::callable("b", || Ok(false)),
                Step::callable("c", move || {
                    flag.store(true, Ordering::SeqCst);
                    Ok(true)
                }),
            ])
            .await;

        assert!(!report.succeeded());
        assert_eq!(report.outcomes.len(), 2);
        assert_eq!(report.failed_step().map(|o| o.name.as_str()), Some("b"));
        assert!(!ran_last.load(Ordering::SeqCst));
        assert_eq!(report.to_string(), "failed at 'b' after 2 step(s)");
    }
}
