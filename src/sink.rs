// src/sink.rs

//! Text sinks: where step events and streamed process output end up.
//!
//! A sink is a capability, not an entity: anything that accepts a chunk of
//! text. Writers never assume what renders it. The implementations here cover
//! the CLI (stdout / tracing), embedders (channels) and tests (memory).

use std::io::Write;
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::mpsc;
use tracing::{error, info, warn};

/// Anything accepting chunks of text.
///
/// Chunks are not guaranteed to be whole lines; they may contain several
/// lines or end mid-line.
pub trait Sink: Send + Sync {
    fn write(&self, text: &str);
}

/// Shared sink handle as passed around the engine.
pub type SharedSink = Arc<dyn Sink>;

/// Best-effort severity of a line of tool output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    Info,
    Warning,
    Error,
}

impl Severity {
    /// Tag a line by substring match. This is a convenience for rendering,
    /// not a contract about the tool's output.
    pub fn classify(line: &str) -> Severity {
        let lower = line.to_lowercase();
        if lower.contains("error") || lower.contains("failed") || lower.contains("fatal") {
            Severity::Error
        } else if lower.contains("warn") {
            Severity::Warning
        } else {
            Severity::Info
        }
    }
}

/// Forwards every chunk over an unbounded channel.
///
/// Dropped receivers are ignored: output for a closed view is discarded.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<String>,
}

impl ChannelSink {
    pub fn new(tx: mpsc::UnboundedSender<String>) -> Self {
        Self { tx }
    }

    /// Convenience: build a sink together with its receiving end.
    pub fn pair() -> (Self, mpsc::UnboundedReceiver<String>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl Sink for ChannelSink {
    fn write(&self, text: &str) {
        let _ = self.tx.send(text.to_string());
    }
}

/// Emits one `tracing` event per non-empty line, at a level picked by
/// [`Severity::classify`].
#[derive(Debug, Clone)]
pub struct TracingSink {
    source: String,
}

impl TracingSink {
    pub fn new(source: impl Into<String>) -> Self {
        Self {
            source: source.into(),
        }
    }
}

impl Sink for TracingSink {
    fn write(&self, text: &str) {
        for line in text.lines().map(str::trim_end).filter(|l| !l.is_empty()) {
            match Severity::classify(line) {
                Severity::Error => error!(source = %self.source, line = %line, "output"),
                Severity::Warning => warn!(source = %self.source, line = %line, "output"),
                Severity::Info => info!(source = %self.source, line = %line, "output"),
            }
        }
    }
}

/// Prints to stdout, prefixing every line with `[label] `.
///
/// Partial lines are held back until their newline arrives so that output
/// from several consoles sharing stdout does not interleave mid-line.
#[derive(Debug)]
pub struct ConsoleSink {
    label: String,
    pending: Mutex<String>,
}

impl ConsoleSink {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            pending: Mutex::new(String::new()),
        }
    }

    /// Print whatever partial line is still held back.
    pub fn flush_pending(&self) {
        let mut pending = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
        if !pending.is_empty() {
            let line = std::mem::take(&mut *pending);
            let mut out = std::io::stdout().lock();
            let _ = writeln!(out, "[{}] {}", self.label, line);
        }
    }
}

impl Sink for ConsoleSink {
    fn write(&self, text: &str) {
        let mut pending = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
        pending.push_str(text);

        let Some(last_newline) = pending.rfind('\n') else {
            return;
        };
        let complete: String = pending.drain(..=last_newline).collect();
        drop(pending);

        let mut out = std::io::stdout().lock();
        for line in complete.lines() {
            let _ = writeln!(out, "[{}] {}", self.label, line);
        }
    }
}

impl Drop for ConsoleSink {
    fn drop(&mut self) {
        self.flush_pending();
    }
}

/// Captures every chunk in memory.
#[derive(Debug, Clone, Default)]
pub struct MemorySink {
    chunks: Arc<Mutex<Vec<String>>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// All chunks written so far, in order.
    pub fn chunks(&self) -> Vec<String> {
        self.chunks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Everything written so far, concatenated.
    pub fn text(&self) -> String {
        self.chunks().concat()
    }

    /// Number of chunks containing `needle`.
    pub fn count_containing(&self, needle: &str) -> usize {
        self.chunks().iter().filter(|c| c.contains(needle)).count()
    }
}

impl Sink for MemorySink {
    fn write(&self, text: &str) {
        self.chunks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(text.to_string());
    }
}
