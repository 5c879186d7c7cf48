#![allow(dead_code)]

use std::sync::Arc;

use flashdeck::sink::{MemorySink, SharedSink};

pub use flashdeck_test_utils::{init_tracing, wait_until, with_timeout};

/// A memory sink plus the shared handle the engine takes.
pub fn memory_sink() -> (MemorySink, SharedSink) {
    let sink = MemorySink::new();
    let shared: SharedSink = Arc::new(sink.clone());
    (sink, shared)
}
