// src/exec/stream.rs

//! Line-oriented, time-bounded buffering of a child's output stream.
//!
//! A [`StreamBuffer`] reads from one pipe and forwards text to a sink whenever
//! the first of these happens:
//! - a newline arrives (everything through the last newline is forwarded),
//! - the buffer reaches `chunk_size`,
//! - `flush_interval` has passed since the last flush and the buffer is not
//!   empty.
//!
//! Reads are bounded by `poll_interval`, so the time-based flush fires even
//! while the producer is silent. Whatever is left when the stream ends is
//! flushed exactly once.

use std::io;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::task::JoinHandle;
use tokio::time::{Instant, timeout};
use tracing::{debug, warn};

use crate::sink::SharedSink;

/// Tuning for a [`StreamBuffer`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamSettings {
    /// Read size, and buffer length that forces a flush.
    pub chunk_size: usize,
    /// Maximum time buffered text waits before being forwarded.
    pub flush_interval: Duration,
    /// Upper bound on a single read before the flush timer is re-checked.
    pub poll_interval: Duration,
}

impl Default for StreamSettings {
    fn default() -> Self {
        Self {
            chunk_size: 4096,
            flush_interval: Duration::from_millis(50),
            poll_interval: Duration::from_millis(10),
        }
    }
}

/// What a finished buffering loop saw; mostly for debug logging.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StreamSummary {
    pub bytes: usize,
    pub chunks: usize,
    pub failed: bool,
}

pub struct StreamBuffer {
    sink: SharedSink,
    prefix: String,
    settings: StreamSettings,
    text: String,
    /// Undecoded tail: an incomplete UTF-8 sequence split across reads.
    pending: Vec<u8>,
    last_flush: Instant,
    summary: StreamSummary,
}

impl StreamBuffer {
    pub fn new(sink: SharedSink, prefix: impl Into<String>, settings: StreamSettings) -> Self {
        Self {
            sink,
            prefix: prefix.into(),
            settings,
            text: String::new(),
            pending: Vec::new(),
            last_flush: Instant::now(),
            summary: StreamSummary::default(),
        }
    }

    /// Spawn the buffering loop for `reader` as its own task.
    pub fn attach<R>(self, reader: R) -> JoinHandle<StreamSummary>
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        tokio::spawn(self.run(reader))
    }

    /// Drive the buffering loop until the stream ends or fails.
    pub async fn run<R>(mut self, mut reader: R) -> StreamSummary
    where
        R: AsyncRead + Unpin,
    {
        let mut buf = vec![0u8; self.settings.chunk_size.max(1)];

        loop {
            match timeout(self.settings.poll_interval, reader.read(&mut buf)).await {
                Ok(Ok(0)) => break,
                Ok(Ok(n)) => {
                    self.summary.bytes += n;
                    decode_into(&mut self.pending, &buf[..n], &mut self.text);
                    self.flush_ready();
                }
                Ok(Err(e)) => {
                    self.finish();
                    self.report_error(&e);
                    return self.summary;
                }
                Err(_elapsed) => self.flush_if_stale(),
            }
        }

        self.finish();
        debug!(prefix = %self.prefix, summary = ?self.summary, "stream ended");
        self.summary
    }

    fn flush_ready(&mut self) {
        if self.text.len() >= self.settings.chunk_size {
            self.flush_all();
            return;
        }

        if let Some(idx) = self.text.rfind('\n') {
            let head: String = self.text.drain(..=idx).collect();
            self.deliver(&head);
        }

        self.flush_if_stale();
    }

    fn flush_if_stale(&mut self) {
        if !self.text.is_empty() && self.last_flush.elapsed() >= self.settings.flush_interval {
            self.flush_all();
        }
    }

    fn flush_all(&mut self) {
        if !self.text.is_empty() {
            let all = std::mem::take(&mut self.text);
            self.deliver(&all);
        }
    }

    /// Flush everything, including an undecodable tail, exactly once.
    fn finish(&mut self) {
        if !self.pending.is_empty() {
            let tail = std::mem::take(&mut self.pending);
            self.text.push_str(&String::from_utf8_lossy(&tail));
        }
        self.flush_all();
    }

    fn deliver(&mut self, text: &str) {
        self.last_flush = Instant::now();
        let clean = text.replace('\r', "");
        if clean.is_empty() {
            return;
        }
        self.sink.write(&format!("{}{}", self.prefix, clean));
        self.summary.chunks += 1;
    }

    fn report_error(&mut self, e: &io::Error) {
        warn!(prefix = %self.prefix, error = %e, "reading process output failed");
        self.summary.failed = true;
        self.sink.write(&format!("stream error: {e}\n"));
    }
}

/// Wait for stream tasks to finish, up to `limit` for all of them together.
///
/// Returns false if the limit was hit; the remaining tasks are aborted so no
/// output is delivered after the caller moves on.
pub async fn drain(mut tasks: Vec<JoinHandle<StreamSummary>>, limit: Duration) -> bool {
    let joined = timeout(limit, async {
        for task in tasks.iter_mut() {
            if let Err(e) = task.await {
                debug!(error = %e, "stream task did not complete");
            }
        }
    })
    .await;

    if joined.is_err() {
        for task in &tasks {
            task.abort();
        }
        return false;
    }
    true
}

/// Append `bytes` to `out` as UTF-8, replacing invalid sequences with U+FFFD.
///
/// An incomplete sequence at the very end is kept in `pending` and completed
/// by the next call.
fn decode_into(pending: &mut Vec<u8>, bytes: &[u8], out: &mut String) {
    pending.extend_from_slice(bytes);

    loop {
        match std::str::from_utf8(&pending[..]) {
            Ok(s) => {
                out.push_str(s);
                pending.clear();
                return;
            }
            Err(e) => {
                let valid = e.valid_up_to();
                out.push_str(std::str::from_utf8(&pending[..valid]).unwrap_or_default());
                match e.error_len() {
                    Some(len) => {
                        out.push(char::REPLACEMENT_CHARACTER);
                        pending.drain(..valid + len);
                    }
                    None => {
                        pending.drain(..valid);
                        return;
                    }
                }
            }
        }
    }
}
