//! Per-chain log buffers
//!
//! Every chain gets one [`LogSink`]: an append-only text buffer capped at
//! `max_chars`. When the cap is exceeded the oldest output is dropped, keeping
//! roughly the last `retain_chars` starting on a line boundary. Sinks outlive
//! the nodes writing to them, so a restarted chain keeps its history.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::broadcast;

use crate::config::LogConfig;

/// Default buffer cap
pub const DEFAULT_MAX_CHARS: usize = 200_000;

/// Default amount of output kept after a trim
pub const DEFAULT_RETAIN_CHARS: usize = 190_000;

/// Prefix written in front of a trimmed buffer
pub const TRIM_MARKER: &str = "...[older logs trimmed]...\n\n";

/// Live subscribers lagging more than this many chunks miss output
const LIVE_CAPACITY: usize = 1024;

/// Capped text buffer for one chain
pub struct LogSink {
    chain: String,
    buffer: Mutex<String>,
    max_chars: usize,
    retain_chars: usize,
    live: broadcast::Sender<String>,
}

impl LogSink {
    pub fn new(chain: impl Into<String>, max_chars: usize, retain_chars: usize) -> Self {
        let (live, _) = broadcast::channel(LIVE_CAPACITY);
        Self {
            chain: chain.into(),
            buffer: Mutex::new(String::new()),
            max_chars,
            retain_chars: retain_chars.min(max_chars),
            live,
        }
    }

    /// Chain this sink belongs to
    pub fn chain(&self) -> &str {
        &self.chain
    }

    /// Append raw text
    pub fn append(&self, text: &str) {
        {
            let mut buffer = self.buffer.lock().unwrap_or_else(PoisonError::into_inner);
            buffer.push_str(text);
            if buffer.len() > self.max_chars {
                trim_to_tail(&mut buffer, self.retain_chars);
            }
        }
        // No receivers is fine
        let _ = self.live.send(text.to_string());
    }

    /// Append one line of text
    pub fn line(&self, line: impl AsRef<str>) {
        let line = line.as_ref();
        let mut text = String::with_capacity(line.len() + 1);
        text.push_str(line);
        text.push('\n');
        self.append(&text);
    }

    /// Snapshot of the buffer
    pub fn contents(&self) -> String {
        self.buffer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn len(&self) -> usize {
        self.buffer.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Receive text as it is appended
    pub fn subscribe(&self) -> broadcast::Receiver<String> {
        self.live.subscribe()
    }
}

/// Keep the last `retain` bytes, realigned to the next line start
fn trim_to_tail(buffer: &mut String, retain: usize) {
    let mut start = buffer.len().saturating_sub(retain);
    while !buffer.is_char_boundary(start) {
        start += 1;
    }

    let mut tail = &buffer[start..];
    if let Some(newline) = tail.find('\n') {
        if newline > 0 {
            tail = &tail[newline + 1..];
        }
    }

    let mut trimmed = String::with_capacity(TRIM_MARKER.len() + tail.len());
    trimmed.push_str(TRIM_MARKER);
    trimmed.push_str(tail);
    *buffer = trimmed;
}

/// Lazily created sinks keyed by chain name
pub struct LogBook {
    sinks: Mutex<HashMap<String, Arc<LogSink>>>,
    max_chars: usize,
    retain_chars: usize,
}

impl LogBook {
    pub fn new(config: &LogConfig) -> Self {
        Self {
            sinks: Mutex::new(HashMap::new()),
            max_chars: config.max_chars,
            retain_chars: config.retain_chars,
        }
    }

    /// Get the sink for a chain, creating it on first use
    pub fn sink(&self, chain: &str) -> Arc<LogSink> {
        let mut sinks = self.sinks.lock().unwrap_or_else(PoisonError::into_inner);
        sinks
            .entry(chain.to_string())
            .or_insert_with(|| Arc::new(LogSink::new(chain, self.max_chars, self.retain_chars)))
            .clone()
    }

    /// Get the sink for a chain only if something was ever logged for it
    pub fn get(&self, chain: &str) -> Option<Arc<LogSink>> {
        self.sinks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(chain)
            .cloned()
    }
}

impl Default for LogBook {
    fn default() -> Self {
        Self::new(&LogConfig::default())
    }
}
