//! Structured JSONL event logging for the pipeline.
//!
//! The core never writes to stdout or a file directly: callers inject a
//! [`LogEmitter`] and the pipeline calls it with one [`LogEntry`] per notable
//! event. [`NullEmitter`] is the default so constructing a pipeline never forces
//! I/O on a caller that doesn't want it.

use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

/// One structured log line. `fields` carries event-specific detail
/// (`day`, `metric`, `epsilon`, ...) as a JSON object.
#[derive(Debug, Clone, Serialize)]
pub struct LogEntry {
    pub level: LogLevel,
    pub event: &'static str,
    pub fields: serde_json::Value,
}

impl LogEntry {
    pub fn new(level: LogLevel, event: &'static str, fields: serde_json::Value) -> Self {
        Self { level, event, fields }
    }

    pub fn to_jsonl(&self) -> String {
        serde_json::to_string(self).expect("LogEntry always serializes")
    }
}

pub trait LogEmitter: Send + Sync {
    fn emit(&self, entry: LogEntry);
}

/// Discards every entry. The pipeline's default so constructing one never forces
/// I/O on a caller that hasn't configured a sink.
pub struct NullEmitter;

impl LogEmitter for NullEmitter {
    fn emit(&self, _entry: LogEntry) {}
}

/// Buffers entries in memory, for tests that assert on emitted events.
#[derive(Default)]
pub struct MemoryEmitter {
    entries: parking_lot::Mutex<Vec<LogEntry>>,
}

impl MemoryEmitter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> Vec<LogEntry> {
        self.entries.lock().clone()
    }
}

impl LogEmitter for MemoryEmitter {
    fn emit(&self, entry: LogEntry) {
        self.entries.lock().push(entry);
    }
}
