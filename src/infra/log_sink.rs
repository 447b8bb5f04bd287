use serde_json::Value;
use std::sync::Mutex;
use tracing::{debug, error, info, warn};

use crate::app::ports::{LogLevel, LogSink};

/// Forwards operator log entries into `tracing` under the `import_log` target
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingLogSink;

impl LogSink for TracingLogSink {
    fn append(&self, level: LogLevel, message: &str, context: &Value) {
        match level {
            LogLevel::Debug => debug!(target: "import_log", context = %context, "{}", message),
            LogLevel::Info => info!(target: "import_log", context = %context, "{}", message),
            LogLevel::Warn => warn!(target: "import_log", context = %context, "{}", message),
            LogLevel::Error => error!(target: "import_log", context = %context, "{}", message),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct LogEntry {
    pub level: LogLevel,
    pub message: String,
    pub context: Value,
}

/// Keeps entries in memory for inspection in tests
#[derive(Debug, Default)]
pub struct MemoryLogSink {
    entries: Mutex<Vec<LogEntry>>,
}

impl MemoryLogSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> Vec<LogEntry> {
        self.entries.lock().map(|e| e.clone()).unwrap_or_default()
    }

    pub fn entries_at(&self, level: LogLevel) -> Vec<LogEntry> {
        self.entries()
            .into_iter()
            .filter(|e| e.level == level)
            .collect()
    }
}

impl LogSink for MemoryLogSink {
    fn append(&self, level: LogLevel, message: &str, context: &Value) {
        // A poisoned sink drops the entry; logging never fails the caller
        if let Ok(mut entries) = self.entries.lock() {
            entries.push(LogEntry {
                level,
                message: message.to_string(),
                context: context.clone(),
            });
        }
    }
}
