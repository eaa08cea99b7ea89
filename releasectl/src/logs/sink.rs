//! Operator-facing execution log
//!
//! Every orchestration step writes leveled, timestamped lines to a [`LogSink`].
//! The sink travels inside a [`LogContext`], which is passed by reference to
//! each step and never mutated: switching to a new section produces a new
//! context.

use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use colored::Colorize;
use serde::Serialize;

use crate::logs::LogLevel;

/// One line of execution log
#[derive(Debug, Clone, Serialize)]
pub struct LogLine {
    pub timestamp: DateTime<Utc>,
    pub level: LogLevel,
    pub section: String,
    pub message: String,
}

/// Destination for execution log lines
pub trait LogSink: Send + Sync {
    fn save_line(&self, line: LogLine);
}

/// Forwards lines to `tracing`
#[derive(Debug, Default)]
pub struct TracingLogSink;

impl LogSink for TracingLogSink {
    fn save_line(&self, line: LogLine) {
        let section = line.section.as_str();
        match line.level {
            LogLevel::Trace => tracing::trace!(section, "{}", line.message),
            LogLevel::Debug => tracing::debug!(section, "{}", line.message),
            LogLevel::Info => tracing::info!(section, "{}", line.message),
            LogLevel::Warn => tracing::warn!(section, "{}", line.message),
            LogLevel::Error => tracing::error!(section, "{}", line.message),
        }
    }
}

/// Colored lines on stderr, for interactive runs
#[derive(Debug, Default)]
pub struct ConsoleLogSink;

impl LogSink for ConsoleLogSink {
    fn save_line(&self, line: LogLine) {
        let level = match line.level {
            LogLevel::Trace | LogLevel::Debug => line.level.to_string().dimmed(),
            LogLevel::Info => line.level.to_string().green(),
            LogLevel::Warn => line.level.to_string().yellow(),
            LogLevel::Error => line.level.to_string().red().bold(),
        };
        eprintln!(
            "{} {:>5} [{}] {}",
            line.timestamp.format("%H:%M:%S%.3f").to_string().dimmed(),
            level,
            line.section.cyan(),
            line.message
        );
    }
}

/// Keeps every line in memory
#[derive(Debug, Default)]
pub struct MemoryLogSink {
    lines: Mutex<Vec<LogLine>>,
}

impl MemoryLogSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lines(&self) -> Vec<LogLine> {
        self.lines.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// True when any line at `level` contains `needle`
    pub fn contains(&self, level: LogLevel, needle: &str) -> bool {
        self.lines
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .any(|l| l.level == level && l.message.contains(needle))
    }
}

impl LogSink for MemoryLogSink {
    fn save_line(&self, line: LogLine) {
        self.lines
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(line);
    }
}

/// Sink plus the section lines are attributed to
#[derive(Clone)]
pub struct LogContext {
    sink: Arc<dyn LogSink>,
    section: Arc<str>,
}

impl LogContext {
    pub fn new(sink: Arc<dyn LogSink>, section: &str) -> Self {
        Self {
            sink,
            section: Arc::from(section),
        }
    }

    /// Context backed by `tracing` only
    pub fn tracing(section: &str) -> Self {
        Self::new(Arc::new(TracingLogSink), section)
    }

    /// Same sink, different section
    pub fn with_section(&self, section: &str) -> Self {
        Self {
            sink: self.sink.clone(),
            section: Arc::from(section),
        }
    }

    pub fn section(&self) -> &str {
        &self.section
    }

    pub fn log(&self, level: LogLevel, message: impl Into<String>) {
        self.sink.save_line(LogLine {
            timestamp: Utc::now(),
            level,
            section: self.section.to_string(),
            message: message.into(),
        });
    }

    pub fn debug(&self, message: impl Into<String>) {
        self.log(LogLevel::Debug, message);
    }

    pub fn info(&self, message: impl Into<String>) {
        self.log(LogLevel::Info, message);
    }

    pub fn warn(&self, message: impl Into<String>) {
        self.log(LogLevel::Warn, message);
    }

    pub fn error(&self, message: impl Into<String>) {
        self.log(LogLevel::Error, message);
    }
}

impl std::fmt::Debug for LogContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LogContext")
            .field("section", &self.section)
            .finish()
    }
}
