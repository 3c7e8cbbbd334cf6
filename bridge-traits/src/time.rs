//! Time and Logging Abstractions
//!
//! Injectable time source (cache age cutoffs, transfer-rate sampling) and the
//! sink used to mirror structured logs into the host's logging pipeline.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::SystemTime;

use crate::error::Result;

/// Time source trait
///
/// Cache eviction compares file modification times against `now()`, so tests
/// substitute a [`ManualClock`] to age entries without touching the disk.
pub trait Clock: Send + Sync {
    /// Get current UTC time
    fn now(&self) -> DateTime<Utc>;

    /// Current Unix timestamp in milliseconds
    fn unix_timestamp_millis(&self) -> i64 {
        self.now().timestamp_millis()
    }

    /// Current time as a [`SystemTime`], for comparison with file metadata.
    fn system_time(&self) -> SystemTime {
        SystemTime::from(self.now())
    }
}

/// System clock implementation using actual system time
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    /// Move the clock forward by `days`.
    pub fn advance_days(&self, days: i64) {
        if let Ok(mut now) = self.now.lock() {
            *now += ChronoDuration::days(days);
        }
    }

    pub fn advance(&self, by: std::time::Duration) {
        if let (Ok(mut now), Ok(by)) = (self.now.lock(), ChronoDuration::from_std(by)) {
            *now += by;
        }
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        self.now.lock().map(|now| *now).unwrap_or_else(|_| Utc::now())
    }
}

/// Log level
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}

/// Structured log entry forwarded to a [`LoggerSink`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEntry {
    pub level: LogLevel,
    pub timestamp: DateTime<Utc>,
    /// Target module/component
    pub target: String,
    pub message: String,
    pub fields: HashMap<String, String>,
    /// Name of the innermost active span, if any
    pub span: Option<String>,
}

impl LogEntry {
    pub fn new(level: LogLevel, target: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            level,
            timestamp: Utc::now(),
            target: target.into(),
            message: message.into(),
            fields: HashMap::new(),
            span: None,
        }
    }

    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.fields.insert(key.into(), value.into());
        self
    }

    pub fn with_span(mut self, span: impl Into<String>) -> Self {
        self.span = Some(span.into());
        self
    }
}

/// Logger sink trait
///
/// Mirrors core log events into a host logger (console, file, system log).
/// Implementations must not log request URIs or credentials; the core only
/// emits source identities, which are already credential-free.
#[async_trait::async_trait]
pub trait LoggerSink: Send + Sync {
    /// Forward a log entry to the host logging system
    async fn log(&self, entry: LogEntry) -> Result<()>;

    /// Minimum level this sink wants to receive
    fn min_level(&self) -> LogLevel {
        LogLevel::Info
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_system_clock() {
        let clock = SystemClock;
        assert!(clock.unix_timestamp_millis() > 0);
    }

    #[test]
    fn test_manual_clock_advances() {
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let clock = ManualClock::new(start);
        assert_eq!(clock.now(), start);

        clock.advance_days(3);
        assert_eq!(clock.now(), start + ChronoDuration::days(3));
        assert_eq!(clock.system_time(), SystemTime::from(start + ChronoDuration::days(3)));
    }

    #[test]
    fn test_log_entry_builder() {
        let entry = LogEntry::new(LogLevel::Info, "core_sources", "Mounted archive")
            .with_field("entries", "12")
            .with_span("ensure_mounted");

        assert_eq!(entry.level, LogLevel::Info);
        assert_eq!(entry.target, "core_sources");
        assert_eq!(entry.fields.get("entries"), Some(&"12".to_string()));
        assert_eq!(entry.span.as_deref(), Some("ensure_mounted"));
    }

    #[test]
    fn test_level_ordering() {
        assert!(LogLevel::Error > LogLevel::Warn);
        assert!(LogLevel::Trace < LogLevel::Debug);
        assert_eq!(LogLevel::Warn.as_str(), "warn");
    }
}
