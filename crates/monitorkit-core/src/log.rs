//! Logging collaborator: structured JSONL diagnostics.
//!
//! Provides:
//! - [`LogEntry`]: one JSONL record (`timestamp`, `level`, `event` plus optional context).
//! - [`emit`]: writes a record to the process sink (stderr unless replaced).
//! - Level helpers behind the `log_*!` macros, gated by [`crate::config`].
//! - [`capture_logs`]: collects the records emitted by the current thread.
//!
//! The monitor only logs on failure paths; successful operations are silent.

use std::cell::RefCell;
use std::fmt;
use std::io::Write;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::config::log_config;

/// Severity tag of a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    Error,
    Fatal,
    /// Operational record, independent of the debug switch.
    Oper,
}

/// Canonical structured log record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    /// UTC wall-clock time. Plain debug records carry none.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
    pub level: LogLevel,
    pub event: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub line: Option<u32>,
    /// Caller-supplied level of a leveled debug record.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub debug_level: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl LogEntry {
    /// Create a timestamped record with required fields only.
    #[must_use]
    pub fn new(level: LogLevel, event: impl Into<String>) -> Self {
        Self {
            timestamp: Some(now_utc()),
            level,
            event: event.into(),
            file: None,
            line: None,
            debug_level: None,
            message: None,
            details: None,
        }
    }

    /// Drop the timestamp.
    #[must_use]
    pub fn without_timestamp(mut self) -> Self {
        self.timestamp = None;
        self
    }

    /// Set the source location.
    #[must_use]
    pub fn with_location(mut self, file: impl Into<String>, line: u32) -> Self {
        self.file = Some(file.into());
        self.line = Some(line);
        self
    }

    #[must_use]
    pub fn with_debug_level(mut self, level: i32) -> Self {
        self.debug_level = Some(level);
        self
    }

    #[must_use]
    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    /// Set free-form details.
    #[must_use]
    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }

    /// Serialize to a single JSONL line (no trailing newline).
    pub fn to_jsonl(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

// ---------------------------------------------------------------------------
// Sink
// ---------------------------------------------------------------------------

static SINK: Mutex<Option<Box<dyn Write + Send>>> = Mutex::new(None);

thread_local! {
    static CAPTURE: RefCell<Option<Vec<LogEntry>>> = const { RefCell::new(None) };
}

/// Replace the process sink. `None` restores stderr.
pub fn set_sink(writer: Option<Box<dyn Write + Send>>) {
    *SINK.lock() = writer;
}

/// Write one record to the current thread's capture buffer, or to the sink.
pub fn emit(entry: &LogEntry) {
    let captured = CAPTURE
        .try_with(|slot| match slot.borrow_mut().as_mut() {
            Some(buffer) => {
                buffer.push(entry.clone());
                true
            }
            None => false,
        })
        .unwrap_or(false);
    if captured {
        return;
    }

    let line = entry.to_jsonl().unwrap_or_else(|err| {
        format!(
            "{{\"level\":\"error\",\"event\":\"log_serialize_failed\",\"message\":\"{err}\"}}"
        )
    });
    // Write failures have nowhere left to be reported.
    let mut sink = SINK.lock();
    match sink.as_mut() {
        Some(writer) => {
            let _ = writeln!(writer, "{line}");
            let _ = writer.flush();
        }
        None => {
            let _ = writeln!(std::io::stderr().lock(), "{line}");
        }
    }
}

/// Run `f`, collecting every record the current thread emits instead of
/// writing it to the sink.
pub fn capture_logs<R>(f: impl FnOnce() -> R) -> (R, Vec<LogEntry>) {
    let previous = CAPTURE.with(|slot| slot.borrow_mut().replace(Vec::new()));
    let result = f();
    let captured = CAPTURE.with(|slot| {
        let mut slot = slot.borrow_mut();
        let captured = slot.take().unwrap_or_default();
        *slot = previous;
        captured
    });
    (result, captured)
}

// ---------------------------------------------------------------------------
// Level helpers (used through the macros)
// ---------------------------------------------------------------------------

/// Debug record with source location; optionally timestamped.
pub fn debug(file: &str, line: u32, timestamped: bool, args: fmt::Arguments<'_>) {
    if !log_config().debug {
        return;
    }
    let mut entry = LogEntry::new(LogLevel::Debug, args.to_string()).with_location(file, line);
    if !timestamped {
        entry = entry.without_timestamp();
    }
    emit(&entry);
}

/// Debug record emitted when `level > 0`, regardless of the debug switch.
pub fn debug_leveled(file: &str, line: u32, level: i32, args: fmt::Arguments<'_>) {
    if level <= 0 {
        return;
    }
    let entry = LogEntry::new(LogLevel::Debug, args.to_string())
        .without_timestamp()
        .with_location(file, line)
        .with_debug_level(level);
    emit(&entry);
}

/// Always-on error record.
pub fn error(file: &str, line: u32, args: fmt::Arguments<'_>) {
    emit(&LogEntry::new(LogLevel::Error, args.to_string()).with_location(file, line));
}

/// Always-on fatal record followed by process abort.
pub fn error_abort(file: &str, line: u32, args: fmt::Arguments<'_>) -> ! {
    let entry = LogEntry::new(LogLevel::Fatal, "abort")
        .with_location(file, line)
        .with_message(format!("Going to abort {args}"));
    emit(&entry);
    std::process::abort()
}

/// Operational record, gated only by the operational switch.
pub fn oper(args: fmt::Arguments<'_>) {
    if !log_config().operational {
        return;
    }
    emit(&LogEntry::new(LogLevel::Oper, args.to_string()));
}

/// Debug record with file and line.
#[macro_export]
macro_rules! log_debug {
    ($($arg:tt)+) => {
        $crate::log::debug(file!(), line!(), false, format_args!($($arg)+))
    };
}

/// Debug record with file, line, and timestamp.
#[macro_export]
macro_rules! log_debug_t {
    ($($arg:tt)+) => {
        $crate::log::debug(file!(), line!(), true, format_args!($($arg)+))
    };
}

/// Debug record emitted when the given level is positive.
#[macro_export]
macro_rules! log_debug_l {
    ($level:expr, $($arg:tt)+) => {
        $crate::log::debug_leveled(file!(), line!(), $level, format_args!($($arg)+))
    };
}

#[macro_export]
macro_rules! log_error {
    ($($arg:tt)+) => {
        $crate::log::error(file!(), line!(), format_args!($($arg)+))
    };
}

/// Error record, then abort. Never returns.
#[macro_export]
macro_rules! log_error_abort {
    ($($arg:tt)+) => {
        $crate::log::error_abort(file!(), line!(), format_args!($($arg)+))
    };
}

#[macro_export]
macro_rules! log_oper {
    ($($arg:tt)+) => {
        $crate::log::oper(format_args!($($arg)+))
    };
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// `YYYY-MM-DDTHH:MM:SS.mmmZ` without a calendar dependency.
fn now_utc() -> String {
    let duration = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default();
    let secs = duration.as_secs();
    let (year, month, day) = civil_from_days((secs / 86_400) as i64);
    format!(
        "{year:04}-{month:02}-{day:02}T{:02}:{:02}:{:02}.{:03}Z",
        (secs % 86_400) / 3600,
        (secs % 3600) / 60,
        secs % 60,
        duration.subsec_millis(),
    )
}

// Days since 1970-01-01 to a proleptic Gregorian date.
fn civil_from_days(days: i64) -> (i64, u32, u32) {
    let z = days + 719_468;
    let era = z.div_euclid(146_097);
    let doe = z.rem_euclid(146_097);
    let yoe = (doe - doe / 1460 + doe / 36_524 - doe / 146_096) / 365;
    let doy = doe - (365 * yoe + yoe / 4 - yoe / 100);
    let mp = (5 * doy + 2) / 153;
    let day = (doy - (153 * mp + 2) / 5 + 1) as u32;
    let month = (if mp < 10 { mp + 3 } else { mp - 9 }) as u32;
    let year = yoe + era * 400 + i64::from(month <= 2);
    (year, month, day)
}
