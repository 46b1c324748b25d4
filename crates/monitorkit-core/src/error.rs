//! Error taxonomy.
//!
//! [`ResourceInitError`] is the only recoverable error: it is returned from
//! monitor construction after any partially acquired resource has been torn
//! down. Everything else is a [`FatalError`] and goes through [`fatal`], which
//! logs an always-on diagnostic and aborts.

use std::fmt;
use std::panic::Location;

use serde::Serialize;
use thiserror::Error;

use crate::log::{self, LogEntry, LogLevel};

/// Platform resource whose initialization failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum InitStage {
    /// The mutual-exclusion lock.
    Lock,
    /// Attribute object used to configure the condition clock.
    ConditionAttr,
    /// The condition variable.
    Condition,
}

impl fmt::Display for InitStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Lock => "lock",
            Self::ConditionAttr => "condition attribute",
            Self::Condition => "condition",
        })
    }
}

/// The platform refused to allocate the lock or condition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("monitor {stage} initialization failed (errno {errno})")]
pub struct ResourceInitError {
    pub stage: InitStage,
    /// errno-style code reported by the platform primitive.
    pub errno: i32,
}

impl ResourceInitError {
    #[must_use]
    pub const fn new(stage: InitStage, errno: i32) -> Self {
        Self { stage, errno }
    }
}

/// Misuse of the monitor calling convention.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error, Serialize)]
#[serde(tag = "violation", rename_all = "snake_case")]
pub enum ContractViolation {
    #[error("unlock called by a thread that does not hold the lock")]
    UnlockWithoutLock,
    #[error("wait called by a thread that does not hold the lock")]
    WaitWithoutLock,
    #[error("notify called by a thread that does not hold the lock")]
    NotifyWithoutLock,
    #[error("notify_all called by a thread that does not hold the lock")]
    NotifyAllWithoutLock,
    #[error("negative wait timeout {timeout_ms}ms")]
    NegativeTimeout { timeout_ms: i64 },
    #[error("monitor initialized twice")]
    DoubleInit,
    #[error("monitor destroyed twice")]
    DoubleDestroy,
    #[error("monitor destroyed while its lock is held")]
    DestroyWhileHeld,
    #[error("operation on a monitor that is not initialized")]
    NotInitialized,
}

/// Unrecoverable failures. Routed through [`fatal`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum FatalError {
    #[error("contract violation: {0}")]
    ContractViolation(#[from] ContractViolation),
    #[error("platform primitive failure: {op} returned errno {errno}")]
    PlatformPrimitiveFailure { op: &'static str, errno: i32 },
}

impl FatalError {
    /// Stable event name used in the fatal log record.
    #[must_use]
    pub const fn event(&self) -> &'static str {
        match self {
            Self::ContractViolation(_) => "contract_violation",
            Self::PlatformPrimitiveFailure { .. } => "platform_primitive_failure",
        }
    }

    fn details(&self) -> serde_json::Value {
        match self {
            Self::ContractViolation(violation) => {
                serde_json::to_value(violation).unwrap_or(serde_json::Value::Null)
            }
            Self::PlatformPrimitiveFailure { op, errno } => {
                serde_json::json!({ "op": op, "errno": errno })
            }
        }
    }
}

/// Log `err` with the caller's location and abort the process.
///
/// The record is emitted regardless of the debug and operational switches.
#[track_caller]
#[cold]
pub fn fatal(err: FatalError) -> ! {
    let location = Location::caller();
    let entry = LogEntry::new(LogLevel::Fatal, err.event())
        .with_location(location.file(), location.line())
        .with_message(format!("Going to abort {err}"))
        .with_details(err.details());
    log::emit(&entry);
    std::process::abort()
}

/// Shorthand for a failed platform call after initialization.
#[track_caller]
#[cold]
pub(crate) fn primitive_failure(op: &'static str, errno: i32) -> ! {
    fatal(FatalError::PlatformPrimitiveFailure { op, errno })
}
