//! Process-wide logging switches.
//!
//! Two independent switches control the logging collaborator:
//! - `MONITORKIT_DEBUG`: debug records (`log_debug!`, `log_debug_t!`). Off by default.
//! - `MONITORKIT_LOG_OPER`: operational records (`log_oper!`). On by default.
//!
//! Error and fatal records ignore both switches. The configuration is resolved
//! once, either from the environment on first use or from an explicit
//! [`init_log_config`] call at startup, and is immutable afterwards.

use std::sync::atomic::{AtomicU8, Ordering};

/// Logging switches, fixed for the lifetime of the process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LogConfig {
    /// Emit debug records.
    pub debug: bool,
    /// Emit operational records.
    pub operational: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            debug: false,
            operational: true,
        }
    }
}

impl LogConfig {
    /// Read both switches from the environment, falling back to defaults.
    #[must_use]
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            debug: std::env::var("MONITORKIT_DEBUG")
                .ok()
                .and_then(|raw| parse_switch(&raw))
                .unwrap_or(defaults.debug),
            operational: std::env::var("MONITORKIT_LOG_OPER")
                .ok()
                .and_then(|raw| parse_switch(&raw))
                .unwrap_or(defaults.operational),
        }
    }

    const fn to_bits(self) -> u8 {
        let mut bits = STATE_RESOLVED;
        if self.debug {
            bits |= FLAG_DEBUG;
        }
        if self.operational {
            bits |= FLAG_OPER;
        }
        bits
    }

    const fn from_bits(bits: u8) -> Self {
        Self {
            debug: bits & FLAG_DEBUG != 0,
            operational: bits & FLAG_OPER != 0,
        }
    }
}

/// Parse an on/off switch (case-insensitive). Unknown values yield `None`.
#[must_use]
pub fn parse_switch(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "on" | "true" | "yes" | "enabled" => Some(true),
        "0" | "off" | "false" | "no" | "disabled" => Some(false),
        _ => None,
    }
}

// Atomic cache: 0=unresolved, 255=resolving, otherwise STATE_RESOLVED | flags.
// A reentrant read during resolution (the log sink reporting on itself) must
// not block, so this is a CAS state machine rather than a OnceLock.
static CACHED_CONFIG: AtomicU8 = AtomicU8::new(STATE_UNRESOLVED);

const STATE_UNRESOLVED: u8 = 0;
const STATE_RESOLVING: u8 = 255;
const STATE_RESOLVED: u8 = 0b1000_0000;
const FLAG_DEBUG: u8 = 0b0000_0001;
const FLAG_OPER: u8 = 0b0000_0010;

/// Get the process logging configuration (resolves from the environment on
/// first call, cached thereafter).
#[must_use]
pub fn log_config() -> LogConfig {
    let cached = CACHED_CONFIG.load(Ordering::Acquire);
    if cached != STATE_UNRESOLVED && cached != STATE_RESOLVING {
        return LogConfig::from_bits(cached);
    }
    if cached == STATE_RESOLVING {
        return LogConfig::default();
    }

    if CACHED_CONFIG
        .compare_exchange(
            STATE_UNRESOLVED,
            STATE_RESOLVING,
            Ordering::SeqCst,
            Ordering::Relaxed,
        )
        .is_err()
    {
        let v = CACHED_CONFIG.load(Ordering::Acquire);
        return if v != STATE_UNRESOLVED && v != STATE_RESOLVING {
            LogConfig::from_bits(v)
        } else {
            LogConfig::default()
        };
    }

    let config = LogConfig::from_env();
    CACHED_CONFIG.store(config.to_bits(), Ordering::Release);
    config
}

/// Fix the process logging configuration explicitly.
///
/// Returns `false` (and leaves the existing configuration in place) when the
/// configuration was already resolved, either by an earlier call or by a log
/// record emitted before this one.
pub fn init_log_config(config: LogConfig) -> bool {
    CACHED_CONFIG
        .compare_exchange(
            STATE_UNRESOLVED,
            config.to_bits(),
            Ordering::SeqCst,
            Ordering::Relaxed,
        )
        .is_ok()
}

/// Test hook: swap the cached configuration, returning the previous raw state.
#[doc(hidden)]
pub fn swap_log_config_for_tests(config: Option<LogConfig>) -> u8 {
    let raw = config.map_or(STATE_UNRESOLVED, LogConfig::to_bits);
    CACHED_CONFIG.swap(raw, Ordering::SeqCst)
}

/// Test hook: restore a raw state returned by [`swap_log_config_for_tests`].
#[doc(hidden)]
pub fn restore_log_config_for_tests(raw: u8) {
    CACHED_CONFIG.store(raw, Ordering::SeqCst);
}

/// Serializes unit tests that swap the process-wide configuration.
#[cfg(test)]
pub(crate) fn config_test_lock() -> parking_lot::MutexGuard<'static, ()> {
    static LOCK: parking_lot::Mutex<()> = parking_lot::Mutex::new(());
    LOCK.lock()
}
