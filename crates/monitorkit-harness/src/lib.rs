//! End-to-end scenario harness for monitorkit.
//!
//! Each scenario drives real threads through a [`monitorkit_core::Monitor`]
//! and returns a [`ScenarioReport`] that the `harness` binary prints as one
//! JSONL line.

#![forbid(unsafe_code)]

pub mod report;
pub mod scenarios;

use thiserror::Error;

pub use report::ScenarioReport;
pub use scenarios::{Scenario, run_scenario};

/// Harness-level failures. Scenario check failures are not errors: they are
/// reported with `ok: false`.
#[derive(Debug, Error)]
pub enum HarnessError {
    #[error(transparent)]
    Init(#[from] monitorkit_core::ResourceInitError),
    #[error("unknown backend '{0}', expected native|portable|both")]
    UnknownBackend(String),
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),
    #[error("scenario thread panicked: {0}")]
    ThreadPanicked(&'static str),
    #[error("failed to serialize report: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Parse a `--backend` value; `both` selects every backend.
pub fn parse_backends(value: &str) -> Result<Vec<monitorkit_core::Backend>, HarnessError> {
    use monitorkit_core::Backend;
    if value.eq_ignore_ascii_case("both") || value.eq_ignore_ascii_case("all") {
        return Ok(vec![Backend::Native, Backend::Portable]);
    }
    Backend::from_str_loose(value)
        .map(|backend| vec![backend])
        .ok_or_else(|| HarnessError::UnknownBackend(value.to_string()))
}
