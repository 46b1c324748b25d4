//! Scenario report records.

use std::collections::BTreeMap;
use std::time::Duration;

use serde::Serialize;

/// Outcome of one scenario on one backend.
#[derive(Debug, Clone, Serialize)]
pub struct ScenarioReport {
    pub scenario: &'static str,
    pub backend: &'static str,
    pub ok: bool,
    pub elapsed_ns: u64,
    /// Scenario-specific measurements, keyed by name.
    pub metrics: BTreeMap<&'static str, u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure: Option<String>,
}

impl ScenarioReport {
    #[must_use]
    pub fn new(scenario: &'static str, backend: monitorkit_core::Backend) -> Self {
        Self {
            scenario,
            backend: backend.as_str(),
            ok: true,
            elapsed_ns: 0,
            metrics: BTreeMap::new(),
            failure: None,
        }
    }

    #[must_use]
    pub fn with_elapsed(mut self, elapsed: Duration) -> Self {
        self.elapsed_ns = duration_ns(elapsed);
        self
    }

    #[must_use]
    pub fn metric(mut self, name: &'static str, value: u64) -> Self {
        self.metrics.insert(name, value);
        self
    }

    /// Record a failed check. The first failure is kept.
    #[must_use]
    pub fn check(mut self, passed: bool, failure: impl FnOnce() -> String) -> Self {
        if !passed && self.ok {
            self.ok = false;
            self.failure = Some(failure());
        }
        self
    }

    pub fn to_jsonl(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

pub(crate) fn duration_ns(duration: Duration) -> u64 {
    u64::try_from(duration.as_nanos()).unwrap_or(u64::MAX)
}

/// Nearest-rank percentile over an ascending slice.
pub(crate) fn percentile(sorted: &[u64], pct: f64) -> u64 {
    if sorted.is_empty() {
        return 0;
    }
    let rank = ((pct / 100.0) * (sorted.len() - 1) as f64).round() as usize;
    sorted[rank.min(sorted.len() - 1)]
}
