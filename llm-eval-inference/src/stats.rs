//! In-process success and latency counters, keyed by provider binding name.

use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use crate::error::FailureClass;

#[derive(Debug, Clone, Copy, Default)]
struct Counters {
    successes: u64,
    timeouts: u64,
    connection_failures: u64,
    other_failures: u64,
    total_latency_ms: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ProviderStatsSnapshot {
    pub calls: u64,
    pub successes: u64,
    pub timeouts: u64,
    pub connection_failures: u64,
    pub other_failures: u64,
    pub success_rate: f64,
    /// Mean latency of successful calls.
    pub avg_latency_ms: f64,
}

#[derive(Debug, Default)]
pub struct ProviderStats {
    providers: DashMap<String, Counters>,
}

impl ProviderStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_success(&self, provider: &str, latency_ms: u64) {
        let mut entry = self.providers.entry(provider.to_string()).or_default();
        entry.successes += 1;
        entry.total_latency_ms += latency_ms;
    }

    pub fn record_failure(&self, provider: &str, class: FailureClass) {
        let mut entry = self.providers.entry(provider.to_string()).or_default();
        match class {
            FailureClass::Timeout => entry.timeouts += 1,
            FailureClass::Connection => entry.connection_failures += 1,
            FailureClass::Other => entry.other_failures += 1,
        }
    }

    pub fn snapshot(&self, provider: &str) -> Option<ProviderStatsSnapshot> {
        self.providers.get(provider).map(|c| {
            let failures = c.timeouts + c.connection_failures + c.other_failures;
            let calls = c.successes + failures;
            ProviderStatsSnapshot {
                calls,
                successes: c.successes,
                timeouts: c.timeouts,
                connection_failures: c.connection_failures,
                other_failures: c.other_failures,
                success_rate: if calls == 0 {
                    0.0
                } else {
                    c.successes as f64 / calls as f64
                },
                avg_latency_ms: if c.successes == 0 {
                    0.0
                } else {
                    c.total_latency_ms as f64 / c.successes as f64
                },
            }
        })
    }

    pub fn providers(&self) -> Vec<String> {
        let mut names: Vec<String> = self.providers.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }
}
