//! Simulation metrics.

use std::collections::BTreeMap;

/// Outcome key under which settled exchanges are recorded.
pub const SETTLED: &str = "SETTLED";

/// Latency distribution of one exchange outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LatencySummary {
    pub count: usize,
    pub mean_ms: u64,
    pub p99_ms: u64,
    pub max_ms: u64,
}

impl LatencySummary {
    fn of(samples: &[u64]) -> Option<Self> {
        if samples.is_empty() {
            return None;
        }

        let mut sorted = samples.to_vec();
        sorted.sort_unstable();
        let count = sorted.len();
        let p99 = (count * 99 / 100).min(count - 1);

        Some(Self {
            count,
            mean_ms: sorted.iter().sum::<u64>() / count as u64,
            p99_ms: sorted[p99],
            max_ms: sorted[count - 1],
        })
    }
}

/// Exchange counts and latencies, keyed by outcome: [`SETTLED`] or the
/// error code the initiator saw.
///
/// A timed-out exchange takes the whole initiator timeout, so failure
/// latencies are kept apart from settled ones.
#[derive(Debug, Clone, Default)]
pub struct SimulationMetrics {
    pub total_exchanges: u64,
    pub successful_exchanges: u64,
    pub failed_exchanges: u64,
    latencies: BTreeMap<&'static str, Vec<u64>>,
}

impl SimulationMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an exchange that returned a payout record.
    pub fn record_success(&mut self, latency_ms: u64) {
        self.successful_exchanges += 1;
        self.record(SETTLED, latency_ms);
    }

    /// Record an exchange that failed with `error_code`.
    pub fn record_failure(&mut self, error_code: &'static str, latency_ms: u64) {
        self.failed_exchanges += 1;
        self.record(error_code, latency_ms);
    }

    fn record(&mut self, outcome: &'static str, latency_ms: u64) {
        self.total_exchanges += 1;
        self.latencies.entry(outcome).or_default().push(latency_ms);
    }

    /// Exchanges that ended with `outcome`.
    pub fn count(&self, outcome: &str) -> usize {
        self.latencies.get(outcome).map_or(0, Vec::len)
    }

    /// Failure counts per error code.
    pub fn failures_by_code(&self) -> impl Iterator<Item = (&'static str, usize)> + '_ {
        self.latencies
            .iter()
            .filter(|(outcome, _)| **outcome != SETTLED)
            .map(|(code, samples)| (*code, samples.len()))
    }

    /// Latency distribution of `outcome`, if any exchange ended that way.
    pub fn latency(&self, outcome: &str) -> Option<LatencySummary> {
        self.latencies
            .get(outcome)
            .and_then(|samples| LatencySummary::of(samples))
    }

    /// Latency distribution of every outcome seen.
    pub fn latency_by_outcome(&self) -> impl Iterator<Item = (&'static str, LatencySummary)> + '_ {
        self.latencies
            .iter()
            .filter_map(|(outcome, samples)| LatencySummary::of(samples).map(|s| (*outcome, s)))
    }

    pub fn success_rate(&self) -> f64 {
        if self.total_exchanges == 0 {
            return 0.0;
        }

        self.successful_exchanges as f64 / self.total_exchanges as f64
    }
}
