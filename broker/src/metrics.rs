//! Metrics collection for broker monitoring.

use std::sync::atomic::{AtomicU64, Ordering};

/// Broker metrics.
#[derive(Debug, Default)]
pub struct BrokerMetrics {
    /// Exchange sessions accepted.
    pub exchanges_received: AtomicU64,
    /// Exchanges that paid out.
    pub exchanges_completed: AtomicU64,
    /// Exchanges that failed.
    pub exchanges_failed: AtomicU64,
    /// Exchanges in progress.
    pub exchanges_active: AtomicU64,
    /// Sum of payout quantities, across currencies.
    pub payout_volume: AtomicU64,
    /// Rate table updates appended.
    pub rate_updates: AtomicU64,
}

impl BrokerMetrics {
    /// Create new metrics instance.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an accepted exchange session.
    pub fn exchange_received(&self) {
        self.exchanges_received.fetch_add(1, Ordering::Relaxed);
        self.exchanges_active.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a completed payout.
    pub fn exchange_completed(&self, payout: u64) {
        self.exchanges_completed.fetch_add(1, Ordering::Relaxed);
        self.payout_volume.fetch_add(payout, Ordering::Relaxed);
        self.exchanges_active.fetch_sub(1, Ordering::Relaxed);
    }

    /// Record a failed exchange.
    pub fn exchange_failed(&self) {
        self.exchanges_failed.fetch_add(1, Ordering::Relaxed);
        self.exchanges_active.fetch_sub(1, Ordering::Relaxed);
    }

    /// Record a rate table update.
    pub fn rate_updated(&self) {
        self.rate_updates.fetch_add(1, Ordering::Relaxed);
    }

    /// Get current metrics snapshot.
    pub fn snapshot(&self) -> BrokerMetricsSnapshot {
        BrokerMetricsSnapshot {
            exchanges_received: self.exchanges_received.load(Ordering::Relaxed),
            exchanges_completed: self.exchanges_completed.load(Ordering::Relaxed),
            exchanges_failed: self.exchanges_failed.load(Ordering::Relaxed),
            exchanges_active: self.exchanges_active.load(Ordering::Relaxed),
            payout_volume: self.payout_volume.load(Ordering::Relaxed),
            rate_updates: self.rate_updates.load(Ordering::Relaxed),
        }
    }

    /// Export metrics in Prometheus format.
    pub fn to_prometheus(&self) -> String {
        let snapshot = self.snapshot();
        format!(
            r#"# HELP fxbroker_exchanges_received Total exchange sessions accepted
# TYPE fxbroker_exchanges_received counter
fxbroker_exchanges_received {}

# HELP fxbroker_exchanges_completed Total exchanges paid out
# TYPE fxbroker_exchanges_completed counter
fxbroker_exchanges_completed {}

# HELP fxbroker_exchanges_failed Total failed exchanges
# TYPE fxbroker_exchanges_failed counter
fxbroker_exchanges_failed {}

# HELP fxbroker_exchanges_active Current exchanges in progress
# TYPE fxbroker_exchanges_active gauge
fxbroker_exchanges_active {}

# HELP fxbroker_payout_volume Total quantity paid out
# TYPE fxbroker_payout_volume counter
fxbroker_payout_volume {}

# HELP fxbroker_rate_updates Total rate table snapshots appended
# TYPE fxbroker_rate_updates counter
fxbroker_rate_updates {}
"#,
            snapshot.exchanges_received,
            snapshot.exchanges_completed,
            snapshot.exchanges_failed,
            snapshot.exchanges_active,
            snapshot.payout_volume,
            snapshot.rate_updates,
        )
    }
}

/// Snapshot of metrics at a point in time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerMetricsSnapshot {
    pub exchanges_received: u64,
    pub exchanges_completed: u64,
    pub exchanges_failed: u64,
    pub exchanges_active: u64,
    pub payout_volume: u64,
    pub rate_updates: u64,
}
