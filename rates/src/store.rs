//! Authorized access to the rate log.

use std::sync::Arc;

use fxbroker_common::{CapabilityQuery, CurrencyCode, Party};
use parking_lot::Mutex;
use rust_decimal::Decimal;
use tracing::{info, instrument};

use crate::authorization::require_broker;
use crate::entry::{RateEntry, RatePair};
use crate::error::RateResult;
use crate::log::{RateLog, SnapshotLog};
use crate::table::RateTable;

/// Rate store backed by an append-only [`RateLog`].
///
/// Every public entry point takes the calling party and a capability view and
/// refuses callers that do not advertise the broker capability, before the log
/// is touched. Writers are serialized so that two local read-modify-append
/// cycles cannot lose each other's update.
#[derive(Debug)]
pub struct RateStore {
    log: RateLog,
    write_lock: Mutex<()>,
}

impl RateStore {
    /// Create a store over the rates key of `log`.
    pub fn new(log: Arc<dyn SnapshotLog>) -> Self {
        Self::from_log(RateLog::new(log))
    }

    pub fn from_log(log: RateLog) -> Self {
        Self {
            log,
            write_lock: Mutex::new(()),
        }
    }

    /// Insert or replace a rate and append the resulting snapshot.
    #[instrument(skip_all, fields(caller = %caller, entry = %entry))]
    pub fn upsert_rate<Q>(&self, directory: &Q, caller: &Party, entry: RateEntry) -> RateResult<RateTable>
    where
        Q: CapabilityQuery + ?Sized,
    {
        require_broker(directory, caller)?;

        let _guard = self.write_lock.lock();
        let table = self.log.current_snapshot().upsert(entry);
        let sequence = self.log.append(&table)?;

        info!(sequence, entries = table.len(), "Rate table updated");
        Ok(table)
    }

    /// Remove a pair and append the resulting snapshot.
    ///
    /// A snapshot is appended even when the pair was absent.
    #[instrument(skip_all, fields(caller = %caller, pair = %pair))]
    pub fn remove_rate<Q>(&self, directory: &Q, caller: &Party, pair: &RatePair) -> RateResult<RateTable>
    where
        Q: CapabilityQuery + ?Sized,
    {
        require_broker(directory, caller)?;

        let _guard = self.write_lock.lock();
        let mut table = self.log.current_snapshot();
        let removed = table.remove(pair);
        let sequence = self.log.append(&table)?;

        info!(sequence, removed = removed.is_some(), "Rate removed");
        Ok(table)
    }

    /// The current rate table.
    pub fn rates<Q>(&self, directory: &Q, caller: &Party) -> RateResult<RateTable>
    where
        Q: CapabilityQuery + ?Sized,
    {
        require_broker(directory, caller)?;
        Ok(self.log.current_snapshot())
    }

    /// Rate for `from`/`to` in the current table.
    pub fn lookup_rate<Q>(
        &self,
        directory: &Q,
        caller: &Party,
        from: &CurrencyCode,
        to: &CurrencyCode,
    ) -> RateResult<Decimal>
    where
        Q: CapabilityQuery + ?Sized,
    {
        require_broker(directory, caller)?;
        self.log.current_snapshot().lookup_rate(from, to)
    }

    /// Every parseable snapshot, oldest first.
    pub fn history<Q>(&self, directory: &Q, caller: &Party) -> RateResult<Vec<RateTable>>
    where
        Q: CapabilityQuery + ?Sized,
    {
        require_broker(directory, caller)?;
        Ok(self.log.history())
    }
}
