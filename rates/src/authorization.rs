//! Rate authority checks.

use fxbroker_common::{CapabilityQuery, Party};

use crate::error::{RateError, RateResult};

/// Whether `party` advertises the broker capability in `query`.
///
/// Unknown parties are not brokers.
pub fn is_authorized_broker<Q>(query: &Q, party: &Party) -> bool
where
    Q: CapabilityQuery + ?Sized,
{
    query
        .capabilities(party)
        .map(|caps| caps.is_broker())
        .unwrap_or(false)
}

/// Fail with [`RateError::NotAuthorized`] unless `party` is a broker.
pub fn require_broker<Q>(query: &Q, party: &Party) -> RateResult<()>
where
    Q: CapabilityQuery + ?Sized,
{
    if is_authorized_broker(query, party) {
        Ok(())
    } else {
        Err(RateError::NotAuthorized(party.clone()))
    }
}
