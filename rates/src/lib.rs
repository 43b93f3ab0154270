//! FX Broker Rate Store
//!
//! Directional conversion rates kept as an append-only log of full table
//! snapshots.
//!
//! # Features
//!
//! - Key-only rate identity: one entry per ordered currency pair
//! - Append-only snapshot history under a well-known key
//! - Broker-only access through [`RateStore`]
//!
//! # Example
//!
//! ```rust,ignore
//! use fxbroker_rates::{MemorySnapshotLog, RateEntry, RateStore};
//! use rust_decimal_macros::dec;
//!
//! let store = RateStore::new(Arc::new(MemorySnapshotLog::new()));
//! store.upsert_rate(&directory, &broker, RateEntry::new("USD", "GBP", dec!(0.2))?)?;
//! let rate = store.lookup_rate(&directory, &broker, &usd, &gbp)?;
//! ```

pub mod authorization;
pub mod entry;
pub mod error;
pub mod log;
pub mod store;
pub mod table;

pub use authorization::{is_authorized_broker, require_broker};
pub use entry::{RateEntry, RatePair};
pub use error::{RateError, RateResult};
pub use log::{LogKey, MemorySnapshotLog, RateLog, SnapshotLog};
pub use store::RateStore;
pub use table::RateTable;
