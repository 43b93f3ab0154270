//! FxBroker Common Types
//!
//! This crate contains shared types used across the FX broker protocol,
//! including party identifiers, monetary types, capabilities, the directory
//! snapshot and the error taxonomy.

pub mod capability;
pub mod directory;
pub mod error;
pub mod identifiers;
pub mod monetary;
pub mod time;

pub use capability::*;
pub use directory::*;
pub use error::*;
pub use identifiers::*;
pub use monetary::*;
pub use time::*;
