//! FxBroker Protocol
//!
//! Message types of the exchange negotiation protocol and the session
//! transport they travel over.
//!
//! A [`Session`] is a point-to-point conversation between the local node and
//! one counterparty. Messages are moved as untyped [`Payload`] values by a
//! [`SessionTransport`]; the session converts them to and from the concrete
//! [`ProtocolMessage`] types. [`LocalNetwork`] is an in-process transport for
//! simulation and tests.

pub mod local;
pub mod messages;
pub mod transport;

pub use local::{LocalNetwork, LocalTransport};
pub use messages::*;
pub use transport::{InboundSession, Session, SessionTransport};
