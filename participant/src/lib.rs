//! FxBroker Participant Library
//!
//! A participant node requests exchanges as the initiator and answers
//! currency discovery requests from other initiators.

pub mod client;
pub mod config;
pub mod currency_responder;
pub mod handler;
pub mod initiator;

pub use client::{NodeState, ParticipantNode, ParticipantNodeBuilder};
pub use config::ParticipantConfig;
pub use currency_responder::{CurrencyResponder, CurrencyResponderState};
pub use handler::{spawn_serve_loop, HandlerRegistry, SessionHandler};
pub use initiator::{ExchangeInitiator, ExchangeRequest, InitiatorState};
