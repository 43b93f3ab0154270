//! Dispatch of sessions opened by counterparties.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use fxbroker_common::{Party, Result};
use fxbroker_protocol::{InboundSession, MessageType, Session};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Runs the responding side of a protocol on a session opened by a
/// counterparty.
#[async_trait]
pub trait SessionHandler: Send + Sync {
    /// Handle one session. The opening message is still unread.
    async fn handle(&self, session: Session) -> Result<()>;
}

/// Maps the opening message type of a session to its responder.
#[derive(Default, Clone)]
pub struct HandlerRegistry {
    handlers: HashMap<MessageType, Arc<dyn SessionHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` for sessions opening with `opening`.
    pub fn register(mut self, opening: MessageType, handler: Arc<dyn SessionHandler>) -> Self {
        self.handlers.insert(opening, handler);
        self
    }

    pub fn handler_for(&self, opening: MessageType) -> Option<Arc<dyn SessionHandler>> {
        self.handlers.get(&opening).cloned()
    }
}

/// Serve inbound sessions until `shutdown` flips to `true` or the inbound
/// stream ends. Every accepted session runs on its own task.
pub fn spawn_serve_loop(
    party: Party,
    mut inbound: mpsc::UnboundedReceiver<InboundSession>,
    registry: HandlerRegistry,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        info!(party = %party, "Serve loop started");

        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                next = inbound.recv() => {
                    let Some(InboundSession { session, opening }) = next else {
                        break;
                    };

                    let Some(handler) = registry.handler_for(opening) else {
                        warn!(
                            party = %party,
                            session_id = %session.id(),
                            from = %session.counterparty(),
                            opening = %opening,
                            "No responder for session opening; dropped"
                        );
                        continue;
                    };

                    debug!(party = %party, session_id = %session.id(), opening = %opening, "Dispatching session");
                    tokio::spawn(async move {
                        let session_id = session.id();
                        if let Err(e) = handler.handle(session).await {
                            error!(session_id = %session_id, error = %e, code = e.error_code(), "Responder failed");
                        }
                    });
                }
            }
        }

        info!(party = %party, "Serve loop stopped");
    })
}
