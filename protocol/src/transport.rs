//! Session transport abstraction.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use fxbroker_common::{Party, Result, SessionId};
use tracing::debug;

use crate::messages::{MessageType, Payload, ProtocolMessage};

/// Moves untyped payloads between the local node and its counterparties.
///
/// Delivery is best-effort and unacknowledged. Messages between one pair of
/// parties within one session arrive in send order.
#[async_trait]
pub trait SessionTransport: Send + Sync {
    /// The node this transport belongs to.
    fn local_party(&self) -> &Party;

    /// Send `payload` to `to` within `session`.
    async fn send(&self, session: SessionId, to: &Party, payload: Payload) -> Result<()>;

    /// Wait up to `timeout` for the next payload from `from` within `session`.
    async fn receive(&self, session: SessionId, from: &Party, timeout: Duration) -> Result<Payload>;

    /// Release the local mailbox for `session` with `counterparty`.
    fn close(&self, session: SessionId, counterparty: &Party);
}

/// A conversation with one counterparty.
///
/// The local mailbox is released when the session is dropped.
pub struct Session {
    id: SessionId,
    counterparty: Party,
    transport: Arc<dyn SessionTransport>,
}

impl Session {
    /// Start a new session with `counterparty`.
    pub fn open(transport: Arc<dyn SessionTransport>, counterparty: Party) -> Self {
        Self::join(transport, SessionId::new(), counterparty)
    }

    /// Attach to an existing session.
    pub fn join(transport: Arc<dyn SessionTransport>, id: SessionId, counterparty: Party) -> Self {
        Self {
            id,
            counterparty,
            transport,
        }
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn counterparty(&self) -> &Party {
        &self.counterparty
    }

    pub fn local_party(&self) -> &Party {
        self.transport.local_party()
    }

    /// Send a message to the counterparty.
    pub async fn send<M: ProtocolMessage>(&self, message: M) -> Result<()> {
        debug!(session_id = %self.id, to = %self.counterparty, message = %M::MESSAGE_TYPE, "Sending");
        self.transport
            .send(self.id, &self.counterparty, message.into())
            .await
    }

    /// Wait for a message of type `M` from the counterparty.
    ///
    /// Fails with `Timeout` when nothing arrives in time and with
    /// `UnexpectedMessage` when something else does.
    pub async fn receive<M: ProtocolMessage>(&self, timeout: Duration) -> Result<M> {
        let payload = self
            .transport
            .receive(self.id, &self.counterparty, timeout)
            .await?;
        debug!(session_id = %self.id, from = %self.counterparty, message = %payload.message_type(), "Received");
        M::from_payload(payload)
    }

    /// Send `message` and wait for the reply.
    pub async fn send_and_receive<Req, Resp>(&self, message: Req, timeout: Duration) -> Result<Resp>
    where
        Req: ProtocolMessage,
        Resp: ProtocolMessage,
    {
        self.send(message).await?;
        self.receive(timeout).await
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.transport.close(self.id, &self.counterparty);
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("local", self.transport.local_party())
            .field("counterparty", &self.counterparty)
            .finish()
    }
}

/// A session opened by a counterparty.
///
/// The opening message is still waiting in the session; `opening` only says
/// what it is so the node can pick a responder.
#[derive(Debug)]
pub struct InboundSession {
    pub session: Session,
    pub opening: MessageType,
}
