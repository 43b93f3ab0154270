//! In-process network for simulation and tests.

use std::fmt;
use std::sync::{Arc, Weak};
use std::time::Duration;

use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::{DashMap, DashSet};
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, info, warn};

use fxbroker_common::{
    await_result, Directory, DirectorySource, ExchangeError, NodeInfo, Party, Result, SessionId,
};

use crate::messages::Payload;
use crate::transport::{InboundSession, Session, SessionTransport};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct MailboxKey {
    session: SessionId,
    owner: Party,
    counterparty: Party,
}

struct Mailbox {
    sender: mpsc::UnboundedSender<Payload>,
    receiver: Mutex<mpsc::UnboundedReceiver<Payload>>,
}

impl Mailbox {
    fn new() -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();
        Self {
            sender,
            receiver: Mutex::new(receiver),
        }
    }
}

struct NodeEntry {
    info: NodeInfo,
    transport: Arc<LocalTransport>,
    inbound: mpsc::UnboundedSender<InboundSession>,
}

/// Network of nodes living in one process.
///
/// Each `(session, owner, counterparty)` triple has its own mailbox. The first
/// message delivered to a node for a session it does not know yet opens an
/// [`InboundSession`] on that node's inbound channel.
pub struct LocalNetwork {
    nodes: DashMap<Party, NodeEntry>,
    mailboxes: DashMap<MailboxKey, Arc<Mailbox>>,
    offline: DashSet<Party>,
}

impl LocalNetwork {
    /// Create an empty network.
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            nodes: DashMap::new(),
            mailboxes: DashMap::new(),
            offline: DashSet::new(),
        })
    }

    /// Add a node. Returns its transport and the stream of sessions opened
    /// by its counterparties.
    pub fn join(
        self: &Arc<Self>,
        info: NodeInfo,
    ) -> (Arc<LocalTransport>, mpsc::UnboundedReceiver<InboundSession>) {
        let (inbound, inbound_rx) = mpsc::unbounded_channel();
        let transport = Arc::new(LocalTransport {
            network: Arc::downgrade(self),
            party: info.party.clone(),
        });

        info!(party = %info.party, capabilities = info.capabilities.iter().count(), "Node joined network");
        self.nodes.insert(
            info.party.clone(),
            NodeEntry {
                info,
                transport: transport.clone(),
                inbound,
            },
        );
        (transport, inbound_rx)
    }

    /// Remove a node. Later deliveries to it fail with `UnknownParty`.
    pub fn leave(&self, party: &Party) {
        if self.nodes.remove(party).is_some() {
            info!(party = %party, "Node left network");
        }
    }

    /// Silently drop every delivery to and from `party` while offline.
    pub fn set_offline(&self, party: &Party, offline: bool) {
        if offline {
            self.offline.insert(party.clone());
        } else {
            self.offline.remove(party);
        }
        warn!(party = %party, offline, "Node availability changed");
    }

    pub fn is_offline(&self, party: &Party) -> bool {
        self.offline.contains(party)
    }

    /// Number of mailboxes currently allocated.
    pub fn open_mailboxes(&self) -> usize {
        self.mailboxes.len()
    }

    fn mailbox(&self, key: MailboxKey) -> (Arc<Mailbox>, bool) {
        match self.mailboxes.entry(key) {
            Entry::Occupied(entry) => (entry.get().clone(), false),
            Entry::Vacant(entry) => {
                let mailbox = Arc::new(Mailbox::new());
                entry.insert(mailbox.clone());
                (mailbox, true)
            }
        }
    }

    fn deliver(&self, session: SessionId, from: &Party, to: &Party, payload: Payload) -> Result<()> {
        if self.is_offline(to) || self.is_offline(from) {
            debug!(session_id = %session, from = %from, to = %to, "Dropping delivery to or from offline node");
            return Ok(());
        }

        let (transport, inbound) = {
            let node = self
                .nodes
                .get(to)
                .ok_or_else(|| ExchangeError::UnknownParty(to.name().to_string()))?;
            (node.transport.clone(), node.inbound.clone())
        };

        let opening = payload.message_type();
        let (mailbox, created) = self.mailbox(MailboxKey {
            session,
            owner: to.clone(),
            counterparty: from.clone(),
        });
        mailbox
            .sender
            .send(payload)
            .map_err(|_| ExchangeError::TransportClosed(format!("mailbox of {} closed", to)))?;

        if created {
            let inbound_session = InboundSession {
                session: Session::join(transport, session, from.clone()),
                opening,
            };
            if inbound.send(inbound_session).is_err() {
                warn!(session_id = %session, to = %to, "Node is not accepting sessions; dropped");
            }
        }
        Ok(())
    }

    fn release(&self, session: SessionId, owner: &Party, counterparty: &Party) {
        let key = MailboxKey {
            session,
            owner: owner.clone(),
            counterparty: counterparty.clone(),
        };
        if self.mailboxes.remove(&key).is_some() {
            debug!(session_id = %session, owner = %owner, counterparty = %counterparty, "Mailbox released");
        }
    }
}

impl DirectorySource for LocalNetwork {
    fn snapshot(&self) -> Directory {
        let mut nodes: Vec<NodeInfo> = self.nodes.iter().map(|n| n.info.clone()).collect();
        nodes.sort_by(|a, b| a.party.name().cmp(b.party.name()));
        Directory::new(nodes)
    }
}

impl fmt::Debug for LocalNetwork {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LocalNetwork")
            .field("nodes", &self.nodes.len())
            .field("mailboxes", &self.mailboxes.len())
            .field("offline", &self.offline.len())
            .finish()
    }
}

/// One node's view of a [`LocalNetwork`].
#[derive(Debug)]
pub struct LocalTransport {
    network: Weak<LocalNetwork>,
    party: Party,
}

impl LocalTransport {
    fn network(&self) -> Result<Arc<LocalNetwork>> {
        self.network
            .upgrade()
            .ok_or_else(|| ExchangeError::TransportClosed("network shut down".into()))
    }
}

#[async_trait]
impl SessionTransport for LocalTransport {
    fn local_party(&self) -> &Party {
        &self.party
    }

    async fn send(&self, session: SessionId, to: &Party, payload: Payload) -> Result<()> {
        let network = self.network()?;
        // Replies must land in an existing mailbox, not open a new session.
        network.mailbox(MailboxKey {
            session,
            owner: self.party.clone(),
            counterparty: to.clone(),
        });
        network.deliver(session, &self.party, to, payload)
    }

    async fn receive(&self, session: SessionId, from: &Party, timeout: Duration) -> Result<Payload> {
        let (mailbox, _) = self.network()?.mailbox(MailboxKey {
            session,
            owner: self.party.clone(),
            counterparty: from.clone(),
        });

        let operation = format!("receive from {}", from);
        await_result(&operation, timeout, async move {
            let mut receiver = mailbox.receiver.lock().await;
            receiver
                .recv()
                .await
                .ok_or_else(|| ExchangeError::TransportClosed(format!("session {} closed", session)))
        })
        .await
    }

    fn close(&self, session: SessionId, counterparty: &Party) {
        if let Some(network) = self.network.upgrade() {
            network.release(session, &self.party, counterparty);
        }
    }
}
