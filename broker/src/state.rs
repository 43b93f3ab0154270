//! Broker state definitions.

/// Broker operational state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BrokerState {
    /// Broker is built but not serving.
    Starting,
    /// Broker is serving exchange requests.
    Running,
    /// Broker stopped accepting sessions and is draining running exchanges.
    ShuttingDown,
    /// Broker is stopped.
    Stopped,
}

impl BrokerState {
    /// Check if the broker is accepting new exchanges.
    pub fn accepts_requests(&self) -> bool {
        matches!(self, BrokerState::Running)
    }

    /// Check if the broker is in a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, BrokerState::Stopped)
    }
}
