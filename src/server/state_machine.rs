//! Duplex connection state machine.

use crate::message::Inbound;
use crate::token::SessionToken;

/// The state of a duplex connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DuplexState {
    /// Waiting for the connect intent.
    Unbound,
    /// Counted against a session; heartbeats are echoed.
    Bound(SessionToken),
    /// Terminal state: no further events are processed.
    Closed,
}

impl DuplexState {
    /// Returns whether an event is valid in this state.
    ///
    /// A disconnect is valid in any open state. Anything else that is not
    /// accepted is a protocol violation.
    pub fn accepts(&self, event: &Inbound) -> bool {
        match self {
            Self::Unbound => matches!(event, Inbound::ConnectIntent | Inbound::Disconnect { .. }),
            Self::Bound(_) => matches!(event, Inbound::Message(_) | Inbound::Disconnect { .. }),
            Self::Closed => false,
        }
    }

    /// The token this connection is counted against, if any.
    pub fn token(&self) -> Option<&SessionToken> {
        match self {
            Self::Bound(token) => Some(token),
            _ => None,
        }
    }
}
