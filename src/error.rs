//! Error types for session tracking.

use crate::close::CloseCode;

/// Errors that can occur while handling a connection.
///
/// Every error is scoped to the connection that raised it. The registry is
/// never left in a partial state by one of these.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("invalid or expired session token: {0}")]
    InvalidToken(String),

    #[error("protocol violation: {0}")]
    ProtocolViolation(String),

    #[error("transport closed")]
    TransportClosed,

    #[cfg(feature = "ws")]
    #[error("websocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),
}

impl SessionError {
    /// Wraps any displayable message as a protocol violation.
    pub fn protocol(e: impl std::fmt::Display) -> Self {
        Self::ProtocolViolation(e.to_string())
    }

    /// The close reason code a duplex peer receives for this error.
    pub fn close_code(&self) -> CloseCode {
        match self {
            Self::InvalidToken(_) => CloseCode::PolicyViolation,
            Self::ProtocolViolation(_) => CloseCode::ProtocolError,
            _ => CloseCode::InternalError,
        }
    }
}
