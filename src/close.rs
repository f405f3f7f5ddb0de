//! Close reason codes for duplex connections.
//!
//! Values come from the WebSocket close code registry (RFC 6455 §7.4.1).

use std::fmt;

/// Code reported by a peer that vanished without a close handshake.
pub const ABNORMAL_CLOSURE: u16 = 1006;

/// Code reported by a peer that closed without supplying one.
pub const NO_STATUS: u16 = 1005;

/// Reason code sent when the server closes a duplex connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CloseCode {
    Normal,
    /// Used when the bound session expires or the peer stops heartbeating.
    GoingAway,
    ProtocolError,
    DataError,
    /// Used when a duplex connection presents a missing or unknown token.
    PolicyViolation,
    InternalError,
}

impl CloseCode {
    /// The numeric wire value.
    pub fn as_u16(self) -> u16 {
        match self {
            Self::Normal => 1000,
            Self::GoingAway => 1001,
            Self::ProtocolError => 1002,
            Self::DataError => 1003,
            Self::PolicyViolation => 1008,
            Self::InternalError => 1011,
        }
    }

    /// Maps a numeric code back to a known reason, if it is one of ours.
    pub fn from_u16(code: u16) -> Option<Self> {
        match code {
            1000 => Some(Self::Normal),
            1001 => Some(Self::GoingAway),
            1002 => Some(Self::ProtocolError),
            1003 => Some(Self::DataError),
            1008 => Some(Self::PolicyViolation),
            1011 => Some(Self::InternalError),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Normal => "NORMAL",
            Self::GoingAway => "GOING_AWAY",
            Self::ProtocolError => "PROTOCOL_ERROR",
            Self::DataError => "DATA_ERROR",
            Self::PolicyViolation => "POLICY_VIOLATION",
            Self::InternalError => "INTERNAL_ERROR",
        }
    }
}

impl fmt::Display for CloseCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name(), self.as_u16())
    }
}

impl From<CloseCode> for u16 {
    fn from(code: CloseCode) -> Self {
        code.as_u16()
    }
}
