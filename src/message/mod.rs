//! Connection events and messages exchanged with the transport.

pub mod request;
pub mod response;

pub use request::{Inbound, Request};
pub use response::{Outbound, Response};

use bytes::Bytes;

/// Heartbeat payload. Echoes keep the kind they arrived with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    Text(String),
    Binary(Bytes),
}

impl Payload {
    pub fn len(&self) -> usize {
        match self {
            Self::Text(s) => s.len(),
            Self::Binary(b) => b.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl From<&str> for Payload {
    fn from(s: &str) -> Self {
        Self::Text(s.to_string())
    }
}
