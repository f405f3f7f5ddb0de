//! Events delivered by the transport to a connection handler.

use crate::headers::Headers;
use crate::message::Payload;

/// An inbound event on one connection, in delivery order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    /// Duplex peer asks to open the connection.
    ConnectIntent,

    /// One request/response exchange.
    Request(Request),

    /// A heartbeat message on a duplex connection.
    Message(Payload),

    /// Peer went away. `code` is the numeric close code for duplex
    /// connections and is ignored for request/response connections.
    Disconnect { code: u16 },
}

impl Inbound {
    /// Short name for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::ConnectIntent => "connect-intent",
            Self::Request(_) => "request",
            Self::Message(_) => "inbound-message",
            Self::Disconnect { .. } => "disconnect",
        }
    }
}

/// A single request of a request/response exchange.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Request {
    pub path: String,
    pub headers: Headers,
}

impl Request {
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            headers: Headers::new(),
        }
    }

    /// Adds a `cookie` header carrying `name=value`.
    pub fn with_cookie(mut self, name: &str, value: &str) -> Self {
        self.headers.insert("cookie", format!("{name}={value}"));
        self
    }
}
