//! Boundary with the transport runtime.
//!
//! The transport accepts connections and hands each one over as metadata, an
//! ordered event channel and a sink for replies. Handlers never see sockets.

use std::net::SocketAddr;

use tokio::sync::mpsc;

use crate::error::SessionError;
use crate::headers::Headers;
use crate::message::{Inbound, Outbound};

/// Declared kind for request/response connections.
pub const KIND_EXCHANGE: &str = "http";
/// Declared kind for duplex connections.
pub const KIND_DUPLEX: &str = "websocket";

/// The two connection kinds this crate handles.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionKind {
    Exchange,
    Duplex,
}

impl ConnectionKind {
    /// Parses a declared kind. Anything unrecognised is a protocol violation.
    pub fn parse(declared: &str) -> Result<Self, SessionError> {
        match declared {
            KIND_EXCHANGE => Ok(Self::Exchange),
            KIND_DUPLEX => Ok(Self::Duplex),
            other => Err(SessionError::ProtocolViolation(format!(
                "unrecognised connection kind {other:?}, \
                 must be {KIND_EXCHANGE:?} or {KIND_DUPLEX:?}"
            ))),
        }
    }
}

/// What the transport knows about a connection before any event arrives.
#[derive(Debug, Clone, Default)]
pub struct ConnectionMeta {
    pub kind: String,
    pub headers: Headers,
    pub peer_addr: Option<SocketAddr>,
}

impl ConnectionMeta {
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            ..Self::default()
        }
    }

    pub fn with_headers(mut self, headers: Headers) -> Self {
        self.headers = headers;
        self
    }

    pub fn with_peer(mut self, peer_addr: SocketAddr) -> Self {
        self.peer_addr = Some(peer_addr);
        self
    }
}

/// Send side of a connection.
#[async_trait::async_trait]
pub trait ConnectionSink: Send + 'static {
    /// Sends one message. Fails once the peer is gone.
    async fn send(&mut self, msg: Outbound) -> Result<(), SessionError>;
}

#[async_trait::async_trait]
impl ConnectionSink for mpsc::Sender<Outbound> {
    async fn send(&mut self, msg: Outbound) -> Result<(), SessionError> {
        mpsc::Sender::send(self, msg)
            .await
            .map_err(|_| SessionError::TransportClosed)
    }
}

/// One connection as handed over by the transport.
pub struct Connection<S> {
    pub meta: ConnectionMeta,
    pub events: mpsc::Receiver<Inbound>,
    pub sink: S,
}

impl<S: ConnectionSink> Connection<S> {
    pub fn new(meta: ConnectionMeta, events: mpsc::Receiver<Inbound>, sink: S) -> Self {
        Self { meta, events, sink }
    }
}

/// The transport's ends of an in-process connection.
pub struct TransportEnd {
    pub events: mpsc::Sender<Inbound>,
    pub outbound: mpsc::Receiver<Outbound>,
}

/// Builds a channel-backed connection with bounded queues in both directions.
pub fn pipe(
    meta: ConnectionMeta,
    capacity: usize,
) -> (Connection<mpsc::Sender<Outbound>>, TransportEnd) {
    let (event_tx, event_rx) = mpsc::channel(capacity);
    let (out_tx, out_rx) = mpsc::channel(capacity);
    (
        Connection::new(meta, event_rx, out_tx),
        TransportEnd {
            events: event_tx,
            outbound: out_rx,
        },
    )
}
