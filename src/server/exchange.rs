//! Request/response connection handler.
//!
//! Each request either refreshes the session named by its cookie or mints a
//! new one, and the response hands the current token back as a cookie.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::time::Instant;

use crate::error::SessionError;
use crate::headers::Headers;
use crate::message::{Inbound, Outbound, Request, Response};
use crate::server::builder::SessionConfig;
use crate::server::registry::SessionRegistry;
use crate::server::transport::{Connection, ConnectionSink};
use crate::token::SessionToken;

/// Handles one request/response connection until the peer disconnects.
pub struct ExchangeHandler<S> {
    registry: SessionRegistry,
    config: Arc<SessionConfig>,
    headers: Headers,
    peer_addr: Option<SocketAddr>,
    events: mpsc::Receiver<Inbound>,
    sink: S,
}

impl<S: ConnectionSink> ExchangeHandler<S> {
    pub fn new(
        registry: SessionRegistry,
        config: Arc<SessionConfig>,
        conn: Connection<S>,
    ) -> Self {
        Self {
            registry,
            config,
            headers: conn.meta.headers,
            peer_addr: conn.meta.peer_addr,
            events: conn.events,
            sink: conn.sink,
        }
    }

    /// Serves requests until a disconnect notice or the end of the stream.
    pub async fn run(mut self) -> Result<(), SessionError> {
        while let Some(event) = self.events.recv().await {
            tracing::debug!(peer = ?self.peer_addr, event = event.kind(), "exchange event");
            match event {
                Inbound::Request(request) => {
                    self.handle_request(&request).await?;
                }
                Inbound::Disconnect { .. } => {
                    tracing::info!(peer = ?self.peer_addr, "exchange disconnect");
                    return Ok(());
                }
                other => {
                    tracing::warn!(
                        peer = ?self.peer_addr,
                        event = other.kind(),
                        "unexpected event on request/response connection",
                    );
                    return Err(SessionError::ProtocolViolation(format!(
                        "{} event on a request/response connection",
                        other.kind()
                    )));
                }
            }
        }
        tracing::debug!(peer = ?self.peer_addr, "exchange transport closed");
        Ok(())
    }

    async fn handle_request(&mut self, request: &Request) -> Result<(), SessionError> {
        let now = Instant::now();
        let (token, expires_at) = self.resolve(request, now);
        let response = self.render(&token, expires_at, now);
        self.sink.send(Outbound::Response(response)).await
    }

    /// Refreshes the presented session, or creates one when none is
    /// presented or the presented one is no longer valid.
    fn resolve(&self, request: &Request, now: Instant) -> (SessionToken, Instant) {
        let ttl = self.config.session_ttl;
        let presented = request
            .headers
            .cookie(&self.config.cookie_name)
            .or_else(|| self.headers.cookie(&self.config.cookie_name))
            .filter(|value| !value.is_empty())
            .map(SessionToken::from);

        if let Some(token) = presented {
            match self.registry.touch(&token, now, ttl) {
                Ok(expires_at) => {
                    tracing::info!(
                        peer = ?self.peer_addr,
                        %token,
                        "reconnection with existing session",
                    );
                    return (token, expires_at);
                }
                Err(_) => {
                    tracing::info!(
                        peer = ?self.peer_addr,
                        %token,
                        "invalid or expired session presented",
                    );
                }
            }
        }

        let (token, expires_at) = self.registry.create(now, ttl);
        tracing::info!(peer = ?self.peer_addr, %token, "assigned new session");
        (token, expires_at)
    }

    fn render(&self, token: &SessionToken, expires_at: Instant, now: Instant) -> Response {
        let remaining = expires_at.saturating_duration_since(now).as_secs();
        let body = format!(
            "session {token}\nexpires-in {remaining}\nheartbeat-interval-ms {}\n",
            self.config.heartbeat_interval.as_millis(),
        );
        let mut response = Response::text(body);
        response.headers.insert(
            "set-cookie",
            format!(
                "{}={token}; SameSite=Lax; Path=/; Max-Age={remaining}",
                self.config.cookie_name
            ),
        );
        response
    }
}
