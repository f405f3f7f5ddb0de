//! Duplex heartbeat connection handler.
//!
//! A duplex connection carries no application data. It is bound to a session
//! on connect, echoes every heartbeat it receives, and reports its closure the
//! moment the transport delivers it. Before each event the handler re-checks
//! that its session still exists and closes with GOING_AWAY if it does not.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::time::Instant;

use crate::close::{self, CloseCode};
use crate::error::SessionError;
use crate::headers::Headers;
use crate::message::{Inbound, Outbound, Payload};
use crate::server::builder::SessionConfig;
use crate::server::registry::SessionRegistry;
use crate::server::state_machine::DuplexState;
use crate::server::transport::{Connection, ConnectionSink};
use crate::token::SessionToken;

/// Why a duplex connection ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DuplexOutcome {
    /// No usable session token at connect time.
    Rejected,
    /// The peer closed, or vanished (`code` 1006).
    Disconnected { code: u16 },
    /// The bound session expired while the connection was open.
    Expired,
    /// No heartbeat arrived within the configured timeout.
    TimedOut,
}

enum Next {
    Event(Inbound),
    Ended,
    Silent,
}

/// Handles one duplex connection.
pub struct DuplexHandler<S> {
    registry: SessionRegistry,
    config: Arc<SessionConfig>,
    headers: Headers,
    peer_addr: Option<SocketAddr>,
    events: mpsc::Receiver<Inbound>,
    sink: S,
    state: DuplexState,
    close_sent: bool,
}

impl<S: ConnectionSink> DuplexHandler<S> {
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
            state: DuplexState::Unbound,
            close_sent: false,
        }
    }

    /// Runs the connection to completion.
    ///
    /// However the connection ends, a bound session is released exactly
    /// once, unless the session itself expired first. A failure that has not
    /// already closed the connection sends the error's close code.
    pub async fn run(mut self) -> Result<DuplexOutcome, SessionError> {
        let result = self.drive().await;
        if let Err(e) = &result
            && !self.close_sent
        {
            if let Err(send_err) = self.close(e.close_code()).await {
                tracing::debug!(peer = ?self.peer_addr, error = %send_err, "close not delivered");
            }
        }
        self.release();
        result
    }

    async fn drive(&mut self) -> Result<DuplexOutcome, SessionError> {
        loop {
            let event = match self.next_event().await {
                Next::Event(event) => event,
                Next::Ended => {
                    tracing::warn!(
                        peer = ?self.peer_addr,
                        token = ?self.state.token(),
                        "duplex transport ended without a close",
                    );
                    if self.session_gone() {
                        self.state = DuplexState::Closed;
                    }
                    return Ok(self.disconnected(close::ABNORMAL_CLOSURE));
                }
                Next::Silent => {
                    if self.session_gone() {
                        return self.expire().await;
                    }
                    tracing::warn!(
                        peer = ?self.peer_addr,
                        token = ?self.state.token(),
                        "no heartbeat within timeout, closing",
                    );
                    self.close(CloseCode::GoingAway).await?;
                    self.release();
                    return Ok(DuplexOutcome::TimedOut);
                }
            };
            tracing::debug!(peer = ?self.peer_addr, event = event.kind(), "duplex event");

            if self.session_gone() {
                return self.expire().await;
            }

            if !self.state.accepts(&event) {
                let detail = format!("{} event not allowed while {:?}", event.kind(), self.state);
                tracing::warn!(peer = ?self.peer_addr, "{detail}");
                return Err(SessionError::ProtocolViolation(detail));
            }

            match event {
                Inbound::ConnectIntent => {
                    if let Some(outcome) = self.connect().await? {
                        return Ok(outcome);
                    }
                }
                Inbound::Message(payload) => {
                    if let Some(outcome) = self.heartbeat(payload).await? {
                        return Ok(outcome);
                    }
                }
                Inbound::Disconnect { code } => return Ok(self.disconnected(code)),
                Inbound::Request(_) => {
                    return Err(SessionError::protocol("request event on a duplex connection"));
                }
            }
        }
    }

    /// Waits for the next event, bounded by the heartbeat timeout once bound.
    async fn next_event(&mut self) -> Next {
        let limit = match self.state {
            DuplexState::Bound(_) => self.config.heartbeat_timeout,
            _ => None,
        };
        let received = match limit {
            Some(limit) => match tokio::time::timeout(limit, self.events.recv()).await {
                Ok(received) => received,
                Err(_) => return Next::Silent,
            },
            None => self.events.recv().await,
        };
        match received {
            Some(event) => Next::Event(event),
            None => Next::Ended,
        }
    }

    async fn connect(&mut self) -> Result<Option<DuplexOutcome>, SessionError> {
        let presented = self
            .headers
            .cookie(&self.config.cookie_name)
            .filter(|value| !value.is_empty())
            .map(SessionToken::from);

        let Some(token) = presented else {
            tracing::warn!(peer = ?self.peer_addr, "duplex connection without session cookie");
            let err = SessionError::InvalidToken(String::new());
            return self.reject(err).await.map(Some);
        };

        match self.registry.bind(&token) {
            Ok(active) => {
                tracing::info!(peer = ?self.peer_addr, %token, active, "duplex connection bound");
                self.state = DuplexState::Bound(token);
                self.sink.send(Outbound::Accept).await?;
                Ok(None)
            }
            Err(e) => {
                tracing::warn!(
                    peer = ?self.peer_addr,
                    %token,
                    "duplex connection with invalid session",
                );
                self.reject(e).await.map(Some)
            }
        }
    }

    async fn reject(&mut self, err: SessionError) -> Result<DuplexOutcome, SessionError> {
        self.state = DuplexState::Closed;
        self.close(err.close_code()).await?;
        Ok(DuplexOutcome::Rejected)
    }

    async fn heartbeat(
        &mut self,
        payload: Payload,
    ) -> Result<Option<DuplexOutcome>, SessionError> {
        let len = payload.len();
        self.sink.send(Outbound::Message(payload)).await?;
        tracing::debug!(peer = ?self.peer_addr, len, "heartbeat echoed");

        if self.config.refresh_on_heartbeat
            && let Some(token) = self.state.token()
            && self
                .registry
                .touch(token, Instant::now(), self.config.session_ttl)
                .is_err()
        {
            return self.expire().await.map(Some);
        }
        Ok(None)
    }

    fn disconnected(&mut self, code: u16) -> DuplexOutcome {
        let reason = CloseCode::from_u16(code).map_or("unknown", CloseCode::name);
        tracing::info!(
            peer = ?self.peer_addr,
            token = ?self.state.token(),
            code,
            reason,
            "duplex disconnect",
        );
        self.release();
        DuplexOutcome::Disconnected { code }
    }

    /// Closes because the bound session no longer exists. The record is gone
    /// (or about to be swept), so there is nothing to release.
    async fn expire(&mut self) -> Result<DuplexOutcome, SessionError> {
        let previous = std::mem::replace(&mut self.state, DuplexState::Closed);
        tracing::warn!(
            peer = ?self.peer_addr,
            token = ?previous.token(),
            "duplex session has timed out",
        );
        self.close(CloseCode::GoingAway).await?;
        Ok(DuplexOutcome::Expired)
    }

    async fn close(&mut self, code: CloseCode) -> Result<(), SessionError> {
        self.close_sent = true;
        self.sink.send(Outbound::Close(code)).await
    }

    fn session_gone(&self) -> bool {
        self.state
            .token()
            .is_some_and(|token| !self.registry.contains(token))
    }

    fn release(&mut self) {
        if let DuplexState::Bound(token) = std::mem::replace(&mut self.state, DuplexState::Closed)
        {
            let active = self.registry.unbind(&token);
            tracing::info!(
                peer = ?self.peer_addr,
                %token,
                ?active,
                "duplex connection released",
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use bytes::Bytes;

    use super::*;
    use crate::server::transport::{ConnectionMeta, KIND_DUPLEX, TransportEnd, pipe};

    const TTL: Duration = Duration::from_secs(30);

    type Task = tokio::task::JoinHandle<Result<DuplexOutcome, SessionError>>;

    fn start_with(
        registry: &SessionRegistry,
        config: SessionConfig,
        cookie: Option<&str>,
    ) -> (TransportEnd, Task) {
        let mut headers = Headers::new();
        if let Some(token) = cookie {
            headers.insert("cookie", format!("sessionid={token}"));
        }
        let (conn, end) = pipe(ConnectionMeta::new(KIND_DUPLEX).with_headers(headers), 8);
        let handler = DuplexHandler::new(registry.clone(), Arc::new(config), conn);
        (end, tokio::spawn(handler.run()))
    }

    fn start(registry: &SessionRegistry, cookie: Option<&str>) -> (TransportEnd, Task) {
        start_with(registry, SessionConfig::default(), cookie)
    }

    /// Creates a session off the runtime so no sweeper is started and the
    /// record outlives its expiry.
    fn create_unswept(registry: &SessionRegistry, ttl: Duration) -> SessionToken {
        let registry = registry.clone();
        let now = Instant::now();
        std::thread::spawn(move || registry.create(now, ttl).0)
            .join()
            .unwrap()
    }

    /// Drops heartbeat echoes on the floor; forwards everything else.
    struct EchoFails(mpsc::Sender<Outbound>);

    #[async_trait::async_trait]
    impl ConnectionSink for EchoFails {
        async fn send(&mut self, msg: Outbound) -> Result<(), SessionError> {
            match msg {
                Outbound::Message(_) => Err(SessionError::TransportClosed),
                other => ConnectionSink::send(&mut self.0, other).await,
            }
        }
    }

    async fn connect(end: &mut TransportEnd) -> Outbound {
        end.events.send(Inbound::ConnectIntent).await.unwrap();
        end.outbound.recv().await.unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn bind_echo_and_disconnect() {
        let registry = SessionRegistry::new();
        let (token, _) = registry.create(Instant::now(), TTL);
        let (mut end, task) = start(&registry, Some(token.as_str()));

        assert_eq!(connect(&mut end).await, Outbound::Accept);
        assert_eq!(registry.active_connections(&token), Some(1));

        end.events.send(Inbound::Message(Payload::from("pingy-pingy"))).await.unwrap();
        assert_eq!(
            end.outbound.recv().await.unwrap(),
            Outbound::Message(Payload::from("pingy-pingy"))
        );

        let binary = Payload::Binary(Bytes::from_static(&[1, 2, 3]));
        end.events.send(Inbound::Message(binary.clone())).await.unwrap();
        assert_eq!(end.outbound.recv().await.unwrap(), Outbound::Message(binary));

        end.events.send(Inbound::Disconnect { code: 1001 }).await.unwrap();
        assert_eq!(
            task.await.unwrap().unwrap(),
            DuplexOutcome::Disconnected { code: 1001 }
        );
        assert_eq!(registry.active_connections(&token), Some(0));
    }

    #[tokio::test(start_paused = true)]
    async fn missing_cookie_is_rejected() {
        let registry = SessionRegistry::new();
        let (mut end, task) = start(&registry, None);
        assert_eq!(connect(&mut end).await, Outbound::Close(CloseCode::PolicyViolation));
        assert_eq!(task.await.unwrap().unwrap(), DuplexOutcome::Rejected);
    }

    #[tokio::test(start_paused = true)]
    async fn vanished_transport_releases_binding() {
        let registry = SessionRegistry::new();
        let (token, _) = registry.create(Instant::now(), TTL);
        let (mut end, task) = start(&registry, Some(token.as_str()));
        connect(&mut end).await;
        drop(end);
        assert_eq!(
            task.await.unwrap().unwrap(),
            DuplexOutcome::Disconnected {
                code: close::ABNORMAL_CLOSURE
            }
        );
        assert_eq!(registry.active_connections(&token), Some(0));
    }

    #[tokio::test(start_paused = true)]
    async fn heartbeat_before_connect_is_violation() {
        let registry = SessionRegistry::new();
        let (mut end, task) = start(&registry, None);
        end.events.send(Inbound::Message(Payload::from("early"))).await.unwrap();
        assert_eq!(
            end.outbound.recv().await.unwrap(),
            Outbound::Close(CloseCode::ProtocolError)
        );
        let err = task.await.unwrap().unwrap_err();
        assert!(matches!(err, SessionError::ProtocolViolation(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn second_connect_intent_releases_binding() {
        let registry = SessionRegistry::new();
        let (token, _) = registry.create(Instant::now(), TTL);
        let (mut end, task) = start(&registry, Some(token.as_str()));
        connect(&mut end).await;
        assert_eq!(
            connect(&mut end).await,
            Outbound::Close(CloseCode::ProtocolError)
        );
        assert!(task.await.unwrap().is_err());
        assert_eq!(registry.active_connections(&token), Some(0));
    }

    #[tokio::test(start_paused = true)]
    async fn silent_peer_times_out() {
        let registry = SessionRegistry::new();
        let (token, _) = registry.create(Instant::now(), Duration::from_secs(300));
        let config = SessionConfig {
            heartbeat_timeout: Some(Duration::from_secs(5)),
            ..SessionConfig::default()
        };
        let (mut end, task) = start_with(&registry, config, Some(token.as_str()));
        connect(&mut end).await;

        assert_eq!(
            end.outbound.recv().await.unwrap(),
            Outbound::Close(CloseCode::GoingAway)
        );
        assert_eq!(task.await.unwrap().unwrap(), DuplexOutcome::TimedOut);
        assert_eq!(registry.active_connections(&token), Some(0));
    }

    #[tokio::test(start_paused = true)]
    async fn heartbeats_refresh_when_enabled() {
        let registry = SessionRegistry::new();
        let (token, first) = registry.create(Instant::now(), TTL);
        let config = SessionConfig {
            refresh_on_heartbeat: true,
            ..SessionConfig::default()
        };
        let (mut end, _task) = start_with(&registry, config, Some(token.as_str()));
        connect(&mut end).await;

        tokio::time::sleep(Duration::from_secs(20)).await;
        end.events.send(Inbound::Message(Payload::from("ping"))).await.unwrap();
        end.outbound.recv().await.unwrap();
        assert!(registry.expires_at(&token).unwrap() > first);
    }

    #[tokio::test(start_paused = true)]
    async fn heartbeats_do_not_refresh_by_default() {
        let registry = SessionRegistry::new();
        let (token, first) = registry.create(Instant::now(), TTL);
        let (mut end, _task) = start(&registry, Some(token.as_str()));
        connect(&mut end).await;

        tokio::time::sleep(Duration::from_secs(20)).await;
        end.events.send(Inbound::Message(Payload::from("ping"))).await.unwrap();
        end.outbound.recv().await.unwrap();
        assert_eq!(registry.expires_at(&token), Some(first));
    }

    #[tokio::test(start_paused = true)]
    async fn ended_transport_leaves_expired_session_alone() {
        let registry = SessionRegistry::new();
        let token = create_unswept(&registry, TTL);
        let (mut end, task) = start(&registry, Some(token.as_str()));
        assert_eq!(connect(&mut end).await, Outbound::Accept);

        tokio::time::sleep(TTL + Duration::from_secs(1)).await;
        assert!(!registry.sweeper_running());
        drop(end);
        assert_eq!(
            task.await.unwrap().unwrap(),
            DuplexOutcome::Disconnected {
                code: close::ABNORMAL_CLOSURE
            }
        );
        assert_eq!(registry.active_connections(&token), Some(1));
    }

    #[tokio::test(start_paused = true)]
    async fn silence_after_expiry_closes_as_expired() {
        let registry = SessionRegistry::new();
        let token = create_unswept(&registry, Duration::from_secs(5));
        let config = SessionConfig {
            heartbeat_timeout: Some(Duration::from_secs(10)),
            ..SessionConfig::default()
        };
        let (mut end, task) = start_with(&registry, config, Some(token.as_str()));
        assert_eq!(connect(&mut end).await, Outbound::Accept);

        assert_eq!(
            end.outbound.recv().await.unwrap(),
            Outbound::Close(CloseCode::GoingAway)
        );
        assert_eq!(task.await.unwrap().unwrap(), DuplexOutcome::Expired);
        assert_eq!(registry.active_connections(&token), Some(1));
        assert_eq!(registry.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn sink_failure_closes_with_internal_error() {
        let registry = SessionRegistry::new();
        let (token, _) = registry.create(Instant::now(), TTL);
        let headers = Headers::new().with("cookie", format!("sessionid={token}"));
        let (events_tx, events_rx) = mpsc::channel(8);
        let (out_tx, mut out_rx) = mpsc::channel(8);
        let conn = Connection::new(
            ConnectionMeta::new(KIND_DUPLEX).with_headers(headers),
            events_rx,
            EchoFails(out_tx),
        );
        let task = tokio::spawn(
            DuplexHandler::new(registry.clone(), Arc::new(SessionConfig::default()), conn).run(),
        );

        events_tx.send(Inbound::ConnectIntent).await.unwrap();
        assert_eq!(out_rx.recv().await.unwrap(), Outbound::Accept);
        events_tx.send(Inbound::Message(Payload::from("ping"))).await.unwrap();
        assert_eq!(
            out_rx.recv().await.unwrap(),
            Outbound::Close(CloseCode::InternalError)
        );
        let err = task.await.unwrap().unwrap_err();
        assert!(matches!(err, SessionError::TransportClosed));
        assert_eq!(registry.active_connections(&token), Some(0));
    }
}
