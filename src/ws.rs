//! WebSocket transport for duplex connections.
//!
//! Performs the WebSocket handshake, records the upgrade request's headers as
//! connection metadata, then feeds frames to the duplex handler as events.
//! The handshake completes before the handler runs, so a rejected session is
//! an immediate Close frame with POLICY_VIOLATION rather than a refused
//! upgrade.

use std::net::SocketAddr;

use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tokio_tungstenite::WebSocketStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::handshake::server::{
    ErrorResponse, Request as UpgradeRequest, Response as UpgradeResponse,
};
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode as WireCloseCode;

use crate::close;
use crate::error::SessionError;
use crate::headers::Headers;
use crate::message::{Inbound, Outbound, Payload};
use crate::server::dispatch::Dispatcher;
use crate::server::transport::{Connection, ConnectionMeta, ConnectionSink, KIND_DUPLEX};

const EVENT_QUEUE: usize = 16;

/// Write half of a WebSocket, as seen by the duplex handler.
pub struct WsSink<S> {
    inner: SplitSink<WebSocketStream<S>, Message>,
}

#[async_trait::async_trait]
impl<S> ConnectionSink for WsSink<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    async fn send(&mut self, msg: Outbound) -> Result<(), SessionError> {
        let frame = match msg {
            // The upgrade already happened during the handshake.
            Outbound::Accept => return Ok(()),
            Outbound::Message(Payload::Text(text)) => Message::Text(text.into()),
            Outbound::Message(Payload::Binary(bytes)) => Message::Binary(bytes),
            Outbound::Close(code) => Message::Close(Some(CloseFrame {
                code: WireCloseCode::from(code.as_u16()),
                reason: String::new().into(),
            })),
            Outbound::Response(_) => {
                return Err(SessionError::protocol("HTTP response on a websocket"));
            }
        };
        self.inner.send(frame).await?;
        Ok(())
    }
}

/// Serves one duplex connection over an accepted byte stream.
///
/// Returns once the duplex handler finishes.
pub async fn serve_duplex<S>(
    stream: S,
    peer_addr: SocketAddr,
    dispatcher: &Dispatcher,
) -> Result<(), SessionError>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let mut headers = Headers::new();
    let capture = |request: &UpgradeRequest, response: UpgradeResponse| {
        headers = request
            .headers()
            .iter()
            .filter_map(|(name, value)| Some((name.as_str(), value.to_str().ok()?)))
            .collect();
        Ok::<_, ErrorResponse>(response)
    };
    let ws = tokio_tungstenite::accept_hdr_async(stream, capture).await?;
    tracing::debug!(%peer_addr, "websocket handshake complete");

    let (sink, mut source) = ws.split();
    let (events_tx, events_rx) = mpsc::channel(EVENT_QUEUE);

    let pump = tokio::spawn(async move {
        if events_tx.send(Inbound::ConnectIntent).await.is_err() {
            return;
        }
        loop {
            let event = match source.next().await {
                Some(Ok(Message::Text(text))) => {
                    Inbound::Message(Payload::Text(text.as_str().to_owned()))
                }
                Some(Ok(Message::Binary(bytes))) => Inbound::Message(Payload::Binary(bytes)),
                Some(Ok(Message::Close(frame))) => Inbound::Disconnect {
                    code: frame.map_or(close::NO_STATUS, |f| u16::from(f.code)),
                },
                // Ping/pong are answered by tungstenite itself.
                Some(Ok(_)) => continue,
                Some(Err(e)) => {
                    tracing::debug!(%peer_addr, error = %e, "websocket read error");
                    Inbound::Disconnect {
                        code: close::ABNORMAL_CLOSURE,
                    }
                }
                None => Inbound::Disconnect {
                    code: close::ABNORMAL_CLOSURE,
                },
            };
            let last = matches!(event, Inbound::Disconnect { .. });
            if events_tx.send(event).await.is_err() || last {
                break;
            }
        }
    });

    let meta = ConnectionMeta::new(KIND_DUPLEX)
        .with_headers(headers)
        .with_peer(peer_addr);
    let result = dispatcher
        .dispatch(Connection::new(meta, events_rx, WsSink { inner: sink }))
        .await;
    pump.abort();
    result
}
