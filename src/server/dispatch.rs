//! Routes each connection to its handler.

use std::sync::Arc;

use tokio::task::JoinHandle;

use crate::error::SessionError;
use crate::server::builder::SessionConfig;
use crate::server::duplex::DuplexHandler;
use crate::server::exchange::ExchangeHandler;
use crate::server::registry::SessionRegistry;
use crate::server::transport::{Connection, ConnectionKind, ConnectionSink};

/// Entry point for the transport: one call per accepted connection.
///
/// Cheap to clone. All clones share the same registry.
#[derive(Clone)]
pub struct Dispatcher {
    registry: SessionRegistry,
    config: Arc<SessionConfig>,
}

impl Dispatcher {
    pub fn new(registry: SessionRegistry, config: Arc<SessionConfig>) -> Self {
        Self { registry, config }
    }

    pub fn registry(&self) -> &SessionRegistry {
        &self.registry
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Runs the handler matching the connection's declared kind.
    ///
    /// An unrecognised kind is rejected before any state is created.
    pub async fn dispatch<S: ConnectionSink>(
        &self,
        conn: Connection<S>,
    ) -> Result<(), SessionError> {
        let peer_addr = conn.meta.peer_addr;
        let kind = match ConnectionKind::parse(&conn.meta.kind) {
            Ok(kind) => kind,
            Err(e) => {
                tracing::warn!(peer = ?peer_addr, error = %e, "rejecting connection");
                return Err(e);
            }
        };
        tracing::debug!(peer = ?peer_addr, ?kind, "dispatching connection");

        match kind {
            ConnectionKind::Exchange => {
                ExchangeHandler::new(self.registry.clone(), self.config.clone(), conn)
                    .run()
                    .await
            }
            ConnectionKind::Duplex => {
                let outcome = DuplexHandler::new(self.registry.clone(), self.config.clone(), conn)
                    .run()
                    .await?;
                tracing::debug!(peer = ?peer_addr, ?outcome, "duplex connection finished");
                Ok(())
            }
        }
    }

    /// Dispatches on a new task. Errors are logged; they only ever concern
    /// this one connection.
    pub fn spawn<S: ConnectionSink>(&self, conn: Connection<S>) -> JoinHandle<()> {
        let dispatcher = self.clone();
        tokio::spawn(async move {
            let peer_addr = conn.meta.peer_addr;
            if let Err(e) = dispatcher.dispatch(conn).await {
                tracing::debug!(peer = ?peer_addr, error = %e, "connection closed with error");
            }
        })
    }
}
