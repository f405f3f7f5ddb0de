//! Heartline — liveness-aware session tracking.
//!
//! Clients hold a session through short request/response exchanges and keep
//! one or more long-lived duplex connections open purely as a heartbeat. The
//! crate correlates those connections with expiring sessions, notices when a
//! connection goes away, and expires idle sessions without polling.
//!
//! # Architecture
//!
//! - **`server::registry`** — Session records, connection counts, expiry
//! - **`server::sweeper`** — Sleeps until the next expiry, exits when idle
//! - **`server::exchange`** — Request/response handler (create or refresh)
//! - **`server::duplex`** — Heartbeat connection handler (bind, echo, close)
//! - **`server::dispatch`** — Routes each connection by its declared kind
//! - **`message`** — Events from and messages to the transport
//! - **`ws`** — WebSocket adapter for duplex connections (feature-gated)

pub mod close;
pub mod error;
pub mod headers;
pub mod logging;
pub mod message;
pub mod server;
pub mod token;

#[cfg(feature = "ws")]
pub mod ws;
