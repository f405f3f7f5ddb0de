//! Session server: registry, expiry, and per-connection handlers.

pub mod builder;
pub mod dispatch;
pub mod duplex;
pub mod exchange;
pub mod registry;
pub mod state_machine;
mod sweeper;
pub mod transport;

pub use builder::{SessionConfig, SessionServer};
pub use dispatch::Dispatcher;
pub use duplex::{DuplexHandler, DuplexOutcome};
pub use exchange::ExchangeHandler;
pub use registry::{SessionRecord, SessionRegistry, Sweep};
pub use state_machine::DuplexState;
pub use transport::{Connection, ConnectionKind, ConnectionMeta, ConnectionSink, TransportEnd, pipe};
