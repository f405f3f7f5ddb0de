//! Session server configuration and builder.

use std::sync::Arc;
use std::time::Duration;

use crate::server::dispatch::Dispatcher;
use crate::server::registry::SessionRegistry;
use crate::token::{TokenSource, UuidTokens};

/// Default session lifetime after the last refreshing exchange.
pub const DEFAULT_SESSION_TTL: Duration = Duration::from_secs(30);

/// Default ping cadence advertised to clients.
pub const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(10);

/// Default cookie carrying the session token.
pub const DEFAULT_COOKIE_NAME: &str = "sessionid";

/// Settings shared by every connection handler.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub session_ttl: Duration,
    pub heartbeat_interval: Duration,
    /// Close a bound duplex connection that stays silent this long.
    pub heartbeat_timeout: Option<Duration>,
    /// Let duplex heartbeats refresh the session like an exchange does.
    pub refresh_on_heartbeat: bool,
    pub cookie_name: String,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            session_ttl: DEFAULT_SESSION_TTL,
            heartbeat_interval: DEFAULT_HEARTBEAT_INTERVAL,
            heartbeat_timeout: None,
            refresh_on_heartbeat: false,
            cookie_name: DEFAULT_COOKIE_NAME.to_string(),
        }
    }
}

/// Builder for a session-tracking [`Dispatcher`].
pub struct SessionServer {
    config: SessionConfig,
    tokens: Box<dyn TokenSource>,
}

impl SessionServer {
    /// Creates a builder with default settings.
    pub fn builder() -> Self {
        Self {
            config: SessionConfig::default(),
            tokens: Box::new(UuidTokens),
        }
    }

    /// Sets how long a session lives after its last refresh.
    pub fn session_ttl(mut self, ttl: Duration) -> Self {
        self.config.session_ttl = ttl;
        self
    }

    /// Sets the ping cadence advertised in responses.
    pub fn heartbeat_interval(mut self, interval: Duration) -> Self {
        self.config.heartbeat_interval = interval;
        self
    }

    /// Sets the silence limit for bound duplex connections.
    pub fn heartbeat_timeout(mut self, timeout: Duration) -> Self {
        self.config.heartbeat_timeout = Some(timeout);
        self
    }

    /// Makes duplex heartbeats refresh the session TTL.
    pub fn refresh_on_heartbeat(mut self, enabled: bool) -> Self {
        self.config.refresh_on_heartbeat = enabled;
        self
    }

    /// Sets the cookie name carrying the session token.
    pub fn cookie_name(mut self, name: impl Into<String>) -> Self {
        self.config.cookie_name = name.into();
        self
    }

    /// Replaces the token generator.
    pub fn token_source(mut self, tokens: impl TokenSource) -> Self {
        self.tokens = Box::new(tokens);
        self
    }

    /// The settings accumulated so far.
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Builds the dispatcher along with a fresh registry.
    pub fn build(self) -> Dispatcher {
        let registry = SessionRegistry::from_boxed(self.tokens);
        Dispatcher::new(registry, Arc::new(self.config))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::token::SessionToken;

    struct Fixed;

    impl TokenSource for Fixed {
        fn generate(&self) -> SessionToken {
            SessionToken::from("fixed")
        }
    }

    #[test]
    fn defaults() {
        let server = SessionServer::builder();
        let config = server.config();
        assert_eq!(config.session_ttl, Duration::from_secs(30));
        assert_eq!(config.heartbeat_interval, Duration::from_secs(10));
        assert_eq!(config.heartbeat_timeout, None);
        assert!(!config.refresh_on_heartbeat);
        assert_eq!(config.cookie_name, "sessionid");
    }

    #[test]
    fn setters_chain() {
        let server = SessionServer::builder()
            .session_ttl(Duration::from_secs(5))
            .heartbeat_interval(Duration::from_secs(1))
            .heartbeat_timeout(Duration::from_secs(3))
            .refresh_on_heartbeat(true)
            .cookie_name("sid");
        let config = server.config();
        assert_eq!(config.session_ttl, Duration::from_secs(5));
        assert_eq!(config.heartbeat_timeout, Some(Duration::from_secs(3)));
        assert!(config.refresh_on_heartbeat);
        assert_eq!(config.cookie_name, "sid");
    }

    #[tokio::test(start_paused = true)]
    async fn custom_token_source_reaches_registry() {
        let dispatcher = SessionServer::builder().token_source(Fixed).build();
        let (token, _) = dispatcher
            .registry()
            .create(tokio::time::Instant::now(), Duration::from_secs(1));
        assert_eq!(token.as_str(), "fixed");
    }
}
