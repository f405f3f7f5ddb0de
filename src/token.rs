//! Session tokens and their generation.

use std::fmt;

/// Length of a token produced by [`UuidTokens`]: 32 lowercase hex digits.
pub const TOKEN_LEN: usize = 32;

/// Opaque session identifier handed to clients.
///
/// Tokens are unguessable random values, not credentials.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SessionToken(pub String);

impl SessionToken {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SessionToken {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Produces candidate session tokens.
///
/// The registry asks for candidates while holding its lock and retries until
/// one is not already in use, so an implementation only needs to make
/// collisions rare, not impossible.
pub trait TokenSource: Send + Sync + 'static {
    fn generate(&self) -> SessionToken;
}

/// Default source: 122 random bits from a v4 UUID, rendered without hyphens.
#[derive(Debug, Default, Clone, Copy)]
pub struct UuidTokens;

impl TokenSource for UuidTokens {
    fn generate(&self) -> SessionToken {
        SessionToken(uuid::Uuid::new_v4().simple().to_string())
    }
}
