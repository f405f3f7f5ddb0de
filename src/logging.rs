//! Default log sink installation.
//!
//! The library only emits `tracing` events. Hosts that already install a
//! subscriber keep theirs; [`init`] is for hosts that don't.

use tracing_subscriber::EnvFilter;

/// Environment variable controlling verbosity.
pub const LOG_ENV: &str = "LOGLEVEL";

const DEFAULT_DIRECTIVE: &str = "info";

/// Installs a stderr fmt subscriber filtered by [`LOG_ENV`].
///
/// Returns `false` if a global subscriber was already set, in which case the
/// existing one stays in place.
pub fn init() -> bool {
    let filter = filter_from(std::env::var(LOG_ENV).ok().as_deref());
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init()
        .is_ok()
}

/// Builds a filter from a `LOGLEVEL` value.
///
/// Accepts `EnvFilter` directives or numeric levels on the 10/20/30/40/50
/// scale. Negative or unparsable values fall back to `info`.
pub fn filter_from(value: Option<&str>) -> EnvFilter {
    let directive = value.map(str::trim).filter(|v| !v.is_empty());
    let directive = match directive {
        None => DEFAULT_DIRECTIVE,
        Some(v) => match v.parse::<i64>() {
            Ok(n) => numeric_level(n),
            Err(_) => v,
        },
    };
    EnvFilter::try_new(directive).unwrap_or_else(|_| EnvFilter::new(DEFAULT_DIRECTIVE))
}

fn numeric_level(n: i64) -> &'static str {
    match n {
        i64::MIN..=-1 => DEFAULT_DIRECTIVE,
        0..=10 => "debug",
        11..=20 => "info",
        21..=30 => "warn",
        _ => "error",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracing::level_filters::LevelFilter;

    #[test]
    fn numeric_levels() {
        assert_eq!(numeric_level(10), "debug");
        assert_eq!(numeric_level(20), "info");
        assert_eq!(numeric_level(30), "warn");
        assert_eq!(numeric_level(40), "error");
        assert_eq!(numeric_level(-5), "info");
    }

    #[test]
    fn filter_from_values() {
        let hint = |v: Option<&str>| filter_from(v).max_level_hint();
        assert_eq!(hint(None), Some(LevelFilter::INFO));
        assert_eq!(hint(Some("  ")), Some(LevelFilter::INFO));
        assert_eq!(hint(Some("10")), Some(LevelFilter::DEBUG));
        assert_eq!(hint(Some("45")), Some(LevelFilter::ERROR));
        assert_eq!(hint(Some("warn")), Some(LevelFilter::WARN));
    }

    #[test]
    fn init_twice_does_not_panic() {
        let _ = init();
        assert!(!init());
    }
}
