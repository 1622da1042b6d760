//! Logging setup
//!
//! Installs a `tracing` subscriber for processes embedding an election.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::LoggingConfig;

fn build_filter(config: &LoggingConfig) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level))
}

/// Initialize logging. Panics if a global subscriber is already installed.
pub fn init_logging(config: &LoggingConfig) {
    if !try_init_logging(config) {
        panic!("a global tracing subscriber is already installed");
    }
}

/// Initialize logging, returning `false` if a subscriber was already installed
pub fn try_init_logging(config: &LoggingConfig) -> bool {
    let registry = tracing_subscriber::registry().with(build_filter(config));

    let result = match config.format.as_str() {
        "compact" => registry
            .with(tracing_subscriber::fmt::layer().compact())
            .try_init(),
        _ => registry.with(tracing_subscriber::fmt::layer()).try_init(),
    };

    result.is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_second_init_is_rejected() {
        let config = LoggingConfig {
            level: "debug".into(),
            format: "compact".into(),
        };

        // Other tests in this binary may have installed a subscriber first
        let _ = try_init_logging(&config);
        assert!(!try_init_logging(&LoggingConfig::default()));
    }
}
