//! WolfElect Configuration
//!
//! This module provides configuration structures for joining an election
//! and for reaching the coordination service.

use serde::{Deserialize, Deserializer, Serialize};
use std::time::Duration;

/// Default membership key TTL in seconds
pub const DEFAULT_TTL_SECS: u64 = 10;

/// Main WolfElect configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WolfElectConfig {
    /// Election participation
    pub election: ElectionConfig,

    /// Coordination service endpoint
    #[serde(default)]
    pub etcd: EtcdConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Election configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ElectionConfig {
    /// Election path (namespace for membership keys)
    pub path: String,

    /// Candidate id, stored as the membership key value
    pub name: String,

    /// Membership key TTL in seconds
    #[serde(default = "default_ttl_secs", deserialize_with = "deserialize_ttl")]
    pub ttl_secs: u64,

    /// Abandon a refresh that takes longer than one TTL and restart
    #[serde(default = "default_true")]
    pub refresh_guard: bool,

    /// Delete the membership key when the session stops
    #[serde(default = "default_true")]
    pub release_on_stop: bool,
}

/// etcd connection configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EtcdConfig {
    /// Base URL of an etcd member
    #[serde(default = "default_etcd_endpoint")]
    pub endpoint: String,

    /// Timeout for non-blocking requests in milliseconds
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format (pretty, compact)
    #[serde(default = "default_log_format")]
    pub format: String,
}

// Default value functions
fn default_ttl_secs() -> u64 {
    DEFAULT_TTL_SECS
}

fn default_true() -> bool {
    true
}

fn default_etcd_endpoint() -> String {
    "http://127.0.0.1:2379".to_string()
}

fn default_request_timeout_ms() -> u64 {
    5000
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

/// Coerce a TTL setting to whole seconds.
///
/// Anything that is not a positive integer falls back to [`DEFAULT_TTL_SECS`].
pub fn coerce_ttl(raw: &str) -> u64 {
    match raw.trim().parse::<u64>() {
        Ok(secs) if secs > 0 => secs,
        _ => DEFAULT_TTL_SECS,
    }
}

fn deserialize_ttl<'de, D>(deserializer: D) -> std::result::Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum RawTtl {
        Int(i64),
        Float(f64),
        Text(String),
    }

    Ok(match RawTtl::deserialize(deserializer)? {
        RawTtl::Int(secs) if secs > 0 => secs as u64,
        RawTtl::Int(_) => DEFAULT_TTL_SECS,
        RawTtl::Float(secs) if secs >= 1.0 => secs as u64,
        RawTtl::Float(_) => DEFAULT_TTL_SECS,
        RawTtl::Text(text) => coerce_ttl(&text),
    })
}

impl Default for EtcdConfig {
    fn default() -> Self {
        Self {
            endpoint: default_etcd_endpoint(),
            request_timeout_ms: default_request_timeout_ms(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

impl ElectionConfig {
    /// Create an election configuration.
    ///
    /// The TTL is kept in whole seconds: a partial second rounds up, and a
    /// zero TTL is coerced to the default.
    pub fn new(path: impl Into<String>, name: impl Into<String>, ttl: Duration) -> Self {
        let ttl_secs = match ttl.as_secs() + u64::from(ttl.subsec_nanos() > 0) {
            0 => DEFAULT_TTL_SECS,
            secs => secs,
        };

        Self {
            path: path.into(),
            name: name.into(),
            ttl_secs,
            refresh_guard: true,
            release_on_stop: true,
        }
    }

    /// Enable or disable the refresh guard
    pub fn with_refresh_guard(mut self, enabled: bool) -> Self {
        self.refresh_guard = enabled;
        self
    }

    /// Enable or disable deleting the membership key on stop
    pub fn with_release_on_stop(mut self, enabled: bool) -> Self {
        self.release_on_stop = enabled;
        self
    }

    /// Validate the election settings
    pub fn validate(&self) -> crate::Result<()> {
        if self.path.trim().is_empty() {
            return Err(crate::Error::Config("election path not specified".into()));
        }

        if self.name.trim().is_empty() {
            return Err(crate::Error::Config("candidate name not specified".into()));
        }

        if self.ttl_secs == 0 {
            return Err(crate::Error::Config("election.ttl_secs must be positive".into()));
        }

        Ok(())
    }

    /// Membership key TTL
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }

    /// Interval between membership refreshes (half the TTL)
    pub fn refresh_interval(&self) -> Duration {
        self.ttl() / 2
    }

    /// Upper bound on a single refresh call, if the guard is enabled
    pub fn refresh_timeout(&self) -> Option<Duration> {
        self.refresh_guard.then(|| self.ttl())
    }
}

impl EtcdConfig {
    /// Request timeout as Duration
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

impl WolfElectConfig {
    /// Load configuration from a TOML file
    pub fn from_file(path: &std::path::Path) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_str(&content)
    }

    /// Load configuration from a TOML string
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(content: &str) -> crate::Result<Self> {
        let config: WolfElectConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> crate::Result<()> {
        self.election.validate()?;

        if self.etcd.endpoint.is_empty() {
            return Err(crate::Error::Config("etcd.endpoint cannot be empty".into()));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_parse_config() {
        let toml = r#"
[election]
path = "/services/scheduler"
name = "node-1"
ttl_secs = 6

[etcd]
endpoint = "http://10.0.0.5:2379"

[logging]
level = "debug"
"#;

        let config = WolfElectConfig::from_str(toml).unwrap();
        assert_eq!(config.election.path, "/services/scheduler");
        assert_eq!(config.election.name, "node-1");
        assert_eq!(config.election.ttl(), Duration::from_secs(6));
        assert_eq!(config.election.refresh_interval(), Duration::from_secs(3));
        assert_eq!(config.election.refresh_timeout(), Some(Duration::from_secs(6)));
        assert!(config.election.release_on_stop);
        assert_eq!(config.etcd.request_timeout(), Duration::from_millis(5000));
        assert_eq!(config.logging.format, "pretty");
    }

    #[test]
    fn test_ttl_coercion() {
        let parse = |ttl: &str| {
            let toml = format!("[election]\npath = \"/svc\"\nname = \"n1\"\nttl_secs = {}\n", ttl);
            WolfElectConfig::from_str(&toml).unwrap().election.ttl_secs
        };

        assert_eq!(parse("\"123\""), 123);
        assert_eq!(parse("\"soon\""), DEFAULT_TTL_SECS);
        assert_eq!(parse("0"), DEFAULT_TTL_SECS);
        assert_eq!(parse("-4"), DEFAULT_TTL_SECS);
        assert_eq!(parse("2.5"), 2);
        assert_eq!(coerce_ttl(" 30 "), 30);

        let missing = WolfElectConfig::from_str("[election]\npath = \"/svc\"\nname = \"n1\"\n").unwrap();
        assert_eq!(missing.election.ttl_secs, DEFAULT_TTL_SECS);
    }

    #[test]
    fn test_validation_rejects_blank_fields() {
        let err = ElectionConfig::new("  ", "n1", Duration::from_secs(5)).validate().unwrap_err();
        assert!(err.to_string().contains("election path not specified"));

        let err = ElectionConfig::new("/svc", "", Duration::from_secs(5)).validate().unwrap_err();
        assert!(err.to_string().contains("candidate name not specified"));

        let config = ElectionConfig::new("/svc", "n1", Duration::ZERO);
        assert_eq!(config.ttl_secs, DEFAULT_TTL_SECS);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_second_ttl_rounds_up() {
        let config = ElectionConfig::new("/svc", "n1", Duration::from_millis(500));
        assert_eq!(config.ttl(), Duration::from_secs(1));

        let config = ElectionConfig::new("/svc", "n1", Duration::from_millis(1500));
        assert_eq!(config.ttl(), Duration::from_secs(2));
        assert_eq!(config.refresh_interval(), Duration::from_secs(1));

        let config = ElectionConfig::new("/svc", "n1", Duration::from_secs(3));
        assert_eq!(config.ttl_secs, 3);
    }

    #[test]
    fn test_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[election]\npath = \"/svc\"\nname = \"n2\"\nrefresh_guard = false").unwrap();

        let config = WolfElectConfig::from_file(file.path()).unwrap();
        assert_eq!(config.election.name, "n2");
        assert_eq!(config.election.refresh_timeout(), None);

        let missing = WolfElectConfig::from_file(std::path::Path::new("/nonexistent/wolfelect.toml"));
        assert!(matches!(missing, Err(crate::Error::Io(_))));
    }
}
