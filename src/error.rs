//! WolfElect Error Types

use std::time::Duration;
use thiserror::Error;

/// Result type alias for WolfElect operations
pub type Result<T> = std::result::Result<T, Error>;

/// Broad classification of an [`Error`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Invalid construction arguments or configuration
    Configuration,
    /// Communication with the coordination service failed
    Transport,
    /// A conditional write found a different revision (or no key)
    Conflict,
    /// Our own membership key was missing from a fresh candidate read
    InvariantViolation,
}

/// WolfElect error types
#[derive(Error, Debug)]
pub enum Error {
    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid configuration file: {0}")]
    ConfigParse(#[from] toml::de::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // Coordination service errors
    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Conflict on {key}: expected revision {expected}")]
    Conflict { key: String, expected: u64 },

    #[error("Timed out after {after:?} waiting for {operation}")]
    Timeout { operation: String, after: Duration },

    // Election errors
    #[error("Invariant violation: membership key {key} missing from {path}")]
    InvariantViolation { key: String, path: String },
}

impl Error {
    /// Classify this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Config(_) | Error::ConfigParse(_) | Error::Io(_) => ErrorKind::Configuration,
            Error::Transport(_) | Error::Timeout { .. } => ErrorKind::Transport,
            Error::Conflict { .. } => ErrorKind::Conflict,
            Error::InvariantViolation { .. } => ErrorKind::InvariantViolation,
        }
    }

    /// Check if this is a conditional-write conflict
    pub fn is_conflict(&self) -> bool {
        matches!(self, Error::Conflict { .. })
    }

    /// Check if this error is retryable by starting a fresh session
    pub fn is_retryable(&self) -> bool {
        matches!(self.kind(), ErrorKind::Transport | ErrorKind::Conflict)
    }
}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        Error::Transport(format!("HTTP error: {}", e))
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Transport(format!("Malformed response: {}", e))
    }
}
