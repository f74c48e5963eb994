//! This module defines the errors that can be returned by meshlb.
//!
//! Only [`Error::Config`] is meant to terminate a process (and only during startup).
//! Every other variant is recoverable: decode failures drop a membership event, render and
//! process failures skip a generation cycle, and io failures are retried by whoever issued the call.

use std::fmt::Display;

use serde::Serialize;

pub type Result<T> = std::result::Result<T, Error>;

/// Error enum with all possible variants
#[derive(Debug, Serialize)]
pub enum Error {
    /// Bad or missing required configuration
    Config { reason: String },
    /// Peer metadata that could not be decoded
    Decode { reason: String },
    /// Network, object store or filesystem failure
    Io { reason: String },
    /// Proxy configuration could not be rendered
    Render { reason: String },
    /// The external reload command failed
    Process {
        reason: String,
        stdout: String,
        stderr: String,
    },
    Logic { reason: String },
}

impl Error {
    /// Returns true if this is an instance of a [`Error::Config`] variant
    pub fn is_config(&self) -> bool {
        matches!(self, Error::Config { .. })
    }

    /// Returns true if this is an instance of a [`Error::Decode`] variant
    pub fn is_decode(&self) -> bool {
        matches!(self, Error::Decode { .. })
    }

    /// Returns true if this is an instance of a [`Error::Io`] variant
    pub fn is_io(&self) -> bool {
        matches!(self, Error::Io { .. })
    }
}

impl Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self)
    }
}

impl std::error::Error for Error {}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Self::Io {
            reason: err.to_string(),
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Self::Io {
            reason: format!("invalid json document - {}", err),
        }
    }
}

impl From<object_store::Error> for Error {
    fn from(err: object_store::Error) -> Self {
        Self::Io {
            reason: err.to_string(),
        }
    }
}

impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        Self::Io {
            reason: err.to_string(),
        }
    }
}

impl From<tokio::time::error::Elapsed> for Error {
    fn from(err: tokio::time::error::Elapsed) -> Self {
        Self::Io {
            reason: format!("operation timed out - {}", err),
        }
    }
}
