//! Error types for artisync

use std::fmt::Display;
use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for artisync operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for artisync
#[derive(Error, Debug)]
pub enum Error {
    /// Object does not exist
    #[error("Object not found: {key}")]
    NotFound { key: String },

    /// Object exists but carries no metadata tag with this name
    #[error("Tag '{tag}' not found on {key}")]
    TagNotFound { key: String, tag: String },

    /// Backend failure (transport, auth, service error)
    #[error("Storage error during {op} of '{key}': {message}")]
    Storage {
        op: &'static str,
        key: String,
        message: String,
    },

    /// Local I/O errors outside of tree traversal
    #[error("I/O error: {message}")]
    Io {
        message: String,
        #[source]
        source: std::io::Error,
    },

    /// Local filesystem walk failed
    #[error("Traversal error at {}: {message}", path.display())]
    Traversal { path: PathBuf, message: String },

    /// A per-file operation failed in the middle of a pass
    #[error("Transfer failed: {op} '{key}'")]
    Transfer {
        op: &'static str,
        key: String,
        #[source]
        source: Box<Error>,
    },

    /// Copy step of a rename succeeded but the source could not be removed
    #[error("Rename of '{from}' to '{to}' left both objects in place")]
    PartialRename {
        from: String,
        to: String,
        #[source]
        source: Box<Error>,
    },

    /// Key cannot be represented by the backend or the local filesystem
    #[error("Invalid key '{key}': {reason}")]
    InvalidKey { key: String, reason: String },

    /// Operation was cancelled
    #[error("Operation cancelled")]
    Cancelled,

    /// Configuration errors
    #[error("Configuration error: {message}")]
    Config { message: String },

    /// Invalid URI format
    #[error("Invalid URI: {uri} - {reason}")]
    InvalidUri { uri: String, reason: String },
}

impl Error {
    /// Create an I/O error with context
    pub fn io(message: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            message: message.into(),
            source,
        }
    }

    /// Create a backend error for an operation on a key
    pub fn storage(op: &'static str, key: impl Into<String>, err: impl Display) -> Self {
        Self::Storage {
            op,
            key: key.into(),
            message: err.to_string(),
        }
    }

    /// Wrap a primitive failure that happened during a pass.
    ///
    /// Cancellation is passed through unchanged so callers can tell it apart.
    pub fn transfer(op: &'static str, key: impl Into<String>, err: Error) -> Self {
        match err {
            Error::Cancelled => Error::Cancelled,
            other => Self::Transfer {
                op,
                key: key.into(),
                source: Box::new(other),
            },
        }
    }

    /// Create a config error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Create an invalid key error
    pub fn invalid_key(key: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidKey {
            key: key.into(),
            reason: reason.into(),
        }
    }

    /// True if this error, or the error a transfer wraps, is `NotFound`
    pub fn is_not_found(&self) -> bool {
        match self {
            Error::NotFound { .. } => true,
            Error::Transfer { source, .. } => source.is_not_found(),
            _ => false,
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Self::Io {
            message: err.to_string(),
            source: err,
        }
    }
}

impl From<toml::de::Error> for Error {
    fn from(err: toml::de::Error) -> Self {
        Self::Config {
            message: format!("TOML parse error: {}", err),
        }
    }
}
