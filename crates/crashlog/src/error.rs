//! Error types for crashlog.
//!
//! Only setup-time operations surface these errors: configuration loading,
//! interceptor installation and starting the startup sweep. Record store
//! operations recover from I/O failures locally and never return them to the
//! host application.

use std::path::PathBuf;
use thiserror::Error;

/// The main error type for crashlog operations.
#[derive(Error, Debug)]
pub enum Error {
    // === Storage Errors ===
    /// Failed to create a required directory.
    #[error("failed to create directory {path}: {source}")]
    DirectoryCreate {
        /// Path that couldn't be created.
        path: PathBuf,
        /// The underlying error.
        #[source]
        source: std::io::Error,
    },

    /// A record identifier does not name a plain file inside a partition.
    #[error("invalid record identifier: {0}")]
    InvalidRecordId(String),

    // === Configuration Errors ===
    /// Failed to load configuration.
    #[error("failed to load configuration: {0}")]
    ConfigLoad(Box<figment::Error>),

    /// Configuration validation failed.
    #[error("invalid configuration: {message}")]
    ConfigValidation {
        /// Description of the validation failure.
        message: String,
    },

    // === Interceptor Errors ===
    /// Registering a fault handler for a signal failed.
    #[error("failed to install handler for {signal}: {source}")]
    SignalInstall {
        /// Name of the signal, e.g. `SIGSEGV`.
        signal: &'static str,
        /// The underlying OS error.
        #[source]
        source: std::io::Error,
    },

    /// The startup sweep thread could not be spawned.
    #[error("failed to start startup sweep: {0}")]
    SweepSpawn(#[source] std::io::Error),

    // === I/O Errors ===
    /// File system operation failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // === Generic Errors ===
    /// An internal error occurred (bug).
    #[error("internal error: {0}")]
    Internal(String),
}

/// A specialized Result type for crashlog operations.
pub type Result<T> = std::result::Result<T, Error>;

impl From<figment::Error> for Error {
    fn from(err: figment::Error) -> Self {
        Self::ConfigLoad(Box::new(err))
    }
}

impl Error {
    /// Create a new internal error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// Create a configuration validation error.
    #[must_use]
    pub fn config_validation(message: impl Into<String>) -> Self {
        Self::ConfigValidation {
            message: message.into(),
        }
    }

    /// Create a signal installation error from the current `errno`.
    #[must_use]
    pub fn signal_install(signal: &'static str) -> Self {
        Self::SignalInstall {
            signal,
            source: std::io::Error::last_os_error(),
        }
    }

    /// Check if this error came from configuration loading or validation.
    #[must_use]
    pub fn is_config_error(&self) -> bool {
        matches!(self, Self::ConfigLoad(_) | Self::ConfigValidation { .. })
    }

    /// Check if this error is a missing file or directory.
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        match self {
            Self::Io(err) | Self::DirectoryCreate { source: err, .. } => {
                err.kind() == std::io::ErrorKind::NotFound
            }
            _ => false,
        }
    }
}
