/*!
 * Error types for Locus
 */

use locus_core_failover::{AdapterError, FailoverError};
use std::fmt;
use std::io;
use std::path::PathBuf;

pub type Result<T> = std::result::Result<T, LocusError>;

/// Exit code constants for structured process exit
pub const EXIT_SUCCESS: i32 = 0;
pub const EXIT_PARTIAL: i32 = 1;
pub const EXIT_FATAL: i32 = 2;
pub const EXIT_EXHAUSTED: i32 = 3;

#[derive(Debug)]
pub enum LocusError {
    /// Configuration error
    Config(String),

    /// I/O error
    Io(io::Error),

    /// A file that should exist does not
    NotFound(PathBuf),

    /// Error reported by the failover core
    Failover(FailoverError),

    /// A provider could not be built from its spec
    Provider { name: String, message: String },

    /// JSON or TOML (de)serialization error
    Serialization(String),
}

impl LocusError {
    /// Get the process exit code for this error
    pub fn exit_code(&self) -> i32 {
        match self {
            LocusError::Config(_) | LocusError::NotFound(_) | LocusError::Provider { .. } => {
                EXIT_FATAL
            }
            LocusError::Failover(e) if e.is_exhausted() => EXIT_EXHAUSTED,
            LocusError::Failover(e) if e.is_configuration() => EXIT_FATAL,
            _ => EXIT_PARTIAL,
        }
    }

    /// Check if this error is fatal (should not retry)
    pub fn is_fatal(&self) -> bool {
        match self {
            LocusError::Config(_) => true,
            LocusError::NotFound(_) => true,
            LocusError::Provider { .. } => true,
            LocusError::Serialization(_) => true,
            LocusError::Failover(e) => e.is_configuration() || e.is_exhausted(),

            LocusError::Io(_) => false,
        }
    }

    /// Get error category for logging
    pub fn category(&self) -> ErrorCategory {
        match self {
            LocusError::Config(_) | LocusError::NotFound(_) => ErrorCategory::Configuration,
            LocusError::Io(_) => ErrorCategory::IoError,
            LocusError::Failover(_) => ErrorCategory::Failover,
            LocusError::Provider { .. } => ErrorCategory::Provider,
            LocusError::Serialization(_) => ErrorCategory::Codec,
        }
    }
}

/// Error category for classification and reporting
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Configuration errors
    Configuration,
    /// I/O operation errors
    IoError,
    /// Provider chain errors
    Failover,
    /// Provider construction errors
    Provider,
    /// Encoding/decoding errors
    Codec,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorCategory::Configuration => write!(f, "configuration"),
            ErrorCategory::IoError => write!(f, "io"),
            ErrorCategory::Failover => write!(f, "failover"),
            ErrorCategory::Provider => write!(f, "provider"),
            ErrorCategory::Codec => write!(f, "codec"),
        }
    }
}

impl fmt::Display for LocusError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LocusError::Config(msg) => write!(f, "Configuration error: {}", msg),
            LocusError::Io(err) => write!(f, "I/O error: {}", err),
            LocusError::NotFound(path) => write!(f, "File not found: {}", path.display()),
            LocusError::Failover(err) => write!(f, "{}", err),
            LocusError::Provider { name, message } => {
                write!(f, "Provider '{}' error: {}", name, message)
            }
            LocusError::Serialization(msg) => write!(f, "Serialization error: {}", msg),
        }
    }
}

impl std::error::Error for LocusError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            LocusError::Io(err) => Some(err),
            LocusError::Failover(err) => Some(err),
            _ => None,
        }
    }
}

impl From<io::Error> for LocusError {
    fn from(err: io::Error) -> Self {
        LocusError::Io(err)
    }
}

impl From<FailoverError> for LocusError {
    fn from(err: FailoverError) -> Self {
        LocusError::Failover(err)
    }
}

impl From<AdapterError> for LocusError {
    fn from(err: AdapterError) -> Self {
        LocusError::Failover(FailoverError::Adapter(err))
    }
}

impl From<serde_json::Error> for LocusError {
    fn from(err: serde_json::Error) -> Self {
        LocusError::Serialization(err.to_string())
    }
}

impl From<toml::de::Error> for LocusError {
    fn from(err: toml::de::Error) -> Self {
        LocusError::Serialization(err.to_string())
    }
}

impl From<toml::ser::Error> for LocusError {
    fn from(err: toml::ser::Error) -> Self {
        LocusError::Serialization(err.to_string())
    }
}
