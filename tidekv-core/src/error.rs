//! # Error Handling
//!
//! Error types shared by every tidekv crate.
//!
//! ## Design Principles
//!
//! 1. **Absence is not an error**: lookups return `Option`, never `Err`
//! 2. **Contextual**: errors carry the file, id or field involved
//! 3. **Fail fast on bad bytes**: decoding reports `Corruption` instead of
//!    reading past a buffer
//! 4. **Recoverable vs fatal**: callers can ask which kind they got

use thiserror::Error;

/// Result type alias for tidekv operations
pub type Result<T> = std::result::Result<T, Error>;

/// Primary error type for tidekv
#[derive(Error, Debug)]
pub enum Error {
    // Storage Errors
    #[error("SSTable error: {message}")]
    SSTable { message: String },

    #[error("Manifest error: {message}")]
    Manifest { message: String },

    #[error("MemTable error: {message}")]
    MemTable { message: String },

    #[error("Compaction failed: {reason}")]
    Compaction { reason: String },

    #[error("Corruption detected: {details}")]
    Corruption { details: String },

    // Caller Errors
    #[error("Invalid argument: {message}")]
    InvalidArgument { message: String },

    // System Errors
    #[error("IO error: {message}")]
    Io { message: String, source: std::io::Error },

    #[error("Configuration error: {message}")]
    Configuration { message: String },

    #[error("Flush worker halted: {reason}")]
    WorkerHalted { reason: String },

    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl Error {
    /// Build an I/O error that names what was being done
    pub fn io(message: impl Into<String>, source: std::io::Error) -> Self {
        Error::Io {
            message: message.into(),
            source,
        }
    }

    /// Build a corruption error
    pub fn corruption(details: impl Into<String>) -> Self {
        Error::Corruption {
            details: details.into(),
        }
    }

    /// Check if error is recoverable
    pub fn is_recoverable(&self) -> bool {
        match self {
            Error::Io { .. } => false,
            Error::Corruption { .. } => false,
            Error::WorkerHalted { .. } => false,
            Error::Manifest { .. } => false,
            _ => true,
        }
    }

    /// Get error code for monitoring
    pub fn error_code(&self) -> &'static str {
        match self {
            Error::SSTable { .. } => "SSTABLE_ERROR",
            Error::Manifest { .. } => "MANIFEST_ERROR",
            Error::MemTable { .. } => "MEMTABLE_ERROR",
            Error::Compaction { .. } => "COMPACTION_ERROR",
            Error::Corruption { .. } => "CORRUPTION",
            Error::InvalidArgument { .. } => "INVALID_ARGUMENT",
            Error::Io { .. } => "IO_ERROR",
            Error::Configuration { .. } => "CONFIG_ERROR",
            Error::WorkerHalted { .. } => "WORKER_HALTED",
            Error::Internal { .. } => "INTERNAL_ERROR",
        }
    }
}

// Conversion from std::io::Error
impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Io {
            message: err.to_string(),
            source: err,
        }
    }
}

/// Extension trait for adding context to results
pub trait ResultExt<T> {
    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String;
}

impl<T> ResultExt<T> for Result<T> {
    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String,
    {
        self.map_err(|e| match e {
            // Keep the io::Error source intact so callers can still inspect it
            Error::Io { message, source } => Error::Io {
                message: format!("{}: {}", f(), message),
                source,
            },
            other => Error::Internal {
                message: format!("{}: {}", f(), other),
            },
        })
    }
}

impl<T> ResultExt<T> for std::io::Result<T> {
    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String,
    {
        self.map_err(|e| Error::Io {
            message: format!("{}: {}", f(), e),
            source: e,
        })
    }
}
