//! Public error taxonomy of the core.

use crate::config::ConfigError;
use crate::counter::CounterError;
use crate::crypto::SigningError;
use std::fmt;
use thiserror::Error;

/// Why a [`crate::Context`] could not be created.
#[derive(Debug, Error)]
pub enum InitError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Store(#[from] CounterError),

    #[error("No integrity primitive configured")]
    MissingPrimitive,
}

#[derive(Debug, Error)]
pub enum SlpError {
    /// Store cannot be created or opened; fatal to the session.
    #[error("Initialization failed: {0}")]
    Initialization(#[from] InitError),

    /// I/O failure on the counter. Not retried within the call; a fresh
    /// issuance may be attempted later.
    #[error("Storage failure: {0}")]
    StorageFailure(#[source] CounterError),

    /// Counter is at `u64::MAX`. Permanent and security-critical.
    #[error("Counter overflow: the monotonic counter is exhausted")]
    CounterOverflow,

    /// Integrity primitive could not produce a tag.
    #[error("Signing failure: {0}")]
    SigningFailure(#[from] SigningError),
}

impl From<CounterError> for SlpError {
    fn from(e: CounterError) -> Self {
        match e {
            CounterError::Overflow => SlpError::CounterOverflow,
            other => SlpError::StorageFailure(other),
        }
    }
}

/// Discriminant of [`SlpError`] for callers that branch on the kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Initialization,
    StorageFailure,
    CounterOverflow,
    SigningFailure,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorKind::Initialization => write!(f, "InitializationError"),
            ErrorKind::StorageFailure => write!(f, "StorageFailure"),
            ErrorKind::CounterOverflow => write!(f, "CounterOverflow"),
            ErrorKind::SigningFailure => write!(f, "SigningFailure"),
        }
    }
}

impl SlpError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            SlpError::Initialization(_) => ErrorKind::Initialization,
            SlpError::StorageFailure(_) => ErrorKind::StorageFailure,
            SlpError::CounterOverflow => ErrorKind::CounterOverflow,
            SlpError::SigningFailure(_) => ErrorKind::SigningFailure,
        }
    }

    /// Overflow and corrupt records point at tampering or exhaustion.
    pub fn is_security_critical(&self) -> bool {
        matches!(
            self,
            SlpError::CounterOverflow | SlpError::StorageFailure(CounterError::Corrupt(_))
        )
    }
}
