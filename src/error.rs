//! Error taxonomy for the lister.
//!
//! Collaborator traits return `anyhow::Error`; components map those into
//! `ListerError` at their boundary so the scheduler can tell a fatal
//! startup problem from a recoverable cycle failure.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ListerError {
    /// A required setting (signing key, RPC endpoint) is absent.
    #[error("Missing required configuration: {0}")]
    ConfigMissing(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Balance or approval query failed. Not retried by the reader.
    #[error("Network read failed: {0}")]
    NetworkRead(String),

    #[error("Transaction failed: {0}")]
    Transaction(String),

    #[error("{operation} failed after {attempts} attempts: {last_error}")]
    ExhaustedRetries {
        operation: String,
        attempts: u32,
        last_error: String,
    },

    /// Shutdown was requested while suspended.
    #[error("Cancelled by shutdown request")]
    Cancelled,
}

impl ListerError {
    /// Whether the process should stop instead of retrying the cycle.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            ListerError::ConfigMissing(_) | ListerError::InvalidConfig(_)
        )
    }
}

pub type ListerResult<T> = std::result::Result<T, ListerError>;
