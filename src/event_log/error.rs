//! Event Log Errors
//!
//! Error types for event log operations.

/// Errors that can occur in the event log
#[derive(Debug, thiserror::Error)]
pub enum LogError {
    /// Storage could not be reached or the call timed out
    #[error("Event log unavailable: {0}")]
    Unavailable(String),

    /// Stored history could not be parsed
    #[error("Corrupt event log {key} at line {line}: {reason}")]
    Corrupt {
        key: String,
        line: usize,
        reason: String,
    },

    /// Conditional write kept losing against concurrent writers
    #[error("Concurrent append conflict on {key} after {attempts} attempts")]
    Conflict { key: String, attempts: u32 },

    /// The store refused the key derived from the aggregate id
    #[error("Invalid event log key: {0}")]
    InvalidKey(String),

    /// Event could not be encoded
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl LogError {
    /// Check if the caller may retry the whole operation
    pub fn is_retryable(&self) -> bool {
        matches!(self, LogError::Unavailable(_) | LogError::Conflict { .. })
    }

    pub fn is_corrupt(&self) -> bool {
        matches!(self, LogError::Corrupt { .. })
    }
}
