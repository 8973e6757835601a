use thiserror::Error;

/// Main error type for the admission gate
///
/// Expected non-events (cooldown active, gates not yet satisfied, thin samples) are
/// never errors; they surface as skip outcomes, block reasons or verdicts.
#[derive(Error, Debug)]
pub enum GateError {
    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // Serialization errors
    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    /// Ledger, cursor or audit state could not be read or written
    #[error("Persistence error: {0}")]
    Persistence(String),

    /// A single input record was malformed; siblings keep processing
    #[error("Invalid record: {0}")]
    InvalidRecord(String),

    /// The ledger broke one of its own invariants. Fatal.
    #[error("Invariant violation: {0}")]
    InvariantViolation(String),

    #[error("No validated snapshot has been published yet")]
    SnapshotUnavailable,

    #[error("Tick exceeded budget of {budget_ms}ms")]
    TickBudgetExceeded { budget_ms: u64 },

    // Generic errors
    #[error("Internal error: {0}")]
    Internal(String),

    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

impl GateError {
    /// Whether this error belongs to the class that must page an operator
    pub fn is_persistence(&self) -> bool {
        matches!(
            self,
            GateError::Persistence(_) | GateError::Io(_) | GateError::Json(_)
        )
    }

    /// Whether this error means the ledger can no longer be trusted
    pub fn is_fatal(&self) -> bool {
        matches!(self, GateError::InvariantViolation(_))
    }
}

/// Result type alias for GateError
pub type Result<T> = std::result::Result<T, GateError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn io_and_persistence_errors_are_alert_class() {
        let io = GateError::Io(std::io::Error::new(std::io::ErrorKind::Other, "disk"));
        assert!(io.is_persistence());
        assert!(GateError::Persistence("rename failed".into()).is_persistence());
        assert!(!GateError::InvalidRecord("bad line".into()).is_persistence());
    }

    #[test]
    fn only_invariant_violations_are_fatal() {
        assert!(GateError::InvariantViolation("quarantined with allow_core".into()).is_fatal());
        assert!(!GateError::TickBudgetExceeded { budget_ms: 10 }.is_fatal());
    }
}
