// Domain errors - Validation failures raised while building domain values

use std::fmt;

/// Domain-specific error types
#[derive(Debug, Clone, PartialEq)]
pub enum DomainError {
    /// Invalid arguments provided
    BadArgs(String),
    /// Configuration rejected at construction time
    ConfigInvalid(String),
    /// Invalid time range
    InvalidTimeRange(String),
    /// Classifier produced a verdict outside its contract
    InvalidVerdict(String),
    /// Internal failure (serialization and the like)
    InternalError(String),
}

impl DomainError {
    /// Shorthand for a configuration rejection
    pub fn config(message: impl Into<String>) -> Self {
        DomainError::ConfigInvalid(message.into())
    }

    /// Whether this error means the configuration itself is unusable
    pub fn is_config_invalid(&self) -> bool {
        matches!(self, DomainError::ConfigInvalid(_))
    }
}

impl fmt::Display for DomainError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DomainError::BadArgs(msg) => write!(f, "Bad arguments: {}", msg),
            DomainError::ConfigInvalid(msg) => write!(f, "Invalid configuration: {}", msg),
            DomainError::InvalidTimeRange(msg) => write!(f, "Invalid time range: {}", msg),
            DomainError::InvalidVerdict(msg) => write!(f, "Invalid verdict: {}", msg),
            DomainError::InternalError(msg) => write!(f, "Internal error: {}", msg),
        }
    }
}

impl std::error::Error for DomainError {}
