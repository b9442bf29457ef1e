//! Error types shared by every zigbridge crate.
//!
//! Local, structural failures are returned synchronously through [`Result`].
//! Asynchronous protocol outcomes never surface here; they arrive as bus
//! events (`CommandFailed`, `CommandTimeout`, `StackDown`).

use thiserror::Error;

/// Result type for bridge operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Bridge error taxonomy.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
    /// Null, malformed or out-of-range input.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// The adapter has not been initialized yet.
    #[error("Adapter not initialized")]
    NotInitialized,

    /// A state-machine precondition was violated.
    #[error("Not ready: {0}")]
    NotReady(String),

    /// Duplicate initialization or duplicate key.
    #[error("Already exists: {0}")]
    AlreadyExists(String),

    /// A bounded table is at capacity.
    #[error("Resource exhausted: {0}")]
    ResourceExhausted(String),

    /// The requested entry does not exist.
    #[error("Not found: {0}")]
    NotFound(String),

    /// The radio stack rejected a send.
    #[error("Protocol failure (status 0x{code:04X})")]
    ProtocolFailure { code: u16 },

    /// Network formation failed or the stack hit an irrecoverable error.
    #[error("Stack fatal: {0}")]
    StackFatal(String),

    /// Persistence collaborator failure.
    #[error("Storage error: {0}")]
    Storage(String),

    /// Configuration could not be loaded or is invalid.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Encoding or decoding failure.
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl Error {
    /// Whether the error is a local precondition failure the caller can fix.
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, Error::StackFatal(_))
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

impl From<toml::de::Error> for Error {
    fn from(e: toml::de::Error) -> Self {
        Error::Config(e.to_string())
    }
}

impl From<toml::ser::Error> for Error {
    fn from(e: toml::ser::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Storage(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::ResourceExhausted("address cache".to_string());
        assert_eq!(err.to_string(), "Resource exhausted: address cache");

        let err = Error::ProtocolFailure { code: 0x86 };
        assert_eq!(err.to_string(), "Protocol failure (status 0x0086)");
    }

    #[test]
    fn test_stack_fatal_is_not_recoverable() {
        assert!(!Error::StackFatal("formation failed".into()).is_recoverable());
        assert!(Error::NotReady("initializing".into()).is_recoverable());
    }
}
