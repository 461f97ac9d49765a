//! Error types for rowforge-engine

use thiserror::Error;

/// Result type alias for rowforge-engine operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in rowforge-engine
#[derive(Error, Debug)]
pub enum Error {
    /// Error propagated from the core model
    #[error(transparent)]
    Core(#[from] rowforge_core::Error),

    /// A referenced entity does not exist
    #[error("{kind} '{id}' not found")]
    NotFound {
        /// Entity kind (template, instance, config, row)
        kind: &'static str,
        /// The id that was requested
        id: String,
    },

    /// One or more requested documents do not exist.
    ///
    /// Aborts the whole matching call: a missing document id is a caller
    /// contract violation, not a partial-failure case.
    #[error("documents not found: [{}]", .missing.join(", "))]
    DocumentsNotFound {
        /// Every requested id that could not be loaded
        missing: Vec<String>,
    },

    /// Database error; a failed batch transaction aborts only that batch
    #[error("persistence error: {0}")]
    Persistence(#[from] sqlx::Error),

    /// Payload (de)serialization error
    #[error("payload error: {0}")]
    Payload(#[from] serde_json::Error),
}

impl Error {
    /// Machine-readable error code for API consumers
    pub fn code(&self) -> &'static str {
        match self {
            Self::Core(inner) => inner.code(),
            Self::NotFound { .. } => "NOT_FOUND",
            Self::DocumentsNotFound { .. } => "DOCUMENTS_NOT_FOUND",
            Self::Persistence(_) => "PERSISTENCE_FAILED",
            Self::Payload(_) => "PAYLOAD_INVALID",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_documents_not_found_lists_ids() {
        let err = Error::DocumentsNotFound {
            missing: vec!["d1".to_string(), "d2".to_string()],
        };
        assert!(err.to_string().contains("d1, d2"));
        assert_eq!(err.code(), "DOCUMENTS_NOT_FOUND");
    }

    #[test]
    fn test_core_error_code_passthrough() {
        let err = Error::from(rowforge_core::Error::ConfigInvalid {
            message: "x".to_string(),
        });
        assert_eq!(err.code(), "CONFIG_INVALID");
    }
}
