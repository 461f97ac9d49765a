//! Error types for rowforge-core

use thiserror::Error;

/// Result type alias for rowforge-core operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in rowforge-core
#[derive(Error, Debug)]
pub enum Error {
    /// Invalid mapping configuration (bad params, duplicate keys, arity)
    #[error("invalid mapping configuration: {message}")]
    ConfigInvalid {
        /// Description of what's invalid
        message: String,
    },

    /// Malformed formula expression
    #[error("invalid formula '{expression}': {message}")]
    InvalidFormula {
        /// The expression that failed to parse
        expression: String,
        /// Description of the error
        message: String,
    },

    /// Transform execution error
    #[error("transform error in '{transform}': {message}")]
    Transform {
        /// Kind of the transform that failed
        transform: String,
        /// Description of the error
        message: String,
    },

    /// Instance status forbids the requested operation
    #[error("operation '{action}' not allowed in status {status}; allowed successors: [{}]", .allowed.join(", "))]
    InvalidState {
        /// Current instance status
        status: String,
        /// The rejected operation or transition
        action: String,
        /// Statuses the instance may move to from here
        allowed: Vec<String>,
    },
}

impl Error {
    /// Machine-readable error code for API consumers
    pub fn code(&self) -> &'static str {
        match self {
            Self::ConfigInvalid { .. } => "CONFIG_INVALID",
            Self::InvalidFormula { .. } => "FORMULA_INVALID",
            Self::Transform { .. } => "TRANSFORM_FAILED",
            Self::InvalidState { .. } => "INVALID_STATE",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_state_display_names_allowed_set() {
        let err = Error::InvalidState {
            status: "EXPORTED".to_string(),
            action: "add_row".to_string(),
            allowed: vec![],
        };
        let msg = err.to_string();
        assert!(msg.contains("EXPORTED"));
        assert!(msg.contains("add_row"));
        assert!(msg.contains("[]"));
    }

    #[test]
    fn test_error_codes_are_stable() {
        let err = Error::ConfigInvalid {
            message: "x".to_string(),
        };
        assert_eq!(err.code(), "CONFIG_INVALID");
        let err = Error::Transform {
            transform: "FORMULA".to_string(),
            message: "x".to_string(),
        };
        assert_eq!(err.code(), "TRANSFORM_FAILED");
    }
}
