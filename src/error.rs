//! Error handling for the trace reconstruction library
//!
//! Reconstruction itself never fails: unknown fragment shapes are passed
//! through, malformed embedded JSON falls back to opaque text, and structural
//! problems in a stream (a close without an open) are collected as
//! diagnostics while the rest of the tree is still emitted.
//!
//! Errors only surface from the edges:
//!
//! - **Configuration** - config files, environment overrides, log setup
//! - **Serialization** - decoding a fragment batch from JSON text
//! - **Invalid fragment** - a decoded record that is not a JSON object
//! - **Unmatched close** - reported through `TraceTree::diagnostics`

use thiserror::Error;

use crate::config::ConfigError;

/// Main error type for the library
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TraceError {
    /// A raw fragment could not be interpreted at all
    #[error("Invalid fragment: {message}")]
    InvalidFragment { message: String },

    /// Configuration errors (files, environment, logging setup)
    #[error("Configuration error: {message}")]
    ConfigurationError { message: String },

    /// JSON serialization/deserialization errors
    #[error("Serialization error: {message}")]
    SerializationError { message: String },

    /// A close fragment arrived with no matching open container
    #[error("Unmatched close: {message}")]
    UnmatchedClose { message: String },
}

impl TraceError {
    /// Create a simple InvalidFragment error
    pub fn invalid_fragment(message: impl Into<String>) -> Self {
        Self::InvalidFragment {
            message: message.into(),
        }
    }

    /// Create a simple ConfigurationError
    pub fn configuration_error(message: impl Into<String>) -> Self {
        Self::ConfigurationError {
            message: message.into(),
        }
    }

    /// Create a simple SerializationError
    pub fn serialization_error(message: impl Into<String>) -> Self {
        Self::SerializationError {
            message: message.into(),
        }
    }

    /// Create a simple UnmatchedClose error
    pub fn unmatched_close(message: impl Into<String>) -> Self {
        Self::UnmatchedClose {
            message: message.into(),
        }
    }

    /// Check if this error only affects a single node of the tree
    pub fn is_structural(&self) -> bool {
        matches!(self, Self::UnmatchedClose { .. })
    }
}

impl From<serde_json::Error> for TraceError {
    fn from(error: serde_json::Error) -> Self {
        Self::serialization_error(error.to_string())
    }
}

impl From<ConfigError> for TraceError {
    fn from(error: ConfigError) -> Self {
        Self::configuration_error(error.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        assert_eq!(
            TraceError::unmatched_close("collaborator output").to_string(),
            "Unmatched close: collaborator output"
        );
        assert!(TraceError::unmatched_close("x").is_structural());
        assert!(!TraceError::invalid_fragment("x").is_structural());
    }

    #[test]
    fn test_from_serde_error() {
        let err = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
        let trace_err: TraceError = err.into();
        assert!(matches!(trace_err, TraceError::SerializationError { .. }));
    }
}
