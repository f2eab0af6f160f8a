//! Error types for the learning core
//!
//! Every caller-visible failure is typed and carries the offending id or
//! field. Heuristics that find nothing return empty results instead.

use thiserror::Error;
use uuid::Uuid;

/// Main error type for learning core operations
#[derive(Debug, Error)]
pub enum LearningError {
    /// Lookup of an id that does not exist
    #[error("{kind} '{id}' not found")]
    NotFound { kind: &'static str, id: Uuid },

    /// Malformed category, kind, key or embedding dimension
    #[error("Invalid input for '{field}': {message}")]
    InvalidInput { field: String, message: String },

    /// Validation request already reached a terminal status
    #[error("Validation request '{id}' already resolved as {status}")]
    AlreadyResolved { id: Uuid, status: String },

    /// Store failed to load or persist
    #[error("Store '{store}' unavailable: {reason}")]
    Unavailable { store: &'static str, reason: String },

    /// A guardrail blocks the action regardless of approval
    #[error("Request '{id}' rejected by guardrail '{guardrail}'")]
    RiskRejected { id: Uuid, guardrail: String },

    /// Validation request timed out before a decision
    #[error("Validation request '{id}' expired")]
    Expired { id: Uuid },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Configuration error: {message}")]
    Config { message: String },
}

impl LearningError {
    pub fn not_found(kind: &'static str, id: Uuid) -> Self {
        Self::NotFound { kind, id }
    }

    pub fn invalid(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidInput { field: field.into(), message: message.into() }
    }

    pub fn unavailable(store: &'static str, reason: impl std::fmt::Display) -> Self {
        Self::Unavailable { store, reason: reason.to_string() }
    }

    /// Rewrap storage failures as `Unavailable` for the named store
    pub fn into_unavailable(self, store: &'static str) -> Self {
        match self {
            Self::Io(err) => Self::unavailable(store, err),
            Self::Serialization(err) => Self::unavailable(store, err),
            other => other,
        }
    }
}

/// Result type for learning core operations
pub type Result<T> = std::result::Result<T, LearningError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages_carry_ids() {
        let id = Uuid::new_v4();
        let err = LearningError::not_found("memory", id);
        assert_eq!(err.to_string(), format!("memory '{}' not found", id));

        let err = LearningError::AlreadyResolved { id, status: "approved".to_string() };
        assert!(err.to_string().contains("approved"));
    }

    #[test]
    fn test_storage_errors_become_unavailable() {
        let io = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied");
        let err = LearningError::from(io).into_unavailable("memory");
        assert!(matches!(err, LearningError::Unavailable { store: "memory", .. }));

        let id = Uuid::new_v4();
        let err = LearningError::Expired { id }.into_unavailable("validation");
        assert!(matches!(err, LearningError::Expired { .. }));
    }
}
