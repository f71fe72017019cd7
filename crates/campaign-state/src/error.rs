//! Error types for campaign-state

use thiserror::Error;

/// Errors that can occur in the storage layer.
///
/// `Clone` so that memoized lookups can hand the same failure to every
/// caller of a request.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StorageError {
    /// A record was looked up by key and does not exist
    #[error("{entity} not found: {key}")]
    NotFound { entity: &'static str, key: String },

    /// A write collided with the current state of the store
    #[error("conflicting write to {entity} {key}: {reason}")]
    Conflict {
        entity: &'static str,
        key: String,
        reason: String,
    },

    /// A record failed validation before it was written
    #[error("invalid record: {0}")]
    Invalid(String),

    /// Backend (connection, query) failure
    #[error("storage backend failed: {0}")]
    Backend(String),

    /// Serialization or deserialization failure
    #[error("serialization failed: {0}")]
    Serialization(String),
}

impl StorageError {
    pub fn not_found(entity: &'static str, key: impl ToString) -> Self {
        StorageError::NotFound {
            entity,
            key: key.to_string(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, StorageError::NotFound { .. })
    }
}

impl From<serde_json::Error> for StorageError {
    fn from(err: serde_json::Error) -> Self {
        StorageError::Serialization(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_found_display_names_entity_and_key() {
        let err = StorageError::not_found("changeset spec", 42);
        assert_eq!(err.to_string(), "changeset spec not found: 42");
        assert!(err.is_not_found());
    }

    #[test]
    fn test_conflict_is_not_not_found() {
        let err = StorageError::Conflict {
            entity: "changeset",
            key: "7".to_string(),
            reason: "stale version".to_string(),
        };
        assert!(!err.is_not_found());
        assert!(err.to_string().contains("stale version"));
    }
}
