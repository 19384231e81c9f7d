//! Repository error type
//!
//! Every facade operation returns [`Result`], so callers can tell a missing row
//! apart from a malformed request or a failing store.

use thiserror::Error;

/// Errors surfaced by the repository layer.
#[derive(Debug, Error)]
pub enum RepositoryError {
    /// The requested row does not exist.
    #[error("no {table} row matches key {key}")]
    NotFound { table: &'static str, key: String },

    /// The condition, options or input map could not be compiled.
    #[error("invalid query input: {0}")]
    Validation(String),

    /// The store rejected or failed to run a statement.
    #[error("storage failure: {0}")]
    Storage(#[from] sqlx::Error),

    /// A record could not be converted into the requested type.
    #[error("record decode failure: {0}")]
    Decode(#[from] serde_json::Error),
}

impl RepositoryError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    pub fn not_found(table: &'static str, key: impl std::fmt::Display) -> Self {
        Self::NotFound {
            table,
            key: key.to_string(),
        }
    }

    /// True for [`RepositoryError::NotFound`].
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

pub type Result<T> = std::result::Result<T, RepositoryError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_found_message() {
        let err = RepositoryError::not_found("users", 42);
        assert!(err.is_not_found());
        assert_eq!(err.to_string(), "no users row matches key 42");
    }

    #[test]
    fn test_storage_from_sqlx() {
        let err: RepositoryError = sqlx::Error::RowNotFound.into();
        assert!(matches!(err, RepositoryError::Storage(_)));
        assert!(!err.is_not_found());
    }
}
