//! Error types for ID parsing and validation.

use thiserror::Error;

/// Errors that can occur when parsing or validating IDs.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum IdError {
    /// The ID string is empty.
    #[error("ID cannot be empty")]
    Empty,

    /// The ID contains characters that are not allowed.
    #[error("ID contains invalid character {character:?}: {id}")]
    InvalidCharacter { id: String, character: char },

    /// The template name used to derive a server ID is invalid.
    #[error("invalid template name: {0:?}")]
    InvalidTemplate(String),
}

impl IdError {
    /// Returns true if this error indicates the input was empty.
    pub fn is_empty(&self) -> bool {
        matches!(self, IdError::Empty)
    }
}
