//! Lotus error types.

use thiserror::Error;

/// Result alias used across the workspace.
pub type Result<T> = std::result::Result<T, LotusError>;

#[derive(Debug, Error)]
pub enum LotusError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Channel error: {0}")]
    Channel(String),

    #[error("Import error: {0}")]
    Import(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl LotusError {
    /// True for errors caused by bad caller input rather than the system.
    pub fn is_client_error(&self) -> bool {
        matches!(self, Self::Validation(_) | Self::NotFound(_) | Self::Import(_))
    }
}
