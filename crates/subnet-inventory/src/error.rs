//! Inventory client errors

use thiserror::Error;

/// Errors that can occur when querying the subnet inventory
#[derive(Debug, Error)]
pub enum InventoryError {
    /// HTTP request/response error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Inventory API returned an error
    #[error("Inventory API error: {0}")]
    Api(String),

    /// JSON serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Authentication failed (invalid token, expired, etc.)
    #[error("Authentication failed: {0}")]
    Authentication(String),
}
