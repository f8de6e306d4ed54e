//! Error types for cluster module

use thiserror::Error;

/// Cluster error types
#[derive(Debug, Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Node not found: {0}")]
    NodeNotFound(String),

    #[error("Telemetry error: {0}")]
    Telemetry(String),

    #[error("Discovery error: {0}")]
    Discovery(String),

    #[error(transparent)]
    Core(#[from] nodefleet_core::Error),
}

/// Result type for cluster operations
pub type Result<T> = std::result::Result<T, Error>;
