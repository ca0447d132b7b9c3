//! Error types for the navigation core.
//!
//! Only recoverable failures live here. "No path" is an empty waypoint list,
//! and misuse of a removed obstruction tag is a panic.

use thiserror::Error;

/// Result type alias using [`NavError`].
pub type Result<T> = std::result::Result<T, NavError>;

/// Top-level error type for the navigation core.
#[derive(Debug, Error)]
pub enum NavError {
    /// A passability class name was not found in the configuration.
    #[error("Unknown passability class: {0}")]
    UnknownPassClass(String),

    /// Too many passability classes were configured.
    #[error("Too many passability classes: {count} (max {max})")]
    TooManyPassClasses {
        /// Number of classes requested.
        count: usize,
        /// Number of bits available in a navcell.
        max: usize,
    },

    /// Configuration file parsing error.
    #[error("Failed to parse config '{path}': {message}")]
    ConfigParse {
        /// Path to the file that failed to parse.
        path: String,
        /// Error message.
        message: String,
    },

    /// Filesystem error while loading configuration.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Saved state could not be encoded or decoded.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Invalid navigation state.
    #[error("Invalid navigation state: {0}")]
    InvalidState(String),
}
