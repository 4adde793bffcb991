//! Common error types for GeoCheck

use thiserror::Error;

/// Common result type for GeoCheck operations
pub type Result<T> = std::result::Result<T, Error>;

/// Common error types across GeoCheck crates
#[derive(Error, Debug)]
pub enum Error {
    /// I/O operation error (wraps std::io::Error)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration loading or validation error
    #[error("Configuration error: {0}")]
    Config(String),

    /// The identifier column could not be resolved against the input table.
    ///
    /// This is the only fatal condition of an enrichment run.
    #[error("Identifier column not found: {0}")]
    MissingIdentifierColumn(String),

    /// Invalid user input or request parameter
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}
