//! Error types for the lift_core library.

use std::io;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for lift_core operations
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A placement, template, session or exercise could not be found
    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },

    /// Stored records disagree with each other (e.g. a session with no entries)
    #[error("Data integrity error: {0}")]
    DataIntegrity(String),

    /// A superset was requested with fewer than two members
    #[error("A superset needs at least two exercises, got {0}")]
    InvalidGroup(usize),

    /// A reorder request was not a permutation of the session's entries
    #[error("Invalid order: {0}")]
    InvalidOrder(String),

    /// The store call failed or timed out
    #[error("Transport error: {0}")]
    Transport(String),

    /// The store rejected the request
    #[error("Validation error: {0}")]
    Validation(String),

    /// Another edit already holds this exercise field
    #[error("An edit is already in progress for {field} on exercise {exercise_id}")]
    EditInProgress {
        exercise_id: uuid::Uuid,
        field: &'static str,
    },

    /// IO error occurred
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// CSV error
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// TOML parsing error
    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    /// Configuration validation error
    #[error("Configuration error: {0}")]
    Config(String),
}

impl Error {
    pub fn not_found(kind: &'static str, id: impl ToString) -> Self {
        Error::NotFound {
            kind,
            id: id.to_string(),
        }
    }
}
