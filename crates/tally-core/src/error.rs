//! Error types for Tally

use rust_decimal::Decimal;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Database pool error: {0}")]
    Pool(#[from] r2d2::Error),

    #[error("Encryption error: {0}")]
    Encryption(String),

    #[error("CSV parsing error: {0}")]
    Csv(#[from] csv::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Regex error: {0}")]
    Regex(#[from] regex::Error),

    #[error("Config error: {0}")]
    Config(String),

    /// Malformed statement or request data. Raised before any state changes.
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Not found: {0}")]
    NotFound(String),

    /// The bill or cycle is already linked/expanded.
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Amount difference beyond the reject threshold without `force`.
    #[error(
        "Amount difference {difference} ({difference_percent}%) exceeds the {threshold_percent}% threshold; pass force to link anyway"
    )]
    ToleranceExceeded {
        difference: Decimal,
        difference_percent: Decimal,
        threshold_percent: Decimal,
    },

    #[error("Unprocessable: {0}")]
    Unprocessable(String),

    /// Structural invariant violation. Never repaired automatically.
    #[error("Integrity violation: {0}")]
    Integrity(String),
}

pub type Result<T> = std::result::Result<T, Error>;
