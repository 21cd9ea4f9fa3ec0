//! Error types for the insulin_core library.

use std::io;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for insulin_core operations
///
/// Data-quality rejections (implausible reservoir drops, degenerate
/// regressions) are not errors; they are skipped and logged.
#[derive(Debug, thiserror::Error)]
pub enum Error {
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

    /// A setting required by the requested computation is absent
    #[error("Missing configuration: {0}")]
    MissingConfiguration(&'static str),

    /// Schedule items are empty, unordered, or out of range
    #[error("Invalid schedule: {0}")]
    InvalidSchedule(String),

    /// Insulin model parameters do not describe a valid curve
    #[error("Invalid insulin model: {0}")]
    InvalidInsulinModel(String),

    /// Simulation delay/delta are unusable
    #[error("Invalid effect timing: {0}")]
    InvalidTiming(String),

    /// Dose entry violates its own invariants
    #[error("Invalid dose: {0}")]
    InvalidDose(String),

    /// An upstream data source reported a failure
    #[error("Fetch failed: {0}")]
    Fetch(String),
}
