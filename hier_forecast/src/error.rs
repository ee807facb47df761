//! Error types for the hier_forecast crate

use forecast_math::MathError;
use polars::prelude::PolarsError;
use thiserror::Error;

/// Custom error types for the hier_forecast crate
#[derive(Debug, Error)]
pub enum ForecastError {
    /// Schema or shape mismatch in the inputs
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// A model could not produce predictions for one entity
    #[error("Model '{model}' failed on entity '{entity}': {reason}")]
    ModelFit {
        entity: String,
        model: String,
        reason: String,
    },

    /// Structural mismatch between the hierarchy and the data
    #[error("Inconsistent hierarchy: {0}")]
    InconsistentHierarchy(String),

    /// Held-out actuals do not cover the forecasts being scored
    #[error("Missing actuals: {0}")]
    MissingActuals(String),

    /// The dataset collaborator could not find the requested dataset
    #[error("Dataset '{name}' not found in {location}")]
    DatasetNotFound { name: String, location: String },

    /// The run was cancelled by the caller
    #[error("Pipeline cancelled during {0}")]
    Cancelled(String),

    /// Error from numeric kernels
    #[error("Math error: {0}")]
    Math(#[from] MathError),

    /// Error from IO operations
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    /// Error from JSON (de)serialization
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Error from CSV writing
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// Error from Polars operations
    #[error("Polars error: {0}")]
    PolarsError(String),
}

/// Result type with our custom error
pub type Result<T> = std::result::Result<T, ForecastError>;

impl From<PolarsError> for ForecastError {
    fn from(err: PolarsError) -> Self {
        ForecastError::PolarsError(err.to_string())
    }
}
