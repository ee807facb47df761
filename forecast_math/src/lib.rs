//! # Forecast Math
//!
//! Numeric building blocks for hierarchical forecasting.
//! Everything in this crate works on plain `f64` slices and knows nothing
//! about entities, timestamps or hierarchies.

use thiserror::Error;

pub mod arima;
pub mod forecasting;
pub mod matrix;
pub mod stats;

pub use crate::arima::{Arima, ArimaOrder, AutoArima};
pub use crate::forecasting::{
    residuals, Forecaster, HistoricAverage, Holt, Naive, SeasonalNaive,
    SimpleExponentialSmoothing, UnivariateForecast, WindowAverage,
};
pub use crate::matrix::Matrix;

/// Errors that can occur in numeric calculations
#[derive(Error, Debug, Clone, PartialEq)]
pub enum MathError {
    #[error("Insufficient data for calculation: {0}")]
    InsufficientData(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Calculation error: {0}")]
    CalculationError(String),

    #[error("Singular matrix: {0}")]
    SingularMatrix(String),
}

/// Result type for numeric operations
pub type Result<T> = std::result::Result<T, MathError>;
