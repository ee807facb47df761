//! Base forecasting models
//!
//! A model is fitted and projected per entity in one call. Models are
//! configured by a serializable `ModelSpec` and resolved once into shared
//! trait objects held by a `ModelRegistry`.

use crate::error::{ForecastError, Result};
use forecast_math::{Forecaster, UnivariateForecast};
use std::fmt::Debug;

pub mod arima;
pub mod spec;

pub use self::arima::AutoArimaModel;
pub use self::spec::{ModelKind, ModelRegistry, ModelSpec};

/// Predictions for one entity
#[derive(Debug, Clone, PartialEq)]
pub struct ModelOutput {
    /// One value per horizon step
    pub mean: Vec<f64>,
    /// One-step-ahead in-sample fit aligned with the history, if the model has one
    pub fitted: Option<Vec<Option<f64>>>,
}

impl ModelOutput {
    /// Create an output, checking it covers the horizon with finite values
    pub fn new(mean: Vec<f64>, horizon: usize) -> Result<Self> {
        if mean.len() != horizon {
            return Err(ForecastError::InvalidInput(format!(
                "Values length ({}) doesn't match horizon ({})",
                mean.len(),
                horizon
            )));
        }
        if let Some(step) = mean.iter().position(|v| !v.is_finite()) {
            return Err(ForecastError::InvalidInput(format!(
                "Forecast for step {} is not finite",
                step + 1
            )));
        }

        Ok(Self { mean, fitted: None })
    }

    pub fn with_fitted(mut self, fitted: Vec<Option<f64>>) -> Self {
        self.fitted = Some(fitted);
        self
    }

    /// In-sample residuals `y - fitted`, empty without a fit
    pub fn residuals(&self, history: &[f64]) -> Vec<Option<f64>> {
        match &self.fitted {
            Some(fitted) => forecast_math::residuals(history, fitted),
            None => Vec::new(),
        }
    }
}

/// A model that can be fitted to one entity's history and forecast from it
pub trait ForecastModel: Debug + Send + Sync {
    /// Name used as the forecast column
    fn name(&self) -> &str;

    /// Fit on the chronologically ordered `history` and forecast `horizon` steps
    fn fit_predict(&self, history: &[f64], horizon: usize) -> Result<ModelOutput>;

    /// Shortest history worth attempting a fit on
    fn min_observations(&self) -> usize {
        1
    }
}

/// Adapts a `forecast_math` forecaster to `ForecastModel`
#[derive(Debug, Clone)]
pub struct StatisticalModel<F> {
    name: String,
    method: F,
}

impl<F: Forecaster> StatisticalModel<F> {
    pub fn new(name: impl Into<String>, method: F) -> Self {
        Self {
            name: name.into(),
            method,
        }
    }

    pub fn method(&self) -> &F {
        &self.method
    }
}

impl<F: Forecaster> ForecastModel for StatisticalModel<F> {
    fn name(&self) -> &str {
        &self.name
    }

    fn fit_predict(&self, history: &[f64], horizon: usize) -> Result<ModelOutput> {
        let UnivariateForecast { mean, fitted } = self.method.forecast(history, horizon)?;
        Ok(ModelOutput::new(mean, horizon)?.with_fitted(fitted))
    }

    fn min_observations(&self) -> usize {
        self.method.min_observations()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use forecast_math::{Naive, SeasonalNaive};

    #[test]
    fn test_statistical_model_keeps_fit() {
        let model = StatisticalModel::new("Naive", Naive);
        let output = model.fit_predict(&[1.0, 2.0, 4.0], 2).unwrap();
        assert_eq!(output.mean, vec![4.0, 4.0]);
        assert_eq!(output.fitted, Some(vec![None, Some(1.0), Some(2.0)]));
        assert_eq!(
            output.residuals(&[1.0, 2.0, 4.0]),
            vec![None, Some(1.0), Some(2.0)]
        );
    }

    #[test]
    fn test_math_errors_are_wrapped() {
        let model = StatisticalModel::new("SeasonalNaive", SeasonalNaive::new(4).unwrap());
        let result = model.fit_predict(&[1.0, 2.0], 3);
        assert!(matches!(result, Err(ForecastError::Math(_))));
    }

    #[test]
    fn test_min_observations_follow_method() {
        let model = StatisticalModel::new("SeasonalNaive", SeasonalNaive::new(4).unwrap());
        assert_eq!(model.min_observations(), 4);
        assert_eq!(StatisticalModel::new("Naive", Naive).min_observations(), 1);
    }

    #[test]
    fn test_output_rejects_wrong_length() {
        assert!(ModelOutput::new(vec![1.0], 2).is_err());
        assert!(ModelOutput::new(vec![f64::NAN], 1).is_err());
    }
}
