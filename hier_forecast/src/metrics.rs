//! Metrics for evaluating forecast performance

use crate::error::{ForecastError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

fn check_lengths(actual: &[f64], predicted: &[f64]) -> Result<()> {
    if actual.len() != predicted.len() || actual.is_empty() {
        return Err(ForecastError::InvalidInput(format!(
            "Actual ({}) and predicted ({}) values must have the same non-zero length",
            actual.len(),
            predicted.len()
        )));
    }
    Ok(())
}

/// Mean squared error
pub fn mse(actual: &[f64], predicted: &[f64]) -> Result<f64> {
    check_lengths(actual, predicted)?;
    let sum: f64 = actual
        .iter()
        .zip(predicted)
        .map(|(a, p)| (a - p).powi(2))
        .sum();
    Ok(sum / actual.len() as f64)
}

/// Root mean squared error
pub fn rmse(actual: &[f64], predicted: &[f64]) -> Result<f64> {
    Ok(mse(actual, predicted)?.sqrt())
}

/// Mean absolute error
pub fn mae(actual: &[f64], predicted: &[f64]) -> Result<f64> {
    check_lengths(actual, predicted)?;
    let sum: f64 = actual.iter().zip(predicted).map(|(a, p)| (a - p).abs()).sum();
    Ok(sum / actual.len() as f64)
}

/// Mean absolute percentage error, as a fraction
///
/// Periods with a zero actual are left out.
pub fn mape(actual: &[f64], predicted: &[f64]) -> Result<f64> {
    check_lengths(actual, predicted)?;
    let terms: Vec<f64> = actual
        .iter()
        .zip(predicted)
        .filter(|(a, _)| **a != 0.0)
        .map(|(a, p)| ((a - p) / a).abs())
        .collect();
    if terms.is_empty() {
        return Err(ForecastError::InvalidInput(
            "MAPE is undefined when every actual value is zero".to_string(),
        ));
    }
    Ok(terms.iter().sum::<f64>() / terms.len() as f64)
}

/// Symmetric mean absolute percentage error, as a fraction in `[0, 2]`
///
/// A period where both values are zero contributes zero error.
pub fn smape(actual: &[f64], predicted: &[f64]) -> Result<f64> {
    check_lengths(actual, predicted)?;
    let sum: f64 = actual
        .iter()
        .zip(predicted)
        .map(|(a, p)| {
            let denominator = a.abs() + p.abs();
            if denominator == 0.0 {
                0.0
            } else {
                2.0 * (a - p).abs() / denominator
            }
        })
        .sum();
    Ok(sum / actual.len() as f64)
}

/// A named scoring function `score(actual, predicted)`
pub trait Metric: fmt::Debug + Send + Sync {
    fn name(&self) -> &str;

    fn score(&self, actual: &[f64], predicted: &[f64]) -> Result<f64>;
}

/// Built-in metrics
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MetricSpec {
    Mse,
    Rmse,
    Mae,
    Mape,
    Smape,
}

impl MetricSpec {
    pub fn build(&self) -> Arc<dyn Metric> {
        Arc::new(*self)
    }
}

impl Metric for MetricSpec {
    fn name(&self) -> &str {
        match self {
            MetricSpec::Mse => "mse",
            MetricSpec::Rmse => "rmse",
            MetricSpec::Mae => "mae",
            MetricSpec::Mape => "mape",
            MetricSpec::Smape => "smape",
        }
    }

    fn score(&self, actual: &[f64], predicted: &[f64]) -> Result<f64> {
        match self {
            MetricSpec::Mse => mse(actual, predicted),
            MetricSpec::Rmse => rmse(actual, predicted),
            MetricSpec::Mae => mae(actual, predicted),
            MetricSpec::Mape => mape(actual, predicted),
            MetricSpec::Smape => smape(actual, predicted),
        }
    }
}

type ScoreFn = dyn Fn(&[f64], &[f64]) -> f64 + Send + Sync;

/// A caller-supplied metric
#[derive(Clone)]
pub struct FnMetric {
    name: String,
    score: Arc<ScoreFn>,
}

impl FnMetric {
    pub fn new<F>(name: impl Into<String>, score: F) -> Self
    where
        F: Fn(&[f64], &[f64]) -> f64 + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            score: Arc::new(score),
        }
    }
}

impl fmt::Debug for FnMetric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnMetric").field("name", &self.name).finish()
    }
}

impl Metric for FnMetric {
    fn name(&self) -> &str {
        &self.name
    }

    fn score(&self, actual: &[f64], predicted: &[f64]) -> Result<f64> {
        check_lengths(actual, predicted)?;
        Ok((self.score)(actual, predicted))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use rstest::rstest;

    #[rstest]
    #[case(MetricSpec::Mse, 1.0 / 3.0)]
    #[case(MetricSpec::Rmse, (1.0f64 / 3.0).sqrt())]
    #[case(MetricSpec::Mae, 1.0 / 3.0)]
    #[case(MetricSpec::Mape, 1.0 / 9.0)]
    #[case(MetricSpec::Smape, 2.0 / 21.0)]
    fn test_builtin_metrics(#[case] metric: MetricSpec, #[case] expected: f64) {
        let score = metric.score(&[1.0, 2.0, 3.0], &[1.0, 2.0, 4.0]).unwrap();
        assert_abs_diff_eq!(score, expected, epsilon = 1e-12);
    }

    #[test]
    fn test_length_mismatch() {
        assert!(mse(&[1.0], &[1.0, 2.0]).is_err());
        assert!(mae(&[], &[]).is_err());
    }

    #[test]
    fn test_mape_skips_zero_actuals() {
        assert_abs_diff_eq!(mape(&[0.0, 2.0], &[5.0, 1.0]).unwrap(), 0.5, epsilon = 1e-12);
        assert!(mape(&[0.0], &[1.0]).is_err());
    }

    #[test]
    fn test_custom_metric() {
        let max_error = FnMetric::new("max_error", |a, p| {
            a.iter()
                .zip(p)
                .map(|(a, p)| (a - p).abs())
                .fold(0.0, f64::max)
        });
        assert_eq!(max_error.name(), "max_error");
        assert_eq!(max_error.score(&[1.0, 5.0], &[2.0, 1.0]).unwrap(), 4.0);
    }
}
