//! Univariate forecasting methods
//!
//! Contains the benchmark methods used as base forecasters:
//! - Naive and Seasonal Naive
//! - Historic Average and Window Average
//! - Simple Exponential Smoothing
//! - Holt's linear trend method
//!
//! Every method is fitted and projected in one call, producing the
//! `horizon` point forecasts and the one-step-ahead in-sample fit.

use crate::{MathError, Result};
use std::fmt::Debug;

/// Point forecasts plus in-sample one-step-ahead fitted values
#[derive(Debug, Clone, PartialEq)]
pub struct UnivariateForecast {
    /// Forecast for each step of the horizon
    pub mean: Vec<f64>,
    /// Fitted value for each observation, `None` where the method has no fit yet
    pub fitted: Vec<Option<f64>>,
}

/// In-sample residuals `y - fitted`, aligned with the history
pub fn residuals(history: &[f64], fitted: &[Option<f64>]) -> Vec<Option<f64>> {
    history
        .iter()
        .zip(fitted)
        .map(|(y, f)| f.map(|f| y - f))
        .collect()
}

/// A univariate forecasting method
pub trait Forecaster: Debug + Send + Sync {
    /// Fit on `history` and forecast `horizon` steps ahead
    fn forecast(&self, history: &[f64], horizon: usize) -> Result<UnivariateForecast>;

    /// Smallest history the method can be fitted on
    fn min_observations(&self) -> usize {
        1
    }
}

fn check_history(history: &[f64], required: usize, method: &str) -> Result<()> {
    if history.len() < required {
        return Err(MathError::InsufficientData(format!(
            "{} needs at least {} observations, have {}",
            method,
            required,
            history.len()
        )));
    }
    if history.iter().any(|v| !v.is_finite()) {
        return Err(MathError::InvalidInput(format!(
            "{} received NaN or infinite values",
            method
        )));
    }
    Ok(())
}

/// Repeats the last observation
#[derive(Debug, Clone, Copy, Default)]
pub struct Naive;

impl Forecaster for Naive {
    fn forecast(&self, history: &[f64], horizon: usize) -> Result<UnivariateForecast> {
        check_history(history, 1, "Naive")?;
        let last = history[history.len() - 1];

        let mut fitted = Vec::with_capacity(history.len());
        fitted.push(None);
        fitted.extend(history[..history.len() - 1].iter().map(|&v| Some(v)));

        Ok(UnivariateForecast {
            mean: vec![last; horizon],
            fitted,
        })
    }
}

/// Repeats the last observed season
#[derive(Debug, Clone, Copy)]
pub struct SeasonalNaive {
    season_length: usize,
}

impl SeasonalNaive {
    pub fn new(season_length: usize) -> Result<Self> {
        if season_length == 0 {
            return Err(MathError::InvalidInput(
                "Season length must be greater than zero".to_string(),
            ));
        }
        Ok(Self { season_length })
    }

    pub fn season_length(&self) -> usize {
        self.season_length
    }
}

impl Forecaster for SeasonalNaive {
    fn forecast(&self, history: &[f64], horizon: usize) -> Result<UnivariateForecast> {
        let m = self.season_length;
        check_history(history, m, "SeasonalNaive")?;
        let last_season = &history[history.len() - m..];

        let mean = (0..horizon).map(|h| last_season[h % m]).collect();
        let fitted = (0..history.len())
            .map(|t| if t >= m { Some(history[t - m]) } else { None })
            .collect();

        Ok(UnivariateForecast { mean, fitted })
    }

    fn min_observations(&self) -> usize {
        self.season_length
    }
}

/// Mean of the full history
#[derive(Debug, Clone, Copy, Default)]
pub struct HistoricAverage;

impl Forecaster for HistoricAverage {
    fn forecast(&self, history: &[f64], horizon: usize) -> Result<UnivariateForecast> {
        check_history(history, 1, "HistoricAverage")?;
        let avg = history.iter().sum::<f64>() / history.len() as f64;

        Ok(UnivariateForecast {
            mean: vec![avg; horizon],
            fitted: vec![Some(avg); history.len()],
        })
    }
}

/// Mean of the last `window` observations
#[derive(Debug, Clone, Copy)]
pub struct WindowAverage {
    window: usize,
}

impl WindowAverage {
    pub fn new(window: usize) -> Result<Self> {
        if window == 0 {
            return Err(MathError::InvalidInput(
                "Window size must be greater than zero".to_string(),
            ));
        }
        Ok(Self { window })
    }

    pub fn window(&self) -> usize {
        self.window
    }
}

impl Forecaster for WindowAverage {
    fn forecast(&self, history: &[f64], horizon: usize) -> Result<UnivariateForecast> {
        let w = self.window;
        check_history(history, w, "WindowAverage")?;

        // Rolling sum over the previous `w` values
        let mut fitted = vec![None; history.len()];
        let mut sum: f64 = history[..w].iter().sum();
        for t in w..history.len() {
            fitted[t] = Some(sum / w as f64);
            sum += history[t] - history[t - w];
        }

        Ok(UnivariateForecast {
            mean: vec![sum / w as f64; horizon],
            fitted,
        })
    }

    fn min_observations(&self) -> usize {
        self.window
    }
}

/// Simple exponential smoothing with a fixed smoothing factor
#[derive(Debug, Clone, Copy)]
pub struct SimpleExponentialSmoothing {
    alpha: f64,
}

impl SimpleExponentialSmoothing {
    /// Create a new smoother with the specified alpha (smoothing factor)
    pub fn new(alpha: f64) -> Result<Self> {
        if alpha <= 0.0 || alpha >= 1.0 {
            return Err(MathError::InvalidInput(
                "Alpha must be between 0 and 1 (exclusive)".to_string(),
            ));
        }
        Ok(Self { alpha })
    }

    pub fn alpha(&self) -> f64 {
        self.alpha
    }
}

impl Forecaster for SimpleExponentialSmoothing {
    fn forecast(&self, history: &[f64], horizon: usize) -> Result<UnivariateForecast> {
        check_history(history, 1, "SimpleExponentialSmoothing")?;

        let mut level = history[0];
        let mut fitted = Vec::with_capacity(history.len());
        fitted.push(None);
        for &value in &history[1..] {
            fitted.push(Some(level));
            // level = alpha * value + (1 - alpha) * previous_level
            level = self.alpha * value + (1.0 - self.alpha) * level;
        }

        Ok(UnivariateForecast {
            mean: vec![level; horizon],
            fitted,
        })
    }
}

/// Holt's linear trend method (double exponential smoothing)
#[derive(Debug, Clone, Copy)]
pub struct Holt {
    alpha: f64,
    beta: f64,
}

impl Holt {
    /// Create a new Holt smoother with level and trend smoothing factors
    pub fn new(alpha: f64, beta: f64) -> Result<Self> {
        if alpha <= 0.0 || alpha >= 1.0 {
            return Err(MathError::InvalidInput(
                "Alpha must be between 0 and 1 (exclusive)".to_string(),
            ));
        }
        if beta <= 0.0 || beta >= 1.0 {
            return Err(MathError::InvalidInput(
                "Beta must be between 0 and 1 (exclusive)".to_string(),
            ));
        }
        Ok(Self { alpha, beta })
    }
}

impl Forecaster for Holt {
    fn forecast(&self, history: &[f64], horizon: usize) -> Result<UnivariateForecast> {
        check_history(history, 2, "Holt")?;

        let mut level = history[0];
        let mut trend = history[1] - history[0];
        let mut fitted = Vec::with_capacity(history.len());
        fitted.push(None);

        for &value in &history[1..] {
            fitted.push(Some(level + trend));
            let prev_level = level;
            level = self.alpha * value + (1.0 - self.alpha) * (level + trend);
            trend = self.beta * (level - prev_level) + (1.0 - self.beta) * trend;
        }

        let mean = (1..=horizon).map(|h| level + h as f64 * trend).collect();
        Ok(UnivariateForecast { mean, fitted })
    }

    fn min_observations(&self) -> usize {
        2
    }
}
