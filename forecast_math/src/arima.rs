//! ARIMA models
//!
//! `Arima` fits a fixed (p, d, q) order, optionally after one seasonal
//! difference. AR coefficients come from the Yule-Walker equations solved by
//! Levinson-Durbin recursion; MA coefficients from the autocorrelation of the
//! AR residuals. `AutoArima` picks the differencing orders from variance
//! reduction and then searches (p, q) by AIC.

use crate::forecasting::{Forecaster, UnivariateForecast};
use crate::stats::variance;
use crate::{MathError, Result};
use serde::{Deserialize, Serialize};

/// Bound applied to partial autocorrelations and MA coefficients
const COEFFICIENT_BOUND: f64 = 0.95;

/// Floor for the innovation variance inside the AIC
const SIGMA2_FLOOR: f64 = 1e-12;

/// Non-seasonal ARIMA order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ArimaOrder {
    /// AR order
    pub p: usize,
    /// Differencing order
    pub d: usize,
    /// MA order
    pub q: usize,
}

impl ArimaOrder {
    pub fn new(p: usize, d: usize, q: usize) -> Self {
        Self { p, d, q }
    }
}

impl std::fmt::Display for ArimaOrder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "({},{},{})", self.p, self.d, self.q)
    }
}

/// Difference a series at the given lag
pub fn difference(data: &[f64], lag: usize) -> Vec<f64> {
    if lag == 0 || data.len() <= lag {
        return Vec::new();
    }
    (lag..data.len()).map(|i| data[i] - data[i - lag]).collect()
}

fn autocovariance(centered: &[f64], max_lag: usize) -> Vec<f64> {
    let n = centered.len() as f64;
    (0..=max_lag)
        .map(|k| {
            centered[k..]
                .iter()
                .zip(centered)
                .map(|(a, b)| a * b)
                .sum::<f64>()
                / n
        })
        .collect()
}

/// Solve the Yule-Walker equations with Levinson-Durbin recursion
fn levinson_durbin(autocov: &[f64], p: usize) -> Vec<f64> {
    let mut phi = vec![0.0; p];
    if p == 0 || autocov[0].abs() < 1e-10 {
        return phi;
    }

    let mut error = autocov[0];
    for k in 0..p {
        let mut acc = autocov[k + 1];
        for j in 0..k {
            acc -= phi[j] * autocov[k - j];
        }
        let kappa = (acc / error).clamp(-COEFFICIENT_BOUND, COEFFICIENT_BOUND);

        let previous = phi.clone();
        phi[k] = kappa;
        for j in 0..k {
            phi[j] = previous[j] - kappa * previous[k - 1 - j];
        }

        error *= 1.0 - kappa * kappa;
        if error <= 1e-12 {
            break;
        }
    }

    phi
}

/// ARIMA model with fixed orders
#[derive(Debug, Clone)]
pub struct Arima {
    order: ArimaOrder,
    seasonal_lag: Option<usize>,
}

/// An ARIMA model fitted to a history
#[derive(Debug, Clone)]
pub struct FittedArima {
    order: ArimaOrder,
    ar: Vec<f64>,
    ma: Vec<f64>,
    constant: f64,
    /// Original series followed by each differenced series
    levels: Vec<Vec<f64>>,
    /// Lag used to go from `levels[k]` to `levels[k + 1]`
    lags: Vec<usize>,
    centered: Vec<f64>,
    residuals: Vec<f64>,
    fitted: Vec<Option<f64>>,
    sigma2: f64,
    aic: f64,
}

impl Arima {
    /// Create a new ARIMA model
    pub fn new(p: usize, d: usize, q: usize) -> Result<Self> {
        if p > 10 || q > 10 {
            return Err(MathError::InvalidInput(
                "AR and MA orders must be <= 10".to_string(),
            ));
        }
        if d > 2 {
            return Err(MathError::InvalidInput(
                "Differencing order must be <= 2".to_string(),
            ));
        }
        Ok(Self {
            order: ArimaOrder::new(p, d, q),
            seasonal_lag: None,
        })
    }

    /// Apply one seasonal difference at `lag` before the regular ones
    pub fn with_seasonal_difference(mut self, lag: usize) -> Result<Self> {
        if lag < 2 {
            return Err(MathError::InvalidInput(
                "Seasonal lag must be at least 2".to_string(),
            ));
        }
        self.seasonal_lag = Some(lag);
        Ok(self)
    }

    pub fn order(&self) -> ArimaOrder {
        self.order
    }

    fn required_observations(&self) -> usize {
        let ArimaOrder { p, d, q } = self.order;
        self.seasonal_lag.unwrap_or(0) + d + p + q + 3
    }

    /// Fit the model to a history
    pub fn fit(&self, history: &[f64]) -> Result<FittedArima> {
        let required = self.required_observations();
        if history.len() < required {
            return Err(MathError::InsufficientData(format!(
                "ARIMA{} needs at least {} observations, have {}",
                self.order,
                required,
                history.len()
            )));
        }
        if history.iter().any(|x| !x.is_finite()) {
            return Err(MathError::InvalidInput(
                "Data contains NaN or infinite values".to_string(),
            ));
        }

        let ArimaOrder { p, d, q } = self.order;
        let mut levels = vec![history.to_vec()];
        let mut lags = Vec::new();
        if let Some(lag) = self.seasonal_lag {
            levels.push(difference(&levels[levels.len() - 1], lag));
            lags.push(lag);
        }
        for _ in 0..d {
            levels.push(difference(&levels[levels.len() - 1], 1));
            lags.push(1);
        }

        let working = &levels[levels.len() - 1];
        let nw = working.len();
        let offset = history.len() - nw;
        let constant = working.iter().sum::<f64>() / nw as f64;
        let centered: Vec<f64> = working.iter().map(|x| x - constant).collect();

        let ar = levinson_durbin(&autocovariance(&centered, p), p);

        // AR-only residuals, used to estimate the MA part
        let ar_residuals: Vec<f64> = (p..nw)
            .map(|t| centered[t] - (0..p).map(|j| ar[j] * centered[t - 1 - j]).sum::<f64>())
            .collect();
        let ma = Self::estimate_ma(&ar_residuals, q);

        let mut residuals = vec![0.0; nw];
        for t in p..nw {
            let mut prediction = 0.0;
            for j in 0..p {
                prediction += ar[j] * centered[t - 1 - j];
            }
            for k in 0..q {
                if t > k {
                    prediction += ma[k] * residuals[t - 1 - k];
                }
            }
            residuals[t] = centered[t] - prediction;
        }

        let effective = (nw - p) as f64;
        let sigma2 = residuals[p..].iter().map(|e| e * e).sum::<f64>() / effective;
        let aic = effective * sigma2.max(SIGMA2_FLOOR).ln() + 2.0 * (p + q + 1) as f64;

        let mut fitted = vec![None; history.len()];
        for t in p..nw {
            let i = offset + t;
            fitted[i] = Some(history[i] - residuals[t]);
        }

        Ok(FittedArima {
            order: self.order,
            ar,
            ma,
            constant,
            levels,
            lags,
            centered,
            residuals,
            fitted,
            sigma2,
            aic,
        })
    }

    fn estimate_ma(residuals: &[f64], q: usize) -> Vec<f64> {
        if q == 0 || residuals.len() < 2 {
            return vec![0.0; q];
        }

        let n = residuals.len();
        let mean = residuals.iter().sum::<f64>() / n as f64;
        let centered: Vec<f64> = residuals.iter().map(|x| x - mean).collect();
        let var = centered.iter().map(|x| x * x).sum::<f64>() / n as f64;
        if var.abs() < 1e-10 {
            return vec![0.0; q];
        }

        (0..q)
            .map(|k| {
                let cov = ((k + 1)..n)
                    .map(|i| centered[i] * centered[i - k - 1])
                    .sum::<f64>()
                    / n as f64;
                (cov / var).clamp(-COEFFICIENT_BOUND, COEFFICIENT_BOUND)
            })
            .collect()
    }
}

impl FittedArima {
    pub fn order(&self) -> ArimaOrder {
        self.order
    }

    pub fn ar_coefficients(&self) -> &[f64] {
        &self.ar
    }

    pub fn ma_coefficients(&self) -> &[f64] {
        &self.ma
    }

    /// Innovation variance estimate
    pub fn sigma2(&self) -> f64 {
        self.sigma2
    }

    /// Akaike information criterion of the fit
    pub fn aic(&self) -> f64 {
        self.aic
    }

    /// In-sample one-step-ahead fitted values on the original scale
    pub fn fitted(&self) -> &[Option<f64>] {
        &self.fitted
    }

    /// Forecast `horizon` steps on the original scale
    pub fn forecast(&self, horizon: usize) -> Vec<f64> {
        let p = self.ar.len();
        let q = self.ma.len();
        let mut extended = self.centered.clone();
        let mut shocks = self.residuals.clone();

        for _ in 0..horizon {
            let n = extended.len();
            let mut next = 0.0;
            for j in 0..p {
                next += self.ar[j] * extended[n - 1 - j];
            }
            for k in 0..q {
                if n > k {
                    next += self.ma[k] * shocks[n - 1 - k];
                }
            }
            extended.push(next);
            shocks.push(0.0);
        }

        let mut forecasts: Vec<f64> = extended[self.centered.len()..]
            .iter()
            .map(|c| c + self.constant)
            .collect();

        // Undo the differences from the innermost level outwards
        for k in (0..self.lags.len()).rev() {
            let lag = self.lags[k];
            let mut series = self.levels[k].clone();
            let mut integrated = Vec::with_capacity(forecasts.len());
            for z in forecasts {
                let next = z + series[series.len() - lag];
                series.push(next);
                integrated.push(next);
            }
            forecasts = integrated;
        }

        forecasts
    }
}

impl Forecaster for Arima {
    fn forecast(&self, history: &[f64], horizon: usize) -> Result<UnivariateForecast> {
        let fitted = self.fit(history)?;
        Ok(UnivariateForecast {
            mean: fitted.forecast(horizon),
            fitted: fitted.fitted.clone(),
        })
    }

    fn min_observations(&self) -> usize {
        self.required_observations()
    }
}

/// Automatic ARIMA order selection
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct AutoArima {
    /// Seasonal period, 1 for non-seasonal data
    pub season_length: usize,
    pub max_p: usize,
    pub max_d: usize,
    pub max_q: usize,
}

impl Default for AutoArima {
    fn default() -> Self {
        Self {
            season_length: 1,
            max_p: 3,
            max_d: 2,
            max_q: 2,
        }
    }
}

impl AutoArima {
    pub fn new(season_length: usize) -> Result<Self> {
        if season_length == 0 {
            return Err(MathError::InvalidInput(
                "Season length must be greater than zero".to_string(),
            ));
        }
        Ok(Self {
            season_length,
            ..Self::default()
        })
    }

    /// Sample variance, infinite when it cannot be estimated
    fn sample_variance(data: &[f64]) -> f64 {
        variance(data).unwrap_or(f64::INFINITY)
    }

    /// Seasonal lag to difference at, if seasonal differencing helps
    fn select_seasonal_lag(&self, history: &[f64]) -> Option<usize> {
        let m = self.season_length;
        if m < 2 || history.len() < 2 * m + 3 {
            return None;
        }
        let seasonal = difference(history, m);
        if Self::sample_variance(&seasonal) < Self::sample_variance(history) {
            Some(m)
        } else {
            None
        }
    }

    /// Differencing order: keep differencing while it reduces variance
    fn select_d(&self, mut series: Vec<f64>) -> usize {
        let mut d = 0;
        while d < self.max_d && series.len() > 3 {
            let next = difference(&series, 1);
            if Self::sample_variance(&next) < Self::sample_variance(&series) {
                series = next;
                d += 1;
            } else {
                break;
            }
        }
        d
    }

    /// Select and fit the best model by AIC
    pub fn fit(&self, history: &[f64]) -> Result<FittedArima> {
        if history.len() < 3 {
            return Err(MathError::InsufficientData(format!(
                "AutoARIMA needs at least 3 observations, have {}",
                history.len()
            )));
        }

        let seasonal_lag = self.select_seasonal_lag(history);
        let base = match seasonal_lag {
            Some(lag) => difference(history, lag),
            None => history.to_vec(),
        };
        let d = self.select_d(base);

        let mut best: Option<FittedArima> = None;
        for p in 0..=self.max_p {
            for q in 0..=self.max_q {
                let mut candidate = Arima::new(p, d, q)?;
                if let Some(lag) = seasonal_lag {
                    candidate = candidate.with_seasonal_difference(lag)?;
                }
                let Ok(fitted) = candidate.fit(history) else {
                    continue;
                };
                if best.as_ref().map_or(true, |b| fitted.aic() < b.aic()) {
                    best = Some(fitted);
                }
            }
        }

        best.ok_or_else(|| {
            MathError::InsufficientData(format!(
                "No ARIMA order could be fitted to {} observations",
                history.len()
            ))
        })
    }
}

impl Forecaster for AutoArima {
    fn forecast(&self, history: &[f64], horizon: usize) -> Result<UnivariateForecast> {
        let fitted = self.fit(history)?;
        Ok(UnivariateForecast {
            mean: fitted.forecast(horizon),
            fitted: fitted.fitted.clone(),
        })
    }

    fn min_observations(&self) -> usize {
        3
    }
}
