//! ARIMA models with automatic order selection

use crate::error::Result;
use crate::models::{ForecastModel, ModelOutput};
use forecast_math::{AutoArima, Forecaster};
use tracing::debug;

/// AutoARIMA as a base model
///
/// Each entity gets its own order; the selected order is logged at debug
/// level.
#[derive(Debug, Clone)]
pub struct AutoArimaModel {
    name: String,
    search: AutoArima,
}

impl AutoArimaModel {
    pub fn new(name: impl Into<String>, search: AutoArima) -> Self {
        Self {
            name: name.into(),
            search,
        }
    }

    pub fn search(&self) -> &AutoArima {
        &self.search
    }
}

impl ForecastModel for AutoArimaModel {
    fn name(&self) -> &str {
        &self.name
    }

    fn fit_predict(&self, history: &[f64], horizon: usize) -> Result<ModelOutput> {
        let fitted = self.search.fit(history)?;
        debug!(
            model = %self.name,
            order = %fitted.order(),
            aic = fitted.aic(),
            "selected ARIMA order"
        );

        Ok(ModelOutput::new(fitted.forecast(horizon), horizon)?
            .with_fitted(fitted.fitted().to_vec()))
    }

    fn min_observations(&self) -> usize {
        self.search.min_observations()
    }
}
