//! Model configuration and the registry of resolved models

use crate::error::{ForecastError, Result};
use crate::models::{AutoArimaModel, ForecastModel, StatisticalModel};
use forecast_math::{
    Arima, AutoArima, HistoricAverage, Holt, Naive, SeasonalNaive, SimpleExponentialSmoothing,
    WindowAverage,
};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;

fn default_max_p() -> usize {
    AutoArima::default().max_p
}

fn default_max_d() -> usize {
    AutoArima::default().max_d
}

fn default_max_q() -> usize {
    AutoArima::default().max_q
}

/// Built-in model families
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "model")]
pub enum ModelKind {
    Naive,
    SeasonalNaive {
        season_length: usize,
    },
    HistoricAverage,
    WindowAverage {
        window: usize,
    },
    #[serde(rename = "SES")]
    SimpleExponentialSmoothing {
        alpha: f64,
    },
    Holt {
        alpha: f64,
        beta: f64,
    },
    #[serde(rename = "ARIMA")]
    Arima {
        p: usize,
        d: usize,
        q: usize,
    },
    #[serde(rename = "AutoARIMA")]
    AutoArima {
        season_length: usize,
        #[serde(default = "default_max_p")]
        max_p: usize,
        #[serde(default = "default_max_d")]
        max_d: usize,
        #[serde(default = "default_max_q")]
        max_q: usize,
    },
}

impl ModelKind {
    /// Column name used when no alias is given
    pub fn default_name(&self) -> &'static str {
        match self {
            ModelKind::Naive => "Naive",
            ModelKind::SeasonalNaive { .. } => "SeasonalNaive",
            ModelKind::HistoricAverage => "HistoricAverage",
            ModelKind::WindowAverage { .. } => "WindowAverage",
            ModelKind::SimpleExponentialSmoothing { .. } => "SES",
            ModelKind::Holt { .. } => "Holt",
            ModelKind::Arima { .. } => "ARIMA",
            ModelKind::AutoArima { .. } => "AutoARIMA",
        }
    }
}

/// A named model configuration
///
/// ```json
/// { "model": "AutoARIMA", "season_length": 12 }
/// { "model": "WindowAverage", "window": 3, "alias": "MA3" }
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelSpec {
    #[serde(flatten)]
    pub kind: ModelKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alias: Option<String>,
}

impl From<ModelKind> for ModelSpec {
    fn from(kind: ModelKind) -> Self {
        Self { kind, alias: None }
    }
}

impl ModelSpec {
    pub fn naive() -> Self {
        ModelKind::Naive.into()
    }

    pub fn seasonal_naive(season_length: usize) -> Self {
        ModelKind::SeasonalNaive { season_length }.into()
    }

    pub fn historic_average() -> Self {
        ModelKind::HistoricAverage.into()
    }

    pub fn window_average(window: usize) -> Self {
        ModelKind::WindowAverage { window }.into()
    }

    pub fn ses(alpha: f64) -> Self {
        ModelKind::SimpleExponentialSmoothing { alpha }.into()
    }

    pub fn holt(alpha: f64, beta: f64) -> Self {
        ModelKind::Holt { alpha, beta }.into()
    }

    pub fn arima(p: usize, d: usize, q: usize) -> Self {
        ModelKind::Arima { p, d, q }.into()
    }

    pub fn auto_arima(season_length: usize) -> Self {
        ModelKind::AutoArima {
            season_length,
            max_p: default_max_p(),
            max_d: default_max_d(),
            max_q: default_max_q(),
        }
        .into()
    }

    pub fn with_alias(mut self, alias: impl Into<String>) -> Self {
        self.alias = Some(alias.into());
        self
    }

    /// Forecast column name
    pub fn name(&self) -> &str {
        self.alias
            .as_deref()
            .unwrap_or_else(|| self.kind.default_name())
    }

    /// Resolve into a model, validating its parameters
    pub fn build(&self) -> Result<Arc<dyn ForecastModel>> {
        let name = self.name().to_string();
        let model: Arc<dyn ForecastModel> = match &self.kind {
            ModelKind::Naive => Arc::new(StatisticalModel::new(name, Naive)),
            ModelKind::SeasonalNaive { season_length } => Arc::new(StatisticalModel::new(
                name,
                SeasonalNaive::new(*season_length)?,
            )),
            ModelKind::HistoricAverage => Arc::new(StatisticalModel::new(name, HistoricAverage)),
            ModelKind::WindowAverage { window } => {
                Arc::new(StatisticalModel::new(name, WindowAverage::new(*window)?))
            }
            ModelKind::SimpleExponentialSmoothing { alpha } => Arc::new(StatisticalModel::new(
                name,
                SimpleExponentialSmoothing::new(*alpha)?,
            )),
            ModelKind::Holt { alpha, beta } => {
                Arc::new(StatisticalModel::new(name, Holt::new(*alpha, *beta)?))
            }
            ModelKind::Arima { p, d, q } => {
                Arc::new(StatisticalModel::new(name, Arima::new(*p, *d, *q)?))
            }
            ModelKind::AutoArima {
                season_length,
                max_p,
                max_d,
                max_q,
            } => {
                if *max_d > 2 {
                    return Err(ForecastError::InvalidInput(
                        "AutoARIMA max_d must be <= 2".to_string(),
                    ));
                }
                let search = AutoArima {
                    max_p: *max_p,
                    max_d: *max_d,
                    max_q: *max_q,
                    ..AutoArima::new(*season_length)?
                };
                Arc::new(AutoArimaModel::new(name, search))
            }
        };

        Ok(model)
    }
}

/// Ordered, uniquely named set of resolved models
#[derive(Debug, Clone)]
pub struct ModelRegistry {
    models: Vec<Arc<dyn ForecastModel>>,
}

impl ModelRegistry {
    /// Resolve every spec; rejects an empty list and duplicate names
    pub fn from_specs(specs: &[ModelSpec]) -> Result<Self> {
        let models = specs
            .iter()
            .map(ModelSpec::build)
            .collect::<Result<Vec<_>>>()?;
        Self::from_models(models)
    }

    /// Wrap already-built models; rejects an empty list and duplicate names
    pub fn from_models(models: Vec<Arc<dyn ForecastModel>>) -> Result<Self> {
        if models.is_empty() {
            return Err(ForecastError::InvalidInput(
                "At least one model is required".to_string(),
            ));
        }

        let mut seen = HashSet::new();
        for model in &models {
            if !seen.insert(model.name()) {
                return Err(ForecastError::InvalidInput(format!(
                    "Duplicate model name '{}'",
                    model.name()
                )));
            }
        }

        Ok(Self { models })
    }

    pub fn models(&self) -> &[Arc<dyn ForecastModel>] {
        &self.models
    }

    pub fn names(&self) -> Vec<&str> {
        self.models.iter().map(|m| m.name()).collect()
    }

    pub fn get(&self, name: &str) -> Option<&Arc<dyn ForecastModel>> {
        self.models.iter().find(|m| m.name() == name)
    }

    pub fn len(&self) -> usize {
        self.models.len()
    }

    pub fn is_empty(&self) -> bool {
        self.models.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_spec_json() {
        let spec: ModelSpec =
            serde_json::from_str(r#"{ "model": "AutoARIMA", "season_length": 12 }"#).unwrap();
        assert_eq!(spec, ModelSpec::auto_arima(12));
        assert_eq!(spec.name(), "AutoARIMA");

        let aliased: ModelSpec =
            serde_json::from_str(r#"{ "model": "WindowAverage", "window": 3, "alias": "MA3" }"#)
                .unwrap();
        assert_eq!(aliased.name(), "MA3");
    }

    #[test]
    fn test_build_validates_parameters() {
        assert!(ModelSpec::ses(1.5).build().is_err());
        assert!(ModelSpec::seasonal_naive(0).build().is_err());
        assert_eq!(ModelSpec::naive().build().unwrap().name(), "Naive");
    }

    #[test]
    fn test_registry_rejects_duplicates() {
        let specs = vec![ModelSpec::naive(), ModelSpec::naive()];
        assert!(matches!(
            ModelRegistry::from_specs(&specs),
            Err(ForecastError::InvalidInput(_))
        ));

        let specs = vec![ModelSpec::naive(), ModelSpec::naive().with_alias("Naive2")];
        let registry = ModelRegistry::from_specs(&specs).unwrap();
        assert_eq!(registry.names(), vec!["Naive", "Naive2"]);
        assert!(ModelRegistry::from_specs(&[]).is_err());
    }
}
