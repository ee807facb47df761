//! Stage A: base forecasts
//!
//! Every registered model is fitted on every entity's chronologically
//! ordered history. Entities are processed in parallel on a rayon pool;
//! a failing `(entity, model)` pair is recorded and the stage carries on.

use crate::data::ObservationTable;
use crate::error::{ForecastError, Result};
use crate::models::{ForecastModel, ModelOutput, ModelRegistry};
use crate::partition::EntitySeries;
use crate::pipeline::CancellationToken;
use crate::utils::{future_timestamps, Frequency};
use chrono::NaiveDate;
use polars::prelude::*;
use rayon::prelude::*;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::{debug, info, warn};

/// One predicted value
#[derive(Debug, Clone, PartialEq)]
pub struct ForecastRow {
    pub unique_id: String,
    pub ds: NaiveDate,
    pub model: String,
    /// Horizon offset, starting at 1
    pub step: usize,
    pub value: f64,
}

impl ForecastRow {
    pub fn new(
        unique_id: impl Into<String>,
        ds: NaiveDate,
        model: impl Into<String>,
        step: usize,
        value: f64,
    ) -> Self {
        Self {
            unique_id: unique_id.into(),
            ds,
            model: model.into(),
            step,
            value,
        }
    }
}

/// Forecasts of one model for one entity
#[derive(Debug, Clone, PartialEq)]
pub struct SeriesForecast {
    pub timestamps: Vec<NaiveDate>,
    pub mean: Vec<f64>,
    /// In-sample one-step residuals, empty when the model has no fit
    pub residuals: Vec<Option<f64>>,
}

/// Base forecasts keyed by `(entity, model)`
#[derive(Debug, Clone, PartialEq)]
pub struct ForecastTable {
    horizon: usize,
    models: Vec<String>,
    series: BTreeMap<(String, String), SeriesForecast>,
}

impl ForecastTable {
    fn empty(horizon: usize, models: Vec<String>) -> Self {
        Self {
            horizon,
            models,
            series: BTreeMap::new(),
        }
    }

    /// Assemble a table from individual rows
    ///
    /// Every `(entity, model)` pair must have exactly the steps `1..=horizon`,
    /// and one entity's steps must share timestamps across models.
    pub fn from_rows(rows: Vec<ForecastRow>) -> Result<Self> {
        let mut grouped: BTreeMap<(String, String), BTreeMap<usize, (NaiveDate, f64)>> =
            BTreeMap::new();
        let mut models = Vec::new();

        for row in rows {
            if row.step == 0 {
                return Err(ForecastError::InvalidInput(format!(
                    "Forecast for '{}' / '{}' has step 0; steps start at 1",
                    row.unique_id, row.model
                )));
            }
            if !row.value.is_finite() {
                return Err(ForecastError::InvalidInput(format!(
                    "Forecast for '{}' / '{}' step {} is not finite",
                    row.unique_id, row.model, row.step
                )));
            }
            if !models.contains(&row.model) {
                models.push(row.model.clone());
            }
            let steps = grouped
                .entry((row.unique_id.clone(), row.model.clone()))
                .or_default();
            if steps.insert(row.step, (row.ds, row.value)).is_some() {
                return Err(ForecastError::InvalidInput(format!(
                    "Duplicate forecast for '{}' / '{}' step {}",
                    row.unique_id, row.model, row.step
                )));
            }
        }

        let Some(horizon) = grouped.values().map(BTreeMap::len).next() else {
            return Err(ForecastError::InvalidInput(
                "Forecast table has no rows".to_string(),
            ));
        };

        let mut table = Self::empty(horizon, models);
        for ((entity, model), steps) in grouped {
            let contiguous = steps.keys().copied().eq(1..=horizon);
            if !contiguous {
                return Err(ForecastError::InvalidInput(format!(
                    "Forecasts for '{}' / '{}' do not cover steps 1..={}",
                    entity, model, horizon
                )));
            }
            let (timestamps, mean) = steps.into_values().unzip();
            table.insert(
                entity,
                model,
                SeriesForecast {
                    timestamps,
                    mean,
                    residuals: Vec::new(),
                },
            )?;
        }

        Ok(table)
    }

    pub(crate) fn insert(
        &mut self,
        entity: String,
        model: String,
        forecast: SeriesForecast,
    ) -> Result<()> {
        if forecast.mean.len() != self.horizon || forecast.timestamps.len() != self.horizon {
            return Err(ForecastError::InvalidInput(format!(
                "Forecast for '{}' / '{}' has {} steps, expected {}",
                entity,
                model,
                forecast.mean.len(),
                self.horizon
            )));
        }
        let clash = self
            .series
            .range((entity.clone(), String::new())..)
            .take_while(|((e, _), _)| e == &entity)
            .any(|(_, other)| other.timestamps != forecast.timestamps);
        if clash {
            return Err(ForecastError::InvalidInput(format!(
                "Forecasts for '{}' disagree on timestamps across models",
                entity
            )));
        }

        self.series.insert((entity, model), forecast);
        Ok(())
    }

    pub fn horizon(&self) -> usize {
        self.horizon
    }

    /// Model names in configuration order
    pub fn models(&self) -> &[String] {
        &self.models
    }

    pub fn entity_keys(&self) -> BTreeSet<String> {
        self.series.keys().map(|(e, _)| e.clone()).collect()
    }

    pub fn get(&self, entity: &str, model: &str) -> Option<&SeriesForecast> {
        self.series.get(&(entity.to_string(), model.to_string()))
    }

    pub fn value(&self, entity: &str, model: &str, step: usize) -> Option<f64> {
        let forecast = self.get(entity, model)?;
        step.checked_sub(1).and_then(|i| forecast.mean.get(i).copied())
    }

    /// Entities that have forecasts from `model`
    pub fn entities_for(&self, model: &str) -> BTreeSet<String> {
        self.series
            .keys()
            .filter(|(_, m)| m == model)
            .map(|(e, _)| e.clone())
            .collect()
    }

    /// Forecast timestamps of an entity
    pub fn timestamps(&self, entity: &str) -> Option<&[NaiveDate]> {
        self.series
            .range((entity.to_string(), String::new())..)
            .next()
            .filter(|((e, _), _)| e == entity)
            .map(|(_, f)| f.timestamps.as_slice())
    }

    /// Number of forecast values
    pub fn len(&self) -> usize {
        self.series.len() * self.horizon
    }

    pub fn is_empty(&self) -> bool {
        self.series.is_empty()
    }

    /// Flat rows ordered by entity, model, step
    pub fn rows(&self) -> Vec<ForecastRow> {
        self.series
            .iter()
            .flat_map(|((entity, model), f)| {
                f.timestamps
                    .iter()
                    .zip(&f.mean)
                    .enumerate()
                    .map(move |(i, (ds, value))| {
                        ForecastRow::new(entity.clone(), *ds, model.clone(), i + 1, *value)
                    })
            })
            .collect()
    }

    /// Wide DataFrame: `unique_id, ds` plus one column per model
    pub fn to_dataframe(&self) -> Result<DataFrame> {
        let entities = self.entity_keys();
        let mut ids = Vec::new();
        let mut dates = Vec::new();
        for entity in &entities {
            if let Some(timestamps) = self.timestamps(entity) {
                for ds in timestamps {
                    ids.push(entity.clone());
                    dates.push(ds.to_string());
                }
            }
        }

        let mut columns = vec![Series::new("unique_id", ids), Series::new("ds", dates)];
        for model in &self.models {
            let values: Vec<Option<f64>> = entities
                .iter()
                .flat_map(|entity| {
                    (1..=self.horizon).map(move |step| self.value(entity, model, step))
                })
                .collect();
            columns.push(Series::new(model, values));
        }

        Ok(DataFrame::new(columns)?)
    }
}

/// A model that could not forecast one entity
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FitFailure {
    pub entity: String,
    pub model: String,
    pub reason: String,
}

impl FitFailure {
    pub fn into_error(self) -> ForecastError {
        ForecastError::ModelFit {
            entity: self.entity,
            model: self.model,
            reason: self.reason,
        }
    }
}

impl fmt::Display for FitFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} on {}: {}", self.model, self.entity, self.reason)
    }
}

/// Output of Stage A
#[derive(Debug, Clone)]
pub struct BaseForecastOutput {
    pub forecasts: ForecastTable,
    pub failures: Vec<FitFailure>,
}

struct EntityResult {
    entity: String,
    forecasts: Vec<(String, SeriesForecast)>,
    failures: Vec<FitFailure>,
}

/// Runs every model over every entity
#[derive(Debug, Clone)]
pub struct BaseForecaster {
    registry: ModelRegistry,
    horizon: usize,
    frequency: Frequency,
    fit_timeout: Option<Duration>,
    cancellation: CancellationToken,
}

impl BaseForecaster {
    pub fn new(registry: ModelRegistry, horizon: usize, frequency: Frequency) -> Result<Self> {
        if horizon == 0 {
            return Err(ForecastError::InvalidInput(
                "Horizon must be greater than zero".to_string(),
            ));
        }

        Ok(Self {
            registry,
            horizon,
            frequency,
            fit_timeout: None,
            cancellation: CancellationToken::new(),
        })
    }

    /// Abandon any single fit that runs longer than `timeout`
    pub fn with_fit_timeout(mut self, timeout: Duration) -> Self {
        self.fit_timeout = Some(timeout);
        self
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = token;
        self
    }

    pub fn registry(&self) -> &ModelRegistry {
        &self.registry
    }

    /// Forecast on a dedicated pool
    pub fn forecast_in(
        &self,
        table: &ObservationTable,
        pool: &rayon::ThreadPool,
    ) -> Result<BaseForecastOutput> {
        pool.install(|| self.forecast(table))
    }

    /// Forecast on the current rayon pool
    pub fn forecast(&self, table: &ObservationTable) -> Result<BaseForecastOutput> {
        let series: Vec<EntitySeries<'_>> = table.partition_by_entity().collect();
        if series.is_empty() {
            warn!("observation table is empty, no base forecasts produced");
        }
        info!(
            entities = series.len(),
            models = self.registry.len(),
            horizon = self.horizon,
            frequency = %self.frequency,
            "starting base forecasts"
        );

        let results = series
            .par_iter()
            .map(|s| self.forecast_entity(s))
            .collect::<Result<Vec<_>>>()?;

        // Nothing is published if cancellation raced the last entities
        self.check_cancelled()?;

        let models = self.registry.names().into_iter().map(String::from).collect();
        let mut forecasts = ForecastTable::empty(self.horizon, models);
        let mut failures = Vec::new();
        for result in results {
            for (model, forecast) in result.forecasts {
                forecasts.insert(result.entity.clone(), model, forecast)?;
            }
            failures.extend(result.failures);
        }

        info!(
            forecasts = forecasts.len(),
            failures = failures.len(),
            "base forecasts complete"
        );
        Ok(BaseForecastOutput {
            forecasts,
            failures,
        })
    }

    fn check_cancelled(&self) -> Result<()> {
        if self.cancellation.is_cancelled() {
            warn!("base forecasting cancelled");
            return Err(ForecastError::Cancelled("base forecasting".to_string()));
        }
        Ok(())
    }

    fn forecast_entity(&self, series: &EntitySeries<'_>) -> Result<EntityResult> {
        self.check_cancelled()?;

        let entity = series.key().to_string();
        let history = series.values();
        let last = series.last_timestamp().ok_or_else(|| {
            ForecastError::InvalidInput(format!("Entity '{}' has no observations", entity))
        })?;
        let timestamps = future_timestamps(last, self.horizon, self.frequency)?;

        let mut result = EntityResult {
            entity,
            forecasts: Vec::with_capacity(self.registry.len()),
            failures: Vec::new(),
        };
        for model in self.registry.models() {
            let required = model.min_observations();
            if history.len() < required {
                let reason = format!(
                    "needs at least {} observations, have {}",
                    required,
                    history.len()
                );
                warn!(entity = %result.entity, model = model.name(), %reason, "history too short, fit skipped");
                result.failures.push(FitFailure {
                    entity: result.entity.clone(),
                    model: model.name().to_string(),
                    reason,
                });
                continue;
            }
            match self.fit_one(model, &history) {
                Ok(output) => {
                    debug!(entity = %result.entity, model = model.name(), "model fitted");
                    let residuals = output.residuals(&history);
                    result.forecasts.push((
                        model.name().to_string(),
                        SeriesForecast {
                            timestamps: timestamps.clone(),
                            mean: output.mean,
                            residuals,
                        },
                    ));
                }
                Err(reason) => {
                    warn!(entity = %result.entity, model = model.name(), %reason, "model fit failed");
                    result.failures.push(FitFailure {
                        entity: result.entity.clone(),
                        model: model.name().to_string(),
                        reason,
                    });
                }
            }
        }

        Ok(result)
    }

    fn fit_one(
        &self,
        model: &Arc<dyn ForecastModel>,
        history: &[f64],
    ) -> std::result::Result<ModelOutput, String> {
        let horizon = self.horizon;
        let outcome = match self.fit_timeout {
            None => panic::catch_unwind(AssertUnwindSafe(|| model.fit_predict(history, horizon)))
                .map_err(|_| "model panicked".to_string())?,
            Some(timeout) => {
                let (tx, rx) = mpsc::channel();
                let worker_model = Arc::clone(model);
                let owned = history.to_vec();
                thread::Builder::new()
                    .name(format!("fit-{}", model.name()))
                    .spawn(move || {
                        // The receiver is gone after a timeout; the late result is dropped
                        let _ = tx.send(worker_model.fit_predict(&owned, horizon));
                    })
                    .map_err(|e| format!("cannot start fit thread: {}", e))?;

                match rx.recv_timeout(timeout) {
                    Ok(outcome) => outcome,
                    Err(RecvTimeoutError::Timeout) => {
                        return Err(format!("timed out after {} ms", timeout.as_millis()))
                    }
                    Err(RecvTimeoutError::Disconnected) => {
                        return Err("model panicked".to_string())
                    }
                }
            }
        };

        let output = outcome.map_err(|e| e.to_string())?;
        if output.mean.len() != horizon {
            return Err(format!(
                "returned {} values for a horizon of {}",
                output.mean.len(),
                horizon
            ));
        }
        if output.mean.iter().any(|v| !v.is_finite()) {
            return Err("returned non-finite forecasts".to_string());
        }
        Ok(output)
    }
}
