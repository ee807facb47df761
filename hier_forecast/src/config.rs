//! Pipeline configuration

use crate::error::{ForecastError, Result};
use crate::metrics::MetricSpec;
use crate::models::{ModelRegistry, ModelSpec};
use crate::reconcile::{Reconciler, ReconcilerSpec};
use crate::utils::Frequency;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;

/// How many worker threads Stage A and Stage B may use
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Parallelism {
    Sequential,
    Threads(usize),
    #[default]
    AllCores,
}

impl Parallelism {
    /// Number of worker threads, `0` meaning one per core
    pub fn threads(&self) -> usize {
        match self {
            Parallelism::Sequential => 1,
            Parallelism::Threads(n) => *n,
            Parallelism::AllCores => 0,
        }
    }

    /// Build a dedicated pool for one run
    pub fn build_pool(&self) -> Result<rayon::ThreadPool> {
        if let Parallelism::Threads(0) = self {
            return Err(ForecastError::InvalidInput(
                "Thread count must be positive".to_string(),
            ));
        }

        rayon::ThreadPoolBuilder::new()
            .num_threads(self.threads())
            .thread_name(|i| format!("hier-forecast-{}", i))
            .build()
            .map_err(|e| ForecastError::InvalidInput(format!("Cannot build thread pool: {}", e)))
    }
}

fn default_horizon() -> usize {
    12
}

fn default_models() -> Vec<ModelSpec> {
    vec![ModelSpec::auto_arima(12), ModelSpec::naive()]
}

fn default_reconcilers() -> Vec<ReconcilerSpec> {
    vec![ReconcilerSpec::BottomUp]
}

fn default_metrics() -> Vec<MetricSpec> {
    vec![MetricSpec::Mse]
}

/// Everything a pipeline run needs besides its data
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub horizon: usize,
    pub frequency: Frequency,
    pub models: Vec<ModelSpec>,
    pub reconcilers: Vec<ReconcilerSpec>,
    pub metrics: Vec<MetricSpec>,
    pub benchmark: Option<String>,
    pub parallelism: Parallelism,
    /// Per-fit timeout in milliseconds
    pub fit_timeout_ms: Option<u64>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            horizon: default_horizon(),
            frequency: Frequency::Monthly,
            models: default_models(),
            reconcilers: default_reconcilers(),
            metrics: default_metrics(),
            benchmark: None,
            parallelism: Parallelism::default(),
            fit_timeout_ms: None,
        }
    }
}

impl PipelineConfig {
    /// Parse a configuration from JSON, filling unspecified fields with defaults
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Read a configuration from a JSON file
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = fs::read_to_string(path)?;
        Self::from_json_str(&contents)
    }

    pub fn with_horizon(mut self, horizon: usize) -> Self {
        self.horizon = horizon;
        self
    }

    pub fn with_frequency(mut self, frequency: Frequency) -> Self {
        self.frequency = frequency;
        self
    }

    pub fn with_models(mut self, models: Vec<ModelSpec>) -> Self {
        self.models = models;
        self
    }

    pub fn with_reconcilers(mut self, reconcilers: Vec<ReconcilerSpec>) -> Self {
        self.reconcilers = reconcilers;
        self
    }

    pub fn with_metrics(mut self, metrics: Vec<MetricSpec>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn with_benchmark(mut self, benchmark: impl Into<String>) -> Self {
        self.benchmark = Some(benchmark.into());
        self
    }

    pub fn with_parallelism(mut self, parallelism: Parallelism) -> Self {
        self.parallelism = parallelism;
        self
    }

    pub fn with_fit_timeout(mut self, timeout: Duration) -> Self {
        self.fit_timeout_ms = Some(timeout.as_millis() as u64);
        self
    }

    pub fn fit_timeout(&self) -> Option<Duration> {
        self.fit_timeout_ms.map(Duration::from_millis)
    }

    /// Check the settings that can be checked without data
    pub fn validate(&self) -> Result<()> {
        if self.horizon == 0 {
            return Err(ForecastError::InvalidInput(
                "Horizon must be greater than zero".to_string(),
            ));
        }
        if self.reconcilers.is_empty() {
            return Err(ForecastError::InvalidInput(
                "At least one reconciliation method is required".to_string(),
            ));
        }
        if self.metrics.is_empty() {
            return Err(ForecastError::InvalidInput(
                "At least one metric is required".to_string(),
            ));
        }
        if self.fit_timeout_ms == Some(0) {
            return Err(ForecastError::InvalidInput(
                "Fit timeout must be positive".to_string(),
            ));
        }
        if let Parallelism::Threads(0) = self.parallelism {
            return Err(ForecastError::InvalidInput(
                "Thread count must be positive".to_string(),
            ));
        }
        // Also rejects an empty or duplicate model list
        ModelRegistry::from_specs(&self.models)?;
        Ok(())
    }

    /// Resolve the model list
    pub fn model_registry(&self) -> Result<ModelRegistry> {
        ModelRegistry::from_specs(&self.models)
    }

    /// Resolve the reconciliation methods
    pub fn build_reconcilers(&self) -> Vec<Box<dyn Reconciler>> {
        self.reconcilers.iter().map(ReconcilerSpec::build).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_validate() {
        assert!(PipelineConfig::default().validate().is_ok());
    }

    #[test]
    fn test_parallelism_json() {
        let p: Parallelism = serde_json::from_str(r#"{ "threads": 4 }"#).unwrap();
        assert_eq!(p, Parallelism::Threads(4));
        let p: Parallelism = serde_json::from_str(r#""sequential""#).unwrap();
        assert_eq!(p.threads(), 1);
    }

    #[test]
    fn test_sequential_pool_has_one_thread() {
        let pool = Parallelism::Sequential.build_pool().unwrap();
        assert_eq!(pool.current_num_threads(), 1);
        assert!(Parallelism::Threads(0).build_pool().is_err());
    }
}
