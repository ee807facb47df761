//! # Hier Forecast
//!
//! Hierarchical time series forecasting: partition a flat table into
//! per-entity series, forecast every node, reconcile the forecasts so they
//! add up across the hierarchy, and score the result against held-out data.
//!
//! ## Features
//!
//! - Observation tables loaded from CSV through polars
//! - A series partitioner producing per-entity views
//! - Hierarchy structures with summing matrices and level tags
//! - Base models (Naive, Seasonal Naive, averages, exponential smoothing, ARIMA, AutoARIMA)
//! - Reconciliation (BottomUp, TopDown, MiddleOut, MinTrace)
//! - Evaluation per hierarchy level with an optional benchmark
//!
//! ## Quick Start
//!
//! ```rust
//! use hier_forecast::config::{Parallelism, PipelineConfig};
//! use hier_forecast::dataset::{HierarchicalData, SyntheticConfig};
//! use hier_forecast::models::ModelSpec;
//! use hier_forecast::pipeline::Pipeline;
//! use hier_forecast::reconcile::{MinTraceMethod, ReconcilerSpec};
//!
//! # fn main() -> hier_forecast::error::Result<()> {
//! let data = HierarchicalData::synthetic(&SyntheticConfig::default())?.with_holdout(6)?;
//!
//! let config = PipelineConfig::default()
//!     .with_horizon(6)
//!     .with_models(vec![ModelSpec::seasonal_naive(12), ModelSpec::naive()])
//!     .with_reconcilers(vec![
//!         ReconcilerSpec::BottomUp,
//!         ReconcilerSpec::MinTrace { method: MinTraceMethod::Ols },
//!     ])
//!     .with_benchmark("Naive")
//!     .with_parallelism(Parallelism::Sequential);
//!
//! let pipeline = Pipeline::new(config)?;
//! let actuals = data.actuals.as_ref().expect("held out above");
//! let evaluated = pipeline
//!     .run(&data.observations, &data.hierarchy, actuals)
//!     .into_result()?;
//!
//! assert!(evaluated.evaluation().score("mse", "Overall", "Naive/BottomUp").is_some());
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod data;
pub mod dataset;
pub mod error;
pub mod evaluate;
pub mod forecast;
pub mod hierarchy;
pub mod metrics;
pub mod models;
pub mod partition;
pub mod pipeline;
pub mod reconcile;
pub mod utils;

// Re-export commonly used types
pub use crate::config::{Parallelism, PipelineConfig};
pub use crate::data::{DataLoader, Observation, ObservationTable, TableSchema};
pub use crate::dataset::HierarchicalData;
pub use crate::error::{ForecastError, Result};
pub use crate::evaluate::{EvaluationResult, Evaluator};
pub use crate::forecast::{BaseForecaster, FitFailure, ForecastTable};
pub use crate::hierarchy::Hierarchy;
pub use crate::metrics::{Metric, MetricSpec};
pub use crate::models::{ForecastModel, ModelRegistry, ModelSpec};
pub use crate::partition::SeriesPartitioner;
pub use crate::pipeline::{CancellationToken, Pipeline, PipelineOutcome};
pub use crate::reconcile::{Reconciler, ReconcilerSpec, ReconciledTable};
pub use crate::utils::Frequency;

// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const NAME: &str = env!("CARGO_PKG_NAME");
