//! # hierfc
//!
//! Workspace facade for hierarchical forecasting.
//!
//! - [`math`]: dense matrices, covariance estimators and univariate models
//! - [`forecast`]: partitioning, base forecasts, reconciliation and evaluation
//!
//! ## Example
//!
//! ```
//! use hierfc::forecast::hierarchy::{Hierarchy, LevelSpec, NodeSpec};
//!
//! let hierarchy = Hierarchy::from_levels(vec![
//!     LevelSpec { name: "Total".to_string(), nodes: vec![NodeSpec::new("AB", vec!["A", "B"])] },
//!     LevelSpec { name: "Leaf".to_string(), nodes: vec![NodeSpec::leaf("A"), NodeSpec::leaf("B")] },
//! ])
//! .unwrap();
//! assert_eq!(hierarchy.summing_matrix().row(0), &[1.0, 1.0]);
//! ```

pub use forecast_math as math;
pub use hier_forecast as forecast;

pub use hier_forecast::{
    ForecastError, Hierarchy, HierarchicalData, Pipeline, PipelineConfig, PipelineOutcome,
};
pub use forecast_math::{MathError, Matrix};

// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
