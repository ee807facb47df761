//! Stage B: reconciliation
//!
//! Base forecasts of every node are adjusted so that each aggregate equals
//! the sum of its bottom-level series. Every reconciler works on one base
//! model at a time, on a `nodes × horizon` matrix whose rows follow the
//! hierarchy's node order.

use crate::data::ObservationTable;
use crate::error::{ForecastError, Result};
use crate::forecast::ForecastTable;
use crate::hierarchy::Hierarchy;
use chrono::NaiveDate;
use forecast_math::{MathError, Matrix};
use polars::prelude::*;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt::Debug;
use tracing::{debug, info, warn};

pub mod bottom_up;
pub mod middle_out;
pub mod min_trace;
pub mod top_down;

pub use self::bottom_up::BottomUp;
pub use self::middle_out::MiddleOut;
pub use self::min_trace::{MinTrace, MinTraceMethod};
pub use self::top_down::{TopDown, TopDownMethod};

/// Relative tolerance of the aggregation check on reconciled output
pub const COHERENCE_TOLERANCE: f64 = 1e-9;

/// Historical observations per node, in hierarchy node order
#[derive(Debug, Clone, Default)]
pub struct History {
    series: Vec<BTreeMap<NaiveDate, f64>>,
}

impl History {
    /// Collect the observations of every hierarchy node found in `table`
    pub fn from_table(table: &ObservationTable, hierarchy: &Hierarchy) -> Self {
        let mut series = vec![BTreeMap::new(); hierarchy.n_nodes()];
        for row in table.rows() {
            if let Some(idx) = hierarchy.node_index(&row.unique_id) {
                series[idx].insert(row.ds, row.y);
            }
        }
        Self { series }
    }

    /// Observations of a node, `None` if it has none
    pub fn series(&self, node: usize) -> Option<&BTreeMap<NaiveDate, f64>> {
        self.series.get(node).filter(|s| !s.is_empty())
    }
}

/// Inputs a reconciler may need besides the base forecasts
#[derive(Debug, Clone, Copy)]
pub struct ReconcileContext<'a> {
    pub history: &'a History,
    /// In-sample residuals per node, empty where the model has no fit
    pub residuals: &'a [Vec<Option<f64>>],
}

/// A reconciliation method
pub trait Reconciler: Debug + Send + Sync {
    /// Label used in reconciled column names
    fn name(&self) -> String;

    /// Adjust `base` (`nodes × horizon`) into coherent forecasts of the same shape
    fn reconcile(
        &self,
        base: &Matrix,
        hierarchy: &Hierarchy,
        context: &ReconcileContext<'_>,
    ) -> Result<Matrix>;
}

/// Rows of `base` belonging to the bottom level
pub(crate) fn bottom_rows(base: &Matrix, hierarchy: &Hierarchy) -> Matrix {
    let offset = hierarchy.n_aggregate();
    let mut bottom = Matrix::zeros(hierarchy.n_bottom(), base.cols());
    for j in 0..hierarchy.n_bottom() {
        bottom.row_mut(j).copy_from_slice(base.row(offset + j));
    }
    bottom
}

/// Every node's forecasts from bottom-level forecasts, `S · bottom`
pub(crate) fn sum_up(hierarchy: &Hierarchy, bottom: &Matrix) -> Result<Matrix> {
    Ok(hierarchy.summing_matrix().matmul(bottom)?)
}

/// Inverse of a system matrix; singular systems are an input problem
pub(crate) fn invert(matrix: &Matrix, what: &str) -> Result<Matrix> {
    matrix.inverse().map_err(|e| match e {
        MathError::SingularMatrix(_) => {
            ForecastError::InvalidInput(format!("{} is singular and cannot be inverted", what))
        }
        other => ForecastError::Math(other),
    })
}

/// Verify that every aggregate row equals the sum of its leaves
pub fn check_coherent(hierarchy: &Hierarchy, values: &Matrix, label: &str) -> Result<()> {
    for node in 0..hierarchy.n_aggregate() {
        for step in 0..values.cols() {
            let total: f64 = hierarchy
                .leaves(node)
                .iter()
                .map(|&j| values[(hierarchy.n_aggregate() + j, step)])
                .sum();
            let value = values[(node, step)];
            if (value - total).abs() > COHERENCE_TOLERANCE * total.abs().max(1.0) {
                return Err(ForecastError::InconsistentHierarchy(format!(
                    "{}: '{}' step {} is {} but its leaves sum to {}",
                    label,
                    hierarchy.nodes()[node],
                    step + 1,
                    value,
                    total
                )));
            }
        }
    }
    Ok(())
}

/// Reconciliation method configuration
///
/// ```json
/// { "reconciler": "BottomUp" }
/// { "reconciler": "TopDown", "method": "forecast_proportions" }
/// { "reconciler": "MiddleOut", "middle_level": "State", "top_down_method": "forecast_proportions" }
/// { "reconciler": "MinTrace", "method": "ols" }
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "reconciler")]
pub enum ReconcilerSpec {
    BottomUp,
    TopDown {
        #[serde(default)]
        method: TopDownMethod,
    },
    MiddleOut {
        middle_level: String,
        #[serde(default)]
        top_down_method: TopDownMethod,
    },
    MinTrace {
        #[serde(default)]
        method: MinTraceMethod,
    },
}

impl ReconcilerSpec {
    pub fn build(&self) -> Box<dyn Reconciler> {
        match self {
            ReconcilerSpec::BottomUp => Box::new(BottomUp),
            ReconcilerSpec::TopDown { method } => Box::new(TopDown::new(*method)),
            ReconcilerSpec::MiddleOut {
                middle_level,
                top_down_method,
            } => Box::new(MiddleOut::new(middle_level.clone(), *top_down_method)),
            ReconcilerSpec::MinTrace { method } => Box::new(MinTrace::new(*method)),
        }
    }
}

/// Reconciled forecasts of one base model under one method
#[derive(Debug, Clone, PartialEq)]
pub struct ReconciledColumn {
    pub model: String,
    pub method: String,
    /// `nodes × horizon`, rows in hierarchy node order
    pub values: Matrix,
}

impl ReconciledColumn {
    /// `"<model>/<method>"`
    pub fn name(&self) -> String {
        format!("{}/{}", self.model, self.method)
    }
}

/// One reconciled value
#[derive(Debug, Clone, PartialEq)]
pub struct ReconciledRow {
    pub unique_id: String,
    pub ds: NaiveDate,
    pub model: String,
    pub method: String,
    pub step: usize,
    pub value: f64,
}

/// Output of Stage B
///
/// Base forecasts of every reconciled model are kept alongside so they can
/// be scored as a benchmark.
#[derive(Debug, Clone, PartialEq)]
pub struct ReconciledTable {
    nodes: Vec<String>,
    timestamps: Vec<Vec<NaiveDate>>,
    horizon: usize,
    base: Vec<(String, Matrix)>,
    columns: Vec<ReconciledColumn>,
    skipped_models: Vec<String>,
}

impl ReconciledTable {
    /// Node names in row order
    pub fn nodes(&self) -> &[String] {
        &self.nodes
    }

    pub fn horizon(&self) -> usize {
        self.horizon
    }

    /// Forecast timestamps of the node at `row`
    pub fn timestamps(&self, row: usize) -> &[NaiveDate] {
        &self.timestamps[row]
    }

    pub fn columns(&self) -> &[ReconciledColumn] {
        &self.columns
    }

    pub fn column(&self, name: &str) -> Option<&ReconciledColumn> {
        self.columns.iter().find(|c| c.name() == name)
    }

    /// Column names, `"<model>/<method>"`
    pub fn column_names(&self) -> Vec<String> {
        self.columns.iter().map(ReconciledColumn::name).collect()
    }

    /// Base models that were reconciled
    pub fn base_models(&self) -> Vec<&str> {
        self.base.iter().map(|(m, _)| m.as_str()).collect()
    }

    /// Unreconciled forecasts of a base model
    pub fn base(&self, model: &str) -> Option<&Matrix> {
        self.base.iter().find(|(m, _)| m == model).map(|(_, v)| v)
    }

    /// Models left out because Stage A had no forecasts for some node
    pub fn skipped_models(&self) -> &[String] {
        &self.skipped_models
    }

    pub fn entity_keys(&self) -> BTreeSet<String> {
        self.nodes.iter().cloned().collect()
    }

    pub fn value(&self, entity: &str, column: &str, step: usize) -> Option<f64> {
        let row = self.nodes.iter().position(|n| n == entity)?;
        let column = self.column(column)?;
        let step = step.checked_sub(1).filter(|s| *s < self.horizon)?;
        Some(column.values[(row, step)])
    }

    /// Flat rows ordered by column, node, step
    pub fn rows(&self) -> Vec<ReconciledRow> {
        let mut rows = Vec::with_capacity(self.columns.len() * self.nodes.len() * self.horizon);
        for column in &self.columns {
            for (i, node) in self.nodes.iter().enumerate() {
                for (s, ds) in self.timestamps[i].iter().enumerate() {
                    rows.push(ReconciledRow {
                        unique_id: node.clone(),
                        ds: *ds,
                        model: column.model.clone(),
                        method: column.method.clone(),
                        step: s + 1,
                        value: column.values[(i, s)],
                    });
                }
            }
        }
        rows
    }

    /// Wide DataFrame: `unique_id, ds`, base model columns, reconciled columns
    pub fn to_dataframe(&self) -> Result<DataFrame> {
        let mut ids = Vec::new();
        let mut dates = Vec::new();
        for (i, node) in self.nodes.iter().enumerate() {
            for ds in &self.timestamps[i] {
                ids.push(node.as_str());
                dates.push(ds.to_string());
            }
        }

        let flatten = |values: &Matrix| -> Vec<f64> {
            (0..values.rows())
                .flat_map(|r| values.row(r).to_vec())
                .collect()
        };
        let mut columns = vec![Series::new("unique_id", ids), Series::new("ds", dates)];
        for (model, values) in &self.base {
            columns.push(Series::new(model, flatten(values)));
        }
        for column in &self.columns {
            columns.push(Series::new(&column.name(), flatten(&column.values)));
        }

        Ok(DataFrame::new(columns)?)
    }
}

/// Reconcile every base model with every method
///
/// The hierarchy's node set must equal the forecast table's entity set.
/// A model missing forecasts for some node is skipped; if every model is
/// skipped the stage fails.
pub fn reconcile_forecasts(
    forecasts: &ForecastTable,
    observations: &ObservationTable,
    hierarchy: &Hierarchy,
    reconcilers: &[Box<dyn Reconciler>],
) -> Result<ReconciledTable> {
    if reconcilers.is_empty() {
        return Err(ForecastError::InvalidInput(
            "At least one reconciliation method is required".to_string(),
        ));
    }
    hierarchy.validate_keys(&forecasts.entity_keys(), "Forecast table")?;

    let node_keys = hierarchy.node_keys();
    let mut models = Vec::new();
    let mut skipped_models = Vec::new();
    for model in forecasts.models() {
        let covered = forecasts.entities_for(model);
        if covered == node_keys {
            models.push(model.clone());
        } else {
            let missing: Vec<&String> = node_keys.difference(&covered).take(5).collect();
            warn!(model = %model, ?missing, "model lacks forecasts for some nodes, skipping it");
            skipped_models.push(model.clone());
        }
    }
    if models.is_empty() {
        return Err(ForecastError::InconsistentHierarchy(format!(
            "no model has forecasts for every hierarchy node (skipped: {:?})",
            skipped_models
        )));
    }

    let history = History::from_table(observations, hierarchy);
    let timestamps: Vec<Vec<NaiveDate>> = hierarchy
        .nodes()
        .iter()
        .map(|node| {
            forecasts
                .timestamps(node)
                .map(<[NaiveDate]>::to_vec)
                .unwrap_or_default()
        })
        .collect();
    info!(
        models = models.len(),
        methods = reconcilers.len(),
        nodes = hierarchy.n_nodes(),
        "starting reconciliation"
    );

    let per_model = models
        .par_iter()
        .map(|model| reconcile_model(forecasts, model, hierarchy, &history, reconcilers))
        .collect::<Result<Vec<_>>>()?;

    let mut base = Vec::with_capacity(per_model.len());
    let mut columns = Vec::new();
    for (model, (base_values, reconciled)) in models.into_iter().zip(per_model) {
        base.push((model, base_values));
        columns.extend(reconciled);
    }

    info!(columns = columns.len(), "reconciliation complete");
    Ok(ReconciledTable {
        nodes: hierarchy.nodes().to_vec(),
        timestamps,
        horizon: forecasts.horizon(),
        base,
        columns,
        skipped_models,
    })
}

fn reconcile_model(
    forecasts: &ForecastTable,
    model: &str,
    hierarchy: &Hierarchy,
    history: &History,
    reconcilers: &[Box<dyn Reconciler>],
) -> Result<(Matrix, Vec<ReconciledColumn>)> {
    let mut rows = Vec::with_capacity(hierarchy.n_nodes());
    let mut residuals = Vec::with_capacity(hierarchy.n_nodes());
    for node in hierarchy.nodes() {
        let forecast = forecasts.get(node, model).ok_or_else(|| {
            ForecastError::InconsistentHierarchy(format!(
                "no '{}' forecasts for node '{}'",
                model, node
            ))
        })?;
        rows.push(forecast.mean.clone());
        residuals.push(forecast.residuals.clone());
    }
    let base = Matrix::from_rows(rows)?;
    let context = ReconcileContext {
        history,
        residuals: &residuals,
    };

    let mut columns = Vec::with_capacity(reconcilers.len());
    for reconciler in reconcilers {
        let method = reconciler.name();
        let values = reconciler.reconcile(&base, hierarchy, &context)?;
        let column = ReconciledColumn {
            model: model.to_string(),
            method,
            values,
        };
        check_coherent(hierarchy, &column.values, &column.name())?;
        debug!(column = %column.name(), "reconciled");
        columns.push(column);
    }

    Ok((base, columns))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hierarchy::{LevelSpec, NodeSpec};

    #[test]
    fn test_spec_json_names() {
        let spec: ReconcilerSpec =
            serde_json::from_str(r#"{ "reconciler": "MinTrace", "method": "mint_shrink" }"#)
                .unwrap();
        assert_eq!(
            spec,
            ReconcilerSpec::MinTrace {
                method: MinTraceMethod::MintShrink
            }
        );
        assert_eq!(spec.build().name(), "MinTrace_method-mint_shrink");

        let spec: ReconcilerSpec = serde_json::from_str(r#"{ "reconciler": "TopDown" }"#).unwrap();
        assert_eq!(spec.build().name(), "TopDown_method-forecast_proportions");
    }

    #[test]
    fn test_check_coherent_flags_mismatch() {
        let hierarchy = Hierarchy::from_levels(vec![
            LevelSpec {
                name: "Total".to_string(),
                nodes: vec![NodeSpec::new("T", vec!["A", "B"])],
            },
            LevelSpec {
                name: "Leaf".to_string(),
                nodes: vec![NodeSpec::leaf("A"), NodeSpec::leaf("B")],
            },
        ])
        .unwrap();

        let good = Matrix::from_rows(vec![vec![3.0], vec![1.0], vec![2.0]]).unwrap();
        assert!(check_coherent(&hierarchy, &good, "x").is_ok());
        let bad = Matrix::from_rows(vec![vec![4.0], vec![1.0], vec![2.0]]).unwrap();
        assert!(check_coherent(&hierarchy, &bad, "x").is_err());
    }
}
