//! Top-down reconciliation
//!
//! A root node's forecast is split among its bottom-level series by
//! proportions, then summed back up so every level is coherent.

use crate::error::{ForecastError, Result};
use crate::hierarchy::Hierarchy;
use crate::reconcile::{sum_up, History, ReconcileContext, Reconciler};
use forecast_math::stats::mean;
use forecast_math::Matrix;
use serde::{Deserialize, Serialize};
use std::fmt;

/// How a parent's forecast is split among its descendants
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TopDownMethod {
    /// Each level down in proportion to the children's base forecasts
    #[default]
    ForecastProportions,
    /// Mean over time of the leaf-to-root ratios
    #[serde(rename = "average_proportions")]
    AverageHistoricalProportions,
    /// Ratio of the leaf's mean to the root's mean
    #[serde(rename = "proportion_averages")]
    ProportionAveragesHistorical,
}

impl fmt::Display for TopDownMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TopDownMethod::ForecastProportions => "forecast_proportions",
            TopDownMethod::AverageHistoricalProportions => "average_proportions",
            TopDownMethod::ProportionAveragesHistorical => "proportion_averages",
        };
        f.write_str(name)
    }
}

/// Disaggregates the single top node
#[derive(Debug, Clone, Copy)]
pub struct TopDown {
    method: TopDownMethod,
}

impl TopDown {
    pub fn new(method: TopDownMethod) -> Self {
        Self { method }
    }

    pub fn method(&self) -> TopDownMethod {
        self.method
    }
}

impl Reconciler for TopDown {
    fn name(&self) -> String {
        format!("TopDown_method-{}", self.method)
    }

    fn reconcile(
        &self,
        base: &Matrix,
        hierarchy: &Hierarchy,
        context: &ReconcileContext<'_>,
    ) -> Result<Matrix> {
        hierarchy.require_tree("Top-down reconciliation")?;
        let [root] = hierarchy.top_nodes() else {
            return Err(ForecastError::InvalidInput(format!(
                "Top-down reconciliation needs a single top node, the top level has {}",
                hierarchy.top_nodes().len()
            )));
        };

        let mut bottom = Matrix::zeros(hierarchy.n_bottom(), base.cols());
        disaggregate(*root, base, hierarchy, self.method, context.history, &mut bottom)?;
        sum_up(hierarchy, &bottom)
    }
}

/// Split `root`'s base forecast among its leaves, writing rows of `bottom`
pub(crate) fn disaggregate(
    root: usize,
    base: &Matrix,
    hierarchy: &Hierarchy,
    method: TopDownMethod,
    history: &History,
    bottom: &mut Matrix,
) -> Result<()> {
    let root_forecast = base.row(root).to_vec();
    match method {
        TopDownMethod::ForecastProportions => {
            allocate(root, root_forecast, base, hierarchy, bottom);
            Ok(())
        }
        TopDownMethod::AverageHistoricalProportions
        | TopDownMethod::ProportionAveragesHistorical => {
            let proportions = historical_proportions(root, hierarchy, method, history)?;
            for (&leaf, p) in hierarchy.leaves(root).iter().zip(proportions) {
                for (target, value) in bottom.row_mut(leaf).iter_mut().zip(&root_forecast) {
                    *target = p * value;
                }
            }
            Ok(())
        }
    }
}

/// Walk the subtree, giving each child its share of the parent's allocation
fn allocate(
    node: usize,
    allocation: Vec<f64>,
    base: &Matrix,
    hierarchy: &Hierarchy,
    bottom: &mut Matrix,
) {
    if hierarchy.is_bottom(node) {
        let leaf = node - hierarchy.n_aggregate();
        bottom.row_mut(leaf).copy_from_slice(&allocation);
        return;
    }

    let children = hierarchy.children(node);
    let totals: Vec<f64> = (0..base.cols())
        .map(|s| children.iter().map(|&c| base[(c, s)]).sum())
        .collect();

    for &child in children {
        let share: Vec<f64> = allocation
            .iter()
            .enumerate()
            .map(|(s, parent)| {
                if totals[s] == 0.0 {
                    parent / children.len() as f64
                } else {
                    parent * base[(child, s)] / totals[s]
                }
            })
            .collect();
        allocate(child, share, base, hierarchy, bottom);
    }
}

/// Proportion of `root` attributed to each of its leaves, in leaf order
fn historical_proportions(
    root: usize,
    hierarchy: &Hierarchy,
    method: TopDownMethod,
    history: &History,
) -> Result<Vec<f64>> {
    let name = |node: usize| hierarchy.nodes()[node].as_str();
    let missing = |node: usize| {
        ForecastError::InvalidInput(format!(
            "Historical proportions need observations for '{}'",
            name(node)
        ))
    };
    let root_series = history.series(root).ok_or_else(|| missing(root))?;

    hierarchy
        .leaves(root)
        .iter()
        .map(|&leaf| -> Result<f64> {
            let node = hierarchy.n_aggregate() + leaf;
            let leaf_series = history.series(node).ok_or_else(|| missing(node))?;
            match method {
                TopDownMethod::AverageHistoricalProportions => {
                    let ratios: Vec<f64> = leaf_series
                        .iter()
                        .filter_map(|(ds, y)| {
                            root_series
                                .get(ds)
                                .filter(|total| **total != 0.0)
                                .map(|total| y / total)
                        })
                        .collect();
                    if ratios.is_empty() {
                        return Err(ForecastError::InvalidInput(format!(
                            "'{}' and '{}' share no timestamps with a non-zero total",
                            name(node),
                            name(root)
                        )));
                    }
                    Ok(mean(&ratios)?)
                }
                _ => {
                    let leaf_values: Vec<f64> = leaf_series.values().copied().collect();
                    let root_values: Vec<f64> = root_series.values().copied().collect();
                    let root_mean = mean(&root_values)?;
                    if root_mean == 0.0 {
                        return Err(ForecastError::InvalidInput(format!(
                            "Historical mean of '{}' is zero",
                            name(root)
                        )));
                    }
                    Ok(mean(&leaf_values)? / root_mean)
                }
            }
        })
        .collect()
}
