//! Minimum-trace reconciliation
//!
//! `ỹ = S (Sᵀ W⁻¹ S)⁻¹ Sᵀ W⁻¹ ŷ`, where `W` estimates the covariance of the
//! base forecast errors.

use crate::error::{ForecastError, Result};
use crate::hierarchy::Hierarchy;
use crate::reconcile::{invert, sum_up, ReconcileContext, Reconciler};
use forecast_math::stats::{mean_square, shrunk_covariance};
use forecast_math::Matrix;
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::debug;

/// Estimator of the error covariance `W`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MinTraceMethod {
    /// Identity
    #[default]
    Ols,
    /// Number of leaves under each node
    WlsStruct,
    /// In-sample residual variance of each node
    WlsVar,
    /// Shrunk residual covariance
    MintShrink,
}

impl fmt::Display for MinTraceMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            MinTraceMethod::Ols => "ols",
            MinTraceMethod::WlsStruct => "wls_struct",
            MinTraceMethod::WlsVar => "wls_var",
            MinTraceMethod::MintShrink => "mint_shrink",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct MinTrace {
    method: MinTraceMethod,
}

impl MinTrace {
    pub fn new(method: MinTraceMethod) -> Self {
        Self { method }
    }

    pub fn method(&self) -> MinTraceMethod {
        self.method
    }

    fn weights(&self, hierarchy: &Hierarchy, context: &ReconcileContext<'_>) -> Result<Matrix> {
        let n = hierarchy.n_nodes();
        match self.method {
            MinTraceMethod::Ols => Ok(Matrix::identity(n)),
            MinTraceMethod::WlsStruct => {
                let counts: Vec<f64> = (0..n).map(|i| hierarchy.leaves(i).len() as f64).collect();
                Ok(Matrix::from_diagonal(&counts))
            }
            MinTraceMethod::WlsVar => {
                let residuals = node_residuals(hierarchy, context)?;
                let variances = residuals
                    .iter()
                    .map(|r| {
                        let observed: Vec<f64> = r.iter().flatten().copied().collect();
                        mean_square(&observed)
                    })
                    .collect::<forecast_math::Result<Vec<f64>>>()?;
                Ok(Matrix::from_diagonal(&variances))
            }
            MinTraceMethod::MintShrink => {
                let aligned = aligned_residuals(hierarchy, context)?;
                let shrunk = shrunk_covariance(&aligned)?;
                debug!(lambda = shrunk.lambda, "shrinkage intensity");
                Ok(shrunk.covariance)
            }
        }
    }
}

impl Reconciler for MinTrace {
    fn name(&self) -> String {
        format!("MinTrace_method-{}", self.method)
    }

    fn reconcile(
        &self,
        base: &Matrix,
        hierarchy: &Hierarchy,
        context: &ReconcileContext<'_>,
    ) -> Result<Matrix> {
        let s = hierarchy.summing_matrix();
        let w_inv = invert(&self.weights(hierarchy, context)?, "Error covariance W")?;
        let st_w_inv = s.transpose().matmul(&w_inv)?;
        let system = invert(&st_w_inv.matmul(s)?, "Sᵀ W⁻¹ S")?;
        let projection = system.matmul(&st_w_inv)?;

        let bottom = projection.matmul(base)?;
        sum_up(hierarchy, &bottom)
    }
}

/// Residuals of every node; fails if any node has no in-sample fit
fn node_residuals<'a>(
    hierarchy: &Hierarchy,
    context: &ReconcileContext<'a>,
) -> Result<&'a [Vec<Option<f64>>]> {
    let residuals = context.residuals;
    if residuals.len() != hierarchy.n_nodes() {
        return Err(ForecastError::InvalidInput(
            "Residual-based MinTrace needs in-sample fitted values for every node".to_string(),
        ));
    }
    if let Some(i) = residuals
        .iter()
        .position(|r| r.iter().all(Option::is_none))
    {
        return Err(ForecastError::InvalidInput(format!(
            "Residual-based MinTrace needs in-sample fitted values; '{}' has none",
            hierarchy.nodes()[i]
        )));
    }
    Ok(residuals)
}

/// Residual matrix over the trailing periods where every node has a residual
///
/// Histories are aligned on their last observation.
fn aligned_residuals(hierarchy: &Hierarchy, context: &ReconcileContext<'_>) -> Result<Vec<Vec<f64>>> {
    let residuals = node_residuals(hierarchy, context)?;
    let span = residuals.iter().map(Vec::len).min().unwrap_or(0);

    let tails: Vec<&[Option<f64>]> = residuals.iter().map(|r| &r[r.len() - span..]).collect();
    let complete: Vec<usize> = (0..span)
        .filter(|&t| tails.iter().all(|r| r[t].is_some()))
        .collect();
    if complete.len() < 2 {
        return Err(ForecastError::InvalidInput(format!(
            "Shrunk covariance needs at least 2 periods with residuals for every node, have {}",
            complete.len()
        )));
    }

    Ok(tails
        .iter()
        .map(|r| complete.iter().filter_map(|&t| r[t]).collect())
        .collect())
}
