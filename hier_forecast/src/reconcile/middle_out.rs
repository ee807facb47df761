//! Middle-out reconciliation

use crate::error::{ForecastError, Result};
use crate::hierarchy::Hierarchy;
use crate::reconcile::top_down::{disaggregate, TopDownMethod};
use crate::reconcile::{sum_up, ReconcileContext, Reconciler};
use forecast_math::Matrix;

/// Anchors on one level: its forecasts are disaggregated top-down below it
/// and summed bottom-up above it
#[derive(Debug, Clone)]
pub struct MiddleOut {
    middle_level: String,
    top_down_method: TopDownMethod,
}

impl MiddleOut {
    pub fn new(middle_level: impl Into<String>, top_down_method: TopDownMethod) -> Self {
        Self {
            middle_level: middle_level.into(),
            top_down_method,
        }
    }

    pub fn middle_level(&self) -> &str {
        &self.middle_level
    }
}

impl Reconciler for MiddleOut {
    fn name(&self) -> String {
        format!(
            "MiddleOut_middle_level-{}_top_down_method-{}",
            self.middle_level, self.top_down_method
        )
    }

    fn reconcile(
        &self,
        base: &Matrix,
        hierarchy: &Hierarchy,
        context: &ReconcileContext<'_>,
    ) -> Result<Matrix> {
        hierarchy.require_tree("Middle-out reconciliation")?;
        let level = hierarchy.level(&self.middle_level).ok_or_else(|| {
            ForecastError::InvalidInput(format!(
                "Unknown middle level '{}'; levels are {:?}",
                self.middle_level,
                hierarchy.levels().iter().map(|l| l.name()).collect::<Vec<_>>()
            ))
        })?;

        let mut bottom = Matrix::zeros(hierarchy.n_bottom(), base.cols());
        for &node in level.nodes() {
            disaggregate(
                node,
                base,
                hierarchy,
                self.top_down_method,
                context.history,
                &mut bottom,
            )?;
        }
        sum_up(hierarchy, &bottom)
    }
}
