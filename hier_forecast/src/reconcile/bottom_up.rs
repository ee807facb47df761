//! Bottom-up reconciliation

use crate::error::Result;
use crate::hierarchy::Hierarchy;
use crate::reconcile::{bottom_rows, sum_up, ReconcileContext, Reconciler};
use forecast_math::Matrix;

/// Keeps the bottom-level forecasts and sums them up the hierarchy
#[derive(Debug, Clone, Copy, Default)]
pub struct BottomUp;

impl Reconciler for BottomUp {
    fn name(&self) -> String {
        "BottomUp".to_string()
    }

    fn reconcile(
        &self,
        base: &Matrix,
        hierarchy: &Hierarchy,
        _context: &ReconcileContext<'_>,
    ) -> Result<Matrix> {
        sum_up(hierarchy, &bottom_rows(base, hierarchy))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hierarchy::{LevelSpec, NodeSpec};
    use crate::reconcile::History;

    #[test]
    fn test_bottom_up_overrides_aggregate() {
        let hierarchy = Hierarchy::from_levels(vec![
            LevelSpec {
                name: "Total".to_string(),
                nodes: vec![NodeSpec::new("AB", vec!["A", "B"])],
            },
            LevelSpec {
                name: "Leaf".to_string(),
                nodes: vec![NodeSpec::leaf("A"), NodeSpec::leaf("B")],
            },
        ])
        .unwrap();
        let base = Matrix::from_rows(vec![vec![20.0], vec![10.0], vec![15.0]]).unwrap();
        let history = History::default();
        let context = ReconcileContext {
            history: &history,
            residuals: &[],
        };

        let reconciled = BottomUp.reconcile(&base, &hierarchy, &context).unwrap();
        assert_eq!(reconciled.column(0), vec![25.0, 10.0, 15.0]);
    }
}
