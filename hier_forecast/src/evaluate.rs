//! Stage C: evaluation
//!
//! Scores are computed per node on the horizon vector, then averaged over
//! the nodes of each hierarchy level and over every node (`"Overall"`).

use crate::data::ObservationTable;
use crate::error::{ForecastError, Result};
use crate::forecast::ForecastTable;
use crate::hierarchy::Hierarchy;
use crate::metrics::{Metric, MetricSpec};
use crate::reconcile::ReconciledTable;
use chrono::NaiveDate;
use forecast_math::Matrix;
use serde::Serialize;
use statrs::statistics::Statistics;
use std::collections::HashMap;
use std::fs::File;
use std::io::Write;
use std::path::Path;
use std::sync::Arc;
use tracing::info;

/// Level name covering every node
pub const OVERALL_LEVEL: &str = "Overall";

/// One score of the evaluation
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EvaluationEntry {
    pub metric: String,
    pub level: String,
    pub model: String,
    pub score: f64,
    /// `score / benchmark score`; absent without a benchmark or when the
    /// benchmark scored zero
    pub relative: Option<f64>,
}

/// Scores keyed by `(metric, level, model)`
#[derive(Debug, Clone, PartialEq)]
pub struct EvaluationResult {
    benchmark: Option<String>,
    entries: Vec<EvaluationEntry>,
}

impl EvaluationResult {
    pub fn entries(&self) -> &[EvaluationEntry] {
        &self.entries
    }

    pub fn benchmark(&self) -> Option<&str> {
        self.benchmark.as_deref()
    }

    fn entry(&self, metric: &str, level: &str, model: &str) -> Option<&EvaluationEntry> {
        self.entries
            .iter()
            .find(|e| e.metric == metric && e.level == level && e.model == model)
    }

    pub fn score(&self, metric: &str, level: &str, model: &str) -> Option<f64> {
        self.entry(metric, level, model).map(|e| e.score)
    }

    pub fn relative(&self, metric: &str, level: &str, model: &str) -> Option<f64> {
        self.entry(metric, level, model).and_then(|e| e.relative)
    }

    fn distinct<'a>(&'a self, field: impl Fn(&'a EvaluationEntry) -> &'a str) -> Vec<&'a str> {
        let mut seen = Vec::new();
        for entry in &self.entries {
            let value = field(entry);
            if !seen.contains(&value) {
                seen.push(value);
            }
        }
        seen
    }

    pub fn metrics(&self) -> Vec<&str> {
        self.distinct(|e| e.metric.as_str())
    }

    pub fn levels(&self) -> Vec<&str> {
        self.distinct(|e| e.level.as_str())
    }

    pub fn models(&self) -> Vec<&str> {
        self.distinct(|e| e.model.as_str())
    }

    /// Write `metric,level,model,score,relative` rows
    pub fn write_csv<W: Write>(&self, writer: W) -> Result<()> {
        let mut csv_writer = csv::Writer::from_writer(writer);
        for entry in &self.entries {
            csv_writer.serialize(entry)?;
        }
        csv_writer.flush()?;
        Ok(())
    }

    pub fn to_csv_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        self.write_csv(File::create(path)?)
    }
}

/// Scores forecasts against held-out actuals
#[derive(Debug, Clone)]
pub struct Evaluator {
    metrics: Vec<Arc<dyn Metric>>,
    benchmark: Option<String>,
}

impl Evaluator {
    pub fn new(metrics: Vec<Arc<dyn Metric>>) -> Result<Self> {
        if metrics.is_empty() {
            return Err(ForecastError::InvalidInput(
                "At least one metric is required".to_string(),
            ));
        }
        Ok(Self {
            metrics,
            benchmark: None,
        })
    }

    pub fn from_specs(specs: &[MetricSpec]) -> Result<Self> {
        Self::new(specs.iter().map(MetricSpec::build).collect())
    }

    /// Also report every score relative to this column
    pub fn with_benchmark(mut self, benchmark: impl Into<String>) -> Self {
        self.benchmark = Some(benchmark.into());
        self
    }

    /// Score every reconciled column and every reconciled base model
    ///
    /// Base models are scored under their own name, so a bare model name
    /// works as a benchmark.
    pub fn evaluate(
        &self,
        reconciled: &ReconciledTable,
        actuals: &ObservationTable,
        hierarchy: &Hierarchy,
    ) -> Result<EvaluationResult> {
        let row_of: HashMap<&str, usize> = reconciled
            .nodes()
            .iter()
            .enumerate()
            .map(|(i, n)| (n.as_str(), i))
            .collect();

        let mut levels: Vec<(String, Vec<usize>)> = Vec::new();
        for (level, members) in hierarchy.tags() {
            let rows = members
                .iter()
                .map(|m| {
                    row_of.get(m.as_str()).copied().ok_or_else(|| {
                        ForecastError::InconsistentHierarchy(format!(
                            "node '{}' of level '{}' has no reconciled forecasts",
                            m, level
                        ))
                    })
                })
                .collect::<Result<Vec<_>>>()?;
            levels.push((level, rows));
        }
        levels.push((OVERALL_LEVEL.to_string(), (0..reconciled.nodes().len()).collect()));

        let timestamps: Vec<&[NaiveDate]> = (0..reconciled.nodes().len())
            .map(|i| reconciled.timestamps(i))
            .collect();
        let actual = actual_matrix(reconciled.nodes(), &timestamps, actuals)?;

        let mut columns: Vec<(String, &Matrix)> = reconciled
            .base_models()
            .into_iter()
            .filter_map(|m| reconciled.base(m).map(|v| (m.to_string(), v)))
            .collect();
        columns.extend(reconciled.columns().iter().map(|c| (c.name(), &c.values)));

        let result = self.score_columns(&levels, &columns, &actual)?;
        info!(
            entries = result.entries.len(),
            benchmark = ?self.benchmark,
            "evaluation complete"
        );
        Ok(result)
    }

    /// Score raw base forecasts over every entity they cover
    pub fn evaluate_base(
        &self,
        forecasts: &ForecastTable,
        actuals: &ObservationTable,
    ) -> Result<EvaluationResult> {
        let entities: Vec<String> = forecasts.entity_keys().into_iter().collect();
        let timestamps: Vec<&[NaiveDate]> = entities
            .iter()
            .map(|e| forecasts.timestamps(e).unwrap_or_default())
            .collect();
        let actual = actual_matrix(&entities, &timestamps, actuals)?;

        let mut owned = Vec::new();
        for model in forecasts.models() {
            let covered: Vec<usize> = (0..entities.len())
                .filter(|&i| forecasts.get(&entities[i], model).is_some())
                .collect();
            let mut values = Matrix::zeros(covered.len(), forecasts.horizon());
            let mut rows = Matrix::zeros(covered.len(), forecasts.horizon());
            for (r, &i) in covered.iter().enumerate() {
                if let Some(f) = forecasts.get(&entities[i], model) {
                    values.row_mut(r).copy_from_slice(&f.mean);
                }
                rows.row_mut(r).copy_from_slice(actual.row(i));
            }
            owned.push((model.clone(), values, rows));
        }

        let mut entries = Vec::new();
        for metric in &self.metrics {
            for (model, values, rows) in &owned {
                if values.rows() == 0 {
                    continue;
                }
                let all: Vec<usize> = (0..values.rows()).collect();
                entries.push(EvaluationEntry {
                    metric: metric.name().to_string(),
                    level: OVERALL_LEVEL.to_string(),
                    model: model.clone(),
                    score: level_score(metric.as_ref(), &all, values, rows)?,
                    relative: None,
                });
            }
        }

        self.finish(entries)
    }

    fn score_columns(
        &self,
        levels: &[(String, Vec<usize>)],
        columns: &[(String, &Matrix)],
        actual: &Matrix,
    ) -> Result<EvaluationResult> {
        let mut entries = Vec::with_capacity(self.metrics.len() * levels.len() * columns.len());
        for metric in &self.metrics {
            for (level, rows) in levels {
                for (name, values) in columns {
                    entries.push(EvaluationEntry {
                        metric: metric.name().to_string(),
                        level: level.clone(),
                        model: name.clone(),
                        score: level_score(metric.as_ref(), rows, values, actual)?,
                        relative: None,
                    });
                }
            }
        }
        self.finish(entries)
    }

    /// Fill in relative scores against the benchmark
    fn finish(&self, mut entries: Vec<EvaluationEntry>) -> Result<EvaluationResult> {
        if let Some(benchmark) = &self.benchmark {
            if !entries.iter().any(|e| &e.model == benchmark) {
                return Err(ForecastError::InvalidInput(format!(
                    "Benchmark '{}' is not among the evaluated models",
                    benchmark
                )));
            }
            let reference: HashMap<(String, String), f64> = entries
                .iter()
                .filter(|e| &e.model == benchmark)
                .map(|e| ((e.metric.clone(), e.level.clone()), e.score))
                .collect();
            for entry in &mut entries {
                entry.relative = reference
                    .get(&(entry.metric.clone(), entry.level.clone()))
                    .filter(|b| **b != 0.0)
                    .map(|b| entry.score / b);
            }
        }

        Ok(EvaluationResult {
            benchmark: self.benchmark.clone(),
            entries,
        })
    }
}

/// Mean over `rows` of the metric on each row's horizon vector
fn level_score(metric: &dyn Metric, rows: &[usize], predicted: &Matrix, actual: &Matrix) -> Result<f64> {
    let scores = rows
        .iter()
        .map(|&r| metric.score(actual.row(r), predicted.row(r)))
        .collect::<Result<Vec<f64>>>()?;
    if scores.is_empty() {
        return Err(ForecastError::InvalidInput(
            "Cannot score a level without nodes".to_string(),
        ));
    }
    Ok(scores.mean())
}

/// Actual values aligned with forecast timestamps, one row per entity
fn actual_matrix(
    entities: &[String],
    timestamps: &[&[NaiveDate]],
    actuals: &ObservationTable,
) -> Result<Matrix> {
    let index = actuals.value_index();
    let horizon = timestamps.iter().map(|t| t.len()).max().unwrap_or(0);
    let mut matrix = Matrix::zeros(entities.len(), horizon);
    let mut missing = Vec::new();

    for (i, entity) in entities.iter().enumerate() {
        for (s, ds) in timestamps[i].iter().enumerate() {
            match index.get(&(entity.as_str(), *ds)) {
                Some(&y) => matrix[(i, s)] = y,
                None => missing.push(format!("({}, {})", entity, ds)),
            }
        }
    }

    if !missing.is_empty() {
        let shown: Vec<&str> = missing.iter().take(5).map(String::as_str).collect();
        return Err(ForecastError::MissingActuals(format!(
            "{} forecast points have no actual value, e.g. {}",
            missing.len(),
            shown.join(", ")
        )));
    }
    Ok(matrix)
}
