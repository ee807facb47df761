//! Forecast → Reconcile → Evaluate pipeline
//!
//! The stages are encoded as types: `Pipeline::forecast` yields
//! `BaseForecasted`, whose only continuation is `reconcile`, whose only
//! continuation is `evaluate`. `Pipeline::run` drives all three and folds
//! the result into a `PipelineOutcome`.

use crate::config::PipelineConfig;
use crate::data::ObservationTable;
use crate::error::{ForecastError, Result};
use crate::evaluate::{EvaluationResult, Evaluator};
use crate::forecast::{BaseForecastOutput, BaseForecaster, FitFailure, ForecastTable};
use crate::hierarchy::Hierarchy;
use crate::metrics::Metric;
use crate::models::ModelRegistry;
use crate::reconcile::{reconcile_forecasts, ReconciledTable, Reconciler};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{error, info, info_span, warn};

/// Cooperative cancellation flag shared between a caller and a run
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

/// A configured pipeline
///
/// The pipeline owns one cancellation token for its whole life. Cancelling
/// it is final: the run in progress aborts and every later run aborts before
/// fitting anything. Build a new pipeline to run again.
#[derive(Debug)]
pub struct Pipeline {
    config: PipelineConfig,
    forecaster: BaseForecaster,
    reconcilers: Vec<Box<dyn Reconciler>>,
    evaluator: Evaluator,
    cancellation: CancellationToken,
    pool: rayon::ThreadPool,
}

impl Pipeline {
    /// Validate the configuration and resolve models, reconcilers and metrics
    pub fn new(config: PipelineConfig) -> Result<Self> {
        config.validate()?;
        let cancellation = CancellationToken::new();
        let forecaster = Self::build_forecaster(&config, config.model_registry()?, &cancellation)?;

        let mut evaluator = Evaluator::from_specs(&config.metrics)?;
        if let Some(benchmark) = &config.benchmark {
            evaluator = evaluator.with_benchmark(benchmark.clone());
        }

        Ok(Self {
            reconcilers: config.build_reconcilers(),
            pool: config.parallelism.build_pool()?,
            config,
            forecaster,
            evaluator,
            cancellation,
        })
    }

    fn build_forecaster(
        config: &PipelineConfig,
        registry: ModelRegistry,
        cancellation: &CancellationToken,
    ) -> Result<BaseForecaster> {
        let mut forecaster = BaseForecaster::new(registry, config.horizon, config.frequency)?
            .with_cancellation(cancellation.clone());
        if let Some(timeout) = config.fit_timeout() {
            forecaster = forecaster.with_fit_timeout(timeout);
        }
        Ok(forecaster)
    }

    /// Replace the configured models with already-built ones
    pub fn with_models(mut self, registry: ModelRegistry) -> Result<Self> {
        self.forecaster = Self::build_forecaster(&self.config, registry, &self.cancellation)?;
        Ok(self)
    }

    /// Score with an additional metric
    pub fn with_metric(mut self, metric: Arc<dyn Metric>) -> Result<Self> {
        let mut metrics: Vec<Arc<dyn Metric>> =
            self.config.metrics.iter().map(|m| m.build()).collect();
        metrics.push(metric);
        let mut evaluator = Evaluator::new(metrics)?;
        if let Some(benchmark) = &self.config.benchmark {
            evaluator = evaluator.with_benchmark(benchmark.clone());
        }
        self.evaluator = evaluator;
        Ok(self)
    }

    /// Token that cancels this pipeline, one-shot
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancellation.clone()
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    fn check_cancelled(&self, stage: &str) -> Result<()> {
        if self.cancellation.is_cancelled() {
            warn!(stage, "pipeline cancelled");
            return Err(ForecastError::Cancelled(stage.to_string()));
        }
        Ok(())
    }

    /// Stage A
    pub fn forecast<'p>(&'p self, observations: &'p ObservationTable) -> Result<BaseForecasted<'p>> {
        self.check_cancelled("base forecasting")?;
        let output = self.forecaster.forecast_in(observations, &self.pool)?;
        Ok(BaseForecasted {
            pipeline: self,
            observations,
            output,
        })
    }

    /// Run all three stages
    pub fn run(
        &self,
        observations: &ObservationTable,
        hierarchy: &Hierarchy,
        actuals: &ObservationTable,
    ) -> PipelineOutcome {
        let span = info_span!(
            "pipeline_run",
            horizon = self.config.horizon,
            models = self.forecaster.registry().len(),
            reconcilers = self.reconcilers.len()
        );
        let _guard = span.enter();
        info!(
            observations = observations.len(),
            nodes = hierarchy.n_nodes(),
            "pipeline started"
        );

        let evaluated = self
            .forecast(observations)
            .and_then(|base| base.reconcile(hierarchy))
            .and_then(|reconciled| reconciled.evaluate(actuals));

        match evaluated {
            Ok(evaluated) if evaluated.failures().is_empty() => {
                info!("pipeline completed");
                PipelineOutcome::Completed(evaluated)
            }
            Ok(evaluated) => {
                warn!(
                    failures = evaluated.failures().len(),
                    "pipeline completed with model failures"
                );
                PipelineOutcome::CompletedWithFailures(evaluated)
            }
            Err(err) => {
                error!(error = %err, "pipeline aborted");
                PipelineOutcome::Aborted(err)
            }
        }
    }
}

/// State after Stage A
#[derive(Debug)]
pub struct BaseForecasted<'p> {
    pipeline: &'p Pipeline,
    observations: &'p ObservationTable,
    output: BaseForecastOutput,
}

impl<'p> BaseForecasted<'p> {
    pub fn forecasts(&self) -> &ForecastTable {
        &self.output.forecasts
    }

    pub fn failures(&self) -> &[FitFailure] {
        &self.output.failures
    }

    /// Stage B
    pub fn reconcile(self, hierarchy: &'p Hierarchy) -> Result<Reconciled<'p>> {
        let pipeline = self.pipeline;
        pipeline.check_cancelled("reconciliation")?;

        let table = pipeline.pool.install(|| {
            reconcile_forecasts(
                &self.output.forecasts,
                self.observations,
                hierarchy,
                &pipeline.reconcilers,
            )
        })?;

        Ok(Reconciled {
            pipeline,
            hierarchy,
            forecasts: self.output.forecasts,
            failures: self.output.failures,
            table,
        })
    }
}

/// State after Stage B
#[derive(Debug)]
pub struct Reconciled<'p> {
    pipeline: &'p Pipeline,
    hierarchy: &'p Hierarchy,
    forecasts: ForecastTable,
    failures: Vec<FitFailure>,
    table: ReconciledTable,
}

impl<'p> Reconciled<'p> {
    pub fn forecasts(&self) -> &ForecastTable {
        &self.forecasts
    }

    pub fn reconciled(&self) -> &ReconciledTable {
        &self.table
    }

    pub fn failures(&self) -> &[FitFailure] {
        &self.failures
    }

    /// Stage C
    pub fn evaluate(self, actuals: &ObservationTable) -> Result<Evaluated> {
        self.pipeline.check_cancelled("evaluation")?;
        let evaluation = self
            .pipeline
            .evaluator
            .evaluate(&self.table, actuals, self.hierarchy)?;

        Ok(Evaluated {
            forecasts: self.forecasts,
            reconciled: self.table,
            evaluation,
            failures: self.failures,
        })
    }
}

/// Terminal state: every artefact of a run
#[derive(Debug, Clone)]
pub struct Evaluated {
    forecasts: ForecastTable,
    reconciled: ReconciledTable,
    evaluation: EvaluationResult,
    failures: Vec<FitFailure>,
}

impl Evaluated {
    pub fn forecasts(&self) -> &ForecastTable {
        &self.forecasts
    }

    pub fn reconciled(&self) -> &ReconciledTable {
        &self.reconciled
    }

    pub fn evaluation(&self) -> &EvaluationResult {
        &self.evaluation
    }

    pub fn failures(&self) -> &[FitFailure] {
        &self.failures
    }
}

/// How a full run ended
#[derive(Debug)]
pub enum PipelineOutcome {
    Completed(Evaluated),
    /// Completed, but some `(entity, model)` fits failed; see `Evaluated::failures`
    CompletedWithFailures(Evaluated),
    Aborted(ForecastError),
}

impl PipelineOutcome {
    pub fn evaluated(&self) -> Option<&Evaluated> {
        match self {
            PipelineOutcome::Completed(e) | PipelineOutcome::CompletedWithFailures(e) => Some(e),
            PipelineOutcome::Aborted(_) => None,
        }
    }

    pub fn failures(&self) -> &[FitFailure] {
        self.evaluated().map(Evaluated::failures).unwrap_or_default()
    }

    pub fn is_aborted(&self) -> bool {
        matches!(self, PipelineOutcome::Aborted(_))
    }

    pub fn into_result(self) -> Result<Evaluated> {
        match self {
            PipelineOutcome::Completed(e) | PipelineOutcome::CompletedWithFailures(e) => Ok(e),
            PipelineOutcome::Aborted(err) => Err(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_is_shared() {
        let token = CancellationToken::new();
        let clone = token.clone();
        assert!(!token.is_cancelled());
        clone.cancel();
        assert!(token.is_cancelled());
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let config = PipelineConfig::default().with_horizon(0);
        assert!(Pipeline::new(config).is_err());
    }
}
