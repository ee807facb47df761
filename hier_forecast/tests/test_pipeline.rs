mod common;

use common::{month, seasonal_table, tourism_like_hierarchy};
use hier_forecast::config::{Parallelism, PipelineConfig};
use hier_forecast::dataset::{HierarchicalData, SyntheticConfig};
use hier_forecast::metrics::FnMetric;
use hier_forecast::models::{ForecastModel, ModelOutput, ModelRegistry, ModelSpec};
use hier_forecast::pipeline::{Pipeline, PipelineOutcome};
use hier_forecast::reconcile::{MinTraceMethod, ReconcilerSpec, TopDownMethod};
use hier_forecast::{BaseForecaster, ForecastError, Frequency, ObservationTable, Result};
use hier_forecast::CancellationToken;
use pretty_assertions::assert_eq;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

/// Repeats the last value, but refuses histories shorter than `min_len`
#[derive(Debug)]
struct Guarded {
    min_len: usize,
}

impl ForecastModel for Guarded {
    fn name(&self) -> &str {
        "Guarded"
    }

    fn fit_predict(&self, history: &[f64], horizon: usize) -> Result<ModelOutput> {
        if history.len() < self.min_len {
            return Err(ForecastError::InvalidInput(format!(
                "need {} observations, got {}",
                self.min_len,
                history.len()
            )));
        }
        let last = history[history.len() - 1];
        ModelOutput::new(vec![last; horizon], horizon)
    }
}

#[derive(Debug)]
struct Sleepy;

impl ForecastModel for Sleepy {
    fn name(&self) -> &str {
        "Sleepy"
    }

    fn fit_predict(&self, history: &[f64], horizon: usize) -> Result<ModelOutput> {
        thread::sleep(Duration::from_millis(400));
        ModelOutput::new(vec![history[0]; horizon], horizon)
    }
}

#[derive(Debug)]
struct Explodes;

impl ForecastModel for Explodes {
    fn name(&self) -> &str {
        "Explodes"
    }

    fn fit_predict(&self, _history: &[f64], _horizon: usize) -> Result<ModelOutput> {
        panic!("numerical blow-up")
    }
}

/// Counts its fits and asks for at least five observations
#[derive(Debug)]
struct Counting {
    calls: Arc<AtomicUsize>,
}

impl ForecastModel for Counting {
    fn name(&self) -> &str {
        "Counting"
    }

    fn fit_predict(&self, history: &[f64], horizon: usize) -> Result<ModelOutput> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        ModelOutput::new(vec![history[history.len() - 1]; horizon], horizon)
    }

    fn min_observations(&self) -> usize {
        5
    }
}

/// Cancels the run from inside its first fit
#[derive(Debug)]
struct CancelsOnFirstFit {
    token: CancellationToken,
    calls: Arc<AtomicUsize>,
}

impl ForecastModel for CancelsOnFirstFit {
    fn name(&self) -> &str {
        "CancelsOnFirstFit"
    }

    fn fit_predict(&self, history: &[f64], horizon: usize) -> Result<ModelOutput> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.token.cancel();
        ModelOutput::new(vec![history[0]; horizon], horizon)
    }
}

fn short_and_long() -> ObservationTable {
    let mut rows = vec![
        ("X", month(1), 1.0),
        ("X", month(2), 2.0),
        ("X", month(3), 3.0),
    ];
    rows.extend((1..=10).map(|m| ("Y", month(m), m as f64 * 10.0)));
    ObservationTable::from_triples(rows).unwrap()
}

fn registry(models: Vec<Arc<dyn ForecastModel>>) -> ModelRegistry {
    ModelRegistry::from_models(models).unwrap()
}

#[test]
fn test_failed_entity_does_not_stop_others() {
    let forecaster = BaseForecaster::new(
        registry(vec![Arc::new(Guarded { min_len: 5 })]),
        2,
        Frequency::Monthly,
    )
    .unwrap();

    let output = forecaster.forecast(&short_and_long()).unwrap();

    assert_eq!(output.failures.len(), 1);
    let failure = &output.failures[0];
    assert_eq!(failure.entity, "X");
    assert_eq!(failure.model, "Guarded");
    assert!(failure.reason.contains("need 5 observations"));
    assert!(matches!(
        failure.clone().into_error(),
        ForecastError::ModelFit { .. }
    ));

    assert!(output.forecasts.get("X", "Guarded").is_none());
    let y = output.forecasts.get("Y", "Guarded").unwrap();
    assert_eq!(y.mean, vec![100.0, 100.0]);
    assert_eq!(y.timestamps, vec![month(11), month(12)]);
}

#[test]
fn test_every_entity_model_pair_is_attempted() {
    let table = seasonal_table(&tourism_like_hierarchy(), 24);
    let forecaster = BaseForecaster::new(
        ModelRegistry::from_specs(&[ModelSpec::naive(), ModelSpec::seasonal_naive(12)]).unwrap(),
        4,
        Frequency::Monthly,
    )
    .unwrap();

    let output = forecaster.forecast(&table).unwrap();

    assert!(output.failures.is_empty());
    assert_eq!(output.forecasts.entity_keys().len(), 6);
    assert_eq!(output.forecasts.len(), 6 * 2 * 4);
    let residuals = &output.forecasts.get("AU", "SeasonalNaive").unwrap().residuals;
    assert_eq!(residuals.len(), 24);
    assert!(residuals[..12].iter().all(Option::is_none));
    assert!(residuals[12..].iter().all(Option::is_some));
}

#[test]
fn test_short_history_is_not_fitted() {
    let calls = Arc::new(AtomicUsize::new(0));
    let forecaster = BaseForecaster::new(
        registry(vec![
            Arc::new(Counting {
                calls: Arc::clone(&calls),
            }),
            Arc::new(Guarded { min_len: 1 }),
        ]),
        2,
        Frequency::Monthly,
    )
    .unwrap();

    let output = forecaster.forecast(&short_and_long()).unwrap();

    // X has 3 observations, Y has 10
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(output.failures.len(), 1);
    assert_eq!(output.failures[0].entity, "X");
    assert_eq!(output.failures[0].model, "Counting");
    assert!(output.failures[0]
        .reason
        .contains("needs at least 5 observations, have 3"));
    assert_eq!(output.forecasts.value("Y", "Counting", 1), Some(100.0));
    assert_eq!(output.forecasts.value("X", "Guarded", 1), Some(3.0));
}

#[test]
fn test_seasonal_model_skips_short_entities() {
    let forecaster = BaseForecaster::new(
        ModelRegistry::from_specs(&[ModelSpec::seasonal_naive(12), ModelSpec::naive()]).unwrap(),
        1,
        Frequency::Monthly,
    )
    .unwrap();

    let output = forecaster.forecast(&short_and_long()).unwrap();

    assert_eq!(output.failures.len(), 2);
    assert!(output
        .failures
        .iter()
        .all(|f| f.model == "SeasonalNaive" && f.reason.contains("needs at least 12")));
    assert_eq!(output.forecasts.value("Y", "Naive", 1), Some(100.0));
}

#[test]
fn test_slow_fit_times_out() {
    let forecaster = BaseForecaster::new(
        registry(vec![Arc::new(Sleepy), Arc::new(Guarded { min_len: 1 })]),
        1,
        Frequency::Monthly,
    )
    .unwrap()
    .with_fit_timeout(Duration::from_millis(20));

    let table = ObservationTable::from_triples(vec![("Y", month(1), 5.0)]).unwrap();
    let output = forecaster.forecast(&table).unwrap();

    assert_eq!(output.failures.len(), 1);
    assert_eq!(output.failures[0].model, "Sleepy");
    assert!(output.failures[0].reason.contains("timed out"));
    assert_eq!(output.forecasts.value("Y", "Guarded", 1), Some(5.0));
}

#[test]
fn test_panicking_model_is_recorded() {
    let forecaster = BaseForecaster::new(
        registry(vec![Arc::new(Explodes), Arc::new(Guarded { min_len: 1 })]),
        1,
        Frequency::Monthly,
    )
    .unwrap();

    let output = forecaster.forecast(&short_and_long()).unwrap();

    assert_eq!(output.failures.len(), 2);
    assert!(output.failures.iter().all(|f| f.model == "Explodes"));
    assert_eq!(output.forecasts.value("X", "Guarded", 1), Some(3.0));
}

fn synthetic() -> HierarchicalData {
    let config = SyntheticConfig {
        periods: 48,
        ..SyntheticConfig::default()
    };
    HierarchicalData::synthetic(&config)
        .unwrap()
        .with_holdout(6)
        .unwrap()
}

fn pipeline_config() -> PipelineConfig {
    PipelineConfig::default()
        .with_horizon(6)
        .with_models(vec![ModelSpec::seasonal_naive(12), ModelSpec::naive()])
        .with_reconcilers(vec![
            ReconcilerSpec::BottomUp,
            ReconcilerSpec::TopDown {
                method: TopDownMethod::ForecastProportions,
            },
            ReconcilerSpec::MiddleOut {
                middle_level: "Level1".to_string(),
                top_down_method: TopDownMethod::ForecastProportions,
            },
            ReconcilerSpec::MinTrace {
                method: MinTraceMethod::Ols,
            },
            ReconcilerSpec::MinTrace {
                method: MinTraceMethod::WlsVar,
            },
            ReconcilerSpec::MinTrace {
                method: MinTraceMethod::MintShrink,
            },
        ])
        .with_benchmark("Naive")
        .with_parallelism(Parallelism::Threads(2))
}

#[test]
fn test_full_run_completes() {
    let data = synthetic();
    let pipeline = Pipeline::new(pipeline_config()).unwrap();

    let outcome = pipeline.run(
        &data.observations,
        &data.hierarchy,
        data.actuals.as_ref().unwrap(),
    );

    assert!(matches!(outcome, PipelineOutcome::Completed(_)));
    let evaluated = outcome.into_result().unwrap();

    // 2 models × 6 methods
    assert_eq!(evaluated.reconciled().columns().len(), 12);
    let evaluation = evaluated.evaluation();
    assert_eq!(evaluation.benchmark(), Some("Naive"));
    assert_eq!(
        evaluation.levels(),
        vec!["Total", "Level1", "Bottom", "Overall"]
    );
    for column in evaluated.reconciled().column_names() {
        let score = evaluation.score("mse", "Overall", &column).unwrap();
        assert!(score.is_finite() && score >= 0.0, "{}: {}", column, score);
    }
    assert_eq!(evaluation.relative("mse", "Overall", "Naive"), Some(1.0));
}

#[test]
fn test_staged_run_matches_full_run() {
    let data = synthetic();
    let actuals = data.actuals.as_ref().unwrap();
    let config = pipeline_config().with_parallelism(Parallelism::Sequential);
    let pipeline = Pipeline::new(config).unwrap();

    let staged = pipeline
        .forecast(&data.observations)
        .and_then(|base| base.reconcile(&data.hierarchy))
        .and_then(|reconciled| reconciled.evaluate(actuals))
        .unwrap();
    let full = pipeline
        .run(&data.observations, &data.hierarchy, actuals)
        .into_result()
        .unwrap();

    assert_eq!(staged.evaluation(), full.evaluation());
}

#[test]
fn test_failures_are_reported_in_outcome() {
    let data = synthetic();
    let pipeline = Pipeline::new(
        pipeline_config().with_reconcilers(vec![ReconcilerSpec::BottomUp]),
    )
    .unwrap()
    .with_models(registry(vec![
        Arc::new(Guarded { min_len: 1 }),
        Arc::new(Explodes),
        ModelSpec::naive().build().unwrap(),
    ]))
    .unwrap();

    let outcome = pipeline.run(
        &data.observations,
        &data.hierarchy,
        data.actuals.as_ref().unwrap(),
    );

    assert!(matches!(outcome, PipelineOutcome::CompletedWithFailures(_)));
    assert_eq!(outcome.failures().len(), data.hierarchy.n_nodes());
    let evaluated = outcome.evaluated().unwrap();
    assert_eq!(evaluated.reconciled().skipped_models(), &["Explodes".to_string()]);
    assert!(evaluated
        .evaluation()
        .score("mse", "Overall", "Guarded/BottomUp")
        .is_some());
}

#[test]
fn test_cancelled_run_aborts() {
    let data = synthetic();
    let pipeline = Pipeline::new(pipeline_config()).unwrap();
    pipeline.cancellation_token().cancel();

    let outcome = pipeline.run(
        &data.observations,
        &data.hierarchy,
        data.actuals.as_ref().unwrap(),
    );

    assert!(outcome.is_aborted());
    assert!(matches!(
        outcome.into_result(),
        Err(ForecastError::Cancelled(_))
    ));
}

#[test]
fn test_cancel_during_base_forecasts_publishes_nothing() {
    let hierarchy = tourism_like_hierarchy();
    let table = seasonal_table(&hierarchy, 24);
    let config = PipelineConfig::default()
        .with_horizon(2)
        .with_models(vec![ModelSpec::naive()])
        .with_reconcilers(vec![ReconcilerSpec::BottomUp])
        .with_parallelism(Parallelism::Threads(1));
    let pipeline = Pipeline::new(config).unwrap();

    let calls = Arc::new(AtomicUsize::new(0));
    let model = CancelsOnFirstFit {
        token: pipeline.cancellation_token(),
        calls: Arc::clone(&calls),
    };
    let pipeline = pipeline.with_models(registry(vec![Arc::new(model)])).unwrap();

    // One worker thread: the remaining five entities see the flag before fitting
    let result = pipeline.forecast(&table);
    assert!(matches!(result, Err(ForecastError::Cancelled(_))));
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    // The token stays cancelled, so later runs abort before any fit
    let outcome = pipeline.run(&table, &hierarchy, &table);
    assert!(outcome.evaluated().is_none());
    assert!(matches!(
        outcome,
        PipelineOutcome::Aborted(ForecastError::Cancelled(_))
    ));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[test]
fn test_structural_error_aborts() {
    let data = synthetic();
    let pipeline = Pipeline::new(pipeline_config()).unwrap();
    let (_, short_actuals) = data.actuals.as_ref().unwrap().split_tail(1).unwrap();

    let outcome = pipeline.run(&data.observations, &data.hierarchy, &short_actuals);
    assert!(matches!(
        outcome,
        PipelineOutcome::Aborted(ForecastError::MissingActuals(_))
    ));
}

#[test]
fn test_custom_metric() {
    let data = synthetic();
    let max_error = FnMetric::new("max_error", |a: &[f64], p: &[f64]| {
        a.iter()
            .zip(p)
            .map(|(a, p)| (a - p).abs())
            .fold(0.0, f64::max)
    });
    let pipeline = Pipeline::new(pipeline_config())
        .unwrap()
        .with_metric(Arc::new(max_error))
        .unwrap();

    let evaluated = pipeline
        .run(
            &data.observations,
            &data.hierarchy,
            data.actuals.as_ref().unwrap(),
        )
        .into_result()
        .unwrap();

    assert_eq!(evaluated.evaluation().metrics(), vec!["mse", "max_error"]);
}
