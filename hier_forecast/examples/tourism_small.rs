//! End-to-end run on a TourismSmall-shaped dataset
//!
//! Usage: `cargo run --example tourism_small [DATA_DIR]`
//!
//! With `DATA_DIR` the dataset is read from `DATA_DIR/TourismSmall/`,
//! otherwise a synthetic quarterly dataset with the same shape (89 series,
//! four levels) is generated. Set `RUST_LOG=hier_forecast=debug` for
//! per-fit logging.

use hier_forecast::config::{Parallelism, PipelineConfig};
use hier_forecast::dataset::{HierarchicalData, SyntheticConfig};
use hier_forecast::evaluate::OVERALL_LEVEL;
use hier_forecast::models::ModelSpec;
use hier_forecast::pipeline::{Pipeline, PipelineOutcome};
use hier_forecast::reconcile::{MinTraceMethod, ReconcilerSpec, TopDownMethod};
use hier_forecast::Frequency;
use tracing_subscriber::EnvFilter;

const DATASET: &str = "TourismSmall";
const HORIZON: usize = 8;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    println!("Hierarchical Forecasting: {}", DATASET);
    println!("=================================\n");

    let data = match std::env::args().nth(1) {
        Some(dir) => HierarchicalData::load_with_holdout(dir, DATASET, HORIZON)?,
        None => {
            let config = SyntheticConfig {
                name: DATASET.to_string(),
                branching: vec![4, 7, 2],
                periods: 36,
                frequency: Frequency::Quarterly,
                start: chrono::NaiveDate::from_ymd_opt(1998, 1, 1).ok_or("invalid start date")?,
                ..SyntheticConfig::default()
            };
            HierarchicalData::synthetic(&config)?.with_holdout(HORIZON)?
        }
    };
    let actuals = data.actuals.as_ref().ok_or("dataset has no held-out actuals")?;

    println!(
        "{} nodes ({} bottom) over {} levels, {} training rows\n",
        data.hierarchy.n_nodes(),
        data.hierarchy.n_bottom(),
        data.hierarchy.levels().len(),
        data.observations.len()
    );

    let mut reconcilers = vec![
        ReconcilerSpec::BottomUp,
        ReconcilerSpec::TopDown {
            method: TopDownMethod::ForecastProportions,
        },
        ReconcilerSpec::MinTrace {
            method: MinTraceMethod::Ols,
        },
    ];
    let levels = data.hierarchy.levels();
    if levels.len() > 2 {
        reconcilers.insert(
            2,
            ReconcilerSpec::MiddleOut {
                middle_level: levels[levels.len() / 2].name().to_string(),
                top_down_method: TopDownMethod::ForecastProportions,
            },
        );
    }

    let config = PipelineConfig::default()
        .with_horizon(HORIZON)
        .with_frequency(Frequency::Quarterly)
        .with_models(vec![
            ModelSpec::auto_arima(Frequency::Quarterly.season_length()),
            ModelSpec::naive(),
        ])
        .with_reconcilers(reconcilers)
        .with_benchmark("Naive")
        .with_parallelism(Parallelism::AllCores);
    let pipeline = Pipeline::new(config)?;

    let evaluated = match pipeline.run(&data.observations, &data.hierarchy, actuals) {
        PipelineOutcome::Completed(evaluated) => evaluated,
        PipelineOutcome::CompletedWithFailures(evaluated) => {
            println!("Some fits failed:");
            for failure in evaluated.failures() {
                println!("  {}", failure);
            }
            println!();
            evaluated
        }
        PipelineOutcome::Aborted(err) => return Err(err.into()),
    };

    let evaluation = evaluated.evaluation();
    println!("MSE relative to Naive base forecasts:");
    for level in evaluation.levels() {
        println!("\n{}", level);
        for model in evaluation.models() {
            let score = evaluation.score("mse", level, model).unwrap_or(f64::NAN);
            match evaluation.relative("mse", level, model) {
                Some(relative) => println!("  {:<70} {:>14.2} {:>8.3}", model, score, relative),
                None => println!("  {:<70} {:>14.2}", model, score),
            }
        }
    }

    if let Some((model, score)) = evaluation
        .models()
        .into_iter()
        .filter_map(|m| evaluation.score("mse", OVERALL_LEVEL, m).map(|s| (m, s)))
        .min_by(|a, b| a.1.total_cmp(&b.1))
    {
        println!("\nBest overall: {} (MSE {:.2})", model, score);
    }

    Ok(())
}
