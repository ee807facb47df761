//! Splitting a flat table into per-entity series

use chrono::NaiveDate;
use hier_forecast::data::{Observation, ObservationTable, TableSchema};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    println!("Series Partitioner Example");
    println!("==========================\n");

    let date = |m: u32| NaiveDate::from_ymd_opt(2024, m, 1).ok_or("invalid date");
    let schema = TableSchema::default().with_covariates(["holiday"]);
    let table = ObservationTable::new(
        schema,
        vec![
            Observation::new("store-2", date(2)?, 41.0).with_covariates(vec![0.0]),
            Observation::new("store-1", date(1)?, 12.0).with_covariates(vec![1.0]),
            Observation::new("store-2", date(1)?, 38.5).with_covariates(vec![1.0]),
            Observation::new("store-3", date(1)?, 7.25).with_covariates(vec![1.0]),
            Observation::new("store-1", date(3)?, 15.0).with_covariates(vec![0.0]),
            Observation::new("store-1", date(2)?, 13.5).with_covariates(vec![0.0]),
        ],
    )?;
    println!("{} rows, columns {:?}\n", table.len(), table.schema().columns());

    println!("By entity:");
    for series in table.partition("unique_id")? {
        println!(
            "  {:<8} {} rows, chronological values {:?}, last at {}",
            series.key(),
            series.len(),
            series.values(),
            series
                .last_timestamp()
                .map(|d| d.to_string())
                .unwrap_or_default()
        );
    }

    println!("\nBy timestamp:");
    for cross_section in table.partition("ds")? {
        let ids: Vec<&str> = cross_section
            .rows()
            .iter()
            .map(|r| r.unique_id.as_str())
            .collect();
        println!("  {} -> {:?}", cross_section.key(), ids);
    }

    match table.partition("holiday") {
        Ok(_) => println!("\nUnexpectedly partitioned by a covariate"),
        Err(err) => println!("\nPartitioning by 'holiday' is rejected: {}", err),
    }

    Ok(())
}
