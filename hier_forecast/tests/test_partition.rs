mod common;

use chrono::NaiveDate;
use common::month;
use hier_forecast::{ForecastError, Observation, ObservationTable, SeriesPartitioner, TableSchema};
use pretty_assertions::assert_eq;
use rstest::rstest;
use std::collections::HashSet;

fn shuffled_table() -> ObservationTable {
    ObservationTable::from_triples(vec![
        ("b", month(2), 20.0),
        ("a", month(1), 1.0),
        ("c", month(1), 300.0),
        ("b", month(1), 10.0),
        ("a", month(3), 3.0),
        ("a", month(2), 2.0),
    ])
    .unwrap()
}

#[test]
fn test_partition_reconstructs_table() {
    let table = shuffled_table();
    let groups: Vec<_> = table.partition("unique_id").unwrap().collect();

    // Every row lands in exactly one group
    let total: usize = groups.iter().map(|g| g.len()).sum();
    assert_eq!(total, table.len());

    let mut rebuilt: Vec<&Observation> = groups.iter().flat_map(|g| g.rows().to_vec()).collect();
    let mut original: Vec<&Observation> = table.rows().iter().collect();
    let key = |o: &&Observation| (o.unique_id.clone(), o.ds);
    rebuilt.sort_by_key(key);
    original.sort_by_key(key);
    assert_eq!(rebuilt, original);

    // Groups are disjoint and every row has the group's key
    let keys: HashSet<&str> = groups.iter().map(|g| g.key()).collect();
    assert_eq!(keys.len(), groups.len());
    for group in &groups {
        assert!(group.rows().iter().all(|r| r.unique_id == group.key()));
    }
}

#[test]
fn test_partition_keeps_relative_order() {
    let table = shuffled_table();
    let groups: Vec<_> = SeriesPartitioner::new(&table).by_entity().collect();

    let keys: Vec<&str> = groups.iter().map(|g| g.key()).collect();
    assert_eq!(keys, vec!["b", "a", "c"]);

    let a: Vec<f64> = groups[1].rows().iter().map(|r| r.y).collect();
    assert_eq!(a, vec![1.0, 3.0, 2.0]);
    assert_eq!(groups[1].values(), vec![1.0, 2.0, 3.0]);
    assert_eq!(groups[1].timestamps(), vec![month(1), month(2), month(3)]);
}

#[test]
fn test_empty_table_yields_nothing() {
    let table = ObservationTable::from_rows(Vec::new()).unwrap();
    assert_eq!(table.partition("unique_id").unwrap().count(), 0);
}

#[rstest]
#[case("region")]
#[case("y")]
#[case("price")]
fn test_rejects_columns_that_cannot_key(#[case] column: &str) {
    let schema = TableSchema::default().with_covariates(["price"]);
    let table = ObservationTable::new(
        schema,
        vec![Observation::new("a", month(1), 1.0).with_covariates(vec![9.5])],
    )
    .unwrap();

    let result = table.partition(column);
    assert!(matches!(result, Err(ForecastError::InvalidInput(_))));
}

#[test]
fn test_all_groups_are_processed() {
    let rows: Vec<(String, NaiveDate, f64)> = (0..50)
        .flat_map(|e| (1..=3).map(move |m| (format!("id-{}", e), month(m), m as f64)))
        .collect();
    let table = ObservationTable::from_triples(rows).unwrap();

    let groups = table.partition_by_entity();
    assert_eq!(groups.len(), 50);
    assert!(groups.into_iter().all(|g| g.len() == 3));
}

#[test]
fn test_custom_schema_id_column() {
    let schema = TableSchema::new("series", "date", "value");
    let table = ObservationTable::new(
        schema,
        vec![
            Observation::new("x", month(1), 1.0),
            Observation::new("y", month(1), 2.0),
        ],
    )
    .unwrap();

    assert_eq!(table.partition("series").unwrap().count(), 2);
    assert_eq!(table.partition("date").unwrap().count(), 1);
    assert!(table.partition("unique_id").is_err());
}
