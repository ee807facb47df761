mod common;

use common::month;
use hier_forecast::dataset::{HierarchicalData, SyntheticConfig, HIERARCHY_FILE, OBSERVATIONS_FILE};
use hier_forecast::{ForecastError, Frequency};
use pretty_assertions::assert_eq;
use std::fs::{self, File};
use std::io::Write;
use tempfile::tempdir;

const AB_HIERARCHY: &str = r#"{
  "levels": [
    { "name": "Total", "nodes": [ { "name": "AB", "children": ["A", "B"] } ] },
    { "name": "Leaf", "nodes": [ { "name": "A" }, { "name": "B" } ] }
  ]
}"#;

fn write_dataset(root: &std::path::Path, name: &str, rows: &[&str]) {
    let dir = root.join(name);
    fs::create_dir_all(&dir).unwrap();

    let mut file = File::create(dir.join(OBSERVATIONS_FILE)).unwrap();
    writeln!(file, "unique_id,ds,y").unwrap();
    for row in rows {
        writeln!(file, "{}", row).unwrap();
    }
    fs::write(dir.join(HIERARCHY_FILE), AB_HIERARCHY).unwrap();
}

#[test]
fn test_bottom_only_table_is_aggregated() {
    let root = tempdir().unwrap();
    write_dataset(
        root.path(),
        "Tiny",
        &[
            "A,2020-01-01,1.5",
            "A,2020-02-01,2.5",
            "B,2020-01-01,10.25",
            "B,2020-02-01,11.25",
        ],
    );

    let data = HierarchicalData::load(root.path(), "Tiny").unwrap();

    assert_eq!(data.name, "Tiny");
    assert!(data.actuals.is_none());
    assert_eq!(data.observations.len(), 6);
    let index = data.observations.value_index();
    assert_eq!(index[&("AB", month(1))], 11.75);
    assert_eq!(index[&("AB", month(2))], 13.75);
}

#[test]
fn test_incoherent_table_is_rejected() {
    let root = tempdir().unwrap();
    write_dataset(
        root.path(),
        "Broken",
        &[
            "AB,2020-01-01,100.5",
            "A,2020-01-01,1.5",
            "B,2020-01-01,10.25",
        ],
    );

    let result = HierarchicalData::load(root.path(), "Broken");
    assert!(matches!(result, Err(ForecastError::InconsistentHierarchy(_))));
}

#[test]
fn test_missing_dataset() {
    let root = tempdir().unwrap();
    match HierarchicalData::load(root.path(), "TourismSmall") {
        Err(ForecastError::DatasetNotFound { name, .. }) => assert_eq!(name, "TourismSmall"),
        other => panic!("expected DatasetNotFound, got {:?}", other.map(|d| d.name)),
    }
}

#[test]
fn test_save_and_load_with_actuals() {
    let config = SyntheticConfig {
        name: "Synth".to_string(),
        branching: vec![3],
        periods: 30,
        ..SyntheticConfig::default()
    };
    let data = HierarchicalData::synthetic(&config)
        .unwrap()
        .with_holdout(6)
        .unwrap();

    let root = tempdir().unwrap();
    let dir = data.save(root.path()).unwrap();
    assert!(dir.join("Y_test.csv").is_file());

    let loaded = HierarchicalData::load(root.path(), "Synth").unwrap();
    assert_eq!(loaded.hierarchy.nodes(), data.hierarchy.nodes());
    assert_eq!(loaded.observations.len(), 4 * 24);
    assert_eq!(loaded.actuals.as_ref().map(|a| a.len()), Some(4 * 6));

    let original = data.observations.value_index();
    for (key, value) in loaded.observations.value_index() {
        assert!((original[&key] - value).abs() < 1e-9);
    }
}

#[test]
fn test_load_with_holdout_splits_tail() {
    let root = tempdir().unwrap();
    write_dataset(
        root.path(),
        "Tiny",
        &[
            "A,2020-01-01,1",
            "A,2020-02-01,2",
            "A,2020-03-01,3",
            "B,2020-01-01,10",
            "B,2020-02-01,20",
            "B,2020-03-01,30",
        ],
    );

    let data = HierarchicalData::load_with_holdout(root.path(), "Tiny", 1).unwrap();
    let actuals = data.actuals.unwrap();

    assert_eq!(data.observations.len(), 3 * 2);
    assert_eq!(actuals.len(), 3);
    assert_eq!(actuals.value_index()[&("AB", month(3))], 33.0);
}

#[test]
fn test_synthetic_shape() {
    let config = SyntheticConfig {
        branching: vec![2, 2, 2],
        periods: 8,
        frequency: Frequency::Quarterly,
        ..SyntheticConfig::default()
    };
    let data = HierarchicalData::synthetic(&config).unwrap();

    assert_eq!(data.hierarchy.n_nodes(), 1 + 2 + 4 + 8);
    assert_eq!(data.hierarchy.levels().len(), 4);
    assert_eq!(data.observations.len(), 15 * 8);

    let bad = SyntheticConfig {
        branching: vec![2, 0],
        ..SyntheticConfig::default()
    };
    assert!(HierarchicalData::synthetic(&bad).is_err());
}
