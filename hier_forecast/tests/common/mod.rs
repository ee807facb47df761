//! Fixtures shared by the integration tests
#![allow(dead_code)]

use chrono::NaiveDate;
use forecast_math::Matrix;
use hier_forecast::hierarchy::{Hierarchy, LevelSpec, NodeSpec};
use hier_forecast::{Observation, ObservationTable};

pub fn month(m: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(2020 + (m as i32 - 1) / 12, (m - 1) % 12 + 1, 1).unwrap()
}

pub fn level(name: &str, nodes: Vec<NodeSpec>) -> LevelSpec {
    LevelSpec {
        name: name.to_string(),
        nodes,
    }
}

/// `AB` over leaves `A` and `B`
pub fn ab_hierarchy() -> Hierarchy {
    Hierarchy::from_levels(vec![
        level("Total", vec![NodeSpec::new("AB", vec!["A", "B"])]),
        level("Leaf", vec![NodeSpec::leaf("A"), NodeSpec::leaf("B")]),
    ])
    .unwrap()
}

/// Country / State / Region, six nodes
pub fn tourism_like_hierarchy() -> Hierarchy {
    Hierarchy::from_levels(vec![
        level("Country", vec![NodeSpec::new("AU", vec!["NSW", "VIC"])]),
        level(
            "Country/State",
            vec![
                NodeSpec::new("NSW", vec!["NSW-Metro", "NSW-Coast"]),
                NodeSpec::new("VIC", vec!["VIC-Metro"]),
            ],
        ),
        level(
            "Country/State/Region",
            vec![
                NodeSpec::leaf("NSW-Metro"),
                NodeSpec::leaf("NSW-Coast"),
                NodeSpec::leaf("VIC-Metro"),
            ],
        ),
    ])
    .unwrap()
}

fn names(names: &[&str]) -> Vec<String> {
    names.iter().map(|n| n.to_string()).collect()
}

/// Purpose × State crossed over four bottom series, built from its summing
/// matrix: `Total`, `P1`, `P2`, `S1`, `S2`, `P1S1`, `P1S2`, `P2S1`, `P2S2`
pub fn grouped_hierarchy() -> Hierarchy {
    let nodes = names(&["Total", "P1", "P2", "S1", "S2", "P1S1", "P1S2", "P2S1", "P2S2"]);
    let s = Matrix::from_rows(vec![
        vec![1.0, 1.0, 1.0, 1.0],
        vec![1.0, 1.0, 0.0, 0.0],
        vec![0.0, 0.0, 1.0, 1.0],
        vec![1.0, 0.0, 1.0, 0.0],
        vec![0.0, 1.0, 0.0, 1.0],
        vec![1.0, 0.0, 0.0, 0.0],
        vec![0.0, 1.0, 0.0, 0.0],
        vec![0.0, 0.0, 1.0, 0.0],
        vec![0.0, 0.0, 0.0, 1.0],
    ])
    .unwrap();
    let tags = vec![
        ("Total".to_string(), names(&["Total"])),
        ("Purpose".to_string(), names(&["P1", "P2"])),
        ("State".to_string(), names(&["S1", "S2"])),
        (
            "Purpose/State".to_string(),
            names(&["P1S1", "P1S2", "P2S1", "P2S2"]),
        ),
    ];
    Hierarchy::from_summing_matrix(&nodes, &s, &tags).unwrap()
}

/// Seasonal bottom series for `hierarchy`, aggregated to every node
pub fn seasonal_table(hierarchy: &Hierarchy, periods: u32) -> ObservationTable {
    let mut rows = Vec::new();
    for (j, name) in hierarchy.bottom_nodes().iter().enumerate() {
        let level = 50.0 + 25.0 * j as f64;
        for t in 1..=periods {
            let season = [0.0, 4.0, 9.0, 5.0, -3.0, -8.0, -6.0, 2.0, 7.0, 3.0, -4.0, -9.0]
                [(t as usize - 1) % 12];
            let y = level + 0.3 * t as f64 + season + ((t * 7 + j as u32 * 3) % 5) as f64;
            rows.push(Observation::new(name.clone(), month(t), y));
        }
    }
    hierarchy
        .aggregate(&ObservationTable::from_rows(rows).unwrap())
        .unwrap()
}
