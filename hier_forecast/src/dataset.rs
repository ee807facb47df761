//! Hierarchical datasets on disk and synthetic ones for demos
//!
//! A dataset directory `<root>/<name>/` holds:
//! - `Y_df.csv`: `unique_id, ds, y` for every node, or for the bottom level
//!   only, in which case the aggregates are summed on load
//! - `hierarchy.json`: a serialized `HierarchySpec`
//! - `Y_test.csv` (optional): held-out actuals

use crate::data::{DataLoader, Observation, ObservationTable};
use crate::error::{ForecastError, Result};
use crate::hierarchy::{Hierarchy, HierarchySpec, LevelSpec, NodeSpec};
use crate::utils::Frequency;
use chrono::NaiveDate;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::Normal;
use serde::Serialize;
use std::f64::consts::PI;
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

pub const OBSERVATIONS_FILE: &str = "Y_df.csv";
pub const HIERARCHY_FILE: &str = "hierarchy.json";
pub const ACTUALS_FILE: &str = "Y_test.csv";

/// Tolerance of the aggregation check on loaded data
const LOAD_COHERENCE_TOLERANCE: f64 = 1e-6;

/// Observations, hierarchy and optional held-out actuals
#[derive(Debug, Clone)]
pub struct HierarchicalData {
    pub name: String,
    pub observations: ObservationTable,
    pub hierarchy: Hierarchy,
    pub actuals: Option<ObservationTable>,
}

#[derive(Serialize)]
struct CsvRow<'a> {
    unique_id: &'a str,
    ds: String,
    y: f64,
}

impl HierarchicalData {
    /// Load `<directory>/<name>/`
    pub fn load<P: AsRef<Path>>(directory: P, name: &str) -> Result<Self> {
        let dir = directory.as_ref().join(name);
        let observations_path = dir.join(OBSERVATIONS_FILE);
        let hierarchy_path = dir.join(HIERARCHY_FILE);
        if !observations_path.is_file() || !hierarchy_path.is_file() {
            return Err(ForecastError::DatasetNotFound {
                name: name.to_string(),
                location: directory.as_ref().display().to_string(),
            });
        }

        let spec: HierarchySpec = serde_json::from_str(&fs::read_to_string(&hierarchy_path)?)?;
        let hierarchy = Hierarchy::from_spec(spec)?;
        let observations = Self::complete(DataLoader::from_csv(&observations_path)?, &hierarchy)?;

        let actuals_path = dir.join(ACTUALS_FILE);
        let actuals = if actuals_path.is_file() {
            Some(Self::complete(
                DataLoader::from_csv(&actuals_path)?,
                &hierarchy,
            )?)
        } else {
            None
        };

        info!(
            dataset = name,
            nodes = hierarchy.n_nodes(),
            bottom = hierarchy.n_bottom(),
            observations = observations.len(),
            has_actuals = actuals.is_some(),
            "dataset loaded"
        );
        Ok(Self {
            name: name.to_string(),
            observations,
            hierarchy,
            actuals,
        })
    }

    /// Load and make sure actuals exist
    ///
    /// Without `Y_test.csv` the last `horizon` observations of every node
    /// are held out.
    pub fn load_with_holdout<P: AsRef<Path>>(directory: P, name: &str, horizon: usize) -> Result<Self> {
        Self::load(directory, name)?.with_holdout(horizon)
    }

    /// Hold out the last `horizon` observations unless actuals already exist
    pub fn with_holdout(mut self, horizon: usize) -> Result<Self> {
        if self.actuals.is_none() {
            let (train, test) = self.observations.split_tail(horizon)?;
            debug!(dataset = %self.name, horizon, "holding out the last observations");
            self.observations = train;
            self.actuals = Some(test);
        }
        Ok(self)
    }

    /// Aggregate a bottom-only table, then check the aggregation invariant
    fn complete(table: ObservationTable, hierarchy: &Hierarchy) -> Result<ObservationTable> {
        let keys = table.entity_keys();
        let table = if keys == hierarchy.bottom_keys() && hierarchy.n_aggregate() > 0 {
            hierarchy.aggregate(&table)?
        } else {
            hierarchy.validate_keys(&keys, "Dataset")?;
            table
        };
        hierarchy.check_coherence(&table, LOAD_COHERENCE_TOLERANCE)?;
        Ok(table)
    }

    /// Write the dataset as `<directory>/<name>/`
    pub fn save<P: AsRef<Path>>(&self, directory: P) -> Result<PathBuf> {
        let dir = directory.as_ref().join(&self.name);
        fs::create_dir_all(&dir)?;

        write_table(&self.observations, &dir.join(OBSERVATIONS_FILE))?;
        if let Some(actuals) = &self.actuals {
            write_table(actuals, &dir.join(ACTUALS_FILE))?;
        }
        let spec = serde_json::to_string_pretty(&self.hierarchy.spec())?;
        fs::write(dir.join(HIERARCHY_FILE), spec)?;

        Ok(dir)
    }

    /// Generate a seeded synthetic dataset
    pub fn synthetic(config: &SyntheticConfig) -> Result<Self> {
        config.validate()?;
        let hierarchy = config.hierarchy()?;

        let mut rng = StdRng::seed_from_u64(config.seed);
        let noise = Normal::new(0.0, config.noise_sd)
            .map_err(|e| ForecastError::InvalidInput(format!("Invalid noise level: {}", e)))?;
        let dates = (0..config.periods)
            .map(|t| config.frequency.advance(config.start, t))
            .collect::<Result<Vec<NaiveDate>>>()?;

        let m = config.frequency.season_length() as f64;
        let mut rows = Vec::with_capacity(hierarchy.n_bottom() * config.periods);
        for name in hierarchy.bottom_nodes() {
            let level = config.base_level * rng.gen_range(0.5..1.5);
            let amplitude = level * config.seasonal_strength;
            let phase = rng.gen_range(0.0..2.0 * PI);
            let trend = level * config.trend;
            for (t, ds) in dates.iter().enumerate() {
                let seasonal = amplitude * (2.0 * PI * t as f64 / m + phase).sin();
                let y = (level + trend * t as f64 + seasonal + rng.sample(noise)).max(0.0);
                rows.push(Observation::new(name.clone(), *ds, y));
            }
        }

        let observations = hierarchy.aggregate(&ObservationTable::from_rows(rows)?)?;
        Ok(Self {
            name: config.name.clone(),
            observations,
            hierarchy,
            actuals: None,
        })
    }
}

fn write_table(table: &ObservationTable, path: &Path) -> Result<()> {
    let mut writer = csv::Writer::from_writer(File::create(path)?);
    for row in table.rows() {
        writer.serialize(CsvRow {
            unique_id: &row.unique_id,
            ds: row.ds.to_string(),
            y: row.y,
        })?;
    }
    writer.flush()?;
    Ok(())
}

/// Shape and dynamics of a synthetic dataset
#[derive(Debug, Clone, PartialEq)]
pub struct SyntheticConfig {
    pub name: String,
    /// Children per node at each level below the top, e.g. `[2, 3]`
    pub branching: Vec<usize>,
    pub periods: usize,
    pub frequency: Frequency,
    pub start: NaiveDate,
    pub base_level: f64,
    /// Seasonal amplitude as a fraction of the level
    pub seasonal_strength: f64,
    /// Per-period growth as a fraction of the level
    pub trend: f64,
    pub noise_sd: f64,
    pub seed: u64,
}

impl Default for SyntheticConfig {
    fn default() -> Self {
        Self {
            name: "synthetic".to_string(),
            branching: vec![2, 3],
            periods: 60,
            frequency: Frequency::Monthly,
            start: NaiveDate::from_ymd_opt(2015, 1, 1).unwrap_or_default(),
            base_level: 100.0,
            seasonal_strength: 0.2,
            trend: 0.005,
            noise_sd: 2.0,
            seed: 42,
        }
    }
}

impl SyntheticConfig {
    fn validate(&self) -> Result<()> {
        if self.branching.iter().any(|&b| b == 0) {
            return Err(ForecastError::InvalidInput(
                "Every level needs at least one child per node".to_string(),
            ));
        }
        if self.periods == 0 {
            return Err(ForecastError::InvalidInput(
                "Synthetic dataset needs at least one period".to_string(),
            ));
        }
        if !(self.noise_sd >= 0.0 && self.base_level > 0.0) {
            return Err(ForecastError::InvalidInput(
                "Noise must be non-negative and the base level positive".to_string(),
            ));
        }
        Ok(())
    }

    /// `Total`, then one level per branching factor; children are named by
    /// appending `-<k>` to the parent name (`Total` is left out)
    fn hierarchy(&self) -> Result<Hierarchy> {
        let mut levels = Vec::with_capacity(self.branching.len() + 1);
        let mut current = vec!["Total".to_string()];

        for (depth, &fanout) in self.branching.iter().enumerate() {
            let mut parents = Vec::with_capacity(current.len());
            let mut next = Vec::with_capacity(current.len() * fanout);
            for parent in &current {
                let children: Vec<String> = (1..=fanout)
                    .map(|k| {
                        if depth == 0 {
                            format!("N{}", k)
                        } else {
                            format!("{}-{}", parent, k)
                        }
                    })
                    .collect();
                parents.push(NodeSpec::new(parent.clone(), children.clone()));
                next.extend(children);
            }
            levels.push(LevelSpec {
                name: if depth == 0 {
                    "Total".to_string()
                } else {
                    format!("Level{}", depth)
                },
                nodes: parents,
            });
            current = next;
        }

        levels.push(LevelSpec {
            name: if self.branching.is_empty() {
                "Total".to_string()
            } else {
                "Bottom".to_string()
            },
            nodes: current.into_iter().map(NodeSpec::leaf).collect(),
        });
        Hierarchy::from_levels(levels)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_synthetic_is_seeded_and_coherent() {
        let config = SyntheticConfig {
            periods: 24,
            ..SyntheticConfig::default()
        };
        let first = HierarchicalData::synthetic(&config).unwrap();
        let second = HierarchicalData::synthetic(&config).unwrap();

        assert_eq!(first.observations, second.observations);
        assert_eq!(first.hierarchy.n_nodes(), 1 + 2 + 6);
        assert_eq!(first.observations.len(), 9 * 24);
        assert!(first.hierarchy.check_coherence(&first.observations, 1e-9).is_ok());
        assert_eq!(first.hierarchy.bottom_nodes()[0], "N1-1");
    }

    #[test]
    fn test_missing_dataset() {
        let dir = tempfile::tempdir().unwrap();
        let result = HierarchicalData::load(dir.path(), "TourismSmall");
        assert!(matches!(result, Err(ForecastError::DatasetNotFound { .. })));
    }
}
