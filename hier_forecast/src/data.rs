//! Observation tables and CSV loading
//!
//! An observation table is a flat list of `(unique_id, ds, y, covariates…)`
//! rows. Rows for one entity do not have to be contiguous or sorted; the
//! partitioner restores per-entity chronological order when needed.

use crate::error::{ForecastError, Result};
use crate::partition::{Partitions, SeriesPartitioner};
use crate::utils::parse_date;
use chrono::NaiveDate;
use polars::prelude::*;
use std::collections::{BTreeSet, HashMap};
use std::fs::File;
use std::path::Path;

/// Role a named column plays in an observation table
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnKind {
    Id,
    Time,
    Value,
    Covariate(usize),
}

/// Column names of an observation table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableSchema {
    id_column: String,
    time_column: String,
    value_column: String,
    covariates: Vec<String>,
}

impl Default for TableSchema {
    fn default() -> Self {
        Self::new("unique_id", "ds", "y")
    }
}

impl TableSchema {
    /// Create a schema with no covariates
    pub fn new(id_column: &str, time_column: &str, value_column: &str) -> Self {
        Self {
            id_column: id_column.to_string(),
            time_column: time_column.to_string(),
            value_column: value_column.to_string(),
            covariates: Vec::new(),
        }
    }

    /// Add numeric covariate columns
    pub fn with_covariates<I, S>(mut self, covariates: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.covariates = covariates.into_iter().map(Into::into).collect();
        self
    }

    pub fn id_column(&self) -> &str {
        &self.id_column
    }

    pub fn time_column(&self) -> &str {
        &self.time_column
    }

    pub fn value_column(&self) -> &str {
        &self.value_column
    }

    pub fn covariates(&self) -> &[String] {
        &self.covariates
    }

    /// Every column name, id/time/value first
    pub fn columns(&self) -> Vec<&str> {
        let mut columns = vec![
            self.id_column.as_str(),
            self.time_column.as_str(),
            self.value_column.as_str(),
        ];
        columns.extend(self.covariates.iter().map(String::as_str));
        columns
    }

    /// Role of a column, `None` if the schema does not have it
    pub fn column_kind(&self, name: &str) -> Option<ColumnKind> {
        if name == self.id_column {
            Some(ColumnKind::Id)
        } else if name == self.time_column {
            Some(ColumnKind::Time)
        } else if name == self.value_column {
            Some(ColumnKind::Value)
        } else {
            self.covariates
                .iter()
                .position(|c| c == name)
                .map(ColumnKind::Covariate)
        }
    }
}

/// One row of an observation table
#[derive(Debug, Clone, PartialEq)]
pub struct Observation {
    pub unique_id: String,
    pub ds: NaiveDate,
    pub y: f64,
    pub covariates: Vec<f64>,
}

impl Observation {
    pub fn new(unique_id: impl Into<String>, ds: NaiveDate, y: f64) -> Self {
        Self {
            unique_id: unique_id.into(),
            ds,
            y,
            covariates: Vec::new(),
        }
    }

    pub fn with_covariates(mut self, covariates: Vec<f64>) -> Self {
        self.covariates = covariates;
        self
    }
}

/// Immutable table of observations
#[derive(Debug, Clone, PartialEq)]
pub struct ObservationTable {
    schema: TableSchema,
    rows: Vec<Observation>,
}

impl ObservationTable {
    /// Create a table, validating every row against the schema
    pub fn new(schema: TableSchema, rows: Vec<Observation>) -> Result<Self> {
        let expected = schema.covariates().len();
        for (i, row) in rows.iter().enumerate() {
            if row.covariates.len() != expected {
                return Err(ForecastError::InvalidInput(format!(
                    "Row {} has {} covariates, schema declares {}",
                    i,
                    row.covariates.len(),
                    expected
                )));
            }
            if !row.y.is_finite() {
                return Err(ForecastError::InvalidInput(format!(
                    "Row {} ({}, {}) has non-finite value {}",
                    i, row.unique_id, row.ds, row.y
                )));
            }
        }

        Ok(Self { schema, rows })
    }

    /// Create a table with the default `unique_id`/`ds`/`y` schema
    pub fn from_rows(rows: Vec<Observation>) -> Result<Self> {
        Self::new(TableSchema::default(), rows)
    }

    /// Create a table from `(unique_id, ds, y)` triples
    pub fn from_triples<S: Into<String>>(triples: Vec<(S, NaiveDate, f64)>) -> Result<Self> {
        Self::from_rows(
            triples
                .into_iter()
                .map(|(id, ds, y)| Observation::new(id, ds, y))
                .collect(),
        )
    }

    pub fn schema(&self) -> &TableSchema {
        &self.schema
    }

    pub fn rows(&self) -> &[Observation] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Distinct entity identifiers
    pub fn entity_keys(&self) -> BTreeSet<String> {
        self.rows.iter().map(|r| r.unique_id.clone()).collect()
    }

    /// Partition rows by the named column
    pub fn partition(&self, column: &str) -> Result<Partitions<'_>> {
        SeriesPartitioner::new(self).by(column)
    }

    /// Partition rows by the schema's id column
    pub fn partition_by_entity(&self) -> Partitions<'_> {
        SeriesPartitioner::new(self).by_entity()
    }

    /// Lookup from `(unique_id, ds)` to value
    ///
    /// Duplicate keys keep the last row.
    pub fn value_index(&self) -> HashMap<(&str, NaiveDate), f64> {
        self.rows
            .iter()
            .map(|r| ((r.unique_id.as_str(), r.ds), r.y))
            .collect()
    }

    /// Split off the last `horizon` observations of every entity
    ///
    /// Returns `(train, test)`. Every entity must keep at least one training
    /// observation.
    pub fn split_tail(&self, horizon: usize) -> Result<(ObservationTable, ObservationTable)> {
        if horizon == 0 {
            return Err(ForecastError::InvalidInput(
                "Hold-out horizon must be positive".to_string(),
            ));
        }

        let mut train = Vec::new();
        let mut test = Vec::new();
        for series in self.partition_by_entity() {
            if series.len() <= horizon {
                return Err(ForecastError::InvalidInput(format!(
                    "Entity '{}' has {} observations, cannot hold out {}",
                    series.key(),
                    series.len(),
                    horizon
                )));
            }
            let ordered = series.chronological();
            let cut = ordered.len() - horizon;
            train.extend(ordered[..cut].iter().map(|r| (*r).clone()));
            test.extend(ordered[cut..].iter().map(|r| (*r).clone()));
        }

        Ok((
            ObservationTable::new(self.schema.clone(), train)?,
            ObservationTable::new(self.schema.clone(), test)?,
        ))
    }

    /// Convert to a polars DataFrame, dates as ISO strings
    pub fn to_dataframe(&self) -> Result<DataFrame> {
        let ids: Vec<&str> = self.rows.iter().map(|r| r.unique_id.as_str()).collect();
        let dates: Vec<String> = self.rows.iter().map(|r| r.ds.to_string()).collect();
        let values: Vec<f64> = self.rows.iter().map(|r| r.y).collect();

        let mut columns = vec![
            Series::new(self.schema.id_column(), ids),
            Series::new(self.schema.time_column(), dates),
            Series::new(self.schema.value_column(), values),
        ];
        for (i, name) in self.schema.covariates().iter().enumerate() {
            let covariate: Vec<f64> = self.rows.iter().map(|r| r.covariates[i]).collect();
            columns.push(Series::new(name, covariate));
        }

        Ok(DataFrame::new(columns)?)
    }
}

/// Data loader for observation tables
#[derive(Debug)]
pub struct DataLoader;

impl DataLoader {
    /// Load a `unique_id, ds, y` table from a CSV file
    pub fn from_csv<P: AsRef<Path>>(path: P) -> Result<ObservationTable> {
        Self::from_csv_with_schema(path, TableSchema::default())
    }

    /// Load a table from a CSV file using custom column names
    pub fn from_csv_with_schema<P: AsRef<Path>>(
        path: P,
        schema: TableSchema,
    ) -> Result<ObservationTable> {
        let file = File::open(path)?;
        let df = CsvReader::new(file)
            .infer_schema(None)
            .has_header(true)
            .finish()?;

        Self::from_dataframe(&df, schema)
    }

    /// Create an observation table from an existing DataFrame
    pub fn from_dataframe(df: &DataFrame, schema: TableSchema) -> Result<ObservationTable> {
        let available = df.get_column_names();
        for required in schema.columns() {
            if !available.contains(&required) {
                return Err(ForecastError::InvalidInput(format!(
                    "Column '{}' not found; available columns: {:?}",
                    required, available
                )));
            }
        }

        let ids = df.column(schema.id_column())?.cast(&DataType::Utf8)?;
        let dates = df.column(schema.time_column())?.cast(&DataType::Utf8)?;
        let values = Self::column_as_f64(df, schema.value_column())?;
        let covariates = schema
            .covariates()
            .iter()
            .map(|name| Self::column_as_f64(df, name))
            .collect::<Result<Vec<_>>>()?;

        let mut rows = Vec::with_capacity(df.height());
        for (i, ((id, ds), y)) in ids
            .utf8()?
            .into_iter()
            .zip(dates.utf8()?.into_iter())
            .zip(values.iter())
            .enumerate()
        {
            let (Some(id), Some(ds), Some(y)) = (id, ds, *y) else {
                return Err(ForecastError::InvalidInput(format!(
                    "Row {} has a missing id, timestamp or value",
                    i
                )));
            };
            let row_covariates = covariates
                .iter()
                .map(|c| {
                    c[i].ok_or_else(|| {
                        ForecastError::InvalidInput(format!("Row {} has a missing covariate", i))
                    })
                })
                .collect::<Result<Vec<_>>>()?;

            rows.push(Observation::new(id, parse_date(ds)?, y).with_covariates(row_covariates));
        }

        ObservationTable::new(schema, rows)
    }

    /// Helper method to get a column as optional f64 values
    fn column_as_f64(df: &DataFrame, column_name: &str) -> Result<Vec<Option<f64>>> {
        let col = df.column(column_name).map_err(|e| {
            ForecastError::InvalidInput(format!("Column '{}' not found: {}", column_name, e))
        })?;

        if !col.dtype().is_numeric() {
            return Err(ForecastError::InvalidInput(format!(
                "Column '{}' cannot be converted to f64",
                column_name
            )));
        }

        let cast = col.cast(&DataType::Float64)?;
        Ok(cast.f64()?.into_iter().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 1, d).unwrap()
    }

    #[test]
    fn test_schema_column_kinds() {
        let schema = TableSchema::default().with_covariates(["price"]);
        assert_eq!(schema.column_kind("unique_id"), Some(ColumnKind::Id));
        assert_eq!(schema.column_kind("ds"), Some(ColumnKind::Time));
        assert_eq!(schema.column_kind("y"), Some(ColumnKind::Value));
        assert_eq!(schema.column_kind("price"), Some(ColumnKind::Covariate(0)));
        assert_eq!(schema.column_kind("volume"), None);
    }

    #[test]
    fn test_rejects_covariate_mismatch() {
        let schema = TableSchema::default().with_covariates(["price"]);
        let result = ObservationTable::new(schema, vec![Observation::new("a", date(1), 1.0)]);
        assert!(matches!(result, Err(ForecastError::InvalidInput(_))));
    }

    #[test]
    fn test_rejects_non_finite_values() {
        let result = ObservationTable::from_triples(vec![("a", date(1), f64::NAN)]);
        assert!(result.is_err());
    }

    #[test]
    fn test_split_tail() {
        let table = ObservationTable::from_triples(vec![
            ("a", date(3), 3.0),
            ("a", date(1), 1.0),
            ("b", date(1), 10.0),
            ("a", date(2), 2.0),
            ("b", date(2), 20.0),
        ])
        .unwrap();

        let (train, test) = table.split_tail(1).unwrap();
        assert_eq!(train.len(), 3);
        assert_eq!(test.len(), 2);
        let held_out = test.value_index();
        assert_eq!(held_out.get(&("a", date(3))), Some(&3.0));
        assert_eq!(held_out.get(&("b", date(2))), Some(&20.0));

        assert!(table.split_tail(2).is_err());
    }

    #[test]
    fn test_dataframe_roundtrip() {
        let table = ObservationTable::from_triples(vec![("a", date(1), 1.5), ("b", date(2), 2.5)])
            .unwrap();
        let df = table.to_dataframe().unwrap();
        assert_eq!(df.height(), 2);

        let back = DataLoader::from_dataframe(&df, TableSchema::default()).unwrap();
        assert_eq!(back, table);
    }
}
