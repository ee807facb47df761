//! Series partitioner
//!
//! Splits a flat observation table into one read-only view per distinct
//! key. Every row lands in exactly one view and views keep the rows'
//! original relative order. Groups come out in order of first appearance.

use crate::data::{ColumnKind, Observation, ObservationTable};
use crate::error::{ForecastError, Result};
use chrono::NaiveDate;
use std::collections::HashMap;

/// Groups the rows of an observation table by a key column
#[derive(Debug, Clone, Copy)]
pub struct SeriesPartitioner<'a> {
    table: &'a ObservationTable,
}

impl<'a> SeriesPartitioner<'a> {
    pub fn new(table: &'a ObservationTable) -> Self {
        Self { table }
    }

    /// Partition by the named column
    ///
    /// The column must exist in the table schema and identify rows: the id
    /// column (one group per entity) or the time column (one cross-section
    /// per timestamp). Numeric value and covariate columns are rejected.
    pub fn by(&self, column: &str) -> Result<Partitions<'a>> {
        let schema = self.table.schema();
        match schema.column_kind(column) {
            Some(ColumnKind::Id) => Ok(self.group_with(|r| r.unique_id.clone())),
            Some(ColumnKind::Time) => Ok(self.group_with(|r| r.ds.to_string())),
            Some(ColumnKind::Value) | Some(ColumnKind::Covariate(_)) => {
                Err(ForecastError::InvalidInput(format!(
                    "Column '{}' holds numeric values and cannot identify entities",
                    column
                )))
            }
            None => Err(ForecastError::InvalidInput(format!(
                "Column '{}' is not in the table schema {:?}",
                column,
                schema.columns()
            ))),
        }
    }

    /// Partition by the schema's id column
    pub fn by_entity(&self) -> Partitions<'a> {
        self.group_with(|r| r.unique_id.clone())
    }

    fn group_with<F>(&self, key_of: F) -> Partitions<'a>
    where
        F: Fn(&Observation) -> String,
    {
        let mut positions: HashMap<String, usize> = HashMap::new();
        let mut groups: Vec<(String, Vec<usize>)> = Vec::new();

        for (i, row) in self.table.rows().iter().enumerate() {
            let key = key_of(row);
            match positions.get(&key) {
                Some(&g) => groups[g].1.push(i),
                None => {
                    positions.insert(key.clone(), groups.len());
                    groups.push((key, vec![i]));
                }
            }
        }

        Partitions {
            table: self.table,
            groups: groups.into_iter(),
        }
    }
}

/// Lazy sequence of per-key views over an observation table
#[derive(Debug)]
pub struct Partitions<'a> {
    table: &'a ObservationTable,
    groups: std::vec::IntoIter<(String, Vec<usize>)>,
}

impl<'a> Iterator for Partitions<'a> {
    type Item = EntitySeries<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        let (key, indices) = self.groups.next()?;
        let rows = self.table.rows();
        Some(EntitySeries {
            key,
            rows: indices.into_iter().map(|i| &rows[i]).collect(),
        })
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.groups.size_hint()
    }
}

impl ExactSizeIterator for Partitions<'_> {}

/// Rows sharing one key, in their original relative order
#[derive(Debug, Clone)]
pub struct EntitySeries<'a> {
    key: String,
    rows: Vec<&'a Observation>,
}

impl<'a> EntitySeries<'a> {
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Rows in original table order
    pub fn rows(&self) -> &[&'a Observation] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Rows sorted by timestamp; ties keep table order
    pub fn chronological(&self) -> Vec<&'a Observation> {
        let mut ordered = self.rows.clone();
        ordered.sort_by_key(|r| r.ds);
        ordered
    }

    /// Values in chronological order
    pub fn values(&self) -> Vec<f64> {
        self.chronological().iter().map(|r| r.y).collect()
    }

    /// Timestamps in chronological order
    pub fn timestamps(&self) -> Vec<NaiveDate> {
        self.chronological().iter().map(|r| r.ds).collect()
    }

    pub fn last_timestamp(&self) -> Option<NaiveDate> {
        self.rows.iter().map(|r| r.ds).max()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 1, d).unwrap()
    }

    #[test]
    fn test_groups_in_first_appearance_order() {
        let table = ObservationTable::from_triples(vec![
            ("b", date(2), 2.0),
            ("a", date(1), 1.0),
            ("b", date(1), 3.0),
        ])
        .unwrap();

        let groups: Vec<_> = table.partition("unique_id").unwrap().collect();
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].key(), "b");
        assert_eq!(groups[1].key(), "a");

        // Original relative order inside the group, chronological on request
        let b_values: Vec<f64> = groups[0].rows().iter().map(|r| r.y).collect();
        assert_eq!(b_values, vec![2.0, 3.0]);
        assert_eq!(groups[0].values(), vec![3.0, 2.0]);
        assert_eq!(groups[0].last_timestamp(), Some(date(2)));
    }

    #[test]
    fn test_partition_by_time_column() {
        let table = ObservationTable::from_triples(vec![
            ("a", date(1), 1.0),
            ("b", date(1), 2.0),
            ("a", date(2), 3.0),
        ])
        .unwrap();

        let sections: Vec<_> = table.partition("ds").unwrap().collect();
        assert_eq!(sections.len(), 2);
        assert_eq!(sections[0].len(), 2);
    }

    #[test]
    fn test_partitions_are_exact_size() {
        let table = ObservationTable::from_triples(vec![("a", date(1), 1.0), ("b", date(1), 2.0)])
            .unwrap();
        assert_eq!(table.partition_by_entity().len(), 2);
    }
}
