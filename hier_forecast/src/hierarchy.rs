//! Hierarchy structure
//!
//! A hierarchy is an ordered list of levels, top to bottom. The last level
//! holds the bottom series and every level splits them into disjoint groups.
//! Aggregates list their children in any lower level, which admits grouped
//! structures where a bottom series sits under one node of each of several
//! crossed classifications. When every non-top node has exactly one parent
//! in the level right above, the hierarchy is a tree.
//!
//! Node order is level by level, so the bottom nodes are always the last
//! `n_bottom` rows of the summing matrix.

use crate::data::{Observation, ObservationTable, TableSchema};
use crate::error::{ForecastError, Result};
use chrono::NaiveDate;
use forecast_math::Matrix;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};

/// A node and the names of its children in the next level
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeSpec {
    pub name: String,
    #[serde(default)]
    pub children: Vec<String>,
}

impl NodeSpec {
    pub fn new<S: Into<String>>(name: impl Into<String>, children: Vec<S>) -> Self {
        Self {
            name: name.into(),
            children: children.into_iter().map(Into::into).collect(),
        }
    }

    pub fn leaf(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            children: Vec::new(),
        }
    }
}

/// One named level of a hierarchy
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LevelSpec {
    pub name: String,
    pub nodes: Vec<NodeSpec>,
}

/// Serializable description of a hierarchy, levels ordered top to bottom
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HierarchySpec {
    pub levels: Vec<LevelSpec>,
}

/// A level of a built hierarchy
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Level {
    name: String,
    nodes: Vec<usize>,
}

impl Level {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Node indices in this level
    pub fn nodes(&self) -> &[usize] {
        &self.nodes
    }
}

/// Validated hierarchy with its summing matrix
#[derive(Debug, Clone)]
pub struct Hierarchy {
    nodes: Vec<String>,
    index: HashMap<String, usize>,
    levels: Vec<Level>,
    level_of: Vec<usize>,
    children: Vec<Vec<usize>>,
    /// Bottom positions (`0..n_bottom`) under each node
    leaves: Vec<Vec<usize>>,
    n_bottom: usize,
    /// Every non-top node has exactly one parent, in the level right above
    is_tree: bool,
    summing: Matrix,
}

fn inconsistent(message: String) -> ForecastError {
    ForecastError::InconsistentHierarchy(message)
}

impl Hierarchy {
    /// Build a hierarchy from levels of `(node, children)` entries
    pub fn from_levels(levels: Vec<LevelSpec>) -> Result<Self> {
        Self::from_spec(HierarchySpec { levels })
    }

    /// Build and validate a hierarchy from its serializable description
    pub fn from_spec(spec: HierarchySpec) -> Result<Self> {
        let Some(bottom_spec) = spec.levels.last() else {
            return Err(inconsistent("hierarchy has no levels".to_string()));
        };
        if bottom_spec.nodes.is_empty() {
            return Err(inconsistent(format!(
                "bottom level '{}' has no nodes",
                bottom_spec.name
            )));
        }

        let mut nodes = Vec::new();
        let mut index = HashMap::new();
        let mut levels = Vec::with_capacity(spec.levels.len());
        let mut level_of = Vec::new();

        for (k, level) in spec.levels.iter().enumerate() {
            let mut members = Vec::with_capacity(level.nodes.len());
            for node in &level.nodes {
                if index.contains_key(&node.name) {
                    return Err(inconsistent(format!(
                        "node '{}' appears more than once",
                        node.name
                    )));
                }
                index.insert(node.name.clone(), nodes.len());
                members.push(nodes.len());
                nodes.push(node.name.clone());
                level_of.push(k);
            }
            levels.push(Level {
                name: level.name.clone(),
                nodes: members,
            });
        }

        let n = nodes.len();
        let n_bottom = bottom_spec.nodes.len();
        let n_aggregate = n - n_bottom;
        let last_level = spec.levels.len() - 1;

        let mut children = vec![Vec::new(); n];
        let mut parents: Vec<Vec<usize>> = vec![Vec::new(); n];
        for (k, level) in spec.levels.iter().enumerate() {
            for node in &level.nodes {
                let idx = index[&node.name];
                if k == last_level {
                    if !node.children.is_empty() {
                        return Err(inconsistent(format!(
                            "bottom node '{}' cannot have children",
                            node.name
                        )));
                    }
                    continue;
                }
                if node.children.is_empty() {
                    return Err(inconsistent(format!(
                        "aggregate node '{}' in level '{}' has no children",
                        node.name, level.name
                    )));
                }
                for child in &node.children {
                    let Some(&c) = index.get(child) else {
                        return Err(inconsistent(format!(
                            "child '{}' of '{}' is not a node",
                            child, node.name
                        )));
                    };
                    if level_of[c] <= k {
                        return Err(inconsistent(format!(
                            "child '{}' of '{}' is not in a lower level",
                            child, node.name
                        )));
                    }
                    if children[idx].contains(&c) {
                        return Err(inconsistent(format!(
                            "child '{}' is listed twice under '{}'",
                            child, node.name
                        )));
                    }
                    parents[c].push(idx);
                    children[idx].push(c);
                }
            }
        }

        // Children always come later in node order, so walk it backwards
        let mut leaves: Vec<Vec<usize>> = vec![Vec::new(); n];
        for i in (0..n).rev() {
            if i >= n_aggregate {
                leaves[i] = vec![i - n_aggregate];
                continue;
            }
            let mut under: Vec<usize> = children[i]
                .iter()
                .flat_map(|&c| leaves[c].iter().copied())
                .collect();
            let listed = under.len();
            under.sort_unstable();
            under.dedup();
            if under.len() != listed {
                return Err(inconsistent(format!(
                    "children of '{}' share bottom nodes",
                    nodes[i]
                )));
            }
            leaves[i] = under;
        }

        // Each level splits the bottom series into disjoint groups
        for level in &levels {
            let mut covered = vec![false; n_bottom];
            for &i in &level.nodes {
                for &j in &leaves[i] {
                    if std::mem::replace(&mut covered[j], true) {
                        return Err(inconsistent(format!(
                            "'{}' is counted twice in level '{}'",
                            nodes[n_aggregate + j],
                            level.name
                        )));
                    }
                }
            }
            if let Some(j) = covered.iter().position(|c| !c) {
                return Err(inconsistent(format!(
                    "'{}' is not under any node of level '{}'",
                    nodes[n_aggregate + j],
                    level.name
                )));
            }
        }

        let is_tree = (0..n).all(|i| match parents[i].as_slice() {
            [] => level_of[i] == 0,
            [p] => level_of[*p] + 1 == level_of[i],
            _ => false,
        });

        let mut summing = Matrix::zeros(n, n_bottom);
        for (i, under) in leaves.iter().enumerate() {
            for &j in under {
                summing[(i, j)] = 1.0;
            }
        }

        Ok(Self {
            nodes,
            index,
            levels,
            level_of,
            children,
            leaves,
            n_bottom,
            is_tree,
            summing,
        })
    }

    /// Build a hierarchy from a summing matrix and level tags
    ///
    /// `nodes` names the rows of `summing`; `tags` lists levels top to
    /// bottom. Bottom rows must be unit vectors. Parent links are derived
    /// from leaf-set containment, so grouped structures (crossed
    /// classifications over the same bottom series) are accepted as well as
    /// trees.
    pub fn from_summing_matrix(
        nodes: &[String],
        summing: &Matrix,
        tags: &[(String, Vec<String>)],
    ) -> Result<Self> {
        if summing.rows() != nodes.len() {
            return Err(ForecastError::InvalidInput(format!(
                "summing matrix has {} rows for {} nodes",
                summing.rows(),
                nodes.len()
            )));
        }

        let row_of: HashMap<&str, usize> = nodes
            .iter()
            .enumerate()
            .map(|(i, name)| (name.as_str(), i))
            .collect();
        let leaf_set = |name: &str| -> Result<BTreeSet<usize>> {
            let r = *row_of.get(name).ok_or_else(|| {
                inconsistent(format!("tagged node '{}' has no summing matrix row", name))
            })?;
            let row = summing.row(r);
            if row.iter().any(|&v| v != 0.0 && v != 1.0) {
                return Err(inconsistent(format!(
                    "summing matrix row for '{}' is not 0/1",
                    name
                )));
            }
            Ok((0..row.len()).filter(|&j| row[j] == 1.0).collect())
        };

        let Some((bottom_name, bottom_nodes)) = tags.last() else {
            return Err(inconsistent("no level tags given".to_string()));
        };

        let mut column_owner: HashMap<usize, &str> = HashMap::new();
        for name in bottom_nodes {
            let set = leaf_set(name)?;
            if set.len() != 1 {
                return Err(inconsistent(format!(
                    "bottom node '{}' in level '{}' must sum exactly one column",
                    name, bottom_name
                )));
            }
            column_owner.insert(set.into_iter().next().unwrap_or_default(), name.as_str());
        }

        let mut sets: HashMap<&str, BTreeSet<usize>> = HashMap::new();
        for (_, members) in tags {
            for name in members {
                sets.insert(name.as_str(), leaf_set(name)?);
            }
        }

        // A node's children come from the nearest lower level whose subsets
        // cover it exactly; the bottom level always does
        let mut levels = Vec::with_capacity(tags.len());
        for (k, (level_name, members)) in tags.iter().enumerate() {
            let mut specs = Vec::with_capacity(members.len());
            for name in members {
                let own = &sets[name.as_str()];
                let children = tags[k + 1..]
                    .iter()
                    .find_map(|(_, below)| {
                        let kids: Vec<&String> = below
                            .iter()
                            .filter(|c| {
                                let set = &sets[c.as_str()];
                                !set.is_empty() && set.is_subset(own)
                            })
                            .collect();
                        let covered: BTreeSet<usize> = kids
                            .iter()
                            .flat_map(|c| sets[c.as_str()].iter().copied())
                            .collect();
                        (!kids.is_empty() && covered == *own)
                            .then(|| kids.into_iter().cloned().collect::<Vec<String>>())
                    })
                    .unwrap_or_default();
                specs.push(NodeSpec {
                    name: name.clone(),
                    children,
                });
            }
            levels.push(LevelSpec {
                name: level_name.clone(),
                nodes: specs,
            });
        }

        let hierarchy = Self::from_levels(levels)?;

        // The derived structure must reproduce every row of the given matrix
        for name in hierarchy.nodes() {
            let expected: BTreeSet<&str> = sets[name.as_str()]
                .iter()
                .filter_map(|j| column_owner.get(j).copied())
                .collect();
            let idx = hierarchy.index[name.as_str()];
            let built: BTreeSet<&str> = hierarchy.leaves[idx]
                .iter()
                .map(|&j| hierarchy.bottom_nodes()[j].as_str())
                .collect();
            if expected != built {
                return Err(inconsistent(format!(
                    "summing matrix row for '{}' does not match the level structure",
                    name
                )));
            }
        }

        Ok(hierarchy)
    }

    /// Every node name, level by level, bottom nodes last
    pub fn nodes(&self) -> &[String] {
        &self.nodes
    }

    pub fn n_nodes(&self) -> usize {
        self.nodes.len()
    }

    pub fn n_bottom(&self) -> usize {
        self.n_bottom
    }

    pub fn n_aggregate(&self) -> usize {
        self.nodes.len() - self.n_bottom
    }

    /// Bottom node names in summing-matrix column order
    pub fn bottom_nodes(&self) -> &[String] {
        &self.nodes[self.n_aggregate()..]
    }

    pub fn node_index(&self, name: &str) -> Option<usize> {
        self.index.get(name).copied()
    }

    pub fn is_bottom(&self, node: usize) -> bool {
        node >= self.n_aggregate()
    }

    pub fn levels(&self) -> &[Level] {
        &self.levels
    }

    pub fn level(&self, name: &str) -> Option<&Level> {
        self.levels.iter().find(|l| l.name == name)
    }

    /// Level position of a node (0 is the top)
    pub fn level_of(&self, node: usize) -> usize {
        self.level_of[node]
    }

    /// Whether every non-top node has a single parent in the level above
    pub fn is_tree(&self) -> bool {
        self.is_tree
    }

    /// Fail with `InvalidInput` unless the hierarchy is a tree
    pub fn require_tree(&self, method: &str) -> Result<()> {
        if self.is_tree {
            return Ok(());
        }
        Err(ForecastError::InvalidInput(format!(
            "{} needs a strictly nested hierarchy, this one is grouped",
            method
        )))
    }

    /// Children as listed in the structure
    pub fn children(&self, node: usize) -> &[usize] {
        &self.children[node]
    }

    /// Bottom positions under a node
    pub fn leaves(&self, node: usize) -> &[usize] {
        &self.leaves[node]
    }

    /// Nodes of the top level
    pub fn top_nodes(&self) -> &[usize] {
        &self.levels[0].nodes
    }

    /// Summing matrix: one row per node, one column per bottom node
    pub fn summing_matrix(&self) -> &Matrix {
        &self.summing
    }

    /// Level name to node names
    pub fn tags(&self) -> Vec<(String, Vec<String>)> {
        self.levels
            .iter()
            .map(|l| {
                (
                    l.name.clone(),
                    l.nodes.iter().map(|&i| self.nodes[i].clone()).collect(),
                )
            })
            .collect()
    }

    pub fn node_keys(&self) -> BTreeSet<String> {
        self.nodes.iter().cloned().collect()
    }

    pub fn bottom_keys(&self) -> BTreeSet<String> {
        self.bottom_nodes().iter().cloned().collect()
    }

    /// Serializable description of this hierarchy
    pub fn spec(&self) -> HierarchySpec {
        HierarchySpec {
            levels: self
                .levels
                .iter()
                .map(|l| LevelSpec {
                    name: l.name.clone(),
                    nodes: l
                        .nodes
                        .iter()
                        .map(|&i| NodeSpec {
                            name: self.nodes[i].clone(),
                            children: self.children[i]
                                .iter()
                                .map(|&c| self.nodes[c].clone())
                                .collect(),
                        })
                        .collect(),
                })
                .collect(),
        }
    }

    /// Require `keys` to be exactly this hierarchy's node set
    pub fn validate_keys(&self, keys: &BTreeSet<String>, source: &str) -> Result<()> {
        let expected = self.node_keys();
        if &expected == keys {
            return Ok(());
        }

        let missing: Vec<&String> = expected.difference(keys).take(5).collect();
        let extra: Vec<&String> = keys.difference(&expected).take(5).collect();
        Err(inconsistent(format!(
            "{} keys do not match the hierarchy nodes (missing: {:?}, unexpected: {:?})",
            source, missing, extra
        )))
    }

    fn bottom_series(
        &self,
        table: &ObservationTable,
    ) -> Result<Vec<BTreeMap<NaiveDate, f64>>> {
        let mut series = vec![BTreeMap::new(); self.n_bottom];
        let n_aggregate = self.n_aggregate();

        for row in table.rows() {
            let Some(idx) = self.node_index(&row.unique_id) else {
                continue;
            };
            if idx < n_aggregate {
                continue;
            }
            if series[idx - n_aggregate].insert(row.ds, row.y).is_some() {
                return Err(ForecastError::InvalidInput(format!(
                    "duplicate observation for '{}' at {}",
                    row.unique_id, row.ds
                )));
            }
        }

        if let Some(j) = series.iter().position(BTreeMap::is_empty) {
            return Err(inconsistent(format!(
                "bottom node '{}' has no observations",
                self.bottom_nodes()[j]
            )));
        }

        Ok(series)
    }

    /// Sum the bottom series of a node at the timestamps all its leaves share
    fn summed(
        &self,
        node: usize,
        bottom: &[BTreeMap<NaiveDate, f64>],
    ) -> BTreeMap<NaiveDate, f64> {
        let under = &self.leaves[node];
        bottom[under[0]]
            .keys()
            .filter_map(|ds| {
                under
                    .iter()
                    .map(|&j| bottom[j].get(ds).copied())
                    .sum::<Option<f64>>()
                    .map(|total| (*ds, total))
            })
            .collect()
    }

    /// Build the full table of every node from bottom-level observations
    ///
    /// Aggregates exist at the timestamps all of their leaves share.
    /// Covariates cannot be aggregated and are dropped from the output.
    pub fn aggregate(&self, bottom: &ObservationTable) -> Result<ObservationTable> {
        self.validate_bottom_keys(&bottom.entity_keys())?;
        let series = self.bottom_series(bottom)?;

        let mut rows = Vec::new();
        for node in 0..self.n_nodes() {
            for (ds, y) in self.summed(node, &series) {
                rows.push(Observation::new(self.nodes[node].clone(), ds, y));
            }
        }

        let schema = bottom.schema();
        ObservationTable::new(
            TableSchema::new(
                schema.id_column(),
                schema.time_column(),
                schema.value_column(),
            ),
            rows,
        )
    }

    fn validate_bottom_keys(&self, keys: &BTreeSet<String>) -> Result<()> {
        let expected = self.bottom_keys();
        if &expected == keys {
            return Ok(());
        }
        let missing: Vec<&String> = expected.difference(keys).take(5).collect();
        let extra: Vec<&String> = keys.difference(&expected).take(5).collect();
        Err(inconsistent(format!(
            "bottom-level keys do not match the table (missing: {:?}, unexpected: {:?})",
            missing, extra
        )))
    }

    /// Check that every aggregate equals the sum of its leaves
    ///
    /// Compared at every timestamp where the aggregate and all of its leaves
    /// are observed.
    pub fn check_coherence(&self, table: &ObservationTable, tolerance: f64) -> Result<()> {
        let series = self.bottom_series(table)?;
        let observed = table.value_index();

        for node in 0..self.n_aggregate() {
            let name = self.nodes[node].as_str();
            for (ds, total) in self.summed(node, &series) {
                let Some(&value) = observed.get(&(name, ds)) else {
                    continue;
                };
                if (value - total).abs() > tolerance {
                    return Err(inconsistent(format!(
                        "'{}' at {} is {} but its leaves sum to {}",
                        name, ds, value, total
                    )));
                }
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn two_level() -> Hierarchy {
        Hierarchy::from_levels(vec![
            LevelSpec {
                name: "Total".to_string(),
                nodes: vec![NodeSpec::new("AB", vec!["A", "B"])],
            },
            LevelSpec {
                name: "Leaf".to_string(),
                nodes: vec![NodeSpec::leaf("A"), NodeSpec::leaf("B")],
            },
        ])
        .unwrap()
    }

    #[test]
    fn test_summing_matrix() {
        let h = two_level();
        assert_eq!(h.n_nodes(), 3);
        assert_eq!(h.n_bottom(), 2);
        let s = h.summing_matrix();
        assert_eq!(s.row(0), &[1.0, 1.0]);
        assert_eq!(s.row(1), &[1.0, 0.0]);
        assert_eq!(s.row(2), &[0.0, 1.0]);
        assert_eq!(h.leaves(0), &[0, 1]);
        assert_eq!(h.top_nodes(), &[0]);
    }

    #[test]
    fn test_rejects_two_parents() {
        let result = Hierarchy::from_levels(vec![
            LevelSpec {
                name: "Top".to_string(),
                nodes: vec![NodeSpec::new("X", vec!["A"]), NodeSpec::new("Y", vec!["A", "B"])],
            },
            LevelSpec {
                name: "Leaf".to_string(),
                nodes: vec![NodeSpec::leaf("A"), NodeSpec::leaf("B")],
            },
        ]);
        assert!(matches!(result, Err(ForecastError::InconsistentHierarchy(_))));
    }

    #[test]
    fn test_rejects_orphan() {
        let result = Hierarchy::from_levels(vec![
            LevelSpec {
                name: "Top".to_string(),
                nodes: vec![NodeSpec::new("X", vec!["A"])],
            },
            LevelSpec {
                name: "Leaf".to_string(),
                nodes: vec![NodeSpec::leaf("A"), NodeSpec::leaf("B")],
            },
        ]);
        assert!(matches!(result, Err(ForecastError::InconsistentHierarchy(_))));
    }

    #[test]
    fn test_spec_roundtrip() {
        let h = two_level();
        let rebuilt = Hierarchy::from_spec(h.spec()).unwrap();
        assert_eq!(rebuilt.nodes(), h.nodes());
        assert_eq!(rebuilt.summing_matrix(), h.summing_matrix());
    }
}
