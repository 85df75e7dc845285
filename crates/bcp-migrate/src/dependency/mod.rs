//! Table dependency resolution.
//!
//! Computes a processing order in which every referenced table comes before
//! the tables that reference it. Foreign key cycles are broken by dropping one
//! edge per detected cycle (the back edge found by a depth-first search), so
//! resolution never fails because of a cycle.
//!
//! The edge-breaking rule is a heuristic: with overlapping cycles it does not
//! necessarily remove the smallest possible set of edges. It only guarantees
//! termination and an order that honors every edge that was kept.

use std::collections::{BTreeSet, HashMap};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::core::schema::{DependencyEdge, TableId};
use crate::error::{MigrateError, Result};

/// Output of [`resolve`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resolution {
    /// Tables in processing order (referenced tables first).
    pub order: Vec<TableId>,

    /// Edges removed to break cycles, one per detected cycle.
    pub broken_edges: Vec<DependencyEdge>,
}

impl Resolution {
    pub fn has_cycles(&self) -> bool {
        !self.broken_edges.is_empty()
    }
}

/// Visit state of a node during the cycle-detection pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mark {
    Unvisited,
    InProgress,
    Done,
}

/// Dependency graph restricted to the selected tables.
///
/// Nodes are addressed by their index in the input slice; adjacency lists
/// hold the indices of referenced tables in ascending order, which makes both
/// passes deterministic.
#[derive(Debug)]
pub struct DependencyGraph {
    tables: Vec<TableId>,
    node_indices: HashMap<TableId, usize>,
    depends_on: Vec<BTreeSet<usize>>,
}

impl DependencyGraph {
    /// Build the graph. Fails on an empty or duplicated selection.
    pub fn new(tables: &[TableId], edges: &[DependencyEdge]) -> Result<Self> {
        if tables.is_empty() {
            return Err(MigrateError::Config(
                "No tables selected for migration".into(),
            ));
        }

        let mut node_indices = HashMap::with_capacity(tables.len());
        for (idx, table) in tables.iter().enumerate() {
            if node_indices.insert(table.clone(), idx).is_some() {
                return Err(MigrateError::Config(format!(
                    "Table {} is selected more than once",
                    table
                )));
            }
        }

        let mut depends_on = vec![BTreeSet::new(); tables.len()];
        for edge in edges {
            let (Some(&from), Some(&to)) = (
                node_indices.get(&edge.dependent),
                node_indices.get(&edge.referenced),
            ) else {
                continue;
            };
            if from == to {
                debug!("{}: ignoring self-referencing foreign key", edge.dependent);
                continue;
            }
            depends_on[from].insert(to);
        }

        Ok(Self {
            tables: tables.to_vec(),
            node_indices,
            depends_on,
        })
    }

    /// Number of distinct in-scope edges.
    pub fn edge_count(&self) -> usize {
        self.depends_on.iter().map(BTreeSet::len).sum()
    }

    /// Tables `table` depends on, in input order.
    #[cfg(test)]
    pub fn dependencies_of(&self, table: &TableId) -> Vec<&TableId> {
        self.node_indices
            .get(table)
            .map(|&idx| self.depends_on[idx].iter().map(|&d| &self.tables[d]).collect())
            .unwrap_or_default()
    }

    /// Depth-first search with an explicit stack; returns the back edges,
    /// each of which closes exactly one detected cycle.
    fn find_back_edges(&self) -> Vec<(usize, usize)> {
        let mut marks = vec![Mark::Unvisited; self.tables.len()];
        let mut back_edges = Vec::new();

        for root in 0..self.tables.len() {
            if marks[root] != Mark::Unvisited {
                continue;
            }

            // (node, children not yet explored)
            let mut stack: Vec<(usize, Vec<usize>)> = Vec::new();
            marks[root] = Mark::InProgress;
            stack.push((root, self.children(root)));

            while let Some((node, pending)) = stack.last_mut() {
                let node = *node;
                match pending.pop() {
                    Some(child) => match marks[child] {
                        Mark::Unvisited => {
                            marks[child] = Mark::InProgress;
                            stack.push((child, self.children(child)));
                        }
                        Mark::InProgress => back_edges.push((node, child)),
                        Mark::Done => {}
                    },
                    None => {
                        marks[node] = Mark::Done;
                        stack.pop();
                    }
                }
            }
        }

        back_edges
    }

    /// Children in reverse order so that `Vec::pop` yields ascending indices.
    fn children(&self, node: usize) -> Vec<usize> {
        self.depends_on[node].iter().rev().copied().collect()
    }

    /// Kahn's algorithm; the ready set is ordered by input index.
    fn topological_order(&self) -> Result<Vec<usize>> {
        let n = self.tables.len();
        let mut remaining: Vec<usize> = self.depends_on.iter().map(BTreeSet::len).collect();
        let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); n];
        for (from, targets) in self.depends_on.iter().enumerate() {
            for &to in targets {
                dependents[to].push(from);
            }
        }

        let mut ready: BTreeSet<usize> = (0..n).filter(|&i| remaining[i] == 0).collect();
        let mut order = Vec::with_capacity(n);

        while let Some(next) = ready.pop_first() {
            order.push(next);
            for &dependent in &dependents[next] {
                remaining[dependent] -= 1;
                if remaining[dependent] == 0 {
                    ready.insert(dependent);
                }
            }
        }

        if order.len() != n {
            return Err(MigrateError::Config(format!(
                "Dependency graph still cyclic after breaking cycles ({} of {} tables ordered)",
                order.len(),
                n
            )));
        }

        Ok(order)
    }
}

/// Resolve a safe processing order for `tables`.
///
/// Edges whose endpoints are not both in `tables` are ignored, duplicates
/// collapse, and self references are dropped. Returns a configuration error
/// only for an empty or duplicated selection.
pub fn resolve(tables: &[TableId], edges: &[DependencyEdge]) -> Result<Resolution> {
    let mut graph = DependencyGraph::new(tables, edges)?;
    debug!(
        "Resolving load order for {} tables over {} edges",
        tables.len(),
        graph.edge_count()
    );

    let back_edges = graph.find_back_edges();
    let mut broken_edges = Vec::with_capacity(back_edges.len());
    for (from, to) in back_edges {
        graph.depends_on[from].remove(&to);
        let edge = DependencyEdge::new(graph.tables[from].clone(), graph.tables[to].clone());
        warn!("Dependency cycle detected, breaking edge {}", edge);
        broken_edges.push(edge);
    }

    let order = graph
        .topological_order()?
        .into_iter()
        .map(|idx| graph.tables[idx].clone())
        .collect();

    Ok(Resolution {
        order,
        broken_edges,
    })
}
