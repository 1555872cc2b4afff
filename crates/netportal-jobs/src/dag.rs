//! Dependency graph over field keywords.
//!
//! The resolver orders fields with its own queue walk; this graph is
//! built only once that walk stalls, to name the fields that actually
//! form a cycle rather than every field left behind it.
//!
//! **Note:** This module is internal to `netportal-jobs`.

use std::collections::HashMap;
use std::fmt::Display;
use std::hash::Hash;

use petgraph::algo::tarjan_scc;
use petgraph::graph::{DiGraph, NodeIndex};

/// A directed graph with edges from parent to dependent.
#[derive(Debug, Clone)]
pub(crate) struct Dag<T>
where
    T: Clone + Eq + Hash + Display,
{
    graph: DiGraph<T, ()>,
    index_map: HashMap<T, NodeIndex>,
    insertion_order: Vec<NodeIndex>,
}

impl<T> Dag<T>
where
    T: Clone + Eq + Hash + Display,
{
    /// Creates a new empty graph.
    #[must_use]
    pub(crate) fn new() -> Self {
        Self {
            graph: DiGraph::new(),
            index_map: HashMap::new(),
            insertion_order: Vec::new(),
        }
    }

    /// Adds a node; adding an existing value returns its index.
    pub(crate) fn add_node(&mut self, value: T) -> NodeIndex {
        if let Some(&idx) = self.index_map.get(&value) {
            return idx;
        }
        let idx = self.graph.add_node(value.clone());
        self.index_map.insert(value, idx);
        self.insertion_order.push(idx);
        idx
    }

    /// Adds a directed edge from `from` to `to`.
    pub(crate) fn add_edge(&mut self, from: NodeIndex, to: NodeIndex) {
        self.graph.add_edge(from, to, ());
    }

    /// Returns every node that sits on a cycle, in insertion order.
    ///
    /// Strongly connected components with more than one member are cycles,
    /// as are single nodes with an edge to themselves.
    #[must_use]
    pub(crate) fn cycle_members(&self) -> Vec<T> {
        let mut on_cycle: Vec<NodeIndex> = tarjan_scc(&self.graph)
            .into_iter()
            .filter(|scc| match scc.as_slice() {
                [single] => self.graph.contains_edge(*single, *single),
                _ => true,
            })
            .flatten()
            .collect();

        on_cycle.sort_by_key(|n| {
            self.insertion_order
                .iter()
                .position(|i| i == n)
                .unwrap_or(usize::MAX)
        });

        on_cycle
            .into_iter()
            .filter_map(|idx| self.graph.node_weight(idx).cloned())
            .collect()
    }
}

impl<T> Default for Dag<T>
where
    T: Clone + Eq + Hash + Display,
{
    fn default() -> Self {
        Self::new()
    }
}
