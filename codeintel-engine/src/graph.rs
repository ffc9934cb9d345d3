//! In-memory reference graph built from stored symbols and reference edges,
//! used by the Query Pipeline's structural candidate-generation stage.
//!
//! Grounded on the teacher's `graph.rs` (`CodeGraph` with forward/reverse
//! `by_source`/`by_target` indices over `Vec<CodeEdge>`), re-keyed from
//! file-to-file edges to symbol-to-symbol edges since the data model here
//! resolves references down to `symbol_id`, not just the owning file.

use std::collections::HashMap;

use crate::types::{EdgeKind, ReferenceEdge, ReferenceTarget};

/// Structural graph over resolved symbol references, with forward
/// (`callers of` is the reverse) and reverse indices for one-hop traversal.
pub struct CodeGraph {
    edges: Vec<ReferenceEdge>,
    by_source: HashMap<String, Vec<usize>>,
    by_target: HashMap<String, Vec<usize>>,
}

impl Default for CodeGraph {
    fn default() -> Self {
        Self::new()
    }
}

impl CodeGraph {
    pub fn new() -> Self {
        Self { edges: Vec::new(), by_source: HashMap::new(), by_target: HashMap::new() }
    }

    /// Builds the graph from every reference edge in the store. Unresolved
    /// targets (callee names the facade couldn't bind to a `symbol_id`) are
    /// kept in `edges` but excluded from `by_target`, since there's no
    /// target symbol to index them under.
    pub fn build(edges: Vec<ReferenceEdge>) -> Self {
        let mut graph = Self::new();
        for edge in edges {
            graph.push(edge);
        }
        graph
    }

    fn push(&mut self, edge: ReferenceEdge) {
        let idx = self.edges.len();
        self.by_source.entry(edge.from_symbol_id.clone()).or_default().push(idx);
        if let ReferenceTarget::Symbol(to_id) = &edge.to {
            self.by_target.entry(to_id.clone()).or_default().push(idx);
        }
        self.edges.push(edge);
    }

    /// Edges originating at `symbol_id` (what it calls/references),
    /// optionally filtered by kind.
    pub fn edges_from(&self, symbol_id: &str, kind: Option<EdgeKind>) -> Vec<&ReferenceEdge> {
        self.by_source
            .get(symbol_id)
            .map(|indices| indices.iter().filter_map(|&i| self.filtered(i, kind)).collect())
            .unwrap_or_default()
    }

    /// Edges terminating at `symbol_id` (its callers), optionally filtered
    /// by kind.
    pub fn edges_to(&self, symbol_id: &str, kind: Option<EdgeKind>) -> Vec<&ReferenceEdge> {
        self.by_target
            .get(symbol_id)
            .map(|indices| indices.iter().filter_map(|&i| self.filtered(i, kind)).collect())
            .unwrap_or_default()
    }

    fn filtered(&self, idx: usize, kind: Option<EdgeKind>) -> Option<&ReferenceEdge> {
        let edge = &self.edges[idx];
        if kind.is_none() || Some(edge.kind) == kind {
            Some(edge)
        } else {
            None
        }
    }

    /// One-hop structural neighborhood of `symbol_id`: callers plus callees,
    /// deduplicated, used to seed the query pipeline's structural candidate
    /// set (spec §4.7 stage 3).
    pub fn neighbors(&self, symbol_id: &str) -> Vec<String> {
        let mut seen = Vec::new();
        for edge in self.edges_from(symbol_id, None) {
            if let ReferenceTarget::Symbol(id) = &edge.to {
                if !seen.contains(id) {
                    seen.push(id.clone());
                }
            }
        }
        for edge in self.edges_to(symbol_id, None) {
            if !seen.contains(&edge.from_symbol_id) {
                seen.push(edge.from_symbol_id.clone());
            }
        }
        seen
    }

    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn edge(from: &str, to: ReferenceTarget, kind: EdgeKind) -> ReferenceEdge {
        ReferenceEdge { from_symbol_id: from.to_string(), to, kind, file_path: "a.rs".to_string(), line: 1 }
    }

    #[test]
    fn edges_from_filters_by_kind() {
        let graph = CodeGraph::build(vec![
            edge("a", ReferenceTarget::Symbol("b".to_string()), EdgeKind::Calls),
            edge("a", ReferenceTarget::Symbol("c".to_string()), EdgeKind::References),
        ]);
        let calls = graph.edges_from("a", Some(EdgeKind::Calls));
        assert_eq!(calls.len(), 1);
    }

    #[test]
    fn edges_to_resolves_callers() {
        let graph = CodeGraph::build(vec![edge("a", ReferenceTarget::Symbol("b".to_string()), EdgeKind::Calls)]);
        let callers = graph.edges_to("b", None);
        assert_eq!(callers.len(), 1);
        assert_eq!(callers[0].from_symbol_id, "a");
    }

    #[test]
    fn unresolved_targets_are_not_indexed_by_target() {
        let graph = CodeGraph::build(vec![edge("a", ReferenceTarget::Unresolved("mystery".to_string()), EdgeKind::Calls)]);
        assert!(graph.edges_to("mystery", None).is_empty());
        assert_eq!(graph.edge_count(), 1);
    }

    #[test]
    fn neighbors_combines_callers_and_callees() {
        let graph = CodeGraph::build(vec![
            edge("a", ReferenceTarget::Symbol("b".to_string()), EdgeKind::Calls),
            edge("c", ReferenceTarget::Symbol("a".to_string()), EdgeKind::Calls),
        ]);
        let neighbors = graph.neighbors("a");
        assert!(neighbors.contains(&"b".to_string()));
        assert!(neighbors.contains(&"c".to_string()));
    }
}
