//! Species topology: layered rows, a flat sorted edge array, and the
//! row plan the evaluator sweeps.
//!
//! A genome is immutable while a generation is being evaluated. Structural
//! edits go through [`Genome::apply_edge_edit`], which re-sorts the edge
//! array, rebuilds the row plan and reachability flags, and hands back a
//! weight-slot remap so every individual's parameter arrays stay coherent
//! with the new edge order.

pub mod builder;
pub mod validate;

use serde::{Deserialize, Serialize};

use crate::activations::Activation;

/// Row kind. Edges always point from a lower row to a higher row, and
/// never into an input row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RowKind {
    Input,
    Hidden,
    Output,
}

/// A horizontal layer of nodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Row {
    pub kind: RowKind,
    pub node_start: u32,
    pub node_count: u32,
}

/// Directed edge between two nodes, identified by global node index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Edge {
    pub source: u32,
    pub dest: u32,
}

/// Per-row index ranges into the flat node and edge arrays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RowPlan {
    pub node_start: u32,
    pub node_count: u32,
    pub edge_start: u32,
    pub edge_count: u32,
}

/// Where the weight for an edge slot comes from after a structural edit.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum WeightSource {
    /// Carry the weight from this index of the pre-edit weight array.
    Old(u32),
    /// Draw a fresh value from the species init distribution.
    Fresh,
    /// Use this exact value (edge-split secondary edges carry 1.0).
    Exact(f32),
}

/// Fixed per-species topology shared by all of its individuals.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Genome {
    rows: Vec<Row>,
    /// Sorted by `(row(dest), dest)`; ties keep insertion order.
    edges: Vec<Edge>,
    row_plan: Vec<RowPlan>,
    /// Row index of every node.
    node_row: Vec<u32>,
    /// Allowed activations per row. Empty for the input row.
    row_vocab: Vec<Vec<Activation>>,
    /// Nodes with a path from some input node. Non-input nodes outside
    /// this set evaluate to zero.
    input_reachable: Vec<bool>,
    max_in_degree: u32,
}

impl Genome {
    pub(crate) fn assemble(
        rows: Vec<Row>,
        edges: Vec<Edge>,
        row_vocab: Vec<Vec<Activation>>,
        max_in_degree: u32,
    ) -> Self {
        let node_count: u32 = rows.iter().map(|r| r.node_count).sum();
        let mut node_row = vec![0u32; node_count as usize];
        for (ri, row) in rows.iter().enumerate() {
            for n in row.node_start..row.node_start + row.node_count {
                node_row[n as usize] = ri as u32;
            }
        }
        let mut genome = Self {
            rows,
            edges,
            row_plan: Vec::new(),
            node_row,
            row_vocab,
            input_reachable: Vec::new(),
            max_in_degree,
        };
        genome.sort_edges();
        genome.rebuild_plan();
        genome
    }

    pub fn rows(&self) -> &[Row] {
        &self.rows
    }

    pub fn edges(&self) -> &[Edge] {
        &self.edges
    }

    pub fn row_plan(&self) -> &[RowPlan] {
        &self.row_plan
    }

    pub fn max_in_degree(&self) -> u32 {
        self.max_in_degree
    }

    pub fn node_count(&self) -> usize {
        self.node_row.len()
    }

    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }

    pub fn input_count(&self) -> usize {
        self.rows[0].node_count as usize
    }

    pub fn output_count(&self) -> usize {
        self.rows[self.rows.len() - 1].node_count as usize
    }

    pub fn row_of(&self, node: u32) -> u32 {
        self.node_row[node as usize]
    }

    pub fn row_kind(&self, node: u32) -> RowKind {
        self.rows[self.row_of(node) as usize].kind
    }

    /// Allowed activation set for a node. Empty for input nodes.
    pub fn allowed_for(&self, node: u32) -> &[Activation] {
        &self.row_vocab[self.row_of(node) as usize]
    }

    /// Per-row activation vocabulary, aligned with `rows()`.
    pub fn row_vocab(&self) -> &[Vec<Activation>] {
        &self.row_vocab
    }

    pub fn is_input_reachable(&self, node: u32) -> bool {
        self.input_reachable[node as usize]
    }

    /// In-degree of a node, via the sorted edge array.
    pub fn in_degree(&self, node: u32) -> usize {
        self.in_edge_range(node).len()
    }

    /// Index range of the in-edges of `node` within the edge array.
    pub fn in_edge_range(&self, node: u32) -> std::ops::Range<usize> {
        let key = (self.row_of(node), node);
        let start = self
            .edges
            .partition_point(|e| (self.row_of(e.dest), e.dest) < key);
        let end = self
            .edges
            .partition_point(|e| (self.row_of(e.dest), e.dest) <= key);
        start..end
    }

    pub fn contains_edge(&self, source: u32, dest: u32) -> bool {
        self.in_edge_range(dest)
            .any(|i| self.edges[i].source == source)
    }

    /// In-degrees of every node in one pass.
    pub fn in_degrees(&self) -> Vec<u32> {
        let mut deg = vec![0u32; self.node_count()];
        for e in &self.edges {
            deg[e.dest as usize] += 1;
        }
        deg
    }

    /// All outputs have a path back to an input (soft invariant 3).
    pub fn outputs_all_reachable(&self) -> bool {
        let last = &self.rows[self.rows.len() - 1];
        (last.node_start..last.node_start + last.node_count)
            .all(|n| self.input_reachable[n as usize])
    }

    /// Replace the edge array wholesale. Sorts, rebuilds the row plan and
    /// reachability, and returns the weight sources in final edge order so
    /// callers can splice every individual's weight array.
    pub(crate) fn apply_edge_edit(
        &mut self,
        edit: Vec<(Edge, WeightSource)>,
    ) -> Vec<WeightSource> {
        let mut tagged = edit;
        tagged.sort_by_key(|(e, _)| (self.node_row[e.dest as usize], e.dest));
        self.edges = tagged.iter().map(|(e, _)| *e).collect();
        self.rebuild_plan();
        tagged.into_iter().map(|(_, s)| s).collect()
    }

    /// Current edges tagged with their own indices, the starting point for
    /// building a structural edit.
    pub(crate) fn edit_base(&self) -> Vec<(Edge, WeightSource)> {
        self.edges
            .iter()
            .enumerate()
            .map(|(i, e)| (*e, WeightSource::Old(i as u32)))
            .collect()
    }

    fn sort_edges(&mut self) {
        let node_row = std::mem::take(&mut self.node_row);
        self.edges
            .sort_by_key(|e| (node_row[e.dest as usize], e.dest));
        self.node_row = node_row;
    }

    fn rebuild_plan(&mut self) {
        let mut plan = Vec::with_capacity(self.rows.len());
        let mut cursor = 0usize;
        for (ri, row) in self.rows.iter().enumerate() {
            let edge_start = cursor;
            while cursor < self.edges.len()
                && self.node_row[self.edges[cursor].dest as usize] as usize == ri
            {
                cursor += 1;
            }
            plan.push(RowPlan {
                node_start: row.node_start,
                node_count: row.node_count,
                edge_start: edge_start as u32,
                edge_count: (cursor - edge_start) as u32,
            });
        }
        self.row_plan = plan;
        self.recompute_reachability();
    }

    /// Forward sweep over the sorted edge array: a node is reachable when
    /// it is an input node or has an in-edge from a reachable node. Rows
    /// are visited in order, so sources are always finalized first.
    fn recompute_reachability(&mut self) {
        let mut reachable = vec![false; self.node_count()];
        let input = &self.rows[0];
        for n in input.node_start..input.node_start + input.node_count {
            reachable[n as usize] = true;
        }
        for e in &self.edges {
            if reachable[e.source as usize] {
                reachable[e.dest as usize] = true;
            }
        }
        self.input_reachable = reachable;
    }

    /// Topology equality for degenerate-species detection: same rows and
    /// the same sorted edge array.
    pub fn same_topology(&self, other: &Genome) -> bool {
        self.rows == other.rows && self.edges == other.edges
    }

    /// Fan-in / fan-out of a destination node, for per-node weight init.
    pub fn fan(&self, dest: u32) -> (usize, usize) {
        let fan_in = self.in_degree(dest);
        let fan_out = self.edges.iter().filter(|e| e.source == dest).count();
        (fan_in, fan_out)
    }
}
