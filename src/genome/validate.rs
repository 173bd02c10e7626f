//! Invariant checks for built and mutated topologies.
//!
//! Structural operators construct edits that are legal by construction;
//! these checks are the backstop. Debug builds assert, release builds let
//! the caller roll the edit back.

use std::collections::HashSet;

use crate::errors::{EvoError, EvoResult};
use crate::genome::{Genome, RowKind};
use crate::individual::Individual;

fn violation(invariant: &'static str) -> EvoError {
    EvoError::InvariantViolation { invariant }
}

/// Check the purely topological invariants: acyclicity, in-degree bound,
/// edge uniqueness, sortedness, and row-plan consistency.
pub fn validate_genome(genome: &Genome) -> EvoResult<()> {
    // Acyclicity: strict feed-forward, and no edge lands on an input node.
    for e in genome.edges() {
        if genome.row_of(e.source) >= genome.row_of(e.dest) {
            return Err(violation("acyclicity"));
        }
        if genome.row_kind(e.dest) == RowKind::Input {
            return Err(violation("input_rows_are_inert"));
        }
    }

    // In-degree bound.
    let degrees = genome.in_degrees();
    for (node, &deg) in degrees.iter().enumerate() {
        if genome.row_kind(node as u32) != RowKind::Input && deg > genome.max_in_degree() {
            return Err(violation("in_degree_bound"));
        }
    }

    // Edge uniqueness.
    let mut seen = HashSet::with_capacity(genome.edge_count());
    for e in genome.edges() {
        if !seen.insert((e.source, e.dest)) {
            return Err(violation("edge_uniqueness"));
        }
    }

    // Sortedness by (row(dest), dest).
    let sorted = genome
        .edges()
        .windows(2)
        .all(|w| (genome.row_of(w[0].dest), w[0].dest) <= (genome.row_of(w[1].dest), w[1].dest));
    if !sorted {
        return Err(violation("edge_array_sortedness"));
    }

    // Row plan covers the edge array exactly, in row order.
    let mut cursor = 0u32;
    for (ri, plan) in genome.row_plan().iter().enumerate() {
        if plan.edge_start != cursor {
            return Err(violation("row_plan_consistency"));
        }
        let span = plan.edge_start as usize..(plan.edge_start + plan.edge_count) as usize;
        for e in &genome.edges()[span] {
            if genome.row_of(e.dest) as usize != ri {
                return Err(violation("row_plan_consistency"));
            }
        }
        cursor += plan.edge_count;
    }
    if cursor as usize != genome.edge_count() {
        return Err(violation("row_plan_consistency"));
    }

    Ok(())
}

/// Check parameter-topology coherence of one individual against its
/// species genome (array lengths and activation membership).
pub fn validate_coherence(genome: &Genome, individual: &Individual) -> EvoResult<()> {
    if individual.weights.len() != genome.edge_count() {
        return Err(violation("weights_match_edges"));
    }
    if individual.biases.len() != genome.node_count() {
        return Err(violation("biases_match_nodes"));
    }
    if individual.activations.len() != genome.node_count() {
        return Err(violation("activations_match_nodes"));
    }
    if individual.node_params.len() != genome.node_count() * crate::activations::NODE_PARAM_SLOTS {
        return Err(violation("node_params_match_nodes"));
    }
    for (node, act) in individual.activations.iter().enumerate() {
        let node = node as u32;
        if genome.row_kind(node) == RowKind::Input {
            continue;
        }
        if !genome.allowed_for(node).contains(act) {
            return Err(violation("activation_in_allowed_set"));
        }
    }
    Ok(())
}
