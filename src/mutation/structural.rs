//! Structural (topology-altering) mutation operators.
//!
//! The topology is owned by the species and shared by every member, so
//! these operators run at species scope between generations: each edit
//! mutates the genome once and splices every member's weight array in the
//! same motion. Edits are built against a copy of the genome and committed
//! only after the invariant validator passes; a failed edit is dropped
//! without touching the species (copy-on-write rollback).

use rand::seq::SliceRandom;
use rand::Rng;
use tracing::debug;

use crate::config::StructuralRates;
use crate::genome::validate::validate_genome;
use crate::genome::{Edge, Genome, RowKind, WeightSource};
use crate::individual::Individual;
use crate::init::{node_fans, WeightInitializer};

/// Bounded candidate search per operator roll; exhaustion is a no-op.
pub const STRUCTURAL_ATTEMPTS: usize = 16;

/// Validate and commit an edit, remapping every member's weights.
fn commit_edit<R: Rng>(
    genome: &mut Genome,
    members: &mut [Individual],
    init: &WeightInitializer,
    rng: &mut R,
    edit: Vec<(Edge, WeightSource)>,
) -> bool {
    let mut candidate = genome.clone();
    let sources = candidate.apply_edge_edit(edit);
    if let Err(err) = validate_genome(&candidate) {
        debug_assert!(false, "structural edit rejected: {err}");
        debug!(error = %err, "rolling back structural edit");
        return false;
    }
    let fans = node_fans(&candidate);
    for member in members.iter_mut() {
        member.remap_weights(&sources, |slot| {
            let dest = candidate.edges()[slot].dest;
            let (fan_in, fan_out) = fans[dest as usize];
            init.sample(fan_in, fan_out, rng)
        });
        member.fitness = f32::NEG_INFINITY;
    }
    *genome = candidate;
    true
}

fn random_non_input_node<R: Rng>(genome: &Genome, rng: &mut R) -> u32 {
    let first = genome.rows()[1].node_start;
    rng.gen_range(first..genome.node_count() as u32)
}

/// Insert a new edge `(u, v)` with `row(u) < row(v)`, `v` non-input,
/// unique, and within the in-degree bound. Fresh weight from init.
pub fn edge_add<R: Rng>(
    genome: &mut Genome,
    members: &mut [Individual],
    init: &WeightInitializer,
    rng: &mut R,
) -> bool {
    for _ in 0..STRUCTURAL_ATTEMPTS {
        let dest = random_non_input_node(genome, rng);
        if genome.in_degree(dest) >= genome.max_in_degree() as usize {
            continue;
        }
        let row_start = genome.rows()[genome.row_of(dest) as usize].node_start;
        let source = rng.gen_range(0..row_start);
        if genome.contains_edge(source, dest) {
            continue;
        }
        let mut edit = genome.edit_base();
        edit.push((Edge { source, dest }, WeightSource::Fresh));
        return commit_edit(genome, members, init, rng, edit);
    }
    false
}

/// Remove a random edge. Soft rule: never drop an output node below one
/// in-edge.
pub fn edge_delete<R: Rng>(
    genome: &mut Genome,
    members: &mut [Individual],
    init: &WeightInitializer,
    rng: &mut R,
) -> bool {
    if genome.edge_count() == 0 {
        return false;
    }
    for _ in 0..STRUCTURAL_ATTEMPTS {
        let idx = rng.gen_range(0..genome.edge_count());
        let edge = genome.edges()[idx];
        if genome.row_kind(edge.dest) == RowKind::Output && genome.in_degree(edge.dest) <= 1 {
            continue;
        }
        let mut edit = genome.edit_base();
        edit.remove(idx);
        return commit_edit(genome, members, init, rng, edit);
    }
    false
}

/// Replace `(u, v)` with `(u, m)` and `(m, v)` through an intermediate
/// hidden node. The first edge carries the old weight, the second is
/// exactly 1.0, so a split through an identity node preserves behavior.
pub fn edge_split<R: Rng>(
    genome: &mut Genome,
    members: &mut [Individual],
    init: &WeightInitializer,
    rng: &mut R,
) -> bool {
    if genome.edge_count() == 0 {
        return false;
    }
    for _ in 0..STRUCTURAL_ATTEMPTS {
        let idx = rng.gen_range(0..genome.edge_count());
        let Edge { source, dest } = genome.edges()[idx];
        let (lo, hi) = (genome.row_of(source), genome.row_of(dest));
        if hi - lo < 2 {
            continue;
        }
        let mids: Vec<u32> = (0..genome.node_count() as u32)
            .filter(|&m| {
                let r = genome.row_of(m);
                r > lo
                    && r < hi
                    && genome.row_kind(m) == RowKind::Hidden
                    && !genome.contains_edge(source, m)
                    && !genome.contains_edge(m, dest)
                    && genome.in_degree(m) < genome.max_in_degree() as usize
            })
            .collect();
        let Some(&mid) = mids.choose(rng) else {
            continue;
        };
        let mut edit = genome.edit_base();
        edit.remove(idx);
        edit.push((Edge { source, dest: mid }, WeightSource::Old(idx as u32)));
        edit.push((Edge { source: mid, dest }, WeightSource::Exact(1.0)));
        return commit_edit(genome, members, init, rng, edit);
    }
    false
}

/// Re-point one endpoint of a random edge at a different legal node,
/// carrying the weight.
pub fn edge_redirect<R: Rng>(
    genome: &mut Genome,
    members: &mut [Individual],
    init: &WeightInitializer,
    rng: &mut R,
) -> bool {
    if genome.edge_count() == 0 {
        return false;
    }
    for _ in 0..STRUCTURAL_ATTEMPTS {
        let idx = rng.gen_range(0..genome.edge_count());
        let Edge { source, dest } = genome.edges()[idx];
        let replaced = if rng.gen::<bool>() {
            // New destination.
            let candidates: Vec<u32> = (0..genome.node_count() as u32)
                .filter(|&v| {
                    v != dest
                        && genome.row_kind(v) != RowKind::Input
                        && genome.row_of(v) > genome.row_of(source)
                        && !genome.contains_edge(source, v)
                        && genome.in_degree(v) < genome.max_in_degree() as usize
                })
                .collect();
            candidates.choose(rng).map(|&v| Edge { source, dest: v })
        } else {
            // New source.
            let candidates: Vec<u32> = (0..genome.node_count() as u32)
                .filter(|&u| {
                    u != source
                        && genome.row_of(u) < genome.row_of(dest)
                        && !genome.contains_edge(u, dest)
                })
                .collect();
            candidates.choose(rng).map(|&u| Edge { source: u, dest })
        };
        let Some(next) = replaced else {
            continue;
        };
        let mut edit = genome.edit_base();
        edit[idx] = (next, WeightSource::Old(idx as u32));
        return commit_edit(genome, members, init, rng, edit);
    }
    false
}

/// Swap the destinations (or sources) of two random edges, weights
/// traveling with their original slots.
pub fn edge_swap<R: Rng>(
    genome: &mut Genome,
    members: &mut [Individual],
    init: &WeightInitializer,
    rng: &mut R,
) -> bool {
    if genome.edge_count() < 2 {
        return false;
    }
    for _ in 0..STRUCTURAL_ATTEMPTS {
        let i = rng.gen_range(0..genome.edge_count());
        let j = rng.gen_range(0..genome.edge_count());
        if i == j {
            continue;
        }
        let a = genome.edges()[i];
        let b = genome.edges()[j];
        let (next_a, next_b) = if rng.gen::<bool>() {
            if a.dest == b.dest {
                continue;
            }
            (
                Edge { source: a.source, dest: b.dest },
                Edge { source: b.source, dest: a.dest },
            )
        } else {
            if a.source == b.source {
                continue;
            }
            (
                Edge { source: b.source, dest: a.dest },
                Edge { source: a.source, dest: b.dest },
            )
        };
        let legal = genome.row_of(next_a.source) < genome.row_of(next_a.dest)
            && genome.row_of(next_b.source) < genome.row_of(next_b.dest)
            && next_a != next_b
            && !edge_exists_excluding(genome, next_a, i, j)
            && !edge_exists_excluding(genome, next_b, i, j);
        if !legal {
            continue;
        }
        let mut edit = genome.edit_base();
        edit[i] = (next_a, WeightSource::Old(i as u32));
        edit[j] = (next_b, WeightSource::Old(j as u32));
        return commit_edit(genome, members, init, rng, edit);
    }
    false
}

fn edge_exists_excluding(genome: &Genome, probe: Edge, skip_a: usize, skip_b: usize) -> bool {
    genome
        .edges()
        .iter()
        .enumerate()
        .any(|(k, e)| k != skip_a && k != skip_b && *e == probe)
}

/// Full weak-edge scan: delete every edge whose mean `|w|` across members
/// is below the threshold, except an output node's last (strongest)
/// in-edge.
pub fn prune_weak_edges<R: Rng>(
    genome: &mut Genome,
    members: &mut [Individual],
    init: &WeightInitializer,
    threshold: f32,
    rng: &mut R,
) -> usize {
    if genome.edge_count() == 0 || members.is_empty() {
        return 0;
    }
    let mean_abs: Vec<f32> = (0..genome.edge_count())
        .map(|slot| {
            members.iter().map(|m| m.weights[slot].abs()).sum::<f32>() / members.len() as f32
        })
        .collect();

    let mut doomed: Vec<bool> = mean_abs.iter().map(|&m| m < threshold).collect();

    // Keep the strongest in-edge of any output node that would be orphaned.
    for node in 0..genome.node_count() as u32 {
        if genome.row_kind(node) != RowKind::Output {
            continue;
        }
        let range = genome.in_edge_range(node);
        if range.is_empty() || !range.clone().all(|i| doomed[i]) {
            continue;
        }
        let strongest = range
            .clone()
            .max_by(|&a, &b| mean_abs[a].total_cmp(&mean_abs[b]))
            .expect("non-empty range");
        doomed[strongest] = false;
    }

    let removed = doomed.iter().filter(|d| **d).count();
    if removed == 0 {
        return 0;
    }
    let edit: Vec<(Edge, WeightSource)> = genome
        .edit_base()
        .into_iter()
        .enumerate()
        .filter(|(i, _)| !doomed[*i])
        .map(|(_, e)| e)
        .collect();
    if commit_edit(genome, members, init, rng, edit) {
        removed
    } else {
        0
    }
}

/// Roll every structural operator once for a species, pruning last so
/// freshly added edges get a grace generation. Returns the number of
/// accepted edits.
pub fn mutate_structure<R: Rng>(
    genome: &mut Genome,
    members: &mut [Individual],
    rates: &StructuralRates,
    init: &WeightInitializer,
    rng: &mut R,
) -> usize {
    let mut changes = 0;
    if rates.edge_add > 0.0 && rng.gen::<f32>() < rates.edge_add {
        changes += usize::from(edge_add(genome, members, init, rng));
    }
    if rates.edge_delete > 0.0 && rng.gen::<f32>() < rates.edge_delete {
        changes += usize::from(edge_delete(genome, members, init, rng));
    }
    if rates.edge_split > 0.0 && rng.gen::<f32>() < rates.edge_split {
        changes += usize::from(edge_split(genome, members, init, rng));
    }
    if rates.edge_redirect > 0.0 && rng.gen::<f32>() < rates.edge_redirect {
        changes += usize::from(edge_redirect(genome, members, init, rng));
    }
    if rates.edge_swap > 0.0 && rng.gen::<f32>() < rates.edge_swap {
        changes += usize::from(edge_swap(genome, members, init, rng));
    }
    if rates.pruning_enabled && rates.prune_scan > 0.0 && rng.gen::<f32>() < rates.prune_scan {
        let pruned = prune_weak_edges(genome, members, init, rates.prune_threshold, rng);
        changes += usize::from(pruned > 0);
    }
    changes
}

/// One uniformly chosen topology-altering operator (the diversification
/// set: add, split, redirect, swap; never plain deletion).
pub fn apply_random_topology_op<R: Rng>(
    genome: &mut Genome,
    members: &mut [Individual],
    init: &WeightInitializer,
    rng: &mut R,
) -> bool {
    match rng.gen_range(0..4) {
        0 => edge_add(genome, members, init, rng),
        1 => edge_split(genome, members, init, rng),
        2 => edge_redirect(genome, members, init, rng),
        _ => edge_swap(genome, members, init, rng),
    }
}
