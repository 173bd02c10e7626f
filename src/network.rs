//! Row-sweep forward evaluator.
//!
//! Executes one individual of a species over its genome's row plan: zero
//! the scratch array, copy the input row, then for each later row
//! accumulate the row's contiguous in-edge range, add biases, and apply
//! the chosen activations. Output nodes with no path back to an input are
//! forced to zero.

use ndarray::Array1;

use crate::genome::{Genome, RowKind};
use crate::individual::Individual;

/// Reusable per-worker scratch buffer; avoids allocating one node array
/// per forward pass inside episode loops.
#[derive(Debug, Clone)]
pub struct Scratch {
    z: Array1<f32>,
}

impl Scratch {
    pub fn for_genome(genome: &Genome) -> Self {
        Self {
            z: Array1::zeros(genome.node_count()),
        }
    }

    fn reset(&mut self, node_count: usize) {
        if self.z.len() != node_count {
            self.z = Array1::zeros(node_count);
        } else {
            self.z.fill(0.0);
        }
    }
}

/// Evaluate `individual` on `input`, writing the output row into `output`.
///
/// `input` must have the genome's input-row length and `output` the
/// output-row length; the runner guarantees both.
pub fn forward(
    genome: &Genome,
    individual: &Individual,
    input: &[f32],
    scratch: &mut Scratch,
    output: &mut [f32],
) {
    debug_assert_eq!(input.len(), genome.input_count());
    debug_assert_eq!(output.len(), genome.output_count());
    debug_assert_eq!(individual.weights.len(), genome.edge_count());

    scratch.reset(genome.node_count());
    let z = &mut scratch.z;

    let plan = genome.row_plan();
    let rows = genome.rows();
    let edges = genome.edges();

    for (i, &x) in input.iter().enumerate() {
        z[plan[0].node_start as usize + i] = x;
    }

    for (ri, row) in plan.iter().enumerate().skip(1) {
        let span = row.edge_start as usize..(row.edge_start + row.edge_count) as usize;
        for (offset, e) in edges[span].iter().enumerate() {
            let w = individual.weights[row.edge_start as usize + offset];
            z[e.dest as usize] += w * z[e.source as usize];
        }
        debug_assert_ne!(rows[ri].kind, RowKind::Input);
        for n in row.node_start..row.node_start + row.node_count {
            let ni = n as usize;
            if !genome.is_input_reachable(n) {
                z[ni] = 0.0;
                continue;
            }
            let pre = z[ni] + individual.biases[ni];
            z[ni] = individual.activations[ni].apply(pre, individual.params_of(n));
        }
    }

    let last = plan[plan.len() - 1];
    for (i, y) in output.iter_mut().enumerate() {
        *y = z[last.node_start as usize + i];
    }
}

/// Allocating convenience wrapper.
pub fn forward_alloc(genome: &Genome, individual: &Individual, input: &[f32]) -> Vec<f32> {
    let mut scratch = Scratch::for_genome(genome);
    let mut output = vec![0.0; genome.output_count()];
    forward(genome, individual, input, &mut scratch, &mut output);
    output
}
