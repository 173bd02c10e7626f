//! Per-individual parameter store.
//!
//! An individual owns flat Structure-of-Arrays parameter buffers indexed by
//! the species genome: one weight per edge (in sorted edge order), one bias
//! and one activation choice per node, and a fixed-arity parameter vector
//! per node. It refers to its species by id only.

use ndarray::Array1;
use rand::seq::SliceRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::activations::{Activation, NODE_PARAM_SLOTS};
use crate::genome::{Genome, RowKind, WeightSource};
use crate::init::{WeightInitializer, BIAS_INIT_BOUND};

/// Default node parameters for a freshly chosen activation.
pub fn default_node_params(activation: Activation) -> [f32; NODE_PARAM_SLOTS] {
    let mut params = [0.0; NODE_PARAM_SLOTS];
    match activation {
        Activation::LeakyRelu => params[0] = 0.01,
        Activation::Elu => params[0] = 1.0,
        _ => {}
    }
    params
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Individual {
    /// One weight per edge, in the genome's sorted edge order.
    pub weights: Array1<f32>,
    /// One bias per node; input-node slots exist but are never applied.
    pub biases: Array1<f32>,
    /// `node_count * NODE_PARAM_SLOTS` flat parameter array.
    pub node_params: Array1<f32>,
    /// Chosen activation per node, drawn from the node's allowed set.
    pub activations: Vec<Activation>,
    /// `NEG_INFINITY` until evaluated.
    pub fitness: f32,
    pub age: u32,
}

impl Individual {
    /// Fresh individual from the species init policy: factory weights,
    /// small uniform biases, uniformly chosen activations.
    pub fn random<R: Rng>(genome: &Genome, init: &WeightInitializer, rng: &mut R) -> Self {
        let node_count = genome.node_count();
        let weights = init.init_weights(genome, rng);
        let biases = Array1::from_iter(
            (0..node_count).map(|_| rng.gen_range(-BIAS_INIT_BOUND..=BIAS_INIT_BOUND)),
        );

        let mut activations = Vec::with_capacity(node_count);
        let mut node_params = Vec::with_capacity(node_count * NODE_PARAM_SLOTS);
        for node in 0..node_count as u32 {
            let act = if genome.row_kind(node) == RowKind::Input {
                Activation::Linear
            } else {
                *genome
                    .allowed_for(node)
                    .choose(rng)
                    .expect("builder rejects empty activation sets")
            };
            activations.push(act);
            node_params.extend_from_slice(&default_node_params(act));
        }

        Self {
            weights,
            biases,
            node_params: Array1::from(node_params),
            activations,
            fitness: f32::NEG_INFINITY,
            age: 0,
        }
    }

    pub fn is_evaluated(&self) -> bool {
        self.fitness > f32::NEG_INFINITY
    }

    /// Parameter slice of one node.
    #[inline]
    pub fn params_of(&self, node: u32) -> &[f32] {
        let start = node as usize * NODE_PARAM_SLOTS;
        &self.node_params.as_slice().expect("contiguous array")[start..start + NODE_PARAM_SLOTS]
    }

    /// Rebuild the weight array after a structural edit, carrying old
    /// weights where the edit says to and drawing fresh ones elsewhere.
    pub(crate) fn remap_weights<F: FnMut(usize) -> f32>(
        &mut self,
        sources: &[WeightSource],
        mut fresh: F,
    ) {
        let old = &self.weights;
        let next: Vec<f32> = sources
            .iter()
            .enumerate()
            .map(|(slot, src)| match src {
                WeightSource::Old(i) => old[*i as usize],
                WeightSource::Fresh => fresh(slot),
                WeightSource::Exact(v) => *v,
            })
            .collect();
        self.weights = Array1::from(next);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EdgeSampling;
    use crate::genome::builder::GenomeBuilder;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn genome() -> Genome {
        GenomeBuilder::new()
            .add_input_row(2)
            .add_hidden_row(3, &[Activation::Tanh, Activation::Relu])
            .add_output_row(1, &[Activation::Linear])
            .build(EdgeSampling::Dense { density: 1.0 }, &mut StdRng::seed_from_u64(0))
            .unwrap()
    }

    #[test]
    fn test_random_individual_is_coherent() {
        let g = genome();
        let init = WeightInitializer::new(Default::default());
        let ind = Individual::random(&g, &init, &mut StdRng::seed_from_u64(1));
        crate::genome::validate::validate_coherence(&g, &ind).unwrap();
        assert!(!ind.is_evaluated());
    }

    #[test]
    fn test_biases_are_not_frozen_at_zero() {
        let g = genome();
        let init = WeightInitializer::new(Default::default());
        let ind = Individual::random(&g, &init, &mut StdRng::seed_from_u64(2));
        assert!(ind.biases.iter().any(|b| *b != 0.0));
    }

    #[test]
    fn test_activation_choices_stay_in_vocab() {
        let g = genome();
        let init = WeightInitializer::new(Default::default());
        for seed in 0..16 {
            let ind = Individual::random(&g, &init, &mut StdRng::seed_from_u64(seed));
            for node in 2..5u32 {
                assert!(g.allowed_for(node).contains(&ind.activations[node as usize]));
            }
        }
    }

    #[test]
    fn test_remap_carries_and_freshens() {
        let g = genome();
        let init = WeightInitializer::new(Default::default());
        let mut ind = Individual::random(&g, &init, &mut StdRng::seed_from_u64(3));
        let w0 = ind.weights[0];
        ind.remap_weights(
            &[
                WeightSource::Old(0),
                WeightSource::Exact(1.0),
                WeightSource::Fresh,
            ],
            |_| 0.5,
        );
        assert_eq!(ind.weights.len(), 3);
        assert_eq!(ind.weights[0], w0);
        assert_eq!(ind.weights[1], 1.0);
        assert_eq!(ind.weights[2], 0.5);
    }
}
