//! Mutation operators.
//!
//! Parameter mutations act on one offspring's arrays and are rolled
//! independently per target (weight, bias, node, parameter slot).
//! Structural mutations live in [`structural`] and act at species scope,
//! because the topology is shared by every member.
//!
//! # Determinism
//!
//! Operators draw from the RNG stream handed to them and nothing else, so
//! a `(master_seed, generation, species, individual)` tuple fully
//! determines each offspring.

pub mod structural;

use ndarray_rand::rand_distr::{Distribution, Normal};
use rand::seq::SliceRandom;
use rand::Rng;

use crate::config::MutationRates;
use crate::genome::{Genome, RowKind};
use crate::individual::{default_node_params, Individual};
use crate::init::{node_fans, WeightInitializer, BIAS_INIT_BOUND};

/// Floor for the relative jitter scale, so near-zero parameters still move.
const JITTER_EPSILON: f32 = 0.05;

fn gaussian<R: Rng>(sigma: f32, rng: &mut R) -> f32 {
    if sigma <= 0.0 {
        return 0.0;
    }
    Normal::new(0.0, sigma)
        .expect("finite non-negative sigma")
        .sample(rng)
}

/// Apply every parameter mutation class to one offspring in place.
///
/// Biases participate on the same footing as weights; skipping them would
/// leave deep networks unable to shift per-layer thresholds.
pub fn mutate_parameters<R: Rng>(
    genome: &Genome,
    individual: &mut Individual,
    rates: &MutationRates,
    init: &WeightInitializer,
    rng: &mut R,
) {
    let fans = node_fans(genome);

    // Weights: jitter, reset, L1 shrink.
    for (slot, edge) in genome.edges().iter().enumerate() {
        let w = &mut individual.weights[slot];
        if rates.weight_jitter > 0.0 && rng.gen::<f32>() < rates.weight_jitter {
            let scale = rates.weight_jitter_sigma * w.abs().max(JITTER_EPSILON);
            *w += gaussian(scale, rng);
        }
        if rates.weight_reset > 0.0 && rng.gen::<f32>() < rates.weight_reset {
            let (fan_in, fan_out) = fans[edge.dest as usize];
            let bound = init.bound(fan_in, fan_out);
            *w = rng.gen_range(-bound..=bound);
        }
        if rates.weight_l1 > 0.0 && rng.gen::<f32>() < rates.weight_l1 {
            *w *= rates.l1_shrink_factor;
        }
    }

    // Biases. Input-node slots are inert and skipped.
    for node in 0..genome.node_count() as u32 {
        if genome.row_kind(node) == RowKind::Input {
            continue;
        }
        let b = &mut individual.biases[node as usize];
        if rates.bias_jitter > 0.0 && rng.gen::<f32>() < rates.bias_jitter {
            let scale = rates.bias_jitter_sigma * b.abs().max(JITTER_EPSILON);
            *b += gaussian(scale, rng);
        }
        if rates.bias_reset > 0.0 && rng.gen::<f32>() < rates.bias_reset {
            *b = rng.gen_range(-BIAS_INIT_BOUND..=BIAS_INIT_BOUND);
        }
    }

    // Activation swap: only nodes with more than one allowed activation,
    // and always to a *different* member of the allowed set.
    for node in 0..genome.node_count() as u32 {
        if genome.row_kind(node) == RowKind::Input {
            continue;
        }
        let allowed = genome.allowed_for(node);
        if allowed.len() < 2 {
            continue;
        }
        if rates.activation_swap > 0.0 && rng.gen::<f32>() < rates.activation_swap {
            let current = individual.activations[node as usize];
            let choices: Vec<_> = allowed.iter().copied().filter(|a| *a != current).collect();
            let next = *choices.choose(rng).expect("allowed set has >= 2 entries");
            individual.activations[node as usize] = next;
            let defaults = default_node_params(next);
            let start = node as usize * crate::activations::NODE_PARAM_SLOTS;
            for (offset, v) in defaults.iter().enumerate() {
                individual.node_params[start + offset] = *v;
            }
        }
    }

    // Node parameter slots.
    if rates.node_param > 0.0 {
        for slot in 0..individual.node_params.len() {
            if rng.gen::<f32>() < rates.node_param {
                individual.node_params[slot] += gaussian(rates.node_param_sigma, rng);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::activations::Activation;
    use crate::config::EdgeSampling;
    use crate::genome::builder::GenomeBuilder;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn setup() -> (Genome, Individual, WeightInitializer) {
        let genome = GenomeBuilder::new()
            .add_input_row(2)
            .add_hidden_row(4, &[Activation::Tanh, Activation::Relu])
            .add_output_row(1, &[Activation::Linear])
            .build(EdgeSampling::Dense { density: 1.0 }, &mut StdRng::seed_from_u64(0))
            .unwrap();
        let init = WeightInitializer::new(Default::default());
        let ind = Individual::random(&genome, &init, &mut StdRng::seed_from_u64(1));
        (genome, ind, init)
    }

    #[test]
    fn test_zero_rates_are_identity() {
        let (genome, mut ind, init) = setup();
        let before = ind.clone();
        let rates = MutationRates {
            weight_jitter: 0.0,
            weight_reset: 0.0,
            weight_l1: 0.0,
            bias_jitter: 0.0,
            bias_reset: 0.0,
            activation_swap: 0.0,
            node_param: 0.0,
            ..Default::default()
        };
        mutate_parameters(&genome, &mut ind, &rates, &init, &mut StdRng::seed_from_u64(2));
        assert_eq!(ind, before);
    }

    #[test]
    fn test_l1_shrink_factor_one_is_identity() {
        let (genome, mut ind, init) = setup();
        let before = ind.weights.clone();
        let rates = MutationRates {
            weight_jitter: 0.0,
            weight_reset: 0.0,
            weight_l1: 1.0,
            l1_shrink_factor: 1.0,
            bias_jitter: 0.0,
            bias_reset: 0.0,
            activation_swap: 0.0,
            node_param: 0.0,
            ..Default::default()
        };
        mutate_parameters(&genome, &mut ind, &rates, &init, &mut StdRng::seed_from_u64(3));
        assert_eq!(ind.weights, before);
    }

    #[test]
    fn test_bias_mutation_moves_biases() {
        let (genome, mut ind, init) = setup();
        let before = ind.biases.clone();
        let rates = MutationRates {
            weight_jitter: 0.0,
            weight_reset: 0.0,
            weight_l1: 0.0,
            bias_jitter: 1.0,
            bias_jitter_sigma: 0.5,
            bias_reset: 0.0,
            activation_swap: 0.0,
            node_param: 0.0,
            ..Default::default()
        };
        mutate_parameters(&genome, &mut ind, &rates, &init, &mut StdRng::seed_from_u64(4));
        assert_ne!(ind.biases, before);
        // Input-node bias slots stay untouched.
        assert_eq!(ind.biases[0], before[0]);
        assert_eq!(ind.biases[1], before[1]);
    }

    #[test]
    fn test_activation_swap_stays_in_vocab_and_differs() {
        let (genome, mut ind, init) = setup();
        let rates = MutationRates {
            weight_jitter: 0.0,
            weight_reset: 0.0,
            weight_l1: 0.0,
            bias_jitter: 0.0,
            bias_reset: 0.0,
            activation_swap: 1.0,
            node_param: 0.0,
            ..Default::default()
        };
        let before = ind.activations.clone();
        mutate_parameters(&genome, &mut ind, &rates, &init, &mut StdRng::seed_from_u64(5));
        for node in 2..6u32 {
            let act = ind.activations[node as usize];
            assert!(genome.allowed_for(node).contains(&act));
            assert_ne!(act, before[node as usize], "swap must pick a different activation");
        }
        // Output row has a single allowed activation: never swapped.
        assert_eq!(ind.activations[6], before[6]);
    }

    #[test]
    fn test_mutation_is_deterministic_per_stream() {
        let (genome, ind, init) = setup();
        let rates = MutationRates::default();
        let mut a = ind.clone();
        let mut b = ind.clone();
        mutate_parameters(&genome, &mut a, &rates, &init, &mut StdRng::seed_from_u64(9));
        mutate_parameters(&genome, &mut b, &rates, &init, &mut StdRng::seed_from_u64(9));
        assert_eq!(a, b);
    }
}
