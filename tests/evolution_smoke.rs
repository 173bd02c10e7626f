mod common;

use common::{ThresholdEnv, XorEnv, XOR_CASES};
use evostrata::network::forward_alloc;
use evostrata::{
    Activation, CancelToken, EvolutionConfig, GenomeBuilder, MutationRates, Population,
    StructuralRates,
};

fn xor_layout() -> GenomeBuilder {
    GenomeBuilder::new()
        .add_input_row(2)
        .add_hidden_row(4, &[Activation::Tanh])
        .add_output_row(1, &[Activation::Sigmoid])
        .with_max_in_degree(12)
}

#[test]
fn test_xor_smoke() {
    tracing_subscriber::fmt()
        .with_test_writer()
        .try_init()
        .ok();
    let cfg = EvolutionConfig {
        species_count: 4,
        min_species_count: 2,
        individuals_per_species: 16,
        elites: 2,
        master_seed: 42,
        ..Default::default()
    };
    let mut pop = Population::new(cfg, &xor_layout()).unwrap();
    let env = XorEnv::new();
    let cancel = CancelToken::new();
    let mut best = f32::NEG_INFINITY;
    for _ in 0..100 {
        let report = pop.evolve_generation(&env, &cancel).unwrap();
        best = report.global_best_fitness;
    }
    println!("XOR best fitness after 100 generations: {best}");
    assert!(best >= -0.05, "XOR did not converge: best = {best}");

    // The champion actually computes XOR within the same tolerance.
    let champ = pop.champion().unwrap();
    let mut total = 0.0;
    for (input, target) in XOR_CASES {
        let out = forward_alloc(&champ.genome, &champ.individual, &input);
        total -= (out[0] - target) * (out[0] - target);
    }
    println!("champion replay fitness: {total}");
    assert!(total >= -0.05);
}

#[test]
fn test_culling_activates_under_forced_stagnation() {
    let cfg = EvolutionConfig {
        species_count: 8,
        min_species_count: 2,
        individuals_per_species: 8,
        elites: 1,
        stagnation_threshold: 3,
        grace_generations: 1,
        master_seed: 42,
        ..Default::default()
    };
    let species_target = cfg.species_count as u64;
    let mut pop = Population::new(cfg, &xor_layout()).unwrap();
    let env = XorEnv::new();
    let cancel = CancelToken::new();
    for _ in 0..20 {
        pop.evolve_generation(&env, &cancel).unwrap();
    }
    println!(
        "species created over 20 generations: {}",
        pop.species_created_ever()
    );
    assert!(
        pop.species_created_ever() > species_target,
        "no diversification happened"
    );
}

fn frozen_rates() -> MutationRates {
    MutationRates {
        weight_jitter: 0.0,
        weight_reset: 0.0,
        weight_l1: 0.0,
        bias_jitter: 0.0,
        bias_reset: 0.0,
        activation_swap: 0.0,
        node_param: 0.0,
        ..Default::default()
    }
}

fn no_structure() -> StructuralRates {
    StructuralRates {
        edge_add: 0.0,
        edge_delete: 0.0,
        edge_split: 0.0,
        edge_redirect: 0.0,
        edge_swap: 0.0,
        prune_scan: 0.0,
        pruning_enabled: false,
        ..Default::default()
    }
}

/// Bias mutation is load-bearing: with zero observations the only path to
/// the target output runs through evolved thresholds. With bias mutation
/// disabled (and every other operator frozen to isolate it) the best
/// fitness never moves; enabling bias mutation alone lifts it.
#[test]
fn test_bias_mutation_is_required() {
    let narrow = GenomeBuilder::new()
        .add_input_row(1)
        .add_hidden_rows(2, &[Activation::Tanh], 6)
        .add_output_row(1, &[Activation::Linear])
        .with_max_in_degree(6);
    let base = EvolutionConfig {
        species_count: 2,
        min_species_count: 2,
        individuals_per_species: 16,
        elites: 2,
        master_seed: 42,
        structural: no_structure(),
        ..Default::default()
    };
    let env = ThresholdEnv::new(0.7);
    let cancel = CancelToken::new();

    let frozen_cfg = EvolutionConfig {
        mutation: frozen_rates(),
        ..base.clone()
    };
    let mut frozen = Population::new(frozen_cfg, &narrow).unwrap();
    let mut frozen_trajectory = Vec::new();
    for _ in 0..30 {
        let report = frozen.evolve_generation(&env, &cancel).unwrap();
        frozen_trajectory.push(report.global_best_fitness);
    }
    // Everything frozen: a flat plateau.
    assert!(frozen_trajectory
        .iter()
        .all(|&b| b == frozen_trajectory[0]));

    let bias_cfg = EvolutionConfig {
        mutation: MutationRates {
            bias_jitter: 0.8,
            bias_jitter_sigma: 0.3,
            bias_reset: 0.05,
            ..frozen_rates()
        },
        ..base
    };
    let mut with_bias = Population::new(bias_cfg, &narrow).unwrap();
    let mut bias_best = f32::NEG_INFINITY;
    for _ in 0..30 {
        bias_best = with_bias
            .evolve_generation(&env, &cancel)
            .unwrap()
            .global_best_fitness;
    }

    println!(
        "frozen plateau: {}, with bias mutation: {}",
        frozen_trajectory[29], bias_best
    );
    assert!(
        bias_best > frozen_trajectory[29],
        "bias mutation produced no improvement over the frozen plateau"
    );
}
