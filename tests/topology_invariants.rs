mod common;

use common::XorEnv;
use evostrata::genome::validate::{validate_coherence, validate_genome};
use evostrata::{
    Activation, CancelToken, EdgeSampling, EvolutionConfig, GenomeBuilder, Population,
};
use rand::rngs::StdRng;
use rand::SeedableRng;

fn density_layout() -> GenomeBuilder {
    // Rows [2, 3, 3, 1], the density-sanity shape.
    GenomeBuilder::new()
        .add_input_row(2)
        .add_hidden_row(3, &[Activation::Tanh])
        .add_hidden_row(3, &[Activation::Tanh])
        .add_output_row(1, &[Activation::Linear])
        .with_max_in_degree(12)
}

#[test]
fn test_density_one_is_exact() {
    for seed in 0..8 {
        let g = density_layout()
            .build(
                EdgeSampling::Dense { density: 1.0 },
                &mut StdRng::seed_from_u64(seed),
            )
            .unwrap();
        assert_eq!(g.edge_count(), 2 * 3 + 3 * 3 + 3 * 1);
        validate_genome(&g).unwrap();
    }
}

#[test]
fn test_density_half_is_approximate() {
    // 18 Bernoulli(0.5) candidates plus forced single in-edges for nodes
    // that roll empty; the count lands near 9 but is not fixed.
    let g = density_layout()
        .build(
            EdgeSampling::Dense { density: 0.5 },
            &mut StdRng::seed_from_u64(42),
        )
        .unwrap();
    let count = g.edge_count();
    println!("Dense(0.5) sampled {count} edges");
    assert!((3..=16).contains(&count), "implausible edge count {count}");
    validate_genome(&g).unwrap();
}

#[test]
fn test_density_zero_rejected() {
    let err = density_layout().build(
        EdgeSampling::Dense { density: 0.0 },
        &mut StdRng::seed_from_u64(0),
    );
    assert!(err.is_err());
}

/// Every species of every generation satisfies the full invariant set,
/// and every member's parameter arrays stay coherent with its genome,
/// across a run long enough to exercise culling, diversification, and
/// structural mutation.
#[test]
fn test_invariants_hold_across_evolution() {
    for seed in [1u64, 42, 1337] {
        let cfg = EvolutionConfig {
            species_count: 5,
            min_species_count: 2,
            individuals_per_species: 8,
            elites: 1,
            grace_generations: 1,
            stagnation_threshold: 2,
            master_seed: seed,
            ..Default::default()
        };
        let layout = GenomeBuilder::new()
            .add_input_row(2)
            .add_hidden_row(4, &[Activation::Tanh, Activation::Gelu])
            .add_hidden_row(3, &[Activation::Relu, Activation::Softsign])
            .add_output_row(1, &[Activation::Sigmoid])
            .with_max_in_degree(6);
        let mut pop = Population::new(cfg, &layout).unwrap();
        let env = XorEnv::new();
        let cancel = CancelToken::new();
        for generation in 0..12 {
            pop.evolve_generation(&env, &cancel).unwrap();
            for sp in pop.species() {
                validate_genome(&sp.genome).unwrap_or_else(|e| {
                    panic!("seed {seed} gen {generation} species {}: {e}", sp.id)
                });
                for m in &sp.members {
                    validate_coherence(&sp.genome, m).unwrap_or_else(|e| {
                        panic!("seed {seed} gen {generation} species {}: {e}", sp.id)
                    });
                }
            }
        }
    }
}

#[test]
fn test_species_counts_bounded_every_generation() {
    let cfg = EvolutionConfig {
        species_count: 6,
        min_species_count: 3,
        individuals_per_species: 6,
        elites: 1,
        grace_generations: 1,
        stagnation_threshold: 2,
        master_seed: 9,
        ..Default::default()
    };
    let mut pop = Population::new(cfg.clone(), &density_layout()).unwrap();
    let env = XorEnv::new();
    let cancel = CancelToken::new();
    for _ in 0..15 {
        pop.evolve_generation(&env, &cancel).unwrap();
        let n = pop.species().len();
        assert!(n >= cfg.min_species_count && n <= cfg.species_count);
    }
}
