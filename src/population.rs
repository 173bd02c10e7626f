//! Population lifecycle: speciated generations, stagnation-driven culling,
//! and diversification of surviving topologies.
//!
//! One `evolve_generation` call runs the full cycle: evaluate, fold
//! statistics, cull and refill species, then produce each surviving
//! species' next generation (parameter mutation per offspring, structural
//! mutation at species scope). All randomness flows through derived
//! streams, so the trajectory is a pure function of `(config, layout,
//! environment)`.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::EvolutionConfig;
use crate::errors::{EvoError, EvoResult};
use crate::genome::builder::GenomeBuilder;
use crate::genome::Genome;
use crate::individual::Individual;
use crate::init::{node_fans, WeightInitializer};
use crate::mutation::structural::{apply_random_topology_op, mutate_structure};
use crate::rng::{RngService, StreamTag};
use crate::runner::{evaluate_population, CancelToken, Environment};
use crate::species::Species;

/// Per-species slice of a generation report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpeciesReport {
    pub id: u64,
    pub size: usize,
    pub best: f32,
    pub mean: f32,
    pub median: f32,
    pub variance: f32,
    pub best_ever: f32,
    pub age: u32,
    pub gens_since_improvement: u32,
}

/// Observable output of one generation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationReport {
    pub generation: u64,
    pub global_best_fitness: f32,
    pub species: Vec<SpeciesReport>,
    pub species_created_ever: u64,
    pub cullings: usize,
}

/// Best individual ever observed, with everything needed to re-evaluate
/// or serialize it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Champion {
    pub species_id: u64,
    pub genome: Genome,
    pub individual: Individual,
}

pub struct Population {
    cfg: EvolutionConfig,
    svc: RngService,
    init: WeightInitializer,
    species: Vec<Species>,
    generation: u64,
    next_species_id: u64,
    species_created_ever: u64,
    global_best_fitness: f32,
    champion: Option<Champion>,
}

impl Population {
    /// Build the initial population: `species_count` topologies sampled
    /// from the layout, each filled with random individuals.
    pub fn new(cfg: EvolutionConfig, layout: &GenomeBuilder) -> EvoResult<Self> {
        cfg.validate()?;
        let svc = RngService::new(cfg.master_seed);
        let init = WeightInitializer::new(cfg.weight_init);
        let mut species = Vec::with_capacity(cfg.species_count);
        for id in 0..cfg.species_count as u64 {
            let mut rng = svc.stream(0, id, 0, StreamTag::SpeciesTopology);
            let genome = layout.build(cfg.edge_sampling, &mut rng)?;
            species.push(Species::spawn(
                id,
                genome,
                cfg.individuals_per_species,
                &init,
                &svc,
                0,
            ));
        }
        Ok(Self {
            species_created_ever: species.len() as u64,
            next_species_id: species.len() as u64,
            cfg,
            svc,
            init,
            species,
            generation: 0,
            global_best_fitness: f32::NEG_INFINITY,
            champion: None,
        })
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn species(&self) -> &[Species] {
        &self.species
    }

    pub fn global_best_fitness(&self) -> f32 {
        self.global_best_fitness
    }

    pub fn species_created_ever(&self) -> u64 {
        self.species_created_ever
    }

    pub fn champion(&self) -> Option<&Champion> {
        self.champion.as_ref()
    }

    pub fn config(&self) -> &EvolutionConfig {
        &self.cfg
    }

    /// Run one full generation cycle against the environment template.
    pub fn evolve_generation<E: Environment>(
        &mut self,
        env: &E,
        cancel: &CancelToken,
    ) -> EvoResult<GenerationReport> {
        if cancel.is_cancelled() {
            return Err(EvoError::Cancelled);
        }

        evaluate_population(
            &mut self.species,
            env,
            &self.cfg,
            &self.svc,
            self.generation,
            cancel,
        )?;

        for sp in &mut self.species {
            sp.record_generation_stats();
        }
        self.update_champion();

        let species_reports: Vec<SpeciesReport> = self
            .species
            .iter()
            .map(|sp| SpeciesReport {
                id: sp.id,
                size: sp.members.len(),
                best: sp.stats.last_best,
                mean: sp.stats.last_mean,
                median: sp.stats.last_median,
                variance: sp.stats.last_variance,
                best_ever: sp.stats.best_fitness_ever,
                age: sp.stats.age_in_generations,
                gens_since_improvement: sp.stats.gens_since_improvement,
            })
            .collect();

        let cullings = self.cull_and_diversify();

        // Offspring and structural mutation for every species that was
        // evaluated this generation. Species born during culling keep
        // their transferred parameters untouched until they have been
        // scored once.
        for si in 0..self.species.len() {
            if self.species[si].stats.age_in_generations == 0 {
                continue;
            }
            let sp = &mut self.species[si];
            sp.next_generation(&self.cfg, &self.init, &self.svc, self.generation);
            let mut rng = self
                .svc
                .stream(self.generation, sp.id, 0, StreamTag::StructuralMutation);
            let Species {
                ref mut genome,
                ref mut members,
                ..
            } = *sp;
            mutate_structure(genome, members, &self.cfg.structural, &self.init, &mut rng);
        }

        self.generation += 1;

        let report = GenerationReport {
            generation: self.generation - 1,
            global_best_fitness: self.global_best_fitness,
            species: species_reports,
            species_created_ever: self.species_created_ever,
            cullings,
        };
        info!(
            generation = report.generation,
            global_best = report.global_best_fitness,
            species = report.species.len(),
            cullings = report.cullings,
            "generation complete"
        );
        Ok(report)
    }

    /// Run `generations` cycles. On cancellation the error propagates and
    /// the population keeps its current state.
    pub fn run<E: Environment>(
        &mut self,
        env: &E,
        generations: usize,
        cancel: &CancelToken,
    ) -> EvoResult<Vec<GenerationReport>> {
        let mut reports = Vec::with_capacity(generations);
        for _ in 0..generations {
            reports.push(self.evolve_generation(env, cancel)?);
        }
        Ok(reports)
    }

    fn update_champion(&mut self) {
        for sp in &self.species {
            let Some(best) = sp.champion() else { continue };
            if best.fitness.is_finite() && best.fitness > self.global_best_fitness {
                self.global_best_fitness = best.fitness;
                self.champion = Some(Champion {
                    species_id: sp.id,
                    genome: sp.genome.clone(),
                    individual: best.clone(),
                });
            }
        }
    }

    /// NEAT-style OR-logic culling gated by the grace period. A species is
    /// never judged before its first evaluation.
    fn eligible_for_culling(&self, sp: &Species) -> bool {
        let stats = &sp.stats;
        if stats.age_in_generations < self.cfg.grace_generations.max(1) {
            return false;
        }
        if stats.gens_since_improvement >= self.cfg.stagnation_threshold {
            return true;
        }
        if self.relative_performance(stats.best_fitness_ever)
            < self.cfg.relative_performance_threshold
        {
            return true;
        }
        stats.last_variance < self.cfg.species_diversity_threshold
    }

    /// Shift-to-positive performance ratio in [0, 1]; behaves for negative
    /// fitness (minimization expressed as negative reward). The floor is
    /// `min(best_fitness_ever over species, 0)`: all-positive populations
    /// keep zero as the anchor, so a species at 10 against a global best
    /// of 15 scores 0.667, not 0. A species that never scored is ratio 0;
    /// when every species sits at the same best, the ratio is 1.
    fn relative_performance(&self, best_ever: f32) -> f32 {
        if !best_ever.is_finite() {
            return 0.0;
        }
        let finite: Vec<f32> = self
            .species
            .iter()
            .map(|s| s.stats.best_fitness_ever)
            .filter(|f| f.is_finite())
            .collect();
        let floor = finite.iter().copied().fold(f32::INFINITY, f32::min).min(0.0);
        let global = self
            .global_best_fitness
            .max(finite.iter().copied().fold(f32::NEG_INFINITY, f32::max));
        let span = global - floor;
        if !span.is_finite() || span <= f32::EPSILON {
            return 1.0;
        }
        (best_ever - floor) / span
    }

    fn cull_and_diversify(&mut self) -> usize {
        // Eligibility is decided once, against this generation's
        // statistics; replacements created below are never re-judged in
        // the same pass.
        let eligible: Vec<u64> = self
            .species
            .iter()
            .filter(|sp| self.eligible_for_culling(sp))
            .map(|sp| sp.id)
            .collect();

        let mut cullings = 0;
        while self.species.len() > self.cfg.min_species_count {
            let victim = self
                .species
                .iter()
                .enumerate()
                .filter(|(_, sp)| eligible.contains(&sp.id))
                .min_by(|(_, a), (_, b)| {
                    a.stats.best_fitness_ever.total_cmp(&b.stats.best_fitness_ever)
                })
                .map(|(i, _)| i);
            let Some(victim) = victim else { break };

            let removed = self.species.remove(victim);
            debug!(
                species = removed.id,
                best_ever = removed.stats.best_fitness_ever,
                gens_since_improvement = removed.stats.gens_since_improvement,
                "culled stagnant species"
            );
            let replacement = self.diversify();
            self.species.push(replacement);
            cullings += 1;
        }
        cullings
    }

    /// Build a new species by topology-mutating a surviving one.
    fn diversify(&mut self) -> Species {
        let new_id = self.next_species_id;
        self.next_species_id += 1;
        self.species_created_ever += 1;

        let mut rng = self
            .svc
            .stream(self.generation, new_id, 0, StreamTag::Diversification);

        let source_idx = self.pick_diversification_source(&mut rng);
        let source = &self.species[source_idx];

        // Retry until at least one topology edit lands and the result is
        // not a duplicate of a live species. On exhaustion the duplicate
        // is accepted and logged.
        let mut genome = source.genome.clone();
        let mut accepted = false;
        for _ in 0..self.cfg.diversification_attempts {
            let mut trial = source.genome.clone();
            let mut changed = false;
            let ops = 1 + (rand::Rng::gen_range(&mut rng, 0..3u8)) as usize;
            for _ in 0..ops {
                changed |= apply_random_topology_op(&mut trial, &mut [], &self.init, &mut rng);
            }
            if !changed {
                continue;
            }
            if self.species.iter().any(|s| s.genome.same_topology(&trial)) {
                continue;
            }
            genome = trial;
            accepted = true;
            break;
        }
        if !accepted {
            warn!(
                source = source.id,
                attempts = self.cfg.diversification_attempts,
                "{}",
                EvoError::DegenerateSpecies {
                    attempts: self.cfg.diversification_attempts
                }
            );
        }

        let source = &self.species[source_idx];
        let ranked = source.ranked_indices();
        let elite_pool = ranked[..self.cfg.elites.clamp(1, ranked.len())].to_vec();

        let members: Vec<Individual> = (0..self.cfg.individuals_per_species)
            .map(|slot| {
                let elite = &source.members[elite_pool[slot % elite_pool.len()]];
                let mut slot_rng =
                    self.svc
                        .stream(self.generation, new_id, slot as u64, StreamTag::IndividualInit);
                transfer_individual(elite, &source.genome, &genome, &self.init, &mut slot_rng)
            })
            .collect();

        debug!(
            species = new_id,
            source = source.id,
            edges = genome.edge_count(),
            "diversified new species"
        );
        Species {
            id: new_id,
            genome,
            members,
            stats: Default::default(),
        }
    }

    /// Source choice weighted by best-fitness-ever, reshifted positive.
    fn pick_diversification_source<R: rand::Rng>(&self, rng: &mut R) -> usize {
        let bests: Vec<f32> = self
            .species
            .iter()
            .map(|s| s.stats.best_fitness_ever)
            .collect();
        let floor = bests
            .iter()
            .copied()
            .filter(|f| f.is_finite())
            .fold(f32::INFINITY, f32::min);
        if !floor.is_finite() {
            return rng.gen_range(0..self.species.len());
        }
        let weights: Vec<f32> = bests
            .iter()
            .map(|b| if b.is_finite() { b - floor + 1e-3 } else { 1e-3 })
            .collect();
        let total: f32 = weights.iter().sum();
        let mut roll = rng.gen::<f32>() * total;
        for (i, w) in weights.iter().enumerate() {
            roll -= w;
            if roll <= 0.0 {
                return i;
            }
        }
        self.species.len() - 1
    }
}

/// Copy an elite's parameters into a mutated topology: node-indexed arrays
/// (biases, activations, node params) transfer wholesale because topology
/// operators never renumber nodes, and weights transfer wherever the edge
/// `(source, dest)` survives by identity. Everything else is fresh init.
fn transfer_individual<R: rand::Rng>(
    elite: &Individual,
    source_genome: &Genome,
    target_genome: &Genome,
    init: &WeightInitializer,
    rng: &mut R,
) -> Individual {
    debug_assert_eq!(source_genome.node_count(), target_genome.node_count());
    let by_pair: HashMap<(u32, u32), usize> = source_genome
        .edges()
        .iter()
        .enumerate()
        .map(|(i, e)| ((e.source, e.dest), i))
        .collect();
    let fans = node_fans(target_genome);
    let weights: Vec<f32> = target_genome
        .edges()
        .iter()
        .map(|e| match by_pair.get(&(e.source, e.dest)) {
            Some(&i) => elite.weights[i],
            None => {
                let (fan_in, fan_out) = fans[e.dest as usize];
                init.sample(fan_in, fan_out, rng)
            }
        })
        .collect();

    Individual {
        weights: ndarray::Array1::from(weights),
        // Biases ride along with their nodes; dropping them here would
        // reset every transferred threshold to zero.
        biases: elite.biases.clone(),
        node_params: elite.node_params.clone(),
        activations: elite.activations.clone(),
        fitness: f32::NEG_INFINITY,
        age: 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::activations::Activation;
    use crate::config::EdgeSampling;

    #[derive(Debug, Clone)]
    struct ConstEnv {
        steps: usize,
    }

    impl Environment for ConstEnv {
        fn input_count(&self) -> usize {
            2
        }
        fn output_count(&self) -> usize {
            1
        }
        fn max_steps(&self) -> usize {
            4
        }
        fn reset(&mut self, _seed: u64) {
            self.steps = 0;
        }
        fn get_observations(&self, buf: &mut [f32]) {
            buf.fill(0.5);
        }
        fn step(&mut self, action: &[f32]) -> f32 {
            self.steps += 1;
            -(action[0] - 0.25).abs()
        }
        fn is_terminal(&self) -> bool {
            self.steps >= 4
        }
    }

    fn layout() -> GenomeBuilder {
        GenomeBuilder::new()
            .add_input_row(2)
            .add_hidden_row(4, &[Activation::Tanh, Activation::Relu])
            .add_output_row(1, &[Activation::Linear])
            .with_max_in_degree(8)
    }

    fn small_cfg() -> EvolutionConfig {
        EvolutionConfig {
            species_count: 4,
            min_species_count: 2,
            individuals_per_species: 8,
            elites: 1,
            master_seed: 42,
            ..Default::default()
        }
    }

    #[test]
    fn test_population_init_respects_counts() {
        let pop = Population::new(small_cfg(), &layout()).unwrap();
        assert_eq!(pop.species().len(), 4);
        assert!(pop.species().iter().all(|s| s.members.len() == 8));
        assert_eq!(pop.species_created_ever(), 4);
    }

    #[test]
    fn test_invalid_config_rejected_at_init() {
        let cfg = EvolutionConfig {
            species_count: 0,
            ..small_cfg()
        };
        assert!(Population::new(cfg, &layout()).is_err());
    }

    #[test]
    fn test_generation_produces_report_and_advances() {
        let mut pop = Population::new(small_cfg(), &layout()).unwrap();
        let report = pop
            .evolve_generation(&ConstEnv { steps: 0 }, &CancelToken::new())
            .unwrap();
        assert_eq!(report.generation, 0);
        assert_eq!(pop.generation(), 1);
        assert_eq!(report.species.len(), 4);
        assert!(report.global_best_fitness.is_finite());
        assert!(pop.champion().is_some());
    }

    #[test]
    fn test_species_count_bounds_hold() {
        let cfg = EvolutionConfig {
            grace_generations: 1,
            stagnation_threshold: 2,
            ..small_cfg()
        };
        let mut pop = Population::new(cfg.clone(), &layout()).unwrap();
        let env = ConstEnv { steps: 0 };
        for _ in 0..10 {
            pop.evolve_generation(&env, &CancelToken::new()).unwrap();
            assert!(pop.species().len() >= cfg.min_species_count);
            assert!(pop.species().len() <= cfg.species_count);
        }
    }

    #[test]
    fn test_min_equals_max_disables_culling() {
        let cfg = EvolutionConfig {
            species_count: 3,
            min_species_count: 3,
            grace_generations: 0,
            stagnation_threshold: 1,
            ..small_cfg()
        };
        let mut pop = Population::new(cfg, &layout()).unwrap();
        let env = ConstEnv { steps: 0 };
        for _ in 0..6 {
            let report = pop.evolve_generation(&env, &CancelToken::new()).unwrap();
            assert_eq!(report.cullings, 0);
        }
        assert_eq!(pop.species_created_ever(), 3);
    }

    #[test]
    fn test_stagnation_triggers_diversification() {
        // Constant environment: everyone stagnates immediately.
        let cfg = EvolutionConfig {
            species_count: 8,
            min_species_count: 2,
            grace_generations: 1,
            stagnation_threshold: 3,
            ..small_cfg()
        };
        let mut pop = Population::new(cfg.clone(), &layout()).unwrap();
        let env = ConstEnv { steps: 0 };
        for _ in 0..20 {
            pop.evolve_generation(&env, &CancelToken::new()).unwrap();
        }
        assert!(
            pop.species_created_ever() > cfg.species_count as u64,
            "no diversification after 20 stagnant generations"
        );
    }

    #[test]
    fn test_diversified_species_get_grace() {
        let cfg = EvolutionConfig {
            species_count: 4,
            min_species_count: 2,
            grace_generations: 3,
            stagnation_threshold: 2,
            ..small_cfg()
        };
        let mut pop = Population::new(cfg, &layout()).unwrap();
        let env = ConstEnv { steps: 0 };
        for _ in 0..8 {
            pop.evolve_generation(&env, &CancelToken::new()).unwrap();
        }
        // Fresh species exist and have not been instantly re-culled into
        // an unbounded id churn: every live species is either old enough
        // to be judged or still in grace.
        for sp in pop.species() {
            assert!(sp.stats.age_in_generations <= 8);
        }
    }

    #[test]
    fn test_relative_performance_anchors_positive_fitness_at_zero() {
        let mut pop = Population::new(
            EvolutionConfig {
                species_count: 3,
                min_species_count: 2,
                ..small_cfg()
            },
            &layout(),
        )
        .unwrap();
        for (sp, best) in pop.species.iter_mut().zip([10.0, 12.0, 15.0]) {
            sp.stats.best_fitness_ever = best;
            sp.stats.age_in_generations = 10;
            sp.stats.last_variance = 1.0;
        }
        // All-positive bests anchor the floor at zero: 10/15, not 0/5.
        let ratio = pop.relative_performance(10.0);
        assert!((ratio - 10.0 / 15.0).abs() < 1e-6, "ratio = {ratio}");
        // Well above the default threshold, so the worst species is not
        // spuriously eligible through the relative-performance clause.
        assert!(!pop.eligible_for_culling(&pop.species[0]));

        // Negative bests still use the signed minimum as the floor.
        for (sp, best) in pop.species.iter_mut().zip([-4.0, -2.0, -1.0]) {
            sp.stats.best_fitness_ever = best;
        }
        pop.global_best_fitness = -1.0;
        let ratio = pop.relative_performance(-2.0);
        assert!((ratio - 2.0 / 3.0).abs() < 1e-6, "ratio = {ratio}");
    }

    #[test]
    fn test_transfer_preserves_biases_and_matched_weights() {
        let mut rng = <rand::rngs::StdRng as rand::SeedableRng>::seed_from_u64(1);
        let source = layout()
            .build(EdgeSampling::Dense { density: 1.0 }, &mut rng)
            .unwrap();
        let init = WeightInitializer::new(Default::default());
        let elite = Individual::random(&source, &init, &mut rng);

        // Mutated copy of the topology.
        let mut target = source.clone();
        let mut members: [Individual; 0] = [];
        let mut op_rng = <rand::rngs::StdRng as rand::SeedableRng>::seed_from_u64(2);
        while !apply_random_topology_op(&mut target, &mut members, &init, &mut op_rng) {}

        let transferred =
            transfer_individual(&elite, &source, &target, &init, &mut op_rng);
        assert_eq!(transferred.biases, elite.biases);
        assert_eq!(transferred.activations, elite.activations);
        // Every surviving edge identity carries its weight.
        for (ti, te) in target.edges().iter().enumerate() {
            if let Some(si) = source
                .edges()
                .iter()
                .position(|se| se.source == te.source && se.dest == te.dest)
            {
                assert_eq!(transferred.weights[ti], elite.weights[si]);
            }
        }
        crate::genome::validate::validate_coherence(&target, &transferred).unwrap();
    }

    #[test]
    fn test_cancellation_preserves_state() {
        let mut pop = Population::new(small_cfg(), &layout()).unwrap();
        let env = ConstEnv { steps: 0 };
        pop.evolve_generation(&env, &CancelToken::new()).unwrap();
        let gen_before = pop.generation();
        let cancel = CancelToken::new();
        cancel.cancel();
        assert!(matches!(
            pop.evolve_generation(&env, &cancel),
            Err(EvoError::Cancelled)
        ));
        assert_eq!(pop.generation(), gen_before);
    }
}
