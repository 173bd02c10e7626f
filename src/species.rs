//! A species: one shared topology, its individuals, and its lifecycle
//! statistics, plus within-species selection and offspring generation.

use serde::{Deserialize, Serialize};

use crate::config::EvolutionConfig;
use crate::genome::Genome;
use crate::individual::Individual;
use crate::init::WeightInitializer;
use crate::mutation::mutate_parameters;
use crate::rng::{RngService, StreamTag};

/// Cumulative and last-generation fitness statistics.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SpeciesStats {
    pub best_fitness_ever: f32,
    pub gens_since_improvement: u32,
    pub age_in_generations: u32,
    pub last_best: f32,
    pub last_mean: f32,
    pub last_median: f32,
    pub last_variance: f32,
}

impl Default for SpeciesStats {
    fn default() -> Self {
        Self {
            best_fitness_ever: f32::NEG_INFINITY,
            gens_since_improvement: 0,
            age_in_generations: 0,
            last_best: f32::NEG_INFINITY,
            last_mean: f32::NEG_INFINITY,
            last_median: f32::NEG_INFINITY,
            last_variance: 0.0,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Species {
    pub id: u64,
    pub genome: Genome,
    pub members: Vec<Individual>,
    pub stats: SpeciesStats,
}

impl Species {
    /// Fresh species: `count` random individuals over `genome`, each from
    /// its own derived stream.
    pub fn spawn(
        id: u64,
        genome: Genome,
        count: usize,
        init: &WeightInitializer,
        svc: &RngService,
        generation: u64,
    ) -> Self {
        let members = (0..count)
            .map(|slot| {
                let mut rng = svc.stream(generation, id, slot as u64, StreamTag::IndividualInit);
                Individual::random(&genome, init, &mut rng)
            })
            .collect();
        Self {
            id,
            genome,
            members,
            stats: SpeciesStats::default(),
        }
    }

    /// Member indices sorted best-first; ties keep insertion order.
    pub fn ranked_indices(&self) -> Vec<usize> {
        let mut indices: Vec<usize> = (0..self.members.len()).collect();
        indices.sort_by(|&a, &b| {
            self.members[b]
                .fitness
                .total_cmp(&self.members[a].fitness)
                .then(a.cmp(&b))
        });
        indices
    }

    pub fn champion(&self) -> Option<&Individual> {
        self.ranked_indices()
            .first()
            .map(|&i| &self.members[i])
    }

    /// Fold this generation's fitness values into the running statistics.
    /// Failed episodes (`NEG_INFINITY`) are excluded from the moments so
    /// one bad member cannot poison the variance.
    pub fn record_generation_stats(&mut self) {
        let mut finite: Vec<f32> = self
            .members
            .iter()
            .map(|m| m.fitness)
            .filter(|f| f.is_finite())
            .collect();
        finite.sort_by(f32::total_cmp);

        let (best, mean, median, variance) = if finite.is_empty() {
            (f32::NEG_INFINITY, f32::NEG_INFINITY, f32::NEG_INFINITY, 0.0)
        } else {
            let n = finite.len();
            let best = finite[n - 1];
            let mean = finite.iter().sum::<f32>() / n as f32;
            let median = if n % 2 == 1 {
                finite[n / 2]
            } else {
                0.5 * (finite[n / 2 - 1] + finite[n / 2])
            };
            let variance =
                finite.iter().map(|f| (f - mean) * (f - mean)).sum::<f32>() / n as f32;
            (best, mean, median, variance)
        };

        self.stats.last_best = best;
        self.stats.last_mean = mean;
        self.stats.last_median = median;
        self.stats.last_variance = variance;

        if best > self.stats.best_fitness_ever {
            self.stats.best_fitness_ever = best;
            self.stats.gens_since_improvement = 0;
        } else {
            self.stats.gens_since_improvement += 1;
        }
        self.stats.age_in_generations += 1;
    }

    /// Tournament pick over the parent pool: distinct entrants when the
    /// pool allows it, whole pool when the tournament is at least as wide
    /// as the pool (which degenerates to best-parent selection). Ties go
    /// to the lower member index.
    fn tournament_pick<R: rand::Rng>(
        &self,
        pool: &[usize],
        tournament_size: usize,
        rng: &mut R,
    ) -> usize {
        debug_assert!(!pool.is_empty());
        let entrants: Vec<usize> = if tournament_size >= pool.len() {
            pool.to_vec()
        } else {
            rand::seq::index::sample(rng, pool.len(), tournament_size)
                .into_iter()
                .map(|k| pool[k])
                .collect()
        };
        entrants
            .into_iter()
            .min_by(|&a, &b| {
                self.members[b]
                    .fitness
                    .total_cmp(&self.members[a].fitness)
                    .then(a.cmp(&b))
            })
            .expect("tournament has at least one entrant")
    }

    /// Build the next generation in place: elites verbatim, the rest
    /// cloned from tournament-selected parents and parameter-mutated.
    pub fn next_generation(
        &mut self,
        cfg: &EvolutionConfig,
        init: &WeightInitializer,
        svc: &RngService,
        generation: u64,
    ) {
        let count = self.members.len();
        let ranked = self.ranked_indices();
        let pool_len = ((cfg.parent_pool_percentage * count as f32).ceil() as usize)
            .clamp(1, count);
        let pool = &ranked[..pool_len];

        let mut next = Vec::with_capacity(count);
        for &idx in ranked.iter().take(cfg.elites.min(count)) {
            let mut elite = self.members[idx].clone();
            elite.age += 1;
            next.push(elite);
        }

        for slot in next.len()..count {
            let mut sel_rng = svc.stream(generation, self.id, slot as u64, StreamTag::Selection);
            let parent = self.tournament_pick(pool, cfg.tournament_size, &mut sel_rng);
            let mut child = self.members[parent].clone();
            child.fitness = f32::NEG_INFINITY;
            child.age = 0;
            let mut mut_rng =
                svc.stream(generation, self.id, slot as u64, StreamTag::ParamMutation);
            mutate_parameters(&self.genome, &mut child, &cfg.mutation, init, &mut mut_rng);
            next.push(child);
        }

        self.members = next;
    }
}
