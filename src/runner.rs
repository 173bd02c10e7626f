//! Evaluation orchestrator.
//!
//! Runs every individual of every species through the environment and
//! writes fitness back. The unit of parallelism is one individual's
//! evaluation: it reads the species genome and an environment template and
//! writes only its own fitness slot, so the rayon and sequential paths
//! produce bit-identical populations.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

#[cfg(feature = "rayon")]
use rayon::prelude::*;
use tracing::warn;

use crate::config::{EvolutionConfig, FitnessAggregation};
use crate::errors::{EvoError, EvoResult};
use crate::genome::Genome;
use crate::individual::Individual;
use crate::network::{forward, Scratch};
use crate::rng::RngService;
use crate::species::Species;

/// Environment contract. One instance is owned by exactly one episode at
/// a time; the orchestrator clones the template per evaluation.
pub trait Environment: Clone + Send + Sync {
    fn input_count(&self) -> usize;
    fn output_count(&self) -> usize;
    fn max_steps(&self) -> usize;
    /// Reset internal state deterministically from `seed`.
    fn reset(&mut self, seed: u64);
    fn get_observations(&self, buf: &mut [f32]);
    /// Advance one step, returning the step reward.
    fn step(&mut self, action: &[f32]) -> f32;
    fn is_terminal(&self) -> bool;
}

/// Cooperative cancellation flag, polled between individuals and between
/// generations. In-flight episodes run to completion.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

/// Collapse per-episode rewards into one fitness value.
pub fn aggregate_rewards(rewards: &[f32], aggregation: FitnessAggregation) -> f32 {
    debug_assert!(!rewards.is_empty());
    match aggregation {
        FitnessAggregation::Mean => rewards.iter().sum::<f32>() / rewards.len() as f32,
        FitnessAggregation::Min => rewards.iter().copied().fold(f32::INFINITY, f32::min),
        FitnessAggregation::Max => rewards.iter().copied().fold(f32::NEG_INFINITY, f32::max),
        FitnessAggregation::CVaR { q } => {
            let mut sorted = rewards.to_vec();
            sorted.sort_by(f32::total_cmp);
            let k = ((q * sorted.len() as f32).ceil() as usize).clamp(1, sorted.len());
            sorted[..k].iter().sum::<f32>() / k as f32
        }
    }
}

/// Run one full episode. Non-finite rewards or observations, and timed-out
/// episodes, fail the episode with `NEG_INFINITY`.
pub fn run_episode<E: Environment>(
    env: &mut E,
    genome: &Genome,
    individual: &Individual,
    seed: u64,
    timeout: Option<Duration>,
    scratch: &mut Scratch,
) -> f32 {
    env.reset(seed);
    let started = Instant::now();
    let mut obs = vec![0.0f32; env.input_count()];
    let mut action = vec![0.0f32; env.output_count()];
    let mut total = 0.0f32;
    for _ in 0..env.max_steps() {
        env.get_observations(&mut obs);
        if obs.iter().any(|o| !o.is_finite()) {
            return f32::NEG_INFINITY;
        }
        forward(genome, individual, &obs, scratch, &mut action);
        let reward = env.step(&action);
        if !reward.is_finite() {
            return f32::NEG_INFINITY;
        }
        total += reward;
        if env.is_terminal() {
            break;
        }
        if let Some(cap) = timeout {
            if started.elapsed() > cap {
                return f32::NEG_INFINITY;
            }
        }
    }
    total
}

/// Evaluate one individual: a single episode on the shared generation
/// seed, or `seeds_per_individual` episodes aggregated. Every individual
/// of a generation sees the same episode seeds, so fitness differences
/// come from the controllers alone.
fn evaluate_individual<E: Environment>(
    env_template: &E,
    genome: &Genome,
    individual: &Individual,
    cfg: &EvolutionConfig,
    svc: &RngService,
    generation: u64,
) -> f32 {
    let mut env = env_template.clone();
    let mut scratch = Scratch::for_genome(genome);
    if cfg.seeds_per_individual == 1 {
        let seed = svc.episode_seed(generation, 0, 0, 0);
        return run_episode(
            &mut env,
            genome,
            individual,
            seed,
            cfg.episode_timeout,
            &mut scratch,
        );
    }
    let rewards: Vec<f32> = (0..cfg.seeds_per_individual)
        .map(|episode| {
            let seed = svc.episode_seed(generation, 0, 0, episode as u64);
            run_episode(
                &mut env,
                genome,
                individual,
                seed,
                cfg.episode_timeout,
                &mut scratch,
            )
        })
        .collect();
    aggregate_rewards(&rewards, cfg.fitness_aggregation)
}

/// Evaluate every member of every species, writing fitness in place.
#[tracing::instrument(skip(species, env_template, cfg, svc, cancel))]
pub fn evaluate_population<E: Environment>(
    species: &mut [Species],
    env_template: &E,
    cfg: &EvolutionConfig,
    svc: &RngService,
    generation: u64,
    cancel: &CancelToken,
) -> EvoResult<()> {
    // Shape check once per species; a mismatched species fails wholesale.
    let mut valid = vec![true; species.len()];
    for (si, sp) in species.iter_mut().enumerate() {
        let (gi, go) = (sp.genome.input_count(), sp.genome.output_count());
        let (ei, eo) = (env_template.input_count(), env_template.output_count());
        if gi != ei || go != eo {
            let err = EvoError::EnvironmentMismatch {
                expected_inputs: gi,
                expected_outputs: go,
                found_inputs: ei,
                found_outputs: eo,
            };
            warn!(
                species = sp.id,
                error = %err,
                "environment shape mismatch; species fails this generation"
            );
            for m in sp.members.iter_mut() {
                m.fitness = f32::NEG_INFINITY;
            }
            valid[si] = false;
        }
    }

    let jobs: Vec<(usize, usize)> = species
        .iter()
        .enumerate()
        .filter(|(si, _)| valid[*si])
        .flat_map(|(si, sp)| (0..sp.members.len()).map(move |mi| (si, mi)))
        .collect();

    #[cfg(feature = "rayon")]
    let results: Vec<f32> = {
        let species = &*species;
        jobs.par_iter()
            .map(|&(si, mi)| {
                if cancel.is_cancelled() {
                    return f32::NEG_INFINITY;
                }
                let sp = &species[si];
                evaluate_individual(env_template, &sp.genome, &sp.members[mi], cfg, svc, generation)
            })
            .collect()
    };

    #[cfg(not(feature = "rayon"))]
    let results: Vec<f32> = {
        let mut out = Vec::with_capacity(jobs.len());
        for &(si, mi) in &jobs {
            if cancel.is_cancelled() {
                out.push(f32::NEG_INFINITY);
                continue;
            }
            let sp = &species[si];
            out.push(evaluate_individual(
                env_template,
                &sp.genome,
                &sp.members[mi],
                cfg,
                svc,
                generation,
            ));
        }
        out
    };

    for (&(si, mi), fitness) in jobs.iter().zip(results) {
        species[si].members[mi].fitness = fitness;
    }

    if cancel.is_cancelled() {
        return Err(EvoError::Cancelled);
    }
    Ok(())
}
