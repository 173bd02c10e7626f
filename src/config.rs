use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::errors::{EvoError, EvoResult};

/// Initial weight distribution, keyed per destination node by fan-in and
/// fan-out. Every variant is honored by the factory in `init`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum WeightInit {
    GlorotUniform,
    GlorotNormal,
    HeUniform,
    HeNormal,
    XavierUniform,
    XavierNormal,
    Uniform { low: f32, high: f32 },
}

impl Default for WeightInit {
    fn default() -> Self {
        WeightInit::GlorotUniform
    }
}

/// How per-episode rewards collapse into one fitness value when
/// `seeds_per_individual > 1`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum FitnessAggregation {
    Mean,
    Min,
    Max,
    /// Mean of the worst `q` quantile of episode rewards.
    CVaR { q: f32 },
}

impl Default for FitnessAggregation {
    fn default() -> Self {
        FitnessAggregation::CVaR { q: 0.5 }
    }
}

/// Edge-set sampling policy used when a species topology is built.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum EdgeSampling {
    /// Per-candidate-edge Bernoulli(density). Density must be in (0, 1].
    Dense { density: f32 },
    /// Exactly `min(in_degree, max_in_degree, candidates)` in-edges per
    /// non-input node.
    Sparse { in_degree: usize },
    /// One in-edge per non-input node, augmented until every output
    /// reaches an input.
    Minimal,
}

impl Default for EdgeSampling {
    fn default() -> Self {
        EdgeSampling::Dense { density: 1.0 }
    }
}

/// Per-target parameter mutation probabilities and magnitudes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MutationRates {
    pub weight_jitter: f32,
    pub weight_jitter_sigma: f32,
    pub weight_reset: f32,
    pub weight_l1: f32,
    pub l1_shrink_factor: f32,
    pub bias_jitter: f32,
    pub bias_jitter_sigma: f32,
    pub bias_reset: f32,
    pub activation_swap: f32,
    pub node_param: f32,
    pub node_param_sigma: f32,
}

impl Default for MutationRates {
    fn default() -> Self {
        Self {
            weight_jitter: 0.9,
            weight_jitter_sigma: 0.2,
            weight_reset: 0.03,
            weight_l1: 0.05,
            l1_shrink_factor: 0.9,
            bias_jitter: 0.9,
            bias_jitter_sigma: 0.2,
            bias_reset: 0.03,
            activation_swap: 0.03,
            node_param: 0.05,
            node_param_sigma: 0.05,
        }
    }
}

/// Per-species structural mutation probabilities, rolled once per operator
/// per generation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StructuralRates {
    pub edge_add: f32,
    pub edge_delete: f32,
    pub edge_split: f32,
    pub edge_redirect: f32,
    pub edge_swap: f32,
    /// Probability of running a weak-edge pruning scan. Ignored when
    /// `pruning_enabled` is false.
    pub prune_scan: f32,
    pub prune_threshold: f32,
    pub pruning_enabled: bool,
}

impl Default for StructuralRates {
    fn default() -> Self {
        Self {
            edge_add: 0.05,
            edge_delete: 0.02,
            edge_split: 0.03,
            edge_redirect: 0.02,
            edge_swap: 0.01,
            prune_scan: 0.02,
            prune_threshold: 1e-3,
            pruning_enabled: false,
        }
    }
}

/// Fully populated engine configuration. The core never loads files;
/// callers construct this (typically from `Default`) and hand it over.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvolutionConfig {
    pub species_count: usize,
    pub min_species_count: usize,
    pub individuals_per_species: usize,
    pub elites: usize,
    pub tournament_size: usize,
    pub parent_pool_percentage: f32,
    pub grace_generations: u32,
    pub stagnation_threshold: u32,
    pub species_diversity_threshold: f32,
    pub relative_performance_threshold: f32,
    pub weight_init: WeightInit,
    pub edge_sampling: EdgeSampling,
    pub mutation: MutationRates,
    pub structural: StructuralRates,
    pub seeds_per_individual: usize,
    pub fitness_aggregation: FitnessAggregation,
    pub master_seed: u64,
    /// Wall-clock cap per episode; a timed-out episode scores
    /// `f32::NEG_INFINITY`.
    pub episode_timeout: Option<Duration>,
    /// Bounded retries for diversification before a duplicate topology is
    /// accepted.
    pub diversification_attempts: usize,
}

impl Default for EvolutionConfig {
    fn default() -> Self {
        Self {
            species_count: 8,
            min_species_count: 2,
            individuals_per_species: 32,
            elites: 2,
            tournament_size: 3,
            parent_pool_percentage: 0.5,
            grace_generations: 5,
            stagnation_threshold: 15,
            species_diversity_threshold: 1e-6,
            relative_performance_threshold: 0.2,
            weight_init: WeightInit::default(),
            edge_sampling: EdgeSampling::default(),
            mutation: MutationRates::default(),
            structural: StructuralRates::default(),
            seeds_per_individual: 1,
            fitness_aggregation: FitnessAggregation::default(),
            master_seed: 0,
            episode_timeout: None,
            diversification_attempts: 8,
        }
    }
}

fn invalid(field: &'static str, reason: impl Into<String>) -> EvoError {
    EvoError::ConfigInvalid {
        field,
        reason: reason.into(),
    }
}

fn check_probability(field: &'static str, value: f32) -> EvoResult<()> {
    if !(0.0..=1.0).contains(&value) || value.is_nan() {
        return Err(invalid(field, format!("{value} is not in [0, 1]")));
    }
    Ok(())
}

impl EvolutionConfig {
    /// Validate every field against its declared range. Fatal at startup:
    /// the population constructor refuses an invalid config.
    pub fn validate(&self) -> EvoResult<()> {
        if self.species_count == 0 {
            return Err(invalid("species_count", "must be >= 1"));
        }
        if self.min_species_count == 0 {
            return Err(invalid("min_species_count", "must be >= 1"));
        }
        if self.min_species_count > self.species_count {
            return Err(invalid(
                "min_species_count",
                format!(
                    "{} exceeds species_count {}",
                    self.min_species_count, self.species_count
                ),
            ));
        }
        if self.individuals_per_species == 0 {
            return Err(invalid("individuals_per_species", "must be >= 1"));
        }
        if self.elites >= self.individuals_per_species {
            return Err(invalid(
                "elites",
                format!(
                    "{} must be < individuals_per_species {}",
                    self.elites, self.individuals_per_species
                ),
            ));
        }
        if self.tournament_size == 0 {
            return Err(invalid("tournament_size", "must be >= 1"));
        }
        if !(self.parent_pool_percentage > 0.0 && self.parent_pool_percentage <= 1.0) {
            return Err(invalid(
                "parent_pool_percentage",
                format!("{} is not in (0, 1]", self.parent_pool_percentage),
            ));
        }
        if self.stagnation_threshold == 0 {
            return Err(invalid("stagnation_threshold", "must be >= 1"));
        }
        if self.species_diversity_threshold < 0.0 || self.species_diversity_threshold.is_nan() {
            return Err(invalid("species_diversity_threshold", "must be >= 0"));
        }
        if !(self.relative_performance_threshold > 0.0
            && self.relative_performance_threshold <= 1.0)
        {
            return Err(invalid(
                "relative_performance_threshold",
                format!("{} is not in (0, 1]", self.relative_performance_threshold),
            ));
        }
        if let WeightInit::Uniform { low, high } = self.weight_init {
            if !(low < high) {
                return Err(invalid(
                    "weight_init",
                    format!("Uniform bounds [{low}, {high}] are not ordered"),
                ));
            }
        }
        match self.edge_sampling {
            EdgeSampling::Dense { density } => {
                if !(density > 0.0 && density <= 1.0) {
                    return Err(invalid(
                        "edge_sampling",
                        format!("Dense density {density} is not in (0, 1]"),
                    ));
                }
            }
            EdgeSampling::Sparse { in_degree } => {
                if in_degree == 0 {
                    return Err(invalid("edge_sampling", "Sparse in_degree must be >= 1"));
                }
            }
            EdgeSampling::Minimal => {}
        }
        if self.seeds_per_individual == 0 {
            return Err(invalid("seeds_per_individual", "must be >= 1"));
        }
        if let FitnessAggregation::CVaR { q } = self.fitness_aggregation {
            if !(q > 0.0 && q <= 1.0) {
                return Err(invalid(
                    "fitness_aggregation",
                    format!("CVaR q {q} is not in (0, 1]"),
                ));
            }
        }
        if self.diversification_attempts == 0 {
            return Err(invalid("diversification_attempts", "must be >= 1"));
        }

        let m = &self.mutation;
        check_probability("mutation.weight_jitter", m.weight_jitter)?;
        check_probability("mutation.weight_reset", m.weight_reset)?;
        check_probability("mutation.weight_l1", m.weight_l1)?;
        check_probability("mutation.bias_jitter", m.bias_jitter)?;
        check_probability("mutation.bias_reset", m.bias_reset)?;
        check_probability("mutation.activation_swap", m.activation_swap)?;
        check_probability("mutation.node_param", m.node_param)?;
        if m.weight_jitter_sigma < 0.0 || m.bias_jitter_sigma < 0.0 || m.node_param_sigma < 0.0 {
            return Err(invalid("mutation", "sigma values must be >= 0"));
        }
        if m.l1_shrink_factor < 0.0 || m.l1_shrink_factor > 1.0 {
            return Err(invalid(
                "mutation.l1_shrink_factor",
                format!("{} is not in [0, 1]", m.l1_shrink_factor),
            ));
        }

        let s = &self.structural;
        check_probability("structural.edge_add", s.edge_add)?;
        check_probability("structural.edge_delete", s.edge_delete)?;
        check_probability("structural.edge_split", s.edge_split)?;
        check_probability("structural.edge_redirect", s.edge_redirect)?;
        check_probability("structural.edge_swap", s.edge_swap)?;
        check_probability("structural.prune_scan", s.prune_scan)?;
        if s.prune_threshold < 0.0 {
            return Err(invalid("structural.prune_threshold", "must be >= 0"));
        }

        Ok(())
    }
}
