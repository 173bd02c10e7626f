//! Speciated neuro-evolution of fixed-topology, strictly feed-forward
//! controllers.
//!
//! The engine evolves populations of species, each a shared layered DAG
//! with Structure-of-Arrays parameters per individual. Evolution is
//! clone-and-mutate (no crossover), with tournament selection, elitism,
//! stagnation-driven culling, and diversification of surviving
//! topologies. Given a master seed, the trajectory is bit-identical
//! across runs and across the parallel and sequential evaluators.

pub mod activations;
pub mod config;
pub mod errors;
pub mod genome;
pub mod individual;
pub mod init;
pub mod mutation;
pub mod network;
pub mod population;
pub mod rng;
pub mod runner;
pub mod snapshot;
pub mod species;

pub use activations::Activation;
pub use config::{
    EdgeSampling, EvolutionConfig, FitnessAggregation, MutationRates, StructuralRates, WeightInit,
};
pub use errors::{EvoError, EvoResult};
pub use genome::builder::GenomeBuilder;
pub use individual::Individual;
pub use population::{Champion, GenerationReport, Population, SpeciesReport};
pub use runner::{CancelToken, Environment};
pub use species::Species;
