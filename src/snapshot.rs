//! Binary and JSON persistence for species topologies and individuals.
//!
//! The binary format is bincode over the snapshot structs below, guarded
//! by a magic number and a version. Parameter arrays round-trip
//! bit-exactly, including `NEG_INFINITY` fitness, which is why the binary
//! path exists at all; the JSON export is for tooling and inspection.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::activations::Activation;
use crate::errors::{EvoError, EvoResult};
use crate::genome::{Edge, Genome, Row};
use crate::individual::Individual;
use crate::population::Champion;

/// "EVOS" in ASCII.
pub const SNAPSHOT_MAGIC: u32 = 0x4556_4F53;
pub const SNAPSHOT_VERSION: u16 = 1;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpeciesSnapshot {
    pub magic: u32,
    pub version: u16,
    pub species_id: u64,
    pub rows: Vec<Row>,
    /// Sorted edge array, exactly as evaluated.
    pub edges: Vec<Edge>,
    pub row_vocab: Vec<Vec<Activation>>,
    pub max_in_degree: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndividualSnapshot {
    pub species_id: u64,
    pub weights: Vec<f32>,
    pub biases: Vec<f32>,
    pub node_params: Vec<f32>,
    pub activations: Vec<Activation>,
    pub fitness: f32,
    pub age: u32,
}

/// A champion: its species topology plus its parameter arrays, enough to
/// re-evaluate later without the population that produced it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChampionSnapshot {
    pub species: SpeciesSnapshot,
    pub individual: IndividualSnapshot,
}

impl SpeciesSnapshot {
    pub fn capture(species_id: u64, genome: &Genome) -> Self {
        Self {
            magic: SNAPSHOT_MAGIC,
            version: SNAPSHOT_VERSION,
            species_id,
            rows: genome.rows().to_vec(),
            edges: genome.edges().to_vec(),
            row_vocab: genome.row_vocab().to_vec(),
            max_in_degree: genome.max_in_degree(),
        }
    }

    pub fn into_genome(self) -> EvoResult<(u64, Genome)> {
        if self.magic != SNAPSHOT_MAGIC {
            return Err(EvoError::Snapshot(format!(
                "bad magic {:#010x}",
                self.magic
            )));
        }
        if self.version != SNAPSHOT_VERSION {
            return Err(EvoError::Snapshot(format!(
                "unsupported version {}",
                self.version
            )));
        }
        let genome = Genome::assemble(self.rows, self.edges, self.row_vocab, self.max_in_degree);
        crate::genome::validate::validate_genome(&genome)?;
        Ok((self.species_id, genome))
    }
}

impl IndividualSnapshot {
    pub fn capture(species_id: u64, individual: &Individual) -> Self {
        Self {
            species_id,
            weights: individual.weights.to_vec(),
            biases: individual.biases.to_vec(),
            node_params: individual.node_params.to_vec(),
            activations: individual.activations.clone(),
            fitness: individual.fitness,
            age: individual.age,
        }
    }

    pub fn into_individual(self) -> Individual {
        Individual {
            weights: ndarray::Array1::from(self.weights),
            biases: ndarray::Array1::from(self.biases),
            node_params: ndarray::Array1::from(self.node_params),
            activations: self.activations,
            fitness: self.fitness,
            age: self.age,
        }
    }
}

impl ChampionSnapshot {
    pub fn capture(champion: &Champion) -> Self {
        Self {
            species: SpeciesSnapshot::capture(champion.species_id, &champion.genome),
            individual: IndividualSnapshot::capture(champion.species_id, &champion.individual),
        }
    }

    pub fn into_champion(self) -> EvoResult<Champion> {
        let (species_id, genome) = self.species.into_genome()?;
        let individual = self.individual.into_individual();
        crate::genome::validate::validate_coherence(&genome, &individual)?;
        Ok(Champion {
            species_id,
            genome,
            individual,
        })
    }
}

pub fn to_bytes<T: Serialize>(value: &T) -> EvoResult<Vec<u8>> {
    bincode::serialize(value).map_err(|e| EvoError::Snapshot(e.to_string()))
}

pub fn from_bytes<T: for<'de> Deserialize<'de>>(bytes: &[u8]) -> EvoResult<T> {
    bincode::deserialize(bytes).map_err(|e| EvoError::Snapshot(e.to_string()))
}

pub fn to_json<T: Serialize>(value: &T) -> EvoResult<String> {
    serde_json::to_string_pretty(value).map_err(|e| EvoError::Snapshot(e.to_string()))
}

pub fn from_json<T: for<'de> Deserialize<'de>>(json: &str) -> EvoResult<T> {
    serde_json::from_str(json).map_err(|e| EvoError::Snapshot(e.to_string()))
}

pub fn save<T: Serialize>(value: &T, path: &Path) -> EvoResult<()> {
    let bytes = to_bytes(value)?;
    std::fs::write(path, bytes)?;
    Ok(())
}

pub fn load<T: for<'de> Deserialize<'de>>(path: &Path) -> EvoResult<T> {
    let bytes = std::fs::read(path)?;
    from_bytes(&bytes)
}
