//! Weight-initialization strategy factory.
//!
//! A real registry over the [`WeightInit`] enum: every variant is honored,
//! with per-destination-node fan-in/fan-out scaling. Glorot and Xavier are
//! the same scheme under two names; both are accepted and map to the same
//! formulas.

use ndarray::Array1;
use ndarray_rand::rand_distr::{Distribution, Normal};
use rand::Rng;

use crate::config::WeightInit;
use crate::genome::Genome;

/// Bias init bound. Biases start small but non-zero so evolution-time bias
/// mutation has a gradient of starting points to work from.
pub const BIAS_INIT_BOUND: f32 = 0.1;

#[derive(Debug, Clone, Copy)]
pub struct WeightInitializer {
    strategy: WeightInit,
}

impl WeightInitializer {
    pub fn new(strategy: WeightInit) -> Self {
        Self { strategy }
    }

    pub fn strategy(&self) -> WeightInit {
        self.strategy
    }

    /// Uniform-equivalent bound for this strategy at the given fan. Used
    /// both by uniform draws and by the WeightReset mutation operator,
    /// which resets into `U(-bound, bound)`.
    pub fn bound(&self, fan_in: usize, fan_out: usize) -> f32 {
        let fan_in = fan_in.max(1) as f32;
        let fan_out = fan_out.max(1) as f32;
        match self.strategy {
            WeightInit::GlorotUniform | WeightInit::XavierUniform => {
                (6.0 / (fan_in + fan_out)).sqrt()
            }
            WeightInit::GlorotNormal | WeightInit::XavierNormal => {
                // Two standard deviations of the matching normal.
                2.0 * (2.0 / (fan_in + fan_out)).sqrt()
            }
            WeightInit::HeUniform => (6.0 / fan_in).sqrt(),
            WeightInit::HeNormal => 2.0 * (2.0 / fan_in).sqrt(),
            WeightInit::Uniform { low, high } => (high - low).abs() / 2.0,
        }
    }

    /// Draw one weight for an edge into a node with the given fan.
    pub fn sample<R: Rng>(&self, fan_in: usize, fan_out: usize, rng: &mut R) -> f32 {
        let fan_in_f = fan_in.max(1) as f32;
        let fan_out_f = fan_out.max(1) as f32;
        match self.strategy {
            WeightInit::GlorotUniform | WeightInit::XavierUniform | WeightInit::HeUniform => {
                let b = self.bound(fan_in, fan_out);
                rng.gen_range(-b..=b)
            }
            WeightInit::GlorotNormal | WeightInit::XavierNormal => {
                let std = (2.0 / (fan_in_f + fan_out_f)).sqrt();
                Normal::new(0.0, std)
                    .expect("finite positive std")
                    .sample(rng)
            }
            WeightInit::HeNormal => {
                let std = (2.0 / fan_in_f).sqrt();
                Normal::new(0.0, std)
                    .expect("finite positive std")
                    .sample(rng)
            }
            WeightInit::Uniform { low, high } => rng.gen_range(low..=high),
        }
    }

    /// Initial weight array for a genome, one draw per edge, scaled by the
    /// destination node's fan.
    pub fn init_weights<R: Rng>(&self, genome: &Genome, rng: &mut R) -> Array1<f32> {
        let fans = node_fans(genome);
        let weights: Vec<f32> = genome
            .edges()
            .iter()
            .map(|e| {
                let (fan_in, fan_out) = fans[e.dest as usize];
                self.sample(fan_in, fan_out, rng)
            })
            .collect();
        Array1::from(weights)
    }
}

/// (fan_in, fan_out) for every node in one pass over the edge array.
pub fn node_fans(genome: &Genome) -> Vec<(usize, usize)> {
    let mut fans = vec![(0usize, 0usize); genome.node_count()];
    for e in genome.edges() {
        fans[e.dest as usize].0 += 1;
        fans[e.source as usize].1 += 1;
    }
    fans
}
