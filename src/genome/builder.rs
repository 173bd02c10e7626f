//! Layered topology builder.
//!
//! Declares rows in evaluation order (one input row, any number of hidden
//! rows, one output row), then samples an edge set under one of three
//! policies. The builder is reusable: `build` borrows it, so the population
//! can stamp out many species from one layout with different RNG streams.

use rand::seq::index::sample;
use rand::Rng;

use crate::activations::Activation;
use crate::config::EdgeSampling;
use crate::errors::{EvoError, EvoResult};
use crate::genome::{Edge, Genome, Row, RowKind};

const DEFAULT_MAX_IN_DEGREE: u32 = 16;

#[derive(Debug, Clone)]
pub struct GenomeBuilder {
    input: Option<u32>,
    hidden: Vec<(u32, Vec<Activation>)>,
    output: Option<(u32, Vec<Activation>)>,
    max_in_degree: u32,
}

impl Default for GenomeBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl GenomeBuilder {
    pub fn new() -> Self {
        Self {
            input: None,
            hidden: Vec::new(),
            output: None,
            max_in_degree: DEFAULT_MAX_IN_DEGREE,
        }
    }

    pub fn add_input_row(mut self, nodes: u32) -> Self {
        self.input = Some(nodes);
        self
    }

    pub fn add_hidden_row(mut self, nodes: u32, allowed: &[Activation]) -> Self {
        self.hidden.push((nodes, allowed.to_vec()));
        self
    }

    /// Convenience for stacks of identical hidden rows.
    pub fn add_hidden_rows(mut self, nodes: u32, allowed: &[Activation], repeat: usize) -> Self {
        for _ in 0..repeat {
            self.hidden.push((nodes, allowed.to_vec()));
        }
        self
    }

    pub fn add_output_row(mut self, nodes: u32, allowed: &[Activation]) -> Self {
        self.output = Some((nodes, allowed.to_vec()));
        self
    }

    pub fn with_max_in_degree(mut self, max_in_degree: u32) -> Self {
        self.max_in_degree = max_in_degree;
        self
    }

    fn invalid(reason: &str) -> EvoError {
        EvoError::ConfigInvalid {
            field: "genome_builder",
            reason: reason.to_string(),
        }
    }

    fn layout(&self) -> EvoResult<(Vec<Row>, Vec<Vec<Activation>>)> {
        let input = self.input.ok_or_else(|| Self::invalid("no input row declared"))?;
        let (out_nodes, out_vocab) = self
            .output
            .clone()
            .ok_or_else(|| Self::invalid("no output row declared"))?;
        if input == 0 || out_nodes == 0 {
            return Err(Self::invalid("rows must have at least one node"));
        }
        if out_vocab.is_empty() {
            return Err(Self::invalid("output row has an empty activation set"));
        }
        if self.max_in_degree == 0 {
            return Err(Self::invalid("max_in_degree must be >= 1"));
        }

        let mut rows = Vec::with_capacity(self.hidden.len() + 2);
        let mut vocab = Vec::with_capacity(self.hidden.len() + 2);
        let mut cursor = 0u32;
        rows.push(Row {
            kind: RowKind::Input,
            node_start: cursor,
            node_count: input,
        });
        vocab.push(Vec::new());
        cursor += input;
        for (nodes, acts) in &self.hidden {
            if *nodes == 0 {
                return Err(Self::invalid("rows must have at least one node"));
            }
            if acts.is_empty() {
                return Err(Self::invalid("hidden row has an empty activation set"));
            }
            rows.push(Row {
                kind: RowKind::Hidden,
                node_start: cursor,
                node_count: *nodes,
            });
            vocab.push(acts.clone());
            cursor += nodes;
        }
        rows.push(Row {
            kind: RowKind::Output,
            node_start: cursor,
            node_count: out_nodes,
        });
        vocab.push(out_vocab);
        Ok((rows, vocab))
    }

    /// Finalize into a species topology by sampling an edge set.
    pub fn build<R: Rng>(&self, sampling: EdgeSampling, rng: &mut R) -> EvoResult<Genome> {
        let (rows, vocab) = self.layout()?;
        let edges = match sampling {
            EdgeSampling::Dense { density } => {
                if !(density > 0.0 && density <= 1.0) {
                    return Err(EvoError::ConfigInvalid {
                        field: "edge_sampling",
                        reason: format!("Dense density {density} is not in (0, 1]"),
                    });
                }
                self.sample_dense(&rows, density, rng)
            }
            EdgeSampling::Sparse { in_degree } => self.sample_sparse(&rows, in_degree, rng),
            EdgeSampling::Minimal => self.sample_minimal(&rows, rng),
        };
        let genome = Genome::assemble(rows, edges, vocab, self.max_in_degree);
        validate_built(&genome)?;
        Ok(genome)
    }

    /// Per-candidate-edge Bernoulli(density) over the preceding row, so
    /// density 1.0 yields the fully connected layer-to-layer DAG (capped
    /// by the in-degree bound); skip connections enter later through the
    /// structural operators. A node over its in-degree cap rejects
    /// further candidates; a node left with no in-edges gets one forced
    /// random source.
    fn sample_dense<R: Rng>(&self, rows: &[Row], density: f32, rng: &mut R) -> Vec<Edge> {
        let mut edges = Vec::new();
        for pair in rows.windows(2) {
            let (prev, row) = (pair[0], pair[1]);
            let sources = prev.node_start..prev.node_start + prev.node_count;
            for dest in row.node_start..row.node_start + row.node_count {
                let mut in_degree = 0u32;
                for source in sources.clone() {
                    if rng.gen::<f32>() >= density {
                        continue;
                    }
                    if in_degree >= self.max_in_degree {
                        continue;
                    }
                    edges.push(Edge { source, dest });
                    in_degree += 1;
                }
                if in_degree == 0 {
                    let source = rng.gen_range(sources.clone());
                    edges.push(Edge { source, dest });
                }
            }
        }
        edges
    }

    /// Exactly `min(k, max_in_degree, candidates)` in-edges per non-input
    /// node, sampled without replacement.
    fn sample_sparse<R: Rng>(&self, rows: &[Row], k: usize, rng: &mut R) -> Vec<Edge> {
        let mut edges = Vec::new();
        for row in rows.iter().skip(1) {
            let candidates = row.node_start as usize;
            let take = k.min(self.max_in_degree as usize).min(candidates);
            for dest in row.node_start..row.node_start + row.node_count {
                let mut chosen: Vec<usize> = sample(rng, candidates, take).into_vec();
                chosen.sort_unstable();
                for source in chosen {
                    edges.push(Edge {
                        source: source as u32,
                        dest,
                    });
                }
            }
        }
        edges
    }

    /// One random in-edge per non-input node. In-edges come from strictly
    /// lower rows, so following them from any node walks down to the input
    /// row; the connectivity sweep below is a safety net, not the common
    /// path.
    fn sample_minimal<R: Rng>(&self, rows: &[Row], rng: &mut R) -> Vec<Edge> {
        let mut edges = Vec::new();
        for row in rows.iter().skip(1) {
            let candidates = row.node_start;
            for dest in row.node_start..row.node_start + row.node_count {
                let source = rng.gen_range(0..candidates);
                edges.push(Edge { source, dest });
            }
        }

        // Augment until every output reaches an input: redirect one in-edge
        // of each unreachable output onto a random input node. Redirecting
        // keeps the in-degree unchanged, so it is always legal.
        let inputs = rows[0].node_count;
        let last = rows[rows.len() - 1];
        loop {
            let probe = Genome::assemble(
                rows.to_vec(),
                edges.clone(),
                rows.iter().map(|_| Vec::new()).collect(),
                self.max_in_degree,
            );
            let orphan = (last.node_start..last.node_start + last.node_count)
                .find(|&n| !probe.is_input_reachable(n));
            let Some(orphan) = orphan else {
                break;
            };
            let source = rng.gen_range(0..inputs);
            let slot = edges
                .iter()
                .position(|e| e.dest == orphan)
                .expect("every non-input node was given an in-edge");
            edges[slot].source = source;
        }
        edges
    }
}

fn validate_built(genome: &Genome) -> EvoResult<()> {
    crate::genome::validate::validate_genome(genome)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn rng() -> StdRng {
        StdRng::seed_from_u64(42)
    }

    fn layout() -> GenomeBuilder {
        GenomeBuilder::new()
            .add_input_row(2)
            .add_hidden_row(3, &[Activation::Tanh])
            .add_hidden_row(3, &[Activation::Tanh])
            .add_output_row(1, &[Activation::Linear])
            .with_max_in_degree(12)
    }

    #[test]
    fn test_dense_full_density_edge_count() {
        // Layer-to-layer candidates: 2*3 + 3*3 + 3*1, all below the cap.
        let g = layout().build(EdgeSampling::Dense { density: 1.0 }, &mut rng()).unwrap();
        assert_eq!(g.edge_count(), 6 + 9 + 3);
    }

    #[test]
    fn test_dense_caps_in_degree() {
        let g = GenomeBuilder::new()
            .add_input_row(8)
            .add_output_row(1, &[Activation::Linear])
            .with_max_in_degree(3)
            .build(EdgeSampling::Dense { density: 1.0 }, &mut rng())
            .unwrap();
        assert_eq!(g.edge_count(), 3);
    }

    #[test]
    fn test_dense_zero_density_rejected() {
        let err = layout().build(EdgeSampling::Dense { density: 0.0 }, &mut rng());
        assert!(err.is_err());
    }

    #[test]
    fn test_dense_never_leaves_orphans() {
        let g = layout()
            .build(EdgeSampling::Dense { density: 0.05 }, &mut rng())
            .unwrap();
        for node in 2..g.node_count() as u32 {
            assert!(g.in_degree(node) >= 1, "node {node} has no in-edges");
        }
    }

    #[test]
    fn test_sparse_exact_in_degrees() {
        let g = layout().build(EdgeSampling::Sparse { in_degree: 2 }, &mut rng()).unwrap();
        for node in 2..g.node_count() as u32 {
            assert_eq!(g.in_degree(node), 2);
        }
    }

    #[test]
    fn test_minimal_connects_outputs() {
        let g = layout().build(EdgeSampling::Minimal, &mut rng()).unwrap();
        assert!(g.outputs_all_reachable());
        for node in 2..g.node_count() as u32 {
            assert!(g.in_degree(node) >= 1);
        }
    }

    #[test]
    fn test_missing_rows_rejected() {
        let b = GenomeBuilder::new().add_input_row(2);
        assert!(b.build(EdgeSampling::Minimal, &mut rng()).is_err());
    }

    #[test]
    fn test_repeat_rows_expand() {
        let g = GenomeBuilder::new()
            .add_input_row(1)
            .add_hidden_rows(2, &[Activation::Relu], 3)
            .add_output_row(1, &[Activation::Linear])
            .build(EdgeSampling::Minimal, &mut rng())
            .unwrap();
        assert_eq!(g.rows().len(), 5);
    }
}
