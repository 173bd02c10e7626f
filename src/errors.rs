use thiserror::Error;

#[derive(Error, Debug)]
pub enum EvoError {
    #[error("Invalid config field `{field}`: {reason}")]
    ConfigInvalid { field: &'static str, reason: String },
    #[error("Topology invariant violated: {invariant}")]
    InvariantViolation { invariant: &'static str },
    #[error("Environment mismatch: species expects {expected_inputs} in / {expected_outputs} out, environment has {found_inputs} in / {found_outputs} out")]
    EnvironmentMismatch {
        expected_inputs: usize,
        expected_outputs: usize,
        found_inputs: usize,
        found_outputs: usize,
    },
    #[error("Diversification produced a duplicate topology after {attempts} attempts")]
    DegenerateSpecies { attempts: usize },
    #[error("Cancellation requested")]
    Cancelled,
    #[error("Snapshot error: {0}")]
    Snapshot(String),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type EvoResult<T> = Result<T, EvoError>;
