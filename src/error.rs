use thiserror::Error;

use crate::cfa::Location;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid configuration: {0}")]
    Configuration(String),

    #[error("solver failure: {0}")]
    Solver(#[from] SolverError),

    #[error("refinement failed: {reason}")]
    RefinementFailed { reason: RefinementFailure },

    #[error("inconsistent ARG: {0}")]
    InconsistentArg(String),

    #[error("unsupported edge `{edge}`: {reason}")]
    UnsupportedEdge { edge: String, reason: String },

    #[error("analysis interrupted")]
    Interrupted,
}

#[derive(Debug, Error)]
pub enum SolverError {
    #[error("timeout after {steps} search steps ({variables} variables, formula size {size})")]
    Timeout { steps: u64, variables: usize, size: usize },

    #[error("unsupported formula: {0}")]
    Unsupported(String),

    #[error("formula may have models outside the integer window [{min}, {max}]")]
    OutOfRange { min: i64, max: i64 },

    #[error("invalid interpolants: {0}")]
    InvalidInterpolants(String),
}

#[derive(Debug, Error)]
pub enum RefinementFailure {
    #[error("repeated counterexample at {location} with block formulas [{formulas}]")]
    RepeatedCounterexample { location: Location, formulas: String },

    #[error("path does not end in an abstraction state")]
    NoTargetAbstraction,
}

impl Error {
    pub fn inconsistent(message: impl Into<String>) -> Self {
        Error::InconsistentArg(message.into())
    }

    pub fn is_interrupted(&self) -> bool {
        matches!(self, Error::Interrupted)
    }
}
