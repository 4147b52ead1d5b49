//! Shared error types used across submodules.

use thiserror::Error;

use crate::fields::SolverError;

/// Top-level error type for the crate.
#[derive(Debug, Error)]
pub enum ExtractError {
    /// Wraps field-solver errors (box setup, painting, convergence).
    #[error(transparent)]
    Solver(#[from] SolverError),
    /// Raised when geometry is degenerate (zero width/thickness, unresolved conductor).
    #[error("invalid geometry: {0}")]
    InvalidGeometry(String),
    /// Raised when the vacuum capacitance matrix of a coupled pair cannot be inverted.
    #[error("capacitance matrix is singular")]
    SingularMatrix,
    /// Raised when a trace references a layer missing from the stackup.
    #[error("unknown layer: {0}")]
    UnknownLayer(String),
    /// Raised when a configuration value is out of range.
    #[error("configuration error: {0}")]
    InvalidConfig(String),
    /// Raised when every sample of a trace failed to solve.
    #[error("no valid impedance samples for trace `{trace}`")]
    NoValidSamples {
        /// Name of the trace.
        trace: String,
    },
}

impl ExtractError {
    /// Returns `true` for failures that only invalidate one sample.
    #[must_use]
    pub const fn is_sample_local(&self) -> bool {
        matches!(
            self,
            Self::Solver(SolverError::DidNotConverge { .. })
                | Self::SingularMatrix
                | Self::InvalidGeometry(_)
        )
    }
}
