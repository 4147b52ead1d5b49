//! Raster storage and the finite-difference electrostatic solver.

mod fdm;
mod grid;

pub use fdm::{
    Boundaries, FieldSolver, SolveReport, SolverError, VoltageCell, DEFAULT_MAX_SWEEPS,
};
pub use grid::{Grid, GridError};
