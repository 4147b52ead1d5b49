#![cfg_attr(docsrs, feature(doc_auto_cfg))]
#![warn(clippy::all, clippy::cargo, clippy::nursery, missing_docs)]
#![doc = include_str!("../README.md")]

/// Physical constants and unit helpers.
pub mod constants;
/// Scalar and small-matrix aliases, Gauss-Jordan inversion.
pub mod math;
/// Error types shared between modules.
pub mod errors;
/// Material cells painted into the field solver.
pub mod materials;
/// Raster grids and the SOR electrostatic solver.
pub mod fields;
/// Stackup, trace paths and coupled pairs.
pub mod geometry;
/// Reference copper lookups and perpendicular scans.
pub mod planes;
/// Impedance backend contract and the raster cross-section backend.
pub mod impedance;
/// Per-position cross-section sampling along traces.
pub mod sampler;
/// Via barrel models.
pub mod vias;
/// Segment merging, coupled reduction and netlist output.
pub mod circuits;
/// Sample placement and frequency reports.
pub mod sweep;
/// Configuration and the parallel extraction driver.
pub mod extraction;

/// Common exports for downstream crates.
pub mod prelude;
