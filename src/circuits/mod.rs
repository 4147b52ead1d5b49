//! Transmission-line models built from impedance samples, and their netlists.

/// Coupled-pair averaging and mode impedances.
pub mod coupled;
/// Sample merging into homogeneous segments.
pub mod merge;
/// Netlist text for traces, nets and coupled pairs.
pub mod spice;
/// RLGC lines and segment descriptors.
pub mod transmission;

pub use coupled::{CoupledPairSolver, CoupledSegment};
pub use merge::SegmentMerger;
pub use transmission::{LineModel, SegmentDescriptor, TransmissionLine, RLGC};
