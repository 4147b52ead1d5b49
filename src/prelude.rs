//! Convenience re-exports for extracting trace impedance.

pub use crate::circuits::{
    spice::{coupled_nets_netlist, coupled_subckt, net_netlist, trace_subckt, via_subckt},
    CoupledPairSolver, CoupledSegment, LineModel, SegmentDescriptor, SegmentMerger, TransmissionLine, RLGC,
};
pub use crate::constants::*;
pub use crate::errors::ExtractError;
pub use crate::extraction::{
    BackendFactory, Board, CoupledModel, CoupledNetsModel, CoupledSplitSet, ExtractionConfig, Extractor, Net, NetModel,
    NetSummary, TraceModel,
};
pub use crate::fields::{Boundaries, FieldSolver, Grid, SolverError};
pub use crate::geometry::{
    detect_coupling, CoupledPair, CouplingSplit, Layer, LayerKind, Stackup, Trace, TracePath, Via,
};
pub use crate::impedance::{CoupledSolution, CrossSectionBuilder, ImpedanceBackend, LineSolution};
pub use crate::materials::BoundaryKind;
pub use crate::math::{CScalar, Scalar, M2, R2};
pub use crate::planes::{CopperLookup, FullPlane, Rect, RectRegions, ReferencePlanes};
pub use crate::sampler::{ImpedanceSampler, SamplerConfig};
pub use crate::sweep::{impedance_report, logspace_hz, sample_positions};
pub use crate::vias::{ViaModel, ViaModeler, ViaSpan};
