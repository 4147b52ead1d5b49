//! Impedance backends: the capability contract used by the sampler and the
//! native raster implementation.

mod cross_section;

pub use cross_section::CrossSectionBuilder;

use crate::circuits::transmission::RLGC;
use crate::errors::ExtractError;
use crate::math::{Scalar, M2};

/// Single-ended result of one cross-section.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LineSolution {
    /// Characteristic impedance (Ω).
    pub z0: Scalar,
    /// Propagation velocity (m/s).
    pub velocity: Scalar,
    /// Per-unit-length parameters.
    pub rlgc: RLGC,
    /// Served from the backend cache without solving.
    pub cache_hit: bool,
}

/// Coupled-pair result of one cross-section.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CoupledSolution {
    /// Odd-mode impedance (Ω).
    pub z_odd: Scalar,
    /// Even-mode impedance (Ω).
    pub z_even: Scalar,
    /// Maxwell capacitance matrix (F/m).
    pub c: M2,
    /// Inductance matrix (H/m).
    pub l: M2,
    /// Resistance matrix (Ω/m).
    pub r: M2,
    /// Conductance matrix (S/m).
    pub g: M2,
    /// Served from the backend cache without solving.
    pub cache_hit: bool,
}

/// Capability contract of a 2D cross-section impedance solver.
///
/// Coordinates are meters relative to the cross-section center; `y` grows
/// downward (deeper into the board). A backend is stateful and must be owned
/// by exactly one worker.
pub trait ImpedanceBackend: Send {
    /// Raster edge length in meters.
    fn set_precision(&mut self, precision: Scalar) -> Result<(), ExtractError>;
    /// Simulation window in meters.
    fn set_box_size(&mut self, width: Scalar, height: Scalar) -> Result<(), ExtractError>;
    /// Places a grounded rectangle with its top edge at `y`, centered on `x`.
    fn add_ground(&mut self, x: Scalar, y: Scalar, width: Scalar, thickness: Scalar);
    /// Places the signal conductor.
    fn add_wire(&mut self, x: Scalar, y: Scalar, width: Scalar, thickness: Scalar, conductivity: Scalar);
    /// Places the second conductor of a coupled pair.
    fn add_coupler(&mut self, x: Scalar, y: Scalar, width: Scalar, thickness: Scalar, conductivity: Scalar);
    /// Places a dielectric rectangle.
    fn add_dielectric(&mut self, x: Scalar, y: Scalar, width: Scalar, thickness: Scalar, epsilon_r: Scalar);
    /// Places a grounded annulus of inner `radius` centered on `(x, y)`.
    fn add_ring_ground(&mut self, x: Scalar, y: Scalar, radius: Scalar, thickness: Scalar);
    /// Places an annular signal conductor, e.g. a via barrel.
    fn add_ring_wire(&mut self, x: Scalar, y: Scalar, radius: Scalar, thickness: Scalar, conductivity: Scalar);
    /// Solves the single-ended line formed by the wire.
    fn calc_z0(&mut self) -> Result<LineSolution, ExtractError>;
    /// Solves the wire/coupler pair.
    fn calc_coupled_z0(&mut self) -> Result<CoupledSolution, ExtractError>;
    /// Removes placed elements, keeping the cache.
    fn clean(&mut self);
    /// Removes placed elements and drops the cache.
    fn clean_all(&mut self);
}

/// Odd- and even-mode impedances from inductance and capacitance matrices.
#[must_use]
pub fn mode_impedances(l: &M2, c: &M2) -> (Scalar, Scalar) {
    let odd = (((l[(0, 0)] - l[(0, 1)]) / (c[(0, 0)] - c[(0, 1)])).sqrt()
        + ((l[(1, 1)] - l[(1, 0)]) / (c[(1, 1)] - c[(1, 0)])).sqrt())
        * 0.5;
    let even = (((l[(0, 0)] + l[(0, 1)]) / (c[(0, 0)] + c[(0, 1)])).sqrt()
        + ((l[(1, 1)] + l[(1, 0)]) / (c[(1, 1)] + c[(1, 0)])).sqrt())
        * 0.5;
    (odd, even)
}
