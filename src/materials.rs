//! Material definitions painted into the field-solver raster.

use crate::math::Scalar;

/// Identifier of a registered material (conductor or dielectric).
pub type MaterialId = u16;

/// Boundary condition attached to a material or grid edge.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BoundaryKind {
    /// Free node, updated by relaxation.
    #[default]
    None,
    /// Zero normal derivative (open/symmetry wall).
    Neumann,
    /// Fixed potential.
    Dirichlet,
}

/// Physical nature of a material.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MaterialKind {
    /// Insulator characterized by its relative permittivity.
    Dielectric,
    /// Perfect conductor held at a fixed voltage.
    Metal,
}

/// One registered material as stored in every raster cell it covers.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MaterialCell {
    /// Material identifier.
    pub id: MaterialId,
    /// Dielectric or metal.
    pub kind: MaterialKind,
    /// Relative permittivity εr (1 for metals).
    pub permittivity: Scalar,
    /// Fixed voltage (metals only).
    pub voltage: Scalar,
    /// Boundary kind imposed on the nodes of this material.
    pub boundary: BoundaryKind,
}

impl MaterialCell {
    /// Dielectric with relative permittivity `epsilon_r`.
    #[must_use]
    pub const fn dielectric(id: MaterialId, epsilon_r: Scalar) -> Self {
        Self {
            id,
            kind: MaterialKind::Dielectric,
            permittivity: epsilon_r,
            voltage: 0.0,
            boundary: BoundaryKind::None,
        }
    }

    /// Conductor at `voltage`.
    #[must_use]
    pub const fn metal(id: MaterialId, voltage: Scalar, boundary: BoundaryKind) -> Self {
        Self {
            id,
            kind: MaterialKind::Metal,
            permittivity: 1.0,
            voltage,
            boundary,
        }
    }

    /// Returns `true` for conductors.
    #[must_use]
    pub fn is_metal(&self) -> bool {
        self.kind == MaterialKind::Metal
    }
}

/// DC series resistance per meter of a rectangular conductor.
///
/// Returns `None` for non-positive cross-section area or conductivity.
#[must_use]
pub fn dc_resistance_per_m(conductivity: Scalar, width: Scalar, thickness: Scalar) -> Option<Scalar> {
    let area = width * thickness;
    if !(area > 0.0 && conductivity > 0.0) || !area.is_finite() {
        return None;
    }
    Some(1.0 / (conductivity * area))
}
