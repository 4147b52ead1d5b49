//! Finite-difference electrostatic solver on a rasterized cross-section.
//!
//! The material raster has `rows × cols` cells of edge `cell_size`. Potentials
//! live on the `(rows + 1) × (cols + 1)` cell corners and are relaxed with
//! successive over-relaxation (SOR). Conductors are Dirichlet nodes; the four
//! box edges carry their own boundary kind.

use std::collections::BTreeMap;

use log::debug;
use thiserror::Error;

use crate::constants::VACUUM_PERMITTIVITY;
use crate::materials::{BoundaryKind, MaterialCell, MaterialId, MaterialKind};
use crate::math::Scalar;

use super::grid::{Grid, GridError};

/// Default ceiling on relaxation sweeps per solve.
pub const DEFAULT_MAX_SWEEPS: usize = 20_000;

/// Errors raised by [`FieldSolver`].
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SolverError {
    /// Grid construction failed.
    #[error(transparent)]
    Grid(#[from] GridError),
    /// Box dimensions or cell size are not strictly positive.
    #[error("invalid solver box {rows}x{cols} with cell size {cell_size}")]
    InvalidBox {
        /// Requested rows.
        rows: usize,
        /// Requested columns.
        cols: usize,
        /// Requested cell edge in meters.
        cell_size: Scalar,
    },
    /// Material id was never registered.
    #[error("material {0} is not registered")]
    UnknownMaterial(MaterialId),
    /// Cell coordinate outside the raster.
    #[error("cell ({row}, {col}) is outside the raster")]
    OutOfBounds {
        /// Row index.
        row: usize,
        /// Column index.
        col: usize,
    },
    /// Field integration requested before any solve.
    #[error("no potential has been solved yet")]
    NotSolved,
    /// Sweep ceiling reached before the residual threshold.
    #[error("relaxation did not converge after {sweeps} sweeps (residual {residual:e})")]
    DidNotConverge {
        /// Sweeps performed.
        sweeps: usize,
        /// Residual of the last sweep.
        residual: Scalar,
    },
}

/// Boundary kinds of the four box edges.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Boundaries {
    /// Row 0 of the node grid.
    pub top: BoundaryKind,
    /// Last row of the node grid.
    pub bottom: BoundaryKind,
    /// Column 0 of the node grid.
    pub left: BoundaryKind,
    /// Last column of the node grid.
    pub right: BoundaryKind,
}

impl Boundaries {
    /// Grounded lid and floor, open side walls.
    #[must_use]
    pub const fn cross_section() -> Self {
        Self {
            top: BoundaryKind::Dirichlet,
            bottom: BoundaryKind::Dirichlet,
            left: BoundaryKind::Neumann,
            right: BoundaryKind::Neumann,
        }
    }
}

impl Default for Boundaries {
    fn default() -> Self {
        Self::cross_section()
    }
}

/// Potential node at a cell corner.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VoltageCell {
    /// Potential in volts.
    pub voltage: Scalar,
    /// Permittivity of the cell below-right of this corner.
    pub permittivity: Scalar,
    /// Boundary kind (free nodes are relaxed).
    pub boundary: BoundaryKind,
    /// Material the node was painted from, if any.
    pub id: Option<MaterialId>,
}

impl Default for VoltageCell {
    fn default() -> Self {
        Self {
            voltage: 0.0,
            permittivity: 1.0,
            boundary: BoundaryKind::None,
            id: None,
        }
    }
}

/// Outcome of a converged solve.
#[derive(Debug, Clone, PartialEq)]
pub struct SolveReport {
    /// Sweeps performed.
    pub sweeps: usize,
    /// Residual of the final sweep.
    pub residual: Scalar,
    /// Relaxation factor ω used.
    pub omega: Scalar,
    /// Maximum residual of every sweep, in order.
    pub residual_history: Vec<Scalar>,
}

/// SOR solver for the 2D Laplace equation with piecewise-constant permittivity.
#[derive(Debug, Clone)]
pub struct FieldSolver {
    cell_size: Scalar,
    materials: BTreeMap<MaterialId, MaterialCell>,
    cells: Grid<Option<MaterialId>>,
    nodes: Grid<VoltageCell>,
    boundaries: Boundaries,
    max_sweeps: usize,
    solved_vacuum: Option<bool>,
}

impl FieldSolver {
    /// Creates a solver for a `rows × cols` raster of square cells.
    pub fn new(rows: usize, cols: usize, cell_size: Scalar) -> Result<Self, SolverError> {
        let mut solver = Self {
            cell_size,
            materials: BTreeMap::new(),
            cells: Grid::new(1, 1, 0, None)?,
            nodes: Grid::new(2, 2, 0, VoltageCell::default())?,
            boundaries: Boundaries::default(),
            max_sweeps: DEFAULT_MAX_SWEEPS,
            solved_vacuum: None,
        };
        solver.set_box(rows, cols, cell_size)?;
        Ok(solver)
    }

    /// Sets the sweep ceiling.
    #[must_use]
    pub fn with_max_sweeps(mut self, max_sweeps: usize) -> Self {
        self.max_sweeps = max_sweeps.max(1);
        self
    }

    /// Resizes the raster; all painted cells are cleared, materials are kept.
    pub fn set_box(&mut self, rows: usize, cols: usize, cell_size: Scalar) -> Result<(), SolverError> {
        if rows == 0 || cols == 0 || !(cell_size > 0.0) || !cell_size.is_finite() {
            return Err(SolverError::InvalidBox {
                rows,
                cols,
                cell_size,
            });
        }
        self.cells = Grid::new(rows, cols, 0, None)?;
        self.nodes = Grid::new(rows + 1, cols + 1, 0, VoltageCell::default())?;
        self.cell_size = cell_size;
        self.solved_vacuum = None;
        Ok(())
    }

    /// Raster rows.
    #[must_use]
    pub const fn rows(&self) -> usize {
        self.cells.rows()
    }

    /// Raster columns.
    #[must_use]
    pub const fn cols(&self) -> usize {
        self.cells.cols()
    }

    /// Cell edge length in meters.
    #[must_use]
    pub const fn cell_size(&self) -> Scalar {
        self.cell_size
    }

    /// Registers (or replaces) a material definition.
    pub fn add_material(&mut self, material: MaterialCell) {
        self.materials.insert(material.id, material);
    }

    /// Registers a conductor held at `voltage`.
    pub fn add_metal(&mut self, id: MaterialId, voltage: Scalar, boundary: BoundaryKind) {
        self.add_material(MaterialCell::metal(id, voltage, boundary));
    }

    /// Registers a dielectric of relative permittivity `epsilon_r`.
    pub fn add_dielectric(&mut self, id: MaterialId, epsilon_r: Scalar) {
        self.add_material(MaterialCell::dielectric(id, epsilon_r));
    }

    /// Changes the drive voltage of a registered conductor.
    pub fn update_metal(&mut self, id: MaterialId, voltage: Scalar) -> Result<(), SolverError> {
        match self.materials.get_mut(&id) {
            Some(m) if m.is_metal() => {
                m.voltage = voltage;
                Ok(())
            }
            _ => Err(SolverError::UnknownMaterial(id)),
        }
    }

    /// Sets the boundary kinds of the four box edges.
    pub fn set_boundary(&mut self, boundaries: Boundaries) {
        self.boundaries = boundaries;
    }

    /// Assigns a registered material to one raster cell.
    pub fn paint(&mut self, row: usize, col: usize, id: MaterialId) -> Result<(), SolverError> {
        if !self.materials.contains_key(&id) {
            return Err(SolverError::UnknownMaterial(id));
        }
        let cell = self
            .cells
            .get_mut(row, col)
            .ok_or(SolverError::OutOfBounds { row, col })?;
        *cell = Some(id);
        Ok(())
    }

    /// Material painted at a cell.
    #[must_use]
    pub fn material_at(&self, row: usize, col: usize) -> Option<MaterialId> {
        self.cells.get(row, col).copied().flatten()
    }

    /// Node at a cell corner (`0..=rows`, `0..=cols`).
    #[must_use]
    pub fn node(&self, row: usize, col: usize) -> Option<&VoltageCell> {
        self.nodes.get(row, col)
    }

    /// Relaxes the potential until the maximum nodal residual drops below
    /// `1 / (node_rows · node_cols)`.
    ///
    /// With `ignore_dielectric` every cell is treated as vacuum.
    pub fn solve(&mut self, ignore_dielectric: bool) -> Result<SolveReport, SolverError> {
        self.init_nodes()?;

        let vr = self.nodes.rows() as Scalar;
        let vc = self.nodes.cols() as Scalar;
        let t = (std::f64::consts::PI / vr).cos() + (std::f64::consts::PI / vc).cos();
        let omega = (8.0 - (64.0 - 16.0 * t * t).sqrt()) / (t * t);
        let tolerance = 1.0 / (vr * vc);

        let mut history = Vec::new();
        let mut residual = Scalar::INFINITY;
        for sweep in 1..=self.max_sweeps {
            residual = self.relax(ignore_dielectric, omega);
            self.propagate_neumann();
            history.push(residual);
            if residual < tolerance {
                debug!(
                    "SOR converged: {}x{} nodes, {} sweeps, residual {:.3e}, vacuum={}",
                    self.nodes.rows(),
                    self.nodes.cols(),
                    sweep,
                    residual,
                    ignore_dielectric
                );
                self.solved_vacuum = Some(ignore_dielectric);
                return Ok(SolveReport {
                    sweeps: sweep,
                    residual,
                    omega,
                    residual_history: history,
                });
            }
        }
        self.solved_vacuum = None;
        Err(SolverError::DidNotConverge {
            sweeps: self.max_sweeps,
            residual,
        })
    }

    fn init_nodes(&mut self) -> Result<(), SolverError> {
        self.nodes.fill(VoltageCell::default());
        let rows = self.cells.rows();
        let cols = self.cells.cols();

        for pass in [MaterialKind::Dielectric, MaterialKind::Metal] {
            for row in 0..rows {
                for col in 0..cols {
                    let Some(id) = self.cells[(row, col)] else {
                        continue;
                    };
                    let m = self
                        .materials
                        .get(&id)
                        .ok_or(SolverError::UnknownMaterial(id))?;
                    if m.kind != pass {
                        continue;
                    }
                    for (dr, dc) in [(0, 0), (0, 1), (1, 0), (1, 1)] {
                        let node = &mut self.nodes[(row + dr, col + dc)];
                        node.id = Some(id);
                        node.voltage = m.voltage;
                        node.boundary = m.boundary;
                    }
                }
            }
        }

        for row in 0..rows {
            for col in 0..cols {
                if let Some(m) = self.cells[(row, col)].and_then(|id| self.materials.get(&id)) {
                    self.nodes[(row, col)].permittivity = m.permittivity;
                }
            }
        }

        let last_row = self.nodes.rows() - 1;
        let last_col = self.nodes.cols() - 1;
        for col in 0..=last_col {
            self.nodes[(0, col)].boundary = self.boundaries.top;
            self.nodes[(last_row, col)].boundary = self.boundaries.bottom;
        }
        for row in 0..=last_row {
            self.nodes[(row, 0)].boundary = self.boundaries.left;
            self.nodes[(row, last_col)].boundary = self.boundaries.right;
        }
        Ok(())
    }

    /// One SOR sweep over the free interior nodes; returns the maximum |residual|.
    fn relax(&mut self, ignore_dielectric: bool, omega: Scalar) -> Scalar {
        let vr = self.nodes.rows();
        let vc = self.nodes.cols();
        let mut max_residual: Scalar = 0.0;

        for row in 1..vr - 1 {
            for col in 1..vc - 1 {
                if self.nodes[(row, col)].boundary != BoundaryKind::None {
                    continue;
                }
                let v = self.nodes[(row, col)].voltage;
                let up = self.nodes[(row - 1, col)].voltage;
                let down = self.nodes[(row + 1, col)].voltage;
                let left = self.nodes[(row, col - 1)].voltage;
                let right = self.nodes[(row, col + 1)].voltage;

                let residual = if ignore_dielectric {
                    (up + down + left + right) * 0.25 - v
                } else {
                    let [a_right, a_up, a_left, a_down] = self.face_permittivities(row, col);
                    (a_right * right + a_up * up + a_left * left + a_down * down)
                        / (a_right + a_up + a_left + a_down)
                        - v
                };

                self.nodes[(row, col)].voltage = v + omega * residual;
                max_residual = max_residual.max(residual.abs());
            }
        }
        max_residual
    }

    /// Permittivity on the right, up, left and down faces of an interior node.
    fn face_permittivities(&self, row: usize, col: usize) -> [Scalar; 4] {
        let down_right = self.nodes[(row, col)].permittivity;
        let up_right = self.nodes[(row - 1, col)].permittivity;
        let up_left = self.nodes[(row - 1, col - 1)].permittivity;
        let down_left = self.nodes[(row, col - 1)].permittivity;
        [
            (down_right + up_right) * 0.5,
            (up_right + up_left) * 0.5,
            (up_left + down_left) * 0.5,
            (down_right + down_left) * 0.5,
        ]
    }

    fn propagate_neumann(&mut self) {
        let last_row = self.nodes.rows() - 1;
        let last_col = self.nodes.cols() - 1;
        for col in 0..=last_col {
            if self.nodes[(0, col)].boundary == BoundaryKind::Neumann {
                self.nodes[(0, col)].voltage = self.nodes[(1, col)].voltage;
            }
            if self.nodes[(last_row, col)].boundary == BoundaryKind::Neumann {
                self.nodes[(last_row, col)].voltage = self.nodes[(last_row - 1, col)].voltage;
            }
        }
        for row in 0..=last_row {
            if self.nodes[(row, 0)].boundary == BoundaryKind::Neumann {
                self.nodes[(row, 0)].voltage = self.nodes[(row, 1)].voltage;
            }
            if self.nodes[(row, last_col)].boundary == BoundaryKind::Neumann {
                self.nodes[(row, last_col)].voltage = self.nodes[(row, last_col - 1)].voltage;
            }
        }
    }

    /// Line integral of the normal field (times εr) around conductor `id`, in volts.
    ///
    /// Uses the permittivity model of the most recent solve.
    pub fn surface_field(&self, id: MaterialId) -> Result<Scalar, SolverError> {
        if !self.materials.contains_key(&id) {
            return Err(SolverError::UnknownMaterial(id));
        }
        let vacuum = self.solved_vacuum.ok_or(SolverError::NotSolved)?;
        let h = self.cell_size;
        let vr = self.nodes.rows();
        let vc = self.nodes.cols();
        let mut field = 0.0;

        for row in 1..vr - 1 {
            for col in 1..vc - 1 {
                let node = &self.nodes[(row, col)];
                if node.id != Some(id) {
                    continue;
                }
                let [a_right, a_up, a_left, a_down] = if vacuum {
                    [1.0; 4]
                } else {
                    self.face_permittivities(row, col)
                };
                let neighbours = [
                    (&self.nodes[(row, col + 1)], a_right),
                    (&self.nodes[(row - 1, col)], a_up),
                    (&self.nodes[(row, col - 1)], a_left),
                    (&self.nodes[(row + 1, col)], a_down),
                ];
                for (nb, weight) in neighbours {
                    if nb.id != Some(id) {
                        field += (node.voltage - nb.voltage) * weight / h;
                    }
                }
            }
        }
        // Only boundary-adjacent nodes contribute; scale the point sum to a perimeter integral.
        Ok(field * h)
    }

    /// Charge per unit length on conductor `id` (C/m).
    pub fn surface_charge(&self, id: MaterialId) -> Result<Scalar, SolverError> {
        Ok(VACUUM_PERMITTIVITY * self.surface_field(id)?)
    }

    /// Capacitance per unit length between conductors `a` and `b` (F/m).
    pub fn capacitance(&self, a: MaterialId, b: MaterialId) -> Result<Scalar, SolverError> {
        let va = self.materials.get(&a).ok_or(SolverError::UnknownMaterial(a))?.voltage;
        let vb = self.materials.get(&b).ok_or(SolverError::UnknownMaterial(b))?.voltage;
        Ok(self.surface_charge(a)? / (va - vb))
    }
}
