//! Raster cross-section backed by the SOR field solver.

use std::collections::BTreeMap;

use log::debug;

use crate::circuits::transmission::RLGC;
use crate::constants::{CACHE_TOLERANCE_LENGTH, VACUUM_PERMEABILITY, VACUUM_PERMITTIVITY};
use crate::errors::ExtractError;
use crate::fields::{Boundaries, FieldSolver, Grid, DEFAULT_MAX_SWEEPS};
use crate::materials::{dc_resistance_per_m, BoundaryKind, MaterialId};
use crate::math::{invert_gauss_jordan, Scalar, M2};

use super::{mode_impedances, CoupledSolution, ImpedanceBackend, LineSolution};

const AIR: MaterialId = 1;
const GROUND: MaterialId = 2;
const CONDUCTOR_1: MaterialId = 3;
const CONDUCTOR_2: MaterialId = 4;
const FIRST_DIELECTRIC: MaterialId = 10;

/// Content of one raster cell. Dielectrics are keyed by `εr × 1000`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Pixel {
    Air,
    Dielectric(u32),
    Ground,
    Wire,
    Coupler,
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Shape {
    Rect {
        x: Scalar,
        y: Scalar,
        width: Scalar,
        thickness: Scalar,
    },
    Ring {
        x: Scalar,
        y: Scalar,
        radius: Scalar,
        thickness: Scalar,
    },
}

impl Shape {
    fn area(&self) -> Scalar {
        match *self {
            Self::Rect {
                width, thickness, ..
            } => width * thickness,
            Self::Ring {
                radius, thickness, ..
            } => std::f64::consts::PI * ((radius + thickness).powi(2) - radius.powi(2)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct Conductor {
    shape: Shape,
    conductivity: Scalar,
}

impl Conductor {
    fn resistance(&self) -> Result<Scalar, ExtractError> {
        let (width, thickness) = match self.shape {
            Shape::Rect {
                width, thickness, ..
            } => (width, thickness),
            Shape::Ring { .. } => (self.shape.area(), 1.0),
        };
        dc_resistance_per_m(self.conductivity, width, thickness).ok_or_else(|| {
            ExtractError::InvalidGeometry(format!(
                "conductor cross-section {width:e} x {thickness:e} m with conductivity {:e} S/m",
                self.conductivity
            ))
        })
    }
}

#[derive(Debug, Clone, Copy)]
enum Cached {
    Line(LineSolution),
    Coupled(CoupledSolution),
}

/// [`ImpedanceBackend`] that rasterizes the cross-section and runs the
/// finite-difference solver.
///
/// The last solved raster is kept; an identical (or nearly identical)
/// follow-up cross-section returns the stored result with `cache_hit` set.
#[derive(Debug, Clone)]
pub struct CrossSectionBuilder {
    precision: Scalar,
    box_width: Scalar,
    box_height: Scalar,
    elements: Vec<(Shape, Pixel)>,
    dielectrics: BTreeMap<u32, Scalar>,
    wire: Option<Conductor>,
    coupler: Option<Conductor>,
    last: Option<(Grid<Pixel>, Cached)>,
    max_sweeps: usize,
}

impl Default for CrossSectionBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl CrossSectionBuilder {
    /// Builder with a 35 µm raster over a 10 mm × 10 mm window.
    #[must_use]
    pub fn new() -> Self {
        Self {
            precision: 35e-6,
            box_width: 10e-3,
            box_height: 10e-3,
            elements: Vec::new(),
            dielectrics: BTreeMap::new(),
            wire: None,
            coupler: None,
            last: None,
            max_sweeps: DEFAULT_MAX_SWEEPS,
        }
    }

    /// Sets the relaxation sweep ceiling of every solve.
    #[must_use]
    pub fn with_max_sweeps(mut self, max_sweeps: usize) -> Self {
        self.max_sweeps = max_sweeps;
        self
    }

    /// Dielectric annulus, e.g. an anti-pad clearance.
    pub fn add_ring_dielectric(&mut self, x: Scalar, y: Scalar, radius: Scalar, thickness: Scalar, epsilon_r: Scalar) {
        let key = self.dielectric_key(epsilon_r);
        self.elements.push((Shape::Ring { x, y, radius, thickness }, Pixel::Dielectric(key)));
    }

    fn dielectric_key(&mut self, epsilon_r: Scalar) -> u32 {
        let key = (epsilon_r * 1000.0).round().max(0.0) as u32;
        self.dielectrics.insert(key, epsilon_r);
        key
    }

    fn pixel(&self, v: Scalar) -> isize {
        (v / self.precision).round() as isize
    }

    fn rasterize(&self) -> Result<Grid<Pixel>, ExtractError> {
        let rows = self.pixel(self.box_height);
        let cols = self.pixel(self.box_width);
        if rows <= 0 || cols <= 0 {
            return Err(ExtractError::InvalidConfig(format!(
                "box {:e} x {:e} m is smaller than one {:e} m pixel",
                self.box_width, self.box_height, self.precision
            )));
        }
        let (rows, cols) = (rows as usize, cols as usize);
        let mut raster = Grid::new(rows, cols, 0, Pixel::Air).map_err(crate::fields::SolverError::from)?;
        let cx = self.box_width * 0.5;
        let cy = self.box_height * 0.5;

        for &(shape, fill) in &self.elements {
            match shape {
                Shape::Rect {
                    x,
                    y,
                    width,
                    thickness,
                } => {
                    let r0 = self.pixel(y + cy).max(0) as usize;
                    let r1 = self.pixel(y + cy + thickness).clamp(0, rows as isize) as usize;
                    let c0 = self.pixel(x + cx - width * 0.5).max(0) as usize;
                    let c1 = self.pixel(x + cx + width * 0.5).clamp(0, cols as isize) as usize;
                    for row in r0..r1 {
                        for col in c0..c1 {
                            raster[(row, col)] = fill;
                        }
                    }
                }
                Shape::Ring {
                    x,
                    y,
                    radius,
                    thickness,
                } => {
                    let outer = radius + thickness;
                    let r0 = self.pixel(y + cy - outer).max(0) as usize;
                    let r1 = (self.pixel(y + cy + outer) + 1).clamp(0, rows as isize) as usize;
                    let c0 = self.pixel(x + cx - outer).max(0) as usize;
                    let c1 = (self.pixel(x + cx + outer) + 1).clamp(0, cols as isize) as usize;
                    for row in r0..r1 {
                        for col in c0..c1 {
                            let px = (col as Scalar + 0.5) * self.precision - cx - x;
                            let py = (row as Scalar + 0.5) * self.precision - cy - y;
                            let d = px.hypot(py);
                            if d >= radius && d < outer {
                                raster[(row, col)] = fill;
                            }
                        }
                    }
                }
            }
        }
        Ok(raster)
    }

    fn cached(&self, raster: &Grid<Pixel>) -> Option<Cached> {
        let (previous, result) = self.last.as_ref()?;
        let tolerance = (CACHE_TOLERANCE_LENGTH / self.precision).round() as usize;
        let matching = previous.count_matching(raster)?;
        (matching + tolerance >= raster.len()).then_some(*result)
    }

    fn solver_for(&self, raster: &Grid<Pixel>) -> Result<FieldSolver, ExtractError> {
        let mut solver = FieldSolver::new(raster.rows(), raster.cols(), self.precision)?
            .with_max_sweeps(self.max_sweeps);
        solver.set_boundary(Boundaries::cross_section());
        solver.add_dielectric(AIR, 1.0);
        solver.add_metal(GROUND, 0.0, BoundaryKind::Dirichlet);
        solver.add_metal(CONDUCTOR_1, 1.0, BoundaryKind::Dirichlet);
        solver.add_metal(CONDUCTOR_2, 0.0, BoundaryKind::Dirichlet);
        let mut ids = BTreeMap::new();
        for (offset, (&key, &epsilon_r)) in self.dielectrics.iter().enumerate() {
            let id = FIRST_DIELECTRIC + offset as MaterialId;
            solver.add_dielectric(id, epsilon_r);
            ids.insert(key, id);
        }
        for (row, col, pixel) in raster.iter() {
            let id = match *pixel {
                Pixel::Air => AIR,
                Pixel::Ground => GROUND,
                Pixel::Wire => CONDUCTOR_1,
                Pixel::Coupler => CONDUCTOR_2,
                Pixel::Dielectric(key) => ids.get(&key).copied().unwrap_or(AIR),
            };
            solver.paint(row, col, id)?;
        }
        Ok(solver)
    }

    fn require_resolved(raster: &Grid<Pixel>, pixel: Pixel, what: &str) -> Result<(), ExtractError> {
        if raster.iter().any(|(_, _, p)| *p == pixel) {
            Ok(())
        } else {
            Err(ExtractError::InvalidGeometry(format!(
                "{what} is not resolved by the raster"
            )))
        }
    }

    /// Drives conductor 1 and 2 and returns the resulting charges `[q1, q2]`.
    fn drive(solver: &mut FieldSolver, v1: Scalar, v2: Scalar, vacuum: bool) -> Result<[Scalar; 2], ExtractError> {
        solver.update_metal(CONDUCTOR_1, v1)?;
        solver.update_metal(CONDUCTOR_2, v2)?;
        solver.solve(vacuum)?;
        Ok([
            solver.surface_charge(CONDUCTOR_1)?,
            solver.surface_charge(CONDUCTOR_2)?,
        ])
    }

    fn capacitance_matrix(solver: &mut FieldSolver, vacuum: bool) -> Result<M2, ExtractError> {
        let [c11, c21] = Self::drive(solver, 1.0, 0.0, vacuum)?;
        let [c12, c22] = Self::drive(solver, 0.0, 1.0, vacuum)?;
        Ok(M2::new(c11, c12, c21, c22))
    }
}

impl ImpedanceBackend for CrossSectionBuilder {
    fn set_precision(&mut self, precision: Scalar) -> Result<(), ExtractError> {
        if !(precision > 0.0) || !precision.is_finite() {
            return Err(ExtractError::InvalidConfig(format!(
                "raster precision must be positive, got {precision}"
            )));
        }
        self.precision = precision;
        Ok(())
    }

    fn set_box_size(&mut self, width: Scalar, height: Scalar) -> Result<(), ExtractError> {
        if !(width > 0.0 && height > 0.0) || !(width * height).is_finite() {
            return Err(ExtractError::InvalidConfig(format!(
                "box size must be positive, got {width} x {height}"
            )));
        }
        self.box_width = width;
        self.box_height = height;
        Ok(())
    }

    fn add_ground(&mut self, x: Scalar, y: Scalar, width: Scalar, thickness: Scalar) {
        self.elements.push((
            Shape::Rect {
                x,
                y,
                width,
                thickness,
            },
            Pixel::Ground,
        ));
    }

    fn add_wire(&mut self, x: Scalar, y: Scalar, width: Scalar, thickness: Scalar, conductivity: Scalar) {
        let shape = Shape::Rect {
            x,
            y,
            width,
            thickness,
        };
        self.wire = Some(Conductor { shape, conductivity });
        self.elements.push((shape, Pixel::Wire));
    }

    fn add_coupler(&mut self, x: Scalar, y: Scalar, width: Scalar, thickness: Scalar, conductivity: Scalar) {
        let shape = Shape::Rect {
            x,
            y,
            width,
            thickness,
        };
        self.coupler = Some(Conductor { shape, conductivity });
        self.elements.push((shape, Pixel::Coupler));
    }

    fn add_dielectric(&mut self, x: Scalar, y: Scalar, width: Scalar, thickness: Scalar, epsilon_r: Scalar) {
        let key = self.dielectric_key(epsilon_r);
        self.elements.push((
            Shape::Rect {
                x,
                y,
                width,
                thickness,
            },
            Pixel::Dielectric(key),
        ));
    }

    /// `radius = 0` gives a disk.
    fn add_ring_ground(&mut self, x: Scalar, y: Scalar, radius: Scalar, thickness: Scalar) {
        self.elements.push((Shape::Ring { x, y, radius, thickness }, Pixel::Ground));
    }

    fn add_ring_wire(&mut self, x: Scalar, y: Scalar, radius: Scalar, thickness: Scalar, conductivity: Scalar) {
        let shape = Shape::Ring { x, y, radius, thickness };
        self.wire = Some(Conductor { shape, conductivity });
        self.elements.push((shape, Pixel::Wire));
    }

    fn calc_z0(&mut self) -> Result<LineSolution, ExtractError> {
        let wire = self
            .wire
            .ok_or_else(|| ExtractError::InvalidGeometry("no wire placed".into()))?;
        let r = wire.resistance()?;
        let raster = self.rasterize()?;
        Self::require_resolved(&raster, Pixel::Wire, "wire")?;

        if let Some(Cached::Line(hit)) = self.cached(&raster) {
            return Ok(LineSolution {
                rlgc: RLGC { r_per_m: r, ..hit.rlgc },
                cache_hit: true,
                ..hit
            });
        }

        let mut solver = self.solver_for(&raster)?;
        let vacuum = solver.solve(true)?;
        let c0 = solver.surface_charge(CONDUCTOR_1)?;
        let real = solver.solve(false)?;
        let c = solver.surface_charge(CONDUCTOR_1)?;
        if !(c0 > 0.0 && c > 0.0) {
            return Err(ExtractError::InvalidGeometry(format!(
                "non-positive capacitance (vacuum {c0:e}, real {c:e} F/m)"
            )));
        }

        let l = VACUUM_PERMITTIVITY * VACUUM_PERMEABILITY / c0;
        let solution = LineSolution {
            z0: (l / c).sqrt(),
            velocity: 1.0 / (l * c).sqrt(),
            rlgc: RLGC {
                r_per_m: r,
                l_per_m: l,
                g_per_m: 0.0,
                c_per_m: c,
            },
            cache_hit: false,
        };
        debug!(
            "cross-section {}x{}: Z0 {:.3} ohm, sweeps {}/{}",
            raster.rows(),
            raster.cols(),
            solution.z0,
            vacuum.sweeps,
            real.sweeps
        );
        self.last = Some((raster, Cached::Line(solution)));
        Ok(solution)
    }

    fn calc_coupled_z0(&mut self) -> Result<CoupledSolution, ExtractError> {
        let (wire, coupler) = self.wire.zip(self.coupler).ok_or_else(|| {
            ExtractError::InvalidGeometry("coupled solve needs a wire and a coupler".into())
        })?;
        let r = M2::new(wire.resistance()?, 0.0, 0.0, coupler.resistance()?);
        let raster = self.rasterize()?;
        Self::require_resolved(&raster, Pixel::Wire, "wire")?;
        Self::require_resolved(&raster, Pixel::Coupler, "coupler")?;

        if let Some(Cached::Coupled(hit)) = self.cached(&raster) {
            return Ok(CoupledSolution {
                r,
                cache_hit: true,
                ..hit
            });
        }

        let mut solver = self.solver_for(&raster)?;
        let c_vacuum = Self::capacitance_matrix(&mut solver, true)?;
        let c = Self::capacitance_matrix(&mut solver, false)?;
        let l = invert_gauss_jordan(&c_vacuum).ok_or(ExtractError::SingularMatrix)?
            * (VACUUM_PERMITTIVITY * VACUUM_PERMEABILITY);
        let (z_odd, z_even) = mode_impedances(&l, &c);
        if !(z_odd.is_finite() && z_even.is_finite()) {
            return Err(ExtractError::InvalidGeometry(format!(
                "coupled modes are not physical (odd {z_odd}, even {z_even})"
            )));
        }

        let solution = CoupledSolution {
            z_odd,
            z_even,
            c,
            l,
            r,
            g: M2::zeros(),
            cache_hit: false,
        };
        debug!(
            "coupled cross-section {}x{}: Zodd {:.3} ohm, Zeven {:.3} ohm",
            raster.rows(),
            raster.cols(),
            z_odd,
            z_even
        );
        self.last = Some((raster, Cached::Coupled(solution)));
        Ok(solution)
    }

    fn clean(&mut self) {
        self.elements.clear();
        self.dielectrics.clear();
        self.wire = None;
        self.coupler = None;
    }

    fn clean_all(&mut self) {
        self.clean();
        self.last = None;
    }
}

#[cfg(test)]
mod tests {
    use approx::assert_relative_eq;

    use super::*;
    use crate::constants::{COPPER_CONDUCTIVITY, SPEED_OF_LIGHT};

    const T: Scalar = 35e-6;
    const CORE: Scalar = 0.2e-3;

    /// 0.2 mm microstrip over a 0.2 mm, εr 4.3 core with a solid bottom plane.
    fn microstrip(b: &mut CrossSectionBuilder, wires: &[(Scalar, Pixel)]) {
        microstrip_of_width(b, wires, 0.2e-3);
    }

    fn microstrip_of_width(b: &mut CrossSectionBuilder, wires: &[(Scalar, Pixel)], width: Scalar) {
        let board = 2.0 * T + CORE;
        let box_w = 2e-3;
        let off = -board / 2.0;
        let fill = (4.3 + 1.0) / 2.0;
        b.clean();
        b.set_precision(T * 0.5).unwrap();
        b.set_box_size(box_w, (T * 100.0).max(board * 1.5)).unwrap();
        b.add_dielectric(0.0, T + off, box_w, CORE, 4.3);
        b.add_dielectric(0.0, T + CORE + off, box_w, T, fill);
        b.add_ground(0.0, T + CORE + off, box_w, T);
        b.add_dielectric(0.0, off, box_w, T, fill);
        for &(x, kind) in wires {
            match kind {
                Pixel::Coupler => b.add_coupler(x, off, width, T, COPPER_CONDUCTIVITY),
                _ => b.add_wire(x, off, width, T, COPPER_CONDUCTIVITY),
            }
        }
    }

    #[test]
    fn microstrip_impedance_is_physical() {
        let mut b = CrossSectionBuilder::new();
        microstrip(&mut b, &[(0.0, Pixel::Wire)]);
        let s = b.calc_z0().unwrap();
        assert!(s.z0 > 45.0 && s.z0 < 75.0, "Z0 = {}", s.z0);
        assert!(s.velocity < SPEED_OF_LIGHT);
        let e_eff = (SPEED_OF_LIGHT / s.velocity).powi(2);
        assert!(e_eff > 1.0 && e_eff < 4.3, "effective permittivity {e_eff}");
        assert_relative_eq!(s.rlgc.r_per_m, 1.0 / (COPPER_CONDUCTIVITY * 0.2e-3 * T));
        assert_relative_eq!(s.rlgc.g_per_m, 0.0);
        assert!(!s.cache_hit);
    }

    #[test]
    fn identical_cross_section_hits_cache_with_same_values() {
        let mut b = CrossSectionBuilder::new();
        microstrip(&mut b, &[(0.0, Pixel::Wire)]);
        let first = b.calc_z0().unwrap();
        microstrip(&mut b, &[(0.0, Pixel::Wire)]);
        let cached = b.calc_z0().unwrap();
        assert!(cached.cache_hit);

        b.clean_all();
        microstrip(&mut b, &[(0.0, Pixel::Wire)]);
        let fresh = b.calc_z0().unwrap();
        assert!(!fresh.cache_hit);
        for s in [cached, fresh] {
            assert_eq!(s.z0, first.z0);
            assert_eq!(s.velocity, first.velocity);
            assert_eq!(s.rlgc, first.rlgc);
        }
    }

    #[test]
    fn cache_hit_recomputes_resistance_for_new_width() {
        let mut b = CrossSectionBuilder::new();
        microstrip(&mut b, &[(0.0, Pixel::Wire)]);
        let first = b.calc_z0().unwrap();

        // Two extra pixel columns stay inside the raster tolerance.
        let wider = 0.235e-3;
        microstrip_of_width(&mut b, &[(0.0, Pixel::Wire)], wider);
        let hit = b.calc_z0().unwrap();
        assert!(hit.cache_hit);
        assert_eq!(hit.z0, first.z0);
        assert_relative_eq!(hit.rlgc.r_per_m, 1.0 / (COPPER_CONDUCTIVITY * wider * T));
        assert!(hit.rlgc.r_per_m < first.rlgc.r_per_m);
    }

    #[test]
    fn coupled_cache_hit_recomputes_resistance() {
        let mut b = CrossSectionBuilder::new();
        let pair = [(-0.2e-3, Pixel::Wire), (0.2e-3, Pixel::Coupler)];
        microstrip(&mut b, &pair);
        b.calc_coupled_z0().unwrap();

        let wider = 0.235e-3;
        microstrip_of_width(&mut b, &pair[..1], wider);
        b.add_coupler(0.2e-3, -(2.0 * T + CORE) / 2.0, 0.2e-3, T, COPPER_CONDUCTIVITY);
        let hit = b.calc_coupled_z0().unwrap();
        assert!(hit.cache_hit);
        assert_relative_eq!(hit.r[(0, 0)], 1.0 / (COPPER_CONDUCTIVITY * wider * T));
        assert_relative_eq!(hit.r[(1, 1)], 1.0 / (COPPER_CONDUCTIVITY * 0.2e-3 * T));
    }

    #[test]
    fn moved_wire_misses_cache() {
        let mut b = CrossSectionBuilder::new();
        microstrip(&mut b, &[(0.0, Pixel::Wire)]);
        b.calc_z0().unwrap();
        microstrip(&mut b, &[(0.3e-3, Pixel::Wire)]);
        assert!(!b.calc_z0().unwrap().cache_hit);
    }

    #[test]
    fn coupled_matrices_are_symmetric() {
        let mut b = CrossSectionBuilder::new();
        microstrip(&mut b, &[(-0.2e-3, Pixel::Wire), (0.2e-3, Pixel::Coupler)]);
        let s = b.calc_coupled_z0().unwrap();
        assert!(s.z_even > s.z_odd);
        assert!((s.c[(0, 1)] - s.c[(1, 0)]).abs() / s.c[(0, 0)] < 1e-3);
        assert!((s.l[(0, 1)] - s.l[(1, 0)]).abs() / s.l[(0, 0)] < 1e-3);
        assert!(s.c[(0, 1)] < 0.0, "mutual capacitance is negative in Maxwell form");
        assert_relative_eq!(s.r[(0, 1)], 0.0);
        assert_relative_eq!(s.r[(0, 0)], s.r[(1, 1)]);
    }

    #[test]
    fn coax_matches_closed_form() {
        let mut b = CrossSectionBuilder::new();
        b.set_precision(10e-6).unwrap();
        b.set_box_size(1.6e-3, 1.6e-3).unwrap();
        b.add_ring_wire(0.0, 0.0, 0.0, 0.2e-3, COPPER_CONDUCTIVITY);
        b.add_ring_ground(0.0, 0.0, 0.6e-3, 0.1e-3);
        let s = b.calc_z0().unwrap();
        let ideal = 60.0 * 3.0_f64.ln();
        assert_relative_eq!(s.z0, ideal, max_relative = 0.05);
        assert_relative_eq!(s.velocity, SPEED_OF_LIGHT, max_relative = 1e-4);
    }

    #[test]
    fn degenerate_conductor_fails_fast() {
        let mut b = CrossSectionBuilder::new();
        b.add_wire(0.0, 0.0, 0.0, T, COPPER_CONDUCTIVITY);
        assert!(matches!(b.calc_z0(), Err(ExtractError::InvalidGeometry(_))));

        b.clean();
        assert!(matches!(b.calc_z0(), Err(ExtractError::InvalidGeometry(_))));
        b.add_wire(0.0, 0.0, 0.2e-3, T, COPPER_CONDUCTIVITY);
        assert!(matches!(
            b.calc_coupled_z0(),
            Err(ExtractError::InvalidGeometry(_))
        ));
    }

    #[test]
    fn non_positive_box_is_a_caller_error() {
        let mut b = CrossSectionBuilder::new();
        assert!(matches!(
            b.set_box_size(0.0, 1e-3),
            Err(ExtractError::InvalidConfig(_))
        ));
        assert!(b.set_precision(-1.0).is_err());
    }

    #[test]
    fn sweep_ceiling_surfaces_as_solver_error() {
        let mut b = CrossSectionBuilder::new().with_max_sweeps(2);
        microstrip(&mut b, &[(0.0, Pixel::Wire)]);
        let err = b.calc_z0().unwrap_err();
        assert!(err.is_sample_local(), "{err}");
    }
}
