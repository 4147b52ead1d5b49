//! Walks traces and coupled pairs, building one cross-section per sample.

use log::{debug, warn};

use crate::constants::COPPER_CONDUCTIVITY;
use crate::errors::ExtractError;
use crate::geometry::{CoupledPair, Layer, Stackup, Trace, TracePath};
use crate::impedance::{CoupledSolution, ImpedanceBackend};
use crate::circuits::transmission::RLGC;
use crate::math::Scalar;
use crate::planes::{scan_runs, ReferencePlanes};
use crate::sweep::sample_positions;

/// Sampling and cross-section sizing parameters.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SamplerConfig {
    /// Distance between samples along the path (m).
    pub step: Scalar,
    /// Box width as a multiple of the trace width.
    pub w_ratio: Scalar,
    /// Box height as a multiple of the thinnest copper.
    pub h_ratio: Scalar,
    /// Resolution of the reference-plane scan (m).
    pub scan_step: Scalar,
    /// Conductivity of trace copper (S/m).
    pub conductivity: Scalar,
}

impl Default for SamplerConfig {
    fn default() -> Self {
        Self {
            step: 0.5e-3,
            w_ratio: 10.0,
            h_ratio: 100.0,
            scan_step: 10e-6,
            conductivity: COPPER_CONDUCTIVITY,
        }
    }
}

/// Single-ended solution at one position.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Sample {
    /// Index in the position sequence.
    pub index: usize,
    /// Distance from the start of the path (m).
    pub position: Scalar,
    /// Characteristic impedance (Ω).
    pub z0: Scalar,
    /// Propagation velocity (m/s).
    pub velocity: Scalar,
    /// Per-unit-length parameters.
    pub rlgc: RLGC,
    /// The backend reused its previous solution.
    pub cache_hit: bool,
}

/// Coupled solution at one position.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CoupledSample {
    /// Index in the position sequence.
    pub index: usize,
    /// Distance from the start of the pair (m).
    pub position: Scalar,
    /// Matrices and mode impedances.
    pub solution: CoupledSolution,
}

/// Valid samples of one path, in path order.
#[derive(Debug, Clone, PartialEq)]
pub struct SampleSeries<S> {
    /// Path length (m).
    pub length: Scalar,
    /// Samples that solved.
    pub samples: Vec<S>,
    /// Positions whose solve failed and were skipped.
    pub rejected: usize,
}

impl<S> SampleSeries<S> {
    /// Number of samples served from the backend cache.
    pub fn cache_hits(&self) -> usize
    where
        S: CacheFlag,
    {
        self.samples.iter().filter(|s| s.cache_hit()).count()
    }
}

/// Access to the cache-hit flag of a sample.
pub trait CacheFlag {
    /// The backend reused its previous solution.
    fn cache_hit(&self) -> bool;
}

impl CacheFlag for Sample {
    fn cache_hit(&self) -> bool {
        self.cache_hit
    }
}

impl CacheFlag for CoupledSample {
    fn cache_hit(&self) -> bool {
        self.solution.cache_hit
    }
}

/// Cross-section window shared by every sample of a path.
#[derive(Debug, Clone, Copy)]
struct Window {
    width: Scalar,
    height: Scalar,
    precision: Scalar,
    /// Added to stack depths so the board is vertically centered.
    offset: Scalar,
}

/// Builds cross-sections along traces and hands them to a backend.
#[derive(Debug, Clone, Copy)]
pub struct ImpedanceSampler<'a> {
    stackup: &'a Stackup,
    planes: &'a ReferencePlanes,
    config: SamplerConfig,
}

impl<'a> ImpedanceSampler<'a> {
    /// Sampler over a board description.
    #[must_use]
    pub const fn new(stackup: &'a Stackup, planes: &'a ReferencePlanes, config: SamplerConfig) -> Self {
        Self {
            stackup,
            planes,
            config,
        }
    }

    /// Sampling parameters.
    #[must_use]
    pub const fn config(&self) -> &SamplerConfig {
        &self.config
    }

    fn window(&self, width: Scalar) -> Window {
        let cu_min = self.stackup.min_copper_thickness();
        let board = self.stackup.board_thickness();
        Window {
            width,
            height: (cu_min * self.config.h_ratio).max(board * 1.5),
            precision: cu_min * 0.5,
            offset: -board * 0.5,
        }
    }

    fn check_conductor(trace: &Trace, thickness: Scalar) -> Result<(), ExtractError> {
        if trace.width > 0.0 && thickness > 0.0 && trace.length().is_finite() {
            Ok(())
        } else {
            Err(ExtractError::InvalidGeometry(format!(
                "trace `{}` has width {:e} m and copper thickness {:e} m",
                trace.name, trace.width, thickness
            )))
        }
    }

    /// Resets the backend and places everything except the conductors.
    ///
    /// Returns the top depth of `layer` inside the window.
    fn place_surroundings(
        &self,
        backend: &mut dyn ImpedanceBackend,
        window: &Window,
        path: &TracePath,
        position: Scalar,
        layer: &str,
    ) -> Result<Scalar, ExtractError> {
        backend.clean();
        backend.set_precision(window.precision)?;
        backend.set_box_size(window.width, window.height)?;

        let mut depth = 0.0;
        for l in self.stackup.layers() {
            if l.is_insulator() {
                backend.add_dielectric(0.0, depth + window.offset, window.width, l.thickness, l.epsilon_r);
            }
            depth += l.thickness;
        }

        let mut filled: Vec<&str> = Vec::new();
        let (left, right) = path.perpendicular(position, window.width);
        for (name, lookup) in self.planes.iter() {
            let runs = scan_runs(lookup, left, right, self.config.scan_step);
            if runs.is_empty() {
                continue;
            }
            let plane: &Layer = self.stackup.layer(name)?;
            let y = self.stackup.z_offset(name)? + window.offset;
            if !filled.contains(&name) {
                filled.push(name);
                let fill = self.stackup.copper_fill_permittivity(name)?;
                backend.add_dielectric(0.0, y, window.width, plane.thickness, fill);
            }
            for run in runs {
                backend.add_ground(run.center, y, run.width, plane.thickness);
            }
        }

        let y = self.stackup.z_offset(layer)? + window.offset;
        if !filled.contains(&layer) {
            let fill = self.stackup.copper_fill_permittivity(layer)?;
            backend.add_dielectric(0.0, y, window.width, self.stackup.thickness(layer)?, fill);
        }
        Ok(y)
    }

    /// Samples `trace` at every position and solves each cross-section.
    ///
    /// Solves that fail locally (non-convergence, singular matrices,
    /// unresolvable geometry) are logged and skipped; configuration errors
    /// abort the trace.
    pub fn sample_trace(
        &self,
        trace: &Trace,
        backend: &mut dyn ImpedanceBackend,
    ) -> Result<SampleSeries<Sample>, ExtractError> {
        let thickness = self.stackup.thickness(&trace.layer)?;
        Self::check_conductor(trace, thickness)?;
        let window = self.window(trace.width * self.config.w_ratio);
        let length = trace.length();

        backend.clean_all();
        let mut series = SampleSeries {
            length,
            samples: Vec::new(),
            rejected: 0,
        };
        for (index, position) in sample_positions(length, self.config.step).into_iter().enumerate() {
            let y = self.place_surroundings(backend, &window, &trace.path, position, &trace.layer)?;
            backend.add_wire(0.0, y, trace.width, thickness, self.config.conductivity);
            match backend.calc_z0() {
                Ok(line) => {
                    debug!(
                        "{} @ {position:.4e} m: Z0 {:.3} v {:.4e}{}",
                        trace.name,
                        line.z0,
                        line.velocity,
                        if line.cache_hit { " (cached)" } else { "" }
                    );
                    series.samples.push(Sample {
                        index,
                        position,
                        z0: line.z0,
                        velocity: line.velocity,
                        rlgc: line.rlgc,
                        cache_hit: line.cache_hit,
                    });
                }
                Err(e) if e.is_sample_local() => {
                    warn!("{} @ {position:.4e} m: sample rejected: {e}", trace.name);
                    series.rejected += 1;
                }
                Err(e) => return Err(e),
            }
        }
        Ok(series)
    }

    /// Samples a coupled pair along its midline.
    pub fn sample_pair(
        &self,
        pair: &CoupledPair,
        backend: &mut dyn ImpedanceBackend,
    ) -> Result<SampleSeries<CoupledSample>, ExtractError> {
        let (a, b) = (&pair.first, &pair.second);
        let t_a = self.stackup.thickness(&a.layer)?;
        let t_b = self.stackup.thickness(&b.layer)?;
        Self::check_conductor(a, t_a)?;
        Self::check_conductor(b, t_b)?;

        let frame = pair.frame();
        let ratio = self.config.w_ratio;
        let width = (a.width.max(b.width) * ratio)
            .min(frame.spacing * ratio)
            .max(frame.spacing * 2.0);
        let window = self.window(width);
        let length = frame.midline.length();
        let x_first = if frame.first_on_left {
            -frame.spacing * 0.5
        } else {
            frame.spacing * 0.5
        };

        backend.clean_all();
        let mut series = SampleSeries {
            length,
            samples: Vec::new(),
            rejected: 0,
        };
        for (index, position) in sample_positions(length, self.config.step).into_iter().enumerate() {
            let y = self.place_surroundings(backend, &window, &frame.midline, position, &a.layer)?;
            backend.add_wire(x_first, y, a.width, t_a, self.config.conductivity);
            backend.add_coupler(-x_first, y, b.width, t_b, self.config.conductivity);
            match backend.calc_coupled_z0() {
                Ok(solution) => {
                    debug!(
                        "{}/{} @ {position:.4e} m: Zodd {:.3} Zeven {:.3}",
                        a.name, b.name, solution.z_odd, solution.z_even
                    );
                    series.samples.push(CoupledSample {
                        index,
                        position,
                        solution,
                    });
                }
                Err(e) if e.is_sample_local() => {
                    warn!("{}/{} @ {position:.4e} m: sample rejected: {e}", a.name, b.name);
                    series.rejected += 1;
                }
                Err(e) => return Err(e),
            }
        }
        Ok(series)
    }
}

#[cfg(test)]
mod tests {
    use approx::assert_relative_eq;

    use super::*;
    use crate::fields::SolverError;
    use crate::geometry::Layer;
    use crate::impedance::LineSolution;
    use crate::math::{M2, R2};
    use crate::planes::{FullPlane, Rect, RectRegions};

    #[derive(Debug, Clone, PartialEq)]
    enum Call {
        Box(Scalar, Scalar),
        Ground(Scalar, Scalar, Scalar),
        Wire(Scalar, Scalar),
        Coupler(Scalar, Scalar),
        Dielectric(Scalar, Scalar),
    }

    /// Records placements and fails every `fail_every`-th solve.
    #[derive(Default)]
    struct Recorder {
        calls: Vec<Call>,
        solves: usize,
        fail_every: Option<usize>,
        fatal: bool,
    }

    impl Recorder {
        fn outcome(&mut self) -> Result<(), ExtractError> {
            self.solves += 1;
            if self.fatal {
                return Err(ExtractError::InvalidConfig("bad box".into()));
            }
            match self.fail_every {
                Some(n) if self.solves % n == 0 => Err(SolverError::DidNotConverge {
                    sweeps: 1,
                    residual: 1.0,
                }
                .into()),
                _ => Ok(()),
            }
        }
    }

    impl ImpedanceBackend for Recorder {
        fn set_precision(&mut self, _precision: Scalar) -> Result<(), ExtractError> {
            Ok(())
        }
        fn set_box_size(&mut self, width: Scalar, height: Scalar) -> Result<(), ExtractError> {
            self.calls.push(Call::Box(width, height));
            Ok(())
        }
        fn add_ground(&mut self, x: Scalar, y: Scalar, width: Scalar, _thickness: Scalar) {
            self.calls.push(Call::Ground(x, y, width));
        }
        fn add_wire(&mut self, x: Scalar, y: Scalar, _w: Scalar, _t: Scalar, _s: Scalar) {
            self.calls.push(Call::Wire(x, y));
        }
        fn add_coupler(&mut self, x: Scalar, y: Scalar, _w: Scalar, _t: Scalar, _s: Scalar) {
            self.calls.push(Call::Coupler(x, y));
        }
        fn add_dielectric(&mut self, _x: Scalar, y: Scalar, _w: Scalar, _t: Scalar, epsilon_r: Scalar) {
            self.calls.push(Call::Dielectric(y, epsilon_r));
        }
        fn add_ring_ground(&mut self, x: Scalar, y: Scalar, radius: Scalar, _t: Scalar) {
            self.calls.push(Call::Ground(x, y, radius));
        }
        fn add_ring_wire(&mut self, x: Scalar, y: Scalar, _r: Scalar, _t: Scalar, _s: Scalar) {
            self.calls.push(Call::Wire(x, y));
        }
        fn calc_z0(&mut self) -> Result<LineSolution, ExtractError> {
            self.outcome()?;
            Ok(LineSolution {
                z0: 50.0,
                velocity: 1.5e8,
                rlgc: RLGC::lossless(50.0 / 1.5e8, 1.0 / (50.0 * 1.5e8)),
                cache_hit: self.solves > 1,
            })
        }
        fn calc_coupled_z0(&mut self) -> Result<CoupledSolution, ExtractError> {
            self.outcome()?;
            Ok(CoupledSolution {
                z_odd: 45.0,
                z_even: 55.0,
                c: M2::identity(),
                l: M2::identity(),
                r: M2::zeros(),
                g: M2::zeros(),
                cache_hit: false,
            })
        }
        fn clean(&mut self) {
            self.calls.clear();
        }
        fn clean_all(&mut self) {
            self.calls.clear();
            self.solves = 0;
        }
    }

    fn stack() -> Stackup {
        Stackup::new(vec![
            Layer::copper("F.Cu", 35e-6),
            Layer::dielectric("core", 0.2e-3, 4.3),
            Layer::copper("B.Cu", 35e-6),
        ])
    }

    fn trace(len: Scalar) -> Trace {
        Trace::new("t", TracePath::line(R2::zeros(), R2::new(len, 0.0)), 0.2e-3, "F.Cu")
    }

    #[test]
    fn microstrip_cross_section_layout() {
        let stackup = stack();
        let mut planes = ReferencePlanes::new();
        planes.insert("B.Cu", FullPlane);
        let sampler = ImpedanceSampler::new(&stackup, &planes, SamplerConfig::default());
        let mut backend = Recorder::default();
        let series = sampler.sample_trace(&trace(2.0e-3), &mut backend).unwrap();
        assert_eq!(series.samples.len(), 5);
        assert_eq!(series.cache_hits(), 4);

        let off = -stackup.board_thickness() * 0.5;
        match backend.calls[0] {
            // the copper-based height wins over 1.5x the board
            Call::Box(w, h) => {
                assert_relative_eq!(w, 2.0e-3, max_relative = 1e-12);
                assert_relative_eq!(h, 3.5e-3, max_relative = 1e-12);
            }
            ref other => panic!("unexpected first call {other:?}"),
        }
        assert!(backend.calls.contains(&Call::Dielectric(35e-6 + off, 4.3)));
        let ground = backend
            .calls
            .iter()
            .find_map(|c| match c {
                Call::Ground(x, y, w) => Some((*x, *y, *w)),
                _ => None,
            })
            .unwrap();
        assert_relative_eq!(ground.0, 0.0, epsilon = 1e-5);
        assert_relative_eq!(ground.1, 0.235e-3 + off, max_relative = 1e-12);
        assert_relative_eq!(ground.2, 2.0e-3, epsilon = 1e-5);
        // top copper fill: air above, core below
        assert!(backend.calls.contains(&Call::Dielectric(off, (1.0 + 4.3) * 0.5)));
        assert_eq!(backend.calls.last(), Some(&Call::Wire(0.0, off)));
    }

    #[test]
    fn partial_plane_is_offset() {
        let stackup = stack();
        let mut planes = ReferencePlanes::new();
        // copper only on the right-hand side of a trace running along +x
        planes.insert(
            "B.Cu",
            RectRegions::new(vec![Rect::new(R2::new(-1.0, -1.0), R2::new(1.0, -0.3e-3))]),
        );
        let sampler = ImpedanceSampler::new(&stackup, &planes, SamplerConfig::default());
        let mut backend = Recorder::default();
        sampler.sample_trace(&trace(1.0e-3), &mut backend).unwrap();
        let (x, w) = backend
            .calls
            .iter()
            .find_map(|c| match c {
                Call::Ground(x, _, w) => Some((*x, *w)),
                _ => None,
            })
            .unwrap();
        assert_relative_eq!(w, 0.7e-3, epsilon = 2e-5);
        assert_relative_eq!(x, 0.65e-3, epsilon = 2e-5);
    }

    #[test]
    fn failed_samples_are_skipped() {
        let stackup = stack();
        let planes = ReferencePlanes::new();
        let sampler = ImpedanceSampler::new(&stackup, &planes, SamplerConfig::default());
        let mut backend = Recorder {
            fail_every: Some(2),
            ..Recorder::default()
        };
        let series = sampler.sample_trace(&trace(2.0e-3), &mut backend).unwrap();
        assert_eq!(series.rejected, 2);
        let idx: Vec<_> = series.samples.iter().map(|s| s.index).collect();
        assert_eq!(idx, [0, 2, 4]);
    }

    #[test]
    fn configuration_errors_abort() {
        let stackup = stack();
        let planes = ReferencePlanes::new();
        let sampler = ImpedanceSampler::new(&stackup, &planes, SamplerConfig::default());
        let mut backend = Recorder {
            fatal: true,
            ..Recorder::default()
        };
        let err = sampler.sample_trace(&trace(1.0e-3), &mut backend).unwrap_err();
        assert!(matches!(err, ExtractError::InvalidConfig(_)));

        let mut flat = trace(1.0e-3);
        flat.width = 0.0;
        let err = sampler.sample_trace(&flat, &mut Recorder::default()).unwrap_err();
        assert!(matches!(err, ExtractError::InvalidGeometry(_)));

        flat.layer = "In7.Cu".into();
        let err = sampler.sample_trace(&flat, &mut Recorder::default()).unwrap_err();
        assert!(matches!(err, ExtractError::UnknownLayer(_)));
    }

    #[test]
    fn pair_places_wire_on_the_left() {
        let stackup = stack();
        let planes = ReferencePlanes::new();
        let sampler = ImpedanceSampler::new(&stackup, &planes, SamplerConfig::default());
        // first trace at y = +0.2 mm is on the left of travel along +x
        let a = Trace::new("a", TracePath::line(R2::new(0.0, 0.2e-3), R2::new(1.0e-3, 0.2e-3)), 0.2e-3, "F.Cu");
        let b = Trace::new("b", TracePath::line(R2::new(1.0e-3, -0.2e-3), R2::new(0.0, -0.2e-3)), 0.2e-3, "F.Cu");
        let pair = CoupledPair::new(a, b).unwrap();
        let mut backend = Recorder::default();
        let series = sampler.sample_pair(&pair, &mut backend).unwrap();
        assert_eq!(series.samples.len(), 3);
        let off = -stackup.board_thickness() * 0.5;
        match backend.calls[0] {
            Call::Box(w, _) => assert_relative_eq!(w, 2.0e-3, max_relative = 1e-12),
            ref other => panic!("unexpected first call {other:?}"),
        }
        let n = backend.calls.len();
        assert_eq!(backend.calls[n - 2], Call::Wire(-0.2e-3, off));
        assert_eq!(backend.calls[n - 1], Call::Coupler(0.2e-3, off));
    }
}
