//! Via barrels modelled as short coaxial lines.
//!
//! Each pair of adjacent copper layers crossed by a via becomes one lossless
//! line. Its cross-section is taken in the board plane: the plated barrel is
//! the signal, neighbouring ground vias and a return conductor at the
//! anti-pad distance are the reference.

use log::debug;

use crate::circuits::transmission::{LineModel, RLGC};
use crate::constants::MIL;
use crate::errors::ExtractError;
use crate::geometry::{Stackup, Via};
use crate::impedance::ImpedanceBackend;
use crate::math::{Scalar, R2};
use crate::planes::{clearance_diameter, ReferencePlanes};

/// Plating thickness of a via barrel.
pub const BARREL_THICKNESS: Scalar = MIL;

/// Window width over the drill diameter.
const BOX_WIDTH_RATIO: Scalar = 10.0;
/// Window height over the drill diameter.
const BOX_HEIGHT_RATIO: Scalar = 15.0;

/// Barrel between two adjacent copper layers.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, PartialEq)]
pub struct ViaSpan {
    /// Upper copper layer.
    pub from: String,
    /// Lower copper layer.
    pub to: String,
    /// Insulation crossed by the barrel (m).
    pub length: Scalar,
    /// Characteristic impedance (Ω).
    pub z0: Scalar,
    /// Propagation velocity (m/s).
    pub velocity: Scalar,
    /// Propagation delay (s).
    pub delay: Scalar,
    /// Lossless per-unit-length parameters.
    pub rlgc: RLGC,
    /// Smaller anti-pad of the two layers (m).
    pub anti_pad: Scalar,
    /// Primitive emitted for this span.
    pub model: LineModel,
}

/// Extracted model of one via.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, PartialEq)]
pub struct ViaModel {
    /// Via name.
    pub name: String,
    /// Center on the board.
    pub at: R2,
    /// Layers exposed as subcircuit pins, top first.
    pub ports: Vec<String>,
    /// Spans, top first.
    pub spans: Vec<ViaSpan>,
    /// Depth between the outermost layers the net actually uses (m).
    pub connected_length: Scalar,
}

impl ViaModel {
    /// Delay through the whole barrel.
    #[must_use]
    pub fn delay(&self) -> Scalar {
        self.spans.iter().map(|s| s.delay).sum()
    }
}

/// Builds via cross-sections over a board and hands them to a backend.
#[derive(Debug, Clone, Copy)]
pub struct ViaModeler<'a> {
    stackup: &'a Stackup,
    planes: &'a ReferencePlanes,
    ground_vias: &'a [Via],
    scan_step: Scalar,
    conductivity: Scalar,
    model: LineModel,
}

impl<'a> ViaModeler<'a> {
    /// Modeler over a board; `ground_vias` are the reference-net vias.
    #[must_use]
    pub const fn new(stackup: &'a Stackup, planes: &'a ReferencePlanes, ground_vias: &'a [Via]) -> Self {
        Self {
            stackup,
            planes,
            ground_vias,
            scan_step: 10e-6,
            conductivity: crate::constants::COPPER_CONDUCTIVITY,
            model: LineModel::Ltra,
        }
    }

    /// Resolution of the anti-pad search.
    #[must_use]
    pub fn with_scan_step(mut self, scan_step: Scalar) -> Self {
        self.scan_step = scan_step;
        self
    }

    /// Barrel conductivity handed to the backend.
    #[must_use]
    pub fn with_conductivity(mut self, conductivity: Scalar) -> Self {
        self.conductivity = conductivity;
        self
    }

    /// Primitive written for every span.
    #[must_use]
    pub fn with_model(mut self, model: LineModel) -> Self {
        self.model = model;
        self
    }

    /// Anti-pad diameter of `via` on `layer`; `5 × size` without reference copper.
    #[must_use]
    pub fn anti_pad(&self, via: &Via, layer: &str) -> Scalar {
        self.planes.get(layer).map_or(via.size * 5.0, |copper| {
            clearance_diameter(copper, via.at, via.size, self.scan_step)
        })
    }

    /// Layers among `connected` that the via reaches, in stack order.
    ///
    /// Falls back to the two end layers when the net touches fewer than two.
    fn ports(&self, via: &Via, connected: &[&str]) -> Result<Vec<String>, ExtractError> {
        let reached: Vec<String> = self
            .stackup
            .copper_between(&via.from, &via.to)?
            .into_iter()
            .filter(|l| connected.contains(&l.name.as_str()))
            .map(|l| l.name.clone())
            .collect();
        if reached.len() >= 2 {
            return Ok(reached);
        }
        let (top, bottom) = if self.stackup.z_offset(&via.from)? <= self.stackup.z_offset(&via.to)? {
            (&via.from, &via.to)
        } else {
            (&via.to, &via.from)
        };
        Ok(vec![top.clone(), bottom.clone()])
    }

    fn connected_length(&self, connected: &[&str]) -> Result<Scalar, ExtractError> {
        let mut depths = Vec::with_capacity(connected.len());
        for layer in connected {
            depths.push(self.stackup.z_offset(layer)?);
        }
        let lo = depths.iter().copied().reduce(Scalar::min);
        let hi = depths.iter().copied().reduce(Scalar::max);
        Ok(lo.zip(hi).map_or(0.0, |(lo, hi)| hi - lo))
    }

    /// Places the barrel between `from` and `to` and solves it.
    fn solve_span(
        &self,
        via: &Via,
        from: &str,
        to: &str,
        backend: &mut dyn ImpedanceBackend,
    ) -> Result<ViaSpan, ExtractError> {
        let length = self.stackup.layer_distance(from, to)?;
        let anti_pad = self.anti_pad(via, from).min(self.anti_pad(via, to));
        let return_depth = length.hypot(anti_pad * 0.5);
        let epsilon_r = self.stackup.permittivity_between(from, to)?;
        let box_w = via.drill * BOX_WIDTH_RATIO;
        let box_h = via.drill * BOX_HEIGHT_RATIO;

        backend.clean_all();
        backend.set_precision(BARREL_THICKNESS * 0.5)?;
        backend.set_box_size(box_w, box_h)?;
        backend.add_dielectric(0.0, -box_h * 0.5, box_w, box_h, epsilon_r);
        backend.add_ring_wire(0.0, 0.0, via.drill * 0.5, BARREL_THICKNESS, self.conductivity);
        for g in self.ground_vias {
            let d = g.at - via.at;
            if d.norm() < box_w - via.drill {
                // board y points up, cross-section y points down
                backend.add_ring_ground(d.x, -d.y, g.drill * 0.5, BARREL_THICKNESS);
            }
        }
        backend.add_ground(0.0, return_depth, BARREL_THICKNESS, via.drill);

        let solution = backend.calc_z0()?;
        let delay = length / solution.velocity;
        debug!(
            "via {} {from}->{to}: {length:.3e} m, anti-pad {anti_pad:.3e} m, Z0 {:.2} ohm",
            via.name, solution.z0
        );
        Ok(ViaSpan {
            from: from.to_owned(),
            to: to.to_owned(),
            length,
            z0: solution.z0,
            velocity: solution.velocity,
            delay,
            rlgc: solution.rlgc.without_resistance(),
            anti_pad,
            model: self.model,
        })
    }

    /// Models every span of `via`. `connected` lists the layers its net
    /// routes to at the via.
    pub fn model(
        &self,
        via: &Via,
        connected: &[&str],
        backend: &mut dyn ImpedanceBackend,
    ) -> Result<ViaModel, ExtractError> {
        if !(via.drill > 0.0 && via.size >= via.drill) {
            return Err(ExtractError::InvalidGeometry(format!(
                "via `{}` has drill {:e} m and pad {:e} m",
                via.name, via.drill, via.size
            )));
        }
        let copper = self.stackup.copper_between(&via.from, &via.to)?;
        if copper.len() < 2 {
            return Err(ExtractError::InvalidGeometry(format!(
                "via `{}` joins fewer than two copper layers",
                via.name
            )));
        }
        let mut spans = Vec::with_capacity(copper.len() - 1);
        for pair in copper.windows(2) {
            spans.push(self.solve_span(via, &pair[0].name, &pair[1].name, backend)?);
        }
        let ports = self.ports(via, connected)?;
        let reached: Vec<&str> = connected
            .iter()
            .copied()
            .filter(|l| copper.iter().any(|c| c.name == *l))
            .collect();
        Ok(ViaModel {
            name: via.name.clone(),
            at: via.at,
            ports,
            spans,
            connected_length: self.connected_length(&reached)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use approx::assert_relative_eq;

    use super::*;
    use crate::geometry::Layer;
    use crate::impedance::{CoupledSolution, LineSolution};
    use crate::planes::FullPlane;

    #[derive(Debug, Clone, Copy, PartialEq)]
    enum Call {
        Box(Scalar, Scalar),
        Dielectric(Scalar),
        Barrel(Scalar),
        RingGround(Scalar, Scalar),
        Ground(Scalar),
    }

    /// Records placements; every solve returns 50 Ω at c/2.
    #[derive(Default)]
    struct Recorder {
        calls: Vec<Call>,
        solves: Vec<Vec<Call>>,
    }

    impl ImpedanceBackend for Recorder {
        fn set_precision(&mut self, _p: Scalar) -> Result<(), ExtractError> {
            Ok(())
        }
        fn set_box_size(&mut self, width: Scalar, height: Scalar) -> Result<(), ExtractError> {
            self.calls.push(Call::Box(width, height));
            Ok(())
        }
        fn add_ground(&mut self, _x: Scalar, y: Scalar, _w: Scalar, _t: Scalar) {
            self.calls.push(Call::Ground(y));
        }
        fn add_wire(&mut self, _x: Scalar, _y: Scalar, _w: Scalar, _t: Scalar, _s: Scalar) {}
        fn add_coupler(&mut self, _x: Scalar, _y: Scalar, _w: Scalar, _t: Scalar, _s: Scalar) {}
        fn add_dielectric(&mut self, _x: Scalar, _y: Scalar, _w: Scalar, _t: Scalar, epsilon_r: Scalar) {
            self.calls.push(Call::Dielectric(epsilon_r));
        }
        fn add_ring_ground(&mut self, x: Scalar, y: Scalar, _r: Scalar, _t: Scalar) {
            self.calls.push(Call::RingGround(x, y));
        }
        fn add_ring_wire(&mut self, _x: Scalar, _y: Scalar, radius: Scalar, _t: Scalar, _s: Scalar) {
            self.calls.push(Call::Barrel(radius));
        }
        fn calc_z0(&mut self) -> Result<LineSolution, ExtractError> {
            self.solves.push(self.calls.clone());
            Ok(LineSolution {
                z0: 50.0,
                velocity: 1.5e8,
                rlgc: RLGC {
                    r_per_m: 1.0,
                    ..RLGC::lossless(50.0 / 1.5e8, 1.0 / (50.0 * 1.5e8))
                },
                cache_hit: false,
            })
        }
        fn calc_coupled_z0(&mut self) -> Result<CoupledSolution, ExtractError> {
            Err(ExtractError::InvalidConfig("not a pair backend".into()))
        }
        fn clean(&mut self) {
            self.calls.clear();
        }
        fn clean_all(&mut self) {
            self.calls.clear();
        }
    }

    fn stack() -> Stackup {
        Stackup::new(vec![
            Layer::copper("F.Cu", 35e-6),
            Layer::dielectric("core", 0.2e-3, 4.3),
            Layer::copper("In1.Cu", 35e-6),
            Layer::dielectric("prepreg", 0.4e-3, 4.0),
            Layer::copper("B.Cu", 35e-6),
        ])
    }

    fn via() -> Via {
        Via::new("v1", R2::new(2e-3, 1e-3), 0.6e-3, 0.3e-3, "F.Cu", "B.Cu")
    }

    #[test]
    fn one_span_per_adjacent_copper_pair() {
        let stack = stack();
        let planes = ReferencePlanes::new();
        let mut backend = Recorder::default();
        let model = ViaModeler::new(&stack, &planes, &[])
            .model(&via(), &["F.Cu", "B.Cu"], &mut backend)
            .unwrap();

        assert_eq!(model.spans.len(), 2);
        let s = &model.spans[1];
        assert_eq!((s.from.as_str(), s.to.as_str()), ("In1.Cu", "B.Cu"));
        assert_relative_eq!(s.length, 0.4e-3);
        assert_relative_eq!(s.delay, 0.4e-3 / 1.5e8);
        assert_relative_eq!(s.rlgc.r_per_m, 0.0);
        assert_relative_eq!(model.delay(), 0.6e-3 / 1.5e8, max_relative = 1e-12);
        assert_eq!(model.ports, ["F.Cu", "B.Cu"]);
        assert_relative_eq!(model.connected_length, 0.67e-3, max_relative = 1e-12);

        // no reference copper: anti-pad is 5 × pad
        let first = &backend.solves[0];
        assert!(matches!(first[0], Call::Box(w, h)
            if (w - 3e-3).abs() < 1e-12 && (h - 4.5e-3).abs() < 1e-12));
        assert!(matches!(first[1], Call::Dielectric(er) if (er - 4.3).abs() < 1e-9));
        assert!(matches!(first[2], Call::Barrel(r) if (r - 0.15e-3).abs() < 1e-12));
        let depth = (0.2e-3_f64).hypot(1.5e-3);
        assert!(matches!(first[3], Call::Ground(y) if (y - depth).abs() < 1e-12));
    }

    #[test]
    fn nearby_ground_vias_join_the_cross_section() {
        let stack = stack();
        let planes = ReferencePlanes::new();
        let grounds = [
            Via::new("g1", R2::new(2.5e-3, 1.5e-3), 0.6e-3, 0.3e-3, "F.Cu", "B.Cu"),
            Via::new("g2", R2::new(9e-3, 1e-3), 0.6e-3, 0.3e-3, "F.Cu", "B.Cu"),
        ];
        let mut backend = Recorder::default();
        ViaModeler::new(&stack, &planes, &grounds)
            .model(&via(), &[], &mut backend)
            .unwrap();
        for solve in &backend.solves {
            let rings: Vec<_> = solve
                .iter()
                .filter(|c| matches!(c, Call::RingGround(..)))
                .collect();
            assert_eq!(rings.len(), 1);
            assert!(matches!(rings[0], Call::RingGround(x, y)
                if (x - 0.5e-3).abs() < 1e-12 && (y + 0.5e-3).abs() < 1e-12));
        }
    }

    #[test]
    fn anti_pad_follows_plane_clearance() {
        let stack = stack();
        let mut planes = ReferencePlanes::new();
        let v = via();
        let center = v.at;
        planes.insert("In1.Cu", move |p: R2| (p - center).norm() > 0.5e-3);
        planes.insert("B.Cu", FullPlane);
        let modeler = ViaModeler::new(&stack, &planes, &[]);
        assert_relative_eq!(modeler.anti_pad(&v, "F.Cu"), 3e-3, max_relative = 1e-12);
        assert_relative_eq!(modeler.anti_pad(&v, "In1.Cu"), 1e-3, epsilon = 2e-5);
        assert_relative_eq!(modeler.anti_pad(&v, "B.Cu"), 1.2e-3, max_relative = 1e-12);

        let mut backend = Recorder::default();
        let model = modeler.model(&v, &["In1.Cu"], &mut backend).unwrap();
        assert_relative_eq!(model.spans[0].anti_pad, 1e-3, epsilon = 2e-5);
        assert_relative_eq!(model.spans[1].anti_pad, 1e-3, epsilon = 2e-5);
        assert_eq!(model.ports, ["F.Cu", "B.Cu"]);
        assert_relative_eq!(model.connected_length, 0.0);
    }

    #[test]
    fn degenerate_vias_are_rejected() {
        let stack = stack();
        let planes = ReferencePlanes::new();
        let modeler = ViaModeler::new(&stack, &planes, &[]);
        let mut backend = Recorder::default();
        let mut v = via();
        v.drill = 0.0;
        assert!(matches!(
            modeler.model(&v, &[], &mut backend),
            Err(ExtractError::InvalidGeometry(_))
        ));
        let v = Via::new("v", R2::zeros(), 0.6e-3, 0.3e-3, "F.Cu", "F.Cu");
        assert!(modeler.model(&v, &[], &mut backend).is_err());
        let v = Via::new("v", R2::zeros(), 0.6e-3, 0.3e-3, "F.Cu", "X.Cu");
        assert!(matches!(
            modeler.model(&v, &[], &mut backend),
            Err(ExtractError::UnknownLayer(_))
        ));
    }
}
