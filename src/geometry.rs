//! Board geometry consumed by the sampler: stackup, trace paths and pairs.
//!
//! Plane coordinates are meters with the y axis pointing "up" in the usual
//! mathematical sense. Cross-section x grows toward the right-hand side of a
//! trace when looking along its direction of travel.

use std::f64::consts::TAU;

use crate::constants::MIL;
use crate::errors::ExtractError;
use crate::math::{cross2, left_normal, Scalar, R2};

/// Minimum copper thickness assumed when a stackup has no copper layer.
const DEFAULT_COPPER_THICKNESS: Scalar = 1.0e-3;

/// Role of a stackup layer.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LayerKind {
    /// Routable copper.
    Copper,
    /// Core or prepreg.
    Dielectric,
    /// Solder mask coating an outer copper layer.
    SolderMask,
}

/// One layer of the board stack, listed top to bottom.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, PartialEq)]
pub struct Layer {
    /// Layer name, e.g. `F.Cu`.
    pub name: String,
    /// Layer role.
    pub kind: LayerKind,
    /// Thickness in meters.
    pub thickness: Scalar,
    /// Relative permittivity (1 for copper).
    pub epsilon_r: Scalar,
}

impl Layer {
    /// Copper layer.
    #[must_use]
    pub fn copper(name: impl Into<String>, thickness: Scalar) -> Self {
        Self {
            name: name.into(),
            kind: LayerKind::Copper,
            thickness,
            epsilon_r: 1.0,
        }
    }

    /// Core/prepreg layer.
    #[must_use]
    pub fn dielectric(name: impl Into<String>, thickness: Scalar, epsilon_r: Scalar) -> Self {
        Self {
            name: name.into(),
            kind: LayerKind::Dielectric,
            thickness,
            epsilon_r,
        }
    }

    /// Solder mask layer.
    #[must_use]
    pub fn solder_mask(name: impl Into<String>, thickness: Scalar, epsilon_r: Scalar) -> Self {
        Self {
            name: name.into(),
            kind: LayerKind::SolderMask,
            thickness,
            epsilon_r,
        }
    }

    /// Dielectric and solder-mask layers fill the whole cross-section.
    #[must_use]
    pub fn is_insulator(&self) -> bool {
        matches!(self.kind, LayerKind::Dielectric | LayerKind::SolderMask)
    }
}

/// Ordered board stack, top layer first.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Stackup {
    layers: Vec<Layer>,
}

impl Stackup {
    /// Builds a stack from layers listed top to bottom.
    #[must_use]
    pub fn new(layers: Vec<Layer>) -> Self {
        Self { layers }
    }

    /// All layers, top first.
    #[must_use]
    pub fn layers(&self) -> &[Layer] {
        &self.layers
    }

    fn index_of(&self, name: &str) -> Result<usize, ExtractError> {
        self.layers
            .iter()
            .position(|l| l.name == name)
            .ok_or_else(|| ExtractError::UnknownLayer(name.to_owned()))
    }

    /// Layer by name.
    pub fn layer(&self, name: &str) -> Result<&Layer, ExtractError> {
        Ok(&self.layers[self.index_of(name)?])
    }

    /// Depth of the top face of `name` below the top of the board.
    pub fn z_offset(&self, name: &str) -> Result<Scalar, ExtractError> {
        let idx = self.index_of(name)?;
        Ok(self.layers[..idx].iter().map(|l| l.thickness).sum())
    }

    /// Thickness of `name`.
    pub fn thickness(&self, name: &str) -> Result<Scalar, ExtractError> {
        Ok(self.layer(name)?.thickness)
    }

    /// Total stack thickness.
    #[must_use]
    pub fn board_thickness(&self) -> Scalar {
        self.layers.iter().map(|l| l.thickness).sum()
    }

    /// Thinnest copper layer, or 1 mm when the stack has none.
    #[must_use]
    pub fn min_copper_thickness(&self) -> Scalar {
        self.layers
            .iter()
            .filter(|l| l.kind == LayerKind::Copper)
            .map(|l| l.thickness)
            .reduce(Scalar::min)
            .unwrap_or(DEFAULT_COPPER_THICKNESS)
    }

    /// Dielectric and solder-mask layers, top first.
    pub fn dielectric_layers(&self) -> impl Iterator<Item = &Layer> + '_ {
        self.layers.iter().filter(|l| l.is_insulator())
    }

    /// Permittivity of the material filling the gaps of copper layer `name`.
    ///
    /// An adjacent solder mask wins; otherwise the two neighbours are
    /// averaged, a missing neighbour counting as air.
    pub fn copper_fill_permittivity(&self, name: &str) -> Result<Scalar, ExtractError> {
        let idx = self.index_of(name)?;
        let up = idx.checked_sub(1).and_then(|i| self.layers.get(i));
        let down = self.layers.get(idx + 1);
        let mask = [up, down]
            .into_iter()
            .flatten()
            .find(|l| l.kind == LayerKind::SolderMask);
        if let Some(mask) = mask {
            return Ok(mask.epsilon_r);
        }
        let er = |l: Option<&Layer>| l.map_or(1.0, |l| l.epsilon_r);
        Ok((er(up) + er(down)) * 0.5)
    }

    /// Stack indices of `a` and `b`, top first.
    fn span(&self, a: &str, b: &str) -> Result<(usize, usize), ExtractError> {
        let (i, j) = (self.index_of(a)?, self.index_of(b)?);
        Ok((i.min(j), i.max(j)))
    }

    /// Copper layers from `a` to `b` inclusive, top first.
    pub fn copper_between(&self, a: &str, b: &str) -> Result<Vec<&Layer>, ExtractError> {
        let (top, bottom) = self.span(a, b)?;
        Ok(self.layers[top..=bottom]
            .iter()
            .filter(|l| l.kind == LayerKind::Copper)
            .collect())
    }

    /// Summed thickness of the layers strictly between `a` and `b`.
    pub fn layer_distance(&self, a: &str, b: &str) -> Result<Scalar, ExtractError> {
        let (top, bottom) = self.span(a, b)?;
        Ok(self.layers[top..bottom].iter().skip(1).map(|l| l.thickness).sum())
    }

    /// Thickness-weighted permittivity of the insulators strictly between
    /// `a` and `b`; air when there are none.
    pub fn permittivity_between(&self, a: &str, b: &str) -> Result<Scalar, ExtractError> {
        let (top, bottom) = self.span(a, b)?;
        let (mut thickness, mut weighted) = (0.0, 0.0);
        for l in self.layers[top..bottom].iter().skip(1).filter(|l| l.is_insulator()) {
            thickness += l.thickness;
            weighted += l.thickness * l.epsilon_r;
        }
        Ok(if thickness > 0.0 { weighted / thickness } else { 1.0 })
    }
}

/// Plated hole joining the copper layers from `from` to `to`.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, PartialEq)]
pub struct Via {
    /// Identifier, unique within its net.
    pub name: String,
    /// Center on the board.
    pub at: R2,
    /// Pad diameter.
    pub size: Scalar,
    /// Drill diameter.
    pub drill: Scalar,
    /// First copper layer.
    pub from: String,
    /// Last copper layer.
    pub to: String,
}

impl Via {
    /// Via spanning `from` to `to`.
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        at: R2,
        size: Scalar,
        drill: Scalar,
        from: impl Into<String>,
        to: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            at,
            size,
            drill,
            from: from.into(),
            to: to.into(),
        }
    }

    /// Through-hole via from the top to the bottom copper of `stackup`.
    pub fn through(
        name: impl Into<String>,
        at: R2,
        size: Scalar,
        drill: Scalar,
        stackup: &Stackup,
    ) -> Result<Self, ExtractError> {
        let mut copper = stackup.layers().iter().filter(|l| l.kind == LayerKind::Copper);
        let first = copper
            .next()
            .ok_or_else(|| ExtractError::InvalidGeometry("stackup has no copper for a via".into()))?;
        let last = copper.last().unwrap_or(first);
        Ok(Self::new(name, at, size, drill, first.name.clone(), last.name.clone()))
    }

    /// `true` when `point` lies on the via pad.
    #[must_use]
    pub fn touches(&self, point: R2) -> bool {
        (point - self.at).norm() <= self.size * 0.5
    }
}

/// Circular arc through three points.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ArcPath {
    start: R2,
    mid: R2,
    end: R2,
    center: R2,
    radius: Scalar,
    start_angle: Scalar,
    sweep: Scalar,
}

impl ArcPath {
    /// Fits the circle through `start`, `mid` and `end`.
    pub fn new(start: R2, mid: R2, end: R2) -> Result<Self, ExtractError> {
        let d = 2.0
            * (start.x * (mid.y - end.y) + mid.x * (end.y - start.y) + end.x * (start.y - mid.y));
        let span = (end - start).norm().max((mid - start).norm());
        if d.abs() <= 1.0e-12 * span * span || !d.is_finite() {
            return Err(ExtractError::InvalidGeometry(format!(
                "arc points ({:.6}, {:.6}) ({:.6}, {:.6}) ({:.6}, {:.6}) are collinear",
                start.x, start.y, mid.x, mid.y, end.x, end.y
            )));
        }
        let s2 = start.norm_squared();
        let m2 = mid.norm_squared();
        let e2 = end.norm_squared();
        let center = R2::new(
            (s2 * (mid.y - end.y) + m2 * (end.y - start.y) + e2 * (start.y - mid.y)) / d,
            (s2 * (end.x - mid.x) + m2 * (start.x - end.x) + e2 * (mid.x - start.x)) / d,
        );
        let radius = (start - center).norm();
        let angle = |p: R2| (p.y - center.y).atan2(p.x - center.x);
        let start_angle = angle(start);
        let counter_clockwise = cross2(&(mid - start), &(end - mid)) > 0.0;
        let raw = angle(end) - start_angle;
        let sweep = if counter_clockwise {
            raw.rem_euclid(TAU)
        } else {
            -(-raw).rem_euclid(TAU)
        };
        Ok(Self {
            start,
            mid,
            end,
            center,
            radius,
            start_angle,
            sweep,
        })
    }

    /// Arc center.
    #[must_use]
    pub fn center(&self) -> R2 {
        self.center
    }

    /// Arc radius.
    #[must_use]
    pub const fn radius(&self) -> Scalar {
        self.radius
    }

    /// Signed swept angle (positive counter-clockwise).
    #[must_use]
    pub const fn sweep(&self) -> Scalar {
        self.sweep
    }

    /// Point used to define the arc between its ends.
    #[must_use]
    pub fn mid(&self) -> R2 {
        self.mid
    }
}

/// Centerline of a trace segment.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TracePath {
    /// Straight segment.
    Line {
        /// First point.
        start: R2,
        /// Last point.
        end: R2,
    },
    /// Circular arc.
    Arc(ArcPath),
}

impl TracePath {
    /// Straight segment from `start` to `end`.
    #[must_use]
    pub const fn line(start: R2, end: R2) -> Self {
        Self::Line { start, end }
    }

    /// Arc through three points.
    pub fn arc(start: R2, mid: R2, end: R2) -> Result<Self, ExtractError> {
        ArcPath::new(start, mid, end).map(Self::Arc)
    }

    /// First point.
    #[must_use]
    pub fn start(&self) -> R2 {
        match self {
            Self::Line { start, .. } => *start,
            Self::Arc(arc) => arc.start,
        }
    }

    /// Last point.
    #[must_use]
    pub fn end(&self) -> R2 {
        match self {
            Self::Line { end, .. } => *end,
            Self::Arc(arc) => arc.end,
        }
    }

    /// Path length in meters.
    #[must_use]
    pub fn length(&self) -> Scalar {
        match self {
            Self::Line { start, end } => (end - start).norm(),
            Self::Arc(arc) => arc.radius * arc.sweep.abs(),
        }
    }

    fn arc_angle(arc: &ArcPath, offset: Scalar, length: Scalar) -> Scalar {
        if length > 0.0 {
            arc.start_angle + arc.sweep * (offset / length)
        } else {
            arc.start_angle
        }
    }

    /// Point at distance `offset` from the start, measured along the path.
    #[must_use]
    pub fn point_at(&self, offset: Scalar) -> R2 {
        let length = self.length();
        match self {
            Self::Line { start, .. } => start + self.tangent_at(offset) * offset,
            Self::Arc(arc) => {
                let a = Self::arc_angle(arc, offset, length);
                arc.center + R2::new(a.cos(), a.sin()) * arc.radius
            }
        }
    }

    /// Unit direction of travel at `offset` (zero for degenerate lines).
    #[must_use]
    pub fn tangent_at(&self, offset: Scalar) -> R2 {
        match self {
            Self::Line { start, end } => {
                let d = end - start;
                let n = d.norm();
                if n > 0.0 {
                    d / n
                } else {
                    R2::zeros()
                }
            }
            Self::Arc(arc) => {
                let a = Self::arc_angle(arc, offset, self.length());
                R2::new(-a.sin(), a.cos()) * arc.sweep.signum()
            }
        }
    }

    /// End points of the cross-section line of total `width` at `offset`,
    /// as `(left, right)` relative to the direction of travel.
    #[must_use]
    pub fn perpendicular(&self, offset: Scalar, width: Scalar) -> (R2, R2) {
        let p = self.point_at(offset);
        let n = left_normal(&self.tangent_at(offset)) * (width * 0.5);
        (p + n, p - n)
    }
}

/// A routed piece of copper.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, PartialEq)]
pub struct Trace {
    /// Identifier used in netlists.
    pub name: String,
    /// Centerline.
    pub path: TracePath,
    /// Copper width in meters.
    pub width: Scalar,
    /// Copper layer name.
    pub layer: String,
}

impl Trace {
    /// New trace.
    #[must_use]
    pub fn new(name: impl Into<String>, path: TracePath, width: Scalar, layer: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            path,
            width,
            layer: layer.into(),
        }
    }

    /// Centerline length.
    #[must_use]
    pub fn length(&self) -> Scalar {
        self.path.length()
    }

    /// Straight piece between `from` and `to` along a line trace.
    ///
    /// Returns `None` for arcs and for pieces shorter than one mil.
    #[must_use]
    pub fn sub_line(&self, from: Scalar, to: Scalar, suffix: &str) -> Option<Self> {
        if !matches!(self.path, TracePath::Line { .. }) || to - from < MIL {
            return None;
        }
        Some(Self {
            name: format!("{}_{suffix}", self.name),
            path: TracePath::line(self.path.point_at(from), self.path.point_at(to)),
            width: self.width,
            layer: self.layer.clone(),
        })
    }
}

/// Geometry of a coupled pair as seen by the cross-section.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PairFrame {
    /// Centerline halfway between the two traces.
    pub midline: TracePath,
    /// Center-to-center distance.
    pub spacing: Scalar,
    /// Whether the first trace lies on the left of the direction of travel.
    pub first_on_left: bool,
}

/// Two straight, parallel traces on the same layer modelled as one coupled line.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, PartialEq)]
pub struct CoupledPair {
    /// First line (conductor 1).
    pub first: Trace,
    /// Second line (conductor 2), oriented like `first`.
    pub second: Trace,
}

fn line_direction(trace: &Trace) -> Result<R2, ExtractError> {
    match trace.path {
        TracePath::Line { start, end } if (end - start).norm() > 0.0 => Ok((end - start).normalize()),
        _ => Err(ExtractError::InvalidGeometry(format!(
            "coupled trace `{}` must be a non-empty straight line",
            trace.name
        ))),
    }
}

impl CoupledPair {
    /// Pairs two parallel straight traces; `second` is reversed if needed.
    pub fn new(first: Trace, mut second: Trace) -> Result<Self, ExtractError> {
        let da = line_direction(&first)?;
        let db = line_direction(&second)?;
        if cross2(&da, &db).abs() > 1.0e-6 {
            return Err(ExtractError::InvalidGeometry(format!(
                "traces `{}` and `{}` are not parallel",
                first.name, second.name
            )));
        }
        if first.layer != second.layer {
            return Err(ExtractError::InvalidGeometry(format!(
                "traces `{}` and `{}` are on different layers",
                first.name, second.name
            )));
        }
        if da.dot(&db) < 0.0 {
            second.path = TracePath::line(second.path.end(), second.path.start());
        }
        Ok(Self { first, second })
    }

    /// Midline, spacing and side of the pair.
    #[must_use]
    pub fn frame(&self) -> PairFrame {
        let a = &self.first.path;
        let b = &self.second.path;
        let dir = a.tangent_at(0.0);
        let offset = b.start() - a.start();
        PairFrame {
            midline: TracePath::line((a.start() + b.start()) * 0.5, (a.end() + b.end()) * 0.5),
            spacing: cross2(&dir, &offset).abs(),
            first_on_left: offset.dot(&left_normal(&dir)) < 0.0,
        }
    }

    /// Length of the pair (the midline).
    #[must_use]
    pub fn length(&self) -> Scalar {
        self.frame().midline.length()
    }
}

/// Result of splitting two traces around their coupled overlap.
#[derive(Debug, Clone, PartialEq)]
pub struct CouplingSplit {
    /// Overlapping pieces.
    pub pair: CoupledPair,
    /// Uncoupled pieces of the first trace.
    pub first_rest: Vec<Trace>,
    /// Uncoupled pieces of the second trace.
    pub second_rest: Vec<Trace>,
}

/// Tests whether two straight traces couple and splits them at the overlap.
///
/// Coupled means parallel (either direction), an edge-to-edge gap of at most
/// `max_gap` and an overlap of at least `min_len`.
#[must_use]
pub fn detect_coupling(a: &Trace, b: &Trace, max_gap: Scalar, min_len: Scalar) -> Option<CouplingSplit> {
    let da = line_direction(a).ok()?;
    let db = line_direction(b).ok()?;
    if a.layer != b.layer || cross2(&da, &db).abs() > 1.0e-6 {
        return None;
    }
    let origin = a.path.start();
    let gap = cross2(&da, &(b.path.start() - origin)).abs() - a.width * 0.5 - b.width * 0.5;
    if gap > max_gap {
        return None;
    }

    let project_a = |p: R2| (p - origin).dot(&da);
    let (t0, t1) = ordered(project_a(b.path.start()), project_a(b.path.end()));
    let lo = t0.max(0.0);
    let hi = t1.min(a.length());
    if hi - lo < min_len {
        return None;
    }

    let project_b = |p: R2| (p - b.path.start()).dot(&db);
    let (u0, u1) = ordered(project_b(a.path.point_at(lo)), project_b(a.path.point_at(hi)));
    let u0 = u0.max(0.0);
    let u1 = u1.min(b.length());

    let pair = CoupledPair::new(a.sub_line(lo, hi, "cpl")?, b.sub_line(u0, u1, "cpl")?).ok()?;
    let rest = |t: &Trace, lo: Scalar, hi: Scalar| -> Vec<Trace> {
        [t.sub_line(0.0, lo, "head"), t.sub_line(hi, t.length(), "tail")]
            .into_iter()
            .flatten()
            .collect()
    };
    Some(CouplingSplit {
        first_rest: rest(a, lo, hi),
        second_rest: rest(b, u0, u1),
        pair,
    })
}

fn ordered(a: Scalar, b: Scalar) -> (Scalar, Scalar) {
    if a <= b {
        (a, b)
    } else {
        (b, a)
    }
}
