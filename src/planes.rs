//! Reference copper lookups and the perpendicular scan used to find ground.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use crate::math::{Scalar, R2};

/// Answers whether a copper layer carries reference copper at a board point.
pub trait CopperLookup: Send + Sync {
    /// `true` when `point` lies on reference copper.
    fn is_copper(&self, point: R2) -> bool;
}

impl<F> CopperLookup for F
where
    F: Fn(R2) -> bool + Send + Sync,
{
    fn is_copper(&self, point: R2) -> bool {
        self(point)
    }
}

/// Solid plane covering the whole layer.
#[derive(Debug, Clone, Copy, Default)]
pub struct FullPlane;

impl CopperLookup for FullPlane {
    fn is_copper(&self, _point: R2) -> bool {
        true
    }
}

/// Axis-aligned rectangle on a copper layer.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Rect {
    /// Lower-left corner.
    pub min: R2,
    /// Upper-right corner.
    pub max: R2,
}

impl Rect {
    /// Rectangle spanning two opposite corners.
    #[must_use]
    pub fn new(a: R2, b: R2) -> Self {
        Self {
            min: a.inf(&b),
            max: a.sup(&b),
        }
    }

    /// Inclusive containment test.
    #[must_use]
    pub fn contains(&self, p: R2) -> bool {
        p.x >= self.min.x && p.x <= self.max.x && p.y >= self.min.y && p.y <= self.max.y
    }
}

/// Reference copper made of rectangular pours.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RectRegions {
    /// Copper rectangles.
    pub rects: Vec<Rect>,
}

impl RectRegions {
    /// Regions from a list of rectangles.
    #[must_use]
    pub fn new(rects: Vec<Rect>) -> Self {
        Self { rects }
    }
}

impl CopperLookup for RectRegions {
    fn is_copper(&self, point: R2) -> bool {
        self.rects.iter().any(|r| r.contains(point))
    }
}

/// Reference copper per layer name.
#[derive(Clone, Default)]
pub struct ReferencePlanes {
    layers: BTreeMap<String, Arc<dyn CopperLookup>>,
}

impl fmt::Debug for ReferencePlanes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.layers.keys()).finish()
    }
}

impl ReferencePlanes {
    /// Empty set (no reference copper anywhere).
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds or replaces the lookup for `layer`.
    pub fn insert(&mut self, layer: impl Into<String>, lookup: impl CopperLookup + 'static) {
        self.layers.insert(layer.into(), Arc::new(lookup));
    }

    /// Lookup of `layer`, if it carries reference copper.
    #[must_use]
    pub fn get(&self, layer: &str) -> Option<&dyn CopperLookup> {
        self.layers.get(layer).map(|v| v.as_ref())
    }

    /// Lookups in layer-name order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &dyn CopperLookup)> + '_ {
        self.layers.iter().map(|(k, v)| (k.as_str(), v.as_ref()))
    }

    /// Number of layers with reference copper.
    #[must_use]
    pub fn len(&self) -> usize {
        self.layers.len()
    }

    /// `true` when no layer has reference copper.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.layers.is_empty()
    }
}

/// Contiguous stretch of copper along a scan line.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CopperRun {
    /// Center relative to the scan midpoint, positive toward `right`.
    pub center: Scalar,
    /// Extent between first and last hit.
    pub width: Scalar,
}

/// Walks from `left` to `right` in `step` increments and reports copper runs.
///
/// A run needs at least two consecutive hits.
#[must_use]
pub fn scan_runs(lookup: &dyn CopperLookup, left: R2, right: R2, step: Scalar) -> Vec<CopperRun> {
    let span = right - left;
    let len = span.norm();
    if !(step > 0.0) || len <= 0.0 {
        return Vec::new();
    }
    let dir = span / len;
    let samples = (len / step + 1.0e-9).floor() as usize + 1;

    let mut runs = Vec::new();
    let mut current: Option<(Scalar, Scalar, usize)> = None;
    let close = |run: Option<(Scalar, Scalar, usize)>, runs: &mut Vec<CopperRun>| {
        if let Some((start, end, hits)) = run {
            if hits >= 2 {
                runs.push(CopperRun {
                    center: (start + end - len) * 0.5,
                    width: end - start,
                });
            }
        }
    };

    for i in 0..samples {
        let t = i as Scalar * step;
        if lookup.is_copper(left + dir * t) {
            current = Some(match current {
                Some((start, _, hits)) => (start, t, hits + 1),
                None => (t, t, 1),
            });
        } else {
            close(current.take(), &mut runs);
        }
    }
    close(current, &mut runs);
    runs
}

/// Diameter of the copper-free disk around a via pad of diameter `pad`.
///
/// The search covers a square of side `5 × pad`; without any copper in reach
/// that size is returned. A clearance no wider than the pad itself means the
/// pad is flooded, and `2 × pad` is reported instead.
#[must_use]
pub fn clearance_diameter(lookup: &dyn CopperLookup, center: R2, pad: Scalar, step: Scalar) -> Scalar {
    let mut diameter = pad * 5.0;
    if !(step > 0.0) {
        return diameter;
    }
    let half = diameter * 0.5;
    let n = (diameter / step).ceil() as usize;
    for i in 0..=n {
        for j in 0..=n {
            let offset = R2::new(i as Scalar * step - half, j as Scalar * step - half);
            let dist = offset.norm();
            if dist * 2.0 < diameter && lookup.is_copper(center + offset) {
                diameter = dist * 2.0;
            }
        }
    }
    if diameter <= pad {
        pad * 2.0
    } else {
        diameter
    }
}
