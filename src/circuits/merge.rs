//! Merging of impedance samples into piecewise-homogeneous line segments.

use crate::circuits::transmission::{LineModel, SegmentDescriptor, RLGC};
use crate::math::Scalar;
use crate::sampler::Sample;

/// Default impedance step that closes a run (Ω).
pub const DEFAULT_Z0_THRESHOLD: Scalar = 0.5;
/// Default delay below which a segment is modelled without resistance (s).
pub const DEFAULT_TD_THRESHOLD: Scalar = 1.0e-12;

#[derive(Debug, Clone, Copy)]
struct Point {
    position: Scalar,
    z0: Scalar,
    velocity: Scalar,
    rlgc: RLGC,
}

impl From<&Sample> for Point {
    fn from(s: &Sample) -> Self {
        Self {
            position: s.position,
            z0: s.z0,
            velocity: s.velocity,
            rlgc: s.rlgc,
        }
    }
}

impl From<&SegmentDescriptor> for Point {
    fn from(d: &SegmentDescriptor) -> Self {
        Self {
            position: d.start,
            z0: d.z0,
            velocity: d.velocity,
            rlgc: d.rlgc,
        }
    }
}

/// Groups consecutive samples whose impedance stays within a threshold.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SegmentMerger {
    /// A run closes when a sample differs from the run's first sample by more than this.
    pub z0_threshold: Scalar,
    /// Segments with a shorter delay drop their resistance.
    pub td_threshold: Scalar,
    /// Drop resistance on every segment.
    pub force_lossless: bool,
    /// Primitive recorded on emitted descriptors.
    pub model: LineModel,
}

impl Default for SegmentMerger {
    fn default() -> Self {
        Self {
            z0_threshold: DEFAULT_Z0_THRESHOLD,
            td_threshold: DEFAULT_TD_THRESHOLD,
            force_lossless: true,
            model: LineModel::default(),
        }
    }
}

impl SegmentMerger {
    /// Merges path-ordered samples of a trace of total `length`.
    ///
    /// The first valid sample is stretched back to the start of the trace and
    /// the last one forward to its end, so rejected end samples do not shorten
    /// the model. Each descriptor carries the parameters of the sample that
    /// opened its run.
    #[must_use]
    pub fn merge(&self, samples: &[Sample], length: Scalar) -> Vec<SegmentDescriptor> {
        let mut points: Vec<Point> = samples.iter().map(Point::from).collect();
        let Some(first) = points.first_mut() else {
            return Vec::new();
        };
        first.position = 0.0;
        if let Some(&last) = points.last() {
            if last.position < length {
                points.push(Point {
                    position: length,
                    ..last
                });
            }
        }
        self.merge_points(&points)
    }

    /// Runs the merge again on already-merged descriptors, each treated as a
    /// single-sample run. Reproduces its input.
    #[must_use]
    pub fn remerge(&self, segments: &[SegmentDescriptor]) -> Vec<SegmentDescriptor> {
        let mut points: Vec<Point> = segments.iter().map(Point::from).collect();
        if let Some(last) = segments.last() {
            points.push(Point {
                position: last.end,
                ..Point::from(last)
            });
        }
        self.merge_points(&points)
    }

    fn merge_points(&self, points: &[Point]) -> Vec<SegmentDescriptor> {
        let mut out = Vec::new();
        let Some(&first) = points.first() else {
            return out;
        };
        let mut begin = first;
        for (i, end) in points.iter().enumerate().skip(1) {
            let last = i + 1 == points.len();
            if (end.z0 - begin.z0).abs() <= self.z0_threshold && !last {
                continue;
            }
            let pin = out.len() + 1;
            out.push(self.descriptor(pin, &begin, end.position));
            begin = *end;
        }
        out
    }

    fn descriptor(&self, pin: usize, begin: &Point, end: Scalar) -> SegmentDescriptor {
        let dist = end - begin.position;
        let delay = dist / begin.velocity;
        let lossless = self.force_lossless || delay < self.td_threshold;
        let rlgc = if lossless {
            begin.rlgc.without_resistance()
        } else {
            begin.rlgc
        };
        SegmentDescriptor {
            start_pin: pin,
            end_pin: pin + 1,
            start: begin.position,
            end,
            z0: begin.z0,
            velocity: begin.velocity,
            delay,
            rlgc,
            lossless,
            model: self.model,
        }
    }
}
