//! Reduction of coupled-pair samples into one coupled line.

use log::debug;

use crate::errors::ExtractError;
use crate::impedance::mode_impedances;
use crate::math::{Scalar, M2};
use crate::sampler::CoupledSample;

/// Diagonal resistance written for lossless coupled lines (Ω/m).
///
/// The simulator's coupled-line model does not settle with R = 0.
pub const LOSSLESS_CPL_RESISTANCE: Scalar = 1.0;

/// Length-averaged coupled line between two traces.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, PartialEq)]
pub struct CoupledSegment {
    /// Subcircuit name stem.
    pub name: String,
    /// Coupled length (m).
    pub length: Scalar,
    /// Odd-mode impedance (Ω).
    pub z_odd: Scalar,
    /// Even-mode impedance (Ω).
    pub z_even: Scalar,
    /// Per-line impedance from the diagonal terms.
    pub z0: [Scalar; 2],
    /// Per-line delay from the diagonal terms (s).
    pub td: [Scalar; 2],
    /// Odd-mode delay (s).
    pub td_odd: Scalar,
    /// Even-mode delay (s).
    pub td_even: Scalar,
    /// Capacitance matrix with symmetric mutual terms (F/m).
    pub c: M2,
    /// Inductance matrix with symmetric mutual terms (H/m).
    pub l: M2,
    /// Resistance matrix as written to the netlist (Ω/m).
    pub r: M2,
    /// Conductance matrix (S/m).
    pub g: M2,
    /// Resistance was replaced by [`LOSSLESS_CPL_RESISTANCE`].
    pub lossless: bool,
}

impl CoupledSegment {
    /// Differential impedance, twice the odd mode.
    #[must_use]
    pub fn z_diff(&self) -> Scalar {
        self.z_odd * 2.0
    }

    /// Common-mode impedance, half the even mode.
    #[must_use]
    pub fn z_common(&self) -> Scalar {
        self.z_even * 0.5
    }
}

/// Averages coupled samples along a pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CoupledPairSolver {
    /// Replace the diagonal resistance with a nominal value.
    pub force_lossless: bool,
}

impl CoupledPairSolver {
    /// Solver with the given loss policy.
    #[must_use]
    pub const fn new(force_lossless: bool) -> Self {
        Self { force_lossless }
    }

    /// Reduces path-ordered samples of a pair of coupled `length`.
    ///
    /// Every sample is weighted by the stretch of the pair closer to it than
    /// to its neighbours. Mode impedances are recomputed from the averaged
    /// matrices.
    pub fn reduce(
        &self,
        name: &str,
        samples: &[CoupledSample],
        length: Scalar,
    ) -> Result<CoupledSegment, ExtractError> {
        if samples.is_empty() {
            return Err(ExtractError::NoValidSamples {
                trace: name.to_owned(),
            });
        }
        let weights = span_weights(samples, length);
        let mut c = M2::zeros();
        let mut l = M2::zeros();
        let mut r = M2::zeros();
        let mut g = M2::zeros();
        for (s, w) in samples.iter().zip(&weights) {
            c += s.solution.c * *w;
            l += s.solution.l * *w;
            r += s.solution.r * *w;
            g += s.solution.g * *w;
        }
        let (c, l, r, g) = (symmetrize(&c), symmetrize(&l), symmetrize(&r), symmetrize(&g));

        let (z_odd, z_even) = mode_impedances(&l, &c);
        let mode_delay = |sign: Scalar| {
            let lm = l[(0, 1)] * sign;
            let cm = c[(0, 1)] * sign;
            let a = ((l[(0, 0)] + lm) * (c[(0, 0)] + cm)).sqrt();
            let b = ((l[(1, 1)] + lm) * (c[(1, 1)] + cm)).sqrt();
            length * (a + b) * 0.5
        };
        let td_odd = mode_delay(-1.0);
        let td_even = mode_delay(1.0);
        if ![z_odd, z_even, td_odd, td_even].iter().all(|v| v.is_finite()) {
            return Err(ExtractError::InvalidGeometry(format!(
                "coupled pair {name} has non-physical mode parameters"
            )));
        }

        let z0 = [0, 1].map(|i| (l[(i, i)] / c[(i, i)]).sqrt());
        let td = [0, 1].map(|i| length * (l[(i, i)] * c[(i, i)]).sqrt());

        let r = if self.force_lossless {
            M2::new(LOSSLESS_CPL_RESISTANCE, 0.0, 0.0, LOSSLESS_CPL_RESISTANCE)
        } else {
            r
        };

        debug!(
            "{name}: {} samples, Zodd {z_odd:.3} Zeven {z_even:.3} over {length:.3e} m",
            samples.len()
        );
        Ok(CoupledSegment {
            name: name.to_owned(),
            length,
            z_odd,
            z_even,
            z0,
            td,
            td_odd,
            td_even,
            c,
            l,
            r,
            g,
            lossless: self.force_lossless,
        })
    }
}

fn symmetrize(m: &M2) -> M2 {
    let mutual = (m[(0, 1)] + m[(1, 0)]) * 0.5;
    M2::new(m[(0, 0)], mutual, mutual, m[(1, 1)])
}

/// Fraction of `length` owned by each sample; sums to one.
fn span_weights(samples: &[CoupledSample], length: Scalar) -> Vec<Scalar> {
    let n = samples.len();
    if n == 1 || length <= 0.0 {
        return vec![1.0 / n as Scalar; n];
    }
    (0..n)
        .map(|i| {
            let lo = if i == 0 {
                0.0
            } else {
                (samples[i - 1].position + samples[i].position) * 0.5
            };
            let hi = if i + 1 == n {
                length
            } else {
                (samples[i].position + samples[i + 1].position) * 0.5
            };
            (hi - lo) / length
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use approx::assert_relative_eq;

    use super::*;
    use crate::impedance::CoupledSolution;

    fn coupled(index: usize, position: Scalar, c_self: Scalar, c_mut: Scalar) -> CoupledSample {
        let c = M2::new(c_self, c_mut, c_mut, c_self);
        let l = M2::new(300e-9, 60e-9, 60e-9, 300e-9);
        let (z_odd, z_even) = mode_impedances(&l, &c);
        CoupledSample {
            index,
            position,
            solution: CoupledSolution {
                z_odd,
                z_even,
                c,
                l,
                r: M2::new(2.0, 0.0, 0.0, 2.0),
                g: M2::zeros(),
                cache_hit: false,
            },
        }
    }

    #[test]
    fn uniform_pair_keeps_sample_values() {
        let samples: Vec<_> = (0..5)
            .map(|i| coupled(i, i as Scalar * 1e-3, 120e-12, -20e-12))
            .collect();
        let seg = CoupledPairSolver::new(false).reduce("P", &samples, 4e-3).unwrap();
        assert_relative_eq!(seg.z_odd, samples[0].solution.z_odd, max_relative = 1e-12);
        assert_relative_eq!(seg.z_even, samples[0].solution.z_even, max_relative = 1e-12);
        assert!(seg.z_even > seg.z_odd);
        assert_relative_eq!(seg.z_diff(), 2.0 * seg.z_odd);
        assert_relative_eq!(seg.z0[0], (300e-9_f64 / 120e-12).sqrt(), max_relative = 1e-12);
        assert_relative_eq!(seg.td[0], seg.td[1], max_relative = 1e-12);
        assert!(seg.td_even > seg.td_odd);
        assert_relative_eq!(seg.r[(0, 0)], 2.0, max_relative = 1e-12);
    }

    #[test]
    fn samples_are_weighted_by_the_span_they_cover() {
        // two samples at the ends of a 4 mm pair, one dense cluster near the start
        let samples = vec![
            coupled(0, 0.0, 100e-12, -10e-12),
            coupled(1, 0.5e-3, 100e-12, -10e-12),
            coupled(2, 4e-3, 140e-12, -10e-12),
        ];
        let w = span_weights(&samples, 4e-3);
        assert_relative_eq!(w.iter().sum::<Scalar>(), 1.0, max_relative = 1e-12);
        assert_relative_eq!(w[2], 1.75e-3 / 4e-3, max_relative = 1e-12);
        let seg = CoupledPairSolver::default().reduce("P", &samples, 4e-3).unwrap();
        let expected = 100e-12 * (w[0] + w[1]) + 140e-12 * w[2];
        assert_relative_eq!(seg.c[(0, 0)], expected, max_relative = 1e-12);
    }

    #[test]
    fn lossless_pair_gets_nominal_resistance() {
        let samples = vec![coupled(0, 0.0, 120e-12, -20e-12), coupled(1, 1e-3, 120e-12, -20e-12)];
        let seg = CoupledPairSolver::new(true).reduce("P", &samples, 1e-3).unwrap();
        assert!(seg.lossless);
        assert_relative_eq!(seg.r[(0, 0)], LOSSLESS_CPL_RESISTANCE);
        assert_relative_eq!(seg.r[(0, 1)], 0.0);
    }

    #[test]
    fn asymmetric_mutuals_are_averaged() {
        let mut sample = coupled(0, 0.0, 120e-12, -20e-12);
        sample.solution.c[(1, 0)] = -22e-12;
        let seg = CoupledPairSolver::default().reduce("P", &[sample], 1e-3).unwrap();
        assert_relative_eq!(seg.c[(0, 1)], -21e-12, max_relative = 1e-12);
        assert_relative_eq!(seg.c[(1, 0)], seg.c[(0, 1)]);
    }

    #[test]
    fn empty_pair_is_reported() {
        let err = CoupledPairSolver::default().reduce("P", &[], 1e-3).unwrap_err();
        assert!(matches!(err, ExtractError::NoValidSamples { .. }));
    }
}
