//! Sample placement along a trace and frequency sweeps for line reports.

use crate::circuits::transmission::TransmissionLine;
use crate::constants::angular_frequency;
use crate::math::{CScalar, Scalar};

/// Offsets at which a path of `length` is sampled.
///
/// Positions are multiples of `step` below `length`, and the last one is
/// always `length` itself. When the gap before the end is shorter than half a
/// step, the last regular position is moved onto the end instead of adding a
/// short extra sample.
#[must_use]
pub fn sample_positions(length: Scalar, step: Scalar) -> Vec<Scalar> {
    if !(step > 0.0) || !(length > 0.0) {
        return vec![0.0, length.max(0.0)];
    }
    let mut out: Vec<Scalar> = (0..)
        .map(|k| k as Scalar * step)
        .take_while(|&p| p < length)
        .collect();
    let regular = out.len();
    match out.last_mut() {
        Some(last) if regular > 1 && length - *last < 0.5 * step => *last = length,
        _ => out.push(length),
    }
    out
}

/// Generates `n` linearly spaced samples in [start, stop].
#[must_use]
pub fn linspace(start: Scalar, stop: Scalar, n: usize) -> Vec<Scalar> {
    match n {
        0 => Vec::new(),
        1 => vec![start],
        _ => {
            let step = (stop - start) / (n as Scalar - 1.0);
            (0..n).map(|i| start + step * i as Scalar).collect()
        }
    }
}

/// `n` logarithmically spaced frequencies between `start_hz` and `stop_hz`.
///
/// Empty when either bound is not positive.
#[must_use]
pub fn logspace_hz(start_hz: Scalar, stop_hz: Scalar, n: usize) -> Vec<Scalar> {
    if !(start_hz > 0.0 && stop_hz > 0.0) {
        return Vec::new();
    }
    linspace(start_hz.log10(), stop_hz.log10(), n)
        .into_iter()
        .map(|e| 10f64.powf(e))
        .collect()
}

/// One point of a frequency report.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ImpedancePoint {
    /// Frequency in Hz.
    pub frequency: Scalar,
    /// Characteristic impedance of the line.
    pub z0: CScalar,
    /// Impedance seen at the input with the given load.
    pub z_in: CScalar,
}

/// Evaluates `line` at each frequency in `freqs_hz` with load `z_load`.
#[must_use]
pub fn impedance_report(
    line: &TransmissionLine,
    freqs_hz: &[Scalar],
    z_load: CScalar,
) -> Vec<ImpedancePoint> {
    freqs_hz
        .iter()
        .map(|&f| {
            let w = angular_frequency(f);
            ImpedancePoint {
                frequency: f,
                z0: line.rlgc.characteristic_impedance(w),
                z_in: line.input_impedance(w, z_load),
            }
        })
        .collect()
}
