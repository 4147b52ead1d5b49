//! Transmission line primitives and merged segment descriptors.

use crate::math::{CScalar as C, Scalar};

/// Distributed RLGC parameters per unit length.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RLGC {
    /// Series resistance per meter (Ω/m).
    pub r_per_m: Scalar,
    /// Series inductance per meter (H/m).
    pub l_per_m: Scalar,
    /// Shunt conductance per meter (S/m).
    pub g_per_m: Scalar,
    /// Shunt capacitance per meter (F/m).
    pub c_per_m: Scalar,
}

impl RLGC {
    /// Lossless line parameters (R=G=0).
    #[must_use]
    pub fn lossless(l_per_m: Scalar, c_per_m: Scalar) -> Self {
        Self {
            r_per_m: 0.0,
            l_per_m,
            g_per_m: 0.0,
            c_per_m,
        }
    }

    /// Same parameters with the series resistance removed.
    #[must_use]
    pub fn without_resistance(self) -> Self {
        Self {
            r_per_m: 0.0,
            ..self
        }
    }

    /// Lossless characteristic impedance √(L/C).
    #[must_use]
    pub fn z0(&self) -> Scalar {
        (self.l_per_m / self.c_per_m).sqrt()
    }

    /// Lossless phase velocity 1/√(LC).
    #[must_use]
    pub fn velocity(&self) -> Scalar {
        1.0 / (self.l_per_m * self.c_per_m).sqrt()
    }

    /// Complex characteristic impedance at angular frequency `omega`.
    #[must_use]
    pub fn characteristic_impedance(&self, omega: Scalar) -> C {
        let jw = C::new(0.0, omega);
        let series = C::new(self.r_per_m, 0.0) + jw * self.l_per_m;
        let shunt = C::new(self.g_per_m, 0.0) + jw * self.c_per_m;
        if shunt.norm() == 0.0 {
            return C::new(self.z0(), 0.0);
        }
        (series / shunt).sqrt()
    }
}

/// Transmission line descriptor (uniform, per-unit-length parameters).
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TransmissionLine {
    /// Physical length in meters.
    pub length_m: Scalar,
    /// Distributed parameters.
    pub rlgc: RLGC,
}

impl TransmissionLine {
    /// Line of length `length_m` with the given RLGC per-unit parameters.
    #[must_use]
    pub fn new(length_m: Scalar, rlgc: RLGC) -> Self {
        Self { length_m, rlgc }
    }

    /// Lossless line shortcut.
    #[must_use]
    pub fn lossless(length_m: Scalar, l_per_m: Scalar, c_per_m: Scalar) -> Self {
        Self::new(length_m, RLGC::lossless(l_per_m, c_per_m))
    }

    /// One-way propagation delay of the lossless line.
    #[must_use]
    pub fn delay(&self) -> Scalar {
        self.length_m * (self.rlgc.l_per_m * self.rlgc.c_per_m).sqrt()
    }

    /// Input impedance with load `z_load` at angular frequency `omega`.
    #[must_use]
    pub fn input_impedance(&self, omega: Scalar, z_load: C) -> C {
        let jw = C::new(0.0, omega);
        let series = C::new(self.rlgc.r_per_m, 0.0) + jw * self.rlgc.l_per_m;
        let shunt = C::new(self.rlgc.g_per_m, 0.0) + jw * self.rlgc.c_per_m;
        if shunt.norm() == 0.0 {
            return z_load + series * self.length_m;
        }
        let gamma = (series * shunt).sqrt();
        let zc = (series / shunt).sqrt();
        let t = (gamma * self.length_m).tanh();
        (zc * (z_load + zc * t)) / (zc + z_load * t)
    }
}

/// Simulator primitive used for a merged segment.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LineModel {
    /// Lossy `TXL` line (instance carries the length).
    Txl,
    /// Lossy `LTRA` line (model carries the length).
    #[default]
    Ltra,
}

/// One homogeneous piece of a trace, produced by the segment merger.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SegmentDescriptor {
    /// Pin number at the start (1-based).
    pub start_pin: usize,
    /// Pin number at the end.
    pub end_pin: usize,
    /// Distance of the start from the beginning of the trace.
    pub start: Scalar,
    /// Distance of the end from the beginning of the trace.
    pub end: Scalar,
    /// Characteristic impedance (Ω).
    pub z0: Scalar,
    /// Propagation velocity (m/s).
    pub velocity: Scalar,
    /// Propagation delay (s).
    pub delay: Scalar,
    /// Per-unit-length parameters; `r_per_m` is zero for lossless segments.
    pub rlgc: RLGC,
    /// Resistance was dropped.
    pub lossless: bool,
    /// Primitive emitted for this segment.
    pub model: LineModel,
}

impl SegmentDescriptor {
    /// Segment length in meters.
    #[must_use]
    pub fn length(&self) -> Scalar {
        self.end - self.start
    }

    /// Uniform line equivalent for frequency-domain reporting.
    #[must_use]
    pub fn to_line(&self) -> TransmissionLine {
        TransmissionLine::new(self.length(), self.rlgc)
    }
}
