//! Physical constants and extraction defaults.
//!
//! ## Accuracy
//!
//! ε₀ and μ₀ are CODATA 2018 values with 11-12 significant figures, which is
//! far below the discretization error of the raster field solver.
//!
//! ## References
//!
//! - NIST Reference on Constants, Units, and Uncertainty: <https://physics.nist.gov/cuu/Constants/>

use std::f64::consts::PI;

/// Vacuum permittivity ε₀ in farads per meter (F/m).
pub const VACUUM_PERMITTIVITY: f64 = 8.854_187_812_8e-12;
/// Vacuum permeability μ₀ in henries per meter (H/m).
pub const VACUUM_PERMEABILITY: f64 = 1.256_637_062_12e-6;
/// Speed of light in vacuum _c_ in meters per second (m/s).
/// Exact value by SI definition (2019): 299,792,458 m/s.
pub const SPEED_OF_LIGHT: f64 = 299_792_458.0;
/// Characteristic impedance of free space Z₀ in ohms (Ω).
pub const FREE_SPACE_IMPEDANCE: f64 = 376.730_313_668;

/// Conductivity of annealed copper in siemens per meter (S/m).
pub const COPPER_CONDUCTIVITY: f64 = 5.8e7;
/// One mil (thousandth of an inch) in meters.
pub const MIL: f64 = 25.4e-6;
/// Length of mismatching raster area tolerated by the cross-section cache.
pub const CACHE_TOLERANCE_LENGTH: f64 = 4.0 * MIL;

/// Returns the angular frequency corresponding to a linear frequency `hz`.
#[inline]
#[must_use]
pub fn angular_frequency(hz: f64) -> f64 {
    2.0 * PI * hz
}

/// Returns the phase velocity in a homogeneous medium of relative permittivity `epsilon_r`.
#[inline]
#[must_use]
pub fn velocity_in_medium(epsilon_r: f64) -> f64 {
    SPEED_OF_LIGHT / epsilon_r.sqrt()
}

#[cfg(test)]
mod tests {
    use approx::assert_relative_eq;

    use super::*;

    #[test]
    fn vacuum_constants_are_consistent() {
        let c = 1.0 / (VACUUM_PERMITTIVITY * VACUUM_PERMEABILITY).sqrt();
        assert_relative_eq!(c, SPEED_OF_LIGHT, max_relative = 1.0e-9);
        let z = (VACUUM_PERMEABILITY / VACUUM_PERMITTIVITY).sqrt();
        assert_relative_eq!(z, FREE_SPACE_IMPEDANCE, max_relative = 1.0e-9);
    }

    #[test]
    fn fr4_slows_propagation() {
        assert_relative_eq!(velocity_in_medium(4.0), SPEED_OF_LIGHT / 2.0);
    }
}
