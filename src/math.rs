//! Shared numerical primitives anchored on `nalgebra`.

use nalgebra::{Matrix2, SMatrix, Vector2};

/// Primary scalar type used across the crate.
pub type Scalar = f64;
/// Convenient alias for two-dimensional real vectors (board plane coordinates).
pub type R2 = Vector2<Scalar>;
/// Convenient alias for two-by-two real matrices (coupled-line parameters).
pub type M2 = Matrix2<Scalar>;
/// Primary complex scalar type used for phasors.
pub type CScalar = num_complex::Complex<Scalar>;

/// Inverts a square matrix with Gauss-Jordan elimination and partial pivoting.
///
/// Returns `None` when some column has no non-zero pivot left in the rows
/// below the diagonal.
#[must_use]
pub fn invert_gauss_jordan<const N: usize>(
    matrix: &SMatrix<Scalar, N, N>,
) -> Option<SMatrix<Scalar, N, N>> {
    let mut a = *matrix;
    let mut inv = SMatrix::<Scalar, N, N>::identity();

    for col in 0..N {
        let pivot = (col..N).max_by(|&i, &j| a[(i, col)].abs().total_cmp(&a[(j, col)].abs()))?;
        if a[(pivot, col)] == 0.0 || !a[(pivot, col)].is_finite() {
            return None;
        }
        if pivot != col {
            a.swap_rows(pivot, col);
            inv.swap_rows(pivot, col);
        }

        let scale = 1.0 / a[(col, col)];
        for k in 0..N {
            a[(col, k)] *= scale;
            inv[(col, k)] *= scale;
        }

        for row in 0..N {
            if row == col {
                continue;
            }
            let factor = a[(row, col)];
            if factor == 0.0 {
                continue;
            }
            for k in 0..N {
                a[(row, k)] -= factor * a[(col, k)];
                inv[(row, k)] -= factor * inv[(col, k)];
            }
        }
    }
    Some(inv)
}

/// Left-hand normal of a direction vector in the board plane.
#[must_use]
pub fn left_normal(direction: &R2) -> R2 {
    R2::new(-direction.y, direction.x)
}

/// Scalar z-component of the planar cross product `a × b`.
#[must_use]
pub fn cross2(a: &R2, b: &R2) -> Scalar {
    a.x * b.y - a.y * b.x
}

#[cfg(test)]
mod tests {
    use approx::assert_relative_eq;
    use nalgebra::Matrix3;

    use super::*;

    #[test]
    fn inverse_of_capacitance_like_matrix() {
        let c = M2::new(80e-12, -12e-12, -12e-12, 80e-12);
        let inv = invert_gauss_jordan(&c).unwrap();
        let id = c * inv;
        assert_relative_eq!(id, M2::identity(), epsilon = 1.0e-9);
    }

    #[test]
    fn pivoting_handles_zero_leading_entry() {
        let m = Matrix3::new(0.0, 2.0, 1.0, 1.0, 0.0, 0.0, 3.0, 1.0, 4.0);
        let inv = invert_gauss_jordan(&m).unwrap();
        assert_relative_eq!(m * inv, Matrix3::identity(), epsilon = 1.0e-12);
    }

    #[test]
    fn singular_matrix_has_no_inverse() {
        let m = M2::new(1.0, 2.0, 2.0, 4.0);
        assert!(invert_gauss_jordan(&m).is_none());
        assert!(invert_gauss_jordan(&M2::zeros()).is_none());
    }

    #[test]
    fn left_normal_is_counter_clockwise() {
        let n = left_normal(&R2::new(1.0, 0.0));
        assert_relative_eq!(n, R2::new(0.0, 1.0));
        assert!(cross2(&R2::new(1.0, 0.0), &n) > 0.0);
    }
}
