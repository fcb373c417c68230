//! 2x2 matrix utilities using nalgebra
//!
//! Inversion with singularity checks, degeneracy checks on column vectors,
//! and the rotation/skew decomposition used to grade a bed calibration.

use std::f64::consts::{PI, TAU};

use nalgebra::{Matrix2, Vector2};
use thiserror::Error;

/// A bed transform matrix that cannot be inverted
#[derive(Error, Debug, Clone, PartialEq)]
#[error("singular matrix: determinant={determinant:.6e}")]
pub struct SingularMatrixError {
    pub determinant: f64,
}

/// Fitted machine axes too close to parallel (or anti-parallel) to span the bed
#[derive(Error, Debug, Clone, PartialEq)]
#[error("axes {angle_degrees:.2}° apart")]
pub struct DegenerateVectorsError {
    /// Angle between the two axis images, in degrees
    pub angle_degrees: f64,
}

/// Determinants below this magnitude are treated as zero
pub const DETERMINANT_EPSILON: f64 = 1e-10;

/// Inverse of a world-to-machine matrix
///
/// Fails when the determinant is not finite or is within
/// [`DETERMINANT_EPSILON`] of zero, so a collapsed bed axis never yields a
/// machine-to-world map full of huge coefficients.
pub fn invert_matrix(matrix: &Matrix2<f64>) -> Result<Matrix2<f64>, SingularMatrixError> {
    let determinant = matrix.determinant();
    if determinant.is_finite() && determinant.abs() >= DETERMINANT_EPSILON {
        if let Some(inverse) = matrix.try_inverse() {
            return Ok(inverse);
        }
    }
    Err(SingularMatrixError { determinant })
}

/// Unsigned angle between two axis images, in degrees (0 for a zero vector)
pub fn angle_between_vectors(v1: &Vector2<f64>, v2: &Vector2<f64>) -> f64 {
    v1.angle(v2).to_degrees()
}

/// Assemble a matrix from the images of the machine X and Y axes
///
/// The axes must be at least `min_angle_degrees` away from parallel in either
/// direction, otherwise the bed would be squashed onto a line.
pub fn matrix_from_columns_checked(
    x_axis: Vector2<f64>,
    y_axis: Vector2<f64>,
    min_angle_degrees: f64,
) -> Result<Matrix2<f64>, DegenerateVectorsError> {
    let angle_degrees = angle_between_vectors(&x_axis, &y_axis);
    if angle_degrees < min_angle_degrees || angle_degrees > 180.0 - min_angle_degrees {
        return Err(DegenerateVectorsError { angle_degrees });
    }
    Ok(Matrix2::from_columns(&[x_axis, y_axis]))
}

/// Counter-clockwise rotation of the bed by `angle_rad`
pub fn rotation_matrix(angle_rad: f64) -> Matrix2<f64> {
    let (sin, cos) = angle_rad.sin_cos();
    Matrix2::new(cos, -sin, sin, cos)
}

/// Map an angle into (-π, π]
pub fn wrap_angle(angle_rad: f64) -> f64 {
    let wrapped = (angle_rad + PI).rem_euclid(TAU) - PI;
    if wrapped <= -PI {
        wrapped + TAU
    } else {
        wrapped
    }
}

/// Create a matrix whose unit X and Y axes are rotated independently
///
/// The X column is the unit vector at `x_axis_angle_rad` from +X, the Y column
/// the unit vector at `y_axis_angle_rad` from +Y. Equal angles give a pure
/// rotation; the difference between them is the skew between the axes.
pub fn skewed_axes_matrix(x_axis_angle_rad: f64, y_axis_angle_rad: f64) -> Matrix2<f64> {
    Matrix2::new(
        x_axis_angle_rad.cos(),
        -y_axis_angle_rad.sin(),
        x_axis_angle_rad.sin(),
        y_axis_angle_rad.cos(),
    )
}

/// Decompose a matrix into the rotation angles of its two axes
///
/// Inverse of [`skewed_axes_matrix`] for the angle part:
/// returns `(x_axis_angle_rad, y_axis_angle_rad)` where the first is the
/// angle of column 0 from +X and the second the angle of column 1 from +Y,
/// both counter-clockwise.
pub fn axis_angles(matrix: &Matrix2<f64>) -> (f64, f64) {
    let x_axis = matrix[(1, 0)].atan2(matrix[(0, 0)]);
    let y_axis = (-matrix[(0, 1)]).atan2(matrix[(1, 1)]);
    (x_axis, y_axis)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use std::f64::consts::PI;

    #[test]
    fn test_rotation_90_degrees() {
        let matrix = rotation_matrix(PI / 2.0);
        let input = Vector2::new(1.0, 0.0);

        let output = matrix * input;

        assert_relative_eq!(output.x, 0.0, epsilon = 1e-10);
        assert_relative_eq!(output.y, 1.0, epsilon = 1e-10);
    }

    #[test]
    fn test_inversion_roundtrip() {
        let matrix = Matrix2::new(2.0, 1.0, 1.0, 3.0);
        let inverse = invert_matrix(&matrix).unwrap();

        let product = matrix * inverse;

        assert_relative_eq!(product[(0, 0)], 1.0, epsilon = 1e-10);
        assert_relative_eq!(product[(0, 1)], 0.0, epsilon = 1e-10);
        assert_relative_eq!(product[(1, 0)], 0.0, epsilon = 1e-10);
        assert_relative_eq!(product[(1, 1)], 1.0, epsilon = 1e-10);
    }

    #[test]
    fn test_singular_matrix_error() {
        let matrix = Matrix2::new(1.0, 2.0, 2.0, 4.0);

        let err = invert_matrix(&matrix).unwrap_err();
        assert!(err.determinant.abs() < 1e-9);
    }

    #[test]
    fn test_non_finite_matrix_rejected() {
        let matrix = Matrix2::new(f64::NAN, 0.0, 0.0, 1.0);
        assert!(invert_matrix(&matrix).is_err());
    }

    #[test]
    fn test_matrix_from_columns_degenerate() {
        let col1 = Vector2::new(1.0, 0.0);
        let col2 = Vector2::new(1.0, 0.01); // Almost parallel

        let err = matrix_from_columns_checked(col1, col2, 5.0).unwrap_err();
        assert!(err.angle_degrees < 5.0);
    }

    #[test]
    fn test_matrix_from_columns_orthogonal() {
        let matrix =
            matrix_from_columns_checked(Vector2::new(1.0, 0.0), Vector2::new(0.0, 1.0), 5.0)
                .unwrap();

        let output = matrix * Vector2::new(5.0, 3.0);
        assert_relative_eq!(output.x, 5.0, epsilon = 1e-10);
        assert_relative_eq!(output.y, 3.0, epsilon = 1e-10);
    }

    #[test]
    fn test_angle_between_vectors() {
        let angle = angle_between_vectors(&Vector2::new(1.0, 0.0), &Vector2::new(0.0, 1.0));
        assert_relative_eq!(angle, 90.0, epsilon = 0.01);

        let angle = angle_between_vectors(&Vector2::new(1.0, 0.0), &Vector2::new(1.0, 1.0));
        assert_relative_eq!(angle, 45.0, epsilon = 0.01);
    }

    #[test]
    fn test_skewed_axes_equal_angles_is_rotation() {
        let angle = 0.3;
        let skewed = skewed_axes_matrix(angle, angle);
        let rotation = rotation_matrix(angle);

        for i in 0..4 {
            assert_relative_eq!(skewed[i], rotation[i], epsilon = 1e-12);
        }
    }

    #[test]
    fn test_axis_angles_roundtrip() {
        let (a1, a2) = axis_angles(&skewed_axes_matrix(0.002, -0.004));
        assert_relative_eq!(a1, 0.002, epsilon = 1e-12);
        assert_relative_eq!(a2, -0.004, epsilon = 1e-12);
    }

    #[test]
    fn test_axis_angles_ignore_scale() {
        let mut matrix = skewed_axes_matrix(0.01, 0.02);
        let scaled = matrix.column(0) * 1.05;
        matrix.set_column(0, &scaled);
        let (a1, a2) = axis_angles(&matrix);
        assert_relative_eq!(a1, 0.01, epsilon = 1e-12);
        assert_relative_eq!(a2, 0.02, epsilon = 1e-12);
    }

    #[test]
    fn test_anti_parallel_axes_rejected() {
        let err = matrix_from_columns_checked(Vector2::new(1.0, 0.0), Vector2::new(-1.0, 0.01), 5.0)
            .unwrap_err();
        assert!(err.angle_degrees > 175.0);
    }

    #[test]
    fn test_wrap_angle() {
        assert_relative_eq!(wrap_angle(0.25), 0.25, epsilon = 1e-15);
        assert_relative_eq!(wrap_angle(-2.0 * PI + 0.001), 0.001, epsilon = 1e-12);
        assert_relative_eq!(wrap_angle(2.0 * PI - 0.001), -0.001, epsilon = 1e-12);
        assert_relative_eq!(wrap_angle(-PI), PI, epsilon = 1e-15);
        assert_relative_eq!(wrap_angle(PI), PI, epsilon = 1e-15);
    }
}
