//! Least-squares planar affine fit
//!
//! Fits `measured = matrix * nominal + shift` over a set of point
//! correspondences. The shift follows from the centroid delta, the matrix
//! from the centered cross-covariance of the two point clouds.

use nalgebra::{Matrix2, Vector2};
use thiserror::Error;

use crate::matrix2::{invert_matrix, SingularMatrixError};

/// Minimum number of correspondences for a full 6-parameter fit
pub const MIN_FIT_POINTS: usize = 3;

/// Error during affine fitting
#[derive(Error, Debug, Clone, PartialEq)]
pub enum AffineFitError {
    /// Nominal and measured slices differ in length
    #[error("point count mismatch: {nominal} nominal vs {measured} measured")]
    LengthMismatch { nominal: usize, measured: usize },

    /// Not enough correspondences to constrain the fit
    #[error("insufficient points: got {got}, need {need}")]
    InsufficientPoints { got: usize, need: usize },

    /// Nominal points are collinear (or coincident)
    #[error("degenerate point layout: {0}")]
    DegenerateLayout(#[from] SingularMatrixError),
}

/// Result of an affine fit
#[derive(Debug, Clone, PartialEq)]
pub struct AffineFit {
    /// Linear part (rotation, skew and scale)
    pub matrix: Matrix2<f64>,
    /// Translation applied after the linear part
    pub shift: Vector2<f64>,
    /// Euclidean residual per correspondence, same order as the input
    pub residuals: Vec<f64>,
}

impl AffineFit {
    /// Apply the fitted map to a point
    pub fn apply(&self, point: &Vector2<f64>) -> Vector2<f64> {
        self.matrix * point + self.shift
    }

    /// Largest per-point residual
    pub fn max_residual(&self) -> f64 {
        self.residuals.iter().copied().fold(0.0, f64::max)
    }

    /// Root-mean-square residual
    pub fn rms_residual(&self) -> f64 {
        if self.residuals.is_empty() {
            return 0.0;
        }
        let sum_sq: f64 = self.residuals.iter().map(|r| r * r).sum();
        (sum_sq / self.residuals.len() as f64).sqrt()
    }
}

fn centroid(points: &[Vector2<f64>]) -> Vector2<f64> {
    let sum = points
        .iter()
        .fold(Vector2::zeros(), |acc: Vector2<f64>, p| acc + p);
    sum / points.len() as f64
}

/// Fit `measured = matrix * nominal + shift` in the least-squares sense
///
/// # Errors
/// * [`AffineFitError::LengthMismatch`] if the slices differ in length
/// * [`AffineFitError::InsufficientPoints`] with fewer than three points
/// * [`AffineFitError::DegenerateLayout`] if the nominal points are collinear
pub fn fit_affine(
    nominal: &[Vector2<f64>],
    measured: &[Vector2<f64>],
) -> Result<AffineFit, AffineFitError> {
    if nominal.len() != measured.len() {
        return Err(AffineFitError::LengthMismatch {
            nominal: nominal.len(),
            measured: measured.len(),
        });
    }
    if nominal.len() < MIN_FIT_POINTS {
        return Err(AffineFitError::InsufficientPoints {
            got: nominal.len(),
            need: MIN_FIT_POINTS,
        });
    }

    let nominal_center = centroid(nominal);
    let measured_center = centroid(measured);

    let mut nominal_cov = Matrix2::zeros();
    let mut cross_cov = Matrix2::zeros();
    for (n, m) in nominal.iter().zip(measured) {
        let dn = n - nominal_center;
        let dm = m - measured_center;
        nominal_cov += dn * dn.transpose();
        cross_cov += dm * dn.transpose();
    }

    let matrix = cross_cov * invert_matrix(&nominal_cov)?;
    let shift = measured_center - matrix * nominal_center;

    let residuals = nominal
        .iter()
        .zip(measured)
        .map(|(n, m)| (matrix * n + shift - m).norm())
        .collect();

    Ok(AffineFit {
        matrix,
        shift,
        residuals,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matrix2::{rotation_matrix, skewed_axes_matrix};
    use approx::assert_relative_eq;

    fn corners() -> Vec<Vector2<f64>> {
        vec![
            Vector2::new(13.0, 6.4),
            Vector2::new(216.0, 6.4),
            Vector2::new(13.0, 202.4),
            Vector2::new(216.0, 202.4),
        ]
    }

    #[test]
    fn test_identity_fit() {
        let points = corners();
        let fit = fit_affine(&points, &points).unwrap();

        assert_relative_eq!(fit.matrix[(0, 0)], 1.0, epsilon = 1e-12);
        assert_relative_eq!(fit.matrix[(0, 1)], 0.0, epsilon = 1e-12);
        assert_relative_eq!(fit.matrix[(1, 0)], 0.0, epsilon = 1e-12);
        assert_relative_eq!(fit.matrix[(1, 1)], 1.0, epsilon = 1e-12);
        assert_relative_eq!(fit.shift.norm(), 0.0, epsilon = 1e-10);
        assert!(fit.max_residual() < 1e-10);
    }

    #[test]
    fn test_recovers_rotation_skew_and_shift() {
        let truth = skewed_axes_matrix(0.004, 0.007);
        let shift = Vector2::new(1.25, -0.75);
        let nominal = corners();
        let measured: Vec<_> = nominal.iter().map(|p| truth * p + shift).collect();

        let fit = fit_affine(&nominal, &measured).unwrap();

        for i in 0..4 {
            assert_relative_eq!(fit.matrix[i], truth[i], epsilon = 1e-10);
        }
        assert_relative_eq!(fit.shift.x, shift.x, epsilon = 1e-9);
        assert_relative_eq!(fit.shift.y, shift.y, epsilon = 1e-9);
        assert!(fit.rms_residual() < 1e-9);
    }

    #[test]
    fn test_three_points_exact() {
        let nominal = vec![
            Vector2::new(0.0, 0.0),
            Vector2::new(10.0, 0.0),
            Vector2::new(0.0, 10.0),
        ];
        let rotation = rotation_matrix(-0.02);
        let measured: Vec<_> = nominal
            .iter()
            .map(|p| rotation * p + Vector2::new(3.0, 4.0))
            .collect();

        let fit = fit_affine(&nominal, &measured).unwrap();
        let mapped = fit.apply(&Vector2::new(5.0, 5.0));
        let expected = rotation * Vector2::new(5.0, 5.0) + Vector2::new(3.0, 4.0);
        assert_relative_eq!(mapped.x, expected.x, epsilon = 1e-10);
        assert_relative_eq!(mapped.y, expected.y, epsilon = 1e-10);
    }

    #[test]
    fn test_perturbed_point_spreads_residual() {
        let nominal = corners();
        let mut measured = nominal.clone();
        measured[0] += Vector2::new(0.0, 1.0);

        let fit = fit_affine(&nominal, &measured).unwrap();

        assert!(fit.max_residual() > 0.1);
        assert!(fit.max_residual() < 1.0);
    }

    #[test]
    fn test_collinear_points_rejected() {
        let nominal = vec![
            Vector2::new(0.0, 0.0),
            Vector2::new(10.0, 0.0),
            Vector2::new(20.0, 0.0),
        ];
        let result = fit_affine(&nominal, &nominal);
        assert!(matches!(result, Err(AffineFitError::DegenerateLayout(_))));
    }

    #[test]
    fn test_insufficient_points() {
        let points = vec![Vector2::new(0.0, 0.0), Vector2::new(1.0, 1.0)];
        assert_eq!(
            fit_affine(&points, &points),
            Err(AffineFitError::InsufficientPoints { got: 2, need: 3 })
        );
    }

    #[test]
    fn test_length_mismatch() {
        let nominal = corners();
        let measured = &nominal[..3];
        assert!(matches!(
            fit_affine(&nominal, measured),
            Err(AffineFitError::LengthMismatch { .. })
        ));
    }
}
