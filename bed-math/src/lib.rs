//! bed-math - Planar geometry for printer bed calibration
//!
//! This crate provides the small amount of linear algebra the bed
//! calibration engine needs:
//!
//! - **Matrix** - 2x2 inversion with singularity checks, column-angle checks,
//!   rotation/shear constructors and axis-angle decomposition
//! - **Affine fit** - least-squares fit of `measured = R * nominal + shift`
//!
//! # Example
//!
//! ```
//! use bed_math::{fit_affine, rotation_matrix};
//! use nalgebra::Vector2;
//!
//! let nominal = [
//!     Vector2::new(0.0, 0.0),
//!     Vector2::new(100.0, 0.0),
//!     Vector2::new(0.0, 100.0),
//! ];
//! let rotation = rotation_matrix(0.01);
//! let measured: Vec<_> = nominal
//!     .iter()
//!     .map(|p| rotation * p + Vector2::new(1.0, -2.0))
//!     .collect();
//!
//! let fit = fit_affine(&nominal, &measured).unwrap();
//! assert!((fit.shift.x - 1.0).abs() < 1e-9);
//! ```

pub mod affine;
pub mod matrix2;

pub use affine::{fit_affine, AffineFit, AffineFitError};
pub use matrix2::{
    angle_between_vectors, axis_angles, invert_matrix, matrix_from_columns_checked,
    rotation_matrix, skewed_axes_matrix, wrap_angle, DegenerateVectorsError, SingularMatrixError,
    DETERMINANT_EPSILON,
};
