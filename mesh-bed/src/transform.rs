//! World/machine coordinate transform
//!
//! The planner works in world (bed) coordinates; the axes move in machine
//! coordinates. The forward map applies the rotation/skew matrix first and
//! then the shift:
//!
//! ```text
//! machine = M * world + shift
//! world   = M⁻¹ * (machine - shift)
//! ```
//!
//! Each half is enabled by a [`CorrectionMode`] bit. With no bits set both
//! directions are exact identity copies.

use std::fmt;

use bed_math::{invert_matrix, SingularMatrixError};
use bitflags::bitflags;
use nalgebra::{Matrix2, Vector2};
use printer_hardware::TravelLimits;

bitflags! {
    /// Which parts of the world-to-machine correction are active
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct CorrectionMode: u8 {
        /// Apply the XY shift
        const SHIFT = 1;
        /// Apply the rotation/skew matrix
        const SKEW = 2;
    }
}

impl CorrectionMode {
    /// No correction; world and machine coordinates coincide
    pub const NONE: Self = Self::empty();
}

impl fmt::Display for CorrectionMode {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match (self.contains(Self::SKEW), self.contains(Self::SHIFT)) {
            (false, false) => write!(f, "none"),
            (false, true) => write!(f, "shift"),
            (true, false) => write!(f, "skew"),
            (true, true) => write!(f, "skew+shift"),
        }
    }
}

/// Active world-to-machine correction
///
/// The matrix and its inverse are only ever set together, so a state can
/// never hold a stale or singular inverse.
#[derive(Debug, Clone, PartialEq)]
pub struct TransformState {
    mode: CorrectionMode,
    rotation_and_skew: Matrix2<f64>,
    rotation_and_skew_inv: Matrix2<f64>,
    shift: Vector2<f64>,
}

impl Default for TransformState {
    fn default() -> Self {
        Self::identity()
    }
}

impl TransformState {
    /// Uncorrected state: mode NONE, identity matrix, zero shift
    pub fn identity() -> Self {
        Self {
            mode: CorrectionMode::NONE,
            rotation_and_skew: Matrix2::identity(),
            rotation_and_skew_inv: Matrix2::identity(),
            shift: Vector2::zeros(),
        }
    }

    /// Build a state from its parts, deriving the inverse matrix
    ///
    /// The matrix must be invertible even when `SKEW` is not enabled.
    pub fn new(
        mode: CorrectionMode,
        rotation_and_skew: Matrix2<f64>,
        shift: Vector2<f64>,
    ) -> Result<Self, SingularMatrixError> {
        let rotation_and_skew_inv = invert_matrix(&rotation_and_skew)?;
        Ok(Self {
            mode,
            rotation_and_skew,
            rotation_and_skew_inv,
            shift,
        })
    }

    /// Full correction with both the matrix and the shift enabled
    pub fn skew_and_shift(
        rotation_and_skew: Matrix2<f64>,
        shift: Vector2<f64>,
    ) -> Result<Self, SingularMatrixError> {
        Self::new(
            CorrectionMode::SKEW | CorrectionMode::SHIFT,
            rotation_and_skew,
            shift,
        )
    }

    /// Shift-only correction
    pub fn shift_only(shift: Vector2<f64>) -> Self {
        Self {
            mode: CorrectionMode::SHIFT,
            shift,
            ..Self::identity()
        }
    }

    pub fn mode(&self) -> CorrectionMode {
        self.mode
    }

    pub fn rotation_and_skew(&self) -> &Matrix2<f64> {
        &self.rotation_and_skew
    }

    pub fn rotation_and_skew_inv(&self) -> &Matrix2<f64> {
        &self.rotation_and_skew_inv
    }

    pub fn shift(&self) -> &Vector2<f64> {
        &self.shift
    }

    /// Matrix actually applied by the forward map
    pub fn effective_matrix(&self) -> Matrix2<f64> {
        if self.mode.contains(CorrectionMode::SKEW) {
            self.rotation_and_skew
        } else {
            Matrix2::identity()
        }
    }

    /// Shift actually applied by the forward map
    pub fn effective_shift(&self) -> Vector2<f64> {
        if self.mode.contains(CorrectionMode::SHIFT) {
            self.shift
        } else {
            Vector2::zeros()
        }
    }

    /// Map a world point to machine coordinates
    pub fn world2machine(&self, x: f64, y: f64) -> (f64, f64) {
        if self.mode.is_empty() {
            return (x, y);
        }
        let (mut out_x, mut out_y) = (x, y);
        if self.mode.contains(CorrectionMode::SKEW) {
            let m = &self.rotation_and_skew;
            out_x = m[(0, 0)] * x + m[(0, 1)] * y;
            out_y = m[(1, 0)] * x + m[(1, 1)] * y;
        }
        if self.mode.contains(CorrectionMode::SHIFT) {
            out_x += self.shift.x;
            out_y += self.shift.y;
        }
        (out_x, out_y)
    }

    pub fn world2machine_in_place(&self, x: &mut f64, y: &mut f64) {
        (*x, *y) = self.world2machine(*x, *y);
    }

    /// Map a machine point back to world coordinates
    pub fn machine2world(&self, x: f64, y: f64) -> (f64, f64) {
        if self.mode.is_empty() {
            return (x, y);
        }
        let (mut in_x, mut in_y) = (x, y);
        if self.mode.contains(CorrectionMode::SHIFT) {
            in_x -= self.shift.x;
            in_y -= self.shift.y;
        }
        if self.mode.contains(CorrectionMode::SKEW) {
            let m = &self.rotation_and_skew_inv;
            let (sx, sy) = (in_x, in_y);
            in_x = m[(0, 0)] * sx + m[(0, 1)] * sy;
            in_y = m[(1, 0)] * sx + m[(1, 1)] * sy;
        }
        (in_x, in_y)
    }

    pub fn machine2world_in_place(&self, x: &mut f64, y: &mut f64) {
        (*x, *y) = self.machine2world(*x, *y);
    }

    /// Clamp a world point so that its machine image lies within `limits`
    ///
    /// When clamping happens the point is rewritten to the world image of
    /// the clamped machine position and `true` is returned. Otherwise the
    /// point is left untouched.
    pub fn world2machine_clamp(&self, x: &mut f64, y: &mut f64, limits: &TravelLimits) -> bool {
        let (machine_x, machine_y) = self.world2machine(*x, *y);
        let (clamped_x, clamped_y, clamped) = limits.clamp(machine_x, machine_y);
        if clamped {
            (*x, *y) = self.machine2world(clamped_x, clamped_y);
        }
        clamped
    }

    /// Largest absolute difference between the effective coefficients of
    /// two states (matrix entries and shift components)
    pub fn max_difference(&self, other: &TransformState) -> f64 {
        let matrix_delta = (self.effective_matrix() - other.effective_matrix()).amax();
        let shift_delta = (self.effective_shift() - other.effective_shift()).amax();
        matrix_delta.max(shift_delta)
    }
}

impl fmt::Display for TransformState {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let m = &self.rotation_and_skew;
        write!(
            f,
            "mode={} matrix=[[{:.6}, {:.6}], [{:.6}, {:.6}]] shift=({:.4}, {:.4})",
            self.mode,
            m[(0, 0)],
            m[(0, 1)],
            m[(1, 0)],
            m[(1, 1)],
            self.shift.x,
            self.shift.y
        )
    }
}
