use bed_math::{AffineFitError, DegenerateVectorsError, SingularMatrixError};
use printer_hardware::HardwareError;
use thiserror::Error;

use crate::locator::LocatorError;

/// Reason a calibration run did not commit
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CalibrationError {
    #[error("reference point {index} not found: {source}")]
    PointNotFound {
        index: usize,
        #[source]
        source: LocatorError,
    },

    #[error("affine fit failed: {0}")]
    Fit(#[from] AffineFitError),

    #[error("fitted axes are degenerate: {0}")]
    DegenerateAxes(#[from] DegenerateVectorsError),

    #[error("fitted transform is singular: {0}")]
    Singular(#[from] SingularMatrixError),

    #[error("point {index} residual {residual_mm:.4} mm exceeds {limit_mm:.4} mm")]
    ResidualTooLarge {
        index: usize,
        residual_mm: f64,
        limit_mm: f64,
    },

    #[error("hardware error: {0}")]
    Hardware(#[from] HardwareError),

    #[error("unknown improvement method {0}")]
    InvalidMethod(i8),
}

impl CalibrationError {
    /// Whether the run was unwound by a global abort
    pub fn is_abort(&self) -> bool {
        match self {
            CalibrationError::PointNotFound { source, .. } => source.is_abort(),
            CalibrationError::Hardware(e) => e.is_abort(),
            _ => false,
        }
    }

    /// Whether the run commanded any motion before failing
    pub fn moved_axes(&self) -> bool {
        !matches!(self, CalibrationError::InvalidMethod(_))
    }
}
