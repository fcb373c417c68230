//! Refinement of an existing calibration
//!
//! Re-measures reference points starting from where the active transform
//! predicts them, with a tighter search, and refits from scratch.

use printer_hardware::ProbeHardware;
use tracing::info;

use crate::calibrator::{BedCalibrator, PointTarget};
use crate::error::CalibrationError;
use crate::locator::XySearch;
use crate::outcome::CalibrationOutcome;
use crate::reference_points::{CENTER, CORNER_POINTS, REFERENCE_POINT_COUNT};
use crate::report::PointReporter;
use crate::storage::TransformStore;

/// Which reference points the improvement pass re-measures
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImproveMethod {
    /// All nine points
    AllPoints,
    /// The four corners
    Corners,
    /// The four corners and the center
    CornersAndCenter,
}

impl ImproveMethod {
    pub fn point_indices(self) -> Vec<usize> {
        match self {
            ImproveMethod::AllPoints => (0..REFERENCE_POINT_COUNT).collect(),
            ImproveMethod::Corners => CORNER_POINTS.to_vec(),
            ImproveMethod::CornersAndCenter => {
                let mut indices = CORNER_POINTS.to_vec();
                indices.push(CENTER);
                indices.sort_unstable();
                indices
            }
        }
    }
}

impl TryFrom<i8> for ImproveMethod {
    type Error = CalibrationError;

    fn try_from(method: i8) -> Result<Self, Self::Error> {
        match method {
            0 => Ok(ImproveMethod::AllPoints),
            1 => Ok(ImproveMethod::Corners),
            2 => Ok(ImproveMethod::CornersAndCenter),
            other => Err(CalibrationError::InvalidMethod(other)),
        }
    }
}

impl From<ImproveMethod> for i8 {
    fn from(method: ImproveMethod) -> Self {
        match method {
            ImproveMethod::AllPoints => 0,
            ImproveMethod::Corners => 1,
            ImproveMethod::CornersAndCenter => 2,
        }
    }
}

impl<H, S, R> BedCalibrator<H, S, R>
where
    H: ProbeHardware,
    S: TransformStore,
    R: PointReporter,
{
    /// Refine the active calibration using the legacy method code
    ///
    /// Unknown codes fail without moving the printer.
    pub fn improve_bed_offset_and_skew(
        &mut self,
        method: i8,
        verbosity_level: i8,
    ) -> CalibrationOutcome {
        match ImproveMethod::try_from(method) {
            Ok(method) => self.improve_with(method, verbosity_level),
            Err(e) => self.conclude("improve_bed_offset_and_skew", Err(e)),
        }
    }

    /// Refine the active calibration
    ///
    /// Points are searched where the current transform places them. The new
    /// fit replaces the old one outright; on failure the old one is kept.
    /// The largest coefficient change is available from
    /// [`Self::last_correction_delta`].
    pub fn improve_with(&mut self, method: ImproveMethod, verbosity_level: i8) -> CalibrationOutcome {
        info!("Improving bed offset and skew ({:?})", method);
        let previous = self.transform.clone();
        let targets: Vec<PointTarget> = method
            .point_indices()
            .into_iter()
            .filter_map(|index| PointTarget::predicted(index, &previous))
            .collect();
        let search = XySearch {
            radius_mm: self.config.solver.improve_search_radius_mm,
            line_spacing_mm: self.config.locator.xy_line_spacing_mm,
            refine_passes: self.config.solver.improve_refine_passes,
        };

        let result = self.calibrate_points(&targets, search, verbosity_level);
        self.last_correction_delta = match &result {
            Ok(_) => {
                let delta = self.transform.max_difference(&previous);
                info!("Correction changed by at most {:.6}", delta);
                Some(delta)
            }
            Err(_) => None,
        };
        self.conclude("improve_bed_offset_and_skew", result)
    }
}
