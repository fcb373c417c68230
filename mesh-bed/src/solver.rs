//! Bed offset and skew solver
//!
//! Fits an affine world-to-machine map to located reference points, rejects
//! geometrically implausible fits, and grades the skew between the axes.

use bed_math::{
    axis_angles, fit_affine, matrix_from_columns_checked, wrap_angle, AffineFit, AffineFitError,
};
use nalgebra::Matrix2;
use printer_hardware::ProbeHardware;
use tracing::{debug, info};

use crate::calibrator::{BedCalibrator, PointMeasurement, PointTarget};
use crate::config::SolverConfig;
use crate::error::CalibrationError;
use crate::locator::XySearch;
use crate::outcome::{Advisories, CalibrationOutcome, SkewGrade};
use crate::reference_points::{CORNER_POINTS, FRONT_LEFT, FRONT_RIGHT};
use crate::report::{PointReport, PointReporter};
use crate::storage::TransformStore;
use crate::transform::TransformState;

/// Axis orientation and scale derived from a fitted matrix
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SkewAnalysis {
    /// Angle of the machine X axis image from +X
    pub x_axis_angle_rad: f64,
    /// Angle of the machine Y axis image from +Y
    pub y_axis_angle_rad: f64,
    /// Absolute angle between the two axis rotations, at most π
    pub skew_angle_rad: f64,
    /// Largest relative deviation of an axis length from 1
    pub scale_error: f64,
}

impl SkewAnalysis {
    pub fn from_matrix(matrix: &Matrix2<f64>) -> Self {
        let (x_axis_angle_rad, y_axis_angle_rad) = axis_angles(matrix);
        let scale_error = (matrix.column(0).norm() - 1.0)
            .abs()
            .max((matrix.column(1).norm() - 1.0).abs());
        Self {
            x_axis_angle_rad,
            y_axis_angle_rad,
            skew_angle_rad: wrap_angle(y_axis_angle_rad - x_axis_angle_rad).abs(),
            scale_error,
        }
    }

    pub fn skew_angle_deg(&self) -> f64 {
        self.skew_angle_rad.to_degrees()
    }

    /// Grade by the worse of the skew angle and the scale error
    pub fn grade(&self, config: &SolverConfig) -> SkewGrade {
        let skew_deg = self.skew_angle_deg();
        if skew_deg <= config.mild_skew_deg && self.scale_error <= config.mild_scale_error {
            SkewGrade::Perfect
        } else if skew_deg <= config.extreme_skew_deg
            && self.scale_error <= config.extreme_scale_error
        {
            SkewGrade::MildSkew
        } else {
            SkewGrade::ExtremeSkew
        }
    }
}

/// A fit that passed validation, ready to commit
#[derive(Debug, Clone, PartialEq)]
pub struct SolvedCalibration {
    pub state: TransformState,
    pub fit: AffineFit,
    pub analysis: SkewAnalysis,
    pub grade: SkewGrade,
    pub advisories: Advisories,
}

impl SolvedCalibration {
    pub fn outcome(&self) -> CalibrationOutcome {
        CalibrationOutcome::committed(self.grade, self.advisories)
    }
}

/// Least-squares fit of `measured = M * nominal + shift`
pub fn fit_measurements(measurements: &[PointMeasurement]) -> Result<AffineFit, AffineFitError> {
    let nominal: Vec<_> = measurements.iter().map(|m| m.nominal).collect();
    let measured: Vec<_> = measurements.iter().map(|m| m.measured).collect();
    fit_affine(&nominal, &measured)
}

/// FAR advisories for front corners that sit far from their nominal place
pub fn front_advisories(measurements: &[PointMeasurement], threshold_mm: f64) -> Advisories {
    let mut advisories = Advisories::empty();
    for measurement in measurements {
        let deviation = (measurement.measured - measurement.nominal).norm();
        if deviation <= threshold_mm {
            continue;
        }
        match measurement.index {
            FRONT_LEFT => advisories |= Advisories::FRONT_LEFT_FAR,
            FRONT_RIGHT => advisories |= Advisories::FRONT_RIGHT_FAR,
            _ => {}
        }
    }
    advisories
}

/// Validate a fit and turn it into a committable transform
///
/// # Errors
/// * [`CalibrationError::DegenerateAxes`] if the fitted axes are nearly parallel
/// * [`CalibrationError::ResidualTooLarge`] if a point disagrees with the fit
/// * [`CalibrationError::Singular`] if the matrix cannot be inverted
pub fn validate_fit(
    fit: AffineFit,
    measurements: &[PointMeasurement],
    config: &SolverConfig,
) -> Result<SolvedCalibration, CalibrationError> {
    matrix_from_columns_checked(
        fit.matrix.column(0).into_owned(),
        fit.matrix.column(1).into_owned(),
        config.min_axis_angle_deg,
    )?;

    for (measurement, &residual_mm) in measurements.iter().zip(&fit.residuals) {
        if residual_mm > config.max_residual_mm {
            return Err(CalibrationError::ResidualTooLarge {
                index: measurement.index,
                residual_mm,
                limit_mm: config.max_residual_mm,
            });
        }
    }

    let state = TransformState::skew_and_shift(fit.matrix, fit.shift)?;
    let analysis = SkewAnalysis::from_matrix(&fit.matrix);
    let grade = analysis.grade(config);
    let advisories = front_advisories(measurements, config.front_far_threshold_mm);

    Ok(SolvedCalibration {
        state,
        fit,
        analysis,
        grade,
        advisories,
    })
}

/// Fit and validate in one step
pub fn solve_bed_offset_and_skew(
    measurements: &[PointMeasurement],
    config: &SolverConfig,
) -> Result<SolvedCalibration, CalibrationError> {
    let fit = fit_measurements(measurements)?;
    validate_fit(fit, measurements, config)
}

impl<H, S, R> BedCalibrator<H, S, R>
where
    H: ProbeHardware,
    S: TransformStore,
    R: PointReporter,
{
    /// First-time calibration from the four bed corners
    ///
    /// Each corner is searched at its nominal position. On success the new
    /// transform is committed and persisted; on failure the previous state is
    /// kept and the cause is available from [`Self::last_failure`].
    ///
    /// `verbosity_level > 0` reports each measured point, `>= 10` also the fit
    /// residuals. Verbosity never changes the result.
    pub fn find_bed_offset_and_skew(&mut self, verbosity_level: i8) -> CalibrationOutcome {
        info!("Finding bed offset and skew");
        let targets: Vec<PointTarget> = CORNER_POINTS
            .iter()
            .filter_map(|&index| PointTarget::at_nominal(index))
            .collect();
        let search = XySearch::from_config(&self.config.locator);

        let result = self.calibrate_points(&targets, search, verbosity_level);
        self.conclude("find_bed_offset_and_skew", result)
    }

    /// Measure, solve and commit
    pub(crate) fn calibrate_points(
        &mut self,
        targets: &[PointTarget],
        search: XySearch,
        verbosity_level: i8,
    ) -> Result<CalibrationOutcome, CalibrationError> {
        let measurements = self.measure_points(targets, search, verbosity_level)?;

        let fit = fit_measurements(&measurements)?;
        debug!(
            "fit residuals: max {:.4} mm, rms {:.4} mm",
            fit.max_residual(),
            fit.rms_residual()
        );
        if verbosity_level >= 10 {
            for (measurement, &residual_mm) in measurements.iter().zip(&fit.residuals) {
                self.reporter.report(PointReport::Residual {
                    index: measurement.index,
                    residual_mm,
                });
            }
        }

        let solved = validate_fit(fit, &measurements, &self.config.solver)?;
        info!(
            "Bed skew {:.4} deg, scale error {:.5}, shift ({:.4}, {:.4})",
            solved.analysis.skew_angle_deg(),
            solved.analysis.scale_error,
            solved.fit.shift.x,
            solved.fit.shift.y
        );

        let outcome = solved.outcome();
        self.commit(
            solved.state,
            &measurements,
            solved.analysis.skew_angle_deg(),
            outcome,
        );
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reference_points::reference_point;
    use approx::assert_relative_eq;
    use bed_math::{rotation_matrix, skewed_axes_matrix};
    use nalgebra::Vector2;

    fn measurements_under(matrix: Matrix2<f64>, shift: Vector2<f64>) -> Vec<PointMeasurement> {
        CORNER_POINTS
            .iter()
            .map(|&index| {
                let nominal = reference_point(index).unwrap();
                PointMeasurement {
                    index,
                    nominal,
                    measured: matrix * nominal + shift,
                    z: None,
                }
            })
            .collect()
    }

    #[test]
    fn test_pure_rotation_is_perfect() {
        let config = SolverConfig::default();
        let matrix = rotation_matrix(0.3_f64.to_radians());
        let solved =
            solve_bed_offset_and_skew(&measurements_under(matrix, Vector2::new(1.0, -0.8)), &config)
                .unwrap();

        assert_eq!(solved.grade, SkewGrade::Perfect);
        assert_relative_eq!(solved.analysis.skew_angle_rad, 0.0, epsilon = 1e-9);
        assert_relative_eq!(*solved.state.rotation_and_skew(), matrix, epsilon = 1e-9);
        assert_relative_eq!(solved.state.shift().x, 1.0, epsilon = 1e-9);
    }

    #[test]
    fn test_skew_across_half_turn() {
        let config = SolverConfig::default();
        let half_turn = std::f64::consts::PI;
        let matrix = skewed_axes_matrix(half_turn - 0.0015, half_turn + 0.0015);
        let analysis = SkewAnalysis::from_matrix(&matrix);

        assert!(analysis.x_axis_angle_rad > 0.0 && analysis.y_axis_angle_rad < 0.0);
        assert_relative_eq!(analysis.skew_angle_rad, 0.003, epsilon = 1e-9);
        assert_eq!(analysis.grade(&config), SkewGrade::MildSkew);
    }

    #[test]
    fn test_skew_grades() {
        let config = SolverConfig::default();
        let grade_for = |skew_deg: f64| {
            let matrix = skewed_axes_matrix(0.0, skew_deg.to_radians());
            solve_bed_offset_and_skew(&measurements_under(matrix, Vector2::zeros()), &config)
                .unwrap()
                .grade
        };

        assert_eq!(grade_for(0.05), SkewGrade::Perfect);
        assert_eq!(grade_for(0.18), SkewGrade::MildSkew);
        assert_eq!(grade_for(0.40), SkewGrade::ExtremeSkew);
    }

    #[test]
    fn test_scale_error_grades() {
        let config = SolverConfig::default();
        let analysis = SkewAnalysis::from_matrix(&Matrix2::new(1.01, 0.0, 0.0, 1.0));
        assert_relative_eq!(analysis.scale_error, 0.01, epsilon = 1e-12);
        assert_eq!(analysis.grade(&config), SkewGrade::MildSkew);

        let analysis = SkewAnalysis::from_matrix(&Matrix2::new(1.0, 0.0, 0.0, 0.95));
        assert_eq!(analysis.grade(&config), SkewGrade::ExtremeSkew);
    }

    #[test]
    fn test_front_far_advisories() {
        let mut measurements = measurements_under(Matrix2::identity(), Vector2::zeros());
        measurements[0].measured.x += 6.0;

        let advisories = front_advisories(&measurements, 5.0);
        assert_eq!(advisories, Advisories::FRONT_LEFT_FAR);

        measurements[1].measured.y -= 5.5;
        let advisories = front_advisories(&measurements, 5.0);
        assert_eq!(advisories, Advisories::all());
    }

    #[test]
    fn test_large_residual_rejected() {
        let mut measurements = measurements_under(Matrix2::identity(), Vector2::zeros());
        measurements[3].measured.x += 12.0;

        let result = solve_bed_offset_and_skew(&measurements, &SolverConfig::default());
        assert!(matches!(
            result,
            Err(CalibrationError::ResidualTooLarge { .. })
        ));
    }

    #[test]
    fn test_collapsed_axes_rejected() {
        // Y axis image almost parallel to X
        let matrix = Matrix2::new(1.0, 1.0, 0.0, 0.1);
        let result = solve_bed_offset_and_skew(
            &measurements_under(matrix, Vector2::zeros()),
            &SolverConfig::default(),
        );
        assert!(matches!(result, Err(CalibrationError::DegenerateAxes(_))));
    }

    #[test]
    fn test_too_few_points_rejected() {
        let measurements = measurements_under(Matrix2::identity(), Vector2::zeros());
        let result = solve_bed_offset_and_skew(&measurements[..2], &SolverConfig::default());
        assert!(matches!(result, Err(CalibrationError::Fit(_))));
    }
}
