//! Calibration engine state and lifecycle
//!
//! [`BedCalibrator`] owns the printer hardware, the persistent store and the
//! active [`TransformState`]. The calibration passes live in
//! [`crate::solver`], [`crate::improve`] and [`crate::scan`]; this module holds
//! the shared state handling: initialization from storage, reset, tracking of
//! the planner's world position, and single-point measurement.

use nalgebra::Vector2;
use printer_hardware::{AxisPosition, HardwareResult, ProbeHardware};
use tracing::{debug, info, warn};

use crate::config::CalibrationConfig;
use crate::error::CalibrationError;
use crate::locator::{self, LocatorError, XyMeasurement, XySearch, ZMeasurement};
use crate::outcome::CalibrationOutcome;
use crate::reference_points::{reference_point, REFERENCE_POINT_COUNT};
use crate::report::{PointReport, PointReporter, TracingReporter};
use crate::storage::{PersistedCalibration, TransformStore};
use crate::transform::TransformState;

/// A reference point to visit and where to start looking for it
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PointTarget {
    pub index: usize,
    /// Nominal world position
    pub nominal: Vector2<f64>,
    /// Machine position at which the search starts
    pub machine: Vector2<f64>,
}

impl PointTarget {
    /// Target searched at its nominal position
    pub fn at_nominal(index: usize) -> Option<Self> {
        let nominal = reference_point(index)?;
        Some(Self {
            index,
            nominal,
            machine: nominal,
        })
    }

    /// Target searched where `transform` predicts it
    pub fn predicted(index: usize, transform: &TransformState) -> Option<Self> {
        let nominal = reference_point(index)?;
        let (x, y) = transform.world2machine(nominal.x, nominal.y);
        Some(Self {
            index,
            nominal,
            machine: Vector2::new(x, y),
        })
    }
}

/// A located reference point
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PointMeasurement {
    pub index: usize,
    pub nominal: Vector2<f64>,
    /// Measured machine position of the trigger region center
    pub measured: Vector2<f64>,
    pub z: Option<ZMeasurement>,
}

/// Bed calibration engine
pub struct BedCalibrator<H, S, R = TracingReporter>
where
    H: ProbeHardware,
    S: TransformStore,
    R: PointReporter,
{
    pub(crate) hardware: H,
    pub(crate) store: S,
    pub(crate) reporter: R,
    pub(crate) config: CalibrationConfig,
    pub(crate) transform: TransformState,
    /// Per-point Z jitter of the last calibration that probed Z
    pub(crate) z_jitter: Option<Vec<Option<f64>>>,
    /// Planner position in world coordinates
    pub(crate) current_position: AxisPosition,
    pub(crate) last_failure: Option<CalibrationError>,
    pub(crate) last_correction_delta: Option<f64>,
}

impl<H, S, R> BedCalibrator<H, S, R>
where
    H: ProbeHardware,
    S: TransformStore,
    R: PointReporter,
{
    /// Create an uncalibrated engine
    ///
    /// Call [`Self::world2machine_initialize`] to pick up a persisted
    /// calibration.
    pub fn new(hardware: H, store: S, reporter: R, config: CalibrationConfig) -> Self {
        Self {
            hardware,
            store,
            reporter,
            config,
            transform: TransformState::identity(),
            z_jitter: None,
            current_position: AxisPosition::default(),
            last_failure: None,
            last_correction_delta: None,
        }
    }

    pub fn transform(&self) -> &TransformState {
        &self.transform
    }

    pub fn config(&self) -> &CalibrationConfig {
        &self.config
    }

    pub fn config_mut(&mut self) -> &mut CalibrationConfig {
        &mut self.config
    }

    pub fn hardware(&self) -> &H {
        &self.hardware
    }

    pub fn hardware_mut(&mut self) -> &mut H {
        &mut self.hardware
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn reporter(&self) -> &R {
        &self.reporter
    }

    /// Planner position in world coordinates
    pub fn current_position(&self) -> AxisPosition {
        self.current_position
    }

    /// Cause of the most recent failed calibration, cleared on success
    pub fn last_failure(&self) -> Option<&CalibrationError> {
        self.last_failure.as_ref()
    }

    /// Largest coefficient change made by the last improvement pass
    pub fn last_correction_delta(&self) -> Option<f64> {
        self.last_correction_delta
    }

    /// Drop the active correction without touching storage
    pub fn world2machine_reset(&mut self) {
        self.transform = TransformState::identity();
        debug!("world2machine reset to identity");
    }

    /// Load the persisted correction, falling back to none
    pub fn world2machine_initialize(&mut self) {
        let max_shift = self.config.solver.max_persisted_shift_mm;
        match self.store.load() {
            Ok(Some(record)) => match record.to_state(max_shift) {
                Ok(state) => {
                    info!("Loaded bed calibration: {}", state);
                    self.transform = state;
                    self.z_jitter = record.valid_z_jitter();
                }
                Err(e) => {
                    warn!("Ignoring invalid persisted calibration: {}", e);
                    self.world2machine_reset();
                    self.z_jitter = None;
                }
            },
            Ok(None) => {
                info!("No persisted bed calibration; running uncorrected");
                self.world2machine_reset();
                self.z_jitter = None;
            }
            Err(e) => {
                warn!("Failed to read persisted calibration: {}", e);
                self.world2machine_reset();
                self.z_jitter = None;
            }
        }
        if let Err(e) = self.world2machine_update_current() {
            warn!("Could not refresh current position: {}", e);
        }
    }

    /// Recompute the planner's world position from the machine position
    ///
    /// The machine position reported by the hardware is authoritative; the
    /// world XY is its image under the active transform and Z is copied.
    pub fn world2machine_update_current(&mut self) -> HardwareResult<()> {
        let machine = self.hardware.position()?;
        let (x, y) = self.transform.machine2world(machine.x, machine.y);
        self.current_position = AxisPosition::new(x, y, machine.z);
        debug!("current position updated to {}", self.current_position);
        Ok(())
    }

    /// Whether Z jitter data from a committed calibration is available
    pub fn is_bed_z_jitter_data_valid(&self) -> bool {
        self.z_jitter.is_some()
    }

    /// Per-point Z jitter, indexed like the reference table
    pub fn z_jitter_data(&self) -> Option<&[Option<f64>]> {
        self.z_jitter.as_deref()
    }

    /// Forget the calibration: in memory, in storage and its Z jitter data
    pub fn reset_bed_offset_and_skew(&mut self) {
        self.world2machine_reset();
        self.z_jitter = None;
        self.last_correction_delta = None;
        match self.store.erase() {
            Ok(true) => info!("Erased persisted bed calibration"),
            Ok(false) => debug!("No persisted bed calibration to erase"),
            Err(e) => warn!("Failed to erase persisted calibration: {}", e),
        }
        if let Err(e) = self.world2machine_update_current() {
            warn!("Could not refresh current position: {}", e);
        }
    }

    /// Find the sensor trigger height below the current position
    pub fn find_bed_induction_sensor_point_z(
        &mut self,
        minimum_z: f64,
        n_iter: u8,
    ) -> Result<ZMeasurement, LocatorError> {
        locator::find_bed_induction_sensor_point_z(
            &mut self.hardware,
            &self.config.locator,
            minimum_z,
            n_iter,
        )
    }

    /// Find the trigger region center around the current position
    pub fn find_bed_induction_sensor_point_xy(&mut self) -> Result<XyMeasurement, LocatorError> {
        locator::find_bed_induction_sensor_point_xy(
            &mut self.hardware,
            &self.config.locator,
            &self.config.limits,
            XySearch::from_config(&self.config.locator),
        )
    }

    /// Travel to a target and locate its trigger region
    ///
    /// Does not touch the active transform, storage or jitter data.
    pub(crate) fn measure_point(
        &mut self,
        target: &PointTarget,
        search: XySearch,
    ) -> Result<PointMeasurement, LocatorError> {
        let travel_z = self.config.solver.travel_height_mm;
        let feedrate = self.config.locator.travel_feedrate_mm_s;
        let (x, y, _) = self.config.limits.clamp(target.machine.x, target.machine.y);

        let here = self.hardware.position()?;
        self.hardware.move_to(here.with_z(travel_z), feedrate)?;
        self.hardware
            .move_to(AxisPosition::new(x, y, travel_z), feedrate)?;

        let z = if self.config.solver.probe_z_first {
            Some(locator::find_bed_induction_sensor_point_z(
                &mut self.hardware,
                &self.config.locator,
                self.config.solver.minimum_z_mm,
                self.config.solver.z_iterations,
            )?)
        } else {
            None
        };
        let search_z = z.map_or(self.config.solver.xy_search_height_mm, |z| {
            z.z + self.config.solver.xy_search_z_offset_mm
        });
        self.hardware
            .move_to(AxisPosition::new(x, y, search_z), feedrate)?;

        let xy = locator::find_bed_induction_sensor_point_xy(
            &mut self.hardware,
            &self.config.locator,
            &self.config.limits,
            search,
        )?;

        Ok(PointMeasurement {
            index: target.index,
            nominal: target.nominal,
            measured: Vector2::new(xy.x, xy.y),
            z,
        })
    }

    /// Measure every target in order, stopping at the first failure
    pub(crate) fn measure_points(
        &mut self,
        targets: &[PointTarget],
        search: XySearch,
        verbosity_level: i8,
    ) -> Result<Vec<PointMeasurement>, CalibrationError> {
        let mut measurements = Vec::with_capacity(targets.len());
        for target in targets {
            match self.measure_point(target, search) {
                Ok(measurement) => {
                    if verbosity_level > 0 {
                        self.reporter.report(measured_report(&measurement));
                    }
                    measurements.push(measurement);
                }
                Err(source) => {
                    if verbosity_level > 0 {
                        self.reporter.report(PointReport::Failed {
                            index: target.index,
                            reason: source.to_string(),
                        });
                    }
                    return Err(CalibrationError::PointNotFound {
                        index: target.index,
                        source,
                    });
                }
            }
        }
        self.lift_to_travel_height()?;
        Ok(measurements)
    }

    pub(crate) fn lift_to_travel_height(&mut self) -> HardwareResult<()> {
        let here = self.hardware.position()?;
        self.hardware.move_to(
            here.with_z(self.config.solver.travel_height_mm),
            self.config.locator.travel_feedrate_mm_s,
        )
    }

    /// Best-effort lift and planner resync after a run that moved the axes
    /// without committing
    pub(crate) fn park_after_run(&mut self) {
        if let Err(e) = self.lift_to_travel_height() {
            warn!("Could not lift to travel height: {}", e);
        }
        if let Err(e) = self.world2machine_update_current() {
            warn!("Could not refresh current position: {}", e);
        }
    }

    /// Store a new transform and persist it
    ///
    /// A persistence failure is logged; the in-memory state stays committed.
    pub(crate) fn commit(
        &mut self,
        state: TransformState,
        measurements: &[PointMeasurement],
        skew_angle_deg: f64,
        outcome: CalibrationOutcome,
    ) {
        self.transform = state;
        self.merge_z_jitter(measurements);

        let record = PersistedCalibration::from_state(&self.transform)
            .with_skew_angle(skew_angle_deg)
            .with_result_code(outcome.result_code())
            .with_z_jitter(self.z_jitter.clone());
        if let Err(e) = self.store.save(&record) {
            warn!("Failed to persist bed calibration: {}", e);
        }
        if let Err(e) = self.world2machine_update_current() {
            warn!("Could not refresh current position: {}", e);
        }
        info!("Committed bed calibration: {}", self.transform);
    }

    /// Jitter from an earlier run does not describe a transform fitted
    /// without Z probing, so such a commit invalidates it.
    fn merge_z_jitter(&mut self, measurements: &[PointMeasurement]) {
        if measurements.iter().all(|m| m.z.is_none()) {
            if self.z_jitter.take().is_some() {
                debug!("Z jitter data invalidated by a commit without Z probing");
            }
            return;
        }
        let mut jitter = self
            .z_jitter
            .take()
            .unwrap_or_else(|| vec![None; REFERENCE_POINT_COUNT]);
        for measurement in measurements {
            if let (Some(slot), Some(z)) = (jitter.get_mut(measurement.index), measurement.z) {
                *slot = Some(z.jitter_mm);
            }
        }
        self.z_jitter = Some(jitter);
    }

    /// Record the result of a calibration pass
    pub(crate) fn conclude(
        &mut self,
        operation: &str,
        result: Result<CalibrationOutcome, CalibrationError>,
    ) -> CalibrationOutcome {
        match result {
            Ok(outcome) => {
                info!("{} finished: {} (code {})", operation, outcome, outcome.result_code());
                self.last_failure = None;
                outcome
            }
            Err(e) => {
                if e.is_abort() {
                    warn!("{} aborted: {}", operation, e);
                } else {
                    warn!("{} failed: {}", operation, e);
                }
                let moved = e.moved_axes();
                self.last_failure = Some(e);
                if moved {
                    self.park_after_run();
                }
                CalibrationOutcome::failed()
            }
        }
    }
}

pub(crate) fn measured_report(measurement: &PointMeasurement) -> PointReport {
    PointReport::Measured {
        index: measurement.index,
        nominal: [measurement.nominal.x, measurement.nominal.y],
        machine: [measurement.measured.x, measurement.measured.y],
        z: measurement.z.map(|z| z.z),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reference_points::nominal_points;
    use crate::report::RecordingReporter;
    use crate::storage::MemoryTransformStore;
    use approx::assert_relative_eq;
    use bed_math::skewed_axes_matrix;
    use printer_hardware::{SimulatedPrinter, SimulatedPrinterConfig};

    type TestCalibrator = BedCalibrator<SimulatedPrinter, MemoryTransformStore, RecordingReporter>;

    fn calibrator_with(store: MemoryTransformStore) -> TestCalibrator {
        let printer = SimulatedPrinter::new(SimulatedPrinterConfig::perfect(nominal_points()));
        BedCalibrator::new(
            printer,
            store,
            RecordingReporter::new(),
            CalibrationConfig::default(),
        )
    }

    fn stored_state() -> TransformState {
        TransformState::skew_and_shift(skewed_axes_matrix(0.001, 0.003), Vector2::new(0.5, 0.25))
            .unwrap()
    }

    #[test]
    fn test_initialize_loads_valid_record() {
        let record = PersistedCalibration::from_state(&stored_state());
        let mut calibrator = calibrator_with(MemoryTransformStore::with_record(record));

        calibrator.world2machine_initialize();
        assert_eq!(calibrator.transform(), &stored_state());
    }

    #[test]
    fn test_initialize_without_record_is_identity() {
        let mut calibrator = calibrator_with(MemoryTransformStore::new());
        calibrator.world2machine_initialize();

        assert_eq!(calibrator.transform(), &TransformState::identity());
        assert!(!calibrator.is_bed_z_jitter_data_valid());
    }

    #[test]
    fn test_initialize_rejects_corrupt_record() {
        let mut record = PersistedCalibration::from_state(&stored_state());
        record.checksum = record.checksum.wrapping_add(1);
        let mut calibrator = calibrator_with(MemoryTransformStore::with_record(record));

        calibrator.world2machine_initialize();
        assert_eq!(calibrator.transform(), &TransformState::identity());
    }

    #[test]
    fn test_update_current_uses_machine_position() {
        let record = PersistedCalibration::from_state(&stored_state());
        let mut calibrator = calibrator_with(MemoryTransformStore::with_record(record));
        calibrator.world2machine_initialize();

        calibrator
            .hardware_mut()
            .set_position(AxisPosition::new(100.0, 80.0, 3.0));
        calibrator.world2machine_update_current().unwrap();

        let current = calibrator.current_position();
        let (mx, my) = calibrator.transform().world2machine(current.x, current.y);
        assert_relative_eq!(mx, 100.0, epsilon = 1e-9);
        assert_relative_eq!(my, 80.0, epsilon = 1e-9);
        assert_relative_eq!(current.z, 3.0);
    }

    #[test]
    fn test_reset_erases_store() {
        let record = PersistedCalibration::from_state(&stored_state());
        let mut calibrator = calibrator_with(MemoryTransformStore::with_record(record));
        calibrator.world2machine_initialize();

        calibrator.reset_bed_offset_and_skew();

        assert_eq!(calibrator.transform(), &TransformState::identity());
        assert!(calibrator.store().record().is_none());
        assert!(!calibrator.is_bed_z_jitter_data_valid());
    }

    #[test]
    fn test_reset_survives_store_failure() {
        let record = PersistedCalibration::from_state(&stored_state());
        let mut calibrator = calibrator_with(MemoryTransformStore::write_protected(Some(record)));
        calibrator.world2machine_initialize();

        calibrator.reset_bed_offset_and_skew();
        assert_eq!(calibrator.transform(), &TransformState::identity());
    }

    #[test]
    fn test_point_locators_through_engine() {
        let mut calibrator = calibrator_with(MemoryTransformStore::new());
        calibrator
            .hardware_mut()
            .set_position(AxisPosition::new(115.0, 104.4, 5.0));

        let z = calibrator.find_bed_induction_sensor_point_z(-10.0, 3).unwrap();
        assert_relative_eq!(z.z, 1.0, epsilon = 1e-12);

        let here = calibrator.hardware_mut().position().unwrap();
        calibrator
            .hardware_mut()
            .move_to(here.with_z(z.z - 0.3), 10.0)
            .unwrap();
        let xy = calibrator.find_bed_induction_sensor_point_xy().unwrap();
        assert_relative_eq!(xy.x, 115.0, epsilon = 1e-9);
        assert_relative_eq!(xy.y, 104.4, epsilon = 1e-9);
    }
}
