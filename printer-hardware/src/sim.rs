//! Simulated printer with a rotated, skewed and shifted bed
//!
//! Each bed reference point is modelled as a disk-shaped trigger region: the
//! induction sensor fires when the probe is inside the disk and at or below
//! the trigger height. The true (machine-space) disk centers are derived from
//! the nominal world points through a known affine map, so calibration code
//! can be checked against ground truth.

use std::collections::HashMap;

use clap::Args;
use nalgebra::{Matrix2, Vector2};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::debug;

use crate::limits::TravelLimits;
use crate::{AxisPosition, HardwareError, HardwareResult, ProbeHardware, ProbeOutcome};

/// Tolerance used to decide whether a move is axis-aligned
const AXIS_ALIGNED_EPSILON: f64 = 1e-9;

/// Ground truth and noise model for a [`SimulatedPrinter`]
#[derive(Debug, Clone)]
pub struct SimulatedPrinterConfig {
    /// Nominal (world) XY positions of the bed reference points
    pub nominal_points: Vec<[f64; 2]>,
    /// Rotation of the machine X axis image, radians
    pub x_axis_angle_rad: f64,
    /// Rotation of the machine Y axis image, radians
    pub y_axis_angle_rad: f64,
    /// Machine-space shift of the bed
    pub shift: [f64; 2],
    /// Extra displacement of individual points (mechanical defects)
    pub point_offsets: HashMap<usize, [f64; 2]>,
    /// Points whose trigger region is absent
    pub missing_points: Vec<usize>,
    /// Radius of each trigger region (mm)
    pub trigger_radius_mm: f64,
    /// Height at which the sensor fires over a trigger region (mm)
    pub trigger_height_mm: f64,
    /// Uniform noise amplitude added to each vertical trigger (mm)
    pub z_noise_mm: f64,
    /// Deterministic drift of the trigger height per vertical probe (mm)
    pub z_drift_per_probe_mm: f64,
    /// Seed for the noise generator
    pub seed: u64,
    /// XY travel of the simulated axes
    pub limits: TravelLimits,
    /// Raise [`HardwareError::Aborted`] once this many moves have been issued
    pub abort_after_moves: Option<usize>,
    /// Starting position of the axes
    pub start_position: AxisPosition,
}

impl SimulatedPrinterConfig {
    /// A perfectly built printer: identity transform, no noise
    pub fn perfect(nominal_points: Vec<[f64; 2]>) -> Self {
        Self {
            nominal_points,
            x_axis_angle_rad: 0.0,
            y_axis_angle_rad: 0.0,
            shift: [0.0, 0.0],
            point_offsets: HashMap::new(),
            missing_points: Vec::new(),
            trigger_radius_mm: 4.5,
            trigger_height_mm: 1.0,
            z_noise_mm: 0.0,
            z_drift_per_probe_mm: 0.0,
            seed: 0,
            limits: TravelLimits::default(),
            abort_after_moves: None,
            start_position: AxisPosition::new(0.0, 0.0, 5.0),
        }
    }

    /// Rotate both axes by the same angle
    pub fn with_rotation(mut self, angle_rad: f64) -> Self {
        self.x_axis_angle_rad = angle_rad;
        self.y_axis_angle_rad = angle_rad;
        self
    }

    /// Rotate the Y axis relative to the X axis
    pub fn with_skew(mut self, skew_rad: f64) -> Self {
        self.y_axis_angle_rad = self.x_axis_angle_rad + skew_rad;
        self
    }

    pub fn with_shift(mut self, x: f64, y: f64) -> Self {
        self.shift = [x, y];
        self
    }

    pub fn with_point_offset(mut self, index: usize, dx: f64, dy: f64) -> Self {
        self.point_offsets.insert(index, [dx, dy]);
        self
    }

    pub fn with_missing_point(mut self, index: usize) -> Self {
        self.missing_points.push(index);
        self
    }

    pub fn with_z_noise(mut self, amplitude_mm: f64, seed: u64) -> Self {
        self.z_noise_mm = amplitude_mm;
        self.seed = seed;
        self
    }

    pub fn with_z_drift(mut self, drift_mm: f64) -> Self {
        self.z_drift_per_probe_mm = drift_mm;
        self
    }

    pub fn with_abort_after(mut self, moves: usize) -> Self {
        self.abort_after_moves = Some(moves);
        self
    }

    /// World-to-machine matrix of the simulated bed
    pub fn true_matrix(&self) -> Matrix2<f64> {
        Matrix2::new(
            self.x_axis_angle_rad.cos(),
            -self.y_axis_angle_rad.sin(),
            self.x_axis_angle_rad.sin(),
            self.y_axis_angle_rad.cos(),
        )
    }

    /// Machine-space center of a reference point, if it exists
    pub fn true_point(&self, index: usize) -> Option<Vector2<f64>> {
        if self.missing_points.contains(&index) {
            return None;
        }
        let [x, y] = *self.nominal_points.get(index)?;
        let offset = self
            .point_offsets
            .get(&index)
            .map_or(Vector2::zeros(), |[dx, dy]| Vector2::new(*dx, *dy));
        let shift = Vector2::new(self.shift[0], self.shift[1]);
        Some(self.true_matrix() * Vector2::new(x, y) + shift + offset)
    }
}

/// Simulated printer implementing [`ProbeHardware`]
#[derive(Debug)]
pub struct SimulatedPrinter {
    config: SimulatedPrinterConfig,
    centers: Vec<Vector2<f64>>,
    position: AxisPosition,
    rng: StdRng,
    trigger_height: f64,
    vertical_probes: usize,
    moves: usize,
}

impl SimulatedPrinter {
    pub fn new(config: SimulatedPrinterConfig) -> Self {
        let centers = (0..config.nominal_points.len())
            .filter_map(|i| config.true_point(i))
            .collect();
        Self {
            position: config.start_position,
            rng: StdRng::seed_from_u64(config.seed),
            trigger_height: config.trigger_height_mm,
            centers,
            config,
            vertical_probes: 0,
            moves: 0,
        }
    }

    pub fn config(&self) -> &SimulatedPrinterConfig {
        &self.config
    }

    /// Number of moves (plain and probing) issued so far
    pub fn move_count(&self) -> usize {
        self.moves
    }

    /// Place the axes somewhere without counting a move
    pub fn set_position(&mut self, position: AxisPosition) {
        self.position = position;
    }

    fn in_trigger_region(&self, x: f64, y: f64) -> bool {
        let radius_sq = self.config.trigger_radius_mm.powi(2);
        self.centers
            .iter()
            .any(|c| (Vector2::new(x, y) - c).norm_squared() <= radius_sq)
    }

    fn is_triggered_at(&self, position: &AxisPosition) -> bool {
        position.z <= self.trigger_height && self.in_trigger_region(position.x, position.y)
    }

    fn begin_move(&mut self, target: &AxisPosition) -> HardwareResult<()> {
        self.moves += 1;
        if let Some(limit) = self.config.abort_after_moves {
            if self.moves > limit {
                return Err(HardwareError::Aborted);
            }
        }
        let limits = &self.config.limits;
        if !(limits.x_min..=limits.x_max).contains(&target.x) {
            return Err(HardwareError::OutOfTravel {
                axis: 'x',
                value: target.x,
            });
        }
        if !(limits.y_min..=limits.y_max).contains(&target.y) {
            return Err(HardwareError::OutOfTravel {
                axis: 'y',
                value: target.y,
            });
        }
        Ok(())
    }

    fn draw_trigger_height(&mut self) -> f64 {
        let noise = if self.config.z_noise_mm > 0.0 {
            self.rng
                .gen_range(-self.config.z_noise_mm..=self.config.z_noise_mm)
        } else {
            0.0
        };
        let drift = self.config.z_drift_per_probe_mm * self.vertical_probes as f64;
        self.vertical_probes += 1;
        self.config.trigger_height_mm + noise + drift
    }

    /// First parameter `t` in `[0, 1]` at which the segment enters a region
    fn first_entry(&self, start: Vector2<f64>, end: Vector2<f64>) -> Option<f64> {
        let direction = end - start;
        let a = direction.norm_squared();
        if a < AXIS_ALIGNED_EPSILON {
            return None;
        }
        let radius_sq = self.config.trigger_radius_mm.powi(2);

        self.centers
            .iter()
            .filter_map(|center| {
                let offset = start - center;
                let b = 2.0 * offset.dot(&direction);
                let c = offset.norm_squared() - radius_sq;
                let discriminant = b * b - 4.0 * a * c;
                if discriminant < 0.0 {
                    return None;
                }
                let t = (-b - discriminant.sqrt()) / (2.0 * a);
                (0.0..=1.0).contains(&t).then_some(t)
            })
            .min_by(|t1, t2| t1.total_cmp(t2))
    }
}

impl ProbeHardware for SimulatedPrinter {
    fn position(&mut self) -> HardwareResult<AxisPosition> {
        Ok(self.position)
    }

    fn move_to(&mut self, target: AxisPosition, _feedrate_mm_s: f64) -> HardwareResult<()> {
        self.begin_move(&target)?;
        self.position = target;
        Ok(())
    }

    fn probe_to(
        &mut self,
        target: AxisPosition,
        _feedrate_mm_s: f64,
    ) -> HardwareResult<ProbeOutcome> {
        self.begin_move(&target)?;
        let start = self.position;
        let xy_fixed = (target.x - start.x).abs() < AXIS_ALIGNED_EPSILON
            && (target.y - start.y).abs() < AXIS_ALIGNED_EPSILON;
        let z_fixed = (target.z - start.z).abs() < AXIS_ALIGNED_EPSILON;

        if xy_fixed {
            self.trigger_height = self.draw_trigger_height();
            if self.is_triggered_at(&start) {
                return Ok(ProbeOutcome::Triggered(start));
            }
            if self.in_trigger_region(start.x, start.y)
                && (target.z..=start.z).contains(&self.trigger_height)
            {
                self.position = start.with_z(self.trigger_height);
                debug!("sim: vertical trigger at {}", self.position);
                return Ok(ProbeOutcome::Triggered(self.position));
            }
            self.position = target;
            return Ok(ProbeOutcome::Completed);
        }

        if !z_fixed {
            return Err(HardwareError::InvalidCommand(
                "probing moves must be axis-aligned in Z or in XY".to_string(),
            ));
        }

        if self.is_triggered_at(&start) {
            return Ok(ProbeOutcome::Triggered(start));
        }
        if start.z > self.trigger_height {
            self.position = target;
            return Ok(ProbeOutcome::Completed);
        }

        let from = Vector2::new(start.x, start.y);
        let to = Vector2::new(target.x, target.y);
        match self.first_entry(from, to) {
            Some(t) => {
                let hit = from + (to - from) * t;
                self.position = start.with_xy(hit.x, hit.y);
                Ok(ProbeOutcome::Triggered(self.position))
            }
            None => {
                self.position = target;
                Ok(ProbeOutcome::Completed)
            }
        }
    }

    fn sensor_triggered(&mut self) -> HardwareResult<bool> {
        Ok(self.is_triggered_at(&self.position))
    }
}

/// Command-line arguments describing a simulated printer bed.
///
/// Use with `#[command(flatten)]` in your CLI args struct.
#[derive(Args, Debug, Clone)]
pub struct SimulatedPrinterArgs {
    /// Rotation of the simulated bed in degrees
    #[arg(long, default_value = "0.0")]
    pub sim_rotation_deg: f64,

    /// Skew of the simulated Y axis relative to X in degrees
    #[arg(long, default_value = "0.0")]
    pub sim_skew_deg: f64,

    /// Shift of the simulated bed along X in mm
    #[arg(long, default_value = "0.0", allow_hyphen_values = true)]
    pub sim_shift_x: f64,

    /// Shift of the simulated bed along Y in mm
    #[arg(long, default_value = "0.0", allow_hyphen_values = true)]
    pub sim_shift_y: f64,

    /// Amplitude of the vertical trigger noise in mm
    #[arg(long, default_value = "0.0")]
    pub sim_z_noise: f64,

    /// Seed for the simulated noise
    #[arg(long, default_value = "0")]
    pub sim_seed: u64,
}

impl SimulatedPrinterArgs {
    /// Build a simulated printer around the given nominal reference points
    pub fn build(&self, nominal_points: Vec<[f64; 2]>, limits: TravelLimits) -> SimulatedPrinter {
        let mut config = SimulatedPrinterConfig::perfect(nominal_points)
            .with_rotation(self.sim_rotation_deg.to_radians())
            .with_skew(self.sim_skew_deg.to_radians())
            .with_shift(self.sim_shift_x, self.sim_shift_y)
            .with_z_noise(self.sim_z_noise, self.sim_seed);
        config.limits = limits;
        SimulatedPrinter::new(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn single_point() -> SimulatedPrinter {
        SimulatedPrinter::new(SimulatedPrinterConfig::perfect(vec![[100.0, 100.0]]))
    }

    #[test]
    fn test_vertical_probe_triggers_over_point() {
        let mut printer = single_point();
        printer.move_to(AxisPosition::new(100.0, 100.0, 5.0), 50.0).unwrap();

        let outcome = printer
            .probe_to(AxisPosition::new(100.0, 100.0, -10.0), 5.0)
            .unwrap();

        let hit = outcome.trigger_position().unwrap();
        assert_relative_eq!(hit.z, 1.0, epsilon = 1e-12);
        assert!(printer.sensor_triggered().unwrap());
    }

    #[test]
    fn test_vertical_probe_misses_outside_region() {
        let mut printer = single_point();
        printer.move_to(AxisPosition::new(120.0, 100.0, 5.0), 50.0).unwrap();

        let outcome = printer
            .probe_to(AxisPosition::new(120.0, 100.0, -10.0), 5.0)
            .unwrap();
        assert_eq!(outcome, ProbeOutcome::Completed);
    }

    #[test]
    fn test_horizontal_probe_stops_at_edge() {
        let mut printer = single_point();
        printer.move_to(AxisPosition::new(90.0, 100.0, 0.5), 50.0).unwrap();

        let hit = printer
            .probe_to(AxisPosition::new(110.0, 100.0, 0.5), 5.0)
            .unwrap()
            .trigger_position()
            .unwrap();
        assert_relative_eq!(hit.x, 95.5, epsilon = 1e-9);
        assert_relative_eq!(hit.y, 100.0, epsilon = 1e-12);
    }

    #[test]
    fn test_horizontal_probe_above_trigger_height_completes() {
        let mut printer = single_point();
        printer.move_to(AxisPosition::new(90.0, 100.0, 3.0), 50.0).unwrap();

        let outcome = printer
            .probe_to(AxisPosition::new(110.0, 100.0, 3.0), 5.0)
            .unwrap();
        assert_eq!(outcome, ProbeOutcome::Completed);
    }

    #[test]
    fn test_diagonal_probe_rejected() {
        let mut printer = single_point();
        let result = printer.probe_to(AxisPosition::new(10.0, 10.0, 0.0), 5.0);
        assert!(matches!(result, Err(HardwareError::InvalidCommand(_))));
    }

    #[test]
    fn test_out_of_travel_rejected() {
        let mut printer = single_point();
        let result = printer.move_to(AxisPosition::new(100.0, -20.0, 5.0), 50.0);
        assert!(matches!(
            result,
            Err(HardwareError::OutOfTravel { axis: 'y', .. })
        ));
    }

    #[test]
    fn test_abort_after_moves() {
        let config = SimulatedPrinterConfig::perfect(vec![[100.0, 100.0]]).with_abort_after(1);
        let mut printer = SimulatedPrinter::new(config);

        printer.move_to(AxisPosition::new(10.0, 10.0, 5.0), 50.0).unwrap();
        let result = printer.move_to(AxisPosition::new(20.0, 10.0, 5.0), 50.0);
        assert_eq!(result, Err(HardwareError::Aborted));
    }

    #[test]
    fn test_true_point_applies_transform() {
        let config = SimulatedPrinterConfig::perfect(vec![[100.0, 0.0]])
            .with_rotation(std::f64::consts::FRAC_PI_2)
            .with_shift(1.0, 2.0);
        let point = config.true_point(0).unwrap();
        assert_relative_eq!(point.x, 1.0, epsilon = 1e-9);
        assert_relative_eq!(point.y, 102.0, epsilon = 1e-9);
    }

    #[test]
    fn test_missing_point_has_no_region() {
        let config = SimulatedPrinterConfig::perfect(vec![[100.0, 100.0]]).with_missing_point(0);
        assert!(config.true_point(0).is_none());
    }

    #[test]
    fn test_z_drift_raises_trigger() {
        let config = SimulatedPrinterConfig::perfect(vec![[100.0, 100.0]]).with_z_drift(0.1);
        let mut printer = SimulatedPrinter::new(config);
        printer.move_to(AxisPosition::new(100.0, 100.0, 5.0), 50.0).unwrap();

        let first = printer
            .probe_to(AxisPosition::new(100.0, 100.0, -10.0), 5.0)
            .unwrap()
            .trigger_position()
            .unwrap();
        printer.move_to(first.with_z(5.0), 50.0).unwrap();
        let second = printer
            .probe_to(AxisPosition::new(100.0, 100.0, -10.0), 5.0)
            .unwrap()
            .trigger_position()
            .unwrap();

        assert_relative_eq!(second.z - first.z, 0.1, epsilon = 1e-12);
    }
}
