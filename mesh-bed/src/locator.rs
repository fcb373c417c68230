//! Induction-sensor point locator
//!
//! Finds a bed reference point with the induction sensor: the height at which
//! the sensor fires (repeated approaches, jitter checked) and the XY center of
//! the trigger region (bidirectional edge sweeps, center = midpoint of the two
//! edges so that sensor hysteresis cancels).

use printer_hardware::{AxisPosition, HardwareError, ProbeHardware, TravelLimits};
use thiserror::Error;
use tracing::debug;

use crate::config::LocatorConfig;

/// Error while locating a reference point
#[derive(Error, Debug, Clone, PartialEq)]
pub enum LocatorError {
    #[error("sensor did not trigger along the {axis} axis within the search range")]
    NoTrigger { axis: char },

    #[error("sensor already triggered before the {axis} search started")]
    TriggeredAtStart { axis: char },

    #[error("sensor stayed triggered after retracting")]
    SensorStuck,

    #[error("Z trigger jitter {jitter_mm:.4} mm exceeds tolerance {tolerance_mm:.4} mm")]
    JitterExceeded { jitter_mm: f64, tolerance_mm: f64 },

    #[error("inconsistent {axis} edges: low {low:.3}, high {high:.3}")]
    InconsistentEdges { axis: char, low: f64, high: f64 },

    #[error("hardware error: {0}")]
    Hardware(#[from] HardwareError),
}

impl LocatorError {
    pub fn is_abort(&self) -> bool {
        matches!(self, LocatorError::Hardware(e) if e.is_abort())
    }
}

/// Height at which the sensor fires over a point
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ZMeasurement {
    /// Mean of the slow approaches (or the single fast approach)
    pub z: f64,
    /// Spread of the slow approaches
    pub jitter_mm: f64,
    pub samples: usize,
}

/// Center and extent of a trigger region
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct XyMeasurement {
    pub x: f64,
    pub y: f64,
    /// Chord length of the final X sweep
    pub x_width_mm: f64,
    /// Chord length of the final Y sweep
    pub y_width_mm: f64,
}

/// Extent of an XY search
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct XySearch {
    pub radius_mm: f64,
    pub line_spacing_mm: f64,
    pub refine_passes: u8,
}

impl XySearch {
    pub fn from_config(config: &LocatorConfig) -> Self {
        Self {
            radius_mm: config.xy_search_radius_mm,
            line_spacing_mm: config.xy_line_spacing_mm,
            refine_passes: config.xy_refine_passes,
        }
    }
}

/// Find the height at which the sensor fires below the current XY position
///
/// One fast approach down to `minimum_z`, then `n_iter` slow approaches each
/// preceded by a short retract. Leaves the axes at the last trigger height.
pub fn find_bed_induction_sensor_point_z<H: ProbeHardware>(
    hardware: &mut H,
    config: &LocatorConfig,
    minimum_z: f64,
    n_iter: u8,
) -> Result<ZMeasurement, LocatorError> {
    let start = hardware.position()?;
    if hardware.sensor_triggered()? {
        return Err(LocatorError::TriggeredAtStart { axis: 'z' });
    }

    let floor = start.with_z(minimum_z);
    let slow_feedrate = config.z_fast_feedrate_mm_s / config.z_slow_feedrate_divisor;
    let mut last = hardware
        .probe_to(floor, config.z_fast_feedrate_mm_s)?
        .trigger_position()
        .ok_or(LocatorError::NoTrigger { axis: 'z' })?;
    debug!("fast Z approach triggered at {:.4}", last.z);

    if n_iter == 0 {
        return Ok(ZMeasurement {
            z: last.z,
            jitter_mm: 0.0,
            samples: 1,
        });
    }

    let mut samples = Vec::with_capacity(n_iter as usize);
    for _ in 0..n_iter {
        hardware.move_to(last.with_z(last.z + config.z_retract_mm), slow_feedrate)?;
        if hardware.sensor_triggered()? {
            return Err(LocatorError::SensorStuck);
        }
        last = hardware
            .probe_to(floor, slow_feedrate)?
            .trigger_position()
            .ok_or(LocatorError::NoTrigger { axis: 'z' })?;
        samples.push(last.z);
    }

    let (low, high) = samples
        .iter()
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &z| {
            (lo.min(z), hi.max(z))
        });
    let jitter_mm = high - low;
    if jitter_mm > config.z_jitter_tolerance_mm {
        return Err(LocatorError::JitterExceeded {
            jitter_mm,
            tolerance_mm: config.z_jitter_tolerance_mm,
        });
    }

    let z = samples.iter().sum::<f64>() / samples.len() as f64;
    debug!("Z trigger {:.4} (jitter {:.4}) over {} samples", z, jitter_mm, samples.len());
    Ok(ZMeasurement {
        z,
        jitter_mm,
        samples: samples.len(),
    })
}

/// Find the XY center of the trigger region around the current position
///
/// Runs at the current height. X sweeps on lines alternating around the
/// starting Y (0, -s, +s, -2s, ...) until one crosses the region, then a Y
/// sweep through the X center, then `refine_passes` further X/Y pairs.
/// Leaves the axes over the found center.
pub fn find_bed_induction_sensor_point_xy<H: ProbeHardware>(
    hardware: &mut H,
    config: &LocatorConfig,
    limits: &TravelLimits,
    search: XySearch,
) -> Result<XyMeasurement, LocatorError> {
    let start = hardware.position()?;
    let mut sweeper = EdgeSweeper {
        hardware,
        limits,
        feedrate_mm_s: config.xy_feedrate_mm_s,
        z: start.z,
        radius_mm: search.radius_mm,
    };

    let mut found = None;
    for offset in line_offsets(search.radius_mm, search.line_spacing_mm) {
        let line_y = limits.clamp_axis('y', start.y + offset);
        if let Some(edges) = sweeper.sweep(Axis::X, start.x, line_y)? {
            found = Some((edges, line_y));
            break;
        }
    }
    let (mut x_edges, line_y) = found.ok_or(LocatorError::NoTrigger { axis: 'x' })?;
    let mut center_x = x_edges.midpoint();

    let mut y_edges = sweeper
        .sweep(Axis::Y, line_y, center_x)?
        .ok_or(LocatorError::NoTrigger { axis: 'y' })?;
    let mut center_y = y_edges.midpoint();

    for pass in 0..search.refine_passes {
        x_edges = sweeper
            .sweep(Axis::X, center_x, center_y)?
            .ok_or(LocatorError::NoTrigger { axis: 'x' })?;
        center_x = x_edges.midpoint();
        y_edges = sweeper
            .sweep(Axis::Y, center_y, center_x)?
            .ok_or(LocatorError::NoTrigger { axis: 'y' })?;
        center_y = y_edges.midpoint();
        debug!("refine pass {}: center ({:.4}, {:.4})", pass + 1, center_x, center_y);
    }

    sweeper
        .hardware
        .move_to(AxisPosition::new(center_x, center_y, start.z), config.xy_feedrate_mm_s)?;

    Ok(XyMeasurement {
        x: center_x,
        y: center_y,
        x_width_mm: x_edges.width(),
        y_width_mm: y_edges.width(),
    })
}

/// Offsets of the zig-zag search lines: 0, -s, +s, -2s, +2s, ...
fn line_offsets(radius_mm: f64, spacing_mm: f64) -> Vec<f64> {
    let mut offsets = vec![0.0];
    if spacing_mm <= 0.0 {
        return offsets;
    }
    let steps = (radius_mm / spacing_mm).floor() as usize;
    for step in 1..=steps {
        let distance = step as f64 * spacing_mm;
        offsets.push(-distance);
        offsets.push(distance);
    }
    offsets
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Axis {
    X,
    Y,
}

impl Axis {
    fn name(self) -> char {
        match self {
            Axis::X => 'x',
            Axis::Y => 'y',
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct Edges {
    low: f64,
    high: f64,
}

impl Edges {
    fn midpoint(&self) -> f64 {
        0.5 * (self.low + self.high)
    }

    fn width(&self) -> f64 {
        self.high - self.low
    }
}

struct EdgeSweeper<'a, H> {
    hardware: &'a mut H,
    limits: &'a TravelLimits,
    feedrate_mm_s: f64,
    z: f64,
    radius_mm: f64,
}

impl<H: ProbeHardware> EdgeSweeper<'_, H> {
    fn point(&self, axis: Axis, along: f64, across: f64) -> AxisPosition {
        match axis {
            Axis::X => AxisPosition::new(along, across, self.z),
            Axis::Y => AxisPosition::new(across, along, self.z),
        }
    }

    fn coordinate(axis: Axis, position: &AxisPosition) -> f64 {
        match axis {
            Axis::X => position.x,
            Axis::Y => position.y,
        }
    }

    /// Sweep along `axis` through `center` in both directions
    ///
    /// Returns `None` when the forward pass crosses no trigger region.
    fn sweep(
        &mut self,
        axis: Axis,
        center: f64,
        across: f64,
    ) -> Result<Option<Edges>, LocatorError> {
        let name = axis.name();
        let low_end = self.limits.clamp_axis(name, center - self.radius_mm);
        let high_end = self.limits.clamp_axis(name, center + self.radius_mm);

        let low_point = self.point(axis, low_end, across);
        let high_point = self.point(axis, high_end, across);

        self.hardware.move_to(low_point, self.feedrate_mm_s)?;
        if self.hardware.sensor_triggered()? {
            return Err(LocatorError::TriggeredAtStart { axis: name });
        }
        let Some(low_hit) = self
            .hardware
            .probe_to(high_point, self.feedrate_mm_s)?
            .trigger_position()
        else {
            return Ok(None);
        };
        let low = Self::coordinate(axis, &low_hit);

        self.hardware.move_to(high_point, self.feedrate_mm_s)?;
        if self.hardware.sensor_triggered()? {
            return Err(LocatorError::TriggeredAtStart { axis: name });
        }
        let high_hit = self
            .hardware
            .probe_to(low_point, self.feedrate_mm_s)?
            .trigger_position()
            .ok_or(LocatorError::InconsistentEdges {
                axis: name,
                low,
                high: f64::NAN,
            })?;
        let high = Self::coordinate(axis, &high_hit);

        if high < low {
            return Err(LocatorError::InconsistentEdges { axis: name, low, high });
        }
        Ok(Some(Edges { low, high }))
    }
}
