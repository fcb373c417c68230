//! Printer motion and induction-sensor hardware abstraction
//!
//! The calibration engine talks to the printer through [`ProbeHardware`]:
//! blocking axis moves in machine coordinates, probing moves that stop when
//! the induction sensor fires, and a raw read of the sensor line. The
//! [`sim`] module provides a simulated printer for tests and bench runs.

pub mod limits;
pub mod sim;

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use limits::TravelLimits;
pub use sim::{SimulatedPrinter, SimulatedPrinterArgs, SimulatedPrinterConfig};

/// Error type for printer hardware operations
#[derive(Error, Debug, Clone, PartialEq)]
pub enum HardwareError {
    /// Communication with the motion controller failed
    #[error("communication error: {0}")]
    Communication(String),

    /// A global abort (emergency stop, thermal runaway) interrupted motion
    #[error("motion aborted")]
    Aborted,

    /// A move did not report completion in time
    #[error("move timed out after {seconds:.1}s")]
    Timeout { seconds: f64 },

    /// Target lies outside the physical travel of an axis
    #[error("target {value:.3} outside travel of {axis} axis")]
    OutOfTravel { axis: char, value: f64 },

    /// The controller cannot execute the requested command
    #[error("invalid command: {0}")]
    InvalidCommand(String),
}

impl HardwareError {
    /// Whether this error is a global abort that must unwind the caller
    pub fn is_abort(&self) -> bool {
        matches!(self, HardwareError::Aborted)
    }
}

/// Result type for hardware operations
pub type HardwareResult<T> = Result<T, HardwareError>;

/// Position of the three linear axes in machine coordinates (mm)
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct AxisPosition {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl AxisPosition {
    pub fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }

    /// Same position with a different height
    pub fn with_z(self, z: f64) -> Self {
        Self { z, ..self }
    }

    /// Same height with a different XY location
    pub fn with_xy(self, x: f64, y: f64) -> Self {
        Self { x, y, ..self }
    }
}

impl fmt::Display for AxisPosition {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "({:.3}, {:.3}, {:.3})", self.x, self.y, self.z)
    }
}

/// Outcome of a probing move
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ProbeOutcome {
    /// The sensor fired; motion stopped at this position.
    Triggered(AxisPosition),
    /// The move reached its target without a trigger.
    Completed,
}

impl ProbeOutcome {
    /// Trigger position, if the sensor fired
    pub fn trigger_position(&self) -> Option<AxisPosition> {
        match self {
            ProbeOutcome::Triggered(position) => Some(*position),
            ProbeOutcome::Completed => None,
        }
    }
}

/// Motion and sensor primitives needed to locate bed reference points
///
/// All positions are machine coordinates. Every call blocks until the
/// commanded motion has finished or the sensor has stopped it.
pub trait ProbeHardware {
    /// Current position of the axes
    fn position(&mut self) -> HardwareResult<AxisPosition>;

    /// Move to `target` ignoring the sensor
    fn move_to(&mut self, target: AxisPosition, feedrate_mm_s: f64) -> HardwareResult<()>;

    /// Move toward `target`, stopping as soon as the induction sensor fires
    fn probe_to(&mut self, target: AxisPosition, feedrate_mm_s: f64)
        -> HardwareResult<ProbeOutcome>;

    /// Current state of the induction sensor line
    fn sensor_triggered(&mut self) -> HardwareResult<bool>;
}

impl<T: ProbeHardware + ?Sized> ProbeHardware for &mut T {
    fn position(&mut self) -> HardwareResult<AxisPosition> {
        (**self).position()
    }

    fn move_to(&mut self, target: AxisPosition, feedrate_mm_s: f64) -> HardwareResult<()> {
        (**self).move_to(target, feedrate_mm_s)
    }

    fn probe_to(
        &mut self,
        target: AxisPosition,
        feedrate_mm_s: f64,
    ) -> HardwareResult<ProbeOutcome> {
        (**self).probe_to(target, feedrate_mm_s)
    }

    fn sensor_triggered(&mut self) -> HardwareResult<bool> {
        (**self).sensor_triggered()
    }
}
