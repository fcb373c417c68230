//! mesh-bed - XY calibration of a printer bed with an induction sensor
//!
//! The bed carries nine induction targets at known nominal positions. The
//! engine locates them with the sensor, fits the world-to-machine transform
//! (rotation, skew, scale and shift) from the measured positions, grades the
//! skew, and persists the result.
//!
//! - [`transform`] - the active correction and world/machine conversions
//! - [`locator`] - Z and XY location of a single trigger region
//! - [`solver`] - first-time calibration from the bed corners
//! - [`improve`] - refinement starting from the active correction
//! - [`scan`] - diagnostic scan of all points
//! - [`storage`] - checksummed persistence of the committed correction
//!
//! # Example
//!
//! ```
//! use mesh_bed::{BedCalibrator, CalibrationConfig, MemoryTransformStore, TracingReporter};
//! use mesh_bed::reference_points::nominal_points;
//! use printer_hardware::{SimulatedPrinter, SimulatedPrinterConfig};
//!
//! let bed = SimulatedPrinterConfig::perfect(nominal_points()).with_shift(0.5, -0.3);
//! let mut calibrator = BedCalibrator::new(
//!     SimulatedPrinter::new(bed),
//!     MemoryTransformStore::new(),
//!     TracingReporter,
//!     CalibrationConfig::default(),
//! );
//! calibrator.world2machine_initialize();
//!
//! let outcome = calibrator.find_bed_offset_and_skew(0);
//! assert!(outcome.is_committed());
//!
//! let (x, y) = calibrator.transform().world2machine(13.0, 6.4);
//! assert!((x - 13.5).abs() < 1e-6 && (y - 6.1).abs() < 1e-6);
//! ```

pub mod calibrator;
pub mod config;
pub mod error;
pub mod improve;
pub mod locator;
pub mod outcome;
pub mod reference_points;
pub mod report;
pub mod scan;
pub mod solver;
pub mod storage;
pub mod transform;

pub use calibrator::{BedCalibrator, PointMeasurement, PointTarget};
pub use config::{CalibrationConfig, ConfigError, LocatorConfig, SolverConfig};
pub use error::CalibrationError;
pub use improve::ImproveMethod;
pub use locator::{LocatorError, XyMeasurement, XySearch, ZMeasurement};
pub use outcome::{Advisories, CalibrationOutcome, Outcome, SkewGrade};
pub use report::{PointReport, PointReporter, RecordingReporter, TracingReporter};
pub use scan::{ScanEntry, ScanReport, ScannedPoint};
pub use solver::{SkewAnalysis, SolvedCalibration};
pub use storage::{
    FileTransformStore, MemoryTransformStore, PersistedCalibration, PersistedRecordError,
    StorageError, TransformStore,
};
pub use transform::{CorrectionMode, TransformState};
