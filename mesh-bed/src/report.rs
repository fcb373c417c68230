//! Diagnostic reporting of measured reference points

use tracing::{info, warn};

/// One diagnostic record emitted during calibration or scanning
#[derive(Debug, Clone, PartialEq)]
pub enum PointReport {
    /// A reference point was located
    Measured {
        index: usize,
        nominal: [f64; 2],
        machine: [f64; 2],
        z: Option<f64>,
    },
    /// Distance between a measured point and the fitted transform's image
    Residual { index: usize, residual_mm: f64 },
    /// A reference point could not be located
    Failed { index: usize, reason: String },
}

impl PointReport {
    pub fn index(&self) -> usize {
        match self {
            PointReport::Measured { index, .. }
            | PointReport::Residual { index, .. }
            | PointReport::Failed { index, .. } => *index,
        }
    }
}

/// Sink for per-point diagnostics
///
/// Reporting never influences calibration results.
pub trait PointReporter {
    fn report(&mut self, report: PointReport);
}

/// Writes reports to the tracing log
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingReporter;

impl PointReporter for TracingReporter {
    fn report(&mut self, report: PointReport) {
        match report {
            PointReport::Measured {
                index,
                nominal,
                machine,
                z,
            } => {
                info!(
                    "point {}: nominal ({:.3}, {:.3}) measured ({:.4}, {:.4}) z={}",
                    index,
                    nominal[0],
                    nominal[1],
                    machine[0],
                    machine[1],
                    z.map_or("-".to_string(), |z| format!("{z:.4}"))
                );
            }
            PointReport::Residual { index, residual_mm } => {
                info!("point {}: residual {:.4} mm", index, residual_mm);
            }
            PointReport::Failed { index, reason } => {
                warn!("point {}: not found ({})", index, reason);
            }
        }
    }
}

/// Keeps every report in memory
#[derive(Debug, Clone, Default)]
pub struct RecordingReporter {
    pub reports: Vec<PointReport>,
}

impl RecordingReporter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Indices of the `Measured` and `Failed` reports, in emission order
    pub fn visited_indices(&self) -> Vec<usize> {
        self.reports
            .iter()
            .filter(|r| !matches!(r, PointReport::Residual { .. }))
            .map(PointReport::index)
            .collect()
    }
}

impl PointReporter for RecordingReporter {
    fn report(&mut self, report: PointReport) {
        self.reports.push(report);
    }
}
