//! Diagnostic scan of every reference point
//!
//! Visits the reference points in zig-zag order and reports where each one
//! was found. The scan never changes the active transform, storage or jitter
//! data, and keeps going past points it cannot find.

use printer_hardware::ProbeHardware;
use tracing::{info, warn};

use crate::calibrator::{measured_report, BedCalibrator, PointTarget};
use crate::locator::{LocatorError, XySearch};
use crate::reference_points::zigzag_order;
use crate::report::{PointReport, PointReporter};
use crate::storage::TransformStore;

/// Where a scanned point was found
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScannedPoint {
    /// Machine position of the trigger region center
    pub x: f64,
    pub y: f64,
    pub z: Option<f64>,
    /// Deviation from where the active transform predicted the point
    pub deviation_mm: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ScanEntry {
    pub index: usize,
    pub nominal: [f64; 2],
    pub result: Result<ScannedPoint, LocatorError>,
}

/// Result of a full scan, in visiting order
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ScanReport {
    pub entries: Vec<ScanEntry>,
    /// The scan stopped early on a global abort
    pub aborted: bool,
}

impl ScanReport {
    pub fn found_count(&self) -> usize {
        self.entries.iter().filter(|e| e.result.is_ok()).count()
    }

    pub fn all_found(&self) -> bool {
        !self.aborted && self.entries.iter().all(|e| e.result.is_ok())
    }

    pub fn visiting_order(&self) -> Vec<usize> {
        self.entries.iter().map(|e| e.index).collect()
    }
}

impl<H, S, R> BedCalibrator<H, S, R>
where
    H: ProbeHardware,
    S: TransformStore,
    R: PointReporter,
{
    /// Locate every reference point and report the results
    ///
    /// With `verbosity_level > 0` each point is also sent to the reporter.
    pub fn scan_bed_induction_points(&mut self, verbosity_level: i8) -> ScanReport {
        info!("Scanning bed induction points");
        let search = XySearch::from_config(&self.config.locator);
        let mut report = ScanReport::default();

        for index in zigzag_order() {
            let Some(target) = PointTarget::predicted(index, &self.transform) else {
                continue;
            };
            let result = self.measure_point(&target, search);

            if verbosity_level > 0 {
                let point_report = match &result {
                    Ok(measurement) => measured_report(measurement),
                    Err(e) => PointReport::Failed {
                        index,
                        reason: e.to_string(),
                    },
                };
                self.reporter.report(point_report);
            }

            let aborted = matches!(&result, Err(e) if e.is_abort());
            report.entries.push(ScanEntry {
                index,
                nominal: [target.nominal.x, target.nominal.y],
                result: result.map(|m| ScannedPoint {
                    x: m.measured.x,
                    y: m.measured.y,
                    z: m.z.map(|z| z.z),
                    deviation_mm: (m.measured - target.machine).norm(),
                }),
            });
            if aborted {
                warn!("Scan aborted at point {}", index);
                report.aborted = true;
                self.park_after_run();
                return report;
            }
        }

        self.park_after_run();
        info!(
            "Scan finished: {}/{} points found",
            report.found_count(),
            report.entries.len()
        );
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_report_is_not_complete_when_aborted() {
        let report = ScanReport {
            entries: Vec::new(),
            aborted: true,
        };
        assert!(!report.all_found());
        assert_eq!(report.found_count(), 0);
    }
}
