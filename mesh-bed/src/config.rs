//! Configuration types for bed calibration

use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;

use printer_hardware::TravelLimits;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Error while loading or saving a calibration configuration
#[derive(Error, Debug)]
pub enum ConfigError {
    /// IO error during save/load
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Parameters of the induction-sensor point locator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LocatorConfig {
    /// Feedrate of the first (fast) downward approach
    pub z_fast_feedrate_mm_s: f64,
    /// Repeated approaches run at `z_fast_feedrate_mm_s / z_slow_feedrate_divisor`
    pub z_slow_feedrate_divisor: f64,
    /// Back-off distance between repeated Z approaches
    pub z_retract_mm: f64,
    /// Maximum spread of the repeated Z trigger heights
    pub z_jitter_tolerance_mm: f64,
    /// Feedrate of XY probing sweeps
    pub xy_feedrate_mm_s: f64,
    /// Feedrate of non-probing travel moves
    pub travel_feedrate_mm_s: f64,
    /// Half-length of each XY sweep and extent of the zig-zag line search
    pub xy_search_radius_mm: f64,
    /// Distance between zig-zag search lines
    pub xy_line_spacing_mm: f64,
    /// Extra X/Y sweep pairs through the found center
    pub xy_refine_passes: u8,
}

impl Default for LocatorConfig {
    fn default() -> Self {
        Self {
            z_fast_feedrate_mm_s: 10.0,
            z_slow_feedrate_divisor: 4.0,
            z_retract_mm: 0.5,
            z_jitter_tolerance_mm: 0.05,
            xy_feedrate_mm_s: 20.0,
            travel_feedrate_mm_s: 50.0,
            xy_search_radius_mm: 10.0,
            xy_line_spacing_mm: 1.5,
            xy_refine_passes: 1,
        }
    }
}

/// Parameters of the skew/offset solver and the improvement pass
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SolverConfig {
    /// Height for travel moves between reference points
    pub travel_height_mm: f64,
    /// Run the Z locator over each point before the XY search
    pub probe_z_first: bool,
    /// Floor of the Z search
    pub minimum_z_mm: f64,
    /// Number of repeated slow Z approaches
    pub z_iterations: u8,
    /// XY search height relative to the measured Z trigger
    pub xy_search_z_offset_mm: f64,
    /// Fixed XY search height used when `probe_z_first` is off
    pub xy_search_height_mm: f64,
    /// Skew angle up to which the bed counts as perfect (degrees)
    pub mild_skew_deg: f64,
    /// Skew angle up to which the bed counts as mildly skewed (degrees)
    pub extreme_skew_deg: f64,
    /// Relative axis scale error up to which the bed counts as perfect
    pub mild_scale_error: f64,
    /// Relative axis scale error up to which the bed counts as mildly skewed
    pub extreme_scale_error: f64,
    /// Minimum angle between the fitted axes before the fit is rejected
    pub min_axis_angle_deg: f64,
    /// Maximum per-point fit residual before the fit is rejected
    pub max_residual_mm: f64,
    /// Front corner deviation that raises a FAR advisory
    pub front_far_threshold_mm: f64,
    /// XY search radius of the improvement pass
    pub improve_search_radius_mm: f64,
    /// XY refine passes of the improvement pass
    pub improve_refine_passes: u8,
    /// Largest shift accepted from persisted storage
    pub max_persisted_shift_mm: f64,
}

impl Default for SolverConfig {
    fn default() -> Self {
        Self {
            travel_height_mm: 5.0,
            probe_z_first: true,
            minimum_z_mm: -10.0,
            z_iterations: 3,
            xy_search_z_offset_mm: -0.3,
            xy_search_height_mm: 0.7,
            mild_skew_deg: 0.12,
            extreme_skew_deg: 0.25,
            mild_scale_error: 0.005,
            extreme_scale_error: 0.02,
            min_axis_angle_deg: 60.0,
            max_residual_mm: 2.0,
            front_far_threshold_mm: 5.0,
            improve_search_radius_mm: 7.0,
            improve_refine_passes: 2,
            max_persisted_shift_mm: 50.0,
        }
    }
}

/// Complete calibration configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CalibrationConfig {
    /// Physical XY travel used for clamping and sweep limits
    pub limits: TravelLimits,
    pub locator: LocatorConfig,
    pub solver: SolverConfig,
}

impl CalibrationConfig {
    /// Load a configuration from a JSON file
    ///
    /// Missing fields take their default values.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let file = File::open(path)?;
        let reader = BufReader::new(file);
        Ok(serde_json::from_reader(reader)?)
    }

    /// Save the configuration to a JSON file
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        let file = File::create(path)?;
        let mut writer = BufWriter::new(file);
        serde_json::to_writer_pretty(&mut writer, self)?;
        writer.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn test_default_config() {
        let config = CalibrationConfig::default();

        assert_abs_diff_eq!(config.solver.mild_skew_deg, 0.12, epsilon = f64::EPSILON);
        assert_abs_diff_eq!(config.solver.extreme_skew_deg, 0.25, epsilon = f64::EPSILON);
        assert_eq!(config.solver.z_iterations, 3);
        assert!(config.solver.probe_z_first);
        assert!(config.locator.xy_search_radius_mm > config.locator.xy_line_spacing_mm);
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let json = r#"{ "solver": { "mild_skew_deg": 0.2 } }"#;
        let config: CalibrationConfig = serde_json::from_str(json).unwrap();

        assert_abs_diff_eq!(config.solver.mild_skew_deg, 0.2, epsilon = f64::EPSILON);
        assert_abs_diff_eq!(config.solver.extreme_skew_deg, 0.25, epsilon = f64::EPSILON);
        assert_eq!(config.locator, LocatorConfig::default());
        assert_eq!(config.limits, TravelLimits::default());
    }

    #[test]
    fn test_save_load_roundtrip() {
        let temp_path = std::env::temp_dir().join("test_mesh_bed_config.json");

        let mut config = CalibrationConfig::default();
        config.locator.xy_refine_passes = 3;
        config.save(&temp_path).unwrap();

        let loaded = CalibrationConfig::load(&temp_path).unwrap();
        assert_eq!(loaded, config);

        let _ = std::fs::remove_file(&temp_path);
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_save_reports_full_device() {
        if !Path::new("/dev/full").exists() {
            return;
        }
        assert!(CalibrationConfig::default().save("/dev/full").is_err());
    }
}
