//! Persistent storage of the world-to-machine correction
//!
//! The committed transform is written as a JSON record carrying a checksum
//! over the mode and coefficients. A record that fails any validation check
//! is treated as absent, and the printer falls back to no correction.

use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use bed_math::SingularMatrixError;
use chrono::Utc;
use nalgebra::{Matrix2, Vector2};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

use crate::reference_points::REFERENCE_POINT_COUNT;
use crate::transform::{CorrectionMode, TransformState};

/// File name of the persisted calibration inside the storage directory
pub const CALIBRATION_FILE_NAME: &str = "world2machine.json";

/// Error while reading or writing persisted calibration
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("storage is write-protected")]
    WriteProtected,
}

/// Reason a persisted record was rejected
#[derive(Error, Debug, Clone, PartialEq)]
pub enum PersistedRecordError {
    #[error("checksum mismatch: stored {stored:#06x}, computed {computed:#06x}")]
    ChecksumMismatch { stored: u16, computed: u16 },

    #[error("unknown correction mode bits {0:#04x}")]
    UnknownMode(u8),

    #[error("non-finite coefficient")]
    NonFinite,

    #[error("shift magnitude {magnitude:.3} mm exceeds {limit:.3} mm")]
    ShiftOutOfRange { magnitude: f64, limit: f64 },

    #[error("persisted matrix is singular: {0}")]
    Singular(#[from] SingularMatrixError),
}

/// On-disk form of a committed calibration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersistedCalibration {
    pub correction_mode: u8,
    /// Row-major rotation/skew matrix
    pub rotation_and_skew: [f64; 4],
    pub shift: [f64; 2],
    pub checksum: u16,

    /// RFC 3339 time of the calibration run
    #[serde(default)]
    pub calibrated_at: Option<String>,
    #[serde(default)]
    pub skew_angle_deg: Option<f64>,
    /// Legacy result code of the run that produced this record
    #[serde(default)]
    pub result_code: Option<i8>,
    /// Per-point Z trigger jitter, indexed like the reference points
    #[serde(default)]
    pub z_jitter_mm: Option<Vec<Option<f64>>>,
}

impl PersistedCalibration {
    /// Record for the given state, stamped with the current time
    pub fn from_state(state: &TransformState) -> Self {
        let m = state.rotation_and_skew();
        let shift = state.shift();
        let mut record = Self {
            correction_mode: state.mode().bits(),
            rotation_and_skew: [m[(0, 0)], m[(0, 1)], m[(1, 0)], m[(1, 1)]],
            shift: [shift.x, shift.y],
            checksum: 0,
            calibrated_at: Some(Utc::now().to_rfc3339()),
            skew_angle_deg: None,
            result_code: None,
            z_jitter_mm: None,
        };
        record.checksum = record.compute_checksum();
        record
    }

    pub fn with_skew_angle(mut self, skew_angle_deg: f64) -> Self {
        self.skew_angle_deg = Some(skew_angle_deg);
        self
    }

    pub fn with_result_code(mut self, code: i8) -> Self {
        self.result_code = Some(code);
        self
    }

    pub fn with_z_jitter(mut self, jitter: Option<Vec<Option<f64>>>) -> Self {
        self.z_jitter_mm = jitter;
        self
    }

    /// Wrapping sum of the little-endian 16-bit words of the mode byte
    /// (zero padded) and every coefficient
    pub fn compute_checksum(&self) -> u16 {
        let mut bytes = vec![self.correction_mode, 0];
        for value in self.rotation_and_skew.iter().chain(self.shift.iter()) {
            bytes.extend_from_slice(&value.to_le_bytes());
        }
        bytes
            .chunks_exact(2)
            .map(|word| u16::from_le_bytes([word[0], word[1]]))
            .fold(0u16, |sum, word| sum.wrapping_add(word))
    }

    /// Validate the record and rebuild the transform
    pub fn to_state(&self, max_shift_mm: f64) -> Result<TransformState, PersistedRecordError> {
        let computed = self.compute_checksum();
        if computed != self.checksum {
            return Err(PersistedRecordError::ChecksumMismatch {
                stored: self.checksum,
                computed,
            });
        }

        let mode = CorrectionMode::from_bits(self.correction_mode)
            .ok_or(PersistedRecordError::UnknownMode(self.correction_mode))?;

        if !self
            .rotation_and_skew
            .iter()
            .chain(self.shift.iter())
            .all(|v| v.is_finite())
        {
            return Err(PersistedRecordError::NonFinite);
        }

        let shift = Vector2::new(self.shift[0], self.shift[1]);
        if shift.norm() > max_shift_mm {
            return Err(PersistedRecordError::ShiftOutOfRange {
                magnitude: shift.norm(),
                limit: max_shift_mm,
            });
        }

        let [m00, m01, m10, m11] = self.rotation_and_skew;
        Ok(TransformState::new(mode, Matrix2::new(m00, m01, m10, m11), shift)?)
    }

    /// Z jitter data, if present and shaped like the reference table
    pub fn valid_z_jitter(&self) -> Option<Vec<Option<f64>>> {
        let jitter = self.z_jitter_mm.as_ref()?;
        let well_formed = jitter.len() == REFERENCE_POINT_COUNT
            && jitter.iter().flatten().all(|j| j.is_finite() && *j >= 0.0)
            && jitter.iter().any(Option::is_some);
        well_formed.then(|| jitter.clone())
    }
}

/// Durable home of the committed calibration
pub trait TransformStore {
    /// Load the stored record, `None` when nothing is stored
    fn load(&self) -> Result<Option<PersistedCalibration>, StorageError>;

    fn save(&mut self, record: &PersistedCalibration) -> Result<(), StorageError>;

    /// Remove the stored record; returns whether one existed
    fn erase(&mut self) -> Result<bool, StorageError>;
}

/// Stores the calibration as a JSON file in a directory
///
/// Defaults to `~/.mesh_bed/`.
#[derive(Debug, Clone)]
pub struct FileTransformStore {
    root_path: PathBuf,
}

impl FileTransformStore {
    pub fn new() -> Result<Self, StorageError> {
        let home = std::env::var_os("HOME").map(PathBuf::from).ok_or_else(|| {
            std::io::Error::new(std::io::ErrorKind::NotFound, "HOME is not set")
        })?;
        Ok(Self::with_root(home.join(".mesh_bed")))
    }

    pub fn with_root(root_path: impl Into<PathBuf>) -> Self {
        Self {
            root_path: root_path.into(),
        }
    }

    pub fn root_path(&self) -> &Path {
        &self.root_path
    }

    pub fn file_path(&self) -> PathBuf {
        self.root_path.join(CALIBRATION_FILE_NAME)
    }
}

impl TransformStore for FileTransformStore {
    fn load(&self) -> Result<Option<PersistedCalibration>, StorageError> {
        let path = self.file_path();
        if !path.exists() {
            return Ok(None);
        }
        let reader = BufReader::new(File::open(&path)?);
        Ok(Some(serde_json::from_reader(reader)?))
    }

    fn save(&mut self, record: &PersistedCalibration) -> Result<(), StorageError> {
        fs::create_dir_all(&self.root_path)?;
        let path = self.file_path();
        let mut writer = BufWriter::new(File::create(&path)?);
        serde_json::to_writer_pretty(&mut writer, record)?;
        writer.flush()?;
        writer.get_ref().sync_all()?;
        info!("Saved calibration to {}", path.display());
        Ok(())
    }

    fn erase(&mut self) -> Result<bool, StorageError> {
        let path = self.file_path();
        if !path.exists() {
            return Ok(false);
        }
        fs::remove_file(&path)?;
        info!("Erased calibration at {}", path.display());
        Ok(true)
    }
}

/// In-memory store, optionally refusing writes
#[derive(Debug, Clone, Default)]
pub struct MemoryTransformStore {
    record: Option<PersistedCalibration>,
    write_protected: bool,
}

impl MemoryTransformStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_record(record: PersistedCalibration) -> Self {
        Self {
            record: Some(record),
            write_protected: false,
        }
    }

    /// Store whose `save` and `erase` always fail
    pub fn write_protected(record: Option<PersistedCalibration>) -> Self {
        Self {
            record,
            write_protected: true,
        }
    }

    pub fn record(&self) -> Option<&PersistedCalibration> {
        self.record.as_ref()
    }
}

impl TransformStore for MemoryTransformStore {
    fn load(&self) -> Result<Option<PersistedCalibration>, StorageError> {
        Ok(self.record.clone())
    }

    fn save(&mut self, record: &PersistedCalibration) -> Result<(), StorageError> {
        if self.write_protected {
            return Err(StorageError::WriteProtected);
        }
        self.record = Some(record.clone());
        Ok(())
    }

    fn erase(&mut self) -> Result<bool, StorageError> {
        if self.write_protected {
            return Err(StorageError::WriteProtected);
        }
        Ok(self.record.take().is_some())
    }
}
