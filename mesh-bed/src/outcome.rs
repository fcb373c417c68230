//! Calibration outcome and its legacy integer encoding

use std::fmt;

use bitflags::bitflags;
use serde::{Deserialize, Serialize};

/// Whether a calibration attempt committed a new transform
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Outcome {
    Failed,
    Committed,
}

/// Severity of the measured axis skew
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum SkewGrade {
    Perfect = 0,
    MildSkew = 1,
    ExtremeSkew = 2,
}

bitflags! {
    /// Independent warnings about the front reference points
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct Advisories: u8 {
        /// Front-left point deviates far from its nominal position
        const FRONT_LEFT_FAR = 0b01;
        /// Front-right point deviates far from its nominal position
        const FRONT_RIGHT_FAR = 0b10;
    }
}

/// Result code of a failed calibration
pub const RESULT_FAILED: i8 = -1;
const GRADE_MASK: i8 = 0b11;
const ADVISORY_SHIFT: u32 = 2;

/// Result of `find_bed_offset_and_skew` / `improve_bed_offset_and_skew`
///
/// Advisories only carry meaning on a committed outcome; a failed outcome
/// always reports `Perfect` with no advisories.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CalibrationOutcome {
    pub outcome: Outcome,
    pub grade: SkewGrade,
    pub advisories: Advisories,
}

impl CalibrationOutcome {
    pub fn failed() -> Self {
        Self {
            outcome: Outcome::Failed,
            grade: SkewGrade::Perfect,
            advisories: Advisories::empty(),
        }
    }

    pub fn committed(grade: SkewGrade, advisories: Advisories) -> Self {
        Self {
            outcome: Outcome::Committed,
            grade,
            advisories,
        }
    }

    pub fn is_failed(&self) -> bool {
        self.outcome == Outcome::Failed
    }

    pub fn is_committed(&self) -> bool {
        self.outcome == Outcome::Committed
    }

    /// Legacy integer code: -1 on failure, otherwise the grade (0, 1, 2)
    /// OR'd with 4 for front-left far and 8 for front-right far
    pub fn result_code(&self) -> i8 {
        match self.outcome {
            Outcome::Failed => RESULT_FAILED,
            Outcome::Committed => {
                self.grade as i8 | ((self.advisories.bits() as i8) << ADVISORY_SHIFT)
            }
        }
    }

    /// Decode a legacy integer code
    ///
    /// Any negative code decodes as a failure. Codes with an unknown grade
    /// or unknown advisory bits yield `None`.
    pub fn from_result_code(code: i8) -> Option<Self> {
        if code < 0 {
            return Some(Self::failed());
        }
        let grade = match code & GRADE_MASK {
            0 => SkewGrade::Perfect,
            1 => SkewGrade::MildSkew,
            2 => SkewGrade::ExtremeSkew,
            _ => return None,
        };
        let advisories = Advisories::from_bits((code >> ADVISORY_SHIFT) as u8)?;
        Some(Self::committed(grade, advisories))
    }
}

impl fmt::Display for CalibrationOutcome {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        if self.is_failed() {
            return write!(f, "failed");
        }
        let grade = match self.grade {
            SkewGrade::Perfect => "perfect",
            SkewGrade::MildSkew => "mild skew",
            SkewGrade::ExtremeSkew => "extreme skew",
        };
        write!(f, "{grade}")?;
        if self.advisories.contains(Advisories::FRONT_LEFT_FAR) {
            write!(f, ", front-left far")?;
        }
        if self.advisories.contains(Advisories::FRONT_RIGHT_FAR) {
            write!(f, ", front-right far")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_legacy_codes() {
        assert_eq!(CalibrationOutcome::failed().result_code(), -1);
        assert_eq!(
            CalibrationOutcome::committed(SkewGrade::Perfect, Advisories::empty()).result_code(),
            0
        );
        assert_eq!(
            CalibrationOutcome::committed(SkewGrade::ExtremeSkew, Advisories::empty())
                .result_code(),
            2
        );
        assert_eq!(
            CalibrationOutcome::committed(SkewGrade::MildSkew, Advisories::FRONT_LEFT_FAR)
                .result_code(),
            5
        );
        assert_eq!(
            CalibrationOutcome::committed(SkewGrade::Perfect, Advisories::all()).result_code(),
            12
        );
    }

    #[test]
    fn test_decode_every_valid_code() {
        for code in 0..=14i8 {
            let Some(decoded) = CalibrationOutcome::from_result_code(code) else {
                assert_eq!(code & 3, 3, "code {code} should decode");
                continue;
            };
            assert_eq!(decoded.result_code(), code);
        }
    }

    #[test]
    fn test_decode_rejects_unknown_bits() {
        assert!(CalibrationOutcome::from_result_code(3).is_none());
        assert!(CalibrationOutcome::from_result_code(16).is_none());
        assert!(CalibrationOutcome::from_result_code(-5).unwrap().is_failed());
    }

    #[test]
    fn test_display() {
        let outcome =
            CalibrationOutcome::committed(SkewGrade::MildSkew, Advisories::FRONT_RIGHT_FAR);
        assert_eq!(outcome.to_string(), "mild skew, front-right far");
    }
}
