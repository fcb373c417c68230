//! Physical XY travel limits of the printer axes

use serde::{Deserialize, Serialize};

/// Travel range of the X and Y axes in machine coordinates (mm)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TravelLimits {
    pub x_min: f64,
    pub x_max: f64,
    pub y_min: f64,
    pub y_max: f64,
}

impl Default for TravelLimits {
    fn default() -> Self {
        Self {
            x_min: 0.0,
            x_max: 250.0,
            y_min: -4.0,
            y_max: 210.0,
        }
    }
}

impl TravelLimits {
    /// Whether a machine-space XY point is reachable
    pub fn contains(&self, x: f64, y: f64) -> bool {
        (self.x_min..=self.x_max).contains(&x) && (self.y_min..=self.y_max).contains(&y)
    }

    /// Clamp a machine-space XY point into the travel range
    ///
    /// Returns the clamped point and whether either axis was changed.
    pub fn clamp(&self, x: f64, y: f64) -> (f64, f64, bool) {
        let clamped_x = x.clamp(self.x_min, self.x_max);
        let clamped_y = y.clamp(self.y_min, self.y_max);
        let clamped = clamped_x != x || clamped_y != y;
        (clamped_x, clamped_y, clamped)
    }

    /// Clamp a single coordinate on the given axis
    pub fn clamp_axis(&self, axis: char, value: f64) -> f64 {
        match axis {
            'x' | 'X' => value.clamp(self.x_min, self.x_max),
            _ => value.clamp(self.y_min, self.y_max),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clamp_inside_is_identity() {
        let limits = TravelLimits::default();
        let (x, y, clamped) = limits.clamp(100.0, 100.0);
        assert_eq!((x, y), (100.0, 100.0));
        assert!(!clamped);
    }

    #[test]
    fn test_clamp_each_axis_independently() {
        let limits = TravelLimits::default();
        let (x, y, clamped) = limits.clamp(-5.0, 100.0);
        assert_eq!((x, y), (0.0, 100.0));
        assert!(clamped);

        let (x, y, clamped) = limits.clamp(260.0, -10.0);
        assert_eq!((x, y), (250.0, -4.0));
        assert!(clamped);
    }

    #[test]
    fn test_contains() {
        let limits = TravelLimits::default();
        assert!(limits.contains(0.0, -4.0));
        assert!(!limits.contains(0.0, -4.1));
    }
}
