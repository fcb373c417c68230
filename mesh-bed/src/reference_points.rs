//! Nominal positions of the bed reference points
//!
//! Nine induction targets on a 3x3 grid, stored row-major from the front-left
//! corner. Coordinates are world (bed) millimetres.

use nalgebra::Vector2;

pub const REFERENCE_GRID_COLUMNS: usize = 3;
pub const REFERENCE_GRID_ROWS: usize = 3;
pub const REFERENCE_POINT_COUNT: usize = REFERENCE_GRID_COLUMNS * REFERENCE_GRID_ROWS;

/// Nominal XY of each reference point, row-major from the front-left
pub const BED_REFERENCE_POINTS: [[f64; 2]; REFERENCE_POINT_COUNT] = [
    [13.0, 6.4],
    [115.0, 6.4],
    [216.0, 6.4],
    [13.0, 104.4],
    [115.0, 104.4],
    [216.0, 104.4],
    [13.0, 202.4],
    [115.0, 202.4],
    [216.0, 202.4],
];

pub const FRONT_LEFT: usize = 0;
pub const FRONT_RIGHT: usize = 2;
pub const CENTER: usize = 4;

/// Points measured by the first-time calibration
pub const CORNER_POINTS: [usize; 4] = [0, 2, 6, 8];

/// Nominal position of a reference point
pub fn reference_point(index: usize) -> Option<Vector2<f64>> {
    BED_REFERENCE_POINTS
        .get(index)
        .map(|[x, y]| Vector2::new(*x, *y))
}

/// All reference points as plain arrays
pub fn nominal_points() -> Vec<[f64; 2]> {
    BED_REFERENCE_POINTS.to_vec()
}

/// Visiting order that alternates row direction to keep travel short
pub fn zigzag_order() -> Vec<usize> {
    (0..REFERENCE_GRID_ROWS)
        .flat_map(|row| {
            let start = row * REFERENCE_GRID_COLUMNS;
            let columns: Box<dyn Iterator<Item = usize>> = if row % 2 == 0 {
                Box::new(0..REFERENCE_GRID_COLUMNS)
            } else {
                Box::new((0..REFERENCE_GRID_COLUMNS).rev())
            };
            columns.map(move |column| start + column)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zigzag_order() {
        assert_eq!(zigzag_order(), vec![0, 1, 2, 5, 4, 3, 6, 7, 8]);
    }

    #[test]
    fn test_corner_layout() {
        let fl = reference_point(FRONT_LEFT).unwrap();
        let fr = reference_point(FRONT_RIGHT).unwrap();
        assert_eq!(fl.y, fr.y);
        assert!(fl.x < fr.x);
        for &index in &CORNER_POINTS {
            assert!(reference_point(index).is_some());
        }
        assert!(reference_point(REFERENCE_POINT_COUNT).is_none());
    }
}
