//! Scan grid: target lists per axis and their visiting order.
//!
//! Z is the outermost loop, then Y, then X. The point at indices (i, j, k) is
//! visited `|X|·|Y|·k + |X|·j + i`-th (0-based); reporting uses the 1-based
//! form.

use serde::{Deserialize, Serialize};

use crate::control::position::{Axis, PositionVector};
use crate::error::{ScanError, ScanResult};

/// Per-axis coordinate lists, in millimetres.
///
/// Points are visited with Z outermost and X innermost.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanGrid {
    x: Vec<f64>,
    y: Vec<f64>,
    z: Vec<f64>,
}

/// One visited point of a [`ScanGrid`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GridPoint {
    /// 1-based visit number
    pub index: usize,
    /// (i, j, k) indices into the X, Y and Z lists
    pub indices: [usize; 3],
    /// Coordinates of the point
    pub position: PositionVector,
}

impl ScanGrid {
    /// Grid from explicit coordinate lists; each must be non-empty and finite.
    pub fn new(x: Vec<f64>, y: Vec<f64>, z: Vec<f64>) -> ScanResult<Self> {
        for (axis, values) in [(Axis::X, &x), (Axis::Y, &y), (Axis::Z, &z)] {
            if values.is_empty() {
                return Err(ScanError::configuration(format!(
                    "Grid axis {} has no points",
                    axis
                )));
            }
            if values.iter().any(|v| !v.is_finite()) {
                return Err(ScanError::configuration(format!(
                    "Grid axis {} contains a non-finite coordinate",
                    axis
                )));
            }
        }
        Ok(Self { x, y, z })
    }

    /// `count[a]` evenly spaced points per axis, starting at `origin[a]`
    /// and `step[a]` apart.
    pub fn linspace(origin: [f64; 3], step: [f64; 3], count: [usize; 3]) -> ScanResult<Self> {
        let axis = |a: usize| -> Vec<f64> {
            (0..count[a])
                .map(|i| origin[a] + step[a] * i as f64)
                .collect()
        };
        Self::new(axis(0), axis(1), axis(2))
    }

    /// A single point.
    pub fn single(position: PositionVector) -> Self {
        Self {
            x: vec![position.x],
            y: vec![position.y],
            z: vec![position.z],
        }
    }

    /// Coordinates along `axis`.
    pub fn axis(&self, axis: Axis) -> &[f64] {
        match axis {
            Axis::X => &self.x,
            Axis::Y => &self.y,
            Axis::Z => &self.z,
        }
    }

    /// Number of points.
    pub fn len(&self) -> usize {
        self.x.len() * self.y.len() * self.z.len()
    }

    /// True when the grid has no points.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Points in visiting order.
    pub fn points(&self) -> impl Iterator<Item = GridPoint> + '_ {
        let (nx, ny) = (self.x.len(), self.y.len());
        self.z.iter().enumerate().flat_map(move |(k, &z)| {
            self.y.iter().enumerate().flat_map(move |(j, &y)| {
                self.x.iter().enumerate().map(move |(i, &x)| GridPoint {
                    index: nx * ny * k + nx * j + i + 1,
                    indices: [i, j, k],
                    position: PositionVector::new(x, y, z),
                })
            })
        })
    }

    /// Every visited position, in order.
    pub fn position_map(&self) -> Vec<PositionVector> {
        self.points().map(|p| p.position).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn x_is_innermost() {
        let grid = ScanGrid::new(vec![0.0, 1.0], vec![0.0, 1.0], vec![0.0]).unwrap();
        let visited: Vec<(usize, [f64; 3])> = grid
            .points()
            .map(|p| (p.index, p.position.as_array()))
            .collect();
        assert_eq!(
            visited,
            vec![
                (1, [0.0, 0.0, 0.0]),
                (2, [1.0, 0.0, 0.0]),
                (3, [0.0, 1.0, 0.0]),
                (4, [1.0, 1.0, 0.0]),
            ]
        );
    }

    #[test]
    fn z_is_outermost() {
        let grid = ScanGrid::new(vec![0.0, 1.0], vec![5.0], vec![-1.0, 1.0]).unwrap();
        let points: Vec<GridPoint> = grid.points().collect();
        assert_eq!(points.len(), 4);
        assert_eq!(points[2].indices, [0, 0, 1]);
        assert_eq!(points[2].index, 3);
        assert_eq!(points[2].position, PositionVector::new(0.0, 5.0, 1.0));
    }

    #[test]
    fn linspace_counts_from_origin() {
        let grid = ScanGrid::linspace([0.0, 2.0, 0.0], [10.0, 0.5, 0.0], [3, 2, 1]).unwrap();
        assert_eq!(grid.axis(Axis::X), &[0.0, 10.0, 20.0]);
        assert_eq!(grid.axis(Axis::Y), &[2.0, 2.5]);
        assert_eq!(grid.axis(Axis::Z), &[0.0]);
        assert_eq!(grid.len(), 6);
    }

    #[test]
    fn empty_axis_rejected() {
        assert!(ScanGrid::linspace([0.0; 3], [1.0; 3], [2, 0, 1]).is_err());
        assert!(ScanGrid::new(vec![f64::NAN], vec![0.0], vec![0.0]).is_err());
    }
}
