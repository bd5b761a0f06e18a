//! Planar calibration boards.
//!
//! A board is a regular planar grid plus a per-point 3D correction vector.
//! The corrections are the board's adjustable parameter block: optimizing
//! board geometry replaces the whole model via
//! [`BoardModel::with_param_vec`].

use crate::math::{Pt3, Real, Vec3};
use crate::table::PointGrid;
use anyhow::{ensure, Result};
use nalgebra::{DVector, DVectorView};
use serde::{Deserialize, Serialize};

/// Planar grid board with per-point corrections.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoardModel {
    pub name: String,
    pub rows: usize,
    pub cols: usize,
    /// Grid pitch in board units (usually meters).
    pub spacing: Real,
    corrections: Vec<Vec3>,
}

impl BoardModel {
    pub fn new(name: impl Into<String>, rows: usize, cols: usize, spacing: Real) -> Result<Self> {
        ensure!(
            rows > 0 && cols > 0,
            "board needs a non-empty grid, got {}x{}",
            rows,
            cols
        );
        ensure!(spacing > 0.0, "board spacing must be positive, got {}", spacing);
        Ok(Self {
            name: name.into(),
            rows,
            cols,
            spacing,
            corrections: vec![Vec3::zeros(); rows * cols],
        })
    }

    pub fn num_points(&self) -> usize {
        self.rows * self.cols
    }

    /// Board-local 3D points (Z=0 grid plus corrections), row-major.
    pub fn points(&self) -> Vec<Pt3> {
        let mut out = Vec::with_capacity(self.num_points());
        for r in 0..self.rows {
            for c in 0..self.cols {
                let base = Pt3::new(c as Real * self.spacing, r as Real * self.spacing, 0.0);
                out.push(base + self.corrections[r * self.cols + c]);
            }
        }
        out
    }

    /// Flattened per-point corrections `[x0, y0, z0, x1, ...]`.
    pub fn param_vec(&self) -> DVector<Real> {
        let mut out = Vec::with_capacity(self.num_points() * 3);
        for c in &self.corrections {
            out.extend_from_slice(&[c.x, c.y, c.z]);
        }
        DVector::from_vec(out)
    }

    /// New board with corrections replaced from a flat vector.
    pub fn with_param_vec(&self, v: DVectorView<'_, Real>) -> Result<Self> {
        ensure!(
            v.len() == self.num_points() * 3,
            "expected board vector of length {}, got {}",
            self.num_points() * 3,
            v.len()
        );
        let corrections = (0..self.num_points())
            .map(|i| Vec3::new(v[3 * i], v[3 * i + 1], v[3 * i + 2]))
            .collect();
        Ok(Self {
            corrections,
            ..self.clone()
        })
    }
}

/// Stack board point layouts into a padded grid indexed `[board][point]`.
///
/// Boards smaller than the widest one are padded with invalid entries so the
/// point axis of the observation tensor has a single length.
pub fn stack_boards(boards: &[BoardModel]) -> PointGrid {
    let max_points = boards.iter().map(BoardModel::num_points).max().unwrap_or(0);
    let mut data = vec![Pt3::origin(); boards.len() * max_points];
    let mut valid = vec![false; boards.len() * max_points];
    for (b, board) in boards.iter().enumerate() {
        for (p, point) in board.points().into_iter().enumerate() {
            data[b * max_points + p] = point;
            valid[b * max_points + p] = true;
        }
    }
    PointGrid::new(boards.len(), max_points, data, valid)
        .expect("stacked grid storage is consistent by construction")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn grid_is_row_major_with_spacing() {
        let board = BoardModel::new("b", 2, 3, 0.05).unwrap();
        let pts = board.points();
        assert_eq!(pts.len(), 6);
        assert_eq!(pts[0], Pt3::new(0.0, 0.0, 0.0));
        assert_eq!(pts[1], Pt3::new(0.05, 0.0, 0.0));
        assert_eq!(pts[3], Pt3::new(0.0, 0.05, 0.0));
    }

    #[test]
    fn corrections_shift_points() {
        let board = BoardModel::new("b", 1, 2, 0.1).unwrap();
        let mut v = board.param_vec();
        v[2] = 0.01; // z of first point
        let adjusted = board.with_param_vec(v.as_view()).unwrap();
        assert!((adjusted.points()[0].z - 0.01).abs() < 1e-12);
        assert_eq!(adjusted.points()[1], board.points()[1]);
    }

    #[test]
    fn stack_pads_smaller_boards() {
        let big = BoardModel::new("big", 2, 2, 0.1).unwrap();
        let small = BoardModel::new("small", 1, 2, 0.1).unwrap();
        let grid = stack_boards(&[big, small]);
        assert_eq!(grid.boards, 2);
        assert_eq!(grid.points, 4);
        assert!(grid.is_valid(0, 3));
        assert!(grid.is_valid(1, 1));
        assert!(!grid.is_valid(1, 2));
    }

    #[test]
    fn degenerate_board_is_rejected() {
        assert!(BoardModel::new("b", 0, 3, 0.1).is_err());
        assert!(BoardModel::new("b", 2, 2, 0.0).is_err());
    }
}
