//! Observation tables.
//!
//! Detections live in an immutable 4D tensor indexed
//! `[camera, frame, board, point]`, stored flat with a [`TableShape`] doing
//! the index arithmetic. Board geometry stacks into a 2D [`PointGrid`]
//! padded to the largest board.

use crate::math::{Pt3, Real, Vec2};
use anyhow::{ensure, Result};

/// Prefix dimensions of the observation tensor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TableShape {
    pub cameras: usize,
    pub frames: usize,
    pub boards: usize,
    pub points: usize,
}

impl TableShape {
    /// Total number of cells.
    pub fn len(&self) -> usize {
        self.cameras * self.frames * self.boards * self.points
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Flat index of `(camera, frame, board, point)`.
    pub fn index(&self, cam: usize, frame: usize, board: usize, point: usize) -> usize {
        debug_assert!(cam < self.cameras && frame < self.frames);
        debug_assert!(board < self.boards && point < self.points);
        ((cam * self.frames + frame) * self.boards + board) * self.points + point
    }

    /// Inverse of [`TableShape::index`].
    pub fn coords(&self, flat: usize) -> (usize, usize, usize, usize) {
        let point = flat % self.points;
        let rest = flat / self.points;
        let board = rest % self.boards;
        let rest = rest / self.boards;
        let frame = rest % self.frames;
        let cam = rest / self.frames;
        (cam, frame, board, point)
    }
}

/// Immutable 4D table of 2D points with per-cell flags.
///
/// For measured data the flag means "detected"; for predicted data it means
/// "projectable" (board point exists and lies in front of the camera).
#[derive(Debug, Clone, PartialEq)]
pub struct ObservationTable {
    shape: TableShape,
    points: Vec<Vec2>,
    valid: Vec<bool>,
}

impl ObservationTable {
    pub fn new(shape: TableShape, points: Vec<Vec2>, valid: Vec<bool>) -> Result<Self> {
        ensure!(
            points.len() == shape.len() && valid.len() == shape.len(),
            "table storage {} / {} does not match shape size {}",
            points.len(),
            valid.len(),
            shape.len()
        );
        Ok(Self {
            shape,
            points,
            valid,
        })
    }

    /// Build a table by evaluating `f` at every cell.
    pub fn from_fn(
        shape: TableShape,
        mut f: impl FnMut(usize, usize, usize, usize) -> (Vec2, bool),
    ) -> Self {
        let mut points = Vec::with_capacity(shape.len());
        let mut valid = Vec::with_capacity(shape.len());
        for cam in 0..shape.cameras {
            for frame in 0..shape.frames {
                for board in 0..shape.boards {
                    for point in 0..shape.points {
                        let (p, v) = f(cam, frame, board, point);
                        points.push(p);
                        valid.push(v);
                    }
                }
            }
        }
        Self {
            shape,
            points,
            valid,
        }
    }

    pub fn shape(&self) -> TableShape {
        self.shape
    }

    pub fn point(&self, flat: usize) -> Vec2 {
        self.points[flat]
    }

    pub fn is_valid(&self, flat: usize) -> bool {
        self.valid[flat]
    }

    pub fn valid(&self) -> &[bool] {
        &self.valid
    }
}

/// Stacked board geometry: one row of 3D points per board, padded to the
/// widest board with invalid entries.
#[derive(Debug, Clone)]
pub struct PointGrid {
    pub boards: usize,
    pub points: usize,
    data: Vec<Pt3>,
    valid: Vec<bool>,
}

impl PointGrid {
    pub fn new(boards: usize, points: usize, data: Vec<Pt3>, valid: Vec<bool>) -> Result<Self> {
        ensure!(
            data.len() == boards * points && valid.len() == boards * points,
            "grid storage {} / {} does not match {}x{}",
            data.len(),
            valid.len(),
            boards,
            points
        );
        Ok(Self {
            boards,
            points,
            data,
            valid,
        })
    }

    pub fn point(&self, board: usize, point: usize) -> Pt3 {
        self.data[board * self.points + point]
    }

    pub fn is_valid(&self, board: usize, point: usize) -> bool {
        self.valid[board * self.points + point]
    }
}

/// Per-cell L2 reprojection errors with a combined validity mask.
///
/// A cell is valid when both tables mark it valid; invalid cells carry a
/// zero error and must be ignored by callers.
pub fn reprojection_errors(
    predicted: &ObservationTable,
    observed: &ObservationTable,
) -> Result<(Vec<Real>, Vec<bool>)> {
    ensure!(
        predicted.shape() == observed.shape(),
        "table shapes differ: {:?} vs {:?}",
        predicted.shape(),
        observed.shape()
    );
    let n = predicted.shape().len();
    let mut errors = vec![0.0; n];
    let mut valid = vec![false; n];
    for i in 0..n {
        if predicted.is_valid(i) && observed.is_valid(i) {
            errors[i] = (predicted.point(i) - observed.point(i)).norm();
            valid[i] = true;
        }
    }
    Ok((errors, valid))
}
