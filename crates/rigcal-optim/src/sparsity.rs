//! Jacobian sparsity pattern.
//!
//! Rows enumerate the x/y residual pairs of currently-inlier cells only,
//! compacted; columns follow the parameter layout. The pattern must cover
//! every true residual/parameter dependency: a missing entry corrupts the
//! finite-difference gradient, an extra entry is only wasted work.

use crate::layout::ParamLayout;
use crate::state::Calibration;
use rigcal_core::TableShape;
use std::ops::Range;

/// Residual dimensions per observation cell (x and y pixel errors).
pub const RESIDUALS_PER_CELL: usize = 2;

/// Maps inlier cells of the 4D tensor to compact residual row indices.
#[derive(Debug, Clone)]
pub struct IndexMapper {
    shape: TableShape,
    /// Residual pair index per flat cell, `None` for non-inlier cells.
    cell_rows: Vec<Option<usize>>,
    nrows: usize,
}

impl IndexMapper {
    pub fn new(inliers: &[bool], shape: TableShape) -> Self {
        debug_assert_eq!(inliers.len(), shape.len());
        let mut cell_rows = vec![None; shape.len()];
        let mut next = 0;
        for (flat, &inlier) in inliers.iter().enumerate() {
            if inlier {
                cell_rows[flat] = Some(next);
                next += 1;
            }
        }
        Self {
            shape,
            cell_rows,
            nrows: next * RESIDUALS_PER_CELL,
        }
    }

    pub fn num_rows(&self) -> usize {
        self.nrows
    }

    pub fn shape(&self) -> TableShape {
        self.shape
    }

    /// Compact flat cell indices of all inlier cells, in row order.
    pub fn inlier_cells(&self) -> Vec<usize> {
        let mut cells: Vec<(usize, usize)> = self
            .cell_rows
            .iter()
            .enumerate()
            .filter_map(|(flat, row)| row.map(|r| (r, flat)))
            .collect();
        cells.sort_unstable();
        cells.into_iter().map(|(_, flat)| flat).collect()
    }

    /// Both residual rows of every inlier cell matching `pred` on its
    /// `(camera, frame, board, point)` coordinates.
    pub fn rows_matching(
        &self,
        pred: impl Fn(usize, usize, usize, usize) -> bool,
    ) -> Vec<usize> {
        let mut rows = Vec::new();
        for (flat, cell_row) in self.cell_rows.iter().enumerate() {
            if let Some(r) = cell_row {
                let (c, f, b, p) = self.shape.coords(flat);
                if pred(c, f, b, p) {
                    rows.push(r * RESIDUALS_PER_CELL);
                    rows.push(r * RESIDUALS_PER_CELL + 1);
                }
            }
        }
        rows
    }

    /// Rows of every inlier cell observed by camera `cam`.
    pub fn rows_for_camera(&self, cam: usize) -> Vec<usize> {
        self.rows_matching(|c, _, _, _| c == cam)
    }

    /// Rows of every inlier cell in rig frame `frame`.
    pub fn rows_for_frame(&self, frame: usize) -> Vec<usize> {
        self.rows_matching(|_, f, _, _| f == frame)
    }

    /// Rows of every inlier cell on board `board`.
    pub fn rows_for_board(&self, board: usize) -> Vec<usize> {
        self.rows_matching(|_, _, b, _| b == board)
    }
}

/// One incidence entry: a contiguous column range and the rows it touches.
#[derive(Debug, Clone)]
pub struct BlockMapping {
    pub cols: Range<usize>,
    pub rows: Vec<usize>,
}

/// Boolean residual-by-parameter incidence, stored as per-column row lists
/// for the finite-difference Jacobian.
#[derive(Debug, Clone)]
pub struct SparsityPattern {
    nrows: usize,
    ncols: usize,
    rows_by_col: Vec<Vec<usize>>,
}

impl SparsityPattern {
    pub fn from_mappings(nrows: usize, ncols: usize, mappings: &[BlockMapping]) -> Self {
        let mut rows_by_col: Vec<Vec<usize>> = vec![Vec::new(); ncols];
        for mapping in mappings {
            for col in mapping.cols.clone() {
                rows_by_col[col].extend_from_slice(&mapping.rows);
            }
        }
        for rows in &mut rows_by_col {
            rows.sort_unstable();
            rows.dedup();
        }
        Self {
            nrows,
            ncols,
            rows_by_col,
        }
    }

    pub fn num_rows(&self) -> usize {
        self.nrows
    }

    pub fn num_cols(&self) -> usize {
        self.ncols
    }

    /// Rows that parameter column `col` can influence.
    pub fn col_rows(&self, col: usize) -> &[usize] {
        &self.rows_by_col[col]
    }

    pub fn is_set(&self, row: usize, col: usize) -> bool {
        self.rows_by_col[col].binary_search(&row).is_ok()
    }

    /// Number of true entries.
    pub fn nnz(&self) -> usize {
        self.rows_by_col.iter().map(Vec::len).sum()
    }
}

/// Build the incidence pattern for the current inlier set and layout.
pub fn build_pattern(calib: &Calibration, layout: &ParamLayout) -> SparsityPattern {
    let mapper = IndexMapper::new(&calib.inliers(), calib.size());
    let mut mappings = Vec::new();

    if let Some(block) = layout.block("camera_poses") {
        for cam in 0..calib.camera_poses.len() {
            let start = block.offset + cam * rigcal_core::rtvec::POSE_LEN;
            mappings.push(BlockMapping {
                cols: start..start + rigcal_core::rtvec::POSE_LEN,
                rows: mapper.rows_for_camera(cam),
            });
        }
    }

    if let Some(block) = layout.block("board_poses") {
        for board in 0..calib.board_poses.len() {
            let start = block.offset + board * rigcal_core::rtvec::POSE_LEN;
            mappings.push(BlockMapping {
                cols: start..start + rigcal_core::rtvec::POSE_LEN,
                rows: mapper.rows_for_board(board),
            });
        }
    }

    // Motion coverage is delegated: the model declares which frame each of
    // its parameter spans influences.
    if let Some(block) = layout.block("motion") {
        for span in calib.motion.sparsity() {
            let start = block.offset + span.offset;
            mappings.push(BlockMapping {
                cols: start..start + span.len,
                rows: mapper.rows_for_frame(span.frame),
            });
        }
    }

    if calib.optimize.intrinsics {
        for cam in 0..calib.cameras.len() {
            if let Some(block) = layout.block(&format!("camera/{}", cam)) {
                mappings.push(BlockMapping {
                    cols: block.offset..block.offset + block.len,
                    rows: mapper.rows_for_camera(cam),
                });
            }
        }
    }

    if calib.optimize.board {
        for (b, board) in calib.boards.iter().enumerate() {
            if let Some(block) = layout.block(&format!("board/{}", b)) {
                for point in 0..board.num_points() {
                    let start = block.offset + point * 3;
                    mappings.push(BlockMapping {
                        cols: start..start + 3,
                        rows: mapper.rows_matching(|_, _, bb, pp| bb == b && pp == point),
                    });
                }
            }
        }
    }

    SparsityPattern::from_mappings(mapper.num_rows(), layout.total(), &mappings)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layout::ParamLayout;
    use crate::test_fixtures::{synthetic_calibration, synthetic_rolling_calibration};

    #[test]
    fn mapper_rows_are_compact_and_paired() {
        let calib = synthetic_calibration();
        let mapper = IndexMapper::new(&calib.inliers(), calib.size());
        let n_inliers = calib.inliers().iter().filter(|&&v| v).count();
        assert_eq!(mapper.num_rows(), n_inliers * RESIDUALS_PER_CELL);
        assert_eq!(mapper.inlier_cells().len(), n_inliers);

        let all_rows = mapper.rows_matching(|_, _, _, _| true);
        assert_eq!(all_rows.len(), mapper.num_rows());
    }

    #[test]
    fn camera_pose_columns_cover_only_their_camera() {
        let calib = synthetic_calibration();
        let layout = ParamLayout::of(&calib);
        let pattern = build_pattern(&calib, &layout);
        let mapper = IndexMapper::new(&calib.inliers(), calib.size());

        let cam0_rows = mapper.rows_for_camera(0);
        let cam1_rows = mapper.rows_for_camera(1);
        // First camera pose column covers exactly camera 0 rows.
        for &row in &cam0_rows {
            assert!(pattern.is_set(row, 0));
        }
        for &row in &cam1_rows {
            assert!(!pattern.is_set(row, 0));
        }
    }

    #[test]
    fn enabled_participating_groups_have_no_zero_column() {
        // Rolling-shutter scene so the motion block includes the extended
        // columns once the flag is on.
        let calib = synthetic_rolling_calibration()
            .enable("intrinsics", true)
            .unwrap()
            .enable("board", true)
            .unwrap()
            .enable("rolling", true)
            .unwrap();
        let layout = ParamLayout::of(&calib);
        let pattern = build_pattern(&calib, &layout);
        assert_eq!(pattern.num_cols(), layout.total());
        for col in 0..pattern.num_cols() {
            assert!(
                !pattern.col_rows(col).is_empty(),
                "column {} has no incident residual",
                col
            );
        }
    }

    #[test]
    fn pattern_shrinks_with_inlier_mask() {
        let calib = synthetic_calibration();
        let layout = ParamLayout::of(&calib);
        let full = build_pattern(&calib, &layout);

        let mut mask = calib.valid();
        let first_valid = mask.iter().position(|&v| v).unwrap();
        mask[first_valid] = false;
        let masked_calib = calib.with_inlier_mask(Some(mask)).unwrap();
        let masked = build_pattern(&masked_calib, &layout);

        assert_eq!(masked.num_rows(), full.num_rows() - RESIDUALS_PER_CELL);
        assert!(masked.nnz() < full.nnz());
    }
}
