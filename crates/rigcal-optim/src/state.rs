//! The calibration state aggregate.
//!
//! [`Calibration`] is an immutable value: every transformation (parameter
//! update, flag toggle, mask update) returns a new instance. Derived
//! tensors (validity, projections, errors) are recomputed on demand and
//! never shared between instances.

use crate::flags::OptimizeFlags;
use anyhow::{ensure, Result};
use rigcal_core::{
    reprojection_errors, stack_boards, BoardModel, CameraModel, MotionModel, ObservationTable,
    PointGrid, PoseSet, Real, TableShape,
};

/// Full calibration state: cameras, boards, detections, poses, rig motion,
/// optimization flags, and the current inlier mask.
///
/// `inlier_mask == None` means every structurally valid observation is an
/// inlier.
#[derive(Debug, Clone)]
pub struct Calibration {
    pub cameras: Vec<CameraModel>,
    pub boards: Vec<BoardModel>,
    pub point_table: ObservationTable,
    pub camera_poses: PoseSet,
    pub board_poses: PoseSet,
    pub motion: Box<dyn MotionModel>,
    pub optimize: OptimizeFlags,
    pub inlier_mask: Option<Vec<bool>>,
}

impl Calibration {
    /// Construct a state and validate every shape invariant.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        cameras: Vec<CameraModel>,
        boards: Vec<BoardModel>,
        point_table: ObservationTable,
        camera_poses: PoseSet,
        board_poses: PoseSet,
        motion: Box<dyn MotionModel>,
        optimize: OptimizeFlags,
        inlier_mask: Option<Vec<bool>>,
    ) -> Result<Self> {
        let shape = point_table.shape();
        ensure!(
            cameras.len() == shape.cameras,
            "camera count {} != observation table cameras {}",
            cameras.len(),
            shape.cameras
        );
        ensure!(
            camera_poses.len() == cameras.len(),
            "camera pose count {} != camera count {}",
            camera_poses.len(),
            cameras.len()
        );
        ensure!(
            boards.len() == shape.boards,
            "board count {} != observation table boards {}",
            boards.len(),
            shape.boards
        );
        ensure!(
            board_poses.len() == boards.len(),
            "board pose count {} != board count {}",
            board_poses.len(),
            boards.len()
        );
        ensure!(
            motion.num_frames() == shape.frames,
            "motion frame count {} != observation table frames {}",
            motion.num_frames(),
            shape.frames
        );
        let max_points = boards.iter().map(BoardModel::num_points).max().unwrap_or(0);
        ensure!(
            max_points == shape.points,
            "widest board has {} points, observation table expects {}",
            max_points,
            shape.points
        );
        if let Some(mask) = &inlier_mask {
            ensure!(
                mask.len() == shape.len(),
                "inlier mask length {} != table size {}",
                mask.len(),
                shape.len()
            );
        }
        Ok(Self {
            cameras,
            boards,
            point_table,
            camera_poses,
            board_poses,
            motion,
            optimize,
            inlier_mask,
        })
    }

    pub fn size(&self) -> TableShape {
        self.point_table.shape()
    }

    /// Stacked board geometry for projection.
    pub fn board_points(&self) -> PointGrid {
        stack_boards(&self.boards)
    }

    /// Structural validity per cell: camera pose AND rig frame AND board
    /// pose AND detection.
    pub fn valid(&self) -> Vec<bool> {
        let shape = self.size();
        let cam_valid = self.camera_poses.valid();
        let frame_valid = self.motion.valid_frames();
        let board_valid = self.board_poses.valid();
        let mut out = vec![false; shape.len()];
        for (flat, entry) in out.iter_mut().enumerate() {
            let (c, f, b, _) = shape.coords(flat);
            *entry =
                cam_valid[c] && frame_valid[f] && board_valid[b] && self.point_table.is_valid(flat);
        }
        out
    }

    /// Current inlier set: the mask if one is set, else structural validity.
    ///
    /// The mask is intersected with validity so it can never promote an
    /// invalid cell to inlier.
    pub fn inliers(&self) -> Vec<bool> {
        let valid = self.valid();
        match &self.inlier_mask {
            Some(mask) => mask.iter().zip(&valid).map(|(&m, &v)| m && v).collect(),
            None => valid,
        }
    }

    /// Predicted observations from the current parameters alone.
    pub fn projected(&self) -> ObservationTable {
        self.motion.project(
            &self.cameras,
            &self.camera_poses,
            &self.board_poses,
            &self.board_points(),
            None,
        )
    }

    /// Predicted observations anchored on the measured detections, which
    /// supply the intra-frame times for rolling-shutter motion. Only
    /// meaningful for detected cells.
    pub fn reprojected(&self) -> ObservationTable {
        self.motion.project(
            &self.cameras,
            &self.camera_poses,
            &self.board_poses,
            &self.board_points(),
            Some(&self.point_table),
        )
    }

    /// Per-cell reprojection errors over the full tensor, with the mask of
    /// cells where the error is defined (structurally valid and projectable).
    pub fn cell_errors(&self) -> Result<(Vec<Real>, Vec<bool>)> {
        let (errors, projectable) = reprojection_errors(&self.reprojected(), &self.point_table)?;
        let valid = self.valid();
        let defined = projectable
            .iter()
            .zip(&valid)
            .map(|(&p, &v)| p && v)
            .collect();
        Ok((errors, defined))
    }

    /// Reprojection errors of every valid cell, irrespective of the inlier
    /// mask. Basis for rejection thresholds and overall statistics.
    pub fn reprojection_error(&self) -> Result<Vec<Real>> {
        let (errors, valid) = self.cell_errors()?;
        Ok(collect_masked(&errors, &valid))
    }

    /// Reprojection errors of the current inlier cells only.
    pub fn reprojection_inliers(&self) -> Result<Vec<Real>> {
        let (errors, valid) = self.cell_errors()?;
        let inliers = self.inliers();
        let mask: Vec<bool> = inliers.iter().zip(&valid).map(|(&i, &v)| i && v).collect();
        Ok(collect_masked(&errors, &mask))
    }

    /// New state with the inlier mask replaced.
    pub fn with_inlier_mask(&self, mask: Option<Vec<bool>>) -> Result<Self> {
        if let Some(mask) = &mask {
            ensure!(
                mask.len() == self.size().len(),
                "inlier mask length {} != table size {}",
                mask.len(),
                self.size().len()
            );
        }
        Ok(Self {
            inlier_mask: mask,
            ..self.clone()
        })
    }

    /// New state with one optimization flag changed.
    ///
    /// The `rolling` flag is also handed to the motion model, which decides
    /// whether its rolling-shutter block joins the parameter vector.
    pub fn enable(&self, name: &str, on: bool) -> Result<Self> {
        let optimize = self.optimize.set(name, on)?;
        let motion = if name == "rolling" {
            self.motion.with_rolling(on)
        } else {
            self.motion.clone()
        };
        Ok(Self {
            optimize,
            motion,
            ..self.clone()
        })
    }
}

fn collect_masked(values: &[Real], mask: &[bool]) -> Vec<Real> {
    values
        .iter()
        .zip(mask)
        .filter_map(|(&v, &m)| m.then_some(v))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_fixtures::synthetic_calibration;
    use rigcal_core::{Iso3, StaticFrames, Vec2};

    #[test]
    fn construction_rejects_pose_count_mismatch() {
        let calib = synthetic_calibration();
        let bad_poses = PoseSet::all_valid(vec![Iso3::identity(); calib.cameras.len() + 1]);
        let res = Calibration::new(
            calib.cameras.clone(),
            calib.boards.clone(),
            calib.point_table.clone(),
            bad_poses,
            calib.board_poses.clone(),
            calib.motion.clone(),
            calib.optimize,
            None,
        );
        assert!(res.is_err());
    }

    #[test]
    fn construction_rejects_frame_count_mismatch() {
        let calib = synthetic_calibration();
        let bad_motion = StaticFrames::new(PoseSet::all_valid(vec![
            Iso3::identity();
            calib.size().frames + 2
        ]));
        let res = Calibration::new(
            calib.cameras.clone(),
            calib.boards.clone(),
            calib.point_table.clone(),
            calib.camera_poses.clone(),
            calib.board_poses.clone(),
            Box::new(bad_motion),
            calib.optimize,
            None,
        );
        assert!(res.is_err());
    }

    #[test]
    fn zero_noise_state_has_zero_error() {
        let calib = synthetic_calibration();
        let errors = calib.reprojection_error().unwrap();
        assert!(!errors.is_empty());
        assert!(errors.iter().all(|&e| e < 1e-9));
    }

    #[test]
    fn absent_mask_means_all_valid_are_inliers() {
        let calib = synthetic_calibration();
        assert_eq!(calib.inliers(), calib.valid());
    }

    #[test]
    fn mask_never_promotes_invalid_cells() {
        let calib = synthetic_calibration();
        let all_true = vec![true; calib.size().len()];
        let masked = calib.with_inlier_mask(Some(all_true)).unwrap();
        let valid = masked.valid();
        for (i, inlier) in masked.inliers().iter().enumerate() {
            assert!(!inlier || valid[i]);
        }
    }

    #[test]
    fn enable_unknown_flag_fails() {
        let calib = synthetic_calibration();
        assert!(calib.enable("distortion", true).is_err());
    }

    #[test]
    fn projected_matches_observations_for_synthetic_data() {
        let calib = synthetic_calibration();
        let projected = calib.projected();
        let shape = calib.size();
        for flat in 0..shape.len() {
            if calib.point_table.is_valid(flat) {
                let diff: Vec2 = projected.point(flat) - calib.point_table.point(flat);
                assert!(diff.norm() < 1e-9);
            }
        }
    }
}
