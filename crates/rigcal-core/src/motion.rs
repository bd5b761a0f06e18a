//! Rig motion models.
//!
//! A motion model owns the per-frame rig poses and knows how to project
//! board points into every camera for every frame. It also owns its slice
//! of the flat optimization vector and declares which frames each of its
//! parameter spans influences, so the sparsity builder can delegate to it.
//!
//! Transform chain per cell:
//! `p_cam = camera_pose * rig_pose(frame, t) * board_pose * p_board`
//! where `t` is the intra-frame time fraction (rolling shutter only).

use crate::camera::CameraModel;
use crate::math::{Real, Vec2};
use crate::pose::PoseSet;
use crate::rtvec;
use crate::table::{ObservationTable, PointGrid, TableShape};
use anyhow::Result;
use nalgebra::{DVector, DVectorView};

/// A contiguous span of motion-block columns and the rig frame it influences.
///
/// Offsets are relative to the start of the motion parameter block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameSpan {
    pub offset: usize,
    pub len: usize,
    pub frame: usize,
}

/// Rig motion contract consumed by the calibration core.
pub trait MotionModel: std::fmt::Debug {
    /// Number of rig frames.
    fn num_frames(&self) -> usize;

    /// Per-frame validity mask.
    fn valid_frames(&self) -> &[bool];

    /// Length of this model's parameter block.
    fn num_params(&self) -> usize;

    /// Flat parameter vector of length [`MotionModel::num_params`].
    fn param_vec(&self) -> DVector<Real>;

    /// New model with parameters replaced from a flat vector.
    fn with_param_vec(&self, v: DVectorView<'_, Real>) -> Result<Box<dyn MotionModel>>;

    /// Hand the `rolling` optimization flag to the model.
    ///
    /// Models without a rolling-shutter block return themselves unchanged;
    /// toggling may change [`MotionModel::num_params`].
    fn with_rolling(&self, enabled: bool) -> Box<dyn MotionModel>;

    /// Predict the observation table for every `(camera, frame, board, point)`.
    ///
    /// `observed` supplies measured detections whose positions anchor the
    /// intra-frame interpolation time; models without intra-frame motion
    /// ignore it. Cells are invalid when the board point does not exist or
    /// projects behind the camera.
    fn project(
        &self,
        cameras: &[CameraModel],
        camera_poses: &PoseSet,
        board_poses: &PoseSet,
        board_points: &PointGrid,
        observed: Option<&ObservationTable>,
    ) -> ObservationTable;

    /// Column/frame incidence of this model's parameter block.
    fn sparsity(&self) -> Vec<FrameSpan>;

    fn clone_box(&self) -> Box<dyn MotionModel>;
}

impl Clone for Box<dyn MotionModel> {
    fn clone(&self) -> Self {
        self.clone_box()
    }
}

fn project_cell(
    camera: &CameraModel,
    camera_pose: &crate::math::Iso3,
    rig_pose: &crate::math::Iso3,
    board_pose: &crate::math::Iso3,
    board_points: &PointGrid,
    board: usize,
    point: usize,
) -> (Vec2, bool) {
    if !board_points.is_valid(board, point) {
        return (Vec2::zeros(), false);
    }
    let p_cam = camera_pose * rig_pose * board_pose * board_points.point(board, point);
    match camera.project(&p_cam) {
        Some(px) => (px, true),
        None => (Vec2::zeros(), false),
    }
}

/// Static rig: one pose per frame, no intra-frame motion.
#[derive(Debug, Clone)]
pub struct StaticFrames {
    frames: PoseSet,
}

impl StaticFrames {
    pub fn new(frames: PoseSet) -> Self {
        Self { frames }
    }

    pub fn frames(&self) -> &PoseSet {
        &self.frames
    }
}

impl MotionModel for StaticFrames {
    fn num_frames(&self) -> usize {
        self.frames.len()
    }

    fn valid_frames(&self) -> &[bool] {
        self.frames.valid()
    }

    fn num_params(&self) -> usize {
        self.frames.len() * rtvec::POSE_LEN
    }

    fn param_vec(&self) -> DVector<Real> {
        self.frames.param_vec()
    }

    fn with_param_vec(&self, v: DVectorView<'_, Real>) -> Result<Box<dyn MotionModel>> {
        Ok(Box::new(Self {
            frames: self.frames.with_param_vec(v)?,
        }))
    }

    fn with_rolling(&self, _enabled: bool) -> Box<dyn MotionModel> {
        self.clone_box()
    }

    fn project(
        &self,
        cameras: &[CameraModel],
        camera_poses: &PoseSet,
        board_poses: &PoseSet,
        board_points: &PointGrid,
        _observed: Option<&ObservationTable>,
    ) -> ObservationTable {
        let shape = TableShape {
            cameras: cameras.len(),
            frames: self.frames.len(),
            boards: board_poses.len(),
            points: board_points.points,
        };
        ObservationTable::from_fn(shape, |cam, frame, board, point| {
            project_cell(
                &cameras[cam],
                camera_poses.pose(cam),
                self.frames.pose(frame),
                board_poses.pose(board),
                board_points,
                board,
                point,
            )
        })
    }

    fn sparsity(&self) -> Vec<FrameSpan> {
        (0..self.frames.len())
            .map(|frame| FrameSpan {
                offset: frame * rtvec::POSE_LEN,
                len: rtvec::POSE_LEN,
                frame,
            })
            .collect()
    }

    fn clone_box(&self) -> Box<dyn MotionModel> {
        Box::new(self.clone())
    }
}

/// Rolling-shutter rig: start and end pose per frame.
///
/// The rig pose at a cell is interpolated between the frame's start and end
/// poses at time `t = y / image_height` taken from the measured detection
/// (scanline time), or `t = 0.5` when no measurement is supplied.
///
/// End poses join the parameter vector only while the `rolling` flag is on;
/// otherwise they are carried but frozen.
#[derive(Debug, Clone)]
pub struct RollingFrames {
    start: PoseSet,
    end: PoseSet,
    optimize_motion: bool,
}

impl RollingFrames {
    pub fn new(start: PoseSet, end: PoseSet) -> Result<Self> {
        anyhow::ensure!(
            start.len() == end.len(),
            "start/end frame counts differ: {} vs {}",
            start.len(),
            end.len()
        );
        Ok(Self {
            start,
            end,
            optimize_motion: false,
        })
    }

    /// Rolling model with no initial intra-frame motion.
    pub fn from_static(frames: PoseSet) -> Self {
        Self {
            end: frames.clone(),
            start: frames,
            optimize_motion: false,
        }
    }

    pub fn start(&self) -> &PoseSet {
        &self.start
    }

    pub fn end(&self) -> &PoseSet {
        &self.end
    }

    fn time_fraction(
        camera: &CameraModel,
        observed: Option<&ObservationTable>,
        flat: usize,
    ) -> Real {
        match observed {
            Some(table) if table.is_valid(flat) => {
                let height = camera.image_size[1] as Real;
                (table.point(flat).y / height).clamp(0.0, 1.0)
            }
            _ => 0.5,
        }
    }
}

impl MotionModel for RollingFrames {
    fn num_frames(&self) -> usize {
        self.start.len()
    }

    fn valid_frames(&self) -> &[bool] {
        self.start.valid()
    }

    fn num_params(&self) -> usize {
        let base = self.start.len() * rtvec::POSE_LEN;
        if self.optimize_motion {
            base * 2
        } else {
            base
        }
    }

    fn param_vec(&self) -> DVector<Real> {
        let start = self.start.param_vec();
        if !self.optimize_motion {
            return start;
        }
        let end = self.end.param_vec();
        let mut out = Vec::with_capacity(start.len() + end.len());
        out.extend_from_slice(start.as_slice());
        out.extend_from_slice(end.as_slice());
        DVector::from_vec(out)
    }

    fn with_param_vec(&self, v: DVectorView<'_, Real>) -> Result<Box<dyn MotionModel>> {
        anyhow::ensure!(
            v.len() == self.num_params(),
            "expected motion block of length {}, got {}",
            self.num_params(),
            v.len()
        );
        let pose_len = self.start.len() * rtvec::POSE_LEN;
        let start = self.start.with_param_vec(v.rows(0, pose_len))?;
        let end = if self.optimize_motion {
            self.end.with_param_vec(v.rows(pose_len, pose_len))?
        } else {
            self.end.clone()
        };
        Ok(Box::new(Self {
            start,
            end,
            optimize_motion: self.optimize_motion,
        }))
    }

    fn with_rolling(&self, enabled: bool) -> Box<dyn MotionModel> {
        Box::new(Self {
            start: self.start.clone(),
            end: self.end.clone(),
            optimize_motion: enabled,
        })
    }

    fn project(
        &self,
        cameras: &[CameraModel],
        camera_poses: &PoseSet,
        board_poses: &PoseSet,
        board_points: &PointGrid,
        observed: Option<&ObservationTable>,
    ) -> ObservationTable {
        let shape = TableShape {
            cameras: cameras.len(),
            frames: self.start.len(),
            boards: board_poses.len(),
            points: board_points.points,
        };
        ObservationTable::from_fn(shape, |cam, frame, board, point| {
            let flat = shape.index(cam, frame, board, point);
            let t = Self::time_fraction(&cameras[cam], observed, flat);
            let rig_pose = rtvec::interpolate(self.start.pose(frame), self.end.pose(frame), t);
            project_cell(
                &cameras[cam],
                camera_poses.pose(cam),
                &rig_pose,
                board_poses.pose(board),
                board_points,
                board,
                point,
            )
        })
    }

    fn sparsity(&self) -> Vec<FrameSpan> {
        let n = self.start.len();
        let mut spans: Vec<FrameSpan> = (0..n)
            .map(|frame| FrameSpan {
                offset: frame * rtvec::POSE_LEN,
                len: rtvec::POSE_LEN,
                frame,
            })
            .collect();
        if self.optimize_motion {
            spans.extend((0..n).map(|frame| FrameSpan {
                offset: (n + frame) * rtvec::POSE_LEN,
                len: rtvec::POSE_LEN,
                frame,
            }));
        }
        spans
    }

    fn clone_box(&self) -> Box<dyn MotionModel> {
        Box::new(self.clone())
    }
}
