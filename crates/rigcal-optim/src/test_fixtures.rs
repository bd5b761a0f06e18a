//! Synthetic zero-noise fixtures shared by unit tests.

use crate::flags::OptimizeFlags;
use crate::state::Calibration;
use nalgebra::{Rotation3, Translation3};
use rigcal_core::{
    stack_boards, BoardModel, CameraModel, Iso3, MotionModel, PoseSet, RollingFrames, StaticFrames,
};

fn cameras() -> Vec<CameraModel> {
    vec![
        CameraModel::pinhole(800.0, 780.0, 640.0, 360.0, [1280, 720]),
        CameraModel::pinhole(810.0, 790.0, 630.0, 350.0, [1280, 720]),
    ]
}

fn camera_poses() -> PoseSet {
    PoseSet::all_valid(vec![
        Iso3::identity(),
        Iso3::from_parts(
            Translation3::new(0.12, 0.0, 0.0),
            Rotation3::from_euler_angles(0.0, 0.02, 0.0).into(),
        ),
    ])
}

fn board_poses() -> PoseSet {
    PoseSet::all_valid(vec![Iso3::from_parts(
        Translation3::new(-0.1, -0.08, 1.0),
        Rotation3::from_euler_angles(0.05, -0.04, 0.02).into(),
    )])
}

fn rig_frames() -> PoseSet {
    PoseSet::all_valid(vec![
        Iso3::identity(),
        Iso3::from_parts(
            Translation3::new(0.02, 0.01, 0.05),
            Rotation3::from_euler_angles(0.03, 0.0, -0.02).into(),
        ),
        Iso3::from_parts(
            Translation3::new(-0.03, 0.02, 0.1),
            Rotation3::from_euler_angles(-0.02, 0.05, 0.01).into(),
        ),
    ])
}

fn build(motion: Box<dyn MotionModel>) -> Calibration {
    let cameras = cameras();
    let camera_poses = camera_poses();
    let board_poses = board_poses();
    let boards = vec![BoardModel::new("board", 3, 4, 0.05).unwrap()];
    let grid = stack_boards(&boards);
    let table = motion.project(&cameras, &camera_poses, &board_poses, &grid, None);
    Calibration::new(
        cameras,
        boards,
        table,
        camera_poses,
        board_poses,
        motion,
        OptimizeFlags::default(),
        None,
    )
    .unwrap()
}

/// 2 cameras x 3 frames x 1 board, zero-noise, static rig, all flags off.
pub fn synthetic_calibration() -> Calibration {
    build(Box::new(StaticFrames::new(rig_frames())))
}

/// Same scene with a rolling-shutter motion model (no intra-frame motion).
pub fn synthetic_rolling_calibration() -> Calibration {
    build(Box::new(RollingFrames::from_static(rig_frames())))
}
