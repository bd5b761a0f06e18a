//! Core geometry and data types for `rigcal`.
//!
//! This crate contains:
//! - linear algebra type aliases (`Real`, `Vec2`, `Pt3`, ...),
//! - the 6-parameter pose encoding used for optimization (`rtvec`),
//! - concrete camera and board models with flat parameter vectors,
//! - pose sets with per-entry validity,
//! - the 4D observation table indexed `[camera, frame, board, point]`,
//! - rig motion models (static and rolling-shutter).
//!
//! Projection pipeline:
//! `pixel = intrinsics ∘ distortion ∘ perspective(camera_pose * rig_pose * board_pose * point)`

/// Linear algebra type aliases.
pub mod math;
/// Rotation-translation vector pose encoding.
pub mod rtvec;
/// Pinhole camera with Brown-Conrady distortion.
pub mod camera;
/// Planar board with adjustable point corrections.
pub mod board;
/// Pose sequences with validity flags.
pub mod pose;
/// 4D observation tables and board point grids.
pub mod table;
/// Rig motion models.
pub mod motion;

pub use board::{stack_boards, BoardModel};
pub use camera::{CameraModel, CAMERA_PARAM_LEN};
pub use math::*;
pub use motion::{FrameSpan, MotionModel, RollingFrames, StaticFrames};
pub use pose::PoseSet;
pub use table::{reprojection_errors, ObservationTable, PointGrid, TableShape};
