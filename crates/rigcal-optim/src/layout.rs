//! Flat parameter vector layout and (de)serialization.
//!
//! The vector is an explicit ordered list of named blocks whose presence and
//! length are fixed once by the entity counts and optimization flags:
//! camera poses, board poses, motion, then per-camera intrinsics (iff
//! `intrinsics`) and per-board corrections (iff `board`). Disabled groups
//! are carried over unchanged on decode.

use crate::state::Calibration;
use anyhow::{ensure, Result};
use nalgebra::DVector;
use rigcal_core::{rtvec, Real, CAMERA_PARAM_LEN};

/// One named contiguous block of the flat vector.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParamBlock {
    pub name: String,
    pub offset: usize,
    pub len: usize,
}

/// Ordered block table for one flag configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParamLayout {
    blocks: Vec<ParamBlock>,
    total: usize,
}

impl ParamLayout {
    /// Derive the layout from entity counts and flags.
    pub fn of(calib: &Calibration) -> Self {
        let mut blocks = Vec::new();
        let mut offset = 0;
        let mut push = |name: String, len: usize, offset: &mut usize| {
            blocks.push(ParamBlock {
                name,
                offset: *offset,
                len,
            });
            *offset += len;
        };

        push(
            "camera_poses".into(),
            calib.camera_poses.len() * rtvec::POSE_LEN,
            &mut offset,
        );
        push(
            "board_poses".into(),
            calib.board_poses.len() * rtvec::POSE_LEN,
            &mut offset,
        );
        push("motion".into(), calib.motion.num_params(), &mut offset);

        if calib.optimize.intrinsics {
            for i in 0..calib.cameras.len() {
                push(format!("camera/{}", i), CAMERA_PARAM_LEN, &mut offset);
            }
        }
        if calib.optimize.board {
            for (b, board) in calib.boards.iter().enumerate() {
                push(format!("board/{}", b), board.num_points() * 3, &mut offset);
            }
        }

        Self {
            blocks,
            total: offset,
        }
    }

    /// Total vector length.
    pub fn total(&self) -> usize {
        self.total
    }

    pub fn blocks(&self) -> &[ParamBlock] {
        &self.blocks
    }

    /// Look up a block by name.
    pub fn block(&self, name: &str) -> Option<&ParamBlock> {
        self.blocks.iter().find(|b| b.name == name)
    }

    fn expect_block(&self, name: &str) -> &ParamBlock {
        self.block(name)
            .unwrap_or_else(|| panic!("layout is missing block {:?}", name))
    }

    /// Concatenate the state's parameters into a flat vector.
    pub fn encode(&self, calib: &Calibration) -> DVector<Real> {
        let mut out = DVector::zeros(self.total);

        let block = self.expect_block("camera_poses");
        out.rows_mut(block.offset, block.len)
            .copy_from(&calib.camera_poses.param_vec());

        let block = self.expect_block("board_poses");
        out.rows_mut(block.offset, block.len)
            .copy_from(&calib.board_poses.param_vec());

        let block = self.expect_block("motion");
        out.rows_mut(block.offset, block.len)
            .copy_from(&calib.motion.param_vec());

        if calib.optimize.intrinsics {
            for (i, camera) in calib.cameras.iter().enumerate() {
                let block = self.expect_block(&format!("camera/{}", i));
                out.rows_mut(block.offset, block.len)
                    .copy_from(&camera.param_vec());
            }
        }
        if calib.optimize.board {
            for (b, board) in calib.boards.iter().enumerate() {
                let block = self.expect_block(&format!("board/{}", b));
                out.rows_mut(block.offset, block.len)
                    .copy_from(&board.param_vec());
            }
        }

        out
    }

    /// Unpack a flat vector into a new state.
    ///
    /// Groups disabled by the flags are carried over from `calib`
    /// unchanged. The layout must have been derived from a state with the
    /// same entity counts and flags.
    pub fn decode(&self, calib: &Calibration, x: &DVector<Real>) -> Result<Calibration> {
        ensure!(
            x.len() == self.total,
            "parameter vector length {} != layout total {}",
            x.len(),
            self.total
        );

        let block = self.expect_block("camera_poses");
        let camera_poses = calib
            .camera_poses
            .with_param_vec(x.rows(block.offset, block.len))?;

        let block = self.expect_block("board_poses");
        let board_poses = calib
            .board_poses
            .with_param_vec(x.rows(block.offset, block.len))?;

        let block = self.expect_block("motion");
        let motion = calib
            .motion
            .with_param_vec(x.rows(block.offset, block.len))?;

        let cameras = if calib.optimize.intrinsics {
            calib
                .cameras
                .iter()
                .enumerate()
                .map(|(i, camera)| {
                    let block = self.expect_block(&format!("camera/{}", i));
                    camera.with_param_vec(x.rows(block.offset, block.len))
                })
                .collect::<Result<Vec<_>>>()?
        } else {
            calib.cameras.clone()
        };

        let boards = if calib.optimize.board {
            calib
                .boards
                .iter()
                .enumerate()
                .map(|(b, board)| {
                    let block = self.expect_block(&format!("board/{}", b));
                    board.with_param_vec(x.rows(block.offset, block.len))
                })
                .collect::<Result<Vec<_>>>()?
        } else {
            calib.boards.clone()
        };

        Ok(Calibration {
            cameras,
            boards,
            camera_poses,
            board_poses,
            motion,
            ..calib.clone()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_fixtures::{synthetic_calibration, synthetic_rolling_calibration};

    fn flag_configs() -> Vec<(bool, bool, bool)> {
        let mut out = Vec::new();
        for intrinsics in [false, true] {
            for board in [false, true] {
                for rolling in [false, true] {
                    out.push((intrinsics, board, rolling));
                }
            }
        }
        out
    }

    #[test]
    fn vector_length_is_deterministic_per_flags() {
        let base = synthetic_calibration();
        for (intrinsics, board, rolling) in flag_configs() {
            let calib = base
                .enable("intrinsics", intrinsics)
                .unwrap()
                .enable("board", board)
                .unwrap()
                .enable("rolling", rolling)
                .unwrap();
            let layout = ParamLayout::of(&calib);

            let mut expected = (calib.cameras.len() + calib.boards.len()) * rtvec::POSE_LEN
                + calib.motion.num_params();
            if intrinsics {
                expected += calib.cameras.len() * CAMERA_PARAM_LEN;
            }
            if board {
                expected += calib.boards.iter().map(|b| b.num_points() * 3).sum::<usize>();
            }
            assert_eq!(layout.total(), expected);
            assert_eq!(layout.encode(&calib).len(), expected);
        }
    }

    #[test]
    fn decode_encode_round_trip_all_flag_configs() {
        for base in [synthetic_calibration(), synthetic_rolling_calibration()] {
            round_trip_for_base(&base);
        }
    }

    fn round_trip_for_base(base: &Calibration) {
        for (intrinsics, board, rolling) in flag_configs() {
            let calib = base
                .enable("intrinsics", intrinsics)
                .unwrap()
                .enable("board", board)
                .unwrap()
                .enable("rolling", rolling)
                .unwrap();
            let layout = ParamLayout::of(&calib);
            let x = layout.encode(&calib);
            let decoded = layout.decode(&calib, &x).unwrap();

            for (a, b) in calib
                .camera_poses
                .poses()
                .iter()
                .zip(decoded.camera_poses.poses())
            {
                assert!((a.to_homogeneous() - b.to_homogeneous()).norm() < 1e-12);
            }
            for (a, b) in calib
                .board_poses
                .poses()
                .iter()
                .zip(decoded.board_poses.poses())
            {
                assert!((a.to_homogeneous() - b.to_homogeneous()).norm() < 1e-12);
            }
            assert!((calib.motion.param_vec() - decoded.motion.param_vec()).norm() < 1e-12);
            for (a, b) in calib.cameras.iter().zip(&decoded.cameras) {
                assert!((a.param_vec() - b.param_vec()).norm() < 1e-12);
            }
            for (a, b) in calib.boards.iter().zip(&decoded.boards) {
                assert!((a.param_vec() - b.param_vec()).norm() < 1e-12);
            }

            // Re-encoding the decoded state reproduces the vector exactly.
            let x2 = layout.encode(&decoded);
            assert!((x - x2).norm() < 1e-12);
        }
    }

    #[test]
    fn disabled_groups_are_carried_over() {
        let calib = synthetic_calibration(); // all flags off
        let layout = ParamLayout::of(&calib);
        let mut x = layout.encode(&calib);
        // Perturb the pose part; cameras and boards must survive untouched.
        x[0] += 0.05;
        let decoded = layout.decode(&calib, &x).unwrap();
        assert_eq!(decoded.cameras, calib.cameras);
        assert_eq!(decoded.boards, calib.boards);
    }

    #[test]
    fn decode_rejects_wrong_length() {
        let calib = synthetic_calibration();
        let layout = ParamLayout::of(&calib);
        let x = DVector::zeros(layout.total() + 1);
        assert!(layout.decode(&calib, &x).is_err());
    }
}
