//! Ordered pose sequences with per-entry validity.

use crate::math::{Iso3, Real};
use crate::rtvec;
use anyhow::{ensure, Result};
use nalgebra::{DVector, DVectorView};

/// A sequence of rigid transforms (camera extrinsics, board poses, or rig
/// frame poses) where individual entries may be invalid, e.g. a board that
/// was never initialized from detections.
#[derive(Debug, Clone, PartialEq)]
pub struct PoseSet {
    poses: Vec<Iso3>,
    valid: Vec<bool>,
}

impl PoseSet {
    pub fn new(poses: Vec<Iso3>, valid: Vec<bool>) -> Result<Self> {
        ensure!(
            poses.len() == valid.len(),
            "pose count {} != validity count {}",
            poses.len(),
            valid.len()
        );
        Ok(Self { poses, valid })
    }

    /// All poses marked valid.
    pub fn all_valid(poses: Vec<Iso3>) -> Self {
        let valid = vec![true; poses.len()];
        Self { poses, valid }
    }

    pub fn len(&self) -> usize {
        self.poses.len()
    }

    pub fn is_empty(&self) -> bool {
        self.poses.is_empty()
    }

    pub fn pose(&self, idx: usize) -> &Iso3 {
        &self.poses[idx]
    }

    pub fn poses(&self) -> &[Iso3] {
        &self.poses
    }

    pub fn valid(&self) -> &[bool] {
        &self.valid
    }

    /// New set with poses replaced and validity carried over.
    pub fn with_poses(&self, poses: Vec<Iso3>) -> Result<Self> {
        ensure!(
            poses.len() == self.poses.len(),
            "replacement pose count {} != existing count {}",
            poses.len(),
            self.poses.len()
        );
        Ok(Self {
            poses,
            valid: self.valid.clone(),
        })
    }

    /// Flattened rt-vector encoding of every pose, valid or not.
    pub fn param_vec(&self) -> DVector<Real> {
        let mut out = Vec::with_capacity(self.poses.len() * rtvec::POSE_LEN);
        for pose in &self.poses {
            out.extend_from_slice(&rtvec::from_iso3(pose));
        }
        DVector::from_vec(out)
    }

    /// New set with poses decoded from a flattened rt-vector block.
    pub fn with_param_vec(&self, v: DVectorView<'_, Real>) -> Result<Self> {
        ensure!(
            v.len() == self.poses.len() * rtvec::POSE_LEN,
            "expected pose block of length {}, got {}",
            self.poses.len() * rtvec::POSE_LEN,
            v.len()
        );
        let poses = (0..self.poses.len())
            .map(|i| {
                let base = i * rtvec::POSE_LEN;
                let rt: Vec<Real> = (0..rtvec::POSE_LEN).map(|k| v[base + k]).collect();
                rtvec::to_iso3(&rt)
            })
            .collect::<Result<Vec<_>>>()?;
        self.with_poses(poses)
    }
}
