//! Pinhole camera with Brown-Conrady radial-tangential distortion.
//!
//! The camera is an immutable value: optimizing intrinsics replaces the whole
//! model via [`CameraModel::with_param_vec`].

use crate::math::{Pt3, Real, Vec2};
use anyhow::{ensure, Result};
use nalgebra::{DVector, DVectorView};
use serde::{Deserialize, Serialize};

/// Fixed arity of the camera parameter vector:
/// `[fx, fy, cx, cy, k1, k2, k3, p1, p2]`.
pub const CAMERA_PARAM_LEN: usize = 9;

const MIN_DEPTH: Real = 1e-9;

/// Pinhole intrinsics + Brown-Conrady distortion + sensor size in pixels.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CameraModel {
    pub fx: Real,
    pub fy: Real,
    pub cx: Real,
    pub cy: Real,
    pub k1: Real,
    pub k2: Real,
    pub k3: Real,
    pub p1: Real,
    pub p2: Real,
    /// Sensor size `[width, height]`; not optimized, used by the
    /// rolling-shutter model to normalize scanline times.
    pub image_size: [u32; 2],
}

impl CameraModel {
    /// Distortion-free camera from focal lengths and principal point.
    pub fn pinhole(fx: Real, fy: Real, cx: Real, cy: Real, image_size: [u32; 2]) -> Self {
        Self {
            fx,
            fy,
            cx,
            cy,
            k1: 0.0,
            k2: 0.0,
            k3: 0.0,
            p1: 0.0,
            p2: 0.0,
            image_size,
        }
    }

    fn distort(&self, x: Real, y: Real) -> (Real, Real) {
        let r2 = x * x + y * y;
        let r4 = r2 * r2;
        let r6 = r4 * r2;

        let radial = 1.0 + self.k1 * r2 + self.k2 * r4 + self.k3 * r6;

        let x_tan = 2.0 * self.p1 * x * y + self.p2 * (r2 + 2.0 * x * x);
        let y_tan = self.p1 * (r2 + 2.0 * y * y) + 2.0 * self.p2 * x * y;

        (x * radial + x_tan, y * radial + y_tan)
    }

    /// Project a camera-frame point to pixel coordinates.
    ///
    /// Returns `None` for points at or behind the camera plane.
    pub fn project(&self, p_cam: &Pt3) -> Option<Vec2> {
        if p_cam.z <= MIN_DEPTH {
            return None;
        }
        let xn = p_cam.x / p_cam.z;
        let yn = p_cam.y / p_cam.z;
        let (xd, yd) = self.distort(xn, yn);
        Some(Vec2::new(
            self.fx * xd + self.cx,
            self.fy * yd + self.cy,
        ))
    }

    /// Flat parameter vector `[fx, fy, cx, cy, k1, k2, k3, p1, p2]`.
    pub fn param_vec(&self) -> DVector<Real> {
        DVector::from_row_slice(&[
            self.fx, self.fy, self.cx, self.cy, self.k1, self.k2, self.k3, self.p1, self.p2,
        ])
    }

    /// New camera with parameters replaced from a flat vector.
    pub fn with_param_vec(&self, v: DVectorView<'_, Real>) -> Result<Self> {
        ensure!(
            v.len() == CAMERA_PARAM_LEN,
            "expected camera vector of length {}, got {}",
            CAMERA_PARAM_LEN,
            v.len()
        );
        Ok(Self {
            fx: v[0],
            fy: v[1],
            cx: v[2],
            cy: v[3],
            k1: v[4],
            k2: v[5],
            k3: v[6],
            p1: v[7],
            p2: v[8],
            image_size: self.image_size,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn test_camera() -> CameraModel {
        CameraModel {
            fx: 800.0,
            fy: 780.0,
            cx: 640.0,
            cy: 360.0,
            k1: -0.25,
            k2: 0.08,
            k3: 0.0,
            p1: 0.001,
            p2: -0.001,
            image_size: [1280, 720],
        }
    }

    #[test]
    fn center_point_projects_to_principal_point() {
        let cam = test_camera();
        let px = cam.project(&Pt3::new(0.0, 0.0, 1.0)).unwrap();
        assert_relative_eq!(px.x, cam.cx, epsilon = 1e-12);
        assert_relative_eq!(px.y, cam.cy, epsilon = 1e-12);
    }

    #[test]
    fn point_behind_camera_does_not_project() {
        let cam = test_camera();
        assert!(cam.project(&Pt3::new(0.1, 0.1, -1.0)).is_none());
        assert!(cam.project(&Pt3::new(0.1, 0.1, 0.0)).is_none());
    }

    #[test]
    fn param_vec_round_trip() {
        let cam = test_camera();
        let back = cam.with_param_vec(cam.param_vec().as_view()).unwrap();
        assert_eq!(cam, back);
    }

    #[test]
    fn serde_round_trip() {
        let cam = test_camera();
        let json = serde_json::to_string(&cam).unwrap();
        let back: CameraModel = serde_json::from_str(&json).unwrap();
        assert_eq!(cam, back);
    }

    #[test]
    fn with_param_vec_rejects_wrong_length() {
        let cam = test_camera();
        let short = DVector::from_element(4, 1.0);
        assert!(cam.with_param_vec(short.as_view()).is_err());
    }
}
