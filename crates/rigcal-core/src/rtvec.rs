//! Minimal 6-parameter pose encoding `[rx, ry, rz, tx, ty, tz]`.
//!
//! Rotation is stored as a scaled axis (axis-angle) vector, translation as-is.
//! This is the per-pose layout used by the flat optimization vector.

use crate::math::{Iso3, Real, Vec3};
use anyhow::{ensure, Result};
use nalgebra::UnitQuaternion;

/// Length of one encoded pose.
pub const POSE_LEN: usize = 6;

/// Encode a rigid transform as `[rx, ry, rz, tx, ty, tz]`.
pub fn from_iso3(pose: &Iso3) -> [Real; POSE_LEN] {
    let r = pose.rotation.scaled_axis();
    let t = pose.translation.vector;
    [r.x, r.y, r.z, t.x, t.y, t.z]
}

/// Decode a rigid transform from a 6-element slice.
pub fn to_iso3(rt: &[Real]) -> Result<Iso3> {
    ensure!(
        rt.len() == POSE_LEN,
        "expected rt vector of length {}, got {}",
        POSE_LEN,
        rt.len()
    );
    let rot = UnitQuaternion::from_scaled_axis(Vec3::new(rt[0], rt[1], rt[2]));
    let trans = Vec3::new(rt[3], rt[4], rt[5]);
    Ok(Iso3::from_parts(trans.into(), rot))
}

/// Interpolate between two poses at fraction `t` in `[0, 1]`.
///
/// Rotation is slerped, translation lerped. Used by the rolling-shutter
/// motion model to evaluate the rig pose at an intra-frame time.
pub fn interpolate(a: &Iso3, b: &Iso3, t: Real) -> Iso3 {
    let rot = a.rotation.slerp(&b.rotation, t);
    let trans = a.translation.vector.lerp(&b.translation.vector, t);
    Iso3::from_parts(trans.into(), rot)
}

#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra::{Rotation3, Translation3};

    #[test]
    fn round_trip_preserves_pose() {
        let pose = Iso3::from_parts(
            Translation3::new(0.3, -1.2, 2.5),
            Rotation3::from_euler_angles(0.2, -0.4, 1.1).into(),
        );
        let rt = from_iso3(&pose);
        let back = to_iso3(&rt).unwrap();
        assert!((pose.to_homogeneous() - back.to_homogeneous()).norm() < 1e-12);
    }

    #[test]
    fn to_iso3_rejects_wrong_length() {
        assert!(to_iso3(&[0.0; 5]).is_err());
    }

    #[test]
    fn interpolate_endpoints() {
        let a = Iso3::from_parts(
            Translation3::new(0.0, 0.0, 1.0),
            Rotation3::from_euler_angles(0.0, 0.0, 0.0).into(),
        );
        let b = Iso3::from_parts(
            Translation3::new(1.0, 0.0, 1.0),
            Rotation3::from_euler_angles(0.0, 0.0, 0.5).into(),
        );
        let at_zero = interpolate(&a, &b, 0.0);
        let at_one = interpolate(&a, &b, 1.0);
        assert!((at_zero.to_homogeneous() - a.to_homogeneous()).norm() < 1e-12);
        assert!((at_one.to_homogeneous() - b.to_homogeneous()).norm() < 1e-12);

        let mid = interpolate(&a, &b, 0.5);
        assert!((mid.translation.vector.x - 0.5).abs() < 1e-12);
    }
}
