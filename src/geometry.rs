//! Small vector/clip helpers shared by the sphere traversal's `view_page`
//! projection test.
//!
//! Folded into this crate as a module rather than broken out as a separate
//! workspace crate: the teacher's own `geometry` crate couples its `Aabb3`
//! type to `absolute_unit`'s physical-length units, which has no referent
//! for the unitless, normalized sphere radii used here (see DESIGN.md).

use nalgebra::{Matrix4, Vector3, Vector4};

/// Projects a world-space point through `m`, producing a homogeneous clip
/// coordinate.
#[inline]
pub fn project(m: &Matrix4<f64>, p: Vector3<f64>) -> Vector4<f64> {
    m * Vector4::new(p[0], p[1], p[2], 1.0)
}

/// True if every one of `pts` fails the "in front of the near/far/left/
/// right/bottom/top clip plane" test for a single fixed axis/sign
/// combination — i.e. all eight bounding vertices lie outside one half-space
/// of the view frustum.
#[inline]
pub fn all_beyond(pts: &[Vector4<f64>], axis: usize, sign: f64) -> bool {
    pts.iter().all(|p| sign * p[axis] > p[3])
}

/// True if every point has non-positive `w` (beyond the eye-space
/// singularity at the camera).
#[inline]
pub fn all_behind_eye(pts: &[Vector4<f64>]) -> bool {
    pts.iter().all(|p| p[3] <= 0.0)
}

/// On-screen length, in pixels, of the edge between two clip-space points.
/// Returns `0.0` if both are behind the eye, `f64::INFINITY` if exactly one
/// is (the edge crosses the eye-space singularity).
pub fn edge_length_px(a: Vector4<f64>, b: Vector4<f64>, vw: f64, vh: f64) -> f64 {
    if a[3] <= 0.0 && b[3] <= 0.0 {
        return 0.0;
    }
    if a[3] <= 0.0 || b[3] <= 0.0 {
        return f64::INFINITY;
    }
    let dx = (a[0] / a[3] - b[0] / b[3]) * vw / 2.0;
    let dy = (a[1] / a[3] - b[1] / b[3]) * vh / 2.0;
    (dx * dx + dy * dy).sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn identity_projection_is_passthrough() {
        let m = Matrix4::identity();
        let p = project(&m, Vector3::new(1.0, 2.0, 3.0));
        assert_relative_eq!(p, Vector4::new(1.0, 2.0, 3.0, 1.0));
    }

    #[test]
    fn edge_length_of_coincident_points_is_zero() {
        let p = Vector4::new(0.5, 0.5, 0.5, 1.0);
        assert_relative_eq!(edge_length_px(p, p, 800.0, 600.0), 0.0);
    }
}
