//! Rotational reprojection ("timewarp") of a rendered view to a newer pose.
//!
//! Everything is composed in `f64` and only narrowed when packed into the
//! uniform buffer.

use glam::{DMat4, DQuat, Quat, Vec3};

use crate::uniform::NormalizedRect;

// Depth is irrelevant for a rotation-only warp, any valid pair works.
const NEAR_PLANE: f64 = 0.5;
const FAR_PLANE: f64 = 1.5;

/// Position and orientation of a view in tracking space.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Pose {
    /// Unit quaternion orientation.
    pub orientation: Quat,
    /// Position in metres.
    pub position: Vec3,
}

impl Pose {
    /// The pose at the origin looking down -Z.
    pub const IDENTITY: Self = Self {
        orientation: Quat::IDENTITY,
        position: Vec3::ZERO,
    };
}

impl Default for Pose {
    fn default() -> Self {
        Self::IDENTITY
    }
}

/// Field of view as four half-angles in radians.
///
/// `angle_left` and `angle_down` are normally negative.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Fov {
    /// Angle of the left edge.
    pub angle_left: f32,
    /// Angle of the right edge.
    pub angle_right: f32,
    /// Angle of the top edge.
    pub angle_up: f32,
    /// Angle of the bottom edge.
    pub angle_down: f32,
}

impl Fov {
    /// A symmetric fov with the given horizontal and vertical half-angles.
    pub fn symmetric(half_width: f32, half_height: f32) -> Self {
        Self {
            angle_left: -half_width,
            angle_right: half_width,
            angle_up: half_height,
            angle_down: -half_height,
        }
    }
}

struct Tangents {
    left: f64,
    right: f64,
    up: f64,
    down: f64,
}

impl From<&Fov> for Tangents {
    fn from(fov: &Fov) -> Self {
        Self {
            left: f64::from(fov.angle_left).tan(),
            right: f64::from(fov.angle_right).tan(),
            up: f64::from(fov.angle_up).tan(),
            down: f64::from(fov.angle_down).tan(),
        }
    }
}

impl NormalizedRect {
    /// The rectangle mapping view UVs to tangent lengths for `fov`.
    ///
    /// UV `(0, 0)` lands on the top-left tangent and `(1, 1)` on the
    /// bottom-right, matching the distortion shaders' pre-transform.
    pub fn uv_to_tangent_lengths(fov: &Fov) -> Self {
        let tan = Tangents::from(fov);
        let tan_width = tan.right - tan.left;
        let tan_height = tan.up - tan.down;

        Self {
            x: tan.left as f32,
            y: tan.up as f32,
            w: tan_width as f32,
            h: -tan_height as f32,
        }
    }
}

/// Vulkan-convention (y pointing down) projection for `fov`.
pub fn projection_matrix(fov: &Fov) -> DMat4 {
    let tan = Tangents::from(fov);

    let tan_width = tan.right - tan.left;
    let tan_height = tan.down - tan.up;

    let a11 = 2.0 / tan_width;
    let a22 = 2.0 / tan_height;

    let a31 = (tan.right + tan.left) / tan_width;
    let a32 = (tan.up + tan.down) / tan_height;
    let a33 = -FAR_PLANE / (FAR_PLANE - NEAR_PLANE);

    let a43 = -(FAR_PLANE * NEAR_PLANE) / (FAR_PLANE - NEAR_PLANE);

    #[rustfmt::skip]
    let cols = [
        a11, 0.0, 0.0, 0.0,
        0.0, a22, 0.0, 0.0,
        a31, a32, a33, -1.0,
        0.0, 0.0, a43, 0.0,
    ];
    DMat4::from_cols_array(&cols)
}

fn rotation(q: Quat) -> DQuat {
    q.as_dquat().normalize()
}

/// Computes the matrix that takes a direction of the view at `new_pose` to
/// clip space of the image rendered at `src_pose` with `src_fov`.
///
/// Only orientation is compensated; positions are ignored since a
/// rotation-only warp needs no depth.
pub fn calc_time_warp_matrix(src_pose: &Pose, src_fov: &Fov, new_pose: &Pose) -> DMat4 {
    let src_proj = projection_matrix(src_fov);

    // Model matrices, i.e. inverted view matrices.
    let src_rot_inv = DMat4::from_quat(rotation(src_pose.orientation));
    let new_rot_inv = DMat4::from_quat(rotation(new_pose.orientation));
    let new_rot = new_rot_inv.inverse();

    let delta_rot = new_rot * src_rot_inv;
    let delta_rot_inv = delta_rot.inverse();

    src_proj * delta_rot_inv
}

#[cfg(test)]
mod tests {
    use std::f32::consts::FRAC_PI_4;

    use glam::DVec4;

    use super::*;

    const EPS: f64 = 1e-9;

    fn quest_like_fov() -> Fov {
        Fov {
            angle_left: -0.9,
            angle_right: 0.75,
            angle_up: 0.85,
            angle_down: -0.95,
        }
    }

    #[test]
    fn identical_poses_reduce_to_projection() {
        let pose = Pose {
            orientation: Quat::from_rotation_y(0.3) * Quat::from_rotation_x(-0.1),
            position: Vec3::new(0.03, 1.6, -0.2),
        };
        let fov = quest_like_fov();

        let warp = calc_time_warp_matrix(&pose, &fov, &pose);
        assert!(warp.abs_diff_eq(projection_matrix(&fov), EPS));
    }

    #[test]
    fn position_change_is_ignored() {
        let fov = quest_like_fov();
        let src = Pose::IDENTITY;
        let moved = Pose {
            position: Vec3::new(1.0, 2.0, 3.0),
            ..Pose::IDENTITY
        };
        assert!(
            calc_time_warp_matrix(&src, &fov, &moved)
                .abs_diff_eq(projection_matrix(&fov), EPS)
        );
    }

    #[test]
    fn warp_matches_relative_rotation() {
        let fov = Fov::symmetric(FRAC_PI_4, FRAC_PI_4);
        let src = Pose {
            orientation: Quat::from_rotation_y(0.2),
            ..Pose::IDENTITY
        };
        let new = Pose {
            orientation: Quat::from_rotation_y(0.25),
            ..Pose::IDENTITY
        };

        let warp = calc_time_warp_matrix(&src, &fov, &new);

        // A direction straight ahead of the new view, expressed in the source
        // view's space, must project to the same place as the warped point.
        let forward = DVec4::new(0.0, 0.0, -1.0, 0.0);
        let world = DMat4::from_quat(rotation(new.orientation)) * forward;
        let in_src = DMat4::from_quat(rotation(src.orientation)).inverse() * world;
        let expected = projection_matrix(&fov) * in_src;

        let got = warp * forward;
        assert!(got.abs_diff_eq(expected, EPS), "{got:?} vs {expected:?}");
    }

    #[test]
    fn unnormalized_orientation_is_normalized() {
        let fov = quest_like_fov();
        let src = Pose {
            orientation: Quat::from_xyzw(0.0, 0.0, 0.0, 2.0),
            ..Pose::IDENTITY
        };
        assert!(
            calc_time_warp_matrix(&src, &fov, &Pose::IDENTITY)
                .abs_diff_eq(projection_matrix(&fov), EPS)
        );
    }

    #[test]
    fn symmetric_projection_is_centered() {
        let proj = projection_matrix(&Fov::symmetric(FRAC_PI_4, FRAC_PI_4));
        // tan(pi/4) == 1, so the scale terms are 1 and y is flipped.
        assert!((proj.x_axis.x - 1.0).abs() < 1e-6);
        assert!((proj.y_axis.y + 1.0).abs() < 1e-6);
        assert!(proj.z_axis.x.abs() < 1e-6);
        assert!(proj.z_axis.y.abs() < 1e-6);
        assert_eq!(proj.z_axis.w, -1.0);
    }

    #[test]
    fn uv_to_tangent_lengths_spans_fov() {
        let fov = Fov::symmetric(FRAC_PI_4, FRAC_PI_4);
        let rect = NormalizedRect::uv_to_tangent_lengths(&fov);
        assert!((rect.x + 1.0).abs() < 1e-6);
        assert!((rect.y - 1.0).abs() < 1e-6);
        assert!((rect.w - 2.0).abs() < 1e-6);
        assert!((rect.h + 2.0).abs() < 1e-6);
    }
}
