//! Per-destination orientation transforms
//!
//! Camera frames arrive in sensor orientation. Each destination (preview,
//! encoder) gets its own model-view-projection matrix: flip, then rotate by
//! the device angle, then scale by the on-screen view's long side ratio so
//! the frame covers it without letterboxing.

use crate::capture::Resolution;
use serde::{Deserialize, Serialize};

/// Column-major 4x4 matrix, ready to upload as a uniform
pub type Mat4 = [f32; 16];

pub const IDENTITY: Mat4 = [
    1.0, 0.0, 0.0, 0.0, //
    0.0, 1.0, 0.0, 0.0, //
    0.0, 0.0, 1.0, 0.0, //
    0.0, 0.0, 0.0, 1.0,
];

/// Rotation and mirroring applied to one destination
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Orientation {
    /// Device rotation in degrees (multiple of 90)
    pub rotation_degrees: i32,
    pub flip_horizontal: bool,
    pub flip_vertical: bool,
}

impl Orientation {
    /// Whether the rotation turns landscape content into portrait
    pub fn swaps_axes(&self) -> bool {
        self.rotation_degrees.rem_euclid(180) == 90
    }
}

/// Multiply two column-major matrices (`a * b`)
pub fn multiply(a: &Mat4, b: &Mat4) -> Mat4 {
    let mut out = [0.0f32; 16];
    for col in 0..4 {
        for row in 0..4 {
            out[col * 4 + row] = (0..4).map(|k| a[k * 4 + row] * b[col * 4 + k]).sum();
        }
    }
    out
}

fn scale(sx: f32, sy: f32) -> Mat4 {
    let mut m = IDENTITY;
    m[0] = sx;
    m[5] = sy;
    m
}

fn rotate_z(degrees: i32) -> Mat4 {
    // Quarter turns are exact, everything else goes through trig
    let (sin, cos) = match degrees.rem_euclid(360) {
        0 => (0.0, 1.0),
        90 => (1.0, 0.0),
        180 => (0.0, -1.0),
        270 => (-1.0, 0.0),
        other => {
            let rad = (other as f32).to_radians();
            (rad.sin(), rad.cos())
        }
    };
    let mut m = IDENTITY;
    m[0] = cos;
    m[1] = sin;
    m[4] = -sin;
    m[5] = cos;
    m
}

/// Uniform scale that makes the frame cover a view of size `view`.
///
/// `max(w/h, h/w)` is the same for a view and its rotated twin, so portrait
/// and landscape views are both covered without letterboxing.
pub fn cover_scale(view: Resolution) -> f32 {
    let aspect = view.width as f32 / view.height as f32;
    aspect.max(1.0 / aspect)
}

/// Build the matrix for one destination. Every destination is scaled for the
/// on-screen `view`, so the recording frames what the user sees.
pub fn destination_matrix(orientation: &Orientation, view: Resolution, gesture_scale: f32) -> Mat4 {
    let flip = scale(
        if orientation.flip_horizontal { -1.0 } else { 1.0 },
        if orientation.flip_vertical { -1.0 } else { 1.0 },
    );
    let rotation = rotate_z(-orientation.rotation_degrees);
    let factor = cover_scale(view) * gesture_scale;

    multiply(&scale(factor, factor), &multiply(&rotation, &flip))
}

/// Apply a matrix to a 2D point (z = 0, w = 1)
pub fn transform_point(m: &Mat4, x: f32, y: f32) -> (f32, f32) {
    (m[0] * x + m[4] * y + m[12], m[1] * x + m[5] * y + m[13])
}

#[cfg(test)]
mod tests {
    use super::*;

    fn approx(a: (f32, f32), b: (f32, f32)) -> bool {
        (a.0 - b.0).abs() < 1e-5 && (a.1 - b.1).abs() < 1e-5
    }

    #[test]
    fn test_cover_scale_uses_long_side_ratio_of_view() {
        let landscape = Resolution::new(1280, 720).unwrap();
        assert!((cover_scale(landscape) - 1.777_777_8).abs() < 1e-5);
        assert!((cover_scale(landscape.swapped()) - landscape.long_side_ratio()).abs() < 1e-5);
        assert_eq!(cover_scale(Resolution::new(1000, 1000).unwrap()), 1.0);
    }

    #[test]
    fn test_matching_camera_and_view_still_scaled() {
        // 1280x720 camera into a 1280x720 view: scale comes from the view only
        let view = Resolution::new(1280, 720).unwrap();
        let m = destination_matrix(&Orientation::default(), view, 1.0);
        assert!(approx(transform_point(&m, 1.0, 1.0), (1.777_777_8, 1.777_777_8)));
    }

    #[test]
    fn test_rotation_applies_before_cover() {
        let view = Resolution::new(720, 1280).unwrap();
        let orientation = Orientation {
            rotation_degrees: 90,
            ..Default::default()
        };
        let m = destination_matrix(&orientation, view, 1.0);
        // (1, 0) rotates by -90 degrees onto (0, -1), then scales by 16/9
        assert!(approx(transform_point(&m, 1.0, 0.0), (0.0, -1.777_777_8)));
    }

    #[test]
    fn test_flips_are_independent() {
        let view = Resolution::new(1000, 1000).unwrap();
        let h = Orientation {
            flip_horizontal: true,
            ..Default::default()
        };
        let v = Orientation {
            flip_vertical: true,
            ..Default::default()
        };
        let mh = destination_matrix(&h, view, 1.0);
        let mv = destination_matrix(&v, view, 1.0);
        assert!(approx(transform_point(&mh, 0.5, 0.25), (-0.5, 0.25)));
        assert!(approx(transform_point(&mv, 0.5, 0.25), (0.5, -0.25)));
    }

    #[test]
    fn test_gesture_scale_zooms_uniformly() {
        let view = Resolution::new(1000, 1000).unwrap();
        let m = destination_matrix(&Orientation::default(), view, 2.0);
        assert!(approx(transform_point(&m, 0.5, -0.5), (1.0, -1.0)));
    }

    #[test]
    fn test_multiply_identity() {
        let m = rotate_z(270);
        assert_eq!(multiply(&IDENTITY, &m), m);
        assert_eq!(multiply(&m, &IDENTITY), m);
    }
}
