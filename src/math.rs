// Camera and projection helpers shared by the samples

use bytemuck::{Pod, Zeroable};
use glam::{Mat4, Vec3};
use winit::keyboard::KeyCode;

/// Distance the camera moves per key press
pub const CAMERA_SPEED: f32 = 0.01;

/// Per-frame uniform block, matches `SceneConstants` in the shaders
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct SceneConstants {
    pub view: Mat4,
    pub projection: Mat4,
}

/// Right-handed perspective with Vulkan conventions: depth in [0, 1] and
/// clip-space Y pointing down.
pub fn perspective(fov_y_degrees: f32, aspect: f32, near: f32, far: f32) -> Mat4 {
    let mut projection = Mat4::perspective_rh(fov_y_degrees.to_radians(), aspect, near, far);
    projection.y_axis.y *= -1.0;
    projection
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Camera {
    pub position: Vec3,
}

impl Default for Camera {
    fn default() -> Self {
        Self {
            position: Vec3::new(0.0, 0.0, -3.0),
        }
    }
}

impl Camera {
    pub fn view(&self) -> Mat4 {
        Mat4::from_translation(self.position)
    }

    /// Move for an arrow key. Returns false for any other key.
    pub fn nudge(&mut self, key: KeyCode) -> bool {
        match key {
            KeyCode::ArrowUp => self.position.z += CAMERA_SPEED,
            KeyCode::ArrowDown => self.position.z -= CAMERA_SPEED,
            KeyCode::ArrowLeft => self.position.x -= CAMERA_SPEED,
            KeyCode::ArrowRight => self.position.x += CAMERA_SPEED,
            _ => return false,
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::Vec4;

    fn project(m: Mat4, z: f32) -> Vec3 {
        let clip = m * Vec4::new(0.0, 1.0, z, 1.0);
        clip.truncate() / clip.w
    }

    #[test]
    fn depth_runs_from_zero_at_near_to_one_at_far() {
        let m = perspective(60.0, 4.0 / 3.0, 0.1, 100.0);
        assert!(project(m, -0.1).z.abs() < 1e-5);
        assert!((project(m, -100.0).z - 1.0).abs() < 1e-5);
    }

    #[test]
    fn up_is_negative_y_in_clip_space() {
        let m = perspective(60.0, 1.0, 0.1, 100.0);
        assert!(project(m, -1.0).y < 0.0);
    }

    #[test]
    fn arrow_keys_move_the_camera() {
        let mut camera = Camera::default();
        assert!(camera.nudge(KeyCode::ArrowUp));
        assert!(camera.nudge(KeyCode::ArrowRight));
        assert!((camera.position.z - (-3.0 + CAMERA_SPEED)).abs() < 1e-6);
        assert!((camera.position.x - CAMERA_SPEED).abs() < 1e-6);

        assert!(camera.nudge(KeyCode::ArrowLeft));
        assert!(camera.nudge(KeyCode::ArrowDown));
        assert!(camera.position.x.abs() < 1e-6);
        assert!((camera.position.z + 3.0).abs() < 1e-6);
    }

    #[test]
    fn other_keys_leave_the_camera_alone() {
        let mut camera = Camera::default();
        assert!(!camera.nudge(KeyCode::KeyW));
        assert_eq!(camera, Camera::default());
    }

    #[test]
    fn view_translates_by_position() {
        let camera = Camera::default();
        let p = camera.view().transform_point3(Vec3::ZERO);
        assert_eq!(p, Vec3::new(0.0, 0.0, -3.0));
    }

    #[test]
    fn default_camera_frames_the_whole_unit_cube() {
        let view_projection = perspective(60.0, 1.0, 0.1, 100.0) * Camera::default().view();
        for corner in 0..8 {
            let pick = |bit: i32| if corner & bit == 0 { -0.5 } else { 0.5 };
            let clip = view_projection * Vec4::new(pick(1), pick(2), pick(4), 1.0);
            let ndc = clip.truncate() / clip.w;
            assert!(clip.w > 0.0, "corner {corner} behind the camera");
            assert!(ndc.x.abs() <= 1.0 && ndc.y.abs() <= 1.0, "corner {corner} off screen");
            assert!((0.0..=1.0).contains(&ndc.z), "corner {corner} clipped by depth");
        }
    }

    #[test]
    fn scene_constants_are_two_matrices() {
        assert_eq!(std::mem::size_of::<SceneConstants>(), 128);
    }
}
