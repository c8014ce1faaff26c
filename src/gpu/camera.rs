//! Camera and viewport sources for the particle renderer.

use glam::{Mat4, Vec3};

/// Anything that can place the eye: supplies the view matrix and the basis
/// vectors billboards are built from.
pub trait ViewSource {
    fn view_matrix(&self) -> Mat4;

    /// World-space right vector of the eye.
    fn right(&self) -> Vec3 {
        let view = self.view_matrix();
        Vec3::new(view.x_axis.x, view.y_axis.x, view.z_axis.x)
    }

    /// World-space up vector of the eye.
    fn up(&self) -> Vec3 {
        let view = self.view_matrix();
        Vec3::new(view.x_axis.y, view.y_axis.y, view.z_axis.y)
    }

    /// World-space viewing direction.
    fn forward(&self) -> Vec3 {
        let view = self.view_matrix();
        -Vec3::new(view.x_axis.z, view.y_axis.z, view.z_axis.z)
    }
}

/// Anything that supplies a perspective projection.
pub trait ProjectionSource {
    fn perspective_matrix(&self) -> Mat4;
}

/// Render target size plus perspective parameters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Viewport {
    pub width: u32,
    pub height: u32,
    /// Vertical field of view in degrees.
    pub fov_degrees: f32,
    pub near: f32,
    pub far: f32,
}

impl Viewport {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            fov_degrees: 45.0,
            near: 0.1,
            far: 100.0,
        }
    }

    /// Width over height; 1 for a zero-height target.
    pub fn aspect(&self) -> f32 {
        if self.height == 0 {
            1.0
        } else {
            self.width as f32 / self.height as f32
        }
    }
}

impl ProjectionSource for Viewport {
    fn perspective_matrix(&self) -> Mat4 {
        Mat4::perspective_rh(self.fov_degrees.to_radians(), self.aspect(), self.near, self.far)
    }
}

/// Orbit camera for viewing particle systems.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Camera {
    /// Horizontal rotation angle in radians.
    pub yaw: f32,
    /// Vertical rotation angle in radians.
    pub pitch: f32,
    /// Distance from the target point.
    pub distance: f32,
    /// Point the camera orbits around.
    pub target: Vec3,
}

impl Camera {
    pub fn new() -> Self {
        Self {
            yaw: 0.0,
            pitch: 0.3,
            distance: 30.0,
            target: Vec3::ZERO,
        }
    }

    /// Orbit around `target` at `distance`.
    pub fn looking_at(target: Vec3, distance: f32) -> Self {
        Self {
            target,
            distance,
            ..Self::new()
        }
    }

    /// The camera's world position.
    pub fn position(&self) -> Vec3 {
        let x = self.distance * self.pitch.cos() * self.yaw.sin();
        let y = self.distance * self.pitch.sin();
        let z = self.distance * self.pitch.cos() * self.yaw.cos();
        self.target + Vec3::new(x, y, z)
    }
}

impl ViewSource for Camera {
    fn view_matrix(&self) -> Mat4 {
        Mat4::look_at_rh(self.position(), self.target, Vec3::Y)
    }
}

impl Default for Camera {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn basis_is_orthonormal() {
        let camera = Camera {
            yaw: 0.7,
            pitch: 0.2,
            distance: 5.0,
            target: Vec3::new(1.0, 2.0, 3.0),
        };
        let (r, u, f) = (camera.right(), camera.up(), camera.forward());
        assert!((r.length() - 1.0).abs() < 1e-5);
        assert!((u.length() - 1.0).abs() < 1e-5);
        assert!(r.dot(u).abs() < 1e-5);
        assert!(r.dot(f).abs() < 1e-5);
        let to_target = (camera.target - camera.position()).normalize();
        assert!((f - to_target).length() < 1e-4);
    }

    #[test]
    fn default_camera_right_is_x() {
        let camera = Camera {
            pitch: 0.0,
            ..Camera::new()
        };
        assert!((camera.right() - Vec3::X).length() < 1e-5);
        assert!((camera.up() - Vec3::Y).length() < 1e-5);
    }

    #[test]
    fn zero_height_viewport_has_unit_aspect() {
        assert_eq!(Viewport::new(800, 0).aspect(), 1.0);
        assert_eq!(Viewport::new(800, 400).aspect(), 2.0);
    }
}
