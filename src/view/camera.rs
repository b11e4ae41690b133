use glam::{DMat3, DMat4, DVec3, DVec4};

/// Default far plane, roughly the size of a planetary system (metres)
const DEFAULT_Z_FAR: f64 = 1.0e13;

/// Viewpoint in world space. Rendering is camera-relative: positions are
/// offset by `position` before they are transformed, so the view matrix only
/// carries rotation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Camera {
    pub position: DVec3,
    /// Camera space to world space; the camera looks down its -Z
    pub orient: DMat3,
    pub fov_y: f64,
    pub aspect: f64,
    pub z_near: f64,
    pub z_far: f64,
}

impl Camera {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            position: DVec3::ZERO,
            orient: DMat3::IDENTITY,
            fov_y: 60f64.to_radians(),
            aspect: width as f64 / height.max(1) as f64,
            z_near: 1.0,
            z_far: DEFAULT_Z_FAR,
        }
    }

    pub fn set_aspect(&mut self, width: u32, height: u32) {
        self.aspect = width as f64 / height.max(1) as f64;
    }

    pub fn forward(&self) -> DVec3 {
        self.orient * DVec3::NEG_Z
    }

    pub fn set_look_at(&mut self, target: DVec3) {
        let forward = (target - self.position).normalize_or_zero();
        if forward == DVec3::ZERO {
            return;
        }
        // avoid a degenerate basis when looking straight up or down
        let up = if forward.dot(DVec3::Y).abs() > 0.999 { DVec3::Z } else { DVec3::Y };
        let right = forward.cross(up).normalize();
        let up = right.cross(forward);
        self.orient = DMat3::from_cols(right, up, -forward);
    }

    /// Rotation-only view matrix for camera-relative positions
    pub fn view(&self) -> DMat4 {
        DMat4::from_mat3(self.orient.transpose())
    }

    pub fn proj(&self) -> DMat4 {
        DMat4::perspective_rh(self.fov_y, self.aspect, self.z_near, self.z_far)
    }

    pub fn view_proj(&self) -> DMat4 {
        self.proj() * self.view()
    }

    /// World position relative to the camera
    pub fn relative(&self, world: DVec3) -> DVec3 {
        world - self.position
    }

    /// Frustum planes (left, right, bottom, top, near, far) as normalized
    /// `[a, b, c, d]` with `ax + by + cz + d >= 0` inside, in camera-relative
    /// world coordinates
    pub fn frustum_planes(&self) -> [DVec4; 6] {
        let m = self.view_proj().to_cols_array();
        let row = |i: usize| DVec4::new(m[i], m[4 + i], m[8 + i], m[12 + i]);
        let (r0, r1, r2, r3) = (row(0), row(1), row(2), row(3));

        // depth range is [0, 1], so near is row 2 alone
        [r3 + r0, r3 - r0, r3 + r1, r3 - r1, r2, r3 - r2].map(|p| {
            let len = p.truncate().length();
            if len > 0.0 { p / len } else { p }
        })
    }

    /// Whether a sphere at camera-relative `center` can be seen
    pub fn is_sphere_in_frustum(&self, center: DVec3, radius: f64) -> bool {
        self.frustum_planes()
            .iter()
            .all(|plane| plane.truncate().dot(center) + plane.w >= -radius)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_looks_down_neg_z() {
        let cam = Camera::new(800, 600);
        assert!(cam.is_sphere_in_frustum(DVec3::new(0.0, 0.0, -100.0), 1.0));
        assert!(!cam.is_sphere_in_frustum(DVec3::new(0.0, 0.0, 100.0), 1.0));
    }

    #[test]
    fn test_big_sphere_behind_still_visible() {
        let cam = Camera::new(800, 600);
        assert!(cam.is_sphere_in_frustum(DVec3::new(0.0, 0.0, 100.0), 200.0));
    }

    #[test]
    fn test_look_at() {
        let mut cam = Camera::new(800, 600);
        cam.position = DVec3::new(1.0e9, 0.0, 0.0);
        cam.set_look_at(DVec3::ZERO);
        assert!((cam.forward() - DVec3::NEG_X).length() < 1e-12);

        let target = cam.relative(DVec3::ZERO);
        assert!(cam.is_sphere_in_frustum(target, 6.0e6));
        let behind = cam.relative(DVec3::new(2.0e9, 0.0, 0.0));
        assert!(!cam.is_sphere_in_frustum(behind, 6.0e6));
    }

    #[test]
    fn test_planes_are_normalized() {
        let cam = Camera::new(1920, 1080);
        for plane in cam.frustum_planes() {
            assert!((plane.truncate().length() - 1.0).abs() < 1e-9);
        }
    }
}
