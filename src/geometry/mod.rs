pub use glam::{Quat, Vec3};
use serde::{Deserialize, Serialize};

/// Position and orientation of a tracked device or scene object.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Pose {
    pub position: Vec3,
    pub rotation: Quat,
}

impl Pose {
    pub const IDENTITY: Pose = Pose {
        position: Vec3::ZERO,
        rotation: Quat::IDENTITY,
    };

    pub fn new(position: Vec3, rotation: Quat) -> Self {
        Self { position, rotation }
    }

    pub fn from_position(position: Vec3) -> Self {
        Self {
            position,
            rotation: Quat::IDENTITY,
        }
    }

    /// Viewing direction, `-Z` in the pose's local frame.
    pub fn forward(&self) -> Vec3 {
        self.rotation * Vec3::NEG_Z
    }

    pub fn up(&self) -> Vec3 {
        self.rotation * Vec3::Y
    }

    pub fn transform_point(&self, point: Vec3) -> Vec3 {
        self.rotation * point + self.position
    }

    pub fn inverse_transform_point(&self, point: Vec3) -> Vec3 {
        self.rotation.inverse() * (point - self.position)
    }

    /// Composes `child` expressed in this pose's frame into world space.
    pub fn compose(&self, child: &Pose) -> Pose {
        Pose {
            position: self.transform_point(child.position),
            rotation: self.rotation * child.rotation,
        }
    }

    pub fn abs_diff_eq(&self, other: &Pose, max_abs_diff: f32) -> bool {
        self.position.abs_diff_eq(other.position, max_abs_diff)
            && self.rotation.abs_diff_eq(other.rotation, max_abs_diff)
    }
}

impl Default for Pose {
    fn default() -> Self {
        Self::IDENTITY
    }
}

/// Closest point to `point` on the segment `a..b`.
pub fn nearest_point_on_segment(a: Vec3, b: Vec3, point: Vec3) -> Vec3 {
    let ab = b - a;
    let len = ab.length();
    if len <= f32::EPSILON {
        return a;
    }
    let dir = ab / len;
    let t = (point - a).dot(dir).clamp(0.0, len);
    a + dir * t
}

/// Drops `point` onto the plane through `origin` with unit `normal`.
pub fn project_onto_plane(point: Vec3, origin: Vec3, normal: Vec3) -> Vec3 {
    let distance = (point - origin).dot(normal);
    point - distance * normal
}

pub fn exceeds_spacing(a: Vec3, b: Vec3, min_spacing: f32) -> bool {
    a.distance(b) > min_spacing
}

/// Re-applies the device motion since `start` to a target captured at
/// `original`.
pub fn grab_delta(start: &Pose, current: &Pose, original: &Pose) -> Pose {
    let delta = current.rotation * start.rotation.inverse();
    Pose {
        position: delta * (original.position - start.position) + current.position,
        rotation: delta * original.rotation,
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Ray {
    pub origin: Vec3,
    pub direction: Vec3,
}

impl Ray {
    pub fn new(origin: Vec3, direction: Vec3) -> Self {
        Self {
            origin,
            direction: direction.normalize_or_zero(),
        }
    }

    pub fn from_pose(pose: &Pose) -> Self {
        Self::new(pose.position, pose.forward())
    }

    pub fn at(&self, t: f32) -> Vec3 {
        self.origin + self.direction * t
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Aabb {
    pub min: Vec3,
    pub max: Vec3,
}

impl Aabb {
    pub fn new(min: Vec3, max: Vec3) -> Self {
        Self {
            min: min.min(max),
            max: min.max(max),
        }
    }

    pub fn from_half_extents(half_extents: Vec3) -> Self {
        Self::new(-half_extents, half_extents)
    }

    pub fn unit() -> Self {
        Self::from_half_extents(Vec3::splat(0.5))
    }

    pub fn center(&self) -> Vec3 {
        (self.min + self.max) * 0.5
    }

    pub fn size(&self) -> Vec3 {
        self.max - self.min
    }

    pub fn corners(&self) -> [Vec3; 8] {
        let (a, b) = (self.min, self.max);
        [
            Vec3::new(a.x, a.y, a.z),
            Vec3::new(b.x, a.y, a.z),
            Vec3::new(a.x, b.y, a.z),
            Vec3::new(b.x, b.y, a.z),
            Vec3::new(a.x, a.y, b.z),
            Vec3::new(b.x, a.y, b.z),
            Vec3::new(a.x, b.y, b.z),
            Vec3::new(b.x, b.y, b.z),
        ]
    }

    /// World-space box enclosing this box after `pose` is applied.
    pub fn transformed(&self, pose: &Pose) -> Aabb {
        let mut min = Vec3::splat(f32::INFINITY);
        let mut max = Vec3::splat(f32::NEG_INFINITY);
        for corner in self.corners() {
            let world = pose.transform_point(corner);
            min = min.min(world);
            max = max.max(world);
        }
        Aabb { min, max }
    }

    /// Entry distance along `ray`, or `None` when the ray misses.
    pub fn intersect_ray(&self, ray: &Ray) -> Option<f32> {
        let mut t_min = 0.0_f32;
        let mut t_max = f32::INFINITY;
        for axis in 0..3 {
            let origin = ray.origin[axis];
            let dir = ray.direction[axis];
            if dir.abs() <= f32::EPSILON {
                if origin < self.min[axis] || origin > self.max[axis] {
                    return None;
                }
                continue;
            }
            let inv = 1.0 / dir;
            let mut t0 = (self.min[axis] - origin) * inv;
            let mut t1 = (self.max[axis] - origin) * inv;
            if t0 > t1 {
                std::mem::swap(&mut t0, &mut t1);
            }
            t_min = t_min.max(t0);
            t_max = t_max.min(t1);
            if t_min > t_max {
                return None;
            }
        }
        Some(t_min)
    }
}
