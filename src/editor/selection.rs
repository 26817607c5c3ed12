use crate::geometry::{Ray, Vec3, nearest_point_on_segment};
use crate::scene::{NodeId, Scene};
use crate::sketch::{Stroke, StrokeId};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StrokeHit {
    pub stroke: StrokeId,
    /// Closest point on the stroke to the query position.
    pub point: Vec3,
    pub distance: f32,
}

/// Stroke whose polyline passes nearest to `position`, if that distance is
/// below `threshold`. Strokes with fewer than two points are skipped.
pub fn find_closest_stroke(position: Vec3, strokes: &[Stroke], threshold: f32) -> Option<StrokeHit> {
    let mut closest: Option<StrokeHit> = None;
    for stroke in strokes.iter().filter(|stroke| stroke.len() >= 2) {
        for (a, b) in stroke.segments() {
            let point = nearest_point_on_segment(a, b, position);
            let distance = point.distance(position);
            if closest.map_or(true, |hit| distance < hit.distance) {
                closest = Some(StrokeHit {
                    stroke: stroke.id(),
                    point,
                    distance,
                });
            }
        }
    }
    closest.filter(|hit| hit.distance < threshold)
}

/// Root object whose collider is hit first along `ray` within `reach`.
pub fn find_pointed_object(ray: &Ray, scene: &Scene, reach: f32) -> Option<NodeId> {
    let (node, distance) = scene.raycast(ray)?;
    (distance <= reach).then(|| scene.root_of(node))
}
