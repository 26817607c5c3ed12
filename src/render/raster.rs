use super::{FlatStroke, RenderError, SnapshotBackend, SnapshotCamera, TargetId};
use crate::scene::Color;
use async_trait::async_trait;
use glam::Vec2;
use image::{Rgb, RgbImage};
use std::collections::HashMap;

/// Thinnest line the rasterizer draws, in pixels.
const MIN_RADIUS_PX: f32 = 0.5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FrameState {
    Cleared,
    Submitted,
    Complete,
}

struct CpuTarget {
    pixels: RgbImage,
    state: FrameState,
}

/// Software backend that rasterizes strokes as round-capped thick segments.
#[derive(Default)]
pub struct CpuRasterBackend {
    targets: HashMap<TargetId, CpuTarget>,
    next_id: u64,
}

impl CpuRasterBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Targets created and not yet released.
    pub fn live_targets(&self) -> usize {
        self.targets.len()
    }

    pub fn created_targets(&self) -> u64 {
        self.next_id
    }

    fn target_mut(&mut self, target: TargetId) -> Result<&mut CpuTarget, RenderError> {
        self.targets
            .get_mut(&target)
            .ok_or(RenderError::UnknownTarget(target))
    }
}

#[async_trait]
impl SnapshotBackend for CpuRasterBackend {
    fn label(&self) -> &'static str {
        "cpu-raster"
    }

    async fn create_target(
        &mut self,
        width: u32,
        height: u32,
        background: Color,
    ) -> Result<TargetId, RenderError> {
        if width == 0 || height == 0 {
            return Err(RenderError::InvalidSize { width, height });
        }
        let id = TargetId(self.next_id);
        self.next_id += 1;
        self.targets.insert(
            id,
            CpuTarget {
                pixels: RgbImage::from_pixel(width, height, Rgb(background.to_rgb8())),
                state: FrameState::Cleared,
            },
        );
        Ok(id)
    }

    async fn render(
        &mut self,
        target: TargetId,
        camera: &SnapshotCamera,
        strokes: &[FlatStroke],
    ) -> Result<(), RenderError> {
        let target = self.target_mut(target)?;
        for stroke in strokes {
            draw_stroke(&mut target.pixels, camera, stroke);
        }
        target.state = FrameState::Submitted;
        Ok(())
    }

    async fn frame_complete(&mut self, target: TargetId) -> Result<(), RenderError> {
        let id = target;
        let target = self.target_mut(id)?;
        match target.state {
            FrameState::Cleared => Err(RenderError::NothingRendered(id)),
            FrameState::Submitted | FrameState::Complete => {
                target.state = FrameState::Complete;
                Ok(())
            }
        }
    }

    async fn read_pixels(&mut self, target: TargetId) -> Result<RgbImage, RenderError> {
        let id = target;
        let target = self.target_mut(id)?;
        if target.state != FrameState::Complete {
            return Err(RenderError::FrameNotComplete(id));
        }
        Ok(target.pixels.clone())
    }

    fn release_target(&mut self, target: TargetId) {
        if self.targets.remove(&target).is_none() {
            log::warn!("[render] release of unknown target {target:?}");
        }
    }
}

fn draw_stroke(pixels: &mut RgbImage, camera: &SnapshotCamera, stroke: &FlatStroke) {
    let focal = camera.focal_length_px();
    let projected: Vec<Option<(Vec2, f32)>> = stroke
        .points
        .iter()
        .zip(&stroke.widths)
        .map(|(point, width)| {
            camera
                .project(*point)
                .map(|(pixel, depth)| (pixel, (width * 0.5 * focal / depth).max(MIN_RADIUS_PX)))
        })
        .collect();
    let color = Rgb(stroke.color.to_rgb8());

    if let [Some((pixel, radius))] = projected[..] {
        fill_capsule(pixels, pixel, radius, pixel, radius, color);
        return;
    }
    for pair in projected.windows(2) {
        // segments crossing the clip range are dropped
        if let [Some((a, ra)), Some((b, rb))] = *pair {
            fill_capsule(pixels, a, ra, b, rb, color);
        }
    }
}

fn fill_capsule(pixels: &mut RgbImage, a: Vec2, ra: f32, b: Vec2, rb: f32, color: Rgb<u8>) {
    let (width, height) = pixels.dimensions();
    let reach = ra.max(rb);
    let min = a.min(b) - Vec2::splat(reach);
    let max = a.max(b) + Vec2::splat(reach);
    if max.x < 0.0 || max.y < 0.0 || min.x >= width as f32 || min.y >= height as f32 {
        return;
    }

    let x0 = min.x.floor().max(0.0) as u32;
    let y0 = min.y.floor().max(0.0) as u32;
    let x1 = (max.x.ceil() as u32).min(width - 1);
    let y1 = (max.y.ceil() as u32).min(height - 1);

    let segment = b - a;
    let length_sq = segment.length_squared();
    for y in y0..=y1 {
        for x in x0..=x1 {
            let center = Vec2::new(x as f32 + 0.5, y as f32 + 0.5);
            let t = if length_sq <= f32::EPSILON {
                0.0
            } else {
                ((center - a).dot(segment) / length_sq).clamp(0.0, 1.0)
            };
            let radius = ra + (rb - ra) * t;
            if center.distance(a + segment * t) <= radius {
                pixels.put_pixel(x, y, color);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SnapshotSettings;
    use crate::geometry::{Pose, Vec3};
    use crate::sketch::StrokeId;

    fn horizontal_stroke(color: Color) -> FlatStroke {
        FlatStroke {
            id: StrokeId(1),
            points: vec![Vec3::new(-0.2, 0.1, -1.0), Vec3::new(0.2, 0.1, -1.0)],
            widths: vec![0.05, 0.05],
            color,
            layer: "LineDrawing".into(),
        }
    }

    fn camera() -> SnapshotCamera {
        SnapshotCamera::behind_view(
            &Pose::IDENTITY,
            &SnapshotSettings {
                width: 128,
                height: 128,
                ..SnapshotSettings::default()
            },
        )
    }

    #[tokio::test]
    async fn rasterizes_stroke_through_center() {
        let camera = camera();
        let mut backend = CpuRasterBackend::new();
        let target = backend
            .create_target(camera.width, camera.height, Color::WHITE)
            .await
            .expect("target");
        backend
            .render(target, &camera, &[horizontal_stroke(Color::RED)])
            .await
            .expect("render");
        backend.frame_complete(target).await.expect("frame");
        let pixels = backend.read_pixels(target).await.expect("pixels");

        assert_eq!(pixels.get_pixel(64, 64).0, [255, 0, 0]);
        assert_eq!(pixels.get_pixel(64, 10).0, [255, 255, 255]);
        assert_eq!(pixels.get_pixel(2, 64).0, [255, 255, 255]);
        backend.release_target(target);
        assert_eq!(backend.live_targets(), 0);
    }

    #[tokio::test]
    async fn pixels_are_gated_on_frame_completion() {
        let camera = camera();
        let mut backend = CpuRasterBackend::new();
        let target = backend
            .create_target(camera.width, camera.height, Color::WHITE)
            .await
            .expect("target");

        assert!(matches!(
            backend.frame_complete(target).await,
            Err(RenderError::NothingRendered(_))
        ));
        backend.render(target, &camera, &[]).await.expect("render");
        assert!(matches!(
            backend.read_pixels(target).await,
            Err(RenderError::FrameNotComplete(_))
        ));
    }

    #[tokio::test]
    async fn zero_sized_target_is_rejected() {
        let mut backend = CpuRasterBackend::new();
        assert!(matches!(
            backend.create_target(0, 16, Color::WHITE).await,
            Err(RenderError::InvalidSize { width: 0, height: 16 })
        ));
    }
}
