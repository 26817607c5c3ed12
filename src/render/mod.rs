mod raster;

pub use raster::CpuRasterBackend;

use crate::config::SnapshotSettings;
use crate::error::{SketchError, SketchResult, cancellable};
use crate::geometry::{Pose, Quat, Vec3, project_onto_plane};
use crate::scene::Color;
use crate::sketch::{Stroke, StrokeId};
use async_trait::async_trait;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use glam::{Mat3, Vec2};
use image::{DynamicImage, ImageFormat, RgbImage};
use std::io::Cursor;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

/// Height of the capture camera above the viewer's eye line.
const CAMERA_LIFT: f32 = 0.1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TargetId(pub u64);

#[derive(Debug, Error)]
pub enum RenderError {
    #[error("render target {0:?} does not exist")]
    UnknownTarget(TargetId),
    #[error("invalid render target size {width}x{height}")]
    InvalidSize { width: u32, height: u32 },
    #[error("nothing was rendered into {0:?}")]
    NothingRendered(TargetId),
    #[error("pixels of {0:?} read before the frame completed")]
    FrameNotComplete(TargetId),
    #[error("png encoding failed: {0}")]
    Encode(#[from] image::ImageError),
    #[error("snapshot backend failure: {0}")]
    Backend(String),
}

/// Stroke geometry flattened for capture. Owns its points so the source
/// strokes keep their 3D shape.
#[derive(Debug, Clone, PartialEq)]
pub struct FlatStroke {
    pub id: StrokeId,
    pub points: Vec<Vec3>,
    pub widths: Vec<f32>,
    pub color: Color,
    pub layer: String,
}

/// Flattens every stroke onto the plane through `view_origin` perpendicular
/// to `view_forward`.
pub fn project_to_plane(view_origin: Vec3, view_forward: Vec3, strokes: &[Stroke]) -> Vec<FlatStroke> {
    let normal = view_forward.normalize_or_zero();
    strokes
        .iter()
        .filter(|stroke| !stroke.is_empty())
        .map(|stroke| FlatStroke {
            id: stroke.id(),
            points: stroke
                .points()
                .iter()
                .map(|point| project_onto_plane(*point, view_origin, normal))
                .collect(),
            widths: stroke.widths().to_vec(),
            color: stroke.color,
            layer: stroke.layer.clone(),
        })
        .collect()
}

/// Temporary perspective camera used for a single capture.
#[derive(Debug, Clone, PartialEq)]
pub struct SnapshotCamera {
    pub pose: Pose,
    pub width: u32,
    pub height: u32,
    /// Vertical field of view.
    pub fov_degrees: f32,
    pub near_clip: f32,
    pub far_clip: f32,
    pub background: Color,
}

impl SnapshotCamera {
    /// Camera `camera_distance` behind the viewer, slightly raised, looking
    /// along the view direction with world up.
    pub fn behind_view(view: &Pose, settings: &SnapshotSettings) -> Self {
        let forward = view.forward();
        let position = view.position - forward * settings.camera_distance + Vec3::Y * CAMERA_LIFT;
        Self {
            pose: Pose::new(position, look_rotation(forward, Vec3::Y)),
            width: settings.width,
            height: settings.height,
            fov_degrees: settings.fov_degrees,
            near_clip: settings.near_clip,
            far_clip: settings.far_clip,
            background: settings.background,
        }
    }

    pub fn focal_length_px(&self) -> f32 {
        self.height as f32 * 0.5 / (self.fov_degrees.to_radians() * 0.5).tan()
    }

    /// Pixel coordinates and view depth of `point`, or `None` outside the
    /// clip range.
    pub fn project(&self, point: Vec3) -> Option<(Vec2, f32)> {
        let local = self.pose.inverse_transform_point(point);
        let depth = -local.z;
        if depth < self.near_clip || depth > self.far_clip {
            return None;
        }
        let focal = self.focal_length_px();
        let pixel = Vec2::new(
            self.width as f32 * 0.5 + local.x / depth * focal,
            self.height as f32 * 0.5 - local.y / depth * focal,
        );
        Some((pixel, depth))
    }
}

fn look_rotation(forward: Vec3, up: Vec3) -> Quat {
    let forward = forward.normalize_or_zero();
    if forward == Vec3::ZERO {
        return Quat::IDENTITY;
    }
    let mut right = forward.cross(up);
    if right.length_squared() <= f32::EPSILON {
        right = forward.cross(Vec3::Z);
    }
    let right = right.normalize();
    let up = right.cross(forward);
    Quat::from_mat3(&Mat3::from_cols(right, up, -forward))
}

/// Offscreen render path. Pixels may only be read after `frame_complete`
/// has resolved for the target.
#[async_trait]
pub trait SnapshotBackend: Send {
    fn label(&self) -> &'static str;

    async fn create_target(
        &mut self,
        width: u32,
        height: u32,
        background: Color,
    ) -> Result<TargetId, RenderError>;

    async fn render(
        &mut self,
        target: TargetId,
        camera: &SnapshotCamera,
        strokes: &[FlatStroke],
    ) -> Result<(), RenderError>;

    async fn frame_complete(&mut self, target: TargetId) -> Result<(), RenderError>;

    async fn read_pixels(&mut self, target: TargetId) -> Result<RgbImage, RenderError>;

    fn release_target(&mut self, target: TargetId);
}

/// Lossless PNG of `pixels`, base64 encoded with the standard alphabet.
pub fn encode_to_base64(pixels: &RgbImage) -> Result<String, RenderError> {
    let mut bytes = Cursor::new(Vec::new());
    DynamicImage::ImageRgb8(pixels.clone()).write_to(&mut bytes, ImageFormat::Png)?;
    Ok(STANDARD.encode(bytes.into_inner()))
}

/// Drives one backend through project, capture and encode. Taking `&mut self`
/// keeps captures from overlapping.
pub struct SnapshotExporter<B> {
    backend: B,
    settings: SnapshotSettings,
    layer: String,
}

impl<B: SnapshotBackend> SnapshotExporter<B> {
    pub fn new(backend: B, settings: SnapshotSettings, layer: impl Into<String>) -> Self {
        Self {
            backend,
            settings,
            layer: layer.into(),
        }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn settings(&self) -> &SnapshotSettings {
        &self.settings
    }

    pub fn layer(&self) -> &str {
        &self.layer
    }

    pub fn camera_for(&self, view: &Pose) -> SnapshotCamera {
        SnapshotCamera::behind_view(view, &self.settings)
    }

    /// Renders the strokes on the capture layer. The target is released
    /// whether the capture succeeds, fails or is cancelled.
    pub async fn capture_view(
        &mut self,
        camera: &SnapshotCamera,
        strokes: &[FlatStroke],
        cancel: &CancellationToken,
    ) -> SketchResult<RgbImage> {
        let visible: Vec<FlatStroke> = strokes
            .iter()
            .filter(|stroke| stroke.layer == self.layer)
            .cloned()
            .collect();

        let backend = &mut self.backend;
        let target = cancellable(cancel, async {
            Ok::<_, SketchError>(
                backend
                    .create_target(camera.width, camera.height, camera.background)
                    .await?,
            )
        })
        .await?;

        let result = cancellable(cancel, async {
            backend.render(target, camera, &visible).await?;
            backend.frame_complete(target).await?;
            Ok::<_, SketchError>(backend.read_pixels(target).await?)
        })
        .await;

        backend.release_target(target);
        log::debug!(
            "[render] released {target:?} on {} after capturing {} strokes",
            backend.label(),
            visible.len()
        );
        result
    }

    /// Flattens `strokes` in front of `view`, captures them and returns the
    /// base64 PNG. The strokes themselves are left untouched.
    pub async fn export_async(
        &mut self,
        view: Pose,
        strokes: &[Stroke],
        cancel: &CancellationToken,
    ) -> SketchResult<String> {
        if cancel.is_cancelled() {
            return Err(SketchError::Cancelled);
        }
        let forward = view.forward();
        let plane_origin = view.position + forward * self.settings.projection_distance;
        let flat = project_to_plane(plane_origin, forward, strokes);
        let camera = self.camera_for(&view);

        let pixels = self.capture_view(&camera, &flat, cancel).await?;
        let encoded = encode_to_base64(&pixels)?;
        log::info!(
            "[render] exported {} strokes ({}x{}) as {} base64 bytes",
            flat.len(),
            camera.width,
            camera.height,
            encoded.len()
        );
        Ok(encoded)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StrokeSettings;
    use crate::sketch::StrokeCollection;

    fn strokes_in_front() -> StrokeCollection {
        let mut strokes = StrokeCollection::new(StrokeSettings::default());
        strokes.begin_stroke();
        strokes.admit_point(Vec3::new(-0.2, 0.1, -0.5), 1.0);
        strokes.admit_point(Vec3::new(0.2, 0.1, -1.5), 1.0);
        strokes.end_stroke();
        strokes
    }

    fn small_settings() -> SnapshotSettings {
        SnapshotSettings {
            width: 64,
            height: 64,
            ..SnapshotSettings::default()
        }
    }

    #[test]
    fn projection_flattens_copies_only() {
        let strokes = strokes_in_front();
        let origin = Vec3::new(0.0, 0.0, -1.0);
        let flat = project_to_plane(origin, Vec3::NEG_Z, strokes.strokes());

        assert_eq!(flat.len(), 1);
        for point in &flat[0].points {
            assert!((point.z + 1.0).abs() < 1e-6);
        }
        assert_eq!(strokes.strokes()[0].points()[0], Vec3::new(-0.2, 0.1, -0.5));
        assert_eq!(flat[0].widths, strokes.strokes()[0].widths());
    }

    #[test]
    fn camera_sits_behind_viewer_and_looks_forward() {
        let camera = SnapshotCamera::behind_view(&Pose::IDENTITY, &SnapshotSettings::default());
        assert!(camera.pose.position.abs_diff_eq(Vec3::new(0.0, 0.1, 1.0), 1e-6));
        assert!(camera.pose.forward().abs_diff_eq(Vec3::NEG_Z, 1e-6));

        let (pixel, depth) = camera
            .project(Vec3::new(0.0, 0.1, -1.0))
            .expect("point in front of camera");
        assert!(pixel.abs_diff_eq(Vec2::new(512.0, 512.0), 1e-3));
        assert!((depth - 2.0).abs() < 1e-5);
        assert!(camera.project(Vec3::new(0.0, 0.1, 5.0)).is_none());
    }

    #[test]
    fn look_rotation_handles_vertical_forward() {
        let rotation = look_rotation(Vec3::NEG_Y, Vec3::Y);
        assert!((rotation * Vec3::NEG_Z).abs_diff_eq(Vec3::NEG_Y, 1e-5));
    }

    #[test]
    fn png_encoding_is_deterministic() {
        let pixels = RgbImage::from_pixel(4, 4, image::Rgb([255, 0, 0]));
        let first = encode_to_base64(&pixels).expect("encode");
        let second = encode_to_base64(&pixels).expect("encode");
        assert_eq!(first, second);
        assert!(first.starts_with("iVBORw0KGgo"));
    }

    #[tokio::test]
    async fn export_releases_target_and_keeps_strokes() {
        let strokes = strokes_in_front();
        let mut exporter =
            SnapshotExporter::new(CpuRasterBackend::new(), small_settings(), "LineDrawing");

        let encoded = exporter
            .export_async(Pose::IDENTITY, strokes.strokes(), &CancellationToken::new())
            .await
            .expect("export should succeed");

        assert!(encoded.starts_with("iVBORw0KGgo"));
        assert_eq!(exporter.backend().live_targets(), 0);
        assert_eq!(exporter.backend().created_targets(), 1);
        assert_eq!(strokes.strokes()[0].points()[1], Vec3::new(0.2, 0.1, -1.5));
    }

    #[tokio::test]
    async fn cancelled_export_allocates_nothing() {
        let strokes = strokes_in_front();
        let mut exporter =
            SnapshotExporter::new(CpuRasterBackend::new(), small_settings(), "LineDrawing");
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = exporter
            .export_async(Pose::IDENTITY, strokes.strokes(), &cancel)
            .await
            .expect_err("cancelled export");
        assert!(matches!(err, SketchError::Cancelled));
        assert_eq!(exporter.backend().created_targets(), 0);
    }

    #[tokio::test]
    async fn strokes_off_layer_are_not_captured() {
        let mut strokes = StrokeCollection::with_layer(StrokeSettings::default(), "UI");
        strokes.begin_stroke();
        strokes.admit_point(Vec3::new(-0.2, 0.1, -1.0), 1.0);
        strokes.admit_point(Vec3::new(0.2, 0.1, -1.0), 1.0);

        let mut exporter =
            SnapshotExporter::new(CpuRasterBackend::new(), small_settings(), "LineDrawing");
        let flat = project_to_plane(Vec3::new(0.0, 0.0, -1.0), Vec3::NEG_Z, strokes.strokes());
        let camera = exporter.camera_for(&Pose::IDENTITY);
        let pixels = exporter
            .capture_view(&camera, &flat, &CancellationToken::new())
            .await
            .expect("capture");

        assert!(pixels.pixels().all(|pixel| pixel.0 == [255, 255, 255]));
    }
}
