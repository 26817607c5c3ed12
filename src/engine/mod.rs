use crate::config::SketchConfig;
use crate::editor::{DrawingSession, SessionEvent};
use crate::error::{SketchError, SketchResult};
use crate::generation::{
    AssetFetcher, AssetImporter, GenerationClient, GenerationOptions, GenerationTransport,
};
use crate::geometry::{Pose, Vec3};
use crate::render::{CpuRasterBackend, SnapshotBackend, SnapshotExporter};
use crate::scene::NodeId;
use crate::vr::{StylusDevice, ToolMode};
use tokio_util::sync::CancellationToken;

/// Where generated models are dropped into the scene.
pub const SPAWN_POSITION: Vec3 = Vec3::new(0.0, 1.0, 0.0);

/// Counters for the frame loop.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct FrameStats {
    pub frames: u64,
    pub total_time: f32,
    pub points_admitted: u64,
    pub exports: u64,
}

impl FrameStats {
    pub fn average_frame_time(&self) -> f32 {
        if self.frames == 0 {
            0.0
        } else {
            self.total_time / self.frames as f32
        }
    }
}

/// Frame driver: samples the stylus, advances the drawing session and runs
/// the export, generate and import pipeline when asked to.
pub struct SketchEngine<T, F, B = CpuRasterBackend> {
    device: Box<dyn StylusDevice>,
    session: DrawingSession,
    exporter: SnapshotExporter<B>,
    client: GenerationClient<T>,
    importer: AssetImporter<F>,
    options: GenerationOptions,
    mode: ToolMode,
    head: Pose,
    export_requested: bool,
    stats: FrameStats,
}

impl<T, F, B> SketchEngine<T, F, B>
where
    T: GenerationTransport,
    F: AssetFetcher,
    B: SnapshotBackend,
{
    pub fn new(
        config: &SketchConfig,
        device: Box<dyn StylusDevice>,
        backend: B,
        transport: T,
        fetcher: F,
    ) -> Self {
        let layer = config.resolve_layer(&config.stroke.layer);
        let mut stroke = config.stroke.clone();
        stroke.layer = layer.clone();
        log::info!("[engine] using {} on layer '{layer}'", device.label());

        Self {
            device,
            session: DrawingSession::new(stroke, config.selection.clone()),
            exporter: SnapshotExporter::new(backend, config.snapshot.clone(), layer),
            client: GenerationClient::new(transport, config.generation.clone()),
            importer: AssetImporter::new(fetcher, config.import.clone()),
            options: GenerationOptions::from(&config.generation),
            mode: ToolMode::default(),
            head: Pose::IDENTITY,
            export_requested: false,
            stats: FrameStats::default(),
        }
    }

    pub fn session(&self) -> &DrawingSession {
        &self.session
    }

    pub fn session_mut(&mut self) -> &mut DrawingSession {
        &mut self.session
    }

    pub fn exporter(&self) -> &SnapshotExporter<B> {
        &self.exporter
    }

    pub fn client(&self) -> &GenerationClient<T> {
        &self.client
    }

    pub fn options_mut(&mut self) -> &mut GenerationOptions {
        &mut self.options
    }

    pub fn stats(&self) -> FrameStats {
        self.stats
    }

    pub fn head(&self) -> Pose {
        self.head
    }

    pub fn tool_mode(&self) -> ToolMode {
        self.mode
    }

    /// Only the pencil drives the drawing session. Leaving it drops any
    /// highlight or grab so no target stays tinted.
    pub fn set_tool_mode(&mut self, mode: ToolMode) {
        if self.mode == mode {
            return;
        }
        if self.mode == ToolMode::Pencil {
            self.session.reset_selection();
        }
        log::info!("[engine] tool mode {} -> {}", self.mode.label(), mode.label());
        self.mode = mode;
    }

    /// One frame: sample the device and feed the session.
    pub fn tick(&mut self, delta_seconds: f32) -> Vec<SessionEvent> {
        let sample = self.device.sample(delta_seconds);
        self.head = sample.head;
        self.stats.frames += 1;
        self.stats.total_time += delta_seconds;

        if self.mode != ToolMode::Pencil {
            self.session.track_buttons(&sample.stylus);
            return Vec::new();
        }
        let events = self
            .session
            .advance(&sample.stylus, self.device.as_haptics());
        for event in &events {
            match event {
                SessionEvent::PointAdmitted(_) => self.stats.points_admitted += 1,
                SessionEvent::ExportRequested => self.export_requested = true,
                _ => {}
            }
        }
        events
    }

    /// Clears and returns the pending export request.
    pub fn take_export_request(&mut self) -> bool {
        std::mem::take(&mut self.export_requested)
    }

    /// Exports the current sketch from the viewer's pose, generates a model
    /// from it and imports the result at [`SPAWN_POSITION`]. Strokes are
    /// cleared only once the model is in the scene.
    pub async fn export_and_generate(&mut self, cancel: &CancellationToken) -> SketchResult<NodeId> {
        if self.session.strokes().is_empty() {
            return Err(SketchError::InvalidInput("nothing has been drawn".into()));
        }
        let image = self
            .exporter
            .export_async(self.head, self.session.strokes(), cancel)
            .await?;
        self.stats.exports += 1;

        let url = self.client.generate(&image, &self.options, cancel).await?;
        let root = self
            .importer
            .import_result(&url, &mut self.session.canvas_mut().scene, None, cancel)
            .await?;

        if let Some(node) = self.session.canvas_mut().scene.get_mut(root) {
            node.transform.position = SPAWN_POSITION;
        }
        self.session.clear_all();
        log::info!("[engine] placed generated model {root:?}");
        Ok(root)
    }

    /// Runs the pipeline if the session asked for it since the last call.
    pub async fn run_pending_export(
        &mut self,
        cancel: &CancellationToken,
    ) -> Option<SketchResult<NodeId>> {
        if !self.take_export_request() {
            return None;
        }
        let result = self.export_and_generate(cancel).await;
        if let Err(err) = &result {
            log::warn!("[engine] export failed: {err}");
        }
        Some(result)
    }
}

#[cfg(feature = "remote-http")]
impl SketchEngine<crate::generation::HttpTransport, crate::generation::HttpAssetFetcher> {
    /// Engine wired to the HTTP service, the software rasterizer and the
    /// simulated stylus.
    pub fn connect(config: &SketchConfig) -> SketchResult<Self> {
        let transport = crate::generation::HttpTransport::new(&config.generation)?;
        let fetcher =
            crate::generation::HttpAssetFetcher::new(config.generation.request_timeout())?;
        Ok(Self::new(
            config,
            Box::new(crate::vr::SimulatedStylus::new()),
            CpuRasterBackend::new(),
            transport,
            fetcher,
        ))
    }
}
