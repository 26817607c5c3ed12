use crate::scene::Color;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

pub const API_KEY_ENV: &str = "INK_SKETCH_API_KEY";
pub const DEFAULT_LAYER: &str = "Default";
pub const DEFAULT_BASE_URL: &str = "https://api.meshy.ai/openapi/v1";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },
    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("invalid config value for {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SketchConfig {
    pub stroke: StrokeSettings,
    pub selection: SelectionSettings,
    pub snapshot: SnapshotSettings,
    pub generation: GenerationSettings,
    pub import: ImportSettings,
    /// Render layers known to the host.
    pub layers: Vec<String>,
}

impl SketchConfig {
    pub fn from_json(text: &str) -> Result<Self, ConfigError> {
        let config: SketchConfig = serde_json::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let mut config = Self::from_json(&text)?;
        config.apply_env();
        log::info!("[config] loaded {}", path.display());
        Ok(config)
    }

    /// Environment overrides; currently only the API key.
    pub fn apply_env(&mut self) {
        if let Ok(key) = std::env::var(API_KEY_ENV) {
            if !key.trim().is_empty() {
                self.generation.api_key = key.trim().to_string();
            }
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let stroke = &self.stroke;
        if !(stroke.min_width > 0.0 && stroke.min_width <= stroke.max_width) {
            return Err(ConfigError::Invalid {
                field: "stroke.min_width",
                reason: format!(
                    "expected 0 < min_width <= max_width, got {} / {}",
                    stroke.min_width, stroke.max_width
                ),
            });
        }
        if stroke.min_point_spacing < 0.0 {
            return Err(ConfigError::Invalid {
                field: "stroke.min_point_spacing",
                reason: "must not be negative".into(),
            });
        }
        if self.selection.highlight_threshold <= 0.0 {
            return Err(ConfigError::Invalid {
                field: "selection.highlight_threshold",
                reason: "must be positive".into(),
            });
        }
        if self.snapshot.width == 0 || self.snapshot.height == 0 {
            return Err(ConfigError::Invalid {
                field: "snapshot.width",
                reason: "snapshot dimensions must be non-zero".into(),
            });
        }
        if self.generation.poll_interval_ms == 0 {
            return Err(ConfigError::Invalid {
                field: "generation.poll_interval_ms",
                reason: "must be positive".into(),
            });
        }
        url::Url::parse(&self.generation.base_url).map_err(|err| ConfigError::Invalid {
            field: "generation.base_url",
            reason: err.to_string(),
        })?;
        Ok(())
    }

    /// Resolves `name` against the known layers, falling back to the default
    /// layer with a warning.
    pub fn resolve_layer(&self, name: &str) -> String {
        if self.layers.is_empty() || self.layers.iter().any(|layer| layer == name) {
            return name.to_string();
        }
        log::warn!("[config] layer '{name}' not found; using '{DEFAULT_LAYER}' layer");
        DEFAULT_LAYER.to_string()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct StrokeSettings {
    pub max_width: f32,
    pub min_width: f32,
    pub min_point_spacing: f32,
    pub fixed_width: bool,
    pub color: Color,
    pub layer: String,
}

impl Default for StrokeSettings {
    fn default() -> Self {
        Self {
            max_width: 0.01,
            min_width: 0.0005,
            min_point_spacing: 0.0005,
            fixed_width: false,
            color: Color::RED,
            layer: "LineDrawing".into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SelectionSettings {
    pub highlight_threshold: f32,
    pub highlight_color: Color,
    /// Maximum ray distance for pointing at placed objects.
    pub object_reach: f32,
}

impl Default for SelectionSettings {
    fn default() -> Self {
        Self {
            highlight_threshold: 0.01,
            highlight_color: Color::YELLOW,
            object_reach: 2.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SnapshotSettings {
    pub width: u32,
    pub height: u32,
    pub projection_distance: f32,
    pub camera_distance: f32,
    pub fov_degrees: f32,
    pub near_clip: f32,
    pub far_clip: f32,
    pub background: Color,
}

impl Default for SnapshotSettings {
    fn default() -> Self {
        Self {
            width: 1024,
            height: 1024,
            projection_distance: 1.0,
            camera_distance: 1.0,
            fov_degrees: 60.0,
            near_clip: 0.01,
            far_clip: 10.0,
            background: Color::WHITE,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct GenerationSettings {
    pub base_url: String,
    #[serde(skip_serializing)]
    pub api_key: String,
    pub ai_model: String,
    pub enable_pbr: bool,
    pub should_remesh: bool,
    pub should_texture: bool,
    pub request_timeout_secs: u64,
    pub total_timeout_secs: u64,
    pub poll_interval_ms: u64,
    /// Transport failures tolerated per poll loop before giving up.
    pub transport_retries: u32,
}

impl GenerationSettings {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn total_timeout(&self) -> Duration {
        Duration::from_secs(self.total_timeout_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

impl Default for GenerationSettings {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.into(),
            api_key: String::new(),
            ai_model: "latest".into(),
            enable_pbr: false,
            should_remesh: true,
            should_texture: false,
            request_timeout_secs: 120,
            total_timeout_secs: 300,
            poll_interval_ms: 2000,
            transport_retries: 2,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ImportSettings {
    pub add_physics: bool,
    pub add_colliders: bool,
    pub convex: bool,
    pub mass: f32,
    /// Meshes above this triangle count get a box collider instead of a hull.
    pub convex_triangle_limit: u32,
}

impl Default for ImportSettings {
    fn default() -> Self {
        Self {
            add_physics: true,
            add_colliders: true,
            convex: true,
            mass: 1.0,
            convex_triangle_limit: 255,
        }
    }
}
