pub mod config;
pub mod editor;
pub mod engine;
pub mod error;
pub mod generation;
pub mod geometry;
pub mod render;
pub mod scene;
pub mod sketch;
pub mod vr;

pub use config::SketchConfig;
pub use engine::SketchEngine;
pub use error::{SketchError, SketchResult};
