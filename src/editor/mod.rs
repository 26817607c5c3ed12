pub mod manipulator;
pub mod selection;
pub mod session;

pub use manipulator::{ManipulationError, ManipulationState, Manipulator};
pub use selection::{StrokeHit, find_closest_stroke, find_pointed_object};
pub use session::{DrawingSession, SessionEvent, SessionMode};

use crate::config::StrokeSettings;
use crate::scene::{Color, NodeId, Scene};
use crate::sketch::{StrokeCollection, StrokeId};

/// Anything the stylus can highlight and grab.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Target {
    Stroke(StrokeId),
    Object(NodeId),
}

/// Strokes and placed objects owned by one drawing session.
pub struct Canvas {
    pub strokes: StrokeCollection,
    pub scene: Scene,
}

impl Canvas {
    pub fn new(settings: StrokeSettings) -> Self {
        Self {
            strokes: StrokeCollection::new(settings),
            scene: Scene::new(),
        }
    }

    pub fn contains(&self, target: Target) -> bool {
        match target {
            Target::Stroke(id) => self.strokes.get(id).is_some(),
            Target::Object(node) => self.scene.contains(node),
        }
    }

    pub fn color(&self, target: Target) -> Option<Color> {
        match target {
            Target::Stroke(id) => self.strokes.get(id).map(|stroke| stroke.color),
            Target::Object(node) => self.scene.get(node).map(|node| node.color),
        }
    }

    pub fn set_color(&mut self, target: Target, color: Color) -> bool {
        match target {
            Target::Stroke(id) => self
                .strokes
                .get_mut(id)
                .map(|stroke| stroke.color = color)
                .is_some(),
            Target::Object(node) => self
                .scene
                .get_mut(node)
                .map(|node| node.color = color)
                .is_some(),
        }
    }
}
