use super::{Canvas, Target};
use crate::geometry::{Pose, Vec3, grab_delta};
use crate::scene::{Color, PhysicsBody};
use crate::vr::Haptics;
use thiserror::Error;

const GRAB_PULSE_INTENSITY: f32 = 1.0;
const GRAB_PULSE_SECONDS: f32 = 0.03;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ManipulationError {
    #[error("nothing is highlighted")]
    NothingHighlighted,
    #[error("a grab is already in progress")]
    GrabInProgress,
    #[error("no grab in progress")]
    NotGrabbing,
    #[error("target {0:?} no longer exists")]
    TargetMissing(Target),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct BodyFlags {
    use_gravity: bool,
    is_kinematic: bool,
}

impl BodyFlags {
    fn capture(body: &PhysicsBody) -> Self {
        Self {
            use_gravity: body.use_gravity,
            is_kinematic: body.is_kinematic,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct Highlight {
    target: Target,
    cached_color: Color,
}

#[derive(Debug, Clone, PartialEq)]
enum GrabOrigin {
    Points(Vec<Vec3>),
    Object {
        pose: Pose,
        saved_flags: Option<BodyFlags>,
    },
}

#[derive(Debug, Clone, PartialEq)]
struct Grab {
    device_start: Pose,
    origin: GrabOrigin,
}

#[derive(Debug, Clone, PartialEq, Default)]
enum State {
    #[default]
    Idle,
    Highlighted(Highlight),
    Grabbing(Highlight, Grab),
}

/// Public view of the manipulation state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ManipulationState {
    Idle,
    Highlighted(Target),
    Grabbing(Target),
}

/// Highlight and grab state machine: `Idle -> Highlighted -> Grabbing -> Idle`.
#[derive(Debug, Default)]
pub struct Manipulator {
    highlight_color: Color,
    state: State,
}

impl Manipulator {
    pub fn new(highlight_color: Color) -> Self {
        Self {
            highlight_color,
            state: State::Idle,
        }
    }

    pub fn state(&self) -> ManipulationState {
        match &self.state {
            State::Idle => ManipulationState::Idle,
            State::Highlighted(highlight) => ManipulationState::Highlighted(highlight.target),
            State::Grabbing(highlight, _) => ManipulationState::Grabbing(highlight.target),
        }
    }

    pub fn highlighted(&self) -> Option<Target> {
        match &self.state {
            State::Idle => None,
            State::Highlighted(highlight) | State::Grabbing(highlight, _) => Some(highlight.target),
        }
    }

    pub fn is_grabbing(&self) -> bool {
        matches!(self.state, State::Grabbing(..))
    }

    pub fn is_active(&self) -> bool {
        !matches!(self.state, State::Idle)
    }

    /// Highlights `target`, first releasing any previous highlight.
    pub fn highlight(
        &mut self,
        target: Target,
        canvas: &mut Canvas,
        haptics: &mut dyn Haptics,
    ) -> Result<(), ManipulationError> {
        let replacing = match &self.state {
            State::Grabbing(..) => return Err(ManipulationError::GrabInProgress),
            State::Highlighted(current) if current.target == target => return Ok(()),
            State::Highlighted(_) => true,
            State::Idle => false,
        };
        if !canvas.contains(target) {
            return Err(ManipulationError::TargetMissing(target));
        }
        if replacing {
            self.unhighlight(canvas, haptics);
        }

        let cached_color = canvas
            .color(target)
            .ok_or(ManipulationError::TargetMissing(target))?;
        canvas.set_color(target, self.highlight_color);
        self.state = State::Highlighted(Highlight {
            target,
            cached_color,
        });
        haptics.click();
        log::debug!("[editor] highlighted {:?}", target);
        Ok(())
    }

    /// Drops the highlight, ending a grab first if one is running. Returns
    /// the target that was released.
    pub fn unhighlight(&mut self, canvas: &mut Canvas, haptics: &mut dyn Haptics) -> Option<Target> {
        let released = self.release(canvas)?;
        haptics.click();
        log::debug!("[editor] unhighlighted {:?}", released);
        Some(released)
    }

    pub fn begin_grab(
        &mut self,
        device_start: Pose,
        canvas: &mut Canvas,
        haptics: &mut dyn Haptics,
    ) -> Result<Target, ManipulationError> {
        let highlight = match &self.state {
            State::Idle => return Err(ManipulationError::NothingHighlighted),
            State::Grabbing(..) => return Err(ManipulationError::GrabInProgress),
            State::Highlighted(highlight) => *highlight,
        };

        let origin = match highlight.target {
            Target::Stroke(id) => {
                let stroke = canvas
                    .strokes
                    .get(id)
                    .ok_or(ManipulationError::TargetMissing(highlight.target))?;
                GrabOrigin::Points(stroke.points().to_vec())
            }
            Target::Object(node) => {
                let node = canvas
                    .scene
                    .get_mut(node)
                    .ok_or(ManipulationError::TargetMissing(highlight.target))?;
                let saved_flags = node.body.as_mut().map(|body| {
                    let saved = BodyFlags::capture(body);
                    body.use_gravity = false;
                    body.is_kinematic = true;
                    body.linear_velocity = Vec3::ZERO;
                    body.angular_velocity = Vec3::ZERO;
                    saved
                });
                GrabOrigin::Object {
                    pose: node.transform,
                    saved_flags,
                }
            }
        };

        self.state = State::Grabbing(
            highlight,
            Grab {
                device_start,
                origin,
            },
        );
        haptics.pulse(GRAB_PULSE_INTENSITY, GRAB_PULSE_SECONDS);
        log::debug!("[editor] grabbing {:?}", highlight.target);
        Ok(highlight.target)
    }

    /// Moves the grabbed target by the device motion since the grab began.
    pub fn update_grab(&mut self, device: Pose, canvas: &mut Canvas) -> Result<(), ManipulationError> {
        let State::Grabbing(highlight, grab) = &self.state else {
            return Err(ManipulationError::NotGrabbing);
        };
        let missing = ManipulationError::TargetMissing(highlight.target);

        match (&grab.origin, highlight.target) {
            (GrabOrigin::Points(original), Target::Stroke(id)) => {
                let stroke = canvas.strokes.get_mut(id).ok_or(missing)?;
                let moved: Vec<Vec3> = original
                    .iter()
                    .map(|point| {
                        grab_delta(&grab.device_start, &device, &Pose::from_position(*point))
                            .position
                    })
                    .collect();
                stroke.set_points(&moved);
            }
            (GrabOrigin::Object { pose, .. }, Target::Object(node)) => {
                let node = canvas.scene.get_mut(node).ok_or(missing)?;
                node.transform = grab_delta(&grab.device_start, &device, pose);
            }
            _ => return Err(missing),
        }
        Ok(())
    }

    /// Ends the grab, restoring physics flags and clearing the selection.
    pub fn end_grab(
        &mut self,
        canvas: &mut Canvas,
        haptics: &mut dyn Haptics,
    ) -> Result<Target, ManipulationError> {
        if !self.is_grabbing() {
            return Err(ManipulationError::NotGrabbing);
        }
        let released = self.release(canvas).ok_or(ManipulationError::NotGrabbing)?;
        haptics.click();
        log::debug!("[editor] released {:?}", released);
        Ok(released)
    }

    /// Returns to idle without haptics, restoring whatever still exists.
    pub fn reset(&mut self, canvas: &mut Canvas) {
        self.release(canvas);
    }

    fn release(&mut self, canvas: &mut Canvas) -> Option<Target> {
        let highlight = match std::mem::take(&mut self.state) {
            State::Idle => return None,
            State::Highlighted(highlight) => highlight,
            State::Grabbing(highlight, grab) => {
                if let (GrabOrigin::Object { saved_flags, .. }, Target::Object(node)) =
                    (grab.origin, highlight.target)
                {
                    let body = canvas.scene.get_mut(node).and_then(|node| node.body.as_mut());
                    restore_body(body, saved_flags);
                }
                highlight
            }
        };
        canvas.set_color(highlight.target, highlight.cached_color);
        Some(highlight.target)
    }
}

fn restore_body(body: Option<&mut PhysicsBody>, saved: Option<BodyFlags>) {
    match (body, saved) {
        (Some(body), Some(flags)) => {
            body.use_gravity = flags.use_gravity;
            body.is_kinematic = flags.is_kinematic;
        }
        (Some(_), None) => {
            log::warn!("[editor] body appeared during grab; leaving its flags untouched");
        }
        (None, Some(_)) => {
            log::warn!("[editor] body removed during grab; nothing to restore");
        }
        (None, None) => {}
    }
}
