use super::{Canvas, Manipulator, ManipulationState, Target, find_closest_stroke, find_pointed_object};
use crate::config::{SelectionSettings, StrokeSettings};
use crate::geometry::Ray;
use crate::sketch::{AdmittedPoint, Stroke, StrokeCollection, StrokeId};
use crate::vr::{ButtonLatch, Haptics, StylusState};

const DRAW_PULSE_DAMPING: f32 = 0.6;
const DRAW_PULSE_SECONDS: f32 = 0.01;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionMode {
    Idle,
    Drawing(StrokeId),
    Highlighting(Target),
    Grabbing(Target),
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SessionEvent {
    StrokeStarted(StrokeId),
    PointAdmitted(AdmittedPoint),
    Highlighted(Target),
    Unhighlighted(Target),
    GrabStarted(Target),
    GrabEnded(Target),
    StrokeUndone(StrokeId),
    ExportRequested,
}

/// Event-driven drawing session. Each stylus sample advances the state
/// machine; drawing always preempts highlighting and grabbing.
pub struct DrawingSession {
    canvas: Canvas,
    manipulator: Manipulator,
    selection: SelectionSettings,
    drawing: Option<StrokeId>,
    front: ButtonLatch,
    back: ButtonLatch,
}

impl DrawingSession {
    pub fn new(stroke: StrokeSettings, selection: SelectionSettings) -> Self {
        Self::with_canvas(Canvas::new(stroke), selection)
    }

    pub fn with_canvas(canvas: Canvas, selection: SelectionSettings) -> Self {
        Self {
            canvas,
            manipulator: Manipulator::new(selection.highlight_color),
            selection,
            drawing: None,
            front: ButtonLatch::default(),
            back: ButtonLatch::default(),
        }
    }

    pub fn canvas(&self) -> &Canvas {
        &self.canvas
    }

    pub fn canvas_mut(&mut self) -> &mut Canvas {
        &mut self.canvas
    }

    pub fn strokes(&self) -> &[Stroke] {
        self.canvas.strokes.strokes()
    }

    pub fn stroke_collection(&self) -> &StrokeCollection {
        &self.canvas.strokes
    }

    pub fn mode(&self) -> SessionMode {
        if let Some(stroke) = self.drawing {
            return SessionMode::Drawing(stroke);
        }
        match self.manipulator.state() {
            ManipulationState::Idle => SessionMode::Idle,
            ManipulationState::Highlighted(target) => SessionMode::Highlighting(target),
            ManipulationState::Grabbing(target) => SessionMode::Grabbing(target),
        }
    }

    pub fn advance(&mut self, state: &StylusState, haptics: &mut dyn Haptics) -> Vec<SessionEvent> {
        let mut events = Vec::new();
        let front_pressed = self.front.update(state.front);
        let back_pressed = self.back.update(state.back);

        let analog = state.analog_input();
        if analog > 0.0 && state.can_draw() {
            self.draw(state, analog, haptics, &mut events);
            return events;
        }
        if self.drawing.take().is_some() {
            self.canvas.strokes.end_stroke();
        }

        if self.manipulator.is_grabbing() {
            if state.back {
                if let Err(err) = self.manipulator.update_grab(state.pose, &mut self.canvas) {
                    log::warn!("[session] grab lost its target: {err}");
                    self.release(haptics, &mut events);
                }
            } else if let Ok(target) = self.manipulator.end_grab(&mut self.canvas, haptics) {
                events.push(SessionEvent::GrabEnded(target));
            }
            return events;
        }

        let hovered = self.hovered_target(state);
        let current = self.manipulator.highlighted();
        match hovered {
            Some(target) if current != Some(target) => {
                if let Some(previous) = current {
                    events.push(SessionEvent::Unhighlighted(previous));
                }
                match self.manipulator.highlight(target, &mut self.canvas, haptics) {
                    Ok(()) => events.push(SessionEvent::Highlighted(target)),
                    Err(err) => log::warn!("[session] failed to highlight {target:?}: {err}"),
                }
                return events;
            }
            None if current.is_some() => {
                self.release(haptics, &mut events);
                return events;
            }
            _ => {}
        }

        if back_pressed {
            if self.manipulator.highlighted().is_some() {
                match self
                    .manipulator
                    .begin_grab(state.pose, &mut self.canvas, haptics)
                {
                    Ok(target) => events.push(SessionEvent::GrabStarted(target)),
                    Err(err) => log::warn!("[session] failed to begin grab: {err}"),
                }
            } else if let Some(stroke) = self.undo_last_stroke() {
                events.push(SessionEvent::StrokeUndone(stroke));
            }
            return events;
        }

        if front_pressed {
            events.push(SessionEvent::ExportRequested);
        }
        events
    }

    pub fn undo_last_stroke(&mut self) -> Option<StrokeId> {
        let last = self.canvas.strokes.last().map(Stroke::id)?;
        if self.manipulator.highlighted() == Some(Target::Stroke(last)) {
            self.manipulator.reset(&mut self.canvas);
        }
        if self.drawing == Some(last) {
            self.drawing = None;
        }
        self.canvas.strokes.undo_last_stroke().map(|stroke| stroke.id())
    }

    /// Feeds button levels without acting on them, so a button already held
    /// when the session regains the stylus does not count as a press.
    pub fn track_buttons(&mut self, state: &StylusState) {
        self.front.update(state.front);
        self.back.update(state.back);
    }

    /// Drops any highlight or grab without haptics and ends the active stroke.
    pub fn reset_selection(&mut self) {
        self.manipulator.reset(&mut self.canvas);
        if self.drawing.take().is_some() {
            self.canvas.strokes.end_stroke();
        }
    }

    /// Discards every stroke and returns the selection to idle.
    pub fn clear_all(&mut self) {
        self.manipulator.reset(&mut self.canvas);
        self.canvas.strokes.clear_all();
        self.drawing = None;
    }

    fn draw(
        &mut self,
        state: &StylusState,
        analog: f32,
        haptics: &mut dyn Haptics,
        events: &mut Vec<SessionEvent>,
    ) {
        if self.manipulator.is_active() {
            let was_grabbing = self.manipulator.is_grabbing();
            if let Some(target) = self.manipulator.unhighlight(&mut self.canvas, haptics) {
                events.push(if was_grabbing {
                    SessionEvent::GrabEnded(target)
                } else {
                    SessionEvent::Unhighlighted(target)
                });
            }
        }

        if self.drawing.is_none() {
            let stroke = self.canvas.strokes.begin_stroke();
            self.drawing = Some(stroke);
            events.push(SessionEvent::StrokeStarted(stroke));
        }

        if let Some(admitted) = self.canvas.strokes.admit_point(state.pose.position, analog) {
            haptics.pulse(state.middle * DRAW_PULSE_DAMPING, DRAW_PULSE_SECONDS);
            events.push(SessionEvent::PointAdmitted(admitted));
        }
    }

    fn release(&mut self, haptics: &mut dyn Haptics, events: &mut Vec<SessionEvent>) {
        if let Some(target) = self.manipulator.unhighlight(&mut self.canvas, haptics) {
            events.push(SessionEvent::Unhighlighted(target));
        }
    }

    fn hovered_target(&self, state: &StylusState) -> Option<Target> {
        let position = state.pose.position;
        if let Some(hit) = find_closest_stroke(
            position,
            self.canvas.strokes.strokes(),
            self.selection.highlight_threshold,
        ) {
            return Some(Target::Stroke(hit.stroke));
        }
        find_pointed_object(
            &Ray::from_pose(&state.pose),
            &self.canvas.scene,
            self.selection.object_reach,
        )
        .map(Target::Object)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::{Aabb, Pose, Vec3};
    use crate::scene::{Collider, Color, PhysicsBody, SceneNode};
    use crate::vr::RecordingHaptics;

    fn at(x: f32, y: f32) -> StylusState {
        StylusState {
            pose: Pose::from_position(Vec3::new(x, y, 0.0)),
            ..StylusState::default()
        }
    }

    fn inking(x: f32, y: f32) -> StylusState {
        StylusState {
            tip: 0.8,
            ..at(x, y)
        }
    }

    fn session() -> DrawingSession {
        DrawingSession::new(StrokeSettings::default(), SelectionSettings::default())
    }

    #[test]
    fn inking_builds_a_stroke_and_pulses() {
        let mut session = session();
        let mut haptics = RecordingHaptics::default();

        let events = session.advance(&inking(0.0, 0.0), &mut haptics);
        assert!(matches!(events[0], SessionEvent::StrokeStarted(_)));
        session.advance(&inking(0.1, 0.0), &mut haptics);
        session.advance(&inking(0.1, 0.0), &mut haptics);
        assert!(matches!(session.mode(), SessionMode::Drawing(_)));

        session.advance(&at(1.0, 1.0), &mut haptics);
        assert_eq!(session.mode(), SessionMode::Idle);
        assert_eq!(session.strokes().len(), 1);
        assert_eq!(session.strokes()[0].len(), 2);
        assert_eq!(haptics.pulses(), 2);
    }

    #[test]
    fn hovering_highlights_and_leaving_unhighlights() {
        let mut session = session();
        let mut haptics = RecordingHaptics::default();
        session.advance(&inking(0.0, 0.0), &mut haptics);
        session.advance(&inking(0.2, 0.0), &mut haptics);
        session.advance(&at(1.0, 1.0), &mut haptics);

        let events = session.advance(&at(0.1, 0.005), &mut haptics);
        let stroke = session.strokes()[0].id();
        assert_eq!(events, vec![SessionEvent::Highlighted(Target::Stroke(stroke))]);
        assert_eq!(session.mode(), SessionMode::Highlighting(Target::Stroke(stroke)));

        let events = session.advance(&at(0.1, 0.5), &mut haptics);
        assert_eq!(events, vec![SessionEvent::Unhighlighted(Target::Stroke(stroke))]);
        assert_eq!(haptics.clicks(), 2);
    }

    #[test]
    fn back_button_grabs_and_moves_highlighted_stroke() {
        let mut session = session();
        let mut haptics = RecordingHaptics::default();
        session.advance(&inking(0.0, 0.0), &mut haptics);
        session.advance(&inking(0.2, 0.0), &mut haptics);
        session.advance(&at(0.1, 0.005), &mut haptics);

        let grab = StylusState {
            back: true,
            ..at(0.1, 0.005)
        };
        let events = session.advance(&grab, &mut haptics);
        assert!(matches!(events[..], [SessionEvent::GrabStarted(_)]));

        let moved = StylusState {
            back: true,
            ..at(0.1, 0.505)
        };
        session.advance(&moved, &mut haptics);
        let points = session.strokes()[0].points();
        assert!(points[0].abs_diff_eq(Vec3::new(0.0, 0.5, 0.0), 1e-5));

        let events = session.advance(&at(0.1, 0.505), &mut haptics);
        assert!(matches!(events[..], [SessionEvent::GrabEnded(_)]));
        assert_eq!(session.mode(), SessionMode::Idle);
    }

    #[test]
    fn inking_preempts_highlight() {
        let mut session = session();
        let mut haptics = RecordingHaptics::default();
        session.advance(&inking(0.0, 0.0), &mut haptics);
        session.advance(&inking(0.2, 0.0), &mut haptics);
        session.advance(&at(0.1, 0.005), &mut haptics);
        let highlighted = Target::Stroke(session.strokes()[0].id());

        let events = session.advance(&inking(0.1, 0.005), &mut haptics);
        assert_eq!(events[0], SessionEvent::Unhighlighted(highlighted));
        assert!(matches!(events[1], SessionEvent::StrokeStarted(_)));
        assert_eq!(session.strokes().len(), 2);
    }

    #[test]
    fn inking_ends_object_grab_and_restores_physics() {
        let mut session = session();
        let mut haptics = RecordingHaptics::default();
        let object = session.canvas_mut().scene.spawn(
            SceneNode::new("crate")
                .with_transform(Pose::from_position(Vec3::new(0.0, 0.0, -1.0)))
                .with_collider(Collider::Box(Aabb::unit()))
                .with_body(PhysicsBody::dynamic(2.0)),
        );
        let target = Target::Object(object);

        let events = session.advance(&at(0.0, 0.0), &mut haptics);
        assert_eq!(events, vec![SessionEvent::Highlighted(target)]);
        let grab = StylusState {
            back: true,
            ..at(0.0, 0.0)
        };
        let events = session.advance(&grab, &mut haptics);
        assert_eq!(events, vec![SessionEvent::GrabStarted(target)]);
        let body = session.canvas().scene.get(object).and_then(|node| node.body);
        assert!(body.is_some_and(|body| body.is_kinematic && !body.use_gravity));

        let events = session.advance(
            &StylusState {
                back: true,
                ..inking(0.0, 0.0)
            },
            &mut haptics,
        );
        assert_eq!(events[0], SessionEvent::GrabEnded(target));
        assert!(matches!(events[1], SessionEvent::StrokeStarted(_)));
        assert!(matches!(session.mode(), SessionMode::Drawing(_)));

        let node = session.canvas().scene.get(object).expect("object kept");
        let body = node.body.expect("body kept");
        assert!(body.use_gravity && !body.is_kinematic);
        assert_eq!(body.mass, 2.0);
        assert_eq!(node.color, Color::WHITE);
    }

    #[test]
    fn held_buttons_are_not_presses_after_tracking() {
        let mut session = session();
        let mut haptics = RecordingHaptics::default();
        let held = StylusState {
            front: true,
            ..at(0.0, 0.0)
        };
        session.track_buttons(&held);

        assert!(session.advance(&held, &mut haptics).is_empty());
        session.advance(&at(0.0, 0.0), &mut haptics);
        assert_eq!(
            session.advance(&held, &mut haptics),
            vec![SessionEvent::ExportRequested]
        );
    }

    #[test]
    fn back_without_highlight_undoes_and_front_requests_export() {
        let mut session = session();
        let mut haptics = RecordingHaptics::default();
        session.advance(&inking(0.0, 0.0), &mut haptics);
        session.advance(&inking(0.2, 0.0), &mut haptics);

        let events = session.advance(
            &StylusState {
                back: true,
                ..at(5.0, 5.0)
            },
            &mut haptics,
        );
        assert!(matches!(events[..], [SessionEvent::StrokeUndone(_)]));
        assert!(session.strokes().is_empty());

        let events = session.advance(
            &StylusState {
                front: true,
                ..at(5.0, 5.0)
            },
            &mut haptics,
        );
        assert_eq!(events, vec![SessionEvent::ExportRequested]);

        let held = session.advance(
            &StylusState {
                front: true,
                ..at(5.0, 5.0)
            },
            &mut haptics,
        );
        assert!(held.is_empty());
    }

    #[test]
    fn docked_stylus_does_not_ink() {
        let mut session = session();
        let mut haptics = RecordingHaptics::default();
        let docked = StylusState {
            docked: true,
            ..inking(0.0, 0.0)
        };
        assert!(session.advance(&docked, &mut haptics).is_empty());
        assert!(session.strokes().is_empty());
    }
}
