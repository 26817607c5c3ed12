use crate::geometry::Pose;
use std::fmt;
use std::str::FromStr;

/// Per-tick snapshot of the stylus.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct StylusState {
    pub pose: Pose,
    /// Tip pressure in `0..=1`.
    pub tip: f32,
    /// Analog middle cluster button in `0..=1`.
    pub middle: f32,
    pub front: bool,
    pub back: bool,
    /// The stylus is docked or otherwise not allowed to ink.
    pub docked: bool,
}

impl StylusState {
    /// Drawing pressure: the stronger of tip and middle button.
    pub fn analog_input(&self) -> f32 {
        self.tip.max(self.middle)
    }

    pub fn can_draw(&self) -> bool {
        !self.docked
    }
}

/// Everything the core reads from the headset runtime in one tick.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct InputSample {
    pub head: Pose,
    pub stylus: StylusState,
}

#[derive(Debug)]
pub struct VrError {
    reason: String,
}

impl VrError {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

impl fmt::Display for VrError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.reason)
    }
}

impl std::error::Error for VrError {}

/// Read-only view of the input device, sampled once per tick.
pub trait StylusInput: Send {
    fn label(&self) -> &'static str;
    fn sample(&mut self, delta_seconds: f32) -> InputSample;
}

/// Fire-and-forget haptic primitives of the device.
pub trait Haptics {
    fn pulse(&mut self, intensity: f32, duration_seconds: f32);
    fn click(&mut self);
}

/// Device capability handed to the sketching core.
pub trait StylusDevice: StylusInput + Haptics {
    fn as_haptics(&mut self) -> &mut dyn Haptics;
}

impl<T: StylusInput + Haptics> StylusDevice for T {
    fn as_haptics(&mut self) -> &mut dyn Haptics {
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum HapticEvent {
    Pulse { intensity: f32, duration: f32 },
    Click,
}

/// Haptics sink that only records what was requested.
#[derive(Debug, Default, Clone)]
pub struct RecordingHaptics {
    events: Vec<HapticEvent>,
}

impl RecordingHaptics {
    pub fn events(&self) -> &[HapticEvent] {
        &self.events
    }

    pub fn clicks(&self) -> usize {
        self.events
            .iter()
            .filter(|event| matches!(event, HapticEvent::Click))
            .count()
    }

    pub fn pulses(&self) -> usize {
        self.events
            .iter()
            .filter(|event| matches!(event, HapticEvent::Pulse { .. }))
            .count()
    }

    pub fn clear(&mut self) {
        self.events.clear();
    }
}

impl Haptics for RecordingHaptics {
    fn pulse(&mut self, intensity: f32, duration_seconds: f32) {
        self.events.push(HapticEvent::Pulse {
            intensity,
            duration: duration_seconds,
        });
    }

    fn click(&mut self) {
        self.events.push(HapticEvent::Click);
    }
}

/// Scripted stylus used when no runtime is attached. Replays queued states
/// and holds the last one once the script runs out.
#[derive(Debug, Default)]
pub struct SimulatedStylus {
    script: std::collections::VecDeque<InputSample>,
    current: InputSample,
    haptics: RecordingHaptics,
    elapsed: f32,
}

impl SimulatedStylus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues a stylus state seen from the most recently queued head pose.
    pub fn push(&mut self, stylus: StylusState) {
        let head = self
            .script
            .back()
            .map(|sample| sample.head)
            .unwrap_or(self.current.head);
        self.script.push_back(InputSample { head, stylus });
    }

    pub fn push_sample(&mut self, sample: InputSample) {
        self.script.push_back(sample);
    }

    pub fn extend<I>(&mut self, states: I)
    where
        I: IntoIterator<Item = StylusState>,
    {
        for state in states {
            self.push(state);
        }
    }

    pub fn set_head(&mut self, head: Pose) {
        self.current.head = head;
        for sample in &mut self.script {
            sample.head = head;
        }
    }

    pub fn haptics(&self) -> &RecordingHaptics {
        &self.haptics
    }

    pub fn elapsed(&self) -> f32 {
        self.elapsed
    }
}

impl StylusInput for SimulatedStylus {
    fn label(&self) -> &'static str {
        "Simulated Stylus"
    }

    fn sample(&mut self, delta_seconds: f32) -> InputSample {
        self.elapsed += delta_seconds;
        if let Some(next) = self.script.pop_front() {
            self.current = next;
        }
        self.current
    }
}

impl Haptics for SimulatedStylus {
    fn pulse(&mut self, intensity: f32, duration_seconds: f32) {
        self.haptics.pulse(intensity, duration_seconds);
    }

    fn click(&mut self) {
        self.haptics.click();
    }
}

/// Turns a held button level into a single press edge.
#[derive(Debug, Default, Clone, Copy)]
pub struct ButtonLatch {
    held: bool,
}

impl ButtonLatch {
    /// Returns `true` only on the tick the button goes down.
    pub fn update(&mut self, pressed: bool) -> bool {
        let edge = pressed && !self.held;
        self.held = pressed;
        edge
    }

    pub fn is_held(&self) -> bool {
        self.held
    }
}

/// Tool selected through the (external) mode panel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ToolMode {
    #[default]
    Place,
    Pencil,
    Eraser,
    Cursor,
}

impl ToolMode {
    pub fn label(self) -> &'static str {
        match self {
            ToolMode::Place => "place",
            ToolMode::Pencil => "pencil",
            ToolMode::Eraser => "eraser",
            ToolMode::Cursor => "cursor",
        }
    }
}

impl FromStr for ToolMode {
    type Err = VrError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "place" => Ok(ToolMode::Place),
            "pencil" => Ok(ToolMode::Pencil),
            "eraser" => Ok(ToolMode::Eraser),
            "cursor" => Ok(ToolMode::Cursor),
            other => Err(VrError::new(format!("unknown tool mode '{other}'"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn latch_reports_single_edge_per_press() {
        let mut latch = ButtonLatch::default();
        assert!(latch.update(true));
        assert!(!latch.update(true));
        assert!(!latch.update(false));
        assert!(latch.update(true));
    }

    #[test]
    fn simulated_stylus_holds_last_state() {
        let mut stylus = SimulatedStylus::new();
        stylus.push(StylusState {
            tip: 0.5,
            ..StylusState::default()
        });

        assert_eq!(stylus.sample(0.016).stylus.tip, 0.5);
        assert_eq!(stylus.sample(0.016).stylus.tip, 0.5);
        stylus.click();
        assert_eq!(stylus.haptics().clicks(), 1);
    }

    #[test]
    fn device_trait_object_reaches_stylus_haptics() {
        let mut stylus = SimulatedStylus::new();
        stylus.push(StylusState {
            front: true,
            ..StylusState::default()
        });
        {
            let device: &mut dyn StylusDevice = &mut stylus;
            assert_eq!(device.label(), "Simulated Stylus");
            assert!(device.sample(0.5).stylus.front);
            device.as_haptics().pulse(0.3, 0.01);
            device.as_haptics().click();
        }

        assert_eq!(
            stylus.haptics().events(),
            &[
                HapticEvent::Pulse {
                    intensity: 0.3,
                    duration: 0.01
                },
                HapticEvent::Click
            ]
        );
        assert_eq!(stylus.elapsed(), 0.5);
    }

    #[test]
    fn tool_mode_parses_closed_set() {
        for mode in [
            ToolMode::Place,
            ToolMode::Pencil,
            ToolMode::Eraser,
            ToolMode::Cursor,
        ] {
            assert_eq!(mode.label().parse::<ToolMode>().unwrap(), mode);
        }
        let err = "lasso".parse::<ToolMode>().unwrap_err();
        assert!(err.to_string().contains("lasso"));
    }
}
