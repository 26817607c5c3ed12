use crate::config::StrokeSettings;
use crate::geometry::{Vec3, exceeds_spacing};
use crate::scene::Color;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct StrokeId(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct WidthKey {
    pub t: f32,
    pub width: f32,
}

/// Width along a stroke, keyed by normalized arc parameter.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WidthCurve {
    keys: Vec<WidthKey>,
}

impl WidthCurve {
    /// Rebuilds the keys from scratch: interior keys move whenever the count
    /// changes, so the curve is never appended to.
    pub fn from_widths(widths: &[f32]) -> Self {
        let keys = match widths {
            [] => Vec::new(),
            [only] => vec![WidthKey { t: 0.0, width: *only }],
            _ => {
                let last = (widths.len() - 1) as f32;
                widths
                    .iter()
                    .enumerate()
                    .map(|(index, width)| WidthKey {
                        t: index as f32 / last,
                        width: *width,
                    })
                    .collect()
            }
        };
        Self { keys }
    }

    pub fn keys(&self) -> &[WidthKey] {
        &self.keys
    }

    /// Linear interpolation between keys; flat outside them.
    pub fn evaluate(&self, t: f32) -> f32 {
        let Some(first) = self.keys.first() else {
            return 0.0;
        };
        if t <= first.t || self.keys.len() == 1 {
            return first.width;
        }
        for pair in self.keys.windows(2) {
            let (a, b) = (pair[0], pair[1]);
            if t <= b.t {
                let span = (b.t - a.t).max(f32::EPSILON);
                return a.width + (b.width - a.width) * ((t - a.t) / span);
            }
        }
        self.keys.last().map(|key| key.width).unwrap_or_default()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Stroke {
    id: StrokeId,
    points: Vec<Vec3>,
    widths: Vec<f32>,
    curve: WidthCurve,
    pub color: Color,
    pub layer: String,
}

impl Stroke {
    pub fn new(id: StrokeId, color: Color, layer: impl Into<String>) -> Self {
        Self {
            id,
            points: Vec::new(),
            widths: Vec::new(),
            curve: WidthCurve::default(),
            color,
            layer: layer.into(),
        }
    }

    pub fn id(&self) -> StrokeId {
        self.id
    }

    pub fn points(&self) -> &[Vec3] {
        &self.points
    }

    pub fn widths(&self) -> &[f32] {
        &self.widths
    }

    pub fn width_curve(&self) -> &WidthCurve {
        &self.curve
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn segments(&self) -> impl Iterator<Item = (Vec3, Vec3)> + '_ {
        self.points.windows(2).map(|pair| (pair[0], pair[1]))
    }

    fn push(&mut self, position: Vec3, width: f32) {
        self.points.push(position);
        self.widths.push(width);
        self.curve = WidthCurve::from_widths(&self.widths);
    }

    /// Replaces every point; the count must stay the same.
    pub fn set_points(&mut self, points: &[Vec3]) {
        debug_assert_eq!(points.len(), self.points.len());
        for (target, source) in self.points.iter_mut().zip(points) {
            *target = *source;
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AdmittedPoint {
    pub stroke: StrokeId,
    pub index: usize,
    pub width: f32,
}

/// Strokes in drawing order plus the in-progress admission state.
#[derive(Debug, Clone)]
pub struct StrokeCollection {
    settings: StrokeSettings,
    layer: String,
    strokes: Vec<Stroke>,
    active: Option<StrokeId>,
    anchor: Option<Vec3>,
    next_id: u64,
}

impl StrokeCollection {
    pub fn new(settings: StrokeSettings) -> Self {
        let layer = settings.layer.clone();
        Self::with_layer(settings, layer)
    }

    /// Uses a layer resolved by the host instead of the configured name.
    pub fn with_layer(settings: StrokeSettings, layer: impl Into<String>) -> Self {
        Self {
            settings,
            layer: layer.into(),
            strokes: Vec::new(),
            active: None,
            anchor: None,
            next_id: 1,
        }
    }

    pub fn settings(&self) -> &StrokeSettings {
        &self.settings
    }

    pub fn settings_mut(&mut self) -> &mut StrokeSettings {
        &mut self.settings
    }

    pub fn strokes(&self) -> &[Stroke] {
        &self.strokes
    }

    pub fn len(&self) -> usize {
        self.strokes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.strokes.is_empty()
    }

    pub fn get(&self, id: StrokeId) -> Option<&Stroke> {
        self.strokes.iter().find(|stroke| stroke.id == id)
    }

    pub fn get_mut(&mut self, id: StrokeId) -> Option<&mut Stroke> {
        self.strokes.iter_mut().find(|stroke| stroke.id == id)
    }

    pub fn last(&self) -> Option<&Stroke> {
        self.strokes.last()
    }

    pub fn active(&self) -> Option<StrokeId> {
        self.active
    }

    pub fn begin_stroke(&mut self) -> StrokeId {
        let id = StrokeId(self.next_id);
        self.next_id += 1;
        self.strokes
            .push(Stroke::new(id, self.settings.color, self.layer.clone()));
        self.active = Some(id);
        self.anchor = None;
        log::debug!("[sketch] began stroke {}", id.0);
        id
    }

    pub fn end_stroke(&mut self) {
        self.active = None;
    }

    /// Appends `position` to the active stroke unless it sits within the
    /// minimum spacing of the last admitted point.
    pub fn admit_point(&mut self, position: Vec3, pressure: f32) -> Option<AdmittedPoint> {
        let id = self.active?;
        if let Some(anchor) = self.anchor {
            if !exceeds_spacing(position, anchor, self.settings.min_point_spacing) {
                return None;
            }
        }
        let pressure = if self.settings.fixed_width {
            1.0
        } else {
            pressure
        };
        let width = (pressure * self.settings.max_width).max(self.settings.min_width);
        let stroke = self.strokes.iter_mut().find(|stroke| stroke.id == id)?;
        stroke.push(position, width);
        self.anchor = Some(position);
        Some(AdmittedPoint {
            stroke: id,
            index: stroke.len() - 1,
            width,
        })
    }

    pub fn undo_last_stroke(&mut self) -> Option<Stroke> {
        let removed = self.strokes.pop()?;
        if self.active == Some(removed.id) {
            self.active = None;
            self.anchor = None;
        }
        log::debug!("[sketch] removed stroke {}", removed.id.0);
        Some(removed)
    }

    pub fn remove(&mut self, id: StrokeId) -> Option<Stroke> {
        let index = self.strokes.iter().position(|stroke| stroke.id == id)?;
        if self.active == Some(id) {
            self.active = None;
            self.anchor = None;
        }
        Some(self.strokes.remove(index))
    }

    pub fn clear_all(&mut self) {
        self.strokes.clear();
        self.active = None;
        self.anchor = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn collection() -> StrokeCollection {
        StrokeCollection::new(StrokeSettings::default())
    }

    #[test]
    fn single_width_yields_flat_key() {
        let curve = WidthCurve::from_widths(&[0.004]);
        assert_eq!(curve.keys(), &[WidthKey { t: 0.0, width: 0.004 }]);
        assert_eq!(curve.evaluate(0.7), 0.004);
    }

    #[test]
    fn widths_are_keyed_uniformly() {
        let curve = WidthCurve::from_widths(&[0.1, 0.2, 0.3]);
        let keys = curve.keys();
        assert_eq!(keys.len(), 3);
        assert_eq!((keys[0].t, keys[0].width), (0.0, 0.1));
        assert_eq!((keys[1].t, keys[1].width), (0.5, 0.2));
        assert_eq!((keys[2].t, keys[2].width), (1.0, 0.3));
        assert!((curve.evaluate(0.25) - 0.15).abs() < 1e-6);
    }

    #[test]
    fn close_points_are_rejected() {
        let mut strokes = collection();
        strokes.begin_stroke();
        assert!(strokes.admit_point(Vec3::ZERO, 0.5).is_some());
        assert!(strokes.admit_point(Vec3::new(0.0002, 0.0, 0.0), 0.5).is_none());
        assert!(strokes.admit_point(Vec3::new(0.0004, 0.0, 0.0), 0.5).is_none());
        assert!(strokes.admit_point(Vec3::new(0.001, 0.0, 0.0), 0.5).is_some());

        let stroke = strokes.last().expect("stroke exists");
        assert_eq!(stroke.len(), 2);
        assert_eq!(stroke.widths().len(), stroke.points().len());
        assert_eq!(stroke.width_curve().keys().len(), 2);
    }

    #[test]
    fn width_scales_pressure_with_floor() {
        let mut strokes = collection();
        strokes.begin_stroke();
        let full = strokes.admit_point(Vec3::ZERO, 1.0).expect("admitted");
        let light = strokes.admit_point(Vec3::X, 0.01).expect("admitted");
        assert_eq!(full.width, 0.01);
        assert_eq!(light.width, 0.0005);

        strokes.settings_mut().fixed_width = true;
        let fixed = strokes.admit_point(Vec3::Y, 0.2).expect("admitted");
        assert_eq!(fixed.width, 0.01);
    }

    #[test]
    fn admission_without_active_stroke_is_ignored() {
        let mut strokes = collection();
        assert!(strokes.admit_point(Vec3::ZERO, 1.0).is_none());
        strokes.begin_stroke();
        strokes.end_stroke();
        assert!(strokes.admit_point(Vec3::ZERO, 1.0).is_none());
    }

    #[test]
    fn undo_removes_most_recent_stroke() {
        let mut strokes = collection();
        assert!(strokes.undo_last_stroke().is_none());

        let first = strokes.begin_stroke();
        let second = strokes.begin_stroke();
        assert_eq!(strokes.undo_last_stroke().map(|stroke| stroke.id()), Some(second));
        assert_eq!(strokes.last().map(Stroke::id), Some(first));
        assert!(strokes.active().is_none());

        strokes.clear_all();
        assert!(strokes.is_empty());
    }

    proptest! {
        #[test]
        fn spaced_points_are_all_admitted(steps in prop::collection::vec(0.001f32..0.5, 1..40)) {
            let mut strokes = collection();
            strokes.begin_stroke();
            let mut x = 0.0;
            for step in &steps {
                x += step;
                prop_assert!(strokes.admit_point(Vec3::new(x, 0.0, 0.0), 0.5).is_some());
            }
            let stroke = strokes.last().expect("stroke exists");
            prop_assert_eq!(stroke.len(), steps.len());
            prop_assert_eq!(stroke.widths().len(), steps.len());
        }
    }
}
