//! Automation curves.
//!
//! Keys look like `<target>:<targetId>:<instanceId>:<parameter>`, where the
//! instance part may be `*` or empty to match every placement. Curves are
//! sorted once when stored and evaluated by binary search.

use std::collections::HashMap;

use crate::project::AutomationCurve;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AutomationTarget {
    Effect,
    Envelope,
    /// Audio track `volume` / `pan`.
    Track,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AutomationKey {
    pub target: AutomationTarget,
    pub target_id: String,
    /// `None` matches every instance.
    pub instance_id: Option<String>,
    pub parameter: String,
}

impl AutomationKey {
    /// Parse a 4-part key, or a 3-part key with no instance.
    pub fn parse(key: &str) -> Option<Self> {
        let parts: Vec<&str> = key.split(':').collect();
        let (target, target_id, instance, parameter) = match parts.as_slice() {
            [t, id, inst, param] => (*t, *id, Some(*inst), *param),
            [t, id, param] => (*t, *id, None, *param),
            _ => return None,
        };
        let target = match target {
            "effect" => AutomationTarget::Effect,
            "envelope" => AutomationTarget::Envelope,
            "track" => AutomationTarget::Track,
            _ => return None,
        };
        if target_id.is_empty() || parameter.is_empty() {
            return None;
        }
        let instance_id = instance
            .filter(|i| !i.is_empty() && *i != "*")
            .map(str::to_string);
        Some(Self {
            target,
            target_id: target_id.to_string(),
            instance_id,
            parameter: parameter.to_string(),
        })
    }
}

/// A curve with points sorted by beat.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SortedCurve {
    beats: Vec<f64>,
    values: Vec<f64>,
    min: Option<f64>,
    max: Option<f64>,
}

impl SortedCurve {
    /// Drop non-finite points and sort the rest. Points sharing a beat keep
    /// their input order, so the later one wins at that beat.
    pub fn new(curve: &AutomationCurve) -> Self {
        let mut points: Vec<(f64, f64)> = curve
            .points
            .iter()
            .filter(|p| p.beat.is_finite() && p.value.is_finite())
            .map(|p| (p.beat, p.value))
            .collect();
        points.sort_by(|a, b| a.0.total_cmp(&b.0));
        let (beats, values) = points.into_iter().unzip();
        Self {
            beats,
            values,
            min: curve.min.filter(|m| m.is_finite()),
            max: curve.max.filter(|m| m.is_finite()),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.beats.is_empty()
    }

    /// Piecewise-linear value at `beat`, held at the first/last point outside
    /// the curve. `None` for an empty curve.
    pub fn value_at(&self, beat: f64) -> Option<f64> {
        let n = self.beats.len();
        if n == 0 {
            return None;
        }
        // First index with beats[i] > beat
        let idx = self.beats.partition_point(|&b| b <= beat);
        if idx == 0 {
            return Some(self.values[0]);
        }
        if idx == n {
            return Some(self.values[n - 1]);
        }
        let (b0, b1) = (self.beats[idx - 1], self.beats[idx]);
        let (v0, v1) = (self.values[idx - 1], self.values[idx]);
        let t = (beat - b0) / (b1 - b0);
        Some(v0 + (v1 - v0) * t)
    }

    /// Value at `beat`, clamped to the curve's `[min, max]`.
    pub fn bounded_value_at(&self, beat: f64) -> Option<f64> {
        let mut v = self.value_at(beat)?;
        if let Some(min) = self.min {
            v = v.max(min);
        }
        if let Some(max) = self.max {
            v = v.min(max);
        }
        Some(v)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Binding {
    pub instance_id: Option<String>,
    pub parameter: String,
    pub curve: SortedCurve,
}

impl Binding {
    /// Whether this binding applies to a placement with `instance_id`.
    pub fn applies_to(&self, instance_id: &str) -> bool {
        self.instance_id.as_deref().is_none_or(|i| i == instance_id)
    }
}

/// All automation curves, grouped by target.
#[derive(Debug, Clone, Default)]
pub struct AutomationStore {
    effects: HashMap<String, Vec<Binding>>,
    envelopes: HashMap<String, Vec<Binding>>,
    tracks: HashMap<String, Vec<Binding>>,
}

impl AutomationStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from a key → curve map. Unparseable keys are returned.
    pub fn from_map<'a>(
        map: impl IntoIterator<Item = (&'a String, &'a AutomationCurve)>,
    ) -> (Self, Vec<String>) {
        let mut store = Self::new();
        let mut rejected = Vec::new();
        for (key, curve) in map {
            if !store.set(key, Some(curve)) {
                rejected.push(key.clone());
            }
        }
        (store, rejected)
    }

    fn group_mut(&mut self, target: AutomationTarget) -> &mut HashMap<String, Vec<Binding>> {
        match target {
            AutomationTarget::Effect => &mut self.effects,
            AutomationTarget::Envelope => &mut self.envelopes,
            AutomationTarget::Track => &mut self.tracks,
        }
    }

    fn group(&self, target: AutomationTarget) -> &HashMap<String, Vec<Binding>> {
        match target {
            AutomationTarget::Effect => &self.effects,
            AutomationTarget::Envelope => &self.envelopes,
            AutomationTarget::Track => &self.tracks,
        }
    }

    /// Set or remove (`None`) one curve. Returns false if the key is invalid.
    pub fn set(&mut self, key: &str, curve: Option<&AutomationCurve>) -> bool {
        let Some(key) = AutomationKey::parse(key) else {
            return false;
        };
        let bindings = self.group_mut(key.target).entry(key.target_id).or_default();
        bindings.retain(|b| !(b.instance_id == key.instance_id && b.parameter == key.parameter));
        if let Some(curve) = curve {
            let binding = Binding {
                instance_id: key.instance_id,
                parameter: key.parameter,
                curve: SortedCurve::new(curve),
            };
            // Wildcards first so instance-specific curves are applied last.
            if binding.instance_id.is_none() {
                bindings.insert(0, binding);
            } else {
                bindings.push(binding);
            }
        }
        true
    }

    pub fn clear(&mut self) {
        self.effects.clear();
        self.envelopes.clear();
        self.tracks.clear();
    }

    /// Bindings for one target, wildcards first.
    pub fn bindings(&self, target: AutomationTarget, target_id: &str) -> &[Binding] {
        self.group(target)
            .get(target_id)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Automated value for a track parameter (`volume` or `pan`).
    pub fn track_value(&self, track_id: &str, parameter: &str, beat: f64) -> Option<f64> {
        self.bindings(AutomationTarget::Track, track_id)
            .iter()
            .filter(|b| b.parameter == parameter)
            .filter_map(|b| b.curve.bounded_value_at(beat))
            .last()
    }

    pub fn has_track_automation(&self) -> bool {
        self.tracks.values().any(|b| !b.is_empty())
    }
}
