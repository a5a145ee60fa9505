//! Envelope modulation.
//!
//! Envelopes sit on envelope-typed timeline tracks and ramp one value from
//! `startValue` to `endValue` across their span. Each type folds into a
//! different part of [`EnvelopeModulation`].

use log::{debug, warn};

use super::automation::{AutomationStore, AutomationTarget};
use super::effects::resolve_targets;
use super::track_state::{TrackHandle, TrackStateManager};
use crate::error::EngineError;
use crate::project::{
    EnvelopeDefinition, Project, SettingValue, Settings, Timeline, TimelineSpan,
    TimelineTrackKind,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnvelopeKind {
    Volume,
    Filter,
    Pitch,
    Pan,
}

impl EnvelopeKind {
    pub fn parse(s: &str) -> Result<Self, EngineError> {
        match s.to_ascii_lowercase().as_str() {
            "volume" | "gain" => Ok(Self::Volume),
            "filter" => Ok(Self::Filter),
            "pitch" => Ok(Self::Pitch),
            "pan" => Ok(Self::Pan),
            _ => Err(EngineError::UnknownEnvelopeType(s.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Curve {
    #[default]
    Linear,
    /// `p²`
    Exponential,
    /// `√p`
    Logarithmic,
}

impl Curve {
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "linear" => Some(Self::Linear),
            "exponential" | "exp" => Some(Self::Exponential),
            "logarithmic" | "log" => Some(Self::Logarithmic),
            _ => None,
        }
    }

    /// Shape a 0–1 progress value. The result is clamped to [0, 1].
    #[inline]
    pub fn shape(self, p: f64) -> f64 {
        let p = p.clamp(0.0, 1.0);
        let shaped = match self {
            Self::Linear => p,
            Self::Exponential => p * p,
            Self::Logarithmic => p.sqrt(),
        };
        shaped.clamp(0.0, 1.0)
    }
}

/// Typed envelope settings.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EnvelopeSettings {
    pub kind: EnvelopeKind,
    pub start_value: f64,
    pub end_value: f64,
    pub curve: Curve,
    pub reverse: bool,
}

impl EnvelopeSettings {
    /// Pitch rests at 0.5 (no shift); everything else ramps 0 → 1.
    pub fn defaults(kind: EnvelopeKind) -> Self {
        let (start_value, end_value) = match kind {
            EnvelopeKind::Pitch => (0.5, 0.5),
            _ => (0.0, 1.0),
        };
        Self {
            kind,
            start_value,
            end_value,
            curve: Curve::Linear,
            reverse: false,
        }
    }

    pub fn from_settings(kind: EnvelopeKind, settings: &Settings) -> Self {
        let mut typed = Self::defaults(kind);
        for (key, value) in settings {
            typed.apply(key, value);
        }
        typed
    }

    pub fn from_definition(def: &EnvelopeDefinition) -> Result<Self, EngineError> {
        let kind = EnvelopeKind::parse(&def.envelope_type)?;
        Ok(Self::from_settings(kind, &def.settings))
    }

    pub fn apply(&mut self, key: &str, value: &SettingValue) -> bool {
        match key {
            "curve" => match value.as_str().and_then(Curve::parse) {
                Some(c) => {
                    self.curve = c;
                    true
                }
                None => false,
            },
            "reverse" => match value.as_bool() {
                Some(r) => {
                    self.reverse = r;
                    true
                }
                None => false,
            },
            _ => value.as_f64().is_some_and(|v| self.apply_number(key, v)),
        }
    }

    pub fn apply_number(&mut self, key: &str, value: f64) -> bool {
        if !value.is_finite() {
            return false;
        }
        match key {
            "startValue" => self.start_value = value,
            "endValue" => self.end_value = value,
            _ => return false,
        }
        true
    }

    /// Envelope value at `progress` through its span.
    #[inline]
    pub fn value_at(&self, progress: f64) -> f64 {
        let p = if self.reverse { 1.0 - progress } else { progress };
        self.start_value + (self.end_value - self.start_value) * self.curve.shape(p)
    }
}

/// Map a 0–1 pitch envelope value to a playback-rate multiplier:
/// 0 → 0.5×, 0.5 → 1×, 1 → 2×.
#[inline]
pub fn pitch_multiplier(value: f64) -> f64 {
    let u = 1.0 - value.clamp(0.0, 1.0);
    if u <= 0.5 { 2.0 - 2.0 * u } else { 1.0 - (u - 0.5) }
}

/// Combined modulation for one track at one beat.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EnvelopeModulation {
    pub volume: f64,
    pub filter: f64,
    pub pitch: f64,
    /// Offset added to the track pan.
    pub pan: f64,
}

impl Default for EnvelopeModulation {
    fn default() -> Self {
        Self::NEUTRAL
    }
}

impl EnvelopeModulation {
    pub const NEUTRAL: Self = Self {
        volume: 1.0,
        filter: 1.0,
        pitch: 1.0,
        pan: 0.0,
    };

    fn fold(&mut self, kind: EnvelopeKind, value: f64) {
        match kind {
            EnvelopeKind::Volume => self.volume *= value,
            EnvelopeKind::Filter => self.filter *= value,
            EnvelopeKind::Pitch => self.pitch *= pitch_multiplier(value),
            EnvelopeKind::Pan => self.pan = (self.pan + 2.0 * value - 1.0).clamp(-1.0, 1.0),
        }
    }
}

struct Definition {
    id: String,
    settings: EnvelopeSettings,
}

struct Instance {
    id: String,
    definition: usize,
    timeline_track: usize,
    start: f64,
    end: f64,
    /// `None` applies to every track.
    targets: Option<Vec<TrackHandle>>,
}

#[derive(Debug, Clone, Copy)]
struct ActiveEnvelope {
    instance: usize,
    start: f64,
    end: f64,
    settings: EnvelopeSettings,
}

/// Resolves active envelopes and computes per-track modulation.
pub struct EnvelopesProcessor {
    refresh_beats: f64,
    definitions: Vec<Definition>,
    instances: Vec<Instance>,
    window: Option<i64>,
    active: Vec<ActiveEnvelope>,
}

impl EnvelopesProcessor {
    pub fn new(refresh_beats: f64) -> Self {
        Self {
            refresh_beats,
            definitions: Vec::new(),
            instances: Vec::new(),
            window: None,
            active: Vec::new(),
        }
    }

    pub fn load(&mut self, project: &Project, tracks: &TrackStateManager) {
        self.definitions.clear();
        for def in &project.envelopes {
            match EnvelopeSettings::from_definition(def) {
                Ok(settings) => self.definitions.push(Definition {
                    id: def.id.clone(),
                    settings,
                }),
                Err(e) => warn!("envelope '{}' skipped: {e}", def.id),
            }
        }

        self.instances.clear();
        self.invalidate();
        let Some(timeline) = &project.timeline else {
            return;
        };
        for env in &timeline.envelopes {
            let Some(track_index) = timeline.tracks.iter().position(|t| t.id == env.track_id)
            else {
                debug!("envelope placement '{}' is on unknown timeline track", env.id);
                continue;
            };
            if timeline.tracks[track_index].kind != TimelineTrackKind::Envelope {
                debug!("envelope placement '{}' is not on an envelope track", env.id);
                continue;
            }
            let Some(definition) = self.definitions.iter().position(|d| d.id == env.envelope_id)
            else {
                warn!(
                    "envelope placement '{}' refers to unknown envelope '{}'",
                    env.id, env.envelope_id
                );
                continue;
            };
            let targets = match (&env.target_track_id, &env.pattern_id) {
                (Some(target), _) => Some(resolve_targets(project, tracks, target)),
                (None, Some(pattern)) => Some(
                    tracks
                        .handles()
                        .filter(|&h| {
                            tracks.get(h).is_some_and(|s| {
                                project.pattern_of_track(&s.id).as_deref() == Some(pattern)
                            })
                        })
                        .collect(),
                ),
                (None, None) => None,
            };
            self.instances.push(Instance {
                id: env.id.clone(),
                definition,
                timeline_track: track_index,
                start: env.start_beat,
                end: env.end_beat(),
                targets,
            });
        }
    }

    pub fn update_definition(&mut self, def: &EnvelopeDefinition) -> Result<(), EngineError> {
        let settings = EnvelopeSettings::from_definition(def)?;
        match self.definitions.iter_mut().find(|d| d.id == def.id) {
            Some(existing) => existing.settings = settings,
            None => self.definitions.push(Definition {
                id: def.id.clone(),
                settings,
            }),
        }
        self.invalidate();
        Ok(())
    }

    pub fn invalidate(&mut self) {
        self.window = None;
    }

    #[cfg(test)]
    fn instance_count(&self) -> usize {
        self.instances.len()
    }

    /// Refresh the active list when `beat` enters a new cache window.
    pub fn update(&mut self, beat: f64, timeline: Option<&Timeline>, automation: &AutomationStore) {
        let window = (beat / self.refresh_beats).floor() as i64;
        if self.window == Some(window) {
            return;
        }
        self.window = Some(window);
        self.active.clear();

        let from = window as f64 * self.refresh_beats;
        let to = from + self.refresh_beats;
        for (index, instance) in self.instances.iter().enumerate() {
            if instance.end <= from || instance.start >= to {
                continue;
            }
            let muted = timeline
                .and_then(|t| t.tracks.get(instance.timeline_track))
                .is_none_or(|t| t.mute);
            if muted {
                continue;
            }
            let definition = &self.definitions[instance.definition];
            let mut settings = definition.settings;
            for binding in automation.bindings(AutomationTarget::Envelope, &definition.id) {
                if binding.applies_to(&instance.id)
                    && let Some(v) = binding.curve.bounded_value_at(from)
                {
                    settings.apply_number(&binding.parameter, v);
                }
            }
            self.active.push(ActiveEnvelope {
                instance: index,
                start: instance.start,
                end: instance.end,
                settings,
            });
        }
    }

    /// Modulation for `track` at `beat`.
    pub fn modulation(&self, track: TrackHandle, beat: f64) -> EnvelopeModulation {
        let mut m = EnvelopeModulation::NEUTRAL;
        for env in &self.active {
            if !(env.start <= beat && beat < env.end) {
                continue;
            }
            let applies = self.instances[env.instance]
                .targets
                .as_ref()
                .is_none_or(|t| t.contains(&track));
            if !applies {
                continue;
            }
            let progress = (beat - env.start) / (env.end - env.start);
            m.fold(env.settings.kind, env.settings.value_at(progress));
        }
        m
    }
}
