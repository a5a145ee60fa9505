//! Effect resolution and processing.
//!
//! Timeline effect placements are resolved once per cache window into short
//! lists of active effects: one list shared by every track (global effects on
//! effect-typed timeline tracks) and one per track for inserts that carry a
//! `targetTrackId`. Automation is applied while resolving, so the per-sample
//! path only runs DSP.
//!
//! Every placement gets its own DSP state per track, keyed by
//! [`EffectStateKey`].

use std::collections::HashMap;

use log::{debug, warn};

use super::automation::{AutomationStore, AutomationTarget};
use super::track_state::{TrackHandle, TrackStateManager};
use crate::dsp::chorus::Chorus;
use crate::dsp::compressor::Compressor;
use crate::dsp::delay::Delay;
use crate::dsp::distortion::Distortion;
use crate::dsp::filter::{
    CachedBiquad, FilterType, flush_denormal, knob_to_cutoff_hz, resonance_to_q, sanitize,
};
use crate::dsp::reverb::Reverb;
use crate::error::EngineError;
use crate::project::{
    EffectDefinition, Project, SettingValue, Settings, TimelineSpan, TimelineTrackKind, Timeline,
};

/// Longest delay line an effect can ask for.
pub const MAX_DELAY_SECONDS: f64 = 2.0;

/// Hard limit applied after every effect.
pub const OUTPUT_LIMIT: f64 = 2.0;

/// Cache windows an unused insert list survives before it is evicted.
pub const CACHE_TTL_WINDOWS: i64 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EffectKind {
    Reverb,
    Delay,
    Filter,
    Distortion,
    Compressor,
    Chorus,
}

impl EffectKind {
    pub fn parse(s: &str) -> Result<Self, EngineError> {
        match s.to_ascii_lowercase().as_str() {
            "reverb" => Ok(Self::Reverb),
            "delay" => Ok(Self::Delay),
            "filter" => Ok(Self::Filter),
            "distortion" => Ok(Self::Distortion),
            "compressor" => Ok(Self::Compressor),
            "chorus" => Ok(Self::Chorus),
            _ => Err(EngineError::UnknownEffectType(s.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ReverbSettings {
    pub wet: f64,
    pub dry: f64,
    pub room_size: f64,
    pub dampening: f64,
}

impl Default for ReverbSettings {
    fn default() -> Self {
        Self {
            wet: 0.3,
            dry: 1.0,
            room_size: 0.5,
            dampening: 0.5,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DelaySettings {
    /// Seconds.
    pub time: f64,
    pub feedback: f64,
    pub wet: f64,
    pub dry: f64,
}

impl Default for DelaySettings {
    fn default() -> Self {
        Self {
            time: 0.25,
            feedback: 0.3,
            wet: 0.5,
            dry: 1.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FilterSettings {
    pub filter_type: FilterType,
    /// 0–1 knob.
    pub cutoff: f64,
    /// 0–1 knob.
    pub resonance: f64,
}

impl Default for FilterSettings {
    fn default() -> Self {
        Self {
            filter_type: FilterType::Lowpass,
            cutoff: 0.5,
            resonance: 0.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DistortionSettings {
    pub drive: f64,
    pub amount: f64,
}

impl Default for DistortionSettings {
    fn default() -> Self {
        Self {
            drive: 0.5,
            amount: 1.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CompressorSettings {
    /// dB.
    pub threshold: f64,
    pub ratio: f64,
    /// Seconds.
    pub attack: f64,
    /// Seconds.
    pub release: f64,
    /// dB.
    pub makeup_gain: f64,
}

impl Default for CompressorSettings {
    fn default() -> Self {
        Self {
            threshold: -24.0,
            ratio: 4.0,
            attack: 0.01,
            release: 0.1,
            makeup_gain: 0.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ChorusSettings {
    /// LFO rate in Hz.
    pub rate: f64,
    pub depth: f64,
    pub wet: f64,
    pub dry: f64,
}

impl Default for ChorusSettings {
    fn default() -> Self {
        Self {
            rate: 1.5,
            depth: 0.5,
            wet: 0.5,
            dry: 1.0,
        }
    }
}

/// Typed settings for one effect, built from the untyped settings map.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum EffectSettings {
    Reverb(ReverbSettings),
    Delay(DelaySettings),
    Filter(FilterSettings),
    Distortion(DistortionSettings),
    Compressor(CompressorSettings),
    Chorus(ChorusSettings),
}

impl EffectSettings {
    pub fn defaults(kind: EffectKind) -> Self {
        match kind {
            EffectKind::Reverb => Self::Reverb(ReverbSettings::default()),
            EffectKind::Delay => Self::Delay(DelaySettings::default()),
            EffectKind::Filter => Self::Filter(FilterSettings::default()),
            EffectKind::Distortion => Self::Distortion(DistortionSettings::default()),
            EffectKind::Compressor => Self::Compressor(CompressorSettings::default()),
            EffectKind::Chorus => Self::Chorus(ChorusSettings::default()),
        }
    }

    /// Defaults overridden by every recognised key in `settings`.
    pub fn from_settings(kind: EffectKind, settings: &Settings) -> Self {
        let mut typed = Self::defaults(kind);
        for (key, value) in settings {
            typed.apply(key, value);
        }
        typed
    }

    pub fn from_definition(def: &EffectDefinition) -> Result<Self, EngineError> {
        let kind = EffectKind::parse(&def.effect_type)?;
        Ok(Self::from_settings(kind, &def.settings))
    }

    pub fn kind(&self) -> EffectKind {
        match self {
            Self::Reverb(_) => EffectKind::Reverb,
            Self::Delay(_) => EffectKind::Delay,
            Self::Filter(_) => EffectKind::Filter,
            Self::Distortion(_) => EffectKind::Distortion,
            Self::Compressor(_) => EffectKind::Compressor,
            Self::Chorus(_) => EffectKind::Chorus,
        }
    }

    /// Apply one untyped setting. Returns false for unknown keys and
    /// mistyped or non-finite values.
    pub fn apply(&mut self, key: &str, value: &SettingValue) -> bool {
        if let (Self::Filter(f), "filterType" | "type") = (&mut *self, key) {
            return match value.as_str().and_then(FilterType::parse) {
                Some(t) => {
                    f.filter_type = t;
                    true
                }
                None => false,
            };
        }
        match value.as_f64() {
            Some(v) => self.apply_number(key, v),
            None => false,
        }
    }

    /// Apply one numeric setting, as automation does.
    pub fn apply_number(&mut self, key: &str, value: f64) -> bool {
        if !value.is_finite() {
            return false;
        }
        let slot = match (self, key) {
            (Self::Reverb(s), "wet") => &mut s.wet,
            (Self::Reverb(s), "dry") => &mut s.dry,
            (Self::Reverb(s), "roomSize") => &mut s.room_size,
            (Self::Reverb(s), "dampening" | "damping") => &mut s.dampening,
            (Self::Delay(s), "time" | "delayTime") => &mut s.time,
            (Self::Delay(s), "feedback") => &mut s.feedback,
            (Self::Delay(s), "wet") => &mut s.wet,
            (Self::Delay(s), "dry") => &mut s.dry,
            (Self::Filter(s), "cutoff" | "frequency") => &mut s.cutoff,
            (Self::Filter(s), "resonance") => &mut s.resonance,
            (Self::Distortion(s), "drive") => &mut s.drive,
            (Self::Distortion(s), "amount" | "wet") => &mut s.amount,
            (Self::Compressor(s), "threshold") => &mut s.threshold,
            (Self::Compressor(s), "ratio") => &mut s.ratio,
            (Self::Compressor(s), "attack") => &mut s.attack,
            (Self::Compressor(s), "release") => &mut s.release,
            (Self::Compressor(s), "makeupGain") => &mut s.makeup_gain,
            (Self::Chorus(s), "rate") => &mut s.rate,
            (Self::Chorus(s), "depth") => &mut s.depth,
            (Self::Chorus(s), "wet") => &mut s.wet,
            (Self::Chorus(s), "dry") => &mut s.dry,
            _ => return false,
        };
        *slot = value;
        true
    }
}

/// DSP state of one placement on one track.
#[derive(Debug, Clone)]
pub enum EffectState {
    Reverb(Reverb),
    Delay(Delay),
    Filter(CachedBiquad),
    Distortion(Distortion),
    Compressor(Compressor),
    Chorus(Chorus),
}

impl EffectState {
    pub fn new(kind: EffectKind, sample_rate: f64) -> Self {
        match kind {
            EffectKind::Reverb => Self::Reverb(Reverb::new(sample_rate)),
            EffectKind::Delay => Self::Delay(Delay::new(sample_rate, MAX_DELAY_SECONDS)),
            EffectKind::Filter => Self::Filter(CachedBiquad::new()),
            EffectKind::Distortion => Self::Distortion(Distortion::default()),
            EffectKind::Compressor => Self::Compressor(Compressor::new(sample_rate)),
            EffectKind::Chorus => Self::Chorus(Chorus::new(sample_rate)),
        }
    }

    /// Push settings into the DSP. A mismatched kind is ignored.
    pub fn configure(&mut self, settings: &EffectSettings, sample_rate: f64) {
        match (self, settings) {
            (Self::Reverb(r), EffectSettings::Reverb(s)) => {
                r.set_params(s.room_size, s.dampening, s.wet, s.dry)
            }
            (Self::Delay(d), EffectSettings::Delay(s)) => {
                d.set_params(s.time, s.feedback, s.wet, s.dry)
            }
            (Self::Filter(f), EffectSettings::Filter(s)) => {
                f.set_params(
                    s.filter_type,
                    knob_to_cutoff_hz(s.cutoff),
                    resonance_to_q(s.resonance),
                    sample_rate,
                );
            }
            (Self::Distortion(d), EffectSettings::Distortion(s)) => {
                *d = Distortion::with_params(s.drive, s.amount)
            }
            (Self::Compressor(c), EffectSettings::Compressor(s)) => c.set_params(
                s.threshold,
                s.ratio,
                s.attack * 1000.0,
                s.release * 1000.0,
                s.makeup_gain,
            ),
            (Self::Chorus(c), EffectSettings::Chorus(s)) => {
                c.set_params(s.rate, s.depth, s.wet, s.dry)
            }
            _ => {}
        }
    }

    #[inline]
    pub fn process(&mut self, x: f64) -> f64 {
        match self {
            Self::Reverb(r) => r.process(x),
            Self::Delay(d) => d.process(x),
            Self::Filter(f) => f.process(x),
            Self::Distortion(d) => d.process(x),
            Self::Compressor(c) => c.process(x),
            Self::Chorus(c) => c.process(x),
        }
    }

    pub fn kind(&self) -> EffectKind {
        match self {
            Self::Reverb(_) => EffectKind::Reverb,
            Self::Delay(_) => EffectKind::Delay,
            Self::Filter(_) => EffectKind::Filter,
            Self::Distortion(_) => EffectKind::Distortion,
            Self::Compressor(_) => EffectKind::Compressor,
            Self::Chorus(_) => EffectKind::Chorus,
        }
    }

    /// Silence tails and history without freeing buffers.
    pub fn reset(&mut self) {
        match self {
            Self::Reverb(r) => r.clear(),
            Self::Delay(d) => d.clear(),
            Self::Filter(f) => f.reset(),
            Self::Distortion(_) => {}
            Self::Compressor(c) => c.reset(),
            Self::Chorus(c) => c.clear(),
        }
    }
}

/// DSP state key: one placement on one track.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EffectStateKey {
    pub instance: u32,
    pub track: TrackHandle,
}

struct StateSlot {
    state: EffectState,
    generation: u64,
}

struct Definition {
    id: String,
    settings: EffectSettings,
}

/// One placement of an effect on the timeline.
struct Instance {
    id: String,
    definition: usize,
    timeline_track: usize,
    start: f64,
    end: f64,
    /// `None` for global effects.
    targets: Option<Vec<TrackHandle>>,
}

/// A placement resolved for the current window, with automation applied.
#[derive(Debug, Clone, Copy)]
struct ActiveEffect {
    instance: u32,
    start: f64,
    end: f64,
    settings: EffectSettings,
}

#[derive(Default)]
struct WindowList {
    window: i64,
    effects: Vec<ActiveEffect>,
}

/// Resolves and runs the effect chain for each track.
pub struct EffectsProcessor {
    sample_rate: f64,
    refresh_beats: f64,
    fade_progress: f64,
    definitions: Vec<Definition>,
    instances: Vec<Instance>,
    window: Option<i64>,
    generation: u64,
    global: WindowList,
    inserts: HashMap<TrackHandle, WindowList>,
    states: HashMap<EffectStateKey, StateSlot>,
}

impl EffectsProcessor {
    pub fn new(sample_rate: f64, refresh_beats: f64, fade_progress: f64) -> Self {
        Self {
            sample_rate,
            refresh_beats,
            fade_progress,
            definitions: Vec::new(),
            instances: Vec::new(),
            window: None,
            generation: 0,
            global: WindowList::default(),
            inserts: HashMap::new(),
            states: HashMap::new(),
        }
    }

    /// Rebuild definitions and placements from a new project, dropping all
    /// DSP state.
    pub fn load(&mut self, project: &Project, tracks: &TrackStateManager) {
        self.states.clear();
        self.rebuild(project, tracks);
    }

    /// Rebuild after an edit to the current project. A placement that keeps
    /// its id, effect kind and track keeps its DSP state, so tails ring on.
    pub fn reload(&mut self, project: &Project, tracks: &TrackStateManager) {
        let previous: Vec<String> = self.instances.iter().map(|i| i.id.clone()).collect();
        self.rebuild(project, tracks);

        let states = std::mem::take(&mut self.states);
        for (key, slot) in states {
            let Some(id) = previous.get(key.instance as usize) else {
                continue;
            };
            let Some(index) = self.instances.iter().position(|i| &i.id == id) else {
                debug!("effect placement '{id}' removed, dropping its state");
                continue;
            };
            let instance = &self.instances[index];
            let kind = self.definitions[instance.definition].settings.kind();
            let targeted = instance
                .targets
                .as_ref()
                .is_none_or(|targets| targets.contains(&key.track));
            if kind != slot.state.kind() || !targeted || tracks.get(key.track).is_none() {
                continue;
            }
            self.states.insert(
                EffectStateKey {
                    instance: index as u32,
                    track: key.track,
                },
                StateSlot {
                    state: slot.state,
                    generation: 0,
                },
            );
        }
    }

    fn rebuild(&mut self, project: &Project, tracks: &TrackStateManager) {
        self.inserts.clear();
        self.definitions.clear();
        for def in &project.effects {
            match EffectSettings::from_definition(def) {
                Ok(settings) => self.definitions.push(Definition {
                    id: def.id.clone(),
                    settings,
                }),
                Err(e) => warn!("effect '{}' skipped: {e}", def.id),
            }
        }

        self.instances.clear();
        let Some(timeline) = &project.timeline else {
            self.invalidate();
            return;
        };
        let mut placed: Vec<(i32, f64, Instance)> = Vec::new();
        for fx in &timeline.effects {
            let Some(track_index) = timeline.tracks.iter().position(|t| t.id == fx.track_id)
            else {
                debug!("effect placement '{}' is on unknown timeline track '{}'", fx.id, fx.track_id);
                continue;
            };
            let timeline_track = &timeline.tracks[track_index];
            if timeline_track.kind != TimelineTrackKind::Effect {
                debug!("effect placement '{}' is not on an effect track", fx.id);
                continue;
            }
            let Some(definition) = self.definitions.iter().position(|d| d.id == fx.effect_id)
            else {
                warn!("effect placement '{}' refers to unknown effect '{}'", fx.id, fx.effect_id);
                continue;
            };
            let targets = fx.target_track_id.as_deref().map(|target| {
                let handles = resolve_targets(project, tracks, target);
                if handles.is_empty() {
                    warn!("effect placement '{}' targets unknown track '{target}'", fx.id);
                }
                handles
            });
            placed.push((
                timeline_track.order,
                fx.start_beat,
                Instance {
                    id: fx.id.clone(),
                    definition,
                    timeline_track: track_index,
                    start: fx.start_beat,
                    end: fx.end_beat(),
                    targets,
                },
            ));
        }
        placed.sort_by(|a, b| a.0.cmp(&b.0).then(a.1.total_cmp(&b.1)));
        self.instances = placed.into_iter().map(|(_, _, i)| i).collect();
        self.invalidate();
    }

    /// Rebuild one definition's typed settings after a settings patch.
    pub fn update_definition(&mut self, def: &EffectDefinition) -> Result<(), EngineError> {
        let settings = EffectSettings::from_definition(def)?;
        match self.definitions.iter_mut().find(|d| d.id == def.id) {
            Some(existing) => existing.settings = settings,
            None => {
                debug!("effect '{}' has no placements yet", def.id);
                self.definitions.push(Definition {
                    id: def.id.clone(),
                    settings,
                });
            }
        }
        self.invalidate();
        Ok(())
    }

    /// Force re-resolution on the next `update`.
    pub fn invalidate(&mut self) {
        self.window = None;
    }

    /// Invalidate and silence every tail, keeping buffers.
    pub fn reset(&mut self) {
        self.invalidate();
        for slot in self.states.values_mut() {
            slot.state.reset();
        }
    }

    #[cfg(test)]
    fn instance_count(&self) -> usize {
        self.instances.len()
    }

    /// DSP states created so far.
    #[cfg(test)]
    fn state_count(&self) -> usize {
        self.states.len()
    }

    /// Refresh the resolved lists when `beat` enters a new cache window.
    pub fn update(&mut self, beat: f64, timeline: Option<&Timeline>, automation: &AutomationStore) {
        let window = (beat / self.refresh_beats).floor() as i64;
        if self.window == Some(window) {
            return;
        }
        self.window = Some(window);
        self.generation += 1;

        let from = window as f64 * self.refresh_beats;
        let to = from + self.refresh_beats;
        self.global.window = window;
        self.global.effects.clear();

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
            for binding in automation.bindings(AutomationTarget::Effect, &definition.id) {
                if !binding.applies_to(&instance.id) {
                    continue;
                }
                if let Some(value) = binding.curve.bounded_value_at(from) {
                    settings.apply_number(&binding.parameter, value);
                }
            }
            let active = ActiveEffect {
                instance: index as u32,
                start: instance.start,
                end: instance.end,
                settings,
            };
            match &instance.targets {
                None => self.global.effects.push(active),
                Some(targets) => {
                    for &track in targets {
                        let list = self.inserts.entry(track).or_default();
                        if list.window != window {
                            list.window = window;
                            list.effects.clear();
                        }
                        list.effects.push(active);
                    }
                }
            }
        }

        self.inserts
            .retain(|_, list| list.window >= window - CACHE_TTL_WINDOWS);
    }

    /// Run `track`'s inserts, then the global effects.
    pub fn process(&mut self, track: TrackHandle, input: f64, beat: f64) -> f64 {
        let Some(window) = self.window else {
            return input;
        };
        let Self {
            sample_rate,
            fade_progress,
            generation,
            global,
            inserts,
            states,
            ..
        } = self;
        let mut ctx = RunContext {
            states,
            sample_rate: *sample_rate,
            fade_progress: *fade_progress,
            generation: *generation,
        };

        let mut x = input;
        if let Some(list) = inserts.get(&track)
            && list.window == window
        {
            for fx in &list.effects {
                x = ctx.run(fx, track, x, beat);
            }
        }
        for fx in &global.effects {
            x = ctx.run(fx, track, x, beat);
        }
        x
    }

    /// Whether any effect could touch `track` in the current window.
    #[cfg(test)]
    fn has_effects_for(&self, track: TrackHandle) -> bool {
        let Some(window) = self.window else {
            return false;
        };
        !self.global.effects.is_empty()
            || self
                .inserts
                .get(&track)
                .is_some_and(|l| l.window == window && !l.effects.is_empty())
    }
}

struct RunContext<'a> {
    states: &'a mut HashMap<EffectStateKey, StateSlot>,
    sample_rate: f64,
    fade_progress: f64,
    generation: u64,
}

impl RunContext<'_> {
    #[inline]
    fn run(&mut self, fx: &ActiveEffect, track: TrackHandle, x: f64, beat: f64) -> f64 {
        if !(fx.start <= beat && beat < fx.end) {
            return x;
        }
        let key = EffectStateKey {
            instance: fx.instance,
            track,
        };
        let sample_rate = self.sample_rate;
        let slot = self.states.entry(key).or_insert_with(|| StateSlot {
            state: EffectState::new(fx.settings.kind(), sample_rate),
            generation: 0,
        });
        if slot.generation != self.generation {
            slot.state.configure(&fx.settings, sample_rate);
            slot.generation = self.generation;
        }

        let y = sanitize(slot.state.process(x));
        let progress = (beat - fx.start) / (fx.end - fx.start);
        let gain = if self.fade_progress > 0.0 {
            (progress / self.fade_progress).min(1.0)
        } else {
            1.0
        };
        let out = x + (y - x) * gain;
        flush_denormal(sanitize(out)).clamp(-OUTPUT_LIMIT, OUTPUT_LIMIT)
    }
}

/// Audio tracks a `targetTrackId` names: the audio track itself, or every
/// audio track mapped to that timeline track.
pub(crate) fn resolve_targets(
    project: &Project,
    tracks: &TrackStateManager,
    target: &str,
) -> Vec<TrackHandle> {
    if let Some(handle) = tracks.handle(target) {
        return vec![handle];
    }
    project
        .timeline_track_to_audio_tracks
        .get(target)
        .map(|ids| ids.iter().filter_map(|id| tracks.handle(id)).collect())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::project::{
        AutomationCurve, AutomationPoint, TimelineEffect, TimelineTrack, Track, ViewMode,
    };

    fn timeline_track(id: &str, kind: TimelineTrackKind) -> TimelineTrack {
        TimelineTrack {
            id: id.into(),
            kind,
            pattern_id: None,
            volume: 1.0,
            mute: false,
            solo: false,
            order: 0,
        }
    }

    fn placement(id: &str, track: &str, effect: &str, start: f64, len: f64) -> TimelineEffect {
        TimelineEffect {
            id: id.into(),
            start_beat: start,
            duration: len,
            track_id: track.into(),
            effect_id: effect.into(),
            target_track_id: None,
        }
    }

    fn effect(id: &str, kind: &str, settings: &[(&str, SettingValue)]) -> EffectDefinition {
        EffectDefinition {
            id: id.into(),
            effect_type: kind.into(),
            settings: settings
                .iter()
                .map(|(k, v)| (k.to_string(), v.clone()))
                .collect(),
        }
    }

    /// Two audio tracks and one effect track holding `effects`.
    fn project(defs: Vec<EffectDefinition>, effects: Vec<TimelineEffect>) -> (Project, TrackStateManager) {
        let mut project = Project {
            view_mode: ViewMode::Arrangement,
            effects: defs,
            ..Project::default()
        };
        project.timeline = Some(Timeline {
            tracks: vec![
                timeline_track("fx-track", TimelineTrackKind::Effect),
                timeline_track("lane", TimelineTrackKind::Pattern),
            ],
            effects,
            total_length: 16.0,
            ..Timeline::default()
        });
        let mut tracks = TrackStateManager::new();
        tracks.insert("a");
        tracks.insert("b");
        (project, tracks)
    }

    fn processor(project: &Project, tracks: &TrackStateManager) -> EffectsProcessor {
        let mut fx = EffectsProcessor::new(1000.0, 0.1, 0.0);
        fx.load(project, tracks);
        fx
    }

    #[test]
    fn typed_settings_from_map() {
        let def = effect(
            "r",
            "Reverb",
            &[
                ("wet", SettingValue::Number(1.0)),
                ("roomSize", SettingValue::Number(0.8)),
                ("bogus", SettingValue::Number(3.0)),
            ],
        );
        let EffectSettings::Reverb(s) = EffectSettings::from_definition(&def).unwrap() else {
            panic!("expected reverb settings");
        };
        assert_eq!((s.wet, s.dry, s.room_size, s.dampening), (1.0, 1.0, 0.8, 0.5));

        let mut f = EffectSettings::defaults(EffectKind::Filter);
        assert!(f.apply("filterType", &SettingValue::Text("highpass".into())));
        assert!(!f.apply("filterType", &SettingValue::Text("comb".into())));
        assert!(!f.apply_number("cutoff", f64::NAN));
        let EffectSettings::Filter(s) = f else { unreachable!() };
        assert_eq!(s.filter_type, FilterType::Highpass);

        assert!(matches!(
            EffectKind::parse("flanger"),
            Err(EngineError::UnknownEffectType(t)) if t == "flanger"
        ));
    }

    #[test]
    fn global_effect_has_separate_state_per_track() {
        let (p, tracks) = project(
            vec![effect(
                "echo",
                "delay",
                &[
                    ("time", SettingValue::Number(0.01)),
                    ("feedback", SettingValue::Number(0.0)),
                    ("wet", SettingValue::Number(1.0)),
                    ("dry", SettingValue::Number(0.0)),
                ],
            )],
            vec![placement("echo-1", "fx-track", "echo", 0.0, 8.0)],
        );
        let mut fx = processor(&p, &tracks);
        let automation = AutomationStore::new();
        let (a, b) = (tracks.handle("a").unwrap(), tracks.handle("b").unwrap());

        let mut out_a = Vec::new();
        let mut out_b = Vec::new();
        for i in 0..30 {
            let beat = i as f64 * 0.002;
            fx.update(beat, p.timeline.as_ref(), &automation);
            // Impulse only on track a
            out_a.push(fx.process(a, if i == 0 { 1.0 } else { 0.0 }, beat));
            out_b.push(fx.process(b, 0.0, beat));
        }
        assert_eq!(out_a[10], 1.0, "delayed impulse on track a");
        assert!(out_b.iter().all(|&s| s == 0.0), "track b must not hear track a's delay");
        assert_eq!(fx.state_count(), 2);
    }

    fn echo() -> EffectDefinition {
        effect(
            "echo",
            "delay",
            &[
                ("time", SettingValue::Number(0.01)),
                ("feedback", SettingValue::Number(0.0)),
                ("wet", SettingValue::Number(1.0)),
                ("dry", SettingValue::Number(0.0)),
            ],
        )
    }

    /// Feed samples `from..to` of an impulse at 0 to tracks a and b.
    fn feed(fx: &mut EffectsProcessor, p: &Project, tracks: &TrackStateManager, from: usize, to: usize) -> Vec<f64> {
        let automation = AutomationStore::new();
        let a = tracks.handle("a").unwrap();
        let b = tracks.handle("b");
        let mut out = Vec::new();
        for i in from..to {
            let beat = i as f64 * 0.002;
            fx.update(beat, p.timeline.as_ref(), &automation);
            out.push(fx.process(a, if i == 0 { 1.0 } else { 0.0 }, beat));
            if let Some(b) = b {
                fx.process(b, 0.0, beat);
            }
        }
        out
    }

    #[test]
    fn reload_keeps_tails_of_surviving_placements() {
        let (mut p, mut tracks) = project(vec![echo()], vec![placement("echo-1", "fx-track", "echo", 0.0, 8.0)]);
        let mut fx = processor(&p, &tracks);
        feed(&mut fx, &p, &tracks, 0, 5);

        // adding a track rebuilds routing
        p.tracks.push(Track::new("c", "tone"));
        tracks.insert("c");
        fx.reload(&p, &tracks);
        assert_eq!(fx.state_count(), 2);
        let out = feed(&mut fx, &p, &tracks, 5, 12);
        assert_eq!(out[5], 1.0, "delayed impulse survives the reload");

        // a full load starts from silence
        let mut fresh = processor(&p, &tracks);
        feed(&mut fresh, &p, &tracks, 0, 5);
        fresh.load(&p, &tracks);
        assert_eq!(fresh.state_count(), 0);
        assert!(feed(&mut fresh, &p, &tracks, 5, 12).iter().all(|&s| s == 0.0));
    }

    #[test]
    fn reload_drops_state_of_removed_tracks_and_placements() {
        let (mut p, mut tracks) = project(vec![echo()], vec![placement("echo-1", "fx-track", "echo", 0.0, 8.0)]);
        let mut fx = processor(&p, &tracks);
        feed(&mut fx, &p, &tracks, 0, 5);
        assert_eq!(fx.state_count(), 2);

        tracks.remove("b");
        fx.reload(&p, &tracks);
        assert_eq!(fx.state_count(), 1, "only track a keeps its delay line");

        p.timeline.as_mut().unwrap().effects[0].id = "echo-2".into();
        fx.reload(&p, &tracks);
        assert_eq!(fx.state_count(), 0);
    }

    #[test]
    fn inserts_resolve_through_timeline_track_mapping() {
        let mut insert = placement("dist-1", "fx-track", "dist", 0.0, 4.0);
        insert.target_track_id = Some("lane".into());
        let (mut p, tracks) = project(
            vec![effect("dist", "distortion", &[("drive", SettingValue::Number(1.0))])],
            vec![insert],
        );
        p.timeline_track_to_audio_tracks
            .insert("lane".into(), vec!["b".into()]);
        let mut fx = processor(&p, &tracks);
        fx.update(0.5, p.timeline.as_ref(), &AutomationStore::new());

        let (a, b) = (tracks.handle("a").unwrap(), tracks.handle("b").unwrap());
        assert!(!fx.has_effects_for(a));
        assert!(fx.has_effects_for(b));
        assert_eq!(fx.process(a, 0.3, 0.5), 0.3);
        assert!((fx.process(b, 0.3, 0.5) - 1.0).abs() < 1e-12, "fully driven hard clip");
    }

    #[test]
    fn skips_muted_foreign_and_undefined_placements() {
        let (mut p, tracks) = project(
            vec![effect("d", "distortion", &[])],
            vec![
                placement("on-pattern-lane", "lane", "d", 0.0, 4.0),
                placement("missing-def", "fx-track", "nope", 0.0, 4.0),
                placement("ok", "fx-track", "d", 0.0, 4.0),
            ],
        );
        let mut fx = processor(&p, &tracks);
        assert_eq!(fx.instance_count(), 1);

        let a = tracks.handle("a").unwrap();
        fx.update(0.0, p.timeline.as_ref(), &AutomationStore::new());
        assert!(fx.has_effects_for(a));

        p.timeline.as_mut().unwrap().tracks[0].mute = true;
        fx.invalidate();
        fx.update(0.0, p.timeline.as_ref(), &AutomationStore::new());
        assert!(!fx.has_effects_for(a));
        assert_eq!(fx.process(a, 0.25, 0.0), 0.25);
    }

    #[test]
    fn automation_overrides_static_setting() {
        let (p, tracks) = project(
            vec![effect("d", "distortion", &[("amount", SettingValue::Number(1.0))])],
            vec![placement("d-1", "fx-track", "d", 0.0, 8.0)],
        );
        let mut fx = processor(&p, &tracks);
        let mut automation = AutomationStore::new();
        let curve = AutomationCurve {
            points: vec![
                AutomationPoint { beat: 0.0, value: 0.0 },
                AutomationPoint { beat: 4.0, value: 0.0 },
            ],
            min: None,
            max: None,
        };
        assert!(automation.set("effect:d:*:amount", Some(&curve)));
        let a = tracks.handle("a").unwrap();

        fx.update(1.0, p.timeline.as_ref(), &automation);
        assert_eq!(fx.process(a, 0.4, 1.0), 0.4, "amount automated to 0");

        // A curve for another instance does not apply
        let mut other = AutomationStore::new();
        other.set("effect:d:elsewhere:amount", Some(&curve));
        fx.invalidate();
        fx.update(1.0, p.timeline.as_ref(), &other);
        assert_ne!(fx.process(a, 0.4, 1.0), 0.4);
    }

    #[test]
    fn new_effect_fades_in() {
        let (p, tracks) = project(
            vec![effect("d", "distortion", &[("drive", SettingValue::Number(1.0))])],
            vec![placement("d-1", "fx-track", "d", 0.0, 10.0)],
        );
        let mut fx = EffectsProcessor::new(1000.0, 0.1, 0.01);
        fx.load(&p, &tracks);
        let a = tracks.handle("a").unwrap();
        let automation = AutomationStore::new();

        fx.update(0.0, p.timeline.as_ref(), &automation);
        assert_eq!(fx.process(a, 0.5, 0.0), 0.5, "no effect at progress 0");
        // progress 0.005 is halfway through the fade
        let half = fx.process(a, 0.5, 0.05);
        assert!((half - 0.75).abs() < 1e-12, "got {half}");
        fx.update(0.2, p.timeline.as_ref(), &automation);
        assert!((fx.process(a, 0.5, 0.2) - 1.0).abs() < 1e-12);
    }

    #[test]
    fn transparent_reverb_is_bit_exact() {
        let (p, tracks) = project(
            vec![effect(
                "r",
                "reverb",
                &[("wet", SettingValue::Number(0.0)), ("roomSize", SettingValue::Number(0.9))],
            )],
            vec![placement("r-1", "fx-track", "r", 0.0, 16.0)],
        );
        let mut fx = EffectsProcessor::new(1000.0, 0.1, 0.01);
        fx.load(&p, &tracks);
        let a = tracks.handle("a").unwrap();
        let automation = AutomationStore::new();
        for i in 0..4000 {
            let beat = i as f64 * 0.002;
            fx.update(beat, p.timeline.as_ref(), &automation);
            let x = ((i as f64) * 0.07).sin() * 0.8;
            assert_eq!(fx.process(a, x, beat).to_bits(), x.to_bits(), "sample {i}");
        }
    }

    #[test]
    fn runaway_output_is_limited() {
        let (p, tracks) = project(
            vec![effect(
                "loop",
                "delay",
                &[
                    ("time", SettingValue::Number(0.005)),
                    ("feedback", SettingValue::Number(5.0)),
                    ("wet", SettingValue::Number(1.0)),
                    ("dry", SettingValue::Number(1.0)),
                ],
            )],
            vec![placement("loop-1", "fx-track", "loop", 0.0, 100.0)],
        );
        let mut fx = processor(&p, &tracks);
        let a = tracks.handle("a").unwrap();
        let automation = AutomationStore::new();
        for i in 0..5000 {
            let beat = i as f64 * 0.01;
            fx.update(beat, p.timeline.as_ref(), &automation);
            let y = fx.process(a, 1.5, beat);
            assert!(y.is_finite() && y.abs() <= OUTPUT_LIMIT, "sample {i}: {y}");
        }
    }
}
