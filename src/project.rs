//! Project data model.
//!
//! These are the serde types a host sends in `loadProject` and friends, plus
//! the two pure transforms the engine needs from them: flattening a pattern
//! tree into events, and expanding events into one loop's worth of beats.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Shortest loop the engine will run.
pub const MIN_LOOP_BEATS: f64 = 1e-3;
/// Loop length used when none is given.
pub const DEFAULT_LOOP_BEATS: f64 = 4.0;
/// Pitch used when an event or pattern leaf has none (middle C).
pub const DEFAULT_PITCH: f64 = 60.0;
/// Upper bound on events produced by one expansion pass.
pub const MAX_EXPANDED_EVENTS: usize = 1 << 16;

/// Prefix of pattern-scoped instrument ids: `__pattern_<patternId>_<instrumentId>`.
pub const PATTERN_TRACK_PREFIX: &str = "__pattern_";

/// Normalize a loop or meter length: missing, zero, or non-finite values
/// become 4 beats, anything else is held above `MIN_LOOP_BEATS`.
pub fn normalize_beats(length: Option<f64>) -> f64 {
    match length {
        Some(l) if l.is_finite() && l > 0.0 => l.max(MIN_LOOP_BEATS),
        _ => DEFAULT_LOOP_BEATS,
    }
}

/// A loosely typed setting value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SettingValue {
    Bool(bool),
    Number(f64),
    Text(String),
}

impl SettingValue {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            SettingValue::Number(n) if n.is_finite() => Some(*n),
            SettingValue::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            SettingValue::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            SettingValue::Bool(b) => Some(*b),
            SettingValue::Number(n) => Some(*n != 0.0),
            SettingValue::Text(_) => None,
        }
    }
}

pub type Settings = HashMap<String, SettingValue>;

fn default_volume() -> f64 {
    1.0
}

fn default_pitch() -> f64 {
    DEFAULT_PITCH
}

fn default_bpm() -> f64 {
    120.0
}

/// An instrument track.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Track {
    pub id: String,
    #[serde(default)]
    pub instrument_type: String,
    #[serde(default)]
    pub pattern_tree: Option<PatternNode>,
    #[serde(default)]
    pub base_meter: Option<f64>,
    #[serde(default)]
    pub settings: Settings,
    #[serde(default = "default_volume")]
    pub volume: f64,
    #[serde(default)]
    pub pan: f64,
    #[serde(default)]
    pub mute: bool,
    #[serde(default)]
    pub solo: bool,
}

impl Track {
    pub fn new(id: impl Into<String>, instrument_type: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            instrument_type: instrument_type.into(),
            pattern_tree: None,
            base_meter: None,
            settings: Settings::new(),
            volume: 1.0,
            pan: 0.0,
            mute: false,
            solo: false,
        }
    }

    /// This track's loop length in beats.
    pub fn meter(&self) -> f64 {
        normalize_beats(self.base_meter)
    }

    /// Polyphony declared in the track settings, if any.
    pub fn declared_polyphony(&self) -> Option<usize> {
        self.settings
            .get("polyphony")
            .and_then(SettingValue::as_f64)
            .filter(|p| *p >= 1.0)
            .map(|p| p as usize)
    }
}

/// A node of a pattern tree. Children split the node's span equally.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PatternNode {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub velocity: Option<f64>,
    #[serde(default)]
    pub pitch: Option<f64>,
    #[serde(default)]
    pub children: Vec<PatternNode>,
}

impl PatternNode {
    pub fn leaf(velocity: f64, pitch: f64) -> Self {
        Self {
            velocity: Some(velocity),
            pitch: Some(pitch),
            ..Self::default()
        }
    }

    pub fn group(children: Vec<PatternNode>) -> Self {
        Self {
            children,
            ..Self::default()
        }
    }

    /// Flatten into events spread over `base_meter` beats.
    pub fn flatten(&self, base_meter: Option<f64>, instrument_id: &str) -> Vec<Event> {
        let mut out = Vec::new();
        let mut counter = 0;
        self.flatten_into(
            0.0,
            normalize_beats(base_meter),
            instrument_id,
            &mut counter,
            &mut out,
        );
        out
    }

    fn flatten_into(
        &self,
        start: f64,
        span: f64,
        instrument_id: &str,
        counter: &mut usize,
        out: &mut Vec<Event>,
    ) {
        if self.children.is_empty() {
            let velocity = self.velocity.unwrap_or(0.0);
            if velocity.is_finite() && velocity > 0.0 {
                let id = match &self.id {
                    Some(id) => id.clone(),
                    None => format!("{instrument_id}:{counter}"),
                };
                out.push(Event {
                    id,
                    time: start,
                    velocity,
                    pitch: self.pitch.filter(|p| p.is_finite()).unwrap_or(DEFAULT_PITCH),
                    duration: Some(span),
                    instrument_id: instrument_id.to_string(),
                });
            }
            *counter += 1;
            return;
        }
        let part = span / self.children.len() as f64;
        for (i, child) in self.children.iter().enumerate() {
            child.flatten_into(start + part * i as f64, part, instrument_id, counter, out);
        }
    }
}

/// A note event. `time` is in beats relative to the owning pattern's loop.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    #[serde(default)]
    pub id: String,
    pub time: f64,
    #[serde(default = "default_volume")]
    pub velocity: f64,
    #[serde(default = "default_pitch")]
    pub pitch: f64,
    #[serde(default)]
    pub duration: Option<f64>,
    pub instrument_id: String,
}

impl Event {
    /// Finite, non-negative time.
    pub fn is_well_formed(&self) -> bool {
        self.time.is_finite() && self.time >= 0.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ViewMode {
    #[default]
    Pattern,
    Arrangement,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimelineTrackKind {
    Pattern,
    Effect,
    Envelope,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimelineTrack {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: TimelineTrackKind,
    #[serde(default)]
    pub pattern_id: Option<String>,
    #[serde(default = "default_volume")]
    pub volume: f64,
    #[serde(default)]
    pub mute: bool,
    #[serde(default)]
    pub solo: bool,
    #[serde(default)]
    pub order: i32,
}

/// Something placed on the timeline over `[start_beat, start_beat + duration)`.
pub trait TimelineSpan {
    fn start_beat(&self) -> f64;
    fn duration(&self) -> f64;

    fn end_beat(&self) -> f64 {
        self.start_beat() + self.duration()
    }

    fn is_active_at(&self, beat: f64) -> bool {
        self.start_beat() <= beat && beat < self.end_beat()
    }

    /// Position within the span, 0 at the start and 1 at the end.
    fn progress_at(&self, beat: f64) -> f64 {
        let d = self.duration();
        if d > 0.0 {
            ((beat - self.start_beat()) / d).clamp(0.0, 1.0)
        } else {
            0.0
        }
    }
}

macro_rules! impl_timeline_span {
    ($($t:ty),*) => {
        $(impl TimelineSpan for $t {
            fn start_beat(&self) -> f64 {
                self.start_beat
            }
            fn duration(&self) -> f64 {
                self.duration
            }
        })*
    };
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Clip {
    pub id: String,
    pub start_beat: f64,
    pub duration: f64,
    pub track_id: String,
    #[serde(default)]
    pub pattern_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimelineEffect {
    pub id: String,
    pub start_beat: f64,
    pub duration: f64,
    pub track_id: String,
    pub effect_id: String,
    #[serde(default)]
    pub target_track_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimelineEnvelope {
    pub id: String,
    pub start_beat: f64,
    pub duration: f64,
    pub track_id: String,
    pub envelope_id: String,
    #[serde(default)]
    pub pattern_id: Option<String>,
    #[serde(default)]
    pub target_track_id: Option<String>,
}

impl_timeline_span!(Clip, TimelineEffect, TimelineEnvelope);

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Timeline {
    #[serde(default)]
    pub tracks: Vec<TimelineTrack>,
    #[serde(default)]
    pub clips: Vec<Clip>,
    #[serde(default)]
    pub effects: Vec<TimelineEffect>,
    #[serde(default)]
    pub envelopes: Vec<TimelineEnvelope>,
    #[serde(default)]
    pub total_length: f64,
}

impl Timeline {
    pub fn track(&self, id: &str) -> Option<&TimelineTrack> {
        self.tracks.iter().find(|t| t.id == id)
    }

    pub fn track_mut(&mut self, id: &str) -> Option<&mut TimelineTrack> {
        self.tracks.iter_mut().find(|t| t.id == id)
    }

    /// Whether any pattern lane is soloed. Effect and envelope lanes never
    /// silence audio through solo.
    pub fn has_any_soloed_track(&self) -> bool {
        self.tracks
            .iter()
            .any(|t| t.solo && t.kind == TimelineTrackKind::Pattern)
    }

    /// Pattern a clip plays: its own, else its timeline track's.
    pub fn clip_pattern<'a>(&'a self, clip: &'a Clip) -> Option<&'a str> {
        clip.pattern_id
            .as_deref()
            .or_else(|| self.track(&clip.track_id).and_then(|t| t.pattern_id.as_deref()))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PatternDefinition {
    pub id: String,
    #[serde(default)]
    pub base_meter: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EffectDefinition {
    pub id: String,
    #[serde(rename = "type")]
    pub effect_type: String,
    #[serde(default)]
    pub settings: Settings,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnvelopeDefinition {
    pub id: String,
    #[serde(rename = "type")]
    pub envelope_type: String,
    #[serde(default)]
    pub settings: Settings,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AutomationPoint {
    pub beat: f64,
    pub value: f64,
}

/// Automation points with optional output bounds. Points may arrive unsorted.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct AutomationCurve {
    #[serde(default)]
    pub points: Vec<AutomationPoint>,
    #[serde(default)]
    pub min: Option<f64>,
    #[serde(default)]
    pub max: Option<f64>,
}

/// Everything a `loadProject` carries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Project {
    pub tracks: Vec<Track>,
    #[serde(default = "default_bpm")]
    pub bpm: f64,
    pub events: Vec<Event>,
    pub base_meter_track_id: Option<String>,
    pub timeline: Option<Timeline>,
    pub effects: Vec<EffectDefinition>,
    pub envelopes: Vec<EnvelopeDefinition>,
    pub view_mode: ViewMode,
    /// patternId → trackId
    pub pattern_to_track_id: HashMap<String, String>,
    /// timeline track id → audio track ids
    pub timeline_track_to_audio_tracks: HashMap<String, Vec<String>>,
    pub automation: HashMap<String, AutomationCurve>,
    pub patterns: Vec<PatternDefinition>,
}

impl Default for Project {
    fn default() -> Self {
        Self {
            tracks: Vec::new(),
            bpm: default_bpm(),
            events: Vec::new(),
            base_meter_track_id: None,
            timeline: None,
            effects: Vec::new(),
            envelopes: Vec::new(),
            view_mode: ViewMode::Pattern,
            pattern_to_track_id: HashMap::new(),
            timeline_track_to_audio_tracks: HashMap::new(),
            automation: HashMap::new(),
            patterns: Vec::new(),
        }
    }
}

/// One event placed at an absolute beat within the current loop.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TimedEvent<'a> {
    pub beat: f64,
    pub event: &'a Event,
}

impl Project {
    pub fn track(&self, id: &str) -> Option<&Track> {
        self.tracks.iter().find(|t| t.id == id)
    }

    pub fn track_mut(&mut self, id: &str) -> Option<&mut Track> {
        self.tracks.iter_mut().find(|t| t.id == id)
    }

    /// Flatten pattern trees for tracks that arrived without events.
    pub fn fill_events_from_trees(&mut self) {
        let mut generated = Vec::new();
        for track in &self.tracks {
            let Some(tree) = &track.pattern_tree else {
                continue;
            };
            if self.events.iter().any(|e| e.instrument_id == track.id) {
                continue;
            }
            generated.extend(tree.flatten(track.base_meter, &track.id));
        }
        self.events.extend(generated);
    }

    /// Replace one track's pattern and its events.
    pub fn replace_pattern_tree(&mut self, track_id: &str, tree: PatternNode, base_meter: Option<f64>) {
        let events = tree.flatten(base_meter, track_id);
        self.events.retain(|e| e.instrument_id != track_id);
        self.events.extend(events);
        if let Some(track) = self.track_mut(track_id) {
            track.pattern_tree = Some(tree);
            track.base_meter = base_meter;
        }
    }

    pub fn pattern_meter(&self, pattern_id: &str) -> Option<f64> {
        self.patterns
            .iter()
            .find(|p| p.id == pattern_id)
            .and_then(|p| p.base_meter)
    }

    /// The pattern an audio track belongs to.
    ///
    /// Pattern-scoped ids (`__pattern_<patternId>_<instrumentId>`) win; other
    /// tracks are looked up in `pattern_to_track_id`.
    pub fn pattern_of_track(&self, track_id: &str) -> Option<String> {
        if let Some(rest) = track_id.strip_prefix(PATTERN_TRACK_PREFIX) {
            let known = self
                .patterns
                .iter()
                .map(|p| p.id.as_str())
                .chain(self.pattern_to_track_id.keys().map(String::as_str))
                .chain(
                    self.timeline
                        .iter()
                        .flat_map(|t| t.tracks.iter().filter_map(|t| t.pattern_id.as_deref())),
                );
            // Longest known pattern id that prefixes the rest.
            let mut best: Option<&str> = None;
            for pid in known {
                let fits = rest.len() > pid.len()
                    && rest.starts_with(pid)
                    && rest.as_bytes()[pid.len()] == b'_';
                if fits && best.is_none_or(|b| pid.len() > b.len()) {
                    best = Some(pid);
                }
            }
            if let Some(pid) = best {
                return Some(pid.to_string());
            }
            if let Some((pid, _)) = rest.split_once('_') {
                return Some(pid.to_string());
            }
        }
        self.pattern_to_track_id
            .iter()
            .find(|(_, t)| t.as_str() == track_id)
            .map(|(p, _)| p.clone())
    }

    /// Loop length in beats for the current view mode.
    pub fn loop_length_beats(&self) -> f64 {
        match self.view_mode {
            ViewMode::Pattern => {
                let meter = self
                    .base_meter_track_id
                    .as_deref()
                    .and_then(|id| self.track(id))
                    .and_then(|t| t.base_meter);
                normalize_beats(meter)
            }
            ViewMode::Arrangement => {
                normalize_beats(self.timeline.as_ref().map(|t| t.total_length))
            }
        }
    }

    fn track_meter(&self, track_id: &str) -> f64 {
        normalize_beats(self.track(track_id).and_then(|t| t.base_meter))
    }

    /// Expand events into absolute beats within `[0, loop_length)`, sorted by
    /// beat. Malformed events are dropped.
    pub fn expand_events(&self) -> Vec<TimedEvent<'_>> {
        let loop_length = self.loop_length_beats();
        let mut out = Vec::new();
        match self.view_mode {
            ViewMode::Pattern => {
                for event in self.events.iter().filter(|e| e.is_well_formed()) {
                    let meter = self.track_meter(&event.instrument_id);
                    repeat_into(&mut out, event, 0.0, meter, loop_length);
                }
            }
            ViewMode::Arrangement => {
                let Some(timeline) = &self.timeline else {
                    return out;
                };
                for clip in &timeline.clips {
                    let on_pattern_track = timeline
                        .track(&clip.track_id)
                        .is_some_and(|t| t.kind == TimelineTrackKind::Pattern);
                    if !on_pattern_track || !(clip.duration > 0.0) {
                        continue;
                    }
                    let Some(pattern_id) = timeline.clip_pattern(clip) else {
                        continue;
                    };
                    let end = clip.end_beat().min(loop_length);
                    for track in &self.tracks {
                        if self.pattern_of_track(&track.id).as_deref() != Some(pattern_id) {
                            continue;
                        }
                        let meter = normalize_beats(
                            self.pattern_meter(pattern_id).or(track.base_meter),
                        );
                        for event in self
                            .events
                            .iter()
                            .filter(|e| e.instrument_id == track.id && e.is_well_formed())
                        {
                            repeat_into(&mut out, event, clip.start_beat, meter, end);
                        }
                    }
                }
            }
        }
        out.sort_by(|a, b| a.beat.total_cmp(&b.beat));
        out.truncate(MAX_EXPANDED_EVENTS);
        out
    }
}

/// Push `event` at `offset + time + k * meter` for every k that lands before `end`.
/// The buffer is compacted to the earliest `MAX_EXPANDED_EVENTS` whenever it
/// doubles past the cap.
fn repeat_into<'a>(out: &mut Vec<TimedEvent<'a>>, event: &'a Event, offset: f64, meter: f64, end: f64) {
    let mut k = 0u32;
    loop {
        let beat = offset + event.time + meter * k as f64;
        if beat >= end {
            break;
        }
        if out.len() >= 2 * MAX_EXPANDED_EVENTS {
            keep_earliest(out);
        }
        out.push(TimedEvent { beat, event });
        k += 1;
    }
}

fn keep_earliest(out: &mut Vec<TimedEvent<'_>>) {
    if out.len() > MAX_EXPANDED_EVENTS {
        out.select_nth_unstable_by(MAX_EXPANDED_EVENTS, |a, b| a.beat.total_cmp(&b.beat));
        out.truncate(MAX_EXPANDED_EVENTS);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(id: &str, time: f64, track: &str) -> Event {
        Event {
            id: id.to_string(),
            time,
            velocity: 1.0,
            pitch: DEFAULT_PITCH,
            duration: None,
            instrument_id: track.to_string(),
        }
    }

    #[test]
    fn normalize_handles_bad_lengths() {
        assert_eq!(normalize_beats(None), 4.0);
        assert_eq!(normalize_beats(Some(0.0)), 4.0);
        assert_eq!(normalize_beats(Some(-2.0)), 4.0);
        assert_eq!(normalize_beats(Some(f64::NAN)), 4.0);
        assert_eq!(normalize_beats(Some(1e-9)), MIN_LOOP_BEATS);
        assert_eq!(normalize_beats(Some(3.0)), 3.0);
    }

    #[test]
    fn flatten_splits_span_equally() {
        let tree = PatternNode::group(vec![
            PatternNode::leaf(1.0, 36.0),
            PatternNode::group(vec![PatternNode::leaf(0.5, 38.0), PatternNode::leaf(0.0, 40.0)]),
            PatternNode::leaf(0.8, 42.0),
            PatternNode::default(),
        ]);
        let events = tree.flatten(Some(4.0), "drums");
        let times: Vec<f64> = events.iter().map(|e| e.time).collect();
        assert_eq!(times, vec![0.0, 1.0, 2.0]);
        assert_eq!(events[1].duration, Some(0.5));
        assert_eq!(events[1].pitch, 38.0);
        assert_eq!(events[2].duration, Some(1.0));
        assert!(events.iter().all(|e| e.instrument_id == "drums"));
        let mut ids: Vec<&str> = events.iter().map(|e| e.id.as_str()).collect();
        ids.dedup();
        assert_eq!(ids.len(), 3, "ids should be unique: {ids:?}");
    }

    #[test]
    fn flatten_defaults_pitch_and_meter() {
        let tree = PatternNode {
            velocity: Some(1.0),
            ..PatternNode::default()
        };
        let events = tree.flatten(None, "t");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].pitch, DEFAULT_PITCH);
        assert_eq!(events[0].duration, Some(4.0));
    }

    #[test]
    fn pattern_mode_repeats_each_track_at_its_meter() {
        let mut a = Track::new("a", "kick");
        a.base_meter = Some(4.0);
        let mut b = Track::new("b", "tone");
        b.base_meter = Some(2.0);
        let project = Project {
            tracks: vec![a, b],
            events: vec![event("a0", 0.0, "a"), event("b1", 1.0, "b")],
            base_meter_track_id: Some("a".into()),
            ..Project::default()
        };
        assert_eq!(project.loop_length_beats(), 4.0);
        let beats: Vec<(f64, &str)> = project
            .expand_events()
            .iter()
            .map(|t| (t.beat, t.event.id.as_str()))
            .collect();
        assert_eq!(beats, vec![(0.0, "a0"), (1.0, "b1"), (3.0, "b1")]);
    }

    #[test]
    fn event_cap_keeps_the_earliest_beats() {
        let mut dense = Track::new("dense", "hat");
        dense.base_meter = Some(MIN_LOOP_BEATS);
        let mut long = Track::new("long", "pad");
        long.base_meter = Some(200.0);
        let project = Project {
            tracks: vec![dense, long],
            events: vec![event("tick", 0.0, "dense"), event("late", 0.5, "long")],
            base_meter_track_id: Some("long".into()),
            ..Project::default()
        };
        let expanded = project.expand_events();
        assert_eq!(expanded.len(), MAX_EXPANDED_EVENTS);
        assert!(expanded.iter().any(|t| t.event.id == "late"), "early event on the second track survives");
        assert!(expanded.windows(2).all(|w| w[0].beat <= w[1].beat));
        let last = expanded[MAX_EXPANDED_EVENTS - 1].beat;
        assert!(last < 66.0, "only the earliest beats are kept, last {last}");
    }

    #[test]
    fn malformed_events_are_dropped() {
        let project = Project {
            tracks: vec![Track::new("a", "kick")],
            events: vec![
                event("ok", 1.0, "a"),
                event("nan", f64::NAN, "a"),
                event("neg", -1.0, "a"),
            ],
            ..Project::default()
        };
        let expanded = project.expand_events();
        assert_eq!(expanded.len(), 1);
        assert_eq!(expanded[0].event.id, "ok");
    }

    fn arrangement() -> Project {
        let mut hat = Track::new("__pattern_p1_hat", "tone");
        hat.base_meter = Some(1.0);
        Project {
            tracks: vec![hat, Track::new("bass", "saw")],
            events: vec![event("h", 0.5, "__pattern_p1_hat"), event("b", 0.0, "bass")],
            view_mode: ViewMode::Arrangement,
            pattern_to_track_id: HashMap::from([("p2".to_string(), "bass".to_string())]),
            patterns: vec![
                PatternDefinition {
                    id: "p1".into(),
                    base_meter: Some(2.0),
                },
                PatternDefinition {
                    id: "p2".into(),
                    base_meter: None,
                },
            ],
            timeline: Some(Timeline {
                tracks: vec![TimelineTrack {
                    id: "tl1".into(),
                    kind: TimelineTrackKind::Pattern,
                    pattern_id: Some("p1".into()),
                    volume: 1.0,
                    mute: false,
                    solo: false,
                    order: 0,
                }],
                clips: vec![
                    Clip {
                        id: "c1".into(),
                        start_beat: 0.0,
                        duration: 5.0,
                        track_id: "tl1".into(),
                        pattern_id: None,
                    },
                    Clip {
                        id: "c2".into(),
                        start_beat: 8.0,
                        duration: 4.0,
                        track_id: "tl1".into(),
                        pattern_id: Some("p2".into()),
                    },
                ],
                total_length: 10.0,
                ..Timeline::default()
            }),
            ..Project::default()
        }
    }

    #[test]
    fn only_pattern_lanes_count_as_soloed() {
        let mut timeline = arrangement().timeline.unwrap();
        timeline.tracks.push(TimelineTrack {
            id: "fx".into(),
            kind: TimelineTrackKind::Effect,
            pattern_id: None,
            volume: 1.0,
            mute: false,
            solo: true,
            order: 1,
        });
        assert!(!timeline.has_any_soloed_track(), "a soloed effect lane silences nothing");
        timeline.tracks[0].solo = true;
        assert!(timeline.has_any_soloed_track());
    }

    #[test]
    fn pattern_lookup_prefers_prefix_then_reverse_map() {
        let p = arrangement();
        assert_eq!(p.pattern_of_track("__pattern_p1_hat").as_deref(), Some("p1"));
        assert_eq!(p.pattern_of_track("bass").as_deref(), Some("p2"));
        assert_eq!(p.pattern_of_track("nothing"), None);
    }

    #[test]
    fn arrangement_repeats_clips_at_pattern_meter() {
        let p = arrangement();
        assert_eq!(p.loop_length_beats(), 10.0);
        let beats: Vec<(f64, &str)> = p
            .expand_events()
            .iter()
            .map(|t| (t.beat, t.event.id.as_str()))
            .collect();
        // c1: pattern meter 2 wins over the track's own meter 1.
        // c2: p2 has no meter, bass has none either, so 4; clipped at 10.
        assert_eq!(
            beats,
            vec![(0.5, "h"), (2.5, "h"), (4.5, "h"), (8.0, "b")]
        );
    }

    #[test]
    fn deserializes_camel_case_project() {
        let json = r#"{
            "tracks": [{"id": "t1", "instrumentType": "kick", "baseMeter": 4, "volume": 0.5,
                        "settings": {"polyphony": 4, "mode": "mono", "legato": true}}],
            "bpm": 128,
            "events": [{"id": "e1", "time": 0, "velocity": 1, "instrumentId": "t1"}],
            "viewMode": "arrangement",
            "timeline": {"tracks": [{"id": "fx", "type": "effect"}], "totalLength": 16},
            "effects": [{"id": "r1", "type": "reverb", "settings": {"wet": 1}}]
        }"#;
        let p: Project = serde_json::from_str(json).unwrap();
        assert_eq!(p.bpm, 128.0);
        assert_eq!(p.view_mode, ViewMode::Arrangement);
        assert_eq!(p.tracks[0].volume, 0.5);
        assert!(!p.tracks[0].mute);
        assert_eq!(p.tracks[0].declared_polyphony(), Some(4));
        assert_eq!(p.tracks[0].settings["mode"].as_str(), Some("mono"));
        assert_eq!(p.tracks[0].settings["legato"].as_bool(), Some(true));
        assert_eq!(p.events[0].pitch, DEFAULT_PITCH);
        let tl = p.timeline.unwrap();
        assert_eq!(tl.tracks[0].kind, TimelineTrackKind::Effect);
        assert_eq!(tl.tracks[0].volume, 1.0);
        assert_eq!(p.effects[0].settings["wet"].as_f64(), Some(1.0));
    }

    #[test]
    fn replace_pattern_tree_swaps_events() {
        let mut p = Project {
            tracks: vec![Track::new("a", "kick")],
            events: vec![event("old", 0.0, "a"), event("keep", 0.0, "b")],
            ..Project::default()
        };
        let tree = PatternNode::group(vec![PatternNode::leaf(1.0, 36.0), PatternNode::leaf(1.0, 36.0)]);
        p.replace_pattern_tree("a", tree, Some(2.0));
        let a_times: Vec<f64> = p.events.iter().filter(|e| e.instrument_id == "a").map(|e| e.time).collect();
        assert_eq!(a_times, vec![0.0, 1.0]);
        assert!(p.events.iter().any(|e| e.id == "keep"));
        assert_eq!(p.track("a").unwrap().base_meter, Some(2.0));
    }

    #[test]
    fn span_activity_is_half_open() {
        let clip = Clip {
            id: "c".into(),
            start_beat: 2.0,
            duration: 2.0,
            track_id: "t".into(),
            pattern_id: None,
        };
        assert!(!clip.is_active_at(1.999));
        assert!(clip.is_active_at(2.0));
        assert!(clip.is_active_at(3.999));
        assert!(!clip.is_active_at(4.0));
        assert_eq!(clip.progress_at(3.0), 0.5);
    }
}
