//! Per-track mixing: audibility, envelopes, effects, volume, and pan.
//!
//! Timeline lookups (which clips could be playing, which pattern a track
//! belongs to, track automation) are cached per `cache_refresh_beats`
//! window. Within a window only cheap span checks run per sample.

use std::collections::HashMap;
use std::f64::consts::{FRAC_1_SQRT_2, FRAC_PI_4};

use super::automation::AutomationStore;
use super::effects::{CACHE_TTL_WINDOWS, EffectsProcessor};
use super::envelopes::EnvelopesProcessor;
use super::track_state::{MAX_TRACK_VOLUME, TrackHandle, TrackState, TrackStateManager};
use crate::dsp::filter::{CachedBiquad, FilterType, flush_denormal, knob_to_cutoff_hz, sanitize};
use crate::dsp::pitch::PitchShifter;
use crate::project::{Project, Timeline, TimelineSpan, TimelineTrackKind};

/// Filter-envelope knob resolution.
pub const FILTER_KNOB_STEP: f64 = 1e-3;

/// Constant-power gains for a pan position in [-1, 1].
#[inline]
pub fn pan_gains(pan: f64) -> (f64, f64) {
    let angle = (pan.clamp(-1.0, 1.0) + 1.0) * FRAC_PI_4;
    (angle.cos(), angle.sin())
}

#[derive(Debug, Clone, Copy)]
struct PanCache {
    pan: f64,
    left: f64,
    right: f64,
}

impl PanCache {
    fn new() -> Self {
        Self {
            pan: f64::NAN,
            left: 0.0,
            right: 0.0,
        }
    }

    #[inline]
    fn gains(&mut self, pan: f64) -> (f64, f64) {
        if pan != self.pan {
            (self.left, self.right) = pan_gains(pan);
            self.pan = pan;
        }
        (self.left, self.right)
    }
}

/// Per-track mixer state.
struct Lane {
    /// Patterns whose clips make this track sound in arrangement view.
    patterns: Vec<u32>,
    pan: PanCache,
    filter: CachedBiquad,
    pitch: PitchShifter,
    automated_volume: f64,
    automated_pan: Option<f64>,
}

impl Lane {
    fn new(sample_rate: f64) -> Self {
        Self {
            patterns: Vec::new(),
            pan: PanCache::new(),
            filter: CachedBiquad::new(),
            pitch: PitchShifter::new(sample_rate),
            automated_volume: 1.0,
            automated_pan: None,
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct ClipMeta {
    pattern: u32,
    timeline_track: usize,
    start: f64,
    end: f64,
}

/// Clips of one pattern that overlap one cache window.
#[derive(Default)]
struct ClipWindow {
    window: Option<i64>,
    clips: Vec<usize>,
}

/// Read-only state the mixer needs for one sample.
#[derive(Clone, Copy)]
pub struct MixContext<'a> {
    pub timeline: Option<&'a Timeline>,
    pub arrangement: bool,
    pub any_track_solo: bool,
    pub any_timeline_solo: bool,
}

pub struct AudioMixer {
    sample_rate: f64,
    refresh_beats: f64,
    lanes: Vec<Lane>,
    pattern_keys: HashMap<String, u32>,
    clips: Vec<ClipMeta>,
    clip_windows: Vec<ClipWindow>,
    window: Option<i64>,
}

impl AudioMixer {
    pub fn new(sample_rate: f64, refresh_beats: f64) -> Self {
        Self {
            sample_rate,
            refresh_beats,
            lanes: Vec::new(),
            pattern_keys: HashMap::new(),
            clips: Vec::new(),
            clip_windows: Vec::new(),
            window: None,
        }
    }

    /// Rebuild the track → pattern and clip tables. Lane DSP state survives.
    pub fn rebuild(&mut self, project: &Project, tracks: &TrackStateManager) {
        self.pattern_keys.clear();
        self.clips.clear();
        while self.lanes.len() < tracks.capacity() {
            self.lanes.push(Lane::new(self.sample_rate));
        }

        if let Some(timeline) = &project.timeline {
            for clip in &timeline.clips {
                let Some(track_index) = timeline.tracks.iter().position(|t| t.id == clip.track_id)
                else {
                    continue;
                };
                if timeline.tracks[track_index].kind != TimelineTrackKind::Pattern {
                    continue;
                }
                let Some(pattern) = timeline.clip_pattern(clip) else {
                    continue;
                };
                let pattern = intern(&mut self.pattern_keys, pattern);
                self.clips.push(ClipMeta {
                    pattern,
                    timeline_track: track_index,
                    start: clip.start_beat,
                    end: clip.end_beat(),
                });
            }
        }

        for handle in tracks.handles() {
            let Some(state) = tracks.get(handle) else {
                continue;
            };
            let mut patterns = Vec::new();
            if let Some(p) = project.pattern_of_track(&state.id) {
                patterns.push(intern(&mut self.pattern_keys, &p));
            }
            // Timeline tracks mapped straight to this audio track
            let mapped = project
                .timeline_track_to_audio_tracks
                .iter()
                .filter(|(_, audio)| audio.contains(&state.id))
                .filter_map(|(tl, _)| project.timeline.as_ref()?.track(tl)?.pattern_id.clone());
            for p in mapped {
                let key = intern(&mut self.pattern_keys, &p);
                if !patterns.contains(&key) {
                    patterns.push(key);
                }
            }
            self.lanes[handle.index()].patterns = patterns;
        }

        self.clip_windows
            .resize_with(self.pattern_keys.len(), ClipWindow::default);
        self.invalidate();
    }

    pub fn invalidate(&mut self) {
        self.window = None;
    }

    /// Clear filter and pitch history.
    pub fn reset(&mut self) {
        for lane in &mut self.lanes {
            lane.filter.reset();
            lane.pitch.reset();
        }
        self.invalidate();
    }

    /// Refresh per-window caches when `beat` enters a new window.
    pub fn update_caches(&mut self, beat: f64, tracks: &TrackStateManager, automation: &AutomationStore) {
        let window = (beat / self.refresh_beats).floor() as i64;
        if self.window == Some(window) {
            return;
        }
        self.window = Some(window);

        for cw in &mut self.clip_windows {
            if cw.window.is_some_and(|w| w < window - CACHE_TTL_WINDOWS) {
                cw.window = None;
                cw.clips.clear();
            }
        }

        let at = window as f64 * self.refresh_beats;
        let automated = automation.has_track_automation();
        for handle in tracks.handles() {
            let (Some(state), Some(lane)) = (tracks.get(handle), self.lanes.get_mut(handle.index()))
            else {
                continue;
            };
            if automated {
                lane.automated_volume = automation
                    .track_value(&state.id, "volume", at)
                    .map_or(1.0, |v| v.clamp(0.0, MAX_TRACK_VOLUME));
                lane.automated_pan = automation.track_value(&state.id, "pan", at);
            } else {
                lane.automated_volume = 1.0;
                lane.automated_pan = None;
            }
        }
    }

    /// Timeline gain for `handle`: `None` if it is silent in arrangement
    /// view, otherwise the loudest audible clip's timeline-track volume.
    fn timeline_gain(&mut self, handle: TrackHandle, beat: f64, ctx: &MixContext) -> Option<f64> {
        let lane = self.lanes.get(handle.index())?;
        if lane.patterns.is_empty() {
            return Some(1.0);
        }
        let timeline = ctx.timeline?;
        let window = self.window?;
        let from = window as f64 * self.refresh_beats;
        let to = from + self.refresh_beats;

        let mut best: Option<f64> = None;
        for &pattern in &lane.patterns {
            let Some(cw) = self.clip_windows.get_mut(pattern as usize) else {
                continue;
            };
            if cw.window != Some(window) {
                cw.window = Some(window);
                cw.clips.clear();
                for (i, c) in self.clips.iter().enumerate() {
                    if c.pattern == pattern && c.start < to && c.end > from {
                        cw.clips.push(i);
                    }
                }
            }
            for &i in &cw.clips {
                let c = &self.clips[i];
                if !(c.start <= beat && beat < c.end) {
                    continue;
                }
                let Some(t) = timeline.tracks.get(c.timeline_track) else {
                    continue;
                };
                if t.mute || (ctx.any_timeline_solo && !t.solo) {
                    continue;
                }
                let v = t.volume.clamp(0.0, MAX_TRACK_VOLUME);
                best = Some(best.map_or(v, |b: f64| b.max(v)));
            }
        }
        best
    }

    /// Mix one sample of one track. Returns the left and right contribution.
    #[allow(clippy::too_many_arguments)]
    pub fn mix_track(
        &mut self,
        ctx: &MixContext,
        handle: TrackHandle,
        state: &TrackState,
        input: f64,
        beat: f64,
        effects: &mut EffectsProcessor,
        envelopes: &EnvelopesProcessor,
    ) -> (f64, f64) {
        if state.mute || (ctx.any_track_solo && !state.solo) {
            return (0.0, 0.0);
        }
        let timeline_volume = if ctx.arrangement {
            match self.timeline_gain(handle, beat, ctx) {
                Some(v) => v,
                None => return (0.0, 0.0),
            }
        } else {
            1.0
        };
        let sample_rate = self.sample_rate;
        let Some(lane) = self.lanes.get_mut(handle.index()) else {
            return (0.0, 0.0);
        };

        let m = envelopes.modulation(handle, beat);
        let mut x = input * state.volume * timeline_volume;
        x *= m.volume.clamp(0.0, MAX_TRACK_VOLUME);
        if m.filter != 1.0 {
            let knob = (m.filter.clamp(0.0, 1.0) / FILTER_KNOB_STEP).round() * FILTER_KNOB_STEP;
            lane.filter.set_params(
                FilterType::Lowpass,
                knob_to_cutoff_hz(knob),
                FRAC_1_SQRT_2,
                sample_rate,
            );
            x = lane.filter.process(x);
        }
        if m.pitch != 1.0 {
            x = lane.pitch.process(x, m.pitch);
        }

        x = effects.process(handle, x, beat);

        // Automation is the only gain after the chain.
        let pan = (lane.automated_pan.unwrap_or(state.pan) + m.pan).clamp(-1.0, 1.0);
        let (left, right) = lane.pan.gains(pan);
        let x = flush_denormal(sanitize(x * lane.automated_volume));
        (x * left, x * right)
    }
}

fn intern(keys: &mut HashMap<String, u32>, pattern: &str) -> u32 {
    if let Some(&k) = keys.get(pattern) {
        return k;
    }
    let k = keys.len() as u32;
    keys.insert(pattern.to_string(), k);
    k
}
