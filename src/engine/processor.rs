//! The audio-thread driver.
//!
//! Each buffer starts by applying every queued control message, then walks
//! the buffer sample by sample: wrap the loop, schedule, trigger notes, mix
//! every track, write the frame, and account for status events.

use std::sync::Arc;

use log::{debug, trace, warn};
use rtrb::Consumer;

use super::automation::AutomationStore;
use super::effects::{EffectsProcessor, OUTPUT_LIMIT};
use super::envelopes::EnvelopesProcessor;
use super::mixer::{AudioMixer, MixContext};
use super::playback::{PlaybackController, TransportChange};
use super::scheduler::{EventScheduler, ScheduledNote};
use super::synth_manager::SynthManager;
use super::track_state::{TrackHandle, TrackStateManager};
use crate::channel::StatusSender;
use crate::config::EngineConfig;
use crate::dsp::filter::sanitize;
use crate::dsp::sampler::SampleBuffer;
use crate::dsp::voice::VoiceFactory;
use crate::messages::ControlMessage;
use crate::project::{Project, Settings, TimelineTrack, Track, ViewMode};

/// Near-silence tracking for `quietPeriod` events.
#[derive(Debug, Default)]
struct QuietTracker {
    run: u64,
    start_beat: f64,
    reported: bool,
}

pub struct AudioProcessor {
    config: EngineConfig,
    control: Consumer<ControlMessage>,
    status: StatusSender,

    project: Project,
    tracks: TrackStateManager,
    automation: AutomationStore,
    playback: PlaybackController,
    scheduler: EventScheduler,
    synths: SynthManager,
    effects: EffectsProcessor,
    envelopes: EnvelopesProcessor,
    mixer: AudioMixer,

    fired: Vec<u32>,
    highlight_ids: Vec<String>,
    position_interval: u64,
    highlight_interval: u64,
    quiet_min_samples: u64,
    since_position: u64,
    since_highlight: u64,
    quiet: QuietTracker,
}

impl AudioProcessor {
    pub fn new(
        config: EngineConfig,
        control: Consumer<ControlMessage>,
        status: StatusSender,
        factory: Box<dyn VoiceFactory>,
    ) -> Self {
        let sr = config.sample_rate;
        let project = Project::default();
        let playback = PlaybackController::new(sr, project.bpm);
        let scheduler = EventScheduler::new(
            playback.samples_per_beat(),
            config.pattern_lookahead_beats,
            config.prune_lookback_samples,
        );
        Self {
            position_interval: config.position_interval_samples(),
            highlight_interval: config.highlight_interval_samples(),
            quiet_min_samples: (config.quiet_min_seconds * sr).max(1.0) as u64,
            control,
            status,
            tracks: TrackStateManager::new(),
            automation: AutomationStore::new(),
            playback,
            scheduler,
            synths: SynthManager::new(factory, sr),
            effects: EffectsProcessor::new(sr, config.cache_refresh_beats, config.effect_fade_progress),
            envelopes: EnvelopesProcessor::new(config.cache_refresh_beats),
            mixer: AudioMixer::new(sr, config.cache_refresh_beats),
            fired: Vec::with_capacity(64),
            highlight_ids: Vec::new(),
            since_position: 0,
            since_highlight: 0,
            quiet: QuietTracker::default(),
            project,
            config,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn project(&self) -> &Project {
        &self.project
    }

    pub fn playback(&self) -> &PlaybackController {
        &self.playback
    }

    pub fn tracks(&self) -> &TrackStateManager {
        &self.tracks
    }

    pub fn synths(&self) -> &SynthManager {
        &self.synths
    }

    pub fn dropped_status_events(&self) -> u64 {
        self.status.dropped_status_events()
    }

    /// Render one buffer into per-channel slices. Two or more channels get
    /// left and right (extra channels are zeroed); one channel gets the mono
    /// sum.
    pub fn process(&mut self, outputs: &mut [&mut [f32]]) {
        self.drain_controls();
        let frames = outputs.iter().map(|c| c.len()).min().unwrap_or(0);
        let (any_track_solo, any_timeline_solo) = self.solo_flags();

        for i in 0..frames {
            let (l, r) = self.render_frame(any_track_solo, any_timeline_solo);
            match &mut *outputs {
                [] => {}
                [mono] => mono[i] = ((l + r) * 0.5) as f32,
                [left, right, ..] => {
                    left[i] = l as f32;
                    right[i] = r as f32;
                }
            }
        }
        for extra in outputs.iter_mut().skip(2) {
            extra.fill(0.0);
        }
    }

    /// Render into an interleaved buffer with `channels` channels.
    pub fn process_interleaved(&mut self, buffer: &mut [f32], channels: usize) {
        self.drain_controls();
        if channels == 0 {
            return;
        }
        let (any_track_solo, any_timeline_solo) = self.solo_flags();
        for frame in buffer.chunks_exact_mut(channels) {
            let (l, r) = self.render_frame(any_track_solo, any_timeline_solo);
            match frame {
                [mono] => *mono = ((l + r) * 0.5) as f32,
                [left, right, rest @ ..] => {
                    *left = l as f32;
                    *right = r as f32;
                    rest.fill(0.0);
                }
                [] => {}
            }
        }
    }

    fn solo_flags(&self) -> (bool, bool) {
        (
            self.tracks.has_any_soloed_track(),
            self.project
                .timeline
                .as_ref()
                .is_some_and(|t| t.has_any_soloed_track()),
        )
    }

    fn render_frame(&mut self, any_track_solo: bool, any_timeline_solo: bool) -> (f64, f64) {
        let playing = self.playback.is_playing();
        if playing {
            self.scheduler.check_loop_reset(&mut self.playback);
            let now = self.playback.current_time();
            self.scheduler.schedule_events(now, false);
            self.fired.clear();
            if self.scheduler.take_events_at(now, &mut self.fired) {
                for &index in &self.fired {
                    let Some(note) = self.scheduler.note(index) else {
                        continue;
                    };
                    let duration = note
                        .duration_beats
                        .map(|beats| self.playback.beats_to_seconds(beats));
                    self.synths
                        .trigger_note(note.track, note.velocity, note.pitch, duration);
                    self.highlight_ids.push(note.event_id.clone());
                }
            }
        }

        let beat = self.playback.current_beat();
        let arrangement = self.project.view_mode == ViewMode::Arrangement;
        let timeline = self.project.timeline.as_ref();
        self.effects.update(beat, timeline, &self.automation);
        self.envelopes.update(beat, timeline, &self.automation);
        self.mixer.update_caches(beat, &self.tracks, &self.automation);

        let ctx = MixContext {
            timeline,
            arrangement,
            any_track_solo,
            any_timeline_solo,
        };
        let (mut left, mut right) = (0.0, 0.0);
        for handle in self.tracks.handles() {
            let input = self.synths.process(handle);
            let Some(state) = self.tracks.get(handle) else {
                continue;
            };
            let (l, r) = self.mixer.mix_track(
                &ctx,
                handle,
                state,
                input,
                beat,
                &mut self.effects,
                &self.envelopes,
            );
            left += l;
            right += r;
        }
        let left = sanitize(left).clamp(-OUTPUT_LIMIT, OUTPUT_LIMIT);
        let right = sanitize(right).clamp(-OUTPUT_LIMIT, OUTPUT_LIMIT);

        if playing {
            self.account_status(beat, left, right, arrangement);
            self.playback.advance();
        }
        (left, right)
    }

    fn account_status(&mut self, beat: f64, left: f64, right: f64, arrangement: bool) {
        self.since_position += 1;
        if self.since_position >= self.position_interval {
            self.since_position = 0;
            self.status.send_position(beat);
        }

        self.since_highlight += 1;
        if self.since_highlight >= self.highlight_interval {
            self.since_highlight = 0;
            if !self.highlight_ids.is_empty() || self.status.pending_highlights() > 0 {
                let ids = std::mem::take(&mut self.highlight_ids);
                self.status.send_highlights(beat, ids);
            }
        }

        if !arrangement {
            return;
        }
        let threshold = self.config.quiet_threshold;
        if left.abs() < threshold && right.abs() < threshold {
            if self.quiet.run == 0 {
                self.quiet.start_beat = beat;
            }
            self.quiet.run += 1;
            if !self.quiet.reported && self.quiet.run >= self.quiet_min_samples {
                self.quiet.reported = true;
                let seconds = self.quiet.run as f64 / self.config.sample_rate;
                self.status.send_quiet_period(self.quiet.start_beat, seconds);
            }
        } else {
            self.quiet = QuietTracker::default();
        }
    }

    /// Apply every queued control message.
    pub fn drain_controls(&mut self) {
        while let Ok(message) = self.control.pop() {
            self.apply_control(message);
        }
        while let Some(handle) = self.synths.pop_missing() {
            let kind = self.synths.instrument_type(handle).unwrap_or_default().to_string();
            let id = self.tracks.get(handle).map(|s| s.id.clone()).unwrap_or_default();
            warn!("no voice for instrument type '{kind}' on track '{id}'");
            self.status
                .send_debug(format!("no voice for instrument type '{kind}' on track '{id}'"));
        }
    }

    /// Apply one control message immediately.
    pub fn apply_control(&mut self, message: ControlMessage) {
        trace!("control message '{}'", message.kind());
        match message {
            ControlMessage::LoadProject(project) => self.load_project(*project),
            ControlMessage::SetTransport { state, position } => {
                match self.playback.set_transport(state, position) {
                    TransportChange::StartedFromZero => {
                        self.synths.stop_all_synths();
                        self.effects.reset();
                        self.restart_schedule();
                        debug!("transport: play from 0");
                    }
                    TransportChange::Started => {
                        self.effects.invalidate();
                        self.restart_schedule();
                        debug!("transport: play from beat {}", self.playback.current_beat());
                    }
                    TransportChange::Stopped => {
                        self.quiet = QuietTracker::default();
                        debug!("transport: stop");
                    }
                }
            }
            ControlMessage::SetTempo { bpm } => {
                if self.playback.set_tempo(bpm) {
                    self.project.bpm = self.playback.bpm();
                    self.scheduler
                        .set_samples_per_beat(self.playback.samples_per_beat());
                    self.scheduler
                        .schedule_events(self.playback.current_time(), true);
                    debug!("tempo: {} bpm", self.playback.bpm());
                } else {
                    self.reject("tempo", &bpm.to_string());
                }
            }
            ControlMessage::UpdatePatternTree {
                track_id,
                tree,
                base_meter,
            } => {
                if self.project.track(&track_id).is_none() {
                    self.unknown("track", &track_id);
                    return;
                }
                self.project.replace_pattern_tree(&track_id, tree, base_meter);
                self.rebuild_schedule();
            }
            ControlMessage::UpdateTrackSettings { track_id, settings } => {
                self.update_track_settings(&track_id, settings)
            }
            ControlMessage::UpdateTrackVolume { track_id, value } => {
                let Some(handle) = self.handle_or_warn(&track_id) else {
                    return;
                };
                if self.tracks.set_volume(handle, value) {
                    if let Some(t) = self.project.track_mut(&track_id) {
                        t.volume = value;
                    }
                } else {
                    self.reject("volume", &value.to_string());
                }
            }
            ControlMessage::UpdateTrackPan { track_id, value } => {
                let Some(handle) = self.handle_or_warn(&track_id) else {
                    return;
                };
                if self.tracks.set_pan(handle, value) {
                    if let Some(t) = self.project.track_mut(&track_id) {
                        t.pan = value;
                    }
                } else {
                    self.reject("pan", &value.to_string());
                }
            }
            ControlMessage::UpdateTrackMute { track_id, value } => {
                if let Some(handle) = self.handle_or_warn(&track_id) {
                    self.tracks.set_mute(handle, value);
                    if let Some(t) = self.project.track_mut(&track_id) {
                        t.mute = value;
                    }
                }
            }
            ControlMessage::UpdateTrackSolo { track_id, value } => {
                if let Some(handle) = self.handle_or_warn(&track_id) {
                    self.tracks.set_solo(handle, value);
                    if let Some(t) = self.project.track_mut(&track_id) {
                        t.solo = value;
                    }
                }
            }
            ControlMessage::UpdateTrack { track_id, track } => self.update_track(track_id, track),
            ControlMessage::RemoveTrack { track_id } => {
                let Some(handle) = self.tracks.remove(&track_id) else {
                    self.unknown("track", &track_id);
                    return;
                };
                self.synths.remove(handle);
                self.project.tracks.retain(|t| t.id != track_id);
                self.project.events.retain(|e| e.instrument_id != track_id);
                self.rebuild_routing();
                self.rebuild_schedule();
                debug!("removed track '{track_id}'");
            }
            ControlMessage::UpdateTimelineTrackVolume { track_id, value } => {
                if !value.is_finite() {
                    self.reject("timeline volume", &value.to_string());
                    return;
                }
                self.with_timeline_track(&track_id, |t| t.volume = value.max(0.0));
            }
            ControlMessage::UpdateTimelineTrackMute { track_id, value } => {
                self.with_timeline_track(&track_id, |t| t.mute = value);
            }
            ControlMessage::UpdateTimelineTrackSolo { track_id, value } => {
                self.with_timeline_track(&track_id, |t| t.solo = value);
            }
            ControlMessage::UpdateEffect {
                effect_id,
                settings,
            } => {
                let Some(def) = self.project.effects.iter_mut().find(|d| d.id == effect_id)
                else {
                    self.unknown("effect", &effect_id);
                    return;
                };
                def.settings.extend(settings);
                if let Err(e) = self.effects.update_definition(def) {
                    warn!("effect '{effect_id}' not updated: {e}");
                }
            }
            ControlMessage::UpdateEnvelope {
                envelope_id,
                settings,
            } => {
                let Some(def) = self
                    .project
                    .envelopes
                    .iter_mut()
                    .find(|d| d.id == envelope_id)
                else {
                    self.unknown("envelope", &envelope_id);
                    return;
                };
                def.settings.extend(settings);
                if let Err(e) = self.envelopes.update_definition(def) {
                    warn!("envelope '{envelope_id}' not updated: {e}");
                }
            }
            ControlMessage::LoadSample {
                track_id,
                samples,
                sample_rate,
            } => {
                let Some(handle) = self.handle_or_warn(&track_id) else {
                    return;
                };
                let buffer = Arc::new(SampleBuffer::new(samples, sample_rate));
                self.synths.set_sample_buffer(handle, buffer);
                debug!("sample loaded for track '{track_id}'");
            }
            ControlMessage::SetViewMode { view_mode } => {
                self.project.view_mode = view_mode;
                self.apply_lookahead();
                self.effects.invalidate();
                self.envelopes.invalidate();
                self.mixer.invalidate();
                self.rebuild_schedule();
                debug!("view mode: {view_mode:?}");
            }
            ControlMessage::SetAutomation { key, curve } => {
                if self.automation.set(&key, curve.as_ref()) {
                    self.effects.invalidate();
                    self.envelopes.invalidate();
                    self.mixer.invalidate();
                } else {
                    self.reject("automation key", &key);
                }
            }
        }
    }

    fn load_project(&mut self, mut project: Project) {
        project.fill_events_from_trees();
        self.project = project;

        self.tracks.clear();
        self.synths.clear();
        for track in &self.project.tracks {
            let handle = self.tracks.upsert(track);
            self.synths
                .register(handle, &track.instrument_type, track.declared_polyphony());
        }

        let (automation, rejected) = AutomationStore::from_map(&self.project.automation);
        self.automation = automation;
        for key in rejected {
            warn!("ignoring automation with invalid key '{key}'");
        }

        if !self.playback.set_tempo(self.project.bpm) {
            warn!("project tempo {} ignored", self.project.bpm);
        }
        self.scheduler
            .set_samples_per_beat(self.playback.samples_per_beat());
        self.apply_lookahead();

        self.effects.load(&self.project, &self.tracks);
        self.envelopes.load(&self.project, &self.tracks);
        self.mixer.rebuild(&self.project, &self.tracks);
        self.mixer.reset();
        self.rebuild_schedule();

        debug!(
            "project loaded: {} tracks, {} events, {:?} view, loop {} beats",
            self.project.tracks.len(),
            self.project.events.len(),
            self.project.view_mode,
            self.scheduler.loop_length_beats()
        );
    }

    fn update_track(&mut self, track_id: String, mut track: Track) {
        track.id = track_id;
        let handle = self.tracks.upsert(&track);
        self.synths
            .register(handle, &track.instrument_type, track.declared_polyphony());
        let tree = track.pattern_tree.clone();
        let base_meter = track.base_meter;
        let id = track.id.clone();
        match self.project.track_mut(&id) {
            Some(existing) => *existing = track,
            None => self.project.tracks.push(track),
        }
        if let Some(tree) = tree {
            self.project.replace_pattern_tree(&id, tree, base_meter);
        }
        self.rebuild_routing();
        self.rebuild_schedule();
    }

    fn update_track_settings(&mut self, track_id: &str, settings: Settings) {
        let Some(handle) = self.handle_or_warn(track_id) else {
            return;
        };
        let Some(track) = self.project.track_mut(track_id) else {
            return;
        };
        track.settings.extend(settings);
        let polyphony = track.declared_polyphony();
        let kind = track.instrument_type.clone();
        self.synths.register(handle, &kind, polyphony);
    }

    fn with_timeline_track(&mut self, track_id: &str, f: impl FnOnce(&mut TimelineTrack)) {
        let found = self
            .project
            .timeline
            .as_mut()
            .and_then(|t| t.track_mut(track_id));
        match found {
            Some(track) => {
                f(track);
                self.mixer.invalidate();
                self.effects.invalidate();
                self.envelopes.invalidate();
            }
            None => self.unknown("timeline track", track_id),
        }
    }

    fn apply_lookahead(&mut self) {
        let beats = match self.project.view_mode {
            ViewMode::Pattern => self.config.pattern_lookahead_beats,
            ViewMode::Arrangement => self.config.arrangement_lookahead_beats,
        };
        self.scheduler.set_lookahead(beats);
    }

    fn rebuild_routing(&mut self) {
        self.effects.reload(&self.project, &self.tracks);
        self.envelopes.load(&self.project, &self.tracks);
        self.mixer.rebuild(&self.project, &self.tracks);
    }

    /// Re-expand the project into notes and reschedule from the current time.
    fn rebuild_schedule(&mut self) {
        let loop_beats = self.project.loop_length_beats();
        let notes: Vec<ScheduledNote> = self
            .project
            .expand_events()
            .into_iter()
            .filter_map(|timed| {
                let track = self.tracks.handle(&timed.event.instrument_id)?;
                Some(ScheduledNote {
                    beat: timed.beat,
                    event_id: timed.event.id.clone(),
                    track,
                    velocity: timed.event.velocity,
                    pitch: timed.event.pitch,
                    duration_beats: timed.event.duration,
                })
            })
            .collect();
        self.scheduler.set_events(notes, loop_beats);
        if self.playback.is_playing() {
            self.scheduler
                .schedule_events(self.playback.current_time(), true);
        }
    }

    /// Clear scheduled state and caches, then schedule from the current time.
    fn restart_schedule(&mut self) {
        self.envelopes.invalidate();
        self.mixer.invalidate();
        self.scheduler.reset();
        self.scheduler
            .schedule_events(self.playback.current_time(), true);
        self.since_position = 0;
        self.since_highlight = 0;
        self.quiet = QuietTracker::default();
    }

    fn handle_or_warn(&mut self, track_id: &str) -> Option<TrackHandle> {
        let handle = self.tracks.handle(track_id);
        if handle.is_none() {
            self.unknown("track", track_id);
        }
        handle
    }

    fn unknown(&mut self, what: &str, id: &str) {
        warn!("unknown {what} '{id}'");
        self.status.send_debug(format!("unknown {what} '{id}'"));
    }

    fn reject(&mut self, what: &str, value: &str) {
        warn!("rejected {what}: {value}");
        self.status.send_debug(format!("rejected {what}: {value}"));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::{EngineHandle, queues};
    use crate::dsp::voice::BuiltinVoiceFactory;
    use crate::messages::{StatusEvent, TransportState};
    use crate::project::Event;

    fn engine(sample_rate: f64) -> (EngineHandle, AudioProcessor) {
        let config = EngineConfig::new(sample_rate, 64);
        let (handle, control, status) = queues(
            config.control_queue_capacity,
            config.status_queue_capacity,
            config.max_pending_highlights,
        );
        let processor = AudioProcessor::new(config, control, status, Box::new(BuiltinVoiceFactory));
        (handle, processor)
    }

    fn note(id: &str, time: f64, track: &str) -> Event {
        Event {
            id: id.into(),
            time,
            velocity: 1.0,
            pitch: 60.0,
            duration: None,
            instrument_id: track.into(),
        }
    }

    fn kick_project() -> Project {
        let mut project = Project::default();
        project.tracks.push(Track::new("kick", "kick"));
        project.events = vec![note("e0", 0.0, "kick"), note("e1", 1.0, "kick")];
        project
    }

    fn render(p: &mut AudioProcessor, frames: usize) -> (Vec<f32>, Vec<f32>) {
        let mut left = vec![0.0f32; frames];
        let mut right = vec![0.0f32; frames];
        p.process(&mut [left.as_mut_slice(), right.as_mut_slice()]);
        (left, right)
    }

    #[test]
    fn plays_and_reports_highlights() {
        let (mut h, mut p) = engine(8000.0);
        h.send(ControlMessage::LoadProject(Box::new(kick_project()))).unwrap();
        h.send(ControlMessage::SetTransport {
            state: TransportState::Play,
            position: 0.0,
        })
        .unwrap();

        let (left, right) = render(&mut p, 800);
        let peak = left.iter().fold(0.0f32, |m, s| m.max(s.abs()));
        assert!(peak > 0.05, "kick should sound, peak {peak}");
        assert_eq!(left, right, "centered track");

        let events = h.drain_status();
        let highlighted: Vec<&String> = events
            .iter()
            .filter_map(|e| match e {
                StatusEvent::PlaybackUpdate { event_ids, .. } => Some(event_ids),
                _ => None,
            })
            .flatten()
            .collect();
        assert_eq!(highlighted, vec!["e0"]);
        assert!(
            events
                .iter()
                .any(|e| matches!(e, StatusEvent::PlaybackPosition { .. }))
        );
    }

    #[test]
    fn stopped_transport_holds_position() {
        let (mut h, mut p) = engine(8000.0);
        h.send(ControlMessage::LoadProject(Box::new(kick_project()))).unwrap();
        h.send(ControlMessage::SetTransport {
            state: TransportState::Play,
            position: 0.0,
        })
        .unwrap();
        render(&mut p, 1000);
        h.send(ControlMessage::SetTransport {
            state: TransportState::Stop,
            position: 0.0,
        })
        .unwrap();
        render(&mut p, 10);
        let beat = p.playback().current_beat();
        let (left, _) = render(&mut p, 200);
        assert_eq!(p.playback().current_beat(), beat);
        // the kick keeps ringing out after stop
        assert!(left.iter().any(|s| *s != 0.0));
    }

    #[test]
    fn mono_output_is_the_channel_average() {
        let (mut h, mut p) = engine(8000.0);
        let mut project = kick_project();
        project.tracks[0].pan = 0.5;
        h.send(ControlMessage::LoadProject(Box::new(project.clone()))).unwrap();
        h.send(ControlMessage::SetTransport {
            state: TransportState::Play,
            position: 0.0,
        })
        .unwrap();
        let (left, right) = render(&mut p, 300);

        let (mut h2, mut p2) = engine(8000.0);
        h2.send(ControlMessage::LoadProject(Box::new(project))).unwrap();
        h2.send(ControlMessage::SetTransport {
            state: TransportState::Play,
            position: 0.0,
        })
        .unwrap();
        let mut mono = vec![0.0f32; 300];
        p2.process(&mut [mono.as_mut_slice()]);

        for i in 0..300 {
            let expected = ((left[i] as f64 + right[i] as f64) * 0.5) as f32;
            assert!((mono[i] - expected).abs() < 1e-6, "frame {i}");
        }
    }

    #[test]
    fn interleaved_matches_planar() {
        let (mut h, mut p) = engine(8000.0);
        h.send(ControlMessage::LoadProject(Box::new(kick_project()))).unwrap();
        h.send(ControlMessage::SetTransport {
            state: TransportState::Play,
            position: 0.0,
        })
        .unwrap();
        let (left, _) = render(&mut p, 128);

        let (mut h2, mut p2) = engine(8000.0);
        h2.send(ControlMessage::LoadProject(Box::new(kick_project()))).unwrap();
        h2.send(ControlMessage::SetTransport {
            state: TransportState::Play,
            position: 0.0,
        })
        .unwrap();
        let mut buffer = vec![1.0f32; 128 * 3];
        p2.process_interleaved(&mut buffer, 3);
        for (i, frame) in buffer.chunks_exact(3).enumerate() {
            assert_eq!(frame[0], left[i]);
            assert_eq!(frame[2], 0.0);
        }
    }

    #[test]
    fn unknown_ids_are_reported_not_applied() {
        let (mut h, mut p) = engine(8000.0);
        p.apply_control(ControlMessage::UpdateTrackVolume {
            track_id: "ghost".into(),
            value: 0.5,
        });
        p.apply_control(ControlMessage::UpdateEffect {
            effect_id: "nope".into(),
            settings: Settings::new(),
        });
        let messages: Vec<String> = h
            .drain_status()
            .into_iter()
            .filter_map(|e| match e {
                StatusEvent::Debug { message } => Some(message),
                _ => None,
            })
            .collect();
        assert_eq!(messages, vec!["unknown track 'ghost'", "unknown effect 'nope'"]);
    }

    #[test]
    fn invalid_tempo_is_rejected() {
        let (mut h, mut p) = engine(8000.0);
        p.apply_control(ControlMessage::SetTempo { bpm: f64::NAN });
        assert_eq!(p.playback().bpm(), 120.0);
        assert!(matches!(h.poll_status(), Some(StatusEvent::Debug { .. })));

        p.apply_control(ControlMessage::SetTempo { bpm: 90.0 });
        assert_eq!(p.playback().bpm(), 90.0);
        assert_eq!(p.project().bpm, 90.0);
    }

    #[test]
    fn missing_instrument_is_reported_on_next_buffer() {
        let (mut h, mut p) = engine(8000.0);
        let mut project = Project::default();
        project.tracks.push(Track::new("odd", "theremin"));
        project.events = vec![note("n", 0.0, "odd")];
        h.send(ControlMessage::LoadProject(Box::new(project))).unwrap();
        h.send(ControlMessage::SetTransport {
            state: TransportState::Play,
            position: 0.0,
        })
        .unwrap();
        let (left, _) = render(&mut p, 64);
        assert!(left.iter().all(|s| *s == 0.0));
        render(&mut p, 64);
        let reported = h.drain_status().into_iter().any(|e| {
            matches!(e, StatusEvent::Debug { message } if message.contains("theremin"))
        });
        assert!(reported);
    }

    #[test]
    fn each_missing_instrument_is_reported_once() {
        let (mut h, mut p) = engine(8000.0);
        let mut project = Project::default();
        project.tracks.push(Track::new("odd", "theremin"));
        project.tracks.push(Track::new("odder", "ondes"));
        project.events = vec![note("n", 0.0, "odd"), note("m", 0.0, "odder"), note("o", 1.0, "odd")];
        h.send(ControlMessage::LoadProject(Box::new(project))).unwrap();
        h.send(ControlMessage::SetTransport {
            state: TransportState::Play,
            position: 0.0,
        })
        .unwrap();
        // one beat at 120 BPM is 4000 frames; render past the second note
        for _ in 0..100 {
            render(&mut p, 64);
        }
        let mut reported: Vec<String> = h
            .drain_status()
            .into_iter()
            .filter_map(|e| match e {
                StatusEvent::Debug { message } if message.starts_with("no voice") => Some(message),
                _ => None,
            })
            .collect();
        reported.sort();
        assert_eq!(
            reported,
            vec![
                "no voice for instrument type 'ondes' on track 'odder'",
                "no voice for instrument type 'theremin' on track 'odd'",
            ]
        );
    }

    #[test]
    fn track_controls_update_state_and_project() {
        let (_h, mut p) = engine(8000.0);
        p.apply_control(ControlMessage::LoadProject(Box::new(kick_project())));
        p.apply_control(ControlMessage::UpdateTrackVolume {
            track_id: "kick".into(),
            value: 0.25,
        });
        p.apply_control(ControlMessage::UpdateTrackMute {
            track_id: "kick".into(),
            value: true,
        });
        let handle = p.tracks().handle("kick").unwrap();
        let state = p.tracks().get(handle).unwrap();
        assert_eq!((state.volume, state.mute), (0.25, true));
        assert_eq!(p.project().track("kick").unwrap().volume, 0.25);

        p.apply_control(ControlMessage::UpdateTrack {
            track_id: "hat".into(),
            track: Track::new("ignored", "tone"),
        });
        assert!(p.project().track("hat").is_some());
        assert_eq!(p.tracks().len(), 2);

        p.apply_control(ControlMessage::RemoveTrack {
            track_id: "kick".into(),
        });
        assert!(p.tracks().handle("kick").is_none());
        assert!(p.project().events.iter().all(|e| e.instrument_id != "kick"));
    }
}
