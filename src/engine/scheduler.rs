//! Sample-indexed lookahead scheduling.
//!
//! Notes are kept sorted by beat. Each scheduling pass walks the notes that
//! fall inside the lookahead window and files them under the sample they
//! start on, so the render loop only does a hash lookup per sample. When the
//! window runs past the loop end, the start of the next loop is filed too,
//! offset by one loop length.
//!
//! Loop length in samples is computed once per tempo or length change and
//! the clock is reset to exactly 0 at the boundary, so loops never drift.

use std::collections::{HashMap, HashSet};

use super::playback::PlaybackController;
use super::track_state::TrackHandle;
use crate::project::normalize_beats;

/// Shortest interval between scheduling passes, in beats.
pub const MIN_SCHEDULE_INTERVAL: f64 = 0.1;
/// Longest interval between scheduling passes, in beats.
pub const MAX_SCHEDULE_INTERVAL: f64 = 0.2;
/// Note count at which the pass interval reaches its maximum.
const INTERVAL_SATURATION: f64 = 512.0;

/// A note ready to be scheduled.
#[derive(Debug, Clone, PartialEq)]
pub struct ScheduledNote {
    /// Beat within the loop.
    pub beat: f64,
    pub event_id: String,
    pub track: TrackHandle,
    pub velocity: f64,
    pub pitch: f64,
    pub duration_beats: Option<f64>,
}

pub struct EventScheduler {
    notes: Vec<ScheduledNote>,
    loop_length_beats: f64,
    samples_per_beat: f64,
    loop_length_samples: u64,
    lookahead_beats: f64,
    prune_lookback: u64,

    slots: HashMap<u64, Vec<u32>>,
    seen: HashSet<(u32, u64)>,
    spare: Vec<Vec<u32>>,

    /// Current-loop beats below this are already filed.
    scheduled_until: f64,
    /// Next-loop beats below this are already filed.
    next_loop_until: f64,
    last_pass_beat: Option<f64>,
    last_prune: u64,
}

impl EventScheduler {
    pub fn new(samples_per_beat: f64, lookahead_beats: f64, prune_lookback: u64) -> Self {
        let mut s = Self {
            notes: Vec::new(),
            loop_length_beats: normalize_beats(None),
            samples_per_beat,
            loop_length_samples: 1,
            lookahead_beats,
            prune_lookback: prune_lookback.max(1),
            slots: HashMap::new(),
            seen: HashSet::new(),
            spare: Vec::new(),
            scheduled_until: 0.0,
            next_loop_until: 0.0,
            last_pass_beat: None,
            last_prune: 0,
        };
        s.update_loop_length();
        s
    }

    /// Replace all notes. Notes with a non-finite or negative beat are
    /// dropped. Clears everything scheduled.
    pub fn set_events(&mut self, mut notes: Vec<ScheduledNote>, loop_length_beats: f64) {
        notes.retain(|n| n.beat.is_finite() && n.beat >= 0.0);
        notes.sort_by(|a, b| a.beat.total_cmp(&b.beat));
        self.notes = notes;
        self.loop_length_beats = normalize_beats(Some(loop_length_beats));
        self.update_loop_length();

        // At most every note twice (this loop and the next).
        let expected = self.notes.len() * 2;
        self.slots.reserve(expected);
        self.seen.reserve(expected);
        if self.spare.len() < expected {
            self.spare.reserve(expected - self.spare.len());
        }
        self.reset();
    }

    pub fn set_samples_per_beat(&mut self, samples_per_beat: f64) {
        self.samples_per_beat = samples_per_beat;
        self.update_loop_length();
        self.reset();
    }

    pub fn set_lookahead(&mut self, lookahead_beats: f64) {
        self.lookahead_beats = lookahead_beats;
    }

    fn update_loop_length(&mut self) {
        self.loop_length_samples = ((self.loop_length_beats * self.samples_per_beat).round() as u64).max(1);
    }

    pub fn loop_length_beats(&self) -> f64 {
        self.loop_length_beats
    }

    pub fn loop_length_samples(&self) -> u64 {
        self.loop_length_samples
    }

    pub fn note(&self, index: u32) -> Option<&ScheduledNote> {
        self.notes.get(index as usize)
    }

    pub fn note_count(&self) -> usize {
        self.notes.len()
    }

    /// Beats between scheduling passes, growing with the note count.
    pub fn schedule_interval(&self) -> f64 {
        let load = (self.notes.len() as f64 / INTERVAL_SATURATION).min(1.0);
        let interval = MIN_SCHEDULE_INTERVAL + (MAX_SCHEDULE_INTERVAL - MIN_SCHEDULE_INTERVAL) * load;
        interval.min(self.lookahead_beats * 0.5)
    }

    /// File every note inside the lookahead window. Skipped unless the beat
    /// has moved by at least [`Self::schedule_interval`] since the last pass,
    /// or `force` is set. Returns how many notes were filed.
    pub fn schedule_events(&mut self, current_time: u64, force: bool) -> usize {
        let beat = current_time as f64 / self.samples_per_beat;
        if !force
            && let Some(last) = self.last_pass_beat
            && beat >= last
            && beat - last < self.schedule_interval()
        {
            return 0;
        }
        self.last_pass_beat = Some(beat);
        self.maybe_prune(current_time);

        let loop_beats = self.loop_length_beats;
        let to = beat + self.lookahead_beats;
        let mut filed = 0;

        let from = self.scheduled_until.max(beat);
        let end = to.min(loop_beats);
        if end > from {
            let (lo, hi) = self.range(from, end);
            for i in lo..hi {
                let sample = self
                    .sample_of(self.notes[i].beat)
                    .min(self.loop_length_samples - 1)
                    .max(current_time);
                filed += self.file(i as u32, sample) as usize;
            }
            self.scheduled_until = end;
        }

        if to > loop_beats {
            let next_end = (to - loop_beats).min(loop_beats);
            if next_end > self.next_loop_until {
                let (lo, hi) = self.range(self.next_loop_until, next_end);
                for i in lo..hi {
                    let sample = self.sample_of(self.notes[i].beat) + self.loop_length_samples;
                    filed += self.file(i as u32, sample) as usize;
                }
                self.next_loop_until = next_end;
            }
        }
        filed
    }

    /// Indices of notes with `from <= beat < to`.
    fn range(&self, from: f64, to: f64) -> (usize, usize) {
        (
            self.notes.partition_point(|n| n.beat < from),
            self.notes.partition_point(|n| n.beat < to),
        )
    }

    #[inline]
    fn sample_of(&self, beat: f64) -> u64 {
        (beat * self.samples_per_beat).floor() as u64
    }

    fn file(&mut self, index: u32, sample: u64) -> bool {
        if !self.seen.insert((index, sample)) {
            return false;
        }
        let spare = &mut self.spare;
        self.slots
            .entry(sample)
            .or_insert_with(|| spare.pop().unwrap_or_default())
            .push(index);
        true
    }

    /// Notes filed at `sample`.
    pub fn events_at(&self, sample: u64) -> &[u32] {
        self.slots.get(&sample).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn remove_events_at(&mut self, sample: u64) {
        if let Some(mut v) = self.slots.remove(&sample) {
            v.clear();
            self.spare.push(v);
        }
    }

    /// Move the notes filed at `sample` into `out`. Returns whether any were.
    pub fn take_events_at(&mut self, sample: u64, out: &mut Vec<u32>) -> bool {
        match self.slots.remove(&sample) {
            Some(mut v) => {
                out.extend_from_slice(&v);
                v.clear();
                self.spare.push(v);
                true
            }
            None => false,
        }
    }

    /// Wrap the clock once it reaches the loop end, then reschedule from 0
    /// before returning. Returns whether a wrap happened.
    pub fn check_loop_reset(&mut self, playback: &mut PlaybackController) -> bool {
        if playback.current_time() < self.loop_length_samples {
            return false;
        }
        playback.wrap_loop();
        self.reset();
        self.schedule_events(0, true);
        true
    }

    fn maybe_prune(&mut self, current_time: u64) {
        if current_time >= self.last_prune && current_time - self.last_prune < self.prune_lookback {
            return;
        }
        self.last_prune = current_time;
        let cutoff = current_time.saturating_sub(self.prune_lookback);
        self.slots.retain(|&sample, _| sample >= cutoff);
        self.seen.retain(|&(_, sample)| sample >= cutoff);
    }

    /// Drop everything filed. Notes are kept.
    pub fn reset(&mut self) {
        for (_, mut v) in self.slots.drain() {
            v.clear();
            self.spare.push(v);
        }
        self.seen.clear();
        self.scheduled_until = 0.0;
        self.next_loop_until = 0.0;
        self.last_pass_beat = None;
        self.last_prune = 0;
    }

    /// Samples with something filed.
    #[cfg(test)]
    fn pending_slots(&self) -> usize {
        self.slots.len()
    }
}
