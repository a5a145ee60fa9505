//! One voice (or voice pool) per instrument track, created on first use.

use std::sync::Arc;

use super::track_state::TrackHandle;
use crate::dsp::sampler::SampleBuffer;
use crate::dsp::voice::{Voice, VoiceFactory, VoicePool};

/// What a track plays through.
pub enum SynthSlot {
    /// Not triggered yet.
    Empty,
    Mono(Box<dyn Voice>),
    Pool(VoicePool),
    /// The factory has no voice for this instrument type.
    Missing,
}

impl SynthSlot {
    pub fn is_active(&self) -> bool {
        match self {
            SynthSlot::Mono(v) => v.is_active(),
            SynthSlot::Pool(p) => p.is_active(),
            SynthSlot::Empty | SynthSlot::Missing => false,
        }
    }
}

struct TrackSynth {
    instrument_type: String,
    polyphony: usize,
    slot: SynthSlot,
    sample: Option<Arc<SampleBuffer>>,
}

/// Owns every track's voices, indexed by [`TrackHandle`].
pub struct SynthManager {
    factory: Box<dyn VoiceFactory>,
    sample_rate: f64,
    tracks: Vec<Option<TrackSynth>>,
    newly_missing: Vec<TrackHandle>,
}

impl SynthManager {
    pub fn new(factory: Box<dyn VoiceFactory>, sample_rate: f64) -> Self {
        Self {
            factory,
            sample_rate,
            tracks: Vec::new(),
            newly_missing: Vec::with_capacity(16),
        }
    }

    /// Declare what `handle` plays. Existing voices are dropped if the
    /// instrument type or polyphony changed.
    pub fn register(&mut self, handle: TrackHandle, instrument_type: &str, polyphony: Option<usize>) {
        let polyphony = polyphony
            .unwrap_or_else(|| self.factory.polyphony(instrument_type))
            .max(1);
        if self.tracks.len() <= handle.index() {
            self.tracks.resize_with(handle.index() + 1, || None);
        }
        let entry = &mut self.tracks[handle.index()];
        if let Some(existing) = entry
            && existing.instrument_type == instrument_type
            && existing.polyphony == polyphony
        {
            return;
        }
        let sample = entry.as_mut().and_then(|e| e.sample.take());
        *entry = Some(TrackSynth {
            instrument_type: instrument_type.to_string(),
            polyphony,
            slot: SynthSlot::Empty,
            sample,
        });
    }

    /// Start a note on `handle`, creating its voice on first use.
    pub fn trigger_note(
        &mut self,
        handle: TrackHandle,
        velocity: f64,
        pitch: f64,
        duration_seconds: Option<f64>,
    ) {
        let Some(Some(track)) = self.tracks.get_mut(handle.index()) else {
            return;
        };
        if let SynthSlot::Empty = track.slot {
            track.slot = create_slot(&*self.factory, self.sample_rate, track);
            if let SynthSlot::Missing = track.slot {
                // Bounded so reporting never grows the vector on the audio thread.
                if self.newly_missing.len() < self.newly_missing.capacity() {
                    self.newly_missing.push(handle);
                }
            }
        }
        match &mut track.slot {
            SynthSlot::Mono(voice) => voice.trigger(velocity, pitch, duration_seconds),
            SynthSlot::Pool(pool) => pool.trigger(velocity, pitch, duration_seconds),
            SynthSlot::Empty | SynthSlot::Missing => {}
        }
    }

    /// Next sample of `handle`'s voices, 0 if it has none.
    #[inline]
    pub fn process(&mut self, handle: TrackHandle) -> f64 {
        match self.tracks.get_mut(handle.index()) {
            Some(Some(track)) => match &mut track.slot {
                SynthSlot::Mono(voice) if voice.is_active() => voice.process(),
                SynthSlot::Pool(pool) => pool.process(),
                _ => 0.0,
            },
            _ => 0.0,
        }
    }

    /// Every track with a voice slot.
    pub fn get_all_synths(&self) -> impl Iterator<Item = (TrackHandle, &SynthSlot)> {
        self.tracks
            .iter()
            .enumerate()
            .filter_map(|(i, t)| t.as_ref().map(|t| (TrackHandle(i as u32), &t.slot)))
    }

    /// Cut every non-pooled voice. Pools keep ringing.
    pub fn stop_all_synths(&mut self) {
        for track in self.tracks.iter_mut().flatten() {
            if let SynthSlot::Mono(voice) = &mut track.slot {
                voice.deactivate();
            }
        }
    }

    /// Give `handle` a sample to play, now and for voices created later.
    pub fn set_sample_buffer(&mut self, handle: TrackHandle, buffer: Arc<SampleBuffer>) -> bool {
        let Some(Some(track)) = self.tracks.get_mut(handle.index()) else {
            return false;
        };
        match &mut track.slot {
            SynthSlot::Mono(voice) => voice.set_sample_buffer(buffer.clone()),
            SynthSlot::Pool(pool) => pool.set_sample_buffer(buffer.clone()),
            SynthSlot::Empty | SynthSlot::Missing => {}
        }
        track.sample = Some(buffer);
        true
    }

    pub fn remove(&mut self, handle: TrackHandle) {
        if let Some(entry) = self.tracks.get_mut(handle.index()) {
            *entry = None;
        }
    }

    pub fn clear(&mut self) {
        self.tracks.clear();
        self.newly_missing.clear();
    }

    /// Instrument type of `handle`, if registered.
    pub fn instrument_type(&self, handle: TrackHandle) -> Option<&str> {
        self.tracks
            .get(handle.index())
            .and_then(Option::as_ref)
            .map(|t| t.instrument_type.as_str())
    }

    /// Next track whose instrument type turned out to have no voice.
    pub fn pop_missing(&mut self) -> Option<TrackHandle> {
        self.newly_missing.pop()
    }
}

fn create_slot(factory: &dyn VoiceFactory, sample_rate: f64, track: &TrackSynth) -> SynthSlot {
    let make = || {
        let mut voice = factory.create(&track.instrument_type, sample_rate)?;
        if let Some(sample) = &track.sample {
            voice.set_sample_buffer(sample.clone());
        }
        Some(voice)
    };
    let slot = if track.polyphony > 1 {
        VoicePool::new(track.polyphony, make).map(SynthSlot::Pool)
    } else {
        make().map(SynthSlot::Mono)
    };
    slot.unwrap_or(SynthSlot::Missing)
}
