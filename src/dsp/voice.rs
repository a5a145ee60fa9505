//! Voice contract, voice pools, and the built-in reference voices.
//!
//! The engine never synthesizes sound itself: it only calls the `Voice`
//! contract on whatever an injected `VoiceFactory` hands it.

use std::sync::Arc;

use super::adsr::{Adsr, AdsrParams};
use super::oscillator::{Oscillator, Waveform, midi_to_frequency};
use super::sampler::{SampleBuffer, SampleVoice};

/// A sound source that plays one note at a time.
pub trait Voice: Send {
    /// Start a note. `pitch` is a MIDI note number; `duration_seconds`, when
    /// present, is how long the note is held before release.
    fn trigger(&mut self, velocity: f64, pitch: f64, duration_seconds: Option<f64>);

    /// Next output sample.
    fn process(&mut self) -> f64;

    fn is_active(&self) -> bool;

    /// Stop immediately, without a release tail.
    fn deactivate(&mut self);

    /// Hand the voice a sample to play. Voices that do not play samples
    /// ignore it.
    fn set_sample_buffer(&mut self, _buffer: Arc<SampleBuffer>) {}
}

/// Creates voices by instrument type.
pub trait VoiceFactory: Send {
    /// A new voice for `instrument_type`, or `None` if the type is unknown.
    fn create(&self, instrument_type: &str, sample_rate: f64) -> Option<Box<dyn Voice>>;

    /// How many voices an instrument of this type may sound at once.
    fn polyphony(&self, _instrument_type: &str) -> usize {
        1
    }
}

/// Accept velocities either as 0–1 or as MIDI 0–127.
#[inline]
pub fn normalize_velocity(velocity: f64) -> f64 {
    if !velocity.is_finite() {
        return 0.0;
    }
    let v = if velocity > 1.0 { velocity / 127.0 } else { velocity };
    v.clamp(0.0, 1.0)
}

struct PoolSlot {
    voice: Box<dyn Voice>,
    started: u64,
}

/// A fixed set of voices for a polyphonic instrument.
///
/// A trigger takes a free voice if there is one, otherwise steals the one
/// that was started longest ago. Nothing is allocated after construction.
pub struct VoicePool {
    slots: Vec<PoolSlot>,
    counter: u64,
}

impl VoicePool {
    /// Build a pool of `size` voices from `make`. Returns `None` if the
    /// factory cannot make any voice.
    pub fn new(size: usize, mut make: impl FnMut() -> Option<Box<dyn Voice>>) -> Option<Self> {
        let mut slots = Vec::with_capacity(size.max(1));
        for _ in 0..size.max(1) {
            slots.push(PoolSlot {
                voice: make()?,
                started: 0,
            });
        }
        Some(Self { slots, counter: 0 })
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Number of voices currently sounding.
    pub fn active_count(&self) -> usize {
        self.slots.iter().filter(|s| s.voice.is_active()).count()
    }

    fn allocate(&mut self) -> usize {
        if let Some(idx) = self.slots.iter().position(|s| !s.voice.is_active()) {
            return idx;
        }
        self.slots
            .iter()
            .enumerate()
            .min_by_key(|(_, s)| s.started)
            .map(|(idx, _)| idx)
            .unwrap_or(0)
    }

    pub fn trigger(&mut self, velocity: f64, pitch: f64, duration_seconds: Option<f64>) {
        if self.slots.is_empty() {
            return;
        }
        let idx = self.allocate();
        self.counter += 1;
        let slot = &mut self.slots[idx];
        slot.started = self.counter;
        slot.voice.deactivate();
        slot.voice.trigger(velocity, pitch, duration_seconds);
    }

    /// Sum of all active voices.
    pub fn process(&mut self) -> f64 {
        let mut sum = 0.0;
        for slot in &mut self.slots {
            if slot.voice.is_active() {
                sum += slot.voice.process();
            }
        }
        sum
    }

    pub fn is_active(&self) -> bool {
        self.slots.iter().any(|s| s.voice.is_active())
    }

    pub fn deactivate(&mut self) {
        for slot in &mut self.slots {
            slot.voice.deactivate();
        }
    }

    pub fn set_sample_buffer(&mut self, buffer: Arc<SampleBuffer>) {
        for slot in &mut self.slots {
            slot.voice.set_sample_buffer(buffer.clone());
        }
    }
}

/// Oscillator + ADSR voice, with an optional downward pitch sweep.
#[derive(Debug, Clone)]
pub struct ToneVoice {
    oscillator: Oscillator,
    envelope: Adsr,
    velocity: f64,
    /// Plays this frequency regardless of the note's pitch.
    fixed_frequency: Option<f64>,
    base_frequency: f64,
    /// Starting multiple of the base frequency; decays toward 1.
    sweep_ratio: f64,
    sweep_coef: f64,
    current_ratio: f64,
    gate_samples: Option<u64>,
    sample_rate: f64,
}

impl ToneVoice {
    pub fn new(sample_rate: f64, waveform: Waveform, params: AdsrParams) -> Self {
        Self {
            oscillator: Oscillator::new(waveform, sample_rate),
            envelope: Adsr::new(sample_rate, params),
            velocity: 1.0,
            fixed_frequency: None,
            base_frequency: 440.0,
            sweep_ratio: 1.0,
            sweep_coef: 0.0,
            current_ratio: 1.0,
            gate_samples: None,
            sample_rate,
        }
    }

    /// Sine kick: 55 Hz body with a fast sweep down from three times that.
    pub fn kick(sample_rate: f64) -> Self {
        let mut v = Self::new(sample_rate, Waveform::Sine, AdsrParams::percussive(0.35));
        v.fixed_frequency = Some(55.0);
        v.sweep_ratio = 3.0;
        v.sweep_coef = (-1.0 / (0.03 * sample_rate)).exp();
        v
    }
}

impl Voice for ToneVoice {
    fn trigger(&mut self, velocity: f64, pitch: f64, duration_seconds: Option<f64>) {
        let pitch = if pitch.is_finite() { pitch } else { 60.0 };
        self.base_frequency = self
            .fixed_frequency
            .unwrap_or_else(|| midi_to_frequency(pitch));
        self.current_ratio = self.sweep_ratio;
        self.velocity = normalize_velocity(velocity);
        self.gate_samples = duration_seconds
            .filter(|d| d.is_finite() && *d > 0.0)
            .map(|d| (d * self.sample_rate) as u64);
        self.oscillator.reset();
        self.envelope.trigger();
    }

    fn process(&mut self) -> f64 {
        if !self.envelope.is_active() {
            return 0.0;
        }
        if let Some(left) = self.gate_samples.as_mut() {
            if *left == 0 {
                self.envelope.release();
                self.gate_samples = None;
            } else {
                *left -= 1;
            }
        }

        self.oscillator.frequency = self.base_frequency * self.current_ratio;
        self.current_ratio = 1.0 + (self.current_ratio - 1.0) * self.sweep_coef;

        let osc = self.oscillator.next_sample();
        let env = self.envelope.next_sample();
        osc * env * self.velocity
    }

    fn is_active(&self) -> bool {
        self.envelope.is_active()
    }

    fn deactivate(&mut self) {
        self.envelope.kill();
        self.gate_samples = None;
    }
}

/// Factory for the built-in instrument types.
///
/// | type | voice |
/// |---|---|
/// | `kick` | swept sine |
/// | `sine`, `square`, `saw`, `sawtooth`, `triangle`, `tone` | oscillator + ADSR |
/// | `sampler` | one-shot sample playback |
/// | `poly`, `pad` | 8-voice pool of triangle tones |
#[derive(Debug, Clone, Copy, Default)]
pub struct BuiltinVoiceFactory;

/// Pool size for polyphonic built-in types.
pub const BUILTIN_POLYPHONY: usize = 8;

impl VoiceFactory for BuiltinVoiceFactory {
    fn create(&self, instrument_type: &str, sample_rate: f64) -> Option<Box<dyn Voice>> {
        let voice: Box<dyn Voice> = match instrument_type {
            "kick" => Box::new(ToneVoice::kick(sample_rate)),
            "tone" => Box::new(ToneVoice::new(
                sample_rate,
                Waveform::Triangle,
                AdsrParams::default(),
            )),
            "poly" | "pad" => Box::new(ToneVoice::new(
                sample_rate,
                Waveform::Triangle,
                AdsrParams {
                    attack: 0.05,
                    decay: 0.2,
                    sustain: 0.6,
                    release: 0.4,
                },
            )),
            "sampler" => Box::new(SampleVoice::new(sample_rate)),
            other => {
                let waveform = Waveform::parse(other)?;
                Box::new(ToneVoice::new(sample_rate, waveform, AdsrParams::default()))
            }
        };
        Some(voice)
    }

    fn polyphony(&self, instrument_type: &str) -> usize {
        match instrument_type {
            "poly" | "pad" => BUILTIN_POLYPHONY,
            _ => 1,
        }
    }
}
