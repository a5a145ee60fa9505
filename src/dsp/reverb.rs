//! Reverb effect: Schroeder-style algorithmic reverb.
//!
//! Four parallel comb filters feed two series allpass filters. Room size maps
//! to a decay time, and each comb's feedback is derived from its own length so
//! all combs reach -60 dB at the same moment.

use super::filter::flush_denormal;

/// A comb filter delay line with damped feedback.
#[derive(Debug, Clone)]
struct CombFilter {
    buffer: Vec<f64>,
    index: usize,
    feedback: f64,
    damp1: f64,
    damp2: f64,
    filterstore: f64,
}

impl CombFilter {
    fn new(size: usize) -> Self {
        Self {
            buffer: vec![0.0; size.max(1)],
            index: 0,
            feedback: 0.0,
            damp1: 0.0,
            damp2: 1.0,
            filterstore: 0.0,
        }
    }

    fn len(&self) -> usize {
        self.buffer.len()
    }

    #[inline]
    fn process(&mut self, input: f64) -> f64 {
        let output = self.buffer[self.index];

        // One-pole lowpass in the feedback path
        self.filterstore = flush_denormal(output * self.damp2 + self.filterstore * self.damp1);

        self.buffer[self.index] = flush_denormal(input + self.filterstore * self.feedback);
        self.index = (self.index + 1) % self.buffer.len();

        output
    }

    fn set_damp(&mut self, damp: f64) {
        self.damp1 = damp;
        self.damp2 = 1.0 - damp;
    }

    fn clear(&mut self) {
        self.buffer.fill(0.0);
        self.filterstore = 0.0;
    }
}

/// An allpass filter delay line.
#[derive(Debug, Clone)]
struct AllpassFilter {
    buffer: Vec<f64>,
    index: usize,
    feedback: f64,
}

impl AllpassFilter {
    fn new(size: usize) -> Self {
        Self {
            buffer: vec![0.0; size.max(1)],
            index: 0,
            feedback: 0.5,
        }
    }

    #[inline]
    fn process(&mut self, input: f64) -> f64 {
        let bufout = self.buffer[self.index];
        let output = bufout - input;

        self.buffer[self.index] = flush_denormal(input + bufout * self.feedback);
        self.index = (self.index + 1) % self.buffer.len();

        output
    }

    fn clear(&mut self) {
        self.buffer.fill(0.0);
    }
}

// Tuning constants (scaled for 44100 Hz sample rate)
const COMB_TUNING: [usize; 4] = [1557, 1617, 1491, 1422];
const ALLPASS_TUNING: [usize; 2] = [225, 556];

/// Shortest and longest decay time in seconds.
pub const MIN_DECAY_SECONDS: f64 = 0.02;
pub const MAX_DECAY_SECONDS: f64 = 3.0;

/// Decay time for a 0–1 room size.
#[inline]
pub fn room_size_to_decay(room_size: f64) -> f64 {
    MIN_DECAY_SECONDS + room_size.clamp(0.0, 1.0) * (MAX_DECAY_SECONDS - MIN_DECAY_SECONDS)
}

/// Comb feedback that gives -60 dB after `decay_seconds`.
#[inline]
pub fn comb_feedback(delay_samples: usize, sample_rate: f64, decay_seconds: f64) -> f64 {
    0.001_f64.powf(delay_samples as f64 / (sample_rate * decay_seconds))
}

/// A mono Schroeder reverb.
#[derive(Debug, Clone)]
pub struct Reverb {
    combs: Vec<CombFilter>,
    allpasses: Vec<AllpassFilter>,
    sample_rate: f64,

    /// Room size (0.0 to 1.0). Maps to 0.02–3.0 s of decay.
    pub room_size: f64,
    /// Damping (0.0 to 1.0). Higher = darker tail.
    pub damping: f64,
    /// Wet gain.
    pub wet: f64,
    /// Dry gain.
    pub dry: f64,

    applied: Option<(f64, f64)>,
}

impl Reverb {
    /// Create a new reverb effect.
    pub fn new(sample_rate: f64) -> Self {
        let scale = sample_rate / 44100.0;
        let combs = COMB_TUNING
            .iter()
            .map(|&t| CombFilter::new(((t as f64) * scale) as usize))
            .collect();
        let allpasses = ALLPASS_TUNING
            .iter()
            .map(|&t| AllpassFilter::new(((t as f64) * scale) as usize))
            .collect();

        let mut reverb = Self {
            combs,
            allpasses,
            sample_rate,
            room_size: 0.5,
            damping: 0.5,
            wet: 0.3,
            dry: 1.0,
            applied: None,
        };
        reverb.update_parameters();
        reverb
    }

    /// Create a reverb with specific parameters.
    pub fn with_params(sample_rate: f64, room_size: f64, damping: f64, wet: f64, dry: f64) -> Self {
        let mut r = Self::new(sample_rate);
        r.set_params(room_size, damping, wet, dry);
        r
    }

    /// Set all parameters. Comb feedback is only recomputed when room size or
    /// damping actually change.
    pub fn set_params(&mut self, room_size: f64, damping: f64, wet: f64, dry: f64) {
        self.room_size = room_size.clamp(0.0, 1.0);
        self.damping = damping.clamp(0.0, 1.0);
        self.wet = wet.clamp(0.0, 1.0);
        self.dry = dry.clamp(0.0, 1.0);
        self.update_parameters();
    }

    /// Update comb feedback and damping after changing room size or damping.
    pub fn update_parameters(&mut self) {
        let key = (self.room_size, self.damping);
        if self.applied == Some(key) {
            return;
        }
        let decay = room_size_to_decay(self.room_size);
        for comb in &mut self.combs {
            comb.feedback = comb_feedback(comb.len(), self.sample_rate, decay);
            comb.set_damp(self.damping);
        }
        self.applied = Some(key);
    }

    /// Process one sample.
    #[inline]
    pub fn process(&mut self, input: f64) -> f64 {
        let mut out = 0.0;
        for comb in &mut self.combs {
            out += comb.process(input);
        }
        out *= 0.25;
        for allpass in &mut self.allpasses {
            out = allpass.process(out);
        }
        self.dry * input + self.wet * out
    }

    /// Process a block in-place.
    pub fn process_block(&mut self, buffer: &mut [f64]) {
        for s in buffer.iter_mut() {
            *s = self.process(*s);
        }
    }

    /// Clear all internal buffers.
    pub fn clear(&mut self) {
        for comb in &mut self.combs {
            comb.clear();
        }
        for allpass in &mut self.allpasses {
            allpass.clear();
        }
    }
}
