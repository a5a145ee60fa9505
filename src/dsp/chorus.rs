//! Chorus effect: LFO-modulated delay for thickening sound.

use std::f64::consts::PI;

use super::filter::flush_denormal;

/// Largest modulation swing in seconds, reached at depth 1.0.
const MAX_SWING_SECONDS: f64 = 0.005;

/// A mono chorus with configurable rate, depth, and wet/dry gains.
#[derive(Debug, Clone)]
pub struct Chorus {
    buffer: Vec<f64>,
    write_pos: usize,
    sample_rate: f64,
    phase: f64,

    /// LFO rate in Hz (0.1–10).
    pub rate: f64,
    /// Modulation depth (0.0–1.0), scales the delay swing.
    pub depth: f64,
    /// Base delay time in seconds.
    pub delay: f64,
    pub wet: f64,
    pub dry: f64,
}

impl Chorus {
    pub fn new(sample_rate: f64) -> Self {
        // Buffer size: max delay + max swing + margin
        let max_delay = 0.05;
        let buffer_size = (sample_rate * max_delay) as usize + 2;

        Self {
            buffer: vec![0.0; buffer_size],
            write_pos: 0,
            sample_rate,
            phase: 0.0,
            rate: 1.5,
            depth: 0.5,
            delay: 0.015,
            wet: 0.5,
            dry: 1.0,
        }
    }

    pub fn with_params(sample_rate: f64, rate: f64, depth: f64, wet: f64, dry: f64) -> Self {
        let mut c = Self::new(sample_rate);
        c.set_params(rate, depth, wet, dry);
        c
    }

    pub fn set_params(&mut self, rate: f64, depth: f64, wet: f64, dry: f64) {
        self.rate = rate.clamp(0.1, 10.0);
        self.depth = depth.clamp(0.0, 1.0);
        self.wet = wet.clamp(0.0, 1.0);
        self.dry = dry.clamp(0.0, 1.0);
    }

    /// Read from the delay buffer with fractional (linear interpolation) delay.
    #[inline]
    fn read_interpolated(buffer: &[f64], write_pos: usize, delay_samples: f64) -> f64 {
        let buffer_len = buffer.len();
        let delay_int = delay_samples as usize;
        let frac = delay_samples - delay_int as f64;

        let read_pos_0 = (write_pos + buffer_len - delay_int % buffer_len) % buffer_len;
        let read_pos_1 = if read_pos_0 == 0 {
            buffer_len - 1
        } else {
            read_pos_0 - 1
        };

        let s0 = buffer[read_pos_0];
        let s1 = buffer[read_pos_1];
        s0 + frac * (s1 - s0)
    }

    #[inline]
    pub fn process(&mut self, input: f64) -> f64 {
        let buffer_len = self.buffer.len();
        self.buffer[self.write_pos] = flush_denormal(input);

        let lfo = (2.0 * PI * self.phase).sin();
        let swing = MAX_SWING_SECONDS * self.depth * lfo;
        let max_delay = (buffer_len - 2) as f64;
        let delay_samples = ((self.delay + swing) * self.sample_rate).clamp(1.0, max_delay);

        let wet = Self::read_interpolated(&self.buffer, self.write_pos, delay_samples);

        self.write_pos = (self.write_pos + 1) % buffer_len;
        self.phase = (self.phase + self.rate / self.sample_rate) % 1.0;

        self.dry * input + self.wet * wet
    }

    pub fn process_block(&mut self, buffer: &mut [f64]) {
        for s in buffer.iter_mut() {
            *s = self.process(*s);
        }
    }

    pub fn clear(&mut self) {
        self.buffer.fill(0.0);
        self.write_pos = 0;
        self.phase = 0.0;
    }
}
