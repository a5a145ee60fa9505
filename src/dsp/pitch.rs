//! Delay-line pitch shifter used by the pitch envelope.
//!
//! Two read heads sweep through a short delay window at `1 - ratio` samples
//! per sample, half a window apart, with triangular crossfade gains so each
//! head is silent when it wraps. Reads are linearly interpolated and the
//! output passes through a one-pole lowpass to soften the remaining seams.

use super::filter::flush_denormal;

/// Window length in seconds.
const WINDOW_SECONDS: f64 = 0.04;

#[derive(Debug, Clone)]
pub struct PitchShifter {
    buffer: Vec<f64>,
    write_pos: usize,
    window: f64,
    /// Delay of the first head in samples, within [0, window).
    delay: f64,
    smoothed: f64,
    smoothing: f64,
}

impl PitchShifter {
    pub fn new(sample_rate: f64) -> Self {
        let window = (WINDOW_SECONDS * sample_rate).max(4.0).floor();
        Self {
            buffer: vec![0.0; window as usize + 2],
            write_pos: 0,
            window,
            delay: 0.0,
            smoothed: 0.0,
            smoothing: 0.5,
        }
    }

    #[inline]
    fn read(&self, delay: f64) -> f64 {
        let len = self.buffer.len();
        let d_int = delay as usize;
        let frac = delay - d_int as f64;
        let i0 = (self.write_pos + len - d_int % len) % len;
        let i1 = (i0 + len - 1) % len;
        let a = self.buffer[i0];
        let b = self.buffer[i1];
        a + (b - a) * frac
    }

    /// Process one sample at the given playback ratio (0.5 = octave down,
    /// 2.0 = octave up).
    #[inline]
    pub fn process(&mut self, input: f64, ratio: f64) -> f64 {
        let ratio = if ratio.is_finite() { ratio.clamp(0.25, 4.0) } else { 1.0 };
        self.buffer[self.write_pos] = input;

        let w = self.window;
        let d1 = self.delay;
        let d2 = (d1 + w * 0.5) % w;
        // Triangular gains: zero at the window edges, one in the middle.
        let g1 = 1.0 - ((d1 / w) * 2.0 - 1.0).abs();
        let g2 = 1.0 - ((d2 / w) * 2.0 - 1.0).abs();
        let shifted = self.read(d1) * g1 + self.read(d2) * g2;

        self.write_pos = (self.write_pos + 1) % self.buffer.len();
        self.delay = (d1 + 1.0 - ratio).rem_euclid(w);

        self.smoothed = flush_denormal(self.smoothed + (shifted - self.smoothed) * self.smoothing);
        self.smoothed
    }

    pub fn reset(&mut self) {
        self.buffer.fill(0.0);
        self.write_pos = 0;
        self.delay = 0.0;
        self.smoothed = 0.0;
    }
}
