//! Delay effect: feedback delay line with fractional read position.

use super::filter::flush_denormal;

/// Maximum feedback; anything higher risks runaway.
pub const MAX_FEEDBACK: f64 = 0.99;

/// A mono delay with configurable time, feedback, and wet/dry gains.
///
/// The buffer holds up to `max_delay_seconds` of audio. Delay time can move
/// freely; reads are linearly interpolated so modulated times stay smooth.
#[derive(Debug, Clone)]
pub struct Delay {
    buffer: Vec<f64>,
    write_pos: usize,
    sample_rate: f64,

    /// Delay time in seconds.
    pub delay_time: f64,
    /// Feedback amount, clamped to `MAX_FEEDBACK`.
    pub feedback: f64,
    pub wet: f64,
    pub dry: f64,
}

impl Delay {
    pub fn new(sample_rate: f64, max_delay_seconds: f64) -> Self {
        let buffer_size = (sample_rate * max_delay_seconds.max(0.0)) as usize + 2;
        Self {
            buffer: vec![0.0; buffer_size],
            write_pos: 0,
            sample_rate,
            delay_time: 0.25,
            feedback: 0.3,
            wet: 0.5,
            dry: 1.0,
        }
    }

    pub fn with_params(
        sample_rate: f64,
        max_delay_seconds: f64,
        delay_time: f64,
        feedback: f64,
        wet: f64,
        dry: f64,
    ) -> Self {
        let mut d = Self::new(sample_rate, max_delay_seconds);
        d.set_params(delay_time, feedback, wet, dry);
        d
    }

    pub fn set_params(&mut self, delay_time: f64, feedback: f64, wet: f64, dry: f64) {
        let max_time = (self.buffer.len() - 2) as f64 / self.sample_rate;
        self.delay_time = delay_time.clamp(0.0, max_time);
        self.feedback = feedback.clamp(0.0, MAX_FEEDBACK);
        self.wet = wet.clamp(0.0, 1.0);
        self.dry = dry.clamp(0.0, 1.0);
    }

    /// Read `delay_samples` behind the write head with linear interpolation.
    #[inline]
    fn read_fractional(&self, delay_samples: f64) -> f64 {
        let len = self.buffer.len();
        let delay_int = delay_samples as usize;
        let frac = delay_samples - delay_int as f64;

        let idx0 = (self.write_pos + len - delay_int % len) % len;
        let idx1 = (idx0 + len - 1) % len;

        let s0 = self.buffer[idx0];
        let s1 = self.buffer[idx1];
        s0 + frac * (s1 - s0)
    }

    #[inline]
    pub fn process(&mut self, input: f64) -> f64 {
        let max_delay = (self.buffer.len() - 2) as f64;
        let delay_samples = (self.delay_time * self.sample_rate).clamp(1.0, max_delay.max(1.0));
        let delayed = self.read_fractional(delay_samples);

        self.buffer[self.write_pos] = flush_denormal(input + delayed * self.feedback);
        self.write_pos = (self.write_pos + 1) % self.buffer.len();

        self.dry * input + self.wet * delayed
    }

    pub fn process_block(&mut self, buffer: &mut [f64]) {
        for s in buffer.iter_mut() {
            *s = self.process(*s);
        }
    }

    pub fn clear(&mut self) {
        self.buffer.fill(0.0);
        self.write_pos = 0;
    }
}
