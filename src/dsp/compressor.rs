//! Compressor effect: feed-forward dynamics processing.
//!
//! Threshold, ratio, and soft knee follow the WebAudio DynamicsCompressorNode.
//! Attack and release smooth a peak envelope; their coefficients are cached
//! and only recomputed when the times or sample rate change.

/// A mono feed-forward compressor.
#[derive(Debug, Clone)]
pub struct Compressor {
    sample_rate: f64,

    /// Threshold in dB (-60 to 0).
    pub threshold: f64,
    /// Compression ratio (e.g., 4.0 = 4:1 compression).
    pub ratio: f64,
    /// Knee width in dB (0 = hard knee).
    pub knee: f64,
    /// Attack time in milliseconds.
    pub attack_ms: f64,
    /// Release time in milliseconds.
    pub release_ms: f64,
    /// Makeup gain in dB.
    pub makeup_gain: f64,

    envelope: f64,
    attack_coef: f64,
    release_coef: f64,
    coef_key: Option<(f64, f64, f64)>,
}

/// Smoothing coefficient for a time constant in milliseconds.
#[inline]
pub fn smoothing_coefficient(ms: f64, sample_rate: f64) -> f64 {
    (-1.0 / (ms * sample_rate * 0.001)).exp()
}

impl Compressor {
    pub fn new(sample_rate: f64) -> Self {
        let mut c = Self {
            sample_rate,
            threshold: -24.0,
            ratio: 4.0,
            knee: 0.0,
            attack_ms: 10.0,
            release_ms: 100.0,
            makeup_gain: 0.0,
            envelope: 0.0,
            attack_coef: 0.0,
            release_coef: 0.0,
            coef_key: None,
        };
        c.update_coefficients();
        c
    }

    pub fn with_params(
        sample_rate: f64,
        threshold: f64,
        ratio: f64,
        attack_ms: f64,
        release_ms: f64,
    ) -> Self {
        let mut c = Self::new(sample_rate);
        c.set_params(threshold, ratio, attack_ms, release_ms, 0.0);
        c
    }

    pub fn set_params(
        &mut self,
        threshold: f64,
        ratio: f64,
        attack_ms: f64,
        release_ms: f64,
        makeup_gain: f64,
    ) {
        self.threshold = threshold.clamp(-60.0, 0.0);
        self.ratio = ratio.clamp(1.0, 20.0);
        self.attack_ms = attack_ms.clamp(0.1, 1000.0);
        self.release_ms = release_ms.clamp(1.0, 5000.0);
        self.makeup_gain = makeup_gain.clamp(-24.0, 24.0);
        self.update_coefficients();
    }

    fn update_coefficients(&mut self) {
        let key = (self.attack_ms, self.release_ms, self.sample_rate);
        if self.coef_key == Some(key) {
            return;
        }
        self.attack_coef = smoothing_coefficient(self.attack_ms, self.sample_rate);
        self.release_coef = smoothing_coefficient(self.release_ms, self.sample_rate);
        self.coef_key = Some(key);
    }

    #[inline]
    fn linear_to_db(linear: f64) -> f64 {
        if linear <= 1e-6 {
            -120.0
        } else {
            20.0 * linear.log10()
        }
    }

    #[inline]
    fn db_to_linear(db: f64) -> f64 {
        10.0_f64.powf(db / 20.0)
    }

    /// Gain change in dB for an input level in dB (≤ 0).
    #[inline]
    fn compute_gain(&self, input_db: f64) -> f64 {
        let slope = 1.0 - 1.0 / self.ratio;
        if self.knee <= 0.0 {
            if input_db <= self.threshold {
                0.0
            } else {
                (self.threshold - input_db) * slope
            }
        } else {
            let half_knee = self.knee / 2.0;
            let knee_start = self.threshold - half_knee;
            let knee_end = self.threshold + half_knee;

            if input_db <= knee_start {
                0.0
            } else if input_db >= knee_end {
                (self.threshold - input_db) * slope
            } else {
                let x = input_db - knee_start;
                let knee_factor = x / self.knee;
                -knee_factor * knee_factor * slope * half_knee
            }
        }
    }

    #[inline]
    pub fn process(&mut self, input: f64) -> f64 {
        let level = input.abs();
        let coef = if level > self.envelope {
            self.attack_coef
        } else {
            self.release_coef
        };
        self.envelope = coef * self.envelope + (1.0 - coef) * level;
        if self.envelope < 1e-20 {
            self.envelope = 0.0;
        }

        let gain_db = self.compute_gain(Self::linear_to_db(self.envelope)) + self.makeup_gain;
        input * Self::db_to_linear(gain_db)
    }

    pub fn process_block(&mut self, buffer: &mut [f64]) {
        for s in buffer.iter_mut() {
            *s = self.process(*s);
        }
    }

    pub fn reset(&mut self) {
        self.envelope = 0.0;
    }

    /// Current gain reduction in dB (for metering).
    pub fn gain_reduction(&self) -> f64 {
        -self.compute_gain(Self::linear_to_db(self.envelope))
    }
}
