//! Biquad filter math shared by the filter effect and the filter envelope.
//!
//! Coefficient formulas from the Audio EQ Cookbook (Robert Bristow-Johnson).
//! State is kept in Direct Form I (`x1, x2, y1, y2`) so it can be stored per
//! track and survive coefficient changes without a discontinuity.

use std::f64::consts::PI;

/// Magnitudes below this are flushed to zero.
pub const DENORMAL_THRESHOLD: f64 = 1e-20;

/// Flush tiny values to exactly zero.
///
/// Decaying feedback tails otherwise drift into subnormal range, which is
/// slow on most CPUs.
#[inline]
pub fn flush_denormal(x: f64) -> f64 {
    if x.abs() < DENORMAL_THRESHOLD { 0.0 } else { x }
}

/// Replace NaN/Infinity with silence, then flush denormals.
#[inline]
pub fn sanitize(x: f64) -> f64 {
    if x.is_finite() { flush_denormal(x) } else { 0.0 }
}

/// Filter response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FilterType {
    Lowpass,
    Highpass,
    Bandpass,
}

impl FilterType {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "lowpass" | "lp" => Some(FilterType::Lowpass),
            "highpass" | "hp" => Some(FilterType::Highpass),
            "bandpass" | "bp" => Some(FilterType::Bandpass),
            _ => None,
        }
    }
}

/// Map a 0–1 knob to 20 Hz – 20 kHz on a log scale.
#[inline]
pub fn knob_to_cutoff_hz(knob: f64) -> f64 {
    20.0 * 1000.0_f64.powf(knob.clamp(0.0, 1.0))
}

/// Map 0–1 resonance to Q 0.5–10.
#[inline]
pub fn resonance_to_q(resonance: f64) -> f64 {
    0.5 + resonance.clamp(0.0, 1.0) * 9.5
}

/// Normalized biquad coefficients (a0 divided out).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BiquadCoefficients {
    pub b0: f64,
    pub b1: f64,
    pub b2: f64,
    pub a1: f64,
    pub a2: f64,
}

impl BiquadCoefficients {
    /// Pass-through.
    pub const IDENTITY: Self = Self {
        b0: 1.0,
        b1: 0.0,
        b2: 0.0,
        a1: 0.0,
        a2: 0.0,
    };

    pub fn compute(filter_type: FilterType, cutoff_hz: f64, q: f64, sample_rate: f64) -> Self {
        if !(sample_rate > 0.0) || !cutoff_hz.is_finite() || !q.is_finite() {
            return Self::IDENTITY;
        }
        let cutoff = cutoff_hz.clamp(10.0, sample_rate * 0.49);
        let q = q.max(0.01);

        let w0 = 2.0 * PI * cutoff / sample_rate;
        let cos_w0 = w0.cos();
        let sin_w0 = w0.sin();
        let alpha = sin_w0 / (2.0 * q);

        let (b0, b1, b2) = match filter_type {
            FilterType::Lowpass => {
                let b1 = 1.0 - cos_w0;
                (b1 / 2.0, b1, b1 / 2.0)
            }
            FilterType::Highpass => {
                let b0 = (1.0 + cos_w0) / 2.0;
                (b0, -(1.0 + cos_w0), b0)
            }
            FilterType::Bandpass => (alpha, 0.0, -alpha),
        };
        let a0 = 1.0 + alpha;
        let a1 = -2.0 * cos_w0;
        let a2 = 1.0 - alpha;

        Self {
            b0: b0 / a0,
            b1: b1 / a0,
            b2: b2 / a0,
            a1: a1 / a0,
            a2: a2 / a0,
        }
    }
}

/// Direct Form I history.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct BiquadState {
    pub x1: f64,
    pub x2: f64,
    pub y1: f64,
    pub y2: f64,
}

impl BiquadState {
    #[inline]
    pub fn process(&mut self, c: &BiquadCoefficients, x: f64) -> f64 {
        let y = c.b0 * x + c.b1 * self.x1 + c.b2 * self.x2 - c.a1 * self.y1 - c.a2 * self.y2;
        let y = sanitize(y);
        self.x2 = self.x1;
        self.x1 = x;
        self.y2 = self.y1;
        self.y1 = y;
        y
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

/// Parameters that determine a coefficient set.
#[derive(Debug, Clone, Copy, PartialEq)]
struct CoefficientKey {
    filter_type: FilterType,
    cutoff_hz: f64,
    q: f64,
    sample_rate: f64,
}

/// A biquad that only recomputes its coefficients when
/// `(cutoff, q, type, sample_rate)` changes.
#[derive(Debug, Clone)]
pub struct CachedBiquad {
    key: Option<CoefficientKey>,
    coefficients: BiquadCoefficients,
    pub state: BiquadState,
    recomputations: u64,
}

impl Default for CachedBiquad {
    fn default() -> Self {
        Self::new()
    }
}

impl CachedBiquad {
    pub fn new() -> Self {
        Self {
            key: None,
            coefficients: BiquadCoefficients::IDENTITY,
            state: BiquadState::default(),
            recomputations: 0,
        }
    }

    /// Update parameters. Returns `true` if coefficients were recomputed.
    pub fn set_params(
        &mut self,
        filter_type: FilterType,
        cutoff_hz: f64,
        q: f64,
        sample_rate: f64,
    ) -> bool {
        let key = CoefficientKey {
            filter_type,
            cutoff_hz,
            q,
            sample_rate,
        };
        if self.key == Some(key) {
            return false;
        }
        self.coefficients = BiquadCoefficients::compute(filter_type, cutoff_hz, q, sample_rate);
        self.key = Some(key);
        self.recomputations += 1;
        true
    }

    #[inline]
    pub fn process(&mut self, x: f64) -> f64 {
        self.state.process(&self.coefficients, x)
    }

    pub fn coefficients(&self) -> BiquadCoefficients {
        self.coefficients
    }

    /// How many times coefficients have been computed.
    pub fn recomputations(&self) -> u64 {
        self.recomputations
    }

    pub fn reset(&mut self) {
        self.state.reset();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SR: f64 = 44100.0;

    #[test]
    fn denormal_flush_zeroes_tiny_values() {
        for &x in &[1e-21, -1e-21, 9.99e-21, -5e-30, f64::MIN_POSITIVE, 0.0, -0.0] {
            let y = flush_denormal(x);
            assert!(y == 0.0, "{x:e} should flush to 0, got {y:e}");
        }
        assert_eq!(flush_denormal(1e-20), 1e-20);
        assert_eq!(flush_denormal(-0.5), -0.5);
    }

    #[test]
    fn sanitize_replaces_non_finite() {
        assert_eq!(sanitize(f64::NAN), 0.0);
        assert_eq!(sanitize(f64::INFINITY), 0.0);
        assert_eq!(sanitize(f64::NEG_INFINITY), 0.0);
        assert_eq!(sanitize(0.25), 0.25);
    }

    #[test]
    fn knob_mapping_endpoints() {
        assert!((knob_to_cutoff_hz(0.0) - 20.0).abs() < 1e-9);
        assert!((knob_to_cutoff_hz(1.0) - 20000.0).abs() < 1e-6);
        assert!((resonance_to_q(0.0) - 0.5).abs() < 1e-12);
        assert!((resonance_to_q(1.0) - 10.0).abs() < 1e-12);
    }

    #[test]
    fn lowpass_passes_dc() {
        let c = BiquadCoefficients::compute(FilterType::Lowpass, 5000.0, 0.707, SR);
        let mut s = BiquadState::default();
        let mut out = 0.0;
        for _ in 0..2000 {
            out = s.process(&c, 1.0);
        }
        assert!((out - 1.0).abs() < 0.001, "Lowpass should pass DC, got {out}");
    }

    #[test]
    fn highpass_blocks_dc() {
        let c = BiquadCoefficients::compute(FilterType::Highpass, 1000.0, 0.707, SR);
        let mut s = BiquadState::default();
        let mut out = 1.0;
        for _ in 0..2000 {
            out = s.process(&c, 1.0);
        }
        assert!(out.abs() < 0.001, "Highpass should block DC, got {out}");
    }

    #[test]
    fn lowpass_attenuates_high_freq() {
        let c = BiquadCoefficients::compute(FilterType::Lowpass, 200.0, 0.707, SR);
        let mut s = BiquadState::default();
        let mut max_out = 0.0_f64;
        for i in 0..4410 {
            let input = (2.0 * PI * 10000.0 * i as f64 / SR).sin();
            let out = s.process(&c, input);
            if i > 1000 {
                max_out = max_out.max(out.abs());
            }
        }
        assert!(max_out < 0.01, "10kHz should be strongly attenuated, got {max_out}");
    }

    #[test]
    fn cache_recomputes_only_on_change() {
        let mut f = CachedBiquad::new();
        assert!(f.set_params(FilterType::Lowpass, 1000.0, 0.707, SR));
        assert!(!f.set_params(FilterType::Lowpass, 1000.0, 0.707, SR));
        assert!(!f.set_params(FilterType::Lowpass, 1000.0, 0.707, SR));
        assert_eq!(f.recomputations(), 1);

        assert!(f.set_params(FilterType::Lowpass, 1200.0, 0.707, SR));
        assert!(f.set_params(FilterType::Lowpass, 1200.0, 2.0, SR));
        assert!(f.set_params(FilterType::Highpass, 1200.0, 2.0, SR));
        assert!(f.set_params(FilterType::Highpass, 1200.0, 2.0, 48000.0));
        assert!(!f.set_params(FilterType::Highpass, 1200.0, 2.0, 48000.0));
        assert_eq!(f.recomputations(), 5);
    }

    #[test]
    fn cached_output_matches_recompute_every_call() {
        let mut cached = CachedBiquad::new();
        let mut fresh_state = BiquadState::default();

        for i in 0..5000 {
            // Cutoff steps every 500 samples.
            let cutoff = 300.0 + (i / 500) as f64 * 250.0;
            let x = (i as f64 * 0.05).sin() * 0.8;

            cached.set_params(FilterType::Bandpass, cutoff, 1.5, SR);
            let a = cached.process(x);

            let c = BiquadCoefficients::compute(FilterType::Bandpass, cutoff, 1.5, SR);
            let b = fresh_state.process(&c, x);

            assert_eq!(a.to_bits(), b.to_bits(), "sample {i} differs: {a} vs {b}");
        }
        assert_eq!(cached.recomputations(), 10);
    }

    #[test]
    fn output_stays_finite_with_impulses() {
        let c = BiquadCoefficients::compute(FilterType::Bandpass, 1000.0, 10.0, SR);
        let mut s = BiquadState::default();
        for i in 0..10000 {
            let input = if i % 100 == 0 { 1.0 } else { 0.0 };
            assert!(s.process(&c, input).is_finite(), "not finite at {i}");
        }
    }

    #[test]
    fn invalid_params_fall_back_to_identity() {
        let c = BiquadCoefficients::compute(FilterType::Lowpass, f64::NAN, 0.7, SR);
        assert_eq!(c, BiquadCoefficients::IDENTITY);
        let c = BiquadCoefficients::compute(FilterType::Lowpass, 1000.0, 0.7, 0.0);
        assert_eq!(c, BiquadCoefficients::IDENTITY);
    }
}
