//! Distortion effect: tanh waveshaping that hardens into a clipper.
//!
//! Drive 0–1 maps to a 1×–20× pre-gain into `tanh`. Above drive 0.7 the output
//! crossfades toward a hard clip of the same pre-gained signal, reaching pure
//! hard clipping at drive 1.0. `amount` is the dry/wet blend.

/// Drive above which hard clipping is blended in.
pub const HARD_CLIP_KNEE: f64 = 0.7;

/// Pre-gain for a 0–1 drive.
#[inline]
pub fn drive_to_gain(drive: f64) -> f64 {
    1.0 + drive.clamp(0.0, 1.0) * 19.0
}

/// Waveshape one sample at the given drive, without dry/wet mixing.
#[inline]
pub fn shape(x: f64, drive: f64) -> f64 {
    let drive = drive.clamp(0.0, 1.0);
    let driven = x * drive_to_gain(drive);
    let soft = driven.tanh();
    if drive <= HARD_CLIP_KNEE {
        return soft;
    }
    let hard = driven.clamp(-1.0, 1.0);
    let blend = (drive - HARD_CLIP_KNEE) / (1.0 - HARD_CLIP_KNEE);
    soft + (hard - soft) * blend
}

/// Stateless distortion with drive and dry/wet amount.
#[derive(Debug, Clone, Copy)]
pub struct Distortion {
    /// Drive (0.0 to 1.0).
    pub drive: f64,
    /// Dry/wet mix (0.0 = dry, 1.0 = wet).
    pub amount: f64,
}

impl Default for Distortion {
    fn default() -> Self {
        Self {
            drive: 0.5,
            amount: 1.0,
        }
    }
}

impl Distortion {
    pub fn with_params(drive: f64, amount: f64) -> Self {
        Self {
            drive: drive.clamp(0.0, 1.0),
            amount: amount.clamp(0.0, 1.0),
        }
    }

    #[inline]
    pub fn process(&self, input: f64) -> f64 {
        let wet = shape(input, self.drive);
        input + (wet - input) * self.amount
    }

    pub fn process_block(&self, buffer: &mut [f64]) {
        for s in buffer.iter_mut() {
            *s = self.process(*s);
        }
    }
}
