//! DSP building blocks.
//!
//! Everything here is plain per-sample `f64` processing with no knowledge of
//! tracks, beats, or the timeline. The `engine` module decides what runs
//! where; these types only do the math.

pub mod adsr;
pub mod chorus;
pub mod compressor;
pub mod delay;
pub mod distortion;
pub mod filter;
pub mod oscillator;
pub mod pitch;
pub mod reverb;
pub mod sampler;
pub mod voice;
