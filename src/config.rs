//! Engine configuration.

use serde::{Deserialize, Serialize};

use crate::error::EngineError;

/// Tunables for the audio engine.
///
/// Every field has a default, so a host can pass a partial JSON object and
/// only override what it cares about.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct EngineConfig {
    /// Output sample rate in Hz.
    pub sample_rate: f64,
    /// Frames per render callback.
    pub buffer_size: usize,
    /// Capacity of the host → audio control queue.
    pub control_queue_capacity: usize,
    /// Capacity of the audio → host status queue.
    pub status_queue_capacity: usize,
    /// How often (in beats) timeline lookups and resolved effects are refreshed.
    pub cache_refresh_beats: f64,
    /// Scheduling lookahead while looping a single pattern.
    pub pattern_lookahead_beats: f64,
    /// Scheduling lookahead in arrangement view.
    pub arrangement_lookahead_beats: f64,
    /// Scheduled entries older than this many samples are pruned.
    pub prune_lookback_samples: u64,
    /// Cadence of `playbackPosition` events, in milliseconds of rendered audio.
    pub position_interval_ms: f64,
    /// Cadence of batched `playbackUpdate` events.
    pub highlight_interval_ms: f64,
    /// Peak level below which output counts as silence.
    pub quiet_threshold: f64,
    /// Silence must last this long before a `quietPeriod` is reported.
    pub quiet_min_seconds: f64,
    /// Fraction of an effect's span over which it fades in.
    pub effect_fade_progress: f64,
    /// Upper bound on highlight ids carried over when the status queue is full.
    pub max_pending_highlights: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            sample_rate: 44100.0,
            buffer_size: 128,
            control_queue_capacity: 256,
            status_queue_capacity: 512,
            cache_refresh_beats: 0.1,
            pattern_lookahead_beats: 1.0,
            arrangement_lookahead_beats: 4.0,
            prune_lookback_samples: 44100,
            position_interval_ms: 50.0,
            highlight_interval_ms: 20.0,
            quiet_threshold: 1e-4,
            quiet_min_seconds: 0.5,
            effect_fade_progress: 0.01,
            max_pending_highlights: 256,
        }
    }
}

impl EngineConfig {
    /// Config with the given sample rate and buffer size, defaults elsewhere.
    pub fn new(sample_rate: f64, buffer_size: usize) -> Self {
        Self {
            sample_rate,
            buffer_size,
            prune_lookback_samples: sample_rate.max(1.0) as u64,
            ..Self::default()
        }
    }

    /// Parse a (possibly partial) JSON config and validate it.
    pub fn from_json(json: &str) -> Result<Self, EngineError> {
        let config: EngineConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), EngineError> {
        if !(self.sample_rate.is_finite() && self.sample_rate > 0.0) {
            return Err(EngineError::InvalidConfig(format!(
                "sample_rate must be > 0, got {}",
                self.sample_rate
            )));
        }
        if self.buffer_size == 0 {
            return Err(EngineError::InvalidConfig("buffer_size must be > 0".into()));
        }
        if self.control_queue_capacity == 0 || self.status_queue_capacity == 0 {
            return Err(EngineError::InvalidConfig(
                "queue capacities must be > 0".into(),
            ));
        }
        if !(self.cache_refresh_beats > 0.0) {
            return Err(EngineError::InvalidConfig(
                "cache_refresh_beats must be > 0".into(),
            ));
        }
        // A cache window longer than the lookahead would let mute/solo lag past
        // what the scheduler already committed to.
        if self.cache_refresh_beats > self.pattern_lookahead_beats {
            return Err(EngineError::InvalidConfig(format!(
                "cache_refresh_beats ({}) exceeds pattern_lookahead_beats ({})",
                self.cache_refresh_beats, self.pattern_lookahead_beats
            )));
        }
        Ok(())
    }

    /// Number of rendered samples between `playbackPosition` events.
    pub fn position_interval_samples(&self) -> u64 {
        ms_to_samples(self.position_interval_ms, self.sample_rate)
    }

    /// Number of rendered samples between `playbackUpdate` batches.
    pub fn highlight_interval_samples(&self) -> u64 {
        ms_to_samples(self.highlight_interval_ms, self.sample_rate)
    }
}

fn ms_to_samples(ms: f64, sample_rate: f64) -> u64 {
    ((ms * 0.001 * sample_rate) as u64).max(1)
}
