//! ADSR amplitude envelope for the reference voices.

/// Envelope stages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Idle,
    Attack,
    Decay,
    Sustain,
    Release,
}

/// Stage times in seconds and sustain level.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AdsrParams {
    pub attack: f64,
    pub decay: f64,
    /// Sustain level [0, 1].
    pub sustain: f64,
    pub release: f64,
}

impl Default for AdsrParams {
    fn default() -> Self {
        Self {
            attack: 0.005,
            decay: 0.1,
            sustain: 0.7,
            release: 0.2,
        }
    }
}

impl AdsrParams {
    /// Percussive shape: no sustain, the decay is the whole note.
    pub fn percussive(decay: f64) -> Self {
        Self {
            attack: 0.001,
            decay,
            sustain: 0.0,
            release: 0.01,
        }
    }
}

/// Linear ADSR.
///
/// Every stage ramps from the level it was entered at, so retriggering or
/// releasing mid-stage never jumps.
#[derive(Debug, Clone)]
pub struct Adsr {
    pub params: AdsrParams,
    stage: Stage,
    level: f64,
    sample_rate: f64,
    stage_samples: usize,
    stage_counter: usize,
    start_level: f64,
}

impl Adsr {
    pub fn new(sample_rate: f64, params: AdsrParams) -> Self {
        Self {
            params,
            stage: Stage::Idle,
            level: 0.0,
            sample_rate,
            stage_samples: 0,
            stage_counter: 0,
            start_level: 0.0,
        }
    }

    /// Note on.
    pub fn trigger(&mut self) {
        self.enter(Stage::Attack, self.params.attack);
    }

    /// Note off. No-op when idle.
    pub fn release(&mut self) {
        if self.stage != Stage::Idle && self.stage != Stage::Release {
            self.enter(Stage::Release, self.params.release);
        }
    }

    /// Silence immediately.
    pub fn kill(&mut self) {
        self.stage = Stage::Idle;
        self.level = 0.0;
    }

    fn enter(&mut self, stage: Stage, seconds: f64) {
        self.stage = stage;
        self.stage_samples = (seconds.max(0.0) * self.sample_rate) as usize;
        self.stage_counter = 0;
        self.start_level = self.level;
    }

    /// Ramp from `start_level` to `target`; returns true when the stage is done.
    #[inline]
    fn ramp(&mut self, target: f64) -> bool {
        if self.stage_counter >= self.stage_samples {
            self.level = target;
            return true;
        }
        self.stage_counter += 1;
        let t = self.stage_counter as f64 / self.stage_samples as f64;
        self.level = self.start_level + (target - self.start_level) * t;
        self.stage_counter >= self.stage_samples
    }

    /// Next envelope value in [0, 1].
    pub fn next_sample(&mut self) -> f64 {
        match self.stage {
            Stage::Idle => self.level = 0.0,
            Stage::Attack => {
                if self.ramp(1.0) {
                    self.enter(Stage::Decay, self.params.decay);
                }
            }
            Stage::Decay => {
                let sustain = self.params.sustain.clamp(0.0, 1.0);
                if self.ramp(sustain) {
                    if sustain <= 0.0 {
                        self.stage = Stage::Idle;
                    } else {
                        self.stage = Stage::Sustain;
                    }
                }
            }
            Stage::Sustain => self.level = self.params.sustain.clamp(0.0, 1.0),
            Stage::Release => {
                if self.ramp(0.0) {
                    self.stage = Stage::Idle;
                }
            }
        }
        self.level
    }

    pub fn stage(&self) -> Stage {
        self.stage
    }

    pub fn is_active(&self) -> bool {
        self.stage != Stage::Idle
    }
}
