//! Tempo, transport, and the sample clock.

use crate::messages::TransportState;

pub const MIN_BPM: f64 = 1.0;
pub const MAX_BPM: f64 = 999.0;

/// What a `set_transport` call did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportChange {
    /// Play from beat 0 while stopped. Voices should be cut and the schedule
    /// rebuilt before the next sample.
    StartedFromZero,
    /// Play from a non-zero position, or a seek while already playing.
    Started,
    Stopped,
}

/// Sample clock plus tempo. `current_time` counts samples since the start of
/// the current loop.
#[derive(Debug, Clone)]
pub struct PlaybackController {
    sample_rate: f64,
    bpm: f64,
    samples_per_beat: f64,
    current_time: u64,
    playing: bool,
    loop_count: u64,
}

impl PlaybackController {
    pub fn new(sample_rate: f64, bpm: f64) -> Self {
        let mut p = Self {
            sample_rate,
            bpm: 120.0,
            samples_per_beat: 0.0,
            current_time: 0,
            playing: false,
            loop_count: 0,
        };
        p.set_tempo(bpm);
        p.samples_per_beat = samples_per_beat(sample_rate, p.bpm);
        p
    }

    pub fn sample_rate(&self) -> f64 {
        self.sample_rate
    }

    pub fn bpm(&self) -> f64 {
        self.bpm
    }

    pub fn samples_per_beat(&self) -> f64 {
        self.samples_per_beat
    }

    pub fn is_playing(&self) -> bool {
        self.playing
    }

    pub fn current_time(&self) -> u64 {
        self.current_time
    }

    pub fn loop_count(&self) -> u64 {
        self.loop_count
    }

    /// Current position in beats.
    pub fn current_beat(&self) -> f64 {
        self.current_time as f64 / self.samples_per_beat
    }

    pub fn beats_to_samples(&self, beats: f64) -> u64 {
        (beats.max(0.0) * self.samples_per_beat).floor() as u64
    }

    pub fn beats_to_seconds(&self, beats: f64) -> f64 {
        beats * 60.0 / self.bpm
    }

    /// Change tempo, keeping the current beat. Returns false if `bpm` was not
    /// finite and was ignored.
    pub fn set_tempo(&mut self, bpm: f64) -> bool {
        if !bpm.is_finite() {
            return false;
        }
        let beat = if self.samples_per_beat > 0.0 {
            self.current_beat()
        } else {
            0.0
        };
        self.bpm = bpm.clamp(MIN_BPM, MAX_BPM);
        self.samples_per_beat = samples_per_beat(self.sample_rate, self.bpm);
        self.current_time = (beat * self.samples_per_beat).round() as u64;
        true
    }

    pub fn set_transport(&mut self, state: TransportState, position_beats: f64) -> TransportChange {
        match state {
            TransportState::Stop => {
                self.playing = false;
                TransportChange::Stopped
            }
            TransportState::Play => {
                let position = if position_beats.is_finite() {
                    position_beats.max(0.0)
                } else {
                    0.0
                };
                let was_playing = self.playing;
                self.playing = true;
                self.current_time = self.beats_to_samples(position);
                if position == 0.0 && !was_playing {
                    self.loop_count = 0;
                    TransportChange::StartedFromZero
                } else {
                    TransportChange::Started
                }
            }
        }
    }

    /// Advance the clock by one sample.
    #[inline]
    pub fn advance(&mut self) {
        self.current_time += 1;
    }

    /// Wrap to the start of the next loop.
    pub fn wrap_loop(&mut self) {
        self.current_time = 0;
        self.loop_count += 1;
    }
}

#[inline]
pub fn samples_per_beat(sample_rate: f64, bpm: f64) -> f64 {
    sample_rate / (bpm / 60.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn samples_per_beat_formula() {
        let p = PlaybackController::new(44100.0, 120.0);
        assert_eq!(p.samples_per_beat(), 22050.0);
        assert_eq!(p.beats_to_samples(1.5), 33075);
        assert!((p.beats_to_seconds(2.0) - 1.0).abs() < 1e-12);
    }

    #[test]
    fn tempo_is_clamped_and_ignores_nan() {
        let mut p = PlaybackController::new(44100.0, 120.0);
        p.set_tempo(5000.0);
        assert_eq!(p.bpm(), MAX_BPM);
        p.set_tempo(0.0);
        assert_eq!(p.bpm(), MIN_BPM);
        assert!(!p.set_tempo(f64::NAN));
        assert_eq!(p.bpm(), MIN_BPM);
    }

    #[test]
    fn tempo_change_keeps_beat() {
        let mut p = PlaybackController::new(1000.0, 60.0);
        p.set_transport(TransportState::Play, 3.0);
        assert_eq!(p.current_time(), 3000);
        p.set_tempo(120.0);
        assert_eq!(p.current_time(), 1500);
        assert!((p.current_beat() - 3.0).abs() < 1e-12);
    }

    #[test]
    fn transport_changes() {
        let mut p = PlaybackController::new(1000.0, 60.0);
        assert_eq!(p.set_transport(TransportState::Play, 0.0), TransportChange::StartedFromZero);
        for _ in 0..10 {
            p.advance();
        }
        // Seek to 0 while playing is a plain start
        assert_eq!(p.set_transport(TransportState::Play, 0.0), TransportChange::Started);
        assert_eq!(p.current_time(), 0);
        assert_eq!(p.set_transport(TransportState::Stop, 0.0), TransportChange::Stopped);
        assert!(!p.is_playing());
        assert_eq!(p.set_transport(TransportState::Play, 2.0), TransportChange::Started);
        assert_eq!(p.current_time(), 2000);
        p.set_transport(TransportState::Stop, 0.0);
        assert_eq!(p.set_transport(TransportState::Play, f64::NAN), TransportChange::StartedFromZero);
    }

    #[test]
    fn wrap_counts_loops() {
        let mut p = PlaybackController::new(1000.0, 60.0);
        p.advance();
        p.wrap_loop();
        p.wrap_loop();
        assert_eq!((p.current_time(), p.loop_count()), (0, 2));
    }
}
