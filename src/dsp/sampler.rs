//! Sample playback.
//!
//! A `SampleBuffer` is shared by reference between every voice that plays it,
//! so injecting a sample on the audio thread is a pointer swap. Pitch is
//! applied by resampling with linear interpolation.

use std::sync::Arc;

use super::adsr::{Adsr, AdsrParams};
use super::voice::{Voice, normalize_velocity};

/// Note at which a sample plays back at its recorded speed.
pub const ROOT_NOTE: f64 = 60.0;

/// A mono sample loaded into memory.
#[derive(Debug, Clone, PartialEq)]
pub struct SampleBuffer {
    pub data: Vec<f32>,
    /// Native sample rate of the audio.
    pub sample_rate: f64,
}

impl SampleBuffer {
    pub fn new(data: Vec<f32>, sample_rate: f64) -> Self {
        SampleBuffer { data, sample_rate }
    }

    /// Create from 16-bit signed PCM, downmixing interleaved channels.
    pub fn from_i16(pcm: &[i16], channels: usize, sample_rate: f64) -> Self {
        let channels = channels.max(1);
        let data = pcm
            .chunks(channels)
            .map(|frame| {
                frame.iter().map(|&s| s as f32 / 32768.0).sum::<f32>() / frame.len() as f32
            })
            .collect();
        SampleBuffer { data, sample_rate }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Read at a fractional position. Out-of-range reads are silent.
    #[inline]
    pub fn read_interpolated(&self, position: f64) -> f64 {
        if self.data.is_empty() || !(position >= 0.0) {
            return 0.0;
        }
        let idx = position as usize;
        if idx + 1 >= self.data.len() {
            return if idx < self.data.len() {
                self.data[idx] as f64
            } else {
                0.0
            };
        }
        let frac = position - idx as f64;
        let a = self.data[idx] as f64;
        let b = self.data[idx + 1] as f64;
        a + (b - a) * frac
    }
}

/// One-shot sample voice.
///
/// Plays the injected buffer once from the start. A declared note duration
/// releases it early with a short fade.
#[derive(Debug, Clone)]
pub struct SampleVoice {
    buffer: Option<Arc<SampleBuffer>>,
    sample_rate: f64,
    position: f64,
    rate: f64,
    velocity: f64,
    gate_samples: Option<u64>,
    envelope: Adsr,
    playing: bool,
}

impl SampleVoice {
    pub fn new(sample_rate: f64) -> Self {
        Self {
            buffer: None,
            sample_rate,
            position: 0.0,
            rate: 1.0,
            velocity: 1.0,
            gate_samples: None,
            envelope: Adsr::new(
                sample_rate,
                AdsrParams {
                    attack: 0.001,
                    decay: 0.0,
                    sustain: 1.0,
                    release: 0.03,
                },
            ),
            playing: false,
        }
    }

    pub fn with_buffer(sample_rate: f64, buffer: Arc<SampleBuffer>) -> Self {
        let mut v = Self::new(sample_rate);
        v.buffer = Some(buffer);
        v
    }
}

impl Voice for SampleVoice {
    fn trigger(&mut self, velocity: f64, pitch: f64, duration_seconds: Option<f64>) {
        let Some(buffer) = &self.buffer else {
            return;
        };
        let semitones = if pitch.is_finite() { pitch - ROOT_NOTE } else { 0.0 };
        self.rate = (buffer.sample_rate / self.sample_rate) * 2.0_f64.powf(semitones / 12.0);
        self.position = 0.0;
        self.velocity = normalize_velocity(velocity);
        self.gate_samples = duration_seconds
            .filter(|d| d.is_finite() && *d > 0.0)
            .map(|d| (d * self.sample_rate) as u64);
        self.envelope.trigger();
        self.playing = true;
    }

    fn process(&mut self) -> f64 {
        if !self.playing {
            return 0.0;
        }
        let Some(buffer) = &self.buffer else {
            self.playing = false;
            return 0.0;
        };
        if self.position >= buffer.len() as f64 {
            self.playing = false;
            return 0.0;
        }

        if let Some(left) = self.gate_samples.as_mut() {
            if *left == 0 {
                self.envelope.release();
                self.gate_samples = None;
            } else {
                *left -= 1;
            }
        }

        let s = buffer.read_interpolated(self.position);
        self.position += self.rate;
        let env = self.envelope.next_sample();
        if !self.envelope.is_active() {
            self.playing = false;
        }
        s * env * self.velocity
    }

    fn is_active(&self) -> bool {
        self.playing
    }

    fn deactivate(&mut self) {
        self.playing = false;
        self.envelope.kill();
    }

    fn set_sample_buffer(&mut self, buffer: Arc<SampleBuffer>) {
        self.buffer = Some(buffer);
    }
}

/// Decode WAV or MP3 bytes into a mono sample buffer.
///
/// WAV is recognised by its RIFF header; everything else is tried as MP3.
#[cfg(feature = "samples")]
pub fn decode_sample(bytes: &[u8]) -> Result<SampleBuffer, crate::error::EngineError> {
    if bytes.len() >= 4 && &bytes[..4] == b"RIFF" {
        decode_wav(bytes)
    } else {
        decode_mp3(bytes)
    }
}

#[cfg(feature = "samples")]
fn decode_wav(bytes: &[u8]) -> Result<SampleBuffer, crate::error::EngineError> {
    use crate::error::EngineError;

    let reader = hound::WavReader::new(std::io::Cursor::new(bytes))
        .map_err(|e| EngineError::SampleDecode(e.to_string()))?;
    let spec = reader.spec();
    let channels = spec.channels.max(1) as usize;

    let interleaved: Vec<f32> = match spec.sample_format {
        hound::SampleFormat::Float => reader
            .into_samples::<f32>()
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| EngineError::SampleDecode(e.to_string()))?,
        hound::SampleFormat::Int => {
            let max_val = (1i64 << (spec.bits_per_sample.max(1) - 1)) as f32;
            reader
                .into_samples::<i32>()
                .map(|s| s.map(|v| v as f32 / max_val))
                .collect::<Result<Vec<_>, _>>()
                .map_err(|e| EngineError::SampleDecode(e.to_string()))?
        }
    };

    let data = interleaved
        .chunks(channels)
        .map(|frame| frame.iter().sum::<f32>() / frame.len() as f32)
        .collect();
    Ok(SampleBuffer::new(data, spec.sample_rate as f64))
}

#[cfg(feature = "samples")]
fn decode_mp3(bytes: &[u8]) -> Result<SampleBuffer, crate::error::EngineError> {
    use crate::error::EngineError;

    let mut decoder = minimp3::Decoder::new(std::io::Cursor::new(bytes));
    let mut data = Vec::new();
    let mut sample_rate = 0;
    loop {
        match decoder.next_frame() {
            Ok(frame) => {
                sample_rate = frame.sample_rate;
                let chunk = SampleBuffer::from_i16(&frame.data, frame.channels, 0.0);
                data.extend_from_slice(&chunk.data);
            }
            Err(minimp3::Error::Eof) => break,
            Err(e) => return Err(EngineError::SampleDecode(e.to_string())),
        }
    }
    if sample_rate <= 0 {
        return Err(EngineError::SampleDecode("no MP3 frames found".into()));
    }
    Ok(SampleBuffer::new(data, sample_rate as f64))
}
