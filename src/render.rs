//! Offline rendering: drive an [`AudioProcessor`] without an audio device and
//! export the result as WAV.

use crate::config::EngineConfig;
use crate::dsp::voice::{BuiltinVoiceFactory, VoiceFactory};
use crate::engine::{AudioProcessor, create_engine};
use crate::error::EngineError;
use crate::messages::{ControlMessage, TransportState};
use crate::project::Project;

/// Rendered stereo audio.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RenderOutput {
    pub left: Vec<f32>,
    pub right: Vec<f32>,
    pub sample_rate: f64,
}

impl RenderOutput {
    pub fn len(&self) -> usize {
        self.left.len()
    }

    pub fn is_empty(&self) -> bool {
        self.left.is_empty()
    }

    /// Interleaved 16-bit PCM.
    pub fn to_pcm_i16(&self) -> Vec<i16> {
        let mut stereo = Vec::with_capacity(self.left.len() * 2);
        for (&l, &r) in self.left.iter().zip(&self.right) {
            stereo.push(to_i16(l));
            stereo.push(to_i16(r));
        }
        stereo
    }
}

fn to_i16(sample: f32) -> i16 {
    (sample as f64 * 32767.0).round().clamp(-32768.0, 32767.0) as i16
}

/// Render `seconds` of `project` playing from beat 0.
pub fn render_project(
    project: Project,
    config: EngineConfig,
    factory: Box<dyn VoiceFactory>,
    seconds: f64,
) -> Result<RenderOutput, EngineError> {
    if !(seconds.is_finite() && seconds >= 0.0) {
        return Err(EngineError::InvalidConfig(format!(
            "render length must be >= 0 seconds, got {seconds}"
        )));
    }
    let frames = (seconds * config.sample_rate).round() as usize;
    let (_handle, mut processor) = create_engine(config, factory)?;
    processor.apply_control(ControlMessage::LoadProject(Box::new(project)));
    processor.apply_control(ControlMessage::SetTransport {
        state: TransportState::Play,
        position: 0.0,
    });
    Ok(render_frames(&mut processor, frames))
}

/// Pull `frames` frames out of an already configured processor, one buffer
/// at a time.
pub fn render_frames(processor: &mut AudioProcessor, frames: usize) -> RenderOutput {
    let block = processor.config().buffer_size.max(1);
    let mut out = RenderOutput {
        left: vec![0.0; frames],
        right: vec![0.0; frames],
        sample_rate: processor.config().sample_rate,
    };
    for (left, right) in out.left.chunks_mut(block).zip(out.right.chunks_mut(block)) {
        processor.process(&mut [left, right]);
    }
    out
}

/// Render one loop of `project` with the built-in voices and encode it as a
/// 16-bit stereo WAV.
pub fn render_wav(project: Project, sample_rate: u32) -> Result<Vec<u8>, EngineError> {
    let config = EngineConfig::new(sample_rate as f64, 512);
    let (_handle, mut processor) = create_engine(config, Box::new(BuiltinVoiceFactory))?;
    processor.apply_control(ControlMessage::LoadProject(Box::new(project)));
    let beats = processor.project().loop_length_beats();
    let frames = processor.playback().beats_to_samples(beats) as usize;
    processor.apply_control(ControlMessage::SetTransport {
        state: TransportState::Play,
        position: 0.0,
    });
    let audio = render_frames(&mut processor, frames);
    Ok(encode_wav(&audio.to_pcm_i16(), sample_rate, 2))
}

/// Encode interleaved i16 PCM samples to a WAV byte buffer.
pub fn encode_wav(samples: &[i16], sample_rate: u32, channels: u16) -> Vec<u8> {
    let bits_per_sample: u16 = 16;
    let byte_rate = sample_rate * channels as u32 * (bits_per_sample as u32 / 8);
    let block_align = channels * (bits_per_sample / 8);
    let data_size = (samples.len() * 2) as u32;
    let file_size = 36 + data_size;

    let mut buf = Vec::with_capacity(44 + data_size as usize);

    buf.extend_from_slice(b"RIFF");
    buf.extend_from_slice(&file_size.to_le_bytes());
    buf.extend_from_slice(b"WAVE");

    buf.extend_from_slice(b"fmt ");
    buf.extend_from_slice(&16u32.to_le_bytes());
    buf.extend_from_slice(&1u16.to_le_bytes()); // PCM
    buf.extend_from_slice(&channels.to_le_bytes());
    buf.extend_from_slice(&sample_rate.to_le_bytes());
    buf.extend_from_slice(&byte_rate.to_le_bytes());
    buf.extend_from_slice(&block_align.to_le_bytes());
    buf.extend_from_slice(&bits_per_sample.to_le_bytes());

    buf.extend_from_slice(b"data");
    buf.extend_from_slice(&data_size.to_le_bytes());
    for &sample in samples {
        buf.extend_from_slice(&sample.to_le_bytes());
    }

    buf
}
