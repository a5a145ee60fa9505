//! The real-time engine: everything that runs on the audio thread.
//!
//! [`create_engine`] wires the queues to an [`AudioProcessor`]. The host keeps
//! the returned [`EngineHandle`]; the processor moves to the audio callback.

pub mod automation;
pub mod effects;
pub mod envelopes;
pub mod mixer;
pub mod playback;
pub mod processor;
pub mod scheduler;
pub mod synth_manager;
pub mod track_state;

pub use processor::AudioProcessor;

use crate::channel::{EngineHandle, queues};
use crate::config::EngineConfig;
use crate::dsp::voice::VoiceFactory;
use crate::error::EngineError;

/// Validate `config` and build a connected host handle and audio processor.
pub fn create_engine(
    config: EngineConfig,
    factory: Box<dyn VoiceFactory>,
) -> Result<(EngineHandle, AudioProcessor), EngineError> {
    config.validate()?;
    let (handle, control, status) = queues(
        config.control_queue_capacity,
        config.status_queue_capacity,
        config.max_pending_highlights,
    );
    log::debug!(
        "engine created: {} Hz, {} frame buffers",
        config.sample_rate,
        config.buffer_size
    );
    Ok((handle, AudioProcessor::new(config, control, status, factory)))
}
