pub mod channel;
pub mod config;
pub mod dsp;
pub mod engine;
pub mod error;
pub mod messages;
pub mod project;
pub mod render;

use crate::channel::EngineHandle;
use crate::config::EngineConfig;
use crate::dsp::voice::BuiltinVoiceFactory;
use crate::engine::{AudioProcessor, create_engine};
use crate::error::EngineError;
use crate::messages::ControlMessage;
use crate::project::Project;
use wasm_bindgen::prelude::*;

/// The crate version, read from Cargo.toml at compile time.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// WASM-exposed: return the beatgrid-core version string.
#[wasm_bindgen]
pub fn core_version() -> String {
    VERSION.to_string()
}

fn to_js(e: EngineError) -> JsValue {
    JsValue::from_str(&e.to_string())
}

/// WASM-exposed: an engine living inside an AudioWorklet.
///
/// The worklet's `port.onmessage` forwards host messages to
/// [`WorkletEngine::post_message`], its `process()` calls
/// [`WorkletEngine::process`], and status events are collected with
/// [`WorkletEngine::take_status`] and posted back to the host.
#[wasm_bindgen]
pub struct WorkletEngine {
    handle: EngineHandle,
    processor: AudioProcessor,
}

#[wasm_bindgen]
impl WorkletEngine {
    #[wasm_bindgen(constructor)]
    pub fn new(sample_rate: f64, buffer_size: usize) -> Result<WorkletEngine, JsValue> {
        Self::build(EngineConfig::new(sample_rate, buffer_size)).map_err(to_js)
    }

    /// Build from a JSON engine config; missing fields take defaults.
    #[wasm_bindgen(js_name = withConfig)]
    pub fn with_config(json: &str) -> Result<WorkletEngine, JsValue> {
        EngineConfig::from_json(json).and_then(Self::build).map_err(to_js)
    }

    fn build(config: EngineConfig) -> Result<WorkletEngine, EngineError> {
        let (handle, processor) = create_engine(config, Box::new(BuiltinVoiceFactory))?;
        Ok(WorkletEngine { handle, processor })
    }

    /// Queue one control message (a `{ type, ... }` object).
    #[wasm_bindgen(js_name = postMessage)]
    pub fn post_message(&mut self, message: JsValue) -> Result<(), JsValue> {
        let message: ControlMessage = serde_wasm_bindgen::from_value(message)?;
        self.handle.send(message).map_err(to_js)
    }

    /// Queue one control message given as a JSON string.
    #[wasm_bindgen(js_name = postJson)]
    pub fn post_json(&mut self, json: &str) -> Result<(), JsValue> {
        self.handle.send_json(json).map_err(to_js)
    }

    /// Decode WAV/MP3 bytes and queue them as `track_id`'s sample.
    #[cfg(feature = "samples")]
    #[wasm_bindgen(js_name = loadSampleBytes)]
    pub fn load_sample_bytes(&mut self, track_id: &str, bytes: &[u8]) -> Result<(), JsValue> {
        let buffer = dsp::sampler::decode_sample(bytes).map_err(to_js)?;
        self.handle
            .send(ControlMessage::LoadSample {
                track_id: track_id.to_string(),
                samples: buffer.data,
                sample_rate: buffer.sample_rate,
            })
            .map_err(to_js)
    }

    /// Render one block into the worklet's output channels.
    pub fn process(&mut self, left: &mut [f32], right: &mut [f32]) {
        self.processor.process(&mut [left, right]);
    }

    /// Render one block into a single (mono) output channel.
    #[wasm_bindgen(js_name = processMono)]
    pub fn process_mono(&mut self, output: &mut [f32]) {
        self.processor.process(&mut [output]);
    }

    /// Status events produced since the last call, as an array of objects.
    #[wasm_bindgen(js_name = takeStatus)]
    pub fn take_status(&mut self) -> Result<JsValue, JsValue> {
        Ok(serde_wasm_bindgen::to_value(&self.handle.drain_status())?)
    }

    #[wasm_bindgen(js_name = currentBeat)]
    pub fn current_beat(&self) -> f64 {
        self.processor.playback().current_beat()
    }

    #[wasm_bindgen(js_name = isPlaying)]
    pub fn is_playing(&self) -> bool {
        self.processor.playback().is_playing()
    }
}

/// WASM-exposed: render one loop of a project object to a WAV byte array.
#[wasm_bindgen]
pub fn render_project_wav(project: JsValue, sample_rate: u32) -> Result<Vec<u8>, JsValue> {
    let project: Project = serde_wasm_bindgen::from_value(project)?;
    render::render_wav(project, sample_rate).map_err(to_js)
}

/// WASM-exposed: render one loop of a JSON project to a WAV byte array.
#[wasm_bindgen]
pub fn render_project_json_wav(json: &str, sample_rate: u32) -> Result<Vec<u8>, JsValue> {
    let project: Project =
        serde_json::from_str(json).map_err(|e| JsValue::from_str(&format!("{e}")))?;
    render::render_wav(project, sample_rate).map_err(to_js)
}
