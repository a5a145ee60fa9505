use thiserror::Error;

/// Errors surfaced on the host-facing API.
///
/// Nothing on the audio path returns these: the render loop resolves bad data
/// to defaults and keeps producing samples.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("control queue is full, message not delivered")]
    ControlQueueFull,

    #[error("invalid engine config: {0}")]
    InvalidConfig(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("unknown effect type '{0}'")]
    UnknownEffectType(String),

    #[error("unknown envelope type '{0}'")]
    UnknownEnvelopeType(String),

    #[error("could not decode sample data: {0}")]
    SampleDecode(String),
}
