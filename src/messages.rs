//! Host ↔ engine messages.
//!
//! Both directions are serde enums tagged by `type` with camelCase fields, so
//! the JSON a host posts maps one-to-one onto a variant.

use serde::{Deserialize, Serialize};

use crate::error::EngineError;
use crate::project::{AutomationCurve, PatternNode, Project, Settings, Track, ViewMode};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportState {
    Play,
    Stop,
}

/// Host → engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum ControlMessage {
    LoadProject(Box<Project>),
    SetTransport {
        state: TransportState,
        /// Position in beats.
        #[serde(default)]
        position: f64,
    },
    SetTempo {
        bpm: f64,
    },
    UpdatePatternTree {
        track_id: String,
        tree: PatternNode,
        #[serde(default)]
        base_meter: Option<f64>,
    },
    UpdateTrackSettings {
        track_id: String,
        settings: Settings,
    },
    UpdateTrackVolume {
        track_id: String,
        value: f64,
    },
    UpdateTrackPan {
        track_id: String,
        value: f64,
    },
    UpdateTrackMute {
        track_id: String,
        value: bool,
    },
    UpdateTrackSolo {
        track_id: String,
        value: bool,
    },
    UpdateTrack {
        track_id: String,
        track: Track,
    },
    RemoveTrack {
        track_id: String,
    },
    UpdateTimelineTrackVolume {
        track_id: String,
        value: f64,
    },
    UpdateTimelineTrackMute {
        track_id: String,
        value: bool,
    },
    UpdateTimelineTrackSolo {
        track_id: String,
        value: bool,
    },
    UpdateEffect {
        effect_id: String,
        settings: Settings,
    },
    UpdateEnvelope {
        envelope_id: String,
        settings: Settings,
    },
    /// Mono sample data for a sample-playing track.
    LoadSample {
        track_id: String,
        samples: Vec<f32>,
        sample_rate: f64,
    },
    SetViewMode {
        view_mode: ViewMode,
    },
    /// Set one automation curve, or remove it when `curve` is absent.
    SetAutomation {
        key: String,
        #[serde(default)]
        curve: Option<AutomationCurve>,
    },
}

impl ControlMessage {
    pub fn from_json(json: &str) -> Result<Self, EngineError> {
        Ok(serde_json::from_str(json)?)
    }

    /// The `type` tag, for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            ControlMessage::LoadProject(_) => "loadProject",
            ControlMessage::SetTransport { .. } => "setTransport",
            ControlMessage::SetTempo { .. } => "setTempo",
            ControlMessage::UpdatePatternTree { .. } => "updatePatternTree",
            ControlMessage::UpdateTrackSettings { .. } => "updateTrackSettings",
            ControlMessage::UpdateTrackVolume { .. } => "updateTrackVolume",
            ControlMessage::UpdateTrackPan { .. } => "updateTrackPan",
            ControlMessage::UpdateTrackMute { .. } => "updateTrackMute",
            ControlMessage::UpdateTrackSolo { .. } => "updateTrackSolo",
            ControlMessage::UpdateTrack { .. } => "updateTrack",
            ControlMessage::RemoveTrack { .. } => "removeTrack",
            ControlMessage::UpdateTimelineTrackVolume { .. } => "updateTimelineTrackVolume",
            ControlMessage::UpdateTimelineTrackMute { .. } => "updateTimelineTrackMute",
            ControlMessage::UpdateTimelineTrackSolo { .. } => "updateTimelineTrackSolo",
            ControlMessage::UpdateEffect { .. } => "updateEffect",
            ControlMessage::UpdateEnvelope { .. } => "updateEnvelope",
            ControlMessage::LoadSample { .. } => "loadSample",
            ControlMessage::SetViewMode { .. } => "setViewMode",
            ControlMessage::SetAutomation { .. } => "setAutomation",
        }
    }
}

/// Engine → host.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum StatusEvent {
    PlaybackPosition {
        beat: f64,
    },
    /// Ids of events triggered since the previous update.
    PlaybackUpdate {
        beat: f64,
        event_ids: Vec<String>,
    },
    QuietPeriod {
        beat: f64,
        duration_seconds: f64,
    },
    Debug {
        message: String,
    },
}
