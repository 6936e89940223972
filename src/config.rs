use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::RegisterStreamError;

pub const MAX_STREAM_NAME: usize = 64;

const DEFAULT_SEGMENT_DURATION: Duration = Duration::from_millis(500);
const DEFAULT_DETECTION_INTERVAL_SECS: u64 = 10;

/// Transport hint handed to the input opener. The opener decides what it
/// means for a given scheme (e.g. RTSP interleaved vs UDP).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportProtocol {
    #[default]
    Tcp,
    Udp,
}

/// Immutable per-run snapshot of a single stream's configuration. Live edits
/// swap the whole snapshot in the stream registry; readers always observe a
/// consistent copy. Unknown keys in the serialized form are ignored.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamConfig {
    pub name: String,
    pub url: String,

    #[serde(default)]
    pub protocol: TransportProtocol,

    /// Target HLS segment duration in seconds. Values <= 0 fall back to 0.5 s.
    #[serde(default)]
    pub segment_duration: f64,

    #[serde(default)]
    pub record_audio: bool,

    #[serde(default)]
    pub detection_based_recording: bool,

    #[serde(default)]
    pub detection_model: String,

    #[serde(default)]
    pub detection_threshold: f32,

    /// Minimum seconds between detection submissions for this stream.
    #[serde(default = "default_detection_interval")]
    pub detection_interval: u64,
}

fn default_detection_interval() -> u64 {
    DEFAULT_DETECTION_INTERVAL_SECS
}

impl StreamConfig {
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    pub fn effective_segment_duration(&self) -> Duration {
        if self.segment_duration > 0.0 {
            Duration::from_secs_f64(self.segment_duration)
        } else {
            DEFAULT_SEGMENT_DURATION
        }
    }

    pub fn detection_interval(&self) -> Duration {
        Duration::from_secs(self.detection_interval)
    }

    pub(crate) fn validate(&self) -> Result<(), RegisterStreamError> {
        if self.name.is_empty() {
            return Err(RegisterStreamError::EmptyName);
        }
        if self.name.len() > MAX_STREAM_NAME {
            return Err(RegisterStreamError::NameTooLong {
                name: self.name.clone(),
                max: MAX_STREAM_NAME,
            });
        }
        Ok(())
    }
}
