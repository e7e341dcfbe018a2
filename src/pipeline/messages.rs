//! Message types passed between pipeline stages.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// A fixed-length block of frequency-bin magnitudes from the capture source.
///
/// Bins are normalised to `[0, 1]` and cover `0..sample_rate / 2` evenly.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioFrame {
    /// Offset of the first sample from the start of the capture session.
    pub timestamp: Duration,
    /// Wall-clock span covered by this frame.
    pub duration: Duration,
    /// Normalised magnitude per frequency bin.
    pub bins: Vec<f32>,
    /// Width of one bin in Hz.
    pub bin_hz: f32,
}

impl AudioFrame {
    /// Build a frame directly from spectrum bins.
    pub fn from_bins(timestamp: Duration, duration: Duration, bins: Vec<f32>, bin_hz: f32) -> Self {
        Self {
            timestamp,
            duration,
            bins,
            bin_hz,
        }
    }

    /// End of the span covered by this frame.
    pub fn end(&self) -> Duration {
        self.timestamp + self.duration
    }

    pub fn is_empty(&self) -> bool {
        self.bins.is_empty()
    }
}

/// A confirmed span of user speech.
///
/// Opened on speech start, closed with `end` on speech end.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpeechSegment {
    /// Capture time at which speech was first detected.
    pub start: Duration,
    /// Capture time at which speech end was confirmed.
    pub end: Option<Duration>,
}

impl SpeechSegment {
    pub fn is_open(&self) -> bool {
        self.end.is_none()
    }
}

/// A transcript fragment from the speech recognizer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transcript {
    /// The recognised text.
    pub text: String,
    /// Whether this is a final (vs interim) result.
    pub is_final: bool,
}

impl Transcript {
    pub fn interim(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            is_final: false,
        }
    }

    pub fn final_text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            is_final: true,
        }
    }
}

/// The reply produced for one user utterance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DialogueResponse {
    /// Text to speak.
    pub text: String,
    /// Whether the text was generated locally instead of by the backend.
    pub from_mock: bool,
}

/// Per-frame VAD telemetry for presentation layers.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VadUpdate {
    /// Speech probability in `[0, 1]`.
    pub probability: f32,
    /// Whether a speech segment is currently confirmed.
    pub is_speech_active: bool,
    /// Mean bin level in `[0, 1]`.
    pub level: f32,
}
