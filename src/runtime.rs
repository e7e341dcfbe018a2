//! Runtime events emitted by the turn controller for presentation layers.
//!
//! These are one-way notifications. Sending never blocks the control flow
//! and a missing or lagging subscriber is never an error.

use crate::pipeline::messages::{DialogueResponse, VadUpdate};
use serde::Serialize;

/// Assistant turn-taking state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AssistantState {
    /// Capture disarmed.
    Idle,
    /// Capture armed, waiting for speech.
    Listening,
    /// User speech segment open.
    CapturingSpeech,
    /// Speech ended, collecting trailing transcript fragments.
    AwaitingTranscript,
    /// Transcript sent to the dialogue backend.
    Dispatching,
    /// Response being spoken.
    Speaking,
}

impl AssistantState {
    /// Avatar emotion shown for this state.
    pub fn emotion(self) -> Emotion {
        match self {
            Self::Idle => Emotion::Calm,
            Self::Listening | Self::CapturingSpeech => Emotion::Listening,
            Self::AwaitingTranscript | Self::Dispatching => Emotion::Thinking,
            Self::Speaking => Emotion::Happy,
        }
    }

    /// Default status line for this state.
    pub fn status_message(self) -> &'static str {
        match self {
            Self::Idle => "Standby",
            Self::Listening => "Listening...",
            Self::CapturingSpeech => "I hear you...",
            Self::AwaitingTranscript => "Got it...",
            Self::Dispatching => "Thinking...",
            Self::Speaking => "Speaking...",
        }
    }
}

/// Avatar emotion palette.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Emotion {
    Calm,
    Happy,
    Excited,
    Sad,
    Serious,
    Thinking,
    Listening,
}

/// Events that describe what the assistant is doing "right now".
#[derive(Debug, Clone)]
pub enum RuntimeEvent {
    /// Turn state changed.
    StatusChange {
        state: AssistantState,
        message: String,
    },
    /// Emotion the avatar should display.
    Emotion(Emotion),
    /// A transcript fragment attributed to the current turn.
    Transcript { text: String, is_final: bool },
    /// Response obtained for the current turn (real or fallback).
    Response(DialogueResponse),
    /// The backend was unavailable and a fallback response was used.
    Degraded { reason: String },
    /// Assistant playback started.
    SpeakingStart,
    /// Assistant playback finished (normally or with a synthesis error).
    SpeakingEnd,
    /// Playback was cancelled by barge-in or an explicit interrupt.
    Interrupted { generation: u64 },
    /// Per-frame VAD telemetry.
    Vad(VadUpdate),
    /// A reportable error (capture failure, permission denial).
    Error(String),
}
