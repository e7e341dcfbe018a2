//! Xiao T: duplex voice assistant core.
//!
//! Turns a stream of microphone frames into conversational turns:
//! Microphone → VAD → STT → dialogue backend → TTS → Speaker
//!
//! # Architecture
//!
//! A single [`TurnController`] owns the assistant state and consumes every
//! input on one control flow:
//! - **Capture**: spectrum frames from a [`audio::CaptureSource`]
//! - **VAD**: hysteresis over an energy speech-probability model
//! - **STT**: an external recognizer, gated to the active speech window
//! - **Dialogue**: HTTP backend with a local fallback that always answers
//! - **TTS**: an external synthesizer with generation-tagged cancellation
//!
//! Barge-in cancels playback as soon as the user starts speaking; stale
//! completions from cancelled work are recognised by generation counters
//! and ignored.
//!
//! The [`backend`] module is the companion HTTP service that forwards
//! transcripts to an agent CLI.

pub mod audio;
pub mod backend;
pub mod config;
pub mod diagnostics;
pub mod dialogue;
pub mod error;
pub mod pipeline;
pub mod runtime;
pub mod stt;
pub mod tts;
pub mod vad;

pub use config::AssistantConfig;
pub use error::{Result, SpeechError};
pub use pipeline::coordinator::{TurnAdapters, TurnCommand, TurnController, TurnHandle};
pub use runtime::{AssistantState, Emotion, RuntimeEvent};
