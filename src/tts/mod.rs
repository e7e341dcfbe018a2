//! Speech output: one active utterance at a time, cancellable for barge-in.
//!
//! Every [`SpeechOutputController::speak`] call gets a fresh generation id.
//! The engine reports back tagged with that id, and only events for the
//! current generation produce a [`SpeechCompletion`]. Anything else is a
//! late report from a cancelled utterance and is dropped.

mod voice;

pub use voice::{Voice, select_voice};

use crate::config::TtsConfig;
use crate::error::{Result, SpeechError};
use tracing::{debug, info, warn};

/// One synthesis job handed to the engine.
#[derive(Debug, Clone, PartialEq)]
pub struct SynthesisRequest {
    /// Generation id the engine must echo back in its events.
    pub generation: u64,
    pub text: String,
    pub locale: String,
    pub rate: f32,
    pub pitch: f32,
    /// `None` keeps the engine default.
    pub voice: Option<Voice>,
}

/// Events delivered by a synthesis engine onto the control flow.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SynthesisEvent {
    /// Playback began.
    Started { generation: u64 },
    /// Playback completed normally.
    Finished { generation: u64 },
    /// Playback failed or was aborted by the engine.
    Failed { generation: u64, error: String },
}

impl SynthesisEvent {
    pub fn generation(&self) -> u64 {
        match self {
            Self::Started { generation }
            | Self::Finished { generation }
            | Self::Failed { generation, .. } => *generation,
        }
    }
}

/// External text-to-speech engine.
pub trait SpeechSynthesizer: Send {
    /// Voices currently available. May be empty until the engine is ready.
    fn voices(&self) -> Vec<Voice>;

    /// Queue an utterance for playback.
    ///
    /// # Errors
    ///
    /// Returns [`SpeechError::Tts`] if the engine rejects the request.
    fn speak(&mut self, request: SynthesisRequest) -> Result<()>;

    /// Stop playback immediately.
    fn cancel(&mut self);
}

/// Outcome of the current utterance, reported once per generation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpeechCompletion {
    pub generation: u64,
    /// Engine error, if playback did not finish normally.
    pub error: Option<String>,
}

/// Owns the synthesis engine and the speak generation counter.
pub struct SpeechOutputController {
    engine: Box<dyn SpeechSynthesizer>,
    config: TtsConfig,
    generation: u64,
    active: Option<u64>,
}

impl SpeechOutputController {
    pub fn new(engine: Box<dyn SpeechSynthesizer>, config: &TtsConfig) -> Self {
        Self {
            engine,
            config: config.clone(),
            generation: 0,
            active: None,
        }
    }

    /// Speak `text`, cancelling any utterance still playing.
    ///
    /// Returns the generation id of the new utterance.
    ///
    /// # Errors
    ///
    /// Returns [`SpeechError::Tts`] when the text is blank or the engine
    /// rejects it; no utterance is active afterwards.
    pub fn speak(&mut self, text: &str) -> Result<u64> {
        if self.active.is_some() {
            self.cancel();
        }
        self.generation += 1;
        let generation = self.generation;

        let text = text.trim();
        if text.is_empty() {
            return Err(SpeechError::Tts("nothing to speak".into()));
        }

        let voices = self.engine.voices();
        let voice = select_voice(&voices, &self.config).cloned();
        if let Some(v) = &voice {
            debug!("using voice {} ({})", v.name, v.lang);
        }

        self.engine.speak(SynthesisRequest {
            generation,
            text: text.to_owned(),
            locale: self.config.locale.clone(),
            rate: self.config.rate,
            pitch: self.config.pitch,
            voice,
        })?;
        self.active = Some(generation);
        info!(generation, "speaking {} chars", text.chars().count());
        Ok(generation)
    }

    /// Stop the active utterance. Returns its generation if one was playing.
    ///
    /// The generation counter advances so that any late engine report for
    /// the cancelled utterance is ignored.
    pub fn cancel(&mut self) -> Option<u64> {
        let cancelled = self.active.take()?;
        self.engine.cancel();
        self.generation += 1;
        info!(generation = cancelled, "speech cancelled");
        Some(cancelled)
    }

    /// Feed an engine event. Yields a completion for the active generation
    /// only, and at most once.
    pub fn on_event(&mut self, event: SynthesisEvent) -> Option<SpeechCompletion> {
        let generation = event.generation();
        if self.active != Some(generation) {
            debug!(generation, "ignoring stale synthesis event");
            return None;
        }
        match event {
            SynthesisEvent::Started { .. } => None,
            SynthesisEvent::Finished { .. } => {
                self.active = None;
                Some(SpeechCompletion {
                    generation,
                    error: None,
                })
            }
            SynthesisEvent::Failed { error, .. } => {
                warn!(generation, "synthesis failed: {error}");
                self.active = None;
                Some(SpeechCompletion {
                    generation,
                    error: Some(error),
                })
            }
        }
    }
}
