//! Voice Activity Detection with hysteresis.
//!
//! Each frame is scored by a [`SpeechProbability`] model, then a four-state
//! machine confirms speech start only after `min_speech_duration` of
//! continuous above-threshold frames and speech end only after
//! `min_silence_duration` of continuous below-threshold frames.
//!
//! Durations are measured on frame timestamps, never on the wall clock, so
//! the engine is pure computation and replays deterministically.

pub mod probability;
pub mod spectrum;

pub use probability::{EnergyProbability, FrameEnergy, SpeechProbability};
pub use spectrum::SpectrumAnalyzer;

use crate::config::VadConfig;
use crate::pipeline::messages::{AudioFrame, SpeechSegment, VadUpdate};
use std::time::Duration;
use tracing::{debug, info};

/// Detector state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VadState {
    /// No speech.
    Idle,
    /// Above threshold, not yet long enough to confirm.
    SpeechPending,
    /// Confirmed speech; a segment is open.
    SpeechActive,
    /// Below threshold inside a segment, not yet long enough to close it.
    SilencePending,
}

/// A confirmed speech boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VadTransition {
    /// Speech start confirmed; `segment` is now open.
    SpeechStart { segment: SpeechSegment },
    /// Speech end confirmed; `segment` is closed.
    SpeechEnd { segment: SpeechSegment },
}

/// Result of feeding one frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VadOutput {
    /// Telemetry emitted for every frame.
    pub update: VadUpdate,
    /// Boundary confirmed by this frame, if any.
    pub transition: Option<VadTransition>,
}

/// Hysteresis voice activity detector.
pub struct VadEngine {
    model: Box<dyn SpeechProbability>,
    threshold: f32,
    min_speech: Duration,
    min_silence: Duration,
    low_band_cutoff_hz: f32,
    state: VadState,
    /// Timestamp of the first frame of the current above-threshold run.
    pending_since: Option<Duration>,
    /// Timestamp of the first frame of the current below-threshold run.
    silence_since: Option<Duration>,
    segment: Option<SpeechSegment>,
}

impl VadEngine {
    /// Create an engine using the built-in energy model.
    pub fn new(config: &VadConfig) -> Self {
        Self::with_model(config, Box::new(EnergyProbability::new(config)))
    }

    /// Create an engine around a custom probability model.
    pub fn with_model(config: &VadConfig, model: Box<dyn SpeechProbability>) -> Self {
        info!(
            "VAD initialized: threshold={}, min_speech={}ms, min_silence={}ms",
            config.threshold, config.min_speech_duration_ms, config.min_silence_duration_ms
        );
        Self {
            model,
            threshold: config.threshold,
            min_speech: config.min_speech(),
            min_silence: config.min_silence(),
            low_band_cutoff_hz: config.low_band_cutoff_hz,
            state: VadState::Idle,
            pending_since: None,
            silence_since: None,
            segment: None,
        }
    }

    pub fn state(&self) -> VadState {
        self.state
    }

    /// Whether a speech segment is open.
    pub fn is_speech_active(&self) -> bool {
        matches!(self.state, VadState::SpeechActive | VadState::SilencePending)
    }

    /// The open segment, if any.
    pub fn open_segment(&self) -> Option<SpeechSegment> {
        self.segment
    }

    /// Score one frame and advance the state machine.
    pub fn feed(&mut self, frame: &AudioFrame) -> VadOutput {
        let probability = self.model.probability(frame);
        let level = FrameEnergy::measure(frame, self.low_band_cutoff_hz).level;
        let transition = self.advance(probability > self.threshold, frame);

        VadOutput {
            update: VadUpdate {
                probability,
                is_speech_active: self.is_speech_active(),
                level,
            },
            transition,
        }
    }

    fn advance(&mut self, is_speech: bool, frame: &AudioFrame) -> Option<VadTransition> {
        match (self.state, is_speech) {
            (VadState::Idle, true) => {
                self.state = VadState::SpeechPending;
                self.pending_since = Some(frame.timestamp);
                self.try_confirm_start(frame)
            }
            (VadState::Idle, false) => None,
            (VadState::SpeechPending, true) => self.try_confirm_start(frame),
            (VadState::SpeechPending, false) => {
                debug!("speech candidate dropped before confirmation");
                self.state = VadState::Idle;
                self.pending_since = None;
                None
            }
            (VadState::SpeechActive, true) => None,
            (VadState::SpeechActive, false) => {
                self.state = VadState::SilencePending;
                self.silence_since = Some(frame.timestamp);
                self.try_confirm_end(frame)
            }
            (VadState::SilencePending, true) => {
                self.state = VadState::SpeechActive;
                self.silence_since = None;
                None
            }
            (VadState::SilencePending, false) => self.try_confirm_end(frame),
        }
    }

    fn try_confirm_start(&mut self, frame: &AudioFrame) -> Option<VadTransition> {
        let since = self.pending_since?;
        if frame.end().saturating_sub(since) < self.min_speech {
            return None;
        }
        self.state = VadState::SpeechActive;
        self.pending_since = None;
        let segment = SpeechSegment {
            start: since,
            end: None,
        };
        self.segment = Some(segment);
        info!("speech started at {:.2}s", since.as_secs_f32());
        Some(VadTransition::SpeechStart { segment })
    }

    fn try_confirm_end(&mut self, frame: &AudioFrame) -> Option<VadTransition> {
        let since = self.silence_since?;
        if frame.end().saturating_sub(since) < self.min_silence {
            return None;
        }
        self.state = VadState::Idle;
        self.silence_since = None;
        let mut segment = self.segment.take().unwrap_or(SpeechSegment {
            start: since,
            end: None,
        });
        segment.end = Some(since);
        info!("speech ended at {:.2}s", since.as_secs_f32());
        Some(VadTransition::SpeechEnd { segment })
    }

    /// Return to `Idle` without emitting anything (stop / re-arm).
    pub fn reset(&mut self) {
        self.state = VadState::Idle;
        self.pending_since = None;
        self.silence_since = None;
        self.segment = None;
    }
}
