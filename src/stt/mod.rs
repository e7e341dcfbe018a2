//! Transcription adapter around an external speech-to-text engine.
//!
//! The engine streams interim and final fragments; the adapter only keeps
//! fragments that arrive while a speech segment is open or inside the
//! post-segment grace window, so late text from a previous turn never leaks
//! into the next one.

use crate::config::SttConfig;
use crate::error::Result;
use crate::pipeline::messages::Transcript;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Events delivered by a speech recognizer onto the control flow.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecognizerEvent {
    /// An interim or final transcript fragment.
    Fragment(Transcript),
    /// The engine failed. `permission` marks a microphone/recognition denial.
    Error { message: String, permission: bool },
    /// The engine stopped on its own (session timeout, end of stream).
    Ended,
}

/// External speech-to-text engine.
///
/// Implementations deliver results through the [`RecognizerEvent`] channel
/// they were constructed with, never by calling back into the adapter.
pub trait SpeechRecognizer: Send {
    /// Begin continuous recognition.
    ///
    /// # Errors
    ///
    /// Returns [`crate::SpeechError::Permission`] when recognition is not allowed,
    /// or [`crate::SpeechError::Stt`] for any other start failure.
    fn start(&mut self, language: &str) -> Result<()>;

    /// Stop recognition. Stopping an idle engine is a no-op.
    fn stop(&mut self);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Window {
    Closed,
    Open,
    Grace { until: Instant },
}

/// Gates recognizer output to the active speech window.
pub struct TranscriptionAdapter {
    recognizer: Box<dyn SpeechRecognizer>,
    config: SttConfig,
    running: bool,
    window: Window,
    final_text: String,
    interim_text: String,
}

impl TranscriptionAdapter {
    pub fn new(recognizer: Box<dyn SpeechRecognizer>, config: &SttConfig) -> Self {
        Self {
            recognizer,
            config: config.clone(),
            running: false,
            window: Window::Closed,
            final_text: String::new(),
            interim_text: String::new(),
        }
    }

    /// Start the engine if it is not already running.
    ///
    /// # Errors
    ///
    /// Propagates the engine's start failure.
    pub fn start(&mut self) -> Result<()> {
        if self.running {
            return Ok(());
        }
        self.recognizer.start(&self.config.language)?;
        self.running = true;
        debug!("recognizer started");
        Ok(())
    }

    /// Stop the engine and close the window.
    pub fn stop(&mut self) {
        if self.running {
            self.recognizer.stop();
            self.running = false;
            debug!("recognizer stopped");
        }
        self.window = Window::Closed;
    }

    /// Record that the engine stopped by itself.
    pub fn mark_stopped(&mut self) {
        self.running = false;
    }

    /// Begin a new utterance: discard anything buffered and accept fragments.
    pub fn open_segment(&mut self) {
        self.final_text.clear();
        self.interim_text.clear();
        self.window = Window::Open;
    }

    /// Re-open the current utterance without discarding buffered text.
    pub fn resume_segment(&mut self) {
        self.window = Window::Open;
    }

    /// Speech ended: keep accepting fragments until `now + grace`.
    pub fn close_segment(&mut self, now: Instant, grace: Duration) {
        self.window = Window::Grace { until: now + grace };
    }

    /// Whether a fragment arriving at `now` belongs to the current turn.
    pub fn accepts(&self, now: Instant) -> bool {
        match self.window {
            Window::Closed => false,
            Window::Open => true,
            Window::Grace { until } => now <= until,
        }
    }

    /// Offer a fragment. Returns it back when it was attributed to this turn.
    pub fn accept(&mut self, fragment: Transcript, now: Instant) -> Option<Transcript> {
        if !self.accepts(now) {
            debug!("dropping transcript fragment outside speech window");
            return None;
        }
        let text = fragment.text.trim();
        if text.is_empty() {
            return None;
        }
        if fragment.is_final {
            append_fragment(&mut self.final_text, text);
            self.interim_text.clear();
        } else {
            self.interim_text = text.to_owned();
        }
        Some(fragment)
    }

    /// Finish the turn and return the collected final text (possibly empty).
    pub fn take_transcript(&mut self) -> String {
        self.window = Window::Closed;
        self.interim_text.clear();
        let text = std::mem::take(&mut self.final_text);
        let text = text.trim().to_owned();
        info!("turn transcript: {text:?}");
        text
    }

    /// Delay before restarting after an engine error, or `None` when the
    /// error must not be retried.
    pub fn restart_delay_after_error(&self, permission: bool, message: &str) -> Option<Duration> {
        if permission {
            warn!("recognizer permission denied: {message}");
            return None;
        }
        warn!("recognizer error, restarting: {message}");
        Some(Duration::from_millis(self.config.restart_backoff_ms))
    }

    /// Delay before restarting after the engine ended by itself.
    pub fn restart_delay_after_end(&self) -> Duration {
        Duration::from_millis(self.config.end_restart_delay_ms)
    }
}

/// Join fragments, inserting a space only between two Latin words.
fn append_fragment(base: &mut String, next: &str) {
    let needs_space = matches!(
        (base.chars().last(), next.chars().next()),
        (Some(a), Some(b))
            if (a.is_ascii_alphanumeric() || a.is_ascii_punctuation()) && b.is_ascii_alphanumeric()
    );
    if needs_space {
        base.push(' ');
    }
    base.push_str(next);
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

    use super::*;
    use crate::error::SpeechError;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[derive(Default, Clone)]
    struct Counting {
        starts: Arc<AtomicUsize>,
        stops: Arc<AtomicUsize>,
        deny: bool,
    }

    impl SpeechRecognizer for Counting {
        fn start(&mut self, _language: &str) -> Result<()> {
            if self.deny {
                return Err(SpeechError::Permission("not-allowed".into()));
            }
            self.starts.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        fn stop(&mut self) {
            self.stops.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn adapter() -> (TranscriptionAdapter, Counting) {
        let rec = Counting::default();
        (
            TranscriptionAdapter::new(Box::new(rec.clone()), &SttConfig::default()),
            rec,
        )
    }

    #[test]
    fn fragments_outside_window_are_dropped() {
        let (mut stt, _) = adapter();
        let now = Instant::now();
        assert!(stt.accept(Transcript::final_text("stale"), now).is_none());
        stt.open_segment();
        assert!(stt.accept(Transcript::final_text("hello"), now).is_some());
        assert_eq!(stt.take_transcript(), "hello");
    }

    #[test]
    fn grace_window_accepts_trailing_fragments_until_deadline() {
        let (mut stt, _) = adapter();
        let now = Instant::now();
        stt.open_segment();
        stt.close_segment(now, Duration::from_millis(200));
        assert!(stt
            .accept(Transcript::final_text("late"), now + Duration::from_millis(150))
            .is_some());
        assert!(stt
            .accept(Transcript::final_text("too late"), now + Duration::from_millis(250))
            .is_none());
        assert_eq!(stt.take_transcript(), "late");
    }

    #[test]
    fn interim_fragments_are_not_part_of_transcript() {
        let (mut stt, _) = adapter();
        let now = Instant::now();
        stt.open_segment();
        stt.accept(Transcript::interim("what ti"), now);
        assert_eq!(stt.take_transcript(), "");
    }

    #[test]
    fn finals_are_joined() {
        let (mut stt, _) = adapter();
        let now = Instant::now();
        stt.open_segment();
        stt.accept(Transcript::final_text("turn on"), now);
        stt.accept(Transcript::final_text("the lights"), now);
        assert_eq!(stt.take_transcript(), "turn on the lights");

        stt.open_segment();
        stt.accept(Transcript::final_text("今天"), now);
        stt.accept(Transcript::final_text("天气怎么样"), now);
        assert_eq!(stt.take_transcript(), "今天天气怎么样");

        stt.open_segment();
        stt.accept(Transcript::final_text("hello"), now);
        stt.accept(Transcript::final_text("世界"), now);
        assert_eq!(stt.take_transcript(), "hello世界");
    }

    #[test]
    fn open_segment_discards_previous_text() {
        let (mut stt, _) = adapter();
        let now = Instant::now();
        stt.open_segment();
        stt.accept(Transcript::final_text("first"), now);
        stt.open_segment();
        assert_eq!(stt.take_transcript(), "");
    }

    #[test]
    fn resume_keeps_buffered_text() {
        let (mut stt, _) = adapter();
        let now = Instant::now();
        stt.open_segment();
        stt.accept(Transcript::final_text("first"), now);
        stt.close_segment(now, Duration::from_millis(200));
        stt.resume_segment();
        stt.accept(Transcript::final_text("second"), now + Duration::from_secs(5));
        assert_eq!(stt.take_transcript(), "first second");
    }

    #[test]
    fn start_is_idempotent_and_stop_resets() {
        let (mut stt, rec) = adapter();
        stt.start().unwrap();
        stt.start().unwrap();
        assert_eq!(rec.starts.load(Ordering::SeqCst), 1);
        stt.stop();
        stt.stop();
        assert_eq!(rec.stops.load(Ordering::SeqCst), 1);
        stt.start().unwrap();
        assert_eq!(rec.starts.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn permission_failure_is_not_retried() {
        let rec = Counting {
            deny: true,
            ..Counting::default()
        };
        let mut stt = TranscriptionAdapter::new(Box::new(rec), &SttConfig::default());
        assert!(stt.start().unwrap_err().is_permission());
        assert!(stt.restart_delay_after_error(true, "not-allowed").is_none());
        assert_eq!(
            stt.restart_delay_after_error(false, "network"),
            Some(Duration::from_secs(1))
        );
    }
}
