//! Error types for the voice assistant core.

/// Top-level error type for the duplex voice pipeline.
#[derive(Debug, thiserror::Error)]
pub enum SpeechError {
    /// Audio capture device or stream error.
    #[error("audio error: {0}")]
    Audio(String),

    /// Microphone or speech-recognition permission was denied.
    #[error("permission denied: {0}")]
    Permission(String),

    /// Speech-to-text engine error.
    #[error("STT error: {0}")]
    Stt(String),

    /// Dialogue backend failure (network, status, payload, timeout).
    #[error("dialogue error: {0}")]
    Dialogue(String),

    /// A dispatch is already outstanding for this session.
    #[error("session '{session_id}' already has a dispatch in flight")]
    Busy {
        /// Conversation identifier that is busy.
        session_id: String,
    },

    /// Speech synthesis error.
    #[error("TTS error: {0}")]
    Tts(String),

    /// Configuration error.
    #[error("config error: {0}")]
    Config(String),

    /// Dialogue backend service error (agent command, server bind).
    #[error("backend error: {0}")]
    Backend(String),

    /// Channel send/receive error.
    #[error("channel error: {0}")]
    Channel(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl SpeechError {
    /// Whether this error is a capture/recognition permission failure.
    ///
    /// Permission failures are fatal for the current session and are never
    /// retried automatically.
    pub fn is_permission(&self) -> bool {
        matches!(self, Self::Permission(_))
    }
}

/// Convenience result type.
pub type Result<T> = std::result::Result<T, SpeechError>;

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

    use super::*;

    #[test]
    fn busy_error_names_session() {
        let err = SpeechError::Busy {
            session_id: "main".into(),
        };
        assert_eq!(
            err.to_string(),
            "session 'main' already has a dispatch in flight"
        );
    }

    #[test]
    fn only_permission_errors_are_permission() {
        assert!(SpeechError::Permission("mic".into()).is_permission());
        assert!(!SpeechError::Stt("network".into()).is_permission());
        assert!(!SpeechError::Audio("device".into()).is_permission());
    }
}
