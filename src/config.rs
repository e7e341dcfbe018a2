//! Configuration types for the voice assistant.

use crate::error::{Result, SpeechError};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Top-level configuration for the assistant.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AssistantConfig {
    /// Capture frame and spectrum analyser settings.
    pub audio: AudioConfig,
    /// Voice activity detection settings.
    pub vad: VadConfig,
    /// Speech-to-text adapter settings.
    pub stt: SttConfig,
    /// Turn-taking timings.
    pub turn: TurnConfig,
    /// Dialogue backend client settings.
    pub dialogue: DialogueConfig,
    /// Speech synthesis settings.
    pub tts: TtsConfig,
    /// Dialogue backend service settings (`xiaot-backend`).
    pub backend: BackendConfig,
}

/// Audio frame configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    /// Capture sample rate in Hz.
    pub sample_rate: u32,
    /// Samples per frame delivered to the VAD (also the FFT size).
    pub frame_size: usize,
    /// Exponential smoothing applied to spectrum bins between frames (0 = none).
    pub smoothing_time_constant: f32,
    /// Magnitude (dB) mapped to bin value 0.0.
    pub min_decibels: f32,
    /// Magnitude (dB) mapped to bin value 1.0.
    pub max_decibels: f32,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            sample_rate: 16_000,
            frame_size: 512,
            smoothing_time_constant: 0.8,
            min_decibels: -100.0,
            max_decibels: -30.0,
        }
    }
}

/// Voice activity detection configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VadConfig {
    /// Speech probability above which a frame counts as speech.
    pub threshold: f32,
    /// Continuous speech required before speech start is confirmed.
    pub min_speech_duration_ms: u32,
    /// Continuous silence required before speech end is confirmed.
    pub min_silence_duration_ms: u32,
    /// Upper edge of the low (voiced) band in Hz.
    pub low_band_cutoff_hz: f32,
    /// Seed for probability jitter. `None` disables jitter entirely.
    pub jitter_seed: Option<u64>,
}

impl Default for VadConfig {
    fn default() -> Self {
        Self {
            threshold: 0.5,
            min_speech_duration_ms: 300,
            min_silence_duration_ms: 800,
            low_band_cutoff_hz: 1_000.0,
            jitter_seed: None,
        }
    }
}

impl VadConfig {
    /// Minimum confirmed speech duration.
    pub fn min_speech(&self) -> Duration {
        Duration::from_millis(u64::from(self.min_speech_duration_ms))
    }

    /// Minimum confirmed silence duration.
    pub fn min_silence(&self) -> Duration {
        Duration::from_millis(u64::from(self.min_silence_duration_ms))
    }
}

/// Speech-to-text adapter configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SttConfig {
    /// Recognition language tag.
    pub language: String,
    /// Delay before restarting recognition after an engine error.
    pub restart_backoff_ms: u64,
    /// Delay before restarting recognition after the engine ends mid-utterance.
    pub end_restart_delay_ms: u64,
}

impl Default for SttConfig {
    fn default() -> Self {
        Self {
            language: "zh-CN".to_owned(),
            restart_backoff_ms: 1_000,
            end_restart_delay_ms: 100,
        }
    }
}

/// Turn-taking timings for the turn controller.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TurnConfig {
    /// Window after speech end during which trailing transcripts still count.
    pub grace_window_ms: u64,
    /// Cool-down before re-arming after an empty transcript.
    pub cooldown_ms: u64,
    /// Cool-down before re-arming after the assistant finishes speaking.
    ///
    /// Keeps the assistant from re-triggering on its own voice tail.
    pub speaking_cooldown_ms: u64,
    /// Whether user speech interrupts assistant playback.
    pub barge_in: bool,
    /// Conversation identifier used for voice turns.
    pub session_id: String,
}

impl Default for TurnConfig {
    fn default() -> Self {
        Self {
            grace_window_ms: 200,
            cooldown_ms: 300,
            speaking_cooldown_ms: 500,
            barge_in: true,
            session_id: "main".to_owned(),
        }
    }
}

impl TurnConfig {
    pub fn grace_window(&self) -> Duration {
        Duration::from_millis(self.grace_window_ms)
    }

    pub fn cooldown(&self) -> Duration {
        Duration::from_millis(self.cooldown_ms)
    }

    pub fn speaking_cooldown(&self) -> Duration {
        Duration::from_millis(self.speaking_cooldown_ms)
    }
}

/// How fallback utterances are chosen when the backend is unavailable.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", tag = "kind")]
pub enum FallbackPolicy {
    /// Cycle through the templates in order.
    #[default]
    Rotation,
    /// Pick templates with a seeded pseudo-random generator.
    Seeded {
        /// RNG seed.
        seed: u64,
    },
}

/// Dialogue backend client configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DialogueConfig {
    /// Base URL of the dialogue backend service.
    pub backend_url: String,
    /// Agent / session name forwarded to the backend.
    pub agent: String,
    /// Per-request timeout in seconds.
    pub timeout_secs: u64,
    /// Number of user/assistant exchanges kept per session.
    pub max_exchanges: usize,
    /// Send the session history along with each message.
    pub send_history: bool,
    /// Fallback utterance selection.
    pub fallback: FallbackPolicy,
    /// Never call the backend; always answer with a fallback utterance.
    pub use_mock_response: bool,
}

impl Default for DialogueConfig {
    fn default() -> Self {
        Self {
            backend_url: "http://127.0.0.1:18790".to_owned(),
            agent: "main".to_owned(),
            timeout_secs: 30,
            max_exchanges: 10,
            send_history: true,
            fallback: FallbackPolicy::Rotation,
            use_mock_response: false,
        }
    }
}

impl DialogueConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Speech synthesis configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TtsConfig {
    /// Locale requested from the synthesis engine.
    pub locale: String,
    /// Speaking rate multiplier.
    pub rate: f32,
    /// Pitch multiplier.
    pub pitch: f32,
    /// Explicit voice name fragment to prefer over everything else.
    pub voice_hint: Option<String>,
    /// Voice name fragments tried in order when no hint matches.
    pub preferred_voices: Vec<String>,
}

impl Default for TtsConfig {
    fn default() -> Self {
        Self {
            locale: "zh-CN".to_owned(),
            rate: 1.0,
            pitch: 1.0,
            voice_hint: None,
            preferred_voices: vec!["Google 普通话".to_owned(), "Microsoft".to_owned()],
        }
    }
}

/// Dialogue backend service configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendConfig {
    /// Socket address the service binds to.
    pub bind_addr: String,
    /// Agent CLI executable.
    pub agent_command: String,
    /// Agent used when a request does not name one.
    pub default_agent: String,
    /// Hard limit on a single agent command run.
    pub command_timeout_secs: u64,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:18790".to_owned(),
            agent_command: "openclaw".to_owned(),
            default_agent: "main".to_owned(),
            command_timeout_secs: 65,
        }
    }
}

impl AssistantConfig {
    /// Load configuration from a TOML file, falling back to defaults for missing fields.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, parsed, or fails validation.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self =
            toml::from_str(&content).map_err(|e| SpeechError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to a TOML file, creating parent directories as needed.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written or the config cannot be serialized.
    pub fn save_to_file(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content =
            toml::to_string_pretty(self).map_err(|e| SpeechError::Config(e.to_string()))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Returns the default config file path: `~/.config/xiaot/config.toml`.
    pub fn default_config_path() -> PathBuf {
        if let Some(config) = std::env::var_os("XDG_CONFIG_HOME") {
            PathBuf::from(config).join("xiaot").join("config.toml")
        } else if let Some(dir) = dirs::config_dir() {
            dir.join("xiaot").join("config.toml")
        } else {
            PathBuf::from("/tmp/xiaot-config/config.toml")
        }
    }

    /// Check value ranges that serde cannot express.
    ///
    /// # Errors
    ///
    /// Returns [`SpeechError::Config`] naming the first invalid field.
    pub fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.vad.threshold) {
            return Err(SpeechError::Config(format!(
                "vad.threshold must be within [0, 1], got {}",
                self.vad.threshold
            )));
        }
        if self.audio.sample_rate == 0 {
            return Err(SpeechError::Config("audio.sample_rate must be > 0".into()));
        }
        if self.audio.frame_size == 0 {
            return Err(SpeechError::Config("audio.frame_size must be > 0".into()));
        }
        if self.audio.min_decibels >= self.audio.max_decibels {
            return Err(SpeechError::Config(
                "audio.min_decibels must be below audio.max_decibels".into(),
            ));
        }
        if self.turn.grace_window_ms > 2_000 {
            return Err(SpeechError::Config(format!(
                "turn.grace_window_ms must be at most 2000, got {}",
                self.turn.grace_window_ms
            )));
        }
        if self.dialogue.max_exchanges == 0 {
            return Err(SpeechError::Config(
                "dialogue.max_exchanges must be > 0".into(),
            ));
        }
        Ok(())
    }
}
