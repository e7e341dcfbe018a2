//! Audio capture sources feeding spectrum frames to the turn controller.
//!
//! The device or browser layer that actually owns the microphone lives
//! outside this crate. It plugs in either through [`PushCapture`] (frames
//! pushed by the host) or by implementing [`CaptureSource`] directly.
//! [`WavCapture`] replays a file for tooling and tests.

mod push;
mod wav;

pub use push::{FramePusher, PushCapture};
pub use wav::{Pacing, WavCapture, read_wav_mono};

use crate::error::Result;
use crate::pipeline::messages::AudioFrame;
use crate::vad::SpectrumAnalyzer;
use async_trait::async_trait;
use std::time::Duration;
use tokio::sync::mpsc;

/// A source of [`AudioFrame`]s.
#[async_trait]
pub trait CaptureSource: Send {
    /// Begin delivering frames into `frames`.
    ///
    /// # Errors
    ///
    /// [`crate::SpeechError::Permission`] when microphone access is denied,
    /// [`crate::SpeechError::Audio`] for any other failure to open the source.
    async fn start(&mut self, frames: mpsc::Sender<AudioFrame>) -> Result<()>;

    /// Stop delivering frames. Idempotent.
    fn stop(&mut self);
}

/// Split mono PCM into analyser frames with capture timestamps.
///
/// The trailing partial block is analysed too (zero-padded).
pub fn frames_from_samples(
    samples: &[f32],
    analyzer: &mut SpectrumAnalyzer,
    frame_size: usize,
    sample_rate: u32,
) -> Vec<AudioFrame> {
    let frame_size = frame_size.max(1);
    samples
        .chunks(frame_size)
        .enumerate()
        .map(|(i, block)| {
            let timestamp =
                crate::vad::spectrum::samples_to_duration(i * frame_size, sample_rate);
            analyzer.analyze(block, timestamp)
        })
        .collect()
}

/// Total duration covered by a run of frames.
pub fn frames_duration(frames: &[AudioFrame]) -> Duration {
    frames.last().map(AudioFrame::end).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

    use super::*;
    use crate::config::AudioConfig;

    #[test]
    fn frames_are_timestamped_contiguously() {
        let config = AudioConfig::default();
        let mut analyzer = SpectrumAnalyzer::new(&config);
        let samples = vec![0.0; 512 * 3 + 100];
        let frames = frames_from_samples(&samples, &mut analyzer, 512, 16_000);
        assert_eq!(frames.len(), 4);
        assert_eq!(frames[1].timestamp, Duration::from_millis(32));
        assert_eq!(frames[1].timestamp, frames[0].end());
        assert_eq!(frames_duration(&frames), frames[3].end());
        assert!(frames_duration(&[]).is_zero());
    }
}
