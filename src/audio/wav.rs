//! WAV file capture via hound.

use super::{CaptureSource, frames_from_samples};
use crate::config::AudioConfig;
use crate::error::{Result, SpeechError};
use crate::pipeline::messages::AudioFrame;
use crate::vad::SpectrumAnalyzer;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// How fast a file is replayed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pacing {
    /// One frame per frame duration, like a live microphone.
    Realtime,
    /// As fast as the consumer accepts frames.
    Burst,
}

/// Replays a WAV file as a capture source.
pub struct WavCapture {
    path: PathBuf,
    config: AudioConfig,
    pacing: Pacing,
    cancel: Option<CancellationToken>,
}

impl WavCapture {
    pub fn new(path: impl Into<PathBuf>, config: &AudioConfig, pacing: Pacing) -> Self {
        Self {
            path: path.into(),
            config: config.clone(),
            pacing,
            cancel: None,
        }
    }
}

#[async_trait]
impl CaptureSource for WavCapture {
    async fn start(&mut self, frames: mpsc::Sender<AudioFrame>) -> Result<()> {
        self.stop();

        let path = self.path.clone();
        let rate = self.config.sample_rate;
        let samples = tokio::task::spawn_blocking(move || read_wav_mono(&path, rate))
            .await
            .map_err(|e| SpeechError::Audio(format!("wav decode task failed: {e}")))??;

        let mut analyzer = SpectrumAnalyzer::new(&self.config);
        let decoded = frames_from_samples(&samples, &mut analyzer, self.config.frame_size, rate);
        info!(
            "replaying {} ({} frames)",
            self.path.display(),
            decoded.len()
        );

        let cancel = CancellationToken::new();
        self.cancel = Some(cancel.clone());
        let pacing = self.pacing;
        tokio::spawn(async move {
            for frame in decoded {
                let wait = frame.duration;
                tokio::select! {
                    () = cancel.cancelled() => break,
                    sent = frames.send(frame) => {
                        if sent.is_err() {
                            break;
                        }
                    }
                }
                if pacing == Pacing::Realtime {
                    tokio::select! {
                        () = cancel.cancelled() => break,
                        () = tokio::time::sleep(wait) => {}
                    }
                }
            }
            debug!("wav replay finished");
        });
        Ok(())
    }

    fn stop(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel.cancel();
        }
    }
}

/// Decode a WAV file to mono `f32` at `target_rate`.
///
/// # Errors
///
/// Returns [`SpeechError::Permission`] if the file cannot be opened for lack
/// of permission, or [`SpeechError::Audio`] for any other decode failure.
pub fn read_wav_mono(path: &Path, target_rate: u32) -> Result<Vec<f32>> {
    let reader = hound::WavReader::open(path).map_err(|e| match e {
        hound::Error::IoError(io) if io.kind() == std::io::ErrorKind::PermissionDenied => {
            SpeechError::Permission(format!("{}: {io}", path.display()))
        }
        other => SpeechError::Audio(format!("cannot open {}: {other}", path.display())),
    })?;
    let spec = reader.spec();

    let interleaved: Vec<f32> = match spec.sample_format {
        hound::SampleFormat::Float => reader
            .into_samples::<f32>()
            .collect::<std::result::Result<_, _>>()
            .map_err(|e| SpeechError::Audio(format!("bad wav data: {e}")))?,
        hound::SampleFormat::Int => {
            let scale = 1.0 / (1i64 << (spec.bits_per_sample.saturating_sub(1))) as f32;
            reader
                .into_samples::<i32>()
                .map(|s| s.map(|v| v as f32 * scale))
                .collect::<std::result::Result<_, _>>()
                .map_err(|e| SpeechError::Audio(format!("bad wav data: {e}")))?
        }
    };

    let mono = to_mono(&interleaved, spec.channels);
    Ok(resample(&mono, spec.sample_rate, target_rate))
}

/// Average interleaved channels.
fn to_mono(data: &[f32], channels: u16) -> Vec<f32> {
    let ch = usize::from(channels.max(1));
    if ch == 1 {
        return data.to_vec();
    }
    data.chunks_exact(ch)
        .map(|frame| frame.iter().sum::<f32>() / ch as f32)
        .collect()
}

/// Linear-interpolation resampler. Adequate for speech-band VAD input.
fn resample(samples: &[f32], src_rate: u32, dst_rate: u32) -> Vec<f32> {
    if src_rate == dst_rate || samples.is_empty() || src_rate == 0 || dst_rate == 0 {
        return samples.to_vec();
    }

    let ratio = f64::from(src_rate) / f64::from(dst_rate);
    let out_len = (samples.len() as f64 / ratio) as usize;
    (0..out_len)
        .map(|i| {
            let pos = i as f64 * ratio;
            let idx = pos as usize;
            let frac = pos - idx as f64;
            match samples.get(idx + 1) {
                Some(next) => {
                    (f64::from(samples[idx]) * (1.0 - frac) + f64::from(*next) * frac) as f32
                }
                None => samples[idx.min(samples.len() - 1)],
            }
        })
        .collect()
}
