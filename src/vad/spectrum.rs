//! PCM → normalised spectrum bins for the VAD front end.
//!
//! Mirrors a browser analyser node: Blackman window, FFT, magnitude
//! smoothing across frames, then a linear map from
//! `[min_decibels, max_decibels]` onto `[0, 1]`.

use crate::config::AudioConfig;
use crate::pipeline::messages::AudioFrame;
use rustfft::num_complex::Complex32;
use rustfft::{Fft, FftPlanner};
use std::sync::Arc;
use std::time::Duration;

/// Stateful spectrum analyser (smoothing carries over between frames).
pub struct SpectrumAnalyzer {
    fft: Arc<dyn Fft<f32>>,
    fft_size: usize,
    sample_rate: u32,
    window: Vec<f32>,
    smoothing: f32,
    min_db: f32,
    max_db: f32,
    smoothed: Vec<f32>,
    buf: Vec<Complex32>,
}

impl SpectrumAnalyzer {
    /// Create an analyser whose FFT size equals the configured frame size.
    pub fn new(config: &AudioConfig) -> Self {
        let fft_size = config.frame_size.max(2);
        let mut planner = FftPlanner::<f32>::new();
        let fft = planner.plan_fft_forward(fft_size);
        Self {
            fft,
            fft_size,
            sample_rate: config.sample_rate,
            window: blackman_window(fft_size),
            smoothing: config.smoothing_time_constant.clamp(0.0, 1.0),
            min_db: config.min_decibels,
            max_db: config.max_decibels,
            smoothed: vec![0.0; fft_size / 2],
            buf: vec![Complex32::new(0.0, 0.0); fft_size],
        }
    }

    /// Number of bins produced per frame.
    pub fn bin_count(&self) -> usize {
        self.fft_size / 2
    }

    /// Width of one bin in Hz.
    pub fn bin_hz(&self) -> f32 {
        self.sample_rate as f32 / self.fft_size as f32
    }

    /// Analyse one block of mono PCM samples captured at `timestamp`.
    ///
    /// Short blocks are zero-padded; long blocks keep their most recent
    /// `frame_size` samples.
    pub fn analyze(&mut self, samples: &[f32], timestamp: Duration) -> AudioFrame {
        let duration = samples_to_duration(samples.len(), self.sample_rate);
        if samples.is_empty() {
            return AudioFrame::from_bins(timestamp, duration, Vec::new(), self.bin_hz());
        }

        let tail = &samples[samples.len().saturating_sub(self.fft_size)..];
        for (i, slot) in self.buf.iter_mut().enumerate() {
            let s = tail.get(i).copied().unwrap_or(0.0);
            let s = if s.is_finite() { s } else { 0.0 };
            *slot = Complex32::new(s * self.window[i], 0.0);
        }
        self.fft.process(&mut self.buf);

        let scale = 1.0 / self.fft_size as f32;
        let range = self.max_db - self.min_db;
        let mut bins = Vec::with_capacity(self.bin_count());
        for (k, prev) in self.smoothed.iter_mut().enumerate() {
            let mag = self.buf[k].norm() * scale;
            *prev = self.smoothing * *prev + (1.0 - self.smoothing) * mag;
            let db = 20.0 * prev.max(1e-12).log10();
            bins.push(((db - self.min_db) / range).clamp(0.0, 1.0));
        }

        AudioFrame::from_bins(timestamp, duration, bins, self.bin_hz())
    }

    /// Forget smoothing history (used when capture restarts).
    pub fn reset(&mut self) {
        self.smoothed.iter_mut().for_each(|v| *v = 0.0);
    }
}

fn blackman_window(n: usize) -> Vec<f32> {
    let a0 = 0.42f32;
    let a1 = 0.5f32;
    let a2 = 0.08f32;
    (0..n)
        .map(|i| {
            let x = 2.0 * std::f32::consts::PI * i as f32 / n as f32;
            a0 - a1 * x.cos() + a2 * (2.0 * x).cos()
        })
        .collect()
}

/// Duration spanned by `count` samples at `sample_rate`.
pub fn samples_to_duration(count: usize, sample_rate: u32) -> Duration {
    if sample_rate == 0 {
        return Duration::ZERO;
    }
    Duration::from_nanos((count as u64).saturating_mul(1_000_000_000) / u64::from(sample_rate))
}
