//! Speech probability models.
//!
//! [`EnergyProbability`] is a lightweight stand-in for a neural VAD: it
//! favours frames whose energy sits in the voiced low band at a moderate
//! overall level. Any model can be swapped in behind [`SpeechProbability`].

use crate::config::VadConfig;
use crate::pipeline::messages::AudioFrame;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Overall level below which a frame is treated as silence.
const MIN_LEVEL: f32 = 0.02;
/// Low/high band energy ratio above which a frame looks voiced.
const VOICED_RATIO: f32 = 1.5;
/// Level above which a frame is loud (speech or noise).
const LOUD_LEVEL: f32 = 0.3;
/// Peak probability the energy model will report.
const MAX_PROBABILITY: f32 = 0.9;
/// Total width of the optional jitter band.
const JITTER_SPAN: f32 = 0.05;

/// Converts one frame into a speech probability in `[0, 1]`.
pub trait SpeechProbability: Send {
    fn probability(&mut self, frame: &AudioFrame) -> f32;
}

/// Band energies and level of a frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrameEnergy {
    /// Mean squared bin value below the cutoff.
    pub low: f32,
    /// Mean squared bin value at or above the cutoff.
    pub high: f32,
    /// Mean bin value across the whole frame.
    pub level: f32,
}

impl FrameEnergy {
    /// Measure a frame. Empty frames measure as silence.
    pub fn measure(frame: &AudioFrame, low_band_cutoff_hz: f32) -> Self {
        let n = frame.bins.len();
        if n == 0 || frame.bin_hz <= 0.0 {
            return Self {
                low: 0.0,
                high: 0.0,
                level: 0.0,
            };
        }

        let split = ((low_band_cutoff_hz / frame.bin_hz).floor() as usize).clamp(1, n);
        let (low_bins, high_bins) = frame.bins.split_at(split);

        Self {
            low: mean_square(low_bins),
            high: mean_square(high_bins),
            level: sanitize(frame.bins.iter().map(|b| sanitize(*b)).sum::<f32>() / n as f32),
        }
    }
}

fn sanitize(v: f32) -> f32 {
    if v.is_finite() { v.clamp(0.0, 1.0) } else { 0.0 }
}

fn mean_square(bins: &[f32]) -> f32 {
    if bins.is_empty() {
        return 0.0;
    }
    bins.iter().map(|b| sanitize(*b).powi(2)).sum::<f32>() / bins.len() as f32
}

/// Energy-ratio speech probability with optional seeded jitter.
pub struct EnergyProbability {
    low_band_cutoff_hz: f32,
    jitter: Option<StdRng>,
}

impl EnergyProbability {
    pub fn new(config: &VadConfig) -> Self {
        Self {
            low_band_cutoff_hz: config.low_band_cutoff_hz,
            jitter: config.jitter_seed.map(StdRng::seed_from_u64),
        }
    }

    /// Deterministic part of the model.
    pub fn base_probability(energy: FrameEnergy) -> f32 {
        if energy.level <= MIN_LEVEL {
            return 0.0;
        }
        let ratio = energy.low / (energy.high + 0.001);
        if ratio > VOICED_RATIO && energy.level < 0.5 {
            (energy.level * 2.0).min(MAX_PROBABILITY)
        } else if energy.level > LOUD_LEVEL {
            energy.level * 0.5
        } else {
            energy.level * 0.3
        }
    }
}

impl SpeechProbability for EnergyProbability {
    fn probability(&mut self, frame: &AudioFrame) -> f32 {
        let energy = FrameEnergy::measure(frame, self.low_band_cutoff_hz);
        let mut p = Self::base_probability(energy);
        if let Some(rng) = self.jitter.as_mut() {
            p += (rng.r#gen::<f32>() - 0.5) * JITTER_SPAN;
        }
        p.clamp(0.0, 1.0)
    }
}
