//! Emulated data sources
//!
//! Generates raw DTB sample streams for testing the DAQ pipeline without
//! hardware, and emulates a testboard for the scan engine.
//!
//! Architecture:
//! - `StreamWriter`: encodes hit lists into the words of one channel
//! - `StreamGenerator`: random events (Poisson multiplicity, Gaussian pulse height)
//! - `EmulatedTestBoard`: answers scan calls by generating, decoding and
//!   condensing raw events through a real `Daq`

pub mod board;
pub mod generator;
pub mod writer;

pub use board::EmulatedTestBoard;
pub use generator::StreamGenerator;
pub use writer::StreamWriter;

use serde::Deserialize;
use thiserror::Error;

use crate::common::PipelineError;
use crate::config::ConfigError;

/// Emulator configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EmulatorConfig {
    /// Seed of the random generator, runs with the same seed are identical
    pub seed: u64,
    /// Number of events the stream emulator writes
    pub events: usize,
    /// Mean number of hits per ROC and event (Poisson)
    pub mean_hits: f64,
    /// Probability that a pulsed pixel answers one trigger
    pub pixel_efficiency: f64,
    /// Probability of one extra random hit per ROC and trigger during scans
    pub noise_probability: f64,
    /// Gaussian pulse height, clamped to 0..=255
    pub pulse_height_mean: f64,
    pub pulse_height_sigma: f64,
}

impl Default for EmulatorConfig {
    fn default() -> Self {
        Self {
            seed: 1,
            events: 1000,
            mean_hits: 2.0,
            pixel_efficiency: 1.0,
            noise_probability: 0.0,
            pulse_height_mean: 100.0,
            pulse_height_sigma: 10.0,
        }
    }
}

/// Emulator errors
#[derive(Error, Debug)]
pub enum EmulatorError {
    #[error("Invalid pulse height distribution: {0}")]
    PulseHeight(#[from] rand_distr::NormalError),

    #[error("Invalid hit multiplicity: {0}")]
    Multiplicity(#[from] rand_distr::PoissonError),

    #[error("Invalid probability {0}, expected 0..=1")]
    Probability(f64),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
}

impl From<EmulatorError> for PipelineError {
    fn from(err: EmulatorError) -> Self {
        PipelineError::hal(err.to_string())
    }
}

impl EmulatorConfig {
    /// Check the probabilities, distributions are checked when they are built
    pub fn validate(&self) -> Result<(), EmulatorError> {
        for p in [self.pixel_efficiency, self.noise_probability] {
            if !(0.0..=1.0).contains(&p) {
                return Err(EmulatorError::Probability(p));
            }
        }
        Ok(())
    }
}

/// Draw a pulse height from `distribution`, rounded and clamped to 8 bits
pub(crate) fn pulse_height<R: rand::Rng>(
    distribution: &rand_distr::Normal<f64>,
    offset: f64,
    rng: &mut R,
) -> f64 {
    use rand_distr::Distribution;
    (distribution.sample(rng) + offset).round().clamp(0.0, 255.0)
}
