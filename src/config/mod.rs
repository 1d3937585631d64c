//! Configuration module for the pxar DAQ
//!
//! Everything is loaded from one TOML file:
//! - `[daq]` sample source and readout channels
//! - `[dut]` ROC/TBM setup, DACs, masks and trims
//! - `[emulator]` settings of the stream and testboard emulator
//!
//! # Example
//! ```ignore
//! let config = Config::load("config.toml")?;
//! let dut = config.build_dut()?;
//! ```

pub mod dut;
pub mod registers;

pub use dut::{Dut, DutConfig, PixelConfig, RocConfig, RocFileConfig, TbmConfig};
pub use registers::{DeviceDictionary, Register, RegisterDictionary, RegisterKind};

use serde::Deserialize;
use std::path::Path;
use thiserror::Error;

use crate::data_source_emulator::EmulatorConfig;
use crate::reader::decoder::{DecoderConfig, Envelope};
use crate::reader::source::DTB_SOURCE_BLOCK_SIZE;

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    TomlError(#[from] toml::de::Error),

    #[error("Unknown device \"{0}\"")]
    UnknownDevice(String),

    #[error("Invalid register name \"{0}\"")]
    UnknownRegister(String),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Top-level configuration
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub daq: DaqConfig,
    #[serde(default)]
    pub dut: DutConfig,
    #[serde(default)]
    pub emulator: EmulatorConfig,
}

impl Config {
    /// Load configuration from a TOML file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }

    /// Load configuration from a TOML string (useful for testing)
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(content)?;
        Ok(config)
    }

    /// Resolve the DUT section against fresh dictionaries
    pub fn build_dut(&self) -> Result<Dut, ConfigError> {
        Dut::from_config(
            &self.dut,
            &RegisterDictionary::new(),
            &DeviceDictionary::new(),
        )
    }

    /// Decoder setup of every configured readout channel
    pub fn decoder_configs(&self) -> Result<Vec<DecoderConfig>, ConfigError> {
        let devices = DeviceDictionary::new();
        let device = devices
            .code(&self.dut.roc_type)
            .ok_or_else(|| ConfigError::UnknownDevice(self.dut.roc_type.clone()))?;
        let tbm_type = devices
            .code(&self.dut.tbm_type)
            .ok_or_else(|| ConfigError::UnknownDevice(self.dut.tbm_type.clone()))?;

        self.daq
            .channels
            .iter()
            .map(|ch| {
                let decoder = DecoderConfig {
                    channel: ch.channel,
                    token_chain_length: ch.token_chain_length,
                    envelope: ch
                        .envelope
                        .unwrap_or_else(|| Envelope::from_tbm_type(tbm_type)),
                    device,
                };
                // Analog ROCs are only read out directly through DESER160
                if decoder.is_analog() && decoder.envelope != Envelope::Deser160 {
                    return Err(ConfigError::Invalid(format!(
                        "analog ROC type \"{}\" cannot be read out with {} framing",
                        self.dut.roc_type, decoder.envelope
                    )));
                }
                Ok(decoder)
            })
            .collect()
    }
}

// =============================================================================
// DAQ Configuration
// =============================================================================

/// Sample source and readout channel settings
#[derive(Debug, Clone, Deserialize)]
pub struct DaqConfig {
    /// Words requested from the channel per read
    #[serde(default = "default_block_size")]
    pub block_size: usize,

    /// Report "buffer empty" instead of waiting when the channel runs dry
    #[serde(default = "default_stop_at_empty")]
    pub stop_at_empty: bool,

    /// Readout channels, one decoder each
    #[serde(default = "default_channels")]
    pub channels: Vec<ChannelConfig>,
}

impl Default for DaqConfig {
    fn default() -> Self {
        Self {
            block_size: default_block_size(),
            stop_at_empty: default_stop_at_empty(),
            channels: default_channels(),
        }
    }
}

fn default_block_size() -> usize {
    DTB_SOURCE_BLOCK_SIZE
}

fn default_stop_at_empty() -> bool {
    true
}

fn default_channels() -> Vec<ChannelConfig> {
    vec![ChannelConfig::default()]
}

/// One hardware readout channel
#[derive(Debug, Clone, Deserialize)]
pub struct ChannelConfig {
    /// Channel number, used to derive the ROC ids of its token chain
    #[serde(default)]
    pub channel: u8,

    /// ROCs read out through this channel
    #[serde(default = "default_token_chain_length")]
    pub token_chain_length: u8,

    /// Framing override, derived from the TBM type when absent
    #[serde(default)]
    pub envelope: Option<Envelope>,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            channel: 0,
            token_chain_length: default_token_chain_length(),
            envelope: None,
        }
    }
}

fn default_token_chain_length() -> u8 {
    1
}

// =============================================================================
// Tests
// =============================================================================
