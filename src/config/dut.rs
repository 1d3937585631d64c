//! Device under test: ROC and TBM configuration
//!
//! The file representation (`DutConfig`) is resolved against the register
//! and device dictionaries into the runtime model (`Dut`) once, at startup.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::registers::{constants, DeviceDictionary, RegisterDictionary, RegisterKind};
use super::ConfigError;
use crate::common::pixel::constants::{ROC_NUMCOLS, ROC_NUMPIXELS, ROC_NUMROWS};

/// Largest trim value a pixel accepts
pub const TRIM_MAX: u8 = 15;

/// TBM core identifiers
const TBM_CORE_ALPHA: u8 = 0xe0;
const TBM_CORE_BETA: u8 = 0xf0;

// =============================================================================
// Runtime model
// =============================================================================

/// Configuration of one pixel unit cell
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PixelConfig {
    pub column: u8,
    pub row: u8,
    trim: u8,
    pub mask: bool,
    pub enable: bool,
}

impl PixelConfig {
    /// Enabled, unmasked pixel with the given trim (clamped)
    pub fn new(column: u8, row: u8, trim: u8) -> Self {
        let mut pixel = Self {
            column,
            row,
            trim: TRIM_MAX,
            mask: false,
            enable: true,
        };
        pixel.set_trim(trim);
        pixel
    }

    pub fn trim(&self) -> u8 {
        self.trim
    }

    /// Set the trim value; values above 15 are clamped with a warning
    pub fn set_trim(&mut self, trim: u8) {
        if trim > TRIM_MAX {
            warn!(
                column = self.column,
                row = self.row,
                trim,
                "Pixel trim value exceeds limit, set to {}",
                TRIM_MAX
            );
            self.trim = TRIM_MAX;
        } else {
            self.trim = trim;
        }
    }

    /// Same address and enable state; trim and mask are not compared
    pub fn same_setup(&self, other: &PixelConfig) -> bool {
        self.column == other.column && self.row == other.row && self.enable == other.enable
    }
}

/// Configuration of one readout chip
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RocConfig {
    pub i2c_address: u8,
    pub roc_type: u8,
    pub enable: bool,
    /// DAC values by register id
    pub dacs: BTreeMap<u8, u8>,
    pub pixels: Vec<PixelConfig>,
}

impl RocConfig {
    /// ROC with all pixels enabled, unmasked and trimmed to 15
    pub fn new(i2c_address: u8, roc_type: u8) -> Self {
        let mut pixels = Vec::with_capacity(ROC_NUMPIXELS);
        for column in 0..ROC_NUMCOLS {
            for row in 0..ROC_NUMROWS {
                pixels.push(PixelConfig::new(column, row, TRIM_MAX));
            }
        }
        Self {
            i2c_address,
            roc_type,
            enable: true,
            dacs: BTreeMap::new(),
            pixels,
        }
    }

    pub fn pixel(&self, column: u8, row: u8) -> Option<&PixelConfig> {
        self.pixels
            .iter()
            .find(|p| p.column == column && p.row == row)
    }

    pub fn pixel_mut(&mut self, column: u8, row: u8) -> Option<&mut PixelConfig> {
        self.pixels
            .iter_mut()
            .find(|p| p.column == column && p.row == row)
    }

    pub fn enabled_pixels(&self) -> Vec<PixelConfig> {
        self.pixels.iter().filter(|p| p.enable).copied().collect()
    }

    pub fn all_pixels_enabled(&self) -> bool {
        self.pixels.len() == ROC_NUMPIXELS && self.pixels.iter().all(|p| p.enable)
    }

    pub fn masked_pixels(&self) -> usize {
        self.pixels.iter().filter(|p| p.mask).count()
    }

    pub fn dac(&self, register: u8) -> Option<u8> {
        self.dacs.get(&register).copied()
    }

    /// ROC types from PSI46DIGV2 on transmit readback bits
    pub fn has_readback(&self) -> bool {
        self.roc_type >= constants::ROC_PSI46DIGV2
    }
}

/// Configuration of one TBM core
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TbmConfig {
    pub tbm_type: u8,
    pub hub_id: u8,
    /// Core selector ORed into the register address
    pub core: u8,
    pub enable: bool,
    pub registers: BTreeMap<u8, u8>,
    /// Number of ROCs per token chain of this core
    pub token_chains: Vec<u8>,
}

impl TbmConfig {
    pub fn new(tbm_type: u8, hub_id: u8, core: u8) -> Self {
        // TBM09 cores drive two token chains of four ROCs
        let token_chains = if tbm_type >= constants::TBM_09 {
            vec![4, 4]
        } else {
            vec![8]
        };
        Self {
            tbm_type,
            hub_id,
            core,
            enable: true,
            registers: BTreeMap::new(),
            token_chains,
        }
    }
}

/// The full device under test
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Dut {
    pub rocs: Vec<RocConfig>,
    pub tbms: Vec<TbmConfig>,
}

impl Dut {
    pub fn new(rocs: Vec<RocConfig>, tbms: Vec<TbmConfig>) -> Self {
        Self { rocs, tbms }
    }

    /// Resolve a file configuration against the dictionaries
    pub fn from_config(
        config: &DutConfig,
        registers: &RegisterDictionary,
        devices: &DeviceDictionary,
    ) -> Result<Self, ConfigError> {
        if config.rocs.is_empty() {
            return Err(ConfigError::Invalid(
                "no ROC configuration supplied".to_string(),
            ));
        }

        let roc_type = devices
            .code(&config.roc_type)
            .filter(|code| *code < constants::TBM_NONE)
            .ok_or_else(|| ConfigError::UnknownDevice(config.roc_type.clone()))?;
        let tbm_type = devices
            .code(&config.tbm_type)
            .filter(|code| *code >= constants::TBM_NONE)
            .ok_or_else(|| ConfigError::UnknownDevice(config.tbm_type.clone()))?;

        let mut tbms = Vec::new();
        if tbm_type != constants::TBM_NONE {
            let cores = if config.tbm_registers.is_empty() {
                vec![BTreeMap::new()]
            } else {
                config.tbm_registers.clone()
            };
            for (index, regs) in cores.iter().enumerate() {
                let core = if index % 2 == 0 {
                    TBM_CORE_ALPHA
                } else {
                    TBM_CORE_BETA
                };
                let mut tbm = TbmConfig::new(tbm_type, config.hub_id, core);
                for (name, value) in regs {
                    let reg = registers
                        .register(name, RegisterKind::Tbm)
                        .ok_or_else(|| ConfigError::UnknownRegister(name.clone()))?;
                    let value = (*value).min(reg.size);
                    match reg.id {
                        constants::TBM_TOKENCHAIN_0 => tbm.token_chains[0] = value,
                        constants::TBM_TOKENCHAIN_1 if tbm.token_chains.len() > 1 => {
                            tbm.token_chains[1] = value
                        }
                        id => {
                            tbm.registers.insert(id, value);
                        }
                    }
                }
                tbms.push(tbm);
            }
            // A single register set is reused for the second core
            if tbms.len() == 1 {
                let mut beta = tbms[0].clone();
                beta.core ^= 0x10;
                debug!("Only one TBM core configured, duplicating to second core");
                tbms.push(beta);
            }
        }

        let mut rocs = Vec::with_capacity(config.rocs.len());
        for (index, roc_file) in config.rocs.iter().enumerate() {
            let i2c = roc_file.i2c.unwrap_or(index as u8);
            let mut roc = RocConfig::new(i2c, roc_type);
            roc.enable = roc_file.enable;

            for (name, value) in &roc_file.dacs {
                let reg = registers
                    .register(name, RegisterKind::Roc)
                    .ok_or_else(|| ConfigError::UnknownRegister(name.clone()))?;
                if *value > reg.size {
                    warn!(
                        register = %name,
                        value,
                        limit = reg.size,
                        "Register range overflow, clamping"
                    );
                }
                if roc.dacs.insert(reg.id, (*value).min(reg.size)).is_some() {
                    warn!(register = %name, "Overwriting existing DAC value");
                }
            }

            for pixel in roc.pixels.iter_mut() {
                pixel.set_trim(roc_file.trim);
            }
            for [column, row, trim] in &roc_file.trims {
                pixel_entry(&mut roc, index, *column, *row)?.set_trim(*trim);
            }
            for [column, row] in &roc_file.masked {
                pixel_entry(&mut roc, index, *column, *row)?.mask = true;
            }
            for [column, row] in &roc_file.disabled {
                pixel_entry(&mut roc, index, *column, *row)?.enable = false;
            }

            debug!(
                roc = index,
                i2c,
                dacs = roc.dacs.len(),
                masked = roc.masked_pixels(),
                "ROC configured"
            );
            rocs.push(roc);
        }

        Ok(Self { rocs, tbms })
    }

    pub fn n_rocs(&self) -> usize {
        self.rocs.len()
    }

    pub fn n_enabled_rocs(&self) -> usize {
        self.rocs.iter().filter(|r| r.enable).count()
    }

    pub fn enabled_rocs(&self) -> impl Iterator<Item = &RocConfig> {
        self.rocs.iter().filter(|r| r.enable)
    }

    /// Positions of the enabled ROCs in the DUT
    pub fn enabled_roc_ids(&self) -> Vec<usize> {
        self.rocs
            .iter()
            .enumerate()
            .filter(|(_, r)| r.enable)
            .map(|(id, _)| id)
            .collect()
    }

    pub fn enabled_roc_i2c(&self) -> Vec<u8> {
        self.enabled_rocs().map(|r| r.i2c_address).collect()
    }

    pub fn roc_i2c(&self) -> Vec<u8> {
        self.rocs.iter().map(|r| r.i2c_address).collect()
    }

    /// Enabled pixels of the ROC at position `roc_id`
    pub fn enabled_pixels(&self, roc_id: usize) -> Vec<PixelConfig> {
        self.rocs
            .get(roc_id)
            .map(RocConfig::enabled_pixels)
            .unwrap_or_default()
    }

    /// Enabled pixels of the ROC with the given I2C address
    pub fn enabled_pixels_i2c(&self, i2c: u8) -> Vec<PixelConfig> {
        self.rocs
            .iter()
            .find(|r| r.i2c_address == i2c)
            .map(RocConfig::enabled_pixels)
            .unwrap_or_default()
    }

    /// True if every pixel of every enabled ROC is enabled
    pub fn all_pixels_enabled(&self) -> bool {
        self.enabled_rocs().all(RocConfig::all_pixels_enabled)
    }

    /// True if all enabled ROCs share the enabled-pixel list of the first one
    pub fn same_pixel_configuration(&self) -> bool {
        let mut enabled = self.enabled_rocs().map(|r| r.enabled_pixels());
        let Some(first) = enabled.next() else {
            return true;
        };
        enabled.all(|pixels| {
            pixels.len() == first.len()
                && pixels.iter().zip(&first).all(|(a, b)| a.same_setup(b))
        })
    }

    pub fn dac(&self, roc_id: usize, register: u8) -> Option<u8> {
        self.rocs.get(roc_id).and_then(|r| r.dac(register))
    }

    /// Enable or disable a pixel on one ROC, or on all ROCs with `None`
    pub fn test_pixel(&mut self, column: u8, row: u8, enable: bool, roc_id: Option<usize>) {
        self.for_pixel(column, row, roc_id, |p| p.enable = enable);
    }

    /// Mask or unmask a pixel on one ROC, or on all ROCs with `None`
    pub fn mask_pixel(&mut self, column: u8, row: u8, mask: bool, roc_id: Option<usize>) {
        self.for_pixel(column, row, roc_id, |p| p.mask = mask);
    }

    pub fn test_all_pixels(&mut self, enable: bool) {
        for pixel in self.rocs.iter_mut().flat_map(|r| r.pixels.iter_mut()) {
            pixel.enable = enable;
        }
    }

    pub fn mask_all_pixels(&mut self, mask: bool) {
        for pixel in self.rocs.iter_mut().flat_map(|r| r.pixels.iter_mut()) {
            pixel.mask = mask;
        }
    }

    pub fn set_roc_enable(&mut self, roc_id: usize, enable: bool) {
        if let Some(roc) = self.rocs.get_mut(roc_id) {
            roc.enable = enable;
        }
    }

    /// Sum of all configured token chain lengths
    pub fn total_token_chain_length(&self) -> usize {
        self.tbms
            .iter()
            .flat_map(|t| t.token_chains.iter())
            .map(|n| *n as usize)
            .sum()
    }

    fn for_pixel(
        &mut self,
        column: u8,
        row: u8,
        roc_id: Option<usize>,
        mut apply: impl FnMut(&mut PixelConfig),
    ) {
        for (id, roc) in self.rocs.iter_mut().enumerate() {
            if roc_id.is_some_and(|wanted| wanted != id) {
                continue;
            }
            if let Some(pixel) = roc.pixel_mut(column, row) {
                apply(pixel);
            }
        }
    }
}

fn pixel_entry(
    roc: &mut RocConfig,
    index: usize,
    column: u8,
    row: u8,
) -> Result<&mut PixelConfig, ConfigError> {
    roc.pixel_mut(column, row).ok_or_else(|| {
        ConfigError::Invalid(format!(
            "pixel ({}, {}) outside of valid address range on ROC {}",
            column, row, index
        ))
    })
}

// =============================================================================
// File representation
// =============================================================================

/// DUT section of the configuration file
#[derive(Debug, Clone, Deserialize)]
pub struct DutConfig {
    /// ROC flavor name, e.g. "psi46digv21"
    #[serde(default = "default_roc_type")]
    pub roc_type: String,

    /// TBM flavor name, "notbm" for single-ROC setups
    #[serde(default = "default_tbm_type")]
    pub tbm_type: String,

    #[serde(default = "default_hub_id")]
    pub hub_id: u8,

    /// Register settings per TBM core, by name
    #[serde(default)]
    pub tbm_registers: Vec<BTreeMap<String, u8>>,

    #[serde(default = "default_rocs")]
    pub rocs: Vec<RocFileConfig>,
}

impl Default for DutConfig {
    fn default() -> Self {
        Self {
            roc_type: default_roc_type(),
            tbm_type: default_tbm_type(),
            hub_id: default_hub_id(),
            tbm_registers: Vec::new(),
            rocs: default_rocs(),
        }
    }
}

/// One ROC in the configuration file
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RocFileConfig {
    /// I2C address, defaults to the position in the list
    #[serde(default)]
    pub i2c: Option<u8>,

    #[serde(default = "default_true")]
    pub enable: bool,

    /// DAC values by register name
    #[serde(default)]
    pub dacs: BTreeMap<String, u8>,

    /// Trim applied to all pixels
    #[serde(default = "default_trim")]
    pub trim: u8,

    /// Individual trims as [column, row, trim]
    #[serde(default)]
    pub trims: Vec<[u8; 3]>,

    /// Masked pixels as [column, row]
    #[serde(default)]
    pub masked: Vec<[u8; 2]>,

    /// Pixels excluded from tests as [column, row]
    #[serde(default)]
    pub disabled: Vec<[u8; 2]>,
}

fn default_roc_type() -> String {
    "psi46digv21".to_string()
}

fn default_tbm_type() -> String {
    "notbm".to_string()
}

fn default_hub_id() -> u8 {
    31
}

fn default_rocs() -> Vec<RocFileConfig> {
    vec![RocFileConfig {
        enable: true,
        trim: TRIM_MAX,
        ..Default::default()
    }]
}

fn default_true() -> bool {
    true
}

fn default_trim() -> u8 {
    TRIM_MAX
}
