//! Emulated testboard
//!
//! Answers the scan engine's test calls like the firmware loops would:
//! pixel by pixel, DAC setting by DAC setting, trigger by trigger. Every
//! trigger is written as a raw sample stream, decoded through a real `Daq`
//! and the triggers of one setting are condensed into a single event.
//!
//! Response model of a pulsed, unmasked pixel:
//! - calibrate: always
//! - DAC scan: above half the range with `RISING_EDGE`, below it otherwise
//! - DAC/DAC scan: inside a diagonal band of the (DAC1, DAC2) plane
//!
//! ROC I2C addresses are taken to equal the global ROC ids of the readout.

use std::collections::{BTreeMap, BTreeSet};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::Normal;
use tracing::{debug, info, trace};

use super::{pulse_height, EmulatorConfig, EmulatorError, StreamWriter};
use crate::common::pixel::constants::{ROC_NUMCOLS, ROC_NUMROWS};
use crate::common::{DecodingStatistics, Event, Pixel, PipelineResult};
use crate::config::{Config, PixelConfig};
use crate::reader::decoder::{DecoderConfig, Envelope};
use crate::reader::{Daq, DaqChannel, MemoryChannel};
use crate::scan::{DacRange, HalCall, ScanFlags, ScanParameters, TestBoard, TestPrimitive, TestShape};

/// One DAC setting of a test loop
type Setting = (Option<u8>, Option<u8>);

/// Testboard emulation on top of in-memory DAQ channels
#[derive(Debug)]
pub struct EmulatedTestBoard {
    config: EmulatorConfig,
    daq: Daq<MemoryChannel>,
    writers: Vec<StreamWriter>,
    rng: StdRng,
    pulse_height: Normal<f64>,
    trigger_source: u16,
    i2c_addresses: Vec<u8>,
    /// DAC values by (I2C address, register)
    dacs: BTreeMap<(u8, u8), u8>,
    /// TBM registers by (hub ID, register)
    tbm_registers: BTreeMap<(u8, u8), u8>,
    /// Masked pixels per I2C address, from trim uploads and unmasking
    masked: BTreeMap<u8, BTreeSet<(u8, u8)>>,
    /// ROCs currently masked as a whole
    masked_rocs: BTreeSet<u8>,
    triggers_sent: u64,
}

impl EmulatedTestBoard {
    pub fn new(decoders: Vec<DecoderConfig>, config: EmulatorConfig) -> Result<Self, EmulatorError> {
        config.validate()?;
        let pulse_height = Normal::new(config.pulse_height_mean, config.pulse_height_sigma)?;

        let channels = decoders
            .iter()
            .map(|decoder| DaqChannel::new(MemoryChannel::default(), *decoder, true))
            .collect();
        info!(
            channels = decoders.len(),
            seed = config.seed,
            pixel_efficiency = config.pixel_efficiency,
            "Emulated testboard ready"
        );

        Ok(Self {
            rng: StdRng::seed_from_u64(config.seed),
            config,
            daq: Daq::new(channels),
            writers: decoders.into_iter().map(StreamWriter::new).collect(),
            pulse_height,
            trigger_source: 0,
            i2c_addresses: Vec::new(),
            dacs: BTreeMap::new(),
            tbm_registers: BTreeMap::new(),
            masked: BTreeMap::new(),
            masked_rocs: BTreeSet::new(),
            triggers_sent: 0,
        })
    }

    /// Board for the readout channels and emulator settings of a configuration
    pub fn from_config(config: &Config) -> Result<Self, EmulatorError> {
        Self::new(config.decoder_configs()?, config.emulator.clone())
    }

    pub fn trigger_source(&self) -> u16 {
        self.trigger_source
    }

    pub fn dac(&self, roc: u8, register: u8) -> Option<u8> {
        self.dacs.get(&(roc, register)).copied()
    }

    pub fn tbm_register(&self, hub_id: u8, register: u8) -> Option<u8> {
        self.tbm_registers.get(&(hub_id, register)).copied()
    }

    pub fn i2c_addresses(&self) -> &[u8] {
        &self.i2c_addresses
    }

    pub fn is_roc_masked(&self, roc: u8) -> bool {
        self.masked_rocs.contains(&roc)
    }

    pub fn triggers_sent(&self) -> u64 {
        self.triggers_sent
    }

    fn store_masks(&mut self, roc: u8, pixels: &[PixelConfig]) {
        let masked = pixels
            .iter()
            .filter(|p| p.mask)
            .map(|p| (p.column, p.row))
            .collect();
        self.masked.insert(roc, masked);
    }

    /// Send one trigger: write a raw event per channel with the hits of
    /// the pulsed pixel on every participating ROC
    fn trigger(
        &mut self,
        rocs: &[u8],
        pixel: (u8, u8),
        setting: Setting,
        params: &ScanParameters,
    ) {
        let (column, pulsed_row) = pixel;
        let responds = responds(setting, params);
        let row = if params.flags.contains(ScanFlags::XTALK) {
            neighbour_row(pulsed_row)
        } else {
            pulsed_row
        };
        let offset = setting.0.map_or(0.0, |dac| dac as f64 / 4.0);

        for (index, writer) in self.writers.iter_mut().enumerate() {
            let config = *writer.config();
            let positions = match config.envelope {
                Envelope::Deser160 => 1,
                _ => config.token_chain_length as usize,
            };

            let mut hits = vec![Vec::new(); positions];
            for (position, roc_hits) in hits.iter_mut().enumerate() {
                let roc = config.roc_id(position);
                if !rocs.contains(&roc) {
                    continue;
                }
                let masked = self
                    .masked
                    .get(&roc)
                    .is_some_and(|m| m.contains(&(column, pulsed_row)));
                if responds && !masked && self.rng.gen_bool(self.config.pixel_efficiency) {
                    let ph = pulse_height(&self.pulse_height, offset, &mut self.rng);
                    roc_hits.push(Pixel::new(roc, column, row, ph));
                }
                if self.config.noise_probability > 0.0
                    && self.rng.gen_bool(self.config.noise_probability)
                {
                    let ph = pulse_height(&self.pulse_height, 0.0, &mut self.rng);
                    roc_hits.push(Pixel::new(
                        roc,
                        self.rng.gen_range(0..ROC_NUMCOLS),
                        self.rng.gen_range(0..ROC_NUMROWS),
                        ph,
                    ));
                }
            }

            let mut words = Vec::new();
            writer.write_event(&hits, &mut words);
            self.daq.channels_mut()[index]
                .source_mut()
                .channel_mut()
                .push(&words);
        }

        self.triggers_sent += 1;
    }
}

/// Whether a pulsed pixel answers at the given DAC setting
fn responds(setting: Setting, params: &ScanParameters) -> bool {
    match (setting, params.dac1, params.dac2) {
        ((Some(dac1), Some(dac2)), Some(range1), Some(range2)) => {
            let (d1, span1) = relative(dac1, &range1);
            let (d2, span2) = relative(dac2, &range2);
            if span1 == 0 || span2 == 0 {
                return true;
            }
            (d1 * span2 - d2 * span1).abs() * 4 <= span1 * span2
        }
        ((Some(dac1), None), Some(range1), _) => {
            let (d, span) = relative(dac1, &range1);
            let half = span / 2;
            if params.flags.contains(ScanFlags::RISING_EDGE) {
                d > half
            } else {
                d < half
            }
        }
        _ => true,
    }
}

/// Position of `dac` inside `range` and the width of the range
fn relative(dac: u8, range: &DacRange) -> (i32, i32) {
    (
        dac as i32 - range.min() as i32,
        range.max() as i32 - range.min() as i32,
    )
}

fn neighbour_row(row: u8) -> u8 {
    if row + 1 < ROC_NUMROWS {
        row + 1
    } else {
        row - 1
    }
}

/// Merge the events of all triggers of one setting into a single event.
///
/// Efficiency tests count hits per address, otherwise the mean pulse height
/// is reported. Addresses keep their order of first appearance.
fn condense(events: Vec<Event>, efficiency: bool) -> Event {
    let mut order: Vec<(u8, u8, u8)> = Vec::new();
    let mut sums: BTreeMap<(u8, u8, u8), (u32, f64)> = BTreeMap::new();
    for pixel in events.into_iter().flat_map(|e| e.pixels) {
        let entry = sums.entry(pixel.address()).or_insert_with(|| {
            order.push(pixel.address());
            (0, 0.0)
        });
        entry.0 += 1;
        entry.1 += pixel.value;
    }

    let pixels = order
        .into_iter()
        .map(|(roc, column, row)| {
            let (count, sum) = sums[&(roc, column, row)];
            let value = if efficiency {
                count as f64
            } else {
                sum / count as f64
            };
            Pixel::new(roc, column, row, value)
        })
        .collect();
    Event::with_pixels(pixels)
}

/// All DAC settings of a test, DAC2 running fastest
fn settings(test: &TestPrimitive, params: &ScanParameters) -> Vec<Setting> {
    match (test.shape, params.dac1, params.dac2) {
        (TestShape::Calibrate, _, _) => vec![(None, None)],
        (TestShape::DacScan, Some(range), _) => range.values().map(|d| (Some(d), None)).collect(),
        (TestShape::DacDacScan, Some(range1), Some(range2)) => range1
            .values()
            .flat_map(|d1| range2.values().map(move |d2| (Some(d1), Some(d2))))
            .collect(),
        _ => Vec::new(),
    }
}

impl TestBoard for EmulatedTestBoard {
    fn daq_trigger_source(&mut self, source: u16) -> PipelineResult<()> {
        debug!(source = format_args!("0x{:04x}", source), "Trigger source selected");
        self.trigger_source = source;
        Ok(())
    }

    fn roc_set_dac(&mut self, roc: u8, register: u8, value: u8) -> PipelineResult<()> {
        trace!(roc, register, value, "Set DAC");
        self.dacs.insert((roc, register), value);
        Ok(())
    }

    fn tbm_set_reg(&mut self, hub_id: u8, register: u8, value: u8) -> PipelineResult<()> {
        trace!(hub_id, register, value, "Set TBM register");
        self.tbm_registers.insert((hub_id, register), value);
        Ok(())
    }

    fn setup_i2c_values(&mut self, rocs: &[u8]) -> PipelineResult<()> {
        self.i2c_addresses = rocs.to_vec();
        Ok(())
    }

    fn setup_trim_values(&mut self, roc: u8, pixels: &[PixelConfig]) -> PipelineResult<()> {
        self.store_masks(roc, pixels);
        Ok(())
    }

    fn roc_set_mask(&mut self, roc: u8, mask: bool, pixels: &[PixelConfig]) -> PipelineResult<()> {
        if mask {
            self.masked_rocs.insert(roc);
        } else {
            self.masked_rocs.remove(&roc);
            self.store_masks(roc, pixels);
        }
        Ok(())
    }

    fn roc_clear_calibrate(&mut self, roc: u8) -> PipelineResult<()> {
        trace!(roc, "Clear calibrate");
        Ok(())
    }

    fn roc_unphysical_pixel(&mut self, roc: u8) -> PipelineResult<()> {
        trace!(roc, "Unphysical pixel programmed");
        Ok(())
    }

    fn run_test(
        &mut self,
        call: &HalCall,
        test: &TestPrimitive,
        params: &ScanParameters,
    ) -> PipelineResult<Vec<Event>> {
        let rocs = call.rocs();
        let pixels: Vec<(u8, u8)> = match call.pixel() {
            Some(pixel) => vec![pixel],
            None => (0..ROC_NUMCOLS)
                .flat_map(|column| (0..ROC_NUMROWS).map(move |row| (column, row)))
                .collect(),
        };
        let settings = settings(test, params);
        if params.flags.contains(ScanFlags::CALS) {
            debug!("Injecting charge through the sensor");
        }
        debug!(
            ?call,
            pixels = pixels.len(),
            settings = settings.len(),
            triggers = params.n_triggers,
            "Running emulated test loop"
        );

        let mut events = Vec::with_capacity(pixels.len() * settings.len());
        for &pixel in &pixels {
            for &setting in &settings {
                for &roc in &rocs {
                    if let (Some(value), Some(range)) = (setting.0, params.dac1) {
                        self.roc_set_dac(roc, range.register(), value)?;
                    }
                    if let (Some(value), Some(range)) = (setting.1, params.dac2) {
                        self.roc_set_dac(roc, range.register(), value)?;
                    }
                }
                for _ in 0..params.n_triggers {
                    self.trigger(&rocs, pixel, setting, params);
                }
                let triggered = self.daq.all_events()?;
                events.push(condense(triggered, test.efficiency));
            }
        }
        Ok(events)
    }

    fn daq_statistics(&mut self) -> DecodingStatistics {
        self.daq.statistics()
    }
}
