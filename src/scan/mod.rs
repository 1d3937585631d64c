//! Calibration scan engine
//!
//! Drives a testboard through parametrized test primitives (calibrate,
//! DAC scan, DAC/DAC scan) on one or many ROCs and repacks the flat
//! event stream into maps and DAC tables.
//!
//! # Design Principles (KISS)
//! - The testboard is a trait, the emulator and test doubles implement it
//! - Scan parameters are built once and never change during a scan
//! - Masking and calibrate teardown always run after a test
//! - Repacking is pure: events in, tables out

pub mod api;
pub mod expand;
pub mod repack;

pub use api::{DacAxis, PxarCore};
pub use expand::{expand_loop, ExecutionPlan};
pub use repack::{
    repack_dac_dac_scan, repack_dac_scan, repack_map, repack_threshold_dac_scan,
    repack_threshold_map,
};

use std::fmt;
use std::ops::{BitOr, BitOrAssign};

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::common::{DecodingStatistics, Event, Pixel, PipelineResult};
use crate::config::PixelConfig;

pub mod constants {
    /// Trigger source "pattern generator direct"
    pub const TRG_SEL_PG_DIR: u16 = 0x0004;
}

/// One table row per DAC value
pub type DacScanResult = Vec<(u8, Vec<Pixel>)>;

/// One table row per (DAC1, DAC2) pair, DAC1 outer
pub type DacDacScanResult = Vec<(u8, (u8, Vec<Pixel>))>;

// =============================================================================
// Flags and parameters
// =============================================================================

/// Bitmask steering test execution and result repacking
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ScanFlags(u16);

impl ScanFlags {
    pub const NONE: Self = Self(0x0000);
    /// Run ROC by ROC even when several ROCs are enabled
    pub const FORCE_SERIAL: Self = Self(0x0001);
    /// Inject charge through the sensor instead of the ROC calibrate capacitor
    pub const CALS: Self = Self(0x0002);
    /// Pulse the neighbouring pixel to measure cross-talk
    pub const XTALK: Self = Self(0x0004);
    /// Look for the threshold on the rising edge
    pub const RISING_EDGE: Self = Self(0x0008);
    /// Return results in readout order
    pub const NOSORT: Self = Self(0x0020);
    /// Flag hits that do not belong to the pixel under test
    pub const CHECK_ORDER: Self = Self(0x0040);
    /// Keep the whole DUT unmasked during the test
    pub const FORCE_UNMASKED: Self = Self(0x0080);

    pub const fn from_bits(bits: u16) -> Self {
        Self(bits)
    }

    pub const fn bits(self) -> u16 {
        self.0
    }

    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn insert(&mut self, other: Self) {
        self.0 |= other.0;
    }
}

impl BitOr for ScanFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl BitOrAssign for ScanFlags {
    fn bitor_assign(&mut self, rhs: Self) {
        self.insert(rhs);
    }
}

impl fmt::Display for ScanFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        const NAMES: [(ScanFlags, &str); 7] = [
            (ScanFlags::FORCE_SERIAL, "FORCE_SERIAL"),
            (ScanFlags::CALS, "CALS"),
            (ScanFlags::XTALK, "XTALK"),
            (ScanFlags::RISING_EDGE, "RISING_EDGE"),
            (ScanFlags::NOSORT, "NOSORT"),
            (ScanFlags::CHECK_ORDER, "CHECK_ORDER"),
            (ScanFlags::FORCE_UNMASKED, "FORCE_UNMASKED"),
        ];
        let set: Vec<&str> = NAMES
            .iter()
            .filter(|(flag, _)| self.contains(*flag))
            .map(|(_, name)| *name)
            .collect();
        if set.is_empty() {
            write!(f, "NONE")
        } else {
            write!(f, "{}", set.join("|"))
        }
    }
}

/// Scanned range of one DAC register
///
/// Only built through `new`, so `min <= max` and `step >= 1` always hold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DacRange {
    register: u8,
    min: u8,
    max: u8,
    step: u8,
}

impl DacRange {
    /// Inverted bounds are swapped and a zero step is raised to one, both with a warning
    pub fn new(register: u8, min: u8, max: u8, step: u8) -> Self {
        let (min, max) = if min > max {
            warn!(register, min, max, "Swapping upper and lower bound");
            (max, min)
        } else {
            (min, max)
        };
        let step = if step == 0 {
            warn!(register, "DAC step size of zero, using one");
            1
        } else {
            step
        };
        Self {
            register,
            min,
            max,
            step,
        }
    }

    pub fn register(&self) -> u8 {
        self.register
    }

    pub fn min(&self) -> u8 {
        self.min
    }

    pub fn max(&self) -> u8 {
        self.max
    }

    pub fn step(&self) -> u8 {
        self.step
    }

    /// Number of DAC settings in the range
    pub fn n_steps(&self) -> usize {
        ((self.max - self.min) / self.step) as usize + 1
    }

    /// Every DAC setting in scan order
    pub fn values(&self) -> impl Iterator<Item = u8> {
        (self.min..=self.max).step_by(self.step as usize)
    }

    /// Largest DAC setting actually reached
    pub fn last(&self) -> u8 {
        (self.min as u16 + (self.n_steps() as u16 - 1) * self.step as u16) as u8
    }

    /// Table index of a DAC setting
    fn index(&self, dac: u16) -> usize {
        ((dac - self.min as u16) / self.step as u16) as usize
    }
}

/// Everything a test primitive needs besides the DUT
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ScanParameters {
    pub dac1: Option<DacRange>,
    pub dac2: Option<DacRange>,
    pub n_triggers: u16,
    pub flags: ScanFlags,
}

impl ScanParameters {
    pub fn new(n_triggers: u16, flags: ScanFlags) -> Self {
        Self {
            dac1: None,
            dac2: None,
            n_triggers,
            flags,
        }
    }

    pub fn with_dac(mut self, range: DacRange) -> Self {
        self.dac1 = Some(range);
        self
    }

    pub fn with_dacs(mut self, dac1: DacRange, dac2: DacRange) -> Self {
        self.dac1 = Some(dac1);
        self.dac2 = Some(dac2);
        self
    }
}

// =============================================================================
// Test primitives
// =============================================================================

/// Shape of the loop the testboard runs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum TestShape {
    /// Fixed settings, `n_triggers` per pixel
    Calibrate,
    /// One DAC scanned
    DacScan,
    /// Two DACs scanned, the second one inner
    DacDacScan,
}

/// Which loop granularities the testboard offers for a test
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Coverage {
    /// One call per pixel only
    PerPixel,
    /// One call per ROC (or module) only
    WholeRoc,
    Both,
}

impl Coverage {
    pub fn whole_roc(self) -> bool {
        matches!(self, Self::WholeRoc | Self::Both)
    }

    pub fn per_pixel(self) -> bool {
        matches!(self, Self::PerPixel | Self::Both)
    }
}

/// A test the testboard knows how to loop
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TestPrimitive {
    pub shape: TestShape,
    pub coverage: Coverage,
    /// Hit counts instead of pulse heights
    pub efficiency: bool,
}

impl TestPrimitive {
    pub fn calibrate(efficiency: bool) -> Self {
        Self {
            shape: TestShape::Calibrate,
            coverage: Coverage::Both,
            efficiency,
        }
    }

    pub fn dac_scan(efficiency: bool) -> Self {
        Self {
            shape: TestShape::DacScan,
            coverage: Coverage::Both,
            efficiency,
        }
    }

    pub fn dac_dac_scan(efficiency: bool) -> Self {
        Self {
            shape: TestShape::DacDacScan,
            coverage: Coverage::Both,
            efficiency,
        }
    }

    pub fn with_coverage(mut self, coverage: Coverage) -> Self {
        self.coverage = coverage;
        self
    }
}

/// One loop invocation on the testboard.
///
/// ROCs are given by I2C address.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum HalCall {
    MultiRocAllPixels { rocs: Vec<u8> },
    MultiRocOnePixel { rocs: Vec<u8>, column: u8, row: u8 },
    RocAllPixels { roc: u8 },
    RocOnePixel { roc: u8, column: u8, row: u8 },
}

impl HalCall {
    /// I2C addresses taking part in the call
    pub fn rocs(&self) -> Vec<u8> {
        match self {
            Self::MultiRocAllPixels { rocs } | Self::MultiRocOnePixel { rocs, .. } => rocs.clone(),
            Self::RocAllPixels { roc } | Self::RocOnePixel { roc, .. } => vec![*roc],
        }
    }

    /// The single pixel under test, `None` for whole-ROC calls
    pub fn pixel(&self) -> Option<(u8, u8)> {
        match self {
            Self::MultiRocOnePixel { column, row, .. } | Self::RocOnePixel { column, row, .. } => {
                Some((*column, *row))
            }
            _ => None,
        }
    }
}

// =============================================================================
// Testboard
// =============================================================================

/// Hardware primitives the scan engine relies on.
///
/// `run_test` returns one event per (pixel, DAC setting) in loop order:
/// pixels column-major, then DAC1, then DAC2. Each event holds the hits of
/// `n_triggers` triggers condensed into one pixel per address, with the hit
/// count (efficiency) or mean pulse height as value.
pub trait TestBoard {
    fn daq_trigger_source(&mut self, source: u16) -> PipelineResult<()>;

    fn roc_set_dac(&mut self, roc: u8, register: u8, value: u8) -> PipelineResult<()>;

    fn tbm_set_reg(&mut self, hub_id: u8, register: u8, value: u8) -> PipelineResult<()>;

    /// Announce the I2C addresses of all ROCs to the testboard firmware
    fn setup_i2c_values(&mut self, rocs: &[u8]) -> PipelineResult<()>;

    /// Upload trim and mask bits used by the firmware loops
    fn setup_trim_values(&mut self, roc: u8, pixels: &[PixelConfig]) -> PipelineResult<()>;

    /// Mask the whole ROC, or unmask and trim it with `pixels`
    fn roc_set_mask(&mut self, roc: u8, mask: bool, pixels: &[PixelConfig]) -> PipelineResult<()>;

    fn roc_clear_calibrate(&mut self, roc: u8) -> PipelineResult<()>;

    /// Program a pixel address outside the matrix
    fn roc_unphysical_pixel(&mut self, roc: u8) -> PipelineResult<()>;

    fn run_test(
        &mut self,
        call: &HalCall,
        test: &TestPrimitive,
        params: &ScanParameters,
    ) -> PipelineResult<Vec<Event>>;

    /// Pull the decoding statistics, clearing them
    fn daq_statistics(&mut self) -> DecodingStatistics;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flags() {
        let mut flags = ScanFlags::CHECK_ORDER | ScanFlags::RISING_EDGE;
        assert_eq!(flags.bits(), 0x0048);
        assert!(flags.contains(ScanFlags::RISING_EDGE));
        assert!(!flags.contains(ScanFlags::FORCE_SERIAL));

        flags |= ScanFlags::FORCE_SERIAL;
        assert!(flags.contains(ScanFlags::FORCE_SERIAL));
        assert_eq!(ScanFlags::from_bits(0x80), ScanFlags::FORCE_UNMASKED);
    }

    #[test]
    fn test_flags_display() {
        assert_eq!(ScanFlags::NONE.to_string(), "NONE");
        let flags = ScanFlags::FORCE_SERIAL | ScanFlags::NOSORT;
        assert_eq!(flags.to_string(), "FORCE_SERIAL|NOSORT");
    }

    #[test]
    fn test_dac_range() {
        let range = DacRange::new(0x19, 10, 20, 2);
        assert_eq!(range.n_steps(), 6);
        assert_eq!(range.values().collect::<Vec<_>>(), vec![10, 12, 14, 16, 18, 20]);
        assert_eq!(range.last(), 20);
        assert_eq!(range.index(14), 2);
    }

    #[test]
    fn test_dac_range_uneven_step() {
        let range = DacRange::new(0x19, 10, 21, 2);
        assert_eq!(range.n_steps(), 6);
        assert_eq!(range.last(), 20);
    }

    #[test]
    fn test_dac_range_swapped_and_zero_step() {
        let range = DacRange::new(0x19, 200, 100, 0);
        assert_eq!((range.min(), range.max(), range.step()), (100, 200, 1));
        assert_eq!(range.n_steps(), 101);
        assert_eq!(range.last(), 200);
        assert_eq!(range.values().count(), 101);
    }

    #[test]
    fn test_full_range_does_not_overflow() {
        let range = DacRange::new(0x19, 0, 255, 1);
        assert_eq!(range.n_steps(), 256);
        assert_eq!(range.values().count(), 256);
        assert_eq!(range.last(), 255);
    }

    #[test]
    fn test_hal_call_accessors() {
        let call = HalCall::MultiRocOnePixel {
            rocs: vec![0, 1],
            column: 3,
            row: 4,
        };
        assert_eq!(call.rocs(), vec![0, 1]);
        assert_eq!(call.pixel(), Some((3, 4)));
        assert_eq!(HalCall::RocAllPixels { roc: 5 }.pixel(), None);
    }

    #[test]
    fn test_coverage() {
        assert!(Coverage::Both.whole_roc() && Coverage::Both.per_pixel());
        assert!(!Coverage::PerPixel.whole_roc());
        assert!(!Coverage::WholeRoc.per_pixel());
    }
}
