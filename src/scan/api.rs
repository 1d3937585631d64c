//! Test API
//!
//! `PxarCore` owns the testboard, the DUT model and the register
//! dictionary. Register names are resolved here, the tests are expanded
//! into testboard calls and the results repacked.

use tracing::{debug, info, warn};

use super::{
    expand_loop, repack_dac_dac_scan, repack_dac_scan, repack_map, repack_threshold_dac_scan,
    repack_threshold_map, Coverage, DacDacScanResult, DacRange, DacScanResult, ScanFlags,
    ScanParameters, TestBoard, TestPrimitive,
};
use crate::common::{DecodingStatistics, Event, Pixel, PipelineError, PipelineResult};
use crate::config::{Dut, RegisterDictionary, RegisterKind};

/// Level used by `threshold_map_default`, in percent
pub const DEFAULT_THRESHOLD_LEVEL: u8 = 50;

/// One scanned DAC, by register name
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DacAxis<'a> {
    pub name: &'a str,
    pub min: u8,
    pub max: u8,
    pub step: u8,
}

impl<'a> DacAxis<'a> {
    pub fn new(name: &'a str, min: u8, max: u8) -> Self {
        Self {
            name,
            min,
            max,
            step: 1,
        }
    }

    pub fn with_step(mut self, step: u8) -> Self {
        self.step = step;
        self
    }
}

/// Testboard, DUT and dictionaries behind one API
#[derive(Debug)]
pub struct PxarCore<B: TestBoard> {
    board: B,
    dut: Dut,
    registers: RegisterDictionary,
}

impl<B: TestBoard> PxarCore<B> {
    pub fn new(board: B, dut: Dut) -> Self {
        Self {
            board,
            dut,
            registers: RegisterDictionary::new(),
        }
    }

    pub fn board(&self) -> &B {
        &self.board
    }

    pub fn board_mut(&mut self) -> &mut B {
        &mut self.board
    }

    pub fn dut(&self) -> &Dut {
        &self.dut
    }

    pub fn dut_mut(&mut self) -> &mut Dut {
        &mut self.dut
    }

    /// Program I2C addresses, DACs and TBM registers of the DUT
    pub fn program_dut(&mut self) -> PipelineResult<()> {
        self.board.setup_i2c_values(&self.dut.roc_i2c())?;
        for tbm in self.dut.tbms.iter().filter(|t| t.enable) {
            for (register, value) in &tbm.registers {
                self.board
                    .tbm_set_reg(tbm.hub_id, tbm.core | register, *value)?;
            }
        }
        for roc in self.dut.enabled_rocs() {
            for (register, value) in &roc.dacs {
                self.board.roc_set_dac(roc.i2c_address, *register, *value)?;
            }
        }
        info!(
            rocs = self.dut.n_enabled_rocs(),
            tbm_cores = self.dut.tbms.len(),
            "DUT programmed"
        );
        Ok(())
    }

    // =========================================================================
    // Registers
    // =========================================================================

    /// Resolve a register name and clamp `value` to its range.
    ///
    /// Returns the register id and the value to program.
    pub fn verify_register(
        &self,
        name: &str,
        value: u8,
        kind: RegisterKind,
    ) -> PipelineResult<(u8, u8)> {
        let register = self
            .registers
            .register(name, kind)
            .ok_or_else(|| PipelineError::InvalidRegister(name.to_string()))?;

        if value > register.size {
            warn!(
                register = name,
                value,
                limit = register.size,
                "Register range overflow, clamping"
            );
            return Ok((register.id, register.size));
        }
        Ok((register.id, value))
    }

    /// Largest value a ROC DAC accepts
    pub fn dac_range(&self, name: &str) -> PipelineResult<u8> {
        self.registers
            .register(name, RegisterKind::Roc)
            .map(|reg| reg.size)
            .ok_or_else(|| PipelineError::InvalidRegister(name.to_string()))
    }

    /// Set a DAC on the ROC at position `roc_id` and record it in the DUT
    pub fn set_dac(&mut self, name: &str, value: u8, roc_id: usize) -> PipelineResult<()> {
        let (register, value) = self.verify_register(name, value, RegisterKind::Roc)?;
        let roc = self
            .dut
            .rocs
            .get_mut(roc_id)
            .ok_or_else(|| PipelineError::config(format!("no ROC with id {}", roc_id)))?;

        roc.dacs.insert(register, value);
        if roc.enable {
            self.board.roc_set_dac(roc.i2c_address, register, value)?;
        } else {
            debug!(roc = roc_id, register = name, "ROC disabled, value only stored");
        }
        Ok(())
    }

    /// Set a DAC on every ROC
    pub fn set_dac_all(&mut self, name: &str, value: u8) -> PipelineResult<()> {
        for roc_id in 0..self.dut.rocs.len() {
            self.set_dac(name, value, roc_id)?;
        }
        Ok(())
    }

    /// Set a register on every TBM core
    pub fn set_tbm_reg(&mut self, name: &str, value: u8) -> PipelineResult<()> {
        let (register, value) = self.verify_register(name, value, RegisterKind::Tbm)?;
        for tbm in self.dut.tbms.iter_mut() {
            tbm.registers.insert(register, value);
            if tbm.enable {
                self.board
                    .tbm_set_reg(tbm.hub_id, tbm.core | register, value)?;
            }
        }
        Ok(())
    }

    fn dac_range_of(&self, axis: &DacAxis) -> PipelineResult<DacRange> {
        let (register, min) = self.verify_register(axis.name, axis.min, RegisterKind::Roc)?;
        let (_, max) = self.verify_register(axis.name, axis.max, RegisterKind::Roc)?;
        Ok(DacRange::new(register, min, max, axis.step))
    }

    // =========================================================================
    // Tests
    // =========================================================================

    /// Pulse height per pixel and DAC setting
    pub fn pulseheight_vs_dac(
        &mut self,
        axis: DacAxis,
        n_triggers: u16,
        flags: ScanFlags,
    ) -> PipelineResult<DacScanResult> {
        self.dac_scan(axis, n_triggers, flags, false)
    }

    /// Hit count per pixel and DAC setting
    pub fn efficiency_vs_dac(
        &mut self,
        axis: DacAxis,
        n_triggers: u16,
        flags: ScanFlags,
    ) -> PipelineResult<DacScanResult> {
        self.dac_scan(axis, n_triggers, flags, true)
    }

    fn dac_scan(
        &mut self,
        axis: DacAxis,
        n_triggers: u16,
        flags: ScanFlags,
        efficiency: bool,
    ) -> PipelineResult<DacScanResult> {
        let range = self.dac_range_of(&axis)?;
        let params = ScanParameters::new(n_triggers, flags).with_dac(range);
        let events = self.run(TestPrimitive::dac_scan(efficiency), params)?;
        Ok(repack_dac_scan(events, &range, flags))
    }

    /// Threshold in the first DAC for every setting of the second one
    pub fn threshold_vs_dac(
        &mut self,
        axis1: DacAxis,
        axis2: DacAxis,
        level: u8,
        n_triggers: u16,
        flags: ScanFlags,
    ) -> PipelineResult<DacScanResult> {
        check_level(level)?;
        let range1 = self.dac_range_of(&axis1)?;
        let range2 = self.dac_range_of(&axis2)?;
        let params = ScanParameters::new(n_triggers, flags).with_dacs(range1, range2);
        let test = TestPrimitive::dac_dac_scan(true).with_coverage(Coverage::PerPixel);
        let events = self.run(test, params)?;
        Ok(repack_threshold_dac_scan(
            events, &range1, &range2, level, n_triggers, flags,
        ))
    }

    pub fn pulseheight_vs_dac_dac(
        &mut self,
        axis1: DacAxis,
        axis2: DacAxis,
        n_triggers: u16,
        flags: ScanFlags,
    ) -> PipelineResult<DacDacScanResult> {
        self.dac_dac_scan(axis1, axis2, n_triggers, flags, false)
    }

    pub fn efficiency_vs_dac_dac(
        &mut self,
        axis1: DacAxis,
        axis2: DacAxis,
        n_triggers: u16,
        flags: ScanFlags,
    ) -> PipelineResult<DacDacScanResult> {
        self.dac_dac_scan(axis1, axis2, n_triggers, flags, true)
    }

    fn dac_dac_scan(
        &mut self,
        axis1: DacAxis,
        axis2: DacAxis,
        n_triggers: u16,
        flags: ScanFlags,
        efficiency: bool,
    ) -> PipelineResult<DacDacScanResult> {
        let range1 = self.dac_range_of(&axis1)?;
        let range2 = self.dac_range_of(&axis2)?;
        let params = ScanParameters::new(n_triggers, flags).with_dacs(range1, range2);
        let events = self.run(TestPrimitive::dac_dac_scan(efficiency), params)?;
        Ok(repack_dac_dac_scan(events, &range1, &range2, flags))
    }

    /// Mean pulse height of every enabled pixel
    pub fn pulseheight_map(&mut self, n_triggers: u16, flags: ScanFlags) -> PipelineResult<Vec<Pixel>> {
        let params = ScanParameters::new(n_triggers, flags);
        let events = self.run(TestPrimitive::calibrate(false), params)?;
        Ok(repack_map(events, flags))
    }

    /// Hit count of every enabled pixel
    pub fn efficiency_map(&mut self, n_triggers: u16, flags: ScanFlags) -> PipelineResult<Vec<Pixel>> {
        let params = ScanParameters::new(n_triggers, flags);
        let events = self.run(TestPrimitive::calibrate(true), params)?;
        Ok(repack_map(events, flags))
    }

    /// DAC value at which every enabled pixel reaches `level` percent efficiency
    pub fn threshold_map(
        &mut self,
        axis: DacAxis,
        level: u8,
        n_triggers: u16,
        flags: ScanFlags,
    ) -> PipelineResult<Vec<Pixel>> {
        check_level(level)?;
        let range = self.dac_range_of(&axis)?;
        let params = ScanParameters::new(n_triggers, flags).with_dac(range);
        let events = self.run(TestPrimitive::dac_scan(true), params)?;
        Ok(repack_threshold_map(events, &range, level, n_triggers, flags))
    }

    /// Threshold map at 50% over the full range of `dac`
    pub fn threshold_map_default(
        &mut self,
        dac: &str,
        n_triggers: u16,
        flags: ScanFlags,
    ) -> PipelineResult<Vec<Pixel>> {
        let max = self.dac_range(dac)?;
        self.threshold_map(
            DacAxis::new(dac, 0, max),
            DEFAULT_THRESHOLD_LEVEL,
            n_triggers,
            flags,
        )
    }

    /// Decoding statistics since the last call
    pub fn statistics(&mut self) -> DecodingStatistics {
        self.board.daq_statistics()
    }

    /// Expand the test, then restore the scanned DACs from the DUT even if it failed
    fn run(&mut self, test: TestPrimitive, params: ScanParameters) -> PipelineResult<Vec<Event>> {
        let result = expand_loop(&mut self.board, &self.dut, &test, &params);
        let restored = self.restore_dacs(&params);
        let events = result?;
        restored?;
        Ok(events)
    }

    fn restore_dacs(&mut self, params: &ScanParameters) -> PipelineResult<()> {
        for range in [params.dac1, params.dac2].into_iter().flatten() {
            for roc in self.dut.enabled_rocs() {
                match roc.dac(range.register()) {
                    Some(value) => {
                        self.board
                            .roc_set_dac(roc.i2c_address, range.register(), value)?
                    }
                    None => debug!(
                        roc = roc.i2c_address,
                        register = range.register(),
                        "No configured value to restore"
                    ),
                }
            }
        }
        Ok(())
    }
}

fn check_level(level: u8) -> PipelineResult<()> {
    if level == 0 || level > 100 {
        return Err(PipelineError::InvalidThreshold(level));
    }
    Ok(())
}
