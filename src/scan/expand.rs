//! Loop expansion
//!
//! Turns one test primitive into the testboard calls covering every enabled
//! pixel of every enabled ROC, bracketed by masking/trimming and teardown.

use std::time::Instant;

use tracing::{debug, error, info};

use super::constants::TRG_SEL_PG_DIR;
use super::{HalCall, ScanFlags, ScanParameters, TestBoard, TestPrimitive};
use crate::common::{Event, PipelineResult};
use crate::config::Dut;

/// How a test is spread over the testboard, chosen once per test
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionPlan {
    /// One call for all enabled ROCs and all pixels
    MultiRocAllPixels,
    /// One call per enabled pixel, all enabled ROCs in parallel
    MultiRocPerPixel,
    /// One call per enabled ROC
    RocByRocAllPixels,
    /// One call per enabled pixel of every enabled ROC
    RocByRocPerPixel,
    /// The testboard offers no loop for this configuration
    Unavailable,
}

impl ExecutionPlan {
    pub fn select(dut: &Dut, test: &TestPrimitive, flags: ScanFlags) -> Self {
        let parallel = dut.n_enabled_rocs() > 1 && !flags.contains(ScanFlags::FORCE_SERIAL);
        let whole_roc = dut.all_pixels_enabled() && test.coverage.whole_roc();
        match (parallel, whole_roc, test.coverage.per_pixel()) {
            (true, true, _) => Self::MultiRocAllPixels,
            (true, false, true) => Self::MultiRocPerPixel,
            (false, true, _) => Self::RocByRocAllPixels,
            (false, false, true) => Self::RocByRocPerPixel,
            (_, false, false) => Self::Unavailable,
        }
    }
}

/// Run `test` on every enabled ROC and pixel of `dut`.
///
/// Events are returned in call order. The DUT is masked and calibrate
/// signals are cleared afterwards, also when a testboard call failed.
pub fn expand_loop<B: TestBoard>(
    board: &mut B,
    dut: &Dut,
    test: &TestPrimitive,
    params: &ScanParameters,
) -> PipelineResult<Vec<Event>> {
    let start = Instant::now();

    let result = run_loop(board, dut, test, params);
    let teardown = mask_and_trim(board, dut, false).and_then(|_| clear_calibrate(board, dut));

    let data = result?;
    teardown?;

    if data.is_empty() {
        error!("No data from test function, are any ROCs or pixels enabled?");
    }
    info!(
        elapsed_ms = start.elapsed().as_millis() as u64,
        events = data.len(),
        "Test finished"
    );
    Ok(data)
}

fn run_loop<B: TestBoard>(
    board: &mut B,
    dut: &Dut,
    test: &TestPrimitive,
    params: &ScanParameters,
) -> PipelineResult<Vec<Event>> {
    board.daq_trigger_source(TRG_SEL_PG_DIR)?;

    let mut flags = params.flags;
    if !dut.same_pixel_configuration() {
        info!("Not all ROCs have their pixels configured the same way, running serially");
        flags |= ScanFlags::FORCE_SERIAL;
    }

    if !flags.contains(ScanFlags::FORCE_UNMASKED) {
        upload_trims(board, dut)?;
        mask_and_trim(board, dut, false)?;
    } else if flags.contains(ScanFlags::FORCE_SERIAL) {
        mask_and_trim(board, dut, false)?;
    } else {
        mask_and_trim(board, dut, true)?;
    }

    debug!("Programming unphysical pixel on all ROCs");
    for roc in &dut.rocs {
        board.roc_unphysical_pixel(roc.i2c_address)?;
    }

    let plan = ExecutionPlan::select(dut, test, flags);
    let params = ScanParameters { flags, ..*params };
    let rocs = dut.enabled_roc_i2c();
    let mut data = Vec::new();

    match plan {
        ExecutionPlan::MultiRocAllPixels => {
            debug!("Loop contains one multi-ROC call");
            data = board.run_test(&HalCall::MultiRocAllPixels { rocs }, test, &params)?;
        }
        ExecutionPlan::MultiRocPerPixel => {
            let first = dut.enabled_roc_ids().first().copied().unwrap_or_default();
            let pixels = dut.enabled_pixels(first);
            debug!(calls = pixels.len(), "Loop contains multi-ROC pixel calls");
            for pixel in pixels {
                let call = HalCall::MultiRocOnePixel {
                    rocs: rocs.clone(),
                    column: pixel.column,
                    row: pixel.row,
                };
                data.extend(board.run_test(&call, test, &params)?);
            }
        }
        ExecutionPlan::RocByRocAllPixels => {
            debug!(calls = rocs.len(), "Loop contains one call per ROC");
            let trim_each = flags.contains(ScanFlags::FORCE_SERIAL | ScanFlags::FORCE_UNMASKED);
            for roc in dut.enabled_rocs() {
                if trim_each {
                    board.roc_set_mask(roc.i2c_address, false, &roc.pixels)?;
                }
                let call = HalCall::RocAllPixels {
                    roc: roc.i2c_address,
                };
                data.extend(board.run_test(&call, test, &params)?);
            }
        }
        ExecutionPlan::RocByRocPerPixel => {
            for roc in dut.enabled_rocs() {
                let pixels = roc.enabled_pixels();
                debug!(
                    roc = roc.i2c_address,
                    calls = pixels.len(),
                    "Loop contains one call per pixel"
                );
                for pixel in pixels {
                    let call = HalCall::RocOnePixel {
                        roc: roc.i2c_address,
                        column: pixel.column,
                        row: pixel.row,
                    };
                    data.extend(board.run_test(&call, test, &params)?);
                }
            }
        }
        ExecutionPlan::Unavailable => {
            error!(
                shape = ?test.shape,
                coverage = ?test.coverage,
                "Loop expansion failed, no matching testboard function"
            );
        }
    }

    Ok(data)
}

/// Transmit all I2C addresses and the trim/mask bits of every ROC
fn upload_trims<B: TestBoard>(board: &mut B, dut: &Dut) -> PipelineResult<()> {
    board.setup_i2c_values(&dut.roc_i2c())?;
    for roc in &dut.rocs {
        board.setup_trim_values(roc.i2c_address, &roc.pixels)?;
    }
    Ok(())
}

/// Trim enabled ROCs as configured (`trim`) or mask them; disabled ROCs are always masked
fn mask_and_trim<B: TestBoard>(board: &mut B, dut: &Dut, trim: bool) -> PipelineResult<()> {
    for roc in &dut.rocs {
        if trim && roc.enable {
            debug!(
                roc = roc.i2c_address,
                masked = roc.masked_pixels(),
                "Unmasking and trimming ROC"
            );
            board.roc_set_mask(roc.i2c_address, false, &roc.pixels)?;
        } else {
            debug!(roc = roc.i2c_address, "Masking ROC");
            board.roc_set_mask(roc.i2c_address, true, &[])?;
        }
    }
    Ok(())
}

fn clear_calibrate<B: TestBoard>(board: &mut B, dut: &Dut) -> PipelineResult<()> {
    for roc in &dut.rocs {
        debug!(roc = roc.i2c_address, "Clearing calibrate");
        board.roc_clear_calibrate(roc.i2c_address)?;
    }
    Ok(())
}
