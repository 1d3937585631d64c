//! Result repacking
//!
//! The testboard returns one condensed event per (pixel, DAC setting) in
//! loop order. These functions sort that flat stream into pixel maps and
//! DAC tables and extract threshold values from efficiency curves.

use std::collections::{BTreeMap, BTreeSet};
use std::time::Instant;

use tracing::{debug, error, warn};

use super::{DacDacScanResult, DacRange, DacScanResult, ScanFlags};
use crate::common::pixel::constants::{ROC_NUMCOLS, ROC_NUMROWS};
use crate::common::{sort_pixels, Event, Pixel};

type Address = (u8, u8, u8);

/// Expected pixel address while walking a test in loop order
#[derive(Debug, Default)]
struct OrderCursor {
    column: u8,
    row: u8,
}

impl OrderCursor {
    /// Negate the value of a hit that does not belong to the pixel under test
    fn check(&self, pixel: &mut Pixel, flags: ScanFlags) {
        if pixel.column == self.column && pixel.row == self.row {
            return;
        }
        if flags.contains(ScanFlags::FORCE_UNMASKED) {
            debug!("Background hit: {}", pixel);
        } else {
            error!(
                expected_column = self.column,
                expected_row = self.row,
                "Pixel does not belong here: {}",
                pixel
            );
        }
        pixel.value = -pixel.value;
    }

    fn advance(&mut self) {
        self.row += 1;
        if self.row >= ROC_NUMROWS {
            self.row = 0;
            self.column += 1;
        }
        if self.column >= ROC_NUMCOLS {
            self.row = 0;
            self.column = 0;
        }
    }
}

/// Flatten a map test into one pixel list
pub fn repack_map(events: Vec<Event>, flags: ScanFlags) -> Vec<Pixel> {
    let check_order = flags.contains(ScanFlags::CHECK_ORDER);
    let mut cursor = OrderCursor::default();
    let mut result = Vec::new();

    for event in events {
        for mut pixel in event.pixels {
            if check_order {
                cursor.check(&mut pixel, flags);
            }
            result.push(pixel);
        }
        cursor.advance();
    }

    if !flags.contains(ScanFlags::NOSORT) {
        sort_pixels(&mut result);
    }
    debug!(pixels = result.len(), "Repacked map data");
    result
}

/// Sort a DAC scan into one bucket per DAC setting.
///
/// The event count has to be a multiple of the number of DAC settings,
/// otherwise the result is empty.
pub fn repack_dac_scan(events: Vec<Event>, range: &DacRange, flags: ScanFlags) -> DacScanResult {
    let start = Instant::now();
    let n_steps = range.n_steps();
    if events.len() % n_steps != 0 {
        error!(
            events = events.len(),
            dac_values = n_steps,
            "Data size not as expected, events do not fit the DAC range"
        );
        return Vec::new();
    }

    debug!(
        min = range.min(),
        max = range.max(),
        step = range.step(),
        events = events.len(),
        "Packing DAC range"
    );

    let check_order = flags.contains(ScanFlags::CHECK_ORDER);
    let mut cursor = OrderCursor::default();
    let mut result: DacScanResult = range.values().map(|dac| (dac, Vec::new())).collect();
    let mut current = range.min() as u16;

    for event in events {
        if current > range.max() as u16 {
            current = range.min() as u16;
        }

        let bucket = &mut result[range.index(current)].1;
        for mut pixel in event.pixels {
            if check_order {
                cursor.check(&mut pixel, flags);
            }
            bucket.push(pixel);
        }

        // The pixel under test changes after its last DAC setting
        if current == range.last() as u16 {
            cursor.advance();
        }
        current += range.step() as u16;
    }

    debug!(
        elapsed_ms = start.elapsed().as_millis() as u64,
        "Repacked DAC scan data"
    );
    result
}

/// Sort a DAC/DAC scan into one bucket per (DAC1, DAC2) pair, DAC2 running fastest
pub fn repack_dac_dac_scan(
    events: Vec<Event>,
    range1: &DacRange,
    range2: &DacRange,
    _flags: ScanFlags,
) -> DacDacScanResult {
    let start = Instant::now();
    let n_steps = range1.n_steps() * range2.n_steps();
    if events.len() % n_steps != 0 {
        error!(
            events = events.len(),
            dac_values = n_steps,
            "Data size not as expected, events do not fit the DAC ranges"
        );
        return Vec::new();
    }

    debug!(
        dac1_min = range1.min(),
        dac1_max = range1.max(),
        dac2_min = range2.min(),
        dac2_max = range2.max(),
        events = events.len(),
        "Packing DAC/DAC range"
    );

    let mut result: DacDacScanResult = range1
        .values()
        .flat_map(|dac1| range2.values().map(move |dac2| (dac1, (dac2, Vec::new()))))
        .collect();

    let mut current1 = range1.min() as u16;
    let mut current2 = range2.min() as u16;
    for event in events {
        if current2 > range2.max() as u16 {
            current2 = range2.min() as u16;
            current1 += range1.step() as u16;
        }
        if current1 > range1.max() as u16 {
            current1 = range1.min() as u16;
        }

        let index = range1.index(current1) * range2.n_steps() + range2.index(current2);
        result[index].1 .1.extend(event.pixels);
        current2 += range2.step() as u16;
    }

    debug!(
        elapsed_ms = start.elapsed().as_millis() as u64,
        "Repacked DAC/DAC scan data"
    );
    result
}

/// Hit count reached at `level` percent of `n_triggers`, rounded up
fn threshold_count(n_triggers: u16, level: u8) -> i32 {
    (n_triggers as i32 * level as i32 + 99) / 100
}

/// Threshold search over efficiency curves, one state per pixel
#[derive(Debug, Default)]
struct EdgeFinder {
    threshold: i32,
    /// Pixels with the DAC value of their threshold so far, in order of appearance
    pixels: Vec<Pixel>,
    index: BTreeMap<Address, usize>,
    last_efficiency: BTreeMap<Address, i32>,
    found: BTreeSet<Address>,
}

impl EdgeFinder {
    fn new(threshold: i32) -> Self {
        Self {
            threshold,
            ..Default::default()
        }
    }

    /// Feed the efficiency of one pixel at one DAC setting
    fn feed(&mut self, pixel: &Pixel, dac: u8) {
        let address = pixel.address();
        if self.found.contains(&address) {
            return;
        }
        let efficiency = pixel.value as i32;

        match self.index.get(&address) {
            Some(&i) => {
                let old = self.last_efficiency[&address];
                let delta_old = (old - self.threshold).abs();
                let delta_new = (efficiency - self.threshold).abs();
                let positive_slope = efficiency - old > 0;

                // A negative slope is a ripple, not the edge
                if positive_slope && delta_new >= delta_old {
                    self.found.insert(address);
                    return;
                }
                self.pixels[i].value = dac as f64;
                self.last_efficiency.insert(address, efficiency);
            }
            None => {
                if efficiency >= self.threshold {
                    self.found.insert(address);
                }
                self.last_efficiency.insert(address, efficiency);
                self.index.insert(address, self.pixels.len());
                self.pixels.push(Pixel {
                    value: dac as f64,
                    ..*pixel
                });
            }
        }
    }

    /// Pixels that never crossed the threshold get `boundary`
    fn finish(mut self, boundary: u8) -> Vec<Pixel> {
        for pixel in self.pixels.iter_mut() {
            if !self.found.contains(&pixel.address()) {
                pixel.value = boundary as f64;
                warn!("No threshold found for {}", pixel);
            }
        }
        self.pixels
    }
}

/// Find the DAC value at which each pixel reaches `level` percent efficiency.
///
/// Buckets are walked upwards for `RISING_EDGE`, downwards otherwise.
pub fn repack_threshold_map(
    events: Vec<Event>,
    range: &DacRange,
    level: u8,
    n_triggers: u16,
    flags: ScanFlags,
) -> Vec<Pixel> {
    let threshold = threshold_count(n_triggers, level);
    let rising = flags.contains(ScanFlags::RISING_EDGE);
    debug!(
        threshold,
        edge = if rising { "rising" } else { "falling" },
        "Scanning for threshold level"
    );

    let packed = repack_dac_scan(events, range, flags);
    let mut finder = EdgeFinder::new(threshold);
    let mut visit = |(dac, pixels): &(u8, Vec<Pixel>)| {
        for pixel in pixels {
            finder.feed(pixel, *dac);
        }
    };
    if rising {
        packed.iter().for_each(&mut visit);
    } else {
        packed.iter().rev().for_each(&mut visit);
    }

    let boundary = if rising { range.max() } else { range.min() };
    let mut result = finder.finish(boundary);
    if !flags.contains(ScanFlags::NOSORT) {
        sort_pixels(&mut result);
    }
    result
}

/// Threshold in DAC1 for every DAC2 setting of a DAC/DAC efficiency scan.
///
/// Rows appear in order of first appearance of their DAC2 value, sorted by
/// DAC2 unless `NOSORT`.
#[allow(clippy::too_many_arguments)]
pub fn repack_threshold_dac_scan(
    events: Vec<Event>,
    range1: &DacRange,
    range2: &DacRange,
    level: u8,
    n_triggers: u16,
    flags: ScanFlags,
) -> DacScanResult {
    let threshold = threshold_count(n_triggers, level);
    let rising = flags.contains(ScanFlags::RISING_EDGE);
    debug!(
        threshold,
        edge = if rising { "rising" } else { "falling" },
        "Scanning for threshold level"
    );

    let packed = repack_dac_dac_scan(events, range1, range2, flags);
    let mut finders: Vec<(u8, EdgeFinder)> = Vec::new();
    let mut visit = |(dac1, (dac2, pixels)): &(u8, (u8, Vec<Pixel>))| {
        for pixel in pixels {
            let slot = match finders.iter().position(|(d, _)| d == dac2) {
                Some(slot) => slot,
                None => {
                    finders.push((*dac2, EdgeFinder::new(threshold)));
                    finders.len() - 1
                }
            };
            finders[slot].1.feed(pixel, *dac1);
        }
    };
    if rising {
        packed.iter().for_each(&mut visit);
    } else {
        packed.iter().rev().for_each(&mut visit);
    }

    let boundary = if rising { range2.max() } else { range2.min() };
    let mut result: DacScanResult = finders
        .into_iter()
        .map(|(dac2, finder)| (dac2, finder.finish(boundary)))
        .collect();
    if !flags.contains(ScanFlags::NOSORT) {
        result.sort_by_key(|(dac2, _)| *dac2);
    }
    result
}
