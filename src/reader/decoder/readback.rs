//! ROC readback accumulator
//!
//! PSI46DIGV2 and later ROCs transmit one readback bit per event in their
//! header. Sixteen bits between two start markers form one readback value:
//! the high byte identifies the quantity, the low byte carries its value.

use tracing::{debug, warn};

use crate::common::DecodingStatistics;

mod constants {
    pub const READBACK_DATA_BIT: u16 = 0x0001;
    pub const READBACK_START_BIT: u16 = 0x0002;
    pub const READBACK_BITS: u8 = 16;
}

/// Per-ROC readback state of one channel
#[derive(Debug, Clone, Default)]
pub struct ReadbackCollector {
    shift_reg: Vec<u16>,
    count: Vec<u8>,
    values: Vec<Vec<u16>>,
}

impl ReadbackCollector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Shift in the readback bits of one ROC header.
    ///
    /// `roc` is the position of the ROC in the token chain.
    pub fn eval(&mut self, roc: usize, header: u16, stats: &mut DecodingStatistics) {
        use constants::*;

        if self.shift_reg.len() <= roc {
            self.shift_reg.resize(roc + 1, 0);
            self.count.resize(roc + 1, 0);
        }

        self.shift_reg[roc] <<= 1;
        if header & READBACK_DATA_BIT != 0 {
            self.shift_reg[roc] += 1;
        }
        self.count[roc] = self.count[roc].saturating_add(1);

        if header & READBACK_START_BIT == 0 {
            return;
        }

        if self.count[roc] == READBACK_BITS {
            if self.values.len() <= roc {
                self.values.resize(roc + 1, Vec::new());
            }
            let value = self.shift_reg[roc];
            self.values[roc].push(value);
            debug!(
                roc,
                id = (value >> 8) & 0xff,
                value = value & 0xff,
                "Readback value"
            );
        } else if self.values.get(roc).map_or(true, |v| v.is_empty()) {
            // First cycle after power-up starts at an arbitrary bit
            debug!(
                roc,
                bits = self.count[roc],
                "First readback marker, ignoring incomplete cycle"
            );
        } else {
            warn!(
                roc,
                bits = self.count[roc],
                "Readback start marker after unexpected number of readouts"
            );
            stats.errors_roc_readback += 1;
        }
        self.count[roc] = 0;
    }

    /// Collected values per ROC, without clearing them
    pub fn values(&self) -> &[Vec<u16>] {
        &self.values
    }

    /// Return the collected values and clear them
    pub fn take(&mut self) -> Vec<Vec<u16>> {
        std::mem::take(&mut self.values)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Feed one full 16-bit readback word, MSB first, start marker on the last bit
    fn feed_word(rb: &mut ReadbackCollector, roc: usize, word: u16, stats: &mut DecodingStatistics) {
        for i in (0..16).rev() {
            let bit = (word >> i) & 1;
            let start = if i == 0 { 0x0002 } else { 0 };
            rb.eval(roc, 0x07f8 | bit | start, stats);
        }
    }

    #[test]
    fn test_full_cycle() {
        let mut rb = ReadbackCollector::new();
        let mut stats = DecodingStatistics::new();
        feed_word(&mut rb, 0, 0x0c42, &mut stats);
        feed_word(&mut rb, 0, 0x0c43, &mut stats);
        assert_eq!(rb.values(), &[vec![0x0c42, 0x0c43]]);
        assert_eq!(stats.errors_roc_readback, 0);
    }

    #[test]
    fn test_first_incomplete_cycle_is_ignored() {
        let mut rb = ReadbackCollector::new();
        let mut stats = DecodingStatistics::new();
        // Three bits, then a start marker
        rb.eval(0, 0x07f8, &mut stats);
        rb.eval(0, 0x07f8, &mut stats);
        rb.eval(0, 0x07fa, &mut stats);
        assert_eq!(stats.errors_roc_readback, 0);
        assert!(rb.values().is_empty());

        feed_word(&mut rb, 0, 0x1234, &mut stats);
        assert_eq!(rb.values(), &[vec![0x1234]]);
    }

    #[test]
    fn test_short_cycle_after_valid_value_is_error() {
        let mut rb = ReadbackCollector::new();
        let mut stats = DecodingStatistics::new();
        feed_word(&mut rb, 1, 0x0c42, &mut stats);
        rb.eval(1, 0x07f8, &mut stats);
        rb.eval(1, 0x07fa, &mut stats);
        assert_eq!(stats.errors_roc_readback, 1);
        assert_eq!(rb.values().len(), 2);
        assert!(rb.values()[0].is_empty());
    }

    #[test]
    fn test_take_clears() {
        let mut rb = ReadbackCollector::new();
        let mut stats = DecodingStatistics::new();
        feed_word(&mut rb, 0, 0x0101, &mut stats);
        assert_eq!(rb.take(), vec![vec![0x0101]]);
        assert!(rb.values().is_empty());
    }
}
