//! Raw sample stream writer
//!
//! Encodes hit lists into the word stream a testboard channel would
//! deliver, for every framing the splitters understand:
//! ```text
//! DESER400   a0ID 8000 | 47f8 [hit hi, 2 hit lo]... per ROC | e000 c000
//! soft TBM   a0ID 8000 | 47f8 [hit hi, 2 hit lo]... per ROC | e000
//! DESER160   87f8 [hit hi, hit lo]...  (last word carries 0x4000)
//! analog     UB|8000 B LASTDAC [c1 c0 r2 r1 r0 ph]...  (last word carries 0x4000)
//! ```

use crate::common::pixel::constants::{ANALOG_MASK, ROC_NUMROWS};
use crate::common::Pixel;
use crate::reader::decoder::{DecoderConfig, Envelope};

mod constants {
    pub const TBM_HEADER1: u16 = 0xa000;
    pub const TBM_HEADER2: u16 = 0x8000;
    pub const TBM_TRAILER1: u16 = 0xe000;
    pub const TBM_TRAILER2: u16 = 0xc000;
    pub const ROC_HEADER_MARKER: u16 = 0x4000;
    pub const PIXEL_LOW_MARKER: u16 = 0x2000;

    /// 12-bit ROC header without readback bits
    pub const ROC_HEADER: u16 = 0x07f8;

    pub const DESER160_START: u16 = 0x8000;
    pub const DESER160_END: u16 = 0x4000;

    pub const DATA_MASK: u32 = 0x0fff;
    pub const DATA_BITS: u32 = 12;

    /// PSI46DIG row digits are transmitted inverted
    pub const ROW_DIGITS_MASK: u32 = (7 << 15) | (7 << 12) | (7 << 9);

    /// Analog header levels; the decoder derives one address step of 100 from them
    pub const ULTRABLACK: i32 = -400;
    pub const BLACK: i32 = 0;
    pub const LEVEL_STEP: i32 = (BLACK - ULTRABLACK) / 4;
}

use constants::*;

/// Encoder for the sample stream of one channel
#[derive(Debug, Clone)]
pub struct StreamWriter {
    config: DecoderConfig,
    event_id: u8,
}

impl StreamWriter {
    pub fn new(config: DecoderConfig) -> Self {
        Self {
            config,
            event_id: 0,
        }
    }

    pub fn config(&self) -> &DecoderConfig {
        &self.config
    }

    /// Append one event to `out`.
    ///
    /// `rocs` holds the hits per token chain position. Missing positions
    /// are written as ROCs without hits; DESER160 only uses the first.
    pub fn write_event(&mut self, rocs: &[Vec<Pixel>], out: &mut Vec<u16>) {
        match self.config.envelope {
            Envelope::Deser400 => {
                self.write_tbm_header(out);
                self.write_roc_section(rocs, out);
                out.push(TBM_TRAILER1);
                out.push(TBM_TRAILER2);
            }
            Envelope::SoftTbm => {
                self.write_tbm_header(out);
                self.write_roc_section(rocs, out);
                out.push(TBM_TRAILER1);
            }
            Envelope::Deser160 => {
                let hits = rocs.first().map(Vec::as_slice).unwrap_or_default();
                let start = out.len();
                if self.config.is_analog() {
                    write_analog(hits, out);
                } else {
                    self.write_deser160(hits, out);
                }
                out[start] |= DESER160_START;
                if let Some(last) = out.last_mut() {
                    *last |= DESER160_END;
                }
            }
        }
    }

    fn write_tbm_header(&mut self, out: &mut Vec<u16>) {
        out.push(TBM_HEADER1 | self.event_id as u16);
        out.push(TBM_HEADER2);
        self.event_id = self.event_id.wrapping_add(1);
    }

    fn write_roc_section(&self, rocs: &[Vec<Pixel>], out: &mut Vec<u16>) {
        for position in 0..self.config.token_chain_length as usize {
            out.push(ROC_HEADER_MARKER | ROC_HEADER);
            for pixel in rocs.get(position).into_iter().flatten() {
                let raw = self.raw_hit(pixel);
                out.push(((raw >> DATA_BITS) & DATA_MASK) as u16);
                out.push(PIXEL_LOW_MARKER | (raw & DATA_MASK) as u16);
            }
        }
    }

    fn write_deser160(&self, hits: &[Pixel], out: &mut Vec<u16>) {
        out.push(ROC_HEADER);
        for pixel in hits {
            let raw = self.raw_hit(pixel);
            out.push(((raw >> DATA_BITS) & DATA_MASK) as u16);
            out.push((raw & DATA_MASK) as u16);
        }
    }

    fn raw_hit(&self, pixel: &Pixel) -> u32 {
        let raw = pixel.encode();
        if self.config.inverted_address() {
            raw ^ ROW_DIGITS_MASK
        } else {
            raw
        }
    }
}

/// 12-bit two's complement ADC sample
fn level(x: i32) -> u16 {
    (x as u16) & ANALOG_MASK
}

/// ADC level encoding one address digit
fn digit(d: u32) -> u16 {
    level(BLACK + (d as i32 - 1) * LEVEL_STEP)
}

fn write_analog(hits: &[Pixel], out: &mut Vec<u16>) {
    out.push(level(ULTRABLACK));
    out.push(level(BLACK));
    // Last DAC
    out.push(0);

    for pixel in hits {
        let c = pixel.column as u32 / 2;
        let r = 2 * (ROC_NUMROWS as u32 - pixel.row as u32) + pixel.column as u32 % 2;
        out.extend([
            digit(c / 6),
            digit(c % 6),
            digit(r / 36),
            digit((r % 36) / 6),
            digit(r % 6),
            level(BLACK + pixel.value as i32),
        ]);
    }
}
