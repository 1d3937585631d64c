//! Pixel hit type and the ROC address codecs
//!
//! Digital ROCs transmit a hit as a 24-bit word: double column and row
//! triplet address in bits 23..9, pulse height in bits 8..0 with bit 4 as a
//! zero fill bit. Analog ROCs transmit six ADC levels per hit instead.

use std::cmp::Ordering;
use std::fmt;

use serde::{Deserialize, Serialize};

use super::error::PixelError;

/// ROC geometry and raw pixel word layout
pub mod constants {
    pub const ROC_NUMROWS: u8 = 80;
    pub const ROC_NUMCOLS: u8 = 52;
    pub const ROC_NUMPIXELS: usize = ROC_NUMROWS as usize * ROC_NUMCOLS as usize;

    // Pulse height
    pub const PH_LOW_MASK: u32 = 0x0f;
    pub const PH_HIGH_MASK: u32 = 0xf0;
    pub const PH_FILL_BIT: u32 = 0x10;

    // Address: double column / 6, double column % 6
    pub const DCOL_HIGH_SHIFT: u32 = 21;
    pub const DCOL_LOW_SHIFT: u32 = 18;
    // Address: row triplet digits
    pub const ROW2_SHIFT: u32 = 15;
    pub const ROW1_SHIFT: u32 = 12;
    pub const ROW0_SHIFT: u32 = 9;
    pub const DIGIT_MASK: u32 = 0x7;

    pub const RAW_MASK: u32 = 0x00ff_ffff;

    // Analog 12-bit levels
    pub const ANALOG_MASK: u16 = 0x0fff;
    pub const ANALOG_SIGN: u16 = 0x0800;
    pub const ANALOG_WORDS: usize = 6;
}

/// One decoded pixel hit
///
/// `value` carries the pulse height for plain readout, the hit count for
/// efficiency scans or a DAC value for threshold results. Negative values
/// mark hits seen out of the expected scan order.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Pixel {
    pub roc: u8,
    pub column: u8,
    pub row: u8,
    pub value: f64,
}

impl Pixel {
    pub fn new(roc: u8, column: u8, row: u8, value: f64) -> Self {
        Self {
            roc,
            column,
            row,
            value,
        }
    }

    /// Decode a 24-bit raw hit word.
    ///
    /// `invert` flips the row digits, as required by PSI46DIG chips.
    pub fn from_raw(raw: u32, roc: u8, invert: bool) -> Result<Self, PixelError> {
        use constants::*;

        let value = (raw & PH_LOW_MASK) + ((raw >> 1) & PH_HIGH_MASK);
        if raw & PH_FILL_BIT != 0 {
            return Err(PixelError::InvalidPulseHeight);
        }

        let mut r2 = ((raw >> ROW2_SHIFT) & DIGIT_MASK) as i32;
        let mut r1 = ((raw >> ROW1_SHIFT) & DIGIT_MASK) as i32;
        let mut r0 = ((raw >> ROW0_SHIFT) & DIGIT_MASK) as i32;
        if invert {
            r2 ^= 0x7;
            r1 ^= 0x7;
            r0 ^= 0x7;
        }
        let r = r2 * 36 + r1 * 6 + r0;
        let row = ROC_NUMROWS as i32 - r / 2;
        let dcol = ((raw >> DCOL_HIGH_SHIFT) & DIGIT_MASK) * 6 + ((raw >> DCOL_LOW_SHIFT) & DIGIT_MASK);
        let column = 2 * dcol as i32 + (r & 1);

        check_address(column, row, true)?;
        Ok(Self::new(roc, column as u8, row as u8, value as f64))
    }

    /// Encode address and pulse height back into the 24-bit raw format
    pub fn encode(&self) -> u32 {
        use constants::*;

        let ph = (self.value as i32) as u32;
        let mut raw = ((ph & PH_HIGH_MASK) << 1) + (ph & PH_LOW_MASK);

        let r = 2 * (ROC_NUMROWS as u32 - self.row as u32);
        raw |= (r / 36) << ROW2_SHIFT;
        raw |= ((r % 36) / 6) << ROW1_SHIFT;
        raw |= ((r % 36) % 6 + self.column as u32 % 2) << ROW0_SHIFT;

        let dcol = self.column as u32 / 2;
        raw |= (dcol / 6) << DCOL_HIGH_SHIFT;
        raw |= (dcol % 6) << DCOL_LOW_SHIFT;

        raw & RAW_MASK
    }

    /// Decode one analog hit from its six ADC samples.
    ///
    /// Address levels are translated relative to the smoothed black and
    /// ultrablack levels of the ROC header.
    pub fn from_analog(
        samples: &[u16],
        roc: u8,
        ultrablack: i32,
        black: i32,
    ) -> Result<Self, PixelError> {
        if samples.len() != constants::ANALOG_WORDS {
            return Err(PixelError::InvalidAddress { column: -1, row: -1 });
        }

        let level0 = black;
        let level1 = (black - ultrablack) / 4;
        let level_s = level1 / 2;

        let value = expand_sign(samples[5] & constants::ANALOG_MASK) - level0;

        let digit = |x: u16| translate_level(x, level0, level1, level_s) as i32;
        let c = digit(samples[0]) * 6 + digit(samples[1]);
        let r = (digit(samples[2]) * 6 + digit(samples[3])) * 6 + digit(samples[4]);

        let row = constants::ROC_NUMROWS as i32 - r / 2;
        let column = 2 * c + (r & 1);

        check_address(column, row, false)?;
        Ok(Self::new(roc, column as u8, row as u8, value as f64))
    }

    /// (ROC, column, row) key used for ordering and lookups
    #[inline]
    pub fn address(&self) -> (u8, u8, u8) {
        (self.roc, self.column, self.row)
    }

    /// True if both hits refer to the same pixel, ignoring the value
    #[inline]
    pub fn same_address(&self, other: &Pixel) -> bool {
        self.address() == other.address()
    }
}

/// Compare two pixels by (ROC, column, row)
pub fn by_address(a: &Pixel, b: &Pixel) -> Ordering {
    a.address().cmp(&b.address())
}

/// Sort a hit list by (ROC, column, row), keeping the order of equal addresses
pub fn sort_pixels(pixels: &mut [Pixel]) {
    pixels.sort_by(by_address);
}

impl fmt::Display for Pixel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "ROC {} [{},{},{}]",
            self.roc, self.column, self.row, self.value
        )
    }
}

/// Sign-extend a 12-bit ADC sample
#[inline]
pub fn expand_sign(x: u16) -> i32 {
    let v = (x & constants::ANALOG_MASK) as i32;
    if x & constants::ANALOG_SIGN != 0 {
        v - 4096
    } else {
        v
    }
}

/// Map an analog address level onto its digit.
///
/// Results wrap like an unsigned byte, so levels far below black turn into
/// large digits and fail the range check.
fn translate_level(x: u16, level0: i32, level1: i32, level_s: i32) -> u8 {
    let mut y = expand_sign(x) - level0;
    if y >= 0 {
        y += level_s;
    } else {
        y -= level_s;
    }
    if level1 != 0 {
        (y / level1 + 1) as u8
    } else {
        0
    }
}

fn check_address(column: i32, row: i32, digital: bool) -> Result<(), PixelError> {
    let rows = constants::ROC_NUMROWS as i32;
    let cols = constants::ROC_NUMCOLS as i32;
    if (0..rows).contains(&row) && (0..cols).contains(&column) {
        return Ok(());
    }
    if digital && row == rows {
        return Err(PixelError::CorruptBuffer { row });
    }
    Err(PixelError::InvalidAddress { column, row })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_raw_roundtrip_all_addresses() {
        for column in 0..constants::ROC_NUMCOLS {
            for row in 0..constants::ROC_NUMROWS {
                for value in [0u32, 1, 15, 16, 100, 255] {
                    let pix = Pixel::new(3, column, row, value as f64);
                    let decoded = Pixel::from_raw(pix.encode(), 3, false).unwrap();
                    assert_eq!(decoded, pix, "column {} row {} value {}", column, row, value);
                }
            }
        }
    }

    #[test]
    fn test_encode_known_word() {
        // column 0, row 79: dcol 0, r = 2 -> digits 0/0/2, PH 0
        let pix = Pixel::new(0, 0, 79, 0.0);
        assert_eq!(pix.encode(), 2 << constants::ROW0_SHIFT);

        // column 1, row 79: odd column adds one to the lowest row digit
        let pix = Pixel::new(0, 1, 79, 0.0);
        assert_eq!(pix.encode(), 3 << constants::ROW0_SHIFT);
    }

    #[test]
    fn test_pulse_height_fill_bit() {
        // value 0x10 is encoded as 0x20, bit 4 stays clear
        let pix = Pixel::new(0, 10, 10, 16.0);
        assert_eq!(pix.encode() & 0x1ff, 0x20);

        let err = Pixel::from_raw(pix.encode() | 0x10, 0, false).unwrap_err();
        assert_eq!(err, PixelError::InvalidPulseHeight);
    }

    #[test]
    fn test_row_80_is_corrupt_buffer() {
        // r = 0 decodes to row 80
        let err = Pixel::from_raw(0x000000, 0, false).unwrap_err();
        assert_eq!(err, PixelError::CorruptBuffer { row: 80 });
    }

    #[test]
    fn test_out_of_range_column() {
        // dcol = 7 * 6 + 7 = 49 -> column 98
        let raw = (7 << constants::DCOL_HIGH_SHIFT) | (7 << constants::DCOL_LOW_SHIFT) | (2 << 9);
        let err = Pixel::from_raw(raw, 0, false).unwrap_err();
        assert!(matches!(err, PixelError::InvalidAddress { column: 98, .. }));
    }

    #[test]
    fn test_all_ones_word_is_invalid() {
        // 0xffffff has the fill bit set
        assert_eq!(
            Pixel::from_raw(0xffffff, 0, false).unwrap_err(),
            PixelError::InvalidPulseHeight
        );
        // 0xffffef: row digits 7/7/7 -> r = 301, negative row
        assert!(matches!(
            Pixel::from_raw(0xffffef, 0, false).unwrap_err(),
            PixelError::InvalidAddress { .. }
        ));
    }

    #[test]
    fn test_inverted_address() {
        let pix = Pixel::new(0, 20, 40, 50.0);
        let raw = pix.encode();
        let flipped = raw ^ (0x1ff << constants::ROW0_SHIFT);
        let decoded = Pixel::from_raw(flipped, 0, true).unwrap();
        assert_eq!(decoded, pix);
    }

    #[test]
    fn test_expand_sign() {
        assert_eq!(expand_sign(0x0000), 0);
        assert_eq!(expand_sign(0x07ff), 2047);
        assert_eq!(expand_sign(0x0800), -2048);
        assert_eq!(expand_sign(0x0fff), -1);
        // Bits above 12 are ignored
        assert_eq!(expand_sign(0xf001), 1);
    }

    #[test]
    fn test_analog_decode() {
        // black = 0, ultrablack = -400 -> level1 = 100, levelS = 50
        // digit d is encoded by level (d - 1) * 100
        let level = |d: i32| (((d - 1) * 100) as u16) & 0x0fff;
        // column 13: c = 6 -> c1 = 1, c0 = 0
        // row 60: r = 40 + 1 (odd column) = 41 -> r2 = 1, r1 = 0, r0 = 5
        let samples = [level(1), level(0), level(1), level(0), level(5), 120];
        let pix = Pixel::from_analog(&samples, 0, -400, 0).unwrap();
        assert_eq!(pix.column, 13);
        assert_eq!(pix.row, 60);
        assert_eq!(pix.value, 120.0);
    }

    #[test]
    fn test_analog_wrong_length() {
        assert!(Pixel::from_analog(&[0, 0, 0], 0, -400, 0).is_err());
    }

    #[test]
    fn test_sort_by_address() {
        let mut pixels = vec![
            Pixel::new(1, 0, 0, 1.0),
            Pixel::new(0, 5, 2, 1.0),
            Pixel::new(0, 5, 1, 1.0),
            Pixel::new(0, 0, 79, 1.0),
        ];
        sort_pixels(&mut pixels);
        let order: Vec<_> = pixels.iter().map(|p| p.address()).collect();
        assert_eq!(order, vec![(0, 0, 79), (0, 5, 1), (0, 5, 2), (1, 0, 0)]);
    }
}
