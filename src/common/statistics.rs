//! Decoding statistics
//!
//! # Design Principles (KISS)
//! - Plain counters owned by one decoder, no interior mutability
//! - Counters only grow until the owner pulls them with `take()`
//! - Channels are combined explicitly with `+=`

use std::fmt;
use std::ops::AddAssign;

use serde::{Deserialize, Serialize};

/// Counter set accumulated while decoding raw events
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecodingStatistics {
    /// 16-bit words handed to the decoder
    pub info_words_read: u64,
    /// Events without any pixel hit
    pub info_events_empty: u64,
    /// Events with at least one pixel hit
    pub info_events_valid: u64,
    /// Successfully decoded pixel hits
    pub info_pixels_valid: u64,

    pub errors_event_start: u64,
    pub errors_event_stop: u64,
    pub errors_event_overflow: u64,
    pub errors_event_invalid_words: u64,
    pub errors_event_invalid_xor: u64,

    pub errors_tbm_header: u64,
    pub errors_tbm_trailer: u64,
    pub errors_tbm_eventid_mismatch: u64,

    pub errors_roc_missing: u64,
    pub errors_roc_readback: u64,

    pub errors_pixel_incomplete: u64,
    pub errors_pixel_address: u64,
    pub errors_pixel_pulseheight: u64,
    pub errors_pixel_buffer_corrupt: u64,
}

impl DecodingStatistics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reset all counters to zero
    pub fn clear(&mut self) {
        *self = Self::default();
    }

    /// Return the current counters and reset them
    pub fn take(&mut self) -> Self {
        std::mem::take(self)
    }

    pub fn info_events_total(&self) -> u64 {
        self.info_events_empty + self.info_events_valid
    }

    pub fn errors_event(&self) -> u64 {
        self.errors_event_start
            + self.errors_event_stop
            + self.errors_event_overflow
            + self.errors_event_invalid_words
            + self.errors_event_invalid_xor
    }

    pub fn errors_tbm(&self) -> u64 {
        self.errors_tbm_header + self.errors_tbm_trailer + self.errors_tbm_eventid_mismatch
    }

    pub fn errors_roc(&self) -> u64 {
        self.errors_roc_missing + self.errors_roc_readback
    }

    pub fn errors_pixel(&self) -> u64 {
        self.errors_pixel_incomplete
            + self.errors_pixel_address
            + self.errors_pixel_pulseheight
            + self.errors_pixel_buffer_corrupt
    }

    /// Sum of all error counters
    pub fn errors(&self) -> u64 {
        self.errors_event() + self.errors_tbm() + self.errors_roc() + self.errors_pixel()
    }
}

impl AddAssign for DecodingStatistics {
    fn add_assign(&mut self, rhs: Self) {
        self.info_words_read += rhs.info_words_read;
        self.info_events_empty += rhs.info_events_empty;
        self.info_events_valid += rhs.info_events_valid;
        self.info_pixels_valid += rhs.info_pixels_valid;

        self.errors_event_start += rhs.errors_event_start;
        self.errors_event_stop += rhs.errors_event_stop;
        self.errors_event_overflow += rhs.errors_event_overflow;
        self.errors_event_invalid_words += rhs.errors_event_invalid_words;
        self.errors_event_invalid_xor += rhs.errors_event_invalid_xor;

        self.errors_tbm_header += rhs.errors_tbm_header;
        self.errors_tbm_trailer += rhs.errors_tbm_trailer;
        self.errors_tbm_eventid_mismatch += rhs.errors_tbm_eventid_mismatch;

        self.errors_roc_missing += rhs.errors_roc_missing;
        self.errors_roc_readback += rhs.errors_roc_readback;

        self.errors_pixel_incomplete += rhs.errors_pixel_incomplete;
        self.errors_pixel_address += rhs.errors_pixel_address;
        self.errors_pixel_pulseheight += rhs.errors_pixel_pulseheight;
        self.errors_pixel_buffer_corrupt += rhs.errors_pixel_buffer_corrupt;
    }
}

impl fmt::Display for DecodingStatistics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Decoding statistics:")?;
        writeln!(f, "  General information:")?;
        writeln!(f, "\t 16bit words read:         {}", self.info_words_read)?;
        writeln!(f, "\t valid events total:       {}", self.info_events_total())?;
        writeln!(f, "\t empty events:             {}", self.info_events_empty)?;
        writeln!(f, "\t valid events with pixels: {}", self.info_events_valid)?;
        writeln!(f, "\t valid pixel hits:         {}", self.info_pixels_valid)?;
        writeln!(f, "  Event errors: \t           {}", self.errors_event())?;
        writeln!(f, "\t start marker:             {}", self.errors_event_start)?;
        writeln!(f, "\t stop marker:              {}", self.errors_event_stop)?;
        writeln!(f, "\t overflow:                 {}", self.errors_event_overflow)?;
        writeln!(f, "\t invalid 5bit words:       {}", self.errors_event_invalid_words)?;
        writeln!(f, "\t invalid XOR eye diagram:  {}", self.errors_event_invalid_xor)?;
        writeln!(f, "  TBM errors: \t\t           {}", self.errors_tbm())?;
        writeln!(f, "\t flawed TBM headers:       {}", self.errors_tbm_header)?;
        writeln!(f, "\t flawed TBM trailers:      {}", self.errors_tbm_trailer)?;
        writeln!(f, "\t event ID mismatches:      {}", self.errors_tbm_eventid_mismatch)?;
        writeln!(f, "  ROC errors: \t\t           {}", self.errors_roc())?;
        writeln!(f, "\t missing ROC header(s):    {}", self.errors_roc_missing)?;
        writeln!(f, "\t misplaced readback start: {}", self.errors_roc_readback)?;
        writeln!(f, "  Pixel decoding errors:\t   {}", self.errors_pixel())?;
        writeln!(f, "\t pixel data incomplete:    {}", self.errors_pixel_incomplete)?;
        writeln!(f, "\t pixel address:            {}", self.errors_pixel_address)?;
        writeln!(f, "\t pulse height fill bit:    {}", self.errors_pixel_pulseheight)?;
        write!(f, "\t buffer corruption:        {}", self.errors_pixel_buffer_corrupt)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_take_resets() {
        let mut stats = DecodingStatistics::new();
        stats.info_words_read = 12;
        stats.errors_pixel_address = 2;

        let taken = stats.take();
        assert_eq!(taken.info_words_read, 12);
        assert_eq!(taken.errors_pixel_address, 2);
        assert_eq!(stats, DecodingStatistics::default());
    }

    #[test]
    fn test_add_assign() {
        let mut a = DecodingStatistics {
            info_events_valid: 3,
            errors_tbm_header: 1,
            ..Default::default()
        };
        let b = DecodingStatistics {
            info_events_valid: 2,
            info_events_empty: 4,
            errors_tbm_header: 1,
            ..Default::default()
        };
        a += b;
        assert_eq!(a.info_events_valid, 5);
        assert_eq!(a.info_events_total(), 9);
        assert_eq!(a.errors_tbm_header, 2);
    }

    #[test]
    fn test_aggregates() {
        let stats = DecodingStatistics {
            errors_event_start: 1,
            errors_event_invalid_xor: 1,
            errors_tbm_eventid_mismatch: 2,
            errors_roc_readback: 1,
            errors_pixel_incomplete: 1,
            errors_pixel_buffer_corrupt: 3,
            ..Default::default()
        };
        assert_eq!(stats.errors_event(), 2);
        assert_eq!(stats.errors_tbm(), 2);
        assert_eq!(stats.errors_roc(), 1);
        assert_eq!(stats.errors_pixel(), 4);
        assert_eq!(stats.errors(), 9);
    }

    #[test]
    fn test_display_lists_counters() {
        let stats = DecodingStatistics {
            errors_tbm_eventid_mismatch: 7,
            ..Default::default()
        };
        let text = stats.to_string();
        assert!(text.contains("event ID mismatches:      7"));
    }
}
