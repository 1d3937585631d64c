//! Raw and decoded event records
//!
//! Splitters and decoders hand out owned values: a caller may keep any
//! `RawEvent` or `Event` across subsequent calls.

use std::fmt;

use serde::{Deserialize, Serialize};

use super::pixel::Pixel;

/// Maximum number of samples accumulated into one raw event
pub const RAW_EVENT_MAX_SIZE: usize = 40000;

/// One framed slice of the sample stream
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawEvent {
    pub data: Vec<u16>,
    start_error: bool,
    end_error: bool,
    overflow: bool,
}

impl RawEvent {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a record from samples, without any error flags
    pub fn from_samples(data: Vec<u16>) -> Self {
        Self {
            data,
            ..Self::default()
        }
    }

    #[inline]
    pub fn add(&mut self, sample: u16) {
        self.data.push(sample);
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// True once the record reached `RAW_EVENT_MAX_SIZE` samples
    #[inline]
    pub fn is_full(&self) -> bool {
        self.data.len() >= RAW_EVENT_MAX_SIZE
    }

    pub fn set_start_error(&mut self) {
        self.start_error = true;
    }

    pub fn set_end_error(&mut self) {
        self.end_error = true;
    }

    pub fn set_overflow(&mut self) {
        self.overflow = true;
    }

    pub fn is_start_error(&self) -> bool {
        self.start_error
    }

    pub fn is_end_error(&self) -> bool {
        self.end_error
    }

    pub fn is_overflow(&self) -> bool {
        self.overflow
    }

    /// True if any framing error flag is set
    pub fn has_error(&self) -> bool {
        self.start_error || self.end_error || self.overflow
    }
}

impl fmt::Display for RawEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "====")?;
        for word in &self.data {
            write!(f, " {:04x}", word)?;
        }
        if self.start_error {
            write!(f, " [start error]")?;
        }
        if self.end_error {
            write!(f, " [end error]")?;
        }
        if self.overflow {
            write!(f, " [overflow]")?;
        }
        Ok(())
    }
}

/// TBM header and trailer field layout (16 bits each)
pub mod fields {
    // Header: high byte event ID, low byte data ID (2 bits) + value (6 bits)
    pub const HEADER_TRIGGER_COUNT_SHIFT: u32 = 8;
    pub const HEADER_DATA_ID_MASK: u16 = 0x00c0;
    pub const HEADER_DATA_ID_SHIFT: u32 = 6;
    pub const HEADER_DATA_VALUE_MASK: u16 = 0x003f;

    // Trailer high byte
    pub const TRAILER_NO_TOKEN_PASS: u16 = 0x8000;
    pub const TRAILER_RESET_TBM: u16 = 0x4000;
    pub const TRAILER_RESET_ROC: u16 = 0x2000;
    pub const TRAILER_SYNC_ERROR: u16 = 0x1000;
    pub const TRAILER_SYNC_TRIGGER: u16 = 0x0800;
    pub const TRAILER_CLEAR_TRIGGER_COUNT: u16 = 0x0400;
    pub const TRAILER_CAL_TRIGGER: u16 = 0x0200;
    pub const TRAILER_STACK_FULL: u16 = 0x0100;
    // Trailer low byte
    pub const TRAILER_AUTO_RESET: u16 = 0x0080;
    pub const TRAILER_PKAM_RESET: u16 = 0x0040;
    pub const TRAILER_STACK_COUNT_MASK: u16 = 0x003f;
}

/// A decoded event: TBM (or ROC) header, trailer and the pixel hits
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub header: u16,
    pub trailer: u16,
    pub pixels: Vec<Pixel>,
}

impl Event {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_pixels(pixels: Vec<Pixel>) -> Self {
        Self {
            header: 0,
            trailer: 0,
            pixels,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.pixels.is_empty()
    }

    /// TBM event counter from the first header word
    pub fn trigger_count(&self) -> u8 {
        (self.header >> fields::HEADER_TRIGGER_COUNT_SHIFT) as u8
    }

    pub fn data_id(&self) -> u8 {
        ((self.header & fields::HEADER_DATA_ID_MASK) >> fields::HEADER_DATA_ID_SHIFT) as u8
    }

    pub fn data_value(&self) -> u8 {
        (self.header & fields::HEADER_DATA_VALUE_MASK) as u8
    }

    /// The token-pass bit is transmitted inverted
    pub fn has_token_pass(&self) -> bool {
        self.trailer & fields::TRAILER_NO_TOKEN_PASS == 0
    }

    pub fn has_reset_tbm(&self) -> bool {
        self.trailer & fields::TRAILER_RESET_TBM != 0
    }

    pub fn has_reset_roc(&self) -> bool {
        self.trailer & fields::TRAILER_RESET_ROC != 0
    }

    pub fn has_sync_error(&self) -> bool {
        self.trailer & fields::TRAILER_SYNC_ERROR != 0
    }

    pub fn has_sync_trigger(&self) -> bool {
        self.trailer & fields::TRAILER_SYNC_TRIGGER != 0
    }

    pub fn has_clear_trigger_count(&self) -> bool {
        self.trailer & fields::TRAILER_CLEAR_TRIGGER_COUNT != 0
    }

    pub fn has_cal_trigger(&self) -> bool {
        self.trailer & fields::TRAILER_CAL_TRIGGER != 0
    }

    pub fn stack_full(&self) -> bool {
        self.trailer & fields::TRAILER_STACK_FULL != 0
    }

    pub fn has_auto_reset(&self) -> bool {
        self.trailer & fields::TRAILER_AUTO_RESET != 0
    }

    pub fn has_pkam_reset(&self) -> bool {
        self.trailer & fields::TRAILER_PKAM_RESET != 0
    }

    pub fn stack_count(&self) -> u8 {
        (self.trailer & fields::TRAILER_STACK_COUNT_MASK) as u8
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "====== {:04x} ====== {:04x} ======",
            self.header, self.trailer
        )?;
        for pixel in &self.pixels {
            write!(f, " {}", pixel)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_raw_event_flags_independent() {
        let mut raw = RawEvent::new();
        assert!(!raw.has_error());
        raw.set_end_error();
        assert!(raw.is_end_error());
        assert!(!raw.is_start_error());
        assert!(!raw.is_overflow());
        assert!(raw.has_error());
    }

    #[test]
    fn test_raw_event_capacity() {
        let mut raw = RawEvent::from_samples(vec![0; RAW_EVENT_MAX_SIZE - 1]);
        assert!(!raw.is_full());
        raw.add(0);
        assert!(raw.is_full());
    }

    #[test]
    fn test_header_fields() {
        // event ID 0x05, data ID 2, value 0x03
        let event = Event {
            header: 0x0583,
            trailer: 0,
            pixels: vec![],
        };
        assert_eq!(event.trigger_count(), 5);
        assert_eq!(event.data_id(), 2);
        assert_eq!(event.data_value(), 3);
    }

    #[test]
    fn test_trailer_fields() {
        let mut event = Event::new();
        assert!(event.has_token_pass());

        event.trailer = 0x8000 | 0x0200 | 0x0040 | 0x0005;
        assert!(!event.has_token_pass());
        assert!(event.has_cal_trigger());
        assert!(event.has_pkam_reset());
        assert!(!event.has_sync_error());
        assert_eq!(event.stack_count(), 5);
    }

    #[test]
    fn test_raw_event_display() {
        let mut raw = RawEvent::from_samples(vec![0xa005, 0xc001]);
        raw.set_overflow();
        let text = raw.to_string();
        assert!(text.contains("a005 c001"));
        assert!(text.contains("[overflow]"));
    }
}
