//! DESER160 decoding: a single digital ROC read without TBM.
//!
//! The record is the 12-bit ROC header followed by pairs of 12-bit words,
//! one pair per hit. The marker bits of the first and last word are dropped.

use super::EventDecoder;
use crate::common::{Event, Pixel, RawEvent};

const DATA_MASK: u16 = 0x0fff;
const DATA_BITS: u32 = 12;

impl EventDecoder {
    pub(super) fn decode_deser160(&mut self, raw: &RawEvent) -> Event {
        let mut event = Event::new();
        let invert = self.config.inverted_address();
        let data = &raw.data;

        if let Some(&first) = data.first() {
            event.header = first & DATA_MASK;
            if self.config.has_readback() {
                self.readback.eval(0, event.header, &mut self.stats);
            }

            // A trailing unpaired word is ignored
            for pair in data[1..].chunks_exact(2) {
                let pixel_raw =
                    (((pair[0] & DATA_MASK) as u32) << DATA_BITS) | (pair[1] & DATA_MASK) as u32;
                match Pixel::from_raw(pixel_raw, self.config.roc_id(0), invert) {
                    Ok(pixel) => {
                        event.pixels.push(pixel);
                        self.stats.info_pixels_valid += 1;
                    }
                    Err(err) => self.pixel_failed(err),
                }
            }
        }

        self.classify(&event);
        event
    }
}

#[cfg(test)]
mod tests {
    use super::super::DecoderConfig;
    use super::*;

    #[test]
    fn test_header_and_hits() {
        let a = Pixel::new(0, 0, 0, 17.0);
        let b = Pixel::new(0, 51, 79, 255.0);
        let (ra, rb) = (a.encode(), b.encode());
        let raw = RawEvent::from_samples(vec![
            0x87f9,
            (ra >> 12) as u16,
            (ra & 0xfff) as u16,
            (rb >> 12) as u16,
            0x4000 | (rb & 0xfff) as u16,
        ]);

        let mut dec = EventDecoder::new(DecoderConfig::default());
        let event = dec.decode(&raw);
        assert_eq!(event.header, 0x07f9);
        assert_eq!(event.pixels, vec![a, b]);

        let stats = dec.statistics();
        assert_eq!(stats.info_pixels_valid, 2);
        assert_eq!(stats.info_events_valid, 1);
        assert_eq!(stats.info_words_read, 5);
    }

    #[test]
    fn test_header_only_is_empty() {
        let mut dec = EventDecoder::new(DecoderConfig::default());
        let event = dec.decode(&RawEvent::from_samples(vec![0xc7f8]));
        assert_eq!(event.header, 0x07f8);
        assert!(event.pixels.is_empty());
        assert_eq!(dec.statistics().info_events_empty, 1);
    }

    #[test]
    fn test_empty_record() {
        let mut dec = EventDecoder::new(DecoderConfig::default());
        let event = dec.decode(&RawEvent::new());
        assert_eq!(event, Event::new());
        assert_eq!(dec.statistics().info_events_empty, 1);
    }

    #[test]
    fn test_bad_hit_is_dropped() {
        // Fill bit set in the pulse height
        let raw = RawEvent::from_samples(vec![0x87f8, 0x0000, 0x4010]);
        let mut dec = EventDecoder::new(DecoderConfig::default());
        let event = dec.decode(&raw);
        assert!(event.pixels.is_empty());
        let stats = dec.statistics();
        assert_eq!(stats.errors_pixel_pulseheight, 1);
        assert_eq!(stats.info_events_empty, 1);
    }

    #[test]
    fn test_readback_from_header() {
        let mut dec = EventDecoder::new(DecoderConfig::default());
        for i in (0..16).rev() {
            let word = 0x0a5a_u16;
            let bit = (word >> i) & 1;
            let start = if i == 0 { 0x0002 } else { 0 };
            dec.decode(&RawEvent::from_samples(vec![0xc7f8 | bit | start]));
        }
        assert_eq!(dec.readback(), vec![vec![0x0a5a]]);
        assert!(dec.readback().is_empty());
    }
}
