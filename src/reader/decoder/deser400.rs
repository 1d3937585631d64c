//! DESER400 decoding
//!
//! Event layout (16-bit words, upper three bits are the marker):
//! ```text
//! 101 ........ eventID    TBM header 1
//! 100 ........ data       TBM header 2
//! 010 ........ header     ROC header, one per ROC in the token chain
//! 000 ..pixel high 12 ..  pixel hit, first half
//! 001 ..pixel low 12 ...  pixel hit, second half
//! 111 ........ flags      TBM trailer 1
//! 110 ........ flags      TBM trailer 2
//! ```
//! Soft-TBM records only carry the ROC section.
//!
//! A TBM marker arriving between the two halves of a hit counts as an
//! incomplete pixel and is itself taken as trailer 1. The trailer check then
//! runs on that marker and the word after it, so a clean trailer cut into a
//! hit adds no `errors_tbm_trailer`.

use tracing::{debug, error};

use super::EventDecoder;
use crate::common::{DecodingStatistics, Event, Pixel, RawEvent};

mod constants {
    pub const MARKER_MASK: u16 = 0xe000;
    pub const MARKER_TBM_HEADER1: u16 = 0xa000;
    pub const MARKER_TBM_HEADER2: u16 = 0x8000;
    pub const MARKER_ROC_HEADER: u16 = 0x4000;
    pub const MARKER_PIXEL_HIGH: u16 = 0x2000;
    pub const MARKER_TBM_TRAILER1: u16 = 0xe000;
    pub const MARKER_TBM_TRAILER2: u16 = 0xc000;
    pub const MARKER_SHIFT: u32 = 13;

    /// Any TBM header or trailer word
    pub const TBM_MARKER_BIT: u16 = 0x8000;
    pub const INVALID_WORD_BIT: u16 = 0x1000;
    /// Returned in place of words beyond the end of the record
    pub const MISSING_WORD: u16 = 0x6000;

    pub const BYTE_MASK: u16 = 0x00ff;
    pub const DATA_MASK: u16 = 0x0fff;
    pub const DATA_BITS: u32 = 12;

    /// DESER400 reports a failed eye diagram through an all-ones ROC header
    pub const INVALID_XOR_MASK: u16 = 0x0ff0;

    /// Fill pattern of the unused TBM09 stream
    pub const TBM09_CHAIN_LENGTH: u8 = 4;
    pub const TBM09_FILL: u32 = 0x00ff_ffff;
}

use constants::*;

/// Tracks the 8-bit TBM event counter
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EventIdTracker {
    expected: Option<u16>,
}

impl EventIdTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Check the event ID of a TBM header word.
    ///
    /// The first ID seen seeds the tracker. On mismatch the tracker follows
    /// the observed ID and `false` is returned.
    pub fn check(&mut self, header: u16) -> bool {
        let id = header & BYTE_MASK;
        let expected = *self.expected.get_or_insert(id);

        let ok = id == expected % 256;
        if !ok {
            error!(local = expected, tbm = id, "Event ID mismatch");
        }
        let current = if ok { expected } else { id };
        self.expected = Some(current % 256 + 1);
        ok
    }

    /// Next expected event ID, if any event was seen
    pub fn expected(&self) -> Option<u8> {
        self.expected.map(|id| (id % 256) as u8)
    }
}

/// Sequential word reader over a raw event
struct WordCursor<'a> {
    data: &'a [u16],
    pos: usize,
}

impl<'a> WordCursor<'a> {
    fn new(data: &'a [u16]) -> Self {
        Self { data, pos: 0 }
    }

    /// Next word, `MISSING_WORD` past the end; counts invalid words
    fn next(&mut self, stats: &mut DecodingStatistics) -> u16 {
        let v = match self.data.get(self.pos) {
            Some(&v) => {
                self.pos += 1;
                v
            }
            None => MISSING_WORD,
        };
        if v & INVALID_WORD_BIT != 0 {
            stats.errors_event_invalid_words += 1;
        }
        v
    }

    fn is_exhausted(&self) -> bool {
        self.pos >= self.data.len()
    }
}

#[inline]
fn marker(v: u16) -> u16 {
    v & MARKER_MASK
}

impl EventDecoder {
    /// Decode a DESER400 record, or only its ROC section when `with_tbm` is false
    pub(super) fn decode_deser400(&mut self, raw: &RawEvent, with_tbm: bool) -> Event {
        let mut event = Event::new();
        let mut words = WordCursor::new(&raw.data);
        let invert = self.config.inverted_address();
        let channel = self.config.channel;

        if with_tbm {
            let h1 = words.next(&mut self.stats);
            let mut header_error = marker(h1) != MARKER_TBM_HEADER1;
            if !self.event_id.check(h1) {
                self.stats.errors_tbm_eventid_mismatch += 1;
            }
            let h2 = words.next(&mut self.stats);
            header_error |= marker(h2) != MARKER_TBM_HEADER2;
            if header_error {
                self.stats.errors_tbm_header += 1;
            }
            event.header = ((h1 & BYTE_MASK) << 8) | (h2 & BYTE_MASK);
            debug!(
                channel,
                event_id = h1 & BYTE_MASK,
                data_id = (h2 & 0x00c0) >> 6,
                value = h2 & 0x003f,
                "TBM header"
            );
        }

        // ROC section
        let mut rocs_seen = 0usize;
        let mut v = words.next(&mut self.stats);
        'rocs: while marker(v) == MARKER_ROC_HEADER {
            let position = rocs_seen;
            rocs_seen += 1;

            if v & INVALID_XOR_MASK == INVALID_XOR_MASK {
                error!(
                    channel,
                    roc = position,
                    "ROC header reports DESER400 failure (invalid XOR eye diagram)"
                );
                self.stats.errors_event_invalid_xor += 1;
                while marker(v) != MARKER_TBM_TRAILER1 && !words.is_exhausted() {
                    v = words.next(&mut self.stats);
                }
                break 'rocs;
            }

            if self.config.has_readback() {
                self.readback.eval(position, v, &mut self.stats);
            }

            v = words.next(&mut self.stats);
            while marker(v) <= MARKER_PIXEL_HIGH {
                let mut pixel_raw = 0u32;
                for half in 0..=1u16 {
                    if v >> MARKER_SHIFT != half && v & TBM_MARKER_BIT != 0 {
                        // TBM marker in the middle of a hit, `v` becomes trailer 1
                        self.stats.errors_pixel_incomplete += 1;
                        break 'rocs;
                    }
                    pixel_raw = (pixel_raw << DATA_BITS) | (v & DATA_MASK) as u32;
                    v = words.next(&mut self.stats);
                }

                if self.config.token_chain_length == TBM09_CHAIN_LENGTH
                    && pixel_raw & TBM09_FILL == TBM09_FILL
                {
                    continue;
                }

                match Pixel::from_raw(pixel_raw, self.config.roc_id(position), invert) {
                    Ok(pixel) => {
                        event.pixels.push(pixel);
                        self.stats.info_pixels_valid += 1;
                    }
                    Err(err) => self.pixel_failed(err),
                }
            }
        }

        if with_tbm {
            let t1 = v;
            let mut trailer_error = marker(t1) != MARKER_TBM_TRAILER1;
            let t2 = words.next(&mut self.stats);
            trailer_error |= marker(t2) != MARKER_TBM_TRAILER2;
            if trailer_error {
                self.stats.errors_tbm_trailer += 1;
            }
            event.trailer = ((t1 & BYTE_MASK) << 8) | (t2 & BYTE_MASK);
            debug!(channel, "TBM trailer {:04x}", event.trailer);
        }

        if rocs_seen != self.config.token_chain_length as usize {
            error!(
                channel,
                rocs = rocs_seen,
                token_chain_length = self.config.token_chain_length,
                "Number of ROCs does not match token chain length"
            );
            self.stats.errors_roc_missing += 1;
            event.pixels.clear();
        } else {
            self.classify(&event);
        }

        event
    }
}
