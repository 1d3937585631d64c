//! Event splitter
//!
//! Cuts the continuous sample stream of one channel into framed raw events.
//!
//! # Design Principles (KISS)
//! - One enum variant per framing, the only state is a pending start marker
//! - Framing problems are flags on the record, never errors
//! - Source errors (empty/overflow) are propagated unchanged

use tracing::trace;

use crate::common::{DaqResult, RawEvent};
use crate::reader::source::SampleSource;

/// Marker bits of the framed sample formats
mod constants {
    /// Upper three bits carry the DESER400 / soft-TBM marker
    pub const MARKER_MASK: u16 = 0xe000;
    pub const MARKER_TBM_HEADER: u16 = 0xa000;
    pub const MARKER_TBM_TRAILER: u16 = 0xe000;
    pub const MARKER_EVENT_END: u16 = 0xc000;

    /// DESER160 start and end bits
    pub const DESER160_START: u16 = 0x8000;
    pub const DESER160_END: u16 = 0x4000;
    pub const DESER160_BOTH: u16 = DESER160_START | DESER160_END;
}

use constants::*;

#[inline]
fn marker(sample: u16) -> u16 {
    sample & MARKER_MASK
}

/// Splitter for one of the supported framings
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventSplitter {
    /// TBM data deserialized at 400 MHz: `0xa...` header to `0xc...` trailer word
    Deser400 { next_start_detected: bool },
    /// Single ROC without TBM: start bit `0x8000`, end bit `0x4000`
    Deser160,
    /// Emulated TBM framing around plain ROC data
    SoftTbm { next_start_detected: bool },
}

impl EventSplitter {
    pub fn deser400() -> Self {
        Self::Deser400 {
            next_start_detected: false,
        }
    }

    pub fn deser160() -> Self {
        Self::Deser160
    }

    pub fn soft_tbm() -> Self {
        Self::SoftTbm {
            next_start_detected: false,
        }
    }

    /// Read the next raw event from `source`
    pub fn split<S: SampleSource>(&mut self, source: &mut S) -> DaqResult<RawEvent> {
        let record = match self {
            Self::Deser400 {
                next_start_detected,
            } => split_deser400(source, next_start_detected)?,
            Self::Deser160 => split_deser160(source)?,
            Self::SoftTbm {
                next_start_detected,
            } => split_soft_tbm(source, next_start_detected)?,
        };
        trace!("Split event: {}", record);
        Ok(record)
    }

    /// Forget a pending start marker, e.g. after the source was drained
    pub fn reset(&mut self) {
        match self {
            Self::Deser400 {
                next_start_detected,
            }
            | Self::SoftTbm {
                next_start_detected,
            } => *next_start_detected = false,
            Self::Deser160 => {}
        }
    }
}

fn split_deser400<S: SampleSource>(
    source: &mut S,
    next_start_detected: &mut bool,
) -> DaqResult<RawEvent> {
    let mut record = RawEvent::new();

    if !*next_start_detected {
        source.next_sample()?;
    }

    // Only one sample is skipped looking for the header
    if marker(source.last_sample()) != MARKER_TBM_HEADER {
        record.set_start_error();
        source.next_sample()?;
    }
    record.add(source.last_sample());

    loop {
        let sample = source.next_sample()?;
        if marker(sample) == MARKER_EVENT_END {
            break;
        }
        if marker(sample) == MARKER_TBM_HEADER {
            record.set_end_error();
            *next_start_detected = true;
            return Ok(record);
        }
        if record.is_full() {
            record.set_overflow();
        } else {
            record.add(sample);
        }
    }

    record.add(source.last_sample());
    *next_start_detected = false;
    Ok(record)
}

fn split_deser160<S: SampleSource>(source: &mut S) -> DaqResult<RawEvent> {
    let mut record = RawEvent::new();

    if source.last_sample() & DESER160_END != 0 {
        source.next_sample()?;
    }

    if source.last_sample() & DESER160_START == 0 {
        record.set_start_error();
        while source.next_sample()? & DESER160_START == 0 {}
    }

    loop {
        if record.is_full() {
            record.set_overflow();
            break;
        }
        // A combined start+end sample closes the record on its own
        if source.last_sample() & DESER160_BOTH == DESER160_BOTH {
            break;
        }
        record.add(source.last_sample());
        if source.next_sample()? & DESER160_BOTH != 0 {
            break;
        }
    }

    if source.last_sample() & DESER160_END != 0 {
        record.add(source.last_sample());
    } else {
        record.set_end_error();
    }
    Ok(record)
}

fn split_soft_tbm<S: SampleSource>(
    source: &mut S,
    next_start_detected: &mut bool,
) -> DaqResult<RawEvent> {
    let mut record = RawEvent::new();

    if !*next_start_detected {
        source.next_sample()?;
    }

    while marker(source.last_sample()) != MARKER_TBM_HEADER {
        record.set_start_error();
        source.next_sample()?;
    }
    // Emulated header word
    source.next_sample()?;

    loop {
        let sample = source.next_sample()?;
        if marker(sample) == MARKER_TBM_TRAILER {
            break;
        }
        if marker(sample) == MARKER_TBM_HEADER {
            record.set_end_error();
            *next_start_detected = true;
            return Ok(record);
        }
        if record.is_full() {
            record.set_overflow();
        } else {
            record.add(sample);
        }
    }

    *next_start_detected = false;
    Ok(record)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::{DaqError, RAW_EVENT_MAX_SIZE};
    use crate::reader::source::{DtbSource, MemoryChannel};

    fn source(samples: &[u16]) -> DtbSource<MemoryChannel> {
        DtbSource::new(MemoryChannel::new(samples.iter().copied()), 0, true)
    }

    #[test]
    fn test_deser400_back_to_back() {
        let mut src = source(&[
            0xa001, 0x8000, 0x47f8, 0xe000, 0xc000, // event 1, one ROC header
            0xa002, 0x8000, 0x47f8, 0x0123, 0x2456, 0xe000, 0xc000, // event 2, one hit
        ]);
        let mut splitter = EventSplitter::deser400();

        let first = splitter.split(&mut src).unwrap();
        assert_eq!(first.data, vec![0xa001, 0x8000, 0x47f8, 0xe000, 0xc000]);
        assert!(!first.has_error());

        let second = splitter.split(&mut src).unwrap();
        assert_eq!(second.len(), 7);
        assert!(!second.has_error());

        assert_eq!(splitter.split(&mut src).unwrap_err(), DaqError::BufferEmpty);
    }

    #[test]
    fn test_deser400_start_error_skips_one() {
        let mut src = source(&[0x1234, 0xa001, 0x8000, 0xe000, 0xc000]);
        let mut splitter = EventSplitter::deser400();
        let record = splitter.split(&mut src).unwrap();
        assert!(record.is_start_error());
        assert_eq!(record.data, vec![0xa001, 0x8000, 0xe000, 0xc000]);
    }

    #[test]
    fn test_deser400_truncated_event() {
        // Trailer of the first event is missing
        let mut src = source(&[0xa001, 0x8000, 0x47f8, 0xa002, 0x8000, 0xe000, 0xc000]);
        let mut splitter = EventSplitter::deser400();

        let first = splitter.split(&mut src).unwrap();
        assert!(first.is_end_error());
        assert_eq!(first.data, vec![0xa001, 0x8000, 0x47f8]);
        assert_eq!(
            splitter,
            EventSplitter::Deser400 {
                next_start_detected: true
            }
        );

        // The pending header starts the next record
        let second = splitter.split(&mut src).unwrap();
        assert!(!second.has_error());
        assert_eq!(second.data, vec![0xa002, 0x8000, 0xe000, 0xc000]);
    }

    #[test]
    fn test_deser400_overflow() {
        let mut samples = vec![0xa001u16];
        samples.extend(std::iter::repeat(0x0000).take(RAW_EVENT_MAX_SIZE + 10));
        samples.push(0xc000);
        let mut src = source(&samples);
        let mut splitter = EventSplitter::deser400();

        let record = splitter.split(&mut src).unwrap();
        assert!(record.is_overflow());
        assert_eq!(record.len(), RAW_EVENT_MAX_SIZE + 1);
        assert_eq!(*record.data.last().unwrap(), 0xc000);
    }

    #[test]
    fn test_deser160_events() {
        // ROC header with start bit, one hit, end bit on the last word
        let mut src = source(&[0x87f8, 0x0123, 0x4456, 0x87f8, 0x47f8]);
        let mut splitter = EventSplitter::deser160();

        let first = splitter.split(&mut src).unwrap();
        assert_eq!(first.data, vec![0x87f8, 0x0123, 0x4456]);
        assert!(!first.has_error());

        let second = splitter.split(&mut src).unwrap();
        assert_eq!(second.data, vec![0x87f8, 0x47f8]);
    }

    #[test]
    fn test_deser160_start_error() {
        let mut src = source(&[0x0001, 0x0002, 0x87f8, 0x47f8]);
        let mut splitter = EventSplitter::deser160();
        let record = splitter.split(&mut src).unwrap();
        assert!(record.is_start_error());
        assert_eq!(record.data, vec![0x87f8, 0x47f8]);
    }

    #[test]
    fn test_deser160_missing_end() {
        // Next start arrives before the end bit
        let mut src = source(&[0x87f8, 0x0123, 0x8456, 0x47f8]);
        let mut splitter = EventSplitter::deser160();
        let record = splitter.split(&mut src).unwrap();
        assert!(record.is_end_error());
        assert_eq!(record.data, vec![0x87f8, 0x0123]);

        // Last sample has no end bit, so it starts the next record
        let next = splitter.split(&mut src).unwrap();
        assert_eq!(next.data, vec![0x8456, 0x47f8]);
    }

    #[test]
    fn test_deser160_combined_first_sample() {
        // A combined start+end word yields a one-word record
        let mut src = source(&[0xc7f8, 0x87f8, 0x47f8]);
        let mut splitter = EventSplitter::deser160();
        let record = splitter.split(&mut src).unwrap();
        assert_eq!(record.data, vec![0xc7f8]);
        assert!(!record.has_error());
    }

    #[test]
    fn test_soft_tbm_strips_framing() {
        let mut src = source(&[
            0xa000, 0x8000, 0x47f8, 0x0123, 0x2456, 0xe000, // event 1
            0xa001, 0x8001, 0x47f8, 0xe000, // event 2
        ]);
        let mut splitter = EventSplitter::soft_tbm();

        let first = splitter.split(&mut src).unwrap();
        assert_eq!(first.data, vec![0x47f8, 0x0123, 0x2456]);
        assert!(!first.has_error());

        let second = splitter.split(&mut src).unwrap();
        assert_eq!(second.data, vec![0x47f8]);
    }

    #[test]
    fn test_soft_tbm_start_and_end_errors() {
        let mut src = source(&[0x0001, 0xa000, 0x8000, 0x47f8, 0xa001, 0x8001, 0xe000]);
        let mut splitter = EventSplitter::soft_tbm();

        let first = splitter.split(&mut src).unwrap();
        assert!(first.is_start_error());
        assert!(first.is_end_error());
        assert_eq!(first.data, vec![0x47f8]);

        let second = splitter.split(&mut src).unwrap();
        assert!(!second.has_error());
        assert!(second.is_empty());
    }

    #[test]
    fn test_reset_clears_pending_start() {
        let mut splitter = EventSplitter::SoftTbm {
            next_start_detected: true,
        };
        splitter.reset();
        assert_eq!(splitter, EventSplitter::soft_tbm());
    }
}
