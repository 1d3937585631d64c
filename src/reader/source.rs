//! Raw sample source
//!
//! Pulls blocks of 16-bit samples from a hardware channel and hands them
//! out one at a time to the event splitter.
//!
//! # Design Principles (KISS)
//! - The channel is a trait so tests and the emulator can feed samples
//! - "Buffer empty" is transient, "buffer overflow" is fatal
//! - The last sample stays readable, splitters peek at it between events

use std::collections::VecDeque;

use tracing::{debug, trace};

use crate::common::{DaqError, DaqResult};

/// Words requested from the channel per read
pub const DTB_SOURCE_BLOCK_SIZE: usize = 8192;

/// Initial value of `last_sample`: carries the end bit so that a fresh
/// DESER160 splitter starts by reading
const INITIAL_LAST_SAMPLE: u16 = 0x4000;

/// DAQ channel status flags returned with every read
pub mod status {
    pub const STOPPED: u8 = 0x01;
    pub const MEM_OVERFLOW: u8 = 0x02;
    pub const FIFO_OVERFLOW: u8 = 0x04;
}

/// Result of one channel read
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChannelRead {
    pub samples: Vec<u16>,
    /// Words still buffered on the hardware side
    pub remaining: u32,
    /// Combination of `status` flags
    pub status: u8,
}

/// Hardware channel delivering raw samples
pub trait SampleChannel {
    /// Read up to `block_size` samples
    fn read(&mut self, block_size: usize) -> DaqResult<ChannelRead>;
}

/// Anything a splitter can pull samples from
pub trait SampleSource {
    /// Return the next sample, refilling from the channel when needed
    fn next_sample(&mut self) -> DaqResult<u16>;

    /// The most recently returned sample
    fn last_sample(&self) -> u16;
}

/// Sample source on top of a DTB DAQ channel
#[derive(Debug)]
pub struct DtbSource<C: SampleChannel> {
    channel: C,
    channel_id: u8,
    block_size: usize,
    stop_at_empty: bool,
    buffer: Vec<u16>,
    pos: usize,
    last_sample: u16,
    remaining: u32,
    words_consumed: u64,
}

impl<C: SampleChannel> DtbSource<C> {
    pub fn new(channel: C, channel_id: u8, stop_at_empty: bool) -> Self {
        Self::with_block_size(channel, channel_id, stop_at_empty, DTB_SOURCE_BLOCK_SIZE)
    }

    pub fn with_block_size(
        channel: C,
        channel_id: u8,
        stop_at_empty: bool,
        block_size: usize,
    ) -> Self {
        Self {
            channel,
            channel_id,
            block_size: block_size.max(1),
            stop_at_empty,
            buffer: Vec::new(),
            pos: 0,
            last_sample: INITIAL_LAST_SAMPLE,
            remaining: 0,
            words_consumed: 0,
        }
    }

    /// Read blocks until one contains data and return its first sample.
    ///
    /// Without `stop_at_empty` this blocks until the channel delivers data
    /// or reports a non-zero status.
    pub fn fill_buffer(&mut self) -> DaqResult<u16> {
        self.pos = 0;
        loop {
            let read = self.channel.read(self.block_size)?;
            self.remaining = read.remaining;
            if read.samples.is_empty() {
                if self.stop_at_empty {
                    return Err(DaqError::BufferEmpty);
                }
                if read.status != 0 {
                    return Err(DaqError::BufferOverflow {
                        status: read.status,
                    });
                }
                continue;
            }
            self.buffer = read.samples;
            break;
        }

        debug!(
            channel = self.channel_id,
            words = self.buffer.len(),
            remaining = self.remaining,
            "Read DAQ block"
        );
        trace!(channel = self.channel_id, "Raw block: {:04x?}", self.buffer);

        self.take_sample()
    }

    /// Samples handed out so far
    pub fn words_consumed(&self) -> u64 {
        self.words_consumed
    }

    /// Words the hardware reported as still buffered after the last read
    pub fn remaining(&self) -> u32 {
        self.remaining
    }

    pub fn channel_id(&self) -> u8 {
        self.channel_id
    }

    pub fn channel(&self) -> &C {
        &self.channel
    }

    pub fn channel_mut(&mut self) -> &mut C {
        &mut self.channel
    }

    fn take_sample(&mut self) -> DaqResult<u16> {
        let sample = self.buffer[self.pos];
        self.pos += 1;
        self.last_sample = sample;
        self.words_consumed += 1;
        Ok(sample)
    }
}

impl<C: SampleChannel> SampleSource for DtbSource<C> {
    fn next_sample(&mut self) -> DaqResult<u16> {
        if self.pos < self.buffer.len() {
            self.take_sample()
        } else {
            self.fill_buffer()
        }
    }

    fn last_sample(&self) -> u16 {
        self.last_sample
    }
}

/// In-memory channel, used by the emulator, the decode binary and tests.
///
/// Once all pushed samples are read it reports `status::STOPPED` with an
/// empty block.
#[derive(Debug, Clone, Default)]
pub struct MemoryChannel {
    samples: VecDeque<u16>,
    status: u8,
}

impl MemoryChannel {
    pub fn new(samples: impl IntoIterator<Item = u16>) -> Self {
        Self {
            samples: samples.into_iter().collect(),
            status: 0,
        }
    }

    /// Append samples to the channel
    pub fn push(&mut self, samples: &[u16]) {
        self.samples.extend(samples.iter().copied());
    }

    /// Status flags reported while data is still available
    pub fn set_status(&mut self, status: u8) {
        self.status = status;
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

impl SampleChannel for MemoryChannel {
    fn read(&mut self, block_size: usize) -> DaqResult<ChannelRead> {
        let n = block_size.min(self.samples.len());
        let samples: Vec<u16> = self.samples.drain(..n).collect();
        let status = if self.samples.is_empty() && samples.is_empty() {
            self.status | status::STOPPED
        } else {
            self.status
        };
        Ok(ChannelRead {
            samples,
            remaining: self.samples.len() as u32,
            status,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_initial_last_sample() {
        let source = DtbSource::new(MemoryChannel::default(), 0, true);
        assert_eq!(source.last_sample(), 0x4000);
    }

    #[test]
    fn test_next_sample_across_blocks() {
        let channel = MemoryChannel::new([1, 2, 3, 4, 5]);
        let mut source = DtbSource::with_block_size(channel, 0, true, 2);
        let mut seen = Vec::new();
        for _ in 0..5 {
            seen.push(source.next_sample().unwrap());
        }
        assert_eq!(seen, vec![1, 2, 3, 4, 5]);
        assert_eq!(source.last_sample(), 5);
        assert_eq!(source.words_consumed(), 5);
    }

    #[test]
    fn test_empty_is_transient() {
        let mut source = DtbSource::new(MemoryChannel::new([7]), 0, true);
        assert_eq!(source.next_sample().unwrap(), 7);
        assert_eq!(source.next_sample().unwrap_err(), DaqError::BufferEmpty);

        // More data arriving later is picked up
        source.channel_mut().push(&[8]);
        assert_eq!(source.next_sample().unwrap(), 8);
    }

    #[test]
    fn test_empty_with_status_is_overflow() {
        let mut channel = MemoryChannel::default();
        channel.set_status(status::MEM_OVERFLOW);
        let mut source = DtbSource::new(channel, 0, false);
        assert_eq!(
            source.next_sample().unwrap_err(),
            DaqError::BufferOverflow {
                status: status::MEM_OVERFLOW | status::STOPPED
            }
        );
    }

    #[test]
    fn test_stopped_channel_without_stop_at_empty() {
        let mut source = DtbSource::new(MemoryChannel::default(), 0, false);
        assert!(matches!(
            source.next_sample(),
            Err(DaqError::BufferOverflow { .. })
        ));
    }

    #[test]
    fn test_memory_channel_remaining() {
        let mut channel = MemoryChannel::new(0..10u16);
        let read = channel.read(4).unwrap();
        assert_eq!(read.samples, vec![0, 1, 2, 3]);
        assert_eq!(read.remaining, 6);
        assert_eq!(read.status, 0);
    }
}
