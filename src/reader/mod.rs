//! Reader module for DTB data acquisition
//!
//! This module provides:
//! - Sample sources on top of hardware channels (source)
//! - Event splitting and decoding per framing (decoder)
//! - Per-channel and multi-channel readout chains (daq)
//! - Raw sample dump files (dump)

pub mod daq;
pub mod decoder;
pub mod dump;
pub mod source;

// Re-exports
pub use daq::{Daq, DaqChannel};
pub use decoder::{DecoderConfig, Envelope, EventDecoder, EventSplitter};
pub use source::{
    ChannelRead, DtbSource, MemoryChannel, SampleChannel, SampleSource, DTB_SOURCE_BLOCK_SIZE,
};
