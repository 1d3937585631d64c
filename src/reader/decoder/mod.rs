//! Event decoder for DTB raw events
//!
//! Turns the raw records of one channel into decoded events.
//!
//! # Design Principles (KISS)
//! - One decoder per channel, owning statistics, event ID and readback state
//! - Per-event problems are counted, never returned as errors
//! - Framing is chosen once from the TBM type and never changes

pub mod analog;
pub mod deser160;
pub mod deser400;
pub mod readback;
pub mod splitter;

pub use analog::AnalogLevels;
pub use deser400::EventIdTracker;
pub use readback::ReadbackCollector;
pub use splitter::EventSplitter;

use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::common::{DecodingStatistics, Event, RawEvent};
use crate::config::registers::constants::{ROC_PSI46DIG, ROC_PSI46DIGV2, TBM_EMU, TBM_NONE};

/// Framing of the raw sample stream of one channel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Envelope {
    /// Physical TBM, DESER400 deserializer
    Deser400,
    /// Single ROC read directly, DESER160 deserializer
    Deser160,
    /// TBM framing emulated by the testboard firmware
    SoftTbm,
}

impl Envelope {
    /// Framing used for a TBM device code
    pub fn from_tbm_type(tbm_type: u8) -> Self {
        match tbm_type {
            TBM_NONE => Self::Deser160,
            TBM_EMU => Self::SoftTbm,
            _ => Self::Deser400,
        }
    }

    /// Fresh splitter for this framing
    pub fn splitter(self) -> EventSplitter {
        match self {
            Self::Deser400 => EventSplitter::deser400(),
            Self::Deser160 => EventSplitter::deser160(),
            Self::SoftTbm => EventSplitter::soft_tbm(),
        }
    }
}

impl std::fmt::Display for Envelope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Deser400 => "DESER400",
            Self::Deser160 => "DESER160",
            Self::SoftTbm => "SOFTTBM",
        };
        write!(f, "{}", name)
    }
}

/// Decoder configuration of one channel
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DecoderConfig {
    /// Hardware channel number
    pub channel: u8,
    /// ROCs expected per event on this channel
    pub token_chain_length: u8,
    pub envelope: Envelope,
    /// ROC device code
    pub device: u8,
}

impl Default for DecoderConfig {
    fn default() -> Self {
        Self {
            channel: 0,
            token_chain_length: 1,
            envelope: Envelope::Deser160,
            device: crate::config::registers::constants::ROC_PSI46DIGV21,
        }
    }
}

impl DecoderConfig {
    /// PSI46DIG transmits inverted row addresses
    pub fn inverted_address(&self) -> bool {
        self.device == ROC_PSI46DIG
    }

    /// Readback bits are only present from PSI46DIGV2 on
    pub fn has_readback(&self) -> bool {
        self.device >= ROC_PSI46DIGV2
    }

    /// Analog ROCs predate PSI46DIG
    pub fn is_analog(&self) -> bool {
        self.device < ROC_PSI46DIG
    }

    /// Global ROC id of the `position`-th ROC in this channel's token chain
    pub fn roc_id(&self, position: usize) -> u8 {
        (position + self.channel as usize * self.token_chain_length as usize) as u8
    }
}

/// Decoder for the raw events of one channel
#[derive(Debug, Clone)]
pub struct EventDecoder {
    config: DecoderConfig,
    stats: DecodingStatistics,
    event_id: EventIdTracker,
    readback: ReadbackCollector,
    levels: AnalogLevels,
}

impl EventDecoder {
    pub fn new(config: DecoderConfig) -> Self {
        Self {
            config,
            stats: DecodingStatistics::new(),
            event_id: EventIdTracker::new(),
            readback: ReadbackCollector::new(),
            levels: AnalogLevels::new(),
        }
    }

    pub fn config(&self) -> &DecoderConfig {
        &self.config
    }

    /// Decode one raw event, counting every problem in the statistics
    pub fn decode(&mut self, raw: &RawEvent) -> Event {
        self.count_framing(raw);

        let event = match self.config.envelope {
            Envelope::Deser400 => self.decode_deser400(raw, true),
            Envelope::SoftTbm => self.decode_deser400(raw, false),
            Envelope::Deser160 if self.config.is_analog() => self.decode_analog(raw),
            Envelope::Deser160 => self.decode_deser160(raw),
        };

        trace!(channel = self.config.channel, "Decoded event: {}", event);
        event
    }

    /// Return the statistics collected so far and reset them
    pub fn statistics(&mut self) -> DecodingStatistics {
        self.stats.take()
    }

    /// Current statistics, without resetting them
    pub fn peek_statistics(&self) -> &DecodingStatistics {
        &self.stats
    }

    /// Return the readback values collected so far per ROC and clear them
    pub fn readback(&mut self) -> Vec<Vec<u16>> {
        self.readback.take()
    }

    fn count_framing(&mut self, raw: &RawEvent) {
        if raw.is_start_error() {
            self.stats.errors_event_start += 1;
        }
        if raw.is_end_error() {
            self.stats.errors_event_stop += 1;
        }
        if raw.is_overflow() {
            self.stats.errors_event_overflow += 1;
        }
        self.stats.info_words_read += raw.len() as u64;
    }

    fn classify(&mut self, event: &Event) {
        if event.pixels.is_empty() {
            self.stats.info_events_empty += 1;
        } else {
            self.stats.info_events_valid += 1;
        }
    }

    fn pixel_failed(&mut self, err: crate::common::PixelError) {
        use crate::common::PixelError;
        match err {
            PixelError::InvalidAddress { .. } => self.stats.errors_pixel_address += 1,
            PixelError::InvalidPulseHeight => self.stats.errors_pixel_pulseheight += 1,
            PixelError::CorruptBuffer { .. } => self.stats.errors_pixel_buffer_corrupt += 1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::registers::constants::*;

    #[test]
    fn test_envelope_from_tbm_type() {
        assert_eq!(Envelope::from_tbm_type(TBM_NONE), Envelope::Deser160);
        assert_eq!(Envelope::from_tbm_type(TBM_EMU), Envelope::SoftTbm);
        assert_eq!(Envelope::from_tbm_type(TBM_08B), Envelope::Deser400);
        assert_eq!(Envelope::from_tbm_type(TBM_09), Envelope::Deser400);
    }

    #[test]
    fn test_roc_id_offset() {
        let config = DecoderConfig {
            channel: 1,
            token_chain_length: 8,
            envelope: Envelope::Deser400,
            device: ROC_PSI46DIGV21RESPIN,
        };
        assert_eq!(config.roc_id(0), 8);
        assert_eq!(config.roc_id(7), 15);
    }

    #[test]
    fn test_device_properties() {
        let mut config = DecoderConfig::default();
        assert!(config.has_readback());
        assert!(!config.inverted_address());
        assert!(!config.is_analog());

        config.device = ROC_PSI46DIG;
        assert!(config.inverted_address());
        assert!(!config.has_readback());

        config.device = ROC_PSI46V2;
        assert!(config.is_analog());
    }

    #[test]
    fn test_framing_flags_are_counted() {
        let mut decoder = EventDecoder::new(DecoderConfig::default());
        let mut raw = RawEvent::from_samples(vec![0x87f8]);
        raw.set_start_error();
        raw.set_overflow();
        decoder.decode(&raw);

        let stats = decoder.statistics();
        assert_eq!(stats.errors_event_start, 1);
        assert_eq!(stats.errors_event_stop, 0);
        assert_eq!(stats.errors_event_overflow, 1);
        assert_eq!(stats.info_words_read, 1);
        assert_eq!(stats.info_events_empty, 1);

        // Pulled statistics are reset
        assert_eq!(decoder.statistics(), DecodingStatistics::default());
    }

    #[test]
    fn test_envelope_serde_names() {
        #[derive(Deserialize)]
        struct Wrapper {
            envelope: Envelope,
        }
        let w: Wrapper = toml::from_str("envelope = \"softtbm\"").unwrap();
        assert_eq!(w.envelope, Envelope::SoftTbm);
        assert_eq!(Envelope::Deser400.to_string(), "DESER400");
    }
}
