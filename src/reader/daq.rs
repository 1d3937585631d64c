//! DAQ readout chain
//!
//! A `DaqChannel` wires source, splitter and decoder of one hardware channel.
//! `Daq` runs several channels side by side and merges their events.
//!
//! # Design Principles (KISS)
//! - One owner per channel, nothing is shared between channels
//! - "Buffer empty" ends a bulk readout, every other error is returned
//! - Statistics and readback are pulled, which also clears them

use tracing::{debug, info};

use super::decoder::{DecoderConfig, EventDecoder};
use super::source::{DtbSource, SampleChannel};
use crate::common::{DaqError, DaqResult, DecodingStatistics, Event, RawEvent};
use crate::config::{Config, ConfigError};

/// Source, splitter and decoder of one hardware channel
#[derive(Debug)]
pub struct DaqChannel<C: SampleChannel> {
    source: DtbSource<C>,
    splitter: super::decoder::EventSplitter,
    decoder: EventDecoder,
}

impl<C: SampleChannel> DaqChannel<C> {
    pub fn new(channel: C, config: DecoderConfig, stop_at_empty: bool) -> Self {
        Self::with_source(DtbSource::new(channel, config.channel, stop_at_empty), config)
    }

    pub fn with_source(source: DtbSource<C>, config: DecoderConfig) -> Self {
        debug!(
            channel = config.channel,
            token_chain_length = config.token_chain_length,
            envelope = %config.envelope,
            "Setting up DAQ channel"
        );
        Self {
            source,
            splitter: config.envelope.splitter(),
            decoder: EventDecoder::new(config),
        }
    }

    pub fn config(&self) -> &DecoderConfig {
        self.decoder.config()
    }

    /// Next framed raw event
    pub fn next_raw_event(&mut self) -> DaqResult<RawEvent> {
        self.splitter.split(&mut self.source)
    }

    /// Next decoded event
    pub fn next_event(&mut self) -> DaqResult<Event> {
        let raw = self.next_raw_event()?;
        Ok(self.decoder.decode(&raw))
    }

    /// Next event in both raw and decoded form
    pub fn next_both(&mut self) -> DaqResult<(Event, RawEvent)> {
        let raw = self.next_raw_event()?;
        let event = self.decoder.decode(&raw);
        Ok((event, raw))
    }

    /// Split everything currently buffered
    pub fn all_raw_events(&mut self) -> DaqResult<Vec<RawEvent>> {
        drain(|| self.next_raw_event())
    }

    /// Decode everything currently buffered
    pub fn all_events(&mut self) -> DaqResult<Vec<Event>> {
        drain(|| self.next_event())
    }

    /// Statistics since the last call
    pub fn statistics(&mut self) -> DecodingStatistics {
        self.decoder.statistics()
    }

    /// Readback values per token chain position since the last call
    pub fn readback(&mut self) -> Vec<Vec<u16>> {
        self.decoder.readback()
    }

    pub fn source(&self) -> &DtbSource<C> {
        &self.source
    }

    pub fn source_mut(&mut self) -> &mut DtbSource<C> {
        &mut self.source
    }
}

/// Collect until the source runs dry
fn drain<T>(mut next: impl FnMut() -> DaqResult<T>) -> DaqResult<Vec<T>> {
    let mut items = Vec::new();
    loop {
        match next() {
            Ok(item) => items.push(item),
            Err(err) if err.is_empty() => return Ok(items),
            Err(err) => return Err(err),
        }
    }
}

/// All readout channels of one testboard
#[derive(Debug)]
pub struct Daq<C: SampleChannel> {
    channels: Vec<DaqChannel<C>>,
    /// Events already read per channel, waiting for the slower channels
    pending: Vec<Option<Event>>,
}

impl<C: SampleChannel> Daq<C> {
    pub fn new(channels: Vec<DaqChannel<C>>) -> Self {
        let pending = vec![None; channels.len()];
        Self { channels, pending }
    }

    /// Build one channel per `[[daq.channels]]` entry from the given hardware channels
    pub fn from_config(config: &Config, hardware: Vec<C>) -> Result<Self, ConfigError> {
        let decoders = config.decoder_configs()?;
        if decoders.len() != hardware.len() {
            return Err(ConfigError::Invalid(format!(
                "{} channels configured but {} provided",
                decoders.len(),
                hardware.len()
            )));
        }

        let channels = hardware
            .into_iter()
            .zip(decoders)
            .map(|(hw, decoder)| {
                let source = DtbSource::with_block_size(
                    hw,
                    decoder.channel,
                    config.daq.stop_at_empty,
                    config.daq.block_size,
                );
                DaqChannel::with_source(source, decoder)
            })
            .collect::<Vec<_>>();

        info!(channels = channels.len(), "DAQ configured");
        Ok(Self::new(channels))
    }

    pub fn channels(&self) -> &[DaqChannel<C>] {
        &self.channels
    }

    pub fn channels_mut(&mut self) -> &mut [DaqChannel<C>] {
        &mut self.channels
    }

    /// Next event of every channel, merged.
    ///
    /// Header and trailer come from the first channel, pixels of all
    /// channels are concatenated in channel order. Events of channels that
    /// already delivered are kept when another channel runs dry, so a
    /// retry after `BufferEmpty` continues in step.
    pub fn next_event(&mut self) -> DaqResult<Event> {
        if self.channels.is_empty() {
            return Err(DaqError::channel("no DAQ channels configured"));
        }
        for (channel, slot) in self.channels.iter_mut().zip(self.pending.iter_mut()) {
            if slot.is_none() {
                *slot = Some(channel.next_event()?);
            }
        }

        let mut events = self.pending.iter_mut().filter_map(Option::take);
        let mut merged = events
            .next()
            .ok_or_else(|| DaqError::channel("no pending DAQ events"))?;
        for event in events {
            merged.pixels.extend(event.pixels);
        }
        Ok(merged)
    }

    /// Merge events until any channel runs dry
    pub fn all_events(&mut self) -> DaqResult<Vec<Event>> {
        drain(|| self.next_event())
    }

    /// Statistics of all channels since the last call, summed
    pub fn statistics(&mut self) -> DecodingStatistics {
        let mut total = DecodingStatistics::new();
        for channel in &mut self.channels {
            total += channel.statistics();
        }
        total
    }

    /// Readback values indexed by global ROC id
    pub fn readback(&mut self) -> Vec<Vec<u16>> {
        let mut values = Vec::new();
        for channel in &mut self.channels {
            let chain = channel.config().token_chain_length as usize;
            let mut rb = channel.readback();
            rb.resize(chain.max(rb.len()), Vec::new());
            values.extend(rb);
        }
        values
    }
}
