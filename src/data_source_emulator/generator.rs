//! Random raw event generator
//!
//! Every event carries a Poisson-distributed number of hits per ROC at
//! uniformly drawn addresses, with Gaussian pulse heights.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::{Distribution, Normal, Poisson};
use tracing::{debug, info};

use super::{pulse_height, EmulatorConfig, EmulatorError, StreamWriter};
use crate::common::pixel::constants::{ROC_NUMCOLS, ROC_NUMROWS};
use crate::common::Pixel;
use crate::reader::decoder::{DecoderConfig, Envelope};

/// Random event source writing one sample stream per channel
#[derive(Debug)]
pub struct StreamGenerator {
    writers: Vec<StreamWriter>,
    rng: StdRng,
    /// `None` when no hits are requested
    multiplicity: Option<Poisson<f64>>,
    pulse_height: Normal<f64>,
    events_generated: u64,
}

impl StreamGenerator {
    pub fn new(decoders: Vec<DecoderConfig>, config: &EmulatorConfig) -> Result<Self, EmulatorError> {
        config.validate()?;
        let multiplicity = if config.mean_hits > 0.0 {
            Some(Poisson::new(config.mean_hits)?)
        } else {
            None
        };
        let pulse_height = Normal::new(config.pulse_height_mean, config.pulse_height_sigma)?;

        info!(
            channels = decoders.len(),
            seed = config.seed,
            mean_hits = config.mean_hits,
            "Stream generator configured"
        );

        Ok(Self {
            writers: decoders.into_iter().map(StreamWriter::new).collect(),
            rng: StdRng::seed_from_u64(config.seed),
            multiplicity,
            pulse_height,
            events_generated: 0,
        })
    }

    pub fn channels(&self) -> usize {
        self.writers.len()
    }

    pub fn events_generated(&self) -> u64 {
        self.events_generated
    }

    /// Append one event to every channel stream and return the generated hits.
    ///
    /// `streams` holds one sample vector per channel. Hits carry the global
    /// ROC id the decoder will assign.
    pub fn generate_event(&mut self, streams: &mut [Vec<u16>]) -> Vec<Pixel> {
        let mut truth = Vec::new();
        for (writer, stream) in self.writers.iter_mut().zip(streams.iter_mut()) {
            let config = *writer.config();
            let positions = match config.envelope {
                Envelope::Deser160 => 1,
                _ => config.token_chain_length as usize,
            };

            let mut rocs = Vec::with_capacity(positions);
            for position in 0..positions {
                let n_hits = self
                    .multiplicity
                    .as_ref()
                    .map_or(0, |m| m.sample(&mut self.rng) as usize);
                let hits: Vec<Pixel> = (0..n_hits)
                    .map(|_| {
                        Pixel::new(
                            config.roc_id(position),
                            self.rng.gen_range(0..ROC_NUMCOLS),
                            self.rng.gen_range(0..ROC_NUMROWS),
                            pulse_height(&self.pulse_height, 0.0, &mut self.rng),
                        )
                    })
                    .collect();
                truth.extend_from_slice(&hits);
                rocs.push(hits);
            }
            writer.write_event(&rocs, stream);
        }

        self.events_generated += 1;
        truth
    }

    /// Generate `n_events` events, one sample stream per channel
    pub fn generate(&mut self, n_events: usize) -> Vec<Vec<u16>> {
        let mut streams = vec![Vec::new(); self.writers.len()];
        for _ in 0..n_events {
            self.generate_event(&mut streams);
        }
        debug!(
            events = n_events,
            words = streams.iter().map(Vec::len).sum::<usize>(),
            "Generated raw streams"
        );
        streams
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::RawEvent;
    use crate::reader::decoder::EventDecoder;

    fn deser160() -> DecoderConfig {
        DecoderConfig::default()
    }

    #[test]
    fn test_same_seed_same_stream() {
        let config = EmulatorConfig::default();
        let mut a = StreamGenerator::new(vec![deser160()], &config).unwrap();
        let mut b = StreamGenerator::new(vec![deser160()], &config).unwrap();
        assert_eq!(a.generate(50), b.generate(50));
        assert_eq!(a.events_generated(), 50);
    }

    #[test]
    fn test_no_hits() {
        let config = EmulatorConfig {
            mean_hits: 0.0,
            ..Default::default()
        };
        let mut generator = StreamGenerator::new(vec![deser160()], &config).unwrap();
        let streams = generator.generate(3);
        assert_eq!(streams, vec![vec![0xc7f8, 0xc7f8, 0xc7f8]]);
    }

    #[test]
    fn test_generated_hits_decode() {
        let config = EmulatorConfig {
            mean_hits: 5.0,
            ..Default::default()
        };
        let mut generator = StreamGenerator::new(vec![deser160()], &config).unwrap();
        let mut streams = vec![Vec::new()];
        let truth = generator.generate_event(&mut streams);

        let mut decoder = EventDecoder::new(deser160());
        let event = decoder.decode(&RawEvent::from_samples(streams.remove(0)));
        assert_eq!(event.pixels, truth);
    }

    #[test]
    fn test_negative_sigma_rejected() {
        let config = EmulatorConfig {
            pulse_height_sigma: -1.0,
            ..Default::default()
        };
        assert!(matches!(
            StreamGenerator::new(vec![deser160()], &config),
            Err(EmulatorError::PulseHeight(_))
        ));
    }
}
