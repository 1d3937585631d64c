//! Analog ROC decoding (PSI46V2, PSI46XDB)
//!
//! A record holds the ultrablack, black and last-DAC levels followed by six
//! ADC samples per hit. Address levels are judged relative to black and
//! ultrablack, which are smoothed over consecutive events.

use tracing::debug;

use super::EventDecoder;
use crate::common::pixel::{constants::ANALOG_WORDS, expand_sign};
use crate::common::{Event, Pixel, RawEvent};

/// Samples preceding the hits: ultrablack, black, last DAC
const ANALOG_HEADER_WORDS: usize = 3;

/// Running ultrablack and black levels
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AnalogLevels {
    ultrablack: Option<i32>,
    black: Option<i32>,
}

impl AnalogLevels {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold in the levels of a new ROC header
    pub fn update(&mut self, ultrablack: u16, black: u16) {
        self.ultrablack = Some(smooth(self.ultrablack, expand_sign(ultrablack)));
        self.black = Some(smooth(self.black, expand_sign(black)));
    }

    pub fn ultrablack(&self) -> Option<i32> {
        self.ultrablack
    }

    pub fn black(&self) -> Option<i32> {
        self.black
    }
}

fn smooth(average: Option<i32>, sample: i32) -> i32 {
    match average {
        Some(avg) => (avg + sample) / 2,
        None => sample,
    }
}

impl EventDecoder {
    pub(super) fn decode_analog(&mut self, raw: &RawEvent) -> Event {
        let mut event = Event::new();
        let data = &raw.data;

        if data.len() >= ANALOG_HEADER_WORDS {
            event.header = data[2];
            self.levels.update(data[0], data[1]);
            let ultrablack = self.levels.ultrablack.unwrap_or_default();
            let black = self.levels.black.unwrap_or_default();

            debug!(
                ultrablack = expand_sign(data[0]),
                ultrablack_avg = ultrablack,
                black = expand_sign(data[1]),
                black_avg = black,
                last_dac = expand_sign(data[2]),
                "Analog ROC header"
            );

            for samples in data[ANALOG_HEADER_WORDS..].chunks_exact(ANALOG_WORDS) {
                match Pixel::from_analog(samples, self.config.roc_id(0), ultrablack, black) {
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
