//! Common data types shared across components
//!
//! This module defines the pixel and event records produced by the DAQ
//! pipeline, the decoding statistics and the error types.

pub mod cli;
pub mod error;
pub mod event;
pub mod pixel;
pub mod statistics;

pub use cli::{CommonArgs, DecodeArgs, EmulatorArgs, ScanArgs, ScanKind};
pub use error::{DaqError, DaqResult, PipelineError, PipelineResult, PixelError};
pub use event::{Event, RawEvent, RAW_EVENT_MAX_SIZE};
pub use pixel::{sort_pixels, Pixel};
pub use statistics::DecodingStatistics;
