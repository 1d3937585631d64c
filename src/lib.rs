//! pxar-rs: DAQ event pipeline and calibration scan engine for pixel detector testboards
//!
//! Raw 16-bit sample streams of a digital testboard (DTB) are split into
//! events, decoded into pixel hits and counted. On top of the readout, the
//! scan engine expands calibration tests over a multi-ROC device and
//! repacks the results into maps and DAC tables.

pub mod common;
pub mod config;
pub mod data_source_emulator;
pub mod reader;
pub mod scan;
