//! E2E tests for the DAQ pipeline (generate → split → decode → verify)
//!
//! Raw streams come from the seeded stream generator, which also returns
//! the hits it encoded. Every decoded event must reproduce them exactly.

use pxar_rs::common::Pixel;
use pxar_rs::config::registers::constants::{ROC_PSI46DIG, ROC_PSI46DIGV21, ROC_PSI46V2};
use pxar_rs::config::Config;
use pxar_rs::data_source_emulator::{EmulatorConfig, StreamGenerator};
use pxar_rs::reader::decoder::{DecoderConfig, Envelope};
use pxar_rs::reader::dump::{read_samples, write_samples};
use pxar_rs::reader::{Daq, DaqChannel, MemoryChannel};

fn emulator(mean_hits: f64) -> EmulatorConfig {
    EmulatorConfig {
        seed: 42,
        mean_hits,
        ..Default::default()
    }
}

fn channel(channel: u8, token_chain_length: u8, envelope: Envelope, device: u8) -> DecoderConfig {
    DecoderConfig {
        channel,
        token_chain_length,
        envelope,
        device,
    }
}

/// Generate `n_events` events and return the streams with the encoded hits
fn generate(
    decoders: &[DecoderConfig],
    n_events: usize,
    mean_hits: f64,
) -> (Vec<Vec<u16>>, Vec<Vec<Pixel>>) {
    let mut generator = StreamGenerator::new(decoders.to_vec(), &emulator(mean_hits)).unwrap();
    let mut streams = vec![Vec::new(); decoders.len()];
    let truth = (0..n_events)
        .map(|_| generator.generate_event(&mut streams))
        .collect();
    (streams, truth)
}

fn daq(decoders: &[DecoderConfig], streams: Vec<Vec<u16>>) -> Daq<MemoryChannel> {
    Daq::new(
        decoders
            .iter()
            .zip(streams)
            .map(|(decoder, samples)| DaqChannel::new(MemoryChannel::new(samples), *decoder, true))
            .collect(),
    )
}

/// Decode everything and compare event by event
fn assert_reproduced(decoders: &[DecoderConfig], n_events: usize, mean_hits: f64) {
    let (streams, truth) = generate(decoders, n_events, mean_hits);
    let mut daq = daq(decoders, streams);

    let events = daq.all_events().unwrap();
    assert_eq!(events.len(), n_events);
    for (i, (event, hits)) in events.iter().zip(&truth).enumerate() {
        assert_eq!(&event.pixels, hits, "event {} differs", i);
    }

    let stats = daq.statistics();
    assert_eq!(stats.errors(), 0, "unexpected errors: {}", stats);
    let n_pixels: usize = truth.iter().map(Vec::len).sum();
    assert_eq!(stats.info_pixels_valid, n_pixels as u64);
    assert_eq!(
        stats.info_events_total(),
        (n_events * decoders.len()) as u64
    );
}

// =============================================================================
// Framings
// =============================================================================

#[test]
fn test_single_digital_roc() {
    let decoders = [channel(0, 1, Envelope::Deser160, ROC_PSI46DIGV21)];
    assert_reproduced(&decoders, 500, 2.0);
}

#[test]
fn test_psi46dig_inverted_rows() {
    let decoders = [channel(0, 1, Envelope::Deser160, ROC_PSI46DIG)];
    assert_reproduced(&decoders, 200, 3.0);
}

#[test]
fn test_analog_roc() {
    let decoders = [channel(0, 1, Envelope::Deser160, ROC_PSI46V2)];
    assert_reproduced(&decoders, 200, 2.0);
}

#[test]
fn test_module_two_channels() {
    let decoders = [
        channel(0, 8, Envelope::Deser400, ROC_PSI46DIGV21),
        channel(1, 8, Envelope::Deser400, ROC_PSI46DIGV21),
    ];
    assert_reproduced(&decoders, 300, 1.5);
}

#[test]
fn test_tbm09_four_chains() {
    let decoders: Vec<_> = (0..4)
        .map(|ch| channel(ch, 4, Envelope::Deser400, ROC_PSI46DIGV21))
        .collect();
    assert_reproduced(&decoders, 100, 1.0);
}

#[test]
fn test_soft_tbm() {
    let decoders = [channel(0, 2, Envelope::SoftTbm, ROC_PSI46DIGV21)];
    assert_reproduced(&decoders, 200, 2.0);
}

#[test]
fn test_event_ids_wrap() {
    // More than 256 events: the 8-bit TBM event counter wraps without mismatches
    let decoders = [channel(0, 1, Envelope::Deser400, ROC_PSI46DIGV21)];
    assert_reproduced(&decoders, 600, 0.5);
}

#[test]
fn test_empty_events() {
    let decoders = [channel(0, 8, Envelope::Deser400, ROC_PSI46DIGV21)];
    let (streams, _) = generate(&decoders, 50, 0.0);
    let mut daq = daq(&decoders, streams);
    assert_eq!(daq.all_events().unwrap().len(), 50);
    let stats = daq.statistics();
    assert_eq!(stats.info_events_empty, 50);
    assert_eq!(stats.info_events_valid, 0);
}

// =============================================================================
// Configuration and files
// =============================================================================

#[test]
fn test_small_blocks_from_config() {
    let config = Config::from_toml(
        r#"
[daq]
block_size = 3

[[daq.channels]]
channel = 0
token_chain_length = 8

[dut]
roc_type = "psi46digv21respin"
tbm_type = "tbm08b"

[emulator]
seed = 3
mean_hits = 2.0
"#,
    )
    .unwrap();

    let decoders = config.decoder_configs().unwrap();
    let mut generator = StreamGenerator::new(decoders.clone(), &config.emulator).unwrap();
    let mut streams = vec![Vec::new()];
    let truth: Vec<Vec<Pixel>> = (0..100)
        .map(|_| generator.generate_event(&mut streams))
        .collect();

    let hardware = streams.into_iter().map(MemoryChannel::new).collect();
    let mut daq = Daq::from_config(&config, hardware).unwrap();
    let events = daq.all_events().unwrap();

    assert_eq!(events.len(), truth.len());
    assert!(events.iter().zip(&truth).all(|(e, t)| &e.pixels == t));
    assert_eq!(daq.statistics().errors(), 0);
}

#[test]
fn test_dump_file_through_decoder() {
    let decoders = [channel(0, 1, Envelope::Deser160, ROC_PSI46DIGV21)];
    let (mut streams, truth) = generate(&decoders, 100, 2.0);

    let path = std::env::temp_dir().join(format!("pxar_pipeline_{}.dat", std::process::id()));
    write_samples(&path, &streams[0]).unwrap();
    let samples = read_samples(&path).unwrap();
    std::fs::remove_file(&path).unwrap();
    assert_eq!(samples, streams.remove(0));

    let mut daq = daq(&decoders, vec![samples]);
    let events = daq.all_events().unwrap();
    assert_eq!(events.len(), truth.len());
    assert_eq!(events[99].pixels, truth[99]);
}

// =============================================================================
// Corrupted streams
// =============================================================================

#[test]
fn test_missing_tbm_header_is_counted() {
    let decoders = [channel(0, 1, Envelope::Deser400, ROC_PSI46DIGV21)];
    let (mut streams, _) = generate(&decoders, 10, 0.0);

    // Empty single-ROC events are five words; drop the first word of event 3
    let removed = streams[0].remove(3 * 5);
    assert_eq!(removed & 0xe000, 0xa000);

    let mut daq = daq(&decoders, streams);
    let events = daq.all_events().unwrap();
    assert_eq!(events.len(), 10);

    let stats = daq.statistics();
    assert_eq!(stats.errors_event_start, 1);
    assert!(stats.errors_tbm_header >= 1);
}

#[test]
fn test_truncated_stream_ends_cleanly() {
    let decoders = [channel(0, 1, Envelope::Deser160, ROC_PSI46DIGV21)];
    let (mut streams, _) = generate(&decoders, 20, 0.0);
    // Header-only events are single words; cut the stream in half
    streams[0].truncate(10);

    let mut daq = daq(&decoders, streams);
    assert_eq!(daq.all_events().unwrap().len(), 10);
}
