//! Decode binary - runs raw sample dumps through the DAQ pipeline
//!
//! Usage:
//!   cargo run --bin decode -- -i raw.dat                      # Statistics only
//!   cargo run --bin decode -- -i raw.dat -d                   # Print every event
//!   cargo run --bin decode -- -f module.toml -i raw_ch0.dat -i raw_ch1.dat

use clap::Parser;
use pxar_rs::common::DecodeArgs;
use pxar_rs::config::Config;
use pxar_rs::reader::dump::read_samples;
use pxar_rs::reader::{Daq, MemoryChannel};
use tracing::info;
use tracing_subscriber::EnvFilter;

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("pxar_rs=info".parse()?))
        .init();

    let args = DecodeArgs::parse();

    let config_path = &args.common.config_file;
    let config = if std::path::Path::new(config_path).exists() {
        Config::load(config_path)?
    } else {
        info!(config_file = %config_path, "No configuration file, using defaults");
        Config::default()
    };

    let mut channels = Vec::with_capacity(args.inputs.len());
    for input in &args.inputs {
        let samples = read_samples(input)?;
        info!(input = %input, words = samples.len(), "Read raw sample dump");
        channels.push(MemoryChannel::new(samples));
    }

    let mut daq = Daq::from_config(&config, channels)?;
    let events = daq.all_events()?;

    if args.dump {
        for (i, event) in events.iter().enumerate() {
            println!("{:6} {}", i, event);
        }
    }

    let stats = daq.statistics();
    println!("Decoded {} events", events.len());
    println!("{}", stats);

    let readback = daq.readback();
    for (roc, values) in readback.iter().enumerate().filter(|(_, v)| !v.is_empty()) {
        println!("ROC {:2} readback: {:04x?}", roc, values);
    }
    Ok(())
}
