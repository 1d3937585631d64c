//! Emulator binary - writes random raw DTB sample streams to disk
//!
//! Usage:
//!   cargo run --bin emulator                                # Defaults, raw.dat
//!   cargo run --bin emulator -- --config module.toml        # One dump per channel
//!   cargo run --bin emulator -- -n 10000 --seed 7 -o run.dat

use clap::Parser;
use pxar_rs::common::EmulatorArgs;
use pxar_rs::config::Config;
use pxar_rs::data_source_emulator::StreamGenerator;
use pxar_rs::reader::dump::{channel_path, write_samples};
use tracing::info;
use tracing_subscriber::EnvFilter;

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("pxar_rs=info".parse()?))
        .init();

    let args = EmulatorArgs::parse();

    let config_path = &args.common.config_file;
    let mut config = if std::path::Path::new(config_path).exists() {
        info!(config_file = %config_path, "Loaded configuration");
        Config::load(config_path)?
    } else {
        info!(config_file = %config_path, "No configuration file, using defaults");
        Config::default()
    };
    if let Some(seed) = args.seed {
        config.emulator.seed = seed;
    }
    let n_events = args.events.unwrap_or(config.emulator.events);

    let mut generator = StreamGenerator::new(config.decoder_configs()?, &config.emulator)?;
    let streams = generator.generate(n_events);

    for (channel, samples) in streams.iter().enumerate() {
        let path = channel_path(&args.output, channel, streams.len());
        write_samples(&path, samples)?;
        info!(
            channel,
            words = samples.len(),
            path = %path.display(),
            "Wrote raw sample dump"
        );
    }

    println!(
        "Wrote {} events on {} channel(s), seed {}",
        n_events,
        streams.len(),
        config.emulator.seed
    );
    Ok(())
}
