//! Scan binary - runs a calibration test on the emulated testboard
//!
//! Results are printed as JSON on stdout, logs go to stderr.
//!
//! Usage:
//!   cargo run --bin scan                                          # Efficiency map
//!   cargo run --bin scan -- -t threshold-map --dac1 vcal --dac1-max 100
//!   cargo run --bin scan -- -f module.toml -t efficiency-vs-dac-dac --flags 1

use clap::Parser;
use pxar_rs::common::{ScanArgs, ScanKind};
use pxar_rs::config::Config;
use pxar_rs::data_source_emulator::EmulatedTestBoard;
use pxar_rs::scan::{DacAxis, PxarCore, ScanFlags};
use tracing::info;
use tracing_subscriber::EnvFilter;

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(EnvFilter::from_default_env().add_directive("pxar_rs=info".parse()?))
        .init();

    let args = ScanArgs::parse();

    let config_path = &args.common.config_file;
    let config = if std::path::Path::new(config_path).exists() {
        info!(config_file = %config_path, "Loaded configuration");
        Config::load(config_path)?
    } else {
        info!(config_file = %config_path, "No configuration file, using defaults");
        Config::default()
    };

    let board = EmulatedTestBoard::from_config(&config)?;
    let mut core = PxarCore::new(board, config.build_dut()?);
    core.program_dut()?;

    let flags = ScanFlags::from_bits(args.flags);
    let dac1 = DacAxis::new(&args.dac1, args.dac1_min, args.dac1_max).with_step(args.dac1_step);
    let dac2 = DacAxis::new(&args.dac2, args.dac2_min, args.dac2_max).with_step(args.dac2_step);
    let n = args.triggers;
    info!(test = ?args.test, triggers = n, %flags, "Starting test");

    let result = match args.test {
        ScanKind::PulseheightMap => serde_json::to_string_pretty(&core.pulseheight_map(n, flags)?)?,
        ScanKind::EfficiencyMap => serde_json::to_string_pretty(&core.efficiency_map(n, flags)?)?,
        ScanKind::ThresholdMap => {
            serde_json::to_string_pretty(&core.threshold_map(dac1, args.level, n, flags)?)?
        }
        ScanKind::PulseheightVsDac => {
            serde_json::to_string_pretty(&core.pulseheight_vs_dac(dac1, n, flags)?)?
        }
        ScanKind::EfficiencyVsDac => {
            serde_json::to_string_pretty(&core.efficiency_vs_dac(dac1, n, flags)?)?
        }
        ScanKind::ThresholdVsDac => serde_json::to_string_pretty(
            &core.threshold_vs_dac(dac1, dac2, args.level, n, flags)?,
        )?,
        ScanKind::PulseheightVsDacDac => {
            serde_json::to_string_pretty(&core.pulseheight_vs_dac_dac(dac1, dac2, n, flags)?)?
        }
        ScanKind::EfficiencyVsDacDac => {
            serde_json::to_string_pretty(&core.efficiency_vs_dac_dac(dac1, dac2, n, flags)?)?
        }
    };
    println!("{}", result);

    let stats = core.statistics();
    info!(
        events = stats.info_events_total(),
        pixels = stats.info_pixels_valid,
        errors = stats.errors(),
        "Test finished"
    );
    Ok(())
}
