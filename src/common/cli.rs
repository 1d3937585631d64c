//! CLI argument parsing for pxar-rs binaries
//!
//! # Design Principles (KISS)
//! - Use clap's derive macro for declarative argument definition
//! - Common arguments shared via composition, not inheritance
//! - Each binary has its own Args struct that embeds CommonArgs

use clap::{Parser, ValueEnum};

/// Common arguments shared across all binaries
#[derive(Parser, Debug, Clone)]
pub struct CommonArgs {
    /// Path to configuration file
    #[arg(short = 'f', long = "config", default_value = "config.toml")]
    pub config_file: String,
}

/// Arguments for the raw stream emulator
#[derive(Parser, Debug, Clone)]
pub struct EmulatorArgs {
    #[command(flatten)]
    pub common: CommonArgs,

    /// Output file for the raw sample dump (little-endian u16)
    #[arg(short = 'o', long = "output", default_value = "raw.dat")]
    pub output: String,

    /// Override the number of events to generate
    #[arg(short = 'n', long = "events")]
    pub events: Option<usize>,

    /// Override the random seed
    #[arg(long, env = "PXAR_SEED")]
    pub seed: Option<u64>,
}

/// Arguments for the raw dump decoder
#[derive(Parser, Debug, Clone)]
pub struct DecodeArgs {
    #[command(flatten)]
    pub common: CommonArgs,

    /// Raw sample dumps to decode, one per configured channel
    #[arg(short = 'i', long = "input", required = true)]
    pub inputs: Vec<String>,

    /// Print every decoded event
    #[arg(short = 'd', long = "dump")]
    pub dump: bool,
}

/// Test to run against the emulated testboard
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanKind {
    PulseheightMap,
    EfficiencyMap,
    ThresholdMap,
    PulseheightVsDac,
    EfficiencyVsDac,
    ThresholdVsDac,
    PulseheightVsDacDac,
    EfficiencyVsDacDac,
}

/// Arguments for the scan runner
#[derive(Parser, Debug, Clone)]
pub struct ScanArgs {
    #[command(flatten)]
    pub common: CommonArgs,

    /// Test to run
    #[arg(short = 't', long = "test", value_enum, default_value = "efficiency-map")]
    pub test: ScanKind,

    /// Register scanned on the first axis
    #[arg(long = "dac1", default_value = "vcal")]
    pub dac1: String,

    #[arg(long = "dac1-min", default_value = "0")]
    pub dac1_min: u8,

    #[arg(long = "dac1-max", default_value = "255")]
    pub dac1_max: u8,

    #[arg(long = "dac1-step", default_value = "1")]
    pub dac1_step: u8,

    /// Register scanned on the second axis
    #[arg(long = "dac2", default_value = "vthrcomp")]
    pub dac2: String,

    #[arg(long = "dac2-min", default_value = "0")]
    pub dac2_min: u8,

    #[arg(long = "dac2-max", default_value = "255")]
    pub dac2_max: u8,

    #[arg(long = "dac2-step", default_value = "1")]
    pub dac2_step: u8,

    /// Triggers sent per pixel and DAC setting
    #[arg(short = 'n', long = "triggers", default_value = "10")]
    pub triggers: u16,

    /// Threshold level in percent
    #[arg(long = "level", default_value = "50")]
    pub level: u8,

    /// Scan flag bitmask
    #[arg(long = "flags", default_value = "0")]
    pub flags: u16,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_common_args_default() {
        let args = CommonArgs::try_parse_from(["test"]).unwrap();
        assert_eq!(args.config_file, "config.toml");
    }

    #[test]
    fn test_common_args_long_config() {
        let args = CommonArgs::try_parse_from(["test", "--config", "dut.toml"]).unwrap();
        assert_eq!(args.config_file, "dut.toml");
    }

    #[test]
    fn test_emulator_args_full() {
        let args = EmulatorArgs::try_parse_from([
            "test", "-f", "emu.toml", "-o", "run.dat", "-n", "500", "--seed", "7",
        ])
        .unwrap();
        assert_eq!(args.common.config_file, "emu.toml");
        assert_eq!(args.output, "run.dat");
        assert_eq!(args.events, Some(500));
        assert_eq!(args.seed, Some(7));
    }

    #[test]
    fn test_decode_args_requires_input() {
        assert!(DecodeArgs::try_parse_from(["test"]).is_err());
        let args = DecodeArgs::try_parse_from(["test", "-i", "raw.dat", "-d"]).unwrap();
        assert_eq!(args.inputs, vec!["raw.dat"]);
        assert!(args.dump);
    }

    #[test]
    fn test_decode_args_several_inputs() {
        let args =
            DecodeArgs::try_parse_from(["test", "-i", "raw_ch0.dat", "-i", "raw_ch1.dat"]).unwrap();
        assert_eq!(args.inputs.len(), 2);
        assert!(!args.dump);
    }

    #[test]
    fn test_scan_args_default() {
        let args = ScanArgs::try_parse_from(["test"]).unwrap();
        assert_eq!(args.test, ScanKind::EfficiencyMap);
        assert_eq!(args.dac1, "vcal");
        assert_eq!(args.triggers, 10);
        assert_eq!(args.level, 50);
    }

    #[test]
    fn test_scan_args_kind() {
        let args = ScanArgs::try_parse_from([
            "test", "-t", "threshold-vs-dac", "--dac1-max", "100", "--flags", "64",
        ])
        .unwrap();
        assert_eq!(args.test, ScanKind::ThresholdVsDac);
        assert_eq!(args.dac1_max, 100);
        assert_eq!(args.flags, 64);
    }
}
