//! Command-line interface for Dualmic
//!
//! Handles argument parsing and logging configuration.

use clap::Parser;
use log::LevelFilter;
use std::path::PathBuf;

/// Dualmic - Record two microphones at once and compare them
#[derive(Parser, Debug)]
#[command(name = "dualmic")]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Increase logging verbosity
    /// -v = info, -vv = debug, -vvv = trace, -vvvv = all deps
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Suppress all output except errors
    #[arg(short, long)]
    pub quiet: bool,

    /// Capture sample rate in Hz
    #[arg(long, default_value_t = 48000)]
    pub sample_rate: u32,

    /// Length of each encoded chunk in milliseconds
    #[arg(long, default_value_t = 1000)]
    pub timeslice_ms: u64,

    /// Waveform analysis window in samples (power of two)
    #[arg(long, default_value_t = 2048)]
    pub fft_size: usize,

    /// How long to wait for a device stream to start, in milliseconds
    #[arg(long, default_value_t = 5000)]
    pub acquire_timeout_ms: u64,

    /// Where downloaded recordings are saved (defaults to ~/Downloads)
    #[arg(long)]
    pub download_dir: Option<PathBuf>,
}

impl Args {
    /// Get the log level filter based on verbosity flags
    pub fn log_level(&self) -> LevelFilter {
        if self.quiet {
            LevelFilter::Error
        } else {
            match self.verbose {
                0 => LevelFilter::Warn,
                1 => LevelFilter::Info,
                2 => LevelFilter::Debug,
                _ => LevelFilter::Trace,
            }
        }
    }

    /// Whether PipeWire and GUI framework logs are let through
    pub fn dependency_verbose(&self) -> bool {
        !self.quiet && self.verbose >= 4
    }
}

/// Initialize the logging system based on CLI arguments
pub fn init_logging(args: &Args) {
    let mut builder = env_logger::Builder::new();

    // Base level for all modules - keep at warn to suppress noisy deps
    builder.filter_level(LevelFilter::Warn);

    builder.filter_module("dualmic", args.log_level());

    // Audio server and GUI framework modules only at -vvvv
    if args.dependency_verbose() {
        builder.filter_module("pipewire", args.log_level());
        builder.filter_module("gpui", args.log_level());
        builder.filter_module("blade_graphics", args.log_level());
    }

    builder.format_timestamp_millis().init();
}
