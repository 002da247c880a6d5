//! Session settings derived from the command line
//!
//! Nothing is persisted; every launch starts from the arguments.

use crate::audio::CaptureConfig;
use crate::cli::Args;
use crate::export;
use anyhow::{bail, Result};
use std::path::PathBuf;
use std::time::Duration;

const MIN_FFT_SIZE: usize = 32;
const MAX_FFT_SIZE: usize = 32768;

#[derive(Debug, Clone)]
pub struct Settings {
    pub capture: CaptureConfig,
    /// Length of each encoded chunk
    pub timeslice: Duration,
    pub fft_size: usize,
    pub download_dir: PathBuf,
}

impl Settings {
    pub fn from_args(args: &Args) -> Result<Self> {
        if !args.fft_size.is_power_of_two()
            || !(MIN_FFT_SIZE..=MAX_FFT_SIZE).contains(&args.fft_size)
        {
            bail!(
                "--fft-size must be a power of two between {} and {}, got {}",
                MIN_FFT_SIZE,
                MAX_FFT_SIZE,
                args.fft_size
            );
        }
        if args.sample_rate == 0 {
            bail!("--sample-rate must be greater than zero");
        }
        if args.timeslice_ms == 0 {
            bail!("--timeslice-ms must be greater than zero");
        }

        Ok(Self {
            capture: CaptureConfig {
                sample_rate: args.sample_rate,
                acquire_timeout: Duration::from_millis(args.acquire_timeout_ms),
            },
            timeslice: Duration::from_millis(args.timeslice_ms),
            fft_size: args.fft_size,
            download_dir: args
                .download_dir
                .clone()
                .unwrap_or_else(export::default_download_dir),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    fn settings(argv: &[&str]) -> Result<Settings> {
        let args = Args::try_parse_from(std::iter::once("dualmic").chain(argv.iter().copied()))?;
        Settings::from_args(&args)
    }

    #[test]
    fn test_defaults_are_valid() {
        let settings = settings(&[]).unwrap();
        assert_eq!(settings.capture.sample_rate, 48000);
        assert_eq!(settings.timeslice, Duration::from_secs(1));
        assert_eq!(settings.fft_size, 2048);
    }

    #[test]
    fn test_explicit_download_dir() {
        let settings = settings(&["--download-dir", "/tmp/takes"]).unwrap();
        assert_eq!(settings.download_dir, PathBuf::from("/tmp/takes"));
    }

    #[test]
    fn test_rejects_bad_fft_size() {
        assert!(settings(&["--fft-size", "1000"]).is_err());
        assert!(settings(&["--fft-size", "16"]).is_err());
        assert!(settings(&["--fft-size", "65536"]).is_err());
        assert!(settings(&["--fft-size", "32"]).is_ok());
    }

    #[test]
    fn test_rejects_zero_timeslice() {
        assert!(settings(&["--timeslice-ms", "0"]).is_err());
    }
}
