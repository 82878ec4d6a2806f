//! Command-line surface
//!
//! Every flag is optional so that values loaded from `--config` are only
//! overridden by flags actually given.

use anyhow::{Context, Result};
use audiobat_core::config::{BackendKind, RunOptions};
use clap::Parser;
use std::path::PathBuf;

/// Audiobat - play a sine, capture it back, check its spectrum
#[derive(Parser, Debug, Default)]
#[command(name = "audiobat")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Device for both playback and capture (e.g. `default`, `hw:0,0`)
    #[arg(short = 'D', long)]
    pub device: Option<String>,

    /// Playback device; alone it runs a playback-only test
    #[arg(short = 'P', long)]
    pub playback: Option<String>,

    /// Capture device; alone it runs a capture-only test
    #[arg(short = 'C', long)]
    pub capture: Option<String>,

    /// WAV file to play instead of a sine, or to analyse with --local
    #[arg(short = 'f', long)]
    pub file: Option<PathBuf>,

    /// Where the capture is written (default: a file in the temp directory)
    #[arg(long)]
    pub capture_file: Option<PathBuf>,

    /// Bytes per sample: 1, 2, 3 or 4
    #[arg(short = 's', long)]
    pub sample_depth: Option<u8>,

    /// Channels under test: 1 or 2
    #[arg(short = 'c', long)]
    pub channels: Option<u16>,

    /// Sample rate in Hz
    #[arg(short = 'r', long)]
    pub rate: Option<u32>,

    /// Frames to analyse, or seconds as `<float>s`; 0 plays endlessly
    #[arg(short = 'n', long)]
    pub frames: Option<String>,

    /// Target frequency in Hz, or `a,b` for two channels
    #[arg(short = 'F', long)]
    pub freq: Option<String>,

    /// Peak detection threshold in standard deviations
    #[arg(short = 'k', long)]
    pub sigma: Option<f64>,

    /// Stop each task after this many buffers
    #[arg(short = 'p', long)]
    pub periods: Option<u64>,

    /// Analyse --file directly without touching any device
    #[arg(short = 'l', long)]
    pub local: bool,

    /// Audio backend: cpal or virtual
    #[arg(long)]
    pub backend: Option<BackendKind>,

    /// Delay between starting playback and starting capture, in ms
    #[arg(long)]
    pub settle_ms: Option<u64>,

    /// Load run options from a JSON file; flags override it
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Print the run report as JSON
    #[arg(long)]
    pub json: bool,

    /// List audio devices and exit
    #[arg(long)]
    pub list_devices: bool,
}

impl Cli {
    /// Run options from `--config` (or defaults) with flags applied
    pub fn to_options(&self) -> Result<RunOptions> {
        let base = match &self.config {
            Some(path) => RunOptions::load(path)
                .with_context(|| format!("failed to load config {}", path.display()))?,
            None => RunOptions::default(),
        };
        Ok(self.apply(base))
    }

    /// Overlay the flags that were given onto `options`
    pub fn apply(&self, mut options: RunOptions) -> RunOptions {
        if let Some(v) = &self.device {
            options.device = Some(v.clone());
        }
        if let Some(v) = &self.playback {
            options.playback_device = Some(v.clone());
        }
        if let Some(v) = &self.capture {
            options.capture_device = Some(v.clone());
        }
        if let Some(v) = &self.file {
            options.input_file = Some(v.clone());
        }
        if let Some(v) = &self.capture_file {
            options.capture_file = Some(v.clone());
        }
        if let Some(v) = self.sample_depth {
            options.sample_depth = v;
        }
        if let Some(v) = self.channels {
            options.channels = v;
        }
        if let Some(v) = self.rate {
            options.sample_rate = v;
        }
        if let Some(v) = &self.frames {
            options.frames = Some(v.clone());
        }
        if let Some(v) = &self.freq {
            options.frequencies = Some(v.clone());
        }
        if let Some(v) = self.sigma {
            options.sigma_k = v;
        }
        if let Some(v) = self.periods {
            options.period_limit = Some(v);
        }
        if self.local {
            options.local = true;
        }
        if let Some(v) = self.backend {
            options.backend = v;
        }
        if let Some(v) = self.settle_ms {
            options.settle_ms = v;
        }
        options
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Cli {
        Cli::try_parse_from(std::iter::once("audiobat").chain(args.iter().copied())).unwrap()
    }

    #[test]
    fn test_short_flags() {
        let cli = parse(&["-D", "hw:0,0", "-c", "2", "-r", "48000", "-n", "2s", "-F", "997,1500", "-k", "4"]);
        let options = cli.apply(RunOptions::default());
        assert_eq!(options.device.as_deref(), Some("hw:0,0"));
        assert_eq!(options.channels, 2);
        assert_eq!(options.sample_rate, 48000);
        assert_eq!(options.frames.as_deref(), Some("2s"));
        assert_eq!(options.frequencies.as_deref(), Some("997,1500"));
        assert_eq!(options.sigma_k, 4.0);
    }

    #[test]
    fn test_backend_flag() {
        let cli = parse(&["--backend", "virtual"]);
        assert_eq!(cli.backend, Some(BackendKind::Virtual));
        assert!(Cli::try_parse_from(["audiobat", "--backend", "nope"]).is_err());
    }

    #[test]
    fn test_flags_override_config() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("run.json");
        RunOptions {
            sample_rate: 96000,
            channels: 2,
            ..Default::default()
        }
        .save(&path)
        .unwrap();

        let cli = parse(&["--config", path.to_str().unwrap(), "-r", "48000"]);
        let options = cli.to_options().unwrap();
        assert_eq!(options.sample_rate, 48000);
        assert_eq!(options.channels, 2);
    }

    #[test]
    fn test_missing_config() {
        let cli = parse(&["--config", "/nonexistent/audiobat.json"]);
        assert!(cli.to_options().is_err());
    }

    #[test]
    fn test_unset_flags_keep_defaults() {
        let options = parse(&[]).apply(RunOptions::default());
        assert_eq!(options, RunOptions::default());
    }
}
