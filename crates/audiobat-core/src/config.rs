//! Run configuration
//!
//! [`RunOptions`] holds the raw, user-level knobs (as parsed from the command
//! line or loaded from a JSON file). [`TestConfig::resolve`] validates them
//! and derives the immutable configuration a run executes with.

use crate::audio::pcm::{PcmError, SampleDepth};
use crate::audio::wav::{ContainerError, FramePolicy, WavReader};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

/// Lowest frequency that is not treated as DC
pub const DC_GUARD_HZ: f64 = 7.01;

/// Default wait between starting playback and starting capture
pub const DEFAULT_SETTLE_MS: u64 = 500;

/// Default peak-detection sensitivity (standard deviations above the mean)
pub const DEFAULT_SIGMA_K: f64 = 3.0;

/// Errors in user-supplied configuration, reported before any I/O starts
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("{0} channels not supported (1..={max})", max = crate::MAX_CHANNELS)]
    Channels(u16),

    #[error(transparent)]
    Depth(#[from] PcmError),

    #[error("invalid sample rate: {0}")]
    SampleRate(u32),

    #[error("invalid frame count '{0}'")]
    FrameCount(String),

    #[error("frame count {0} exceeds the maximum of {max}", max = crate::MAX_FRAMES)]
    TooManyFrames(u64),

    #[error("invalid frequency list '{0}'")]
    Frequency(String),

    #[error("sine wave frequency {freq:.1} Hz out of range ({low:.1}, {high:.1})")]
    FrequencyRange { freq: f64, low: f64, high: f64 },

    #[error("invalid sigma multiplier: {0}")]
    Sigma(f64),

    #[error("invalid device '{0}'")]
    Device(String),

    #[error("unknown backend '{0}'")]
    Backend(String),

    #[error("no input file for local testing")]
    LocalWithoutInput,

    #[error("input file {path}: {source}")]
    InputFile {
        path: PathBuf,
        #[source]
        source: ContainerError,
    },
}

/// Which of the workflows a run executes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunMode {
    /// Play and capture concurrently, then analyse
    Loopback,
    /// Play only (single-ended)
    PlaybackOnly,
    /// Capture only (single-ended), then analyse
    CaptureOnly,
    /// Analyse an existing file, no device I/O
    Local,
}

impl fmt::Display for RunMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Loopback => "loopback",
            Self::PlaybackOnly => "playback-only",
            Self::CaptureOnly => "capture-only",
            Self::Local => "local",
        };
        f.write_str(name)
    }
}

/// PCM backend implementation, chosen once per run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// Sound card through cpal
    #[default]
    Cpal,
    /// In-process software loopback cable
    Virtual,
}

impl FromStr for BackendKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "cpal" | "hw" | "hardware" => Ok(Self::Cpal),
            "virtual" | "loop" => Ok(Self::Virtual),
            other => Err(ConfigError::Backend(other.to_string())),
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Cpal => f.write_str("cpal"),
            Self::Virtual => f.write_str("virtual"),
        }
    }
}

/// A device selector such as `default`, `USB Audio` or `hw:1,0`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceSpec {
    /// The selector as given
    pub name: String,
    /// Card index from a `prefix:card[,device]` or `card,device` selector
    pub card: Option<u32>,
    /// Device index on the card
    pub device: Option<u32>,
}

impl DeviceSpec {
    /// Parse a device selector without modifying the input
    ///
    /// # Example
    /// ```
    /// use audiobat_core::config::DeviceSpec;
    ///
    /// let spec = DeviceSpec::parse("plughw:1,0").unwrap();
    /// assert_eq!(spec.card, Some(1));
    /// assert_eq!(spec.device, Some(0));
    ///
    /// let named = DeviceSpec::parse("USB Audio").unwrap();
    /// assert_eq!(named.card, None);
    /// ```
    pub fn parse(selector: &str) -> Result<Self, ConfigError> {
        let name = selector.trim();
        if name.is_empty() {
            return Err(ConfigError::Device(selector.to_string()));
        }

        let invalid = || ConfigError::Device(selector.to_string());
        let (card, device) = match name.split_once(':') {
            // ALSA-style `front:CARD=PCH,DEV=0` names carry no indices
            Some((_, params)) if params.contains('=') => (None, None),
            Some((_, indices)) => {
                let (card, device) = parse_indices(indices).ok_or_else(invalid)?;
                (Some(card), device)
            }
            None if name.starts_with(|c: char| c.is_ascii_digit()) => {
                let (card, device) = parse_indices(name).ok_or_else(invalid)?;
                (Some(card), device)
            }
            None => (None, None),
        };

        Ok(Self {
            name: name.to_string(),
            card,
            device,
        })
    }
}

fn parse_indices(s: &str) -> Option<(u32, Option<u32>)> {
    match s.split_once(',') {
        Some((card, device)) => Some((card.trim().parse().ok()?, Some(device.trim().parse().ok()?))),
        None => Some((s.trim().parse().ok()?, None)),
    }
}

impl FromStr for DeviceSpec {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for DeviceSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

/// Frequency acceptance band and DC guard used by the analyzer
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Tolerance {
    /// Band half-width as a fraction of the target frequency
    pub relative: f64,
    /// Minimum band half-width in Hz
    pub floor_hz: f64,
    /// Peaks below this frequency are DC-adjacent
    pub dc_guard_hz: f64,
}

impl Default for Tolerance {
    fn default() -> Self {
        Self {
            relative: 0.005,
            floor_hz: 1.0,
            dc_guard_hz: DC_GUARD_HZ,
        }
    }
}

impl Tolerance {
    /// Half-width of the acceptance band around `target_hz`
    pub fn band(&self, target_hz: f64) -> f64 {
        (self.relative * target_hz).max(self.floor_hz)
    }
}

fn default_sample_depth() -> u8 {
    2
}

fn default_channels() -> u16 {
    1
}

fn default_sample_rate() -> u32 {
    crate::DEFAULT_SAMPLE_RATE
}

fn default_sigma_k() -> f64 {
    DEFAULT_SIGMA_K
}

fn default_settle_ms() -> u64 {
    DEFAULT_SETTLE_MS
}

/// Raw run options, before validation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunOptions {
    /// Device used for both directions unless overridden
    #[serde(default)]
    pub device: Option<String>,
    /// Playback device; alone it selects playback-only mode
    #[serde(default)]
    pub playback_device: Option<String>,
    /// Capture device; alone it selects capture-only mode
    #[serde(default)]
    pub capture_device: Option<String>,
    /// Container to play instead of a generated sine
    #[serde(default)]
    pub input_file: Option<PathBuf>,
    /// Where the capture is written
    #[serde(default)]
    pub capture_file: Option<PathBuf>,
    /// Bytes per sample
    #[serde(default = "default_sample_depth")]
    pub sample_depth: u8,
    #[serde(default = "default_channels")]
    pub channels: u16,
    #[serde(default = "default_sample_rate")]
    pub sample_rate: u32,
    /// Frames to analyse: an integer, or seconds as `<float>s`
    #[serde(default)]
    pub frames: Option<String>,
    /// Target frequency, or `a,b` for two channels
    #[serde(default)]
    pub frequencies: Option<String>,
    #[serde(default = "default_sigma_k")]
    pub sigma_k: f64,
    /// Cap on buffers moved per task
    #[serde(default)]
    pub period_limit: Option<u64>,
    /// Analyse `input_file` directly
    #[serde(default)]
    pub local: bool,
    #[serde(default)]
    pub backend: BackendKind,
    #[serde(default = "default_settle_ms")]
    pub settle_ms: u64,
    #[serde(default)]
    pub tolerance: Tolerance,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            device: None,
            playback_device: None,
            capture_device: None,
            input_file: None,
            capture_file: None,
            sample_depth: default_sample_depth(),
            channels: default_channels(),
            sample_rate: default_sample_rate(),
            frames: None,
            frequencies: None,
            sigma_k: default_sigma_k(),
            period_limit: None,
            local: false,
            backend: BackendKind::default(),
            settle_ms: default_settle_ms(),
            tolerance: Tolerance::default(),
        }
    }
}

impl RunOptions {
    /// Load options from a JSON file
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let options = serde_json::from_str(&contents)?;
        tracing::info!(path = %path.display(), "Loaded run options");
        Ok(options)
    }

    /// Save options as pretty JSON, creating parent directories if needed
    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        tracing::info!(path = %path.display(), "Run options saved");
        Ok(())
    }
}

/// Fixed capture destination when none is given
pub fn default_capture_path() -> PathBuf {
    std::env::temp_dir().join("audiobat_capture.wav")
}

/// Parse a frame count: `"88200"` frames or `"2.5s"` seconds at `sample_rate`
pub fn parse_frame_count(s: &str, sample_rate: u32) -> Result<u64, ConfigError> {
    let s = s.trim();
    let invalid = || ConfigError::FrameCount(s.to_string());

    let frames = match s.strip_suffix('s') {
        Some(seconds) => {
            let seconds: f64 = seconds.trim().parse().map_err(|_| invalid())?;
            if !seconds.is_finite() || seconds < 0.0 {
                return Err(invalid());
            }
            (seconds * sample_rate as f64) as u64
        }
        None => s.parse::<u64>().map_err(|_| invalid())?,
    };

    if frames > crate::MAX_FRAMES {
        return Err(ConfigError::TooManyFrames(frames));
    }
    Ok(frames)
}

/// Parse `"997"` or `"997,1500"` into one frequency per channel
///
/// A single value applies to every channel; a pair assigns channel 1 and 2.
pub fn parse_frequencies(s: &str, channels: u16) -> Result<Vec<f64>, ConfigError> {
    let invalid = || ConfigError::Frequency(s.to_string());
    let parse = |v: &str| v.trim().parse::<f64>().map_err(|_| invalid());

    let pair = match s.split_once(',') {
        Some((first, second)) => [parse(first)?, parse(second)?],
        None => {
            let f = parse(s)?;
            [f, f]
        }
    };
    Ok(pair[..channels.clamp(1, crate::MAX_CHANNELS) as usize].to_vec())
}

/// Validated, immutable configuration of one run
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TestConfig {
    pub sample_rate: u32,
    pub channels: u16,
    pub depth: SampleDepth,
    /// Target frequency per channel
    pub target_freqs: Vec<f64>,
    pub sigma_k: f64,
    /// Frames captured and analysed
    pub frames: u64,
    /// Frames of sine to play; `None` plays until stopped (or the whole input file)
    pub playback_frames: Option<u64>,
    pub period_limit: Option<u64>,
    pub mode: RunMode,
    pub backend: BackendKind,
    pub playback_device: Option<DeviceSpec>,
    pub capture_device: Option<DeviceSpec>,
    pub input_file: Option<PathBuf>,
    pub capture_file: PathBuf,
    pub settle: Duration,
    pub tolerance: Tolerance,
}

impl TestConfig {
    /// Validate `options` and derive the run configuration
    ///
    /// When an input file is given its header supplies the channel count,
    /// rate, depth and frame count, overriding the options.
    pub fn resolve(options: &RunOptions) -> Result<Self, ConfigError> {
        let mut depth = SampleDepth::from_bytes(options.sample_depth)?;
        let mut channels = options.channels;
        let mut sample_rate = options.sample_rate;

        if options.local && options.input_file.is_none() {
            return Err(ConfigError::LocalWithoutInput);
        }

        let frames = match &options.input_file {
            Some(path) => {
                let policy = if options.local {
                    FramePolicy::KeepAll
                } else {
                    FramePolicy::Halve
                };
                let reader = WavReader::open(path, policy).map_err(|source| {
                    ConfigError::InputFile {
                        path: path.clone(),
                        source,
                    }
                })?;
                let info = reader.info();
                channels = info.format.channels;
                sample_rate = info.format.sample_rate;
                depth = info.depth;
                info.frames
            }
            None => match &options.frames {
                Some(s) => parse_frame_count(s, sample_rate)?,
                None => sample_rate as u64 * 2,
            },
        };

        if channels == 0 || channels > crate::MAX_CHANNELS {
            return Err(ConfigError::Channels(channels));
        }
        if sample_rate == 0 {
            return Err(ConfigError::SampleRate(sample_rate));
        }
        if !options.sigma_k.is_finite() || options.sigma_k <= 0.0 {
            return Err(ConfigError::Sigma(options.sigma_k));
        }

        let freqs = options
            .frequencies
            .as_deref()
            .map(|s| parse_frequencies(s, channels))
            .transpose()?
            .unwrap_or_else(|| vec![crate::DEFAULT_TARGET_FREQ; channels as usize]);

        let low = options.tolerance.dc_guard_hz;
        let high = sample_rate as f64 * 2.0 / 5.0;
        if let Some(&freq) = freqs.iter().find(|&&f| !(low..=high).contains(&f)) {
            return Err(ConfigError::FrequencyRange { freq, low, high });
        }

        let playback_device = options
            .playback_device
            .as_deref()
            .or(options.device.as_deref())
            .map(DeviceSpec::parse)
            .transpose()?;
        let capture_device = options
            .capture_device
            .as_deref()
            .or(options.device.as_deref())
            .map(DeviceSpec::parse)
            .transpose()?;

        let mut mode = if options.local {
            RunMode::Local
        } else {
            match (&options.playback_device, &options.capture_device) {
                (Some(_), None) => RunMode::PlaybackOnly,
                (None, Some(_)) => RunMode::CaptureOnly,
                _ => RunMode::Loopback,
            }
        };

        let settle = Duration::from_millis(options.settle_ms);
        let playback_frames = if options.input_file.is_some() {
            None
        } else if frames == 0 {
            if mode == RunMode::CaptureOnly {
                return Err(ConfigError::FrameCount("0".into()));
            }
            // Endless sine, nothing to capture
            mode = RunMode::PlaybackOnly;
            None
        } else if mode == RunMode::PlaybackOnly {
            Some(frames)
        } else {
            // Cover the settle delay plus 150% of the analysed frames
            let settle_frames = sample_rate as u64 * options.settle_ms / 1000;
            Some(settle_frames + frames + frames / 2)
        };

        let capture_file = match (mode, &options.input_file) {
            (RunMode::Local, Some(path)) => path.clone(),
            _ => options
                .capture_file
                .clone()
                .unwrap_or_else(default_capture_path),
        };

        Ok(Self {
            sample_rate,
            channels,
            depth,
            target_freqs: freqs,
            sigma_k: options.sigma_k,
            frames,
            playback_frames,
            period_limit: options.period_limit,
            mode,
            backend: options.backend,
            playback_device,
            capture_device,
            input_file: options.input_file.clone(),
            capture_file,
            settle,
            tolerance: options.tolerance,
        })
    }

    /// Bytes per frame
    pub fn frame_size(&self) -> usize {
        self.channels as usize * self.depth.bytes()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::pcm::PcmBuffer;
    use crate::audio::wav::{WavFormat, WavWriter};

    #[test]
    fn test_parse_frame_count() {
        assert_eq!(parse_frame_count("88200", 44100).unwrap(), 88200);
        assert_eq!(parse_frame_count("2s", 44100).unwrap(), 88200);
        assert_eq!(parse_frame_count("0.5s", 48000).unwrap(), 24000);
        assert_eq!(parse_frame_count("0", 48000).unwrap(), 0);
        assert!(matches!(
            parse_frame_count("abc", 48000),
            Err(ConfigError::FrameCount(_))
        ));
        assert!(matches!(
            parse_frame_count("-1s", 48000),
            Err(ConfigError::FrameCount(_))
        ));
        assert!(matches!(
            parse_frame_count("12x", 48000),
            Err(ConfigError::FrameCount(_))
        ));
        assert!(matches!(
            parse_frame_count("1000s", 48000),
            Err(ConfigError::TooManyFrames(48_000_000))
        ));
    }

    #[test]
    fn test_parse_frequencies() {
        assert_eq!(parse_frequencies("997", 1).unwrap(), vec![997.0]);
        assert_eq!(parse_frequencies("997", 2).unwrap(), vec![997.0, 997.0]);
        assert_eq!(parse_frequencies("250,1500.5", 2).unwrap(), vec![250.0, 1500.5]);
        assert_eq!(parse_frequencies("250,1500", 1).unwrap(), vec![250.0]);
        assert!(parse_frequencies("abc", 1).is_err());
        assert!(parse_frequencies("100,", 2).is_err());
    }

    #[test]
    fn test_device_spec_parse() {
        let spec = DeviceSpec::parse("hw:0,2").unwrap();
        assert_eq!(spec.name, "hw:0,2");
        assert_eq!((spec.card, spec.device), (Some(0), Some(2)));

        let spec = DeviceSpec::parse("plughw:3").unwrap();
        assert_eq!((spec.card, spec.device), (Some(3), None));

        let spec = DeviceSpec::parse("1,0").unwrap();
        assert_eq!((spec.card, spec.device), (Some(1), Some(0)));

        let spec = DeviceSpec::parse("  default ").unwrap();
        assert_eq!(spec.name, "default");
        assert_eq!((spec.card, spec.device), (None, None));

        let spec = DeviceSpec::parse("front:CARD=PCH,DEV=0").unwrap();
        assert_eq!((spec.card, spec.device), (None, None));

        assert!(DeviceSpec::parse("").is_err());
        assert!(DeviceSpec::parse("hw:").is_err());
        assert!(DeviceSpec::parse("hw:x,0").is_err());
        assert!(DeviceSpec::parse("hw:0,").is_err());
    }

    #[test]
    fn test_tolerance_band() {
        let tol = Tolerance::default();
        assert!((tol.band(1000.0) - 5.0).abs() < 1e-9);
        assert_eq!(tol.band(100.0), 1.0);
    }

    #[test]
    fn test_resolve_defaults() {
        let config = TestConfig::resolve(&RunOptions::default()).unwrap();
        assert_eq!(config.mode, RunMode::Loopback);
        assert_eq!(config.sample_rate, 44100);
        assert_eq!(config.channels, 1);
        assert_eq!(config.depth, SampleDepth::S16);
        assert_eq!(config.frames, 88200);
        assert_eq!(config.target_freqs, vec![997.0]);
        assert_eq!(config.playback_frames, Some(22050 + 88200 + 44100));
        assert_eq!(config.capture_file, default_capture_path());
        assert_eq!(config.settle, Duration::from_millis(500));
    }

    #[test]
    fn test_resolve_modes() {
        let opts = RunOptions {
            playback_device: Some("hw:0,0".into()),
            frames: Some("1000".into()),
            ..Default::default()
        };
        let config = TestConfig::resolve(&opts).unwrap();
        assert_eq!(config.mode, RunMode::PlaybackOnly);
        assert_eq!(config.playback_frames, Some(1000));

        let opts = RunOptions {
            capture_device: Some("hw:0,0".into()),
            ..Default::default()
        };
        assert_eq!(TestConfig::resolve(&opts).unwrap().mode, RunMode::CaptureOnly);

        let opts = RunOptions {
            playback_device: Some("hw:0,0".into()),
            capture_device: Some("hw:1,0".into()),
            ..Default::default()
        };
        let config = TestConfig::resolve(&opts).unwrap();
        assert_eq!(config.mode, RunMode::Loopback);
        assert_eq!(config.capture_device.unwrap().card, Some(1));

        let opts = RunOptions {
            device: Some("hw:2,0".into()),
            ..Default::default()
        };
        let config = TestConfig::resolve(&opts).unwrap();
        assert_eq!(config.mode, RunMode::Loopback);
        assert_eq!(config.playback_device, config.capture_device);
    }

    #[test]
    fn test_zero_frames_is_endless_playback() {
        let opts = RunOptions {
            frames: Some("0".into()),
            ..Default::default()
        };
        let config = TestConfig::resolve(&opts).unwrap();
        assert_eq!(config.mode, RunMode::PlaybackOnly);
        assert_eq!(config.playback_frames, None);

        let opts = RunOptions {
            frames: Some("0".into()),
            capture_device: Some("default".into()),
            ..Default::default()
        };
        assert!(matches!(
            TestConfig::resolve(&opts),
            Err(ConfigError::FrameCount(_))
        ));
    }

    #[test]
    fn test_resolve_validation() {
        let opts = RunOptions {
            channels: 3,
            ..Default::default()
        };
        assert!(matches!(TestConfig::resolve(&opts), Err(ConfigError::Channels(3))));

        let opts = RunOptions {
            sample_depth: 5,
            ..Default::default()
        };
        assert!(matches!(TestConfig::resolve(&opts), Err(ConfigError::Depth(_))));

        let opts = RunOptions {
            frequencies: Some("5".into()),
            ..Default::default()
        };
        assert!(matches!(
            TestConfig::resolve(&opts),
            Err(ConfigError::FrequencyRange { .. })
        ));

        let opts = RunOptions {
            sample_rate: 8000,
            frequencies: Some("3500".into()),
            ..Default::default()
        };
        assert!(matches!(
            TestConfig::resolve(&opts),
            Err(ConfigError::FrequencyRange { .. })
        ));

        let opts = RunOptions {
            sigma_k: 0.0,
            ..Default::default()
        };
        assert!(matches!(TestConfig::resolve(&opts), Err(ConfigError::Sigma(_))));

        let opts = RunOptions {
            local: true,
            ..Default::default()
        };
        assert!(matches!(
            TestConfig::resolve(&opts),
            Err(ConfigError::LocalWithoutInput)
        ));
    }

    #[test]
    fn test_input_file_overrides_format() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("input.wav");
        let format = WavFormat::pcm(2, 48000, SampleDepth::S32);
        let mut writer = WavWriter::create(&path, format, 0).unwrap();
        writer
            .write_frames(&PcmBuffer::new(1000, 2, SampleDepth::S32))
            .unwrap();
        writer.finalize().unwrap();

        let opts = RunOptions {
            input_file: Some(path.clone()),
            ..Default::default()
        };
        let config = TestConfig::resolve(&opts).unwrap();
        assert_eq!(config.channels, 2);
        assert_eq!(config.sample_rate, 48000);
        assert_eq!(config.depth, SampleDepth::S32);
        assert_eq!(config.frames, 500);
        assert_eq!(config.playback_frames, None);
        assert_eq!(config.mode, RunMode::Loopback);

        let opts = RunOptions {
            input_file: Some(path.clone()),
            local: true,
            ..Default::default()
        };
        let config = TestConfig::resolve(&opts).unwrap();
        assert_eq!(config.mode, RunMode::Local);
        assert_eq!(config.frames, 1000);
        assert_eq!(config.capture_file, path);
    }

    #[test]
    fn test_missing_input_file() {
        let opts = RunOptions {
            input_file: Some("/nonexistent/audiobat/input.wav".into()),
            ..Default::default()
        };
        assert!(matches!(
            TestConfig::resolve(&opts),
            Err(ConfigError::InputFile { .. })
        ));
    }

    #[test]
    fn test_options_json_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("options.json");
        let opts = RunOptions {
            frequencies: Some("250,500".into()),
            channels: 2,
            backend: BackendKind::Virtual,
            ..Default::default()
        };
        opts.save(&path).unwrap();
        assert_eq!(RunOptions::load(&path).unwrap(), opts);
    }

    #[test]
    fn test_options_partial_json_uses_defaults() {
        let opts: RunOptions = serde_json::from_str(r#"{"sample_rate": 48000}"#).unwrap();
        assert_eq!(opts.sample_rate, 48000);
        assert_eq!(opts.sample_depth, 2);
        assert_eq!(opts.sigma_k, 3.0);
        assert_eq!(opts.settle_ms, 500);
        assert_eq!(opts.tolerance, Tolerance::default());
    }

    #[test]
    fn test_backend_from_str() {
        assert_eq!("virtual".parse::<BackendKind>().unwrap(), BackendKind::Virtual);
        assert_eq!("CPAL".parse::<BackendKind>().unwrap(), BackendKind::Cpal);
        assert!("alsa".parse::<BackendKind>().is_err());
    }
}
