//! FFT peak detection and per-channel verdicts
//!
//! A channel's samples are transformed, bins standing more than `sigma_k`
//! standard deviations above the mean magnitude are grouped into clusters,
//! and each cluster's peak frequency is checked against the channel target.
//!
//! The DC bin is left out of the statistics but is still tested against the
//! threshold, so a channel carrying nothing but an offset reads as DC only.

use crate::audio::pcm::PcmBuffer;
use crate::audio::wav::{ContainerError, FramePolicy, WavReader};
use crate::config::{TestConfig, Tolerance};
use rustfft::{num_complex::Complex, FftPlanner};
use serde::Serialize;
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// Clusters tracked per channel; further peaks are ignored
pub const MAX_CLUSTERS: usize = 10;

/// Bins weaker than this fraction of the strongest component are FFT
/// rounding residue, never a peak
pub const NOISE_FLOOR: f64 = 1e-9;

#[derive(Error, Debug)]
pub enum AnalysisError {
    #[error("cannot read capture {path}: {source}")]
    Capture {
        path: PathBuf,
        #[source]
        source: ContainerError,
    },

    #[error("capture holds {available} frames, {required} required")]
    ShortCapture { available: u64, required: u64 },

    #[error("capture has {found} channels, run expects {expected}")]
    ChannelMismatch { expected: u16, found: u16 },

    #[error("no frames to analyse")]
    Empty,
}

/// Where a cluster's peak lies relative to the target
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PeakClass {
    /// Below the DC guard frequency
    NearDc,
    /// Below the acceptance band
    TooLow,
    /// Above the acceptance band
    TooHigh,
    OnTarget,
}

/// A contiguous run of bins above the detection threshold
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PeakCluster {
    pub start_bin: usize,
    pub end_bin: usize,
    /// Strongest bin of the run
    pub peak_bin: usize,
    pub peak_hz: f64,
    pub peak_magnitude: f64,
    /// Peak magnitude in dB relative to the spectral mean
    pub peak_db: f64,
    /// Summed cluster magnitude in dB relative to the spectral mean
    pub total_db: f64,
    pub class: PeakClass,
}

/// Outcome for one channel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Verdict {
    Pass,
    WrongFrequency,
    DcOnly,
    NoPeak,
}

impl Verdict {
    pub fn passed(self) -> bool {
        self == Self::Pass
    }
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Pass => "PASS",
            Self::WrongFrequency => "WRONG_FREQUENCY",
            Self::DcOnly => "DC_ONLY",
            Self::NoPeak => "NO_PEAK",
        })
    }
}

/// Analysis of one channel
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChannelVerdict {
    pub channel: u16,
    pub target_hz: f64,
    pub verdict: Verdict,
    /// Frequency of the strongest cluster
    pub peak_hz: Option<f64>,
    pub peak_db: Option<f64>,
    pub total_db: Option<f64>,
    pub clusters: Vec<PeakCluster>,
}

/// Spectral peak detector
pub struct SpectralAnalyzer {
    sample_rate: u32,
    sigma_k: f64,
    tolerance: Tolerance,
    planner: FftPlanner<f64>,
}

impl SpectralAnalyzer {
    pub fn new(sample_rate: u32, sigma_k: f64, tolerance: Tolerance) -> Self {
        Self {
            sample_rate,
            sigma_k,
            tolerance,
            planner: FftPlanner::new(),
        }
    }

    pub fn from_config(config: &TestConfig) -> Self {
        Self::new(config.sample_rate, config.sigma_k, config.tolerance)
    }

    /// Magnitude of each positive-frequency bin, DC forced to zero
    pub fn magnitudes(&mut self, samples: &[f64]) -> Vec<f64> {
        self.spectrum(samples).1
    }

    /// DC magnitude and the DC-zeroed positive-frequency magnitudes
    fn spectrum(&mut self, samples: &[f64]) -> (f64, Vec<f64>) {
        let n = samples.len();
        if n == 0 {
            return (0.0, Vec::new());
        }

        let fft = self.planner.plan_fft_forward(n);
        let mut spectrum: Vec<Complex<f64>> =
            samples.iter().map(|&s| Complex::new(s, 0.0)).collect();
        fft.process(&mut spectrum);

        let mut mags: Vec<f64> = spectrum[..n / 2].iter().map(|c| c.norm()).collect();
        let dc = spectrum[0].norm();
        if let Some(first) = mags.first_mut() {
            *first = 0.0;
        }
        (dc, mags)
    }

    fn classify(&self, hz: f64, target_hz: f64) -> PeakClass {
        let band = self.tolerance.band(target_hz);
        if hz < self.tolerance.dc_guard_hz {
            PeakClass::NearDc
        } else if hz < target_hz - band {
            PeakClass::TooLow
        } else if hz > target_hz + band {
            PeakClass::TooHigh
        } else {
            PeakClass::OnTarget
        }
    }

    /// Group above-threshold bins of `mags` (from `frames` samples) into clusters
    ///
    /// `mags` has its DC bin zeroed and `dc` is the DC magnitude it had. The
    /// statistics run over `mags`; bin 0 is then judged by `dc`.
    pub fn find_clusters(&self, mags: &[f64], dc: f64, frames: usize, target_hz: f64) -> Vec<PeakCluster> {
        if mags.is_empty() || frames == 0 {
            return Vec::new();
        }

        let count = mags.len() as f64;
        let mean = mags.iter().sum::<f64>() / count;
        let variance = mags.iter().map(|m| (m - mean).powi(2)).sum::<f64>() / count;
        let strongest = mags.iter().copied().fold(dc.abs(), f64::max);
        let floor = NOISE_FLOOR * strongest;
        let threshold = (mean + self.sigma_k * variance.sqrt()).max(floor);
        // dB reference; an offset alone leaves a zero mean
        let reference = mean.max(floor);
        let bin_hz = self.sample_rate as f64 / frames as f64;
        let magnitude = |bin: usize| if bin == 0 { dc.abs() } else { mags[bin] };

        let close = |start: usize, end: usize, peak: usize, sum: f64| {
            let peak_hz = peak as f64 * bin_hz;
            PeakCluster {
                start_bin: start,
                end_bin: end,
                peak_bin: peak,
                peak_hz,
                peak_magnitude: magnitude(peak),
                peak_db: 10.0 * (magnitude(peak) / reference).log10(),
                total_db: 10.0 * (sum / reference).log10(),
                class: self.classify(peak_hz, target_hz),
            }
        };

        let mut clusters = Vec::new();
        // (start, peak, sum) of the run being walked
        let mut open: Option<(usize, usize, f64)> = None;

        for bin in 0..mags.len() {
            let mag = magnitude(bin);
            if mag > threshold {
                open = Some(match open {
                    None => (bin, bin, mag),
                    Some((start, peak, sum)) => {
                        let peak = if mag > magnitude(peak) { bin } else { peak };
                        (start, peak, sum + mag)
                    }
                });
            } else if let Some((start, peak, sum)) = open.take() {
                clusters.push(close(start, bin - 1, peak, sum));
                if clusters.len() == MAX_CLUSTERS {
                    return clusters;
                }
            }
        }
        if let Some((start, peak, sum)) = open {
            clusters.push(close(start, mags.len() - 1, peak, sum));
        }
        clusters
    }

    /// Verdict for one channel of samples
    pub fn analyze_channel(&mut self, channel: u16, samples: &[f64], target_hz: f64) -> ChannelVerdict {
        let (dc, mags) = self.spectrum(samples);
        let clusters = self.find_clusters(&mags, dc, samples.len(), target_hz);
        let verdict = aggregate(&clusters);
        let strongest = clusters
            .iter()
            .max_by(|a, b| a.peak_magnitude.total_cmp(&b.peak_magnitude));

        ChannelVerdict {
            channel,
            target_hz,
            verdict,
            peak_hz: strongest.map(|c| c.peak_hz),
            peak_db: strongest.map(|c| c.peak_db),
            total_db: strongest.map(|c| c.total_db),
            clusters,
        }
    }

    /// Verdict for every channel of an interleaved buffer
    ///
    /// Channels without a matching entry in `targets` reuse the last one.
    pub fn analyze(&mut self, buf: &PcmBuffer, targets: &[f64]) -> Vec<ChannelVerdict> {
        buf.deinterleave()
            .iter()
            .enumerate()
            .map(|(ch, mono)| {
                let target = targets
                    .get(ch)
                    .or(targets.last())
                    .copied()
                    .unwrap_or(crate::DEFAULT_TARGET_FREQ);
                self.analyze_channel(ch as u16, &mono.channel_samples(0), target)
            })
            .collect()
    }
}

/// Channel outcome from its clusters
pub fn aggregate(clusters: &[PeakCluster]) -> Verdict {
    match clusters {
        [] => Verdict::NoPeak,
        [only] if only.class == PeakClass::NearDc => Verdict::DcOnly,
        _ if clusters
            .iter()
            .any(|c| matches!(c.class, PeakClass::TooLow | PeakClass::TooHigh)) =>
        {
            Verdict::WrongFrequency
        }
        _ => Verdict::Pass,
    }
}

/// Read the configured capture and analyse its first `frames` frames
pub fn analyze_capture(config: &TestConfig) -> Result<Vec<ChannelVerdict>, AnalysisError> {
    let path = &config.capture_file;
    let wrap = |source| AnalysisError::Capture {
        path: path.clone(),
        source,
    };

    let mut reader = WavReader::open(path, FramePolicy::KeepAll).map_err(wrap)?;
    let info = *reader.info();
    if info.format.channels != config.channels {
        return Err(AnalysisError::ChannelMismatch {
            expected: config.channels,
            found: info.format.channels,
        });
    }
    if config.frames == 0 {
        return Err(AnalysisError::Empty);
    }
    if info.frames < config.frames {
        return Err(AnalysisError::ShortCapture {
            available: info.frames,
            required: config.frames,
        });
    }

    let buf = reader.read_exact_frames(config.frames as usize).map_err(wrap)?;
    tracing::info!(
        frames = buf.frames(),
        channels = buf.channels(),
        path = %path.display(),
        "Analysing capture"
    );

    let mut analyzer = SpectralAnalyzer::from_config(config);
    Ok(analyzer.analyze(&buf, &config.target_freqs))
}
