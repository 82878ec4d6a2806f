//! Audiobat Core - signal generation, WAV codec, PCM streaming and spectral analysis
//!
//! This library drives a sine wave through an audio output, captures it back
//! from an audio input and decides, from the spectrum of the captured signal,
//! whether the target frequency survived the hardware path.
//!
//! The pieces, leaf first:
//! - [`audio::signal`] generates the test tone
//! - [`audio::wav`] reads and writes the RIFF/WAVE container
//! - [`audio::endpoint`] is the blocking PCM device capability, with a
//!   [`audio::virtual_loop`] software cable and a cpal hardware backend
//! - [`audio::stream`] runs the playback and capture tasks
//! - [`orchestrator`] sequences a whole run
//! - [`audio::analyzer`] turns captured frames into per-channel verdicts

pub mod audio;
pub mod config;
pub mod orchestrator;
pub mod report;

pub use audio::analyzer::{SpectralAnalyzer, Verdict};
pub use audio::signal::SineGenerator;
pub use config::{RunMode, RunOptions, TestConfig};
pub use orchestrator::Orchestrator;
pub use report::RunReport;

/// Library version from Cargo.toml
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Build date stamped by build.rs
pub const BUILD_DATE: &str = env!("BUILD_DATE");

/// Default sample rate in Hz
pub const DEFAULT_SAMPLE_RATE: u32 = 44100;

/// Default target frequency in Hz
pub const DEFAULT_TARGET_FREQ: f64 = 997.0;

/// Upper bound for the analysed frame count
pub const MAX_FRAMES: u64 = 10_000_000;

/// Maximum number of channels under test
pub const MAX_CHANNELS: u16 = 2;
