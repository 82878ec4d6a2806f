//! Audiobat - audio loopback hardware verification
//!
//! This library re-exports the core signal generation, container codec,
//! streaming and analysis from `audiobat-core`, plus the command-line
//! surface used by the `audiobat` binary.

pub mod cli;

pub use audiobat_core::audio;
pub use audiobat_core::config;
pub use audiobat_core::orchestrator;
pub use audiobat_core::report;

pub use audiobat_core::{
    Orchestrator, RunMode, RunOptions, RunReport, SineGenerator, SpectralAnalyzer, TestConfig,
    Verdict,
};
pub use audiobat_core::{
    DEFAULT_SAMPLE_RATE, DEFAULT_TARGET_FREQ, MAX_CHANNELS, MAX_FRAMES, BUILD_DATE, VERSION,
};
