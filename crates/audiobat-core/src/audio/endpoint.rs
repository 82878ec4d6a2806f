//! Blocking PCM endpoint capability
//!
//! The streaming tasks only need a device that can be opened in one
//! direction, negotiated to a format, and then fed or drained one buffer at
//! a time. Backends implement [`PcmBackend`]; the handle they return
//! implements [`PcmEndpoint`] and releases the device when dropped.

use crate::audio::pcm::SampleDepth;
use crate::config::DeviceSpec;
use serde::Serialize;
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Longest single wait on an endpoint that is not ready
pub const MAX_WAIT: Duration = Duration::from_millis(500);

/// Largest accepted difference between requested and negotiated rate
pub const MAX_RATE_DRIFT: f64 = 0.05;

/// Errors that are fatal to the task using the endpoint
#[derive(Error, Debug)]
pub enum EndpointError {
    #[error("no {direction} device available")]
    NoDevice { direction: Direction },

    #[error("{direction} device not found: {name}")]
    DeviceNotFound { direction: Direction, name: String },

    #[error("failed to open {direction} device: {reason}")]
    Open { direction: Direction, reason: String },

    #[error("unsupported stream parameters: {0}")]
    Negotiate(String),

    #[error("sample rate drift too large: requested {requested} Hz, got {actual} Hz")]
    RateDrift { requested: u32, actual: u32 },

    #[error("endpoint used before negotiation")]
    NotNegotiated,

    #[error("device error: {0}")]
    Device(String),
}

/// Stream direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Playback,
    Capture,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Playback => f.write_str("playback"),
            Self::Capture => f.write_str("capture"),
        }
    }
}

/// Format requested from an endpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamParams {
    pub sample_rate: u32,
    pub channels: u16,
    pub depth: SampleDepth,
}

impl StreamParams {
    pub fn frame_size(&self) -> usize {
        self.channels as usize * self.depth.bytes()
    }
}

/// Format granted by an endpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Negotiated {
    /// Actual sample rate, may differ slightly from the request
    pub sample_rate: u32,
    /// Frames moved per read/write call
    pub period_frames: usize,
}

/// Outcome of one read or write call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transfer {
    /// This many frames were moved (possibly fewer than asked)
    Frames(usize),
    /// Not ready; wait and retry the same buffer
    WouldBlock,
    /// Underrun (playback) or overrun (capture); recover and retry
    Xrun,
}

/// An open PCM stream in one direction
///
/// Dropping the endpoint closes it.
pub trait PcmEndpoint {
    /// Apply `params`, returning the granted rate and period size
    fn negotiate(&mut self, params: &StreamParams) -> Result<Negotiated, EndpointError>;

    /// Queue up to `frames` interleaved frames from `data` for output
    fn write(&mut self, data: &[u8], frames: usize) -> Result<Transfer, EndpointError>;

    /// Fill up to `frames` interleaved frames of `data` from input
    fn read(&mut self, data: &mut [u8], frames: usize) -> Result<Transfer, EndpointError>;

    /// Block until the endpoint may be ready again, at most `timeout`
    fn wait(&mut self, timeout: Duration);

    /// Reset after an underrun or overrun
    fn recover(&mut self) -> Result<(), EndpointError>;

    /// Block until queued output has been played
    fn drain(&mut self) -> Result<(), EndpointError>;
}

/// A family of PCM endpoints
///
/// The backend itself is cheap to clone and is moved into each streaming
/// thread; endpoints are opened on the thread that uses them.
pub trait PcmBackend: Clone + Send + 'static {
    type Endpoint: PcmEndpoint;

    /// Short backend name for logs and reports
    fn name(&self) -> &'static str;

    /// Open `device` (or the default device) in `direction`
    fn open(
        &self,
        direction: Direction,
        device: Option<&DeviceSpec>,
    ) -> Result<Self::Endpoint, EndpointError>;
}

/// Reject a negotiated rate more than 5% away from the requested one
pub fn check_rate_drift(requested: u32, actual: u32) -> Result<(), EndpointError> {
    let drift = (actual as f64 - requested as f64).abs() / requested as f64;
    if drift > MAX_RATE_DRIFT {
        return Err(EndpointError::RateDrift { requested, actual });
    }
    Ok(())
}

/// Period size for a rate: roughly 1/40 s, as a quarter of a 100 ms buffer
pub fn default_period_frames(sample_rate: u32) -> usize {
    (sample_rate as usize / 40).max(64)
}
