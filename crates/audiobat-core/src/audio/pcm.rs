//! Interleaved integer PCM buffers
//!
//! A frame holds one sample per channel; samples are signed little-endian
//! integers of 1, 2, 3 or 4 bytes. 24-bit samples are packed as three raw
//! bytes since there is no native 3-byte integer.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors raised when building PCM buffers
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PcmError {
    #[error("unsupported sample depth: {0} bytes")]
    UnsupportedDepth(u8),

    #[error("buffer of {len} bytes is not a whole number of {frame_size}-byte frames")]
    PartialFrame { len: usize, frame_size: usize },

    #[error("cannot interleave buffers of different shapes")]
    ShapeMismatch,
}

/// Sample encoding: signed integer PCM of a fixed byte width
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum SampleDepth {
    /// 8-bit signed
    S8,
    /// 16-bit signed little-endian
    S16,
    /// 24-bit signed little-endian, packed in 3 bytes
    S24,
    /// 32-bit signed little-endian
    S32,
}

impl SampleDepth {
    /// Depth from a byte width (1..=4)
    pub fn from_bytes(bytes: u8) -> Result<Self, PcmError> {
        match bytes {
            1 => Ok(Self::S8),
            2 => Ok(Self::S16),
            3 => Ok(Self::S24),
            4 => Ok(Self::S32),
            other => Err(PcmError::UnsupportedDepth(other)),
        }
    }

    /// Depth from a bits-per-sample field
    pub fn from_bits(bits: u16) -> Result<Self, PcmError> {
        if bits % 8 != 0 || bits > 32 {
            return Err(PcmError::UnsupportedDepth((bits / 8) as u8));
        }
        Self::from_bytes((bits / 8) as u8)
    }

    /// Bytes per sample
    pub fn bytes(self) -> usize {
        match self {
            Self::S8 => 1,
            Self::S16 => 2,
            Self::S24 => 3,
            Self::S32 => 4,
        }
    }

    /// Bits per sample
    pub fn bits(self) -> u16 {
        self.bytes() as u16 * 8
    }

    /// Largest representable sample value
    pub fn max_value(self) -> i32 {
        match self {
            Self::S8 => i8::MAX as i32,
            Self::S16 => i16::MAX as i32,
            Self::S24 => (1 << 23) - 1,
            Self::S32 => i32::MAX,
        }
    }

    /// Peak amplitude used for generated tones
    ///
    /// Kept a few units below [`max_value`](Self::max_value) so that rounding
    /// the float sine can never wrap to the opposite sign.
    pub fn max_amplitude(self) -> f64 {
        let margin = match self {
            Self::S8 => 1,
            Self::S16 => 10,
            Self::S24 => 10,
            Self::S32 => 100,
        };
        (self.max_value() - margin) as f64
    }

    /// Magnitude of full scale, used to map samples to [-1.0, 1.0)
    pub fn full_scale(self) -> f64 {
        self.max_value() as f64 + 1.0
    }

    /// Write `value` into `out` (exactly [`bytes`](Self::bytes) long)
    pub fn encode(self, value: i32, out: &mut [u8]) {
        let value = value.clamp(-self.max_value() - 1, self.max_value());
        let le = value.to_le_bytes();
        out[..self.bytes()].copy_from_slice(&le[..self.bytes()]);
    }

    /// Read one sample from `bytes` (at least [`bytes`](Self::bytes) long)
    pub fn decode(self, bytes: &[u8]) -> i32 {
        match self {
            Self::S8 => bytes[0] as i8 as i32,
            Self::S16 => i16::from_le_bytes([bytes[0], bytes[1]]) as i32,
            Self::S24 => {
                let sign = if bytes[2] & 0x80 != 0 { 0xff } else { 0x00 };
                i32::from_le_bytes([bytes[0], bytes[1], bytes[2], sign])
            }
            Self::S32 => i32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]),
        }
    }
}

impl TryFrom<u8> for SampleDepth {
    type Error = PcmError;

    fn try_from(bytes: u8) -> Result<Self, Self::Error> {
        Self::from_bytes(bytes)
    }
}

impl From<SampleDepth> for u8 {
    fn from(depth: SampleDepth) -> Self {
        depth.bytes() as u8
    }
}

/// A contiguous run of interleaved PCM frames
///
/// The byte length is always `frames * frame_size`, and the frame size is
/// always `channels * depth.bytes()`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PcmBuffer {
    data: Vec<u8>,
    channels: u16,
    depth: SampleDepth,
}

impl PcmBuffer {
    /// Zero-filled buffer of `frames` frames
    pub fn new(frames: usize, channels: u16, depth: SampleDepth) -> Self {
        Self {
            data: vec![0; frames * channels as usize * depth.bytes()],
            channels,
            depth,
        }
    }

    /// Wrap raw interleaved bytes
    pub fn from_bytes(data: Vec<u8>, channels: u16, depth: SampleDepth) -> Result<Self, PcmError> {
        let frame_size = channels as usize * depth.bytes();
        if frame_size == 0 || data.len() % frame_size != 0 {
            return Err(PcmError::PartialFrame {
                len: data.len(),
                frame_size,
            });
        }
        Ok(Self {
            data,
            channels,
            depth,
        })
    }

    pub fn frames(&self) -> usize {
        self.data.len() / self.frame_size()
    }

    pub fn frame_size(&self) -> usize {
        self.channels as usize * self.depth.bytes()
    }

    pub fn channels(&self) -> u16 {
        self.channels
    }

    pub fn depth(&self) -> SampleDepth {
        self.depth
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn as_bytes_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.data
    }

    /// Resize to `frames` frames, zero-filling any new frames
    pub fn resize(&mut self, frames: usize) {
        let len = frames * self.frame_size();
        self.data.resize(len, 0);
    }

    /// Bytes of the first `frames` frames
    pub fn frames_bytes(&self, frames: usize) -> &[u8] {
        &self.data[..frames.min(self.frames()) * self.frame_size()]
    }

    /// Sample value at (`frame`, `channel`)
    pub fn sample(&self, frame: usize, channel: u16) -> i32 {
        let offset = self.offset(frame, channel);
        self.depth.decode(&self.data[offset..offset + self.depth.bytes()])
    }

    /// Store a sample value at (`frame`, `channel`)
    pub fn set_sample(&mut self, frame: usize, channel: u16, value: i32) {
        let offset = self.offset(frame, channel);
        let width = self.depth.bytes();
        self.depth.encode(value, &mut self.data[offset..offset + width]);
    }

    /// One channel as floating-point sample values
    pub fn channel_samples(&self, channel: u16) -> Vec<f64> {
        (0..self.frames())
            .map(|frame| self.sample(frame, channel) as f64)
            .collect()
    }

    /// Split into one mono buffer per channel
    ///
    /// For channel `c`, frame `j` and sample byte `i` the source offset is
    /// `j * frame_size + c * sample_size + i`; order within a channel is kept.
    pub fn deinterleave(&self) -> Vec<PcmBuffer> {
        let width = self.depth.bytes();
        let frame_size = self.frame_size();
        (0..self.channels as usize)
            .map(|c| {
                let mut data = Vec::with_capacity(self.frames() * width);
                for frame in self.data.chunks_exact(frame_size) {
                    data.extend_from_slice(&frame[c * width..(c + 1) * width]);
                }
                PcmBuffer {
                    data,
                    channels: 1,
                    depth: self.depth,
                }
            })
            .collect()
    }

    /// Merge mono buffers of equal length and depth into one interleaved buffer
    pub fn interleave(channels: &[PcmBuffer]) -> Result<PcmBuffer, PcmError> {
        let first = channels.first().ok_or(PcmError::ShapeMismatch)?;
        let depth = first.depth;
        let frames = first.frames();
        if channels
            .iter()
            .any(|c| c.channels != 1 || c.depth != depth || c.frames() != frames)
        {
            return Err(PcmError::ShapeMismatch);
        }

        let width = depth.bytes();
        let mut data = Vec::with_capacity(frames * width * channels.len());
        for frame in 0..frames {
            for channel in channels {
                data.extend_from_slice(&channel.data[frame * width..(frame + 1) * width]);
            }
        }
        Ok(PcmBuffer {
            data,
            channels: channels.len() as u16,
            depth,
        })
    }

    fn offset(&self, frame: usize, channel: u16) -> usize {
        frame * self.frame_size() + channel as usize * self.depth.bytes()
    }
}
