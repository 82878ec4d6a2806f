//! RIFF/WAVE container codec
//!
//! ## File Format
//!
//! Little-endian throughout:
//! - file header (12 bytes): `"RIFF"`, total length minus 8, `"WAVE"`
//! - format chunk (24 bytes): `"fmt "`, 16, format code (1 = PCM), channels,
//!   sample rate, byte rate, block alignment, bits per sample
//! - data chunk header (8 bytes): `"data"`, byte length, then raw interleaved PCM
//!
//! Readers accept extended format chunks and skip unknown chunks by their
//! declared length. Writers reserve the header up front and patch the two
//! length fields once the real amount of data is known.

use crate::audio::pcm::{PcmBuffer, SampleDepth};
use crate::config::TestConfig;
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use serde::Serialize;
use std::fs::File;
use std::io::{self, BufReader, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::Path;
use thiserror::Error;

pub const RIFF_MAGIC: [u8; 4] = *b"RIFF";
pub const WAVE_TAG: [u8; 4] = *b"WAVE";
pub const FMT_TAG: [u8; 4] = *b"fmt ";
pub const DATA_TAG: [u8; 4] = *b"data";

/// Linear PCM format code
pub const FORMAT_PCM: u16 = 1;

/// Size of the RIFF file header
pub const FILE_HEADER_SIZE: u32 = 12;
/// Size of the format chunk including its 8-byte chunk header
pub const FORMAT_CHUNK_SIZE: u32 = 24;
/// Size of the data chunk header
pub const DATA_HEADER_SIZE: u32 = 8;
/// Total header bytes written before the first sample
pub const HEADER_SIZE: u32 = FILE_HEADER_SIZE + FORMAT_CHUNK_SIZE + DATA_HEADER_SIZE;

/// Fixed size of the format record that follows the chunk header
const FORMAT_RECORD_SIZE: u32 = 16;

/// Byte offset of the RIFF length field
const RIFF_LENGTH_OFFSET: u64 = 4;
/// Byte offset of the data length field in files we write
const DATA_LENGTH_OFFSET: u64 = (HEADER_SIZE - 4) as u64;

/// Errors raised while reading or writing containers
#[derive(Error, Debug)]
pub enum ContainerError {
    #[error("malformed container: {0}")]
    Malformed(String),

    #[error("truncated container: {0}")]
    Truncated(#[source] io::Error),

    #[error("unsupported container format: {0}")]
    Unsupported(String),

    #[error("format mismatch: expected {expected}, found {found}")]
    FormatMismatch { expected: String, found: String },

    #[error("container I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Contents of the format chunk
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct WavFormat {
    pub format_code: u16,
    pub channels: u16,
    pub sample_rate: u32,
    pub byte_rate: u32,
    pub block_align: u16,
    pub bits_per_sample: u16,
}

impl WavFormat {
    /// Internally consistent linear PCM format
    pub fn pcm(channels: u16, sample_rate: u32, depth: SampleDepth) -> Self {
        let block_align = channels * depth.bytes() as u16;
        Self {
            format_code: FORMAT_PCM,
            channels,
            sample_rate,
            byte_rate: block_align as u32 * sample_rate,
            block_align,
            bits_per_sample: depth.bits(),
        }
    }

    /// Format of the container a test configuration captures into
    pub fn from_config(config: &TestConfig) -> Self {
        Self::pcm(config.channels, config.sample_rate, config.depth)
    }

    /// Sample encoding declared by `bits_per_sample`
    pub fn depth(&self) -> Result<SampleDepth, ContainerError> {
        SampleDepth::from_bits(self.bits_per_sample).map_err(|_| {
            ContainerError::Unsupported(format!("{} bits per sample", self.bits_per_sample))
        })
    }

    /// Bytes per frame
    pub fn frame_size(&self) -> usize {
        self.block_align as usize
    }

    fn validate(&self) -> Result<SampleDepth, ContainerError> {
        if self.format_code != FORMAT_PCM {
            return Err(ContainerError::Unsupported(format!(
                "format code {}",
                self.format_code
            )));
        }
        let depth = self.depth()?;
        if self.channels == 0 {
            return Err(ContainerError::Malformed("zero channels".into()));
        }
        if self.block_align as usize != self.channels as usize * depth.bytes() {
            return Err(ContainerError::Malformed(format!(
                "block alignment {} does not match {} channels of {} bits",
                self.block_align, self.channels, self.bits_per_sample
            )));
        }
        Ok(depth)
    }

    fn describe(&self) -> String {
        format!(
            "{} ch, {} Hz, {} bit",
            self.channels, self.sample_rate, self.bits_per_sample
        )
    }

    fn read_from<R: Read>(r: &mut R) -> io::Result<Self> {
        Ok(Self {
            format_code: r.read_u16::<LittleEndian>()?,
            channels: r.read_u16::<LittleEndian>()?,
            sample_rate: r.read_u32::<LittleEndian>()?,
            byte_rate: r.read_u32::<LittleEndian>()?,
            block_align: r.read_u16::<LittleEndian>()?,
            bits_per_sample: r.read_u16::<LittleEndian>()?,
        })
    }

    fn write_to<W: Write>(&self, w: &mut W) -> io::Result<()> {
        w.write_u16::<LittleEndian>(self.format_code)?;
        w.write_u16::<LittleEndian>(self.channels)?;
        w.write_u32::<LittleEndian>(self.sample_rate)?;
        w.write_u32::<LittleEndian>(self.byte_rate)?;
        w.write_u16::<LittleEndian>(self.block_align)?;
        w.write_u16::<LittleEndian>(self.bits_per_sample)
    }
}

/// The three fixed records at the start of a file we write
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContainerDescriptor {
    /// RIFF length: everything after the first two header fields
    pub riff_length: u32,
    pub format: WavFormat,
    /// Data chunk length in bytes
    pub data_length: u32,
}

impl ContainerDescriptor {
    /// Descriptor for `frames` frames of `format`
    pub fn new(format: WavFormat, frames: u64) -> Self {
        let data_length = (frames * format.block_align as u64).min(u32::MAX as u64) as u32;
        Self {
            riff_length: data_length.saturating_add(HEADER_SIZE - 8),
            format,
            data_length,
        }
    }

    /// Descriptor for the capture container of a run
    pub fn for_config(config: &TestConfig) -> Self {
        Self::new(WavFormat::from_config(config), config.frames)
    }

    /// Whole frames declared by the data chunk
    pub fn frames(&self) -> u64 {
        self.data_length as u64 / self.format.block_align.max(1) as u64
    }

    /// Serialize the 44 header bytes
    pub fn write_to<W: Write>(&self, w: &mut W) -> io::Result<()> {
        w.write_all(&RIFF_MAGIC)?;
        w.write_u32::<LittleEndian>(self.riff_length)?;
        w.write_all(&WAVE_TAG)?;

        w.write_all(&FMT_TAG)?;
        w.write_u32::<LittleEndian>(FORMAT_RECORD_SIZE)?;
        self.format.write_to(w)?;

        w.write_all(&DATA_TAG)?;
        w.write_u32::<LittleEndian>(self.data_length)
    }
}

/// How the analysed frame count is derived from the data chunk
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FramePolicy {
    /// Analyse every frame of the file (direct/local analysis)
    KeepAll,
    /// Analyse half the frames (the file is longer than the capture target)
    Halve,
}

/// Result of parsing a container header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContainerInfo {
    pub format: WavFormat,
    pub depth: SampleDepth,
    /// Data chunk length in bytes as declared
    pub data_length: u32,
    /// Frame count after applying the [`FramePolicy`]
    pub frames: u64,
}

impl ContainerInfo {
    /// Whole frames in the data chunk, regardless of policy
    pub fn data_frames(&self) -> u64 {
        self.data_length as u64 / self.format.block_align as u64
    }
}

fn truncated(e: io::Error) -> ContainerError {
    ContainerError::Truncated(e)
}

/// Parse the header of a container, leaving `r` at the first sample
pub fn read_header<R: Read + Seek>(
    r: &mut R,
    policy: FramePolicy,
) -> Result<ContainerInfo, ContainerError> {
    let mut magic = [0u8; 4];
    let mut tag = [0u8; 4];
    r.read_exact(&mut magic).map_err(truncated)?;
    let _riff_length = r.read_u32::<LittleEndian>().map_err(truncated)?;
    r.read_exact(&mut tag).map_err(truncated)?;
    if magic != RIFF_MAGIC || tag != WAVE_TAG {
        return Err(ContainerError::Malformed("not a RIFF/WAVE file".into()));
    }

    let mut format: Option<(WavFormat, SampleDepth)> = None;
    loop {
        let mut chunk = [0u8; 4];
        r.read_exact(&mut chunk).map_err(truncated)?;
        let length = r.read_u32::<LittleEndian>().map_err(truncated)?;

        match chunk {
            FMT_TAG => {
                if length < FORMAT_RECORD_SIZE {
                    return Err(ContainerError::Malformed(format!(
                        "format chunk of {} bytes",
                        length
                    )));
                }
                let fmt = WavFormat::read_from(r).map_err(truncated)?;
                if length > FORMAT_RECORD_SIZE {
                    r.seek(SeekFrom::Current((length - FORMAT_RECORD_SIZE) as i64))
                        .map_err(truncated)?;
                }
                let depth = fmt.validate()?;
                format = Some((fmt, depth));
            }
            DATA_TAG => {
                let (format, depth) = format.ok_or_else(|| {
                    ContainerError::Malformed("data chunk before format chunk".into())
                })?;
                let mut frames = length as u64 / format.block_align as u64;
                if policy == FramePolicy::Halve {
                    frames /= 2;
                }
                return Ok(ContainerInfo {
                    format,
                    depth,
                    data_length: length,
                    frames,
                });
            }
            other => {
                tracing::debug!(
                    chunk = %String::from_utf8_lossy(&other),
                    length,
                    "Skipping unknown chunk"
                );
                r.seek(SeekFrom::Current(length as i64)).map_err(truncated)?;
            }
        }
    }
}

/// Streaming reader over the data chunk of a container
#[derive(Debug)]
pub struct WavReader<R> {
    inner: R,
    info: ContainerInfo,
    /// Data bytes not yet returned
    remaining: u64,
}

impl WavReader<BufReader<File>> {
    /// Open a container file
    pub fn open(path: &Path, policy: FramePolicy) -> Result<Self, ContainerError> {
        let file = File::open(path)?;
        Self::new(BufReader::new(file), policy)
    }
}

impl<R: Read + Seek> WavReader<R> {
    /// Parse the header of `inner` and position at the first sample
    pub fn new(mut inner: R, policy: FramePolicy) -> Result<Self, ContainerError> {
        let info = read_header(&mut inner, policy)?;
        Ok(Self {
            inner,
            remaining: info.data_length as u64,
            info,
        })
    }
}

impl<R: Read> WavReader<R> {
    pub fn info(&self) -> &ContainerInfo {
        &self.info
    }

    /// Read up to `buf.frames()` frames into `buf`
    ///
    /// Returns the number of whole frames read; zero means the data chunk
    /// (or the file) is exhausted. A trailing partial frame is dropped.
    pub fn read_frames(&mut self, buf: &mut PcmBuffer) -> Result<usize, ContainerError> {
        if buf.channels() != self.info.format.channels || buf.depth() != self.info.depth {
            return Err(ContainerError::FormatMismatch {
                expected: self.info.format.describe(),
                found: format!("{} ch, {} bit", buf.channels(), buf.depth().bits()),
            });
        }

        let frame_size = buf.frame_size();
        let wanted = (buf.as_bytes().len() as u64).min(self.remaining) as usize;
        let wanted = wanted - wanted % frame_size;
        let dest = &mut buf.as_bytes_mut()[..wanted];

        let mut filled = 0;
        while filled < wanted {
            match self.inner.read(&mut dest[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(ContainerError::Io(e)),
            }
        }

        if filled < wanted {
            // Short file: nothing more will come
            self.remaining = 0;
        } else {
            self.remaining -= filled as u64;
        }
        Ok(filled / frame_size)
    }

    /// Read exactly `frames` frames, failing if the container holds fewer
    pub fn read_exact_frames(&mut self, frames: usize) -> Result<PcmBuffer, ContainerError> {
        let mut buf = PcmBuffer::new(frames, self.info.format.channels, self.info.depth);
        let got = self.read_frames(&mut buf)?;
        if got < frames {
            return Err(ContainerError::Truncated(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!("expected {} frames, found {}", frames, got),
            )));
        }
        Ok(buf)
    }
}

/// Streaming writer that patches the header lengths on completion
///
/// The header is written immediately with the declared frame count. When
/// the writer is finished (explicitly or by being dropped) the RIFF and data
/// lengths are rewritten to match the frames actually written.
pub struct WavWriter<W: Write + Seek> {
    inner: Option<W>,
    format: WavFormat,
    depth: SampleDepth,
    bytes_written: u64,
}

impl WavWriter<BufWriter<File>> {
    /// Create (or truncate) a container file
    pub fn create(
        path: &Path,
        format: WavFormat,
        declared_frames: u64,
    ) -> Result<Self, ContainerError> {
        let file = File::create(path)?;
        Self::new(BufWriter::new(file), format, declared_frames)
    }
}

impl<W: Write + Seek> WavWriter<W> {
    /// Write the header for `declared_frames` frames of `format`
    pub fn new(mut inner: W, format: WavFormat, declared_frames: u64) -> Result<Self, ContainerError> {
        let depth = format.validate()?;
        ContainerDescriptor::new(format, declared_frames).write_to(&mut inner)?;
        Ok(Self {
            inner: Some(inner),
            format,
            depth,
            bytes_written: 0,
        })
    }

    pub fn format(&self) -> &WavFormat {
        &self.format
    }

    /// Frames written so far
    pub fn frames_written(&self) -> u64 {
        self.bytes_written / self.format.block_align as u64
    }

    /// Append every frame of `buf`
    pub fn write_frames(&mut self, buf: &PcmBuffer) -> Result<(), ContainerError> {
        self.write_first_frames(buf, buf.frames())
    }

    /// Append the first `frames` frames of `buf`
    pub fn write_first_frames(&mut self, buf: &PcmBuffer, frames: usize) -> Result<(), ContainerError> {
        if buf.channels() != self.format.channels || buf.depth() != self.depth {
            return Err(ContainerError::FormatMismatch {
                expected: self.format.describe(),
                found: format!("{} ch, {} bit", buf.channels(), buf.depth().bits()),
            });
        }
        let bytes = buf.frames_bytes(frames);
        if let Some(w) = self.inner.as_mut() {
            w.write_all(bytes)?;
            self.bytes_written += bytes.len() as u64;
        }
        Ok(())
    }

    /// Patch the header lengths, flush, and hand back the sink
    pub fn finish(mut self) -> Result<W, ContainerError> {
        let mut inner = self
            .inner
            .take()
            .ok_or_else(|| ContainerError::Malformed("writer already finished".into()))?;
        patch_lengths(&mut inner, self.bytes_written)?;
        Ok(inner)
    }

    /// Patch the header lengths and flush, returning the frames written
    pub fn finalize(self) -> Result<u64, ContainerError> {
        let frames = self.frames_written();
        self.finish()?;
        Ok(frames)
    }
}

impl<W: Write + Seek> Drop for WavWriter<W> {
    fn drop(&mut self) {
        if let Some(mut inner) = self.inner.take() {
            if let Err(e) = patch_lengths(&mut inner, self.bytes_written) {
                tracing::error!(error = %e, "Failed to patch container header on drop");
            }
        }
    }
}

fn patch_lengths<W: Write + Seek>(w: &mut W, data_bytes: u64) -> io::Result<()> {
    let data_length = data_bytes.min((u32::MAX - HEADER_SIZE) as u64) as u32;
    let end = w.stream_position()?;

    w.seek(SeekFrom::Start(RIFF_LENGTH_OFFSET))?;
    w.write_u32::<LittleEndian>(data_length + HEADER_SIZE - 8)?;
    w.seek(SeekFrom::Start(DATA_LENGTH_OFFSET))?;
    w.write_u32::<LittleEndian>(data_length)?;

    w.seek(SeekFrom::Start(end))?;
    w.flush()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn header_bytes(format: WavFormat, frames: u64) -> Vec<u8> {
        let mut out = Vec::new();
        ContainerDescriptor::new(format, frames)
            .write_to(&mut out)
            .unwrap();
        out
    }

    #[test]
    fn test_descriptor_fields() {
        let format = WavFormat::pcm(2, 44100, SampleDepth::S16);
        assert_eq!(format.block_align, 4);
        assert_eq!(format.byte_rate, 176400);
        assert_eq!(format.bits_per_sample, 16);

        let desc = ContainerDescriptor::new(format, 1000);
        assert_eq!(desc.data_length, 4000);
        assert_eq!(desc.riff_length, 4000 + 36);
        assert_eq!(desc.frames(), 1000);
    }

    #[test]
    fn test_header_layout() {
        let bytes = header_bytes(WavFormat::pcm(1, 8000, SampleDepth::S24), 10);
        assert_eq!(bytes.len(), HEADER_SIZE as usize);
        assert_eq!(&bytes[0..4], b"RIFF");
        assert_eq!(u32::from_le_bytes(bytes[4..8].try_into().unwrap()), 30 + 36);
        assert_eq!(&bytes[8..12], b"WAVE");
        assert_eq!(&bytes[12..16], b"fmt ");
        assert_eq!(u32::from_le_bytes(bytes[16..20].try_into().unwrap()), 16);
        assert_eq!(u16::from_le_bytes(bytes[20..22].try_into().unwrap()), 1);
        assert_eq!(u16::from_le_bytes(bytes[34..36].try_into().unwrap()), 24);
        assert_eq!(&bytes[36..40], b"data");
        assert_eq!(u32::from_le_bytes(bytes[40..44].try_into().unwrap()), 30);
    }

    #[test]
    fn test_read_header_policies() {
        let bytes = header_bytes(WavFormat::pcm(2, 48000, SampleDepth::S32), 101);

        let info = read_header(&mut Cursor::new(&bytes), FramePolicy::KeepAll).unwrap();
        assert_eq!(info.frames, 101);
        assert_eq!(info.depth, SampleDepth::S32);
        assert_eq!(info.format.channels, 2);

        let info = read_header(&mut Cursor::new(&bytes), FramePolicy::Halve).unwrap();
        assert_eq!(info.frames, 50);
        assert_eq!(info.data_frames(), 101);
    }

    #[test]
    fn test_bad_magic() {
        let mut bytes = header_bytes(WavFormat::pcm(1, 8000, SampleDepth::S16), 4);
        bytes[0] = b'X';
        let err = read_header(&mut Cursor::new(&bytes), FramePolicy::KeepAll).unwrap_err();
        assert!(matches!(err, ContainerError::Malformed(_)));

        let mut bytes = header_bytes(WavFormat::pcm(1, 8000, SampleDepth::S16), 4);
        bytes[8..12].copy_from_slice(b"AVI ");
        let err = read_header(&mut Cursor::new(&bytes), FramePolicy::KeepAll).unwrap_err();
        assert!(matches!(err, ContainerError::Malformed(_)));
    }

    #[test]
    fn test_truncated_header() {
        let bytes = header_bytes(WavFormat::pcm(1, 8000, SampleDepth::S16), 4);
        for cut in [0, 6, 12, 20, 30, 40] {
            let err = read_header(&mut Cursor::new(&bytes[..cut]), FramePolicy::KeepAll)
                .unwrap_err();
            assert!(
                matches!(err, ContainerError::Truncated(_)),
                "cut at {} gave {:?}",
                cut,
                err
            );
        }
    }

    #[test]
    fn test_extended_format_chunk_skipped() {
        let format = WavFormat::pcm(1, 16000, SampleDepth::S16);
        let mut bytes = Vec::new();
        bytes.extend_from_slice(b"RIFF");
        bytes.extend_from_slice(&0u32.to_le_bytes());
        bytes.extend_from_slice(b"WAVE");
        bytes.extend_from_slice(b"fmt ");
        bytes.extend_from_slice(&18u32.to_le_bytes());
        format.write_to(&mut bytes).unwrap();
        bytes.extend_from_slice(&[0xaa, 0xbb]); // cbSize extension
        bytes.extend_from_slice(b"LIST");
        bytes.extend_from_slice(&5u32.to_le_bytes());
        bytes.extend_from_slice(b"abcde");
        bytes.extend_from_slice(b"data");
        bytes.extend_from_slice(&8u32.to_le_bytes());
        bytes.extend_from_slice(&[1, 0, 2, 0, 3, 0, 4, 0]);

        let mut reader = WavReader::new(Cursor::new(bytes), FramePolicy::KeepAll).unwrap();
        assert_eq!(reader.info().frames, 4);
        let buf = reader.read_exact_frames(4).unwrap();
        assert_eq!(buf.channel_samples(0), vec![1.0, 2.0, 3.0, 4.0]);
    }

    #[test]
    fn test_data_before_format() {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(b"RIFF");
        bytes.extend_from_slice(&0u32.to_le_bytes());
        bytes.extend_from_slice(b"WAVE");
        bytes.extend_from_slice(b"data");
        bytes.extend_from_slice(&0u32.to_le_bytes());
        let err = read_header(&mut Cursor::new(bytes), FramePolicy::KeepAll).unwrap_err();
        assert!(matches!(err, ContainerError::Malformed(_)));
    }

    #[test]
    fn test_non_pcm_rejected() {
        let mut format = WavFormat::pcm(1, 8000, SampleDepth::S32);
        format.format_code = 3; // IEEE float
        let bytes = header_bytes(format, 4);
        let err = read_header(&mut Cursor::new(bytes), FramePolicy::KeepAll).unwrap_err();
        assert!(matches!(err, ContainerError::Unsupported(_)));
    }

    #[test]
    fn test_writer_patches_lengths() {
        let format = WavFormat::pcm(2, 8000, SampleDepth::S16);
        let mut writer = WavWriter::new(Cursor::new(Vec::new()), format, 1000).unwrap();

        let mut buf = PcmBuffer::new(3, 2, SampleDepth::S16);
        buf.set_sample(0, 0, 7);
        writer.write_frames(&buf).unwrap();
        writer.write_first_frames(&buf, 2).unwrap();
        assert_eq!(writer.frames_written(), 5);

        let bytes = writer.finish().unwrap().into_inner();
        assert_eq!(bytes.len(), HEADER_SIZE as usize + 20);
        assert_eq!(u32::from_le_bytes(bytes[4..8].try_into().unwrap()), 20 + 36);
        assert_eq!(u32::from_le_bytes(bytes[40..44].try_into().unwrap()), 20);

        let mut reader = WavReader::new(Cursor::new(bytes), FramePolicy::KeepAll).unwrap();
        assert_eq!(reader.info().frames, 5);
        let read = reader.read_exact_frames(5).unwrap();
        assert_eq!(read.sample(0, 0), 7);
        assert_eq!(read.sample(3, 0), 7);
    }

    #[test]
    fn test_writer_rejects_wrong_shape() {
        let format = WavFormat::pcm(2, 8000, SampleDepth::S16);
        let mut writer = WavWriter::new(Cursor::new(Vec::new()), format, 10).unwrap();
        let mono = PcmBuffer::new(3, 1, SampleDepth::S16);
        assert!(matches!(
            writer.write_frames(&mono),
            Err(ContainerError::FormatMismatch { .. })
        ));
    }

    #[test]
    fn test_reader_stops_at_short_file() {
        let format = WavFormat::pcm(1, 8000, SampleDepth::S16);
        let mut bytes = header_bytes(format, 100);
        bytes.extend_from_slice(&[1, 0, 2, 0, 3]);

        let mut reader = WavReader::new(Cursor::new(bytes), FramePolicy::KeepAll).unwrap();
        let mut buf = PcmBuffer::new(64, 1, SampleDepth::S16);
        assert_eq!(reader.read_frames(&mut buf).unwrap(), 2);
        assert_eq!(reader.read_frames(&mut buf).unwrap(), 0);
    }

    #[test]
    fn test_read_exact_frames_short() {
        let format = WavFormat::pcm(1, 8000, SampleDepth::S8);
        let mut bytes = header_bytes(format, 3);
        bytes.extend_from_slice(&[1, 2, 3]);
        let mut reader = WavReader::new(Cursor::new(bytes), FramePolicy::KeepAll).unwrap();
        assert!(matches!(
            reader.read_exact_frames(4),
            Err(ContainerError::Truncated(_))
        ));
    }
}
