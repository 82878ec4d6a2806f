//! Audio processing module
//!
//! This module contains all audio-related functionality including:
//! - Interleaved PCM buffers and sample encodings ([`pcm`])
//! - Phase-continuous sine generation ([`signal`])
//! - RIFF/WAVE container codec ([`wav`])
//! - Blocking PCM endpoint capability ([`endpoint`])
//! - Software loopback backend ([`virtual_loop`])
//! - cpal hardware backend ([`hardware`], feature `hardware`)
//! - Playback and capture task loops ([`stream`])
//! - FFT peak detection and verdicts ([`analyzer`])

pub mod analyzer;
pub mod endpoint;
#[cfg(feature = "hardware")]
pub mod hardware;
pub mod pcm;
pub mod signal;
pub mod stream;
pub mod virtual_loop;
pub mod wav;
