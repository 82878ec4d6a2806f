//! Sine test signal generation
//!
//! Produces interleaved integer PCM with one sine per channel. The phase is a
//! sample counter that survives between calls, so consecutive buffers join
//! without discontinuity.

use crate::audio::pcm::{PcmBuffer, SampleDepth};
use crate::config::TestConfig;
use std::f64::consts::PI;

/// Multi-channel sine generator
///
/// Each channel has its own frequency. The shared sample counter wraps every
/// `sample_rate` samples; that is a period of the counter, not of the tone.
///
/// # Example
/// ```
/// use audiobat_core::audio::pcm::SampleDepth;
/// use audiobat_core::audio::signal::SineGenerator;
///
/// let mut gen = SineGenerator::new(48000, SampleDepth::S16, &[1000.0, 440.0]);
/// let buf = gen.generate(256);
/// assert_eq!(buf.frames(), 256);
/// assert_eq!(buf.channels(), 2);
/// ```
#[derive(Debug, Clone)]
pub struct SineGenerator {
    /// Sample rate in Hz
    sample_rate: u32,
    /// Output encoding
    depth: SampleDepth,
    /// Per-channel frequency as a fraction of the sample rate
    steps: Vec<f64>,
    /// Peak amplitude in sample units
    amplitude: f64,
    /// Sample counter, wraps at `sample_rate`
    phase: u32,
}

impl SineGenerator {
    /// Create a generator with one channel per entry in `freqs`
    ///
    /// The amplitude defaults to the depth's [`SampleDepth::max_amplitude`].
    ///
    /// # Panics
    /// Panics if `freqs` is empty or `sample_rate` is zero
    pub fn new(sample_rate: u32, depth: SampleDepth, freqs: &[f64]) -> Self {
        assert!(!freqs.is_empty(), "At least one channel frequency is required");
        assert!(sample_rate > 0, "Sample rate must be non-zero");

        Self {
            sample_rate,
            depth,
            steps: freqs.iter().map(|f| f / sample_rate as f64).collect(),
            amplitude: depth.max_amplitude(),
            phase: 0,
        }
    }

    /// Generator matching a validated test configuration
    pub fn from_config(config: &TestConfig) -> Self {
        Self::new(config.sample_rate, config.depth, &config.target_freqs)
    }

    /// Override the peak amplitude, capped at the depth's safe maximum
    pub fn with_amplitude(mut self, amplitude: f64) -> Self {
        self.amplitude = amplitude.abs().min(self.depth.max_amplitude());
        self
    }

    /// Generate `frames` frames, advancing the phase
    pub fn generate(&mut self, frames: usize) -> PcmBuffer {
        let mut buf = PcmBuffer::new(frames, self.channels(), self.depth);
        self.fill(&mut buf);
        buf
    }

    /// Overwrite every frame of `buf`, advancing the phase
    ///
    /// `buf` must have the generator's channel count and depth.
    pub fn fill(&mut self, buf: &mut PcmBuffer) {
        debug_assert_eq!(buf.channels(), self.channels());
        debug_assert_eq!(buf.depth(), self.depth);

        for frame in 0..buf.frames() {
            for (channel, step) in self.steps.iter().enumerate() {
                let value = (2.0 * PI * self.phase as f64 * step).sin() * self.amplitude;
                buf.set_sample(frame, channel as u16, value.round() as i32);
            }
            self.phase += 1;
            if self.phase == self.sample_rate {
                self.phase = 0;
            }
        }
    }

    /// Current sample counter
    pub fn phase(&self) -> u32 {
        self.phase
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn channels(&self) -> u16 {
        self.steps.len() as u16
    }

    pub fn depth(&self) -> SampleDepth {
        self.depth
    }

    pub fn amplitude(&self) -> f64 {
        self.amplitude
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_starts_at_zero() {
        let mut gen = SineGenerator::new(48000, SampleDepth::S16, &[1000.0]);
        let buf = gen.generate(4);
        assert_eq!(buf.sample(0, 0), 0);
        assert!(buf.sample(1, 0) > 0);
    }

    #[test]
    fn test_quarter_period_reaches_amplitude() {
        // 1000 Hz at 48 kHz: 48 samples per cycle, peak at sample 12
        let mut gen = SineGenerator::new(48000, SampleDepth::S16, &[1000.0]);
        let buf = gen.generate(48);
        assert_eq!(buf.sample(12, 0), SampleDepth::S16.max_amplitude() as i32);
        assert_eq!(buf.sample(36, 0), -(SampleDepth::S16.max_amplitude() as i32));
    }

    #[test]
    fn test_never_exceeds_amplitude() {
        for depth in [SampleDepth::S8, SampleDepth::S16, SampleDepth::S24, SampleDepth::S32] {
            let mut gen = SineGenerator::new(44100, depth, &[997.0]);
            let buf = gen.generate(4410);
            let limit = depth.max_amplitude() as i32;
            for frame in 0..buf.frames() {
                let v = buf.sample(frame, 0);
                assert!(v.abs() <= limit, "{:?}: {} exceeds {}", depth, v, limit);
            }
        }
    }

    #[test]
    fn test_channels_independent() {
        let mut gen = SineGenerator::new(8000, SampleDepth::S16, &[1000.0, 2000.0]);
        let buf = gen.generate(8);
        // 2000 Hz at 8 kHz: quarter period is 1 sample
        assert_eq!(buf.sample(1, 1), SampleDepth::S16.max_amplitude() as i32);
        assert_ne!(buf.sample(1, 0), buf.sample(1, 1));
    }

    #[test]
    fn test_phase_wraps_at_sample_rate() {
        let mut gen = SineGenerator::new(100, SampleDepth::S8, &[10.0]);
        gen.generate(99);
        assert_eq!(gen.phase(), 99);
        gen.generate(1);
        assert_eq!(gen.phase(), 0);
        gen.generate(5);
        assert_eq!(gen.phase(), 5);
    }

    #[test]
    fn test_continuation_matches_single_call() {
        let mut split = SineGenerator::new(44100, SampleDepth::S24, &[997.0, 1500.0]);
        let mut whole = split.clone();

        let mut bytes = split.generate(300).into_bytes();
        bytes.extend(split.generate(700).into_bytes());

        assert_eq!(bytes, whole.generate(1000).into_bytes());
    }

    #[test]
    fn test_with_amplitude_capped() {
        let gen = SineGenerator::new(8000, SampleDepth::S8, &[100.0]).with_amplitude(1e9);
        assert_eq!(gen.amplitude(), SampleDepth::S8.max_amplitude());

        let gen = SineGenerator::new(8000, SampleDepth::S8, &[100.0]).with_amplitude(50.0);
        assert_eq!(gen.amplitude(), 50.0);
    }

    #[test]
    #[should_panic]
    fn test_no_channels() {
        SineGenerator::new(8000, SampleDepth::S16, &[]);
    }
}
