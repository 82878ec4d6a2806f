//! E2E tests for sine generation and interleaving
//!
//! Verifies phase continuity across buffer boundaries, which the playback
//! task relies on, and the de-interleave/interleave pair used by analysis.

use audiobat::audio::pcm::{PcmBuffer, SampleDepth};
use audiobat::SineGenerator;

/// Generating k then m frames equals generating k+m frames at once
#[test]
fn test_phase_continuity_across_buffers() {
    for depth in [SampleDepth::S8, SampleDepth::S16, SampleDepth::S24, SampleDepth::S32] {
        let mut whole = SineGenerator::new(44100, depth, &[997.0, 1500.0]);
        let mut pieces = whole.clone();

        let expected = whole.generate(50_000).into_bytes();
        let mut actual = Vec::new();
        // Uneven sizes, crossing the counter wrap at 44100
        for size in [1, 1102, 7, 30_000, 18_890] {
            actual.extend(pieces.generate(size).into_bytes());
        }
        assert_eq!(actual, expected, "{:?}", depth);
    }
}

/// The tone is at the requested frequency: zero crossings per second
#[test]
fn test_zero_crossings() {
    let mut gen = SineGenerator::new(48000, SampleDepth::S16, &[1000.0]);
    let buf = gen.generate(48000);
    let samples = buf.channel_samples(0);

    let rising = samples
        .windows(2)
        .filter(|w| w[0] < 0.0 && w[1] >= 0.0)
        .count();
    assert!((999..=1001).contains(&rising), "{} rising crossings", rising);
}

#[test]
fn test_deinterleave_then_interleave() {
    let mut gen = SineGenerator::new(8000, SampleDepth::S24, &[440.0, 1000.0]);
    let original = gen.generate(1234);

    let channels = original.deinterleave();
    assert_eq!(channels.len(), 2);
    assert_eq!(channels[1].frames(), 1234);
    for frame in [0, 17, 1233] {
        assert_eq!(channels[0].sample(frame, 0), original.sample(frame, 0));
        assert_eq!(channels[1].sample(frame, 0), original.sample(frame, 1));
    }

    let restored = PcmBuffer::interleave(&channels).unwrap();
    assert_eq!(restored, original);
}

#[test]
fn test_amplitude_headroom() {
    for depth in [SampleDepth::S8, SampleDepth::S16, SampleDepth::S24, SampleDepth::S32] {
        let mut gen = SineGenerator::new(48000, depth, &[1000.0]);
        let buf = gen.generate(48);
        let peak = (0..48).map(|f| buf.sample(f, 0)).max().unwrap();
        assert!(peak > 0);
        assert!(peak < depth.max_value(), "{:?} peak {} has no headroom", depth, peak);
    }
}
