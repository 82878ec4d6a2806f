//! Spectral analysis throughput at typical capture lengths

use audiobat::audio::pcm::SampleDepth;
use audiobat::config::Tolerance;
use audiobat::{SineGenerator, SpectralAnalyzer};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};

fn bench_analyze_channel(c: &mut Criterion) {
    let mut group = c.benchmark_group("analyze_channel");
    for (rate, seconds) in [(44100u32, 1u32), (48000, 2), (96000, 2)] {
        let frames = (rate * seconds) as usize;
        let samples = SineGenerator::new(rate, SampleDepth::S16, &[997.0])
            .generate(frames)
            .channel_samples(0);
        let mut analyzer = SpectralAnalyzer::new(rate, 3.0, Tolerance::default());

        group.bench_with_input(BenchmarkId::from_parameter(frames), &samples, |b, samples| {
            b.iter(|| analyzer.analyze_channel(0, black_box(samples), 997.0))
        });
    }
    group.finish();
}

criterion_group!(benches, bench_analyze_channel);
criterion_main!(benches);
