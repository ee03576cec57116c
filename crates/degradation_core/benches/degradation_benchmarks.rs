//! Criterion benchmarks for the degradation engine.
//!
//! Run with: cargo bench -p degradation_core
//! Run specific: cargo bench -p degradation_core -- filter2d

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use ndarray::Array4;
use rand::prelude::*;

use degradation_core::compression::{ArtifactSimulator, JpegSimulator};
use degradation_core::filtering::filter2d;
use degradation_core::resize::resize;
use degradation_core::sharpen::UsmSharpener;
use degradation_core::{
    DegradationPipeline, KernelBatch, KernelConfig, KernelSynthesizer, PipelineConfig, ResizeMode,
};

// =============================================================================
// Helper Functions for Test Data Generation
// =============================================================================

fn random_batch(b: usize, size: usize, seed: u64) -> Array4<f32> {
    let mut rng = StdRng::seed_from_u64(seed);
    Array4::from_shape_fn((b, 3, size, size), |_| rng.gen())
}

// =============================================================================
// Kernel Benchmarks
// =============================================================================

fn bench_kernel_synthesis(c: &mut Criterion) {
    let mut group = c.benchmark_group("kernel_synthesis");
    let synthesizer = KernelSynthesizer::new(KernelConfig::default());

    group.bench_function("single", |b| {
        let mut rng = StdRng::seed_from_u64(1);
        b.iter(|| synthesizer.synthesize(black_box(&mut rng)))
    });

    for count in [4, 16, 64] {
        group.throughput(Throughput::Elements(count as u64));
        group.bench_with_input(BenchmarkId::new("batch", count), &count, |b, &count| {
            let mut rng = StdRng::seed_from_u64(2);
            b.iter(|| synthesizer.synthesize_batch(count, &mut rng))
        });
    }

    group.finish();
}

// =============================================================================
// Primitive Benchmarks
// =============================================================================

fn bench_filter2d(c: &mut Criterion) {
    let mut group = c.benchmark_group("filter2d");
    let synthesizer = KernelSynthesizer::new(KernelConfig::default());
    let mut rng = StdRng::seed_from_u64(3);
    let kernels = KernelBatch::stack(&synthesizer.synthesize_batch(4, &mut rng));

    for size in [64, 128, 256] {
        let batch = random_batch(4, size, 4);
        group.throughput(Throughput::Elements((4 * 3 * size * size) as u64));
        group.bench_with_input(BenchmarkId::new("blur", size), &size, |b, _| {
            b.iter(|| filter2d(black_box(batch.view()), kernels.kernel1.view()))
        });
    }

    group.finish();
}

fn bench_resize(c: &mut Criterion) {
    let mut group = c.benchmark_group("resize");
    let batch = random_batch(4, 256, 5);

    for mode in ResizeMode::ALL {
        group.bench_with_input(BenchmarkId::new("down_x4", format!("{mode:?}")), &mode, |b, &mode| {
            b.iter(|| resize(black_box(batch.view()), 64, 64, mode))
        });
    }

    group.finish();
}

fn bench_jpeg_and_usm(c: &mut Criterion) {
    let mut group = c.benchmark_group("artifacts");
    let batch = random_batch(4, 128, 6);
    let jpeg = JpegSimulator::new();
    let usm = UsmSharpener::default();

    group.bench_function("jpeg_q50", |b| b.iter(|| jpeg.compress(black_box(batch.view()), 50.0)));
    group.bench_function("usm", |b| b.iter(|| usm.sharpen(black_box(batch.view()))));

    group.finish();
}

// =============================================================================
// Full Pipeline Benchmarks
// =============================================================================

fn bench_pipeline(c: &mut Criterion) {
    let mut group = c.benchmark_group("pipeline");
    group.sample_size(10);

    let synthesizer = KernelSynthesizer::new(KernelConfig::default());
    let mut rng = StdRng::seed_from_u64(7);
    let gt = random_batch(4, 256, 8);
    let kernels = KernelBatch::stack(&synthesizer.synthesize_batch(4, &mut rng));
    let config = PipelineConfig {
        queue_size: 0,
        ..PipelineConfig::default()
    };
    let mut pipeline = DegradationPipeline::new(config);

    group.throughput(Throughput::Elements(4));
    group.bench_function("degrade_batch_4x256", |b| {
        b.iter(|| pipeline.degrade_batch(black_box(gt.view()), &kernels, &mut rng))
    });

    group.finish();
}

// =============================================================================
// Criterion Configuration
// =============================================================================

criterion_group!(
    benches,
    bench_kernel_synthesis,
    bench_filter2d,
    bench_resize,
    bench_jpeg_and_usm,
    bench_pipeline,
);

criterion_main!(benches);
