//! Benchmarks for scoring and scheduling.
//!
//! Run with: cargo bench

use std::hint::black_box;
use std::sync::Arc;

use criterion::{BenchmarkId, Criterion};
use image::{Rgba, RgbaImage};
use sharpframe::{AnalysisState, SharpnessKernel, SharpnessMetrics, TaskOutcome, WorkerPool, sharpness};
use tokio::runtime::Runtime;

fn textured(width: u32, height: u32) -> RgbaImage {
    RgbaImage::from_fn(width, height, |x, y| {
        let value = ((x * 7 + y * 13) % 251) as u8;
        Rgba([value, value.wrapping_mul(3), 255 - value, 255])
    })
}

fn benchmark_scoring(criterion: &mut Criterion) {
    let mut group = criterion.benchmark_group("score");
    for (width, height) in [(160, 90), (320, 180), (1920, 1080)] {
        let image = textured(width, height);
        group.bench_with_input(
            BenchmarkId::from_parameter(format!("{width}x{height}")),
            &image,
            |bencher, image| bencher.iter(|| sharpness::score_image(black_box(image))),
        );
    }
    group.finish();

    let image = textured(160, 90);
    criterion.bench_function("metrics 160x90", |bencher| {
        bencher.iter(|| {
            SharpnessMetrics::compute(black_box(image.as_raw()), 160, 90)
                .unwrap()
                .unwrap()
        });
    });
}

fn benchmark_scheduling(criterion: &mut Criterion) {
    criterion.bench_function("plan 10k frames", |bencher| {
        bencher.iter(|| {
            let mut state = AnalysisState::new(10_000, 3);
            loop {
                let launched = state.tick();
                if launched.is_empty() {
                    break;
                }
                for frame in launched {
                    state.complete(
                        frame,
                        TaskOutcome::Scored {
                            score: frame as f64,
                            time: 0.0,
                        },
                    );
                }
            }
            black_box(state.store().scored_count())
        });
    });

    criterion.bench_function("priority window on a busy queue", |bencher| {
        bencher.iter(|| {
            let mut state = AnalysisState::new(10_000, 3);
            for center in (100..10_000).step_by(500) {
                state.request_priority(center, 10);
            }
            black_box(state.priority_queue().len())
        });
    });
}

fn benchmark_pool(criterion: &mut Criterion) {
    let runtime = Runtime::new().unwrap();
    let pool = Arc::new(WorkerPool::new(3, Arc::new(SharpnessKernel)));
    let image = textured(160, 90);

    let mut group = criterion.benchmark_group("worker_pool");
    group.sample_size(30);
    group.bench_function("submit 12 frames", |bencher| {
        bencher.iter(|| {
            runtime.block_on(async {
                let mut handles = Vec::new();
                for _ in 0..12 {
                    let pool = Arc::clone(&pool);
                    let pixels = image.as_raw().clone();
                    handles.push(tokio::spawn(async move {
                        pool.submit(pixels, 160, 90, None).await.unwrap()
                    }));
                }
                for handle in handles {
                    black_box(handle.await.unwrap());
                }
            });
        });
    });
    group.finish();
}

criterion::criterion_group!(benches, benchmark_scoring, benchmark_scheduling, benchmark_pool);
criterion::criterion_main!(benches);
